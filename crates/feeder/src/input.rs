use std::io::BufRead;

use anyhow::{anyhow, bail, Context as _};
use funi_geom::Coordinate;

/// Parses one line of a path: `X Y`, optionally followed by `up` or `down`.
///
/// Blank lines and comments (starting with `#`) give `None`.
pub fn parse_line(line: &str) -> anyhow::Result<Option<Coordinate>> {
    let line = line.split_once('#').map_or(line, |(before, _)| before).trim();
    if line.is_empty() {
        return Ok(None);
    }

    let mut words = line.split_whitespace();
    let mut number = |name: &str| -> anyhow::Result<f64> {
        let word = words.next().ok_or_else(|| anyhow!("missing {name}"))?;
        let value: f64 = word.parse().with_context(|| format!("bad {name} {word:?}"))?;
        if !value.is_finite() {
            bail!("{name} must be finite, got {word:?}");
        }
        Ok(value)
    };
    let x = number("x")?;
    let y = number("y")?;

    let pen_up = match words.next() {
        None | Some("down") => false,
        Some("up") => true,
        Some(other) => bail!("expected \"up\" or \"down\", got {other:?}"),
    };
    if let Some(extra) = words.next() {
        bail!("unexpected {extra:?} at the end of the line");
    }

    Ok(Some(Coordinate::with_pen(x, y, pen_up)))
}

/// Reads a whole path, lazily.
pub fn read_path(input: impl BufRead) -> impl Iterator<Item = anyhow::Result<Coordinate>> {
    input.lines().enumerate().filter_map(|(i, line)| {
        let parsed = line
            .context("failed to read the path")
            .and_then(|line| parse_line(&line))
            .with_context(|| format!("line {}", i + 1));
        parsed.transpose()
    })
}

//! Small transformations of a path, applied before it gets stepped.

use std::iter::Peekable;

use funi_geom::Coordinate;

/// Skips the middle of every run of pen-up coordinates.
///
/// With the pen up, the route between two drawn parts doesn't matter, so we
/// only keep the first and the last point of each pen-up run and go straight
/// from one to the other.
pub struct PenUpShortcut<I: Iterator> {
    coords: Peekable<I>,
    // The end of a pen-up run, waiting to be handed out.
    run_end: Option<Coordinate>,
}

impl<I: Iterator<Item = Coordinate>> PenUpShortcut<I> {
    pub fn new(iter: I) -> Self {
        Self {
            coords: iter.peekable(),
            run_end: None,
        }
    }
}

impl<I: Iterator<Item = Coordinate>> Iterator for PenUpShortcut<I> {
    type Item = Coordinate;

    fn next(&mut self) -> Option<Coordinate> {
        if let Some(c) = self.run_end.take() {
            return Some(c);
        }

        let ret = self.coords.next()?;
        if ret.pen_up {
            let mut skipped = 0;
            while let Some(c) = self.coords.next_if(|c| c.pen_up) {
                if self.run_end.replace(c).is_some() {
                    skipped += 1;
                }
            }
            if skipped > 0 {
                log::trace!("skipped {skipped} pen-up points after {ret}");
            }
        }
        Some(ret)
    }
}

/// Mirrors every coordinate, for drawings whose axes point the wrong way.
pub fn flip(
    coords: impl Iterator<Item = Coordinate>,
    flip_x: bool,
    flip_y: bool,
) -> impl Iterator<Item = Coordinate> {
    coords.map(move |c| c.flipped(flip_x, flip_y))
}

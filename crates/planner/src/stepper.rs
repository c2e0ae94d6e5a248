//! Turning a path into per-slice step commands.
//!
//! Cable lengths are tracked as the starting lengths plus a whole number of
//! emitted sub-steps (a step divided by [`funi_geom::STEPS_FIXED_POINT_FACTOR`]),
//! so the position that the motors actually reach never drifts from the
//! position we think they reached.

use funi_geom::{Config, ConfigError, Coordinate, PolarCoordinate, PolarSystem};
use funi_protocol::StepCommand;

use crate::{Interpolator, MotionLimits, TrapezoidInterpolator};

/// Cable lengths, as the starting lengths plus the sub-steps emitted so far.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StepAccumulator {
    // Starting lengths in sub-steps. These needn't be whole.
    start_left: f64,
    start_right: f64,
    /// Sub-steps emitted since the start.
    pub left: i64,
    pub right: i64,
}

impl StepAccumulator {
    /// Starts at the given cable lengths (in mm), with nothing emitted.
    pub fn new(start: &PolarCoordinate, steps_per_mm: f64) -> Self {
        StepAccumulator {
            start_left: start.left_dist * steps_per_mm,
            start_right: start.right_dist * steps_per_mm,
            left: 0,
            right: 0,
        }
    }

    /// Forgets everything emitted, going back to the starting lengths.
    pub fn reset(&mut self) {
        self.left = 0;
        self.right = 0;
    }

    pub fn to_polar(self, steps_per_mm: f64) -> PolarCoordinate {
        PolarCoordinate::new(
            (self.start_left + self.left as f64) / steps_per_mm,
            (self.start_right + self.right as f64) / steps_per_mm,
        )
    }

    /// Moves towards `target` (in mm) by as much as one slice allows, returning
    /// the change in sub-steps for each cable.
    pub fn advance(&mut self, target: &PolarCoordinate, steps_per_mm: f64) -> (i32, i32) {
        let left = quantize(
            &mut self.left,
            target.left_dist * steps_per_mm - self.start_left,
        );
        let right = quantize(
            &mut self.right,
            target.right_dist * steps_per_mm - self.start_right,
        );
        (left, right)
    }
}

// Rounds up, so that the emitted total never falls behind the target (both
// relative to the start) by more than a single sub-step.
fn quantize(emitted: &mut i64, target: f64) -> i32 {
    let max = i64::from(funi_protocol::STEPS_MAX_VALUE);
    let delta = ((target - *emitted as f64).ceil() as i64).clamp(-max, max);
    *emitted += delta;
    delta as i32
}

/// Produces step commands for a sequence of target coordinates.
///
/// Coordinates are pulled lazily, one ahead of the segment being stepped (the
/// interpolator needs to know where we're going next). Every slice yields two
/// commands, left then right; pen changes yield the same pen command twice.
/// The pen starts up.
pub struct StepGenerator<I, P> {
    coords: I,
    interp: P,
    system: PolarSystem,
    steps_per_mm: f64,

    acc: StepAccumulator,
    pen_up: bool,

    // The destination of the segment after the current one.
    target: Option<Coordinate>,
    slice: u32,
    slices: u32,
    pending: Option<StepCommand>,
}

impl<I: Iterator<Item = Coordinate>> StepGenerator<I, TrapezoidInterpolator> {
    pub fn trapezoid(
        config: &Config,
        coords: impl IntoIterator<IntoIter = I>,
    ) -> Result<Self, ConfigError> {
        let interp = TrapezoidInterpolator::new(MotionLimits::from(config));
        StepGenerator::new(config, coords, interp)
    }
}

impl<I: Iterator<Item = Coordinate>, P: Interpolator> StepGenerator<I, P> {
    pub fn new(
        config: &Config,
        coords: impl IntoIterator<IntoIter = I>,
        interp: P,
    ) -> Result<Self, ConfigError> {
        let system = config.polar_system()?;
        let steps_per_mm = config.steps_per_mm();
        let acc = StepAccumulator::new(&config.starting_lengths(), steps_per_mm);
        let mut coords = coords.into_iter();
        let target = coords.next();

        log::info!(
            "starting at {} (surface x {:.1}..{:.1}, y {:.1}..{:.1} relative to the motors)",
            config.starting_lengths(),
            system.x_min,
            system.x_max,
            system.y_min,
            system.y_max
        );

        Ok(StepGenerator {
            coords,
            interp,
            system,
            steps_per_mm,
            acc,
            pen_up: true,
            target,
            slice: 0,
            slices: 0,
            pending: None,
        })
    }

    /// Cable lengths that have been sent so far, in mm.
    pub fn polar_position(&self) -> PolarCoordinate {
        self.acc.to_polar(self.steps_per_mm)
    }

    /// The position that has been sent so far, in drawing coordinates.
    pub fn current_position(&self) -> Coordinate {
        self.system.to_coord(&self.polar_position())
    }

    pub fn system(&self) -> &PolarSystem {
        &self.system
    }

    // Returns false if there are no more segments.
    fn start_segment(&mut self) -> bool {
        let Some(target) = self.target.take() else {
            return false;
        };
        self.target = self.coords.next();
        let next = self.target.unwrap_or(target);

        // Start from where we really are, not where we were aiming for.
        let origin = self.current_position();

        if target.pen_up != self.pen_up {
            self.pen_up = target.pen_up;
            let cmd = if target.pen_up {
                StepCommand::PenUp
            } else {
                StepCommand::PenDown
            };
            log::debug!("{cmd:?} at {origin}");
            self.pending = Some(cmd);
        }

        if !self.system.contains(&target) {
            log::warn!("{target} is outside the drawing surface, clipping");
        }

        self.interp.setup(origin, target, next);
        self.slice = 0;
        self.slices = self.interp.slices();
        true
    }

    fn step(&mut self) -> [StepCommand; 2] {
        self.slice += 1;
        let target = self.interp.position(self.slice);
        let polar = self.system.to_polar(&target);
        let (left, right) = self.acc.advance(&polar, self.steps_per_mm);
        StepCommand::slice(left, right)
    }
}

impl<I: Iterator<Item = Coordinate>, P: Interpolator> Iterator for StepGenerator<I, P> {
    type Item = StepCommand;

    fn next(&mut self) -> Option<StepCommand> {
        loop {
            if let Some(cmd) = self.pending.take() {
                return Some(cmd);
            }
            if self.slice < self.slices {
                let [left, right] = self.step();
                self.pending = Some(right);
                return Some(left);
            }
            if !self.start_segment() {
                return None;
            }
            // Pen commands are sent twice, so that they occupy a whole slice.
            if let Some(cmd) = self.pending {
                return Some(cmd);
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

/// Step commands that wind one cable out by `distance` mm (or in, if
/// `distance` is negative), leaving the other one alone.
///
/// This doesn't look at the drawing surface at all; it's meant for manually
/// adjusting the cables before a drawing.
pub fn spool_steps(config: &Config, side: Side, distance: f64) -> Vec<StepCommand> {
    let mut interp = TrapezoidInterpolator::new(MotionLimits::from(config));
    let origin = Coordinate::new(0.0, 0.0);
    let dest = Coordinate::new(distance, 0.0);
    interp.setup(origin, dest, origin);

    let steps_per_mm = config.steps_per_mm();
    let mut acc = 0;
    let mut ret = Vec::with_capacity(2 * interp.slices() as usize);
    for slice in 1..=interp.slices() {
        let delta = quantize(&mut acc, interp.position(slice).x * steps_per_mm);
        let [left, right] = match side {
            Side::Left => StepCommand::slice(delta, 0),
            Side::Right => StepCommand::slice(0, delta),
        };
        ret.push(left);
        ret.push(right);
    }
    ret
}

#[cfg(test)]
mod tests {
    use funi_geom::{ConfigBuilder, LenExt as _};
    use proptest::prelude::*;

    use super::*;
    use crate::LinearInterpolator;

    fn config() -> Config {
        ConfigBuilder::default().build().unwrap()
    }

    fn up(x: f64, y: f64) -> Coordinate {
        Coordinate::with_pen(x, y, true)
    }

    fn down(x: f64, y: f64) -> Coordinate {
        Coordinate::new(x, y)
    }

    // Adds up the commands, returning the sub-steps emitted for each cable
    // and the pen commands that were seen.
    fn replay(cmds: &[StepCommand]) -> ((i64, i64), Vec<StepCommand>) {
        assert_eq!(cmds.len() % 2, 0);
        let mut emitted = (0, 0);
        let mut pens = Vec::new();
        for pair in cmds.chunks(2) {
            match (pair[0], pair[1]) {
                (StepCommand::Step(l), StepCommand::Step(r)) => {
                    emitted.0 += i64::from(StepCommand::left_delta(l));
                    emitted.1 += i64::from(r);
                }
                (a, b) => {
                    assert_eq!(a, b);
                    assert!(a.is_pen(), "unexpected {a:?}");
                    pens.push(a);
                }
            }
        }
        (emitted, pens)
    }

    // How far past `target` the real cables are, in sub-steps, given the
    // starting lengths and everything emitted so far.
    fn overshoot(config: &Config, emitted: (i64, i64), target: &PolarCoordinate) -> (f64, f64) {
        let spm = config.steps_per_mm();
        let start = config.starting_lengths();
        (
            (start.left_dist - target.left_dist) * spm + emitted.0 as f64,
            (start.right_dist - target.right_dist) * spm + emitted.1 as f64,
        )
    }

    #[test]
    fn starts_with_pen_up() {
        let cmds: Vec<_> = StepGenerator::trapezoid(&config(), [up(0.0, 0.0)])
            .unwrap()
            .collect();
        assert!(cmds.is_empty());

        let cmds: Vec<_> = StepGenerator::trapezoid(&config(), [down(0.0, 0.0)])
            .unwrap()
            .collect();
        assert_eq!(cmds, vec![StepCommand::PenDown, StepCommand::PenDown]);
    }

    #[test]
    fn fractional_start_stays_put() {
        // Starting lengths that are nowhere near a whole number of sub-steps.
        let spm = config().steps_per_mm();
        let start = (995_000.0 + 0.49) / spm;
        let config = ConfigBuilder::default()
            .with_starting_lengths(start.mm(), start.mm())
            .build()
            .unwrap();

        let cmds: Vec<_> = StepGenerator::trapezoid(&config, [up(0.0, 0.0), up(0.0, 0.0)])
            .unwrap()
            .collect();
        assert!(cmds.is_empty(), "{cmds:?}");

        let path = [down(30.0, 0.0), down(30.0, 30.0), down(0.0, 0.0)];
        let mut steps = StepGenerator::trapezoid(&config, path).unwrap();
        let cmds: Vec<_> = steps.by_ref().collect();
        let (emitted, _) = replay(&cmds);
        let target = steps.system().to_polar(&down(0.0, 0.0));
        let (left, right) = overshoot(&config, emitted, &target);
        assert!((-1e-6..1.0 + 1e-6).contains(&left), "{left}");
        assert!((-1e-6..1.0 + 1e-6).contains(&right), "{right}");
    }

    #[test]
    fn pen_changes_come_before_the_segment() {
        let path = [down(10.0, 0.0), down(10.0, 10.0), up(0.0, 0.0)];
        let cmds: Vec<_> = StepGenerator::trapezoid(&config(), path).unwrap().collect();

        assert_eq!(&cmds[..2], &[StepCommand::PenDown, StepCommand::PenDown]);
        assert!(matches!(cmds[2], StepCommand::Step(_)));
        let pen_up = cmds.iter().position(|c| *c == StepCommand::PenUp).unwrap();
        assert_eq!(pen_up % 2, 0);
        assert_eq!(cmds[pen_up + 1], StepCommand::PenUp);
        assert!(cmds[pen_up + 2..].iter().all(|c| !c.is_pen()));

        let (_, pens) = replay(&cmds);
        assert_eq!(pens, vec![StepCommand::PenDown, StepCommand::PenUp]);
    }

    #[test]
    fn reaches_the_target() {
        let config = config();
        let mut steps = StepGenerator::trapezoid(&config, [down(50.0, 20.0)]).unwrap();
        let cmds: Vec<_> = steps.by_ref().collect();
        // Within a sub-step of each cable is the best we can do.
        assert!((steps.current_position() - down(50.0, 20.0)).len() < 0.01);

        let (emitted, _) = replay(&cmds);
        let target = steps.system().to_polar(&down(50.0, 20.0));
        let (left, right) = overshoot(&config, emitted, &target);
        assert!((-1e-6..1.0 + 1e-6).contains(&left), "{left}");
        assert!((-1e-6..1.0 + 1e-6).contains(&right), "{right}");
    }

    #[test]
    fn position_while_stepping() {
        let config = config();
        let mut steps = StepGenerator::trapezoid(&config, [down(40.0, 0.0)]).unwrap();
        let mut last_x = steps.current_position().x;
        while let Some(cmd) = steps.next() {
            if cmd.is_pen() {
                continue;
            }
            let x = steps.current_position().x;
            assert!(x >= last_x - 0.01, "went backwards from {last_x} to {x}");
            last_x = x;
        }
        assert!((last_x - 40.0).abs() < 0.01, "{last_x}");
    }

    #[test]
    fn steps_stay_in_range() {
        let path = [down(-300.0, 500.0), down(300.0, -150.0), up(0.0, 0.0)];
        for cmd in StepGenerator::trapezoid(&config(), path).unwrap() {
            match cmd {
                StepCommand::Step(v) => assert!((-126..=126).contains(&v)),
                StepCommand::Reset => panic!("the generator never resets"),
                _ => {}
            }
        }
    }

    #[test]
    fn out_of_bounds_is_clipped() {
        let config = config();
        // Way off to the right and above the motors.
        let mut steps = StepGenerator::trapezoid(&config, [down(2000.0, -1000.0)]).unwrap();
        let _ = steps.by_ref().count();

        let sys = *steps.system();
        let corner = down(sys.x_max - sys.x_offset, sys.y_min - sys.y_offset);
        assert!((steps.current_position() - corner).len() < 0.05, "{}", steps.current_position());
    }

    #[test]
    fn linear_interpolator() {
        let config = config();
        let interp = LinearInterpolator::new(MotionLimits::from(&config));
        let mut steps = StepGenerator::new(&config, [down(0.0, 30.0)], interp).unwrap();
        let n = steps.by_ref().count();
        assert!(n > 2);
        assert!((steps.current_position() - down(0.0, 30.0)).len() < 0.01);
    }

    #[test]
    fn input_is_pulled_lazily() {
        let pulled = std::cell::Cell::new(0);
        let coords = (0..100).map(|i| {
            pulled.set(pulled.get() + 1);
            down(f64::from(i), 0.0)
        });
        let mut steps = StepGenerator::trapezoid(&config(), coords).unwrap();
        assert_eq!(pulled.get(), 1);
        steps.next();
        // The first segment, plus one to look ahead.
        assert_eq!(pulled.get(), 2);
    }

    #[test]
    fn impossible_start() {
        let config = ConfigBuilder::default()
            .with_starting_lengths(10.0.mm(), 10.0.mm())
            .build()
            .unwrap();
        assert!(StepGenerator::trapezoid(&config, [down(0.0, 0.0)]).is_err());
    }

    #[test]
    fn spool() {
        let config = config();
        let cmds = spool_steps(&config, Side::Left, 10.0);
        let total: i64 = cmds
            .chunks(2)
            .map(|pair| match pair {
                [StepCommand::Step(l), StepCommand::Step(r)] => {
                    assert_eq!(*r, 0);
                    i64::from(StepCommand::left_delta(*l))
                }
                _ => panic!("unexpected {pair:?}"),
            })
            .sum();
        let expected = 10.0 * config.steps_per_mm();
        assert!((total as f64 - expected).abs() <= 1.0);

        let cmds = spool_steps(&config, Side::Right, -10.0);
        let total: i64 = cmds
            .chunks(2)
            .map(|pair| match pair {
                [StepCommand::Step(0), StepCommand::Step(r)] => i64::from(*r),
                _ => panic!("unexpected {pair:?}"),
            })
            .sum();
        assert!((total as f64 + expected).abs() <= 1.0);
    }

    proptest! {
        // After every slice, the real cable lengths (the starting lengths plus
        // everything emitted) are within a sub-step of where the interpolator
        // wanted them.
        #[test]
        fn drift_is_bounded(points in prop::collection::vec((-400.0..400.0f64, -200.0..600.0f64, any::<bool>()), 1..8)) {
            let config = ConfigBuilder::default().with_slow_factor(1.5).build().unwrap();
            let path: Vec<_> = points.into_iter().map(|(x, y, pen_up)| Coordinate::with_pen(x, y, pen_up)).collect();
            let mut steps = StepGenerator::trapezoid(&config, path.iter().copied()).unwrap();
            let mut emitted = (0, 0);

            while let Some(left) = steps.next() {
                let right = steps.next().unwrap();
                let (StepCommand::Step(l), StepCommand::Step(r)) = (left, right) else {
                    prop_assert!(left.is_pen() && left == right);
                    continue;
                };
                emitted.0 += i64::from(StepCommand::left_delta(l));
                emitted.1 += i64::from(r);

                let target = steps.system.to_polar(&steps.interp.position(steps.slice));
                let (left, right) = overshoot(&config, emitted, &target);
                prop_assert!(left >= -1e-6 && left < 1.0 + 1e-6, "left cable off by {}", left);
                prop_assert!(right >= -1e-6 && right < 1.0 + 1e-6, "right cable off by {}", right);
            }

            let last = path[path.len() - 1];
            prop_assert!((steps.current_position() - last).len() < 0.05, "{} != {}", steps.current_position(), last);
        }
    }
}

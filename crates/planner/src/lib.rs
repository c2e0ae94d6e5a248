use funi_geom::{Config, Coordinate};

pub mod filter;
pub mod stepper;

/// The limits that a motion profile must respect.
#[derive(Clone, Copy, Debug)]
pub struct MotionLimits {
    /// In mm/s.
    pub max_speed: f64,
    /// In mm/s^2.
    pub acceleration: f64,
    /// Duration of a single slice, in seconds.
    pub time_slice: f64,
}

impl From<&Config> for MotionLimits {
    fn from(config: &Config) -> Self {
        MotionLimits {
            max_speed: config.max_speed,
            acceleration: config.acceleration,
            time_slice: funi_geom::time_slice_s(),
        }
    }
}

/// Moves the carriage along a single straight segment, split into time slices.
///
/// Given an origin, a destination and the destination after that, an
/// interpolator decides how many slices it takes to get from the origin to
/// the destination, and where the carriage is after each of them.
pub trait Interpolator {
    fn setup(&mut self, origin: Coordinate, dest: Coordinate, next_dest: Coordinate);

    /// How many slices the current segment takes.
    fn slices(&self) -> u32;

    /// Where the carriage is after `slice` slices of the current segment. At
    /// `slices()` this is the destination.
    fn position(&self, slice: u32) -> Coordinate;
}

/// Moves at max speed all the time, with infinite acceleration.
#[derive(Clone, Debug)]
pub struct LinearInterpolator {
    limits: MotionLimits,
    origin: Coordinate,
    destination: Coordinate,
    movement: Coordinate,
    distance: f64,
    time: f64,
    slices: u32,
}

impl LinearInterpolator {
    pub fn new(limits: MotionLimits) -> Self {
        Self {
            limits,
            origin: Coordinate::default(),
            destination: Coordinate::default(),
            movement: Coordinate::default(),
            distance: 0.0,
            time: 0.0,
            slices: 0,
        }
    }
}

impl Interpolator for LinearInterpolator {
    fn setup(&mut self, origin: Coordinate, dest: Coordinate, _next_dest: Coordinate) {
        self.origin = origin;
        self.destination = dest;
        self.movement = dest - origin;
        self.distance = self.movement.len();
        self.time = self.distance / self.limits.max_speed;
        self.slices = (self.time / self.limits.time_slice).ceil() as u32;
    }

    fn slices(&self) -> u32 {
        self.slices
    }

    fn position(&self, slice: u32) -> Coordinate {
        if self.slices == 0 {
            return self.origin;
        }
        let fraction = f64::from(slice) / f64::from(self.slices);
        Coordinate {
            pen_up: self.destination.pen_up,
            ..self.origin + self.movement * fraction
        }
    }
}

/// Accelerates, cruises and decelerates, with the speed at the end of each
/// segment chosen so that the carriage can take the corner into the next one.
///
/// The exit speed of one segment is the entry speed of the next, so a single
/// interpolator should be set up with consecutive segments of a path.
#[derive(Clone, Debug)]
pub struct TrapezoidInterpolator {
    limits: MotionLimits,

    origin: Coordinate,
    destination: Coordinate,
    // Unit vector from origin to destination.
    direction: Coordinate,

    entry_speed: f64,
    cruise_speed: f64,
    exit_speed: f64,

    // Only differs from the configured acceleration when there isn't enough
    // distance to slow down to the exit speed.
    deceleration: f64,

    distance: f64,
    time: f64,
    slices: u32,

    accel_time: f64,
    accel_dist: f64,
    cruise_time: f64,
    cruise_dist: f64,
    decel_time: f64,
    decel_dist: f64,
}

fn square(x: f64) -> f64 {
    x * x
}

impl TrapezoidInterpolator {
    pub fn new(limits: MotionLimits) -> Self {
        Self {
            limits,
            origin: Coordinate::default(),
            destination: Coordinate::default(),
            direction: Coordinate::new(0.0, 1.0),
            entry_speed: 0.0,
            cruise_speed: 0.0,
            exit_speed: 0.0,
            deceleration: limits.acceleration,
            distance: 0.0,
            time: 0.0,
            slices: 0,
            accel_time: 0.0,
            accel_dist: 0.0,
            cruise_time: 0.0,
            cruise_dist: 0.0,
            decel_time: 0.0,
            decel_dist: 0.0,
        }
    }

    pub fn entry_speed(&self) -> f64 {
        self.entry_speed
    }

    pub fn cruise_speed(&self) -> f64 {
        self.cruise_speed
    }

    pub fn exit_speed(&self) -> f64 {
        self.exit_speed
    }

    pub fn deceleration(&self) -> f64 {
        self.deceleration
    }

    /// How long the current segment takes, in seconds.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn distance(&self) -> f64 {
        self.distance
    }

    // Fills out the phases, given the distance and the entry and exit speeds.
    fn plan(&mut self) {
        let a = self.limits.acceleration;
        let d = self.distance;
        let v0 = self.entry_speed;
        let v1 = self.exit_speed;

        self.cruise_speed = self.limits.max_speed;
        self.accel_time = (self.cruise_speed - v0) / a;
        self.accel_dist = 0.5 * a * square(self.accel_time) + v0 * self.accel_time;
        self.decel_time = (self.cruise_speed - v1) / a;
        self.decel_dist = -0.5 * a * square(self.decel_time) + self.cruise_speed * self.decel_time;
        self.cruise_dist = d - (self.accel_dist + self.decel_dist);
        self.cruise_time = self.cruise_dist / self.cruise_speed;

        if self.cruise_dist >= 0.0 {
            return;
        }

        // There isn't enough room to reach max speed. Accelerating from v0 to vc
        // takes (vc^2 - v0^2) / 2a, and decelerating from vc to v1 takes
        // (vc^2 - v1^2) / 2a; together they must cover exactly d.
        self.cruise_speed = (a * d + (square(v0) + square(v1)) / 2.0).sqrt();
        self.accel_time = (self.cruise_speed - v0) / a;
        self.decel_time = (self.cruise_speed - v1) / a;
        self.cruise_dist = 0.0;
        self.cruise_time = 0.0;

        if self.accel_time >= 0.0 && self.decel_time >= 0.0 {
            self.accel_dist = 0.5 * a * square(self.accel_time) + v0 * self.accel_time;
            self.decel_dist = d - self.accel_dist;
            return;
        }

        if v1 > v0 {
            // Even accelerating the whole way, we can't reach the exit speed, so
            // we settle for whatever speed we get to.
            self.accel_time = ((square(v0) + 2.0 * a * d).sqrt() - v0) / a;
            self.accel_dist = d;
            self.decel_time = 0.0;
            self.decel_dist = 0.0;
            self.exit_speed = v0 + a * self.accel_time;
            self.cruise_speed = self.exit_speed;
        } else {
            // Even decelerating the whole way, we can't get down to the exit
            // speed, so we decelerate harder than we're supposed to.
            log::debug!(
                "decelerating from {v0:.2} to {v1:.2} mm/s over {d:.3} mm exceeds the acceleration limit"
            );
            self.accel_time = 0.0;
            self.accel_dist = 0.0;
            self.decel_time = 2.0 * d / (v0 + v1);
            self.decel_dist = d;
            self.deceleration = (v0 - v1) / self.decel_time;
            self.cruise_speed = v0;
        }
    }
}

impl Interpolator for TrapezoidInterpolator {
    fn setup(&mut self, origin: Coordinate, dest: Coordinate, next_dest: Coordinate) {
        let entry_speed = self.exit_speed;
        *self = TrapezoidInterpolator {
            origin,
            destination: dest,
            entry_speed,
            exit_speed: entry_speed,
            cruise_speed: entry_speed,
            ..TrapezoidInterpolator::new(self.limits)
        };

        // Not going anywhere (probably just moving the pen), so keep the speed
        // for the next segment.
        if origin.approx_eq(&dest) {
            return;
        }

        let movement = dest - origin;
        self.distance = movement.len();
        self.direction = movement.normalized();

        // If there's nowhere to go next, pretend that we're turning around so
        // that we come to a stop.
        let next_direction = if next_dest.approx_eq(&dest) {
            -self.direction
        } else {
            (next_dest - dest).normalized()
        };
        // Cubing makes us slow down a lot more for corners that aren't almost straight.
        let cos_angle = self.direction.dot(&next_direction);
        self.exit_speed = self.limits.max_speed * (cos_angle * cos_angle * cos_angle).max(0.0);

        self.plan();

        self.time = self.accel_time + self.cruise_time + self.decel_time;
        self.slices = (self.time / self.limits.time_slice).ceil() as u32;
        log::trace!("{self:?}");
    }

    fn slices(&self) -> u32 {
        self.slices
    }

    fn position(&self, slice: u32) -> Coordinate {
        if self.slices == 0 {
            return self.origin;
        }

        let a = self.limits.acceleration;
        let t = f64::from(slice) / f64::from(self.slices) * self.time;
        let distance = if t < self.accel_time {
            0.5 * a * square(t) + self.entry_speed * t
        } else if t < self.accel_time + self.cruise_time {
            self.accel_dist + (t - self.accel_time) * self.cruise_speed
        } else {
            let t = t - (self.accel_time + self.cruise_time);
            self.accel_dist
                + self.cruise_dist
                + self.cruise_speed * t
                - 0.5 * self.deceleration * square(t)
        };

        Coordinate {
            pen_up: self.destination.pen_up,
            ..self.origin + self.direction * distance.clamp(0.0, self.distance)
        }
    }
}

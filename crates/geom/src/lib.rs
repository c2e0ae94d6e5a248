//! Basic geometry of the plotter, including conversion from Cartesian
//! coordinates to cable lengths and the derived motion limits.
//!
//! We call the marker location the "carriage," and the two bits of string
//! are the "cables," which go from the carriage up to the two motors.
//!
//! This crate supports `no_std` and uses `libm` to allow for running in
//! embedded contexts, next to the stepper driver.

#![cfg_attr(not(feature = "std"), no_std)]

mod coordinate;
mod polar;

pub use coordinate::{Coordinate, PolarCoordinate, EPSILON};
pub use polar::{Circle, Intersection, LineSegment, PolarSystem};

pub type Angle = euclid::Angle<f64>;

pub struct Mm;

pub type Len = euclid::Length<f64, Mm>;

pub trait LenExt {
    fn mm(self) -> Len;
}

impl LenExt for f64 {
    fn mm(self) -> Len {
        Len::new(self)
    }
}

// These constants are baked into the stepper driver firmware, and they must
// match it.

/// Duration of one time slice, in microseconds. During a slice both motors
/// run at a constant speed.
pub const TIME_SLICE_US: f64 = 2048.0;

/// Step values on the wire are in units of `1 / STEPS_FIXED_POINT_FACTOR` steps.
pub const STEPS_FIXED_POINT_FACTOR: f64 = 32.0;

/// The largest magnitude of an ordinary step value. One byte holds -128..=127,
/// and -128, -127 and 127 are reserved.
pub const STEPS_MAX_VALUE: i8 = 126;

/// Time slice duration, in seconds.
pub fn time_slice_s() -> f64 {
    TIME_SLICE_US / 1_000_000.0
}

#[derive(Clone, Copy, Debug, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "starting cable lengths (L {left:.2}, R {right:.2}) can't reach each other across the motors"
    )]
    ImpossibleStartingPosition { left: f64, right: f64 },
    #[error("max speed must be positive, got {0} mm/s")]
    NonPositiveSpeed(f64),
    #[error("acceleration must be positive, got {0} mm/s^2")]
    NonPositiveAcceleration(f64),
    #[error("slow factor must be at least 1, got {0}")]
    InvalidSlowFactor(f64),
    #[error("{name} must be positive, got {value}")]
    NonPositiveDimension { name: &'static str, value: f64 },
}

pub struct ConfigBuilder {
    spool_circumference: Len,
    step_angle: Angle,
    motor_distance: Len,
    min_x: Len,
    min_y: Len,
    max_y: Len,
    starting_left: Len,
    starting_right: Len,
    acceleration_time: f64,
    slow_factor: f64,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self {
            spool_circumference: 60.0.mm(),
            // A 1.8 degree stepper with 16x microstepping.
            step_angle: Angle::degrees(1.8 / 16.0),
            motor_distance: 1000.0.mm(),
            min_x: 100.0.mm(),
            min_y: 100.0.mm(),
            max_y: 900.0.mm(),
            // Hanging at (500, 300), in the middle between the motors.
            starting_left: 583.095.mm(),
            starting_right: 583.095.mm(),
            acceleration_time: 1.0,
            slow_factor: 1.0,
        }
    }
}

impl ConfigBuilder {
    pub fn build(&self) -> Result<Config, ConfigError> {
        let positive = |name: &'static str, value: f64| {
            if value > 0.0 && value.is_finite() {
                Ok(value)
            } else {
                Err(ConfigError::NonPositiveDimension { name, value })
            }
        };
        positive("spool circumference", self.spool_circumference.get())?;
        let step_degrees = positive("step angle", self.step_angle.to_degrees())?;
        positive("motor distance", self.motor_distance.get())?;
        positive("acceleration time", self.acceleration_time)?;
        if !(self.slow_factor >= 1.0 && self.slow_factor.is_finite()) {
            return Err(ConfigError::InvalidSlowFactor(self.slow_factor));
        }

        let circumference = self.spool_circumference.get();
        let step_size = step_degrees / 360.0 * circumference;
        let steps_per_revolution = 360.0 / step_degrees;
        let steps_per_value = f64::from(STEPS_MAX_VALUE) / STEPS_FIXED_POINT_FACTOR;
        let max_speed = steps_per_value / time_slice_s() / steps_per_revolution * circumference
            / self.slow_factor;
        let acceleration = max_speed / self.acceleration_time;

        if !(max_speed > 0.0 && max_speed.is_finite()) {
            return Err(ConfigError::NonPositiveSpeed(max_speed));
        }
        if !(acceleration > 0.0 && acceleration.is_finite()) {
            return Err(ConfigError::NonPositiveAcceleration(acceleration));
        }

        Ok(Config {
            spool_circumference: self.spool_circumference,
            step_angle: self.step_angle,
            motor_distance: self.motor_distance,
            min_x: self.min_x,
            min_y: self.min_y,
            max_y: self.max_y,
            starting_left: self.starting_left,
            starting_right: self.starting_right,
            acceleration_time: self.acceleration_time,
            slow_factor: self.slow_factor,
            step_size: step_size.mm(),
            max_speed,
            acceleration,
        })
    }

    pub fn with_spool_circumference(&mut self, circumference: Len) -> &mut Self {
        self.spool_circumference = circumference;
        self
    }

    pub fn with_step_angle(&mut self, angle: Angle) -> &mut Self {
        self.step_angle = angle;
        self
    }

    pub fn with_motor_distance(&mut self, d: Len) -> &mut Self {
        self.motor_distance = d;
        self
    }

    /// The drawing surface spans `min_x..=(motor_distance - min_x)` horizontally
    /// and `min_y..=max_y` vertically, measured from the left motor.
    pub fn with_drawing_surface(&mut self, min_x: Len, min_y: Len, max_y: Len) -> &mut Self {
        self.min_x = min_x;
        self.min_y = min_y;
        self.max_y = max_y;
        self
    }

    pub fn with_starting_lengths(&mut self, left: Len, right: Len) -> &mut Self {
        self.starting_left = left;
        self.starting_right = right;
        self
    }

    /// How many seconds it takes to accelerate from standstill to max speed.
    pub fn with_acceleration_time(&mut self, seconds: f64) -> &mut Self {
        self.acceleration_time = seconds;
        self
    }

    /// Divides the max speed by this factor, for finicky pens or surfaces.
    pub fn with_slow_factor(&mut self, factor: f64) -> &mut Self {
        self.slow_factor = factor;
        self
    }
}

/// The physical configuration of a plotter, fixed for the duration of a drawing.
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct Config {
    /// Circumference of the spools that the cables wind around.
    pub spool_circumference: Len,
    /// Rotation of a spool during a single (micro)step.
    pub step_angle: Angle,
    /// The horizontal distance between motors. (We assume that they are
    /// aligned vertically.)
    pub motor_distance: Len,
    /// How close to the motors the carriage may get horizontally. The surface
    /// is symmetric, so this also fixes the right edge.
    pub min_x: Len,
    /// How far below the motors the drawing surface starts.
    pub min_y: Len,
    /// How far below the motors the drawing surface ends.
    pub max_y: Len,
    /// Cable lengths when the drawing starts.
    pub starting_left: Len,
    pub starting_right: Len,
    pub acceleration_time: f64,
    pub slow_factor: f64,

    // Derived from the fields above by the builder.

    /// Cable length covered by a single step.
    pub step_size: Len,
    /// In mm/s.
    pub max_speed: f64,
    /// In mm/s^2.
    pub acceleration: f64,
}

impl Config {
    pub fn max_x(&self) -> Len {
        self.motor_distance - self.min_x
    }

    pub fn starting_lengths(&self) -> PolarCoordinate {
        PolarCoordinate::new(self.starting_left.get(), self.starting_right.get())
    }

    /// The coordinate system for a drawing, with its origin at the starting
    /// position of the carriage.
    ///
    /// Fails if the starting cable lengths don't describe a point.
    pub fn polar_system(&self) -> Result<PolarSystem, ConfigError> {
        let system = PolarSystem {
            x_offset: 0.0,
            y_offset: 0.0,
            x_min: self.min_x.get(),
            x_max: self.max_x().get(),
            y_min: self.min_y.get(),
            y_max: self.max_y.get(),
            right_motor_dist: self.motor_distance.get(),
        };
        let start = self.starting_lengths();
        let location = system.to_coord(&start);
        if !location.is_finite() {
            return Err(ConfigError::ImpossibleStartingPosition {
                left: start.left_dist,
                right: start.right_dist,
            });
        }
        Ok(system.anchored_at(location))
    }

    pub fn steps_per_mm(&self) -> f64 {
        STEPS_FIXED_POINT_FACTOR / self.step_size.get()
    }
}

//! The values exchanged with the stepper driver.
//!
//! The driver consumes one signed byte per motor per time slice. Each byte is
//! either an ordinary step count (in units of `1 / STEPS_FIXED_POINT_FACTOR`
//! steps) or one of three reserved values. Slices are always sent as a
//! (left, right) pair, and the special commands are sent twice so that the
//! pairing is preserved.

#![no_std]

pub use funi_geom::{STEPS_FIXED_POINT_FACTOR, STEPS_MAX_VALUE};

/// Makes the driver flush its buffers, reset its state (pen up included) and
/// ask for fresh data.
pub const RESET_BYTE: u8 = 0x80; // -128
pub const PEN_UP_BYTE: u8 = 0x81; // -127
pub const PEN_DOWN_BYTE: u8 = 0x7f; // 127

/// The driver never asks for more than this many bytes at once.
pub const MAX_REQUEST_LEN: usize = 128;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StepCommand {
    /// Move by this many sub-steps during one time slice. Always within
    /// `-STEPS_MAX_VALUE..=STEPS_MAX_VALUE`.
    Step(i8),
    PenUp,
    PenDown,
    Reset,
}

impl StepCommand {
    /// A step command, saturating at the largest ordinary magnitude.
    pub fn steps(value: i32) -> Self {
        let max = i32::from(STEPS_MAX_VALUE);
        StepCommand::Step(value.clamp(-max, max) as i8)
    }

    /// The commands for one slice, moving the left cable by `left` sub-steps
    /// and the right cable by `right` sub-steps (positive means longer).
    ///
    /// The left motor is mounted mirrored, so its sign is flipped on the wire.
    pub fn slice(left: i32, right: i32) -> [StepCommand; 2] {
        [StepCommand::steps(-left), StepCommand::steps(right)]
    }

    /// Undoes the sign convention of [`StepCommand::slice`]: how much did the
    /// left cable lengthen, given the value received for it?
    pub fn left_delta(value: i8) -> i32 {
        -i32::from(value)
    }

    pub fn to_byte(self) -> u8 {
        match self {
            StepCommand::Step(v) => v.clamp(-STEPS_MAX_VALUE, STEPS_MAX_VALUE) as u8,
            StepCommand::PenUp => PEN_UP_BYTE,
            StepCommand::PenDown => PEN_DOWN_BYTE,
            StepCommand::Reset => RESET_BYTE,
        }
    }

    pub fn from_byte(b: u8) -> Self {
        match b {
            RESET_BYTE => StepCommand::Reset,
            PEN_UP_BYTE => StepCommand::PenUp,
            PEN_DOWN_BYTE => StepCommand::PenDown,
            b => StepCommand::Step(b as i8),
        }
    }

    pub fn is_pen(&self) -> bool {
        matches!(self, StepCommand::PenUp | StepCommand::PenDown)
    }
}

/// Sent to fill out a request once there is nothing left to draw.
impl Default for StepCommand {
    fn default() -> Self {
        StepCommand::Step(0)
    }
}

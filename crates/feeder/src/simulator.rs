use std::io::{Read, Write};

use funi_geom::{Config, ConfigError, Coordinate, PolarCoordinate, PolarSystem};
use funi_planner::stepper::StepAccumulator;
use funi_protocol::{StepCommand, MAX_REQUEST_LEN};

/// Pretends to be the stepper driver, for dry runs and tests.
///
/// It asks for data in fixed-size requests and keeps track of where the
/// motors would have gone.
pub struct SimulatedDevice {
    system: PolarSystem,
    steps_per_mm: f64,

    request_len: u8,
    reset: bool,
    // A left value that is still waiting for its right half.
    half_slice: Option<StepCommand>,

    pub cables: StepAccumulator,
    pub pen_up: bool,
    pub pen_changes: u64,
    pub slices: u64,
    pub requests: u64,
    pub bytes_received: u64,
}

impl SimulatedDevice {
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        let steps_per_mm = config.steps_per_mm();
        Ok(SimulatedDevice {
            system: config.polar_system()?,
            steps_per_mm,
            request_len: MAX_REQUEST_LEN as u8,
            reset: false,
            half_slice: None,
            cables: StepAccumulator::new(&config.starting_lengths(), steps_per_mm),
            pen_up: true,
            pen_changes: 0,
            slices: 0,
            requests: 0,
            bytes_received: 0,
        })
    }

    pub fn with_request_len(mut self, len: u8) -> Self {
        self.request_len = len;
        self
    }

    pub fn polar_position(&self) -> PolarCoordinate {
        self.cables.to_polar(self.steps_per_mm)
    }

    pub fn position(&self) -> Coordinate {
        self.system.to_coord(&self.polar_position())
    }

    fn receive(&mut self, cmd: StepCommand) {
        if cmd == StepCommand::Reset {
            log::debug!("simulated driver reset");
            self.reset = true;
            self.half_slice = None;
            self.cables.reset();
            self.pen_up = true;
            return;
        }

        let Some(left) = self.half_slice.take() else {
            self.half_slice = Some(cmd);
            return;
        };
        match (left, cmd) {
            (StepCommand::Step(l), StepCommand::Step(r)) => {
                self.cables.left += i64::from(StepCommand::left_delta(l));
                self.cables.right += i64::from(r);
                self.slices += 1;
            }
            (StepCommand::PenUp, StepCommand::PenUp) => self.set_pen(true),
            (StepCommand::PenDown, StepCommand::PenDown) => self.set_pen(false),
            (l, r) => log::warn!("simulated driver got a mismatched pair {l:?}, {r:?}"),
        }
    }

    fn set_pen(&mut self, up: bool) {
        if self.pen_up != up {
            self.pen_changes += 1;
        }
        self.pen_up = up;
    }
}

impl Read for SimulatedDevice {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if !self.reset {
            // The real driver waits for a reset before asking for anything.
            return Err(std::io::ErrorKind::TimedOut.into());
        }
        if buf.is_empty() {
            return Ok(0);
        }
        self.requests += 1;
        buf[0] = self.request_len;
        Ok(1)
    }
}

impl Write for SimulatedDevice {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.bytes_received += buf.len() as u64;
        for &b in buf {
            self.receive(StepCommand::from_byte(b));
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

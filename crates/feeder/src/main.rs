use std::{io::BufReader, time::Duration};

use anyhow::Context as _;
use clap::Parser;
use funi_geom::{Angle, Config, ConfigBuilder, LenExt as _};
use funi_planner::{
    filter::{self, PenUpShortcut},
    stepper::{self, Side, StepGenerator},
    LinearInterpolator, MotionLimits, TrapezoidInterpolator,
};
use funi_protocol::StepCommand;
use indicatif::ProgressBar;

use crate::{
    connection::{LinkStats, TransportLink},
    simulator::SimulatedDevice,
};

mod connection;
mod input;
mod pipeline;
mod simulator;

const TICK: Duration = Duration::from_millis(100);

#[derive(clap::Args, Debug)]
struct MachineArgs {
    /// Circumference of the spools, in mm.
    #[arg(long, default_value_t = 60.0)]
    spool_circumference: f64,

    /// Spool rotation for each micro-step, in degrees.
    #[arg(long, default_value_t = 1.8 / 16.0)]
    step_angle: f64,

    /// Horizontal distance between the motors, in mm.
    #[arg(long, default_value_t = 1000.0)]
    motor_distance: f64,

    /// Left edge of the drawing surface, measured from the left motor. The
    /// right edge is the same distance from the right motor.
    #[arg(long, default_value_t = 100.0)]
    min_x: f64,

    /// Top edge of the drawing surface, measured down from the motors.
    #[arg(long, default_value_t = 100.0)]
    min_y: f64,

    /// Bottom edge of the drawing surface, measured down from the motors.
    #[arg(long, default_value_t = 900.0)]
    max_y: f64,

    /// Length of the left cable when the drawing starts, in mm.
    #[arg(long, default_value_t = 583.095)]
    start_left: f64,

    /// Length of the right cable when the drawing starts, in mm.
    #[arg(long, default_value_t = 583.095)]
    start_right: f64,

    /// Seconds to get from standstill to max speed.
    #[arg(long, default_value_t = 1.0)]
    acceleration_time: f64,

    /// Divides the max speed.
    #[arg(long, default_value_t = 1.0)]
    slow_factor: f64,
}

impl MachineArgs {
    fn config(&self) -> anyhow::Result<Config> {
        let config = ConfigBuilder::default()
            .with_spool_circumference(self.spool_circumference.mm())
            .with_step_angle(Angle::degrees(self.step_angle))
            .with_motor_distance(self.motor_distance.mm())
            .with_drawing_surface(self.min_x.mm(), self.min_y.mm(), self.max_y.mm())
            .with_starting_lengths(self.start_left.mm(), self.start_right.mm())
            .with_acceleration_time(self.acceleration_time)
            .with_slow_factor(self.slow_factor)
            .build()
            .context("invalid machine configuration")?;

        // Catch impossible starting positions before anything moves.
        config.polar_system()?;

        log::info!(
            "max speed {:.2} mm/s, acceleration {:.2} mm/s^2, step size {:.5} mm",
            config.max_speed,
            config.acceleration,
            config.step_size.get()
        );
        Ok(config)
    }
}

#[derive(clap::Args, Debug)]
struct PortArgs {
    /// The serial port that the stepper driver is on.
    #[arg(long, default_value = "/dev/ttyAMA0")]
    port: String,

    #[arg(long, default_value_t = 57600)]
    baud: u32,

    /// Don't talk to a real driver; simulate one and report where it ends up.
    #[arg(long)]
    simulate: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum Profile {
    /// Accelerate and decelerate, slowing down for corners.
    Trapezoid,
    /// Always move at max speed.
    Linear,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum SpoolSide {
    Left,
    Right,
}

impl From<SpoolSide> for Side {
    fn from(side: SpoolSide) -> Side {
        match side {
            SpoolSide::Left => Side::Left,
            SpoolSide::Right => Side::Right,
        }
    }
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Draw a path, read from stdin as lines of `X Y [up|down]`.
    Plot {
        #[arg(long)]
        flip_x: bool,

        #[arg(long)]
        flip_y: bool,

        #[arg(long, value_enum, default_value_t = Profile::Trapezoid)]
        profile: Profile,

        /// Just count the time slices and report how long the drawing takes.
        #[arg(long)]
        count: bool,

        #[command(flatten)]
        port: PortArgs,
    },
    /// Wind one cable out (or in, for negative distances) to line things up
    /// before drawing.
    Spool {
        #[arg(value_enum)]
        side: SpoolSide,

        /// In mm.
        #[arg(allow_negative_numbers = true)]
        distance: f64,

        #[command(flatten)]
        port: PortArgs,
    },
}

#[derive(clap::Parser, Debug)]
#[command(about = "Feeds drawings to a hanging cable plotter")]
struct Args {
    #[command(flatten)]
    machine: MachineArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Default)]
struct Count {
    slices: u64,
    pen_changes: u64,
}

fn count(steps: impl Iterator<Item = StepCommand>) -> Count {
    let mut ret = Count::default();
    for cmd in steps.step_by(2) {
        if cmd.is_pen() {
            ret.pen_changes += 1;
        } else {
            ret.slices += 1;
        }
    }
    ret
}

fn send(
    port: &PortArgs,
    config: &Config,
    steps: impl Iterator<Item = StepCommand>,
) -> anyhow::Result<LinkStats> {
    let progress = ProgressBar::new_spinner().with_message("bytes sent");
    progress.enable_steady_tick(TICK);

    if port.simulate {
        let device = SimulatedDevice::new(config)?;
        let mut link = TransportLink::open(device)?.with_progress(progress);
        let stats = link.run(steps)?;
        let device = link.into_inner();
        eprintln!(
            "simulated driver ended at {} ({}), pen {}, after {} slices",
            device.position(),
            device.polar_position(),
            if device.pen_up { "up" } else { "down" },
            device.slices
        );
        Ok(stats)
    } else {
        let serial = serialport::new(&port.port, port.baud)
            .timeout(Duration::from_secs(1))
            .open()
            .with_context(|| format!("failed to open {}", port.port))?;
        log::info!("opened {} at {} baud", port.port, port.baud);
        let mut link = TransportLink::open(serial)?.with_progress(progress);
        Ok(link.run(steps)?)
    }
}

async fn plot(
    config: Config,
    flip_x: bool,
    flip_y: bool,
    profile: Profile,
    count_only: bool,
    port: PortArgs,
) -> anyhow::Result<()> {
    let (coords, read) = pipeline::source(input::read_path(BufReader::new(std::io::stdin())));

    let (coords, filtered) = pipeline::stage(coords, move |coords| {
        Ok(PenUpShortcut::new(filter::flip(coords, flip_x, flip_y)))
    });

    let (steps, stepped) = pipeline::stage(coords, move |coords| {
        let limits = MotionLimits::from(&config);
        let steps: Box<dyn Iterator<Item = StepCommand>> = match profile {
            Profile::Trapezoid => Box::new(StepGenerator::new(
                &config,
                coords,
                TrapezoidInterpolator::new(limits),
            )?),
            Profile::Linear => Box::new(StepGenerator::new(
                &config,
                coords,
                LinearInterpolator::new(limits),
            )?),
        };
        Ok(steps)
    });

    if count_only {
        let counted = pipeline::sink(steps, |steps| Ok(count(steps)));
        let counted = pipeline::join(counted).await?;
        let seconds = counted.slices as f64 * funi_geom::time_slice_s();
        println!(
            "{} slices, {} pen changes, {:.1} s of drawing",
            counted.slices, counted.pen_changes, seconds
        );
    } else {
        let sent = pipeline::sink(steps, move |steps| send(&port, &config, steps));
        pipeline::join(sent).await?;
    }

    pipeline::join(read).await.context("failed to read the path")?;
    pipeline::join(filtered).await?;
    pipeline::join(stepped).await?;
    Ok(())
}

fn spool(config: &Config, side: SpoolSide, distance: f64, port: &PortArgs) -> anyhow::Result<()> {
    let steps = stepper::spool_steps(config, side.into(), distance);
    log::info!("moving the {side:?} spool by {distance} mm in {} slices", steps.len() / 2);
    send(port, config, steps.into_iter())?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();
    let config = args.machine.config()?;

    match args.command {
        Command::Plot {
            flip_x,
            flip_y,
            profile,
            count,
            port,
        } => plot(config, flip_x, flip_y, profile, count, port).await,
        Command::Spool {
            side,
            distance,
            port,
        } => spool(&config, side, distance, &port),
    }
}

#[cfg(test)]
mod tests {
    use funi_geom::Coordinate;

    use super::*;

    #[test]
    fn counts_slices() {
        let steps = [
            StepCommand::PenDown,
            StepCommand::PenDown,
            StepCommand::Step(1),
            StepCommand::Step(-1),
            StepCommand::Step(0),
            StepCommand::Step(0),
        ];
        let counted = count(steps.into_iter());
        assert_eq!(counted.slices, 2);
        assert_eq!(counted.pen_changes, 1);
    }

    #[test]
    fn parses_args() {
        let args = Args::try_parse_from([
            "funi-feeder",
            "--slow-factor",
            "2",
            "plot",
            "--flip-y",
            "--profile",
            "linear",
            "--simulate",
        ])
        .unwrap();
        let config = args.machine.config().unwrap();
        assert!((config.slow_factor - 2.0).abs() < 1e-12);
        assert!(matches!(
            args.command,
            Command::Plot {
                flip_x: false,
                flip_y: true,
                profile: Profile::Linear,
                count: false,
                port: PortArgs { simulate: true, .. },
            }
        ));

        let args = Args::try_parse_from(["funi-feeder", "spool", "left", "-12.5"]).unwrap();
        assert!(matches!(
            args.command,
            Command::Spool { side: SpoolSide::Left, distance, .. } if distance == -12.5
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn plot_through_the_pipeline() {
        let config = ConfigBuilder::default().build().unwrap();
        let path = "0 0\n30 0\n30 30\n# back home\n0 0 up\n";
        let (coords, read) = pipeline::source(input::read_path(path.as_bytes()));
        let (coords, filtered) = pipeline::stage(coords, |coords| {
            Ok(PenUpShortcut::new(filter::flip(coords, false, false)))
        });
        let (steps, stepped) =
            pipeline::stage(coords, move |coords| Ok(StepGenerator::trapezoid(&config, coords)?));
        let device = pipeline::sink(steps, move |steps| {
            let mut link = TransportLink::open(SimulatedDevice::new(&config)?)?;
            link.run(steps)?;
            Ok(link.into_inner())
        });

        let device = pipeline::join(device).await.unwrap();
        pipeline::join(read).await.unwrap();
        pipeline::join(filtered).await.unwrap();
        pipeline::join(stepped).await.unwrap();

        assert!(device.pen_up);
        assert_eq!(device.pen_changes, 2);
        assert!((device.position() - Coordinate::new(0.0, 0.0)).len() < 0.01);
    }
}

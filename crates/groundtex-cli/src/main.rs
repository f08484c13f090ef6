//! `groundtex` – ground-texture dataset capture.
//!
//! Two subcommands:
//!
//! * `groundtex capture <trajectory.csv>` – start the simulated world, drive
//!   the camera through every waypoint of the trajectory and write one
//!   `(image, pose, calibration)` record per waypoint.  Exits non-zero unless
//!   the whole trajectory was captured.
//! * `groundtex teleop` – drive the simulated camera by typing `W A S D Q E`
//!   on stdin, printing its pose once a second.
//! * `groundtex init-config <path>` – write the default configuration as TOML.
//!
//! Ctrl-C cancels either run cleanly.

mod config;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use argh::FromArgs;
use colored::Colorize;
use groundtex_dataset::load_trajectory;
use groundtex_hal::{KeyboardController, SimWorld};
use groundtex_middleware::{FeedBus, PoseService};
use groundtex_perception::rpy_from_quaternion;
use groundtex_runtime::{TrajectoryFollower, init_tracing};
use groundtex_types::GroundTexError;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use config::CaptureConfig;

/// Period of the teleop velocity integration loop.
const TELEOP_PERIOD: Duration = Duration::from_millis(20);

// ─────────────────────────────────────────────────────────────────────────────
// Arguments
// ─────────────────────────────────────────────────────────────────────────────

#[derive(FromArgs)]
/// Capture ground-texture datasets from a simulated downward-facing camera.
struct Cli {
    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Capture(CaptureArgs),
    Teleop(TeleopArgs),
    InitConfig(InitConfigArgs),
}

#[derive(FromArgs)]
/// Follow a trajectory and write one record per waypoint.
#[argh(subcommand, name = "capture")]
struct CaptureArgs {
    /// CSV file with one `x,y,yaw` waypoint per line
    #[argh(positional)]
    trajectory: PathBuf,

    /// TOML configuration file
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// camera height above the ground, metres
    #[argh(option)]
    height: Option<f64>,

    /// name of the camera model in the world
    #[argh(option)]
    model: Option<String>,

    /// directory the records are written to
    #[argh(option, short = 'o')]
    output: Option<PathBuf>,

    /// image feed topic
    #[argh(option)]
    image_topic: Option<String>,

    /// camera-info feed topic
    #[argh(option)]
    camera_topic: Option<String>,

    /// pose-list feed topic
    #[argh(option)]
    pose_topic: Option<String>,

    /// name of the set-pose service
    #[argh(option)]
    move_service: Option<String>,

    /// per-component convergence tolerance
    #[argh(option)]
    tolerance: Option<f64>,
}

impl CaptureArgs {
    fn apply_to(&self, cfg: &mut CaptureConfig) {
        if let Some(v) = self.height {
            cfg.camera_height = v;
        }
        if let Some(v) = &self.model {
            cfg.camera_model_name = v.clone();
        }
        if let Some(v) = &self.output {
            cfg.output_dir = v.clone();
        }
        if let Some(v) = &self.image_topic {
            cfg.image_topic = v.clone();
        }
        if let Some(v) = &self.camera_topic {
            cfg.camera_info_topic = v.clone();
        }
        if let Some(v) = &self.pose_topic {
            cfg.pose_topic = v.clone();
        }
        if let Some(v) = &self.move_service {
            cfg.move_service = v.clone();
        }
        if let Some(v) = self.tolerance {
            cfg.convergence_tolerance = v;
        }
    }
}

#[derive(FromArgs)]
/// Drive the simulated camera from the keyboard (type keys, then Enter).
#[argh(subcommand, name = "teleop")]
struct TeleopArgs {
    /// TOML configuration file
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,
}

#[derive(FromArgs)]
/// Write the default configuration, with environment overrides applied.
#[argh(subcommand, name = "init-config")]
struct InitConfigArgs {
    /// destination TOML file
    #[argh(positional)]
    path: PathBuf,
}

// ─────────────────────────────────────────────────────────────────────────────
// Entry point
// ─────────────────────────────────────────────────────────────────────────────

fn main() -> ExitCode {
    let cli: Cli = argh::from_env();
    let _guard = init_tracing("groundtex");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("{}: failed to start Tokio runtime: {e}", "error".red().bold());
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Command::Capture(args) => runtime.block_on(run_capture(args)),
        Command::Teleop(args) => runtime.block_on(run_teleop(args)),
        Command::InitConfig(args) => run_init_config(&args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}: {e}", "error".red().bold());
            ExitCode::FAILURE
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// capture
// ─────────────────────────────────────────────────────────────────────────────

async fn run_capture(args: CaptureArgs) -> Result<(), GroundTexError> {
    let mut cfg = config::load(args.config.as_deref()).map_err(GroundTexError::Config)?;
    args.apply_to(&mut cfg);
    cfg.validate().map_err(GroundTexError::Config)?;
    check_trajectory_file(&args.trajectory)?;

    let waypoints = load_trajectory(&args.trajectory).inspect_err(|e| {
        eprintln!("{} {e}", "Unable to load trajectory:".red());
    })?;
    info!(
        trajectory = %args.trajectory.display(),
        waypoints = waypoints.len(),
        "trajectory loaded"
    );

    let bus = FeedBus::default();
    let world = Arc::new(SimWorld::new(cfg.world_config(), bus.clone())?);
    let service: Arc<dyn PoseService> = world.clone();
    let mut follower = TrajectoryFollower::new(cfg.follower_config(), bus, service)?;

    let cancel = follower.cancellation_token();
    let world_stop = cancel.child_token();
    let world_task = Arc::clone(&world).spawn(world_stop.clone());
    install_ctrlc(cancel);

    let outcome = follower.capture_trajectory(&waypoints).await;
    world_stop.cancel();
    if let Err(e) = world_task.await {
        warn!(error = %e, "simulated world task ended abnormally");
    }

    match outcome {
        Ok(report) => {
            println!(
                "  {} Captured {} waypoint(s) into {}",
                "✓".green().bold(),
                report.records.len(),
                cfg.output_dir.display().to_string().bold()
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", "Unable to capture full trajectory".red().bold());
            Err(e)
        }
    }
}

fn check_trajectory_file(path: &Path) -> Result<(), GroundTexError> {
    if path.is_file() {
        Ok(())
    } else {
        Err(GroundTexError::Config(format!(
            "trajectory file {} does not exist",
            path.display()
        )))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// teleop
// ─────────────────────────────────────────────────────────────────────────────

async fn run_teleop(args: TeleopArgs) -> Result<(), GroundTexError> {
    let cfg = config::load(args.config.as_deref()).map_err(GroundTexError::Config)?;
    cfg.validate().map_err(GroundTexError::Config)?;

    let bus = FeedBus::default();
    let world = Arc::new(SimWorld::new(cfg.world_config(), bus)?);
    let cancel = CancellationToken::new();
    let world_task = Arc::clone(&world).spawn(cancel.child_token());
    install_ctrlc(cancel.clone());

    println!(
        "  {}  W/S forward/back, A/D left/right, Q/E turn. Press Enter to send, Ctrl-D to quit.",
        "teleop".bold().cyan()
    );

    let controller = KeyboardController::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut drive = tokio::time::interval(TELEOP_PERIOD);
    let mut report = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => match line {
                Ok(Some(keys)) => keys.chars().for_each(|c| controller.register_key(c)),
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "stdin read failed");
                    break;
                }
            },
            _ = drive.tick() => world.apply_twist(&controller.twist(), TELEOP_PERIOD),
            _ = report.tick() => {
                let pose = world.pose();
                let (_, _, yaw) = rpy_from_quaternion(&pose.orientation);
                println!(
                    "  x {:>8.3}  y {:>8.3}  yaw {:>7.3}",
                    pose.position.x, pose.position.y, yaw
                );
            }
        }
    }

    cancel.cancel();
    if let Err(e) = world_task.await {
        warn!(error = %e, "simulated world task ended abnormally");
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// init-config
// ─────────────────────────────────────────────────────────────────────────────

fn run_init_config(args: &InitConfigArgs) -> Result<(), GroundTexError> {
    let cfg = config::load(None).map_err(GroundTexError::Config)?;
    config::save_to(&cfg, &args.path).map_err(GroundTexError::Config)?;
    println!(
        "  {} Wrote {}",
        "✓".green().bold(),
        args.path.display().to_string().bold()
    );
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn install_ctrlc(cancel: CancellationToken) {
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping …".yellow().bold());
        cancel.cancel();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; Ctrl-C will not stop the run cleanly");
    }
}

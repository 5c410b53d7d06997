use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use facegate_capture::{
    CameraHandle, CaptureController, GeoTracker, HttpVerifier, LogVoice, StaticGeo, VoicePrompt,
};
use facegate_core::{CheckAction, GeoFix, SubmitTarget, VerificationResult};
use facegate_hw::{Camera, DirectorySource};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod voice;

use config::Config;
use voice::CommandVoice;

#[derive(Parser)]
#[command(name = "facegate", about = "Guided liveness face capture for attendance check-in")]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/facegate/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Driver check-in; opens a trip
    Checkin {
        #[arg(long)]
        employee: String,
        #[arg(long)]
        route: Option<String>,
        #[command(flatten)]
        capture: CaptureArgs,
    },
    /// Driver check-out of an open trip
    Checkout {
        #[arg(long)]
        trip: String,
        #[arg(long)]
        employee: String,
        #[command(flatten)]
        capture: CaptureArgs,
    },
    /// Helper check-in to a driver's trip
    HelperCheckin {
        #[arg(long)]
        trip: String,
        #[arg(long)]
        employee: String,
        #[arg(long)]
        password: Option<String>,
        #[command(flatten)]
        capture: CaptureArgs,
    },
    /// Helper check-out from a driver's trip
    HelperCheckout {
        #[arg(long)]
        trip: String,
        #[arg(long)]
        employee: String,
        #[arg(long)]
        password: Option<String>,
        #[command(flatten)]
        capture: CaptureArgs,
    },
    /// List V4L2 capture devices
    Devices,
    /// Run a capture burst without submitting it
    Test {
        /// Write the captured frames to this directory
        #[arg(long)]
        save: Option<PathBuf>,
        #[command(flatten)]
        capture: CaptureArgs,
    },
}

#[derive(Args)]
struct CaptureArgs {
    /// Camera device path (overrides config)
    #[arg(long)]
    device: Option<String>,
    /// Replay frames from a directory instead of a camera
    #[arg(long)]
    frames_dir: Option<PathBuf>,
    /// Organization code (overrides config)
    #[arg(long)]
    org: Option<String>,
    #[arg(long, requires = "lon", allow_negative_numbers = true)]
    lat: Option<f64>,
    #[arg(long, requires = "lat", allow_negative_numbers = true)]
    lon: Option<f64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Checkin {
            employee,
            route,
            capture,
        } => {
            let target = SubmitTarget::new(CheckAction::CheckIn, org_code(&config, &capture), employee)
                .with_route(route);
            check(&config, &capture, target).await?;
        }
        Commands::Checkout {
            trip,
            employee,
            capture,
        } => {
            let action = CheckAction::CheckOut { trip_id: trip };
            let target = SubmitTarget::new(action, org_code(&config, &capture), employee);
            check(&config, &capture, target).await?;
        }
        Commands::HelperCheckin {
            trip,
            employee,
            password,
            capture,
        } => {
            let action = CheckAction::HelperCheckIn { trip_id: trip };
            let target =
                SubmitTarget::new(action, org_code(&config, &capture), employee).with_password(password);
            check(&config, &capture, target).await?;
        }
        Commands::HelperCheckout {
            trip,
            employee,
            password,
            capture,
        } => {
            let action = CheckAction::HelperCheckOut { trip_id: trip };
            let target =
                SubmitTarget::new(action, org_code(&config, &capture), employee).with_password(password);
            check(&config, &capture, target).await?;
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} [{}] {}", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
        Commands::Test { save, capture } => {
            diagnose(&config, &capture, save).await?;
        }
    }

    Ok(())
}

fn org_code(config: &Config, args: &CaptureArgs) -> String {
    args.org.clone().unwrap_or_else(|| config.server.org_code.clone())
}

/// Capture one burst and submit it for `target`.
async fn check(config: &Config, args: &CaptureArgs, target: SubmitTarget) -> Result<()> {
    let ctl = controller(config, args)?;

    println!("Look at the camera and follow the prompts.");
    let handle = ctl.start_session().await?;
    cancel_on_ctrl_c(handle.cancellation());
    let mut session = handle.finish().await?;

    let result = ctl.submit(&mut session, &target).await?;
    report(&target, &result);
    Ok(())
}

/// Capture one burst and print what was acquired.
async fn diagnose(config: &Config, args: &CaptureArgs, save: Option<PathBuf>) -> Result<()> {
    let ctl = controller(config, args)?;

    println!("Running capture diagnostics...");
    let handle = ctl.start_session().await?;
    cancel_on_ctrl_c(handle.cancellation());
    let session = handle.join().await?;

    println!("Session:         {}", session.id());
    println!("State:           {}", session.state().name());
    println!("Challenge tick:  {}", session.challenge_tick());
    match session.challenge_frame_index() {
        Some(index) => println!("Challenge frame: {index}"),
        None => println!("Challenge frame: -"),
    }
    println!(
        "Frames:          {}/{} (missed ticks: {:?})",
        session.frames().len(),
        session.frame_count(),
        session.missed_ticks()
    );
    for entry in session.prompt_log() {
        println!("  tick {:>2}: {}", entry.tick, entry.text);
    }

    if let Some(dir) = save {
        std::fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        for (i, frame) in session.frames().iter().enumerate() {
            let ext = if frame.content_type == "image/png" { "png" } else { "jpg" };
            let path = dir.join(format!("frame_{i:03}.{ext}"));
            std::fs::write(&path, &frame.data).with_context(|| format!("writing {}", path.display()))?;
        }
        println!("Saved {} frames to {}", session.frames().len(), dir.display());
    }

    if session.frames().is_empty() {
        bail!("capture did not produce any frames");
    }
    Ok(())
}

fn controller(config: &Config, args: &CaptureArgs) -> Result<CaptureController> {
    let camera = open_camera(config, args)?;
    let verifier = HttpVerifier::new(&config.server.base_url, config.submit_timeout())?;

    let voice: Arc<dyn VoicePrompt> = match config.voice.command.as_deref().and_then(CommandVoice::parse) {
        Some(voice) => Arc::new(voice),
        None => Arc::new(LogVoice),
    };

    let mut ctl = CaptureController::new(camera, Arc::new(verifier))
        .with_config(config.capture_config())
        .with_voice(voice)
        .with_status(Arc::new(|text: &str| eprintln!("{text}")))
        .with_submit_timeout(config.submit_timeout());

    let fix = match (args.lat, args.lon) {
        (Some(latitude), Some(longitude)) => Some(GeoFix { latitude, longitude }),
        _ => match (config.location.latitude, config.location.longitude) {
            (Some(latitude), Some(longitude)) => Some(GeoFix { latitude, longitude }),
            _ => None,
        },
    };
    if let Some(fix) = fix {
        ctl = ctl.with_geo(GeoTracker::new(Arc::new(StaticGeo(fix))));
    }

    Ok(ctl)
}

fn open_camera(config: &Config, args: &CaptureArgs) -> Result<CameraHandle> {
    let frames_dir = args.frames_dir.as_ref().or(config.camera.frames_dir.as_ref());
    if let Some(dir) = frames_dir {
        let source = DirectorySource::open(dir)?.looping(true);
        tracing::info!(dir = %dir.display(), frames = source.len(), "replaying frames");
        return Ok(CameraHandle::spawn(source)?);
    }

    let device = args.device.as_deref().unwrap_or(&config.camera.device);
    let camera = Camera::open(device, config.camera_options())
        .with_context(|| format!("opening camera {device}"))?;
    Ok(CameraHandle::spawn(camera)?)
}

fn cancel_on_ctrl_c(token: tokio_util::sync::CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted; cancelling capture");
            token.cancel();
        }
    });
}

fn report(target: &SubmitTarget, result: &VerificationResult) {
    println!(
        "{}",
        result.message.as_deref().unwrap_or("Verification successful")
    );
    if let Some(trip) = &result.trip_id {
        println!("Trip: {trip}");
    }
    let hint = match result.next_step.as_deref() {
        Some("helper-checkin") => match &result.trip_id {
            Some(trip) => format!("Next: helper check-in (facegate helper-checkin --trip {trip} ...)"),
            None => "Next: helper check-in".to_string(),
        },
        Some("vehicle-checkin") => "Next: complete the vehicle check-in".to_string(),
        Some("helper-checkout") => "Next: helper check-out".to_string(),
        Some("vehicle-checkout") => "Next: complete the vehicle check-out".to_string(),
        Some(other) => format!("Next: {other}"),
        None => return,
    };
    tracing::debug!(action = target.action.name(), next_step = ?result.next_step, "next step");
    println!("{hint}");
}

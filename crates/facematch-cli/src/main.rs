use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use facematch_core::{ModelBase, ModelLoader, OnnxPipeline};
use facematch_hw::{Camera, CameraController, StreamConstraints, V4lBackend};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::MissedTickBehavior;
use tracing_subscriber::EnvFilter;

mod command;
mod config;
mod live;
mod loader;
mod session;
mod view;

use command::{Command, HELP};
use config::Config;
use loader::{await_models, spawn_model_load};
use session::Session;
use view::{TerminalView, View};

#[derive(Parser)]
#[command(name = "facematch", about = "Live face verification against a reference photo")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive verification session
    Run {
        /// V4L2 device path (overrides FACEMATCH_CAMERA_DEVICE)
        #[arg(short, long)]
        device: Option<String>,
        /// Model directory or http(s) base URL (overrides FACEMATCH_MODEL_BASE)
        #[arg(short, long)]
        models: Option<String>,
        /// Directory for reference.png / overlay.png (overrides FACEMATCH_OUTPUT_DIR)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
        /// Photo to upload as the reference once models are ready
        #[arg(short, long)]
        reference: Option<PathBuf>,
    },
    /// List video capture devices
    Devices,
    /// Fetch and verify the model artifacts without starting a session
    Models {
        /// Model directory or http(s) base URL (overrides FACEMATCH_MODEL_BASE)
        #[arg(short, long)]
        models: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();

    match cli.command {
        Commands::Run {
            device,
            models,
            output_dir,
            reference,
        } => {
            if let Some(device) = device {
                config.camera_device = device;
            }
            if let Some(models) = models {
                config.model_base = ModelBase::parse(&models);
            }
            if let Some(dir) = output_dir {
                config.output_dir = dir;
            }
            // The session owns a V4L2 stream, which is not Send.
            tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("failed to start runtime")?
                .block_on(run(config, reference))?;
        }
        Commands::Devices => {
            let devices = Camera::list_devices();
            if devices.is_empty() {
                println!("no capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
        }
        Commands::Models { models } => {
            if let Some(models) = models {
                config.model_base = ModelBase::parse(&models);
            }
            let resolved = ModelLoader::new(config.model_base.clone())
                .resolve()
                .with_context(|| format!("cannot resolve models from {}", config.model_base))?;
            println!(
                "detector    {} ({})",
                resolved.detector_path.display(),
                resolved.manifest.detector.version
            );
            println!(
                "recognizer  {} ({})",
                resolved.recognizer_path.display(),
                resolved.manifest.recognizer.version
            );
        }
    }

    Ok(())
}

async fn run(config: Config, mut reference: Option<PathBuf>) -> Result<()> {
    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("cannot create {}", config.output_dir.display()))?;
    tracing::info!(
        device = %config.camera_device,
        models = %config.model_base,
        output = %config.output_dir.display(),
        "facematch starting"
    );

    let mut view = TerminalView::new(&config.output_dir);
    view.notice(&format!(
        "Photos and camera frames are processed on this machine only. Output goes to {}.",
        config.output_dir.display()
    ));
    view.notice(HELP);

    let camera = CameraController::new(
        V4lBackend::new(config.camera_device.clone()),
        StreamConstraints::default(),
    );
    let mut session: Session<OnnxPipeline, V4lBackend> =
        Session::new(camera, config.match_policy());
    if let Some(warning) = config.match_policy().calibration_warning() {
        tracing::warn!(%warning, "match thresholds not calibrated for ArcFace");
        view.alert(&warning);
    }

    let rx = spawn_model_load(
        ModelLoader::new(config.model_base.clone()),
        config.detector_options(),
    )
    .context("failed to spawn model loader")?;
    let models = await_models(rx, config.model_load_timeout());
    tokio::pin!(models);
    let mut models_pending = true;
    view.notice("loading face models...");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut ticker = tokio::time::interval(config.frame_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut models, if models_pending => {
                models_pending = false;
                match result {
                    Ok(pipeline) => {
                        session.models_loaded(pipeline);
                        view.notice("face models ready");
                        if let Some(path) = reference.take() {
                            session.handle(Command::Upload(path), &mut view);
                        }
                    }
                    Err(e) => {
                        view.alert(&format!("failed to load face models: {e}"));
                        session.models_failed(e.to_string());
                    }
                }
            }
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<Command>() {
                    Ok(command) => {
                        if session.handle(command, &mut view).is_break() {
                            break;
                        }
                    }
                    Err(e) => view.alert(&e.to_string()),
                }
            }
            _ = ticker.tick(), if session.live_armed() => {
                session.tick(&mut view);
            }
            _ = &mut shutdown => {
                tracing::info!("interrupted");
                break;
            }
        }
    }

    session.stop_camera();
    tracing::info!("facematch exiting");
    Ok(())
}

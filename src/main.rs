//! Pipeplay - command-line player
//!
//! Plays one file, or a section of it, through the standard backend and logs
//! every backend notification until playback finishes or fails.

use std::{path::PathBuf, process::ExitCode, sync::Arc};

use {
    anyhow::{Result, bail},
    clap::Parser,
    tokio::{select, signal::ctrl_c, task::block_in_place},
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use pipeplay::{
    BackendEvent, SettingsManager, StandardBackend, SymphoniaPipelineFactory,
    error::{ErrorReporter, ResultExt},
};

/// Command-line arguments for pipeplay
#[derive(Parser, Debug)]
#[command(name = "pipeplay")]
#[command(about = "Play an audio file, or a section of it")]
#[command(version)]
struct Args {
    /// File to play
    file: PathBuf,

    /// Start of the play section in milliseconds
    #[arg(short, long)]
    start: Option<i64>,

    /// Length of the play section in milliseconds, to the end when omitted
    #[arg(short, long)]
    duration: Option<i64>,

    /// Volume (0-100), the configured default when omitted
    #[arg(short, long)]
    volume: Option<i32>,

    /// Settings file to use instead of the XDG location
    #[arg(short, long, env = "PIPEPLAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "pipeplay=info".into()))
        .with(fmt::layer())
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            ErrorReporter::error(&e, "pipeplay");
            eprintln!("pipeplay: {}", ErrorReporter::to_user_message(&e));
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<()> {
    let settings = match &args.config {
        Some(path) => SettingsManager::with_config_path(path.clone())
            .add_contextf(format!("Failed to load settings from {}", path.display()))?,
        None => SettingsManager::new().add_context("Failed to load settings")?,
    };
    let settings = settings.get_settings().clone();

    let factory = Arc::new(SymphoniaPipelineFactory::new(settings.output_config()));
    let backend =
        StandardBackend::new(factory, &settings).add_context("Failed to start backend")?;
    if let Some(volume) = args.volume {
        backend.set_volume(volume);
    }

    let events = backend.main().subscribe();
    let start = args.start.unwrap_or(-1);
    let duration = args.duration.unwrap_or(-1);
    block_in_place(|| backend.try_load_music(&args.file, start, duration))
        .add_contextf(format!("Cannot play {}", args.file.display()))?;

    info!(file = %args.file.display(), "Playing");
    backend.play();

    loop {
        select! {
            event = events.recv() => {
                let Ok(event) = event else {
                    warn!("Backend thread stopped unexpectedly");
                    break;
                };
                match event {
                    BackendEvent::Finished => {
                        info!("Playback finished");
                        break;
                    }
                    BackendEvent::Error { category, message } => {
                        ErrorReporter::backend_event(category, &message);
                        bail!("Playback of {} failed", args.file.display());
                    }
                    event => info!(?event, "Backend event"),
                }
            }
            _ = ctrl_c() => {
                info!("Interrupted, stopping");
                backend.stop();
                break;
            }
        }
    }

    backend.shutdown();
    Ok(())
}

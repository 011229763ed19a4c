//! mixd - sound mixing daemon
//!
//! Opens the output device, plays any files given on the command line through
//! the branch pool and keeps mixing until every file has finished or Ctrl+C.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use mixd::{BranchId, CpalRegistry, Daemon, DaemonConfig, DaemonEvent};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for mixd
#[derive(Parser, Debug)]
#[command(name = "mixd")]
#[command(about = "Sound mixing daemon")]
#[command(version)]
struct Args {
    /// Output device name (default: config file, then platform default)
    #[arg(short, long, env = "MIXD_DEVICE")]
    device: Option<String>,

    /// Config file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of player branches
    #[arg(long)]
    capacity: Option<usize>,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Loop every file until interrupted
    #[arg(short, long = "loop")]
    looping: bool,

    /// Gain applied to every file branch
    #[arg(short, long, default_value_t = 1.0)]
    gain: f32,

    /// Print daemon events to stdout as JSON lines
    #[arg(long)]
    events: bool,

    /// Keep running after all files have finished
    #[arg(long)]
    stay: bool,

    /// Sound files to play
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = DaemonConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(capacity) = args.capacity {
        config.capacity = capacity;
    }
    if args.device.is_some() {
        config.device = args.device.clone();
    }
    config.validate().context("Invalid configuration")?;

    init_tracing(&config)?;

    info!(
        "Starting mixd {} (git {}, built {}, {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let registry = CpalRegistry::new();

    if args.list_devices {
        for name in Daemon::list_devices(&registry) {
            println!("{}", name);
        }
        return Ok(());
    }

    let daemon = Daemon::create(&registry, None, &config).context("Failed to start daemon")?;
    let mut events = daemon.subscribe();

    let mut pending: HashSet<BranchId> = HashSet::new();
    for file in &args.files {
        match start_file(&daemon, file, &args) {
            Ok(branch) => {
                pending.insert(branch);
            }
            Err(e) => warn!("Skipping {}: {:#}", file.display(), e),
        }
    }

    let exit_when_done = !args.stay && !args.files.is_empty();
    if exit_when_done && pending.is_empty() {
        warn!("No file could be started");
        daemon.destroy();
        return Ok(());
    }

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            received = events.recv() => match received {
                Ok(event) => {
                    if args.events {
                        match serde_json::to_string(&event) {
                            Ok(line) => println!("{}", line),
                            Err(e) => warn!("Failed to serialize event: {}", e),
                        }
                    }
                    if let DaemonEvent::BranchEnded { branch, .. } = event {
                        daemon.release(branch);
                        pending.remove(&branch);
                        if exit_when_done && pending.is_empty() {
                            info!("All files finished");
                            break;
                        }
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!("Event stream lagged, {} events skipped", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    daemon.destroy();
    info!("Shutdown complete");
    Ok(())
}

/// Allocate a branch and start `file` on it
fn start_file(daemon: &Daemon, file: &Path, args: &Args) -> Result<BranchId> {
    let branch = daemon.allocate()?;
    if let Err(e) = daemon.open(branch, file) {
        daemon.release(branch);
        return Err(e.into());
    }
    daemon.set_gain(branch, args.gain);
    daemon.set_loop(branch, args.looping);
    daemon.play(branch)?;
    info!("Playing {} on {}", file.display(), branch);
    Ok(branch)
}

/// Initialize tracing from RUST_LOG, falling back to the configured level
fn init_tracing(config: &DaemonConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("mixd={}", config.logging.level).into());

    let (stderr_layer, file_layer) = match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false);
            (None, Some(layer))
        }
        None => (
            Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
            None,
        ),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_identity_is_stamped() {
        assert!(!env!("GIT_HASH").is_empty());
        assert!(chrono::DateTime::parse_from_rfc3339(env!("BUILD_TIMESTAMP")).is_ok());
        assert!(!env!("BUILD_PROFILE").is_empty());
    }

    #[test]
    fn test_args_parse_files_and_flags() {
        let args = Args::parse_from(["mixd", "--loop", "-g", "0.5", "--events", "a.wav", "b.ogg"]);
        assert!(args.looping);
        assert!(args.events);
        assert_eq!(args.gain, 0.5);
        assert_eq!(args.files.len(), 2);
    }
}

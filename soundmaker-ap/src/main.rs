//! SoundMaker audio arbiter (soundmaker-ap) - Main entry point
//!
//! Plays the configured internet radio stream and hands the output over to
//! the AirPlay receiver whenever a device connects.
//!
//! Signals:
//! - SIGINT / SIGTERM: stop the player, publish `idle`, exit
//! - SIGHUP: explicit resume after the player was given up on

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use soundmaker_ap::check::run_checks;
use soundmaker_ap::config::{ConfigOverrides, EngineConfig};
use soundmaker_ap::Engine;
use soundmaker_common::config::{LoggingConfig, TomlConfig};
use tokio::signal;
use tokio::signal::unix::{signal as unix_signal, SignalKind};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for soundmaker-ap
#[derive(Parser, Debug)]
#[command(name = "soundmaker-ap")]
#[command(about = "Audio source arbiter: internet radio by default, AirPlay while connected")]
#[command(version)]
struct Args {
    /// Configuration file (default: $SOUNDMAKER_CONFIG, ~/.config/soundmaker/config.toml, /etc/soundmaker/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stream URL to play
    #[arg(long, env = "SOUNDMAKER_STREAM_URL")]
    url: Option<String>,

    /// Player volume (0-100)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    volume: Option<u8>,

    /// Event pipe written by the AirPlay hook
    #[arg(long, env = "SOUNDMAKER_PIPE")]
    pipe: Option<PathBuf>,

    /// State file read by the LED controller
    #[arg(long, env = "SOUNDMAKER_STATE_FILE")]
    state_file: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Check the player and stream, then exit
    #[arg(long)]
    check: bool,
}

impl Args {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            url: self.url.clone(),
            volume: self.volume,
            pipe_path: self.pipe.clone(),
            state_path: self.state_file.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    // Logging settings live in the config file; until they are known, log to stderr
    let mut config = tracing::subscriber::with_default(bootstrap_subscriber(args.verbose), || {
        TomlConfig::load(args.config.as_deref())
    })
    .context("Failed to load configuration")?;
    args.overrides().apply(&mut config);

    init_tracing(&config.logging, args.verbose)?;

    if args.check {
        return Ok(check(&config).await);
    }

    let engine_config = EngineConfig::from_toml(&config).context("Invalid configuration")?;

    info!("Starting SoundMaker audio arbiter v{}", env!("CARGO_PKG_VERSION"));
    info!("Stream: {} (volume {})", config.stream.url, config.stream.volume);
    info!("Event pipe: {}", config.channel.pipe_path.display());
    info!("State file: {}", config.state.path.display());

    // Install handlers before anything can be signalled
    let mut terminate =
        unix_signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut hangup = unix_signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;

    let engine = Engine::start(engine_config).context("Failed to start engine")?;

    loop {
        tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Ctrl+C handler failed: {}", e);
                }
                info!("Received Ctrl+C, shutting down");
                break;
            }
            _ = terminate.recv() => {
                info!("Received terminate signal, shutting down");
                break;
            }
            Some(()) = hangup.recv() => {
                info!("Received SIGHUP, resuming stream");
                if let Err(e) = engine.resume().await {
                    warn!("Resume failed: {}", e);
                }
            }
        }
    }

    engine.shutdown().await;
    info!("Shutdown complete");
    Ok(ExitCode::SUCCESS)
}

/// Run `--check` and print one line per step
async fn check(config: &TomlConfig) -> ExitCode {
    let reports = run_checks(&config.stream).await;
    let mut all_passed = true;
    for report in &reports {
        let mark = if report.passed { "OK  " } else { "FAIL" };
        println!("[{}] {}: {}", mark, report.name, report.detail);
        all_passed &= report.passed;
    }

    if all_passed {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Stderr-only subscriber used while the configuration is loaded
fn bootstrap_subscriber(verbose: bool) -> impl tracing::Subscriber + Send + Sync {
    let level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .finish()
}

/// Initialize tracing
///
/// RUST_LOG wins over the configured level; `--verbose` forces debug.
fn init_tracing(logging: &LoggingConfig, verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { logging.level.as_str() };
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(format!("{},hyper=info,reqwest=info", level))
            .with_context(|| format!("Invalid log level '{}'", level))?,
    };

    let file_layer = match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();
    Ok(())
}

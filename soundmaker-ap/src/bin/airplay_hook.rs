//! AirPlay session hook (soundmaker-hook)
//!
//! Configured as shairport-sync's session start/end command:
//!
//! ```text
//! sessioncontrol = {
//!     run_this_before_entering_active_state = "/usr/local/bin/soundmaker-hook connect";
//!     run_this_after_exiting_active_state = "/usr/local/bin/soundmaker-hook disconnect";
//! };
//! ```
//!
//! Always exits 0 once the arguments parse: an engine that is not running is
//! not the receiver's problem.

use std::path::PathBuf;

use clap::Parser;
use soundmaker_ap::channel::{send_event, HookOutcome};
use soundmaker_common::config::TomlConfig;
use soundmaker_common::EventKind;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Command-line arguments for soundmaker-hook
#[derive(Parser, Debug)]
#[command(name = "soundmaker-hook")]
#[command(about = "Notify the SoundMaker arbiter of an AirPlay connect or disconnect")]
#[command(version)]
struct Args {
    /// connect | disconnect
    event: EventKind,

    /// Event pipe (default: from the configuration file)
    #[arg(long, env = "SOUNDMAKER_PIPE")]
    pipe: Option<PathBuf>,
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let pipe = args.pipe.unwrap_or_else(|| match TomlConfig::load(None) {
        Ok(config) => config.channel.pipe_path,
        Err(e) => {
            warn!("Ignoring unreadable configuration: {}", e);
            TomlConfig::default().channel.pipe_path
        }
    });

    match send_event(&pipe, args.event) {
        Ok(HookOutcome::Delivered) => info!("Sent '{}' to {}", args.event, pipe.display()),
        Ok(HookOutcome::NoReader) => {
            warn!("No arbiter listening on {}; '{}' dropped", pipe.display(), args.event)
        }
        Ok(HookOutcome::PipeFull) => {
            warn!("Event pipe {} is full; '{}' dropped", pipe.display(), args.event)
        }
        Ok(HookOutcome::PipeMissing) => {
            debug!("Event pipe {} does not exist; '{}' dropped", pipe.display(), args.event)
        }
        Err(e) => warn!("Failed to write '{}' to {}: {}", args.event, pipe.display(), e),
    }
}

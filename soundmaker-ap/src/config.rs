//! Engine configuration
//!
//! Turns the TOML bootstrap configuration (plus command-line overrides) into
//! the typed settings each engine component takes.
//!
//! # Configuration Priority
//!
//! 1. Command-line arguments (highest priority)
//! 2. Environment variables (through clap's `env`)
//! 3. TOML configuration file
//! 4. Built-in defaults (lowest priority)

use crate::arbiter::{ArbiterSettings, MachineTimings};
use crate::channel::ReaderSettings;
use crate::error::{Error, Result};
use crate::probe::ReceiverProbe;
use crate::supervisor::{BackoffPolicy, PlayerCommand, SupervisorPolicy};
use soundmaker_common::config::TomlConfig;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Everything [`crate::Engine::start`] needs
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub player: PlayerCommand,
    pub supervisor: SupervisorPolicy,
    pub reader: ReaderSettings,
    /// Capacity of the reader → arbiter event queue
    pub queue_capacity: usize,
    pub arbiter: ArbiterSettings,
    pub probe: ReceiverProbe,
    pub state_path: PathBuf,
}

/// Command-line configuration overrides
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub url: Option<String>,
    pub volume: Option<u8>,
    pub pipe_path: Option<PathBuf>,
    pub state_path: Option<PathBuf>,
}

impl ConfigOverrides {
    /// Write the overrides into `config`
    pub fn apply(&self, config: &mut TomlConfig) {
        if let Some(url) = &self.url {
            info!("Stream URL: {} (from CLI override)", url);
            config.stream.url = url.clone();
        }
        if let Some(volume) = self.volume {
            config.stream.volume = volume;
        }
        if let Some(pipe_path) = &self.pipe_path {
            config.channel.pipe_path = pipe_path.clone();
        }
        if let Some(state_path) = &self.state_path {
            config.state.path = state_path.clone();
        }
    }
}

impl EngineConfig {
    /// Build engine settings from a TOML configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration fails validation.
    pub fn from_toml(config: &TomlConfig) -> Result<Self> {
        config.validate().map_err(|e| match e {
            soundmaker_common::Error::Config(msg) => Error::Config(msg),
            other => Error::Common(other),
        })?;

        let sup = &config.supervisor;
        let supervisor = SupervisorPolicy {
            grace_period: Duration::from_millis(sup.grace_period_ms),
            backoff: BackoffPolicy::new(
                Duration::from_millis(sup.backoff_initial_ms),
                Duration::from_millis(sup.backoff_max_ms),
                sup.backoff_multiplier,
            ),
            max_failures: sup.max_failures,
            stable_after: Duration::from_millis(sup.stable_after_ms),
        };

        let channel = &config.channel;
        let reader = ReaderSettings {
            pipe_path: channel.pipe_path.clone(),
            reopen_delay: Duration::from_millis(channel.reopen_delay_ms),
            identity_check: Duration::from_millis(channel.identity_check_ms.max(1)),
        };

        let arbiter = ArbiterSettings {
            timings: MachineTimings {
                settle_window: Duration::from_millis(channel.settle_window_ms),
                idle_retry: Duration::from_millis(config.state.idle_retry_ms),
            },
            transition_timeout: Duration::from_millis(config.state.transition_timeout_ms),
        };

        let probe = ReceiverProbe::from_service(
            &config.receiver.service,
            Duration::from_millis(config.receiver.probe_timeout_ms),
        );

        Ok(Self {
            player: PlayerCommand::mpv(&config.stream),
            supervisor,
            reader,
            queue_capacity: channel.queue_capacity,
            arbiter,
            probe,
            state_path: config.state.path.clone(),
        })
    }
}

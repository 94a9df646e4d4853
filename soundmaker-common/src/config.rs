//! Bootstrap configuration loaded from TOML
//!
//! Configuration file resolution order:
//! 1. Explicit path (command-line argument)
//! 2. `SOUNDMAKER_CONFIG` environment variable
//! 3. `~/.config/soundmaker/config.toml`
//! 4. `/etc/soundmaker/config.toml`
//! 5. Built-in defaults (no file)
//!
//! A missing configuration file is not fatal: the engine logs a warning and
//! starts with built-in defaults. An explicitly named file that cannot be read
//! or parsed is an error.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "SOUNDMAKER_CONFIG";

/// Default internet radio stream
pub const DEFAULT_STREAM_URL: &str = "https://uk3.internet-radio.com/proxy/1940sradio/stream";

/// Default event pipe location (shared with the hook script)
pub const DEFAULT_PIPE_PATH: &str = "/tmp/soundmaker_airplay_events";

/// Default state file location (read by the LED controller)
pub const DEFAULT_STATE_PATH: &str = "/tmp/soundmaker_state";

/// Complete bootstrap configuration
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct TomlConfig {
    pub stream: StreamConfig,
    pub supervisor: SupervisorConfig,
    pub channel: ChannelConfig,
    pub receiver: ReceiverConfig,
    pub state: StateConfig,
    pub logging: LoggingConfig,
}

/// Streaming player settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StreamConfig {
    /// Stream URL handed to the player
    #[serde(default = "default_stream_url")]
    pub url: String,

    /// Player volume (0-100)
    #[serde(default = "default_volume")]
    pub volume: u8,

    /// Player executable
    #[serde(default = "default_player")]
    pub player: String,

    /// Audio device selector passed as `--audio-device`
    #[serde(default = "default_audio_device")]
    pub audio_device: String,

    /// Working directory of the player process
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,

    /// `XDG_RUNTIME_DIR` of the user owning the PulseAudio socket
    #[serde(default = "default_runtime_dir")]
    pub runtime_dir: PathBuf,
}

/// Player restart policy
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SupervisorConfig {
    /// Wait after SIGTERM before SIGKILL
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// First restart delay
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,

    /// Restart delay ceiling
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,

    /// Growth factor between consecutive restart delays
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Consecutive failures after which restarts stop
    #[serde(default = "default_max_failures")]
    pub max_failures: u32,

    /// Uptime after which the failure counter resets
    #[serde(default = "default_stable_after_ms")]
    pub stable_after_ms: u64,
}

/// Event pipe settings
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ChannelConfig {
    #[serde(default = "default_pipe_path")]
    pub pipe_path: PathBuf,

    /// Capacity of the reader → arbiter queue
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Delay before resuming the stream after a disconnect
    #[serde(default = "default_settle_window_ms")]
    pub settle_window_ms: u64,

    /// Pause between closing and reopening a faulted pipe
    #[serde(default = "default_reopen_delay_ms")]
    pub reopen_delay_ms: u64,

    /// How often the reader checks the pipe was not replaced underneath it
    #[serde(default = "default_identity_check_ms")]
    pub identity_check_ms: u64,
}

/// AirPlay receiver liveness probe
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ReceiverConfig {
    /// systemd unit of the receiver; empty disables the probe
    #[serde(default = "default_receiver_service")]
    pub service: String,

    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

/// State publication and transition bounds
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StateConfig {
    #[serde(default = "default_state_path")]
    pub path: PathBuf,

    /// Upper bound for a single source switch
    #[serde(default = "default_transition_timeout_ms")]
    pub transition_timeout_ms: u64,

    /// Delay before retrying the stream after falling back to idle
    #[serde(default = "default_idle_retry_ms")]
    pub idle_retry_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr only if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_stream_url() -> String {
    DEFAULT_STREAM_URL.to_string()
}

fn default_volume() -> u8 {
    100
}

fn default_player() -> String {
    "mpv".to_string()
}

fn default_audio_device() -> String {
    "pulse".to_string()
}

fn default_working_dir() -> PathBuf {
    PathBuf::from("/")
}

fn default_runtime_dir() -> PathBuf {
    PathBuf::from("/run/user/1000")
}

fn default_grace_period_ms() -> u64 {
    5000
}

fn default_backoff_initial_ms() -> u64 {
    3000
}

fn default_backoff_max_ms() -> u64 {
    60_000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_failures() -> u32 {
    10
}

fn default_stable_after_ms() -> u64 {
    30_000
}

fn default_pipe_path() -> PathBuf {
    PathBuf::from(DEFAULT_PIPE_PATH)
}

fn default_queue_capacity() -> usize {
    16
}

fn default_settle_window_ms() -> u64 {
    1000
}

fn default_reopen_delay_ms() -> u64 {
    250
}

fn default_identity_check_ms() -> u64 {
    1000
}

fn default_receiver_service() -> String {
    "shairport-sync".to_string()
}

fn default_probe_timeout_ms() -> u64 {
    5000
}

fn default_state_path() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_PATH)
}

fn default_transition_timeout_ms() -> u64 {
    10_000
}

fn default_idle_retry_ms() -> u64 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: default_stream_url(),
            volume: default_volume(),
            player: default_player(),
            audio_device: default_audio_device(),
            working_dir: default_working_dir(),
            runtime_dir: default_runtime_dir(),
        }
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            grace_period_ms: default_grace_period_ms(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            backoff_multiplier: default_backoff_multiplier(),
            max_failures: default_max_failures(),
            stable_after_ms: default_stable_after_ms(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            pipe_path: default_pipe_path(),
            queue_capacity: default_queue_capacity(),
            settle_window_ms: default_settle_window_ms(),
            reopen_delay_ms: default_reopen_delay_ms(),
            identity_check_ms: default_identity_check_ms(),
        }
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            service: default_receiver_service(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
            transition_timeout_ms: default_transition_timeout_ms(),
            idle_retry_ms: default_idle_retry_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl TomlConfig {
    /// Parse configuration from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from an explicit file
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded TOML configuration from {}", path.display());
        Ok(config)
    }

    /// Resolve and load configuration
    ///
    /// An explicit path must exist. Without one, the first file found in the
    /// resolution order is used, falling back to built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_file(path);
        }

        match resolve_config_path() {
            Some(path) => Self::load_file(&path),
            None => {
                warn!("No configuration file found, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.stream.volume > 100 {
            return Err(Error::Config(format!(
                "stream.volume must be 0-100, got {}",
                self.stream.volume
            )));
        }
        if self.stream.url.trim().is_empty() {
            return Err(Error::Config("stream.url must not be empty".to_string()));
        }
        if self.stream.player.trim().is_empty() {
            return Err(Error::Config("stream.player must not be empty".to_string()));
        }
        if self.supervisor.backoff_multiplier < 1.0 {
            return Err(Error::Config(format!(
                "supervisor.backoff_multiplier must be >= 1.0, got {}",
                self.supervisor.backoff_multiplier
            )));
        }
        if self.supervisor.backoff_max_ms < self.supervisor.backoff_initial_ms {
            return Err(Error::Config(
                "supervisor.backoff_max_ms must not be below backoff_initial_ms".to_string(),
            ));
        }
        if self.supervisor.max_failures == 0 {
            return Err(Error::Config("supervisor.max_failures must be at least 1".to_string()));
        }
        if self.state.transition_timeout_ms <= self.supervisor.grace_period_ms {
            return Err(Error::Config(format!(
                "state.transition_timeout_ms ({}) must exceed supervisor.grace_period_ms ({})",
                self.state.transition_timeout_ms, self.supervisor.grace_period_ms
            )));
        }
        if self.channel.queue_capacity == 0 {
            return Err(Error::Config("channel.queue_capacity must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// Find the first existing config file
///
/// Checks `SOUNDMAKER_CONFIG`, then the per-user and system-wide locations.
pub fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    let user_config = dirs::config_dir().map(|d| d.join("soundmaker").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc/soundmaker/config.toml");
    if system_config.exists() {
        return Some(system_config);
    }

    None
}

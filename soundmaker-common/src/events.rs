//! Audio source state and AirPlay event vocabulary
//!
//! These types define the two text formats the engine shares with the outside
//! world:
//! - **State file:** one [`AudioState`] tag, read by the LED controller
//! - **Event pipe:** newline-terminated [`EventKind`] tokens, written by the
//!   shairport-sync hook

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use crate::{Error, Result};

/// Which audio source currently owns the output
///
/// `Transitioning` only exists while a switch is in progress and is never
/// written to the state file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum AudioState {
    #[default]
    Idle,
    Streaming,
    AirPlay,
    Transitioning,
}

impl AudioState {
    /// Tag written to the state file
    pub fn as_tag(&self) -> &'static str {
        match self {
            AudioState::Idle => "idle",
            AudioState::Streaming => "streaming",
            AudioState::AirPlay => "airplay",
            AudioState::Transitioning => "transitioning",
        }
    }

    /// True for every state except `Transitioning`
    pub fn is_settled(&self) -> bool {
        !matches!(self, AudioState::Transitioning)
    }
}

impl fmt::Display for AudioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

impl FromStr for AudioState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "idle" => Ok(AudioState::Idle),
            "streaming" => Ok(AudioState::Streaming),
            "airplay" => Ok(AudioState::AirPlay),
            "transitioning" => Ok(AudioState::Transitioning),
            other => Err(Error::InvalidInput(format!("unknown audio state '{}'", other))),
        }
    }
}

/// Receiver presence notification carried over the event pipe
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A remote device connected to the AirPlay receiver
    Connect,
    /// The remote device went away
    Disconnect,
}

impl EventKind {
    /// Wire token, without the trailing newline
    pub fn as_token(&self) -> &'static str {
        match self {
            EventKind::Connect => "connect",
            EventKind::Disconnect => "disconnect",
        }
    }

    /// Parse one pipe token
    ///
    /// Surrounding whitespace is ignored and matching is case-insensitive,
    /// so `"Connect\r"` is accepted.
    pub fn parse_token(token: &str) -> Option<Self> {
        let token = token.trim();
        if token.eq_ignore_ascii_case("connect") {
            Some(EventKind::Connect)
        } else if token.eq_ignore_ascii_case("disconnect") {
            Some(EventKind::Disconnect)
        } else {
            None
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_token())
    }
}

impl FromStr for EventKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse_token(s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown event token '{}'", s.trim())))
    }
}

/// An event as received by the engine
///
/// `received_at` is taken from the monotonic clock when the token is read
/// off the pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AirPlayEvent {
    pub kind: EventKind,
    pub received_at: Instant,
}

impl AirPlayEvent {
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            received_at: Instant::now(),
        }
    }
}

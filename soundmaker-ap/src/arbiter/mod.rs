//! Audio source arbitration
//!
//! **Responsibilities:**
//! - Decide which source owns the speakers (streaming player or AirPlay receiver)
//! - Serialize every transition, including the player stop/start it needs
//! - Debounce AirPlay disconnects before resuming the stream
//! - Publish each settled state for the LED controller
//!
//! [`SourceMachine`] holds the decision table and is pure; [`Arbiter`] is the
//! reactor task that feeds it and carries out its player actions.

mod machine;
mod reactor;

pub use machine::{MachineInput, MachineTimings, PlayerAction, SourceMachine, Step, Transition};
pub use reactor::{Arbiter, ArbiterHandle, ArbiterSettings};

use chrono::{DateTime, Utc};
use serde::Serialize;
use soundmaker_common::AudioState;

/// Snapshot of the arbiter for observers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ArbiterStatus {
    pub state: AudioState,
    /// Player restarts were abandoned; cleared by an explicit resume
    pub degraded: bool,
    /// A delayed resume of the stream is armed
    pub resume_pending: bool,
    /// Consecutive player failures as last reported by the supervisor
    pub player_failures: u32,
    /// Wall-clock time of the last settled state change
    pub changed_at: Option<DateTime<Utc>>,
}

/// Out-of-band requests to the arbiter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbiterControl {
    /// Leave degraded mode and bring the stream back if appropriate
    Resume,
}

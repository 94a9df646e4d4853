//! Source arbitration state machine
//!
//! Pure decision logic: no I/O, no clocks of its own. The reactor feeds it
//! inputs together with the current time and executes the player actions it
//! asks for.
//!
//! | Current   | Input       | Player action      | Next      |
//! |-----------|-------------|--------------------|-----------|
//! | Streaming | Connect     | stop               | AirPlay   |
//! | Idle      | Connect     | stop if requested  | AirPlay   |
//! | AirPlay   | Connect     | none (cancel resume) | AirPlay |
//! | AirPlay   | Disconnect  | none, arm resume   | AirPlay   |
//! | Streaming | Disconnect  | none               | Streaming |
//! | Idle      | Disconnect  | start              | Streaming |
//! | AirPlay   | ResumeDue   | start              | Streaming |
//! | any       | PlayerGaveUp| none, degraded     | unchanged |
//!
//! Player actions are bracketed by [`SourceMachine::begin`] (state becomes
//! `Transitioning`) and [`SourceMachine::complete`], which settles on the
//! target or on the transition's fallback when the action failed.

use soundmaker_common::{AudioState, EventKind};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// What the player supervisor is asked to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerAction {
    Start,
    Stop,
}

/// A state change that needs a player action first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub action: PlayerAction,
    pub from: AudioState,
    pub target: AudioState,
    /// Settled state if the action fails or times out
    pub fallback: AudioState,
}

/// Result of feeding one input to the machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Nothing to do; state unchanged
    Ignore,
    /// State changed without a player action
    Settle(AudioState),
    /// Run the player action, then call `complete`
    Run(Transition),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MachineInput {
    /// Engine startup: bring up the default source
    Start,
    Event(EventKind),
    /// The resume deadline armed by a disconnect (or idle retry) passed
    ResumeDue,
    PlayerGaveUp { failures: u32 },
    /// Operator asked to leave degraded mode
    ResumeRequested,
}

/// Timing knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineTimings {
    /// Delay between a disconnect and resuming the stream
    pub settle_window: Duration,
    /// Delay before retrying the stream after a failed start
    pub idle_retry: Duration,
}

impl Default for MachineTimings {
    fn default() -> Self {
        Self {
            settle_window: Duration::from_secs(1),
            idle_retry: Duration::from_secs(3),
        }
    }
}

#[derive(Debug)]
pub struct SourceMachine {
    state: AudioState,
    timings: MachineTimings,
    resume_at: Option<Instant>,
    /// The player may be running: a start was issued and no stop has succeeded since
    player_requested: bool,
    degraded: bool,
    in_flight: Option<Transition>,
}

impl SourceMachine {
    pub fn new(timings: MachineTimings) -> Self {
        Self {
            state: AudioState::Idle,
            timings,
            resume_at: None,
            player_requested: false,
            degraded: false,
            in_flight: None,
        }
    }

    pub fn state(&self) -> AudioState {
        self.state
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// When the pending resume fires, if one is armed
    pub fn resume_deadline(&self) -> Option<Instant> {
        self.resume_at
    }

    pub fn player_desired(&self) -> bool {
        self.player_requested
    }

    pub fn receiver_active(&self) -> bool {
        self.state == AudioState::AirPlay
    }

    pub fn handle(&mut self, input: MachineInput, now: Instant) -> Step {
        if let Some(transition) = self.in_flight {
            warn!(
                "Input {:?} arrived during {:?} transition; ignoring",
                input, transition.action
            );
            return Step::Ignore;
        }

        match input {
            MachineInput::Start => self.on_start(),
            MachineInput::Event(EventKind::Connect) => self.on_connect(),
            MachineInput::Event(EventKind::Disconnect) => self.on_disconnect(now),
            MachineInput::ResumeDue => self.on_resume_due(),
            MachineInput::PlayerGaveUp { failures } => {
                if !self.degraded {
                    warn!(
                        "Streaming player unavailable after {} failures; degraded until resumed",
                        failures
                    );
                }
                self.degraded = true;
                Step::Ignore
            }
            MachineInput::ResumeRequested => self.on_resume_requested(),
        }
    }

    fn on_start(&mut self) -> Step {
        match self.state {
            AudioState::Idle => self.run(PlayerAction::Start, AudioState::Streaming, AudioState::Idle),
            _ => Step::Ignore,
        }
    }

    fn on_connect(&mut self) -> Step {
        if self.resume_at.take().is_some() {
            info!("Connect received, pending stream resume cancelled");
        }

        match self.state {
            AudioState::Streaming => {
                self.run(PlayerAction::Stop, AudioState::AirPlay, AudioState::Streaming)
            }
            AudioState::Idle if self.player_requested => {
                self.run(PlayerAction::Stop, AudioState::AirPlay, AudioState::Idle)
            }
            AudioState::Idle => self.settle(AudioState::AirPlay),
            AudioState::AirPlay => {
                debug!("Duplicate connect ignored");
                Step::Ignore
            }
            AudioState::Transitioning => Step::Ignore,
        }
    }

    fn on_disconnect(&mut self, now: Instant) -> Step {
        match self.state {
            AudioState::AirPlay => {
                // Re-arming on every disconnect: the latest event wins
                let deadline = now + self.timings.settle_window;
                self.resume_at = Some(deadline);
                info!(
                    "AirPlay disconnected, resuming stream in {} ms unless it reconnects",
                    self.timings.settle_window.as_millis()
                );
                Step::Ignore
            }
            AudioState::Streaming => {
                debug!("Spurious disconnect while streaming ignored");
                Step::Ignore
            }
            AudioState::Idle => {
                self.resume_at = None;
                self.run(PlayerAction::Start, AudioState::Streaming, AudioState::Idle)
            }
            AudioState::Transitioning => Step::Ignore,
        }
    }

    fn on_resume_due(&mut self) -> Step {
        if self.resume_at.take().is_none() {
            return Step::Ignore;
        }
        match self.state {
            AudioState::AirPlay | AudioState::Idle => {
                self.run(PlayerAction::Start, AudioState::Streaming, AudioState::Idle)
            }
            _ => Step::Ignore,
        }
    }

    fn on_resume_requested(&mut self) -> Step {
        match self.state {
            AudioState::Streaming if self.degraded => {
                self.run(PlayerAction::Start, AudioState::Streaming, AudioState::Idle)
            }
            AudioState::Idle => {
                self.resume_at = None;
                self.run(PlayerAction::Start, AudioState::Streaming, AudioState::Idle)
            }
            AudioState::AirPlay => {
                // The next resume starts the player with a fresh failure count
                self.degraded = false;
                Step::Ignore
            }
            _ => Step::Ignore,
        }
    }

    fn run(&self, action: PlayerAction, target: AudioState, fallback: AudioState) -> Step {
        Step::Run(Transition {
            action,
            from: self.state,
            target,
            fallback,
        })
    }

    fn settle(&mut self, state: AudioState) -> Step {
        info!("Audio state: {} -> {}", self.state, state);
        self.state = state;
        Step::Settle(state)
    }

    /// Enter `Transitioning` for `transition`
    pub fn begin(&mut self, transition: Transition) {
        if transition.action == PlayerAction::Start {
            self.player_requested = true;
        }
        self.in_flight = Some(transition);
        self.state = AudioState::Transitioning;
    }

    /// Settle the in-flight transition
    ///
    /// `succeeded` is false when the player action failed or timed out.
    pub fn complete(&mut self, succeeded: bool, now: Instant) -> AudioState {
        let Some(transition) = self.in_flight.take() else {
            return self.state;
        };

        let settled = match (transition.action, succeeded) {
            (PlayerAction::Start, true) => {
                self.degraded = false;
                transition.target
            }
            (PlayerAction::Start, false) => {
                self.resume_at = Some(now + self.timings.idle_retry);
                warn!(
                    "Could not start streaming, retrying in {} ms",
                    self.timings.idle_retry.as_millis()
                );
                transition.fallback
            }
            (PlayerAction::Stop, true) => {
                self.player_requested = false;
                transition.target
            }
            (PlayerAction::Stop, false) => {
                warn!("Could not stop streaming player; staying off AirPlay");
                transition.fallback
            }
        };

        info!("Audio state: {} -> {}", transition.from, settled);
        self.state = settled;
        settled
    }

    /// A stop reported as failed turned out to have taken effect
    ///
    /// Moves from the transition's fallback to its target. Has no effect once
    /// another input has moved the machine on.
    pub fn confirm_stopped(&mut self, transition: Transition) -> AudioState {
        let applies = transition.action == PlayerAction::Stop
            && self.in_flight.is_none()
            && self.state == transition.fallback;
        if !applies {
            return self.state;
        }

        self.player_requested = false;
        info!(
            "Player stop completed late; audio state: {} -> {}",
            self.state, transition.target
        );
        self.state = transition.target;
        transition.target
    }
}

//! Arbiter reactor task
//!
//! One loop, one input at a time: AirPlay events, supervisor reports, explicit
//! resume requests and the resume timer all funnel through
//! [`SourceMachine::handle`]. A player action triggered by an input is awaited
//! (bounded by `transition_timeout`) before the next input is looked at.

use super::machine::{MachineInput, MachineTimings, PlayerAction, SourceMachine, Step, Transition};
use super::{ArbiterControl, ArbiterStatus};
use crate::error::{Error, Result};
use crate::probe::ReceiverProbe;
use crate::publisher::StatePublisher;
use crate::supervisor::{SupervisorHandle, SupervisorReport};
use chrono::Utc;
use soundmaker_common::{AirPlayEvent, AudioState, EventKind};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArbiterSettings {
    pub timings: MachineTimings,
    /// Upper bound on a single player start/stop
    pub transition_timeout: Duration,
}

impl Default for ArbiterSettings {
    fn default() -> Self {
        Self {
            timings: MachineTimings::default(),
            transition_timeout: Duration::from_secs(10),
        }
    }
}

/// Client side of a running arbiter
#[derive(Debug, Clone)]
pub struct ArbiterHandle {
    control: mpsc::Sender<ArbiterControl>,
    status: watch::Receiver<ArbiterStatus>,
}

impl ArbiterHandle {
    /// Latest status snapshot
    pub fn status(&self) -> ArbiterStatus {
        *self.status.borrow()
    }

    /// Receiver that is notified on every status change
    pub fn subscribe(&self) -> watch::Receiver<ArbiterStatus> {
        self.status.clone()
    }

    /// Clear degraded mode and bring the stream back where appropriate
    pub async fn resume(&self) -> Result<()> {
        self.control
            .send(ArbiterControl::Resume)
            .await
            .map_err(|_| Error::Supervisor("arbiter is not running".to_string()))
    }
}

pub struct Arbiter {
    machine: SourceMachine,
    transition_timeout: Duration,
    supervisor: SupervisorHandle,
    probe: ReceiverProbe,
    publisher: StatePublisher,
    events: mpsc::Receiver<AirPlayEvent>,
    reports: mpsc::UnboundedReceiver<SupervisorReport>,
    control: mpsc::Receiver<ArbiterControl>,
    status: watch::Sender<ArbiterStatus>,
    cancel: CancellationToken,
    player_failures: u32,
}

impl Arbiter {
    /// Start the reactor
    ///
    /// The stream is requested immediately. Cancelling `cancel` stops the
    /// player, publishes `idle` and ends the task.
    pub fn spawn(
        settings: ArbiterSettings,
        supervisor: SupervisorHandle,
        probe: ReceiverProbe,
        publisher: StatePublisher,
        events: mpsc::Receiver<AirPlayEvent>,
        reports: mpsc::UnboundedReceiver<SupervisorReport>,
        cancel: CancellationToken,
    ) -> (ArbiterHandle, JoinHandle<()>) {
        let (control_tx, control) = mpsc::channel(4);
        let (status, status_rx) = watch::channel(ArbiterStatus::default());

        let arbiter = Self {
            machine: SourceMachine::new(settings.timings),
            transition_timeout: settings.transition_timeout,
            supervisor,
            probe,
            publisher,
            events,
            reports,
            control,
            status,
            cancel,
            player_failures: 0,
        };
        let task = tokio::spawn(arbiter.run());

        let handle = ArbiterHandle {
            control: control_tx,
            status: status_rx,
        };
        (handle, task)
    }

    async fn run(mut self) {
        info!("Arbiter started, state file {}", self.publisher.path().display());
        self.publish(AudioState::Idle);
        self.apply(MachineInput::Start).await;

        let mut events_open = true;
        let mut reports_open = true;
        let mut control_open = true;

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,

                report = self.reports.recv(), if reports_open => match report {
                    Some(report) => self.on_report(report).await,
                    None => {
                        warn!("Supervisor report channel closed");
                        reports_open = false;
                    }
                },

                event = self.events.recv(), if events_open => match event {
                    Some(event) => self.on_event(event).await,
                    None => {
                        warn!("Event channel closed; AirPlay events will no longer be seen");
                        events_open = false;
                    }
                },

                control = self.control.recv(), if control_open => match control {
                    Some(ArbiterControl::Resume) => {
                        info!("Explicit resume requested");
                        self.apply(MachineInput::ResumeRequested).await;
                    }
                    None => control_open = false,
                },

                _ = sleep_until_opt(self.machine.resume_deadline()) => {
                    self.probe.spawn_diagnostic("stream resume", false);
                    self.apply(MachineInput::ResumeDue).await;
                }
            }
        }

        self.shutdown().await;
    }

    async fn on_event(&mut self, event: AirPlayEvent) {
        debug!(
            "Handling '{}' event queued {} ms ago",
            event.kind,
            event.received_at.elapsed().as_millis()
        );
        if event.kind == EventKind::Connect {
            self.probe.spawn_diagnostic("AirPlay connect", true);
        }
        self.apply(MachineInput::Event(event.kind)).await;
    }

    async fn on_report(&mut self, report: SupervisorReport) {
        match report {
            SupervisorReport::Spawned { pid } => debug!("Supervisor reports player pid {}", pid),
            SupervisorReport::SpawnFailed { error } => {
                debug!("Supervisor reports spawn failure: {}", error)
            }
            SupervisorReport::Exited { code, signal } => {
                debug!("Supervisor reports player exit (code {:?}, signal {:?})", code, signal)
            }
            SupervisorReport::RestartScheduled { attempt, .. } => {
                self.player_failures = attempt;
            }
            SupervisorReport::Stable => self.player_failures = 0,
            SupervisorReport::GaveUp { failures } => {
                self.player_failures = failures;
                self.apply(MachineInput::PlayerGaveUp { failures }).await;
            }
        }
        self.update_status();
    }

    async fn apply(&mut self, input: MachineInput) {
        match self.machine.handle(input, Instant::now()) {
            Step::Ignore => {}
            Step::Settle(state) => self.publish(state),
            Step::Run(transition) => self.execute(transition).await,
        }
        self.update_status();
    }

    async fn execute(&mut self, transition: Transition) {
        self.machine.begin(transition);
        self.update_status();

        let action = match transition.action {
            PlayerAction::Start => "start",
            PlayerAction::Stop => "stop",
        };
        let supervisor = self.supervisor.clone();
        let request = async move {
            match transition.action {
                PlayerAction::Start => supervisor.request_running().await,
                PlayerAction::Stop => supervisor.request_stopped().await,
            }
        };

        let succeeded = match tokio::time::timeout(self.transition_timeout, request).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                error!("Player {} failed: {}", action, e);
                false
            }
            Err(_) => {
                error!(
                    "Player {} did not finish within {} ms",
                    action,
                    self.transition_timeout.as_millis()
                );
                false
            }
        };

        let settled = self.machine.complete(succeeded, Instant::now());
        self.publish(settled);

        if !succeeded && transition.action == PlayerAction::Stop {
            self.reconcile_failed_stop(transition).await;
        }

        if succeeded && transition.action == PlayerAction::Start {
            // A fresh start may have reset the supervisor's failure count
            if let Ok(Ok(snapshot)) =
                tokio::time::timeout(self.transition_timeout, self.supervisor.snapshot()).await
            {
                self.player_failures = snapshot.failures;
            }
        }
    }

    /// Line the fallback state up with what the supervisor actually did
    ///
    /// A timed-out stop keeps running inside the supervisor. If it has landed
    /// the player is gone and the stop's target applies. If the supervisor is
    /// still busy, a start is queued behind the stop so a `Streaming` fallback
    /// has a player again once it finishes.
    async fn reconcile_failed_stop(&mut self, transition: Transition) {
        match tokio::time::timeout(self.transition_timeout, self.supervisor.snapshot()).await {
            Ok(Ok(snapshot)) if !snapshot.desired_running => {
                let settled = self.machine.confirm_stopped(transition);
                self.publish(settled);
            }
            Ok(Ok(_)) => debug!("Player still desired after failed stop"),
            Ok(Err(e)) => warn!("Could not query supervisor after failed stop: {}", e),
            Err(_) if transition.fallback == AudioState::Streaming => {
                warn!("Supervisor still stopping the player; queueing a restart behind it");
                // The request is enqueued on first poll, so it stays ordered
                // before any later stop even if this wait times out
                match tokio::time::timeout(self.transition_timeout, self.supervisor.request_running())
                    .await
                {
                    Ok(Ok(())) => info!("Player restarted after late stop"),
                    Ok(Err(e)) => error!("Player restart after late stop failed: {}", e),
                    Err(_) => warn!("Player restart still queued behind late stop"),
                }
            }
            Err(_) => warn!("Supervisor did not answer after failed stop"),
        }
    }

    fn publish(&self, state: AudioState) {
        if let Err(e) = self.publisher.publish(state) {
            error!("Failed to publish state '{}': {}", state, e);
        }
        self.status.send_modify(|status| status.changed_at = Some(Utc::now()));
    }

    fn update_status(&self) {
        let next = ArbiterStatus {
            state: self.machine.state(),
            degraded: self.machine.is_degraded(),
            resume_pending: self.machine.resume_deadline().is_some(),
            player_failures: self.player_failures,
            changed_at: self.status.borrow().changed_at,
        };
        self.status.send_if_modified(|status| {
            if *status == next {
                false
            } else {
                *status = next;
                true
            }
        });
    }

    async fn shutdown(&mut self) {
        info!("Arbiter shutting down");
        match tokio::time::timeout(self.transition_timeout, self.supervisor.request_stopped()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Could not stop player during shutdown: {}", e),
            Err(_) => warn!("Player stop timed out during shutdown"),
        }
        self.publish(AudioState::Idle);
        self.status.send_modify(|status| {
            status.state = AudioState::Idle;
            status.resume_pending = false;
        });
        info!("Arbiter stopped");
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

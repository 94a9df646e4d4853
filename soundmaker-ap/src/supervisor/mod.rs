//! Player process supervisor
//!
//! **Responsibilities:**
//! - Own the single streaming player child process (nobody else touches it)
//! - Start/stop on request, idempotently
//! - Restart after unexpected exits with exponential backoff
//! - Stop restarting after `max_failures` consecutive failures and report it
//!
//! The supervisor runs as its own task. Callers talk to it through a
//! [`SupervisorHandle`]; every request is acknowledged once it has been fully
//! applied, so a caller that awaited `request_stopped()` knows the player is
//! gone. Unexpected events flow the other way as [`SupervisorReport`]s.

mod backoff;
mod process;

pub use backoff::BackoffPolicy;
pub use process::{describe_exit, send_signal, terminate, PlayerCommand};

use crate::error::{Error, Result};
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Restart and shutdown policy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SupervisorPolicy {
    /// Wait after SIGTERM before SIGKILL
    pub grace_period: Duration,
    pub backoff: BackoffPolicy,
    /// Consecutive failures that end automatic restarts
    pub max_failures: u32,
    /// Uptime after which the failure counter resets
    pub stable_after: Duration,
}

impl Default for SupervisorPolicy {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5),
            backoff: BackoffPolicy::default(),
            max_failures: 10,
            stable_after: Duration::from_secs(30),
        }
    }
}

/// Requests accepted by the supervisor task
#[derive(Debug)]
pub enum SupervisorCommand {
    RequestRunning { reply: oneshot::Sender<Result<()>> },
    RequestStopped { reply: oneshot::Sender<Result<()>> },
    Snapshot { reply: oneshot::Sender<SupervisorSnapshot> },
}

/// Unsolicited notifications from the supervisor
#[derive(Debug, Clone, PartialEq)]
pub enum SupervisorReport {
    Spawned { pid: u32 },
    SpawnFailed { error: String },
    /// Player exited while it was supposed to be running
    Exited { code: Option<i32>, signal: Option<i32> },
    RestartScheduled { attempt: u32, delay: Duration },
    /// Player stayed up long enough to clear the failure counter
    Stable,
    /// Restart ceiling reached; no further automatic restarts
    GaveUp { failures: u32 },
}

/// Point-in-time view of the supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SupervisorSnapshot {
    pub desired_running: bool,
    pub pid: Option<u32>,
    pub failures: u32,
    pub restart_pending: bool,
    pub gave_up: bool,
}

/// Cloneable client side of the supervisor task
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    tx: mpsc::Sender<SupervisorCommand>,
}

impl SupervisorHandle {
    /// Handle plus the raw command receiver
    ///
    /// [`Supervisor::spawn`] uses this internally; tests use it to stand in
    /// for the supervisor.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SupervisorCommand>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Ensure the player runs (idempotent)
    pub async fn request_running(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(SupervisorCommand::RequestRunning { reply }).await?;
        rx.await.map_err(|_| Error::Supervisor("request dropped".to_string()))?
    }

    /// Ensure the player is stopped (idempotent); returns once it has exited
    pub async fn request_stopped(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(SupervisorCommand::RequestStopped { reply }).await?;
        rx.await.map_err(|_| Error::Supervisor("request dropped".to_string()))?
    }

    pub async fn snapshot(&self) -> Result<SupervisorSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(SupervisorCommand::Snapshot { reply }).await?;
        rx.await.map_err(|_| Error::Supervisor("request dropped".to_string()))
    }

    /// True while a player process exists
    pub async fn is_alive(&self) -> bool {
        matches!(self.snapshot().await, Ok(SupervisorSnapshot { pid: Some(_), .. }))
    }

    async fn send(&self, command: SupervisorCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| Error::Supervisor("supervisor task is not running".to_string()))
    }
}

/// Supervisor task state
pub struct Supervisor {
    command: PlayerCommand,
    policy: SupervisorPolicy,
    commands: mpsc::Receiver<SupervisorCommand>,
    reports: mpsc::UnboundedSender<SupervisorReport>,
    cancel: CancellationToken,

    desired: bool,
    child: Option<Child>,
    started_at: Option<Instant>,
    failures: u32,
    restart_at: Option<Instant>,
    stable_at: Option<Instant>,
    gave_up: bool,
}

impl Supervisor {
    /// Start the supervisor task
    ///
    /// The player is not started until the first `request_running()`.
    /// Cancelling `cancel` stops the player gracefully and ends the task.
    pub fn spawn(
        command: PlayerCommand,
        policy: SupervisorPolicy,
        reports: mpsc::UnboundedSender<SupervisorReport>,
        cancel: CancellationToken,
    ) -> (SupervisorHandle, JoinHandle<()>) {
        let (handle, commands) = SupervisorHandle::channel(8);
        let supervisor = Self {
            command,
            policy,
            commands,
            reports,
            cancel,
            desired: false,
            child: None,
            started_at: None,
            failures: 0,
            restart_at: None,
            stable_at: None,
            gave_up: false,
        };
        let task = tokio::spawn(supervisor.run());
        (handle, task)
    }

    async fn run(mut self) {
        info!("Player supervisor started: {}", self.command);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!("Supervisor shutdown requested");
                    break;
                }

                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("All supervisor handles dropped");
                        break;
                    }
                },

                status = wait_child(&mut self.child) => self.on_exit(status),

                _ = sleep_until_opt(self.restart_at) => {
                    self.restart_at = None;
                    info!("Restarting player (attempt {})", self.failures + 1);
                    self.spawn_player();
                }

                _ = sleep_until_opt(self.stable_at) => self.on_stable(),
            }
        }

        self.desired = false;
        self.restart_at = None;
        self.stop_player().await;
        info!("Player supervisor stopped");
    }

    async fn handle_command(&mut self, command: SupervisorCommand) {
        match command {
            SupervisorCommand::RequestRunning { reply } => {
                if !self.desired || self.gave_up {
                    // A fresh request is an explicit resume: start counting anew
                    self.failures = 0;
                    self.gave_up = false;
                    self.restart_at = None;
                }
                self.desired = true;

                if self.child.is_some() {
                    debug!("Player already running");
                } else if self.restart_at.is_some() {
                    debug!("Player restart already scheduled");
                } else {
                    self.spawn_player();
                }
                let _ = reply.send(Ok(()));
            }
            SupervisorCommand::RequestStopped { reply } => {
                self.desired = false;
                if self.restart_at.take().is_some() {
                    info!("Cancelled pending player restart");
                }
                self.stop_player().await;
                let _ = reply.send(Ok(()));
            }
            SupervisorCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn snapshot(&self) -> SupervisorSnapshot {
        SupervisorSnapshot {
            desired_running: self.desired,
            pid: self.child.as_ref().and_then(|c| c.id()),
            failures: self.failures,
            restart_pending: self.restart_at.is_some(),
            gave_up: self.gave_up,
        }
    }

    fn spawn_player(&mut self) {
        match self.command.spawn() {
            Ok(child) => {
                let pid = child.id().unwrap_or_default();
                let now = Instant::now();
                info!("Player started (pid {})", pid);
                self.child = Some(child);
                self.started_at = Some(now);
                self.stable_at = Some(now + self.policy.stable_after);
                self.report(SupervisorReport::Spawned { pid });
            }
            Err(e) => {
                error!("Failed to start player: {}", e);
                self.report(SupervisorReport::SpawnFailed {
                    error: e.to_string(),
                });
                self.record_failure();
            }
        }
    }

    fn on_exit(&mut self, status: std::io::Result<ExitStatus>) {
        use std::os::unix::process::ExitStatusExt;

        self.child = None;
        self.stable_at = None;
        let uptime = self.started_at.take().map(|t| t.elapsed()).unwrap_or_default();

        let status = match status {
            Ok(status) => status,
            Err(e) => {
                error!("Failed to wait for player: {}", e);
                if self.desired {
                    self.record_failure();
                }
                return;
            }
        };

        if !self.desired {
            debug!("Player exited while not desired: {}", describe_exit(&status));
            return;
        }

        warn!(
            "Player exited unexpectedly after {} ms: {}",
            uptime.as_millis(),
            describe_exit(&status)
        );
        self.report(SupervisorReport::Exited {
            code: status.code(),
            signal: status.signal(),
        });

        if uptime >= self.policy.stable_after && self.failures > 0 {
            info!("Player had been stable, resetting failure counter");
            self.failures = 0;
        }
        self.record_failure();
    }

    fn on_stable(&mut self) {
        self.stable_at = None;
        if self.failures > 0 {
            info!(
                "Player stable for {} ms, resetting failure counter (was {})",
                self.policy.stable_after.as_millis(),
                self.failures
            );
            self.failures = 0;
            self.report(SupervisorReport::Stable);
        }
    }

    fn record_failure(&mut self) {
        self.failures += 1;

        if self.failures >= self.policy.max_failures {
            error!(
                "Player failed {} times in a row, giving up until resumed",
                self.failures
            );
            self.gave_up = true;
            self.restart_at = None;
            self.report(SupervisorReport::GaveUp {
                failures: self.failures,
            });
            return;
        }

        let delay = self.policy.backoff.delay(self.failures);
        warn!(
            "Will restart player in {} ms (failure {}/{})",
            delay.as_millis(),
            self.failures,
            self.policy.max_failures
        );
        self.restart_at = Some(Instant::now() + delay);
        self.report(SupervisorReport::RestartScheduled {
            attempt: self.failures,
            delay,
        });
    }

    async fn stop_player(&mut self) {
        self.stable_at = None;
        self.started_at = None;
        let Some(mut child) = self.child.take() else {
            return;
        };

        info!("Stopping player...");
        match terminate(&mut child, self.policy.grace_period).await {
            Ok(status) => info!("Player stopped: {}", describe_exit(&status)),
            Err(e) => error!("Error while stopping player: {}", e),
        }
    }

    fn report(&self, report: SupervisorReport) {
        // A closed report channel only means nobody is listening anymore
        let _ = self.reports.send(report);
    }
}

async fn wait_child(child: &mut Option<Child>) -> std::io::Result<ExitStatus> {
    match child {
        Some(child) => child.wait().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

//! Shared test helpers for soundmaker-ap integration tests

#![allow(dead_code)]

use soundmaker_ap::arbiter::{Arbiter, ArbiterHandle, ArbiterSettings, ArbiterStatus, MachineTimings};
use soundmaker_ap::probe::ReceiverProbe;
use soundmaker_ap::publisher::StatePublisher;
use soundmaker_ap::supervisor::{SupervisorCommand, SupervisorHandle, SupervisorReport, SupervisorSnapshot};
use soundmaker_ap::Error;
use soundmaker_common::{AirPlayEvent, EventKind};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Player action observed by the fake supervisor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Start,
    Stop,
}

/// Behaviour knobs for [`FakeSupervisor`]
#[derive(Debug, Clone, Copy, Default)]
pub struct FakeBehavior {
    /// Number of leading start requests answered with an error
    pub fail_starts: usize,
    /// Never answer stop requests; the player stays desired
    pub hang_stops: bool,
    /// Apply stop requests but never answer them
    pub late_stops: bool,
}

/// Stands in for the supervisor task: records requests, acknowledges them
pub struct FakeSupervisor {
    pub handle: SupervisorHandle,
    calls: Arc<Mutex<Vec<Call>>>,
    task: JoinHandle<()>,
}

impl FakeSupervisor {
    pub fn spawn() -> Self {
        Self::with_behavior(FakeBehavior::default())
    }

    pub fn with_behavior(behavior: FakeBehavior) -> Self {
        let (handle, mut commands) = SupervisorHandle::channel(8);
        let calls = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&calls);

        let task = tokio::spawn(async move {
            let mut fail_starts = behavior.fail_starts;
            let mut desired = false;
            let mut held: Vec<oneshot::Sender<soundmaker_ap::Result<()>>> = Vec::new();

            while let Some(command) = commands.recv().await {
                match command {
                    SupervisorCommand::RequestRunning { reply } => {
                        log.lock().unwrap().push(Call::Start);
                        if fail_starts > 0 {
                            fail_starts -= 1;
                            let _ = reply.send(Err(Error::Supervisor("injected start failure".into())));
                        } else {
                            desired = true;
                            let _ = reply.send(Ok(()));
                        }
                    }
                    SupervisorCommand::RequestStopped { reply } => {
                        log.lock().unwrap().push(Call::Stop);
                        if behavior.hang_stops {
                            held.push(reply);
                        } else if behavior.late_stops {
                            desired = false;
                            held.push(reply);
                        } else {
                            desired = false;
                            let _ = reply.send(Ok(()));
                        }
                    }
                    SupervisorCommand::Snapshot { reply } => {
                        let _ = reply.send(SupervisorSnapshot {
                            desired_running: desired,
                            ..Default::default()
                        });
                    }
                }
            }
        });

        Self { handle, calls, task }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn starts(&self) -> usize {
        self.calls().iter().filter(|c| **c == Call::Start).count()
    }

    pub fn stops(&self) -> usize {
        self.calls().iter().filter(|c| **c == Call::Stop).count()
    }
}

impl Drop for FakeSupervisor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub const SETTLE_WINDOW: Duration = Duration::from_millis(1000);
pub const IDLE_RETRY: Duration = Duration::from_millis(3000);
pub const TRANSITION_TIMEOUT: Duration = Duration::from_secs(10);

/// An arbiter wired to a fake supervisor and a temp state file
pub struct ArbiterRig {
    pub dir: TempDir,
    pub state_path: PathBuf,
    pub events: mpsc::Sender<AirPlayEvent>,
    pub reports: mpsc::UnboundedSender<SupervisorReport>,
    pub arbiter: ArbiterHandle,
    pub status: watch::Receiver<ArbiterStatus>,
    pub cancel: CancellationToken,
    pub task: JoinHandle<()>,
    pub fake: FakeSupervisor,
}

impl ArbiterRig {
    pub fn start(fake: FakeSupervisor) -> Self {
        let dir = TempDir::new().unwrap();
        let state_path = dir.path().join("soundmaker_state");
        let (events, event_rx) = mpsc::channel(16);
        let (reports, report_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let settings = ArbiterSettings {
            timings: MachineTimings {
                settle_window: SETTLE_WINDOW,
                idle_retry: IDLE_RETRY,
            },
            transition_timeout: TRANSITION_TIMEOUT,
        };

        let (arbiter, task) = Arbiter::spawn(
            settings,
            fake.handle.clone(),
            ReceiverProbe::disabled(),
            StatePublisher::new(&state_path),
            event_rx,
            report_rx,
            cancel.clone(),
        );
        let status = arbiter.subscribe();

        Self {
            dir,
            state_path,
            events,
            reports,
            arbiter,
            status,
            cancel,
            task,
            fake,
        }
    }

    pub async fn send(&self, kind: EventKind) {
        self.events.send(AirPlayEvent::new(kind)).await.unwrap();
    }

    /// Wait until the status satisfies `f`
    pub async fn wait_for(&mut self, f: impl FnMut(&ArbiterStatus) -> bool) -> ArbiterStatus {
        *self.status.wait_for(f).await.unwrap()
    }

    pub fn published(&self) -> String {
        std::fs::read_to_string(&self.state_path).unwrap()
    }

    /// Cancel the arbiter and wait for it to finish
    pub async fn shutdown(&mut self) {
        self.cancel.cancel();
        (&mut self.task).await.unwrap();
    }
}

/// Let every ready task run without moving the (paused) clock
pub async fn quiesce() {
    for _ in 0..100 {
        tokio::task::yield_now().await;
    }
}

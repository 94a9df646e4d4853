//! Supervisor tests against real child processes
//!
//! Backoff delays are scaled down to milliseconds so restart storms play out
//! quickly; the policy logic is the same as in production.

use soundmaker_ap::supervisor::{
    send_signal, BackoffPolicy, PlayerCommand, Supervisor, SupervisorHandle, SupervisorPolicy,
    SupervisorReport,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Rig {
    handle: SupervisorHandle,
    reports: mpsc::UnboundedReceiver<SupervisorReport>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Rig {
    fn start(command: PlayerCommand, policy: SupervisorPolicy) -> Self {
        let (tx, reports) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let (handle, task) = Supervisor::spawn(command, policy, tx, cancel.clone());
        Self {
            handle,
            reports,
            cancel,
            task,
        }
    }

    async fn next_report(&mut self) -> SupervisorReport {
        tokio::time::timeout(Duration::from_secs(5), self.reports.recv())
            .await
            .expect("timed out waiting for a supervisor report")
            .expect("report channel closed")
    }

    /// Skip reports until one matches
    async fn wait_report(&mut self, mut f: impl FnMut(&SupervisorReport) -> bool) -> SupervisorReport {
        loop {
            let report = self.next_report().await;
            if f(&report) {
                return report;
            }
        }
    }

    /// Drain reports that arrive within `window`
    async fn drain_for(&mut self, window: Duration) -> Vec<SupervisorReport> {
        let mut seen = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(report)) = tokio::time::timeout_at(deadline, self.reports.recv()).await {
            seen.push(report);
        }
        seen
    }

    async fn stop(self) {
        self.cancel.cancel();
        self.task.await.unwrap();
    }
}

fn policy(max_failures: u32, stable_after: Duration) -> SupervisorPolicy {
    SupervisorPolicy {
        grace_period: Duration::from_millis(500),
        backoff: BackoffPolicy::new(Duration::from_millis(50), Duration::from_millis(400), 2.0),
        max_failures,
        stable_after,
    }
}

fn sleeper() -> PlayerCommand {
    PlayerCommand::new("sleep").arg("30")
}

fn failing() -> PlayerCommand {
    PlayerCommand::new("sh").args(["-c", "exit 1"])
}

#[tokio::test]
async fn test_repeated_kills_back_off_then_give_up() {
    let mut rig = Rig::start(sleeper(), policy(5, Duration::from_secs(30)));
    rig.handle.request_running().await.unwrap();

    let mut delays = Vec::new();
    let mut spawns = 0;
    let failures = loop {
        let SupervisorReport::Spawned { pid } =
            rig.wait_report(|r| matches!(r, SupervisorReport::Spawned { .. })).await
        else {
            unreachable!()
        };
        spawns += 1;
        send_signal(pid, libc::SIGKILL).unwrap();

        match rig
            .wait_report(|r| {
                matches!(r, SupervisorReport::RestartScheduled { .. } | SupervisorReport::GaveUp { .. })
            })
            .await
        {
            SupervisorReport::RestartScheduled { delay, .. } => delays.push(delay),
            SupervisorReport::GaveUp { failures } => break failures,
            _ => unreachable!(),
        }
    };

    assert_eq!(spawns, 5);
    assert_eq!(failures, 5);
    assert!(
        delays.windows(2).all(|w| w[0] <= w[1]),
        "delays must not decrease: {:?}",
        delays
    );
    assert_eq!(delays.last(), Some(&Duration::from_millis(400)));

    // No sixth attempt
    let late = rig.drain_for(Duration::from_millis(1000)).await;
    assert!(
        !late.iter().any(|r| matches!(r, SupervisorReport::Spawned { .. })),
        "unexpected restart after giving up: {:?}",
        late
    );
    let snapshot = rig.handle.snapshot().await.unwrap();
    assert!(snapshot.gave_up);
    assert_eq!(snapshot.pid, None);
    assert!(!snapshot.restart_pending);

    rig.stop().await;
}

#[tokio::test]
async fn test_error_exits_hit_ceiling() {
    let mut rig = Rig::start(failing(), policy(3, Duration::from_secs(30)));
    rig.handle.request_running().await.unwrap();

    let report = rig.wait_report(|r| matches!(r, SupervisorReport::GaveUp { .. })).await;
    assert_eq!(report, SupervisorReport::GaveUp { failures: 3 });

    let late = rig.drain_for(Duration::from_millis(600)).await;
    assert!(late.is_empty(), "reports after giving up: {:?}", late);

    rig.stop().await;
}

#[tokio::test]
async fn test_exit_reports_code() {
    let mut rig = Rig::start(
        PlayerCommand::new("sh").args(["-c", "exit 2"]),
        policy(2, Duration::from_secs(30)),
    );
    rig.handle.request_running().await.unwrap();

    let report = rig.wait_report(|r| matches!(r, SupervisorReport::Exited { .. })).await;
    assert_eq!(
        report,
        SupervisorReport::Exited {
            code: Some(2),
            signal: None
        }
    );

    rig.stop().await;
}

#[tokio::test]
async fn test_explicit_resume_resets_failure_count() {
    let mut rig = Rig::start(failing(), policy(3, Duration::from_secs(30)));
    rig.handle.request_running().await.unwrap();
    rig.wait_report(|r| matches!(r, SupervisorReport::GaveUp { .. })).await;

    rig.handle.request_running().await.unwrap();

    // Counting starts over: the next failure schedules attempt 1 instead of giving up
    let report = rig
        .wait_report(|r| {
            matches!(r, SupervisorReport::RestartScheduled { .. } | SupervisorReport::GaveUp { .. })
        })
        .await;
    assert!(
        matches!(report, SupervisorReport::RestartScheduled { attempt: 1, .. }),
        "got {:?}",
        report
    );

    rig.stop().await;
}

#[tokio::test]
async fn test_stop_cancels_pending_restart() {
    let slow_backoff = SupervisorPolicy {
        backoff: BackoffPolicy::new(Duration::from_millis(500), Duration::from_secs(1), 2.0),
        ..policy(5, Duration::from_secs(30))
    };
    let mut rig = Rig::start(failing(), slow_backoff);
    rig.handle.request_running().await.unwrap();
    rig.wait_report(|r| matches!(r, SupervisorReport::RestartScheduled { .. })).await;

    rig.handle.request_stopped().await.unwrap();
    let snapshot = rig.handle.snapshot().await.unwrap();
    assert!(!snapshot.restart_pending);
    assert!(!snapshot.desired_running);

    let late = rig.drain_for(Duration::from_millis(1000)).await;
    assert!(
        !late.iter().any(|r| matches!(r, SupervisorReport::Spawned { .. })),
        "restart fired after stop: {:?}",
        late
    );

    rig.stop().await;
}

#[tokio::test]
async fn test_sustained_uptime_resets_counter() {
    let mut rig = Rig::start(sleeper(), policy(5, Duration::from_millis(300)));
    rig.handle.request_running().await.unwrap();

    let SupervisorReport::Spawned { pid } =
        rig.wait_report(|r| matches!(r, SupervisorReport::Spawned { .. })).await
    else {
        unreachable!()
    };
    send_signal(pid, libc::SIGKILL).unwrap();
    let report = rig.wait_report(|r| matches!(r, SupervisorReport::RestartScheduled { .. })).await;
    assert!(matches!(report, SupervisorReport::RestartScheduled { attempt: 1, .. }));

    // Restarted player survives past stable_after
    let SupervisorReport::Spawned { pid } =
        rig.wait_report(|r| matches!(r, SupervisorReport::Spawned { .. })).await
    else {
        unreachable!()
    };
    rig.wait_report(|r| matches!(r, SupervisorReport::Stable)).await;
    assert_eq!(rig.handle.snapshot().await.unwrap().failures, 0);

    send_signal(pid, libc::SIGKILL).unwrap();
    let report = rig.wait_report(|r| matches!(r, SupervisorReport::RestartScheduled { .. })).await;
    assert!(
        matches!(report, SupervisorReport::RestartScheduled { attempt: 1, .. }),
        "got {:?}",
        report
    );

    rig.stop().await;
}

#[tokio::test]
async fn test_spawn_failures_count_toward_ceiling() {
    let mut rig = Rig::start(
        PlayerCommand::new("/nonexistent/soundmaker-player"),
        policy(2, Duration::from_secs(30)),
    );
    rig.handle.request_running().await.unwrap();

    assert!(matches!(rig.next_report().await, SupervisorReport::SpawnFailed { .. }));
    assert!(matches!(
        rig.next_report().await,
        SupervisorReport::RestartScheduled { attempt: 1, .. }
    ));
    assert!(matches!(rig.next_report().await, SupervisorReport::SpawnFailed { .. }));
    assert_eq!(rig.next_report().await, SupervisorReport::GaveUp { failures: 2 });

    rig.stop().await;
}

#[tokio::test]
async fn test_stop_waits_for_exit() {
    let mut rig = Rig::start(sleeper(), policy(3, Duration::from_secs(30)));
    rig.handle.request_running().await.unwrap();
    let SupervisorReport::Spawned { pid } = rig.next_report().await else {
        panic!("expected Spawned")
    };

    rig.handle.request_stopped().await.unwrap();

    assert!(send_signal(pid, 0).is_err(), "player must be gone once stop is acknowledged");
    assert!(rig.drain_for(Duration::from_millis(200)).await.is_empty());

    rig.stop().await;
}

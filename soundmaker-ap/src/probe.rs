//! AirPlay receiver liveness probe
//!
//! Point-in-time check that the receiver service is active, used to flag
//! events that may be stale (e.g. a disconnect written just before the
//! receiver service restarted). The result is diagnostic only; transitions
//! never wait on it.

use std::fmt;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Outcome of one probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverStatus {
    Active,
    Inactive,
    /// Probe disabled, timed out or could not run
    Unknown,
}

impl fmt::Display for ReceiverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReceiverStatus::Active => write!(f, "active"),
            ReceiverStatus::Inactive => write!(f, "inactive"),
            ReceiverStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Runs a status command whose exit code tells whether the receiver is up
#[derive(Debug, Clone, PartialEq)]
pub struct ReceiverProbe {
    program: Option<String>,
    args: Vec<String>,
    timeout: Duration,
}

impl ReceiverProbe {
    /// `systemctl is-active --quiet <service>`
    pub fn systemd(service: &str, timeout: Duration) -> Self {
        Self::command(
            "systemctl",
            ["is-active", "--quiet", service].map(String::from),
            timeout,
        )
    }

    /// Arbitrary status command: exit 0 means active
    pub fn command(
        program: impl Into<String>,
        args: impl IntoIterator<Item = String>,
        timeout: Duration,
    ) -> Self {
        Self {
            program: Some(program.into()),
            args: args.into_iter().collect(),
            timeout,
        }
    }

    /// Probe that always reports `Unknown` without running anything
    pub fn disabled() -> Self {
        Self {
            program: None,
            args: Vec::new(),
            timeout: Duration::ZERO,
        }
    }

    /// Probe a systemd unit, or nothing when `service` is empty
    pub fn from_service(service: &str, timeout: Duration) -> Self {
        if service.trim().is_empty() {
            Self::disabled()
        } else {
            Self::systemd(service.trim(), timeout)
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.program.is_some()
    }

    pub async fn check(&self) -> ReceiverStatus {
        let Some(program) = &self.program else {
            return ReceiverStatus::Unknown;
        };

        let status = Command::new(program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status();

        match tokio::time::timeout(self.timeout, status).await {
            Ok(Ok(status)) if status.success() => ReceiverStatus::Active,
            Ok(Ok(_)) => ReceiverStatus::Inactive,
            Ok(Err(e)) => {
                debug!("Receiver probe '{}' failed to run: {}", program, e);
                ReceiverStatus::Unknown
            }
            Err(_) => {
                debug!("Receiver probe '{}' timed out", program);
                ReceiverStatus::Unknown
            }
        }
    }

    /// Probe in the background and log how it relates to `context`
    ///
    /// `expect_active` is whether the event being handled implies the
    /// receiver should be running.
    pub fn spawn_diagnostic(&self, context: &'static str, expect_active: bool) {
        if !self.is_enabled() {
            return;
        }
        let probe = self.clone();
        tokio::spawn(async move {
            match probe.check().await {
                ReceiverStatus::Inactive if expect_active => {
                    warn!("Receiver service is not active during {}; event may be stale", context)
                }
                ReceiverStatus::Active if !expect_active => {
                    info!("Receiver service still active during {}", context)
                }
                status => debug!("Receiver service {} during {}", status, context),
            }
        });
    }
}

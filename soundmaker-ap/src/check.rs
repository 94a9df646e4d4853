//! Installation self-check (`--check`)
//!
//! Verifies the pieces the engine depends on without starting it:
//! 1. The player binary runs (`<player> --version`)
//! 2. The stream URL answers and delivers data

use crate::error::{Error, Result};
use soundmaker_common::config::StreamConfig;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Bound on each individual check
pub const CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of one self-check step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckReport {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

/// Run every check and collect the reports
pub async fn run_checks(stream: &StreamConfig) -> Vec<CheckReport> {
    let player = match check_player(&stream.player).await {
        Ok(version) => CheckReport {
            name: "player",
            passed: true,
            detail: version,
        },
        Err(e) => CheckReport {
            name: "player",
            passed: false,
            detail: e.to_string(),
        },
    };

    let stream_report = match check_stream(&stream.url, CHECK_TIMEOUT).await {
        Ok(bytes) => CheckReport {
            name: "stream",
            passed: true,
            detail: format!("{} answered with {} bytes", stream.url, bytes),
        },
        Err(e) => CheckReport {
            name: "stream",
            passed: false,
            detail: e.to_string(),
        },
    };

    vec![player, stream_report]
}

/// Run `<player> --version` and return the first line of its output
pub async fn check_player(player: &str) -> Result<String> {
    debug!("Checking player: {} --version", player);
    let output = Command::new(player)
        .arg("--version")
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(CHECK_TIMEOUT, output)
        .await
        .map_err(|_| Error::Timeout(format!("{} --version", player)))?
        .map_err(|source| Error::Spawn {
            program: player.to_string(),
            source,
        })?;

    if !output.status.success() {
        return Err(Error::Check(format!(
            "{} --version exited with {}",
            player, output.status
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let version = stdout.lines().next().unwrap_or_default().trim().to_string();
    info!("Player OK: {}", version);
    Ok(version)
}

/// Fetch the stream and return the size of its first non-empty chunk
pub async fn check_stream(url: &str, timeout: Duration) -> Result<usize> {
    debug!("Checking stream: {}", url);
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Check(format!("HTTP client: {}", e)))?;

    let mut response = client
        .get(url)
        .send()
        .await
        .map_err(|e| Error::Check(format!("{}: {}", url, e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::Check(format!("{} returned HTTP {}", url, status)));
    }

    loop {
        match response.chunk().await {
            Ok(Some(chunk)) if chunk.is_empty() => continue,
            Ok(Some(chunk)) => {
                info!("Stream OK: {} (HTTP {})", url, status);
                return Ok(chunk.len());
            }
            Ok(None) => return Err(Error::Check(format!("{} returned no data", url))),
            Err(e) => return Err(Error::Check(format!("{}: {}", url, e))),
        }
    }
}

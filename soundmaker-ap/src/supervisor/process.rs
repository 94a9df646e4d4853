//! Player process invocation and termination

use crate::error::{Error, Result};
use soundmaker_common::config::StreamConfig;
use std::fmt;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Everything needed to (re)spawn the player
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerCommand {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl PlayerCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Audio-only mpv invocation against the PulseAudio server
    pub fn mpv(stream: &StreamConfig) -> Self {
        Self::new(stream.player.clone())
            .args([
                "--no-video".to_string(),
                "--really-quiet".to_string(),
                format!("--audio-device={}", stream.audio_device),
                "--cache=yes".to_string(),
                format!("--volume={}", stream.volume),
                stream.url.clone(),
            ])
            .working_dir(stream.working_dir.clone())
            .env("XDG_RUNTIME_DIR", stream.runtime_dir.to_string_lossy())
    }

    /// Spawn the process
    ///
    /// stdin/stdout are discarded and stderr is forwarded to debug logs. The
    /// child is killed if its handle is dropped, so it cannot outlive the
    /// supervisor.
    pub fn spawn(&self) -> Result<Child> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| Error::Spawn {
            program: self.program.clone(),
            source,
        })?;

        if let Some(stderr) = child.stderr.take() {
            let program = self.program.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let line = line.trim();
                    if !line.is_empty() {
                        debug!("{}: {}", program, line);
                    }
                }
            });
        }

        Ok(child)
    }
}

impl fmt::Display for PlayerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Send a signal to a process by pid
pub fn send_signal(pid: u32, signal: libc::c_int) -> std::io::Result<()> {
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// SIGTERM, wait up to `grace`, then SIGKILL
pub async fn terminate(child: &mut Child, grace: Duration) -> std::io::Result<ExitStatus> {
    if let Some(pid) = child.id() {
        if let Err(e) = send_signal(pid, libc::SIGTERM) {
            debug!("SIGTERM to pid {} failed: {}", pid, e);
        }
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(
                "Player did not exit within {} ms of SIGTERM, killing",
                grace.as_millis()
            );
            child.start_kill()?;
            child.wait().await
        }
    }
}

/// Human-readable meaning of the player's exit code
pub fn describe_exit(status: &ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(0), _) => "exited normally".to_string(),
        (Some(1), _) => "general error (code 1)".to_string(),
        (Some(2), _) => "file/stream error (code 2)".to_string(),
        (Some(code), _) => format!("unexpected exit code {}", code),
        (None, Some(signal)) => format!("killed by signal {}", signal),
        (None, None) => "exited with unknown status".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mpv_arguments() {
        let stream = StreamConfig {
            url: "http://radio.example/live".to_string(),
            volume: 70,
            ..StreamConfig::default()
        };
        let command = PlayerCommand::mpv(&stream);

        assert_eq!(command.program, "mpv");
        assert_eq!(
            command.args,
            vec![
                "--no-video",
                "--really-quiet",
                "--audio-device=pulse",
                "--cache=yes",
                "--volume=70",
                "http://radio.example/live",
            ]
        );
        assert_eq!(command.working_dir, Some(PathBuf::from("/")));
        assert_eq!(
            command.env,
            vec![("XDG_RUNTIME_DIR".to_string(), "/run/user/1000".to_string())]
        );
    }

    #[test]
    fn test_display_joins_arguments() {
        let command = PlayerCommand::new("sleep").arg("30");
        assert_eq!(command.to_string(), "sleep 30");
    }

    #[tokio::test]
    async fn test_spawn_missing_program_is_spawn_error() {
        let err = PlayerCommand::new("/nonexistent/soundmaker-player").spawn().unwrap_err();
        assert!(matches!(err, Error::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_terminate_stops_cooperative_process() {
        let mut child = PlayerCommand::new("sleep").arg("30").spawn().unwrap();
        let status = terminate(&mut child, Duration::from_secs(5)).await.unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_terminate_kills_process_ignoring_sigterm() {
        let mut child = PlayerCommand::new("sh")
            .args(["-c", "trap '' TERM; exec sleep 30"])
            .spawn()
            .unwrap();
        // Give the shell time to install the trap before signalling
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = std::time::Instant::now();
        let status = terminate(&mut child, Duration::from_millis(300)).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(300));
        assert_eq!(describe_exit(&status), "killed by signal 9");
    }

    #[tokio::test]
    async fn test_describe_exit_codes() {
        let mut child = PlayerCommand::new("sh").args(["-c", "exit 2"]).spawn().unwrap();
        let status = child.wait().await.unwrap();
        assert_eq!(describe_exit(&status), "file/stream error (code 2)");
    }
}

//! Event pipe reader task
//!
//! Turns newline-delimited tokens written into the pipe by the AirPlay hook
//! into [`AirPlayEvent`]s on a bounded channel.
//!
//! **Fault handling:** read errors, EOF and replacement of the pipe file all
//! lead to close → short pause → recreate if missing → reopen. Nothing here
//! ends the task except shutdown or the arbiter going away.
//!
//! **Backpressure:** when the channel is full the newest event is held back.
//! A later event of the same kind replaces it (logged), an event of the other
//! kind waits until the held one has been delivered, so ordering between
//! connects and disconnects is never changed.

use super::fifo::{ensure_fifo, FifoIdentity};
use crate::error::{Error, Result};
use soundmaker_common::{AirPlayEvent, EventKind};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::unix::pipe;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Longest line accepted as a token
pub const MAX_LINE_LEN: usize = 64;

/// Reader configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderSettings {
    pub pipe_path: PathBuf,
    /// Pause between closing a faulted pipe and reopening it
    pub reopen_delay: Duration,
    /// Interval for checking the pipe file was not deleted or replaced
    pub identity_check: Duration,
}

impl ReaderSettings {
    pub fn new(pipe_path: impl Into<PathBuf>) -> Self {
        Self {
            pipe_path: pipe_path.into(),
            reopen_delay: Duration::from_millis(250),
            identity_check: Duration::from_secs(1),
        }
    }
}

/// Classification of one line read from the pipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    Event(EventKind),
    Empty,
    Unknown(String),
    Oversize(usize),
}

/// Classify a raw line (with or without its trailing newline)
pub fn parse_line(raw: &[u8]) -> LineOutcome {
    if raw.len() > MAX_LINE_LEN + 1 {
        return LineOutcome::Oversize(raw.len());
    }
    let text = String::from_utf8_lossy(raw);
    let token = text.trim();
    if token.is_empty() {
        return LineOutcome::Empty;
    }
    match EventKind::parse_token(token) {
        Some(kind) => LineOutcome::Event(kind),
        None => LineOutcome::Unknown(token.to_string()),
    }
}

/// Splits pipe bytes into lines, holding at most one token's worth
///
/// Bytes past the line limit are dropped until the next newline, so a writer
/// that never sends one cannot grow the buffer.
#[derive(Debug, Default)]
struct LineSplitter {
    buf: Vec<u8>,
    /// Bytes dropped from the current line
    discarded: usize,
}

impl LineSplitter {
    /// Room for a token plus a trailing `\r`
    const LIMIT: usize = MAX_LINE_LEN + 1;

    fn push(&mut self, bytes: &[u8]) -> Vec<LineOutcome> {
        let mut lines = Vec::new();
        for chunk in bytes.split_inclusive(|b| *b == b'\n') {
            let (body, complete) = match chunk.split_last() {
                Some((&b'\n', body)) => (body, true),
                _ => (chunk, false),
            };

            let room = Self::LIMIT - self.buf.len();
            if body.len() > room {
                if self.discarded == 0 {
                    warn!(
                        "Pipe line exceeds {} bytes, discarding until newline",
                        MAX_LINE_LEN
                    );
                }
                self.buf.extend_from_slice(&body[..room]);
                self.discarded += body.len() - room;
            } else {
                self.buf.extend_from_slice(body);
            }

            if complete {
                let line = if self.discarded > 0 {
                    LineOutcome::Oversize(self.buf.len() + self.discarded)
                } else {
                    parse_line(&self.buf)
                };
                self.buf.clear();
                self.discarded = 0;
                lines.push(line);
            }
        }
        lines
    }
}

enum ReadOutcome {
    Shutdown,
    Reopen(String),
}

/// Single reader of the event pipe
pub struct EventReader {
    settings: ReaderSettings,
    tx: mpsc::Sender<AirPlayEvent>,
    cancel: CancellationToken,
    pending: Option<AirPlayEvent>,
}

impl EventReader {
    pub fn new(
        settings: ReaderSettings,
        tx: mpsc::Sender<AirPlayEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            settings,
            tx,
            cancel,
            pending: None,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Read until shutdown, reopening the pipe after every fault
    pub async fn run(mut self) {
        info!("Listening for AirPlay events on {}", self.settings.pipe_path.display());

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            match self.open() {
                Ok((receiver, identity)) => {
                    debug!("Opened event pipe for reading");
                    match self.read_until_fault(receiver, identity).await {
                        ReadOutcome::Shutdown => break,
                        ReadOutcome::Reopen(reason) => {
                            warn!("Event pipe closed ({}), reopening", reason);
                        }
                    }
                }
                Err(e) => warn!("Failed to open event pipe: {}", e),
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.settings.reopen_delay) => {}
            }
        }

        if let Some(event) = self.pending.take() {
            debug!("Discarding undelivered '{}' event at shutdown", event.kind);
        }
        info!("Event pipe reader stopped");
    }

    fn open(&self) -> Result<(pipe::Receiver, FifoIdentity)> {
        let path = &self.settings.pipe_path;
        let identity = ensure_fifo(path)?;

        let mut options = pipe::OpenOptions::new();
        // Holding a write side ourselves means "no writers" never reads as EOF
        #[cfg(target_os = "linux")]
        options.read_write(true);

        let receiver = options.open_receiver(path).map_err(|source| Error::Channel {
            path: path.clone(),
            source,
        })?;
        Ok((receiver, identity))
    }

    async fn read_until_fault(
        &mut self,
        mut receiver: pipe::Receiver,
        identity: FifoIdentity,
    ) -> ReadOutcome {
        // A read cancelled by another branch has consumed nothing
        let mut lines = LineSplitter::default();
        let mut chunk = [0u8; 512];
        let mut identity_check = tokio::time::interval(self.settings.identity_check);
        identity_check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return ReadOutcome::Shutdown,

                permit = reserve_if(self.tx.clone(), self.pending.is_some()) => match permit {
                    Ok(permit) => {
                        if let Some(event) = self.pending.take() {
                            debug!("Delivered held '{}' event", event.kind);
                            permit.send(event);
                        }
                    }
                    Err(_) => return ReadOutcome::Shutdown,
                },

                read = receiver.read(&mut chunk) => match read {
                    Ok(0) => return ReadOutcome::Reopen("all writers closed".to_string()),
                    Ok(n) => {
                        for line in lines.push(&chunk[..n]) {
                            if !self.handle_line(line).await {
                                return ReadOutcome::Shutdown;
                            }
                        }
                    }
                    Err(e) => return ReadOutcome::Reopen(e.to_string()),
                },

                _ = identity_check.tick() => {
                    if FifoIdentity::of(&self.settings.pipe_path) != Some(identity) {
                        return ReadOutcome::Reopen("pipe was removed or replaced".to_string());
                    }
                }
            }
        }
    }

    /// Returns false once the arbiter is gone
    async fn handle_line(&mut self, line: LineOutcome) -> bool {
        match line {
            LineOutcome::Event(kind) => {
                info!("AirPlay event received: {}", kind);
                self.deliver(AirPlayEvent::new(kind)).await
            }
            LineOutcome::Empty => true,
            LineOutcome::Unknown(token) => {
                warn!("Unknown event received: {:?}", token);
                true
            }
            LineOutcome::Oversize(len) => {
                debug!("Discarded oversize pipe line ({} bytes)", len);
                true
            }
        }
    }

    async fn deliver(&mut self, event: AirPlayEvent) -> bool {
        if let Some(held) = self.pending.take() {
            if held.kind == event.kind {
                warn!("Arbiter busy, coalescing repeated '{}' event", event.kind);
                self.pending = Some(event);
                return true;
            }

            // Direction changed: the held event must go first
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                sent = self.tx.send(held) => {
                    if sent.is_err() {
                        return false;
                    }
                }
            }
        }

        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                debug!("Event queue full, holding '{}' event", event.kind);
                self.pending = Some(event);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

async fn reserve_if(
    tx: mpsc::Sender<AirPlayEvent>,
    wanted: bool,
) -> std::result::Result<mpsc::OwnedPermit<AirPlayEvent>, mpsc::error::SendError<()>> {
    if wanted {
        tx.reserve_owned().await
    } else {
        std::future::pending().await
    }
}

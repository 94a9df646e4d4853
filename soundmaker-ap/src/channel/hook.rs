//! Writer side of the event pipe, used by the `soundmaker-hook` binary
//!
//! The hook runs inside the AirPlay receiver's session callbacks, so it must
//! never block and never fail just because the engine is not listening.

use soundmaker_common::EventKind;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

/// What happened to one hook write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    Delivered,
    /// The pipe exists but nobody has it open for reading
    NoReader,
    /// The reader is not keeping up and the pipe buffer is full
    PipeFull,
    PipeMissing,
}

/// Write `kind`'s token to the pipe at `path` without blocking
///
/// Token and newline go out in one `write`, well below `PIPE_BUF`, so
/// concurrent hook invocations never interleave.
pub fn send_event(path: &Path, kind: EventKind) -> io::Result<HookOutcome> {
    let mut pipe = match OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
    {
        Ok(pipe) => pipe,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(HookOutcome::PipeMissing),
        Err(e) if e.raw_os_error() == Some(libc::ENXIO) => return Ok(HookOutcome::NoReader),
        Err(e) => return Err(e),
    };

    let line = format!("{}\n", kind.as_token());
    match pipe.write(line.as_bytes()) {
        Ok(n) if n == line.len() => Ok(HookOutcome::Delivered),
        Ok(n) => Err(io::Error::new(
            io::ErrorKind::WriteZero,
            format!("short write to event pipe ({} of {} bytes)", n, line.len()),
        )),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(HookOutcome::PipeFull),
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(HookOutcome::NoReader),
        Err(e) => Err(e),
    }
}

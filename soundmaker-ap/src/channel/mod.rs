//! AirPlay event channel
//!
//! The shairport-sync hook writes `connect` / `disconnect` lines into a named
//! pipe; this module owns the read end.
//!
//! - `fifo`: creating the pipe with permissions an unprivileged writer can use
//! - `reader`: the reader task feeding the arbiter
//! - `hook`: the non-blocking writer used by `soundmaker-hook`

mod fifo;
mod hook;
mod reader;

pub use fifo::{ensure_fifo, FifoIdentity, FIFO_MODE};
pub use hook::{send_event, HookOutcome};
pub use reader::{parse_line, EventReader, LineOutcome, ReaderSettings, MAX_LINE_LEN};

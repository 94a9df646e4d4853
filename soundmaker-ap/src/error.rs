//! Error types for soundmaker-ap
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for soundmaker-ap
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors from the shared library
    #[error(transparent)]
    Common(#[from] soundmaker_common::Error),

    /// Event pipe could not be created or opened
    #[error("Event channel error at {path}: {source}")]
    Channel {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Player process could not be spawned
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Supervisor task is gone or did not answer
    #[error("Supervisor error: {0}")]
    Supervisor(String),

    /// State file could not be written
    #[error("Failed to publish state to {path}: {source}")]
    Publish {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An operation exceeded its time bound
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Stream or player self-check failed
    #[error("Check failed: {0}")]
    Check(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using soundmaker-ap Error
pub type Result<T> = std::result::Result<T, Error>;

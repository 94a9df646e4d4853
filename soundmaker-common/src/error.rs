//! Common error types for SoundMaker

use thiserror::Error;

/// Common result type for SoundMaker operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the engine and helper binaries
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unrecognized state tag or event token
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

//! # SoundMaker Common Library
//!
//! Shared code for the SoundMaker engine and its helper binaries:
//! - Audio source state and its publication tags
//! - AirPlay event tokens exchanged over the event pipe
//! - TOML bootstrap configuration and config file resolution
//! - Common error types

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
pub use events::{AirPlayEvent, AudioState, EventKind};

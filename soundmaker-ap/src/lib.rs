//! # SoundMaker Audio Arbiter Library (soundmaker-ap)
//!
//! Keeps exactly one audio source on the shared output: the internet radio
//! player by default, preempted by the AirPlay receiver while a device is
//! connected.
//!
//! **Architecture:** one reactor task owns the source state machine. The event
//! pipe reader and the player supervisor run as separate tasks and talk to the
//! reactor only through bounded channels.

pub mod arbiter;
pub mod channel;
pub mod check;
pub mod config;
pub mod engine;
pub mod error;
pub mod probe;
pub mod publisher;
pub mod supervisor;

pub use engine::{Engine, EngineHandle};
pub use error::{Error, Result};

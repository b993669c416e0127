//! Playback core for the tube player daemon.
//!
//! Everything in this crate is deterministic: the coordinator drives an
//! abstract [`engine::PlaybackEngine`] and never performs I/O itself.  The
//! daemon crate supplies the mpv-backed engine and the network metadata source.

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod model;
pub mod platform;
pub mod playlist;
pub mod progress;
pub mod protocol;
pub mod state;
pub mod url;

pub use error::{PlayerError, Result};

//! The narrow contract between the coordinator and the external playback engine.

use crate::error::Result;

/// Status notifications pushed by the engine adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// Engine finished starting and accepts commands.
    Ready,
    Playing,
    Paused,
    Buffering,
    /// The current track played to its end.
    Ended,
    /// A track requested with `cue` is prepared and ready to start.
    Cued,
}

/// Commands and queries the coordinator issues to the engine.
///
/// Commands must not block: adapters queue them for delivery in order.
/// Queries return [`crate::PlayerError::EngineUnavailable`] while the engine
/// cannot answer (still starting, no media loaded); callers treat that as
/// "not yet known", never as fatal.
pub trait PlaybackEngine {
    /// Prepare a track without starting playback.  The engine answers with
    /// [`EngineEvent::Cued`] once it is ready.
    fn cue(&mut self, track_id: &str) -> Result<()>;
    fn play(&mut self) -> Result<()>;
    fn pause(&mut self) -> Result<()>;
    fn seek(&mut self, seconds: f64) -> Result<()>;
    fn current_time(&self) -> Result<f64>;
    fn duration(&self) -> Result<f64>;
}

use thiserror::Error;

/// Failure kinds surfaced by the playback core.
///
/// None of these is fatal: the coordinator always lands in a well-defined
/// state and records a status message before returning one.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PlayerError {
    /// A transport operation was attempted while its state guard failed.
    #[error("{op} rejected: {reason}")]
    GuardRejected { op: &'static str, reason: String },

    /// Malformed user input (bad URL, empty text, unknown state tag).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Playlist index outside `0..len`.
    #[error("index {index} out of range (playlist has {len} tracks)")]
    OutOfRange { index: usize, len: usize },

    /// The engine could not answer a query right now; try again later.
    #[error("engine unavailable: {0}")]
    EngineUnavailable(String),

    /// Engine start-up exhausted its readiness budget.
    #[error("engine did not become ready after {attempts} attempts")]
    EngineInitTimeout { attempts: u32 },

    /// Metadata source could not be reached or returned garbage.
    #[error("metadata fetch failed: {0}")]
    FetchFailed(String),
}

impl PlayerError {
    pub fn guard(op: &'static str, reason: impl Into<String>) -> Self {
        Self::GuardRejected {
            op,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PlayerError>;

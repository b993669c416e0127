//! The three independent state dimensions of the player and their guards.
//!
//! Engine readiness, track load status and transport status each move on
//! different external triggers, so they live in separate fields rather than
//! in one cross-product enum.  Every setter notifies any subscribed
//! observer.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::PlayerError;

/// Readiness of the external playback engine.
///
/// Transitions:
///   Uninitialized -> Initializing -> Ready
///   any -> Error (terminal)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineState {
    #[default]
    Uninitialized,
    Initializing,
    Ready,
    Error,
}

/// Load status of the currently selected track.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackState {
    #[default]
    NoTrack,
    Loading,
    Loaded,
    Error,
}

/// Transport status of the loaded track.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
    Buffering,
    Ended,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Uninitialized => "UNINITIALIZED",
            EngineState::Initializing => "INITIALIZING",
            EngineState::Ready => "READY",
            EngineState::Error => "ERROR",
        }
    }

    /// Forward-only ordering; `Error` is reachable from anywhere and never left.
    pub fn can_transition_to(&self, next: EngineState) -> bool {
        match (self, next) {
            (EngineState::Error, _) => false,
            (_, EngineState::Error) => true,
            (from, to) => to >= *from,
        }
    }
}

impl TrackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackState::NoTrack => "NO_TRACK",
            TrackState::Loading => "LOADING",
            TrackState::Loaded => "LOADED",
            TrackState::Error => "ERROR",
        }
    }
}

impl PlaybackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Stopped => "STOPPED",
            PlaybackState::Playing => "PLAYING",
            PlaybackState::Paused => "PAUSED",
            PlaybackState::Buffering => "BUFFERING",
            PlaybackState::Ended => "ENDED",
        }
    }

    /// `Playing` and `Paused` are only legal on a ready engine with a loaded track.
    fn needs_loaded_track(&self) -> bool {
        matches!(self, PlaybackState::Playing | PlaybackState::Paused)
    }
}

macro_rules! impl_state_text {
    ($ty:ty, $label:literal, [$($variant:path),+ $(,)?]) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = PlayerError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim();
                [$($variant),+]
                    .into_iter()
                    .find(|v| v.as_str().eq_ignore_ascii_case(wanted))
                    .ok_or_else(|| {
                        PlayerError::InvalidInput(format!("unknown {} state '{}'", $label, s))
                    })
            }
        }
    };
}

impl_state_text!(
    EngineState,
    "engine",
    [
        EngineState::Uninitialized,
        EngineState::Initializing,
        EngineState::Ready,
        EngineState::Error,
    ]
);
impl_state_text!(
    TrackState,
    "track",
    [
        TrackState::NoTrack,
        TrackState::Loading,
        TrackState::Loaded,
        TrackState::Error,
    ]
);
impl_state_text!(
    PlaybackState,
    "playback",
    [
        PlaybackState::Stopped,
        PlaybackState::Playing,
        PlaybackState::Paused,
        PlaybackState::Buffering,
        PlaybackState::Ended,
    ]
);

/// Emitted to observers on every setter call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateChange {
    Engine { from: EngineState, to: EngineState },
    Track { from: TrackState, to: TrackState },
    Playback { from: PlaybackState, to: PlaybackState },
}

/// Holder of the three state dimensions.
#[derive(Debug, Default)]
pub struct StateMachine {
    engine: EngineState,
    track: TrackState,
    playback: PlaybackState,
    notifier: Option<broadcast::Sender<StateChange>>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an observer channel; every accepted transition is sent on it.
    pub fn with_notifier(mut self, notifier: broadcast::Sender<StateChange>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn engine(&self) -> EngineState {
        self.engine
    }

    pub fn track(&self) -> TrackState {
        self.track
    }

    pub fn playback(&self) -> PlaybackState {
        self.playback
    }

    /// Move the engine dimension.  Refuses backward moves and leaving `Error`.
    pub fn transition_engine(&mut self, to: EngineState) -> bool {
        let from = self.engine;
        if from != to && !from.can_transition_to(to) {
            warn!("Engine state {} -> {} refused", from, to);
            return false;
        }
        if from != to {
            info!("Engine state: {} -> {}", from, to);
        }
        self.engine = to;
        self.notify(StateChange::Engine { from, to });
        self.settle_playback();
        true
    }

    pub fn transition_track(&mut self, to: TrackState) -> bool {
        let from = self.track;
        if from != to {
            info!("Track state: {} -> {}", from, to);
        }
        self.track = to;
        self.notify(StateChange::Track { from, to });
        self.settle_playback();
        true
    }

    /// Move the transport dimension.  `Playing`/`Paused` are refused unless
    /// the engine is ready and a track is loaded.
    pub fn transition_playback(&mut self, to: PlaybackState) -> bool {
        let from = self.playback;
        if to.needs_loaded_track() && !self.engine_and_track_ready() {
            warn!(
                "Playback state {} -> {} refused (engine={}, track={})",
                from, to, self.engine, self.track
            );
            return false;
        }
        if from != to {
            debug!("Playback state: {} -> {}", from, to);
        }
        self.playback = to;
        self.notify(StateChange::Playback { from, to });
        true
    }

    pub fn can_play(&self) -> bool {
        self.engine_and_track_ready() && self.playback != PlaybackState::Playing
    }

    pub fn can_pause(&self) -> bool {
        self.engine_and_track_ready() && self.playback == PlaybackState::Playing
    }

    pub fn can_load_track(&self) -> bool {
        self.engine == EngineState::Ready
    }

    /// Seeking needs a loaded track on a ready engine; transport status is irrelevant.
    pub fn can_seek(&self) -> bool {
        self.engine_and_track_ready()
    }

    /// Human-readable reason the play guard fails, for status display.
    pub fn play_rejection(&self) -> String {
        if self.engine != EngineState::Ready {
            format!("engine is {}", self.engine)
        } else if self.track != TrackState::Loaded {
            format!("track is {}", self.track)
        } else {
            "already playing".to_string()
        }
    }

    pub fn pause_rejection(&self) -> String {
        if self.engine != EngineState::Ready {
            format!("engine is {}", self.engine)
        } else if self.track != TrackState::Loaded {
            format!("track is {}", self.track)
        } else {
            format!("playback is {}", self.playback)
        }
    }

    fn engine_and_track_ready(&self) -> bool {
        self.engine == EngineState::Ready && self.track == TrackState::Loaded
    }

    /// Keep the invariant after an engine/track move: a transport status
    /// that requires a loaded track falls back to `Stopped`.
    fn settle_playback(&mut self) {
        if self.playback.needs_loaded_track() && !self.engine_and_track_ready() {
            let from = self.playback;
            self.playback = PlaybackState::Stopped;
            debug!("Playback state: {} -> STOPPED (invariant)", from);
            self.notify(StateChange::Playback {
                from,
                to: PlaybackState::Stopped,
            });
        }
    }

    fn notify(&self, change: StateChange) {
        if let Some(tx) = &self.notifier {
            // No subscribers is fine.
            let _ = tx.send(change);
        }
    }
}

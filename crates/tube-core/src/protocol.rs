use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;
use crate::model::Track;
use crate::progress::ProgressView;
use crate::state::{EngineState, PlaybackState, TrackState};

/// Current protocol version.  Bump this when the wire format changes in a
/// breaking way.  Clients check it on connect.
pub const PROTOCOL_VERSION: u32 = 1;

/// User intents sent from a client to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "cmd")]
pub enum Command {
    /// Add a video or a whole playlist from URL text.
    LoadUrl { url: String },
    Select { index: usize },
    Remove { index: usize },
    TogglePlay,
    Play,
    Pause,
    Stop,
    Next,
    Prev,
    /// Seek to a share of the track duration; clamped to `[0, 1]`.
    SeekFraction { fraction: f64 },
    Clear,
    CacheStats,
    CacheClear,
    GetState,
}

/// Messages pushed from the daemon to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "broadcast")]
pub enum Broadcast {
    /// Sent immediately on connect: protocol version + full snapshot.
    Hello {
        protocol_version: u32,
        state: PlayerSnapshot,
    },
    State {
        data: PlayerSnapshot,
    },
    CacheStats {
        data: CacheStats,
    },
    Log {
        message: String,
    },
    Error {
        message: String,
    },
}

/// Everything a renderer needs, pulled after each change.
/// `rev` increases on every state change so clients can drop stale copies.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PlayerSnapshot {
    #[serde(default)]
    pub rev: u64,
    pub tracks: Vec<Track>,
    /// Index of the selected track; `0` and meaningless when `tracks` is empty.
    pub cursor: usize,
    pub engine_state: EngineState,
    pub track_state: TrackState,
    pub playback_state: PlaybackState,
    pub status: String,
    pub progress: ProgressView,
    /// Near-end preparation signal already given for the current track.
    #[serde(default)]
    pub preloaded: bool,
}

impl PlayerSnapshot {
    pub fn current_track(&self) -> Option<&Track> {
        self.tracks.get(self.cursor)
    }
}

/// Largest frame body a peer may announce.  Anything bigger cannot be a
/// legitimate message and the stream cannot be resynchronised after it.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Wrapper for socket communication
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Command(Command),
    Broadcast(Broadcast),
}

impl Message {
    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        let json = serde_json::to_vec(self)?;
        let len = json.len() as u32;
        let mut result = Vec::with_capacity(4 + json.len());
        result.extend_from_slice(&len.to_be_bytes());
        result.extend_from_slice(&json);
        Ok(result)
    }

    /// Total length (header included) of the frame at the front of `data`,
    /// or `None` while it is still incomplete.  Fails when the header
    /// announces more than `MAX_FRAME_LEN`.
    pub fn frame_len(data: &[u8]) -> anyhow::Result<Option<usize>> {
        if data.len() < 4 {
            return Ok(None);
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if len > MAX_FRAME_LEN {
            anyhow::bail!("Frame of {} bytes exceeds limit of {}", len, MAX_FRAME_LEN);
        }
        Ok((data.len() >= 4 + len).then_some(4 + len))
    }

    pub fn decode(data: &[u8]) -> anyhow::Result<(Self, usize)> {
        if data.len() < 4 {
            anyhow::bail!("Insufficient data for length header");
        }
        let len = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
        if data.len() < 4 + len {
            anyhow::bail!("Insufficient data for message");
        }
        let msg: Self = serde_json::from_slice(&data[4..4 + len])?;
        Ok((msg, 4 + len))
    }
}

use serde::{Deserialize, Serialize};

/// Thumbnail URL template used when the metadata source gives us nothing.
/// `{id}` is replaced with the video identifier.
pub const DEFAULT_THUMBNAIL_PATTERN: &str = "https://img.youtube.com/vi/{id}/mqdefault.jpg";

/// Where a track entered the playlist from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Added from a single-video URL.
    #[default]
    Video,
    /// Imported as part of a remote playlist.
    Playlist,
}

/// One playable item.  Immutable once built; two tracks are the same track
/// when their engine identifiers match, whatever the display fields say.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    /// Engine identifier (a YouTube video id).
    pub id: String,
    pub name: String,
    pub artist: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub source: SourceKind,
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Track {}

impl Track {
    pub fn new(id: impl Into<String>, name: impl Into<String>, artist: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            artist: artist.into(),
            thumbnail: None,
            source: SourceKind::Video,
        }
    }

    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }

    pub fn with_source(mut self, source: SourceKind) -> Self {
        self.source = source;
        self
    }

    /// Build a track from item metadata.
    pub fn from_info(id: &str, info: VideoInfo, source: SourceKind) -> Self {
        Self {
            id: id.to_string(),
            name: info.title,
            artist: info.author,
            thumbnail: Some(info.thumbnail),
            source,
        }
    }

    /// Build a playlist entry from its feed descriptor, preferring item
    /// metadata when the lookup succeeded.
    pub fn from_descriptor(raw: &RawVideo, info: Option<VideoInfo>, thumbnail_pattern: &str) -> Self {
        let info = info.unwrap_or_else(|| {
            let mut fallback = VideoInfo::fallback(&raw.video_id, thumbnail_pattern);
            if !raw.title.is_empty() {
                fallback.title = raw.title.clone();
            }
            fallback
        });
        Self::from_info(&raw.video_id, info, SourceKind::Playlist)
    }
}

/// A raw entry of a remote playlist, as returned by the metadata source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawVideo {
    pub video_id: String,
    pub title: String,
}

/// Per-item metadata returned by the metadata source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VideoInfo {
    pub title: String,
    pub author: String,
    pub thumbnail: String,
}

impl VideoInfo {
    /// Minimal descriptor used when the item lookup failed.
    pub fn fallback(video_id: &str, thumbnail_pattern: &str) -> Self {
        Self {
            title: "Unknown".to_string(),
            author: "YouTube".to_string(),
            thumbnail: thumbnail_url(video_id, thumbnail_pattern),
        }
    }
}

pub fn thumbnail_url(video_id: &str, pattern: &str) -> String {
    pattern.replace("{id}", video_id)
}

//! Pull video / playlist identifiers out of free-form URL text.

use regex::Regex;

use crate::error::{PlayerError, Result};

const VIDEO_PATTERNS: &[&str] = &[
    r"(?:youtube\.com/watch\?v=|youtu\.be/|youtube\.com/embed/)([^&\n?#]+)",
    r"youtube\.com/watch\?.*v=([^&\n?#]+)",
];

const PLAYLIST_PATTERNS: &[&str] = &[
    r"[?&]list=([^&\n?#]+)",
    r"youtube\.com/playlist\?list=([^&\n?#]+)",
];

/// What a pasted URL asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadRequest {
    Video(String),
    Playlist(String),
}

fn first_capture(patterns: &[&str], text: &str) -> Option<String> {
    patterns.iter().find_map(|pattern| {
        let re = Regex::new(pattern).ok()?;
        let caps = re.captures(text)?;
        caps.get(1).map(|m| m.as_str().to_string())
    })
}

/// Single-video identifier, if the text matches a known video URL shape.
pub fn extract_video_id(url: &str) -> Option<String> {
    first_capture(VIDEO_PATTERNS, url)
}

/// Playlist identifier from a `list=` query parameter.
pub fn extract_playlist_id(url: &str) -> Option<String> {
    first_capture(PLAYLIST_PATTERNS, url)
}

/// Classify user text: anything mentioning `list=` is a playlist request,
/// everything else must be a single video.
pub fn parse_load_request(text: &str) -> Result<LoadRequest> {
    let url = text.trim();
    if url.is_empty() {
        return Err(PlayerError::InvalidInput(
            "Please enter a YouTube URL".to_string(),
        ));
    }

    if url.contains("list=") {
        extract_playlist_id(url)
            .map(LoadRequest::Playlist)
            .ok_or_else(|| PlayerError::InvalidInput("Invalid YouTube playlist URL".to_string()))
    } else {
        extract_video_id(url)
            .map(LoadRequest::Video)
            .ok_or_else(|| PlayerError::InvalidInput("Invalid YouTube URL".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn video_ids_from_common_shapes() {
        let cases = [
            ("https://www.youtube.com/watch?v=dQw4w9WgXcQ", "dQw4w9WgXcQ"),
            ("https://youtu.be/dQw4w9WgXcQ?t=42", "dQw4w9WgXcQ"),
            ("https://www.youtube.com/embed/dQw4w9WgXcQ", "dQw4w9WgXcQ"),
            (
                "https://www.youtube.com/watch?feature=share&v=dQw4w9WgXcQ#t=1",
                "dQw4w9WgXcQ",
            ),
        ];
        for (url, id) in cases {
            assert_eq!(extract_video_id(url).as_deref(), Some(id), "{url}");
        }
    }

    #[test]
    fn playlist_ids() {
        assert_eq!(
            extract_playlist_id("https://www.youtube.com/playlist?list=PLK6xDuf0xV-dznU").as_deref(),
            Some("PLK6xDuf0xV-dznU")
        );
        assert_eq!(
            extract_playlist_id("https://www.youtube.com/watch?v=abc&list=PL123&index=2").as_deref(),
            Some("PL123")
        );
    }

    #[test]
    fn no_match_is_none() {
        assert_eq!(extract_video_id("https://example.com/video"), None);
        assert_eq!(extract_playlist_id("https://www.youtube.com/watch?v=abc"), None);
    }

    #[test]
    fn load_request_classification() {
        assert_eq!(
            parse_load_request("  https://youtu.be/xyz  ").unwrap(),
            LoadRequest::Video("xyz".to_string())
        );
        assert_eq!(
            parse_load_request("https://www.youtube.com/watch?v=a&list=PL9").unwrap(),
            LoadRequest::Playlist("PL9".to_string())
        );
        assert!(matches!(
            parse_load_request("   "),
            Err(PlayerError::InvalidInput(msg)) if msg == "Please enter a YouTube URL"
        ));
        assert!(matches!(
            parse_load_request("not a url"),
            Err(PlayerError::InvalidInput(msg)) if msg == "Invalid YouTube URL"
        ));
    }
}

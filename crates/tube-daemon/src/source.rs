//! YouTube metadata source: oEmbed for single items, the public Atom feed
//! for playlists.

use std::time::Duration;

use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Deserialize;
use tracing::{debug, warn};
use tube_core::config::MetadataConfig;
use tube_core::model::{thumbnail_url, RawVideo, VideoInfo};
use tube_core::{PlayerError, Result};

const USER_AGENT: &str = concat!("tubed/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Deserialize)]
struct OEmbed {
    title: Option<String>,
    author_name: Option<String>,
    thumbnail_url: Option<String>,
}

pub struct YouTubeSource {
    client: reqwest::Client,
    config: MetadataConfig,
}

impl YouTubeSource {
    pub fn new(config: MetadataConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self { client, config })
    }

    pub fn thumbnail_pattern(&self) -> &str {
        &self.config.thumbnail_pattern
    }

    pub async fn video_info(&self, video_id: &str) -> Result<VideoInfo> {
        let watch = format!("https://www.youtube.com/watch?v={}", video_id);
        let response = self
            .client
            .get(&self.config.oembed_endpoint)
            .query(&[("url", watch.as_str()), ("format", "json")])
            .send()
            .await
            .map_err(fetch_failed)?;
        if !response.status().is_success() {
            return Err(PlayerError::FetchFailed(format!(
                "oEmbed HTTP {} for {}",
                response.status(),
                video_id
            )));
        }
        let oembed: OEmbed = response.json().await.map_err(fetch_failed)?;
        Ok(VideoInfo {
            title: oembed.title.unwrap_or_else(|| "YouTube Video".to_string()),
            author: oembed.author_name.unwrap_or_else(|| "YouTube".to_string()),
            thumbnail: oembed
                .thumbnail_url
                .unwrap_or_else(|| thumbnail_url(video_id, &self.config.thumbnail_pattern)),
        })
    }

    /// Item metadata, or the synthesized minimum when the lookup fails.
    pub async fn video_info_or_fallback(&self, video_id: &str) -> VideoInfo {
        match self.video_info(video_id).await {
            Ok(info) => info,
            Err(e) => {
                warn!("Video info for {} unavailable: {}", video_id, e);
                VideoInfo::fallback(video_id, &self.config.thumbnail_pattern)
            }
        }
    }

    pub async fn playlist_videos(&self, playlist_id: &str) -> Result<Vec<RawVideo>> {
        let url = self.config.feed_url(playlist_id);
        debug!("Fetching playlist feed {}", url);
        let response = self.client.get(&url).send().await.map_err(fetch_failed)?;
        if !response.status().is_success() {
            return Err(PlayerError::FetchFailed(format!(
                "feed HTTP {} for {}",
                response.status(),
                playlist_id
            )));
        }
        let body = response.text().await.map_err(fetch_failed)?;
        parse_feed(&body, self.config.playlist_limit).map_err(fetch_failed)
    }
}

fn fetch_failed(e: impl std::fmt::Display) -> PlayerError {
    PlayerError::FetchFailed(e.to_string())
}

#[derive(Clone, Copy, PartialEq)]
enum Field {
    VideoId,
    Title,
}

/// Pull `(yt:videoId, title)` pairs out of a playlist Atom feed.  Entries
/// missing either field are skipped; at most `limit` are returned.
pub fn parse_feed(xml: &str, limit: usize) -> anyhow::Result<Vec<RawVideo>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut videos = Vec::new();
    let mut in_entry = false;
    let mut field: Option<Field> = None;
    let mut video_id: Option<String> = None;
    let mut title: Option<String> = None;

    loop {
        match reader.read_event()? {
            Event::Start(ref e) => match e.name().as_ref() {
                b"entry" => {
                    in_entry = true;
                    video_id = None;
                    title = None;
                }
                b"yt:videoId" if in_entry => field = Some(Field::VideoId),
                b"title" if in_entry => field = Some(Field::Title),
                _ => {}
            },
            Event::Text(ref e) => {
                if let Some(f) = field {
                    let text = e.unescape()?.trim().to_string();
                    match f {
                        Field::VideoId => video_id = Some(text),
                        Field::Title => title = Some(text),
                    }
                }
            }
            Event::End(ref e) => {
                if e.name().as_ref() == b"entry" {
                    in_entry = false;
                    if let (Some(id), Some(t)) = (video_id.take(), title.take()) {
                        if !id.is_empty() && !t.is_empty() {
                            videos.push(RawVideo {
                                video_id: id,
                                title: t,
                            });
                            if videos.len() >= limit {
                                break;
                            }
                        }
                    }
                }
                field = None;
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(videos)
}

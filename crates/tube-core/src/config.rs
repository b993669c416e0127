use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::model::DEFAULT_THUMBNAIL_PATTERN;
use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub metadata: MetadataConfig,
}

/// Control socket for `tubectl` and other clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_socket_port")]
    pub socket_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Interval between readiness probes while mpv starts.
    #[serde(default = "default_init_poll_interval_ms")]
    pub init_poll_interval_ms: u64,
    /// Probes before giving up and moving the engine to `ERROR`.
    #[serde(default = "default_init_max_attempts")]
    pub init_max_attempts: u32,
    /// Delay before retrying a load attempted while the engine was not ready.
    #[serde(default = "default_load_retry_backoff_ms")]
    pub load_retry_backoff_ms: u64,
    #[serde(default = "default_ipc_timeout_ms")]
    pub ipc_timeout_ms: u64,
    /// Skip a bundled mpv beside the executable and use `PATH` only.
    #[serde(default)]
    pub use_system_mpv: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Remaining seconds at which the next track is prepared.
    #[serde(default = "default_preload_threshold_secs")]
    pub preload_threshold_secs: f64,
    /// Loaded once when the engine first becomes ready.
    #[serde(default)]
    pub default_playlist_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    #[serde(default = "default_oembed_endpoint")]
    pub oembed_endpoint: String,
    /// Playlist feed; `{id}` is replaced by the playlist id.
    #[serde(default = "default_feed_endpoint")]
    pub feed_endpoint: String,
    #[serde(default = "default_thumbnail_pattern")]
    pub thumbnail_pattern: String,
    #[serde(default = "default_playlist_limit")]
    pub playlist_limit: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            socket_port: default_socket_port(),
        }
    }
}

impl DaemonConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind_address, self.socket_port)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_bind_address(),
            port: default_http_port(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            init_poll_interval_ms: default_init_poll_interval_ms(),
            init_max_attempts: default_init_max_attempts(),
            load_retry_backoff_ms: default_load_retry_backoff_ms(),
            ipc_timeout_ms: default_ipc_timeout_ms(),
            use_system_mpv: false,
        }
    }
}

impl EngineConfig {
    pub fn init_poll_interval(&self) -> Duration {
        Duration::from_millis(self.init_poll_interval_ms)
    }

    pub fn load_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.load_retry_backoff_ms)
    }

    pub fn ipc_timeout(&self) -> Duration {
        Duration::from_millis(self.ipc_timeout_ms)
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            preload_threshold_secs: default_preload_threshold_secs(),
            default_playlist_url: None,
        }
    }
}

impl PlaybackConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

impl Default for MetadataConfig {
    fn default() -> Self {
        Self {
            oembed_endpoint: default_oembed_endpoint(),
            feed_endpoint: default_feed_endpoint(),
            thumbnail_pattern: default_thumbnail_pattern(),
            playlist_limit: default_playlist_limit(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl MetadataConfig {
    pub fn feed_url(&self, playlist_id: &str) -> String {
        self.feed_endpoint.replace("{id}", playlist_id)
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_socket_port() -> u16 {
    9877
}

fn default_http_enabled() -> bool {
    true
}

fn default_http_port() -> u16 {
    8990
}

fn default_init_poll_interval_ms() -> u64 {
    500
}

fn default_init_max_attempts() -> u32 {
    40
}

fn default_load_retry_backoff_ms() -> u64 {
    1000
}

fn default_ipc_timeout_ms() -> u64 {
    5000
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_preload_threshold_secs() -> f64 {
    3.0
}

fn default_oembed_endpoint() -> String {
    "https://www.youtube.com/oembed".to_string()
}

fn default_feed_endpoint() -> String {
    "https://www.youtube.com/feeds/videos.xml?playlist_id={id}".to_string()
}

fn default_thumbnail_pattern() -> String {
    DEFAULT_THUMBNAIL_PATTERN.to_string()
}

fn default_playlist_limit() -> usize {
    50
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Config {
    /// Load from the default location, writing defaults on first run.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.http.enabled);
        assert_eq!(config.http.port, 8990);
        assert_eq!(config.daemon.address(), "127.0.0.1:9877");
        assert_eq!(config.engine.init_max_attempts, 40);
        assert_eq!(config.engine.init_poll_interval(), Duration::from_millis(500));
        assert_eq!(config.playback.preload_threshold_secs, 3.0);
        assert_eq!(config.metadata.playlist_limit, 50);
        assert!(config.playback.default_playlist_url.is_none());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [engine]
            init_max_attempts = 3

            [playback]
            default_playlist_url = "https://www.youtube.com/playlist?list=PLabc"
            "#,
        )
        .unwrap();
        assert_eq!(config.engine.init_max_attempts, 3);
        assert_eq!(config.engine.load_retry_backoff_ms, 1000);
        assert_eq!(config.http.port, 8990);
        assert_eq!(
            config.playback.default_playlist_url.as_deref(),
            Some("https://www.youtube.com/playlist?list=PLabc")
        );
    }

    #[test]
    fn test_first_load_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.daemon.socket_port, 9877);

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.metadata.feed_endpoint, config.metadata.feed_endpoint);
    }

    #[test]
    fn test_feed_url_substitutes_id() {
        let metadata = MetadataConfig::default();
        assert_eq!(
            metadata.feed_url("PL123"),
            "https://www.youtube.com/feeds/videos.xml?playlist_id=PL123"
        );
    }
}

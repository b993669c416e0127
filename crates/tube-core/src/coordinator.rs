//! The playback coordinator: sole owner of the playlist, the state machine
//! and the metadata cache, driving a [`PlaybackEngine`].
//!
//! Everything here runs on one logical thread.  Callers feed it user intents,
//! engine events, ticks and fetch results one at a time; timers are modelled
//! as deadlines the caller polls with [`Coordinator::next_deadline`] and
//! [`Coordinator::run_due`].

use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::cache::{playlist_key, CacheStats, MetadataCache};
use crate::config::Config;
use crate::engine::{EngineEvent, PlaybackEngine};
use crate::error::{PlayerError, Result};
use crate::model::{RawVideo, SourceKind, Track, VideoInfo, DEFAULT_THUMBNAIL_PATTERN};
use crate::playlist::{Direction, MergeReport, Playlist, Removal};
use crate::progress::ProgressView;
use crate::protocol::PlayerSnapshot;
use crate::state::{EngineState, PlaybackState, StateChange, StateMachine, TrackState};
use crate::url::{parse_load_request, LoadRequest};

/// Knobs the coordinator reads; everything else is fixed behaviour.
#[derive(Debug, Clone)]
pub struct Tuning {
    /// Remaining seconds at which the near-end signal fires.
    pub preload_threshold_secs: f64,
    /// Delay before a load deferred during engine start-up is retried.
    pub load_retry_backoff: Duration,
    pub thumbnail_pattern: String,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            preload_threshold_secs: 3.0,
            load_retry_backoff: Duration::from_secs(1),
            thumbnail_pattern: DEFAULT_THUMBNAIL_PATTERN.to_string(),
        }
    }
}

impl From<&Config> for Tuning {
    fn from(config: &Config) -> Self {
        Self {
            preload_threshold_secs: config.playback.preload_threshold_secs,
            load_retry_backoff: config.engine.load_retry_backoff(),
            thumbnail_pattern: config.metadata.thumbnail_pattern.clone(),
        }
    }
}

/// Result of a load request that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The engine was asked to cue the track.
    Issued,
    /// The engine is still starting; the load is retried at the next deadline.
    Deferred,
}

/// What the caller must fetch to finish a load-by-URL request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadPlan {
    /// Look up item metadata, then call [`Coordinator::add_video`].
    Video { video_id: String },
    /// Fetch descriptors (unless `cached` holds fresh ones), then call
    /// [`Coordinator::plan_import`].
    Playlist {
        playlist_id: String,
        cached: Option<Vec<RawVideo>>,
    },
}

/// New descriptors of a playlist that still need item lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistImport {
    pub playlist_id: String,
    pub fresh: Vec<RawVideo>,
    /// Descriptors skipped because their identifier was already present.
    pub duplicates: usize,
}

/// A load parked until the engine finishes starting.
#[derive(Debug, Clone)]
struct DeferredLoad {
    track_id: String,
    due: Instant,
}

pub struct Coordinator<E: PlaybackEngine> {
    engine: E,
    state: StateMachine,
    playlist: Playlist,
    cache: MetadataCache,
    /// One-shot: start playback as soon as the next cue completes.
    auto_play: bool,
    /// Near-end signal already given for the current track.
    preloaded: bool,
    deferred: Option<DeferredLoad>,
    status: String,
    progress: ProgressView,
    tuning: Tuning,
}

impl<E: PlaybackEngine> Coordinator<E> {
    pub fn new(engine: E, tuning: Tuning) -> Self {
        Self {
            engine,
            state: StateMachine::new(),
            playlist: Playlist::new(),
            cache: MetadataCache::new(),
            auto_play: false,
            preloaded: false,
            deferred: None,
            status: String::new(),
            progress: ProgressView::default(),
            tuning,
        }
    }

    /// Forward every state transition to `notifier`.
    pub fn with_observer(mut self, notifier: broadcast::Sender<StateChange>) -> Self {
        self.state = self.state.with_notifier(notifier);
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn state(&self) -> &StateMachine {
        &self.state
    }

    pub fn playlist(&self) -> &Playlist {
        &self.playlist
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn progress(&self) -> &ProgressView {
        &self.progress
    }

    pub fn auto_play(&self) -> bool {
        self.auto_play
    }

    pub fn preloaded(&self) -> bool {
        self.preloaded
    }

    pub fn current_track(&self) -> Option<&Track> {
        self.playlist.current()
    }

    /// Render model for pull-based readers.  `rev` is left for the publisher.
    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            rev: 0,
            tracks: self.playlist.tracks().to_vec(),
            cursor: self.playlist.cursor(),
            engine_state: self.state.engine(),
            track_state: self.state.track(),
            playback_state: self.state.playback(),
            status: self.status.clone(),
            progress: self.progress.clone(),
            preloaded: self.preloaded,
        }
    }

    // ---- engine lifecycle ----

    pub fn engine_initializing(&mut self) {
        if self.state.transition_engine(EngineState::Initializing) {
            self.refresh_status();
        }
    }

    /// Returns `true` on the first transition into `Ready`.
    pub fn engine_ready(&mut self) -> bool {
        let was_ready = self.state.engine() == EngineState::Ready;
        if !self.state.transition_engine(EngineState::Ready) {
            return false;
        }
        self.refresh_status();
        !was_ready
    }

    /// Engine start-up gave up or the engine died.  Pending loads are dropped.
    pub fn engine_failed(&mut self, err: &PlayerError) {
        warn!("Engine failed: {}", err);
        self.state.transition_engine(EngineState::Error);
        self.deferred = None;
        self.auto_play = false;
        self.status = format!("Player error: {}", err);
    }

    pub fn on_engine_event(&mut self, event: EngineEvent) {
        debug!("Engine event: {:?}", event);
        match event {
            EngineEvent::Ready => {
                self.engine_ready();
            }
            EngineEvent::Playing => {
                self.state.transition_playback(PlaybackState::Playing);
                self.refresh_status();
            }
            EngineEvent::Paused => {
                self.state.transition_playback(PlaybackState::Paused);
                self.refresh_status();
            }
            EngineEvent::Buffering => {
                self.state.transition_playback(PlaybackState::Buffering);
                self.refresh_status();
            }
            EngineEvent::Ended => {
                self.state.transition_playback(PlaybackState::Ended);
                self.seamless_next();
            }
            EngineEvent::Cued => {
                if self.state.track() != TrackState::Loading {
                    debug!("Ignoring cue completion with track {}", self.state.track());
                    return;
                }
                self.state.transition_track(TrackState::Loaded);
                self.refresh_status();
                if std::mem::take(&mut self.auto_play) {
                    if let Err(e) = self.play() {
                        warn!("Auto-play failed: {}", e);
                    }
                }
            }
        }
    }

    // ---- deadlines ----

    pub fn next_deadline(&self) -> Option<Instant> {
        self.deferred.as_ref().map(|d| d.due)
    }

    /// Run deferred work due at `now`.  Returns whether anything ran.
    pub fn run_due(&mut self, now: Instant) -> bool {
        let due = matches!(&self.deferred, Some(d) if d.due <= now);
        if !due {
            return false;
        }
        let Some(deferred) = self.deferred.take() else {
            return false;
        };
        let Some(index) = self
            .playlist
            .tracks()
            .iter()
            .position(|t| t.id == deferred.track_id)
        else {
            debug!("Deferred track {} is gone, dropping load", deferred.track_id);
            return true;
        };
        if let Err(e) = self.load_track_at(index, now) {
            debug!("Deferred load of {} failed: {}", deferred.track_id, e);
        }
        true
    }

    // ---- playlist operations ----

    /// Point at `index` and load it, starting playback once cued.
    pub fn select_at(&mut self, index: usize) -> Result<LoadOutcome> {
        self.playlist.select_at(index)?;
        self.auto_play = true;
        self.load_track(index)
    }

    pub fn load_track(&mut self, index: usize) -> Result<LoadOutcome> {
        self.load_track_at(index, Instant::now())
    }

    /// Load-or-defer.  Rejected unless the engine is ready; while the engine
    /// is still initializing the load is parked and retried after the backoff.
    pub fn load_track_at(&mut self, index: usize, now: Instant) -> Result<LoadOutcome> {
        let track = self
            .playlist
            .get(index)
            .cloned()
            .ok_or(PlayerError::OutOfRange {
                index,
                len: self.playlist.len(),
            })?;

        if !self.state.can_load_track() {
            let engine = self.state.engine();
            if engine == EngineState::Initializing {
                info!("Engine initializing, deferring load of {}", track.id);
                self.playlist.select_at(index)?;
                self.deferred = Some(DeferredLoad {
                    track_id: track.id,
                    due: now + self.tuning.load_retry_backoff,
                });
                self.status = "YouTube player initializing...".to_string();
                return Ok(LoadOutcome::Deferred);
            }
            warn!("Cannot load track - engine is {}", engine);
            self.auto_play = false;
            return Err(PlayerError::guard("load", format!("engine is {}", engine)));
        }

        self.playlist.select_at(index)?;
        self.deferred = None;
        self.preloaded = false;
        self.state.transition_track(TrackState::Loading);
        self.state.transition_playback(PlaybackState::Stopped);
        self.progress = ProgressView::pending();

        if let Err(e) = self.engine.cue(&track.id) {
            warn!("Engine refused cue of {}: {}", track.id, e);
            self.state.transition_track(TrackState::Error);
            self.auto_play = false;
            self.status = format!("Error loading track: {}", e);
            return Err(e);
        }

        info!("Loading track {} ({})", track.id, track.name);
        self.status = format!("Loaded: {}", track.name);
        Ok(LoadOutcome::Issued)
    }

    pub fn remove_at(&mut self, index: usize) -> Result<Removal> {
        let was_playing = self.state.playback() == PlaybackState::Playing;
        let removal = self.playlist.remove_at(index)?;

        match removal {
            Removal::Emptied => {
                self.stop();
                self.state.transition_track(TrackState::NoTrack);
                self.deferred = None;
                self.auto_play = false;
                self.preloaded = false;
                self.progress = ProgressView::default();
                self.status = "Playlist is now empty".to_string();
                return Ok(removal);
            }
            Removal::CurrentRemoved { cursor } => {
                if was_playing {
                    self.auto_play = true;
                }
                if let Err(e) = self.load_track(cursor) {
                    debug!("Reload after removal failed: {}", e);
                }
            }
            Removal::Rebased { .. } | Removal::Unchanged => {}
        }

        self.status = format!(
            "Removed track from playlist ({} remaining)",
            self.playlist.len()
        );
        Ok(removal)
    }

    pub fn next(&mut self) -> Result<LoadOutcome> {
        self.step(Direction::Forward)
    }

    pub fn prev(&mut self) -> Result<LoadOutcome> {
        self.step(Direction::Backward)
    }

    fn step(&mut self, direction: Direction) -> Result<LoadOutcome> {
        if self.playlist.is_empty() {
            return Err(PlayerError::guard("skip", "playlist is empty"));
        }
        if self.state.playback() == PlaybackState::Playing {
            self.auto_play = true;
        }
        let cursor = self.playlist.advance(direction).unwrap_or(0);
        self.load_track(cursor)
    }

    /// End-of-track advance: always carries the auto-play intent.
    fn seamless_next(&mut self) {
        if self.playlist.is_empty() {
            self.state.transition_playback(PlaybackState::Stopped);
            return;
        }
        self.auto_play = true;
        let cursor = self.playlist.advance(Direction::Forward).unwrap_or(0);
        if let Err(e) = self.load_track(cursor) {
            warn!("Seamless advance failed: {}", e);
        }
    }

    pub fn clear(&mut self) {
        self.stop();
        self.playlist.clear();
        self.state.transition_track(TrackState::NoTrack);
        self.deferred = None;
        self.auto_play = false;
        self.preloaded = false;
        self.progress = ProgressView::default();
        self.status = "Playlist cleared".to_string();
    }

    // ---- transport ----

    pub fn play(&mut self) -> Result<()> {
        if !self.state.can_play() {
            let reason = self.state.play_rejection();
            debug!("Cannot play - {}", reason);
            return Err(PlayerError::guard("play", reason));
        }
        self.engine.play()?;
        self.state.transition_playback(PlaybackState::Playing);
        self.refresh_status();
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        if !self.state.can_pause() {
            let reason = self.state.pause_rejection();
            debug!("Cannot pause - {}", reason);
            return Err(PlayerError::guard("pause", reason));
        }
        self.engine.pause()?;
        self.state.transition_playback(PlaybackState::Paused);
        self.refresh_status();
        Ok(())
    }

    pub fn toggle_play(&mut self) -> Result<()> {
        if self.playlist.is_empty() {
            self.status = "Please load YouTube videos first".to_string();
            return Err(PlayerError::guard("toggle", "playlist is empty"));
        }
        if self.state.can_pause() {
            self.pause()
        } else {
            self.play()
        }
    }

    /// Pause and rewind.  Engine commands are only sent when a track is loaded.
    pub fn stop(&mut self) {
        if self.state.can_seek() {
            if let Err(e) = self.engine.pause().and_then(|_| self.engine.seek(0.0)) {
                warn!("Engine stop failed: {}", e);
            }
        }
        self.state.transition_playback(PlaybackState::Stopped);
        self.progress.current_secs = self.progress.duration_secs.map(|_| 0.0);
        self.progress.current_text = "0:00".to_string();
        self.progress.fraction = 0.0;
        self.refresh_status();
    }

    /// Seek to `fraction` of the duration.  Returns the target in seconds.
    pub fn seek_fraction(&mut self, fraction: f64) -> Result<f64> {
        let fraction = if fraction.is_nan() {
            0.0
        } else {
            fraction.clamp(0.0, 1.0)
        };
        if !self.state.can_seek() {
            return Err(PlayerError::guard(
                "seek",
                format!("engine is {}, track is {}", self.state.engine(), self.state.track()),
            ));
        }
        let duration = self.engine.duration()?;
        if !(duration.is_finite() && duration > 0.0) {
            return Err(PlayerError::EngineUnavailable(
                "duration not available for seeking".to_string(),
            ));
        }
        let target = fraction * duration;
        self.engine.seek(target)?;
        if let Some(view) = ProgressView::from_times(target, duration) {
            self.progress = view;
        }
        Ok(target)
    }

    /// Periodic progress refresh and near-end detection.
    pub fn tick(&mut self) {
        if self.state.playback() != PlaybackState::Playing {
            return;
        }
        let readings = self
            .engine
            .current_time()
            .and_then(|current| Ok((current, self.engine.duration()?)));
        let (current, duration) = match readings {
            Ok(r) => r,
            Err(e) => {
                debug!("Engine not ready for progress updates: {}", e);
                return;
            }
        };

        match ProgressView::from_times(current, duration) {
            Some(view) => {
                let remaining = view.remaining_secs().unwrap_or(f64::INFINITY);
                self.progress = view;
                if remaining <= self.tuning.preload_threshold_secs && !self.preloaded {
                    self.signal_preload();
                }
            }
            None if duration == 0.0 => self.progress = ProgressView::pending(),
            None => {}
        }
    }

    fn signal_preload(&mut self) {
        if self.playlist.len() <= 1 {
            return;
        }
        self.preloaded = true;
        debug!("Near end of track, next is index {}", (self.playlist.cursor() + 1) % self.playlist.len());
        self.status = "Preparing next track...".to_string();
    }

    // ---- load by URL ----

    /// Validate URL text and decide what must be fetched.
    pub fn begin_load_url(&mut self, text: &str) -> Result<LoadPlan> {
        self.begin_load_url_at(text, Instant::now())
    }

    pub fn begin_load_url_at(&mut self, text: &str, now: Instant) -> Result<LoadPlan> {
        if text.trim().is_empty() {
            return self.reject_input("Please enter a YouTube URL");
        }
        if self.state.engine() != EngineState::Ready {
            self.status = "Player not ready - please wait".to_string();
            return Err(PlayerError::guard(
                "load_url",
                format!("engine is {}", self.state.engine()),
            ));
        }

        let request = match parse_load_request(text) {
            Ok(r) => r,
            Err(e) => {
                if let PlayerError::InvalidInput(msg) = &e {
                    self.status = msg.clone();
                }
                return Err(e);
            }
        };

        match request {
            LoadRequest::Video(video_id) => {
                if self.playlist.contains(&video_id) {
                    return self.reject_input("Video already in playlist");
                }
                self.status = "Loading YouTube video...".to_string();
                Ok(LoadPlan::Video { video_id })
            }
            LoadRequest::Playlist(playlist_id) => {
                let cached = self.cached_playlist_at(&playlist_id, now);
                if cached.is_some() {
                    info!("Using cached playlist data for {}", playlist_id);
                }
                self.status = "Loading YouTube playlist...".to_string();
                Ok(LoadPlan::Playlist {
                    playlist_id,
                    cached,
                })
            }
        }
    }

    fn reject_input<T>(&mut self, message: &str) -> Result<T> {
        self.status = message.to_string();
        Err(PlayerError::InvalidInput(message.to_string()))
    }

    /// Fresh cached descriptors for a playlist.  Sweeps stale entries first.
    pub fn cached_playlist_at(&mut self, playlist_id: &str, now: Instant) -> Option<Vec<RawVideo>> {
        self.cache.sweep_expired_at(now);
        self.cache
            .get_at(&playlist_key(playlist_id), now)
            .map(|videos| videos.to_vec())
    }

    pub fn store_playlist(&mut self, playlist_id: &str, videos: Vec<RawVideo>) {
        self.store_playlist_at(playlist_id, videos, Instant::now());
    }

    pub fn store_playlist_at(&mut self, playlist_id: &str, videos: Vec<RawVideo>, now: Instant) {
        self.cache.put_at(playlist_key(playlist_id), videos, now);
    }

    /// Item metadata for a single-video request arrived.
    pub fn add_video(&mut self, video_id: &str, info: VideoInfo) -> Result<LoadOutcome> {
        let track = Track::from_info(video_id, info, SourceKind::Video);
        let was_empty = self.playlist.is_empty();
        if !self.playlist.insert(track) {
            return self.reject_input("Video already in playlist");
        }
        let outcome = if was_empty {
            self.load_track(0).unwrap_or_else(|e| {
                debug!("Initial load failed: {}", e);
                LoadOutcome::Deferred
            })
        } else {
            LoadOutcome::Issued
        };
        self.status = "YouTube video added to playlist".to_string();
        Ok(outcome)
    }

    /// Drop descriptors already present; `None` when nothing is left to add.
    pub fn plan_import(&mut self, playlist_id: &str, videos: &[RawVideo]) -> Option<PlaylistImport> {
        if videos.is_empty() {
            self.status = "No videos found in playlist".to_string();
            return None;
        }
        let existing = self.playlist.ids();
        let mut seen = std::collections::HashSet::new();
        let fresh: Vec<RawVideo> = videos
            .iter()
            .filter(|v| !existing.contains(&v.video_id) && seen.insert(v.video_id.clone()))
            .cloned()
            .collect();
        if fresh.is_empty() {
            self.status = "Playlist already added - no new videos to load".to_string();
            return None;
        }
        let duplicates = videos.len() - fresh.len();
        if duplicates > 0 {
            self.status = format!(
                "Found {} duplicate videos, adding {} new videos...",
                duplicates,
                fresh.len()
            );
        }
        Some(PlaylistImport {
            playlist_id: playlist_id.to_string(),
            fresh,
            duplicates,
        })
    }

    /// Append the looked-up tracks.  Dedup runs again since the playlist may
    /// have changed while lookups were in flight.
    pub fn merge_import(&mut self, duplicates: usize, tracks: Vec<Track>) -> MergeReport {
        let was_empty = self.playlist.is_empty();
        let report = self.playlist.merge(tracks);
        if report.added > 0 && was_empty {
            if let Err(e) = self.load_track(0) {
                debug!("Initial load failed: {}", e);
            }
        }

        let skipped = duplicates + report.skipped;
        self.status = if report.added == 0 {
            "Playlist already added - no new videos to load".to_string()
        } else if skipped > 0 {
            format!(
                "Found {} duplicate videos, adding {} new videos",
                skipped, report.added
            )
        } else {
            format!("Added {} new videos from playlist", report.added)
        };
        info!(
            "Merged playlist import: {} added, {} skipped",
            report.added, skipped
        );
        report
    }

    /// Descriptor fetch failed.  Serves a fresh cached copy when there is one.
    pub fn playlist_fetch_failed(&mut self, playlist_id: &str, err: &PlayerError) -> Option<Vec<RawVideo>> {
        self.playlist_fetch_failed_at(playlist_id, err, Instant::now())
    }

    pub fn playlist_fetch_failed_at(
        &mut self,
        playlist_id: &str,
        err: &PlayerError,
        now: Instant,
    ) -> Option<Vec<RawVideo>> {
        warn!("Error fetching playlist {}: {}", playlist_id, err);
        let cached = self.cached_playlist_at(playlist_id, now);
        if cached.is_none() {
            self.status = "Unable to load playlist. Please add videos individually.".to_string();
        }
        cached
    }

    pub fn thumbnail_pattern(&self) -> &str {
        &self.tuning.thumbnail_pattern
    }

    // ---- cache diagnostics ----

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn cache_stats_at(&self, now: Instant) -> CacheStats {
        self.cache.stats_at(now)
    }

    pub fn clear_cache(&mut self) {
        self.cache.clear();
        info!("Playlist cache cleared");
    }

    /// Status text implied by the current state triple.
    fn refresh_status(&mut self) {
        let engine = self.state.engine();
        let track = self.state.track();
        let playback = self.state.playback();
        let message = if engine == EngineState::Initializing {
            "Initializing YouTube player..."
        } else if engine == EngineState::Ready && track == TrackState::NoTrack {
            "Ready - Load a YouTube video"
        } else if track == TrackState::Loading {
            "Loading track..."
        } else if track == TrackState::Loaded && playback == PlaybackState::Stopped {
            "Track ready to play"
        } else if playback == PlaybackState::Playing {
            "Playing"
        } else if playback == PlaybackState::Paused {
            "Paused"
        } else {
            return;
        };
        self.status = message.to_string();
    }
}

//! DaemonCore: single-owner event loop for the playback coordinator.
//!
//! Every input (client commands, raw mpv events, engine start-up results,
//! metadata fetch results) arrives as a `DaemonEvent` on one channel and is
//! applied to the coordinator one at a time.  Network fetches and the mpv
//! start-up probe run in spawned tasks and report back through the same
//! channel, so no two mutations ever interleave.
//!
//! After each event the coordinator snapshot is published to the
//! `SnapshotStore`; a changed snapshot is announced with
//! `BroadcastMessage::StateUpdated`.
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use tube_core::cache::CacheStats;
use tube_core::config::Config;
use tube_core::coordinator::{Coordinator, LoadPlan, Tuning};
use tube_core::model::{RawVideo, Track, VideoInfo};
use tube_core::protocol::Command;
use tube_core::state::{EngineState, StateChange, TrackState};
use tube_core::PlayerError;

use crate::engine::{wait_ready, MpvEngine};
use crate::mpv::{MpvDriver, MpvEvent, MpvHandle};
use crate::source::YouTubeSource;
use crate::store::SnapshotStore;
use crate::BroadcastMessage;

/// All inputs into the DaemonCore loop.
pub enum DaemonEvent {
    /// A command from a socket client or the HTTP API.
    ClientCommand(Command),
    /// HTTP asks for cache diagnostics.
    CacheStatsRequest(oneshot::Sender<CacheStats>),
    /// Raw mpv unsolicited event (forwarded from reader task).
    MpvEvent(MpvEvent),
    /// mpv started and answered a probe.
    EngineAttached { driver: MpvDriver, handle: MpvHandle },
    EngineFailed(PlayerError),
    VideoFetched { video_id: String, info: VideoInfo },
    PlaylistFetched {
        playlist_id: String,
        result: Result<Vec<RawVideo>, PlayerError>,
    },
    /// Item lookups for a playlist import finished.
    ImportFetched { duplicates: usize, tracks: Vec<Track> },
    /// Shutdown requested.
    Shutdown,
}

pub struct DaemonCore {
    config: Config,
    coordinator: Coordinator<MpvEngine>,
    driver: Option<MpvDriver>,
    source: Arc<YouTubeSource>,
    store: Arc<SnapshotStore>,
    /// State transitions reported by the coordinator.
    state_rx: broadcast::Receiver<StateChange>,
    event_tx: mpsc::Sender<DaemonEvent>,
    broadcast_tx: broadcast::Sender<BroadcastMessage>,
}

impl DaemonCore {
    pub fn new(
        config: Config,
        broadcast_tx: broadcast::Sender<BroadcastMessage>,
        event_tx: mpsc::Sender<DaemonEvent>,
    ) -> anyhow::Result<Self> {
        let source = Arc::new(YouTubeSource::new(config.metadata.clone())?);
        let (state_tx, state_rx) = broadcast::channel(64);
        let coordinator =
            Coordinator::new(MpvEngine::new(), Tuning::from(&config)).with_observer(state_tx);
        Ok(Self {
            config,
            coordinator,
            driver: None,
            source,
            store: Arc::new(SnapshotStore::new()),
            state_rx,
            event_tx,
            broadcast_tx,
        })
    }

    /// Borrow the snapshot store (for the socket and HTTP servers).
    pub fn store(&self) -> Arc<SnapshotStore> {
        Arc::clone(&self.store)
    }

    /// Run the core event loop.  Returns when a `Shutdown` event is received
    /// or every sender is gone.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<DaemonEvent>) -> anyhow::Result<()> {
        info!("DaemonCore: starting event loop");
        self.start_engine();
        self.publish().await;

        let mut ticker = tokio::time::interval(self.config.playback.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let deadline = self.coordinator.next_deadline().map(Instant::from_std);
            tokio::select! {
                evt = event_rx.recv() => match evt {
                    None => {
                        info!("DaemonCore: event channel closed, shutting down");
                        break;
                    }
                    Some(DaemonEvent::Shutdown) => {
                        info!("DaemonCore: shutdown requested");
                        break;
                    }
                    Some(evt) => self.handle_event(evt),
                },
                _ = ticker.tick() => {
                    self.check_engine_alive();
                    self.coordinator.tick();
                }
                _ = sleep_until(deadline) => {
                    self.coordinator.run_due(std::time::Instant::now());
                }
            }
            self.publish().await;
        }

        self.cleanup().await;
        Ok(())
    }

    fn handle_event(&mut self, evt: DaemonEvent) {
        match evt {
            DaemonEvent::ClientCommand(cmd) => {
                info!("DaemonCore: command {:?}", cmd);
                if let Err(e) = self.handle_command(cmd) {
                    info!("DaemonCore: command rejected: {}", e);
                    let _ = self.broadcast_tx.send(BroadcastMessage::Error(e.to_string()));
                }
            }
            DaemonEvent::CacheStatsRequest(reply) => {
                let _ = reply.send(self.coordinator.cache_stats());
            }
            DaemonEvent::MpvEvent(evt) => {
                if let Some(engine_evt) = self.coordinator.engine_mut().translate(&evt) {
                    self.coordinator.on_engine_event(engine_evt);
                }
            }
            DaemonEvent::EngineAttached { driver, handle } => {
                self.driver = Some(driver);
                self.coordinator.engine_mut().attach(handle);
                if self.coordinator.engine_ready() {
                    self.load_default_playlist();
                }
            }
            DaemonEvent::EngineFailed(e) => {
                error!("DaemonCore: engine start-up failed: {}", e);
                self.coordinator.engine_failed(&e);
            }
            DaemonEvent::VideoFetched { video_id, info } => {
                if let Err(e) = self.coordinator.add_video(&video_id, info) {
                    debug!("DaemonCore: video {} not added: {}", video_id, e);
                }
            }
            DaemonEvent::PlaylistFetched {
                playlist_id,
                result,
            } => match result {
                Ok(videos) => {
                    info!("Fetched {} videos for playlist {}", videos.len(), playlist_id);
                    self.coordinator.store_playlist(&playlist_id, videos.clone());
                    self.start_import(&playlist_id, &videos);
                }
                Err(e) => {
                    if let Some(cached) = self.coordinator.playlist_fetch_failed(&playlist_id, &e) {
                        self.start_import(&playlist_id, &cached);
                    }
                }
            },
            DaemonEvent::ImportFetched { duplicates, tracks } => {
                self.coordinator.merge_import(duplicates, tracks);
            }
            DaemonEvent::Shutdown => {}
        }
    }

    fn handle_command(&mut self, cmd: Command) -> tube_core::Result<()> {
        match cmd {
            Command::LoadUrl { url } => self.load_url(&url)?,
            Command::Select { index } => {
                self.coordinator.select_at(index)?;
            }
            Command::Remove { index } => {
                self.coordinator.remove_at(index)?;
            }
            Command::TogglePlay => self.coordinator.toggle_play()?,
            Command::Play => self.coordinator.play()?,
            Command::Pause => self.coordinator.pause()?,
            Command::Stop => self.coordinator.stop(),
            Command::Next => {
                self.coordinator.next()?;
            }
            Command::Prev => {
                self.coordinator.prev()?;
            }
            Command::SeekFraction { fraction } => {
                self.coordinator.seek_fraction(fraction)?;
            }
            Command::Clear => self.coordinator.clear(),
            Command::CacheStats => {
                let stats = self.coordinator.cache_stats();
                let _ = self.broadcast_tx.send(BroadcastMessage::CacheStats(stats));
            }
            Command::CacheClear => self.coordinator.clear_cache(),
            Command::GetState => {}
        }
        Ok(())
    }

    // ── engine start-up ───────────────────────────────────────────────────────

    /// Spawn mpv and probe it in the background; the outcome comes back as
    /// `EngineAttached` or `EngineFailed`.
    fn start_engine(&mut self) {
        self.coordinator.engine_initializing();

        let engine_cfg = self.config.engine.clone();
        let core_tx = self.event_tx.clone();
        tokio::spawn(async move {
            // Single forwarder task: mpv events → core loop.
            let (mpv_tx, mut mpv_rx) = mpsc::channel::<MpvEvent>(64);
            let fwd_tx = core_tx.clone();
            tokio::spawn(async move {
                while let Some(evt) = mpv_rx.recv().await {
                    if fwd_tx.send(DaemonEvent::MpvEvent(evt)).await.is_err() {
                        break;
                    }
                }
            });

            let mut driver = MpvDriver::new(engine_cfg.use_system_mpv, engine_cfg.ipc_timeout());
            let handle = match driver.spawn_and_connect(mpv_tx).await {
                Ok(h) => h,
                Err(e) => {
                    warn!("DaemonCore: failed to start mpv: {}", e);
                    let _ = core_tx
                        .send(DaemonEvent::EngineFailed(PlayerError::EngineUnavailable(
                            e.to_string(),
                        )))
                        .await;
                    return;
                }
            };

            let probe = wait_ready(
                &handle,
                engine_cfg.init_poll_interval(),
                engine_cfg.init_max_attempts,
            )
            .await;
            let evt = match probe {
                Ok(()) => {
                    handle.observe_properties().await;
                    DaemonEvent::EngineAttached { driver, handle }
                }
                Err(e) => {
                    driver.kill().await;
                    DaemonEvent::EngineFailed(e)
                }
            };
            let _ = core_tx.send(evt).await;
        });
    }

    /// Report the engine failed if the mpv process has gone away.
    fn check_engine_alive(&mut self) {
        let Some(driver) = self.driver.as_mut() else {
            return;
        };
        if driver.process_alive() {
            return;
        }
        error!("DaemonCore: mpv process exited");
        self.driver = None;
        self.coordinator.engine_mut().detach();
        self.coordinator
            .engine_failed(&PlayerError::EngineUnavailable("mpv exited".to_string()));
    }

    // ── load by URL ───────────────────────────────────────────────────────────

    fn load_default_playlist(&mut self) {
        let Some(url) = self.config.playback.default_playlist_url.clone() else {
            return;
        };
        info!("Loading default playlist {}", url);
        if let Err(e) = self.load_url(&url) {
            warn!("Default playlist not loaded: {}", e);
        }
    }

    fn load_url(&mut self, url: &str) -> tube_core::Result<()> {
        match self.coordinator.begin_load_url(url)? {
            LoadPlan::Video { video_id } => {
                let source = Arc::clone(&self.source);
                let core_tx = self.event_tx.clone();
                tokio::spawn(async move {
                    let info = source.video_info_or_fallback(&video_id).await;
                    let _ = core_tx
                        .send(DaemonEvent::VideoFetched { video_id, info })
                        .await;
                });
            }
            LoadPlan::Playlist {
                playlist_id,
                cached: Some(videos),
            } => self.start_import(&playlist_id, &videos),
            LoadPlan::Playlist {
                playlist_id,
                cached: None,
            } => {
                let source = Arc::clone(&self.source);
                let core_tx = self.event_tx.clone();
                tokio::spawn(async move {
                    let result = source.playlist_videos(&playlist_id).await;
                    let _ = core_tx
                        .send(DaemonEvent::PlaylistFetched {
                            playlist_id,
                            result,
                        })
                        .await;
                });
            }
        }
        Ok(())
    }

    /// Look up metadata for the descriptors not yet in the playlist.
    fn start_import(&mut self, playlist_id: &str, videos: &[RawVideo]) {
        let Some(import) = self.coordinator.plan_import(playlist_id, videos) else {
            return;
        };
        let source = Arc::clone(&self.source);
        let core_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let lookups = import.fresh.iter().map(|raw| {
                let source = Arc::clone(&source);
                async move {
                    let info = source.video_info(&raw.video_id).await.ok();
                    Track::from_descriptor(raw, info, source.thumbnail_pattern())
                }
            });
            let tracks = futures_util::future::join_all(lookups).await;
            let _ = core_tx
                .send(DaemonEvent::ImportFetched {
                    duplicates: import.duplicates,
                    tracks,
                })
                .await;
        });
    }

    // ── helpers ───────────────────────────────────────────────────────────────

    /// Relay transitions into an error state to clients right away; the
    /// rest only show up in the next snapshot.
    fn drain_state_changes(&mut self) {
        loop {
            let change = match self.state_rx.try_recv() {
                Ok(change) => change,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("DaemonCore: missed {} state transitions", n);
                    continue;
                }
                Err(_) => break,
            };
            debug!("DaemonCore: {:?}", change);
            let failed = matches!(
                change,
                StateChange::Engine { to: EngineState::Error, .. }
                    | StateChange::Track { to: TrackState::Error, .. }
            );
            if failed {
                let status = self.coordinator.status().to_string();
                let _ = self.broadcast_tx.send(BroadcastMessage::Error(status));
            }
        }
    }

    async fn publish(&mut self) {
        self.drain_state_changes();
        if self.store.publish(self.coordinator.snapshot()).await {
            let _ = self.broadcast_tx.send(BroadcastMessage::StateUpdated);
        }
    }

    async fn cleanup(&mut self) {
        info!("DaemonCore: cleanup, stopping mpv");
        if let Some(handle) = self.coordinator.engine_mut().detach() {
            let _ = handle.quit().await;
        }
        if let Some(mut driver) = self.driver.take() {
            driver.kill().await;
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

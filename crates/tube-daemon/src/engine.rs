//! mpv-backed [`PlaybackEngine`].
//!
//! Commands are queued on the IPC writer without waiting.  Queries answer from
//! values mpv pushed through `observe_property`, so they never block the core
//! loop.  The core feeds every raw mpv event through [`MpvEngine::translate`].

use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, info, warn};
use tube_core::engine::{EngineEvent, PlaybackEngine};
use tube_core::{PlayerError, Result};

use crate::mpv::{
    MpvEvent, MpvHandle, OBS_DURATION, OBS_PAUSE, OBS_PAUSED_FOR_CACHE, OBS_TIME_POS,
};

const WATCH_URL: &str = "https://www.youtube.com/watch?v=";

#[derive(Default)]
pub struct MpvEngine {
    handle: Option<MpvHandle>,
    file_loaded: bool,
    paused: bool,
    time_pos: Option<f64>,
    duration: Option<f64>,
    /// Pause value we asked for and whose echo should be swallowed.
    requested_pause: Option<bool>,
}

impl MpvEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&mut self, handle: MpvHandle) {
        self.handle = Some(handle);
        self.reset_media();
        self.requested_pause = None;
    }

    pub fn detach(&mut self) -> Option<MpvHandle> {
        self.reset_media();
        self.requested_pause = None;
        self.handle.take()
    }

    fn reset_media(&mut self) {
        self.file_loaded = false;
        self.time_pos = None;
        self.duration = None;
    }

    fn fire(&self, command: Value) -> Result<()> {
        let handle = self
            .handle
            .as_ref()
            .ok_or_else(|| PlayerError::EngineUnavailable("mpv not connected".to_string()))?;
        handle
            .fire(command)
            .map_err(|e| PlayerError::EngineUnavailable(e.to_string()))
    }

    fn set_pause(&mut self, paused: bool) -> Result<()> {
        self.fire(json!(["set_property", "pause", paused]))?;
        if paused != self.paused {
            self.requested_pause = Some(paused);
        }
        Ok(())
    }

    /// Update observed media state from a raw mpv event and map it to the
    /// engine events the coordinator understands.
    pub fn translate(&mut self, evt: &MpvEvent) -> Option<EngineEvent> {
        if let Some((obs_id, data)) = evt.as_property_change() {
            return self.property_changed(obs_id, data);
        }

        match evt.event_name()? {
            "start-file" => {
                self.reset_media();
                None
            }
            "file-loaded" => {
                info!("mpv: file-loaded");
                self.file_loaded = true;
                Some(EngineEvent::Cued)
            }
            "end-file" => {
                let reason = evt.end_reason().unwrap_or("unknown");
                info!("mpv: end-file reason={}", reason);
                let was_loaded = self.file_loaded;
                self.reset_media();
                match reason {
                    "eof" if was_loaded => Some(EngineEvent::Ended),
                    "error" => {
                        warn!("mpv: playback error: {}", evt.raw);
                        None
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn property_changed(&mut self, obs_id: u64, data: &Value) -> Option<EngineEvent> {
        match obs_id {
            OBS_PAUSE => {
                let paused = data.as_bool().unwrap_or(false);
                self.paused = paused;
                if self.requested_pause == Some(paused) {
                    self.requested_pause = None;
                    return None;
                }
                if !self.file_loaded {
                    return None;
                }
                debug!("mpv: pause -> {}", paused);
                Some(if paused {
                    EngineEvent::Paused
                } else {
                    EngineEvent::Playing
                })
            }
            OBS_PAUSED_FOR_CACHE => {
                if !self.file_loaded {
                    return None;
                }
                match data.as_bool() {
                    Some(true) => Some(EngineEvent::Buffering),
                    Some(false) if !self.paused => Some(EngineEvent::Playing),
                    _ => None,
                }
            }
            OBS_TIME_POS => {
                self.time_pos = data.as_f64();
                None
            }
            OBS_DURATION => {
                self.duration = data.as_f64();
                None
            }
            _ => None,
        }
    }
}

impl PlaybackEngine for MpvEngine {
    fn cue(&mut self, track_id: &str) -> Result<()> {
        // Pause first so the new file comes up cued, not playing.
        self.set_pause(true)?;
        self.fire(json!(["loadfile", format!("{}{}", WATCH_URL, track_id), "replace"]))?;
        self.reset_media();
        Ok(())
    }

    fn play(&mut self) -> Result<()> {
        self.set_pause(false)
    }

    fn pause(&mut self) -> Result<()> {
        self.set_pause(true)
    }

    fn seek(&mut self, seconds: f64) -> Result<()> {
        self.fire(json!(["seek", seconds, "absolute"]))?;
        self.time_pos = Some(seconds);
        Ok(())
    }

    fn current_time(&self) -> Result<f64> {
        self.time_pos
            .ok_or_else(|| PlayerError::EngineUnavailable("time-pos not available".to_string()))
    }

    fn duration(&self) -> Result<f64> {
        if !self.file_loaded {
            return Err(PlayerError::EngineUnavailable("no file loaded".to_string()));
        }
        // Known-but-unreported duration is "still loading", reported as 0.
        Ok(self.duration.unwrap_or(0.0))
    }
}

/// Probe `handle` until mpv answers, at most `max_attempts` times.
pub async fn wait_ready(
    handle: &MpvHandle,
    interval: Duration,
    max_attempts: u32,
) -> Result<()> {
    for attempt in 1..=max_attempts {
        match handle.ping().await {
            Ok(()) => {
                info!("mpv: ready after {} attempt(s)", attempt);
                return Ok(());
            }
            Err(e) => debug!("mpv: not ready (attempt {}): {}", attempt, e),
        }
        tokio::time::sleep(interval).await;
    }
    Err(PlayerError::EngineInitTimeout {
        attempts: max_attempts,
    })
}

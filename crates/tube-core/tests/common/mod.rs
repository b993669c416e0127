#![allow(dead_code)]

use tube_core::coordinator::{Coordinator, Tuning};
use tube_core::engine::{EngineEvent, PlaybackEngine};
use tube_core::model::Track;
use tube_core::{PlayerError, Result};

/// Everything the coordinator asked the engine to do, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Cue(String),
    Play,
    Pause,
    Seek(f64),
}

#[derive(Debug, Default)]
pub struct FakeEngine {
    pub calls: Vec<Call>,
    pub current: Option<f64>,
    pub duration: Option<f64>,
    /// Make every command fail as if the engine were gone.
    pub broken: bool,
}

impl FakeEngine {
    fn command(&mut self, call: Call) -> Result<()> {
        if self.broken {
            return Err(PlayerError::EngineUnavailable("engine gone".to_string()));
        }
        self.calls.push(call);
        Ok(())
    }

    pub fn cued(&self) -> Vec<&str> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::Cue(id) => Some(id.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl PlaybackEngine for FakeEngine {
    fn cue(&mut self, track_id: &str) -> Result<()> {
        self.command(Call::Cue(track_id.to_string()))
    }

    fn play(&mut self) -> Result<()> {
        self.command(Call::Play)
    }

    fn pause(&mut self) -> Result<()> {
        self.command(Call::Pause)
    }

    fn seek(&mut self, seconds: f64) -> Result<()> {
        self.command(Call::Seek(seconds))
    }

    fn current_time(&self) -> Result<f64> {
        self.current
            .ok_or_else(|| PlayerError::EngineUnavailable("time unknown".to_string()))
    }

    fn duration(&self) -> Result<f64> {
        self.duration
            .ok_or_else(|| PlayerError::EngineUnavailable("duration unknown".to_string()))
    }
}

pub fn track(id: &str) -> Track {
    Track::new(id, format!("Song {}", id), "Artist")
}

/// Coordinator with a ready engine and `ids` merged in.  The merge cues the
/// first track; the recorded calls are reset afterwards.
pub fn ready_with(ids: &[&str]) -> Coordinator<FakeEngine> {
    let mut c = Coordinator::new(FakeEngine::default(), Tuning::default());
    c.engine_initializing();
    c.engine_ready();
    if !ids.is_empty() {
        c.merge_import(0, ids.iter().map(|id| track(id)).collect());
    }
    c.engine_mut().calls.clear();
    c
}

/// Load `index`, confirm the cue and start playback.
pub fn play_at(c: &mut Coordinator<FakeEngine>, index: usize) {
    c.load_track(index).unwrap();
    c.on_engine_event(EngineEvent::Cued);
    c.play().unwrap();
}

mod common;

use std::time::{Duration, Instant};

use common::{play_at, ready_with, track, Call, FakeEngine};
use tube_core::coordinator::{Coordinator, LoadOutcome, LoadPlan, Tuning};
use tube_core::engine::EngineEvent;
use tube_core::model::{RawVideo, VideoInfo};
use tube_core::playlist::Removal;
use tube_core::state::{EngineState, PlaybackState, StateChange, TrackState};
use tube_core::PlayerError;

fn raw(id: &str) -> RawVideo {
    RawVideo {
        video_id: id.to_string(),
        title: format!("Feed {}", id),
    }
}

#[test]
fn merging_into_empty_playlist_loads_first_track() {
    let mut c = Coordinator::new(FakeEngine::default(), Tuning::default());
    c.engine_initializing();
    c.engine_ready();
    c.merge_import(0, vec![track("a"), track("b")]);
    assert_eq!(c.engine().cued(), vec!["a"]);
    assert_eq!(c.state().track(), TrackState::Loading);
    assert_eq!(c.status(), "Added 2 new videos from playlist");
}

#[test]
fn remove_before_cursor_rebases() {
    let mut c = ready_with(&["a", "b", "c"]);
    c.load_track(2).unwrap();
    let cued_before = c.engine().calls.len();

    assert_eq!(c.remove_at(1), Ok(Removal::Rebased { cursor: 1 }));
    let ids: Vec<&str> = c.playlist().tracks().iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "c"]);
    assert_eq!(c.playlist().cursor(), 1);
    assert_eq!(c.current_track().map(|t| t.id.as_str()), Some("c"));
    // No reload for a rebase.
    assert_eq!(c.engine().calls.len(), cued_before);
    assert_eq!(c.status(), "Removed track from playlist (2 remaining)");
}

#[test]
fn removing_last_current_track_wraps_and_reloads() {
    let mut c = ready_with(&["a", "b", "c"]);
    play_at(&mut c, 2);

    assert_eq!(c.remove_at(2), Ok(Removal::CurrentRemoved { cursor: 0 }));
    assert_eq!(c.playlist().cursor(), 0);
    assert_eq!(c.engine().cued().last(), Some(&"a"));
    // It was playing, so the reload starts by itself.
    assert!(c.auto_play());
    c.on_engine_event(EngineEvent::Cued);
    assert_eq!(c.state().playback(), PlaybackState::Playing);
}

#[test]
fn removing_only_playing_track_empties_and_stops() {
    let mut c = ready_with(&["a"]);
    play_at(&mut c, 0);

    assert_eq!(c.remove_at(0), Ok(Removal::Emptied));
    assert!(c.playlist().is_empty());
    assert_eq!(c.playlist().cursor(), 0);
    assert_eq!(c.state().playback(), PlaybackState::Stopped);
    assert_eq!(c.state().track(), TrackState::NoTrack);
    assert_eq!(c.status(), "Playlist is now empty");
}

#[test]
fn remove_out_of_range() {
    let mut c = ready_with(&["a"]);
    assert_eq!(
        c.remove_at(5),
        Err(PlayerError::OutOfRange { index: 5, len: 1 })
    );
}

#[test]
fn ended_advances_and_auto_plays_next() {
    let mut c = ready_with(&["a", "b"]);
    play_at(&mut c, 0);

    c.on_engine_event(EngineEvent::Ended);
    assert!(c.auto_play());
    assert_eq!(c.playlist().cursor(), 1);
    assert_eq!(c.engine().cued().last(), Some(&"b"));
    assert_eq!(c.state().track(), TrackState::Loading);

    c.on_engine_event(EngineEvent::Cued);
    assert!(!c.auto_play());
    assert_eq!(c.state().playback(), PlaybackState::Playing);
    assert_eq!(c.engine().calls.last(), Some(&Call::Play));
}

#[test]
fn ended_on_single_track_loops() {
    let mut c = ready_with(&["a"]);
    play_at(&mut c, 0);
    c.on_engine_event(EngineEvent::Ended);
    assert_eq!(c.engine().cued(), vec!["a", "a"]);
    assert_eq!(c.playlist().cursor(), 0);
}

#[test]
fn seek_fraction_is_clamped() {
    let mut c = ready_with(&["a"]);
    play_at(&mut c, 0);
    c.engine_mut().duration = Some(240.0);
    c.engine_mut().current = Some(12.0);

    assert_eq!(c.seek_fraction(1.2), Ok(240.0));
    assert_eq!(c.engine().calls.last(), Some(&Call::Seek(240.0)));
    assert_eq!(c.seek_fraction(0.25), Ok(60.0));
    assert_eq!(c.progress().current_text, "1:00");
}

#[test]
fn seek_rejected_before_track_loaded() {
    let mut c = ready_with(&["a"]);
    c.engine_mut().duration = Some(240.0);
    assert!(matches!(
        c.seek_fraction(0.5),
        Err(PlayerError::GuardRejected { op: "seek", .. })
    ));
    assert!(!c.engine().calls.iter().any(|call| matches!(call, Call::Seek(_))));
}

#[test]
fn playlist_import_skips_present_videos() {
    let mut c = ready_with(&["v1", "v3"]);
    let plan = c.begin_load_url("https://www.youtube.com/playlist?list=PLx").unwrap();
    assert_eq!(
        plan,
        LoadPlan::Playlist {
            playlist_id: "PLx".to_string(),
            cached: None
        }
    );

    let feed: Vec<RawVideo> = ["v1", "v2", "v3", "v4", "v5"].iter().map(|id| raw(id)).collect();
    c.store_playlist("PLx", feed.clone());
    let import = c.plan_import("PLx", &feed).unwrap();
    assert_eq!(import.duplicates, 2);
    assert_eq!(import.fresh.len(), 3);

    let tracks = import
        .fresh
        .iter()
        .map(|v| tube_core::model::Track::from_descriptor(v, None, c.thumbnail_pattern()))
        .collect();
    let report = c.merge_import(import.duplicates, tracks);
    assert_eq!(report.added, 3);
    assert_eq!(c.playlist().len(), 5);
    assert!(c.status().contains("2 duplicate videos"));
    assert!(c.status().contains("adding 3"));
}

#[test]
fn playlist_import_all_present() {
    let mut c = ready_with(&["v1"]);
    assert!(c.plan_import("PLx", &[raw("v1")]).is_none());
    assert_eq!(c.status(), "Playlist already added - no new videos to load");
    assert!(c.plan_import("PLx", &[]).is_none());
    assert_eq!(c.status(), "No videos found in playlist");
}

#[test]
fn merge_rechecks_duplicates_added_meanwhile() {
    let mut c = ready_with(&["a"]);
    let import = c.plan_import("PLx", &[raw("b"), raw("c")]).unwrap();
    // "b" arrives through another request before the lookups finish.
    let info = VideoInfo::fallback("b", c.thumbnail_pattern());
    c.add_video("b", info).unwrap();
    let report = c.merge_import(import.duplicates, vec![track("b"), track("c")]);
    assert_eq!(report.added, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(c.playlist().len(), 3);
}

#[test]
fn cached_playlist_served_until_expiry() {
    let mut c = ready_with(&[]);
    let t0 = Instant::now();
    c.store_playlist_at("PLx", vec![raw("v1")], t0);

    let plan = c
        .begin_load_url_at("https://www.youtube.com/playlist?list=PLx", t0 + Duration::from_secs(60))
        .unwrap();
    assert_eq!(
        plan,
        LoadPlan::Playlist {
            playlist_id: "PLx".to_string(),
            cached: Some(vec![raw("v1")])
        }
    );

    let later = t0 + Duration::from_secs(31 * 60);
    assert_eq!(c.cached_playlist_at("PLx", later), None);
    assert_eq!(c.cache_stats_at(later).total_entries, 0);
}

#[test]
fn load_deferred_while_engine_initializes() {
    let mut c = Coordinator::new(FakeEngine::default(), Tuning::default());
    c.engine_initializing();
    c.merge_import(0, vec![track("a"), track("b")]);
    assert!(c.engine().calls.is_empty());

    let deadline = c.next_deadline().expect("load should be parked");

    // Still initializing when the retry fires: parked again.
    assert!(c.run_due(deadline));
    let retry = c.next_deadline().expect("load should be parked again");
    assert!(retry > deadline);
    assert!(c.engine().calls.is_empty());

    c.engine_ready();
    assert!(!c.run_due(retry - Duration::from_millis(1)));
    assert!(c.run_due(retry));
    assert_eq!(c.engine().cued(), vec!["a"]);
    assert!(c.next_deadline().is_none());
}

#[test]
fn newer_deferral_replaces_older() {
    let mut c = Coordinator::new(FakeEngine::default(), Tuning::default());
    c.engine_initializing();
    c.merge_import(0, vec![track("a"), track("b")]);
    assert_eq!(c.select_at(1), Ok(LoadOutcome::Deferred));
    assert_eq!(c.status(), "YouTube player initializing...");

    c.engine_ready();
    let deadline = c.next_deadline().unwrap();
    c.run_due(deadline);
    assert_eq!(c.engine().cued(), vec!["b"]);
    assert_eq!(c.playlist().cursor(), 1);
}

#[test]
fn broken_engine_marks_track_error() {
    let mut c = ready_with(&[]);
    c.engine_mut().broken = true;
    c.merge_import(0, vec![track("a")]);
    assert_eq!(c.state().track(), TrackState::Error);
    assert!(c.status().starts_with("Added 1"));
    assert_eq!(c.state().engine(), EngineState::Ready);
}

#[test]
fn next_carries_auto_play_only_while_playing() {
    let mut c = ready_with(&["a", "b", "c"]);
    c.on_engine_event(EngineEvent::Cued);
    c.next().unwrap();
    assert!(!c.auto_play());

    c.on_engine_event(EngineEvent::Cued);
    c.play().unwrap();
    c.prev().unwrap();
    assert!(c.auto_play());
    assert_eq!(c.playlist().cursor(), 0);
}

#[test]
fn stop_rewinds_loaded_track() {
    let mut c = ready_with(&["a"]);
    play_at(&mut c, 0);
    c.stop();
    let tail: Vec<Call> = c.engine().calls.iter().rev().take(2).cloned().collect();
    assert_eq!(tail, vec![Call::Seek(0.0), Call::Pause]);
    assert_eq!(c.state().playback(), PlaybackState::Stopped);
    assert_eq!(c.progress().current_text, "0:00");
    assert_eq!(c.status(), "Track ready to play");
}

#[test]
fn clear_resets_everything() {
    let mut c = ready_with(&["a", "b"]);
    play_at(&mut c, 1);
    c.clear();
    assert!(c.playlist().is_empty());
    assert_eq!(c.state().track(), TrackState::NoTrack);
    assert_eq!(c.state().playback(), PlaybackState::Stopped);
    assert_eq!(c.status(), "Playlist cleared");
    assert!(c.snapshot().current_track().is_none());
}

#[test]
fn fetch_failure_falls_back_to_fresh_cache() {
    let mut c = ready_with(&[]);
    let t0 = Instant::now();
    c.store_playlist_at("PLx", vec![raw("v1"), raw("v2")], t0);
    c.begin_load_url_at("https://www.youtube.com/playlist?list=PLy", t0)
        .unwrap();

    let err = PlayerError::FetchFailed("timeout".to_string());
    let cached = c.playlist_fetch_failed_at("PLx", &err, t0 + Duration::from_secs(10 * 60));
    assert_eq!(cached, Some(vec![raw("v1"), raw("v2")]));
    assert_eq!(c.status(), "Loading YouTube playlist...");
}

#[test]
fn fetch_failure_ignores_expired_cache() {
    let mut c = ready_with(&[]);
    let t0 = Instant::now();
    c.store_playlist_at("PLx", vec![raw("v1")], t0);

    let err = PlayerError::FetchFailed("timeout".to_string());
    let later = t0 + Duration::from_secs(31 * 60);
    assert_eq!(c.playlist_fetch_failed_at("PLx", &err, later), None);
    assert_eq!(
        c.status(),
        "Unable to load playlist. Please add videos individually."
    );
    assert_eq!(c.cache_stats_at(later).total_entries, 0);
}

#[test]
fn fetch_failure_without_cache_sets_status() {
    let mut c = ready_with(&["a"]);
    let err = PlayerError::FetchFailed("HTTP 404".to_string());
    assert_eq!(c.playlist_fetch_failed_at("PLz", &err, Instant::now()), None);
    assert_eq!(
        c.status(),
        "Unable to load playlist. Please add videos individually."
    );
    assert_eq!(c.playlist().len(), 1);
}

#[test]
fn rejected_select_drops_auto_play() {
    let mut c = Coordinator::new(FakeEngine::default(), Tuning::default());
    c.merge_import(0, vec![track("a"), track("b")]);
    assert!(matches!(
        c.select_at(1),
        Err(PlayerError::GuardRejected { .. })
    ));
    assert!(!c.auto_play());

    c.engine_initializing();
    c.engine_ready();
    c.load_track(0).unwrap();
    c.on_engine_event(EngineEvent::Cued);
    assert_eq!(c.engine().calls, vec![Call::Cue("a".to_string())]);
    assert_eq!(c.state().playback(), PlaybackState::Stopped);
}

#[test]
fn observer_sees_load_transitions() {
    let (tx, mut rx) = tokio::sync::broadcast::channel(32);
    let mut c = Coordinator::new(FakeEngine::default(), Tuning::default()).with_observer(tx);
    c.engine_initializing();
    c.engine_ready();
    c.merge_import(0, vec![track("a")]);
    c.on_engine_event(EngineEvent::Cued);

    let mut changes = Vec::new();
    while let Ok(change) = rx.try_recv() {
        changes.push(change);
    }
    let moved: Vec<StateChange> = changes
        .into_iter()
        .filter(|change| match change {
            StateChange::Engine { from, to } => from != to,
            StateChange::Track { from, to } => from != to,
            StateChange::Playback { from, to } => from != to,
        })
        .collect();
    assert_eq!(
        moved,
        vec![
            StateChange::Engine {
                from: EngineState::Uninitialized,
                to: EngineState::Initializing
            },
            StateChange::Engine {
                from: EngineState::Initializing,
                to: EngineState::Ready
            },
            StateChange::Track {
                from: TrackState::NoTrack,
                to: TrackState::Loading
            },
            StateChange::Track {
                from: TrackState::Loading,
                to: TrackState::Loaded
            },
        ]
    );
}

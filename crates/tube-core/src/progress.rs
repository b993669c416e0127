use serde::{Deserialize, Serialize};

/// Placeholder for a duration the engine has not reported yet.
pub const UNKNOWN_TIME: &str = "--:--";

/// `m:ss`; anything non-finite or negative renders as `0:00`.
pub fn format_time(seconds: f64) -> String {
    if !seconds.is_finite() || seconds < 0.0 {
        return "0:00".to_string();
    }
    let total = seconds.floor() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}

/// Render-ready progress of the current track.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProgressView {
    pub current_secs: Option<f64>,
    pub duration_secs: Option<f64>,
    pub current_text: String,
    pub duration_text: String,
    /// Played share in `[0, 1]`.
    pub fraction: f64,
}

impl Default for ProgressView {
    fn default() -> Self {
        Self {
            current_secs: None,
            duration_secs: None,
            current_text: "0:00".to_string(),
            duration_text: "0:00".to_string(),
            fraction: 0.0,
        }
    }
}

impl ProgressView {
    /// Media is loading; duration not known yet.
    pub fn pending() -> Self {
        Self {
            duration_text: UNKNOWN_TIME.to_string(),
            ..Self::default()
        }
    }

    /// Build from engine readings; `None` unless `duration > 0`.
    pub fn from_times(current: f64, duration: f64) -> Option<Self> {
        if !(duration.is_finite() && duration > 0.0 && current.is_finite()) {
            return None;
        }
        let current = current.clamp(0.0, duration);
        Some(Self {
            current_secs: Some(current),
            duration_secs: Some(duration),
            current_text: format_time(current),
            duration_text: format_time(duration),
            fraction: current / duration,
        })
    }

    pub fn remaining_secs(&self) -> Option<f64> {
        Some(self.duration_secs? - self.current_secs?)
    }
}

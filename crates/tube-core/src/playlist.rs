//! Ordered, identifier-unique track list with a cursor.
//!
//! Cursor invariant: `cursor < len` whenever the list is non-empty; when the
//! list is empty the cursor is `0` and means nothing.

use std::collections::HashSet;

use crate::error::{PlayerError, Result};
use crate::model::Track;

/// Step direction for [`Playlist::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// What a removal did to the cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The list is now empty; cursor reset to 0.
    Emptied,
    /// The current track was removed; the track now under `cursor` must be loaded.
    CurrentRemoved { cursor: usize },
    /// A track before the cursor was removed; cursor shifted down by one.
    Rebased { cursor: usize },
    /// A track after the cursor was removed.
    Unchanged,
}

/// Outcome of a bulk merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeReport {
    pub added: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Playlist {
    tracks: Vec<Track>,
    cursor: usize,
}

impl Playlist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn get(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn current(&self) -> Option<&Track> {
        self.tracks.get(self.cursor)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tracks.iter().any(|t| t.id == id)
    }

    /// Identifiers currently present, for dedup before a bulk import.
    pub fn ids(&self) -> HashSet<String> {
        self.tracks.iter().map(|t| t.id.clone()).collect()
    }

    /// Append `track` unless its identifier is already present.
    pub fn insert(&mut self, track: Track) -> bool {
        if self.contains(&track.id) {
            return false;
        }
        self.tracks.push(track);
        true
    }

    pub fn remove_at(&mut self, index: usize) -> Result<Removal> {
        self.check_index(index)?;
        self.tracks.remove(index);

        if self.tracks.is_empty() {
            self.cursor = 0;
            return Ok(Removal::Emptied);
        }

        if index < self.cursor {
            self.cursor -= 1;
            Ok(Removal::Rebased {
                cursor: self.cursor,
            })
        } else if index == self.cursor {
            if self.cursor >= self.tracks.len() {
                // Removed the last track: wrap to the first.
                self.cursor = 0;
            }
            Ok(Removal::CurrentRemoved {
                cursor: self.cursor,
            })
        } else {
            Ok(Removal::Unchanged)
        }
    }

    /// Point the cursor at `index`.
    pub fn select_at(&mut self, index: usize) -> Result<&Track> {
        self.check_index(index)?;
        self.cursor = index;
        Ok(&self.tracks[index])
    }

    /// Move the cursor one step, wrapping at both ends.  `None` on an empty list.
    pub fn advance(&mut self, direction: Direction) -> Option<usize> {
        let len = self.tracks.len();
        if len == 0 {
            return None;
        }
        self.cursor = match direction {
            Direction::Forward => (self.cursor + 1) % len,
            Direction::Backward => (self.cursor + len - 1) % len,
        };
        Some(self.cursor)
    }

    pub fn clear(&mut self) {
        self.tracks.clear();
        self.cursor = 0;
    }

    /// Append every track of `batch` whose identifier is not already present
    /// (in the list or earlier in the batch).
    pub fn merge(&mut self, batch: Vec<Track>) -> MergeReport {
        let mut report = MergeReport::default();
        for track in batch {
            if self.insert(track) {
                report.added += 1;
            } else {
                report.skipped += 1;
            }
        }
        report
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.tracks.len() {
            return Err(PlayerError::OutOfRange {
                index,
                len: self.tracks.len(),
            });
        }
        Ok(())
    }
}

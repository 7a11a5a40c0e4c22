//! Playback state shared between the control plane and the real-time side.
//!
//! One mutex guards the published timeline together with the cursor
//! fields. Ownership of the individual fields is split:
//!
//! | field             | written by                      |
//! |-------------------|---------------------------------|
//! | timeline          | loader                          |
//! | track_count       | loader                          |
//! | current_track     | loader, track selection         |
//! | track_changed     | loader, track selection, dispatcher (clear) |
//! | last_window_end   | loader (reset), dispatcher      |
//! | sounding          | dispatcher                      |
//!
//! `sounding` lives outside the mutex as an atomic because the dispatcher
//! must clear it on blocks where it fails to take the lock.
//! Control-plane writers take the lock blocking; the dispatcher only ever
//! uses `try_lock`.

use crate::midi::{Timeline, Track};
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Track selection outside `0..track_count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("track index {index} out of range (track count {track_count})")]
pub struct RangeError {
    pub index: usize,
    pub track_count: usize,
}

/// Lock-guarded part of the playback state.
#[derive(Debug, Default)]
pub(crate) struct Cursor {
    pub(crate) timeline: Timeline,
    pub(crate) track_count: usize,
    pub(crate) current_track: usize,
    pub(crate) track_changed: bool,
    pub(crate) last_window_end: f64,
}

impl Cursor {
    /// Returns the selected track, if a timeline is loaded.
    pub(crate) fn current(&self) -> Option<&Track> {
        if self.track_count == 0 {
            return None;
        }
        self.timeline.track(self.current_track)
    }
}

/// Point-in-time copy of the playback state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackState {
    pub track_count: usize,
    pub current_track: usize,
    pub track_changed: bool,
    pub sounding: bool,
    pub last_window_end: f64,
}

/// The shared playback record.
#[derive(Debug, Default)]
pub struct SharedPlayback {
    cursor: Mutex<Cursor>,
    sounding: AtomicBool,
}

impl SharedPlayback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publishes a freshly loaded timeline and resets the cursor.
    ///
    /// Blocks until the lock is free. The sounding flag is left alone so
    /// the dispatcher still flushes notes started by the old timeline.
    pub fn publish(&self, timeline: Timeline) {
        let old = {
            let mut cursor = self.cursor.lock();
            cursor.track_count = timeline.track_count();
            cursor.current_track = 0;
            cursor.track_changed = false;
            cursor.last_window_end = 0.0;
            std::mem::replace(&mut cursor.timeline, timeline)
        };
        // Old timeline is freed after the lock is released.
        drop(old);
    }

    /// Selects a track and marks the selection as changed.
    pub fn select_track(&self, index: usize) -> Result<(), RangeError> {
        let mut cursor = self.cursor.lock();
        if index >= cursor.track_count {
            return Err(RangeError {
                index,
                track_count: cursor.track_count,
            });
        }
        cursor.current_track = index;
        cursor.track_changed = true;
        Ok(())
    }

    /// Copies the current state. Blocks; control plane only.
    pub fn snapshot(&self) -> PlaybackState {
        let cursor = self.cursor.lock();
        PlaybackState {
            track_count: cursor.track_count,
            current_track: cursor.current_track,
            track_changed: cursor.track_changed,
            sounding: self.is_sounding(),
            last_window_end: cursor.last_window_end,
        }
    }

    /// Returns the selected track's name and end time, if any.
    pub fn current_track_info(&self) -> Option<(Option<String>, f64)> {
        let cursor = self.cursor.lock();
        cursor.current().map(|t| (t.name.clone(), t.end_time()))
    }

    pub fn is_sounding(&self) -> bool {
        self.sounding.load(Ordering::Acquire)
    }

    pub(crate) fn set_sounding(&self, sounding: bool) {
        self.sounding.store(sounding, Ordering::Release);
    }

    /// Non-blocking acquire used by the real-time path.
    pub(crate) fn try_cursor(&self) -> Option<MutexGuard<'_, Cursor>> {
        self.cursor.try_lock()
    }

    #[cfg(test)]
    pub(crate) fn lock_cursor(&self) -> MutexGuard<'_, Cursor> {
        self.cursor.lock()
    }
}

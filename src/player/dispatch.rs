//! Per-block MIDI dispatch.
//!
//! Runs once per audio block on the real-time thread. It never blocks:
//! the shared playback lock is only tried, and when it is busy the block
//! degrades to a safety flush (if anything is sounding) instead of
//! stalling the callback.
//!
//! Flush messages go into the host's [`MidiBuffer`]; timeline events go
//! to the external [`MidiSink`].

use super::state::SharedPlayback;
use crate::midi::{push_safety_flush, MidiBuffer, MidiSink};
use std::sync::Arc;

/// Start of the scan window used for every host block, in seconds.
///
/// The window does not advance with elapsed playback time: each block
/// scans `[SCAN_WINDOW_START, track end)`. This matches the player's
/// established behavior and is covered by tests as such.
pub const SCAN_WINDOW_START: f64 = 0.0;

/// Real-time scanner for the selected track.
pub struct Dispatcher {
    playback: Arc<SharedPlayback>,
    sample_period: f64,
}

impl Dispatcher {
    pub fn new(playback: Arc<SharedPlayback>, sample_rate: f64) -> Self {
        let mut dispatcher = Self {
            playback,
            sample_period: 0.0,
        };
        dispatcher.set_sample_rate(sample_rate);
        dispatcher
    }

    pub fn set_sample_rate(&mut self, sample_rate: f64) {
        self.sample_period = 1.0 / sample_rate.max(1.0);
    }

    /// Dispatches one host block.
    pub fn process_block(&mut self, midi_out: &mut MidiBuffer, sink: &mut dyn MidiSink) {
        self.dispatch(SCAN_WINDOW_START, midi_out, sink);
    }

    /// Scans `[window_start, track end)` of the selected track.
    pub fn dispatch(&mut self, window_start: f64, midi_out: &mut MidiBuffer, sink: &mut dyn MidiSink) {
        let Some(mut cursor) = self.playback.try_cursor() else {
            // Lock held by the control plane; never leave notes hanging.
            if self.playback.is_sounding() {
                self.safety_flush(midi_out);
            }
            return;
        };

        let cursor = &mut *cursor;
        if cursor.track_count == 0 {
            return;
        }
        let Some(track) = cursor.timeline.track(cursor.current_track) else {
            return;
        };
        let window_end = track.end_time();

        // Window jumped (seek or loop).
        if (window_start - cursor.last_window_end).abs() > self.sample_period
            && cursor.last_window_end > 0.0
        {
            self.safety_flush(midi_out);
        }
        cursor.last_window_end = window_end;

        // Timeline exhausted.
        if self.playback.is_sounding() && window_start >= track.end_time() {
            self.safety_flush(midi_out);
            return;
        }

        if cursor.track_changed {
            cursor.track_changed = false;
            self.safety_flush(midi_out);
        }

        for event in track.events_in_window(window_start, window_end) {
            sink.on_midi_event(event.bytes());
            self.playback.set_sounding(true);
        }
    }

    fn safety_flush(&self, midi_out: &mut MidiBuffer) {
        push_safety_flush(midi_out);
        self.playback.set_sounding(false);
    }
}

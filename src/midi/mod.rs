//! MIDI timeline data, file loading and output.
//!
//! This module provides the immutable [`Timeline`] loaded from a Standard
//! MIDI File, the outgoing [`MidiBuffer`] used for channel-mode messages,
//! and the [`MidiSink`] capability that receives forwarded events.

mod message;
mod midi_import;
mod sink;
mod timeline;

pub use message::{
    drain_block, push_safety_flush, BufferedEvent, EventQueue, MidiBuffer, ShortMessage,
    CC_ALL_NOTES_OFF, CC_ALL_SOUND_OFF, CC_RESET_ALL_CONTROLLERS, FLUSH_LEN, MIDI_CHANNELS,
};
pub use midi_import::{load_timeline, parse_timeline, LoadError, DEFAULT_USEC_PER_BEAT};
pub use sink::{connect_output, output_port_names, MidiSink, NullSink, OutputError};
pub use timeline::{Event, Timeline, Track};

#[cfg(test)]
pub(crate) use midi_import::tests as fixtures;

/// Returns true if `bytes` starts with a note-on carrying a non-zero velocity.
pub fn is_note_on(bytes: &[u8]) -> bool {
    matches!(bytes, [status, _, vel, ..] if status & 0xF0 == 0x90 && *vel > 0)
}

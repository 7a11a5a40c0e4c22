//! midiplay - A real-time MIDI and audio file player.
//!
//! This library provides a player that streams an audio file to the host's
//! output while forwarding the events of one track of a Standard MIDI File
//! to an external MIDI sink.

pub mod audio;
pub mod config;
pub mod midi;
pub mod player;
pub mod settings;

// Re-export commonly used types
pub use audio::{SourceError, StreamingSource};
pub use config::{ConfigError, PlayerConfig};
pub use midi::{LoadError, MidiBuffer, MidiSink, NullSink, Timeline};
pub use player::{PlaybackState, Player, PlayerHandle, RangeError};
pub use settings::{PluginSettings, StateError};

//! Audio file streaming for the real-time player.
//!
//! This module provides:
//! - Decoders for WAV (hound) and compressed formats (rodio)
//! - A streaming source with a background read-ahead buffer
//! - The transport that owns the current source on the real-time side

pub mod reader;
pub mod stream;
pub mod transport;

pub use reader::{open_reader, AudioReader, DecoderReader, Frame, SourceError, WavFileReader};
pub use stream::{StreamingSource, DEFAULT_READ_AHEAD_FRAMES};
pub use transport::{Transport, TransportShared, OUTPUT_CHANNELS};

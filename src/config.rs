//! Player configuration.
//!
//! Every field has a default, so a config file only needs the keys it
//! wants to override.

use crate::audio::DEFAULT_READ_AHEAD_FRAMES;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Sample rate assumed before the host prepares the player.
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Block size used by the standalone host.
pub const DEFAULT_BLOCK_SIZE: usize = 512;

/// Errors that can occur while loading a config file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Look-ahead depth of the streaming audio source, in frames.
    ///
    /// Values below one read chunk (2048 frames) are raised to 2048.
    pub read_ahead_frames: usize,

    /// Output sample rate in Hz.
    pub sample_rate: u32,

    /// Frames rendered per host block.
    pub block_size: usize,

    /// Substring used to pick the MIDI output port. First port if unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub midi_port: Option<String>,

    /// Client name announced to the MIDI backend.
    pub client_name: String,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            read_ahead_frames: DEFAULT_READ_AHEAD_FRAMES,
            sample_rate: DEFAULT_SAMPLE_RATE,
            block_size: DEFAULT_BLOCK_SIZE,
            midi_port: None,
            client_name: "midiplay".to_string(),
        }
    }
}

impl PlayerConfig {
    /// Loads a JSON config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

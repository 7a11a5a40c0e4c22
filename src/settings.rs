//! Persisted player settings.
//!
//! The only persisted field is the path of the last successfully loaded
//! audio file, stored as JSON (`{"audiofile": "..."}`).

use crate::audio::SourceError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while restoring settings.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("malformed settings: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("failed to reload audio file: {0}")]
    Source(#[from] SourceError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginSettings {
    /// Path of the last successfully loaded audio file.
    /// Stored as a string for cross-platform serialization compatibility.
    #[serde(rename = "audiofile", default, skip_serializing_if = "Option::is_none")]
    pub audio_file: Option<String>,
}

impl PluginSettings {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, StateError> {
        Ok(serde_json::from_str(json)?)
    }
}

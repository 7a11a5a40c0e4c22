//! External MIDI sinks.
//!
//! A sink receives the raw bytes of every event the dispatcher forwards.
//! It is called synchronously from the real-time context and must not
//! block. The payload slice is only valid for the duration of the call.

use midir::{MidiOutput, MidiOutputConnection};
use thiserror::Error;

/// Receiver of forwarded MIDI events.
pub trait MidiSink: Send {
    /// Called once per forwarded event with its complete raw message.
    fn on_midi_event(&mut self, bytes: &[u8]);
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl MidiSink for NullSink {
    fn on_midi_event(&mut self, _bytes: &[u8]) {}
}

impl<F> MidiSink for F
where
    F: FnMut(&[u8]) + Send,
{
    fn on_midi_event(&mut self, bytes: &[u8]) {
        self(bytes)
    }
}

/// Hardware output: send failures are dropped (fire-and-forget).
impl MidiSink for MidiOutputConnection {
    fn on_midi_event(&mut self, bytes: &[u8]) {
        let _ = self.send(bytes);
    }
}

/// Errors that can occur while opening a hardware MIDI output.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("MIDI backend unavailable: {0}")]
    Init(#[from] midir::InitError),

    #[error("no MIDI output port available")]
    NoPort,

    #[error("failed to connect to MIDI port: {0}")]
    Connect(String),
}

/// Lists the names of available MIDI output ports.
pub fn output_port_names(client_name: &str) -> Result<Vec<String>, OutputError> {
    let output = MidiOutput::new(client_name)?;
    Ok(output
        .ports()
        .iter()
        .filter_map(|p| output.port_name(p).ok())
        .collect())
}

/// Connects to a MIDI output port.
///
/// The first port whose name contains `port_hint` is chosen; without a
/// hint (or without a match) the first available port is used.
pub fn connect_output(
    client_name: &str,
    port_hint: Option<&str>,
) -> Result<MidiOutputConnection, OutputError> {
    let output = MidiOutput::new(client_name)?;
    let ports = output.ports();

    let port = port_hint
        .and_then(|hint| {
            ports
                .iter()
                .find(|p| output.port_name(p).unwrap_or_default().contains(hint))
        })
        .or_else(|| ports.first())
        .ok_or(OutputError::NoPort)?;

    let name = output.port_name(port).unwrap_or_default();
    tracing::info!("Connecting MIDI output to {}", name);

    output
        .connect(port, &format!("{}-out", client_name))
        .map_err(|e| OutputError::Connect(e.to_string()))
}

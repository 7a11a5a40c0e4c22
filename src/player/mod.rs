//! The player: a real-time half and a control-plane half.
//!
//! [`Player::new`] returns two values:
//! - [`Player`], owned by the audio callback. It renders audio, dispatches
//!   MIDI and never blocks.
//! - [`PlayerHandle`], cloneable and used from any other thread. It loads
//!   files, selects tracks, drives the transport and persists settings.
//!
//! Audio sources and MIDI sinks are built on the control plane and handed
//! over through a bounded channel. Whatever they replace is sent back and
//! dropped on the control plane, because dropping a source joins its
//! read-ahead worker.

mod dispatch;
mod state;

pub use dispatch::{Dispatcher, SCAN_WINDOW_START};
pub use state::{PlaybackState, RangeError, SharedPlayback};

use crate::audio::{SourceError, StreamingSource, Transport, TransportShared, OUTPUT_CHANNELS};
use crate::config::PlayerConfig;
use crate::midi::{load_timeline, LoadError, MidiBuffer, MidiSink, NullSink, FLUSH_LEN};
use crate::settings::{PluginSettings, StateError};
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Pending installs the real-time side has not picked up yet.
const INSTALL_QUEUE_DEPTH: usize = 8;

/// Replaced objects waiting to be dropped on the control plane.
const RETIRE_QUEUE_DEPTH: usize = 16;

/// Objects handed to the real-time side.
enum Install {
    Source(StreamingSource),
    Sink(Option<Box<dyn MidiSink>>),
}

/// Objects handed back for dropping.
enum Retired {
    Source(StreamingSource),
    Sink(Box<dyn MidiSink>),
}

/// Real-time half of the player.
pub struct Player {
    transport: Transport,
    dispatcher: Dispatcher,
    sink: Option<Box<dyn MidiSink>>,
    installs: Receiver<Install>,
    retired: Sender<Retired>,
    /// Retired objects that did not fit in the retire queue.
    overflow: Vec<Retired>,
    block_size: usize,
}

impl Player {
    /// Creates the player and its control handle.
    pub fn new(config: PlayerConfig) -> (Player, PlayerHandle) {
        let playback = Arc::new(SharedPlayback::new());
        let transport_shared = Arc::new(TransportShared::default());
        let (install_tx, install_rx) = channel::bounded(INSTALL_QUEUE_DEPTH);
        let (retire_tx, retire_rx) = channel::bounded(RETIRE_QUEUE_DEPTH);
        let sample_rate = f64::from(config.sample_rate);

        let player = Player {
            transport: Transport::new(Arc::clone(&transport_shared)),
            dispatcher: Dispatcher::new(Arc::clone(&playback), sample_rate),
            sink: None,
            installs: install_rx,
            retired: retire_tx,
            overflow: Vec::new(),
            block_size: config.block_size,
        };

        let handle = PlayerHandle {
            playback,
            transport: transport_shared,
            installs: install_tx,
            retired: retire_rx,
            audio_file: Arc::new(Mutex::new(None)),
            config: Arc::new(config),
        };

        (player, handle)
    }

    /// Prepares for playback at the given rate. Not for the real-time thread.
    pub fn prepare(&mut self, sample_rate: f64, block_size: usize) {
        self.apply_installs();
        self.block_size = block_size;
        self.dispatcher.set_sample_rate(sample_rate);
        self.transport.prepare();

        if let Some(source) = self.transport.source() {
            if f64::from(source.sample_rate()) != sample_rate {
                tracing::warn!(
                    "audio file rate {} Hz differs from output rate {} Hz; playing unresampled",
                    source.sample_rate(),
                    sample_rate
                );
            }
        }
        tracing::info!("player prepared at {} Hz, {} frames per block", sample_rate, block_size);
    }

    /// Renders one block.
    ///
    /// `output` is interleaved stereo. Flush messages are appended to
    /// `midi_out`; timeline events go to the installed sink.
    pub fn process(&mut self, output: &mut [f32], midi_out: &mut MidiBuffer) {
        self.apply_installs();
        self.transport.render(output);

        match self.sink.as_deref_mut() {
            Some(sink) => self.dispatcher.process_block(midi_out, sink),
            None => self.dispatcher.process_block(midi_out, &mut NullSink),
        }
    }

    /// Stops background work. Buffered audio and the read position are kept.
    pub fn release(&mut self) {
        self.apply_installs();
        self.transport.release();
        self.overflow.clear();
        tracing::info!("player released");
    }

    /// Number of interleaved samples in one block.
    pub fn block_len(&self) -> usize {
        self.block_size * OUTPUT_CHANNELS
    }

    /// A MIDI buffer large enough for the flushes of one block.
    pub fn midi_buffer(&self) -> MidiBuffer {
        MidiBuffer::with_capacity(FLUSH_LEN * 4)
    }

    fn apply_installs(&mut self) {
        while let Ok(install) = self.installs.try_recv() {
            match install {
                Install::Source(source) => {
                    if let Some(old) = self.transport.set_source(Some(source)) {
                        self.retire(Retired::Source(old));
                    }
                }
                Install::Sink(sink) => {
                    if let Some(old) = std::mem::replace(&mut self.sink, sink) {
                        self.retire(Retired::Sink(old));
                    }
                }
            }
        }
    }

    fn retire(&mut self, item: Retired) {
        if let Err(e) = self.retired.try_send(item) {
            self.overflow.push(e.into_inner());
        }
    }
}

/// Control-plane half of the player.
#[derive(Clone)]
pub struct PlayerHandle {
    playback: Arc<SharedPlayback>,
    transport: Arc<TransportShared>,
    installs: Sender<Install>,
    retired: Receiver<Retired>,
    audio_file: Arc<Mutex<Option<PathBuf>>>,
    config: Arc<PlayerConfig>,
}

impl PlayerHandle {
    /// Loads a Standard MIDI File and publishes it.
    ///
    /// Parsing happens before the lock is taken. On failure the previous
    /// timeline and selection stay in place.
    pub fn load_midi_file<P: AsRef<Path>>(&self, path: P) -> Result<(), LoadError> {
        let path = path.as_ref();
        let timeline = load_timeline(path).inspect_err(|e| {
            tracing::warn!("failed to load MIDI file {}: {}", path.display(), e);
        })?;
        tracing::info!(
            "loaded {} ({} tracks, {:.2}s)",
            path.display(),
            timeline.track_count(),
            timeline.duration()
        );
        self.playback.publish(timeline);
        Ok(())
    }

    pub fn select_track(&self, index: usize) -> Result<(), RangeError> {
        self.playback.select_track(index)?;
        tracing::info!("selected track {}", index);
        Ok(())
    }

    /// Opens an audio file and installs it as the transport source.
    ///
    /// The read-ahead worker is started here, so the file starts buffering
    /// before the next block. The transport is stopped only once the new
    /// source is ready; a failed load leaves the current one playing.
    pub fn load_audio_file<P: AsRef<Path>>(&self, path: P) -> Result<(), SourceError> {
        let path = path.as_ref();
        self.collect_retired();

        let mut source = StreamingSource::open(path, self.config.read_ahead_frames)?;
        source.start()?;
        let (rate, channels) = (source.sample_rate(), source.channels());

        let was_playing = self.is_playing();
        self.stop();
        if let Err(reason) = self.send(Install::Source(source)) {
            if was_playing {
                self.play();
            }
            return Err(SourceError::Rejected(reason));
        }
        *self.audio_file.lock() = Some(path.to_path_buf());
        tracing::info!("loaded audio {} ({} Hz, {} channels)", path.display(), rate, channels);
        Ok(())
    }

    /// Installs (or removes) the sink that receives timeline events.
    pub fn set_sink(&self, sink: Option<Box<dyn MidiSink>>) -> Result<(), SourceError> {
        self.collect_retired();
        self.send(Install::Sink(sink)).map_err(SourceError::Rejected)
    }

    pub fn play(&self) {
        self.transport.set_playing(true);
    }

    pub fn stop(&self) {
        self.transport.set_playing(false);
    }

    pub fn is_playing(&self) -> bool {
        self.transport.is_playing()
    }

    pub fn has_audio(&self) -> bool {
        self.transport.has_source()
    }

    pub fn position_seconds(&self) -> f64 {
        self.transport.position_seconds()
    }

    pub fn length_seconds(&self) -> f64 {
        self.transport.length_seconds()
    }

    pub fn playback_state(&self) -> PlaybackState {
        self.playback.snapshot()
    }

    /// Name and end time of the selected track.
    pub fn current_track_info(&self) -> Option<(Option<String>, f64)> {
        self.playback.current_track_info()
    }

    /// Path of the last successfully loaded audio file.
    pub fn current_audio_file(&self) -> Option<PathBuf> {
        self.audio_file.lock().clone()
    }

    /// Serializes the persisted settings.
    pub fn save_state(&self) -> Result<String, serde_json::Error> {
        let settings = PluginSettings {
            audio_file: self
                .current_audio_file()
                .map(|p| p.to_string_lossy().into_owned()),
        };
        settings.to_json()
    }

    /// Restores persisted settings.
    ///
    /// A recorded audio file is reloaded only if it still exists.
    pub fn restore_state(&self, json: &str) -> Result<(), StateError> {
        let settings = PluginSettings::from_json(json)?;
        let Some(audio_file) = settings.audio_file else {
            return Ok(());
        };

        let path = PathBuf::from(audio_file);
        if !path.is_file() {
            tracing::warn!("saved audio file {} no longer exists", path.display());
            return Ok(());
        }
        self.load_audio_file(&path)?;
        Ok(())
    }

    /// Drops objects the real-time side has replaced.
    pub fn collect_retired(&self) -> usize {
        let mut count = 0;
        while let Ok(item) = self.retired.try_recv() {
            match item {
                Retired::Source(mut source) => source.join(),
                Retired::Sink(sink) => drop(sink),
            }
            count += 1;
        }
        count
    }

    fn send(&self, install: Install) -> Result<(), &'static str> {
        match self.installs.try_send(install) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::warn!("install queue full; is the player processing?");
                Err("install queue full")
            }
            Err(TrySendError::Disconnected(_)) => Err("player dropped"),
        }
    }
}

//! Audio transport: the installed streaming source plus play/stop state.
//!
//! The [`Transport`] lives on the real-time side. Control-plane threads
//! observe and steer it through the lock-free [`TransportShared`].

use super::stream::StreamingSource;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Output is always interleaved stereo.
pub const OUTPUT_CHANNELS: usize = 2;

/// Transport state visible from any thread.
#[derive(Debug, Default)]
pub struct TransportShared {
    playing: AtomicBool,
    position_frames: AtomicU64,
    length_frames: AtomicU64,
    /// Sample rate of the installed file; 0 when nothing is installed.
    source_rate: AtomicU32,
}

impl TransportShared {
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::Release);
    }

    pub fn has_source(&self) -> bool {
        self.source_rate.load(Ordering::Acquire) > 0
    }

    /// Playback position within the installed file, in seconds.
    pub fn position_seconds(&self) -> f64 {
        self.frames_to_seconds(self.position_frames.load(Ordering::Relaxed))
    }

    /// Length of the installed file in seconds (0 if unknown).
    pub fn length_seconds(&self) -> f64 {
        self.frames_to_seconds(self.length_frames.load(Ordering::Relaxed))
    }

    fn frames_to_seconds(&self, frames: u64) -> f64 {
        match self.source_rate.load(Ordering::Acquire) {
            0 => 0.0,
            rate => frames as f64 / rate as f64,
        }
    }
}

/// Owner of the current streaming source.
pub struct Transport {
    source: Option<StreamingSource>,
    shared: Arc<TransportShared>,
}

impl Transport {
    pub fn new(shared: Arc<TransportShared>) -> Self {
        Self {
            source: None,
            shared,
        }
    }

    /// Renders one block of interleaved stereo into `out`.
    ///
    /// Silence while stopped or without a source. Never blocks.
    pub fn render(&mut self, out: &mut [f32]) {
        let Some(source) = self.source.as_mut().filter(|_| self.shared.is_playing()) else {
            out.fill(0.0);
            return;
        };

        let frames = source.pull(out);
        self.shared
            .position_frames
            .fetch_add(frames as u64, Ordering::Relaxed);
    }

    /// Replaces the installed source, returning the previous one.
    ///
    /// The previous source is stopped first; the caller is responsible for
    /// dropping it somewhere it may block on the worker join. Never blocks.
    pub fn set_source(&mut self, source: Option<StreamingSource>) -> Option<StreamingSource> {
        if let Some(old) = self.source.as_mut() {
            old.stop();
        }
        let old = self.source.take();

        let (rate, length) = source
            .as_ref()
            .map(|s| (s.sample_rate(), s.total_frames().unwrap_or(0)))
            .unwrap_or((0, 0));
        self.shared.source_rate.store(rate, Ordering::Release);
        self.shared.length_frames.store(length, Ordering::Relaxed);
        self.shared.position_frames.store(0, Ordering::Relaxed);

        self.source = source;
        old
    }

    pub fn source(&self) -> Option<&StreamingSource> {
        self.source.as_ref()
    }

    /// Starts the source's read-ahead worker. Not for the real-time thread.
    pub fn prepare(&mut self) {
        if let Some(source) = self.source.as_mut() {
            if let Err(e) = source.start() {
                tracing::error!("failed to start audio read-ahead: {}", e);
            }
        }
    }

    /// Stops and joins the read-ahead worker. Buffered audio is kept.
    pub fn release(&mut self) {
        if let Some(source) = self.source.as_mut() {
            source.join();
        }
    }
}

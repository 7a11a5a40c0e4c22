//! Background-buffered audio streaming.
//!
//! A [`StreamingSource`] owns a decoded-audio reader and a fixed-size
//! look-ahead ring buffer. A dedicated worker thread keeps the buffer
//! topped up from the reader, so the real-time side only ever copies
//! frames out of memory.
//!
//! The worker owns the reader and the producer half of the ring while it
//! runs and hands both back when it is joined, which is what lets a
//! released source be prepared again without losing its read position.

use super::reader::{open_reader, AudioReader, Frame, SourceError};
use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Default look-ahead depth in frames.
pub const DEFAULT_READ_AHEAD_FRAMES: usize = 32768;

/// Largest chunk decoded per worker iteration.
const READ_CHUNK_FRAMES: usize = 2048;

/// Worker sleep while the buffer is full.
const IDLE_WAIT: Duration = Duration::from_millis(5);

/// Flags shared between the source and its worker.
#[derive(Debug, Default)]
struct WorkerShared {
    shutdown: AtomicBool,
    /// Set once the reader reported end of stream (or failed).
    exhausted: AtomicBool,
    running: AtomicUsize,
}

/// Everything the worker needs; returned to the source on join.
struct ReadAhead {
    reader: Box<dyn AudioReader>,
    producer: HeapProd<Frame>,
    scratch: Vec<Frame>,
}

/// An audio file streamed through a background look-ahead buffer.
pub struct StreamingSource {
    consumer: HeapCons<Frame>,
    /// Worker state while no worker is running.
    idle: Option<ReadAhead>,
    worker: Option<JoinHandle<ReadAhead>>,
    shared: Arc<WorkerShared>,
    channels: u16,
    sample_rate: u32,
    total_frames: Option<u64>,
    frames_played: u64,
    underruns: u64,
}

impl StreamingSource {
    /// Wraps a reader with a look-ahead buffer of `capacity_frames`.
    ///
    /// The worker is not started until [`start`](Self::start) is called.
    pub fn new(reader: Box<dyn AudioReader>, capacity_frames: usize) -> Self {
        let capacity = capacity_frames.max(READ_CHUNK_FRAMES);
        let (producer, consumer) = HeapRb::<Frame>::new(capacity).split();

        Self {
            channels: reader.channels(),
            sample_rate: reader.sample_rate(),
            total_frames: reader.total_frames(),
            consumer,
            idle: Some(ReadAhead {
                reader,
                producer,
                scratch: Vec::with_capacity(READ_CHUNK_FRAMES),
            }),
            worker: None,
            shared: Arc::new(WorkerShared::default()),
            frames_played: 0,
            underruns: 0,
        }
    }

    /// Opens an audio file and wraps it in a (not yet started) source.
    pub fn open<P: AsRef<Path>>(path: P, capacity_frames: usize) -> Result<Self, SourceError> {
        Ok(Self::new(open_reader(path)?, capacity_frames))
    }

    /// Starts the read-ahead worker. Does nothing if one is already running.
    pub fn start(&mut self) -> Result<(), SourceError> {
        if self.worker.is_some() {
            return Ok(());
        }
        let Some(state) = self.idle.take() else {
            return Ok(());
        };

        self.shared.shutdown.store(false, Ordering::Release);
        self.shared.running.fetch_add(1, Ordering::AcqRel);

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("audio-read-ahead".into())
            .spawn(move || read_ahead_loop(state, shared));

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.running.fetch_sub(1, Ordering::AcqRel);
                Err(SourceError::Io(e))
            }
        }
    }

    /// Asks the worker to exit. Never blocks; safe on the real-time thread.
    pub fn stop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
    }

    /// Stops the worker and waits for it, keeping buffered frames.
    pub fn join(&mut self) {
        self.stop();
        if let Some(handle) = self.worker.take() {
            match handle.join() {
                Ok(state) => self.idle = Some(state),
                Err(_) => tracing::error!("audio read-ahead worker panicked"),
            }
        }
    }

    /// Copies the next frames into `out` (interleaved stereo).
    ///
    /// Missing frames are zero-filled. Returns how many frames came from
    /// the buffer. A short read before the reader is exhausted counts as
    /// an underrun.
    pub fn pull(&mut self, out: &mut [f32]) -> usize {
        let mut filled = 0;
        let mut wanted = 0;

        let mut frames = out.chunks_exact_mut(2);
        for frame in frames.by_ref() {
            wanted += 1;
            match self.consumer.try_pop() {
                Some((left, right)) => {
                    frame[0] = left;
                    frame[1] = right;
                    filled += 1;
                }
                None => {
                    frame[0] = 0.0;
                    frame[1] = 0.0;
                }
            }
        }

        frames.into_remainder().fill(0.0);

        if filled < wanted && !self.shared.exhausted.load(Ordering::Acquire) {
            self.underruns += 1;
        }
        self.frames_played += filled as u64;
        filled
    }

    /// Frames currently waiting in the look-ahead buffer.
    pub fn buffered(&self) -> usize {
        self.consumer.occupied_len()
    }

    pub fn capacity(&self) -> usize {
        self.consumer.capacity().get()
    }

    /// True once every frame of the file has been played.
    pub fn is_finished(&self) -> bool {
        self.shared.exhausted.load(Ordering::Acquire) && self.consumer.is_empty()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Number of live read-ahead workers for this source (0 or 1).
    pub fn running_workers(&self) -> usize {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn total_frames(&self) -> Option<u64> {
        self.total_frames
    }

    pub fn frames_played(&self) -> u64 {
        self.frames_played
    }

    pub fn underruns(&self) -> u64 {
        self.underruns
    }
}

impl Drop for StreamingSource {
    fn drop(&mut self) {
        self.join();
    }
}

fn read_ahead_loop(mut state: ReadAhead, shared: Arc<WorkerShared>) -> ReadAhead {
    while !shared.shutdown.load(Ordering::Acquire) {
        if shared.exhausted.load(Ordering::Acquire) {
            break;
        }

        let vacant = state.producer.vacant_len();
        if vacant == 0 {
            thread::sleep(IDLE_WAIT);
            continue;
        }

        state.scratch.clear();
        match state
            .reader
            .read_frames(&mut state.scratch, vacant.min(READ_CHUNK_FRAMES))
        {
            Ok(0) => shared.exhausted.store(true, Ordering::Release),
            Ok(_) => {
                state.producer.push_slice(&state.scratch);
            }
            Err(e) => {
                tracing::warn!("audio read-ahead stopped: {}", e);
                shared.exhausted.store(true, Ordering::Release);
            }
        }
    }

    shared.running.fetch_sub(1, Ordering::AcqRel);
    state
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audio::reader::tests::{ramp_value, write_ramp_wav};
    use std::time::Instant;

    /// In-memory reader producing `frames` frames where frame `i` = (i, -i).
    pub(crate) struct RampReader {
        next: u64,
        frames: u64,
    }

    impl RampReader {
        pub(crate) fn new(frames: u64) -> Self {
            Self { next: 0, frames }
        }
    }

    impl AudioReader for RampReader {
        fn channels(&self) -> u16 {
            2
        }

        fn sample_rate(&self) -> u32 {
            44100
        }

        fn total_frames(&self) -> Option<u64> {
            Some(self.frames)
        }

        fn read_frames(&mut self, out: &mut Vec<Frame>, max: usize) -> Result<usize, SourceError> {
            let n = (self.frames - self.next).min(max as u64);
            for i in self.next..self.next + n {
                out.push((i as f32, -(i as f32)));
            }
            self.next += n;
            Ok(n as usize)
        }
    }

    pub(crate) fn wait_for_buffered(source: &StreamingSource, frames: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while source.buffered() < frames && !source.shared.exhausted.load(Ordering::Acquire) {
            assert!(Instant::now() < deadline, "read-ahead never filled");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_fills_up_to_capacity() {
        let mut source = StreamingSource::new(Box::new(RampReader::new(100_000)), 4096);
        source.start().unwrap();
        wait_for_buffered(&source, 4096);

        assert_eq!(source.buffered(), source.capacity());
        assert!(!source.is_finished());
    }

    #[test]
    fn test_pull_in_order() {
        let mut source = StreamingSource::new(Box::new(RampReader::new(10_000)), 4096);
        source.start().unwrap();
        wait_for_buffered(&source, 512);

        let mut out = vec![0.0; 512 * 2];
        assert_eq!(source.pull(&mut out), 512);
        assert_eq!(&out[..4], &[0.0, 0.0, 1.0, -1.0]);
        assert_eq!(out[1022], 511.0);
        assert_eq!(source.frames_played(), 512);
        assert_eq!(source.underruns(), 0);
    }

    #[test]
    fn test_end_of_stream_zero_fills() {
        let mut source = StreamingSource::new(Box::new(RampReader::new(100)), 4096);
        source.start().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !source.shared.exhausted.load(Ordering::Acquire) {
            assert!(Instant::now() < deadline, "reader never exhausted");
            thread::sleep(Duration::from_millis(1));
        }

        let mut out = vec![1.0; 256 * 2];
        assert_eq!(source.pull(&mut out), 100);
        assert!(out[200..].iter().all(|&s| s == 0.0));
        assert!(source.is_finished());
        assert_eq!(source.underruns(), 0);
    }

    #[test]
    fn test_underrun_without_worker() {
        let mut source = StreamingSource::new(Box::new(RampReader::new(100)), 4096);

        let mut out = vec![1.0; 64];
        assert_eq!(source.pull(&mut out), 0);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(source.underruns(), 1);
    }

    #[test]
    fn test_odd_length_tail_is_zeroed() {
        let mut source = StreamingSource::new(Box::new(RampReader::new(10_000)), 4096);
        source.start().unwrap();
        wait_for_buffered(&source, 8);

        let mut out = vec![9.0; 7];
        assert_eq!(source.pull(&mut out), 3);
        assert_eq!(&out[..6], &[0.0, 0.0, 1.0, -1.0, 2.0, -2.0]);
        assert_eq!(out[6], 0.0);
    }

    #[test]
    fn test_capacity_floor() {
        let source = StreamingSource::new(Box::new(RampReader::new(100)), 16);
        assert_eq!(source.capacity(), READ_CHUNK_FRAMES);
    }

    #[test]
    fn test_start_is_idempotent() {
        let mut source = StreamingSource::new(Box::new(RampReader::new(1_000_000)), 4096);
        source.start().unwrap();
        source.start().unwrap();
        assert_eq!(source.running_workers(), 1);

        source.join();
        assert_eq!(source.running_workers(), 0);
        assert!(!source.is_running());
    }

    #[test]
    fn test_restart_resumes_position() {
        let mut source = StreamingSource::new(Box::new(RampReader::new(1_000_000)), 4096);
        source.start().unwrap();
        wait_for_buffered(&source, 4096);

        let mut out = vec![0.0; 1000 * 2];
        source.pull(&mut out);

        source.join();
        source.join();
        source.start().unwrap();
        source.start().unwrap();
        assert_eq!(source.running_workers(), 1);
        wait_for_buffered(&source, 4096);
        source.join();

        // Nothing skipped or repeated across the restart.
        let mut out = vec![0.0; 8192 * 2];
        assert_eq!(source.pull(&mut out), 4096);
        for i in 0..4096 {
            assert_eq!(out[i * 2], (1000 + i) as f32);
        }
    }

    #[test]
    fn test_streams_wav_file() {
        let path = write_ramp_wav("stream", 1, 6000);
        let mut source = StreamingSource::open(&path, 8192).unwrap();
        assert_eq!(source.total_frames(), Some(6000));
        source.start().unwrap();
        wait_for_buffered(&source, 6000);

        let mut out = vec![0.0; 6000 * 2];
        assert_eq!(source.pull(&mut out), 6000);
        assert_eq!(out[5999 * 2], ramp_value(5999));
        assert_eq!(out[5999 * 2 + 1], ramp_value(5999));
        let _ = std::fs::remove_file(path);
    }
}

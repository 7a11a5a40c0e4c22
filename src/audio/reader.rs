//! Decoded audio readers.
//!
//! Provides the [`AudioReader`] abstraction the streaming source pulls
//! from, plus the two decoders the player registers: hound for WAV files
//! and rodio's generic decoder for compressed formats (FLAC, Ogg, MP3).

use hound::{SampleFormat, WavReader};
use rodio::{Decoder, Source};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// One stereo output frame (left, right).
pub type Frame = (f32, f32);

/// Errors that can occur while opening or decoding an audio file.
#[derive(Debug, Error)]
pub enum SourceError {
    /// File could not be opened.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No registered decoder accepts the file.
    #[error("no decoder available for {}", .0.display())]
    ReaderUnavailable(PathBuf),

    /// Decoding failed part-way through the stream.
    #[error("decode error: {0}")]
    Decode(String),

    /// The player did not accept the source.
    #[error("player rejected the audio source: {0}")]
    Rejected(&'static str),
}

/// A decoded audio stream read sequentially from start to end.
pub trait AudioReader: Send {
    /// Number of channels in the file.
    fn channels(&self) -> u16;

    /// Sample rate of the file in Hz.
    fn sample_rate(&self) -> u32;

    /// Total length in frames, if known.
    fn total_frames(&self) -> Option<u64>;

    /// Reads up to `max` frames, appending them to `out` as stereo.
    ///
    /// Returns the number of frames appended. Zero means end of stream.
    fn read_frames(&mut self, out: &mut Vec<Frame>, max: usize) -> Result<usize, SourceError>;
}

/// Folds interleaved samples into stereo frames.
///
/// Mono is duplicated to both sides; channels past the second are dropped.
struct FrameAssembler {
    channels: usize,
    index: usize,
    left: f32,
    right: f32,
}

impl FrameAssembler {
    fn new(channels: u16) -> Self {
        Self {
            channels: channels.max(1) as usize,
            index: 0,
            left: 0.0,
            right: 0.0,
        }
    }

    fn push(&mut self, sample: f32) -> Option<Frame> {
        match self.index {
            0 => self.left = sample,
            1 => self.right = sample,
            _ => {}
        }
        self.index += 1;

        if self.index < self.channels {
            return None;
        }
        self.index = 0;
        if self.channels == 1 {
            Some((self.left, self.left))
        } else {
            Some((self.left, self.right))
        }
    }
}

/// WAV reader backed by hound. Handles integer and float PCM.
pub struct WavFileReader {
    reader: WavReader<BufReader<File>>,
    channels: u16,
    sample_rate: u32,
    format: SampleFormat,
    /// Full-scale value for integer samples.
    scale: f32,
    total_frames: u64,
}

impl WavFileReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SourceError> {
        let reader = WavReader::open(path.as_ref()).map_err(|e| match e {
            hound::Error::IoError(io) => SourceError::Io(io),
            _ => SourceError::ReaderUnavailable(path.as_ref().to_path_buf()),
        })?;
        let spec = reader.spec();
        let total_frames = reader.duration() as u64;

        Ok(Self {
            channels: spec.channels,
            sample_rate: spec.sample_rate,
            format: spec.sample_format,
            scale: (1u64 << (spec.bits_per_sample.max(1) - 1)) as f32,
            total_frames,
            reader,
        })
    }
}

impl AudioReader for WavFileReader {
    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_frames(&self) -> Option<u64> {
        Some(self.total_frames)
    }

    fn read_frames(&mut self, out: &mut Vec<Frame>, max: usize) -> Result<usize, SourceError> {
        let mut assembler = FrameAssembler::new(self.channels);
        let wanted = max * self.channels as usize;
        let before = out.len();

        match self.format {
            SampleFormat::Float => {
                for sample in self.reader.samples::<f32>().take(wanted) {
                    let sample = sample.map_err(|e| SourceError::Decode(e.to_string()))?;
                    out.extend(assembler.push(sample));
                }
            }
            SampleFormat::Int => {
                let scale = self.scale;
                for sample in self.reader.samples::<i32>().take(wanted) {
                    let sample = sample.map_err(|e| SourceError::Decode(e.to_string()))?;
                    out.extend(assembler.push(sample as f32 / scale));
                }
            }
        }

        Ok(out.len() - before)
    }
}

/// Reader for any format rodio's decoder recognizes.
pub struct DecoderReader {
    decoder: Decoder<BufReader<File>>,
    channels: u16,
    sample_rate: u32,
    total_frames: Option<u64>,
}

impl DecoderReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SourceError> {
        let path = path.as_ref();
        let file = BufReader::new(File::open(path)?);
        let decoder =
            Decoder::new(file).map_err(|_| SourceError::ReaderUnavailable(path.to_path_buf()))?;

        let channels = decoder.channels();
        let sample_rate = decoder.sample_rate();
        let total_frames = decoder
            .total_duration()
            .map(|d| (d.as_secs_f64() * sample_rate as f64).round() as u64);

        Ok(Self {
            decoder,
            channels,
            sample_rate,
            total_frames,
        })
    }
}

impl AudioReader for DecoderReader {
    fn channels(&self) -> u16 {
        self.channels
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn total_frames(&self) -> Option<u64> {
        self.total_frames
    }

    fn read_frames(&mut self, out: &mut Vec<Frame>, max: usize) -> Result<usize, SourceError> {
        let mut assembler = FrameAssembler::new(self.channels);
        let wanted = max * self.channels as usize;
        let before = out.len();

        for sample in self.decoder.by_ref().take(wanted) {
            out.extend(assembler.push(sample as f32 / 32768.0));
        }

        Ok(out.len() - before)
    }
}

/// Opens a reader for an audio file.
///
/// WAV files go through hound; everything else (and WAV variants hound
/// rejects) falls back to rodio's decoder, which sniffs the content.
///
/// # Errors
///
/// Returns `SourceError::Io` if the file cannot be opened and
/// `SourceError::ReaderUnavailable` if no decoder accepts it.
pub fn open_reader<P: AsRef<Path>>(path: P) -> Result<Box<dyn AudioReader>, SourceError> {
    let path = path.as_ref();

    let is_wav = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("wav") || e.eq_ignore_ascii_case("wave"))
        .unwrap_or(false);

    if is_wav {
        match WavFileReader::open(path) {
            Ok(reader) => return Ok(Box::new(reader)),
            Err(SourceError::Io(e)) => return Err(SourceError::Io(e)),
            Err(e) => tracing::debug!("hound rejected {}: {}", path.display(), e),
        }
    }

    Ok(Box::new(DecoderReader::open(path)?))
}

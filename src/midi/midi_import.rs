//! Standard MIDI File (SMF) loading.
//!
//! Reads .mid and .midi files into an immutable [`Timeline`] whose event
//! timestamps are already converted from ticks to seconds.
//! Supports SMF Format 0, 1 and 2.
//!
//! # Conversion rules
//!
//! - Tempo changes from every track form one shared tempo map
//! - SMPTE timecode files convert ticks directly and ignore tempo
//! - Channel messages and SysEx are kept as raw bytes
//! - Meta events are not kept, but they extend the track end time

use super::timeline::{Event, Timeline, Track};
use midly::live::LiveEvent;
use midly::{MetaMessage, Smf, Timing, TrackEventKind};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Tempo assumed until the first tempo meta event (120 BPM).
pub const DEFAULT_USEC_PER_BEAT: u32 = 500_000;

/// Errors that can occur while loading a timeline.
#[derive(Debug, Error)]
pub enum LoadError {
    /// File could not be read.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// File contents are not a valid Standard MIDI File.
    #[error("invalid MIDI file: {0}")]
    InvalidFormat(String),
}

/// Loads a MIDI file from disk and converts it to a timeline.
///
/// # Errors
///
/// Returns `LoadError::Io` if the file cannot be read and
/// `LoadError::InvalidFormat` if it cannot be parsed.
pub fn load_timeline<P: AsRef<Path>>(path: P) -> Result<Timeline, LoadError> {
    let data = fs::read(path.as_ref())?;
    parse_timeline(&data)
}

/// Parses SMF bytes into a timeline.
pub fn parse_timeline(data: &[u8]) -> Result<Timeline, LoadError> {
    let smf = Smf::parse(data).map_err(|e| LoadError::InvalidFormat(e.to_string()))?;

    let clock = TickClock::from_smf(&smf);

    let tracks = smf
        .tracks
        .iter()
        .map(|track| convert_track(track, &clock))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Timeline::from_tracks(tracks))
}

fn convert_track(track: &[midly::TrackEvent], clock: &TickClock) -> Result<Track, LoadError> {
    let mut out = Track::new();
    let mut tick: u64 = 0;

    for event in track {
        tick += event.delta.as_int() as u64;
        let time = clock.seconds_at(tick);

        match event.kind {
            TrackEventKind::Midi { channel, message } => {
                let mut bytes = Vec::with_capacity(3);
                LiveEvent::Midi { channel, message }
                    .write_std(&mut bytes)
                    .map_err(|e| LoadError::InvalidFormat(e.to_string()))?;
                out.push(Event::new(time, bytes));
            }
            TrackEventKind::SysEx(data) => {
                let mut bytes = Vec::with_capacity(data.len() + 1);
                bytes.push(0xF0);
                bytes.extend_from_slice(data);
                out.push(Event::new(time, bytes));
            }
            TrackEventKind::Meta(meta) => {
                if let MetaMessage::TrackName(name) = meta {
                    if out.name.is_none() {
                        out.name = Some(String::from_utf8_lossy(name).into_owned());
                    }
                }
                out.extend_end_time(time);
            }
            TrackEventKind::Escape(_) => out.extend_end_time(time),
        }
    }

    Ok(out)
}

/// Converts absolute tick positions to seconds.
#[derive(Debug, Clone)]
enum TickClock {
    /// Metrical timing driven by a tempo map.
    Metrical(TempoMap),
    /// SMPTE timing: a fixed number of ticks per second.
    Timecode { ticks_per_second: f64 },
}

impl TickClock {
    fn from_smf(smf: &Smf) -> Self {
        match smf.header.timing {
            Timing::Metrical(tpb) => {
                let mut changes = Vec::new();
                for track in &smf.tracks {
                    let mut tick: u64 = 0;
                    for event in track {
                        tick += event.delta.as_int() as u64;
                        if let TrackEventKind::Meta(MetaMessage::Tempo(usec)) = event.kind {
                            changes.push((tick, usec.as_int()));
                        }
                    }
                }
                TickClock::Metrical(TempoMap::new(tpb.as_int(), changes))
            }
            Timing::Timecode(fps, subframes) => TickClock::Timecode {
                ticks_per_second: (fps.as_f32() as f64 * subframes as f64).max(1.0),
            },
        }
    }

    fn seconds_at(&self, tick: u64) -> f64 {
        match self {
            TickClock::Metrical(map) => map.seconds_at(tick),
            TickClock::Timecode { ticks_per_second } => tick as f64 / ticks_per_second,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct TempoSegment {
    tick: u64,
    seconds: f64,
    usec_per_beat: u32,
}

/// Piecewise-constant tempo map.
#[derive(Debug, Clone)]
struct TempoMap {
    ticks_per_beat: f64,
    /// Sorted by tick; the first segment always starts at tick 0.
    segments: Vec<TempoSegment>,
}

impl TempoMap {
    fn new(ticks_per_beat: u16, mut changes: Vec<(u64, u32)>) -> Self {
        // Stable: a later change at the same tick wins.
        changes.sort_by_key(|&(tick, _)| tick);

        let ticks_per_beat = ticks_per_beat.max(1) as f64;
        let mut segments = vec![TempoSegment {
            tick: 0,
            seconds: 0.0,
            usec_per_beat: DEFAULT_USEC_PER_BEAT,
        }];

        for (tick, usec_per_beat) in changes {
            let Some(last) = segments.last().copied() else {
                continue;
            };
            let seconds = last.seconds
                + (tick - last.tick) as f64 * last.usec_per_beat as f64
                    / 1_000_000.0
                    / ticks_per_beat;

            if tick == last.tick {
                segments.pop();
            }
            segments.push(TempoSegment {
                tick,
                seconds,
                usec_per_beat,
            });
        }

        Self {
            ticks_per_beat,
            segments,
        }
    }

    fn seconds_at(&self, tick: u64) -> f64 {
        let idx = self.segments.partition_point(|s| s.tick <= tick);
        let seg = self.segments[idx.saturating_sub(1)];
        seg.seconds
            + (tick - seg.tick) as f64 * seg.usec_per_beat as f64 / 1_000_000.0 / self.ticks_per_beat
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use midly::num::{u15, u24, u28, u4, u7};
    use midly::{Format, Fps, Header, MidiMessage, TrackEvent};
    use std::path::PathBuf;

    pub(crate) fn note_on<'a>(delta: u32, key: u8) -> TrackEvent<'a> {
        TrackEvent {
            delta: u28::new(delta),
            kind: TrackEventKind::Midi {
                channel: u4::new(0),
                message: MidiMessage::NoteOn {
                    key: u7::new(key),
                    vel: u7::new(100),
                },
            },
        }
    }

    pub(crate) fn note_off<'a>(delta: u32, key: u8) -> TrackEvent<'a> {
        TrackEvent {
            delta: u28::new(delta),
            kind: TrackEventKind::Midi {
                channel: u4::new(0),
                message: MidiMessage::NoteOff {
                    key: u7::new(key),
                    vel: u7::new(0),
                },
            },
        }
    }

    pub(crate) fn end_of_track<'a>(delta: u32) -> TrackEvent<'a> {
        TrackEvent {
            delta: u28::new(delta),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        }
    }

    fn tempo<'a>(delta: u32, usec: u32) -> TrackEvent<'a> {
        TrackEvent {
            delta: u28::new(delta),
            kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(usec))),
        }
    }

    /// Writes a format 1 file at 480 ticks per beat into the temp directory.
    pub(crate) fn write_smf(name: &str, tracks: Vec<Vec<TrackEvent<'_>>>) -> PathBuf {
        let smf = Smf {
            header: Header::new(Format::Parallel, Timing::Metrical(u15::new(480))),
            tracks,
        };
        let path = std::env::temp_dir().join(format!("midiplay-{}-{}.mid", name, std::process::id()));
        smf.save(&path).unwrap();
        path
    }

    fn encode(tracks: Vec<Vec<TrackEvent<'_>>>) -> Vec<u8> {
        let smf = Smf {
            header: Header::new(Format::Parallel, Timing::Metrical(u15::new(480))),
            tracks,
        };
        let mut data = Vec::new();
        smf.write_std(&mut data).unwrap();
        data
    }

    #[test]
    fn test_default_tempo_conversion() {
        // 480 ticks at 120 BPM = 0.5 seconds
        let data = encode(vec![vec![
            note_on(0, 60),
            note_off(480, 60),
            end_of_track(480),
        ]]);
        let timeline = parse_timeline(&data).unwrap();

        assert_eq!(timeline.track_count(), 1);
        let track = timeline.track(0).unwrap();
        let times: Vec<f64> = track.events().iter().map(|e| e.time).collect();
        assert_eq!(times, vec![0.0, 0.5]);
        assert!((track.end_time() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_raw_bytes_preserved() {
        let data = encode(vec![vec![note_on(0, 60), note_off(10, 60)]]);
        let timeline = parse_timeline(&data).unwrap();
        let events = timeline.track(0).unwrap().events();

        assert_eq!(events[0].bytes(), &[0x90, 60, 100]);
        assert_eq!(events[1].bytes(), &[0x80, 60, 0]);
    }

    #[test]
    fn test_tempo_map_from_conductor_track() {
        // Tempo doubles (60 BPM -> 120 BPM) at beat 1
        let data = encode(vec![
            vec![tempo(0, 1_000_000), tempo(480, 500_000), end_of_track(0)],
            vec![note_on(0, 60), note_on(480, 62), note_on(480, 64)],
        ]);
        let timeline = parse_timeline(&data).unwrap();

        assert_eq!(timeline.track_count(), 2);
        assert!(timeline.track(0).unwrap().events().is_empty());

        let times: Vec<f64> = timeline
            .track(1)
            .unwrap()
            .events()
            .iter()
            .map(|e| e.time)
            .collect();
        assert!((times[0] - 0.0).abs() < 1e-9);
        assert!((times[1] - 1.0).abs() < 1e-9);
        assert!((times[2] - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_track_name_and_sysex() {
        let data = encode(vec![vec![
            TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Meta(MetaMessage::TrackName(b"Lead")),
            },
            TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::SysEx(&[0x7E, 0x7F, 0x09, 0x01, 0xF7]),
            },
        ]]);
        let timeline = parse_timeline(&data).unwrap();
        let track = timeline.track(0).unwrap();

        assert_eq!(track.name.as_deref(), Some("Lead"));
        assert_eq!(track.events()[0].bytes(), &[0xF0, 0x7E, 0x7F, 0x09, 0x01, 0xF7]);
    }

    #[test]
    fn test_timecode_timing() {
        // 25 fps at 40 ticks per frame = 1000 ticks per second; tempo is ignored.
        let smf = Smf {
            header: Header::new(Format::SingleTrack, Timing::Timecode(Fps::Fps25, 40)),
            tracks: vec![vec![
                tempo(0, 250_000),
                note_on(0, 60),
                note_off(1000, 60),
                end_of_track(500),
            ]],
        };
        let mut data = Vec::new();
        smf.write_std(&mut data).unwrap();

        let timeline = parse_timeline(&data).unwrap();
        let track = timeline.track(0).unwrap();
        let times: Vec<f64> = track.events().iter().map(|e| e.time).collect();
        assert_eq!(times, vec![0.0, 1.0]);
        assert_eq!(track.end_time(), 1.5);
    }

    #[test]
    fn test_zero_tracks() {
        let timeline = parse_timeline(&encode(Vec::new())).unwrap();
        assert_eq!(timeline.track_count(), 0);
        assert_eq!(timeline, Timeline::empty());
    }

    #[test]
    fn test_invalid_format() {
        let result = parse_timeline(b"definitely not a midi file");
        assert!(matches!(result, Err(LoadError::InvalidFormat(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = load_timeline("/nonexistent/midiplay/missing.mid");
        assert!(matches!(result, Err(LoadError::Io(_))));
    }

    #[test]
    fn test_load_from_disk() {
        let path = write_smf(
            "import",
            vec![vec![note_on(0, 60)], vec![note_on(0, 62)], vec![]],
        );
        let timeline = load_timeline(&path).unwrap();
        assert_eq!(timeline.track_count(), 3);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_tempo_segments() {
        let map = TempoMap::new(480, vec![(960, 250_000), (0, 1_000_000)]);
        assert!((map.seconds_at(480) - 1.0).abs() < 1e-9);
        assert!((map.seconds_at(960) - 2.0).abs() < 1e-9);
        assert!((map.seconds_at(1440) - 2.25).abs() < 1e-9);
    }
}

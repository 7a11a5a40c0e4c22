//! Loaded MIDI timeline representation.
//!
//! A timeline is a list of tracks, each holding raw MIDI messages stamped
//! in seconds from the start of the file. Timelines are built once by the
//! importer and never mutated afterwards; a new load always produces a
//! fresh `Timeline`.

/// A single timed MIDI message.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Seconds since the start of the timeline.
    pub time: f64,

    /// Complete raw message bytes, status byte included.
    bytes: Vec<u8>,
}

impl Event {
    /// Creates an event from a timestamp and raw message bytes.
    pub fn new(time: f64, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            time,
            bytes: bytes.into(),
        }
    }

    /// Returns the raw message payload.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// One ordered sequence of events within a timeline.
///
/// Events are kept in non-decreasing timestamp order. `end_time` may lie
/// past the last event to represent trailing silence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Track {
    /// Track name from the file's name meta event, if any.
    pub name: Option<String>,

    events: Vec<Event>,

    end_time: f64,
}

impl Track {
    /// Creates an empty track.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a track from events that are already in timestamp order.
    ///
    /// The end time is clamped so it never precedes the last event.
    pub fn from_events(events: Vec<Event>, end_time: f64) -> Self {
        let last = events.last().map_or(0.0, |e| e.time);
        debug_assert!(events.windows(2).all(|w| w[0].time <= w[1].time));
        Self {
            name: None,
            events,
            end_time: end_time.max(last),
        }
    }

    /// Appends an event, keeping timestamp order.
    ///
    /// Events at an equal timestamp keep their insertion order.
    pub fn push(&mut self, event: Event) {
        let pos = self.events.partition_point(|e| e.time <= event.time);
        self.end_time = self.end_time.max(event.time);
        self.events.insert(pos, event);
    }

    /// Extends the conceptual end of the track (trailing silence).
    pub fn extend_end_time(&mut self, time: f64) {
        self.end_time = self.end_time.max(time);
    }

    /// Returns all events in stored order.
    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Returns the end of the track in seconds.
    pub fn end_time(&self) -> f64 {
        self.end_time
    }

    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    /// Returns events whose timestamp lies in `[start, end)`, in stored order.
    pub fn events_in_window(&self, start: f64, end: f64) -> impl Iterator<Item = &Event> {
        self.events
            .iter()
            .filter(move |e| e.time >= start && e.time < end)
    }
}

/// An immutable multi-track timeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timeline {
    tracks: Vec<Track>,
}

impl Timeline {
    /// Returns an empty timeline ("nothing loaded").
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_tracks(tracks: Vec<Track>) -> Self {
        Self { tracks }
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn track(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Returns the latest end time across all tracks.
    pub fn duration(&self) -> f64 {
        self.tracks
            .iter()
            .map(Track::end_time)
            .fold(0.0, f64::max)
    }
}

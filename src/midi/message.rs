//! Outgoing MIDI messages and the block-level event buffer.
//!
//! The real-time path writes channel-mode messages (the safety flush) into
//! a [`MidiBuffer`] handed over by the host. The buffer reserves its
//! capacity up front so pushing during a block does not allocate.

/// Controller number for "All Sound Off".
pub const CC_ALL_SOUND_OFF: u8 = 120;

/// Controller number for "Reset All Controllers".
pub const CC_RESET_ALL_CONTROLLERS: u8 = 121;

/// Controller number for "All Notes Off".
pub const CC_ALL_NOTES_OFF: u8 = 123;

/// Number of MIDI channels covered by a safety flush.
pub const MIDI_CHANNELS: u8 = 16;

/// Messages emitted per channel by a safety flush.
pub const FLUSH_MESSAGES_PER_CHANNEL: usize = 3;

/// Total messages in one safety flush (16 channels x 3).
pub const FLUSH_LEN: usize = MIDI_CHANNELS as usize * FLUSH_MESSAGES_PER_CHANNEL;

/// A three-byte channel message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShortMessage([u8; 3]);

impl ShortMessage {
    /// Builds a control change. `channel` is 1-based (1-16).
    pub fn control_change(channel: u8, controller: u8, value: u8) -> Self {
        let status = 0xB0 | (channel.clamp(1, MIDI_CHANNELS) - 1);
        Self([status, controller & 0x7F, value & 0x7F])
    }

    pub fn all_notes_off(channel: u8) -> Self {
        Self::control_change(channel, CC_ALL_NOTES_OFF, 0)
    }

    pub fn all_sound_off(channel: u8) -> Self {
        Self::control_change(channel, CC_ALL_SOUND_OFF, 0)
    }

    pub fn all_controllers_off(channel: u8) -> Self {
        Self::control_change(channel, CC_RESET_ALL_CONTROLLERS, 0)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the 1-based channel number.
    pub fn channel(&self) -> u8 {
        (self.0[0] & 0x0F) + 1
    }

    pub fn controller(&self) -> u8 {
        self.0[1]
    }
}

/// Message placed at a sample offset within the current block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferedEvent {
    pub message: ShortMessage,
    pub sample_offset: usize,
}

/// Outgoing MIDI events for one audio block.
#[derive(Debug, Clone, Default)]
pub struct MidiBuffer {
    events: Vec<BufferedEvent>,
}

impl MidiBuffer {
    /// Creates a buffer sized for a few safety flushes per block.
    pub fn new() -> Self {
        Self::with_capacity(FLUSH_LEN * 4)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Vec::with_capacity(capacity),
        }
    }

    pub fn add_event(&mut self, message: ShortMessage, sample_offset: usize) {
        self.events.push(BufferedEvent {
            message,
            sample_offset,
        });
    }

    pub fn iter(&self) -> impl Iterator<Item = &BufferedEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Empties the buffer, keeping its allocation.
    pub fn clear(&mut self) {
        self.events.clear();
    }
}

/// Appends the safety flush: for channels 1 through 16, all notes off,
/// all sound off, reset all controllers.
pub fn push_safety_flush(buffer: &mut MidiBuffer) {
    for channel in 1..=MIDI_CHANNELS {
        buffer.add_event(ShortMessage::all_notes_off(channel), 0);
        buffer.add_event(ShortMessage::all_sound_off(channel), 0);
        buffer.add_event(ShortMessage::all_controllers_off(channel), 0);
    }
}

/// Timeline events captured during a block, stored back to back.
///
/// A host that writes both the flush buffer and forwarded events to one
/// port queues the events here during the block and sends them with
/// [`drain_block`] afterwards.
#[derive(Debug, Clone, Default)]
pub struct EventQueue {
    bytes: Vec<u8>,
    ends: Vec<usize>,
}

impl EventQueue {
    pub fn with_capacity(events: usize, bytes: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(bytes),
            ends: Vec::with_capacity(events),
        }
    }

    pub fn push(&mut self, event: &[u8]) {
        self.bytes.extend_from_slice(event);
        self.ends.push(self.bytes.len());
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        let mut start = 0;
        self.ends.iter().map(move |&end| {
            let event = &self.bytes[start..end];
            start = end;
            event
        })
    }

    pub fn len(&self) -> usize {
        self.ends.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ends.is_empty()
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
        self.ends.clear();
    }
}

/// Sends one block's MIDI: the flush buffer first, then the queued
/// timeline events. Both are left empty.
pub fn drain_block(midi_out: &mut MidiBuffer, events: &mut EventQueue, mut send: impl FnMut(&[u8])) {
    for event in midi_out.iter() {
        send(event.message.bytes());
    }
    for event in events.iter() {
        send(event);
    }
    midi_out.clear();
    events.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_mode_bytes() {
        assert_eq!(ShortMessage::all_notes_off(1).bytes(), &[0xB0, 123, 0]);
        assert_eq!(ShortMessage::all_sound_off(16).bytes(), &[0xBF, 120, 0]);
        assert_eq!(ShortMessage::all_controllers_off(10).bytes(), &[0xB9, 121, 0]);
        assert_eq!(ShortMessage::all_controllers_off(10).channel(), 10);
    }

    #[test]
    fn test_safety_flush_layout() {
        let mut buffer = MidiBuffer::new();
        push_safety_flush(&mut buffer);
        assert_eq!(buffer.len(), FLUSH_LEN);

        let events: Vec<_> = buffer.iter().collect();
        for (i, chunk) in events.chunks(3).enumerate() {
            let channel = i as u8 + 1;
            assert!(chunk.iter().all(|e| e.message.channel() == channel));
            assert!(chunk.iter().all(|e| e.sample_offset == 0));
            assert_eq!(chunk[0].message.controller(), CC_ALL_NOTES_OFF);
            assert_eq!(chunk[1].message.controller(), CC_ALL_SOUND_OFF);
            assert_eq!(chunk[2].message.controller(), CC_RESET_ALL_CONTROLLERS);
        }
    }

    #[test]
    fn test_event_queue() {
        let mut queue = EventQueue::with_capacity(4, 16);
        queue.push(&[0x90, 60, 100]);
        queue.push(&[0xF0, 0x7E, 0xF7]);
        queue.push(&[0xC0, 5]);
        assert_eq!(queue.len(), 3);

        let events: Vec<&[u8]> = queue.iter().collect();
        assert_eq!(events[0], [0x90u8, 60, 100]);
        assert_eq!(events[1], [0xF0u8, 0x7E, 0xF7]);
        assert_eq!(events[2], [0xC0u8, 5]);

        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.iter().count(), 0);
    }

    #[test]
    fn test_drain_block_sends_flush_first() {
        let mut midi_out = MidiBuffer::new();
        let mut queue = EventQueue::default();
        queue.push(&[0x90, 70, 100]);
        push_safety_flush(&mut midi_out);

        let mut sent: Vec<Vec<u8>> = Vec::new();
        drain_block(&mut midi_out, &mut queue, |bytes| sent.push(bytes.to_vec()));

        assert_eq!(sent.len(), FLUSH_LEN + 1);
        assert!(sent[..FLUSH_LEN].iter().all(|m| m[0] & 0xF0 == 0xB0));
        assert_eq!(sent[FLUSH_LEN], vec![0x90, 70, 100]);
        assert!(midi_out.is_empty());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut buffer = MidiBuffer::new();
        let capacity = buffer.events.capacity();
        push_safety_flush(&mut buffer);
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.events.capacity(), capacity);
    }
}

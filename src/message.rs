//! Message types crossing the engine's boundaries.
//!
//! `RawPacket` comes in from the transport, `MidiMessage` goes out to the
//! patch-execution side, and `OutgoingMessage` travels the reverse path.
//! Channels are 1-based (1..=16) on both logical surfaces; the wire nibble is
//! 0-based and the codec does the off-by-one.

use serde::{Deserialize, Serialize};

/// Identifier of a logical input source, assigned by the transport.
pub type SourceId = u32;

/// One transport delivery unit: an ordered byte buffer plus a hardware
/// timestamp in opaque ticks. Timestamp 0 means the transport could not
/// supply one (asynchronous SysEx continuations do this).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawPacket {
    pub source: SourceId,
    pub timestamp: u64,
    pub bytes: Vec<u8>,
}

impl RawPacket {
    pub fn new(source: SourceId, timestamp: u64, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            source,
            timestamp,
            bytes: bytes.into(),
        }
    }
}

/// Payload of a decoded logical message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    NoteOn { pitch: u8, velocity: u8 },
    NoteOff { pitch: u8, velocity: u8 },
    ControlChange { controller: u8, value: u8 },
    ProgramChange { value: u8 },
    /// 14-bit value, 0..=16383, center 8192.
    PitchBend { value: u16 },
    Aftertouch { value: u8 },
    PolyAftertouch { pitch: u8, value: u8 },
    /// One SysEx payload byte; a logical SysEx is emitted byte-by-byte.
    SysexByte { byte: u8 },
    /// Fallback for system bytes with no structured mapping.
    RawByte { byte: u8 },
}

/// A decoded logical MIDI message with its inter-message delta time.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MidiMessage {
    /// Elapsed milliseconds since the previous dispatched message from the
    /// same source. 0 for the first message ever seen and for SysEx
    /// continuation bytes.
    pub delta_ms: f64,
    /// 1-based channel; system messages report 1 by convention.
    pub channel: u8,
    pub kind: MessageKind,
}

impl MidiMessage {
    pub fn new(delta_ms: f64, channel: u8, kind: MessageKind) -> Self {
        Self {
            delta_ms,
            channel,
            kind,
        }
    }

    #[inline]
    pub fn is_note_on(&self) -> bool {
        matches!(self.kind, MessageKind::NoteOn { velocity, .. } if velocity > 0)
    }

    #[inline]
    pub fn is_note_off(&self) -> bool {
        matches!(
            self.kind,
            MessageKind::NoteOff { .. } | MessageKind::NoteOn { velocity: 0, .. }
        )
    }

    #[inline]
    pub fn pitch(&self) -> Option<u8> {
        match self.kind {
            MessageKind::NoteOn { pitch, .. }
            | MessageKind::NoteOff { pitch, .. }
            | MessageKind::PolyAftertouch { pitch, .. } => Some(pitch),
            _ => None,
        }
    }
}

/// Payload of an outgoing command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutgoingKind {
    NoteOn { pitch: u8, velocity: u8 },
    ControlChange { controller: u8, value: u8 },
    ProgramChange { value: u8 },
    PitchBend { value: u16 },
    Aftertouch { value: u8 },
    PolyAftertouch { pitch: u8, value: u8 },
    /// Single byte passed through unencoded.
    RawByte { byte: u8 },
}

/// An outgoing command from the patch-execution side.
///
/// Constructors clamp the channel to 1..=16 and mask data bytes to 7 bits, so
/// every constructed value encodes to a valid wire message. Note-offs are
/// sent as `NoteOn` with velocity 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    /// 1-based channel.
    pub channel: u8,
    pub kind: OutgoingKind,
    /// Index into the transport's destination list; `None` broadcasts to all.
    pub destination: Option<usize>,
}

impl OutgoingMessage {
    fn with_kind(channel: u8, kind: OutgoingKind) -> Self {
        Self {
            channel: channel.clamp(1, 16),
            kind,
            destination: None,
        }
    }

    pub fn note_on(channel: u8, pitch: u8, velocity: u8) -> Self {
        Self::with_kind(
            channel,
            OutgoingKind::NoteOn {
                pitch: pitch & 0x7F,
                velocity: velocity & 0x7F,
            },
        )
    }

    pub fn note_off(channel: u8, pitch: u8) -> Self {
        Self::note_on(channel, pitch, 0)
    }

    pub fn control_change(channel: u8, controller: u8, value: u8) -> Self {
        Self::with_kind(
            channel,
            OutgoingKind::ControlChange {
                controller: controller & 0x7F,
                value: value & 0x7F,
            },
        )
    }

    pub fn program_change(channel: u8, value: u8) -> Self {
        Self::with_kind(channel, OutgoingKind::ProgramChange { value: value & 0x7F })
    }

    /// `value`: unsigned 14-bit, 0..=16383, center 8192.
    pub fn pitch_bend(channel: u8, value: u16) -> Self {
        Self::with_kind(
            channel,
            OutgoingKind::PitchBend {
                value: value.min(16383),
            },
        )
    }

    pub fn aftertouch(channel: u8, value: u8) -> Self {
        Self::with_kind(channel, OutgoingKind::Aftertouch { value: value & 0x7F })
    }

    pub fn poly_aftertouch(channel: u8, pitch: u8, value: u8) -> Self {
        Self::with_kind(
            channel,
            OutgoingKind::PolyAftertouch {
                pitch: pitch & 0x7F,
                value: value & 0x7F,
            },
        )
    }

    pub fn raw_byte(channel: u8, byte: u8) -> Self {
        Self::with_kind(channel, OutgoingKind::RawByte { byte })
    }

    /// Address a single destination instead of broadcasting.
    pub fn to(mut self, destination: usize) -> Self {
        self.destination = Some(destination);
        self
    }
}

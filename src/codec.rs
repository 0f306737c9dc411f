//! Stateless mapping between framed byte buffers and logical messages.
//!
//! Both directions consult the same status constants and the same length
//! table, so the decode and encode paths cannot drift apart. `decode` assumes
//! its input already satisfies a framing shape produced by the assembler; it
//! has no failure path, only the per-byte raw fallback.

use smallvec::{smallvec, SmallVec};

use crate::message::{MessageKind, MidiMessage, OutgoingKind, OutgoingMessage};

/// MIDI status bytes. Channel-voice values are the upper nibble; the lower
/// nibble carries the 0-based channel.
pub(crate) mod status {
    pub const NOTE_OFF: u8 = 0x80;
    pub const NOTE_ON: u8 = 0x90;
    pub const POLY_AFTERTOUCH: u8 = 0xA0;
    pub const CONTROL_CHANGE: u8 = 0xB0;
    pub const PROGRAM_CHANGE: u8 = 0xC0;
    pub const AFTERTOUCH: u8 = 0xD0;
    pub const PITCH_BEND: u8 = 0xE0;

    pub const SYSEX_START: u8 = 0xF0;
    pub const TIME_CODE: u8 = 0xF1;
    pub const SONG_POSITION: u8 = 0xF2;
    pub const SONG_SELECT: u8 = 0xF3;
    pub const SYSEX_END: u8 = 0xF7;
    pub const TIMING_CLOCK: u8 = 0xF8;
    pub const ACTIVE_SENSING: u8 = 0xFE;
}

/// Declared framed length for a message beginning with `status`.
///
/// SysEx start (0xF0) is variable-length and handled by the assembler; it is
/// reported as 0 here. Undefined system bytes frame as a single byte and fall
/// through to the raw-byte decode path.
pub(crate) fn framed_len(status: u8) -> usize {
    match status {
        0x80..=0xBF => 3,
        0xC0..=0xDF => 2,
        0xE0..=0xEF => 3,
        status::SYSEX_START => 0,
        status::TIME_CODE => 2,
        status::SONG_POSITION => 3,
        status::SONG_SELECT => 2,
        _ => 1,
    }
}

/// Map one framed buffer to logical messages.
///
/// Channel-voice buffers yield exactly one message. SysEx buffers yield one
/// `SysexByte` per payload byte, dropping the leading 0xF0 and keeping the
/// trailing 0xF7. Everything else yields one `RawByte` per byte. System
/// messages report channel 1.
pub(crate) fn decode(bytes: &[u8]) -> SmallVec<[MidiMessage; 4]> {
    let mut out = SmallVec::new();
    let Some(&first) = bytes.first() else {
        return out;
    };

    if first < status::SYSEX_START {
        let channel = (first & 0x0F) + 1;
        let kind = match first & 0xF0 {
            status::NOTE_OFF if bytes.len() == 3 => Some(MessageKind::NoteOff {
                pitch: bytes[1],
                velocity: bytes[2],
            }),
            status::NOTE_ON if bytes.len() == 3 => Some(MessageKind::NoteOn {
                pitch: bytes[1],
                velocity: bytes[2],
            }),
            status::POLY_AFTERTOUCH if bytes.len() == 3 => Some(MessageKind::PolyAftertouch {
                pitch: bytes[1],
                value: bytes[2],
            }),
            status::CONTROL_CHANGE if bytes.len() == 3 => Some(MessageKind::ControlChange {
                controller: bytes[1],
                value: bytes[2],
            }),
            status::PROGRAM_CHANGE if bytes.len() == 2 => {
                Some(MessageKind::ProgramChange { value: bytes[1] })
            }
            status::AFTERTOUCH if bytes.len() == 2 => {
                Some(MessageKind::Aftertouch { value: bytes[1] })
            }
            status::PITCH_BEND if bytes.len() == 3 => Some(MessageKind::PitchBend {
                value: bytes[1] as u16 | ((bytes[2] as u16) << 7),
            }),
            _ => None,
        };
        match kind {
            Some(kind) => out.push(MidiMessage::new(0.0, channel, kind)),
            None => raw_fallback(bytes, &mut out),
        }
    } else if first == status::SYSEX_START {
        for &byte in &bytes[1..] {
            out.push(MidiMessage::new(0.0, 1, MessageKind::SysexByte { byte }));
        }
    } else {
        raw_fallback(bytes, &mut out);
    }
    out
}

fn raw_fallback(bytes: &[u8], out: &mut SmallVec<[MidiMessage; 4]>) {
    for &byte in bytes {
        out.push(MidiMessage::new(0.0, 1, MessageKind::RawByte { byte }));
    }
}

/// Serialize an outgoing command to its framed wire bytes.
///
/// Total over valid `OutgoingMessage` values: constructors already clamp the
/// channel and mask data bytes. The channel is re-clamped here since the
/// fields are public.
pub(crate) fn encode(message: &OutgoingMessage) -> SmallVec<[u8; 3]> {
    let channel = message.channel.clamp(1, 16) - 1;
    match message.kind {
        OutgoingKind::NoteOn { pitch, velocity } => {
            smallvec![status::NOTE_ON | channel, pitch, velocity]
        }
        OutgoingKind::ControlChange { controller, value } => {
            smallvec![status::CONTROL_CHANGE | channel, controller, value]
        }
        OutgoingKind::ProgramChange { value } => {
            smallvec![status::PROGRAM_CHANGE | channel, value]
        }
        OutgoingKind::PitchBend { value } => {
            smallvec![
                status::PITCH_BEND | channel,
                (value & 0x7F) as u8,
                (value >> 7) as u8
            ]
        }
        OutgoingKind::Aftertouch { value } => {
            smallvec![status::AFTERTOUCH | channel, value]
        }
        OutgoingKind::PolyAftertouch { pitch, value } => {
            smallvec![status::POLY_AFTERTOUCH | channel, pitch, value]
        }
        OutgoingKind::RawByte { byte } => smallvec![byte],
    }
}

//! MIDI framing, filtering, and dispatch engine for patch hosts.
//!
//! Turns raw, possibly-fragmented transport packets into discrete logical
//! MIDI messages (with inter-message delta times), and serializes outgoing
//! commands back into framed byte streams for one or more destinations.
//!
//! ## Quick Start
//!
//! ```ignore
//! use patch_midi::{MidiDispatcher, OutgoingMessage, RawPacket};
//!
//! // `engine` implements PatchIntake, `ports` implements PacketTransport.
//! let midi = MidiDispatcher::builder(engine, ports).build();
//!
//! // Transport callback: hand over a delivery of packets.
//! midi.deliver(&[RawPacket::new(source, timestamp, bytes)]);
//!
//! // Patch wants to send a note to every destination.
//! midi.send(OutgoingMessage::note_on(1, 60, 100));
//! ```
//!
//! Transport connection lifecycle (discovery, pairing, session setup) lives
//! outside this crate; packets come in through [`MidiDispatcher::deliver`]
//! and encoded bytes leave through the [`PacketTransport`] seam.

pub mod error;
pub use error::{Error, Result};

mod clock;
pub use clock::ClockSource;

mod message;
pub use message::{
    MessageKind, MidiMessage, OutgoingKind, OutgoingMessage, RawPacket, SourceId,
};

mod config;
pub use config::{FilterConfig, FilterHandle};

pub(crate) mod codec;

mod assembler;
pub use assembler::MessageAssembler;

mod dispatch;
pub use dispatch::{MidiDispatcher, MidiDispatcherBuilder, PacketTransport, PatchIntake};

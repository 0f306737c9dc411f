//! Routing between the transport and the patch-execution engine.
//!
//! `MidiDispatcher` owns one `MessageAssembler` per input source and the two
//! collaborator seams: `PatchIntake` (decoded messages in) and
//! `PacketTransport` (encoded bytes out). It is `&self`-callable from the
//! transport's callback threads; sources are independent, so two sources may
//! be delivered concurrently while each source's packets stay serial.

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::warn;

use crate::assembler::MessageAssembler;
use crate::clock::ClockSource;
use crate::codec;
use crate::config::{FilterConfig, FilterHandle};
use crate::error::Result;
use crate::message::{MessageKind, MidiMessage, OutgoingMessage, RawPacket, SourceId};

/// Intake surface of the patch-execution engine. One call per decoded
/// message variant; channels are 1-based.
pub trait PatchIntake: Send {
    fn note_on(&mut self, channel: u8, pitch: u8, velocity: u8);
    fn note_off(&mut self, channel: u8, pitch: u8, velocity: u8);
    fn control_change(&mut self, channel: u8, controller: u8, value: u8);
    fn program_change(&mut self, channel: u8, value: u8);
    fn pitch_bend(&mut self, channel: u8, value: u16);
    fn aftertouch(&mut self, channel: u8, value: u8);
    fn poly_aftertouch(&mut self, channel: u8, pitch: u8, value: u8);
    fn sysex_byte(&mut self, channel: u8, byte: u8);
    fn raw_byte(&mut self, channel: u8, byte: u8);
}

/// Outbound surface of the transport: an addressable list of destinations,
/// each taking one encoded buffer per logical message.
pub trait PacketTransport: Send {
    /// Number of currently addressable output destinations.
    fn destinations(&self) -> usize;

    /// Hand one encoded message to a destination. Index is in range.
    fn send(&mut self, destination: usize, bytes: &[u8]) -> Result<()>;

    /// Passthrough toggle for the transport's network session layer.
    fn set_network_enabled(&mut self, enabled: bool);
}

pub struct MidiDispatcher<I: PatchIntake, T: PacketTransport> {
    intake: Mutex<I>,
    transport: Mutex<T>,
    clock: ClockSource,
    filters: FilterHandle,
    sources: DashMap<SourceId, MessageAssembler>,
}

pub struct MidiDispatcherBuilder<I: PatchIntake, T: PacketTransport> {
    intake: I,
    transport: T,
    clock: Option<ClockSource>,
    filters: Option<FilterHandle>,
}

impl<I: PatchIntake, T: PacketTransport> MidiDispatcherBuilder<I, T> {
    pub fn clock(mut self, clock: ClockSource) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn filters(mut self, config: FilterConfig) -> Self {
        self.filters = Some(FilterHandle::new(config));
        self
    }

    /// Share an existing handle (e.g. one owned by the settings layer).
    pub fn filter_handle(mut self, handle: FilterHandle) -> Self {
        self.filters = Some(handle);
        self
    }

    pub fn build(self) -> MidiDispatcher<I, T> {
        MidiDispatcher {
            intake: Mutex::new(self.intake),
            transport: Mutex::new(self.transport),
            clock: self.clock.unwrap_or_default(),
            filters: self.filters.unwrap_or_default(),
            sources: DashMap::new(),
        }
    }
}

impl<I: PatchIntake, T: PacketTransport> MidiDispatcher<I, T> {
    pub fn builder(intake: I, transport: T) -> MidiDispatcherBuilder<I, T> {
        MidiDispatcherBuilder {
            intake,
            transport,
            clock: None,
            filters: None,
        }
    }

    // ==================== Inbound ====================

    /// Process one transport delivery, which may carry several packets.
    /// Packets are consumed in order; decoded messages reach the intake in
    /// strict byte order of arrival. The filter flags are re-read for every
    /// packet, so an update lands between packets of the same delivery.
    pub fn deliver(&self, packets: &[RawPacket]) {
        for packet in packets {
            let filters = self.filters.snapshot();
            let messages = {
                let mut assembler = self
                    .sources
                    .entry(packet.source)
                    .or_insert_with(|| MessageAssembler::new(self.clock));
                assembler.feed(packet, filters)
            };
            if messages.is_empty() {
                continue;
            }
            let mut intake = self.intake.lock();
            for message in &messages {
                Self::forward(&mut *intake, message);
            }
        }
    }

    /// Drop the source's assembler; an in-flight SysEx continuation is
    /// abandoned with it. Returns true if the source was known.
    pub fn close_source(&self, source: SourceId) -> bool {
        self.sources.remove(&source).is_some()
    }

    /// Sources currently holding assembly state.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    fn forward(intake: &mut I, message: &MidiMessage) {
        let channel = message.channel;
        match message.kind {
            MessageKind::NoteOn { pitch, velocity } => intake.note_on(channel, pitch, velocity),
            MessageKind::NoteOff { pitch, velocity } => intake.note_off(channel, pitch, velocity),
            MessageKind::ControlChange { controller, value } => {
                intake.control_change(channel, controller, value)
            }
            MessageKind::ProgramChange { value } => intake.program_change(channel, value),
            MessageKind::PitchBend { value } => intake.pitch_bend(channel, value),
            MessageKind::Aftertouch { value } => intake.aftertouch(channel, value),
            MessageKind::PolyAftertouch { pitch, value } => {
                intake.poly_aftertouch(channel, pitch, value)
            }
            MessageKind::SysexByte { byte } => intake.sysex_byte(channel, byte),
            MessageKind::RawByte { byte } => intake.raw_byte(channel, byte),
        }
    }

    // ==================== Outbound ====================

    /// Encode and hand off one outgoing command. Fire-and-forget: an unknown
    /// destination or a transport failure is logged and dropped, never
    /// propagated.
    pub fn send(&self, message: OutgoingMessage) {
        let bytes = codec::encode(&message);
        let mut transport = self.transport.lock();
        let count = transport.destinations();
        match message.destination {
            Some(index) if index >= count => {
                warn!(index, count, "dropping send to unknown MIDI destination");
            }
            Some(index) => {
                if let Err(e) = transport.send(index, &bytes) {
                    warn!(index, error = %e, "MIDI send failed");
                }
            }
            None => {
                for index in 0..count {
                    if let Err(e) = transport.send(index, &bytes) {
                        warn!(index, error = %e, "MIDI send failed");
                    }
                }
            }
        }
    }

    /// Broadcast a note-on.
    pub fn send_note_on(&self, channel: u8, pitch: u8, velocity: u8) {
        self.send(OutgoingMessage::note_on(channel, pitch, velocity));
    }

    /// Broadcast a note-off (note-on with velocity 0 on the wire).
    pub fn send_note_off(&self, channel: u8, pitch: u8) {
        self.send(OutgoingMessage::note_off(channel, pitch));
    }

    pub fn send_control_change(&self, channel: u8, controller: u8, value: u8) {
        self.send(OutgoingMessage::control_change(channel, controller, value));
    }

    pub fn send_program_change(&self, channel: u8, value: u8) {
        self.send(OutgoingMessage::program_change(channel, value));
    }

    pub fn send_pitch_bend(&self, channel: u8, value: u16) {
        self.send(OutgoingMessage::pitch_bend(channel, value));
    }

    pub fn send_aftertouch(&self, channel: u8, value: u8) {
        self.send(OutgoingMessage::aftertouch(channel, value));
    }

    pub fn send_poly_aftertouch(&self, channel: u8, pitch: u8, value: u8) {
        self.send(OutgoingMessage::poly_aftertouch(channel, pitch, value));
    }

    pub fn send_raw_byte(&self, channel: u8, byte: u8) {
        self.send(OutgoingMessage::raw_byte(channel, byte));
    }

    /// Forwarded verbatim to the transport; session setup is not this
    /// layer's concern.
    pub fn set_network_enabled(&self, enabled: bool) {
        self.transport.lock().set_network_enabled(enabled);
    }

    // ==================== Configuration ====================

    pub fn filters(&self) -> FilterConfig {
        self.filters.snapshot()
    }

    pub fn set_filters(&self, config: FilterConfig) {
        self.filters.set(config);
    }

    /// Handle for sharing the filter flags with the owning application.
    pub fn filter_handle(&self) -> FilterHandle {
        self.filters.clone()
    }
}

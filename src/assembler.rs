//! Packet reassembly: the stateful core of the engine.
//!
//! One `MessageAssembler` exists per logical input source and consumes that
//! source's packets in delivery order. It walks each packet status byte by
//! status byte (running status is not carried across messages — every message
//! must open with a fresh status byte), tracks multi-packet SysEx
//! continuations, suppresses filtered real-time bytes, and computes the
//! inter-message delta time from hardware timestamps.
//!
//! Malformed input never escapes: a data byte where a status byte is expected
//! truncates the remainder of the packet, and the assembler is left idle and
//! resumable after every `feed`.

use smallvec::SmallVec;
use tracing::debug;

use crate::clock::ClockSource;
use crate::codec::{self, status};
use crate::config::FilterConfig;
use crate::message::{MidiMessage, RawPacket};

/// Per-source framing state machine.
#[derive(Debug)]
pub struct MessageAssembler {
    clock: ClockSource,
    /// Ticks of the most recent packet, `None` before the first. Stays in the
    /// transport's tick epoch once a real timestamp has been seen; sentinel
    /// packets extend it by clock-measured elapsed time.
    last_timestamp: Option<u64>,
    /// Clock reading taken at the previous `feed`, for measuring the elapsed
    /// time a sentinel packet stands in for.
    last_feed_ticks: u64,
    /// False until a packet carries a real transport timestamp. While false
    /// the chain reference lives in the clock's own epoch.
    epoch_anchored: bool,
    /// True while a SysEx spans packets and its 0xF7 has not arrived.
    awaiting_sysex: bool,
    /// Bytes of the single message currently being assembled. Cleared
    /// immediately after every dispatch or discard.
    accumulator: Vec<u8>,
}

impl MessageAssembler {
    pub fn new(clock: ClockSource) -> Self {
        let last_feed_ticks = clock.now_ticks();
        Self {
            clock,
            last_timestamp: None,
            last_feed_ticks,
            epoch_anchored: false,
            awaiting_sysex: false,
            accumulator: Vec::new(),
        }
    }

    /// Timestamp (ticks) of the most recent packet fed, sentinel-substituted.
    pub fn last_timestamp(&self) -> Option<u64> {
        self.last_timestamp
    }

    /// True while a multi-packet SysEx is incomplete.
    pub fn awaiting_sysex(&self) -> bool {
        self.awaiting_sysex
    }

    /// True if partially assembled bytes are buffered.
    pub fn has_pending(&self) -> bool {
        !self.accumulator.is_empty()
    }

    /// Consume one packet and produce the logical messages completed by it.
    ///
    /// `filters` is a per-call snapshot; the scan never observes a mid-packet
    /// flag change. Messages come out in strict byte order. The packet delta
    /// time is carried by the first message completed from non-continuation
    /// bytes; every other message in the batch reports 0.
    pub fn feed(&mut self, packet: &RawPacket, filters: FilterConfig) -> SmallVec<[MidiMessage; 8]> {
        let clock_now = self.clock.now_ticks();
        let elapsed = clock_now.saturating_sub(self.last_feed_ticks);
        // Timestamp 0 means the transport had none. Extend the chain by the
        // clock-measured time since the previous packet so the reference
        // stays in the transport's tick epoch instead of jumping to the
        // clock's.
        let (now, anchored) = if packet.timestamp != 0 {
            (packet.timestamp, true)
        } else {
            match self.last_timestamp {
                Some(last) => (last.saturating_add(elapsed), self.epoch_anchored),
                None => (clock_now, false),
            }
        };
        let prev_timestamp = self.last_timestamp;
        let rebased = anchored && !self.epoch_anchored;
        self.last_timestamp = Some(now);
        self.epoch_anchored = anchored;
        self.last_feed_ticks = clock_now;

        let mut out = SmallVec::new();
        let bytes = packet.bytes.as_slice();

        if self.awaiting_sysex {
            // The whole packet is SysEx payload; delta only has meaning at
            // message boundaries, so continuation emissions carry 0 and no
            // delta is computed here.
            if !filters.ignore_sysex {
                self.accumulator.extend_from_slice(bytes);
            }
            if bytes.last() == Some(&status::SYSEX_END) {
                self.awaiting_sysex = false;
                if !self.accumulator.is_empty() {
                    out.extend(codec::decode(&self.accumulator));
                    self.accumulator.clear();
                }
            }
            return out;
        }

        let mut pending_delta = match prev_timestamp {
            // First real timestamp after a clock-epoch chain: the epochs
            // cannot be differenced, so the clock measures the gap.
            Some(_) if rebased => self.clock.ticks_to_millis(elapsed),
            Some(last) => self.clock.ticks_to_millis(now.saturating_sub(last)),
            None => 0.0,
        };

        let mut offset = 0;
        while offset < bytes.len() {
            let status = bytes[offset];
            if status & 0x80 == 0 {
                debug!(
                    source = packet.source,
                    offset,
                    byte = status,
                    "expected status byte, dropping rest of packet"
                );
                self.accumulator.clear();
                break;
            }

            if status == status::SYSEX_START {
                if filters.ignore_sysex {
                    // Skip the remainder of the packet entirely.
                    break;
                }
                self.accumulator.extend_from_slice(&bytes[offset..]);
                if bytes.last() == Some(&status::SYSEX_END) {
                    Self::flush(&mut self.accumulator, &mut pending_delta, &mut out);
                } else {
                    self.awaiting_sysex = true;
                }
                break;
            }

            // Selective suppression of high-frequency real-time traffic.
            let skip = match status {
                status::TIME_CODE if filters.ignore_realtime_clock => 2,
                status::TIMING_CLOCK if filters.ignore_realtime_clock => 1,
                status::ACTIVE_SENSING if filters.ignore_active_sensing => 1,
                _ => 0,
            };
            if skip > 0 {
                offset += skip;
                continue;
            }

            let len = codec::framed_len(status);
            if offset + len > bytes.len() {
                debug!(
                    source = packet.source,
                    offset,
                    byte = status,
                    "declared message length runs past packet end, dropping"
                );
                self.accumulator.clear();
                break;
            }

            // Dispatch exactly when the declared length has been accumulated.
            self.accumulator.extend_from_slice(&bytes[offset..offset + len]);
            Self::flush(&mut self.accumulator, &mut pending_delta, &mut out);
            offset += len;
        }

        out
    }

    /// Decode and emit the accumulated message, handing the packet delta to
    /// the first message produced this feed. Leaves the accumulator empty.
    fn flush(
        accumulator: &mut Vec<u8>,
        pending_delta: &mut f64,
        out: &mut SmallVec<[MidiMessage; 8]>,
    ) {
        let mut decoded = codec::decode(accumulator);
        if let Some(first) = decoded.first_mut() {
            first.delta_ms = std::mem::take(pending_delta);
        }
        out.extend(decoded);
        accumulator.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;

    fn assembler() -> MessageAssembler {
        MessageAssembler::new(ClockSource::monotonic())
    }

    fn packet(timestamp: u64, bytes: &[u8]) -> RawPacket {
        RawPacket::new(0, timestamp, bytes)
    }

    #[test]
    fn test_first_packet_delta_is_zero() {
        let mut asm = assembler();
        let msgs = asm.feed(&packet(987_654_321, &[0x90, 60, 100]), FilterConfig::default());
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].delta_ms, 0.0);
        assert_eq!(asm.last_timestamp(), Some(987_654_321));
    }

    #[test]
    fn test_delta_between_packets() {
        let mut asm = assembler();
        asm.feed(&packet(1_000_000, &[0x90, 60, 100]), FilterConfig::default());
        let msgs = asm.feed(&packet(3_500_000, &[0x80, 60, 0]), FilterConfig::default());
        assert!((msgs[0].delta_ms - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_zero_timestamp_sentinel_substitution() {
        let clock = ClockSource::monotonic();
        let mut asm = MessageAssembler::new(clock);
        asm.feed(&packet(clock.now_ticks(), &[0x90, 60, 100]), FilterConfig::default());
        let msgs = asm.feed(&packet(0, &[0x80, 60, 0]), FilterConfig::default());
        assert!(msgs[0].delta_ms >= 0.0);
        assert!(msgs[0].delta_ms.is_finite());
        // The substituted reading became the new reference, not 0.
        assert!(asm.last_timestamp().unwrap() > 0);
    }

    #[test]
    fn test_sentinel_keeps_reference_in_transport_epoch() {
        let mut asm = assembler();
        // Transport timestamps are an hour into the hardware timer's epoch.
        let base = 3_600_000_000_000u64;
        asm.feed(&packet(base, &[0x90, 60, 100]), FilterConfig::default());

        // A continuation delivered without a timestamp must not rebase the
        // chain onto the clock's epoch.
        asm.feed(&packet(base, &[0xF0, 0x01]), FilterConfig::default());
        let msgs = asm.feed(&packet(0, &[0x02, 0xF7]), FilterConfig::default());
        assert_eq!(msgs.len(), 3);
        let reference = asm.last_timestamp().unwrap();
        assert!(reference >= base);

        // The next real-timestamped packet sees ~2 ms, not the hour gap
        // between the two epochs.
        let msgs = asm.feed(&packet(base + 2_000_000, &[0x80, 60, 0]), FilterConfig::default());
        assert!(msgs[0].delta_ms <= 2.0, "delta was {} ms", msgs[0].delta_ms);
        assert!(msgs[0].delta_ms >= 0.0);
    }

    #[test]
    fn test_consecutive_sentinels_advance_by_elapsed_time() {
        let mut asm = assembler();
        let base = 3_600_000_000_000u64;
        asm.feed(&packet(base, &[0x90, 60, 100]), FilterConfig::default());

        let before = asm.last_timestamp().unwrap();
        asm.feed(&packet(0, &[0xB0, 7, 64]), FilterConfig::default());
        let after = asm.last_timestamp().unwrap();
        assert!(after >= before);

        let msgs = asm.feed(&packet(0, &[0xB0, 7, 65]), FilterConfig::default());
        assert!(msgs[0].delta_ms >= 0.0);
        assert!(msgs[0].delta_ms.is_finite());
        assert!(asm.last_timestamp().unwrap() >= after);
    }

    #[test]
    fn test_first_real_timestamp_after_sentinel_start() {
        let mut asm = assembler();
        // The chain opens without a transport timestamp, so its reference
        // starts in the clock's epoch.
        let msgs = asm.feed(&packet(0, &[0x90, 60, 100]), FilterConfig::default());
        assert_eq!(msgs[0].delta_ms, 0.0);

        // When the first real timestamp arrives, the gap is clock-measured
        // rather than differenced across epochs.
        let msgs = asm.feed(
            &packet(7_200_000_000_000, &[0x80, 60, 0]),
            FilterConfig::default(),
        );
        assert!(msgs[0].delta_ms < 1_000.0, "delta was {} ms", msgs[0].delta_ms);
        assert_eq!(asm.last_timestamp(), Some(7_200_000_000_000));
    }

    #[test]
    fn test_multiple_messages_one_packet() {
        let mut asm = assembler();
        asm.feed(&packet(1_000_000, &[0x90, 60, 100]), FilterConfig::default());
        let msgs = asm.feed(
            &packet(2_000_000, &[0x90, 64, 90, 0xB0, 7, 127, 0xC0, 5]),
            FilterConfig::default(),
        );
        assert_eq!(msgs.len(), 3);
        assert_eq!(
            msgs[0].kind,
            MessageKind::NoteOn {
                pitch: 64,
                velocity: 90
            }
        );
        assert_eq!(
            msgs[1].kind,
            MessageKind::ControlChange {
                controller: 7,
                value: 127
            }
        );
        assert_eq!(msgs[2].kind, MessageKind::ProgramChange { value: 5 });
        // Delta only on the first completed message.
        assert!((msgs[0].delta_ms - 1.0).abs() < 1e-9);
        assert_eq!(msgs[1].delta_ms, 0.0);
        assert_eq!(msgs[2].delta_ms, 0.0);
        assert!(!asm.has_pending());
    }

    #[test]
    fn test_sysex_single_packet() {
        let mut asm = assembler();
        let msgs = asm.feed(
            &packet(1, &[0xF0, 0x7D, 0x01, 0x02, 0xF7]),
            FilterConfig::default(),
        );
        let bytes: Vec<u8> = msgs
            .iter()
            .map(|m| match m.kind {
                MessageKind::SysexByte { byte } => byte,
                _ => panic!("Expected SysexByte"),
            })
            .collect();
        assert_eq!(bytes, vec![0x7D, 0x01, 0x02, 0xF7]);
        assert!(!asm.awaiting_sysex());
        assert!(!asm.has_pending());
    }

    #[test]
    fn test_sysex_split_across_packets() {
        let mut asm = assembler();
        let msgs = asm.feed(&packet(1, &[0xF0, 0x01, 0x02]), FilterConfig::default());
        assert!(msgs.is_empty());
        assert!(asm.awaiting_sysex());
        assert!(asm.has_pending());

        let msgs = asm.feed(&packet(0, &[0x03, 0xF7]), FilterConfig::default());
        let bytes: Vec<u8> = msgs
            .iter()
            .map(|m| match m.kind {
                MessageKind::SysexByte { byte } => byte,
                _ => panic!("Expected SysexByte"),
            })
            .collect();
        assert_eq!(bytes, vec![0x01, 0x02, 0x03, 0xF7]);
        assert!(msgs.iter().all(|m| m.delta_ms == 0.0));
        assert!(!asm.awaiting_sysex());
        assert!(!asm.has_pending());
    }

    #[test]
    fn test_sysex_continuation_spanning_three_packets() {
        let mut asm = assembler();
        assert!(asm
            .feed(&packet(1, &[0xF0, 0x10]), FilterConfig::default())
            .is_empty());
        assert!(asm
            .feed(&packet(0, &[0x11, 0x12]), FilterConfig::default())
            .is_empty());
        assert!(asm.awaiting_sysex());

        let msgs = asm.feed(&packet(0, &[0x13, 0xF7]), FilterConfig::default());
        assert_eq!(msgs.len(), 5);
        assert!(!asm.awaiting_sysex());
    }

    #[test]
    fn test_ignore_sysex_skips_remainder() {
        let filters = FilterConfig {
            ignore_sysex: true,
            ..FilterConfig::default()
        };
        let mut asm = assembler();
        // The note before the SysEx start still decodes; everything after is
        // skipped and no continuation is armed.
        let msgs = asm.feed(
            &packet(1, &[0x90, 60, 100, 0xF0, 0x01, 0x02]),
            filters,
        );
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].is_note_on());
        assert!(!asm.awaiting_sysex());
        assert!(!asm.has_pending());
    }

    #[test]
    fn test_ignore_sysex_during_continuation_discards_bytes() {
        let mut asm = assembler();
        asm.feed(&packet(1, &[0xF0, 0x01]), FilterConfig::default());
        assert!(asm.awaiting_sysex());

        // Flag flipped mid-SysEx: continuation bytes are dropped but the
        // terminator still closes it out, dispatching what accumulated.
        let filters = FilterConfig {
            ignore_sysex: true,
            ..FilterConfig::default()
        };
        let msgs = asm.feed(&packet(0, &[0x02, 0xF7]), filters);
        assert!(!asm.awaiting_sysex());
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].kind, MessageKind::SysexByte { byte: 0x01 });
    }

    #[test]
    fn test_active_sensing_filtered_advances_timestamp() {
        let mut asm = assembler();
        let msgs = asm.feed(&packet(5_000, &[0xFE]), FilterConfig::default());
        assert!(msgs.is_empty());
        assert_eq!(asm.last_timestamp(), Some(5_000));
    }

    #[test]
    fn test_active_sensing_passes_when_unfiltered() {
        let filters = FilterConfig {
            ignore_active_sensing: false,
            ..FilterConfig::default()
        };
        let mut asm = assembler();
        let msgs = asm.feed(&packet(1, &[0xFE]), filters);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].kind, MessageKind::RawByte { byte: 0xFE });
    }

    #[test]
    fn test_timing_clock_filtered() {
        let mut asm = assembler();
        // Clock ticks interleaved with a note: ticks vanish, note survives.
        let msgs = asm.feed(
            &packet(1, &[0xF8, 0x90, 60, 100, 0xF8]),
            FilterConfig::default(),
        );
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].is_note_on());
    }

    #[test]
    fn test_time_code_filtered_skips_two_bytes() {
        let mut asm = assembler();
        let msgs = asm.feed(
            &packet(1, &[0xF1, 0x35, 0x90, 60, 100]),
            FilterConfig::default(),
        );
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].is_note_on());
    }

    #[test]
    fn test_timing_clock_passes_when_unfiltered() {
        let filters = FilterConfig {
            ignore_realtime_clock: false,
            ..FilterConfig::default()
        };
        let mut asm = assembler();
        let msgs = asm.feed(&packet(1, &[0xF8]), filters);
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].kind, MessageKind::RawByte { byte: 0xF8 });
    }

    #[test]
    fn test_malformed_packet_dropped_and_recoverable() {
        let mut asm = assembler();
        let msgs = asm.feed(&packet(1_000, &[0x01, 0x02]), FilterConfig::default());
        assert!(msgs.is_empty());
        assert!(!asm.has_pending());

        // The next valid packet parses cleanly.
        let msgs = asm.feed(&packet(2_000, &[0x90, 60, 100]), FilterConfig::default());
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].is_note_on());
    }

    #[test]
    fn test_malformed_tail_truncates_after_valid_message() {
        let mut asm = assembler();
        let msgs = asm.feed(
            &packet(1, &[0x90, 60, 100, 0x42, 0x43]),
            FilterConfig::default(),
        );
        assert_eq!(msgs.len(), 1);
        assert!(msgs[0].is_note_on());
        assert!(!asm.has_pending());
    }

    #[test]
    fn test_truncated_message_dropped() {
        let mut asm = assembler();
        // A note-on missing its velocity byte.
        let msgs = asm.feed(&packet(1, &[0x90, 60]), FilterConfig::default());
        assert!(msgs.is_empty());
        assert!(!asm.has_pending());

        let msgs = asm.feed(&packet(2, &[0x80, 60, 0]), FilterConfig::default());
        assert_eq!(msgs.len(), 1);
    }

    #[test]
    fn test_no_bytes_cross_message_boundaries() {
        let mut asm = assembler();
        // Pitch bend data bytes must not bleed into the following CC.
        let msgs = asm.feed(
            &packet(1, &[0xE0, 0x7F, 0x7F, 0xB0, 1, 2]),
            FilterConfig::default(),
        );
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0].kind, MessageKind::PitchBend { value: 16383 });
        assert_eq!(
            msgs[1].kind,
            MessageKind::ControlChange {
                controller: 1,
                value: 2
            }
        );
    }

    #[test]
    fn test_delta_uses_clock_timebase() {
        let clock = ClockSource::with_timebase(125, 3).unwrap();
        let mut asm = MessageAssembler::new(clock);
        asm.feed(&packet(24_000, &[0x90, 60, 100]), FilterConfig::default());
        // 24_000 ticks at 24 MHz is exactly 1 ms.
        let msgs = asm.feed(&packet(48_000, &[0x80, 60, 0]), FilterConfig::default());
        assert!((msgs[0].delta_ms - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_timestamp_regression_clamps_to_zero_delta() {
        let mut asm = assembler();
        asm.feed(&packet(5_000_000, &[0x90, 60, 100]), FilterConfig::default());
        let msgs = asm.feed(&packet(4_000_000, &[0x80, 60, 0]), FilterConfig::default());
        assert_eq!(msgs[0].delta_ms, 0.0);
    }
}

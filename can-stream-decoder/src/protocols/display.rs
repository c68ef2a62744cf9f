//! VW-group display/control unit protocol decoder
//!
//! Structural decoder for the proprietary framing used between VW-group
//! infotainment and display units. There is no public upstream description
//! of the payload contents, so only the framing and the 16-bit application
//! header word are decoded; `fields` stays empty and the payload is passed
//! through for downstream tooling.
//!
//! Framing (first payload byte): `1 0 cc llll` starts a segmented stream on
//! 2-bit channel `cc` with a 12-bit total length, `1 1 cc ssss` continues it
//! with 4-bit sequence `ssss` (from 0, modulus 16), and a clear top bit is
//! an unsegmented message. Unsegmented frames are claimed only in aggressive
//! detection mode since a clear top bit alone is a weak signature.

use byteorder::{BigEndian, ByteOrder};

use crate::config::DetectionMode;
use crate::registry::ProtocolDecoder;
use crate::stream::{AppendOutcome, BeginOutcome, StreamConfig, StreamKey, StreamTable};
use crate::types::{
    CanFrame, DecodedMessage, DecoderError, DecoderStats, HeaderField, ProtocolId, Result,
};

/// Segmented start marker: bit 7 set, bit 6 clear
const SEG_MASK: u8 = 0xC0;
const SEG_START: u8 = 0x80;
const SEG_CONTINUATION: u8 = 0xC0;

/// Total lengths are 12 bits
const MAX_PAYLOAD: usize = 4095;
/// A payload shorter than the header word is meaningless
const MIN_PAYLOAD: usize = 2;
const SEQ_MODULUS: u8 = 16;
const FIRST_CONT_SEQ: u8 = 0;

/// Split the 16-bit application header word
///
/// Bits 15-13 are the opcode, bits 10-6 the function group, bits 5-0 the
/// function. Bits 12-11 are unassigned in observed traffic.
pub fn split_header(word: u16) -> (u8, u8, u8) {
    let opcode = ((word >> 13) & 0x07) as u8;
    let group = ((word >> 6) & 0x1F) as u8;
    let function = (word & 0x3F) as u8;
    (opcode, group, function)
}

/// Framing role of one display frame
enum DisplayFrame<'a> {
    Single,
    Start {
        channel: u8,
        total: usize,
        chunk: &'a [u8],
    },
    Continuation {
        channel: u8,
        seq: u8,
        chunk: &'a [u8],
    },
}

fn classify(data: &[u8], mode: DetectionMode) -> Result<DisplayFrame<'_>> {
    let b0 = *data
        .first()
        .ok_or_else(|| DecoderError::MalformedFrame("empty display frame".to_string()))?;

    if b0 & 0x80 == 0 {
        if mode != DetectionMode::Aggressive {
            return Err(DecoderError::MalformedFrame(
                "unsegmented frame outside aggressive detection".to_string(),
            ));
        }
        if data.len() < MIN_PAYLOAD {
            return Err(DecoderError::MalformedFrame(
                "unsegmented frame too short for header word".to_string(),
            ));
        }
        return Ok(DisplayFrame::Single);
    }

    let channel = (b0 >> 4) & 0x03;
    match b0 & SEG_MASK {
        SEG_START => {
            if data.len() < 2 {
                return Err(DecoderError::MalformedFrame(
                    "start frame too short for length header".to_string(),
                ));
            }
            let total = (((b0 & 0x0F) as usize) << 8) | data[1] as usize;
            if total < MIN_PAYLOAD {
                return Err(DecoderError::MalformedFrame(format!(
                    "start frame declares {} bytes, too short for header word",
                    total
                )));
            }
            Ok(DisplayFrame::Start {
                channel,
                total,
                chunk: &data[2..],
            })
        }
        _ => {
            if data.len() < 2 {
                return Err(DecoderError::MalformedFrame(
                    "continuation frame carries no data".to_string(),
                ));
            }
            Ok(DisplayFrame::Continuation {
                channel,
                seq: b0 & 0x0F,
                chunk: &data[1..],
            })
        }
    }
}

/// Labeled routing hints derived from a 29-bit identifier
///
/// The address layout is a hint, never authoritative: gateways rewrite these
/// identifiers in transit.
fn route_hints(can_id: u32, is_extended: bool) -> Vec<HeaderField> {
    if !is_extended {
        return Vec::new();
    }
    vec![
        HeaderField::new("route_hint_src", ((can_id >> 8) & 0xFF) as i64),
        HeaderField::new("route_hint_dst", (can_id & 0xFF) as i64),
    ]
}

/// Stateful display protocol decoder
pub struct DisplayDecoder {
    streams: StreamTable,
    mode: DetectionMode,
    attempted: u64,
    decoded: u64,
    failed: u64,
}

impl DisplayDecoder {
    /// Create a decoder with the given reassembly timeout and detection mode
    pub fn new(timeout_ns: u64, mode: DetectionMode) -> Self {
        Self {
            streams: StreamTable::new(StreamConfig::new(timeout_ns, SEQ_MODULUS, MAX_PAYLOAD)),
            mode,
            attempted: 0,
            decoded: 0,
            failed: 0,
        }
    }

    fn emit(
        &mut self,
        can_id: u32,
        timestamp_ns: u64,
        frame_count: usize,
        mut header: Vec<HeaderField>,
        payload: Vec<u8>,
    ) -> Option<DecodedMessage> {
        if payload.len() < MIN_PAYLOAD {
            self.failed += 1;
            log::warn!(
                "Display message 0x{:X} dropped: {} bytes cannot hold the header word",
                can_id,
                payload.len()
            );
            return None;
        }

        let word = BigEndian::read_u16(&payload[..2]);
        let (opcode, group, function) = split_header(word);
        header.push(HeaderField::new("opcode", opcode as i64));
        header.push(HeaderField::new("group", group as i64));
        header.push(HeaderField::new("function", function as i64));

        self.decoded += 1;
        Some(DecodedMessage {
            timestamp_ns,
            protocol: ProtocolId::Display,
            can_id,
            frame_count,
            header,
            payload,
            fields: Vec::new(),
            success: true,
        })
    }
}

impl Default for DisplayDecoder {
    fn default() -> Self {
        Self::new(
            crate::stream::DEFAULT_STREAM_TIMEOUT_NS,
            DetectionMode::Conservative,
        )
    }
}

impl ProtocolDecoder for DisplayDecoder {
    fn protocol(&self) -> ProtocolId {
        ProtocolId::Display
    }

    fn is_candidate(&self, frame: &CanFrame) -> bool {
        match frame.data.first() {
            Some(b0) => b0 & 0x80 != 0 || self.mode == DetectionMode::Aggressive,
            None => false,
        }
    }

    fn decode(&mut self, frame: &CanFrame) -> Option<DecodedMessage> {
        self.attempted += 1;
        let now_ns = frame.timestamp_ns;

        let role = match classify(&frame.data, self.mode) {
            Ok(role) => role,
            Err(e) => {
                self.failed += 1;
                log::warn!("Display frame 0x{:X} dropped: {}", frame.can_id, e);
                return None;
            }
        };

        match role {
            DisplayFrame::Single => {
                let header = route_hints(frame.can_id, frame.is_extended);
                self.emit(
                    frame.can_id,
                    frame.timestamp_ns,
                    1,
                    header,
                    frame.data.clone(),
                )
            }
            DisplayFrame::Start {
                channel,
                total,
                chunk,
            } => {
                let mut header = vec![HeaderField::new("channel", channel as i64)];
                header.extend(route_hints(frame.can_id, frame.is_extended));

                let key = StreamKey::new(frame.can_id, channel);
                match self
                    .streams
                    .begin(key, total, FIRST_CONT_SEQ, header, chunk, now_ns)
                {
                    BeginOutcome::Complete(done) => self.emit(
                        done.key.can_id,
                        done.started_at_ns,
                        done.frames,
                        done.header,
                        done.payload,
                    ),
                    BeginOutcome::Started => None,
                    BeginOutcome::TooLong { len, max } => {
                        self.failed += 1;
                        log::warn!(
                            "Display stream 0x{:X} rejected: declared {} bytes, limit {}",
                            frame.can_id,
                            len,
                            max
                        );
                        None
                    }
                }
            }
            DisplayFrame::Continuation { channel, seq, chunk } => {
                let key = StreamKey::new(frame.can_id, channel);
                match self.streams.append(key, seq, chunk, now_ns) {
                    AppendOutcome::Complete(done) => self.emit(
                        done.key.can_id,
                        done.started_at_ns,
                        done.frames,
                        done.header,
                        done.payload,
                    ),
                    AppendOutcome::Accepted => None,
                    AppendOutcome::NotFound => {
                        self.failed += 1;
                        log::debug!(
                            "Display continuation 0x{:X} channel {} seq {} has no stream",
                            frame.can_id,
                            channel,
                            seq
                        );
                        None
                    }
                    AppendOutcome::SequenceMismatch { expected, got } => {
                        self.failed += 1;
                        log::warn!(
                            "Display stream 0x{:X} channel {} dropped: expected seq {}, got {}",
                            frame.can_id,
                            channel,
                            expected,
                            got
                        );
                        None
                    }
                }
            }
        }
    }

    fn sweep(&mut self, now_ns: u64) -> usize {
        self.streams.sweep(now_ns)
    }

    fn stats(&self) -> DecoderStats {
        DecoderStats {
            attempted: self.attempted,
            decoded: self.decoded,
            failed: self.failed,
            timed_out: self.streams.timed_out(),
            active_streams: self.streams.active(),
        }
    }

    fn reset(&mut self) {
        self.streams.clear();
        self.attempted = 0;
        self.decoded = 0;
        self.failed = 0;
    }

    fn reset_stats(&mut self) {
        self.streams.reset_counters();
        self.attempted = 0;
        self.decoded = 0;
        self.failed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(can_id: u32, data: Vec<u8>) -> CanFrame {
        CanFrame::new(can_id, false, data, 1_000_000_000)
    }

    fn conservative() -> DisplayDecoder {
        DisplayDecoder::default()
    }

    #[test]
    fn test_header_word_split() {
        // 0x4CC1 = opcode 2, group 19, function 1
        assert_eq!(split_header(0x4CC1), (2, 19, 1));
        assert_eq!(split_header(0x0000), (0, 0, 0));
        assert_eq!(split_header(0xFFFF), (7, 31, 63));
    }

    #[test]
    fn test_segmented_round_trip() {
        let mut decoder = conservative();
        let id = 0x5C1;

        // 26-byte payload split over a start frame and three continuations
        assert!(decoder
            .decode(&frame(id, vec![0x80, 0x1A, 0x4C, 0xC1, 0x01, 0x02, 0x03, 0x04]))
            .is_none());
        assert!(decoder
            .decode(&frame(id, vec![0xC0, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B]))
            .is_none());
        assert!(decoder
            .decode(&frame(id, vec![0xC1, 0x0C, 0x0D, 0x0E, 0x0F, 0x10, 0x11, 0x12]))
            .is_none());

        let msg = decoder
            .decode(&frame(id, vec![0xC2, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18]))
            .expect("final continuation completes the stream");

        assert_eq!(msg.payload.len(), 26);
        assert_eq!(msg.frame_count, 4);
        assert_eq!(msg.header_value("channel"), Some(0));
        assert_eq!(msg.header_value("opcode"), Some(2));
        assert_eq!(msg.header_value("group"), Some(19));
        assert_eq!(msg.header_value("function"), Some(1));
        assert!(msg.fields.is_empty());
        assert!(msg.success);

        let mut expected = vec![0x4C, 0xC1];
        expected.extend(0x01..=0x18u8);
        assert_eq!(msg.payload, expected);
    }

    #[test]
    fn test_unsegmented_requires_aggressive_mode() {
        let decoder = conservative();
        let plain = frame(0x5C1, vec![0x4C, 0xC1, 0x01]);
        assert!(!decoder.is_candidate(&plain));

        let mut aggressive = DisplayDecoder::new(
            crate::stream::DEFAULT_STREAM_TIMEOUT_NS,
            DetectionMode::Aggressive,
        );
        assert!(aggressive.is_candidate(&plain));

        let msg = aggressive.decode(&plain).expect("aggressive mode decodes it");
        assert_eq!(msg.frame_count, 1);
        assert_eq!(msg.header_value("opcode"), Some(2));
        assert_eq!(msg.header_value("group"), Some(19));
        assert_eq!(msg.payload, vec![0x4C, 0xC1, 0x01]);
    }

    #[test]
    fn test_channels_reassemble_independently() {
        let mut decoder = conservative();
        let id = 0x63B;

        // channel 1 and channel 2 streams interleaved on the same CAN ID
        assert!(decoder
            .decode(&frame(id, vec![0x90, 0x04, 0xAA, 0xAA]))
            .is_none());
        assert!(decoder
            .decode(&frame(id, vec![0xA0, 0x04, 0xBB, 0xBB]))
            .is_none());
        assert_eq!(decoder.stats().active_streams, 2);

        let second = decoder
            .decode(&frame(id, vec![0xE0, 0xBB, 0xBB]))
            .expect("channel 2 completes");
        assert_eq!(second.header_value("channel"), Some(2));
        assert_eq!(second.payload, vec![0xBB; 4]);

        let first = decoder
            .decode(&frame(id, vec![0xD0, 0xAA, 0xAA]))
            .expect("channel 1 completes");
        assert_eq!(first.header_value("channel"), Some(1));
        assert_eq!(first.payload, vec![0xAA; 4]);
    }

    #[test]
    fn test_continuation_on_idle_channel_is_orphaned() {
        let mut decoder = conservative();
        let id = 0x63B;

        decoder.decode(&frame(id, vec![0x90, 0x04, 0xAA, 0xAA]));
        // channel 3 has no stream in progress
        assert!(decoder.decode(&frame(id, vec![0xF0, 0x01, 0x02])).is_none());

        let stats = decoder.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.active_streams, 1);
    }

    #[test]
    fn test_new_start_supersedes_stream() {
        let mut decoder = conservative();
        let id = 0x5C1;

        decoder.decode(&frame(id, vec![0x80, 0x1A, 0x4C, 0xC1, 0x01, 0x02, 0x03, 0x04]));
        // a fresh 4-byte message replaces the half-finished 26-byte one
        decoder.decode(&frame(id, vec![0x80, 0x04, 0x20, 0x42]));

        let msg = decoder
            .decode(&frame(id, vec![0xC0, 0x07, 0x08]))
            .expect("superseding stream completes");
        assert_eq!(msg.payload, vec![0x20, 0x42, 0x07, 0x08]);
        assert_eq!(decoder.stats().active_streams, 0);
    }

    #[test]
    fn test_sequence_mismatch_drops_stream() {
        let mut decoder = conservative();
        let id = 0x5C1;

        decoder.decode(&frame(id, vec![0x80, 0x1A, 0x4C, 0xC1, 0x01, 0x02, 0x03, 0x04]));
        assert!(decoder
            .decode(&frame(id, vec![0xC5, 0x05, 0x06, 0x07]))
            .is_none());

        let stats = decoder.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.active_streams, 0);
    }

    #[test]
    fn test_malformed_frames() {
        let mut decoder = conservative();
        let id = 0x5C1;

        // start frame with no length byte
        assert!(decoder.decode(&frame(id, vec![0x80])).is_none());
        // declared total cannot hold the header word
        assert!(decoder.decode(&frame(id, vec![0x80, 0x01])).is_none());
        // continuation without data
        assert!(decoder.decode(&frame(id, vec![0xC0])).is_none());
        assert_eq!(decoder.stats().failed, 3);
    }

    #[test]
    fn test_extended_id_routing_hints() {
        let mut decoder = conservative();

        let msg = decoder
            .decode(&CanFrame::new(
                0x17334C10,
                true,
                vec![0x80, 0x02, 0x4C, 0xC1],
                0,
            ))
            .expect("start frame already carries the full payload");

        assert_eq!(msg.header_value("route_hint_src"), Some(0x4C));
        assert_eq!(msg.header_value("route_hint_dst"), Some(0x10));
        assert_eq!(msg.header_value("opcode"), Some(2));
    }

    #[test]
    fn test_timeout_sweep_abandons_stream() {
        let mut decoder = conservative();
        let id = 0x5C1;

        decoder.decode(&CanFrame::new(
            id,
            false,
            vec![0x80, 0x1A, 0x4C, 0xC1, 0x01, 0x02, 0x03, 0x04],
            1_000_000_000,
        ));
        assert_eq!(decoder.sweep(3_500_000_000), 1);

        let stats = decoder.stats();
        assert_eq!(stats.timed_out, 1);
        assert_eq!(stats.active_streams, 0);

        // a late continuation is orphaned, not resurrected
        assert!(decoder
            .decode(&CanFrame::new(id, false, vec![0xC0, 0x05, 0x06], 3_600_000_000))
            .is_none());
        assert_eq!(decoder.stats().failed, 1);
    }
}

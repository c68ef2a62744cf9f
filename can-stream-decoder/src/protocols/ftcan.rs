//! FuelTech FTCAN 2.0 telemetry decoder
//!
//! FTCAN packs its addressing into the 29-bit identifier: bits 28-14 carry
//! the product ID, bits 13-11 the data-field selector and bits 10-0 the
//! message ID. Only data-field 2 (real-time broadcast telemetry) is decoded.
//!
//! The first data byte selects the segmentation role: `0xFF` marks a
//! self-contained single packet, `0x00` starts a segmented stream (followed
//! by a big-endian u16 total length), and any other value is a continuation
//! carrying that sequence number. Completed payloads are a run of 4-byte
//! measure cells: a big-endian field ID (measure ID in the upper 15 bits,
//! alert flag in bit 0) followed by a big-endian u16 raw value.

use byteorder::{BigEndian, ByteOrder};

use crate::fields::{self, FieldDef};
use crate::registry::ProtocolDecoder;
use crate::stream::{AppendOutcome, BeginOutcome, StreamConfig, StreamKey, StreamTable};
use crate::types::{
    CanFrame, DecodedField, DecodedMessage, DecoderError, DecoderStats, FieldValue, HeaderField,
    ProtocolId, Result,
};

/// Data-field selector for real-time telemetry broadcast
pub const DATA_FIELD_REALTIME: u8 = 2;

/// First-byte marker for a self-contained packet
const SEG_SINGLE: u8 = 0xFF;
/// First-byte marker for the start of a segmented stream
const SEG_START: u8 = 0x00;
/// Sequence number carried by the first continuation frame
const FIRST_CONT_SEQ: u8 = 1;
/// Continuation sequence numbers run 1..=254, then wrap
const SEQ_MODULUS: u8 = 255;
/// Largest payload a start frame may declare: 5 start bytes + 254 * 7
pub const MAX_PAYLOAD: usize = 1783;

/// Product ID: bits 28-14 of the identifier
pub fn product_id(can_id: u32) -> u16 {
    ((can_id >> 14) & 0x7FFF) as u16
}

/// Data-field selector: bits 13-11 of the identifier
pub fn data_field(can_id: u32) -> u8 {
    ((can_id >> 11) & 0x07) as u8
}

/// Message ID: bits 10-0 of the identifier
pub fn message_id(can_id: u32) -> u16 {
    (can_id & 0x7FF) as u16
}

/// Real-time measure table
///
/// Measure IDs are the field ID shifted right by one (bit 0 is the alert
/// flag). Values are always big-endian u16 raw readings.
pub const MEASURES: &[FieldDef] = &[
    FieldDef::new(0x01, "engine_rpm", Some("rpm"), 0, 16, false, 1.0, 0.0),
    FieldDef::new(0x02, "throttle_position", Some("%"), 0, 16, false, 0.1, 0.0),
    FieldDef::new(0x03, "manifold_pressure", Some("bar"), 0, 16, true, 0.001, 0.0),
    FieldDef::new(0x04, "air_temp", Some("°C"), 0, 16, true, 0.1, 0.0),
    FieldDef::new(0x05, "engine_temp", Some("°C"), 0, 16, true, 0.1, 0.0),
    FieldDef::new(0x06, "oil_pressure", Some("bar"), 0, 16, false, 0.001, 0.0),
    FieldDef::new(0x07, "fuel_pressure", Some("bar"), 0, 16, false, 0.001, 0.0),
    FieldDef::new(0x09, "battery_voltage", Some("V"), 0, 16, false, 0.01, 0.0),
    FieldDef::new(0x0A, "ignition_advance", Some("°"), 0, 16, true, 0.1, 0.0),
    FieldDef::new(0x0C, "injection_time", Some("ms"), 0, 16, false, 0.01, 0.0),
    FieldDef::new(0x13, "o2_general", Some("λ"), 0, 16, false, 0.001, 0.0),
    FieldDef::new(0x15, "vehicle_speed", Some("km/h"), 0, 16, false, 1.0, 0.0),
    FieldDef::new(0x16, "gear", None, 0, 16, true, 1.0, 0.0),
    FieldDef::new(0x18, "fuel_consumption", Some("L/h"), 0, 16, false, 0.01, 0.0),
];

/// Segmentation role of one FTCAN frame
enum Segment<'a> {
    Single(&'a [u8]),
    Start { total: usize, chunk: &'a [u8] },
    Continuation { seq: u8, chunk: &'a [u8] },
}

fn classify(data: &[u8]) -> Result<Segment<'_>> {
    let (&marker, rest) = data
        .split_first()
        .ok_or_else(|| DecoderError::MalformedFrame("empty FTCAN frame".to_string()))?;

    match marker {
        SEG_SINGLE => Ok(Segment::Single(rest)),
        SEG_START => {
            if rest.len() < 2 {
                return Err(DecoderError::MalformedFrame(
                    "start frame too short for length header".to_string(),
                ));
            }
            let total = BigEndian::read_u16(&rest[..2]) as usize;
            if total == 0 {
                return Err(DecoderError::MalformedFrame(
                    "start frame declares zero-length payload".to_string(),
                ));
            }
            if total > MAX_PAYLOAD {
                return Err(DecoderError::PayloadTooLarge {
                    len: total,
                    max: MAX_PAYLOAD,
                });
            }
            Ok(Segment::Start {
                total,
                chunk: &rest[2..],
            })
        }
        seq => Ok(Segment::Continuation { seq, chunk: rest }),
    }
}

fn header_fields(can_id: u32) -> Vec<HeaderField> {
    vec![
        HeaderField::new("product", product_id(can_id) as i64),
        HeaderField::new("data_field", data_field(can_id) as i64),
        HeaderField::new("message", message_id(can_id) as i64),
    ]
}

/// Decode a completed payload as a run of 4-byte measure cells
///
/// Cells with field ID 0 are padding and skipped, as is a trailing partial
/// cell. Unknown measure IDs still produce a field (with `ok: false`) so the
/// raw reading is not lost. A set alert flag adds a companion boolean field.
fn decode_measure_cells(payload: &[u8]) -> Vec<DecodedField> {
    let mut out = Vec::new();

    for cell in payload.chunks_exact(4) {
        let field_id = BigEndian::read_u16(&cell[..2]);
        if field_id == 0 {
            continue;
        }
        let measure_id = field_id >> 1;
        let alert = field_id & 0x0001 != 0;
        let value_region = &cell[2..4];

        let field = fields::defs_for(MEASURES, measure_id)
            .next()
            .and_then(|def| def.decode(value_region))
            .unwrap_or_else(|| {
                let raw = BigEndian::read_u16(value_region) as i64;
                fields::unknown_field(
                    measure_id as u32,
                    format!("measure_0x{:04X}", measure_id),
                    raw,
                )
            });
        let base_name = field.name.clone();
        out.push(field);

        if alert {
            out.push(DecodedField {
                id: measure_id as u32,
                name: format!("{}_alert", base_name),
                value: FieldValue::Boolean(true),
                unit: None,
                raw: 1,
                ok: true,
            });
        }
    }

    out
}

/// Stateful FTCAN decoder
pub struct FtcanDecoder {
    streams: StreamTable,
    attempted: u64,
    decoded: u64,
    failed: u64,
}

impl FtcanDecoder {
    /// Create a decoder with the given reassembly timeout
    pub fn new(timeout_ns: u64) -> Self {
        Self {
            streams: StreamTable::new(StreamConfig::new(timeout_ns, SEQ_MODULUS, MAX_PAYLOAD)),
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
        header: Vec<HeaderField>,
        payload: Vec<u8>,
    ) -> DecodedMessage {
        let fields = decode_measure_cells(&payload);
        let success = fields.iter().any(|f| f.ok);
        self.decoded += 1;

        DecodedMessage {
            timestamp_ns,
            protocol: ProtocolId::Ftcan,
            can_id,
            frame_count,
            header,
            payload,
            fields,
            success,
        }
    }
}

impl Default for FtcanDecoder {
    fn default() -> Self {
        Self::new(crate::stream::DEFAULT_STREAM_TIMEOUT_NS)
    }
}

impl ProtocolDecoder for FtcanDecoder {
    fn protocol(&self) -> ProtocolId {
        ProtocolId::Ftcan
    }

    fn is_candidate(&self, frame: &CanFrame) -> bool {
        frame.is_extended && data_field(frame.can_id) == DATA_FIELD_REALTIME
    }

    fn decode(&mut self, frame: &CanFrame) -> Option<DecodedMessage> {
        self.attempted += 1;
        let now_ns = frame.timestamp_ns;

        let segment = match classify(&frame.data) {
            Ok(segment) => segment,
            Err(e) => {
                self.failed += 1;
                log::warn!("FTCAN frame 0x{:X} dropped: {}", frame.can_id, e);
                return None;
            }
        };

        let key = StreamKey::new(frame.can_id, 0);
        match segment {
            Segment::Single(payload) => Some(self.emit(
                frame.can_id,
                frame.timestamp_ns,
                1,
                header_fields(frame.can_id),
                payload.to_vec(),
            )),
            Segment::Start { total, chunk } => {
                let header = header_fields(frame.can_id);
                match self
                    .streams
                    .begin(key, total, FIRST_CONT_SEQ, header, chunk, now_ns)
                {
                    BeginOutcome::Complete(done) => Some(self.emit(
                        done.key.can_id,
                        done.started_at_ns,
                        done.frames,
                        done.header,
                        done.payload,
                    )),
                    BeginOutcome::Started => None,
                    BeginOutcome::TooLong { len, max } => {
                        self.failed += 1;
                        log::warn!(
                            "FTCAN stream 0x{:X} rejected: declared {} bytes, limit {}",
                            frame.can_id,
                            len,
                            max
                        );
                        None
                    }
                }
            }
            Segment::Continuation { seq, chunk } => {
                match self.streams.append(key, seq, chunk, now_ns) {
                    AppendOutcome::Complete(done) => Some(self.emit(
                        done.key.can_id,
                        done.started_at_ns,
                        done.frames,
                        done.header,
                        done.payload,
                    )),
                    AppendOutcome::Accepted => None,
                    AppendOutcome::NotFound => {
                        self.failed += 1;
                        log::debug!(
                            "FTCAN continuation 0x{:X} seq {} has no stream",
                            frame.can_id,
                            seq
                        );
                        None
                    }
                    AppendOutcome::SequenceMismatch { expected, got } => {
                        self.failed += 1;
                        log::warn!(
                            "FTCAN stream 0x{:X} dropped: expected seq {}, got {}",
                            frame.can_id,
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

    fn ft_id(product: u32, field: u32, message: u32) -> u32 {
        (product << 14) | (field << 11) | message
    }

    fn frame(can_id: u32, data: Vec<u8>) -> CanFrame {
        CanFrame::new(can_id, true, data, 1_000_000_000)
    }

    #[test]
    fn test_identifier_split() {
        let id = ft_id(0x0280, 2, 0x100);
        assert_eq!(product_id(id), 0x0280);
        assert_eq!(data_field(id), 2);
        assert_eq!(message_id(id), 0x100);
    }

    #[test]
    fn test_candidate_requires_realtime_data_field() {
        let decoder = FtcanDecoder::default();

        let rt = frame(ft_id(0x0280, 2, 0x100), vec![0xFF]);
        assert!(decoder.is_candidate(&rt));

        let other_field = frame(ft_id(0x0280, 3, 0x100), vec![0xFF]);
        assert!(!decoder.is_candidate(&other_field));

        let standard = CanFrame::new(0x280, false, vec![0xFF], 0);
        assert!(!decoder.is_candidate(&standard));
    }

    #[test]
    fn test_single_packet_measure_with_alert() {
        let mut decoder = FtcanDecoder::default();
        let id = ft_id(0x0280, 2, 0x100);

        // field ID 0x0027 = measure 0x13 (o2_general) with alert bit set,
        // raw value 850 scaled by 0.001
        let msg = decoder
            .decode(&frame(id, vec![0xFF, 0x00, 0x27, 0x03, 0x52, 0x00, 0x00, 0x00]))
            .expect("single packet should decode");

        assert!(msg.success);
        assert_eq!(msg.frame_count, 1);
        assert_eq!(msg.header_value("product"), Some(0x0280));
        assert_eq!(msg.header_value("data_field"), Some(2));

        let o2 = msg.field("o2_general").expect("measure 0x13 is known");
        assert!(o2.ok);
        assert_eq!(o2.raw, 850);
        assert!((o2.value.as_f64() - 0.850).abs() < 1e-9);
        assert_eq!(o2.unit.as_deref(), Some("λ"));

        let alert = msg.field("o2_general_alert").expect("alert flag was set");
        assert_eq!(alert.value, FieldValue::Boolean(true));
    }

    #[test]
    fn test_alert_clear_omits_companion() {
        let mut decoder = FtcanDecoder::default();
        let id = ft_id(0x0280, 2, 0x100);

        // field ID 0x0026 = measure 0x13 with alert bit clear
        let msg = decoder
            .decode(&frame(id, vec![0xFF, 0x00, 0x26, 0x03, 0x52]))
            .unwrap();
        assert!(msg.field("o2_general").is_some());
        assert!(msg.field("o2_general_alert").is_none());
    }

    #[test]
    fn test_multi_frame_stream_round_trip() {
        let mut decoder = FtcanDecoder::default();
        let id = ft_id(0x0280, 2, 0x100);

        // 8-byte payload: engine_rpm 4500 and battery_voltage 13.8
        let start = decoder.decode(&frame(id, vec![0x00, 0x00, 0x08, 0x00, 0x02, 0x11, 0x94, 0x00]));
        assert!(start.is_none());
        assert_eq!(decoder.stats().active_streams, 1);

        let msg = decoder
            .decode(&frame(id, vec![0x01, 0x12, 0x05, 0x64]))
            .expect("continuation completes the stream");

        assert_eq!(msg.frame_count, 2);
        assert_eq!(msg.payload, vec![0x00, 0x02, 0x11, 0x94, 0x00, 0x12, 0x05, 0x64]);
        assert_eq!(
            msg.field("engine_rpm").unwrap().value,
            FieldValue::Integer(4500)
        );
        assert!((msg.field("battery_voltage").unwrap().value.as_f64() - 13.8).abs() < 1e-9);
        assert_eq!(decoder.stats().active_streams, 0);
    }

    #[test]
    fn test_padding_cells_and_partial_cell_skipped() {
        let mut decoder = FtcanDecoder::default();
        let id = ft_id(0x0280, 2, 0x100);

        // 11-byte payload: padding cell, one real cell, then a 3-byte partial cell
        assert!(decoder
            .decode(&frame(id, vec![0x00, 0x00, 0x0B, 0x00, 0x00, 0xAA, 0xBB, 0x00]))
            .is_none());
        let msg = decoder
            .decode(&frame(id, vec![0x01, 0x02, 0x11, 0x94, 0x00, 0x2A, 0x01]))
            .unwrap();

        assert_eq!(msg.payload.len(), 11);
        assert_eq!(msg.fields.len(), 1);
        assert_eq!(msg.field("engine_rpm").unwrap().raw, 4500);
    }

    #[test]
    fn test_unknown_measure_keeps_message_partial() {
        let mut decoder = FtcanDecoder::default();
        let id = ft_id(0x0280, 2, 0x100);

        // measure 0x2B is not in the table, measure 0x01 is
        let msg = decoder
            .decode(&frame(id, vec![0xFF, 0x00, 0x56, 0x04, 0xD2, 0x00, 0x02, 0x11]))
            .unwrap();

        // second cell is partial (3 bytes), only the unknown one decodes
        let unknown = msg.field("measure_0x002B").unwrap();
        assert!(!unknown.ok);
        assert_eq!(unknown.raw, 1234);
        assert!(!msg.success);
    }

    #[test]
    fn test_orphan_continuation_counts_failed() {
        let mut decoder = FtcanDecoder::default();
        let id = ft_id(0x0280, 2, 0x100);

        assert!(decoder.decode(&frame(id, vec![0x07, 0x01, 0x02])).is_none());
        let stats = decoder.stats();
        assert_eq!(stats.attempted, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.decoded, 0);
    }

    #[test]
    fn test_malformed_frames_count_failed() {
        let mut decoder = FtcanDecoder::default();
        let id = ft_id(0x0280, 2, 0x100);

        assert!(decoder.decode(&frame(id, vec![])).is_none());
        assert!(decoder.decode(&frame(id, vec![0x00, 0x01])).is_none());
        // over the 1783-byte limit
        assert!(decoder.decode(&frame(id, vec![0x00, 0x07, 0x00, 0xAA])).is_none());
        assert_eq!(decoder.stats().failed, 3);
        assert_eq!(decoder.stats().active_streams, 0);
    }

    #[test]
    fn test_sequence_mismatch_drops_stream() {
        let mut decoder = FtcanDecoder::default();
        let id = ft_id(0x0280, 2, 0x100);

        decoder.decode(&frame(id, vec![0x00, 0x00, 0x20, 0x01, 0x02, 0x03, 0x04, 0x05]));
        assert!(decoder.decode(&frame(id, vec![0x03, 0x06, 0x07])).is_none());

        let stats = decoder.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.active_streams, 0);
    }

    #[test]
    fn test_reset_clears_streams_and_counters() {
        let mut decoder = FtcanDecoder::default();
        let id = ft_id(0x0280, 2, 0x100);

        decoder.decode(&frame(id, vec![0x00, 0x00, 0x20, 0x01, 0x02, 0x03, 0x04, 0x05]));
        decoder.decode(&frame(id, vec![0xFF, 0x00, 0x02, 0x11, 0x94]));
        decoder.reset();

        assert_eq!(decoder.stats(), DecoderStats::default());
    }

    #[test]
    fn test_reset_stats_keeps_streams() {
        let mut decoder = FtcanDecoder::default();
        let id = ft_id(0x0280, 2, 0x100);

        decoder.decode(&frame(id, vec![0x00, 0x00, 0x08, 0x00, 0x02, 0x11, 0x94, 0x00]));
        decoder.reset_stats();

        assert_eq!(decoder.stats().attempted, 0);
        assert_eq!(decoder.stats().active_streams, 1);

        // the in-flight stream still completes
        assert!(decoder
            .decode(&frame(id, vec![0x01, 0x12, 0x05, 0x64]))
            .is_some());
    }
}

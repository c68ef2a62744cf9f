//! OBD-II diagnostics decoder (ISO-TP transport)
//!
//! Claims the classic 11-bit diagnostic window (requests 0x7E0-0x7E7 plus
//! the 0x7DF broadcast, responses 0x7E8-0x7EF) and 29-bit ISO 15765-4 fixed
//! addressing (`0x18DAttss`). Frames are ISO-TP framed: the upper nibble of
//! the first byte selects Single Frame, First Frame, Consecutive Frame or
//! Flow Control. Complete payloads are decoded at the service layer: the
//! standard PID table for services 0x41/0x42, stored trouble codes for 0x43
//! and the VIN for service 0x49 PID 0x02. Requests reassemble the same way
//! but decode structurally only.

use crate::fields::{self, FieldDef};
use crate::registry::ProtocolDecoder;
use crate::stream::{AppendOutcome, BeginOutcome, StreamConfig, StreamKey, StreamTable};
use crate::types::{
    CanFrame, DecodedField, DecodedMessage, DecoderError, DecoderStats, FieldValue, HeaderField,
    ProtocolId, Result,
};

/// 11-bit physical request range base
pub const REQUEST_BASE: u32 = 0x7E0;
/// 11-bit response range base
pub const RESPONSE_BASE: u32 = 0x7E8;
/// Functional (broadcast) request identifier
pub const BROADCAST_ID: u32 = 0x7DF;
/// Sub-channel reported for broadcast requests
const BROADCAST_CHANNEL: u8 = 0xFF;
/// External test equipment address in 29-bit fixed addressing
const TESTER_ADDRESS: u32 = 0xF1;

const PCI_SINGLE: u8 = 0x0;
const PCI_FIRST: u8 = 0x1;
const PCI_CONSECUTIVE: u8 = 0x2;
const PCI_FLOW_CONTROL: u8 = 0x3;

/// First Frame lengths are 12 bits
const MAX_PAYLOAD: usize = 4095;
/// Consecutive sequence numbers wrap at 16; the first one after a FF is 1
const SEQ_MODULUS: u8 = 16;
const FIRST_CONT_SEQ: u8 = 1;

/// Standard PID table for services 0x41/0x42
///
/// Bit positions are relative to the data region after the service and PID
/// bytes. PID 0x01 decomposes into two fields (MIL bit plus DTC count).
pub const PID_FIELDS: &[FieldDef] = &[
    FieldDef::new(0x01, "mil", None, 0, 1, false, 1.0, 0.0),
    FieldDef::new(0x01, "dtc_count", None, 1, 7, false, 1.0, 0.0),
    FieldDef::new(0x04, "engine_load", Some("%"), 0, 8, false, 100.0 / 255.0, 0.0),
    FieldDef::new(0x05, "coolant_temp", Some("°C"), 0, 8, false, 1.0, -40.0),
    FieldDef::new(0x0A, "fuel_pressure", Some("kPa"), 0, 8, false, 3.0, 0.0),
    FieldDef::new(0x0B, "intake_pressure", Some("kPa"), 0, 8, false, 1.0, 0.0),
    FieldDef::new(0x0C, "engine_rpm", Some("rpm"), 0, 16, false, 0.25, 0.0),
    FieldDef::new(0x0D, "vehicle_speed", Some("km/h"), 0, 8, false, 1.0, 0.0),
    FieldDef::new(0x0E, "timing_advance", Some("°"), 0, 8, false, 0.5, -64.0),
    FieldDef::new(0x0F, "intake_temp", Some("°C"), 0, 8, false, 1.0, -40.0),
    FieldDef::new(0x10, "maf_rate", Some("g/s"), 0, 16, false, 0.01, 0.0),
    FieldDef::new(0x11, "throttle_position", Some("%"), 0, 8, false, 100.0 / 255.0, 0.0),
    FieldDef::new(0x1F, "run_time", Some("s"), 0, 16, false, 1.0, 0.0),
    FieldDef::new(0x2F, "fuel_level", Some("%"), 0, 8, false, 100.0 / 255.0, 0.0),
    FieldDef::new(0x42, "module_voltage", Some("V"), 0, 16, false, 0.001, 0.0),
    FieldDef::new(0x5C, "oil_temp", Some("°C"), 0, 8, false, 1.0, -40.0),
];

/// Decode a 2-byte diagnostic trouble code into its 5-character form
///
/// The top two bits select the system letter (P/C/B/U), the next two bits
/// are the first digit, and the remaining three nibbles print as hex.
pub fn dtc_from_bytes(high: u8, low: u8) -> String {
    let system = match high >> 6 {
        0 => 'P',
        1 => 'C',
        2 => 'B',
        _ => 'U',
    };
    format!(
        "{}{}{:X}{:X}{:X}",
        system,
        (high >> 4) & 0x03,
        high & 0x0F,
        low >> 4,
        low & 0x0F
    )
}

/// Where a diagnostic frame sits in the request/response addressing scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ObdAddress {
    /// ECU sub-channel the stream is keyed on
    channel: u8,
    /// True for tester-to-ECU traffic
    request: bool,
}

fn address_of(frame: &CanFrame) -> Option<ObdAddress> {
    if frame.is_extended {
        if (frame.can_id >> 16) == 0x18DA {
            let target = (frame.can_id >> 8) & 0xFF;
            let source = frame.can_id & 0xFF;
            if target == TESTER_ADDRESS {
                return Some(ObdAddress {
                    channel: source as u8,
                    request: false,
                });
            }
            if source == TESTER_ADDRESS {
                return Some(ObdAddress {
                    channel: target as u8,
                    request: true,
                });
            }
        }
        return None;
    }

    match frame.can_id {
        BROADCAST_ID => Some(ObdAddress {
            channel: BROADCAST_CHANNEL,
            request: true,
        }),
        id @ REQUEST_BASE..=0x7E7 => Some(ObdAddress {
            channel: (id - REQUEST_BASE) as u8,
            request: true,
        }),
        id @ RESPONSE_BASE..=0x7EF => Some(ObdAddress {
            channel: (id - RESPONSE_BASE) as u8,
            request: false,
        }),
        _ => None,
    }
}

/// ISO-TP role of one frame
enum TpFrame<'a> {
    Single { payload: &'a [u8] },
    First { total: usize, chunk: &'a [u8] },
    Consecutive { seq: u8, chunk: &'a [u8] },
    FlowControl { status: u8, block_size: u8, st_min: u8 },
}

fn classify(data: &[u8]) -> Result<TpFrame<'_>> {
    let b0 = *data
        .first()
        .ok_or_else(|| DecoderError::MalformedFrame("empty ISO-TP frame".to_string()))?;

    match b0 >> 4 {
        PCI_SINGLE => {
            let len = (b0 & 0x0F) as usize;
            if len == 0 {
                return Err(DecoderError::MalformedFrame(
                    "single frame declares zero length".to_string(),
                ));
            }
            if len > data.len() - 1 {
                return Err(DecoderError::MalformedFrame(format!(
                    "single frame declares {} bytes but only {} follow",
                    len,
                    data.len() - 1
                )));
            }
            Ok(TpFrame::Single {
                payload: &data[1..=len],
            })
        }
        PCI_FIRST => {
            if data.len() < 2 {
                return Err(DecoderError::MalformedFrame(
                    "first frame too short for length header".to_string(),
                ));
            }
            let total = (((b0 & 0x0F) as usize) << 8) | data[1] as usize;
            if total < 8 {
                return Err(DecoderError::MalformedFrame(format!(
                    "first frame declares {} bytes, below the single-frame range",
                    total
                )));
            }
            Ok(TpFrame::First {
                total,
                chunk: &data[2..],
            })
        }
        PCI_CONSECUTIVE => {
            if data.len() < 2 {
                return Err(DecoderError::MalformedFrame(
                    "consecutive frame carries no data".to_string(),
                ));
            }
            Ok(TpFrame::Consecutive {
                seq: b0 & 0x0F,
                chunk: &data[1..],
            })
        }
        PCI_FLOW_CONTROL => {
            if data.len() < 3 {
                return Err(DecoderError::MalformedFrame(
                    "flow control frame too short".to_string(),
                ));
            }
            Ok(TpFrame::FlowControl {
                status: b0 & 0x0F,
                block_size: data[1],
                st_min: data[2],
            })
        }
        nibble => Err(DecoderError::MalformedFrame(format!(
            "reserved PCI type 0x{:X}",
            nibble
        ))),
    }
}

fn decode_pid_region(pid: u8, region: &[u8]) -> Vec<DecodedField> {
    let mut out: Vec<DecodedField> = fields::defs_for(PID_FIELDS, pid as u16)
        .filter_map(|def| def.decode(region))
        .collect();

    if out.is_empty() && fields::defs_for(PID_FIELDS, pid as u16).next().is_none() {
        let raw = region
            .iter()
            .take(8)
            .fold(0i64, |acc, &b| (acc << 8) | b as i64);
        out.push(fields::unknown_field(
            pid as u32,
            format!("pid_0x{:02X}", pid),
            raw,
        ));
    }

    out
}

fn decode_dtc_list(region: &[u8]) -> (Vec<DecodedField>, bool) {
    let (&count, pairs) = match region.split_first() {
        Some(split) => split,
        None => return (Vec::new(), false),
    };

    let mut out = vec![DecodedField {
        id: 0,
        name: "dtc_count".to_string(),
        value: FieldValue::Integer(count as i64),
        unit: None,
        raw: count as i64,
        ok: true,
    }];

    let mut index = 0usize;
    for pair in pairs.chunks_exact(2) {
        if pair[0] == 0 && pair[1] == 0 {
            continue;
        }
        index += 1;
        let raw = ((pair[0] as u16) << 8) | pair[1] as u16;
        out.push(DecodedField {
            id: raw as u32,
            name: format!("dtc_{}", index),
            value: FieldValue::Text(dtc_from_bytes(pair[0], pair[1])),
            unit: None,
            raw: raw as i64,
            ok: true,
        });
    }

    (out, true)
}

fn decode_vin(region: &[u8]) -> (Vec<DecodedField>, bool) {
    // a leading non-printable byte is the data item count, not VIN text
    let body = match region.split_first() {
        Some((&first, rest)) if first < 0x20 => rest,
        _ => region,
    };

    let vin: String = body
        .iter()
        .filter(|&&b| (0x20..0x7F).contains(&b))
        .map(|&b| b as char)
        .collect();

    if vin.is_empty() {
        return (Vec::new(), false);
    }

    let field = DecodedField {
        id: 0x02,
        name: "vin".to_string(),
        value: FieldValue::Text(vin),
        unit: None,
        raw: 0,
        ok: true,
    };
    (vec![field], true)
}

fn decode_response(service: u8, rest: &[u8], header: &mut Vec<HeaderField>) -> (Vec<DecodedField>, bool) {
    match service {
        0x41 | 0x42 => match rest.split_first() {
            Some((&pid, region)) => {
                header.push(HeaderField::new("pid", pid as i64));
                let fields = decode_pid_region(pid, region);
                let success = fields.iter().any(|f| f.ok);
                (fields, success)
            }
            None => (Vec::new(), false),
        },
        0x43 => decode_dtc_list(rest),
        0x49 => match rest.split_first() {
            Some((&pid, region)) => {
                header.push(HeaderField::new("pid", pid as i64));
                if pid == 0x02 {
                    decode_vin(region)
                } else {
                    (Vec::new(), false)
                }
            }
            None => (Vec::new(), false),
        },
        _ => (Vec::new(), false),
    }
}

/// Stateful OBD-II decoder
pub struct ObdDecoder {
    streams: StreamTable,
    attempted: u64,
    decoded: u64,
    failed: u64,
}

impl ObdDecoder {
    /// Create a decoder with the given reassembly timeout
    pub fn new(timeout_ns: u64) -> Self {
        Self {
            streams: StreamTable::new(StreamConfig::new(timeout_ns, SEQ_MODULUS, MAX_PAYLOAD)),
            attempted: 0,
            decoded: 0,
            failed: 0,
        }
    }

    fn base_header(address: ObdAddress) -> Vec<HeaderField> {
        let mut header = vec![HeaderField::new("ecu", address.channel as i64)];
        if address.request {
            header.push(HeaderField::new("request", 1));
        }
        header
    }

    fn emit(
        &mut self,
        can_id: u32,
        timestamp_ns: u64,
        frame_count: usize,
        mut header: Vec<HeaderField>,
        request: bool,
        payload: Vec<u8>,
    ) -> DecodedMessage {
        let (fields, success) = match payload.split_first() {
            Some((&service, rest)) => {
                header.push(HeaderField::new("service", service as i64));
                if request {
                    if let Some(&pid) = rest.first() {
                        header.push(HeaderField::new("pid", pid as i64));
                    }
                    (Vec::new(), true)
                } else {
                    decode_response(service, rest, &mut header)
                }
            }
            None => (Vec::new(), false),
        };

        self.decoded += 1;
        DecodedMessage {
            timestamp_ns,
            protocol: ProtocolId::Obd,
            can_id,
            frame_count,
            header,
            payload,
            fields,
            success,
        }
    }
}

impl Default for ObdDecoder {
    fn default() -> Self {
        Self::new(crate::stream::DEFAULT_STREAM_TIMEOUT_NS)
    }
}

impl ProtocolDecoder for ObdDecoder {
    fn protocol(&self) -> ProtocolId {
        ProtocolId::Obd
    }

    fn is_candidate(&self, frame: &CanFrame) -> bool {
        if address_of(frame).is_none() {
            return false;
        }
        // reserved PCI types are not ISO-TP traffic, leave them alone
        matches!(frame.data.first(), Some(b0) if (b0 >> 4) <= PCI_FLOW_CONTROL)
    }

    fn decode(&mut self, frame: &CanFrame) -> Option<DecodedMessage> {
        self.attempted += 1;
        let address = address_of(frame)?;
        let now_ns = frame.timestamp_ns;

        let tp = match classify(&frame.data) {
            Ok(tp) => tp,
            Err(e) => {
                self.failed += 1;
                log::warn!("ISO-TP frame 0x{:X} dropped: {}", frame.can_id, e);
                return None;
            }
        };

        let key = StreamKey::new(frame.can_id, address.channel);
        match tp {
            TpFrame::Single { payload } => Some(self.emit(
                frame.can_id,
                frame.timestamp_ns,
                1,
                Self::base_header(address),
                address.request,
                payload.to_vec(),
            )),
            TpFrame::First { total, chunk } => {
                let header = Self::base_header(address);
                match self
                    .streams
                    .begin(key, total, FIRST_CONT_SEQ, header, chunk, now_ns)
                {
                    BeginOutcome::Complete(done) => Some(self.emit(
                        done.key.can_id,
                        done.started_at_ns,
                        done.frames,
                        done.header,
                        address.request,
                        done.payload,
                    )),
                    BeginOutcome::Started => None,
                    BeginOutcome::TooLong { len, max } => {
                        self.failed += 1;
                        log::warn!(
                            "ISO-TP stream 0x{:X} rejected: declared {} bytes, limit {}",
                            frame.can_id,
                            len,
                            max
                        );
                        None
                    }
                }
            }
            TpFrame::Consecutive { seq, chunk } => match self.streams.append(key, seq, chunk, now_ns) {
                AppendOutcome::Complete(done) => Some(self.emit(
                    done.key.can_id,
                    done.started_at_ns,
                    done.frames,
                    done.header,
                    address.request,
                    done.payload,
                )),
                AppendOutcome::Accepted => None,
                AppendOutcome::NotFound => {
                    self.failed += 1;
                    log::debug!(
                        "ISO-TP consecutive frame 0x{:X} seq {} has no stream",
                        frame.can_id,
                        seq
                    );
                    None
                }
                AppendOutcome::SequenceMismatch { expected, got } => {
                    self.failed += 1;
                    log::warn!(
                        "ISO-TP stream 0x{:X} dropped: expected seq {}, got {}",
                        frame.can_id,
                        expected,
                        got
                    );
                    None
                }
            },
            TpFrame::FlowControl {
                status,
                block_size,
                st_min,
            } => {
                // pacing is the sender's concern, nothing to reassemble
                log::debug!(
                    "Flow control on 0x{:X}: status {}, block size {}, st_min {}",
                    frame.can_id,
                    status,
                    block_size,
                    st_min
                );
                None
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

    fn response(data: Vec<u8>) -> CanFrame {
        CanFrame::new(0x7E8, false, data, 1_000_000_000)
    }

    #[test]
    fn test_dtc_formatting() {
        assert_eq!(dtc_from_bytes(0x03, 0x01), "P0301");
        assert_eq!(dtc_from_bytes(0x01, 0x71), "P0171");
        assert_eq!(dtc_from_bytes(0x51, 0x23), "C1123");
        assert_eq!(dtc_from_bytes(0x9A, 0xBC), "B1ABC");
        assert_eq!(dtc_from_bytes(0xD2, 0x34), "U1234");
    }

    #[test]
    fn test_candidate_ranges() {
        let decoder = ObdDecoder::default();

        assert!(decoder.is_candidate(&response(vec![0x02, 0x01, 0x0C])));
        assert!(decoder.is_candidate(&CanFrame::new(0x7E0, false, vec![0x02, 0x01, 0x0C], 0)));
        assert!(decoder.is_candidate(&CanFrame::new(0x7DF, false, vec![0x02, 0x01, 0x00], 0)));
        assert!(decoder.is_candidate(&CanFrame::new(0x18DAF110, true, vec![0x02, 0x41, 0x0C], 0)));
        assert!(decoder.is_candidate(&CanFrame::new(0x18DA10F1, true, vec![0x02, 0x01, 0x0C], 0)));

        // outside the diagnostic windows
        assert!(!decoder.is_candidate(&CanFrame::new(0x7C0, false, vec![0x02, 0x01, 0x0C], 0)));
        assert!(!decoder.is_candidate(&CanFrame::new(0x18DB33F1, true, vec![0x02, 0x01, 0x0C], 0)));
        // reserved PCI nibble
        assert!(!decoder.is_candidate(&response(vec![0x80, 0x01, 0x02])));
        // empty frame
        assert!(!decoder.is_candidate(&response(vec![])));
    }

    #[test]
    fn test_single_frame_rpm_response() {
        let mut decoder = ObdDecoder::default();

        let msg = decoder
            .decode(&response(vec![0x04, 0x41, 0x0C, 0x1A, 0xF8, 0x00, 0x00, 0x00]))
            .expect("single frame should decode");

        assert!(msg.success);
        assert_eq!(msg.frame_count, 1);
        assert_eq!(msg.payload, vec![0x41, 0x0C, 0x1A, 0xF8]);
        assert_eq!(msg.header_value("ecu"), Some(0));
        assert_eq!(msg.header_value("service"), Some(0x41));
        assert_eq!(msg.header_value("pid"), Some(0x0C));

        let rpm = msg.field("engine_rpm").unwrap();
        assert_eq!(rpm.value, FieldValue::Float(1726.0));
        assert_eq!(rpm.raw, 6904);
        assert_eq!(rpm.unit.as_deref(), Some("rpm"));
    }

    #[test]
    fn test_status_pid_decomposes_into_bits() {
        let mut decoder = ObdDecoder::default();

        // 0x83 = MIL on, 3 stored DTCs
        let msg = decoder
            .decode(&response(vec![0x03, 0x41, 0x01, 0x83]))
            .unwrap();

        assert_eq!(msg.field("mil").unwrap().value, FieldValue::Boolean(true));
        assert_eq!(msg.field("dtc_count").unwrap().value, FieldValue::Integer(3));
    }

    #[test]
    fn test_unknown_pid_keeps_message() {
        let mut decoder = ObdDecoder::default();

        let msg = decoder
            .decode(&response(vec![0x04, 0x41, 0x33, 0xAB, 0xCD]))
            .unwrap();

        let field = msg.field("pid_0x33").unwrap();
        assert!(!field.ok);
        assert_eq!(field.raw, 0xABCD);
        assert!(!msg.success);
        assert_eq!(decoder.stats().decoded, 1);
    }

    #[test]
    fn test_unknown_service_is_structural() {
        let mut decoder = ObdDecoder::default();

        let msg = decoder
            .decode(&response(vec![0x02, 0x51, 0x01]))
            .expect("unknown services still emit structurally");

        assert_eq!(msg.header_value("service"), Some(0x51));
        assert!(msg.fields.is_empty());
        assert!(!msg.success);
    }

    #[test]
    fn test_request_decodes_structurally() {
        let mut decoder = ObdDecoder::default();

        let msg = decoder
            .decode(&CanFrame::new(0x7DF, false, vec![0x02, 0x01, 0x0C], 0))
            .unwrap();

        assert_eq!(msg.header_value("request"), Some(1));
        assert_eq!(msg.header_value("ecu"), Some(0xFF));
        assert_eq!(msg.header_value("service"), Some(0x01));
        assert_eq!(msg.header_value("pid"), Some(0x0C));
        assert!(msg.fields.is_empty());
        assert!(msg.success);
    }

    #[test]
    fn test_stored_dtc_response() {
        let mut decoder = ObdDecoder::default();

        // 2 DTCs: P0301 and P0171
        let msg = decoder
            .decode(&response(vec![0x06, 0x43, 0x02, 0x03, 0x01, 0x01, 0x71]))
            .unwrap();

        assert!(msg.success);
        assert_eq!(msg.field("dtc_count").unwrap().value, FieldValue::Integer(2));
        assert_eq!(
            msg.field("dtc_1").unwrap().value,
            FieldValue::Text("P0301".to_string())
        );
        assert_eq!(
            msg.field("dtc_2").unwrap().value,
            FieldValue::Text("P0171".to_string())
        );
    }

    #[test]
    fn test_dtc_padding_pairs_skipped() {
        let (fields, success) = decode_dtc_list(&[0x01, 0x03, 0x01, 0x00, 0x00]);
        assert!(success);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[1].name, "dtc_1");

        // empty region cannot carry the count byte
        let (fields, success) = decode_dtc_list(&[]);
        assert!(!success);
        assert!(fields.is_empty());
    }

    #[test]
    fn test_multi_frame_vin_response() {
        let mut decoder = ObdDecoder::default();

        // 20-byte payload: 49 02 01 + 17-character VIN
        assert!(decoder
            .decode(&response(vec![0x10, 0x14, 0x49, 0x02, 0x01, 0x57, 0x56, 0x57]))
            .is_none());
        assert_eq!(decoder.stats().active_streams, 1);

        assert!(decoder
            .decode(&response(vec![0x21, 0x5A, 0x5A, 0x5A, 0x31, 0x4B, 0x5A, 0x41]))
            .is_none());

        let msg = decoder
            .decode(&response(vec![0x22, 0x57, 0x30, 0x39, 0x38, 0x37, 0x36, 0x35]))
            .expect("final consecutive frame completes the stream");

        assert_eq!(msg.frame_count, 3);
        assert_eq!(msg.header_value("service"), Some(0x49));
        assert_eq!(msg.header_value("pid"), Some(0x02));
        assert_eq!(
            msg.field("vin").unwrap().value,
            FieldValue::Text("WVWZZZ1KZAW098765".to_string())
        );
        assert!(msg.success);
    }

    #[test]
    fn test_flow_control_consumed_silently() {
        let mut decoder = ObdDecoder::default();

        let out = decoder.decode(&CanFrame::new(0x7E0, false, vec![0x30, 0x00, 0x0A], 0));
        assert!(out.is_none());

        let stats = decoder.stats();
        assert_eq!(stats.attempted, 1);
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.decoded, 0);
    }

    #[test]
    fn test_malformed_single_frame_counts_failed() {
        let mut decoder = ObdDecoder::default();

        // declared 6 bytes, only 2 present
        assert!(decoder.decode(&response(vec![0x06, 0x41, 0x0C])).is_none());
        // first frame below the multi-frame range
        assert!(decoder.decode(&response(vec![0x10, 0x05, 0x41, 0x0C, 0x00, 0x00, 0x00, 0x00])).is_none());
        assert_eq!(decoder.stats().failed, 2);
    }

    #[test]
    fn test_sequence_mismatch_drops_stream() {
        let mut decoder = ObdDecoder::default();

        decoder.decode(&response(vec![0x10, 0x14, 0x49, 0x02, 0x01, 0x57, 0x56, 0x57]));
        // sequence jumps to 2 instead of 1
        assert!(decoder
            .decode(&response(vec![0x22, 0x5A, 0x5A, 0x5A, 0x31, 0x4B, 0x5A, 0x41]))
            .is_none());

        let stats = decoder.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.active_streams, 0);

        // the rest of the old stream is now orphaned
        assert!(decoder
            .decode(&response(vec![0x23, 0x57, 0x30, 0x39, 0x38, 0x37, 0x36, 0x35]))
            .is_none());
        assert_eq!(decoder.stats().failed, 2);
    }

    #[test]
    fn test_extended_addressing_channels_isolate() {
        let mut decoder = ObdDecoder::default();

        // two ECUs answer interleaved on 29-bit fixed addressing
        assert!(decoder
            .decode(&CanFrame::new(0x18DAF110, true, vec![0x10, 0x0A, 0x49, 0x02, 0x01, 0x41, 0x41, 0x41], 0))
            .is_none());
        assert!(decoder
            .decode(&CanFrame::new(0x18DAF117, true, vec![0x10, 0x0A, 0x49, 0x02, 0x01, 0x42, 0x42, 0x42], 0))
            .is_none());

        let first = decoder
            .decode(&CanFrame::new(0x18DAF110, true, vec![0x21, 0x41, 0x41, 0x41, 0x41, 0x00, 0x00, 0x00], 0))
            .expect("ECU 0x10 stream completes");
        let second = decoder
            .decode(&CanFrame::new(0x18DAF117, true, vec![0x21, 0x42, 0x42, 0x42, 0x42, 0x00, 0x00, 0x00], 0))
            .expect("ECU 0x17 stream completes");

        assert_eq!(first.header_value("ecu"), Some(0x10));
        assert_eq!(first.field("vin").unwrap().value, FieldValue::Text("AAAAAAA".to_string()));
        assert_eq!(second.header_value("ecu"), Some(0x17));
        assert_eq!(second.field("vin").unwrap().value, FieldValue::Text("BBBBBBB".to_string()));
    }
}

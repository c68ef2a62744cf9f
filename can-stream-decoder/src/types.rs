//! Core types for the CAN stream decoder library
//!
//! This module defines the raw frame input type and the decoded message output
//! type shared by all protocol decoders. The decoders are push-based: they
//! consume one frame at a time and emit a [`DecodedMessage`] whenever a frame
//! (or a reassembled multi-frame stream) completes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp type used throughout the decoder
pub type Timestamp = DateTime<Utc>;

/// Result type for decoder operations
pub type Result<T> = std::result::Result<T, DecoderError>;

/// Raw CAN frame as captured from the bus or a log file
///
/// This is the only input the decoders accept. Classic CAN only: 11-bit or
/// 29-bit identifier and 0-8 data bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct CanFrame {
    /// Timestamp in nanoseconds since epoch (0 if the source had none)
    pub timestamp_ns: u64,
    /// CAN message ID (11-bit or 29-bit)
    pub can_id: u32,
    /// Frame data bytes (0-8 bytes)
    pub data: Vec<u8>,
    /// True if this is an extended (29-bit) CAN ID
    pub is_extended: bool,
}

impl CanFrame {
    /// Create a new frame
    pub fn new(can_id: u32, is_extended: bool, data: Vec<u8>, timestamp_ns: u64) -> Self {
        Self {
            timestamp_ns,
            can_id,
            data,
            is_extended,
        }
    }

    /// Convert timestamp from nanoseconds to DateTime<Utc>
    pub fn timestamp(&self) -> Timestamp {
        let secs = (self.timestamp_ns / 1_000_000_000) as i64;
        let nsecs = (self.timestamp_ns % 1_000_000_000) as u32;
        DateTime::from_timestamp(secs, nsecs).unwrap_or_else(Utc::now)
    }

    /// Get the data length code (DLC) - number of data bytes
    pub fn dlc(&self) -> usize {
        self.data.len()
    }
}

/// Errors that can occur during decoding
#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Declared payload length {len} exceeds protocol limit {max}")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Decode worker is no longer running")]
    WorkerStopped,
}

/// Identifies one of the supported wire protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolId {
    /// FuelTech FTCAN 2.0 telemetry
    Ftcan,
    /// OBD-II diagnostics over ISO-TP
    Obd,
    /// VW-group display/control unit protocol
    Display,
}

impl ProtocolId {
    /// Stable lowercase name used in configuration files and CLI flags
    pub fn name(&self) -> &'static str {
        match self {
            ProtocolId::Ftcan => "ftcan",
            ProtocolId::Obd => "obd",
            ProtocolId::Display => "display",
        }
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolId::Ftcan => write!(f, "FTCAN"),
            ProtocolId::Obd => write!(f, "OBD-II"),
            ProtocolId::Display => write!(f, "Display"),
        }
    }
}

/// Field value types supported by the decoders
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Signed integer value
    Integer(i64),
    /// Floating-point value (after scaling/offset)
    Float(f64),
    /// Boolean value (status bits, flags)
    Boolean(bool),
    /// Text value (VIN, diagnostic trouble codes)
    Text(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(v) => write!(f, "{}", v),
            FieldValue::Float(v) => write!(f, "{:.3}", v),
            FieldValue::Boolean(v) => write!(f, "{}", if *v { "true" } else { "false" }),
            FieldValue::Text(v) => write!(f, "{}", v),
        }
    }
}

impl FieldValue {
    /// Convert field value to f64 for thresholding and comparisons
    pub fn as_f64(&self) -> f64 {
        match self {
            FieldValue::Integer(v) => *v as f64,
            FieldValue::Float(v) => *v,
            FieldValue::Boolean(v) => {
                if *v {
                    1.0
                } else {
                    0.0
                }
            }
            FieldValue::Text(_) => 0.0,
        }
    }

    /// Convert field value to i64 if it is numeric
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(v) => Some(*v),
            FieldValue::Float(v) => Some(*v as i64),
            FieldValue::Boolean(v) => Some(if *v { 1 } else { 0 }),
            FieldValue::Text(_) => None,
        }
    }

    /// Interpret this value as a boolean
    pub fn as_bool(&self) -> bool {
        match self {
            FieldValue::Boolean(v) => *v,
            FieldValue::Integer(v) => *v != 0,
            FieldValue::Float(v) => *v != 0.0,
            FieldValue::Text(v) => !v.is_empty(),
        }
    }
}

/// A decoded application-level field with its physical value
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedField {
    /// Protocol-level field identifier (measure ID, PID, ...)
    pub id: u32,
    /// Field name from the protocol's definition table
    pub name: String,
    /// Decoded value (scaled to physical units where applicable)
    pub value: FieldValue,
    /// Engineering unit (e.g., "rpm", "°C", "V")
    pub unit: Option<String>,
    /// Raw value before scaling (useful for debugging)
    pub raw: i64,
    /// False if the field identifier was not in the definition table
    pub ok: bool,
}

/// A structural header field extracted during classification
///
/// Header fields come from the CAN identifier or the transport header of a
/// stream (product ID, service, sub-channel, opcode, ...), as opposed to
/// [`DecodedField`]s which come from the application payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HeaderField {
    /// Field name, fixed per protocol
    pub name: &'static str,
    /// Extracted value
    pub value: i64,
}

impl HeaderField {
    pub fn new(name: &'static str, value: i64) -> Self {
        Self { name, value }
    }
}

/// Fully decoded message - the primary output of the decoders
///
/// One `DecodedMessage` is emitted per completed single-frame message or per
/// completed multi-frame stream. Partial decode failures are surfaced through
/// the per-field `ok` flag and the message-level `success` flag rather than
/// suppressing the message.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedMessage {
    /// Timestamp in nanoseconds of the frame that started the message
    pub timestamp_ns: u64,
    /// Protocol that produced this message
    pub protocol: ProtocolId,
    /// CAN ID of the first frame
    pub can_id: u32,
    /// Number of CAN frames consumed to produce this message
    pub frame_count: usize,
    /// Structural header fields (from the CAN ID and transport header)
    pub header: Vec<HeaderField>,
    /// Complete application payload after reassembly
    pub payload: Vec<u8>,
    /// Decoded application fields (may be empty for structural protocols)
    pub fields: Vec<DecodedField>,
    /// True if the payload decoded as intended by the protocol's tables
    pub success: bool,
}

impl DecodedMessage {
    /// Convert timestamp from nanoseconds to DateTime<Utc>
    pub fn timestamp(&self) -> Timestamp {
        let secs = (self.timestamp_ns / 1_000_000_000) as i64;
        let nsecs = (self.timestamp_ns % 1_000_000_000) as u32;
        DateTime::from_timestamp(secs, nsecs).unwrap_or_else(Utc::now)
    }

    /// Look up a header field by name
    pub fn header_value(&self, name: &str) -> Option<i64> {
        self.header.iter().find(|h| h.name == name).map(|h| h.value)
    }

    /// Look up a decoded field by name
    pub fn field(&self, name: &str) -> Option<&DecodedField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Per-decoder counters, readable at any time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DecoderStats {
    /// Frames this decoder claimed and attempted to decode
    pub attempted: u64,
    /// Messages emitted (including partially decoded ones)
    pub decoded: u64,
    /// Frames or streams dropped as malformed, orphaned or out of sequence
    pub failed: u64,
    /// Streams evicted because they exceeded the reassembly timeout
    pub timed_out: u64,
    /// Reassembly streams currently in progress
    pub active_streams: usize,
}

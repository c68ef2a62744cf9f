//! CAN Stream Decoder Library
//!
//! A push-based engine for turning raw CAN frames into decoded messages
//! across several application protocols sharing one bus: FuelTech FTCAN 2.0
//! telemetry, OBD-II diagnostics over ISO-TP, and the VW-group display
//! protocol.
//!
//! # Architecture
//!
//! The library is organized around a small pipeline:
//! - Protocol decoders classify each frame (single message, stream start,
//!   continuation) and decode completed payloads against static field tables
//! - A shared reassembly table collects multi-frame streams per
//!   `{CAN ID, sub-channel}` key, with supersede-on-restart and timeout
//!   eviction
//! - The registry routes every frame to all enabled decoders that claim it,
//!   in priority order, without short-circuiting
//! - An optional bounded worker thread decouples live capture from decoding
//!
//! Decoding is tolerant of partial failure: unknown fields are emitted with
//! `ok: false` rather than suppressing the message, and malformed or
//! orphaned frames only show up in per-decoder counters.
//!
//! # Example Usage
//!
//! ```no_run
//! use can_stream_decoder::{CanFrame, DecoderRegistry, EngineConfig};
//!
//! let config = EngineConfig::new().with_stream_timeout_ms(2_000);
//! let mut registry = DecoderRegistry::from_config(&config);
//!
//! // OBD-II response: engine RPM = 1726.0
//! let frame = CanFrame::new(0x7E8, false, vec![0x04, 0x41, 0x0C, 0x1A, 0xF8], 0);
//! for message in registry.dispatch(&frame) {
//!     println!("{} message with {} fields", message.protocol, message.fields.len());
//! }
//!
//! for (protocol, stats) in registry.stats() {
//!     println!("{}: {} decoded, {} failed", protocol, stats.decoded, stats.failed);
//! }
//! ```

// Public modules
pub mod config;
pub mod fields;
pub mod protocols;
pub mod registry;
pub mod stream;
pub mod types;
pub mod worker;

// Re-export main types for convenience
pub use config::{DetectionMode, EngineConfig};
pub use registry::{DecoderRegistry, ProtocolDecoder};
pub use types::{
    CanFrame, DecodedField, DecodedMessage, DecoderError, DecoderStats, FieldValue, HeaderField,
    ProtocolId, Result, Timestamp,
};
pub use worker::{DecodeWorker, DEFAULT_QUEUE_CAPACITY};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

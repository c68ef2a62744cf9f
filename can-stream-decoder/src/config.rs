//! Engine configuration types
//!
//! This module defines the configuration consumed by the decoder registry.
//! It deliberately stays small: which decoders run, in what priority order,
//! how long reassembly streams may live, and how eagerly the display
//! protocol claims frames.

use serde::{Deserialize, Serialize};

use crate::types::{DecoderError, ProtocolId, Result};

/// Default reassembly timeout in milliseconds
pub const DEFAULT_STREAM_TIMEOUT_MS: u64 = 2_000;

/// How eagerly the display decoder claims frames
///
/// An unsegmented display frame has no strong signature (just a clear top
/// bit), so claiming those is opt-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMode {
    /// Only claim frames with the segmented-framing signature
    Conservative,
    /// Additionally claim unsegmented frames
    Aggressive,
}

impl Default for DetectionMode {
    fn default() -> Self {
        DetectionMode::Conservative
    }
}

/// Per-decoder registry settings
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ProtocolSettings {
    /// Whether the decoder participates in dispatch
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Dispatch order, higher first
    #[serde(default)]
    pub priority: i32,
}

impl Default for ProtocolSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: 0,
        }
    }
}

/// Display decoder settings: registry settings plus the detection mode
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DisplaySettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub detection: DetectionMode,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            priority: 0,
            detection: DetectionMode::default(),
        }
    }
}

/// Configuration for the decoding engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Reassembly timeout in milliseconds, shared by all decoders
    #[serde(default = "default_stream_timeout_ms")]
    pub stream_timeout_ms: u64,

    /// FTCAN telemetry decoder settings
    #[serde(default)]
    pub ftcan: ProtocolSettings,

    /// OBD-II diagnostics decoder settings
    #[serde(default)]
    pub obd: ProtocolSettings,

    /// Display protocol decoder settings
    #[serde(default)]
    pub display: DisplaySettings,
}

fn default_true() -> bool {
    true
}

fn default_stream_timeout_ms() -> u64 {
    DEFAULT_STREAM_TIMEOUT_MS
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stream_timeout_ms: DEFAULT_STREAM_TIMEOUT_MS,
            ftcan: ProtocolSettings::default(),
            obd: ProtocolSettings::default(),
            display: DisplaySettings::default(),
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the reassembly timeout
    pub fn with_stream_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.stream_timeout_ms = timeout_ms;
        self
    }

    /// Builder method: enable or disable one decoder
    pub fn with_decoder_enabled(mut self, protocol: ProtocolId, enabled: bool) -> Self {
        match protocol {
            ProtocolId::Ftcan => self.ftcan.enabled = enabled,
            ProtocolId::Obd => self.obd.enabled = enabled,
            ProtocolId::Display => self.display.enabled = enabled,
        }
        self
    }

    /// Builder method: set one decoder's dispatch priority
    pub fn with_priority(mut self, protocol: ProtocolId, priority: i32) -> Self {
        match protocol {
            ProtocolId::Ftcan => self.ftcan.priority = priority,
            ProtocolId::Obd => self.obd.priority = priority,
            ProtocolId::Display => self.display.priority = priority,
        }
        self
    }

    /// Builder method: set the display detection mode
    pub fn with_display_detection(mut self, mode: DetectionMode) -> Self {
        self.display.detection = mode;
        self
    }

    /// Reassembly timeout in nanoseconds
    pub fn stream_timeout_ns(&self) -> u64 {
        self.stream_timeout_ms.saturating_mul(1_000_000)
    }

    /// Whether a decoder is enabled
    pub fn is_enabled(&self, protocol: ProtocolId) -> bool {
        match protocol {
            ProtocolId::Ftcan => self.ftcan.enabled,
            ProtocolId::Obd => self.obd.enabled,
            ProtocolId::Display => self.display.enabled,
        }
    }

    /// A decoder's dispatch priority
    pub fn priority(&self, protocol: ProtocolId) -> i32 {
        match protocol {
            ProtocolId::Ftcan => self.ftcan.priority,
            ProtocolId::Obd => self.obd.priority,
            ProtocolId::Display => self.display.priority,
        }
    }

    /// Check the configuration for values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.stream_timeout_ms == 0 {
            return Err(DecoderError::InvalidConfig(
                "stream_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::new();

        assert_eq!(config.stream_timeout_ms, 2_000);
        assert_eq!(config.stream_timeout_ns(), 2_000_000_000);
        assert!(config.is_enabled(ProtocolId::Ftcan));
        assert!(config.is_enabled(ProtocolId::Obd));
        assert!(config.is_enabled(ProtocolId::Display));
        assert_eq!(config.priority(ProtocolId::Obd), 0);
        assert_eq!(config.display.detection, DetectionMode::Conservative);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::new()
            .with_stream_timeout_ms(500)
            .with_decoder_enabled(ProtocolId::Display, false)
            .with_priority(ProtocolId::Obd, 10)
            .with_display_detection(DetectionMode::Aggressive);

        assert_eq!(config.stream_timeout_ms, 500);
        assert!(!config.is_enabled(ProtocolId::Display));
        assert_eq!(config.priority(ProtocolId::Obd), 10);
        assert_eq!(config.display.detection, DetectionMode::Aggressive);
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = EngineConfig::new().with_stream_timeout_ms(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_deserialization_fills_defaults() {
        let config: EngineConfig = serde_json::from_str(
            r#"{"stream_timeout_ms": 750, "display": {"detection": "aggressive"}}"#,
        )
        .unwrap();

        assert_eq!(config.stream_timeout_ms, 750);
        assert!(config.ftcan.enabled);
        assert!(config.display.enabled);
        assert_eq!(config.display.detection, DetectionMode::Aggressive);
        assert_eq!(config.display.priority, 0);
    }
}

//! Decoder registry and frame dispatch
//!
//! The registry owns one boxed decoder per protocol and routes every
//! incoming frame to all enabled decoders that claim it. Dispatch never
//! short-circuits: overlapping claims are legitimate (identifier heuristics
//! are not airtight) and each decoder keeps its own verdict and counters.

use crate::config::EngineConfig;
use crate::protocols::{DisplayDecoder, FtcanDecoder, ObdDecoder};
use crate::types::{CanFrame, DecodedMessage, DecoderStats, ProtocolId};

/// Interface every protocol decoder implements
///
/// Decoders are push-based state machines: `is_candidate` is a cheap
/// stateless check used for routing, `decode` consumes one claimed frame
/// and may emit a message now, later (once a stream completes) or never.
pub trait ProtocolDecoder: Send {
    /// Protocol this decoder handles
    fn protocol(&self) -> ProtocolId;

    /// Whether this frame plausibly belongs to the protocol
    ///
    /// Must not inspect or mutate reassembly state.
    fn is_candidate(&self, frame: &CanFrame) -> bool;

    /// Consume one claimed frame
    ///
    /// # Returns
    /// * `Some(message)` when the frame completed a message (single-frame or
    ///   the final chunk of a stream)
    /// * `None` when the frame was buffered, consumed or dropped; drops are
    ///   visible in [`stats`](Self::stats), never as errors
    fn decode(&mut self, frame: &CanFrame) -> Option<DecodedMessage>;

    /// Evict reassembly streams older than the decoder's timeout
    ///
    /// `now_ns` uses the same clock as the frame timestamps. Returns the
    /// number of streams evicted.
    fn sweep(&mut self, now_ns: u64) -> usize;

    /// Current counters
    fn stats(&self) -> DecoderStats;

    /// Drop all reassembly state and zero the counters
    fn reset(&mut self);

    /// Zero the counters, keeping in-progress streams
    fn reset_stats(&mut self);
}

struct RegistryEntry {
    decoder: Box<dyn ProtocolDecoder>,
    enabled: bool,
    priority: i32,
}

/// Priority-ordered collection of protocol decoders
pub struct DecoderRegistry {
    entries: Vec<RegistryEntry>,
}

impl DecoderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Build the standard three-decoder registry from a configuration
    ///
    /// All decoders share the configured reassembly timeout. Disabled
    /// decoders are still registered so they can be re-enabled later
    /// without losing their slot.
    pub fn from_config(config: &EngineConfig) -> Self {
        let timeout_ns = config.stream_timeout_ns();
        let mut registry = Self::new();

        registry.register(
            Box::new(FtcanDecoder::new(timeout_ns)),
            config.ftcan.priority,
        );
        registry.register(Box::new(ObdDecoder::new(timeout_ns)), config.obd.priority);
        registry.register(
            Box::new(DisplayDecoder::new(timeout_ns, config.display.detection)),
            config.display.priority,
        );

        for protocol in [ProtocolId::Ftcan, ProtocolId::Obd, ProtocolId::Display] {
            registry.set_enabled(protocol, config.is_enabled(protocol));
        }
        registry
    }

    /// Add a decoder with the given dispatch priority (higher runs first)
    pub fn register(&mut self, decoder: Box<dyn ProtocolDecoder>, priority: i32) {
        self.entries.push(RegistryEntry {
            decoder,
            enabled: true,
            priority,
        });
        self.sort_entries();
    }

    // stable sort: equal priorities keep registration order
    fn sort_entries(&mut self) {
        self.entries.sort_by_key(|e| std::cmp::Reverse(e.priority));
    }

    /// Enable or disable a registered decoder
    ///
    /// Returns false if no decoder handles `protocol`.
    pub fn set_enabled(&mut self, protocol: ProtocolId, enabled: bool) -> bool {
        match self.entry_mut(protocol) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Change a registered decoder's priority and re-sort
    ///
    /// Returns false if no decoder handles `protocol`.
    pub fn set_priority(&mut self, protocol: ProtocolId, priority: i32) -> bool {
        match self.entry_mut(protocol) {
            Some(entry) => {
                entry.priority = priority;
                self.sort_entries();
                true
            }
            None => false,
        }
    }

    /// Whether a decoder is present and enabled
    pub fn is_enabled(&self, protocol: ProtocolId) -> bool {
        self.entries
            .iter()
            .any(|e| e.enabled && e.decoder.protocol() == protocol)
    }

    fn entry_mut(&mut self, protocol: ProtocolId) -> Option<&mut RegistryEntry> {
        self.entries
            .iter_mut()
            .find(|e| e.decoder.protocol() == protocol)
    }

    /// Route one frame to every enabled decoder that claims it
    ///
    /// Messages come back in priority order. An empty result means the frame
    /// matched nothing or only advanced reassembly state.
    pub fn dispatch(&mut self, frame: &CanFrame) -> Vec<DecodedMessage> {
        let mut messages = Vec::new();
        let mut claimed = false;
        for entry in &mut self.entries {
            if !entry.enabled || !entry.decoder.is_candidate(frame) {
                continue;
            }
            claimed = true;
            if let Some(msg) = entry.decoder.decode(frame) {
                messages.push(msg);
            }
        }
        if !claimed {
            log::trace!("No decoder claims CAN ID 0x{:X}", frame.can_id);
        }
        messages
    }

    /// Evict expired reassembly streams across all decoders
    ///
    /// Returns the total number of streams evicted.
    pub fn sweep(&mut self, now_ns: u64) -> usize {
        self.entries
            .iter_mut()
            .map(|e| e.decoder.sweep(now_ns))
            .sum()
    }

    /// Per-decoder counters, in priority order
    pub fn stats(&self) -> Vec<(ProtocolId, DecoderStats)> {
        self.entries
            .iter()
            .map(|e| (e.decoder.protocol(), e.decoder.stats()))
            .collect()
    }

    /// Reset every decoder to its freshly-constructed state
    pub fn reset(&mut self) {
        for entry in &mut self.entries {
            entry.decoder.reset();
        }
    }

    /// Zero every decoder's counters, keeping reassembly state
    pub fn reset_stats(&mut self) {
        for entry in &mut self.entries {
            entry.decoder.reset_stats();
        }
    }

    /// Number of registered decoders
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no decoders are registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectionMode;
    use crate::types::FieldValue;

    fn ftcan_frame() -> CanFrame {
        // data-field 2, single packet carrying measure 0x13 with alert
        let id = (0x0280 << 14) | (2 << 11) | 0x100;
        CanFrame::new(id, true, vec![0xFF, 0x00, 0x27, 0x03, 0x52], 0)
    }

    fn obd_frame() -> CanFrame {
        CanFrame::new(0x7E8, false, vec![0x04, 0x41, 0x0C, 0x1A, 0xF8], 0)
    }

    #[test]
    fn test_from_config_orders_by_priority() {
        let config = EngineConfig::new()
            .with_priority(ProtocolId::Display, 5)
            .with_priority(ProtocolId::Ftcan, -1);
        let registry = DecoderRegistry::from_config(&config);

        let order: Vec<ProtocolId> = registry.stats().iter().map(|(p, _)| *p).collect();
        assert_eq!(
            order,
            vec![ProtocolId::Display, ProtocolId::Obd, ProtocolId::Ftcan]
        );
    }

    #[test]
    fn test_dispatch_routes_to_claiming_decoder() {
        let mut registry = DecoderRegistry::from_config(&EngineConfig::new());

        let messages = registry.dispatch(&obd_frame());
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].protocol, ProtocolId::Obd);
        assert_eq!(
            messages[0].field("engine_rpm").unwrap().value,
            FieldValue::Float(1726.0)
        );
    }

    #[test]
    fn test_dispatch_never_short_circuits() {
        let mut registry = DecoderRegistry::from_config(&EngineConfig::new());

        // the FTCAN single-packet marker 0xFF also looks like a display
        // continuation, so both decoders must see the frame
        let messages = registry.dispatch(&ftcan_frame());
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].protocol, ProtocolId::Ftcan);

        let stats: std::collections::HashMap<_, _> = registry.stats().into_iter().collect();
        assert_eq!(stats[&ProtocolId::Ftcan].attempted, 1);
        assert_eq!(stats[&ProtocolId::Ftcan].decoded, 1);
        // the display decoder claimed it, found no stream, counted the drop
        assert_eq!(stats[&ProtocolId::Display].attempted, 1);
        assert_eq!(stats[&ProtocolId::Display].failed, 1);
        assert_eq!(stats[&ProtocolId::Obd].attempted, 0);
    }

    #[test]
    fn test_overlapping_claims_emit_multiple_messages() {
        let config = EngineConfig::new()
            .with_display_detection(DetectionMode::Aggressive)
            .with_priority(ProtocolId::Display, 10);
        let mut registry = DecoderRegistry::from_config(&config);

        // an OBD single frame also parses as an unsegmented display message
        // in aggressive mode; priority puts the display verdict first
        let messages = registry.dispatch(&obd_frame());
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].protocol, ProtocolId::Display);
        assert_eq!(messages[1].protocol, ProtocolId::Obd);
    }

    #[test]
    fn test_disabled_decoder_is_skipped() {
        let mut registry = DecoderRegistry::from_config(
            &EngineConfig::new().with_decoder_enabled(ProtocolId::Obd, false),
        );
        assert!(!registry.is_enabled(ProtocolId::Obd));

        assert!(registry.dispatch(&obd_frame()).is_empty());
        let stats: std::collections::HashMap<_, _> = registry.stats().into_iter().collect();
        assert_eq!(stats[&ProtocolId::Obd].attempted, 0);

        // re-enabling restores dispatch without rebuilding the registry
        assert!(registry.set_enabled(ProtocolId::Obd, true));
        assert_eq!(registry.dispatch(&obd_frame()).len(), 1);
    }

    #[test]
    fn test_set_priority_reorders_dispatch() {
        let mut registry = DecoderRegistry::from_config(&EngineConfig::new());
        assert!(registry.set_priority(ProtocolId::Display, 99));

        let order: Vec<ProtocolId> = registry.stats().iter().map(|(p, _)| *p).collect();
        assert_eq!(order[0], ProtocolId::Display);
    }

    #[test]
    fn test_missing_protocol_reports_false() {
        let mut registry = DecoderRegistry::new();
        assert!(registry.is_empty());
        assert!(!registry.set_enabled(ProtocolId::Obd, true));
        assert!(!registry.set_priority(ProtocolId::Obd, 1));
        assert!(!registry.is_enabled(ProtocolId::Obd));
    }

    #[test]
    fn test_reset_restores_fresh_state() {
        let mut registry = DecoderRegistry::from_config(&EngineConfig::new());
        registry.dispatch(&obd_frame());
        registry.dispatch(&ftcan_frame());

        registry.reset();
        for (_, stats) in registry.stats() {
            assert_eq!(stats, DecoderStats::default());
        }
    }
}

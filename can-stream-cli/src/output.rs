//! Decoded message rendering and statistics tables

use std::fmt::Write as _;

use anyhow::Result;
use can_stream_decoder::{DecodedMessage, DecoderStats, ProtocolId};

use crate::config::{OutputConfig, OutputFormat};

/// Render one decoded message according to the output settings
pub fn render_message(msg: &DecodedMessage, output: &OutputConfig) -> Result<String> {
    match output.format {
        OutputFormat::Text => Ok(render_text(msg, output.show_payload)),
        OutputFormat::Json => Ok(serde_json::to_string(msg)?),
    }
}

/// One human-readable line per message
///
/// `[12:33:31.150752] OBD-II   0x7E8 ecu=0 service=65 pid=12 | engine_rpm=1726.000 rpm`
fn render_text(msg: &DecodedMessage, show_payload: bool) -> String {
    let mut line = String::new();

    let stamp = msg.timestamp().format("%H:%M:%S%.6f");
    let _ = write!(line, "[{}] {:<8}", stamp, msg.protocol.to_string());

    if msg.can_id > 0x7FF {
        let _ = write!(line, " 0x{:08X}", msg.can_id);
    } else {
        let _ = write!(line, " 0x{:03X}", msg.can_id);
    }
    if msg.frame_count > 1 {
        let _ = write!(line, " [{} frames]", msg.frame_count);
    }

    for header in &msg.header {
        let _ = write!(line, " {}={}", header.name, header.value);
    }

    if !msg.fields.is_empty() {
        line.push_str(" |");
        for field in &msg.fields {
            let _ = write!(line, " {}={}", field.name, field.value);
            if let Some(unit) = &field.unit {
                let _ = write!(line, " {}", unit);
            }
            if !field.ok {
                line.push_str(" (unknown)");
            }
        }
    }

    if show_payload {
        line.push_str(" payload=");
        for byte in &msg.payload {
            let _ = write!(line, "{:02X}", byte);
        }
    }

    if !msg.success {
        line.push_str(" [undecoded]");
    }

    line
}

/// Format the per-decoder statistics table
pub fn render_stats(stats: &[(ProtocolId, DecoderStats)]) -> String {
    let mut table = String::new();

    let _ = writeln!(
        table,
        "{:<10} {:>10} {:>10} {:>10} {:>10} {:>8}",
        "Protocol", "Attempted", "Decoded", "Failed", "Timed out", "Active"
    );
    for (protocol, s) in stats {
        let _ = writeln!(
            table,
            "{:<10} {:>10} {:>10} {:>10} {:>10} {:>8}",
            protocol.to_string(),
            s.attempted,
            s.decoded,
            s.failed,
            s.timed_out,
            s.active_streams
        );
    }

    table
}

/// The statistics as a single JSON line, for --json consumers
pub fn render_stats_json(stats: &[(ProtocolId, DecoderStats)]) -> Result<String> {
    let entries = stats
        .iter()
        .map(|(protocol, s)| {
            let mut value = serde_json::to_value(s)?;
            value["protocol"] = serde_json::Value::String(protocol.name().to_string());
            Ok(value)
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(serde_json::to_string(&serde_json::json!({ "stats": entries }))?)
}

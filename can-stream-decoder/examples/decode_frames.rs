//! Minimal decoding walkthrough
//!
//! Builds the standard registry and pushes a short burst of mixed traffic
//! through it: one FTCAN telemetry packet, one OBD-II response and a
//! segmented display stream.
//!
//! Usage:
//!   cargo run --example decode_frames

use can_stream_decoder::{CanFrame, DecoderRegistry, EngineConfig};

fn main() {
    env_logger::init();

    let mut registry = DecoderRegistry::from_config(&EngineConfig::new());

    // FTCAN 2.0: product 0x280, real-time data field, lambda 0.850 with alert
    let ftcan_id = (0x0280 << 14) | (2 << 11) | 0x100;
    let frames = vec![
        CanFrame::new(ftcan_id, true, vec![0xFF, 0x00, 0x27, 0x03, 0x52], 1_000_000),
        // OBD-II: engine RPM response from the first ECU
        CanFrame::new(0x7E8, false, vec![0x04, 0x41, 0x0C, 0x1A, 0xF8], 2_000_000),
        // Display: four-frame stream carrying a 26-byte message
        CanFrame::new(0x5C1, false, vec![0x80, 0x1A, 0x4C, 0xC1, 0x01, 0x02, 0x03, 0x04], 3_000_000),
        CanFrame::new(0x5C1, false, vec![0xC0, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B], 3_100_000),
        CanFrame::new(0x5C1, false, vec![0xC1, 0x0C, 0x0D, 0x0E, 0x0F, 0x10, 0x11, 0x12], 3_200_000),
        CanFrame::new(0x5C1, false, vec![0xC2, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18], 3_300_000),
    ];

    for frame in &frames {
        for message in registry.dispatch(frame) {
            println!(
                "{} 0x{:X} ({} frames, {} bytes payload)",
                message.protocol,
                message.can_id,
                message.frame_count,
                message.payload.len()
            );
            for header in &message.header {
                println!("  {} = {}", header.name, header.value);
            }
            for field in &message.fields {
                match &field.unit {
                    Some(unit) => println!("  {} = {} {}", field.name, field.value, unit),
                    None => println!("  {} = {}", field.name, field.value),
                }
            }
        }
    }

    println!("\n=== DECODER SUMMARY ===");
    for (protocol, stats) in registry.stats() {
        println!(
            "{}: {} attempted, {} decoded, {} failed",
            protocol, stats.attempted, stats.decoded, stats.failed
        );
    }
}

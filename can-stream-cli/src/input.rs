//! candump text log parsing
//!
//! Accepts the `candump -l` / `candump -L` text format: one frame per line
//! as `(timestamp) interface ID#DATA`, with an optional direction marker
//! after the data. Identifiers are hex, three digits for standard ids and
//! eight for extended. Remote frames (`ID#R`), CAN FD frames (`ID##...`)
//! and comment lines are skipped without being counted as errors.

use std::io::BufRead;

use anyhow::Result;
use can_stream_decoder::CanFrame;
use thiserror::Error;

/// Why a line that looked like a frame did not produce one
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseIssue {
    #[error("line does not have (timestamp) interface id#data shape")]
    Shape,

    #[error("bad timestamp field: {0}")]
    Timestamp(String),

    #[error("bad identifier field: {0}")]
    Identifier(String),

    #[error("bad data field: {0}")]
    Data(String),
}

/// Outcome of parsing one log line
#[derive(Debug, PartialEq)]
pub enum ParsedLine {
    /// A classic CAN frame
    Frame(CanFrame),
    /// Blank line, comment, remote frame or CAN FD frame
    Ignored,
    /// A line that should have been a frame but could not be parsed
    Invalid(ParseIssue),
}

/// Parse one candump text line
pub fn parse_line(line: &str) -> ParsedLine {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with("//") {
        return ParsedLine::Ignored;
    }

    let mut parts = line.split_whitespace();
    let (stamp, frame) = match (parts.next(), parts.next(), parts.next()) {
        (Some(stamp), Some(_iface), Some(frame)) => (stamp, frame),
        _ => return ParsedLine::Invalid(ParseIssue::Shape),
    };

    let timestamp_ns = match parse_timestamp_ns(stamp) {
        Some(ns) => ns,
        None => return ParsedLine::Invalid(ParseIssue::Timestamp(stamp.to_string())),
    };

    let (id_str, data_str) = match frame.split_once('#') {
        Some(split) => split,
        None => return ParsedLine::Invalid(ParseIssue::Shape),
    };

    // CAN FD frames use a double hash, remote frames an R payload
    if data_str.starts_with('#') || data_str.starts_with('R') {
        return ParsedLine::Ignored;
    }

    let can_id = match u32::from_str_radix(id_str, 16) {
        Ok(id) => id,
        Err(_) => return ParsedLine::Invalid(ParseIssue::Identifier(id_str.to_string())),
    };
    let is_extended = id_str.len() > 3;
    if can_id > 0x1FFF_FFFF || (!is_extended && can_id > 0x7FF) {
        return ParsedLine::Invalid(ParseIssue::Identifier(id_str.to_string()));
    }

    let data = match parse_hex_data(data_str) {
        Some(data) if data.len() <= 8 => data,
        _ => return ParsedLine::Invalid(ParseIssue::Data(data_str.to_string())),
    };

    ParsedLine::Frame(CanFrame::new(can_id, is_extended, data, timestamp_ns))
}

/// Parse "(1661789611.150752)" into nanoseconds
///
/// Seconds and fraction are converted separately: a single f64 round trip
/// loses sub-microsecond precision on epoch-sized timestamps.
fn parse_timestamp_ns(stamp: &str) -> Option<u64> {
    let inner = stamp.strip_prefix('(')?.strip_suffix(')')?;
    let (secs, frac) = match inner.split_once('.') {
        Some((secs, frac)) => (secs, frac),
        None => (inner, ""),
    };

    let secs: u64 = secs.parse().ok()?;
    let mut ns: u64 = 0;
    let mut scale: u64 = 100_000_000;
    for c in frac.chars().take(9) {
        ns += c.to_digit(10)? as u64 * scale;
        scale /= 10;
    }

    secs.checked_mul(1_000_000_000)?.checked_add(ns)
}

fn parse_hex_data(data: &str) -> Option<Vec<u8>> {
    // cansend-style dot separators are tolerated; the byte-offset slicing
    // below requires ASCII
    let data = data.replace('.', "");
    if !data.is_ascii() || data.len() % 2 != 0 {
        return None;
    }

    (0..data.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&data[i..i + 2], 16).ok())
        .collect()
}

/// Read all frames from a candump text source
///
/// Returns the parsed frames and the number of lines that looked like
/// frames but failed to parse. Ignored lines are not counted.
pub fn read_frames<R: BufRead>(
    reader: R,
    max_frames: Option<usize>,
) -> Result<(Vec<CanFrame>, usize)> {
    let mut frames = Vec::new();
    let mut invalid = 0usize;

    for line in reader.lines() {
        let line = line?;
        match parse_line(&line) {
            ParsedLine::Frame(frame) => {
                frames.push(frame);
                if let Some(max) = max_frames {
                    if frames.len() >= max {
                        break;
                    }
                }
            }
            ParsedLine::Ignored => {}
            ParsedLine::Invalid(issue) => {
                invalid += 1;
                log::debug!("Skipping unparseable line {:?}: {}", line, issue);
            }
        }
    }

    Ok((frames, invalid))
}

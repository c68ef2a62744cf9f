//! Field extraction and scaling
//!
//! Static field definition tables plus the bit-level extraction that turns a
//! payload region into physical values. All supported protocols transmit
//! multi-byte quantities big-endian, so only Motorola-style extraction is
//! implemented: bit 0 is the MSB of byte 0 and bit numbers grow towards the
//! LSB of the last byte.

use crate::types::{DecodedField, FieldValue};

/// Static definition of one decodable field
///
/// `start_bit` and `length` are relative to the payload region the owning
/// protocol passes in (a 2-byte measure cell for FTCAN, the bytes after the
/// service/PID header for OBD-II), not to the raw CAN frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldDef {
    /// Protocol-level identifier (measure ID, PID)
    pub id: u16,
    /// Field name emitted in decoded output
    pub name: &'static str,
    /// Engineering unit, if any
    pub unit: Option<&'static str>,
    /// Position of the MSB within the payload region
    pub start_bit: usize,
    /// Width in bits (1-64)
    pub length: usize,
    /// True if the raw value is two's complement
    pub signed: bool,
    /// Multiplier applied to the raw value
    pub scale: f64,
    /// Offset added after scaling
    pub offset: f64,
}

impl FieldDef {
    /// Shorthand constructor for definition tables
    pub const fn new(
        id: u16,
        name: &'static str,
        unit: Option<&'static str>,
        start_bit: usize,
        length: usize,
        signed: bool,
        scale: f64,
        offset: f64,
    ) -> Self {
        Self {
            id,
            name,
            unit,
            start_bit,
            length,
            signed,
            scale,
            offset,
        }
    }

    /// Extract the raw (unscaled) value of this field from a payload region
    ///
    /// Returns `None` if the region is too short to contain the field.
    pub fn raw_value(&self, data: &[u8]) -> Option<i64> {
        let required_bytes = (self.start_bit + self.length + 7) / 8;
        if required_bytes > data.len() {
            log::warn!(
                "Field '{}' requires {} bytes but payload region only has {}",
                self.name,
                required_bytes,
                data.len()
            );
            return None;
        }

        let raw = extract_big_endian(data, self.start_bit, self.length);
        Some(if self.signed {
            sign_extend(raw, self.length)
        } else {
            raw as i64
        })
    }

    /// Decode this field from a payload region into a physical value
    ///
    /// Value typing follows the definition: an unscaled single bit becomes a
    /// `Boolean`, any scaled or offset value becomes a `Float`, everything
    /// else stays an `Integer`.
    pub fn decode(&self, data: &[u8]) -> Option<DecodedField> {
        let raw = self.raw_value(data)?;
        let physical = self.offset + self.scale * (raw as f64);

        let value = if self.scale == 1.0 && self.offset == 0.0 && self.length == 1 {
            FieldValue::Boolean(raw != 0)
        } else if self.scale != 1.0 || self.offset != 0.0 {
            FieldValue::Float(physical)
        } else {
            FieldValue::Integer(raw)
        };

        Some(DecodedField {
            id: self.id as u32,
            name: self.name.to_string(),
            value,
            unit: self.unit.map(str::to_string),
            raw,
            ok: true,
        })
    }
}

/// All definitions in `table` registered under `id`
///
/// Several definitions may share one identifier (bit-packed status PIDs
/// decompose into multiple fields).
pub fn defs_for(table: &'static [FieldDef], id: u16) -> impl Iterator<Item = &'static FieldDef> {
    table.iter().filter(move |d| d.id == id)
}

/// Build the placeholder field emitted for identifiers missing from a table
///
/// The raw value is preserved so nothing is lost, and `ok` is false so
/// consumers can tell it apart from a table hit.
pub fn unknown_field(id: u32, name: String, raw: i64) -> DecodedField {
    DecodedField {
        id,
        name,
        value: FieldValue::Integer(raw),
        unit: None,
        raw,
        ok: false,
    }
}

/// Extract `length` bits big-endian starting at `start_bit`
///
/// Bit 0 is the MSB of byte 0. The extracted bits are returned right-aligned.
pub fn extract_big_endian(data: &[u8], start_bit: usize, length: usize) -> u64 {
    let mut result: u64 = 0;

    for i in 0..length {
        let bit_pos = start_bit + i;
        let byte_idx = bit_pos / 8;
        let bit_in_byte = 7 - (bit_pos % 8);

        if byte_idx < data.len() {
            let bit_value = (data[byte_idx] >> bit_in_byte) & 0x01;
            result |= (bit_value as u64) << (length - 1 - i);
        }
    }

    result
}

/// Sign-extend a value from N bits to 64 bits
pub fn sign_extend(value: u64, bit_length: usize) -> i64 {
    if bit_length >= 64 {
        return value as i64;
    }

    let sign_bit = 1u64 << (bit_length - 1);
    if (value & sign_bit) != 0 {
        let mask = !0u64 << bit_length;
        (value | mask) as i64
    } else {
        value as i64
    }
}

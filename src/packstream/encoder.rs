//! PackStream encoder (§4.1): minimum-size marker selection, append-only into a `Vec<u8>`.

use crate::error::{Error, Result};
use crate::packstream::value::Value;

mod marker {
    pub const NULL: u8 = 0xC0;
    pub const FALSE: u8 = 0xC2;
    pub const TRUE: u8 = 0xC3;
    pub const FLOAT_64: u8 = 0xC1;
    pub const INT_8: u8 = 0xC8;
    pub const INT_16: u8 = 0xC9;
    pub const INT_32: u8 = 0xCA;
    pub const INT_64: u8 = 0xCB;
    pub const BYTES_8: u8 = 0xCC;
    pub const BYTES_16: u8 = 0xCD;
    pub const BYTES_32: u8 = 0xCE;
    pub const TINY_STRING: u8 = 0x80;
    pub const STRING_8: u8 = 0xD0;
    pub const STRING_16: u8 = 0xD1;
    pub const STRING_32: u8 = 0xD2;
    pub const TINY_LIST: u8 = 0x90;
    pub const LIST_8: u8 = 0xD4;
    pub const LIST_16: u8 = 0xD5;
    pub const LIST_32: u8 = 0xD6;
    pub const TINY_MAP: u8 = 0xA0;
    pub const MAP_8: u8 = 0xD8;
    pub const MAP_16: u8 = 0xD9;
    pub const MAP_32: u8 = 0xDA;
    pub const TINY_STRUCT: u8 = 0xB0;
    pub const STRUCT_8: u8 = 0xDC;
    pub const STRUCT_16: u8 = 0xDD;
}

pub fn write_null(out: &mut Vec<u8>) {
    out.push(marker::NULL);
}

pub fn write_bool(out: &mut Vec<u8>, value: bool) {
    out.push(if value { marker::TRUE } else { marker::FALSE });
}

/// Minimum-size integer encoding: tiny-int in one byte for `-16..=127`, else the smallest
/// `INT_8`/`INT_16`/`INT_32`/`INT_64` that fits.
pub fn write_int(out: &mut Vec<u8>, value: i64) {
    if (-16..=127).contains(&value) {
        out.push(value as u8);
    } else if (i8::MIN as i64..=i8::MAX as i64).contains(&value) {
        out.push(marker::INT_8);
        out.push(value as u8);
    } else if (i16::MIN as i64..=i16::MAX as i64).contains(&value) {
        out.push(marker::INT_16);
        out.extend_from_slice(&(value as i16).to_be_bytes());
    } else if (i32::MIN as i64..=i32::MAX as i64).contains(&value) {
        out.push(marker::INT_32);
        out.extend_from_slice(&(value as i32).to_be_bytes());
    } else {
        out.push(marker::INT_64);
        out.extend_from_slice(&value.to_be_bytes());
    }
}

pub fn write_float(out: &mut Vec<u8>, value: f64) {
    out.push(marker::FLOAT_64);
    out.extend_from_slice(&value.to_be_bytes());
}

pub fn write_string(out: &mut Vec<u8>, value: &str) {
    let bytes = value.as_bytes();
    let len = bytes.len();
    if len <= 15 {
        out.push(marker::TINY_STRING | len as u8);
    } else if len <= u8::MAX as usize {
        out.push(marker::STRING_8);
        out.push(len as u8);
    } else if len <= u16::MAX as usize {
        out.push(marker::STRING_16);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(marker::STRING_32);
        out.extend_from_slice(&(len as u32).to_be_bytes());
    }
    out.extend_from_slice(bytes);
}

pub fn write_bytes(out: &mut Vec<u8>, value: &[u8]) {
    let len = value.len();
    if len <= u8::MAX as usize {
        out.push(marker::BYTES_8);
        out.push(len as u8);
    } else if len <= u16::MAX as usize {
        out.push(marker::BYTES_16);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(marker::BYTES_32);
        out.extend_from_slice(&(len as u32).to_be_bytes());
    }
    out.extend_from_slice(value);
}

pub fn write_list_header(out: &mut Vec<u8>, len: usize) {
    if len <= 15 {
        out.push(marker::TINY_LIST | len as u8);
    } else if len <= u8::MAX as usize {
        out.push(marker::LIST_8);
        out.push(len as u8);
    } else if len <= u16::MAX as usize {
        out.push(marker::LIST_16);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(marker::LIST_32);
        out.extend_from_slice(&(len as u32).to_be_bytes());
    }
}

pub fn write_map_header(out: &mut Vec<u8>, len: usize) {
    if len <= 15 {
        out.push(marker::TINY_MAP | len as u8);
    } else if len <= u8::MAX as usize {
        out.push(marker::MAP_8);
        out.push(len as u8);
    } else if len <= u16::MAX as usize {
        out.push(marker::MAP_16);
        out.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        out.push(marker::MAP_32);
        out.extend_from_slice(&(len as u32).to_be_bytes());
    }
}

/// Write a structure header: the size marker (tiny/8/16) followed by the one-byte
/// signature. The caller is responsible for then writing exactly `field_count` values;
/// see [`StructWriter`] for a checked version of that contract.
pub fn write_struct_header(out: &mut Vec<u8>, signature: u8, field_count: usize) {
    if field_count <= 15 {
        out.push(marker::TINY_STRUCT | field_count as u8);
    } else if field_count <= u8::MAX as usize {
        out.push(marker::STRUCT_8);
        out.push(field_count as u8);
    } else {
        out.push(marker::STRUCT_16);
        out.extend_from_slice(&(field_count as u16).to_be_bytes());
    }
    out.push(signature);
}

/// Guards the "wrote exactly the declared field count" invariant from §4.1: a struct
/// writer that is dropped (or finished) having written the wrong number of fields is a
/// programmer error in this crate, not a malformed caller input, so it surfaces as
/// `Error::LibraryBug` rather than being silently tolerated.
pub struct StructWriter<'a> {
    out: &'a mut Vec<u8>,
    declared: usize,
    written: usize,
}

impl<'a> StructWriter<'a> {
    pub fn new(out: &'a mut Vec<u8>, signature: u8, declared: usize) -> Self {
        write_struct_header(out, signature, declared);
        Self {
            out,
            declared,
            written: 0,
        }
    }

    pub fn field(&mut self, value: &Value) -> Result<()> {
        if self.written >= self.declared {
            return Err(Error::from_debug(format!(
                "StructWriter: wrote more than the declared {} fields",
                self.declared
            )));
        }
        encode_value(value, self.out)?;
        self.written += 1;
        Ok(())
    }

    pub fn finish(self) -> Result<()> {
        if self.written != self.declared {
            return Err(Error::from_debug(format!(
                "StructWriter: declared {} fields but wrote {}",
                self.declared, self.written
            )));
        }
        Ok(())
    }
}

/// Encode any `Value` into `out` using the smallest legal marker for it.
pub fn encode_value(value: &Value, out: &mut Vec<u8>) -> Result<()> {
    match value {
        Value::Null => write_null(out),
        Value::Boolean(b) => write_bool(out, *b),
        Value::Integer(i) => write_int(out, *i),
        Value::Float(f) => write_float(out, *f),
        Value::String(s) => write_string(out, s),
        Value::Bytes(b) => write_bytes(out, b),
        Value::List(items) => {
            write_list_header(out, items.len());
            for item in items {
                encode_value(item, out)?;
            }
        }
        Value::Map(entries) => {
            write_map_header(out, entries.len());
            for (k, v) in entries {
                write_string(out, k);
                encode_value(v, out)?;
            }
        }
        Value::Structure(s) => {
            let mut writer = StructWriter::new(out, s.signature, s.fields.len());
            for field in &s.fields {
                writer.field(field)?;
            }
            writer.finish()?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiny_int_uses_bare_byte() {
        let mut out = Vec::new();
        write_int(&mut out, 127);
        assert_eq!(out, vec![0x7F]);
    }

    #[test]
    fn int_above_tiny_range_uses_int16() {
        let mut out = Vec::new();
        write_int(&mut out, 200);
        assert_eq!(out, vec![0xC9, 0x00, 0xC8]);
    }

    #[test]
    fn negative_tiny_int_fits_in_one_byte() {
        let mut out = Vec::new();
        write_int(&mut out, -16);
        assert_eq!(out, vec![0xF0]);
    }

    #[test]
    fn string_length_boundary_selects_marker() {
        let mut out15 = Vec::new();
        write_string(&mut out15, &"a".repeat(15));
        assert_eq!(out15[0], 0x80 | 15);

        let mut out16 = Vec::new();
        write_string(&mut out16, &"a".repeat(16));
        assert_eq!(out16[0], 0xD0);
    }

    #[test]
    fn struct_writer_rejects_wrong_field_count() {
        let mut out = Vec::new();
        let writer = StructWriter::new(&mut out, 0x01, 2);
        assert!(writer.finish().is_err());
    }
}

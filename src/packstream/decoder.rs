//! PackStream decoder (§4.1): a zero-copy, single-pass reader over a byte span.
//!
//! Peeking the next marker never advances the cursor. Borrowed reads (`read_str`,
//! `read_bytes`) hand back slices into the original buffer; `read_value` is the
//! convenience path that copies into an owned [`Value`] tree.

use zerocopy::byteorder::big_endian::{U16, U32};
use zerocopy::FromBytes;

use crate::error::{Error, Result};
use crate::packstream::value::{Structure, Value};

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
    pub const STRING_8: u8 = 0xD0;
    pub const STRING_16: u8 = 0xD1;
    pub const STRING_32: u8 = 0xD2;
    pub const LIST_8: u8 = 0xD4;
    pub const LIST_16: u8 = 0xD5;
    pub const LIST_32: u8 = 0xD6;
    pub const MAP_8: u8 = 0xD8;
    pub const MAP_16: u8 = 0xD9;
    pub const MAP_32: u8 = 0xDA;
    pub const STRUCT_8: u8 = 0xDC;
    pub const STRUCT_16: u8 = 0xDD;
}

pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Look at the next marker byte without advancing the cursor.
    pub fn peek_marker(&self) -> Result<u8> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or_else(|| Error::ProtocolError("unexpected end of PackStream input".into()))
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Error::ProtocolError(format!(
                "expected {n} more bytes, only {} remain",
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    /// Zero-copy big-endian length read, the same `zerocopy::byteorder` idiom the teacher
    /// uses in its own wire-primitive readers (`protocol/primitive.rs`), just big-endian
    /// instead of MySQL's little-endian.
    fn take_u16(&mut self) -> Result<u16> {
        Ok(U16::ref_from_bytes(self.take(2)?).map_err(Error::from_debug)?.get())
    }

    fn take_u32(&mut self) -> Result<u32> {
        Ok(U32::ref_from_bytes(self.take(4)?).map_err(Error::from_debug)?.get())
    }

    pub fn read_null(&mut self) -> Result<()> {
        match self.take_u8()? {
            marker::NULL => Ok(()),
            other => Err(unexpected_marker("null", other)),
        }
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        match self.take_u8()? {
            marker::TRUE => Ok(true),
            marker::FALSE => Ok(false),
            other => Err(unexpected_marker("boolean", other)),
        }
    }

    pub fn read_int(&mut self) -> Result<i64> {
        let marker = self.take_u8()?;
        match marker {
            marker::INT_8 => Ok(self.take_u8()? as i8 as i64),
            marker::INT_16 => Ok(self.take_u16()? as i16 as i64),
            marker::INT_32 => Ok(self.take_u32()? as i32 as i64),
            marker::INT_64 => {
                let bytes: [u8; 8] = self.take(8)?.try_into().map_err(Error::from_debug)?;
                Ok(i64::from_be_bytes(bytes))
            }
            m if (0x00..=0x7F).contains(&m) => Ok(m as i64),
            m if (0xF0..=0xFF).contains(&m) => Ok(m as i8 as i64),
            other => Err(unexpected_marker("integer", other)),
        }
    }

    pub fn read_float(&mut self) -> Result<f64> {
        match self.take_u8()? {
            marker::FLOAT_64 => {
                let bytes: [u8; 8] = self.take(8)?.try_into().map_err(Error::from_debug)?;
                Ok(f64::from_be_bytes(bytes))
            }
            other => Err(unexpected_marker("float", other)),
        }
    }

    fn read_len_after_marker(&mut self, marker: u8, tiny_base: u8) -> Result<Option<usize>> {
        if (tiny_base..=tiny_base.wrapping_add(0x0F)).contains(&marker) {
            return Ok(Some((marker & 0x0F) as usize));
        }
        Ok(None)
    }

    /// Borrowing string read: validates UTF-8 with `simdutf8` and hands back a slice
    /// into the original buffer.
    pub fn read_str(&mut self) -> Result<&'a str> {
        let marker = self.take_u8()?;
        let len = if let Some(len) = self.read_len_after_marker(marker, 0x80)? {
            len
        } else {
            match marker {
                marker::STRING_8 => self.take_u8()? as usize,
                marker::STRING_16 => self.take_u16()? as usize,
                marker::STRING_32 => self.take_u32()? as usize,
                other => return Err(unexpected_marker("string", other)),
            }
        };
        let bytes = self.take(len)?;
        simdutf8::basic::from_utf8(bytes)
            .map_err(|_| Error::ProtocolError("invalid UTF-8 in PackStream string".into()))
    }

    pub fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let marker = self.take_u8()?;
        let len = match marker {
            marker::BYTES_8 => self.take_u8()? as usize,
            marker::BYTES_16 => self.take_u16()? as usize,
            marker::BYTES_32 => self.take_u32()? as usize,
            other => return Err(unexpected_marker("bytes", other)),
        };
        self.take(len)
    }

    pub fn read_list_header(&mut self) -> Result<usize> {
        let marker = self.take_u8()?;
        if let Some(len) = self.read_len_after_marker(marker, 0x90)? {
            return Ok(len);
        }
        match marker {
            marker::LIST_8 => Ok(self.take_u8()? as usize),
            marker::LIST_16 => Ok(self.take_u16()? as usize),
            marker::LIST_32 => Ok(self.take_u32()? as usize),
            other => Err(unexpected_marker("list", other)),
        }
    }

    pub fn read_map_header(&mut self) -> Result<usize> {
        let marker = self.take_u8()?;
        if let Some(len) = self.read_len_after_marker(marker, 0xA0)? {
            return Ok(len);
        }
        match marker {
            marker::MAP_8 => Ok(self.take_u8()? as usize),
            marker::MAP_16 => Ok(self.take_u16()? as usize),
            marker::MAP_32 => Ok(self.take_u32()? as usize),
            other => Err(unexpected_marker("map", other)),
        }
    }

    /// Read a structure header, returning the signature and declared field count. The
    /// caller must then read exactly that many values.
    pub fn read_struct_header(&mut self) -> Result<(u8, usize)> {
        let marker = self.take_u8()?;
        let field_count = if let Some(len) = self.read_len_after_marker(marker, 0xB0)? {
            len
        } else {
            match marker {
                marker::STRUCT_8 => self.take_u8()? as usize,
                marker::STRUCT_16 => self.take_u16()? as usize,
                other => return Err(unexpected_marker("struct", other)),
            }
        };
        let signature = self.take_u8()?;
        Ok((signature, field_count))
    }

    /// Read one fully-owned `Value`, recursing into lists/maps/structures.
    pub fn read_value(&mut self) -> Result<Value> {
        let marker = self.peek_marker()?;
        match marker {
            marker::NULL => {
                self.read_null()?;
                Ok(Value::Null)
            }
            marker::TRUE | marker::FALSE => Ok(Value::Boolean(self.read_bool()?)),
            marker::FLOAT_64 => Ok(Value::Float(self.read_float()?)),
            marker::BYTES_8 | marker::BYTES_16 | marker::BYTES_32 => {
                Ok(Value::Bytes(self.read_bytes()?.to_vec()))
            }
            m if is_string_marker(m) => Ok(Value::String(self.read_str()?.to_string())),
            m if is_list_marker(m) => {
                let len = self.read_list_header()?;
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(self.read_value()?);
                }
                Ok(Value::List(items))
            }
            m if is_map_marker(m) => {
                let len = self.read_map_header()?;
                let mut entries = Vec::with_capacity(len);
                for _ in 0..len {
                    let key = self.read_str()?.to_string();
                    let value = self.read_value()?;
                    entries.push((key, value));
                }
                Ok(Value::Map(entries))
            }
            m if is_struct_marker(m) => {
                let (signature, field_count) = self.read_struct_header()?;
                let mut fields = Vec::with_capacity(field_count);
                for _ in 0..field_count {
                    fields.push(self.read_value()?);
                }
                Ok(Value::Structure(Structure { signature, fields }))
            }
            m if is_int_marker(m) => Ok(Value::Integer(self.read_int()?)),
            other => Err(unexpected_marker("value", other)),
        }
    }
}

fn is_string_marker(m: u8) -> bool {
    (0x80..=0x8F).contains(&m) || matches!(m, marker::STRING_8 | marker::STRING_16 | marker::STRING_32)
}

fn is_list_marker(m: u8) -> bool {
    (0x90..=0x9F).contains(&m) || matches!(m, marker::LIST_8 | marker::LIST_16 | marker::LIST_32)
}

fn is_map_marker(m: u8) -> bool {
    (0xA0..=0xAF).contains(&m) || matches!(m, marker::MAP_8 | marker::MAP_16 | marker::MAP_32)
}

fn is_struct_marker(m: u8) -> bool {
    (0xB0..=0xBF).contains(&m) || matches!(m, marker::STRUCT_8 | marker::STRUCT_16)
}

fn is_int_marker(m: u8) -> bool {
    (0x00..=0x7F).contains(&m)
        || (0xF0..=0xFF).contains(&m)
        || matches!(
            m,
            marker::INT_8 | marker::INT_16 | marker::INT_32 | marker::INT_64
        )
}

fn unexpected_marker(expected: &str, marker: u8) -> Error {
    Error::ProtocolError(format!("expected a {expected}, got marker 0x{marker:02X}"))
}

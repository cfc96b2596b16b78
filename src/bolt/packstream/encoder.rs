//! PackStream encoder.

use bytes::{BufMut, BytesMut};
use std::collections::HashMap;

use super::marker::*;
use super::types::{PackStreamStructure, PackStreamValue};
use super::PackStreamError;

/// Writes PackStream values into a growable buffer.
pub struct PackStreamEncoder {
    buffer: BytesMut,
}

impl PackStreamEncoder {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn into_bytes(self) -> BytesMut {
        self.buffer
    }

    /// Appends one value.
    pub fn encode(&mut self, value: &PackStreamValue) -> Result<(), PackStreamError> {
        match value {
            PackStreamValue::Null => self.buffer.put_u8(NULL),
            PackStreamValue::Boolean(b) => self.buffer.put_u8(if *b { TRUE } else { FALSE }),
            PackStreamValue::Integer(i) => self.encode_int(*i),
            PackStreamValue::Float(f) => {
                self.buffer.put_u8(FLOAT_64);
                self.buffer.put_f64(*f);
            }
            PackStreamValue::Bytes(b) => self.encode_bytes(b)?,
            PackStreamValue::String(s) => self.encode_string(s)?,
            PackStreamValue::List(l) => self.encode_list(l)?,
            PackStreamValue::Map(m) => self.encode_map(m)?,
            PackStreamValue::Structure(s) => self.encode_structure(s)?,
        }
        Ok(())
    }

    /// Encodes an integer using the smallest representation.
    pub fn encode_int(&mut self, value: i64) {
        if fits_tiny_int(value) {
            self.buffer.put_u8(value as u8);
        } else if i8::try_from(value).is_ok() {
            self.buffer.put_u8(INT_8);
            self.buffer.put_i8(value as i8);
        } else if i16::try_from(value).is_ok() {
            self.buffer.put_u8(INT_16);
            self.buffer.put_i16(value as i16);
        } else if i32::try_from(value).is_ok() {
            self.buffer.put_u8(INT_32);
            self.buffer.put_i32(value as i32);
        } else {
            self.buffer.put_u8(INT_64);
            self.buffer.put_i64(value);
        }
    }

    pub fn encode_bytes(&mut self, value: &[u8]) -> Result<(), PackStreamError> {
        // Bytes have no tiny form.
        self.write_header(value.len(), None, [BYTES_8, BYTES_16, BYTES_32])?;
        self.buffer.put_slice(value);
        Ok(())
    }

    pub fn encode_string(&mut self, value: &str) -> Result<(), PackStreamError> {
        let bytes = value.as_bytes();
        self.write_header(bytes.len(), Some(TINY_STRING), [STRING_8, STRING_16, STRING_32])?;
        self.buffer.put_slice(bytes);
        Ok(())
    }

    pub fn encode_list(&mut self, values: &[PackStreamValue]) -> Result<(), PackStreamError> {
        self.write_header(values.len(), Some(TINY_LIST), [LIST_8, LIST_16, LIST_32])?;
        for value in values {
            self.encode(value)?;
        }
        Ok(())
    }

    pub fn encode_map(
        &mut self,
        map: &HashMap<String, PackStreamValue>,
    ) -> Result<(), PackStreamError> {
        self.write_header(map.len(), Some(TINY_MAP), [MAP_8, MAP_16, MAP_32])?;
        for (key, value) in map {
            self.encode_string(key)?;
            self.encode(value)?;
        }
        Ok(())
    }

    pub fn encode_structure(&mut self, s: &PackStreamStructure) -> Result<(), PackStreamError> {
        let len = s.fields.len();
        if len <= TINY_MAX {
            self.buffer.put_u8(TINY_STRUCT | len as u8);
        } else if len <= u8::MAX as usize {
            self.buffer.put_u8(STRUCT_8);
            self.buffer.put_u8(len as u8);
        } else if len <= u16::MAX as usize {
            self.buffer.put_u8(STRUCT_16);
            self.buffer.put_u16(len as u16);
        } else {
            return Err(PackStreamError::ValueTooLarge {
                size: len,
                limit: u16::MAX as usize,
            });
        }
        self.buffer.put_u8(s.tag);
        for field in &s.fields {
            self.encode(field)?;
        }
        Ok(())
    }

    fn write_header(
        &mut self,
        len: usize,
        tiny: Option<u8>,
        sized: [u8; 3],
    ) -> Result<(), PackStreamError> {
        match tiny {
            Some(family) if len <= TINY_MAX => self.buffer.put_u8(family | len as u8),
            _ if len <= u8::MAX as usize => {
                self.buffer.put_u8(sized[0]);
                self.buffer.put_u8(len as u8);
            }
            _ if len <= u16::MAX as usize => {
                self.buffer.put_u8(sized[1]);
                self.buffer.put_u16(len as u16);
            }
            _ if len <= u32::MAX as usize => {
                self.buffer.put_u8(sized[2]);
                self.buffer.put_u32(len as u32);
            }
            _ => {
                return Err(PackStreamError::ValueTooLarge {
                    size: len,
                    limit: u32::MAX as usize,
                })
            }
        }
        Ok(())
    }
}

impl Default for PackStreamEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Encodes a single value.
pub fn encode(value: &PackStreamValue) -> Result<BytesMut, PackStreamError> {
    let mut encoder = PackStreamEncoder::new();
    encoder.encode(value)?;
    Ok(encoder.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bytes_of(value: PackStreamValue) -> Vec<u8> {
        encode(&value).unwrap().to_vec()
    }

    #[test]
    fn test_encode_scalars() {
        assert_eq!(bytes_of(PackStreamValue::Null), vec![0xC0]);
        assert_eq!(bytes_of(PackStreamValue::Boolean(true)), vec![0xC3]);
        assert_eq!(bytes_of(PackStreamValue::Boolean(false)), vec![0xC2]);
    }

    #[test]
    fn test_encode_int_widths() {
        assert_eq!(bytes_of(PackStreamValue::Integer(1)), vec![0x01]);
        assert_eq!(bytes_of(PackStreamValue::Integer(-16)), vec![0xF0]);
        assert_eq!(bytes_of(PackStreamValue::Integer(-17)), vec![0xC8, 0xEF]);
        assert_eq!(bytes_of(PackStreamValue::Integer(128)), vec![0xC9, 0x00, 0x80]);
        assert_eq!(
            bytes_of(PackStreamValue::Integer(40_000)),
            vec![0xCA, 0x00, 0x00, 0x9C, 0x40]
        );
        assert_eq!(bytes_of(PackStreamValue::Integer(i64::MAX))[0], 0xCB);
    }

    #[test]
    fn test_encode_string_headers() {
        assert_eq!(bytes_of(PackStreamValue::from("")), vec![0x80]);
        assert_eq!(bytes_of(PackStreamValue::from("A")), vec![0x81, 0x41]);
        let s16 = "x".repeat(16);
        assert_eq!(&bytes_of(PackStreamValue::from(s16.as_str()))[..2], &[0xD0, 16]);
        let s300 = "y".repeat(300);
        assert_eq!(&bytes_of(PackStreamValue::from(s300.as_str()))[..3], &[0xD1, 0x01, 0x2C]);
    }

    #[test]
    fn test_encode_bytes_never_tiny() {
        assert_eq!(bytes_of(PackStreamValue::Bytes(vec![1, 2])), vec![0xCC, 2, 1, 2]);
    }

    #[test]
    fn test_encode_structure() {
        let s = PackStreamStructure::new(0x70, vec![PackStreamValue::Map(HashMap::new())]);
        assert_eq!(bytes_of(PackStreamValue::Structure(s)), vec![0xB1, 0x70, 0xA0]);
    }

    #[test]
    fn test_encode_list_of_sixteen() {
        let list = PackStreamValue::List(vec![PackStreamValue::Null; 16]);
        let out = bytes_of(list);
        assert_eq!(&out[..2], &[0xD4, 16]);
        assert_eq!(out.len(), 18);
    }
}

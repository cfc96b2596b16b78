//! PackStream decoder.

use bytes::Buf;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use super::marker::*;
use super::types::{PackStreamStructure, PackStreamValue};
use super::PackStreamError;

/// Default bound on declared container, string and byte array sizes.
pub const DEFAULT_MAX_CONTAINER_SIZE: usize = i32::MAX as usize;

/// Default bound on how deeply lists, maps and structures may nest.
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 64;

/// Reads PackStream values from a byte slice.
///
/// Declared sizes are checked against `max_container_size` before anything
/// is allocated, and against the remaining input before anything is read.
/// Containers nested deeper than `max_depth` are refused before their
/// elements are read.
pub struct PackStreamDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    max_container_size: usize,
    depth: usize,
    max_depth: usize,
}

impl<'a> PackStreamDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_limit(data, DEFAULT_MAX_CONTAINER_SIZE)
    }

    pub fn with_limit(data: &'a [u8], max_container_size: usize) -> Self {
        Self {
            data,
            pos: 0,
            max_container_size,
            depth: 0,
            max_depth: DEFAULT_MAX_NESTING_DEPTH,
        }
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Decodes the next value.
    pub fn decode(&mut self) -> Result<PackStreamValue, PackStreamError> {
        let marker = self.read_u8()?;

        if is_tiny_int(marker) {
            return Ok(PackStreamValue::Integer(marker as i8 as i64));
        }

        let (family, tiny_len) = split_tiny(marker);
        match family {
            TINY_STRING => return self.read_string(tiny_len),
            TINY_LIST => return self.read_list(tiny_len),
            TINY_MAP => return self.read_map(tiny_len),
            TINY_STRUCT => return self.read_struct(tiny_len),
            _ => {}
        }

        match marker {
            NULL => Ok(PackStreamValue::Null),
            TRUE => Ok(PackStreamValue::Boolean(true)),
            FALSE => Ok(PackStreamValue::Boolean(false)),
            FLOAT_64 => Ok(PackStreamValue::Float(self.take(8)?.get_f64())),

            INT_8 => Ok(PackStreamValue::Integer(self.take(1)?.get_i8() as i64)),
            INT_16 => Ok(PackStreamValue::Integer(self.take(2)?.get_i16() as i64)),
            INT_32 => Ok(PackStreamValue::Integer(self.take(4)?.get_i32() as i64)),
            INT_64 => Ok(PackStreamValue::Integer(self.take(8)?.get_i64())),

            BYTES_8 | BYTES_16 | BYTES_32 => {
                let len = self.read_size(marker - BYTES_8)?;
                Ok(PackStreamValue::Bytes(self.take(len)?.to_vec()))
            }
            STRING_8 | STRING_16 | STRING_32 => {
                let len = self.read_size(marker - STRING_8)?;
                self.read_string(len)
            }
            LIST_8 | LIST_16 | LIST_32 => {
                let len = self.read_size(marker - LIST_8)?;
                self.read_list(len)
            }
            MAP_8 | MAP_16 | MAP_32 => {
                let len = self.read_size(marker - MAP_8)?;
                self.read_map(len)
            }
            STRUCT_8 | STRUCT_16 => {
                let len = self.read_size(marker - STRUCT_8)?;
                self.read_struct(len)
            }

            _ => Err(PackStreamError::UnknownMarker(marker)),
        }
    }

    /// Reads a big-endian size whose width is selected by `width_index`
    /// (0 = u8, 1 = u16, 2 = u32) and checks it against the limit.
    fn read_size(&mut self, width_index: u8) -> Result<usize, PackStreamError> {
        let size = match width_index {
            0 => self.take(1)?.get_u8() as usize,
            1 => self.take(2)?.get_u16() as usize,
            _ => self.take(4)?.get_u32() as usize,
        };
        if size > self.max_container_size {
            return Err(PackStreamError::ValueTooLarge {
                size,
                limit: self.max_container_size,
            });
        }
        Ok(size)
    }

    fn read_string(&mut self, len: usize) -> Result<PackStreamValue, PackStreamError> {
        let bytes = self.take(len)?;
        let s = std::str::from_utf8(bytes)
            .map_err(|e| PackStreamError::InvalidUtf8(e.to_string()))?;
        Ok(PackStreamValue::String(s.to_string()))
    }

    fn descend(&mut self) -> Result<(), PackStreamError> {
        if self.depth >= self.max_depth {
            return Err(PackStreamError::NestingTooDeep {
                limit: self.max_depth,
            });
        }
        self.depth += 1;
        Ok(())
    }

    fn read_list(&mut self, len: usize) -> Result<PackStreamValue, PackStreamError> {
        self.descend()?;
        // Every element needs at least one byte.
        let mut items = Vec::with_capacity(len.min(self.remaining()));
        for _ in 0..len {
            items.push(self.decode()?);
        }
        self.depth -= 1;
        Ok(PackStreamValue::List(items))
    }

    fn read_map(&mut self, len: usize) -> Result<PackStreamValue, PackStreamError> {
        self.descend()?;
        let mut map = HashMap::with_capacity(len.min(self.remaining() / 2));
        for _ in 0..len {
            let key = match self.decode()? {
                PackStreamValue::String(s) => s,
                PackStreamValue::Null => return Err(PackStreamError::NullMapKey),
                other => return Err(PackStreamError::InvalidMapKey(other.type_name())),
            };
            let value = self.decode()?;
            match map.entry(key) {
                Entry::Occupied(entry) => {
                    return Err(PackStreamError::DuplicateMapKey(entry.key().clone()))
                }
                Entry::Vacant(entry) => {
                    entry.insert(value);
                }
            }
        }
        self.depth -= 1;
        Ok(PackStreamValue::Map(map))
    }

    fn read_struct(&mut self, field_count: usize) -> Result<PackStreamValue, PackStreamError> {
        self.descend()?;
        let tag = self.read_u8()?;
        let mut fields = Vec::with_capacity(field_count.min(self.remaining()));
        for _ in 0..field_count {
            fields.push(self.decode()?);
        }
        self.depth -= 1;
        Ok(PackStreamValue::Structure(PackStreamStructure::new(tag, fields)))
    }

    fn read_u8(&mut self) -> Result<u8, PackStreamError> {
        Ok(self.take(1)?[0])
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], PackStreamError> {
        if self.remaining() < len {
            return Err(PackStreamError::UnexpectedEof);
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }
}

/// Decodes a single value from `data` with the default size limit.
pub fn decode(data: &[u8]) -> Result<PackStreamValue, PackStreamError> {
    PackStreamDecoder::new(data).decode()
}

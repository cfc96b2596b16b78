//! PackStream marker bytes and structure tags.
//!
//! Every PackStream value starts with a marker byte. Small strings, lists,
//! maps and structures carry their size in the low nibble of the marker;
//! larger ones use a dedicated marker followed by a big-endian size.

pub const NULL: u8 = 0xC0;
pub const FLOAT_64: u8 = 0xC1;
pub const FALSE: u8 = 0xC2;
pub const TRUE: u8 = 0xC3;

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

/// High nibbles of the size-in-marker families.
pub const TINY_STRING: u8 = 0x80;
pub const TINY_LIST: u8 = 0x90;
pub const TINY_MAP: u8 = 0xA0;
pub const TINY_STRUCT: u8 = 0xB0;

/// Largest size that fits in a tiny marker.
pub const TINY_MAX: usize = 0x0F;

/// Negative tiny integers occupy 0xF0..=0xFF.
pub const TINY_INT_NEG_MIN: u8 = 0xF0;

/// Graph structure tags.
pub const NODE: u8 = 0x4E;
pub const RELATIONSHIP: u8 = 0x52;
pub const UNBOUND_RELATIONSHIP: u8 = 0x72;
pub const PATH: u8 = 0x50;

/// Temporal structure tags.
pub const DATE: u8 = 0x44;
pub const TIME: u8 = 0x54;
pub const LOCAL_TIME: u8 = 0x74;
pub const LOCAL_DATE_TIME: u8 = 0x64;
pub const DURATION: u8 = 0x45;
/// Local wall-clock seconds plus offset (Bolt 4.x without the `utc` patch).
pub const LEGACY_DATE_TIME: u8 = 0x46;
/// Local wall-clock seconds plus zone id (Bolt 4.x without the `utc` patch).
pub const LEGACY_DATE_TIME_ZONE_ID: u8 = 0x66;
/// UTC seconds plus offset.
pub const DATE_TIME: u8 = 0x49;
/// UTC seconds plus zone id.
pub const DATE_TIME_ZONE_ID: u8 = 0x69;

/// Spatial structure tags.
pub const POINT_2D: u8 = 0x58;
pub const POINT_3D: u8 = 0x59;

/// Returns `true` for markers that encode an integer in the marker itself.
#[inline]
pub fn is_tiny_int(marker: u8) -> bool {
    marker < TINY_STRING || marker >= TINY_INT_NEG_MIN
}

/// Splits a tiny container marker into its family nibble and size.
#[inline]
pub fn split_tiny(marker: u8) -> (u8, usize) {
    (marker & 0xF0, (marker & 0x0F) as usize)
}

#[inline]
pub fn fits_tiny_int(value: i64) -> bool {
    (-16..=127).contains(&value)
}

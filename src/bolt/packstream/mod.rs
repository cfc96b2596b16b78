//! PackStream serialization format.
//!
//! PackStream is the binary tag-length-value format carried inside Bolt
//! messages.
//!
//! # Layers
//!
//! - [`encoder`] / [`decoder`] handle the version-independent wire format:
//!   scalars, strings, bytes, lists, maps and raw tagged structures.
//! - [`structures`] gives typed views of graph, temporal and spatial
//!   structures.
//! - [`profile`] is the per-connection capability table. It decides which
//!   structures a client may send for the negotiated protocol version,
//!   validates them, and converts temporal values between the legacy and
//!   UTC wire forms.

pub mod decoder;
pub mod encoder;
pub mod marker;
pub mod profile;
pub mod structures;
pub mod types;

pub use decoder::{decode, PackStreamDecoder, DEFAULT_MAX_CONTAINER_SIZE, DEFAULT_MAX_NESTING_DEPTH};
pub use encoder::{encode, PackStreamEncoder};
pub use profile::StructProfile;
pub use structures::{
    Crs, PackStreamDate, PackStreamDateTime, PackStreamDateTimeZoneId, PackStreamDuration,
    PackStreamLocalDateTime, PackStreamLocalTime, PackStreamNode, PackStreamPath,
    PackStreamPoint2D, PackStreamPoint3D, PackStreamRelationship, PackStreamTime,
    PackStreamUnboundRelationship,
};
pub use types::{PackStreamStructure, PackStreamValue};

use std::fmt;

use super::error::BoltErrorCode;

/// PackStream errors.
#[derive(Debug, Clone, PartialEq)]
pub enum PackStreamError {
    /// Input ended inside a value
    UnexpectedEof,
    /// Marker byte outside the PackStream marker table
    UnknownMarker(u8),
    /// String payload is not UTF-8
    InvalidUtf8(String),
    /// Map key was `null`
    NullMapKey,
    /// Map key was neither a string nor `null`; carries the key's type name
    InvalidMapKey(&'static str),
    /// The same key appeared twice in one map
    DuplicateMapKey(String),
    /// Declared size above the configured limit
    ValueTooLarge { size: usize, limit: usize },
    /// Lists, maps and structures nested deeper than the configured limit
    NestingTooDeep { limit: usize },
    /// Bytes left over after the message structure
    TrailingBytes(usize),
    /// Known structure the negotiated version does not accept from clients
    UnsupportedStructure(&'static str),
    /// Structure tag not known at all
    UnknownStructure(u8),
    /// Structure with the wrong number or type of fields
    InvalidStructure(String),
    /// Well-formed structure holding a value that cannot be constructed
    /// (unknown CRS, dimension mismatch, unknown zone id)
    InvalidValue(String),
}

impl PackStreamError {
    /// Status code reported to the client.
    pub fn status(&self) -> &'static str {
        match self {
            PackStreamError::UnexpectedEof
            | PackStreamError::UnknownMarker(_)
            | PackStreamError::InvalidUtf8(_) => BoltErrorCode::INVALID_FORMAT,
            PackStreamError::NullMapKey
            | PackStreamError::InvalidMapKey(_)
            | PackStreamError::DuplicateMapKey(_)
            | PackStreamError::ValueTooLarge { .. }
            | PackStreamError::NestingTooDeep { .. }
            | PackStreamError::InvalidValue(_) => BoltErrorCode::INVALID_ARGUMENT,
            PackStreamError::UnsupportedStructure(_) | PackStreamError::UnknownStructure(_) => {
                BoltErrorCode::TYPE_ERROR
            }
            PackStreamError::InvalidStructure(_) | PackStreamError::TrailingBytes(_) => {
                BoltErrorCode::REQUEST_INVALID
            }
        }
    }

    /// Whether the connection must be closed after reporting this error.
    ///
    /// Only value construction errors leave the stream in a known state.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PackStreamError::InvalidValue(_))
    }
}

impl fmt::Display for PackStreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PackStreamError::UnexpectedEof => write!(f, "Unexpected end of PackStream data"),
            PackStreamError::UnknownMarker(m) => {
                write!(f, "Unknown PackStream marker: 0x{:02X}", m)
            }
            PackStreamError::InvalidUtf8(e) => write!(f, "Invalid UTF-8 in string: {}", e),
            PackStreamError::NullMapKey => write!(
                f,
                "Value `null` is not supported as key in maps, must be a non-nullable string."
            ),
            PackStreamError::InvalidMapKey(found) => {
                write!(f, "Map keys must be strings, found {}", found)
            }
            PackStreamError::DuplicateMapKey(key) => write!(f, "Duplicate map key `{}`.", key),
            PackStreamError::ValueTooLarge { size, limit } => {
                write!(f, "value of size {} exceeded limit of {}", size, limit)
            }
            PackStreamError::NestingTooDeep { limit } => {
                write!(f, "values nested deeper than {} levels are not supported", limit)
            }
            PackStreamError::TrailingBytes(n) => {
                write!(f, "{} unexpected bytes after the message structure", n)
            }
            PackStreamError::UnsupportedStructure(name) => {
                write!(f, "{} values cannot be unpacked with this version of bolt", name)
            }
            PackStreamError::UnknownStructure(tag) => {
                write!(f, "Struct tag: 0x{:02X} not recognized", tag)
            }
            PackStreamError::InvalidStructure(msg) => write!(f, "Invalid structure: {}", msg),
            PackStreamError::InvalidValue(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for PackStreamError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_roundtrip_structure() {
        let s = PackStreamStructure::new(
            marker::NODE,
            vec![
                PackStreamValue::Integer(1),
                PackStreamValue::string_list(["Person"]),
                PackStreamValue::Map(HashMap::new()),
            ],
        );
        let value = PackStreamValue::Structure(s);
        let bytes = encode(&value).unwrap();
        assert_eq!(decode(&bytes).unwrap(), value);
    }

    #[test]
    fn test_roundtrip_map() {
        let mut map = HashMap::new();
        map.insert("a".to_string(), PackStreamValue::Integer(1));
        map.insert("b".to_string(), PackStreamValue::from("hello"));
        map.insert("c".to_string(), PackStreamValue::Null);
        let value = PackStreamValue::Map(map);
        let bytes = encode(&value).unwrap();
        assert_eq!(decode(&bytes).unwrap(), value);
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(PackStreamError::NullMapKey.status(), BoltErrorCode::INVALID_ARGUMENT);
        assert_eq!(
            PackStreamError::UnsupportedStructure("Node").status(),
            BoltErrorCode::TYPE_ERROR
        );
        assert_eq!(PackStreamError::UnknownMarker(0xE0).status(), BoltErrorCode::INVALID_FORMAT);
    }

    #[test]
    fn test_fatality() {
        assert!(PackStreamError::UnknownMarker(0xE0).is_fatal());
        assert!(PackStreamError::UnsupportedStructure("Node").is_fatal());
        assert!(PackStreamError::DuplicateMapKey("k".into()).is_fatal());
        assert!(!PackStreamError::InvalidValue("bad crs".into()).is_fatal());
    }

    #[test]
    fn test_unsupported_structure_message() {
        assert_eq!(
            PackStreamError::UnsupportedStructure("Node").to_string(),
            "Node values cannot be unpacked with this version of bolt"
        );
    }
}

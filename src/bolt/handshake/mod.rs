//! Bolt protocol handshake.
//!
//! 1. Client sends the 4-byte magic number (0x6060B017)
//! 2. Client sends four 4-byte version proposals
//! 3. Server responds with the agreed version, or zeros if none

mod negotiation;
mod version;

pub use negotiation::{build_client_handshake, Handshake, HandshakeResult};
pub use version::BoltVersion;

pub use super::error::HandshakeError;

/// Bolt protocol magic number: 0x6060B017
pub const BOLT_MAGIC: [u8; 4] = [0x60, 0x60, 0xB0, 0x17];

/// Size of the complete client preamble (magic + 4 proposals)
pub const HANDSHAKE_SIZE: usize = 20;

/// Server response when no version is agreed.
pub const NO_VERSION: [u8; 4] = [0x00, 0x00, 0x00, 0x00];

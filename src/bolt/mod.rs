//! # Bolt protocol layer
//!
//! Wire-level pieces of the server, independent of sessions and transports:
//!
//! - [`handshake`] - magic preamble and version negotiation
//! - [`codec`] - chunked framing and the server message codec for Tokio
//! - [`packstream`] - binary serialization and the per-version structure
//!   capability table
//! - [`message`] - request and response messages
//! - [`error`] - protocol error taxonomy and status codes
//!
//! Bolt 4.0 through 5.1 are supported.

pub mod codec;
pub mod error;
pub mod handshake;
pub mod message;
pub mod packstream;

pub use codec::{BoltServerCodec, ChunkCodec, Frame, Inbound, Outbound};
pub use error::{BoltError, BoltErrorCode, BoltResult, HandshakeError, RequestError};
pub use handshake::{BoltVersion, Handshake, BOLT_MAGIC};
pub use message::{
    AccessMode, BoltRequest, BoltResponse, FailureMessage, Notification, QueryPlan, QueryStats,
    QueryType, RecordMessage, RoutingTable, SuccessMessage, TxOptions,
};
pub use packstream::{PackStreamError, PackStreamStructure, PackStreamValue, StructProfile};

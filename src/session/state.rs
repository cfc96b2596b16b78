use std::fmt;

use crate::bolt::error::{BoltError, RequestError};
use crate::bolt::message::BoltRequest;

/// Connection states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Handshake not finished
    Connecting,
    AwaitingHello,
    /// Bolt 5.1+: HELLO done, LOGON pending
    AwaitingAuth,
    Ready,
    /// Auto-commit result open
    Streaming,
    TxReady,
    /// Explicit transaction with open results
    TxStreaming,
    /// A request failed; everything but RESET is ignored
    Interrupted,
    /// Unrecoverable error; the connection is about to close
    Failed,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "CONNECTING",
            SessionState::AwaitingHello => "NEGOTIATION",
            SessionState::AwaitingAuth => "AUTHENTICATION",
            SessionState::Ready => "READY",
            SessionState::Streaming => "STREAMING",
            SessionState::TxReady => "TX_READY",
            SessionState::TxStreaming => "TX_STREAMING",
            SessionState::Interrupted => "FAILED",
            SessionState::Failed => "DEFUNCT",
            SessionState::Closed => "CLOSED",
        }
    }

    /// States in which credentials have been accepted.
    pub fn is_authenticated(&self) -> bool {
        matches!(
            self,
            SessionState::Ready
                | SessionState::Streaming
                | SessionState::TxReady
                | SessionState::TxStreaming
                | SessionState::Interrupted
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Failed | SessionState::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs of the session state machine.
#[derive(Debug)]
pub enum SessionEvent {
    Request(BoltRequest),
    /// Well-framed message with invalid content
    Invalid(RequestError),
    /// Corrupt stream or undecodable message
    Fatal(BoltError),
    /// RESET seen by the reader while the session was idle
    InterruptRequested,
    PeerClosed,
}

/// What the connection does after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Continue,
    Close,
}

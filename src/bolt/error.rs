//! Bolt protocol error types.
//!
//! Every error knows its disposition. Framing and transport failures close
//! the connection without a response because the stream may already be
//! corrupt. Decode failures close it after a best-effort FAILURE. Request
//! errors are answered with FAILURE and leave the connection open until
//! RESET.

use std::fmt;
use std::io;

use super::message::FailureMessage;
use super::packstream::PackStreamError;

/// Result type for Bolt operations.
pub type BoltResult<T> = Result<T, BoltError>;

/// Bolt protocol errors.
#[derive(Debug)]
pub enum BoltError {
    /// I/O error
    Io(io::Error),

    /// Handshake error
    Handshake(HandshakeError),

    /// Malformed chunking (truncated chunk, unterminated message)
    Framing(String),

    /// Reassembled message larger than the configured maximum
    MessageTooLarge { size: usize, max: usize },

    /// PackStream decode error
    PackStream(PackStreamError),

    /// Message tag unknown, or not valid for the negotiated version
    UnknownMessage(u8),

    /// Well-framed message with invalid field types or values
    Request(RequestError),

    /// Connection closed
    ConnectionClosed,
}

impl BoltError {
    /// Whether the connection must be closed after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, BoltError::Request(_))
    }

    /// The FAILURE to report for this error, if any can be delivered.
    pub fn to_failure(&self) -> Option<FailureMessage> {
        match self {
            BoltError::PackStream(e) => Some(FailureMessage::new(e.status(), &e.to_string())),
            BoltError::UnknownMessage(tag) => Some(FailureMessage::new(
                BoltErrorCode::REQUEST_INVALID,
                &format!("Message 0x{:02X} is not supported in this protocol version", tag),
            )),
            BoltError::Request(e) => Some(e.to_failure()),
            BoltError::Io(_)
            | BoltError::Handshake(_)
            | BoltError::Framing(_)
            | BoltError::MessageTooLarge { .. }
            | BoltError::ConnectionClosed => None,
        }
    }
}

impl fmt::Display for BoltError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoltError::Io(e) => write!(f, "I/O error: {}", e),
            BoltError::Handshake(e) => write!(f, "Handshake error: {}", e),
            BoltError::Framing(msg) => write!(f, "Framing error: {}", msg),
            BoltError::MessageTooLarge { size, max } => {
                write!(f, "Message too large: {} bytes (max: {})", size, max)
            }
            BoltError::PackStream(e) => write!(f, "PackStream error: {}", e),
            BoltError::UnknownMessage(tag) => write!(f, "Unknown message tag: 0x{:02X}", tag),
            BoltError::Request(e) => write!(f, "Invalid request: {}", e),
            BoltError::ConnectionClosed => write!(f, "Connection closed"),
        }
    }
}

impl std::error::Error for BoltError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BoltError::Io(e) => Some(e),
            BoltError::Handshake(e) => Some(e),
            BoltError::PackStream(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for BoltError {
    fn from(err: io::Error) -> Self {
        BoltError::Io(err)
    }
}

impl From<HandshakeError> for BoltError {
    fn from(err: HandshakeError) -> Self {
        BoltError::Handshake(err)
    }
}

impl From<PackStreamError> for BoltError {
    fn from(err: PackStreamError) -> Self {
        if err.is_fatal() {
            BoltError::PackStream(err)
        } else {
            BoltError::Request(RequestError::from(err))
        }
    }
}

impl From<RequestError> for BoltError {
    fn from(err: RequestError) -> Self {
        BoltError::Request(err)
    }
}

/// Recoverable error in an otherwise well-formed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestError {
    pub code: &'static str,
    pub message: String,
}

impl RequestError {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Field missing or of the wrong type.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(BoltErrorCode::REQUEST_INVALID, message)
    }

    /// Field present but with an unacceptable value.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(BoltErrorCode::INVALID_ARGUMENT, message)
    }

    pub fn to_failure(&self) -> FailureMessage {
        FailureMessage::new(self.code, &self.message)
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RequestError {}

impl From<PackStreamError> for RequestError {
    fn from(err: PackStreamError) -> Self {
        Self::new(err.status(), err.to_string())
    }
}

/// Handshake-specific errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Invalid magic number received
    InvalidMagic { expected: [u8; 4], received: [u8; 4] },

    /// No compatible protocol version found
    NoCompatibleVersion,

    /// Connection closed during handshake
    ConnectionClosed,
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandshakeError::InvalidMagic { expected, received } => {
                write!(
                    f,
                    "Invalid magic number: expected {:02X?}, received {:02X?}",
                    expected, received
                )
            }
            HandshakeError::NoCompatibleVersion => {
                write!(f, "No compatible protocol version found")
            }
            HandshakeError::ConnectionClosed => {
                write!(f, "Connection closed during handshake")
            }
        }
    }
}

impl std::error::Error for HandshakeError {}

/// Bolt status codes reported in FAILURE messages.
pub struct BoltErrorCode;

impl BoltErrorCode {
    // Request
    pub const REQUEST_INVALID: &'static str = "Neo.ClientError.Request.Invalid";
    pub const INVALID_FORMAT: &'static str = "Neo.ClientError.Request.InvalidFormat";
    pub const INVALID_ARGUMENT: &'static str = "Neo.ClientError.General.InvalidArguments";

    // Security
    pub const UNAUTHORIZED: &'static str = "Neo.ClientError.Security.Unauthorized";
    pub const AUTHENTICATION_RATE_LIMIT: &'static str =
        "Neo.ClientError.Security.AuthenticationRateLimit";
    pub const CREDENTIALS_EXPIRED: &'static str = "Neo.ClientError.Security.CredentialsExpired";
    pub const FORBIDDEN: &'static str = "Neo.ClientError.Security.Forbidden";

    // Statement
    pub const SYNTAX_ERROR: &'static str = "Neo.ClientError.Statement.SyntaxError";
    pub const SEMANTIC_ERROR: &'static str = "Neo.ClientError.Statement.SemanticError";
    pub const TYPE_ERROR: &'static str = "Neo.ClientError.Statement.TypeError";
    pub const PARAMETER_MISSING: &'static str = "Neo.ClientError.Statement.ParameterMissing";
    pub const CONSTRAINT_VIOLATION: &'static str =
        "Neo.ClientError.Schema.ConstraintValidationFailed";
    pub const INDEX_NOT_FOUND: &'static str = "Neo.ClientError.Schema.IndexNotFound";

    // Transaction
    pub const TRANSACTION_NOT_FOUND: &'static str =
        "Neo.ClientError.Transaction.TransactionNotFound";
    pub const INVALID_BOOKMARK: &'static str = "Neo.ClientError.Transaction.InvalidBookmark";
    pub const DATABASE_NOT_FOUND: &'static str = "Neo.ClientError.Database.DatabaseNotFound";

    // Database errors
    pub const GENERAL_ERROR: &'static str = "Neo.DatabaseError.General.UnknownError";
    pub const EXECUTION_FAILED: &'static str = "Neo.DatabaseError.Statement.ExecutionFailed";

    // Transient errors (retry may succeed)
    pub const LOCK_CLIENT_STOPPED: &'static str =
        "Neo.TransientError.Transaction.LockClientStopped";
    pub const TERMINATED: &'static str = "Neo.TransientError.Transaction.Terminated";
    pub const TRANSACTION_TIMEOUT: &'static str =
        "Neo.TransientError.Transaction.TransactionTimedOut";
    pub const DEADLOCK_DETECTED: &'static str = "Neo.TransientError.Transaction.DeadlockDetected";
    pub const DATABASE_UNAVAILABLE: &'static str =
        "Neo.TransientError.General.DatabaseUnavailable";
}

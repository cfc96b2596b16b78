//! # Auth gate
//!
//! Structural token validation, the pluggable credential check, failed
//! attempt rate limiting and the password-change pathway.
//!
//! Every failure is logged at warning level with a stable message so that
//! operators can alert on it.

mod authenticator;
mod password;
mod rate_limit;
mod token;

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

pub use authenticator::{AuthSuccess, Authenticator, InMemoryAuthenticator};
pub use password::PasswordChange;
pub use rate_limit::{AuthRateLimiter, Clock, ManualClock, SystemClock};
pub use token::AuthToken;

use crate::bolt::error::BoltErrorCode;
use crate::bolt::message::FailureMessage;
use crate::bolt::packstream::PackStreamValue;

/// Logged for every failed authentication attempt.
pub const AUTH_FAILURE_LOG: &str = "The client is unauthorized due to authentication failure.";

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Missing or mistyped token keys; never counted by the rate limiter
    #[error("{0}")]
    InvalidToken(String),

    #[error("Unsupported authentication token, scheme '{0}' is not supported.")]
    UnsupportedScheme(String),

    #[error("The client is unauthorized due to authentication failure.")]
    InvalidCredentials,

    #[error("The client has provided incorrect authentication details too many times in a row.")]
    RateLimited,
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::RateLimited => BoltErrorCode::AUTHENTICATION_RATE_LIMIT,
            _ => BoltErrorCode::UNAUTHORIZED,
        }
    }

    pub fn counts_toward_limit(&self) -> bool {
        matches!(self, AuthError::UnsupportedScheme(_) | AuthError::InvalidCredentials)
    }

    pub fn to_failure(&self) -> FailureMessage {
        FailureMessage::new(self.code(), &self.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PasswordError {
    #[error("A password cannot be empty.")]
    Empty,

    #[error("Old password and new password cannot be the same.")]
    SameAsOld,

    #[error("Invalid principal or credentials.")]
    WrongOldPassword,

    #[error("User '{0}' does not exist.")]
    UnknownUser(String),
}

impl PasswordError {
    pub fn to_failure(&self) -> FailureMessage {
        FailureMessage::new(BoltErrorCode::INVALID_ARGUMENT, &self.to_string())
    }
}

// ============================================================================
// AuthGate
// ============================================================================

/// Front door for HELLO and LOGON credentials.
#[derive(Clone)]
pub struct AuthGate {
    authenticator: Arc<dyn Authenticator>,
    limiter: Arc<AuthRateLimiter>,
}

impl AuthGate {
    pub fn new(authenticator: Arc<dyn Authenticator>, limiter: Arc<AuthRateLimiter>) -> Self {
        Self {
            authenticator,
            limiter,
        }
    }

    pub fn authenticator(&self) -> &Arc<dyn Authenticator> {
        &self.authenticator
    }

    /// Validates and checks the auth entries sent by a client.
    ///
    /// Attempts are keyed by principal, or by `peer` when the token has none.
    pub fn authenticate(
        &self,
        auth: &HashMap<String, PackStreamValue>,
        peer: &str,
    ) -> Result<AuthSuccess, AuthError> {
        let result = self.check(auth, peer);
        if let Err(e) = &result {
            warn!(peer, reason = %e, "{}", AUTH_FAILURE_LOG);
        }
        result
    }

    fn check(
        &self,
        auth: &HashMap<String, PackStreamValue>,
        peer: &str,
    ) -> Result<AuthSuccess, AuthError> {
        let token = AuthToken::from_map(auth)?;
        let key = token.principal().unwrap_or(peer);

        if self.limiter.is_locked(key) {
            return Err(AuthError::RateLimited);
        }

        let result = if self.authenticator.supports_scheme(token.scheme()) {
            self.authenticator.authenticate(&token)
        } else {
            Err(AuthError::UnsupportedScheme(token.scheme().to_string()))
        };

        match &result {
            Ok(_) => self.limiter.record_success(key),
            Err(e) if e.counts_toward_limit() => self.limiter.record_failure(key),
            Err(_) => {}
        }
        result
    }
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate")
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

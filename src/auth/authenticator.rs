//! Credential check capability.

use std::collections::HashMap;

use parking_lot::RwLock;

use super::{AuthError, AuthToken, PasswordError};

/// Result of a successful credential check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSuccess {
    /// `None` for anonymous access
    pub principal: Option<String>,
    /// The session may only change its password until this is cleared
    pub credentials_expired: bool,
}

/// Authentication backend consulted by the session.
pub trait Authenticator: Send + Sync {
    fn supports_scheme(&self, scheme: &str) -> bool;

    /// Checks a structurally valid token.
    fn authenticate(&self, token: &AuthToken) -> Result<AuthSuccess, AuthError>;

    /// Changes the password of an authenticated principal. `old` is given
    /// when the client supplied it and must then match the current one.
    fn change_password(
        &self,
        principal: &str,
        old: Option<&str>,
        new: &str,
    ) -> Result<(), PasswordError>;
}

// ============================================================================
// InMemoryAuthenticator
// ============================================================================

#[derive(Debug, Clone)]
struct User {
    password: String,
    credentials_expired: bool,
}

/// Users held in memory, `basic` scheme only unless anonymous access is on.
#[derive(Debug, Default)]
pub struct InMemoryAuthenticator {
    users: RwLock<HashMap<String, User>>,
    allow_anonymous: bool,
}

impl InMemoryAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(self, name: impl Into<String>, password: impl Into<String>) -> Self {
        self.insert(name.into(), password.into(), false);
        self
    }

    /// Adds a user whose password must be changed before querying.
    pub fn with_expired_user(self, name: impl Into<String>, password: impl Into<String>) -> Self {
        self.insert(name.into(), password.into(), true);
        self
    }

    pub fn allow_anonymous(mut self) -> Self {
        self.allow_anonymous = true;
        self
    }

    fn insert(&self, name: String, password: String, credentials_expired: bool) {
        self.users.write().insert(
            name,
            User {
                password,
                credentials_expired,
            },
        );
    }
}

impl Authenticator for InMemoryAuthenticator {
    fn supports_scheme(&self, scheme: &str) -> bool {
        scheme == "basic" || (scheme == "none" && self.allow_anonymous)
    }

    fn authenticate(&self, token: &AuthToken) -> Result<AuthSuccess, AuthError> {
        match token {
            AuthToken::None if self.allow_anonymous => Ok(AuthSuccess {
                principal: None,
                credentials_expired: false,
            }),
            AuthToken::Basic {
                principal,
                credentials,
                ..
            } => {
                let users = self.users.read();
                match users.get(principal) {
                    Some(user) if user.password == *credentials => Ok(AuthSuccess {
                        principal: Some(principal.clone()),
                        credentials_expired: user.credentials_expired,
                    }),
                    _ => Err(AuthError::InvalidCredentials),
                }
            }
            other => Err(AuthError::UnsupportedScheme(other.scheme().to_string())),
        }
    }

    fn change_password(
        &self,
        principal: &str,
        old: Option<&str>,
        new: &str,
    ) -> Result<(), PasswordError> {
        if new.is_empty() {
            return Err(PasswordError::Empty);
        }
        let mut users = self.users.write();
        let user = users
            .get_mut(principal)
            .ok_or_else(|| PasswordError::UnknownUser(principal.to_string()))?;
        if old.is_some_and(|old| old != user.password) {
            return Err(PasswordError::WrongOldPassword);
        }
        if user.password == new {
            return Err(PasswordError::SameAsOld);
        }
        user.password = new.to_string();
        user.credentials_expired = false;
        Ok(())
    }
}

//! Authentication tokens.

use std::collections::HashMap;
use std::fmt;

use super::AuthError;
use crate::bolt::packstream::PackStreamValue;

type Map = HashMap<String, PackStreamValue>;

// ============================================================================
// AuthToken
// ============================================================================

/// Structurally validated authentication token.
#[derive(Clone, PartialEq)]
pub enum AuthToken {
    /// Anonymous access
    None,
    Basic {
        principal: String,
        credentials: String,
        realm: Option<String>,
    },
    Bearer {
        credentials: String,
    },
    Kerberos {
        credentials: String,
    },
    /// Any other scheme; whether it is supported is up to the authenticator
    Custom {
        scheme: String,
        principal: String,
        credentials: String,
        realm: Option<String>,
        parameters: Map,
    },
}

impl AuthToken {
    pub fn basic(principal: impl Into<String>, credentials: impl Into<String>) -> Self {
        Self::Basic {
            principal: principal.into(),
            credentials: credentials.into(),
            realm: None,
        }
    }

    /// Validates the auth entries of a HELLO or LOGON message.
    ///
    /// Missing or mistyped keys are reported with the key name and never
    /// reach the credential check.
    pub fn from_map(map: &Map) -> Result<Self, AuthError> {
        let scheme = required_string(map, "scheme")?;
        let token = match scheme.as_str() {
            "none" => Self::None,
            "basic" => Self::Basic {
                principal: required_string(map, "principal")?,
                credentials: required_string(map, "credentials")?,
                realm: optional_string(map, "realm")?,
            },
            "bearer" => Self::Bearer {
                credentials: required_string(map, "credentials")?,
            },
            "kerberos" => Self::Kerberos {
                credentials: required_string(map, "credentials")?,
            },
            _ => Self::Custom {
                principal: required_string(map, "principal")?,
                credentials: required_string(map, "credentials")?,
                realm: optional_string(map, "realm")?,
                parameters: match map.get("parameters") {
                    None | Some(PackStreamValue::Null) => Map::new(),
                    Some(PackStreamValue::Map(m)) => m.clone(),
                    Some(other) => return Err(wrong_type("parameters", "Map", other)),
                },
                scheme,
            },
        };
        Ok(token)
    }

    pub fn scheme(&self) -> &str {
        match self {
            Self::None => "none",
            Self::Basic { .. } => "basic",
            Self::Bearer { .. } => "bearer",
            Self::Kerberos { .. } => "kerberos",
            Self::Custom { scheme, .. } => scheme,
        }
    }

    pub fn principal(&self) -> Option<&str> {
        match self {
            Self::Basic { principal, .. } | Self::Custom { principal, .. } => Some(principal),
            _ => None,
        }
    }

    pub fn credentials(&self) -> Option<&str> {
        match self {
            Self::None => None,
            Self::Basic { credentials, .. }
            | Self::Bearer { credentials }
            | Self::Kerberos { credentials }
            | Self::Custom { credentials, .. } => Some(credentials),
        }
    }
}

// Credentials never show up in logs.
impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthToken")
            .field("scheme", &self.scheme())
            .field("principal", &self.principal())
            .finish_non_exhaustive()
    }
}

fn required_string(map: &Map, key: &str) -> Result<String, AuthError> {
    match map.get(key) {
        Some(PackStreamValue::String(s)) => Ok(s.clone()),
        None | Some(PackStreamValue::Null) => Err(AuthError::InvalidToken(format!(
            "Unsupported authentication token, missing key `{}`",
            key
        ))),
        Some(other) => Err(wrong_type(key, "String", other)),
    }
}

fn optional_string(map: &Map, key: &str) -> Result<Option<String>, AuthError> {
    match map.get(key) {
        None | Some(PackStreamValue::Null) => Ok(None),
        Some(PackStreamValue::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(wrong_type(key, "String", other)),
    }
}

fn wrong_type(key: &str, expected: &str, actual: &PackStreamValue) -> AuthError {
    AuthError::InvalidToken(format!(
        "Unsupported authentication token, the value associated with the key `{}` must be a {} but was: {}",
        key,
        expected,
        actual.type_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, PackStreamValue)]) -> Map {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_basic_token() {
        let token = AuthToken::from_map(&map(&[
            ("scheme", "basic".into()),
            ("principal", "neo4j".into()),
            ("credentials", "secret".into()),
        ]))
        .unwrap();
        assert_eq!(token, AuthToken::basic("neo4j", "secret"));
        assert_eq!(token.scheme(), "basic");
        assert_eq!(token.principal(), Some("neo4j"));
    }

    #[test]
    fn test_none_token() {
        let token = AuthToken::from_map(&map(&[("scheme", "none".into())])).unwrap();
        assert_eq!(token, AuthToken::None);
        assert_eq!(token.credentials(), None);
    }

    #[test]
    fn test_missing_scheme() {
        let err = AuthToken::from_map(&Map::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unsupported authentication token, missing key `scheme`"
        );
        assert!(!err.counts_toward_limit());
    }

    #[test]
    fn test_missing_credentials() {
        let err = AuthToken::from_map(&map(&[
            ("scheme", "basic".into()),
            ("principal", "neo4j".into()),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("missing key `credentials`"));
    }

    #[test]
    fn test_mistyped_principal() {
        let err = AuthToken::from_map(&map(&[
            ("scheme", "basic".into()),
            ("principal", PackStreamValue::Integer(1)),
            ("credentials", "secret".into()),
        ]))
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unsupported authentication token, the value associated with the key `principal` must be a String but was: Integer"
        );
    }

    #[test]
    fn test_custom_scheme_keeps_parameters() {
        let mut params = Map::new();
        params.insert("ttl".to_string(), PackStreamValue::Integer(5));
        let token = AuthToken::from_map(&map(&[
            ("scheme", "ldap".into()),
            ("principal", "alice".into()),
            ("credentials", "pw".into()),
            ("parameters", PackStreamValue::Map(params)),
        ]))
        .unwrap();
        assert_eq!(token.scheme(), "ldap");
        match token {
            AuthToken::Custom { parameters, .. } => assert!(parameters.contains_key("ttl")),
            other => panic!("unexpected token {:?}", other),
        }
    }

    #[test]
    fn test_debug_hides_credentials() {
        let debug = format!("{:?}", AuthToken::basic("neo4j", "hunter2"));
        assert!(debug.contains("neo4j"));
        assert!(!debug.contains("hunter2"));
    }
}

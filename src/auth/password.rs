//! Recognition of password-change statements.
//!
//! Two forms are understood:
//!
//! ```text
//! CALL dbms.security.changePassword(<new>)
//! ALTER CURRENT USER SET PASSWORD FROM <old> TO <new>
//! ```
//!
//! where each argument is a `$parameter` or a quoted string literal.

use std::collections::HashMap;

use super::PasswordError;
use crate::bolt::error::{BoltErrorCode, RequestError};
use crate::bolt::packstream::PackStreamValue;

/// A parsed password change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordChange {
    pub old: Option<String>,
    pub new: String,
}

impl PasswordChange {
    /// Returns `None` when `query` is not a password change.
    pub fn parse(
        query: &str,
        parameters: &HashMap<String, PackStreamValue>,
    ) -> Option<Result<Self, RequestError>> {
        let mut scanner = Scanner::new(query);
        if scanner.keyword("CALL") {
            if !scanner.keyword("dbms.security.changePassword") {
                return None;
            }
            Some(Self::parse_call(scanner, parameters))
        } else if scanner.keywords(&["ALTER", "CURRENT", "USER", "SET", "PASSWORD"]) {
            Some(Self::parse_alter(scanner, parameters))
        } else {
            None
        }
    }

    fn parse_call(
        mut scanner: Scanner<'_>,
        parameters: &HashMap<String, PackStreamValue>,
    ) -> Result<Self, RequestError> {
        scanner.punct('(')?;
        let new = scanner.argument(parameters)?;
        scanner.punct(')')?;
        scanner.end()?;
        Ok(Self { old: None, new })
    }

    fn parse_alter(
        mut scanner: Scanner<'_>,
        parameters: &HashMap<String, PackStreamValue>,
    ) -> Result<Self, RequestError> {
        if !scanner.keyword("FROM") {
            return Err(syntax("Expected FROM"));
        }
        let old = scanner.argument(parameters)?;
        if !scanner.keyword("TO") {
            return Err(syntax("Expected TO"));
        }
        let new = scanner.argument(parameters)?;
        scanner.end()?;
        Ok(Self {
            old: Some(old),
            new,
        })
    }

    /// Rules that hold regardless of the stored password.
    pub fn validate(&self) -> Result<(), PasswordError> {
        if self.new.is_empty() {
            return Err(PasswordError::Empty);
        }
        if self.old.as_deref() == Some(self.new.as_str()) {
            return Err(PasswordError::SameAsOld);
        }
        Ok(())
    }
}

fn syntax(message: &str) -> RequestError {
    RequestError::new(BoltErrorCode::SYNTAX_ERROR, message)
}

struct Scanner<'a> {
    rest: &'a str,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str) -> Self {
        Self { rest: input }
    }

    fn skip_whitespace(&mut self) {
        self.rest = self.rest.trim_start();
    }

    /// Consumes `word` case-insensitively if it is the next token.
    fn keyword(&mut self, word: &str) -> bool {
        self.skip_whitespace();
        let Some(head) = self.rest.get(..word.len()) else {
            return false;
        };
        let boundary = self.rest[word.len()..]
            .chars()
            .next()
            .map_or(true, |c| !(c.is_alphanumeric() || c == '_' || c == '.'));
        if head.eq_ignore_ascii_case(word) && boundary {
            self.rest = &self.rest[word.len()..];
            true
        } else {
            false
        }
    }

    fn keywords(&mut self, words: &[&str]) -> bool {
        let saved = self.rest;
        if words.iter().all(|w| self.keyword(w)) {
            true
        } else {
            self.rest = saved;
            false
        }
    }

    fn punct(&mut self, c: char) -> Result<(), RequestError> {
        self.skip_whitespace();
        match self.rest.strip_prefix(c) {
            Some(rest) => {
                self.rest = rest;
                Ok(())
            }
            None => Err(syntax(&format!("Expected '{}'", c))),
        }
    }

    fn end(&mut self) -> Result<(), RequestError> {
        self.skip_whitespace();
        let rest = self.rest.strip_prefix(';').unwrap_or(self.rest).trim();
        if rest.is_empty() {
            Ok(())
        } else {
            Err(syntax(&format!("Unexpected input '{}'", rest)))
        }
    }

    fn argument(&mut self, parameters: &HashMap<String, PackStreamValue>) -> Result<String, RequestError> {
        self.skip_whitespace();
        if let Some(rest) = self.rest.strip_prefix('$') {
            let len = rest
                .find(|c: char| !(c.is_alphanumeric() || c == '_'))
                .unwrap_or(rest.len());
            let name = &rest[..len];
            self.rest = &rest[len..];
            return match parameters.get(name) {
                Some(PackStreamValue::String(s)) => Ok(s.clone()),
                Some(other) => Err(RequestError::new(
                    BoltErrorCode::TYPE_ERROR,
                    format!("Expected parameter ${} to be a String but was: {}", name, other.type_name()),
                )),
                None => Err(RequestError::new(
                    BoltErrorCode::PARAMETER_MISSING,
                    format!("Expected parameter(s): {}", name),
                )),
            };
        }

        let quote = match self.rest.chars().next() {
            Some(q @ ('\'' | '"')) => q,
            _ => return Err(syntax("Expected a string literal or parameter")),
        };
        let mut value = String::new();
        let mut chars = self.rest[1..].char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => {
                    if let Some((_, escaped)) = chars.next() {
                        value.push(escaped);
                    }
                }
                c if c == quote => {
                    self.rest = &self.rest[1 + i + c.len_utf8()..];
                    return Ok(value);
                }
                c => value.push(c),
            }
        }
        Err(syntax("Unterminated string literal"))
    }
}

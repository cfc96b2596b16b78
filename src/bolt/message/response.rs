//! Bolt protocol response messages.
//!
//! Response messages are sent from the server to the client.

use std::collections::HashMap;

use super::tag;
use crate::bolt::packstream::{PackStreamError, PackStreamStructure, PackStreamValue};

/// All Bolt response messages.
#[derive(Debug, Clone, PartialEq)]
pub enum BoltResponse {
    Success(SuccessMessage),
    Record(RecordMessage),
    Failure(FailureMessage),
    /// Request skipped because the connection awaits RESET
    Ignored,
}

impl BoltResponse {
    pub fn tag(&self) -> u8 {
        match self {
            BoltResponse::Success(_) => tag::SUCCESS,
            BoltResponse::Record(_) => tag::RECORD,
            BoltResponse::Failure(_) => tag::FAILURE,
            BoltResponse::Ignored => tag::IGNORED,
        }
    }

    /// Message name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            BoltResponse::Success(_) => "SUCCESS",
            BoltResponse::Record(_) => "RECORD",
            BoltResponse::Failure(_) => "FAILURE",
            BoltResponse::Ignored => "IGNORED",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BoltResponse::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, BoltResponse::Failure(_))
    }

    pub fn is_record(&self) -> bool {
        matches!(self, BoltResponse::Record(_))
    }

    /// Whether this response ends the exchange for one request.
    pub fn is_summary(&self) -> bool {
        !self.is_record()
    }

    pub fn to_structure(&self) -> PackStreamStructure {
        match self {
            BoltResponse::Success(msg) => msg.to_structure(),
            BoltResponse::Record(msg) => msg.to_structure(),
            BoltResponse::Failure(msg) => msg.to_structure(),
            BoltResponse::Ignored => PackStreamStructure::new(tag::IGNORED, vec![]),
        }
    }

    /// Parses a response; used by clients and test harnesses.
    pub fn from_structure(s: &PackStreamStructure) -> Result<Self, PackStreamError> {
        match s.tag {
            tag::SUCCESS => Ok(BoltResponse::Success(SuccessMessage::from_structure(s)?)),
            tag::RECORD => Ok(BoltResponse::Record(RecordMessage::from_structure(s)?)),
            tag::FAILURE => Ok(BoltResponse::Failure(FailureMessage::from_structure(s)?)),
            tag::IGNORED => Ok(BoltResponse::Ignored),
            _ => Err(PackStreamError::InvalidStructure(format!(
                "Unknown response message tag: 0x{:02X}",
                s.tag
            ))),
        }
    }
}

impl From<SuccessMessage> for BoltResponse {
    fn from(msg: SuccessMessage) -> Self {
        BoltResponse::Success(msg)
    }
}

impl From<FailureMessage> for BoltResponse {
    fn from(msg: FailureMessage) -> Self {
        BoltResponse::Failure(msg)
    }
}

/// SUCCESS message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SuccessMessage {
    pub metadata: HashMap<String, PackStreamValue>,
}

impl SuccessMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metadata(metadata: HashMap<String, PackStreamValue>) -> Self {
        Self { metadata }
    }

    pub fn add(&mut self, key: &str, value: impl Into<PackStreamValue>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    /// Builder form of [`add`](Self::add).
    pub fn with(mut self, key: &str, value: impl Into<PackStreamValue>) -> Self {
        self.add(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&PackStreamValue> {
        self.metadata.get(key)
    }

    pub fn has_more(&self) -> bool {
        self.metadata
            .get("has_more")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn bookmark(&self) -> Option<&str> {
        self.metadata.get("bookmark").and_then(|v| v.as_str())
    }

    pub fn qid(&self) -> Option<i64> {
        self.metadata.get("qid").and_then(|v| v.as_int())
    }

    pub fn fields(&self) -> Option<Vec<String>> {
        self.metadata.get("fields").and_then(|v| v.as_list()).map(|list| {
            list.iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
    }

    pub fn hello_success(server: &str, connection_id: &str) -> Self {
        Self::new()
            .with("server", server)
            .with("connection_id", connection_id)
    }

    pub fn run_success(fields: &[String], t_first: i64, qid: Option<i64>) -> Self {
        let mut msg = Self::new()
            .with("fields", PackStreamValue::string_list(fields))
            .with("t_first", t_first);
        if let Some(id) = qid {
            msg.add("qid", id);
        }
        msg
    }

    pub fn to_structure(&self) -> PackStreamStructure {
        PackStreamStructure::new(tag::SUCCESS, vec![PackStreamValue::Map(self.metadata.clone())])
    }

    pub fn from_structure(s: &PackStreamStructure) -> Result<Self, PackStreamError> {
        let metadata = s
            .field(0)
            .and_then(|v| v.as_map())
            .cloned()
            .unwrap_or_default();
        Ok(Self { metadata })
    }
}

/// RECORD message.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordMessage {
    pub fields: Vec<PackStreamValue>,
}

impl RecordMessage {
    pub fn new(fields: Vec<PackStreamValue>) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PackStreamValue> {
        self.fields.get(index)
    }

    pub fn to_structure(&self) -> PackStreamStructure {
        PackStreamStructure::new(tag::RECORD, vec![PackStreamValue::List(self.fields.clone())])
    }

    pub fn from_structure(s: &PackStreamStructure) -> Result<Self, PackStreamError> {
        match s.field(0) {
            Some(PackStreamValue::List(list)) => Ok(Self::new(list.clone())),
            _ => Err(PackStreamError::InvalidStructure(
                "RECORD fields must be a list".to_string(),
            )),
        }
    }
}

/// FAILURE message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureMessage {
    /// Status code, e.g. `Neo.ClientError.Security.Unauthorized`
    pub code: String,
    pub message: String,
}

impl FailureMessage {
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    /// Classification segment: `ClientError`, `TransientError` or
    /// `DatabaseError`.
    pub fn classification(&self) -> &str {
        self.code.split('.').nth(1).unwrap_or("Unknown")
    }

    pub fn is_client_error(&self) -> bool {
        self.classification() == "ClientError"
    }

    pub fn is_transient(&self) -> bool {
        self.classification() == "TransientError"
    }

    pub fn to_structure(&self) -> PackStreamStructure {
        let mut metadata = HashMap::new();
        metadata.insert("code".to_string(), PackStreamValue::String(self.code.clone()));
        metadata.insert("message".to_string(), PackStreamValue::String(self.message.clone()));
        PackStreamStructure::new(tag::FAILURE, vec![PackStreamValue::Map(metadata)])
    }

    pub fn from_structure(s: &PackStreamStructure) -> Result<Self, PackStreamError> {
        let metadata = s.field(0).and_then(|v| v.as_map()).ok_or_else(|| {
            PackStreamError::InvalidStructure("FAILURE requires metadata map".to_string())
        })?;
        let text = |key: &str| {
            metadata
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
                .ok_or_else(|| PackStreamError::InvalidStructure(format!("FAILURE requires {}", key)))
        };
        Ok(Self {
            code: text("code")?,
            message: text("message")?,
        })
    }
}

impl std::fmt::Display for FailureMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_hello() {
        let msg = SuccessMessage::hello_success("Zeta4G/1.0", "bolt-1");
        assert_eq!(msg.get("server").unwrap().as_str(), Some("Zeta4G/1.0"));
        assert_eq!(msg.get("connection_id").unwrap().as_str(), Some("bolt-1"));
    }

    #[test]
    fn test_success_run() {
        let msg = SuccessMessage::run_success(&["name".to_string(), "age".to_string()], 3, Some(0));
        assert_eq!(msg.fields().unwrap(), vec!["name", "age"]);
        assert_eq!(msg.qid(), Some(0));
        assert_eq!(msg.get("t_first").unwrap().as_int(), Some(3));
    }

    #[test]
    fn test_success_structure() {
        let msg = SuccessMessage::new().with("has_more", true);
        let structure = msg.to_structure();
        assert_eq!(structure.tag, tag::SUCCESS);
        assert!(SuccessMessage::from_structure(&structure).unwrap().has_more());
    }

    #[test]
    fn test_record_requires_list() {
        let bad = PackStreamStructure::new(tag::RECORD, vec![PackStreamValue::Integer(1)]);
        assert!(RecordMessage::from_structure(&bad).is_err());
    }

    #[test]
    fn test_failure_message() {
        let msg = FailureMessage::new("Neo.ClientError.Statement.SyntaxError", "Invalid query");
        assert!(msg.is_client_error());
        assert!(!msg.is_transient());

        let parsed = FailureMessage::from_structure(&msg.to_structure()).unwrap();
        assert_eq!(parsed, msg);
        assert_eq!(
            parsed.to_string(),
            "Neo.ClientError.Statement.SyntaxError: Invalid query"
        );
    }

    #[test]
    fn test_transient_classification() {
        let msg = FailureMessage::new("Neo.TransientError.Transaction.Terminated", "");
        assert!(msg.is_transient());
    }

    #[test]
    fn test_bolt_response_tags_and_names() {
        assert_eq!(BoltResponse::Ignored.tag(), tag::IGNORED);
        assert_eq!(BoltResponse::Ignored.name(), "IGNORED");
        let record = BoltResponse::Record(RecordMessage::new(vec![]));
        assert!(record.is_record());
        assert!(!record.is_summary());
        assert!(BoltResponse::from(SuccessMessage::new()).is_summary());
    }
}

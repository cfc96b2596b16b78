//! Bolt protocol request messages.
//!
//! Request messages are sent from the client to the server. Parsing checks
//! field counts and types and hydrates RUN parameters through the
//! connection's [`StructProfile`].

use std::collections::HashMap;
use std::time::Duration;

use super::tag;
use crate::bolt::error::{BoltError, RequestError};
use crate::bolt::packstream::{PackStreamStructure, PackStreamValue, StructProfile};

type Map = HashMap<String, PackStreamValue>;

/// Access mode for transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    #[default]
    Write,
    Read,
}

impl AccessMode {
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "r" => Some(AccessMode::Read),
            "w" => Some(AccessMode::Write),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::Read => "r",
            AccessMode::Write => "w",
        }
    }
}

/// All Bolt request messages.
#[derive(Debug, Clone, PartialEq)]
pub enum BoltRequest {
    Hello(HelloMessage),
    Goodbye,
    Reset,
    Run(RunMessage),
    Pull(PullMessage),
    Discard(DiscardMessage),
    Begin(BeginMessage),
    Commit,
    Rollback,
    /// Bolt 4.3+
    Route(RouteMessage),
    /// Bolt 5.1+
    Logon(LogonMessage),
    /// Bolt 5.1+
    Logoff,
}

impl BoltRequest {
    pub fn tag(&self) -> u8 {
        match self {
            BoltRequest::Hello(_) => tag::HELLO,
            BoltRequest::Goodbye => tag::GOODBYE,
            BoltRequest::Reset => tag::RESET,
            BoltRequest::Run(_) => tag::RUN,
            BoltRequest::Pull(_) => tag::PULL,
            BoltRequest::Discard(_) => tag::DISCARD,
            BoltRequest::Begin(_) => tag::BEGIN,
            BoltRequest::Commit => tag::COMMIT,
            BoltRequest::Rollback => tag::ROLLBACK,
            BoltRequest::Route(_) => tag::ROUTE,
            BoltRequest::Logon(_) => tag::LOGON,
            BoltRequest::Logoff => tag::LOGOFF,
        }
    }

    /// Message name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            BoltRequest::Hello(_) => "HELLO",
            BoltRequest::Goodbye => "GOODBYE",
            BoltRequest::Reset => "RESET",
            BoltRequest::Run(_) => "RUN",
            BoltRequest::Pull(_) => "PULL",
            BoltRequest::Discard(_) => "DISCARD",
            BoltRequest::Begin(_) => "BEGIN",
            BoltRequest::Commit => "COMMIT",
            BoltRequest::Rollback => "ROLLBACK",
            BoltRequest::Route(_) => "ROUTE",
            BoltRequest::Logon(_) => "LOGON",
            BoltRequest::Logoff => "LOGOFF",
        }
    }

    /// Parses a request for the connection described by `profile`.
    ///
    /// Tags that are unknown or not part of the negotiated version yield
    /// [`BoltError::UnknownMessage`]; bad field types yield a recoverable
    /// [`BoltError::Request`].
    pub fn from_structure(
        s: PackStreamStructure,
        profile: &StructProfile,
    ) -> Result<Self, BoltError> {
        let version = profile.version();
        let name = match s.tag {
            tag::HELLO => "HELLO",
            tag::GOODBYE => "GOODBYE",
            tag::RESET => "RESET",
            tag::RUN => "RUN",
            tag::PULL => "PULL",
            tag::DISCARD => "DISCARD",
            tag::BEGIN => "BEGIN",
            tag::COMMIT => "COMMIT",
            tag::ROLLBACK => "ROLLBACK",
            tag::ROUTE if version.supports_route() => "ROUTE",
            tag::LOGON if version.supports_logon() => "LOGON",
            tag::LOGOFF if version.supports_logon() => "LOGOFF",
            other => return Err(BoltError::UnknownMessage(other)),
        };
        let mut fields = Fields::new(name, s.fields);

        let request = match s.tag {
            tag::HELLO => {
                let extra = fields.map()?;
                BoltRequest::Hello(HelloMessage::from_extra(extra, version.supports_logon())?)
            }
            tag::GOODBYE => BoltRequest::Goodbye,
            tag::RESET => BoltRequest::Reset,
            tag::RUN => {
                let query = fields.string()?;
                let parameters = match profile.hydrate(PackStreamValue::Map(fields.map()?))? {
                    PackStreamValue::Map(m) => m,
                    _ => Map::new(),
                };
                let extra = fields.optional_map()?;
                BoltRequest::Run(RunMessage {
                    query,
                    parameters,
                    options: TxOptions::from_extra(&extra)?,
                })
            }
            tag::PULL => {
                let (n, qid) = stream_limits("PULL", &fields.map()?)?;
                BoltRequest::Pull(PullMessage { n, qid })
            }
            tag::DISCARD => {
                let (n, qid) = stream_limits("DISCARD", &fields.map()?)?;
                BoltRequest::Discard(DiscardMessage { n, qid })
            }
            tag::BEGIN => {
                let extra = fields.optional_map()?;
                BoltRequest::Begin(BeginMessage {
                    options: TxOptions::from_extra(&extra)?,
                })
            }
            tag::COMMIT => BoltRequest::Commit,
            tag::ROLLBACK => BoltRequest::Rollback,
            tag::ROUTE => {
                let routing = fields.map()?;
                let bookmarks = string_list("bookmarks", fields.next_or_null())?;
                let (database, imp_user) = if version.route_has_extra_map() {
                    let extra = fields.optional_map()?;
                    (opt_string(&extra, "db")?, opt_string(&extra, "imp_user")?)
                } else {
                    (fields.optional_string()?, None)
                };
                BoltRequest::Route(RouteMessage {
                    routing,
                    bookmarks,
                    database,
                    imp_user,
                })
            }
            tag::LOGON => BoltRequest::Logon(LogonMessage { auth: fields.map()? }),
            _ => BoltRequest::Logoff,
        };
        Ok(request)
    }
}

/// Sequential access to the fields of one message.
struct Fields {
    message: &'static str,
    fields: std::vec::IntoIter<PackStreamValue>,
}

impl Fields {
    fn new(message: &'static str, fields: Vec<PackStreamValue>) -> Self {
        Self {
            message,
            fields: fields.into_iter(),
        }
    }

    fn next_or_null(&mut self) -> PackStreamValue {
        self.fields.next().unwrap_or(PackStreamValue::Null)
    }

    fn map(&mut self) -> Result<Map, RequestError> {
        match self.fields.next() {
            Some(PackStreamValue::Map(m)) => Ok(m),
            Some(other) => Err(RequestError::invalid(format!(
                "{} expected a Map field, found {}",
                self.message,
                other.type_name()
            ))),
            None => Err(RequestError::invalid(format!(
                "{} is missing a required field",
                self.message
            ))),
        }
    }

    fn optional_map(&mut self) -> Result<Map, RequestError> {
        match self.next_or_null() {
            PackStreamValue::Null => Ok(Map::new()),
            PackStreamValue::Map(m) => Ok(m),
            other => Err(RequestError::invalid(format!(
                "{} expected a Map field, found {}",
                self.message,
                other.type_name()
            ))),
        }
    }

    fn string(&mut self) -> Result<String, RequestError> {
        match self.fields.next() {
            Some(PackStreamValue::String(s)) => Ok(s),
            Some(other) => Err(RequestError::invalid(format!(
                "{} expected a String field, found {}",
                self.message,
                other.type_name()
            ))),
            None => Err(RequestError::invalid(format!(
                "{} is missing a required field",
                self.message
            ))),
        }
    }

    fn optional_string(&mut self) -> Result<Option<String>, RequestError> {
        match self.next_or_null() {
            PackStreamValue::Null => Ok(None),
            PackStreamValue::String(s) => Ok(Some(s)),
            other => Err(RequestError::invalid(format!(
                "{} expected a String field, found {}",
                self.message,
                other.type_name()
            ))),
        }
    }
}

fn opt_string(map: &Map, key: &str) -> Result<Option<String>, RequestError> {
    match map.get(key) {
        None | Some(PackStreamValue::Null) => Ok(None),
        Some(PackStreamValue::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(RequestError::invalid(format!(
            "Expecting `{}` to be a String, but got: {}",
            key,
            other.type_name()
        ))),
    }
}

fn opt_int(map: &Map, key: &str) -> Result<Option<i64>, RequestError> {
    match map.get(key) {
        None | Some(PackStreamValue::Null) => Ok(None),
        Some(PackStreamValue::Integer(i)) => Ok(Some(*i)),
        Some(other) => Err(RequestError::invalid(format!(
            "Expecting `{}` to be an Integer, but got: {}",
            key,
            other.type_name()
        ))),
    }
}

fn string_list(key: &str, value: PackStreamValue) -> Result<Vec<String>, RequestError> {
    match value {
        PackStreamValue::Null => Ok(Vec::new()),
        PackStreamValue::List(items) => items
            .into_iter()
            .map(|item| match item {
                PackStreamValue::String(s) => Ok(s),
                other => Err(RequestError::invalid(format!(
                    "Expecting `{}` to contain only Strings, but got: {}",
                    key,
                    other.type_name()
                ))),
            })
            .collect(),
        other => Err(RequestError::invalid(format!(
            "Expecting `{}` to be a List, but got: {}",
            key,
            other.type_name()
        ))),
    }
}

/// Reads `n` and `qid` from a PULL or DISCARD extra map.
fn stream_limits(message: &str, extra: &Map) -> Result<(i64, i64), RequestError> {
    let n = opt_int(extra, "n")?.ok_or_else(|| {
        RequestError::invalid(format!("{} is missing the required `n` field", message))
    })?;
    if n != -1 && n < 1 {
        return Err(RequestError::invalid_argument(format!(
            "Expecting {} size `n` to be at least 1 or -1, but got: {}",
            message, n
        )));
    }
    let qid = opt_int(extra, "qid")?.unwrap_or(-1);
    Ok((n, qid))
}

/// Transaction options shared by RUN (auto-commit) and BEGIN.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TxOptions {
    pub bookmarks: Vec<String>,
    pub tx_timeout: Option<Duration>,
    pub mode: AccessMode,
    pub database: Option<String>,
    pub tx_metadata: Map,
    pub imp_user: Option<String>,
}

impl TxOptions {
    pub fn from_extra(extra: &Map) -> Result<Self, RequestError> {
        let bookmarks = string_list(
            "bookmarks",
            extra.get("bookmarks").cloned().unwrap_or(PackStreamValue::Null),
        )?;
        let tx_timeout = match opt_int(extra, "tx_timeout")? {
            Some(ms) if ms < 0 => {
                return Err(RequestError::invalid_argument(format!(
                    "Transaction timeout must not be negative, but got: {}",
                    ms
                )))
            }
            Some(ms) => Some(Duration::from_millis(ms as u64)),
            None => None,
        };
        let mode = match opt_string(extra, "mode")? {
            None => AccessMode::Write,
            Some(m) => AccessMode::from_wire(&m).ok_or_else(|| {
                RequestError::invalid_argument(format!("Unknown access mode `{}`", m))
            })?,
        };
        let tx_metadata = match extra.get("tx_metadata") {
            None | Some(PackStreamValue::Null) => Map::new(),
            Some(PackStreamValue::Map(m)) => m.clone(),
            Some(other) => {
                return Err(RequestError::invalid(format!(
                    "Expecting `tx_metadata` to be a Map, but got: {}",
                    other.type_name()
                )))
            }
        };
        Ok(Self {
            bookmarks,
            tx_timeout,
            mode,
            database: opt_string(extra, "db")?,
            tx_metadata,
            imp_user: opt_string(extra, "imp_user")?,
        })
    }
}

/// Keys of a HELLO extra map that belong to the auth token on Bolt < 5.1.
const AUTH_KEYS: [&str; 5] = ["scheme", "principal", "credentials", "realm", "parameters"];

/// HELLO message.
#[derive(Debug, Clone, PartialEq)]
pub struct HelloMessage {
    pub user_agent: String,
    /// Raw auth token fields; `None` on Bolt 5.1+ where LOGON carries them
    pub auth: Option<Map>,
    pub routing: Option<Map>,
    pub patch_bolt: Vec<String>,
    /// Remaining entries, kept for logging
    pub extra: Map,
}

impl HelloMessage {
    fn from_extra(mut extra: Map, logon_separate: bool) -> Result<Self, RequestError> {
        let user_agent = match extra.remove("user_agent") {
            Some(PackStreamValue::String(s)) if !s.is_empty() => s,
            _ => {
                return Err(RequestError::invalid(
                    "Expected \"user_agent\" to be a non-empty string",
                ))
            }
        };
        let routing = match extra.remove("routing") {
            None | Some(PackStreamValue::Null) => None,
            Some(PackStreamValue::Map(m)) => Some(m),
            Some(other) => {
                return Err(RequestError::invalid(format!(
                    "Expecting `routing` to be a Map, but got: {}",
                    other.type_name()
                )))
            }
        };
        let patch_bolt = string_list(
            "patch_bolt",
            extra.remove("patch_bolt").unwrap_or(PackStreamValue::Null),
        )?;
        let auth = if logon_separate {
            None
        } else {
            let auth: Map = AUTH_KEYS
                .iter()
                .filter_map(|key| extra.remove(*key).map(|v| (key.to_string(), v)))
                .collect();
            Some(auth)
        };
        Ok(Self {
            user_agent,
            auth,
            routing,
            patch_bolt,
            extra,
        })
    }
}

/// LOGON message (Bolt 5.1+).
#[derive(Debug, Clone, PartialEq)]
pub struct LogonMessage {
    pub auth: Map,
}

/// RUN message.
#[derive(Debug, Clone, PartialEq)]
pub struct RunMessage {
    pub query: String,
    pub parameters: Map,
    /// Only meaningful outside an explicit transaction
    pub options: TxOptions,
}

/// PULL message. `n == -1` pulls everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullMessage {
    pub n: i64,
    /// `-1` addresses the most recent result
    pub qid: i64,
}

/// DISCARD message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscardMessage {
    pub n: i64,
    pub qid: i64,
}

/// BEGIN message.
#[derive(Debug, Clone, PartialEq)]
pub struct BeginMessage {
    pub options: TxOptions,
}

/// ROUTE message (Bolt 4.3+).
#[derive(Debug, Clone, PartialEq)]
pub struct RouteMessage {
    pub routing: Map,
    pub bookmarks: Vec<String>,
    pub database: Option<String>,
    pub imp_user: Option<String>,
}

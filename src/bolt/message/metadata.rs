//! Metadata structures attached to SUCCESS messages.

use std::collections::HashMap;

use crate::bolt::packstream::PackStreamValue;

/// Update counters reported after a statement completes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryStats {
    pub nodes_created: i64,
    pub nodes_deleted: i64,
    pub relationships_created: i64,
    pub relationships_deleted: i64,
    pub properties_set: i64,
    pub labels_added: i64,
    pub labels_removed: i64,
    pub indexes_added: i64,
    pub indexes_removed: i64,
    pub constraints_added: i64,
    pub constraints_removed: i64,
    pub system_updates: i64,
}

impl QueryStats {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self) -> [(&'static str, i64); 11] {
        [
            ("nodes-created", self.nodes_created),
            ("nodes-deleted", self.nodes_deleted),
            ("relationships-created", self.relationships_created),
            ("relationships-deleted", self.relationships_deleted),
            ("properties-set", self.properties_set),
            ("labels-added", self.labels_added),
            ("labels-removed", self.labels_removed),
            ("indexes-added", self.indexes_added),
            ("indexes-removed", self.indexes_removed),
            ("constraints-added", self.constraints_added),
            ("constraints-removed", self.constraints_removed),
        ]
    }

    pub fn contains_updates(&self) -> bool {
        self.counters().iter().any(|(_, n)| *n > 0)
    }

    pub fn contains_system_updates(&self) -> bool {
        self.system_updates > 0
    }

    /// Whether anything is worth reporting at all.
    pub fn has_updates(&self) -> bool {
        self.contains_updates() || self.contains_system_updates()
    }

    /// Non-zero counters plus the `contains-*` flags.
    pub fn to_map(&self) -> HashMap<String, PackStreamValue> {
        let mut map: HashMap<String, PackStreamValue> = self
            .counters()
            .iter()
            .filter(|(_, n)| *n > 0)
            .map(|(key, n)| (key.to_string(), PackStreamValue::Integer(*n)))
            .collect();
        if self.contains_updates() {
            map.insert("contains-updates".to_string(), PackStreamValue::Boolean(true));
        }
        if self.contains_system_updates() {
            map.insert("system-updates".to_string(), PackStreamValue::Integer(self.system_updates));
            map.insert(
                "contains-system-updates".to_string(),
                PackStreamValue::Boolean(true),
            );
        }
        map
    }
}

/// Statement type reported as `type` in the final SUCCESS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryType {
    #[default]
    Read,
    Write,
    ReadWrite,
    Schema,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::Read => "r",
            QueryType::Write => "w",
            QueryType::ReadWrite => "rw",
            QueryType::Schema => "s",
        }
    }
}

/// Execution plan returned for EXPLAIN, with runtime counters for PROFILE.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub operator_type: String,
    pub args: HashMap<String, PackStreamValue>,
    pub identifiers: Vec<String>,
    pub children: Vec<QueryPlan>,
    pub profile: Option<ProfileCounters>,
}

/// Per-operator counters gathered by PROFILE.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfileCounters {
    pub db_hits: i64,
    pub rows: i64,
    pub page_cache_hits: i64,
    pub page_cache_misses: i64,
    pub time: i64,
}

impl QueryPlan {
    pub fn new(operator_type: &str) -> Self {
        Self {
            operator_type: operator_type.to_string(),
            args: HashMap::new(),
            identifiers: Vec::new(),
            children: Vec::new(),
            profile: None,
        }
    }

    pub fn with_arg(mut self, key: &str, value: PackStreamValue) -> Self {
        self.args.insert(key.to_string(), value);
        self
    }

    pub fn with_identifiers(mut self, ids: Vec<String>) -> Self {
        self.identifiers = ids;
        self
    }

    pub fn with_child(mut self, child: QueryPlan) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_profile(mut self, counters: ProfileCounters) -> Self {
        self.profile = Some(counters);
        self
    }

    /// Metadata key the plan is reported under.
    pub fn metadata_key(&self) -> &'static str {
        if self.profile.is_some() {
            "profile"
        } else {
            "plan"
        }
    }

    pub fn to_map(&self) -> HashMap<String, PackStreamValue> {
        let mut map = HashMap::new();
        map.insert(
            "operatorType".to_string(),
            PackStreamValue::String(self.operator_type.clone()),
        );
        map.insert("args".to_string(), PackStreamValue::Map(self.args.clone()));
        map.insert(
            "identifiers".to_string(),
            PackStreamValue::string_list(&self.identifiers),
        );
        map.insert(
            "children".to_string(),
            PackStreamValue::List(
                self.children
                    .iter()
                    .map(|c| PackStreamValue::Map(c.to_map()))
                    .collect(),
            ),
        );
        if let Some(p) = &self.profile {
            map.insert("dbHits".to_string(), PackStreamValue::Integer(p.db_hits));
            map.insert("rows".to_string(), PackStreamValue::Integer(p.rows));
            map.insert("pageCacheHits".to_string(), PackStreamValue::Integer(p.page_cache_hits));
            map.insert(
                "pageCacheMisses".to_string(),
                PackStreamValue::Integer(p.page_cache_misses),
            );
            map.insert("time".to_string(), PackStreamValue::Integer(p.time));
        }
        map
    }
}

/// Notification severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationSeverity {
    Warning,
    Information,
}

impl NotificationSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationSeverity::Warning => "WARNING",
            NotificationSeverity::Information => "INFORMATION",
        }
    }
}

/// Position in the statement text (1-based line and column).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationPosition {
    pub line: i64,
    pub column: i64,
    pub offset: i64,
}

/// Notification attached to the final SUCCESS of a statement.
#[derive(Debug, Clone)]
pub struct Notification {
    pub code: String,
    pub title: String,
    pub description: String,
    pub severity: NotificationSeverity,
    pub position: Option<NotificationPosition>,
}

impl Notification {
    pub fn new(code: &str, title: &str, description: &str, severity: NotificationSeverity) -> Self {
        Self {
            code: code.to_string(),
            title: title.to_string(),
            description: description.to_string(),
            severity,
            position: None,
        }
    }

    pub fn with_position(mut self, line: i64, column: i64, offset: i64) -> Self {
        self.position = Some(NotificationPosition { line, column, offset });
        self
    }

    pub fn to_map(&self) -> HashMap<String, PackStreamValue> {
        let mut map = HashMap::new();
        map.insert("code".to_string(), PackStreamValue::String(self.code.clone()));
        map.insert("title".to_string(), PackStreamValue::String(self.title.clone()));
        map.insert(
            "description".to_string(),
            PackStreamValue::String(self.description.clone()),
        );
        map.insert("severity".to_string(), PackStreamValue::from(self.severity.as_str()));

        if let Some(pos) = &self.position {
            let mut pos_map = HashMap::new();
            pos_map.insert("line".to_string(), PackStreamValue::Integer(pos.line));
            pos_map.insert("column".to_string(), PackStreamValue::Integer(pos.column));
            pos_map.insert("offset".to_string(), PackStreamValue::Integer(pos.offset));
            map.insert("position".to_string(), PackStreamValue::Map(pos_map));
        }
        map
    }
}

/// Server role in a routing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerRole {
    Read,
    Write,
    Route,
}

impl ServerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerRole::Read => "READ",
            ServerRole::Write => "WRITE",
            ServerRole::Route => "ROUTE",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoutingServer {
    pub addresses: Vec<String>,
    pub role: ServerRole,
}

/// Routing table returned under `rt` in the ROUTE SUCCESS. The server does
/// not interpret it.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    /// Time to live in seconds
    pub ttl: i64,
    pub db: String,
    pub servers: Vec<RoutingServer>,
}

impl RoutingTable {
    pub fn new(db: &str, ttl: i64) -> Self {
        Self {
            ttl,
            db: db.to_string(),
            servers: Vec::new(),
        }
    }

    pub fn add_server(&mut self, role: ServerRole, addresses: Vec<String>) {
        self.servers.push(RoutingServer { addresses, role });
    }

    pub fn to_map(&self) -> HashMap<String, PackStreamValue> {
        let mut map = HashMap::new();
        map.insert("ttl".to_string(), PackStreamValue::Integer(self.ttl));
        map.insert("db".to_string(), PackStreamValue::String(self.db.clone()));

        let servers = self
            .servers
            .iter()
            .map(|s| {
                let mut server_map = HashMap::new();
                server_map.insert(
                    "addresses".to_string(),
                    PackStreamValue::string_list(&s.addresses),
                );
                server_map.insert("role".to_string(), PackStreamValue::from(s.role.as_str()));
                PackStreamValue::Map(server_map)
            })
            .collect();
        map.insert("servers".to_string(), PackStreamValue::List(servers));
        map
    }
}

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustls::pki_types::CertificateDer;

use super::Transport;
use crate::bolt::handshake::BoltVersion;

/// What the server knows about one live connection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: String,
    pub peer: SocketAddr,
    pub transport: Transport,
    pub version: Option<BoltVersion>,
    pub user_agent: Option<String>,
    pub principal: Option<String>,
    pub connected_at: DateTime<Utc>,
    /// Client certificates presented during the TLS handshake
    pub peer_certificates: Vec<CertificateDer<'static>>,
}

/// Live connections, keyed by connection id.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    next_id: AtomicU64,
    connections: RwLock<HashMap<String, ConnectionInfo>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a `bolt-N` id; ids are never reused within a process.
    pub fn next_id(&self) -> String {
        format!("bolt-{}", self.next_id.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub fn insert(&self, info: ConnectionInfo) {
        self.connections.write().insert(info.id.clone(), info);
    }

    pub fn update(&self, id: &str, f: impl FnOnce(&mut ConnectionInfo)) {
        if let Some(info) = self.connections.write().get_mut(id) {
            f(info);
        }
    }

    pub fn remove(&self, id: &str) -> Option<ConnectionInfo> {
        self.connections.write().remove(id)
    }

    pub fn get(&self, id: &str) -> Option<ConnectionInfo> {
        self.connections.read().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Copy of every live connection, ordered by connection time.
    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        let mut all: Vec<_> = self.connections.read().values().cloned().collect();
        all.sort_by(|a, b| a.connected_at.cmp(&b.connected_at).then(a.id.cmp(&b.id)));
        all
    }
}

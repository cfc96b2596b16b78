//! # Zeta4G Bolt Server
//!
//! The server side of the [Bolt](https://neo4j.com/docs/bolt/current/)
//! protocol for [Zeta4G](https://github.com/zeta9044/zeta4g): transport
//! detection, handshake, chunked PackStream messages and the per-connection
//! session state machine. Query execution is delegated to an embedding
//! engine through the [`dispatch`] traits.
//!
//! ## Features
//!
//! - **Bolt 4.0 - 5.1** - version negotiation, the `utc` patch and LOGON/LOGOFF
//! - **Transports** - plain TCP, TLS and WebSocket on the same port
//! - **Sessions** - auto-commit and explicit transactions, multiple open
//!   results per transaction, out-of-band RESET
//! - **Authentication** - pluggable authenticators, rate limiting of failed
//!   attempts, password changes
//! - **Flow control** - inbound queue watermarks, write throttling,
//!   keep-alive NOOPs and limits on unauthenticated connections
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//! use zeta4g_bolt::{BoltConfig, BoltServer, InMemoryAuthenticator};
//! # use zeta4g_bolt::dispatch::GraphDatabase;
//!
//! # async fn example(database: Arc<dyn GraphDatabase>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = BoltConfig::builder()
//!     .with_listen_address("127.0.0.1:7687")
//!     .with_unauth_limits(Duration::from_secs(10), 1024 * 1024)
//!     .build()?;
//!
//! let authenticator = InMemoryAuthenticator::new().with_user("neo4j", "secret");
//! let server = BoltServer::new(config, Arc::new(authenticator), database);
//!
//! let shutdown = CancellationToken::new();
//! let listener = server.bind().await?;
//! server.serve(listener, shutdown).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`bolt`] - wire protocol: handshake, framing, PackStream, messages
//! - [`session`] - connection state machine
//! - [`dispatch`] - query engine traits and request dispatch
//! - [`auth`] - auth tokens, authenticators, rate limiting
//! - [`flow`] - backpressure, throttling and keep-alive
//! - [`server`] - listener, transports and the connection registry
//! - [`config`] - server configuration

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod auth;
pub mod bolt;
pub mod config;
pub mod dispatch;
pub mod flow;
pub mod server;
pub mod session;

// Re-exports for convenience
pub use auth::{AuthError, AuthToken, Authenticator, InMemoryAuthenticator};
pub use bolt::{BoltError, BoltVersion, PackStreamValue};
pub use config::{BoltConfig, BoltConfigBuilder, ConfigError, EncryptionLevel};
pub use dispatch::{BoltTransaction, ExecutionError, GraphDatabase, ResultCursor};
pub use server::{BoltServer, ConnectionInfo, MetricsSnapshot, Transport};
pub use session::{Session, SessionState};

//! # Bolt server
//!
//! Accepts TCP connections, detects their transport and runs one session
//! per connection.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use zeta4g_bolt::auth::InMemoryAuthenticator;
//! use zeta4g_bolt::config::BoltConfig;
//! use zeta4g_bolt::dispatch::GraphDatabase;
//! use zeta4g_bolt::server::BoltServer;
//!
//! # async fn example(database: Arc<dyn GraphDatabase>) -> std::io::Result<()> {
//! let authenticator = InMemoryAuthenticator::new().with_user("neo4j", "secret");
//! let server = BoltServer::new(BoltConfig::default(), Arc::new(authenticator), database);
//!
//! let listener = server.bind().await?;
//! server.serve(listener, CancellationToken::new()).await
//! # }
//! ```

mod connection;
mod metrics;
mod registry;
mod transport;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use metrics::{MetricsSnapshot, ServerMetrics};
pub use registry::{ConnectionInfo, ConnectionRegistry};
pub use transport::{BoxedIo, Io, Negotiated, PrefixedStream, Transport, TransportError};

use crate::auth::Authenticator;
use crate::bolt::handshake::Handshake;
use crate::config::BoltConfig;
use crate::dispatch::GraphDatabase;
use crate::flow::KeepAliveScheduler;
use crate::session::{SessionContext, SessionState};

/// State shared by all connections of a server.
pub(crate) struct Shared {
    context: Arc<SessionContext>,
    keep_alive: Arc<KeepAliveScheduler>,
    handshake: Handshake,
    tls: Option<TlsAcceptor>,
}

/// Bolt listener. Cloning is cheap and shares all state.
#[derive(Clone)]
pub struct BoltServer {
    shared: Arc<Shared>,
}

impl BoltServer {
    pub fn new(
        config: BoltConfig,
        authenticator: Arc<dyn Authenticator>,
        database: Arc<dyn GraphDatabase>,
    ) -> Self {
        Self::with_context(SessionContext::new(config, authenticator, database))
    }

    pub fn with_context(context: SessionContext) -> Self {
        let keep_alive = KeepAliveScheduler::new(
            context.config.keep_alive_interval,
            context.config.keep_alive_granularity,
        );
        Self {
            shared: Arc::new(Shared {
                context: Arc::new(context),
                keep_alive,
                handshake: Handshake::new(),
                tls: None,
            }),
        }
    }

    /// Enables TLS with a ready acceptor. Must be called before serving.
    pub fn with_tls(self, acceptor: TlsAcceptor) -> Self {
        self.rebuild(|shared| shared.tls = Some(acceptor))
    }

    /// Restricts the versions offered in the handshake.
    pub fn with_handshake(self, handshake: Handshake) -> Self {
        self.rebuild(|shared| shared.handshake = handshake)
    }

    fn rebuild(self, f: impl FnOnce(&mut Shared)) -> Self {
        let mut shared = Shared {
            context: Arc::clone(&self.shared.context),
            keep_alive: Arc::clone(&self.shared.keep_alive),
            handshake: self.shared.handshake.clone(),
            tls: self.shared.tls.clone(),
        };
        f(&mut shared);
        Self {
            shared: Arc::new(shared),
        }
    }

    pub fn config(&self) -> &BoltConfig {
        &self.shared.context.config
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.shared.context
    }

    pub fn metrics(&self) -> &Arc<ServerMetrics> {
        &self.shared.context.metrics
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.shared.context.registry
    }

    /// Starts the keep-alive ticker. [`serve`](Self::serve) does this
    /// itself; callers of [`serve_stream`](Self::serve_stream) must.
    pub fn spawn_keep_alive(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        self.shared.keep_alive.spawn(shutdown)
    }

    /// Binds the configured listen address.
    pub async fn bind(&self) -> io::Result<TcpListener> {
        TcpListener::bind(&self.config().listen_address).await
    }

    /// Accepts connections until `shutdown` is cancelled, then waits for the
    /// open connections to close.
    pub async fn serve(&self, listener: TcpListener, shutdown: CancellationToken) -> io::Result<()> {
        let local = listener.local_addr()?;
        info!(
            address = %local,
            encryption = ?self.config().encryption,
            tls = self.shared.tls.is_some(),
            "Bolt server listening"
        );

        let ticker = self.spawn_keep_alive(shutdown.clone());
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(peer = %peer, error = %e, "failed to set TCP_NODELAY");
                        }
                        let server = self.clone();
                        let cancel = shutdown.child_token();
                        connections.spawn(async move {
                            server.serve_stream(stream, peer, cancel).await;
                        });
                    }
                    Err(e) => warn!(error = %e, "failed to accept connection"),
                },
                Some(finished) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = finished {
                        warn!(error = %e, "connection task failed");
                    }
                }
            }
        }

        info!(open = connections.len(), "Bolt server shutting down");
        while let Some(finished) = connections.join_next().await {
            if let Err(e) = finished {
                warn!(error = %e, "connection task failed");
            }
        }
        ticker.abort();
        Ok(())
    }

    /// Serves one already accepted stream. Returns the final session state,
    /// or `None` when no session was started.
    pub async fn serve_stream<S>(
        &self,
        stream: S,
        peer: SocketAddr,
        cancel: CancellationToken,
    ) -> Option<SessionState>
    where
        S: Io,
    {
        let context = &self.shared.context;
        context.metrics.connection_opened();
        let state = self.run_connection(stream, peer, cancel).await;
        context.metrics.connection_closed();
        state
    }

    async fn run_connection<S: Io>(
        &self,
        stream: S,
        peer: SocketAddr,
        cancel: CancellationToken,
    ) -> Option<SessionState> {
        let context = &self.shared.context;
        let negotiated = tokio::select! {
            _ = cancel.cancelled() => return None,
            result = tokio::time::timeout(
                context.config.unauth_timeout,
                transport::negotiate(stream, self.shared.tls.as_ref(), context.config.encryption),
            ) => match result {
                Ok(Ok(negotiated)) => negotiated,
                Ok(Err(e)) => {
                    warn!(peer = %peer, error = %e, "connection refused");
                    return None;
                }
                Err(_) => {
                    warn!(peer = %peer, "transport negotiation timed out");
                    context.metrics.unauth_terminated();
                    return None;
                }
            },
        };

        let id = context.registry.next_id();
        context.registry.insert(ConnectionInfo {
            id: id.clone(),
            peer,
            transport: negotiated.transport,
            version: None,
            user_agent: None,
            principal: None,
            connected_at: Utc::now(),
            peer_certificates: negotiated.peer_certificates,
        });
        debug!(connection_id = %id, peer = %peer, transport = %negotiated.transport, "connection accepted");

        let state =
            connection::serve_connection(negotiated.io, id.clone(), peer, Arc::clone(&self.shared), cancel)
                .await;
        context.registry.remove(&id);
        state
    }
}

impl std::fmt::Debug for BoltServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoltServer")
            .field("config", self.config())
            .field("tls", &self.shared.tls.is_some())
            .finish_non_exhaustive()
    }
}

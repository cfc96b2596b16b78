//! Shared fixtures for the end-to-end tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, Encoder};
use tokio_util::sync::CancellationToken;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use zeta4g_bolt::auth::InMemoryAuthenticator;
use zeta4g_bolt::bolt::codec::{ChunkCodec, Frame};
use zeta4g_bolt::bolt::handshake::build_client_handshake;
use zeta4g_bolt::bolt::message::{tag, BoltResponse, QueryStats, QueryType, RoutingTable, ServerRole};
use zeta4g_bolt::bolt::packstream::{decode, encode, PackStreamStructure, PackStreamValue};
use zeta4g_bolt::dispatch::{
    BoltTransaction, ExecutionError, GraphDatabase, Parameters, QuerySummary, ResultCursor,
    RouteRequest, StaticCursor, TransactionRequest,
};
use zeta4g_bolt::{BoltConfig, BoltServer, BoltVersion, SessionState};

pub type Map = HashMap<String, PackStreamValue>;

// ============================================================================
// Fake query engine
// ============================================================================

/// Query engine that understands a handful of fixed statements.
///
/// - `RETURN $p AS p` echoes the parameter
/// - `UNWIND range(1, $n) AS i RETURN i` yields `n` rows
/// - `CREATE (n)` reports one created node
/// - `LOCK` waits for a lock until the transaction is terminated
#[derive(Debug, Default)]
pub struct FakeDatabase {
    bookmarks: Arc<AtomicU64>,
    pub begun: Arc<AtomicU64>,
    /// Signalled each time a `LOCK` query starts waiting.
    pub waiting: Arc<Notify>,
}

pub struct FakeTransaction {
    bookmarks: Arc<AtomicU64>,
    waiting: Arc<Notify>,
    termination: CancellationToken,
}

impl GraphDatabase for FakeDatabase {
    fn begin(
        &self,
        request: TransactionRequest,
    ) -> BoxFuture<'_, Result<Box<dyn BoltTransaction>, ExecutionError>> {
        self.begun.fetch_add(1, Ordering::Relaxed);
        let tx: Box<dyn BoltTransaction> = Box::new(FakeTransaction {
            bookmarks: Arc::clone(&self.bookmarks),
            waiting: Arc::clone(&self.waiting),
            termination: request.termination,
        });
        futures::future::ready(Ok(tx)).boxed()
    }

    fn route(&self, request: RouteRequest) -> BoxFuture<'_, Result<RoutingTable, ExecutionError>> {
        let mut table = RoutingTable::new(request.database.as_deref().unwrap_or("neo4j"), 300);
        table.add_server(ServerRole::Route, vec!["localhost:7687".to_string()]);
        table.add_server(ServerRole::Read, vec!["localhost:7687".to_string()]);
        table.add_server(ServerRole::Write, vec!["localhost:7687".to_string()]);
        futures::future::ready(Ok(table)).boxed()
    }
}

impl BoltTransaction for FakeTransaction {
    fn run<'a>(
        &'a mut self,
        query: &'a str,
        mut parameters: Parameters,
    ) -> BoxFuture<'a, Result<Box<dyn ResultCursor>, ExecutionError>> {
        async move {
            let cursor: Box<dyn ResultCursor> = match query {
                "RETURN $p AS p" => {
                    let p = parameters
                        .remove("p")
                        .ok_or_else(|| ExecutionError::ParameterMissing("p".to_string()))?;
                    Box::new(StaticCursor::new(vec!["p".to_string()], vec![vec![p]]))
                }
                "UNWIND range(1, $n) AS i RETURN i" => {
                    let n = parameters.get("n").and_then(|v| v.as_int()).unwrap_or(0);
                    Box::new(StaticCursor::new(
                        vec!["i".to_string()],
                        (1..=n).map(|i| vec![PackStreamValue::Integer(i)]).collect(),
                    ))
                }
                "CREATE (n)" => {
                    let mut stats = QueryStats::new();
                    stats.nodes_created = 1;
                    Box::new(StaticCursor::empty().with_summary(QuerySummary {
                        query_type: QueryType::Write,
                        stats,
                        ..QuerySummary::default()
                    }))
                }
                "LOCK" => {
                    self.waiting.notify_one();
                    self.termination.cancelled().await;
                    return Err(ExecutionError::LockClientStopped(
                        "The transaction has been terminated while waiting for a lock."
                            .to_string(),
                    ));
                }
                _ => return Err(ExecutionError::Syntax(format!("Invalid input '{}'", query))),
            };
            Ok(cursor)
        }
        .boxed()
    }

    fn commit(&mut self) -> BoxFuture<'_, Result<Option<String>, ExecutionError>> {
        let n = self.bookmarks.fetch_add(1, Ordering::Relaxed) + 1;
        futures::future::ready(Ok(Some(format!("zeta4g:bm:{}", n)))).boxed()
    }

    fn rollback(&mut self) -> BoxFuture<'_, Result<(), ExecutionError>> {
        futures::future::ready(Ok(())).boxed()
    }
}

pub fn authenticator() -> InMemoryAuthenticator {
    InMemoryAuthenticator::new()
        .with_user("neo4j", "secret")
        .with_expired_user("newbie", "changeme")
}

pub fn server(config: BoltConfig) -> BoltServer {
    server_with(config).0
}

/// Like [`server`], also handing out the engine for inspection.
pub fn server_with(config: BoltConfig) -> (BoltServer, Arc<FakeDatabase>) {
    let database = Arc::new(FakeDatabase::default());
    let server = BoltServer::new(config, Arc::new(authenticator()), database.clone());
    (server, database)
}

// ============================================================================
// Client
// ============================================================================

/// Minimal Bolt client over an in-memory stream.
pub struct TestClient {
    stream: DuplexStream,
    chunks: ChunkCodec,
    buffer: BytesMut,
}

/// Server side of a [`TestClient`] connection.
pub struct ServerTask {
    pub handle: JoinHandle<Option<SessionState>>,
    pub cancel: CancellationToken,
}

impl ServerTask {
    pub async fn finished(self) -> Option<SessionState> {
        tokio::time::timeout(Duration::from_secs(30), self.handle)
            .await
            .expect("server task did not finish")
            .expect("server task panicked")
    }
}

impl TestClient {
    /// Opens an in-memory connection served by `server`; nothing is sent.
    pub fn open(server: &BoltServer, buffer: usize) -> (TestClient, ServerTask) {
        let (client, remote) = tokio::io::duplex(buffer);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let server = server.clone();
            let cancel = cancel.clone();
            async move {
                server
                    .serve_stream(remote, "127.0.0.1:51000".parse().unwrap(), cancel)
                    .await
            }
        });
        let client = TestClient {
            stream: client,
            chunks: ChunkCodec::new(),
            buffer: BytesMut::new(),
        };
        (client, ServerTask { handle, cancel })
    }

    /// Connects and negotiates exactly `version`.
    pub async fn connect(server: &BoltServer, version: BoltVersion) -> (TestClient, ServerTask) {
        let (mut client, task) = Self::open(server, 64 * 1024);
        let agreed = client.handshake(&[version.to_bytes()]).await;
        assert_eq!(agreed, version.to_bytes());
        (client, task)
    }

    pub async fn handshake(&mut self, proposals: &[[u8; 4]]) -> [u8; 4] {
        self.write_raw(&build_client_handshake(proposals)).await;
        let mut agreed = [0u8; 4];
        self.stream.read_exact(&mut agreed).await.unwrap();
        agreed
    }

    pub async fn write_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
        self.stream.flush().await.unwrap();
    }

    pub async fn send(&mut self, tag: u8, fields: Vec<PackStreamValue>) {
        let value = PackStreamValue::Structure(PackStreamStructure::new(tag, fields));
        let body = encode(&value).unwrap().freeze();
        self.send_body(body).await;
    }

    /// Writes several messages with a single write.
    pub async fn pipeline(&mut self, messages: Vec<(u8, Vec<PackStreamValue>)>) {
        let mut framed = BytesMut::new();
        for (tag, fields) in messages {
            let value = PackStreamValue::Structure(PackStreamStructure::new(tag, fields));
            let body = encode(&value).unwrap().freeze();
            self.chunks.encode(Frame::Message(body), &mut framed).unwrap();
        }
        self.write_raw(&framed).await;
    }

    pub async fn send_body(&mut self, body: Bytes) {
        let mut framed = BytesMut::new();
        self.chunks.encode(Frame::Message(body), &mut framed).unwrap();
        self.write_raw(&framed).await;
    }

    /// Next response, or `None` once the server closed the connection.
    /// NOOP chunks are skipped.
    pub async fn recv(&mut self) -> Option<BoltResponse> {
        loop {
            if let Some(body) = self.chunks.decode(&mut self.buffer).unwrap() {
                let PackStreamValue::Structure(s) = decode(&body).unwrap() else {
                    panic!("response is not a structure");
                };
                return Some(BoltResponse::from_structure(&s).unwrap());
            }
            let n = self.stream.read_buf(&mut self.buffer).await.ok()?;
            if n == 0 {
                return None;
            }
        }
    }

    pub async fn expect(&mut self) -> BoltResponse {
        tokio::time::timeout(Duration::from_secs(30), self.recv())
            .await
            .expect("timed out waiting for a response")
            .expect("connection closed")
    }

    /// Reads the next two raw bytes; used to observe NOOP chunks.
    pub async fn read_two(&mut self) -> [u8; 2] {
        let mut raw = [0u8; 2];
        self.stream.read_exact(&mut raw).await.unwrap();
        raw
    }

    /// Whether the server closed the connection.
    pub async fn is_closed(&mut self) -> bool {
        let mut rest = Vec::new();
        matches!(
            tokio::time::timeout(Duration::from_secs(30), self.stream.read_to_end(&mut rest)).await,
            Ok(Ok(_)) | Ok(Err(_))
        )
    }

    pub async fn shutdown(&mut self) {
        self.stream.shutdown().await.unwrap();
    }

    // ------------------------------------------------------------------------
    // Messages
    // ------------------------------------------------------------------------

    pub async fn hello(&mut self, extra: Map) {
        let mut extra = extra;
        extra
            .entry("user_agent".to_string())
            .or_insert_with(|| PackStreamValue::from("zeta4g-tests/1.0"));
        self.send(tag::HELLO, vec![PackStreamValue::Map(extra)]).await;
    }

    pub async fn hello_basic(&mut self, principal: &str, credentials: &str) {
        self.hello(basic(principal, credentials)).await;
    }

    pub async fn logon(&mut self, auth: Map) {
        self.send(tag::LOGON, vec![PackStreamValue::Map(auth)]).await;
    }

    pub async fn run(&mut self, query: &str, parameters: Map) {
        self.send(
            tag::RUN,
            vec![
                PackStreamValue::from(query),
                PackStreamValue::Map(parameters),
                PackStreamValue::Map(HashMap::new()),
            ],
        )
        .await;
    }

    pub async fn pull(&mut self, n: i64, qid: i64) {
        let mut extra = HashMap::new();
        extra.insert("n".to_string(), PackStreamValue::Integer(n));
        if qid != -1 {
            extra.insert("qid".to_string(), PackStreamValue::Integer(qid));
        }
        self.send(tag::PULL, vec![PackStreamValue::Map(extra)]).await;
    }

    pub async fn pull_all(&mut self) {
        self.pull(-1, -1).await;
    }

    pub async fn begin(&mut self) {
        self.send(tag::BEGIN, vec![PackStreamValue::Map(HashMap::new())]).await;
    }

    pub async fn commit(&mut self) {
        self.send(tag::COMMIT, vec![]).await;
    }

    pub async fn reset(&mut self) {
        self.send(tag::RESET, vec![]).await;
    }

    pub async fn goodbye(&mut self) {
        self.send(tag::GOODBYE, vec![]).await;
    }

    /// HELLO with valid credentials; panics unless it succeeds.
    pub async fn login(&mut self) {
        self.hello_basic("neo4j", "secret").await;
        let response = self.expect().await;
        assert!(response.is_success(), "login failed: {:?}", response);
    }
}

pub fn basic(principal: &str, credentials: &str) -> Map {
    let mut auth = HashMap::new();
    auth.insert("scheme".to_string(), PackStreamValue::from("basic"));
    auth.insert("principal".to_string(), PackStreamValue::from(principal));
    auth.insert("credentials".to_string(), PackStreamValue::from(credentials));
    auth
}

pub fn params(entries: &[(&str, PackStreamValue)]) -> Map {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

pub fn failure_code(response: &BoltResponse) -> String {
    match response {
        BoltResponse::Failure(f) => f.code.clone(),
        other => panic!("expected FAILURE, got {:?}", other),
    }
}

// ============================================================================
// Log capture
// ============================================================================

/// Layer that keeps the message of every event.
#[derive(Clone, Default)]
pub struct CapturedLogs {
    events: Arc<Mutex<Vec<(Level, String)>>>,
}

impl CapturedLogs {
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        use tracing_subscriber::layer::SubscriberExt;
        tracing::subscriber::set_default(tracing_subscriber::registry().with(self.clone()))
    }

    pub fn count(&self, level: Level, message: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|(l, m)| *l == level && m == message)
            .count()
    }

    pub fn contains(&self, level: Level, fragment: &str) -> bool {
        self.events
            .lock()
            .iter()
            .any(|(l, m)| *l == level && m.contains(fragment))
    }
}

struct MessageVisitor(String);

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{:?}", value);
        }
    }
}

impl<S: Subscriber> Layer<S> for CapturedLogs {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        self.events.lock().push((*event.metadata().level(), visitor.0));
    }
}

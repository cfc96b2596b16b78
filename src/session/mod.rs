//! # Session state machine
//!
//! One [`Session`] per connection, driven by [`SessionEvent`]s that the
//! reader task produces. Responses leave through the bounded outbound
//! channel, in request order.
//!
//! RESET is signalled twice: out of band through the [`InterruptHandle`] as
//! soon as it is decoded, so running work is cancelled, and in band as a
//! queued request, so its SUCCESS is ordered after the responses to
//! everything sent before it.

mod interrupt;
mod state;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use interrupt::InterruptHandle;
pub use state::{Disposition, SessionEvent, SessionState};

use crate::auth::{AuthGate, AuthRateLimiter, Authenticator, PasswordChange};
use crate::bolt::codec::Outbound;
use crate::bolt::error::{BoltError, BoltErrorCode, RequestError};
use crate::bolt::handshake::BoltVersion;
use crate::bolt::message::{
    BoltRequest, BoltResponse, FailureMessage, HelloMessage, SuccessMessage,
};
use crate::bolt::packstream::{PackStreamValue, StructProfile};
use crate::config::BoltConfig;
use crate::dispatch::{DispatchError, Dispatcher, ExecutionError, GraphDatabase, StaticCursor};
use crate::flow::{KeepAliveState, ReadLimiter, UnauthGuard};
use crate::server::{ConnectionRegistry, ServerMetrics};

const CREDENTIALS_EXPIRED_MESSAGE: &str =
    "The credentials you provided were valid, but must be changed before you can use this instance.";

// ============================================================================
// SessionContext
// ============================================================================

/// Collaborators shared by every session of a server.
pub struct SessionContext {
    pub config: Arc<BoltConfig>,
    pub auth: AuthGate,
    pub database: Arc<dyn GraphDatabase>,
    pub metrics: Arc<ServerMetrics>,
    pub registry: Arc<ConnectionRegistry>,
}

impl SessionContext {
    /// Builds the context with a rate limiter configured from `config`.
    pub fn new(
        config: BoltConfig,
        authenticator: Arc<dyn Authenticator>,
        database: Arc<dyn GraphDatabase>,
    ) -> Self {
        let limiter = Arc::new(AuthRateLimiter::new(
            config.auth_max_failed_attempts,
            config.auth_lock_window,
        ));
        Self {
            config: Arc::new(config),
            auth: AuthGate::new(authenticator, limiter),
            database,
            metrics: Arc::new(ServerMetrics::new()),
            registry: Arc::new(ConnectionRegistry::new()),
        }
    }

    pub fn with_auth_gate(mut self, auth: AuthGate) -> Self {
        self.auth = auth;
        self
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("config", &self.config)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

/// The outbound channel is gone; nothing more can be said to the peer.
struct ChannelClosed;

type Handled = Result<Disposition, ChannelClosed>;

// ============================================================================
// Session
// ============================================================================

pub struct Session {
    connection_id: String,
    peer: String,
    profile: StructProfile,
    state: SessionState,
    context: Arc<SessionContext>,
    dispatcher: Dispatcher,
    interrupts: InterruptHandle,
    outbound: mpsc::Sender<Outbound>,
    keep_alive: Option<Arc<KeepAliveState>>,
    unauth: Option<UnauthGuard>,
    principal: Option<String>,
    credentials_expired: bool,
}

impl Session {
    /// Creates a session for a negotiated connection, awaiting HELLO.
    pub fn new(
        connection_id: impl Into<String>,
        peer: impl Into<String>,
        profile: StructProfile,
        context: Arc<SessionContext>,
        outbound: mpsc::Sender<Outbound>,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            peer: peer.into(),
            profile,
            state: SessionState::AwaitingHello,
            dispatcher: Dispatcher::new(Arc::clone(&context.database)),
            context,
            interrupts: InterruptHandle::new(),
            outbound,
            keep_alive: None,
            unauth: None,
            principal: None,
            credentials_expired: false,
        }
    }

    pub fn with_interrupts(mut self, interrupts: InterruptHandle) -> Self {
        self.interrupts = interrupts;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Arc<KeepAliveState>) -> Self {
        self.keep_alive = Some(keep_alive);
        self
    }

    pub fn with_unauth_guard(mut self, guard: UnauthGuard) -> Self {
        self.unauth = Some(guard);
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn version(&self) -> BoltVersion {
        self.profile.version()
    }

    pub fn interrupts(&self) -> &InterruptHandle {
        &self.interrupts
    }

    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    /// Processes events until the connection has to close.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
        limiter: Arc<ReadLimiter>,
        cancel: CancellationToken,
    ) -> SessionState {
        loop {
            let interrupt = self.interrupts.token();
            let watch_interrupt =
                self.state.is_authenticated() && self.state != SessionState::Interrupted;

            let event = tokio::select! {
                biased;
                _ = cancel.cancelled() => SessionEvent::PeerClosed,
                event = events.recv() => match event {
                    Some(event) => {
                        limiter.on_dequeue();
                        event
                    }
                    None => SessionEvent::PeerClosed,
                },
                _ = interrupt.cancelled(), if watch_interrupt => SessionEvent::InterruptRequested,
            };

            if self.handle(event).await == Disposition::Close {
                break;
            }
        }
        if !self.state.is_terminal() {
            self.close().await;
        }
        self.state
    }

    /// Applies one event.
    pub async fn handle(&mut self, event: SessionEvent) -> Disposition {
        let handled = match event {
            SessionEvent::Request(request) => self.on_request(request).await,
            SessionEvent::Invalid(error) => self.on_invalid(error).await,
            SessionEvent::Fatal(error) => self.on_fatal(error).await,
            SessionEvent::InterruptRequested => {
                self.on_interrupt().await;
                Ok(Disposition::Continue)
            }
            SessionEvent::PeerClosed => Ok(Disposition::Close),
        };
        match handled {
            Ok(Disposition::Continue) => Disposition::Continue,
            Ok(Disposition::Close) | Err(ChannelClosed) => {
                self.close().await;
                Disposition::Close
            }
        }
    }

    async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.dispatcher.reset().await;
        debug!(connection_id = %self.connection_id, state = %self.state, "session closed");
        if self.state != SessionState::Failed {
            self.state = SessionState::Closed;
        }
    }

    // ========================================================================
    // Event handlers
    // ========================================================================

    async fn on_request(&mut self, request: BoltRequest) -> Handled {
        debug!(connection_id = %self.connection_id, message = request.name(), state = %self.state, "request");

        if self.interrupts.is_interrupted() {
            match request {
                BoltRequest::Reset if self.interrupts.acknowledge_reset() => {}
                BoltRequest::Goodbye => return Ok(Disposition::Close),
                _ => return self.ignored().await,
            }
        } else if self.state == SessionState::Interrupted
            && !matches!(request, BoltRequest::Reset | BoltRequest::Goodbye)
        {
            return self.ignored().await;
        }

        match (self.state, request) {
            (_, BoltRequest::Goodbye) => Ok(Disposition::Close),
            (SessionState::AwaitingHello, BoltRequest::Hello(hello)) => self.hello(hello).await,
            (SessionState::AwaitingAuth, BoltRequest::Logon(logon)) => {
                let success = SuccessMessage::new();
                self.authenticate(&logon.auth, success).await
            }
            (SessionState::AwaitingAuth, BoltRequest::Reset) => {
                self.reply(SuccessMessage::new()).await?;
                Ok(Disposition::Continue)
            }
            (state, request) if !state.is_authenticated() => {
                self.violation(request.name()).await
            }
            (_, BoltRequest::Reset) => {
                self.dispatcher.reset().await;
                self.state = SessionState::Ready;
                self.reply(SuccessMessage::new()).await?;
                Ok(Disposition::Continue)
            }
            (SessionState::Ready, BoltRequest::Logoff) => {
                self.dispatcher.reset().await;
                self.dispatcher.set_principal(None);
                self.context
                    .registry
                    .update(&self.connection_id, |c| c.principal = None);
                self.principal = None;
                self.credentials_expired = false;
                self.state = SessionState::AwaitingAuth;
                self.reply(SuccessMessage::new()).await?;
                Ok(Disposition::Continue)
            }
            (SessionState::Ready, BoltRequest::Run(run))
            | (SessionState::TxReady | SessionState::TxStreaming, BoltRequest::Run(run)) => {
                if let Some(change) = PasswordChange::parse(&run.query, &run.parameters) {
                    return self.change_password(change).await;
                }
                if self.credentials_expired {
                    return self.fail_credentials_expired().await;
                }
                let token = self.interrupts.token();
                let work = self.dispatcher.run(run, token.clone());
                let result = Self::interruptible(self.keep_alive.as_deref(), token, work).await;
                self.complete(result).await
            }
            (SessionState::Ready, BoltRequest::Begin(begin)) => {
                if self.credentials_expired {
                    return self.fail_credentials_expired().await;
                }
                let token = self.interrupts.token();
                let work = self.dispatcher.begin(&begin.options, token.clone());
                let result = Self::interruptible(self.keep_alive.as_deref(), token, work).await;
                self.complete(result).await
            }
            (SessionState::Ready, BoltRequest::Route(route)) => {
                if self.credentials_expired {
                    return self.fail_credentials_expired().await;
                }
                let token = self.interrupts.token();
                let work = self.dispatcher.route(route);
                let result = Self::interruptible(self.keep_alive.as_deref(), token, work).await;
                self.complete(result).await
            }
            (SessionState::Streaming | SessionState::TxStreaming, BoltRequest::Pull(pull)) => {
                let token = self.interrupts.token();
                let work = self.dispatcher.pull(pull, &mut self.outbound);
                let result = Self::interruptible(self.keep_alive.as_deref(), token, work).await;
                self.complete(result).await
            }
            (SessionState::Streaming | SessionState::TxStreaming, BoltRequest::Discard(discard)) => {
                let token = self.interrupts.token();
                let work = self.dispatcher.discard(discard);
                let result = Self::interruptible(self.keep_alive.as_deref(), token, work).await;
                self.complete(result).await
            }
            (SessionState::TxReady | SessionState::TxStreaming, BoltRequest::Commit) => {
                let token = self.interrupts.token();
                let work = self.dispatcher.commit();
                let result = Self::interruptible(self.keep_alive.as_deref(), token, work).await;
                self.complete(result).await
            }
            (SessionState::TxReady | SessionState::TxStreaming, BoltRequest::Rollback) => {
                let token = self.interrupts.token();
                let work = self.dispatcher.rollback();
                let result = Self::interruptible(self.keep_alive.as_deref(), token, work).await;
                self.complete(result).await
            }
            (state, request) => {
                self.fail(RequestError::invalid(format!(
                    "Message '{}' cannot be handled by a session in the {} state.",
                    request.name(),
                    state
                )))
                .await
            }
        }
    }

    async fn on_invalid(&mut self, error: RequestError) -> Handled {
        if !self.state.is_authenticated() {
            self.state = SessionState::Failed;
            self.reply(error.to_failure()).await?;
            return Ok(Disposition::Close);
        }
        if self.interrupts.is_interrupted() || self.state == SessionState::Interrupted {
            return self.ignored().await;
        }
        self.fail(error).await
    }

    async fn on_fatal(&mut self, error: BoltError) -> Handled {
        warn!(
            connection_id = %self.connection_id,
            peer = %self.peer,
            error = %error,
            "closing connection after protocol error"
        );
        self.state = SessionState::Failed;
        if let Some(failure) = error.to_failure() {
            // best effort; the connection closes either way
            let _ = self.reply(failure).await;
        }
        Ok(Disposition::Close)
    }

    /// Releases transactions and locks as soon as a RESET is known, even
    /// before it reaches the head of the queue.
    async fn on_interrupt(&mut self) {
        if !self.state.is_authenticated() || self.state == SessionState::Interrupted {
            return;
        }
        debug!(connection_id = %self.connection_id, "interrupted while idle");
        self.dispatcher.reset().await;
        self.state = SessionState::Interrupted;
    }

    // ========================================================================
    // Authentication
    // ========================================================================

    async fn hello(&mut self, hello: HelloMessage) -> Handled {
        let accepted = self.profile.negotiate_patches(&hello.patch_bolt);
        info!(
            connection_id = %self.connection_id,
            peer = %self.peer,
            version = %self.version(),
            user_agent = %hello.user_agent,
            "client connected"
        );
        let user_agent = hello.user_agent.clone();
        self.context
            .registry
            .update(&self.connection_id, |c| c.user_agent = Some(user_agent));

        let mut success =
            SuccessMessage::hello_success(&self.context.config.server_agent, &self.connection_id);
        if self.version().supports_hints() {
            if let Some(hint) = self.context.config.recv_timeout_hint {
                let mut hints = HashMap::new();
                hints.insert(
                    "connection.recv_timeout_seconds".to_string(),
                    PackStreamValue::Integer(hint.as_secs() as i64),
                );
                success.add("hints", hints);
            }
        }
        if !accepted.is_empty() {
            success.add("patch_bolt", PackStreamValue::string_list(accepted));
        }

        match hello.auth {
            Some(auth) => self.authenticate(&auth, success).await,
            None => {
                self.state = SessionState::AwaitingAuth;
                self.reply(success).await?;
                Ok(Disposition::Continue)
            }
        }
    }

    async fn authenticate(
        &mut self,
        auth: &HashMap<String, PackStreamValue>,
        mut success: SuccessMessage,
    ) -> Handled {
        match self.context.auth.authenticate(auth, &self.peer) {
            Ok(outcome) => {
                if let Some(guard) = &self.unauth {
                    guard.authenticated();
                }
                if outcome.credentials_expired {
                    success.add("credentials_expired", true);
                }
                self.credentials_expired = outcome.credentials_expired;
                self.dispatcher.set_principal(outcome.principal.clone());
                let principal = outcome.principal.clone();
                self.context
                    .registry
                    .update(&self.connection_id, |c| c.principal = principal);
                self.principal = outcome.principal;
                self.state = SessionState::Ready;
                self.reply(success).await?;
                Ok(Disposition::Continue)
            }
            Err(e) => {
                self.context.metrics.auth_failed();
                self.state = SessionState::Failed;
                self.reply(e.to_failure()).await?;
                Ok(Disposition::Close)
            }
        }
    }

    async fn change_password(&mut self, change: Result<PasswordChange, RequestError>) -> Handled {
        let change = match change {
            Ok(change) => change,
            Err(e) => return self.fail(e).await,
        };
        let Some(principal) = self.principal.clone() else {
            return self
                .fail(ExecutionError::Forbidden(
                    "Anonymous users cannot change passwords.".to_string(),
                ))
                .await;
        };
        let changed = change.validate().and_then(|_| {
            self.context
                .auth
                .authenticator()
                .change_password(&principal, change.old.as_deref(), &change.new)
        });
        match changed {
            Ok(()) => {
                info!(connection_id = %self.connection_id, principal = %principal, "password changed");
                self.credentials_expired = false;
                let result = self.dispatcher.open_local(Box::new(StaticCursor::empty()));
                self.complete(result).await
            }
            Err(e) => self.fail(e.to_failure()).await,
        }
    }

    // ========================================================================
    // Responses
    // ========================================================================

    /// Awaits `work` unless the interrupt token fires first.
    async fn interruptible<T>(
        keep_alive: Option<&KeepAliveState>,
        token: CancellationToken,
        work: impl Future<Output = Result<T, DispatchError>>,
    ) -> Result<T, DispatchError> {
        if let Some(state) = keep_alive {
            state.begin_request();
        }
        let result = tokio::select! {
            biased;
            result = work => result,
            _ = token.cancelled() => Err(ExecutionError::terminated().into()),
        };
        if let Some(state) = keep_alive {
            state.end_request();
        }
        result
    }

    async fn complete(&mut self, result: Result<SuccessMessage, DispatchError>) -> Handled {
        match result {
            Ok(success) => {
                self.settle();
                self.reply(success).await?;
                Ok(Disposition::Continue)
            }
            Err(DispatchError::Execution(e)) => self.fail(e).await,
            Err(DispatchError::Closed) => Err(ChannelClosed),
        }
    }

    /// Derives the state from what the dispatcher has open.
    fn settle(&mut self) {
        self.state = match (
            self.dispatcher.in_explicit_transaction(),
            self.dispatcher.has_open_results(),
        ) {
            (true, true) => SessionState::TxStreaming,
            (true, false) => SessionState::TxReady,
            (false, true) => SessionState::Streaming,
            (false, false) => SessionState::Ready,
        };
    }

    /// Answers with FAILURE and waits for RESET.
    /// Only a password change is allowed until expired credentials are
    /// replaced.
    async fn fail_credentials_expired(&mut self) -> Handled {
        self.fail(ExecutionError::CredentialsExpired(
            CREDENTIALS_EXPIRED_MESSAGE.to_string(),
        ))
        .await
    }

    async fn fail(&mut self, failure: impl Into<Failure>) -> Handled {
        let failure = failure.into().0;
        debug!(
            connection_id = %self.connection_id,
            code = %failure.code,
            "request failed: {}",
            failure.message
        );
        self.state = SessionState::Interrupted;
        self.reply(failure).await?;
        Ok(Disposition::Continue)
    }

    /// Answers with FAILURE and closes; used before authentication.
    async fn violation(&mut self, message: &str) -> Handled {
        let failure = FailureMessage::new(
            BoltErrorCode::REQUEST_INVALID,
            &format!(
                "Message '{}' cannot be handled by a session in the {} state.",
                message, self.state
            ),
        );
        self.state = SessionState::Failed;
        self.reply(failure).await?;
        Ok(Disposition::Close)
    }

    async fn ignored(&mut self) -> Handled {
        self.reply(BoltResponse::Ignored).await?;
        Ok(Disposition::Continue)
    }

    async fn reply(&mut self, response: impl Into<BoltResponse>) -> Result<(), ChannelClosed> {
        self.outbound
            .send(Outbound::Response(response.into()))
            .await
            .map_err(|_| ChannelClosed)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("connection_id", &self.connection_id)
            .field("version", &self.version())
            .field("state", &self.state)
            .field("principal", &self.principal)
            .finish_non_exhaustive()
    }
}

/// Anything that can be reported as a FAILURE.
struct Failure(FailureMessage);

impl From<FailureMessage> for Failure {
    fn from(failure: FailureMessage) -> Self {
        Failure(failure)
    }
}

impl From<RequestError> for Failure {
    fn from(error: RequestError) -> Self {
        Failure(error.to_failure())
    }
}

impl From<ExecutionError> for Failure {
    fn from(error: ExecutionError) -> Self {
        Failure(error.to_failure())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::InMemoryAuthenticator;
    use crate::bolt::message::{
        BeginMessage, LogonMessage, PullMessage, RouteMessage, RoutingTable, RunMessage, TxOptions,
    };
    use crate::dispatch::{
        BoltTransaction, ExecutionError, ResultCursor, RouteRequest, TransactionRequest,
    };
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use std::time::Duration;

    struct FakeDatabase;

    struct FakeTransaction {
        termination: CancellationToken,
    }

    impl GraphDatabase for FakeDatabase {
        fn begin(
            &self,
            request: TransactionRequest,
        ) -> BoxFuture<'_, Result<Box<dyn BoltTransaction>, ExecutionError>> {
            let tx: Box<dyn BoltTransaction> = Box::new(FakeTransaction {
                termination: request.termination,
            });
            futures::future::ready(Ok(tx)).boxed()
        }

        fn route(&self, request: RouteRequest) -> BoxFuture<'_, Result<RoutingTable, ExecutionError>> {
            let table = RoutingTable::new(request.database.as_deref().unwrap_or("neo4j"), 300);
            futures::future::ready(Ok(table)).boxed()
        }
    }

    impl BoltTransaction for FakeTransaction {
        fn run<'a>(
            &'a mut self,
            query: &'a str,
            _parameters: HashMap<String, PackStreamValue>,
        ) -> BoxFuture<'a, Result<Box<dyn ResultCursor>, ExecutionError>> {
            async move {
                match query {
                    "RETURN 1 AS n" => {
                        let cursor: Box<dyn ResultCursor> = Box::new(StaticCursor::new(
                            vec!["n".to_string()],
                            vec![vec![PackStreamValue::Integer(1)]],
                        ));
                        Ok(cursor)
                    }
                    "LOCK" => {
                        self.termination.cancelled().await;
                        Err(ExecutionError::LockClientStopped(
                            "The transaction has been terminated while waiting for a lock."
                                .to_string(),
                        ))
                    }
                    _ => Err(ExecutionError::Syntax("Invalid input".to_string())),
                }
            }
            .boxed()
        }

        fn commit(&mut self) -> BoxFuture<'_, Result<Option<String>, ExecutionError>> {
            futures::future::ready(Ok(Some("bm:1".to_string()))).boxed()
        }

        fn rollback(&mut self) -> BoxFuture<'_, Result<(), ExecutionError>> {
            futures::future::ready(Ok(())).boxed()
        }
    }

    fn context(config: BoltConfig) -> Arc<SessionContext> {
        let authenticator = InMemoryAuthenticator::new()
            .with_user("neo4j", "secret")
            .with_expired_user("fresh", "changeme");
        Arc::new(SessionContext::new(
            config,
            Arc::new(authenticator),
            Arc::new(FakeDatabase),
        ))
    }

    fn session(version: BoltVersion) -> (Session, mpsc::Receiver<Outbound>) {
        session_with(version, BoltConfig::default())
    }

    fn session_with(version: BoltVersion, config: BoltConfig) -> (Session, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(64);
        let session = Session::new(
            "bolt-1",
            "127.0.0.1:50000",
            StructProfile::new(version),
            context(config),
            tx,
        );
        (session, rx)
    }

    fn basic(principal: &str, credentials: &str) -> HashMap<String, PackStreamValue> {
        let mut auth = HashMap::new();
        auth.insert("scheme".to_string(), PackStreamValue::from("basic"));
        auth.insert("principal".to_string(), PackStreamValue::from(principal));
        auth.insert("credentials".to_string(), PackStreamValue::from(credentials));
        auth
    }

    fn hello(auth: Option<HashMap<String, PackStreamValue>>) -> SessionEvent {
        SessionEvent::Request(BoltRequest::Hello(HelloMessage {
            user_agent: "test/1.0".to_string(),
            auth,
            routing: None,
            patch_bolt: vec![],
            extra: HashMap::new(),
        }))
    }

    fn run(query: &str) -> SessionEvent {
        SessionEvent::Request(BoltRequest::Run(RunMessage {
            query: query.to_string(),
            parameters: HashMap::new(),
            options: TxOptions::default(),
        }))
    }

    fn pull_all() -> SessionEvent {
        SessionEvent::Request(BoltRequest::Pull(PullMessage { n: -1, qid: -1 }))
    }

    fn reset() -> SessionEvent {
        SessionEvent::Request(BoltRequest::Reset)
    }

    fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<BoltResponse> {
        let mut responses = Vec::new();
        while let Ok(item) = rx.try_recv() {
            if let Outbound::Response(response) = item {
                responses.push(response);
            }
        }
        responses
    }

    fn failure_code(response: &BoltResponse) -> &str {
        match response {
            BoltResponse::Failure(f) => &f.code,
            other => panic!("expected FAILURE, got {:?}", other),
        }
    }

    async fn ready(version: BoltVersion) -> (Session, mpsc::Receiver<Outbound>) {
        let (mut session, mut rx) = session(version);
        assert_eq!(
            session.handle(hello(Some(basic("neo4j", "secret")))).await,
            Disposition::Continue
        );
        drain(&mut rx);
        (session, rx)
    }

    #[tokio::test]
    async fn test_hello_authenticates() {
        let (mut session, mut rx) = session(BoltVersion::V4_4);
        session.handle(hello(Some(basic("neo4j", "secret")))).await;

        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(session.principal(), Some("neo4j"));
        match &drain(&mut rx)[..] {
            [BoltResponse::Success(s)] => {
                assert_eq!(s.get("connection_id").and_then(|v| v.as_str()), Some("bolt-1"));
                assert!(s.get("server").is_some());
                assert!(s.get("hints").is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_hello_advertises_hints() {
        let config = BoltConfig::builder()
            .with_recv_timeout_hint(Duration::from_secs(120))
            .build()
            .unwrap();
        let (mut session, mut rx) = session_with(BoltVersion::V4_4, config);
        session.handle(hello(Some(basic("neo4j", "secret")))).await;

        match &drain(&mut rx)[..] {
            [BoltResponse::Success(s)] => {
                let hints = s.get("hints").and_then(|v| v.as_map()).unwrap();
                assert_eq!(
                    hints.get("connection.recv_timeout_seconds").and_then(|v| v.as_int()),
                    Some(120)
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wrong_password_closes() {
        let (mut session, mut rx) = session(BoltVersion::V4_4);
        let disposition = session.handle(hello(Some(basic("neo4j", "wrong")))).await;

        assert_eq!(disposition, Disposition::Close);
        assert_eq!(session.state(), SessionState::Failed);
        let responses = drain(&mut rx);
        assert_eq!(failure_code(&responses[0]), BoltErrorCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_message_before_hello_closes() {
        let (mut session, mut rx) = session(BoltVersion::V4_4);
        let disposition = session.handle(run("RETURN 1 AS n")).await;

        assert_eq!(disposition, Disposition::Close);
        let responses = drain(&mut rx);
        assert_eq!(failure_code(&responses[0]), BoltErrorCode::REQUEST_INVALID);
        match &responses[0] {
            BoltResponse::Failure(f) => assert_eq!(
                f.message,
                "Message 'RUN' cannot be handled by a session in the NEGOTIATION state."
            ),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_run_pull_cycle() {
        let (mut session, mut rx) = ready(BoltVersion::V4_4).await;

        session.handle(run("RETURN 1 AS n")).await;
        assert_eq!(session.state(), SessionState::Streaming);

        session.handle(pull_all()).await;
        assert_eq!(session.state(), SessionState::Ready);

        let responses = drain(&mut rx);
        assert_eq!(responses.len(), 3);
        assert!(responses[0].is_success());
        assert!(responses[1].is_record());
        match &responses[2] {
            BoltResponse::Success(s) => assert_eq!(s.bookmark(), Some("bm:1")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failure_ignores_until_reset() {
        let (mut session, mut rx) = ready(BoltVersion::V4_4).await;

        session.handle(run("RETURN")).await;
        assert_eq!(session.state(), SessionState::Interrupted);
        session.handle(run("RETURN 1 AS n")).await;
        session.handle(reset()).await;
        assert_eq!(session.state(), SessionState::Ready);

        let responses = drain(&mut rx);
        assert_eq!(failure_code(&responses[0]), BoltErrorCode::SYNTAX_ERROR);
        assert_eq!(responses[1], BoltResponse::Ignored);
        assert!(responses[2].is_success());
    }

    #[tokio::test]
    async fn test_explicit_transaction() {
        let (mut session, mut rx) = ready(BoltVersion::V4_4).await;

        session
            .handle(SessionEvent::Request(BoltRequest::Begin(BeginMessage {
                options: TxOptions::default(),
            })))
            .await;
        assert_eq!(session.state(), SessionState::TxReady);
        session.handle(run("RETURN 1 AS n")).await;
        assert_eq!(session.state(), SessionState::TxStreaming);
        session.handle(pull_all()).await;
        assert_eq!(session.state(), SessionState::TxReady);
        session.handle(SessionEvent::Request(BoltRequest::Commit)).await;
        assert_eq!(session.state(), SessionState::Ready);

        let responses = drain(&mut rx);
        assert!(responses.iter().all(|r| !r.is_failure()));
        match responses.last() {
            Some(BoltResponse::Success(s)) => assert_eq!(s.bookmark(), Some("bm:1")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_commit_outside_transaction_fails() {
        let (mut session, mut rx) = ready(BoltVersion::V4_4).await;
        session.handle(SessionEvent::Request(BoltRequest::Commit)).await;

        assert_eq!(session.state(), SessionState::Interrupted);
        let responses = drain(&mut rx);
        assert_eq!(failure_code(&responses[0]), BoltErrorCode::REQUEST_INVALID);
    }

    #[tokio::test]
    async fn test_logon_logoff() {
        let (mut session, mut rx) = session(BoltVersion::V5_1);
        session.handle(hello(None)).await;
        assert_eq!(session.state(), SessionState::AwaitingAuth);

        session
            .handle(SessionEvent::Request(BoltRequest::Logon(LogonMessage {
                auth: basic("neo4j", "secret"),
            })))
            .await;
        assert_eq!(session.state(), SessionState::Ready);

        session.handle(SessionEvent::Request(BoltRequest::Logoff)).await;
        assert_eq!(session.state(), SessionState::AwaitingAuth);
        assert_eq!(session.principal(), None);

        let responses = drain(&mut rx);
        assert_eq!(responses.len(), 3);
        assert!(responses.iter().all(|r| r.is_success()));
    }

    #[tokio::test]
    async fn test_expired_credentials_must_be_changed() {
        let (mut session, mut rx) = session(BoltVersion::V4_4);
        session.handle(hello(Some(basic("fresh", "changeme")))).await;
        match &drain(&mut rx)[..] {
            [BoltResponse::Success(s)] => {
                assert_eq!(s.get("credentials_expired").and_then(|v| v.as_bool()), Some(true))
            }
            other => panic!("unexpected {:?}", other),
        }

        session.handle(run("RETURN 1 AS n")).await;
        let responses = drain(&mut rx);
        assert_eq!(failure_code(&responses[0]), BoltErrorCode::CREDENTIALS_EXPIRED);
        session.handle(reset()).await;

        session
            .handle(run("ALTER CURRENT USER SET PASSWORD FROM 'changeme' TO 'better'"))
            .await;
        session.handle(pull_all()).await;
        session.handle(run("RETURN 1 AS n")).await;
        assert_eq!(session.state(), SessionState::Streaming);
        assert!(drain(&mut rx).iter().all(|r| !r.is_failure()));
    }

    #[tokio::test]
    async fn test_expired_credentials_block_begin_and_route() {
        let (mut session, mut rx) = session(BoltVersion::V4_4);
        session.handle(hello(Some(basic("fresh", "changeme")))).await;
        drain(&mut rx);

        session
            .handle(SessionEvent::Request(BoltRequest::Begin(BeginMessage {
                options: TxOptions::default(),
            })))
            .await;
        assert_eq!(session.state(), SessionState::Interrupted);
        session.handle(reset()).await;

        session
            .handle(SessionEvent::Request(BoltRequest::Route(RouteMessage {
                routing: HashMap::new(),
                bookmarks: Vec::new(),
                database: None,
                imp_user: None,
            })))
            .await;
        assert_eq!(session.state(), SessionState::Interrupted);

        let responses = drain(&mut rx);
        assert_eq!(failure_code(&responses[0]), BoltErrorCode::CREDENTIALS_EXPIRED);
        assert!(responses[1].is_success());
        assert_eq!(failure_code(&responses[2]), BoltErrorCode::CREDENTIALS_EXPIRED);
    }

    #[tokio::test]
    async fn test_reset_terminates_lock_wait() {
        let (mut session, mut rx) = ready(BoltVersion::V4_4).await;
        let interrupts = session.interrupts().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            interrupts.interrupt();
        });

        session.handle(run("LOCK")).await;
        session.handle(reset()).await;
        assert_eq!(session.state(), SessionState::Ready);

        let responses = drain(&mut rx);
        assert_eq!(failure_code(&responses[0]), BoltErrorCode::LOCK_CLIENT_STOPPED);
        assert!(responses[1].is_success());
    }

    #[tokio::test]
    async fn test_only_last_reset_succeeds() {
        let (mut session, mut rx) = ready(BoltVersion::V4_4).await;
        session.interrupts().interrupt();
        session.interrupts().interrupt();

        session.handle(run("RETURN 1 AS n")).await;
        session.handle(reset()).await;
        session.handle(reset()).await;
        assert_eq!(session.state(), SessionState::Ready);

        let responses = drain(&mut rx);
        assert_eq!(
            responses,
            vec![
                BoltResponse::Ignored,
                BoltResponse::Ignored,
                BoltResponse::Success(SuccessMessage::new()),
            ]
        );
    }

    #[tokio::test]
    async fn test_fatal_error_closes() {
        let (mut session, _rx) = ready(BoltVersion::V4_4).await;
        let error = BoltError::UnknownMessage(0x7F);
        assert_eq!(session.handle(SessionEvent::Fatal(error)).await, Disposition::Close);
        assert_eq!(session.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn test_run_loop_stops_on_goodbye() {
        let (session, mut rx) = ready(BoltVersion::V4_4).await;
        let (events, inbound) = mpsc::unbounded_channel();
        let limiter = Arc::new(ReadLimiter::new("bolt-1", 1, 10));

        events.send(run("RETURN 1 AS n")).unwrap();
        events.send(pull_all()).unwrap();
        events.send(SessionEvent::Request(BoltRequest::Goodbye)).unwrap();

        let state = session.run(inbound, limiter, CancellationToken::new()).await;
        assert_eq!(state, SessionState::Closed);
        assert_eq!(drain(&mut rx).len(), 3);
    }
}

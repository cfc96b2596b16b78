//! # Dispatch
//!
//! The query engine is an external collaborator reached through three
//! traits: [`GraphDatabase`] opens transactions and answers routing
//! requests, [`BoltTransaction`] runs statements, and [`ResultCursor`]
//! streams their records. [`Dispatcher`] drives them for one connection and
//! turns their outcomes into SUCCESS metadata.

mod cursor;
mod dispatcher;

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub use cursor::StaticCursor;
pub use dispatcher::Dispatcher;

use crate::bolt::codec::Outbound;
use crate::bolt::error::{BoltErrorCode, RequestError};
use crate::bolt::message::{
    AccessMode, BoltResponse, FailureMessage, Notification, QueryPlan, QueryStats, QueryType,
    RecordMessage, RoutingTable, TxOptions,
};
use crate::bolt::packstream::PackStreamValue;

pub type Parameters = HashMap<String, PackStreamValue>;

// ============================================================================
// Collaborator traits
// ============================================================================

/// Entry point into the query engine.
pub trait GraphDatabase: Send + Sync {
    fn begin(
        &self,
        request: TransactionRequest,
    ) -> BoxFuture<'_, Result<Box<dyn BoltTransaction>, ExecutionError>>;

    fn route(&self, request: RouteRequest) -> BoxFuture<'_, Result<RoutingTable, ExecutionError>>;
}

/// An open transaction, explicit or auto-commit.
pub trait BoltTransaction: Send {
    fn run<'a>(
        &'a mut self,
        query: &'a str,
        parameters: Parameters,
    ) -> BoxFuture<'a, Result<Box<dyn ResultCursor>, ExecutionError>>;

    /// Returns the bookmark of the committed transaction, if any.
    fn commit(&mut self) -> BoxFuture<'_, Result<Option<String>, ExecutionError>>;

    fn rollback(&mut self) -> BoxFuture<'_, Result<(), ExecutionError>>;
}

/// Records of one statement, in production order.
pub trait ResultCursor: Send {
    fn fields(&self) -> Vec<String>;

    /// Up to `n` records; an empty batch means the result is exhausted.
    fn fetch(&mut self, n: usize) -> BoxFuture<'_, Result<Vec<Vec<PackStreamValue>>, ExecutionError>>;

    fn has_more(&self) -> bool;

    /// Only meaningful once the result is exhausted.
    fn summary(&self) -> QuerySummary;
}

// ============================================================================
// Requests and summaries
// ============================================================================

/// Everything the engine needs to open a transaction.
#[derive(Debug, Clone)]
pub struct TransactionRequest {
    pub mode: AccessMode,
    pub database: Option<String>,
    pub bookmarks: Vec<String>,
    pub timeout: Option<Duration>,
    pub metadata: Parameters,
    pub imp_user: Option<String>,
    /// Authenticated principal, `None` for anonymous sessions
    pub principal: Option<String>,
    /// `false` for auto-commit transactions opened by RUN
    pub explicit: bool,
    /// Cancelled on RESET or connection close. Lock waits must observe it.
    pub termination: CancellationToken,
}

impl TransactionRequest {
    pub fn from_options(
        options: &TxOptions,
        principal: Option<String>,
        explicit: bool,
        termination: CancellationToken,
    ) -> Self {
        Self {
            mode: options.mode,
            database: options.database.clone(),
            bookmarks: options.bookmarks.clone(),
            timeout: options.tx_timeout,
            metadata: options.tx_metadata.clone(),
            imp_user: options.imp_user.clone(),
            principal,
            explicit,
            termination,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RouteRequest {
    pub routing: Parameters,
    pub bookmarks: Vec<String>,
    pub database: Option<String>,
    pub imp_user: Option<String>,
}

/// Statement summary reported in the final PULL or DISCARD SUCCESS.
#[derive(Debug, Clone, Default)]
pub struct QuerySummary {
    pub query_type: QueryType,
    pub stats: QueryStats,
    pub notifications: Vec<Notification>,
    pub plan: Option<QueryPlan>,
    pub database: Option<String>,
}

// ============================================================================
// Errors
// ============================================================================

/// Failures surfaced by the query engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("{0}")]
    Syntax(String),

    #[error("{0}")]
    Semantic(String),

    #[error("{0}")]
    Type(String),

    #[error("Expected parameter(s): {0}")]
    ParameterMissing(String),

    #[error("{0}")]
    ConstraintViolation(String),

    #[error("{0}")]
    IndexNotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    CredentialsExpired(String),

    #[error("{0}")]
    DatabaseNotFound(String),

    #[error("{0}")]
    InvalidBookmark(String),

    /// A lock wait was interrupted by termination
    #[error("{0}")]
    LockClientStopped(String),

    #[error("{0}")]
    Terminated(String),

    #[error("{0}")]
    Timeout(String),

    #[error("{0}")]
    Deadlock(String),

    #[error("{0}")]
    Unavailable(String),

    #[error(transparent)]
    Request(#[from] RequestError),

    #[error("{message}")]
    Other { code: String, message: String },
}

impl ExecutionError {
    /// Reported when RESET or a closing connection interrupts work that did
    /// not notice the termination itself.
    pub fn terminated() -> Self {
        ExecutionError::Terminated(
            "The transaction has been terminated. Retry your operation in a new transaction."
                .to_string(),
        )
    }

    pub fn code(&self) -> &str {
        match self {
            ExecutionError::Syntax(_) => BoltErrorCode::SYNTAX_ERROR,
            ExecutionError::Semantic(_) => BoltErrorCode::SEMANTIC_ERROR,
            ExecutionError::Type(_) => BoltErrorCode::TYPE_ERROR,
            ExecutionError::ParameterMissing(_) => BoltErrorCode::PARAMETER_MISSING,
            ExecutionError::ConstraintViolation(_) => BoltErrorCode::CONSTRAINT_VIOLATION,
            ExecutionError::IndexNotFound(_) => BoltErrorCode::INDEX_NOT_FOUND,
            ExecutionError::Forbidden(_) => BoltErrorCode::FORBIDDEN,
            ExecutionError::CredentialsExpired(_) => BoltErrorCode::CREDENTIALS_EXPIRED,
            ExecutionError::DatabaseNotFound(_) => BoltErrorCode::DATABASE_NOT_FOUND,
            ExecutionError::InvalidBookmark(_) => BoltErrorCode::INVALID_BOOKMARK,
            ExecutionError::LockClientStopped(_) => BoltErrorCode::LOCK_CLIENT_STOPPED,
            ExecutionError::Terminated(_) => BoltErrorCode::TERMINATED,
            ExecutionError::Timeout(_) => BoltErrorCode::TRANSACTION_TIMEOUT,
            ExecutionError::Deadlock(_) => BoltErrorCode::DEADLOCK_DETECTED,
            ExecutionError::Unavailable(_) => BoltErrorCode::DATABASE_UNAVAILABLE,
            ExecutionError::Request(e) => e.code,
            ExecutionError::Other { code, .. } => code,
        }
    }

    pub fn to_failure(&self) -> FailureMessage {
        FailureMessage::new(self.code(), &self.to_string())
    }
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    /// The outbound channel went away while records were being sent
    #[error("connection closed while streaming records")]
    Closed,
}

impl From<RequestError> for DispatchError {
    fn from(err: RequestError) -> Self {
        DispatchError::Execution(err.into())
    }
}

// ============================================================================
// ResponseSink
// ============================================================================

/// Where streamed records go.
pub trait ResponseSink: Send {
    fn record(
        &mut self,
        fields: Vec<PackStreamValue>,
    ) -> impl Future<Output = Result<(), DispatchError>> + Send;
}

impl ResponseSink for mpsc::Sender<Outbound> {
    fn record(
        &mut self,
        fields: Vec<PackStreamValue>,
    ) -> impl Future<Output = Result<(), DispatchError>> + Send {
        async move {
            self.send(Outbound::Response(BoltResponse::Record(RecordMessage::new(fields))))
                .await
                .map_err(|_| DispatchError::Closed)
        }
    }
}

impl ResponseSink for Vec<Vec<PackStreamValue>> {
    fn record(
        &mut self,
        fields: Vec<PackStreamValue>,
    ) -> impl Future<Output = Result<(), DispatchError>> + Send {
        self.push(fields);
        std::future::ready(Ok(()))
    }
}

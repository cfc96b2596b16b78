//! Per-connection request dispatch.

use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{
    BoltTransaction, DispatchError, GraphDatabase, ResponseSink, ResultCursor, RouteRequest,
    TransactionRequest,
};
use crate::bolt::error::RequestError;
use crate::bolt::message::{
    DiscardMessage, PullMessage, RouteMessage, RunMessage, SuccessMessage, TxOptions,
};
use crate::bolt::packstream::PackStreamValue;

/// Largest batch requested from a cursor at a time.
const FETCH_BATCH: usize = 1000;

struct OpenTransaction {
    tx: Box<dyn BoltTransaction>,
    explicit: bool,
    database: Option<String>,
}

struct OpenResult {
    qid: i64,
    cursor: Box<dyn ResultCursor>,
}

/// Routes requests of one connection to the query engine.
///
/// Owns the open transaction and the results that have not been fully
/// consumed. Explicit transactions number their results from 0; an
/// auto-commit RUN opens an implicit transaction that commits once its
/// result is exhausted.
pub struct Dispatcher {
    database: Arc<dyn GraphDatabase>,
    principal: Option<String>,
    transaction: Option<OpenTransaction>,
    results: Vec<OpenResult>,
    next_qid: i64,
    last_bookmark: Option<String>,
}

impl Dispatcher {
    pub fn new(database: Arc<dyn GraphDatabase>) -> Self {
        Self {
            database,
            principal: None,
            transaction: None,
            results: Vec::new(),
            next_qid: 0,
            last_bookmark: None,
        }
    }

    pub fn set_principal(&mut self, principal: Option<String>) {
        self.principal = principal;
    }

    pub fn in_explicit_transaction(&self) -> bool {
        self.transaction.as_ref().is_some_and(|t| t.explicit)
    }

    pub fn has_open_results(&self) -> bool {
        !self.results.is_empty()
    }

    pub fn last_bookmark(&self) -> Option<&str> {
        self.last_bookmark.as_deref()
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    pub async fn begin(
        &mut self,
        options: &TxOptions,
        termination: CancellationToken,
    ) -> Result<SuccessMessage, DispatchError> {
        if self.transaction.is_some() {
            return Err(RequestError::invalid("A transaction is already open").into());
        }
        let request =
            TransactionRequest::from_options(options, self.principal.clone(), true, termination);
        let tx = self.database.begin(request).await?;
        self.transaction = Some(OpenTransaction {
            tx,
            explicit: true,
            database: options.database.clone(),
        });
        self.next_qid = 0;
        Ok(SuccessMessage::new())
    }

    pub async fn commit(&mut self) -> Result<SuccessMessage, DispatchError> {
        let mut open = self.take_explicit("COMMIT")?;
        self.results.clear();
        let bookmark = open.tx.commit().await?;
        let mut success = SuccessMessage::new();
        if let Some(bookmark) = bookmark {
            success.add("bookmark", bookmark.as_str());
            self.last_bookmark = Some(bookmark);
        }
        Ok(success)
    }

    pub async fn rollback(&mut self) -> Result<SuccessMessage, DispatchError> {
        let mut open = self.take_explicit("ROLLBACK")?;
        self.results.clear();
        open.tx.rollback().await?;
        Ok(SuccessMessage::new())
    }

    fn take_explicit(&mut self, message: &str) -> Result<OpenTransaction, RequestError> {
        match self.transaction.take() {
            Some(open) if open.explicit => Ok(open),
            other => {
                self.transaction = other;
                Err(RequestError::invalid(format!(
                    "{} is only allowed inside an explicit transaction",
                    message
                )))
            }
        }
    }

    /// Drops open results and rolls back whatever transaction is open.
    pub async fn reset(&mut self) {
        self.results.clear();
        self.next_qid = 0;
        if let Some(mut open) = self.transaction.take() {
            if let Err(e) = open.tx.rollback().await {
                debug!(error = %e, "rollback during reset failed");
            }
        }
    }

    // ========================================================================
    // Statements
    // ========================================================================

    pub async fn run(
        &mut self,
        run: RunMessage,
        termination: CancellationToken,
    ) -> Result<SuccessMessage, DispatchError> {
        let started = Instant::now();

        if self.in_explicit_transaction() {
            let open = self
                .transaction
                .as_mut()
                .ok_or_else(|| RequestError::invalid("No open transaction"))?;
            let cursor = open.tx.run(&run.query, run.parameters).await?;
            let qid = self.next_qid;
            self.next_qid += 1;
            let success = SuccessMessage::run_success(&cursor.fields(), elapsed_ms(started), Some(qid));
            self.results.push(OpenResult { qid, cursor });
            return Ok(success);
        }

        if self.transaction.is_some() || !self.results.is_empty() {
            return Err(RequestError::invalid(
                "The previous result must be consumed before running another statement",
            )
            .into());
        }

        let request =
            TransactionRequest::from_options(&run.options, self.principal.clone(), false, termination);
        let mut tx = self.database.begin(request).await?;
        let cursor = match tx.run(&run.query, run.parameters).await {
            Ok(cursor) => cursor,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    debug!(error = %rollback, "rollback after failed RUN failed");
                }
                return Err(e.into());
            }
        };
        let success = SuccessMessage::run_success(&cursor.fields(), elapsed_ms(started), None);
        self.transaction = Some(OpenTransaction {
            tx,
            explicit: false,
            database: run.options.database.clone(),
        });
        self.results.push(OpenResult { qid: -1, cursor });
        Ok(success)
    }

    /// Answers a statement the server handles itself, such as a password
    /// change, with an already materialized result.
    pub fn open_local(
        &mut self,
        cursor: Box<dyn ResultCursor>,
    ) -> Result<SuccessMessage, DispatchError> {
        if !self.results.is_empty() && !self.in_explicit_transaction() {
            return Err(RequestError::invalid(
                "The previous result must be consumed before running another statement",
            )
            .into());
        }
        let qid = if self.in_explicit_transaction() {
            let qid = self.next_qid;
            self.next_qid += 1;
            Some(qid)
        } else {
            None
        };
        let success = SuccessMessage::run_success(&cursor.fields(), 0, qid);
        self.results.push(OpenResult {
            qid: qid.unwrap_or(-1),
            cursor,
        });
        Ok(success)
    }

    pub async fn pull<S: ResponseSink>(
        &mut self,
        pull: PullMessage,
        sink: &mut S,
    ) -> Result<SuccessMessage, DispatchError> {
        let started = Instant::now();
        let index = self.find(pull.qid)?;
        let cursor = &mut self.results[index].cursor;

        let mut remaining = limit(pull.n);
        while remaining > 0 {
            let batch = cursor.fetch(remaining.min(FETCH_BATCH)).await?;
            if batch.is_empty() {
                break;
            }
            remaining = remaining.saturating_sub(batch.len());
            for record in batch {
                sink.record(record).await?;
            }
            if !cursor.has_more() {
                break;
            }
        }

        if cursor.has_more() {
            return Ok(SuccessMessage::new().with("has_more", true));
        }
        self.finish(index, started).await
    }

    pub async fn discard(&mut self, discard: DiscardMessage) -> Result<SuccessMessage, DispatchError> {
        let started = Instant::now();
        let index = self.find(discard.qid)?;
        let cursor = &mut self.results[index].cursor;

        let mut remaining = limit(discard.n);
        while remaining > 0 && cursor.has_more() {
            let batch = cursor.fetch(remaining.min(FETCH_BATCH)).await?;
            if batch.is_empty() {
                break;
            }
            remaining = remaining.saturating_sub(batch.len());
        }

        if cursor.has_more() {
            return Ok(SuccessMessage::new().with("has_more", true));
        }
        self.finish(index, started).await
    }

    fn find(&self, qid: i64) -> Result<usize, RequestError> {
        let found = if qid == -1 {
            self.results.len().checked_sub(1)
        } else {
            self.results.iter().position(|r| r.qid == qid)
        };
        found.ok_or_else(|| {
            if qid == -1 {
                RequestError::invalid("No open result to consume")
            } else {
                RequestError::invalid(format!("Result with qid {} is not open", qid))
            }
        })
    }

    /// Builds the final SUCCESS of an exhausted result and commits an
    /// auto-commit transaction.
    async fn finish(&mut self, index: usize, started: Instant) -> Result<SuccessMessage, DispatchError> {
        let result = self.results.remove(index);
        let summary = result.cursor.summary();

        let mut success = SuccessMessage::new()
            .with("t_last", elapsed_ms(started))
            .with("type", summary.query_type.as_str());
        if summary.stats.has_updates() {
            success.add("stats", summary.stats.to_map());
        }
        if !summary.notifications.is_empty() {
            let notifications: Vec<PackStreamValue> = summary
                .notifications
                .iter()
                .map(|n| PackStreamValue::Map(n.to_map()))
                .collect();
            success.add("notifications", notifications);
        }
        if let Some(plan) = &summary.plan {
            success.add(plan.metadata_key(), plan.to_map());
        }
        let database = summary
            .database
            .clone()
            .or_else(|| self.transaction.as_ref().and_then(|t| t.database.clone()));
        if let Some(db) = database {
            success.add("db", db);
        }

        if self.transaction.as_ref().is_some_and(|t| !t.explicit) {
            if let Some(mut open) = self.transaction.take() {
                if let Some(bookmark) = open.tx.commit().await? {
                    success.add("bookmark", bookmark.as_str());
                    self.last_bookmark = Some(bookmark);
                }
            }
        }
        Ok(success)
    }

    // ========================================================================
    // Routing
    // ========================================================================

    pub async fn route(&mut self, route: RouteMessage) -> Result<SuccessMessage, DispatchError> {
        let table = self
            .database
            .route(RouteRequest {
                routing: route.routing,
                bookmarks: route.bookmarks,
                database: route.database,
                imp_user: route.imp_user,
            })
            .await?;
        Ok(SuccessMessage::new().with("rt", table.to_map()))
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("principal", &self.principal)
            .field("explicit", &self.in_explicit_transaction())
            .field("open_results", &self.results.len())
            .finish_non_exhaustive()
    }
}

fn limit(n: i64) -> usize {
    if n < 0 {
        usize::MAX
    } else {
        n as usize
    }
}

fn elapsed_ms(started: Instant) -> i64 {
    started.elapsed().as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bolt::message::{QueryStats, QueryType, RoutingTable, ServerRole};
    use crate::dispatch::{ExecutionError, QuerySummary, StaticCursor};
    use futures::future::BoxFuture;
    use futures::FutureExt;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    #[derive(Default)]
    struct Log {
        begun: Vec<bool>,
        committed: usize,
        rolled_back: usize,
    }

    struct FakeDatabase {
        log: Arc<Mutex<Log>>,
    }

    struct FakeTransaction {
        log: Arc<Mutex<Log>>,
    }

    impl GraphDatabase for FakeDatabase {
        fn begin(
            &self,
            request: TransactionRequest,
        ) -> BoxFuture<'_, Result<Box<dyn BoltTransaction>, ExecutionError>> {
            self.log.lock().begun.push(request.explicit);
            let tx: Box<dyn BoltTransaction> = Box::new(FakeTransaction {
                log: self.log.clone(),
            });
            futures::future::ready(Ok(tx)).boxed()
        }

        fn route(&self, request: RouteRequest) -> BoxFuture<'_, Result<RoutingTable, ExecutionError>> {
            let mut table = RoutingTable::new(request.database.as_deref().unwrap_or("neo4j"), 300);
            table.add_server(ServerRole::Route, vec!["localhost:7687".to_string()]);
            futures::future::ready(Ok(table)).boxed()
        }
    }

    impl BoltTransaction for FakeTransaction {
        fn run<'a>(
            &'a mut self,
            query: &'a str,
            _parameters: HashMap<String, PackStreamValue>,
        ) -> BoxFuture<'a, Result<Box<dyn ResultCursor>, ExecutionError>> {
            let result: Result<Box<dyn ResultCursor>, ExecutionError> = match query {
                "UNWIND range(1, 3) AS n RETURN n" => Ok(Box::new(StaticCursor::new(
                    vec!["n".to_string()],
                    (1..=3).map(|n| vec![PackStreamValue::Integer(n)]).collect(),
                ))),
                "CREATE ()" => {
                    let mut stats = QueryStats::new();
                    stats.nodes_created = 1;
                    Ok(Box::new(StaticCursor::empty().with_summary(QuerySummary {
                        query_type: QueryType::Write,
                        stats,
                        ..QuerySummary::default()
                    })))
                }
                _ => Err(ExecutionError::Syntax("Invalid input".to_string())),
            };
            futures::future::ready(result).boxed()
        }

        fn commit(&mut self) -> BoxFuture<'_, Result<Option<String>, ExecutionError>> {
            let mut log = self.log.lock();
            log.committed += 1;
            let bookmark = format!("bm:{}", log.committed);
            futures::future::ready(Ok(Some(bookmark))).boxed()
        }

        fn rollback(&mut self) -> BoxFuture<'_, Result<(), ExecutionError>> {
            self.log.lock().rolled_back += 1;
            futures::future::ready(Ok(())).boxed()
        }
    }

    fn dispatcher() -> (Dispatcher, Arc<Mutex<Log>>) {
        let log = Arc::new(Mutex::new(Log::default()));
        let db = Arc::new(FakeDatabase { log: log.clone() });
        (Dispatcher::new(db), log)
    }

    fn run(query: &str) -> RunMessage {
        RunMessage {
            query: query.to_string(),
            parameters: HashMap::new(),
            options: TxOptions::default(),
        }
    }

    fn pull(n: i64, qid: i64) -> PullMessage {
        PullMessage { n, qid }
    }

    #[tokio::test]
    async fn test_auto_commit_run_and_pull() {
        let (mut dispatcher, log) = dispatcher();
        let success = dispatcher
            .run(run("UNWIND range(1, 3) AS n RETURN n"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(success.fields(), Some(vec!["n".to_string()]));
        assert!(success.qid().is_none());
        assert!(success.get("t_first").is_some());

        let mut records = Vec::new();
        let partial = dispatcher.pull(pull(2, -1), &mut records).await.unwrap();
        assert!(partial.has_more());
        assert_eq!(records.len(), 2);

        let done = dispatcher.pull(pull(-1, -1), &mut records).await.unwrap();
        assert!(!done.has_more());
        assert_eq!(records.len(), 3);
        assert_eq!(done.bookmark(), Some("bm:1"));
        assert_eq!(done.get("type").and_then(|v| v.as_str()), Some("r"));
        assert!(done.get("stats").is_none());
        assert_eq!(log.lock().begun, vec![false]);
        assert!(!dispatcher.has_open_results());
    }

    #[tokio::test]
    async fn test_stats_do_not_leak_into_next_statement() {
        let (mut dispatcher, _) = dispatcher();
        let mut records = Vec::new();

        dispatcher.run(run("CREATE ()"), CancellationToken::new()).await.unwrap();
        let first = dispatcher.pull(pull(-1, -1), &mut records).await.unwrap();
        assert!(first.get("stats").is_some());

        dispatcher
            .run(run("UNWIND range(1, 3) AS n RETURN n"), CancellationToken::new())
            .await
            .unwrap();
        let second = dispatcher.pull(pull(-1, -1), &mut records).await.unwrap();
        assert!(second.get("stats").is_none());
    }

    #[tokio::test]
    async fn test_explicit_transaction_qids() {
        let (mut dispatcher, log) = dispatcher();
        dispatcher
            .begin(&TxOptions::default(), CancellationToken::new())
            .await
            .unwrap();
        let first = dispatcher
            .run(run("UNWIND range(1, 3) AS n RETURN n"), CancellationToken::new())
            .await
            .unwrap();
        let second = dispatcher
            .run(run("UNWIND range(1, 3) AS n RETURN n"), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(first.qid(), Some(0));
        assert_eq!(second.qid(), Some(1));

        let mut records = Vec::new();
        let done = dispatcher.pull(pull(-1, 0), &mut records).await.unwrap();
        assert!(done.bookmark().is_none());
        assert!(dispatcher.has_open_results());

        dispatcher.discard(DiscardMessage { n: -1, qid: -1 }).await.unwrap();
        assert!(!dispatcher.has_open_results());

        let committed = dispatcher.commit().await.unwrap();
        assert_eq!(committed.bookmark(), Some("bm:1"));
        assert_eq!(dispatcher.last_bookmark(), Some("bm:1"));
        assert_eq!(log.lock().begun, vec![true]);
    }

    #[tokio::test]
    async fn test_failed_run_rolls_back_implicit_transaction() {
        let (mut dispatcher, log) = dispatcher();
        let err = dispatcher
            .run(run("RETURN"), CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            DispatchError::Execution(e) => {
                assert_eq!(e.code(), "Neo.ClientError.Statement.SyntaxError")
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(log.lock().rolled_back, 1);
        assert!(!dispatcher.has_open_results());
    }

    #[tokio::test]
    async fn test_commit_outside_transaction() {
        let (mut dispatcher, _) = dispatcher();
        assert!(matches!(
            dispatcher.commit().await,
            Err(DispatchError::Execution(ExecutionError::Request(_)))
        ));
    }

    #[tokio::test]
    async fn test_reset_rolls_back() {
        let (mut dispatcher, log) = dispatcher();
        dispatcher
            .begin(&TxOptions::default(), CancellationToken::new())
            .await
            .unwrap();
        dispatcher
            .run(run("UNWIND range(1, 3) AS n RETURN n"), CancellationToken::new())
            .await
            .unwrap();
        dispatcher.reset().await;
        assert!(!dispatcher.in_explicit_transaction());
        assert!(!dispatcher.has_open_results());
        assert_eq!(log.lock().rolled_back, 1);
    }

    #[tokio::test]
    async fn test_open_local() {
        let (mut dispatcher, _) = dispatcher();
        let success = dispatcher.open_local(Box::new(StaticCursor::empty())).unwrap();
        assert_eq!(success.fields(), Some(vec![]));
        let mut records = Vec::new();
        let done = dispatcher.pull(pull(-1, -1), &mut records).await.unwrap();
        assert!(records.is_empty());
        assert!(done.bookmark().is_none());
    }

    #[tokio::test]
    async fn test_route() {
        let (mut dispatcher, _) = dispatcher();
        let success = dispatcher
            .route(RouteMessage {
                routing: HashMap::new(),
                bookmarks: vec![],
                database: Some("movies".to_string()),
                imp_user: None,
            })
            .await
            .unwrap();
        let rt = success.get("rt").and_then(|v| v.as_map()).unwrap();
        assert_eq!(rt.get("db").and_then(|v| v.as_str()), Some("movies"));
    }
}

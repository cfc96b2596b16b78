use std::collections::VecDeque;

use futures::future::BoxFuture;
use futures::FutureExt;

use super::{ExecutionError, QuerySummary, ResultCursor};
use crate::bolt::packstream::PackStreamValue;

/// Cursor over records that are already materialized.
///
/// Used for results the server produces itself, such as the empty result
/// of a password change.
#[derive(Debug, Clone, Default)]
pub struct StaticCursor {
    fields: Vec<String>,
    rows: VecDeque<Vec<PackStreamValue>>,
    summary: QuerySummary,
}

impl StaticCursor {
    pub fn new(fields: Vec<String>, rows: Vec<Vec<PackStreamValue>>) -> Self {
        Self {
            fields,
            rows: rows.into(),
            summary: QuerySummary::default(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_summary(mut self, summary: QuerySummary) -> Self {
        self.summary = summary;
        self
    }
}

impl ResultCursor for StaticCursor {
    fn fields(&self) -> Vec<String> {
        self.fields.clone()
    }

    fn fetch(&mut self, n: usize) -> BoxFuture<'_, Result<Vec<Vec<PackStreamValue>>, ExecutionError>> {
        let take = n.min(self.rows.len());
        let batch = self.rows.drain(..take).collect();
        futures::future::ready(Ok(batch)).boxed()
    }

    fn has_more(&self) -> bool {
        !self.rows.is_empty()
    }

    fn summary(&self) -> QuerySummary {
        self.summary.clone()
    }
}

//! Drains a paged query into one ordered sequence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::storage::store::{RowQuery, StoreError, TableRow, TableStore};

/// Cooperative cancellation for long drains. Once set, the pager skips the
/// next page fetch and returns what it has accumulated so far.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Fetches every page of `query` and concatenates the rows in store order.
/// No deduplication happens here; callers that need it key on row identity.
pub async fn drain_query(
    store: &dyn TableStore,
    table: &str,
    query: &RowQuery,
    cancel: &CancelFlag,
) -> Result<Vec<TableRow>, StoreError> {
    let mut rows = Vec::new();
    let mut continuation = None;
    loop {
        let page = store.query_page(table, query, continuation).await?;
        rows.extend(page.rows);
        continuation = page.continuation;
        if continuation.is_none() || cancel.is_cancelled() {
            break;
        }
    }
    Ok(rows)
}

/// [`drain_query`] without a cancellation hook.
pub async fn drain_all(
    store: &dyn TableStore,
    table: &str,
    query: &RowQuery,
) -> Result<Vec<TableRow>, StoreError> {
    drain_query(store, table, query, &CancelFlag::new()).await
}

//! # Change Feed & Live Queries
//!
//! Every committed write publishes a [`ChangeEvent`] on the database's
//! [`ChangeFeed`]. Collection reads are offered as [`LiveQuery`] streams that
//! re-run their query whenever the table they read from changes.
//!
//! ## Live Query Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  watch_all()                                                            │
//! │     │                                                                   │
//! │     ├── subscribe to feed (before first query, so nothing is missed)   │
//! │     ├── run query ──► emit snapshot #1                                 │
//! │     │                                                                   │
//! │     │   ... INSERT INTO items ... COMMIT ──► ChangeEvent(items)        │
//! │     │                                                                   │
//! │     ├── run query ──► emit snapshot #2                                 │
//! │     │                                                                   │
//! │     │   ... ChangeEvent(staff) ──► ignored (other table)               │
//! │     │                                                                   │
//! │     └── feed closed (database dropped) ──► stream ends                 │
//! │                                                                         │
//! │  Dropping the stream unsubscribes. Calling watch_all() again restarts. │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A lagging subscriber (more than [`FEED_CAPACITY`] unread events) simply
//! re-queries; snapshots are always complete so no event needs replaying.

use std::future::Future;

use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::trace;

use crate::error::DbResult;

/// Buffered events per subscriber.
pub const FEED_CAPACITY: usize = 256;

/// Tables that publish change events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    Items,
    Staff,
    CheckoutLogs,
    PendingOperations,
    FailedOperations,
}

/// What happened to the rows of a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One committed change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
}

impl ChangeEvent {
    pub fn new(table: Table, kind: ChangeKind) -> Self {
        ChangeEvent { table, kind }
    }

    /// A new row in the outbox.
    pub fn is_enqueue(&self) -> bool {
        self.table == Table::PendingOperations && self.kind == ChangeKind::Insert
    }
}

/// Continuously updated query result.
pub type LiveQuery<T> = BoxStream<'static, DbResult<T>>;

/// Broadcast hub for committed changes.
#[derive(Debug, Clone)]
pub struct ChangeFeed {
    tx: broadcast::Sender<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(FEED_CAPACITY);
        ChangeFeed { tx }
    }

    /// Publishes events after a commit. No subscribers is not an error.
    pub fn publish(&self, events: &[ChangeEvent]) {
        for event in events {
            trace!(?event, "Publishing change");
            let _ = self.tx.send(*event);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    /// Builds a live query over `table`.
    ///
    /// `query` is invoked once immediately and again after every change to
    /// `table`.
    pub fn live<T, F, Fut>(&self, table: Table, query: F) -> LiveQuery<T>
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DbResult<T>> + Send + 'static,
    {
        let rx = self.subscribe();

        stream::unfold((rx, query, true), move |(mut rx, query, first)| async move {
            if !first && !wait_for_change(&mut rx, table).await {
                return None;
            }
            let snapshot = query().await;
            Some((snapshot, (rx, query, false)))
        })
        .boxed()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

/// Waits for the next event touching `table`. Returns false once the feed
/// is closed.
async fn wait_for_change(rx: &mut broadcast::Receiver<ChangeEvent>, table: Table) -> bool {
    loop {
        match rx.recv().await {
            Ok(event) if event.table == table => return true,
            Ok(_) => continue,
            Err(RecvError::Lagged(skipped)) => {
                trace!(skipped, "Live query lagged, re-querying");
                return true;
            }
            Err(RecvError::Closed) => return false,
        }
    }
}

//! # Repository Module
//!
//! Repository pattern implementations for data access.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Repository Pattern                                  │
//! │                                                                         │
//! │  Caller (UI layer / sync manager)                                      │
//! │       │                                                                 │
//! │       │  db.items().update(&item)                                      │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │              ItemRepository / StaffRepository / ...             │   │
//! │  │                                                                 │   │
//! │  │  BEGIN                                                          │   │
//! │  │    UPDATE items SET ... WHERE id = ?                            │   │
//! │  │    INSERT INTO pending_operations (.., 'UPDATE', ..)            │   │
//! │  │  COMMIT ──► ChangeFeed: items Update, pending_operations Insert │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite                                                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every mutating repository call enqueues exactly one pending operation per
//! entity it writes. Nothing is coalesced: three edits queue three operations.

pub mod checkout_log;
pub mod item;
pub mod pending;
pub mod staff;

use sqlx::{Sqlite, SqliteConnection, SqlitePool, Transaction};
use stockroom_core::{
    now_millis, EntityType, EpochMillis, OperationKind, PendingOperation, RemoteRecord,
};
use tracing::debug;

use crate::changes::{ChangeEvent, ChangeKind, Table};
use crate::error::DbResult;
use crate::pool::Database;

/// Opens a transaction that holds the SQLite write lock from the start.
///
/// A deferred transaction whose first statement is a read pins a WAL
/// snapshot; if another connection commits before its first write, that
/// write fails with `SQLITE_BUSY_SNAPSHOT` and `busy_timeout` cannot help.
/// `BEGIN IMMEDIATE` waits for the lock up front instead.
pub(crate) async fn begin_write(pool: &SqlitePool) -> DbResult<Transaction<'static, Sqlite>> {
    Ok(pool.begin_with("BEGIN IMMEDIATE").await?)
}

/// Inserts a pending operation on an open transaction.
///
/// `created_at` is strictly increasing across the queue: when the clock has
/// not advanced past the newest queued operation, the new one is stamped one
/// millisecond later. Replay order therefore always equals enqueue order.
///
/// The transaction must already hold the write lock when the newest
/// timestamp is read: either an entity write ran first, or it was opened
/// with [`begin_write`].
pub(crate) async fn enqueue_on(
    conn: &mut SqliteConnection,
    entity_type: EntityType,
    entity_id: &str,
    operation: OperationKind,
) -> DbResult<PendingOperation> {
    let now = now_millis();
    let newest: Option<EpochMillis> =
        sqlx::query_scalar("SELECT MAX(created_at) FROM pending_operations")
            .fetch_one(&mut *conn)
            .await?;

    let created_at = match newest {
        Some(newest) if newest >= now => newest + 1,
        _ => now,
    };

    let op = PendingOperation::new(entity_type, entity_id, operation, created_at);
    insert_pending(conn, &op).await?;

    debug!(
        op_id = %op.id,
        entity_type = %op.entity_type,
        entity_id = %op.entity_id,
        operation = %op.operation,
        created_at = op.created_at,
        "Enqueued pending operation"
    );

    Ok(op)
}

/// Writes `op` as-is.
pub(crate) async fn insert_pending(conn: &mut SqliteConnection, op: &PendingOperation) -> DbResult<()> {
    sqlx::query(
        r#"
        INSERT INTO pending_operations (
            id, entity_type, entity_id, operation, created_at, retry_count, last_error
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(&op.id)
    .bind(op.entity_type)
    .bind(&op.entity_id)
    .bind(op.operation)
    .bind(op.created_at)
    .bind(op.retry_count)
    .bind(&op.last_error)
    .execute(conn)
    .await?;

    Ok(())
}

/// Events published after a mutation of `table` that also enqueued.
pub(crate) fn mutation_events(table: Table, kind: ChangeKind) -> [ChangeEvent; 2] {
    [
        ChangeEvent::new(table, kind),
        ChangeEvent::new(Table::PendingOperations, ChangeKind::Insert),
    ]
}

// =============================================================================
// Type-dispatched access for the sync layer
// =============================================================================

impl Database {
    /// Loads the current local copy of an entity as a remote record.
    pub async fn load_record(
        &self,
        entity_type: EntityType,
        id: &str,
    ) -> DbResult<Option<RemoteRecord>> {
        let record = match entity_type {
            EntityType::Item => self.items().get_by_id(id).await?.map(RemoteRecord::from),
            EntityType::Staff => self.staff().get_by_id(id).await?.map(RemoteRecord::from),
            EntityType::CheckoutLog => self
                .checkout_logs()
                .get_by_id(id)
                .await?
                .map(RemoteRecord::from),
        };
        Ok(record)
    }

    /// Stamps `last_sync_timestamp` on an entity whose `last_modified` is
    /// still `version`. Returns false when the entity is gone or was edited
    /// after that version was read.
    pub async fn mark_synced(
        &self,
        entity_type: EntityType,
        id: &str,
        version: EpochMillis,
        at: EpochMillis,
    ) -> DbResult<bool> {
        match entity_type {
            EntityType::Item => self.items().mark_synced(id, version, at).await,
            EntityType::Staff => self.staff().mark_synced(id, version, at).await,
            EntityType::CheckoutLog => self.checkout_logs().mark_synced(id, version, at).await,
        }
    }

    /// Applies a record fetched from the remote store without enqueueing.
    ///
    /// Returns `true` when the local copy was created or replaced.
    pub async fn apply_remote(&self, record: RemoteRecord, synced_at: EpochMillis) -> DbResult<bool> {
        record.validate()?;
        match record {
            RemoteRecord::Item(item) => self.items().apply_remote(&item, synced_at).await,
            RemoteRecord::Staff(staff) => self.staff().apply_remote(&staff, synced_at).await,
            RemoteRecord::CheckoutLog(log) => {
                self.checkout_logs().apply_remote(&log, synced_at).await
            }
        }
    }
}

//! # Pending Operation Repository
//!
//! The durable outbox of local mutations awaiting remote confirmation.
//!
//! ## Operation Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Pending Operation Lifecycle                          │
//! │                                                                         │
//! │  repository write ──► enqueue (retry_count = 0)                        │
//! │                             │                                           │
//! │                             ▼                                           │
//! │                    ┌─────────────────┐   replay ok                     │
//! │                    │ pending_operations├─────────────► remove          │
//! │                    └────────┬────────┘                                 │
//! │                             │ replay failed                            │
//! │                             ▼                                           │
//! │                    increment_retry(id, error)                           │
//! │                             │                                           │
//! │                             │ retry_count >= max_retries               │
//! │                             ▼                                           │
//! │                    skipped by every drain                               │
//! │                             │                                           │
//! │                             │ purge_exceeding(max_retries)             │
//! │                             ▼                                           │
//! │                    ┌─────────────────┐                                 │
//! │                    │failed_operations│  kept for audit until           │
//! │                    └─────────────────┘  clear_failed()                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ordering
//! `list_all` returns operations by `created_at` ascending, ties broken by
//! insertion order (SQLite rowid). Repository writes additionally stamp
//! strictly increasing `created_at` values, so ties only arise from
//! operations enqueued directly with an explicit timestamp.

use sqlx::SqlitePool;
use stockroom_core::{now_millis, EntityType, FailedOperation, OperationKind, PendingOperation};
use tracing::{debug, info, warn};

use super::{begin_write, enqueue_on, insert_pending};
use crate::changes::{ChangeEvent, ChangeFeed, ChangeKind, LiveQuery, Table};
use crate::error::{DbError, DbResult};

const PENDING_COLUMNS: &str =
    "id, entity_type, entity_id, operation, created_at, retry_count, last_error";

/// Repository for the pending operation queue.
#[derive(Debug, Clone)]
pub struct PendingOperationRepository {
    pool: SqlitePool,
    feed: ChangeFeed,
}

impl PendingOperationRepository {
    /// Creates a new PendingOperationRepository.
    pub fn new(pool: SqlitePool, feed: ChangeFeed) -> Self {
        PendingOperationRepository { pool, feed }
    }

    /// Queues `op` exactly as given.
    ///
    /// ## Errors
    /// `DbError::UniqueViolation` if an operation with the same
    /// `(entity_type, entity_id, created_at)` is already queued.
    pub async fn enqueue(&self, op: &PendingOperation) -> DbResult<()> {
        let mut conn = self.pool.acquire().await?;
        insert_pending(&mut *conn, op).await?;

        self.feed
            .publish(&[ChangeEvent::new(Table::PendingOperations, ChangeKind::Insert)]);
        debug!(
            op_id = %op.id,
            entity_type = %op.entity_type,
            entity_id = %op.entity_id,
            operation = %op.operation,
            "Operation queued"
        );
        Ok(())
    }

    /// Queues a new operation stamped with the next queue timestamp.
    pub async fn enqueue_now(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        operation: OperationKind,
    ) -> DbResult<PendingOperation> {
        let mut tx = begin_write(&self.pool).await?;
        let op = enqueue_on(&mut *tx, entity_type, entity_id, operation).await?;
        tx.commit().await?;

        self.feed
            .publish(&[ChangeEvent::new(Table::PendingOperations, ChangeKind::Insert)]);
        Ok(op)
    }

    /// All queued operations in replay order.
    pub async fn list_all(&self) -> DbResult<Vec<PendingOperation>> {
        let sql = format!(
            "SELECT {PENDING_COLUMNS} FROM pending_operations ORDER BY created_at ASC, rowid ASC"
        );
        let ops = sqlx::query_as::<_, PendingOperation>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(ops)
    }

    /// Live view of the queue, in replay order.
    pub fn watch_all(&self) -> LiveQuery<Vec<PendingOperation>> {
        let repo = self.clone();
        self.feed.live(Table::PendingOperations, move || {
            let repo = repo.clone();
            async move { repo.list_all().await }
        })
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<PendingOperation>> {
        let sql = format!("SELECT {PENDING_COLUMNS} FROM pending_operations WHERE id = ?1");
        let op = sqlx::query_as::<_, PendingOperation>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(op)
    }

    /// Removes a confirmed operation. Returns false if it was already gone.
    pub async fn remove(&self, id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM pending_operations WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        let removed = result.rows_affected() > 0;
        if removed {
            self.feed
                .publish(&[ChangeEvent::new(Table::PendingOperations, ChangeKind::Delete)]);
        }
        Ok(removed)
    }

    /// Records a failed replay attempt and returns the new retry count.
    pub async fn increment_retry(&self, id: &str, error: &str) -> DbResult<i64> {
        let retry_count: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE pending_operations
            SET retry_count = retry_count + 1, last_error = ?2
            WHERE id = ?1
            RETURNING retry_count
            "#,
        )
        .bind(id)
        .bind(error)
        .fetch_optional(&self.pool)
        .await?;

        let retry_count = retry_count.ok_or_else(|| DbError::not_found("PendingOperation", id))?;

        self.feed
            .publish(&[ChangeEvent::new(Table::PendingOperations, ChangeKind::Update)]);
        debug!(op_id = %id, retry_count, error = %error, "Replay attempt failed");

        Ok(retry_count)
    }

    /// Moves every operation with `retry_count >= max_retries` to
    /// `failed_operations`. Returns how many were moved.
    pub async fn purge_exceeding(&self, max_retries: u32) -> DbResult<u64> {
        let max_retries = i64::from(max_retries);
        let mut tx = begin_write(&self.pool).await?;

        let sql = format!(
            "SELECT {PENDING_COLUMNS} FROM pending_operations WHERE retry_count >= ?1 \
             ORDER BY created_at ASC, rowid ASC"
        );
        let exhausted = sqlx::query_as::<_, PendingOperation>(&sql)
            .bind(max_retries)
            .fetch_all(&mut *tx)
            .await?;

        if exhausted.is_empty() {
            return Ok(0);
        }

        let failed_at = now_millis();
        for op in &exhausted {
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO failed_operations (
                    id, entity_type, entity_id, operation, created_at,
                    retry_count, last_error, failed_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(&op.id)
            .bind(op.entity_type)
            .bind(&op.entity_id)
            .bind(op.operation)
            .bind(op.created_at)
            .bind(op.retry_count)
            .bind(&op.last_error)
            .bind(failed_at)
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM pending_operations WHERE id = ?1")
                .bind(&op.id)
                .execute(&mut *tx)
                .await?;

            warn!(
                op_id = %op.id,
                entity_type = %op.entity_type,
                entity_id = %op.entity_id,
                operation = %op.operation,
                retry_count = op.retry_count,
                last_error = op.last_error.as_deref().unwrap_or(""),
                "Retry budget exhausted, operation archived"
            );
        }

        tx.commit().await?;

        self.feed.publish(&[
            ChangeEvent::new(Table::PendingOperations, ChangeKind::Delete),
            ChangeEvent::new(Table::FailedOperations, ChangeKind::Insert),
        ]);

        let purged = exhausted.len() as u64;
        info!(purged, "Purged exhausted operations");
        Ok(purged)
    }

    /// Number of queued operations.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM pending_operations")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Number of queued operations targeting one entity.
    pub async fn count_for_entity(&self, entity_type: EntityType, entity_id: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM pending_operations WHERE entity_type = ?1 AND entity_id = ?2",
        )
        .bind(entity_type)
        .bind(entity_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Archived operations, most recently failed first.
    pub async fn list_failed(&self) -> DbResult<Vec<FailedOperation>> {
        let failed = sqlx::query_as::<_, FailedOperation>(
            r#"
            SELECT id, entity_type, entity_id, operation, created_at,
                   retry_count, last_error, failed_at
            FROM failed_operations
            ORDER BY failed_at DESC, created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(failed)
    }

    /// Deletes every archived operation. Returns how many were deleted.
    pub async fn clear_failed(&self) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM failed_operations")
            .execute(&self.pool)
            .await?;

        let cleared = result.rows_affected();
        if cleared > 0 {
            self.feed
                .publish(&[ChangeEvent::new(Table::FailedOperations, ChangeKind::Delete)]);
        }
        info!(cleared, "Cleared failed operations");
        Ok(cleared)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    async fn queue() -> PendingOperationRepository {
        Database::new(DbConfig::in_memory()).await.unwrap().pending()
    }

    #[tokio::test]
    async fn test_list_all_orders_by_created_at_then_insertion() {
        let queue = queue().await;

        let late = PendingOperation::new(EntityType::Item, "a", OperationKind::Insert, 300);
        let tie_first = PendingOperation::new(EntityType::Item, "b", OperationKind::Insert, 100);
        let tie_second = PendingOperation::new(EntityType::Staff, "c", OperationKind::Delete, 100);
        let middle = PendingOperation::new(EntityType::Item, "a", OperationKind::Update, 200);

        for op in [&late, &tie_first, &tie_second, &middle] {
            queue.enqueue(op).await.unwrap();
        }

        let ids: Vec<_> = queue
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|op| op.id)
            .collect();
        assert_eq!(ids, vec![tie_first.id, tie_second.id, middle.id, late.id]);
    }

    #[tokio::test]
    async fn test_one_operation_per_entity_and_timestamp() {
        let queue = queue().await;

        let op = PendingOperation::new(EntityType::Item, "a", OperationKind::Insert, 100);
        queue.enqueue(&op).await.unwrap();

        let clash = PendingOperation::new(EntityType::Item, "a", OperationKind::Update, 100);
        let err = queue.enqueue(&clash).await.unwrap_err();
        assert!(matches!(err, DbError::UniqueViolation { .. }));

        // Same timestamp on a different entity is fine
        let other = PendingOperation::new(EntityType::Item, "b", OperationKind::Update, 100);
        queue.enqueue(&other).await.unwrap();
        assert_eq!(queue.count_for_entity(EntityType::Item, "a").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_now_is_strictly_increasing() {
        let queue = queue().await;

        let mut last = i64::MIN;
        for _ in 0..20 {
            let op = queue
                .enqueue_now(EntityType::Item, "same", OperationKind::Update)
                .await
                .unwrap();
            assert!(op.created_at > last);
            last = op.created_at;
        }
        assert_eq!(queue.count().await.unwrap(), 20);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_enqueue_on_shared_file() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(DbConfig::new(dir.path().join("queue.db")).max_connections(4))
            .await
            .unwrap();
        let queue = db.pending();

        let writers: Vec<_> = (0..16)
            .map(|i| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    queue
                        .enqueue_now(EntityType::Item, &format!("item-{i}"), OperationKind::Insert)
                        .await
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap().unwrap();
        }

        let ops = queue.list_all().await.unwrap();
        assert_eq!(ops.len(), 16);
        assert!(ops.windows(2).all(|pair| pair[0].created_at < pair[1].created_at));
    }

    #[tokio::test]
    async fn test_increment_retry_and_remove() {
        let queue = queue().await;

        let op = PendingOperation::new(EntityType::Item, "a", OperationKind::Insert, 1);
        queue.enqueue(&op).await.unwrap();

        assert_eq!(queue.increment_retry(&op.id, "timeout").await.unwrap(), 1);
        assert_eq!(queue.increment_retry(&op.id, "refused").await.unwrap(), 2);

        let stored = queue.get(&op.id).await.unwrap().unwrap();
        assert_eq!(stored.retry_count, 2);
        assert_eq!(stored.last_error.as_deref(), Some("refused"));

        assert!(queue.remove(&op.id).await.unwrap());
        assert!(!queue.remove(&op.id).await.unwrap());
        assert!(queue
            .increment_retry(&op.id, "gone")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_purge_exceeding_archives() {
        let queue = queue().await;

        let mut exhausted = PendingOperation::new(EntityType::Item, "a", OperationKind::Update, 1);
        exhausted.retry_count = 3;
        exhausted.last_error = Some("not found".into());
        let fresh = PendingOperation::new(EntityType::Item, "b", OperationKind::Insert, 2);
        queue.enqueue(&exhausted).await.unwrap();
        queue.enqueue(&fresh).await.unwrap();

        assert_eq!(queue.purge_exceeding(3).await.unwrap(), 1);
        assert_eq!(queue.purge_exceeding(3).await.unwrap(), 0);

        let remaining = queue.list_all().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, fresh.id);

        let failed = queue.list_failed().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, exhausted.id);
        assert_eq!(failed[0].retry_count, 3);
        assert_eq!(failed[0].last_error.as_deref(), Some("not found"));

        assert_eq!(queue.clear_failed().await.unwrap(), 1);
        assert!(queue.list_failed().await.unwrap().is_empty());
    }
}

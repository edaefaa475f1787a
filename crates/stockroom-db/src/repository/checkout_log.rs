//! # Checkout Log Repository
//!
//! Checkout history plus the check-out / check-in workflows.
//!
//! ## Check-Out Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       check_out(item, staff)                            │
//! │                                                                         │
//! │  BEGIN                                                                  │
//! │    UPDATE items SET status = 'CHECKED_OUT'                              │
//! │      WHERE id = ? AND status = 'AVAILABLE'   ── 0 rows? ──► why?        │
//! │                                                 ├── no item  → ItemNotFound
//! │                                                 └── other    → ItemUnavailable
//! │    SELECT staff ── missing / inactive ──► StaffNotFound / StaffInactive │
//! │    INSERT INTO checkout_logs (...)                                      │
//! │    enqueue UPDATE item, INSERT checkout_log                             │
//! │  COMMIT                                                                 │
//! │                                                                         │
//! │  Any error rolls back both rows and both queue entries.                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Check-in mirrors this: the log is closed, the item goes back to
//! `AVAILABLE` if it is still marked checked out, and one operation is queued
//! per row written.

use sqlx::{SqliteConnection, SqlitePool};
use stockroom_core::validation::validate_checkout_log;
use stockroom_core::{
    now_millis, CheckoutLog, CoreError, Entity, EntityType, EpochMillis, Item, ItemStatus,
    OperationKind, Staff,
};
use tracing::{debug, info};

use super::{begin_write, enqueue_on, mutation_events};
use crate::changes::{ChangeEvent, ChangeFeed, ChangeKind, LiveQuery, Table};
use crate::error::{DbError, DbResult};

const LOG_COLUMNS: &str = "id, item_id, staff_id, checkout_time, due_time, checkin_time, notes, \
                           last_modified, last_sync_timestamp";

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

/// Repository for checkout log operations.
#[derive(Debug, Clone)]
pub struct CheckoutLogRepository {
    pool: SqlitePool,
    feed: ChangeFeed,
}

impl CheckoutLogRepository {
    /// Creates a new CheckoutLogRepository.
    pub fn new(pool: SqlitePool, feed: ChangeFeed) -> Self {
        CheckoutLogRepository { pool, feed }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<CheckoutLog>> {
        let mut conn = self.pool.acquire().await?;
        fetch_log(&mut *conn, id).await
    }

    /// All logs, newest checkout first.
    pub async fn get_all(&self) -> DbResult<Vec<CheckoutLog>> {
        let sql = format!(
            "SELECT {LOG_COLUMNS} FROM checkout_logs ORDER BY checkout_time DESC, id ASC"
        );
        let logs = sqlx::query_as::<_, CheckoutLog>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(logs)
    }

    /// Live view of all logs.
    pub fn watch_all(&self) -> LiveQuery<Vec<CheckoutLog>> {
        let repo = self.clone();
        self.feed.live(Table::CheckoutLogs, move || {
            let repo = repo.clone();
            async move { repo.get_all().await }
        })
    }

    /// History of one item, newest first.
    pub async fn get_by_item(&self, item_id: &str) -> DbResult<Vec<CheckoutLog>> {
        let sql = format!(
            "SELECT {LOG_COLUMNS} FROM checkout_logs WHERE item_id = ?1 \
             ORDER BY checkout_time DESC, id ASC"
        );
        let logs = sqlx::query_as::<_, CheckoutLog>(&sql)
            .bind(item_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(logs)
    }

    /// History of one staff member, newest first.
    pub async fn get_by_staff(&self, staff_id: &str) -> DbResult<Vec<CheckoutLog>> {
        let sql = format!(
            "SELECT {LOG_COLUMNS} FROM checkout_logs WHERE staff_id = ?1 \
             ORDER BY checkout_time DESC, id ASC"
        );
        let logs = sqlx::query_as::<_, CheckoutLog>(&sql)
            .bind(staff_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(logs)
    }

    /// Logs not yet checked in, oldest first.
    pub async fn get_open(&self) -> DbResult<Vec<CheckoutLog>> {
        let sql = format!(
            "SELECT {LOG_COLUMNS} FROM checkout_logs WHERE checkin_time IS NULL \
             ORDER BY checkout_time ASC, id ASC"
        );
        let logs = sqlx::query_as::<_, CheckoutLog>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(logs)
    }

    /// Live view of open logs.
    pub fn watch_open(&self) -> LiveQuery<Vec<CheckoutLog>> {
        let repo = self.clone();
        self.feed.live(Table::CheckoutLogs, move || {
            let repo = repo.clone();
            async move { repo.get_open().await }
        })
    }

    /// Logs whose checkout time falls in `[from, to)`, oldest first.
    pub async fn get_between(&self, from: EpochMillis, to: EpochMillis) -> DbResult<Vec<CheckoutLog>> {
        let sql = format!(
            "SELECT {LOG_COLUMNS} FROM checkout_logs \
             WHERE checkout_time >= ?1 AND checkout_time < ?2 \
             ORDER BY checkout_time ASC, id ASC"
        );
        let logs = sqlx::query_as::<_, CheckoutLog>(&sql)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;
        Ok(logs)
    }

    pub async fn modified_after(&self, since: EpochMillis) -> DbResult<Vec<CheckoutLog>> {
        let sql = format!(
            "SELECT {LOG_COLUMNS} FROM checkout_logs WHERE last_modified > ?1 \
             ORDER BY last_modified ASC"
        );
        let logs = sqlx::query_as::<_, CheckoutLog>(&sql)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;
        Ok(logs)
    }

    pub async fn not_synced_since(&self, since: EpochMillis) -> DbResult<Vec<CheckoutLog>> {
        let sql = format!(
            "SELECT {LOG_COLUMNS} FROM checkout_logs \
             WHERE last_sync_timestamp IS NULL OR last_sync_timestamp < ?1 \
             ORDER BY last_modified ASC"
        );
        let logs = sqlx::query_as::<_, CheckoutLog>(&sql)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;
        Ok(logs)
    }

    // =========================================================================
    // Plain writes
    // =========================================================================

    /// Inserts a log as-is and enqueues an INSERT. Item status is untouched;
    /// use [`check_out`](Self::check_out) for the full workflow.
    pub async fn insert(&self, log: &CheckoutLog) -> DbResult<CheckoutLog> {
        let mut log = log.clone();
        log.touch(now_millis());
        validate_checkout_log(&log)?;

        let mut tx = self.pool.begin().await?;
        insert_log(&mut *tx, &log).await?;
        enqueue_on(&mut *tx, EntityType::CheckoutLog, &log.id, OperationKind::Insert).await?;
        tx.commit().await?;

        self.feed
            .publish(&mutation_events(Table::CheckoutLogs, ChangeKind::Insert));
        debug!(log_id = %log.id, "Checkout log created");

        Ok(log)
    }

    /// Replaces a log and enqueues an UPDATE.
    pub async fn update(&self, log: &CheckoutLog) -> DbResult<CheckoutLog> {
        let mut log = log.clone();
        log.touch(now_millis().max(log.last_modified + 1));
        validate_checkout_log(&log)?;

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE checkout_logs SET
                item_id = ?2,
                staff_id = ?3,
                checkout_time = ?4,
                due_time = ?5,
                checkin_time = ?6,
                notes = ?7,
                last_modified = ?8
            WHERE id = ?1
            "#,
        )
        .bind(&log.id)
        .bind(&log.item_id)
        .bind(&log.staff_id)
        .bind(log.checkout_time)
        .bind(log.due_time)
        .bind(log.checkin_time)
        .bind(&log.notes)
        .bind(log.last_modified)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("CheckoutLog", &log.id));
        }

        enqueue_on(&mut *tx, EntityType::CheckoutLog, &log.id, OperationKind::Update).await?;
        tx.commit().await?;

        self.feed
            .publish(&mutation_events(Table::CheckoutLogs, ChangeKind::Update));
        debug!(log_id = %log.id, "Checkout log updated");

        Ok(log)
    }

    /// Deletes a log and enqueues a DELETE.
    pub async fn delete(&self, id: &str) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM checkout_logs WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("CheckoutLog", id));
        }

        enqueue_on(&mut *tx, EntityType::CheckoutLog, id, OperationKind::Delete).await?;
        tx.commit().await?;

        self.feed
            .publish(&mutation_events(Table::CheckoutLogs, ChangeKind::Delete));
        info!(log_id = %id, "Checkout log deleted");

        Ok(())
    }

    // =========================================================================
    // Workflows
    // =========================================================================

    /// Checks an available item out to an active staff member.
    ///
    /// ## Errors
    /// - `CoreError::ItemNotFound` / `ItemUnavailable`
    /// - `CoreError::StaffNotFound` / `StaffInactive`
    pub async fn check_out(
        &self,
        item_id: &str,
        staff_id: &str,
        due_time: Option<EpochMillis>,
        notes: Option<String>,
    ) -> DbResult<CheckoutLog> {
        let now = now_millis();
        let mut log = CheckoutLog::open(item_id, staff_id, now, due_time);
        log.notes = notes;
        validate_checkout_log(&log)?;

        let mut tx = self.pool.begin().await?;

        // Claim the item first; this also takes the write lock
        let claimed = sqlx::query(
            "UPDATE items SET status = ?2, last_modified = MAX(?3, last_modified + 1) \
             WHERE id = ?1 AND status = ?4",
        )
        .bind(item_id)
        .bind(ItemStatus::CheckedOut)
        .bind(now)
        .bind(ItemStatus::Available)
        .execute(&mut *tx)
        .await?;

        if claimed.rows_affected() == 0 {
            let item = fetch_item(&mut *tx, item_id).await?;
            return Err(match item {
                None => CoreError::ItemNotFound(item_id.to_string()),
                Some(item) => CoreError::ItemUnavailable {
                    item_id: item.id,
                    status: item.status,
                },
            }
            .into());
        }

        match fetch_staff(&mut *tx, staff_id).await? {
            None => return Err(CoreError::StaffNotFound(staff_id.to_string()).into()),
            Some(staff) if !staff.active => {
                return Err(CoreError::StaffInactive(staff.id).into());
            }
            Some(_) => {}
        }

        insert_log(&mut *tx, &log).await?;
        enqueue_on(&mut *tx, EntityType::Item, item_id, OperationKind::Update).await?;
        enqueue_on(&mut *tx, EntityType::CheckoutLog, &log.id, OperationKind::Insert).await?;
        tx.commit().await?;

        self.feed.publish(&[
            ChangeEvent::new(Table::Items, ChangeKind::Update),
            ChangeEvent::new(Table::CheckoutLogs, ChangeKind::Insert),
            ChangeEvent::new(Table::PendingOperations, ChangeKind::Insert),
        ]);
        info!(
            log_id = %log.id,
            item_id = %item_id,
            staff_id = %staff_id,
            "Item checked out"
        );

        Ok(log)
    }

    /// Closes an open checkout and returns the item to the shelf.
    ///
    /// The item is only flipped back to `AVAILABLE` if it is still marked
    /// `CHECKED_OUT`; an item moved to maintenance meanwhile keeps its status.
    pub async fn check_in(&self, log_id: &str) -> DbResult<CheckoutLog> {
        let mut tx = begin_write(&self.pool).await?;

        let log = fetch_log(&mut *tx, log_id)
            .await?
            .ok_or_else(|| CoreError::CheckoutLogNotFound(log_id.to_string()))?;
        if !log.is_open() {
            return Err(CoreError::AlreadyCheckedIn(log.id).into());
        }

        // Never close before the checkout itself, even if the clock moved back
        let now = now_millis().max(log.checkout_time);
        let modified = now.max(log.last_modified + 1);

        sqlx::query("UPDATE checkout_logs SET checkin_time = ?2, last_modified = ?3 WHERE id = ?1")
            .bind(&log.id)
            .bind(now)
            .bind(modified)
            .execute(&mut *tx)
            .await?;

        let released = sqlx::query(
            "UPDATE items SET status = ?2, last_modified = MAX(?3, last_modified + 1) \
             WHERE id = ?1 AND status = ?4",
        )
        .bind(&log.item_id)
        .bind(ItemStatus::Available)
        .bind(now)
        .bind(ItemStatus::CheckedOut)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;

        enqueue_on(&mut *tx, EntityType::CheckoutLog, &log.id, OperationKind::Update).await?;
        if released {
            enqueue_on(&mut *tx, EntityType::Item, &log.item_id, OperationKind::Update).await?;
        }
        tx.commit().await?;

        let mut events = vec![
            ChangeEvent::new(Table::CheckoutLogs, ChangeKind::Update),
            ChangeEvent::new(Table::PendingOperations, ChangeKind::Insert),
        ];
        if released {
            events.push(ChangeEvent::new(Table::Items, ChangeKind::Update));
        }
        self.feed.publish(&events);
        info!(log_id = %log.id, item_id = %log.item_id, released, "Item checked in");

        Ok(CheckoutLog {
            checkin_time: Some(now),
            last_modified: modified,
            ..log
        })
    }

    // =========================================================================
    // Sync bookkeeping
    // =========================================================================

    pub async fn mark_synced(
        &self,
        id: &str,
        version: EpochMillis,
        at: EpochMillis,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE checkout_logs SET last_sync_timestamp = ?3 WHERE id = ?1 AND last_modified = ?2",
        )
        .bind(id)
        .bind(version)
        .bind(at)
        .execute(&self.pool)
        .await?;

        let updated = result.rows_affected() > 0;
        if updated {
            self.feed
                .publish(&[ChangeEvent::new(Table::CheckoutLogs, ChangeKind::Update)]);
        }
        Ok(updated)
    }

    /// Stores a log received from the remote store (last writer wins).
    pub async fn apply_remote(&self, log: &CheckoutLog, synced_at: EpochMillis) -> DbResult<bool> {
        validate_checkout_log(log)?;

        let sql = format!(
            r#"
            INSERT INTO checkout_logs ({LOG_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                item_id = excluded.item_id,
                staff_id = excluded.staff_id,
                checkout_time = excluded.checkout_time,
                due_time = excluded.due_time,
                checkin_time = excluded.checkin_time,
                notes = excluded.notes,
                last_modified = excluded.last_modified,
                last_sync_timestamp = excluded.last_sync_timestamp
            WHERE excluded.last_modified > checkout_logs.last_modified
            "#
        );

        let mut stored = log.clone();
        stored.last_sync_timestamp = Some(synced_at);

        let result = bind_log(sqlx::query(&sql), &stored)
            .execute(&self.pool)
            .await?;

        let applied = result.rows_affected() > 0;
        if applied {
            self.feed
                .publish(&[ChangeEvent::new(Table::CheckoutLogs, ChangeKind::Update)]);
        }
        Ok(applied)
    }
}

// =============================================================================
// Connection-level helpers (usable inside a transaction)
// =============================================================================

async fn fetch_log(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<CheckoutLog>> {
    let sql = format!("SELECT {LOG_COLUMNS} FROM checkout_logs WHERE id = ?1");
    let log = sqlx::query_as::<_, CheckoutLog>(&sql)
        .bind(id)
        .fetch_optional(conn)
        .await?;
    Ok(log)
}

async fn fetch_item(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Item>> {
    let item = sqlx::query_as::<_, Item>(
        "SELECT id, name, barcode, category, description, location, status, \
         last_modified, last_sync_timestamp FROM items WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(item)
}

async fn fetch_staff(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<Staff>> {
    let staff = sqlx::query_as::<_, Staff>(
        "SELECT id, name, department, email, position, active, last_modified, \
         last_sync_timestamp FROM staff WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(staff)
}

async fn insert_log(conn: &mut SqliteConnection, log: &CheckoutLog) -> DbResult<()> {
    let sql = format!(
        "INSERT INTO checkout_logs ({LOG_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
    );
    bind_log(sqlx::query(&sql), log)
        .execute(conn)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { .. } => DbError::duplicate("id", &log.id),
            other => other,
        })?;
    Ok(())
}

fn bind_log<'q>(query: SqliteQuery<'q>, log: &'q CheckoutLog) -> SqliteQuery<'q> {
    query
        .bind(&log.id)
        .bind(&log.item_id)
        .bind(&log.staff_id)
        .bind(log.checkout_time)
        .bind(log.due_time)
        .bind(log.checkin_time)
        .bind(&log.notes)
        .bind(log.last_modified)
        .bind(log.last_sync_timestamp)
}

// =============================================================================
// Unit Tests
// =============================================================================

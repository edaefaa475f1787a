//! # Item Repository
//!
//! Database operations for tracked items.
//!
//! ## Key Operations
//! - Lookup by id or scanned barcode
//! - Listing by status / category, plus live variants
//! - Insert / update / delete, each enqueueing one pending operation
//! - Incremental-sync queries (`modified_after`, `not_synced_since`)
//!
//! ## Barcode Uniqueness
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  items.barcode is UNIQUE but nullable:                                 │
//! │                                                                         │
//! │    Drill   barcode = "4006381333931"   ✓                               │
//! │    Saw     barcode = NULL              ✓                               │
//! │    Ladder  barcode = NULL              ✓  (NULLs never collide)        │
//! │    Hammer  barcode = "4006381333931"   ✗  DbError::UniqueViolation     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sqlx::SqlitePool;
use stockroom_core::validation::{validate_barcode, validate_item, validate_search_query};
use stockroom_core::{now_millis, Entity, EntityType, EpochMillis, Item, ItemStatus, OperationKind};
use tracing::{debug, info};

use super::{enqueue_on, mutation_events};
use crate::changes::{ChangeEvent, ChangeFeed, ChangeKind, LiveQuery, Table};
use crate::error::{DbError, DbResult};

const ITEM_COLUMNS: &str = "id, name, barcode, category, description, location, status, \
                            last_modified, last_sync_timestamp";

/// Repository for item database operations.
#[derive(Debug, Clone)]
pub struct ItemRepository {
    pool: SqlitePool,
    feed: ChangeFeed,
}

impl ItemRepository {
    /// Creates a new ItemRepository.
    pub fn new(pool: SqlitePool, feed: ChangeFeed) -> Self {
        ItemRepository { pool, feed }
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Gets an item by its ID.
    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Item>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?1");
        let item = sqlx::query_as::<_, Item>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(item)
    }

    /// Gets an item by its exact barcode (scanner lookup).
    pub async fn get_by_barcode(&self, barcode: &str) -> DbResult<Option<Item>> {
        let barcode = barcode.trim();
        debug!(barcode = %barcode, "Looking up item by barcode");

        let sql = format!("SELECT {ITEM_COLUMNS} FROM items WHERE barcode = ?1");
        let item = sqlx::query_as::<_, Item>(&sql)
            .bind(barcode)
            .fetch_optional(&self.pool)
            .await?;

        Ok(item)
    }

    /// All items, ordered by name.
    pub async fn get_all(&self) -> DbResult<Vec<Item>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM items ORDER BY name ASC, id ASC");
        let items = sqlx::query_as::<_, Item>(&sql).fetch_all(&self.pool).await?;
        Ok(items)
    }

    /// Live view of all items.
    pub fn watch_all(&self) -> LiveQuery<Vec<Item>> {
        let repo = self.clone();
        self.feed.live(Table::Items, move || {
            let repo = repo.clone();
            async move { repo.get_all().await }
        })
    }

    /// Items in the given status, ordered by name.
    pub async fn get_by_status(&self, status: ItemStatus) -> DbResult<Vec<Item>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE status = ?1 ORDER BY name ASC, id ASC"
        );
        let items = sqlx::query_as::<_, Item>(&sql)
            .bind(status)
            .fetch_all(&self.pool)
            .await?;
        Ok(items)
    }

    /// Live view of items in the given status.
    pub fn watch_by_status(&self, status: ItemStatus) -> LiveQuery<Vec<Item>> {
        let repo = self.clone();
        self.feed.live(Table::Items, move || {
            let repo = repo.clone();
            async move { repo.get_by_status(status).await }
        })
    }

    /// Items in the given category, ordered by name.
    pub async fn get_by_category(&self, category: &str) -> DbResult<Vec<Item>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE category = ?1 ORDER BY name ASC, id ASC"
        );
        let items = sqlx::query_as::<_, Item>(&sql)
            .bind(category)
            .fetch_all(&self.pool)
            .await?;
        Ok(items)
    }

    /// Searches name, barcode and category by substring.
    ///
    /// An empty query returns the first `limit` items by name.
    pub async fn search(&self, query: &str, limit: u32) -> DbResult<Vec<Item>> {
        let query = validate_search_query(query)?;
        debug!(query = %query, limit = %limit, "Searching items");

        if query.is_empty() {
            let sql = format!("SELECT {ITEM_COLUMNS} FROM items ORDER BY name ASC, id ASC LIMIT ?1");
            let items = sqlx::query_as::<_, Item>(&sql)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?;
            return Ok(items);
        }

        // Escape LIKE wildcards so a literal '%' in the query stays literal
        let escaped = query
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let pattern = format!("%{escaped}%");

        let sql = format!(
            r#"
            SELECT {ITEM_COLUMNS} FROM items
            WHERE name LIKE ?1 ESCAPE '\'
               OR barcode LIKE ?1 ESCAPE '\'
               OR category LIKE ?1 ESCAPE '\'
            ORDER BY name ASC, id ASC
            LIMIT ?2
            "#
        );
        let items = sqlx::query_as::<_, Item>(&sql)
            .bind(pattern)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;

        Ok(items)
    }

    /// Items edited locally after `since` (exclusive).
    pub async fn modified_after(&self, since: EpochMillis) -> DbResult<Vec<Item>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM items WHERE last_modified > ?1 ORDER BY last_modified ASC"
        );
        let items = sqlx::query_as::<_, Item>(&sql)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;
        Ok(items)
    }

    /// Items never confirmed by the remote store, or last confirmed before `since`.
    pub async fn not_synced_since(&self, since: EpochMillis) -> DbResult<Vec<Item>> {
        let sql = format!(
            r#"
            SELECT {ITEM_COLUMNS} FROM items
            WHERE last_sync_timestamp IS NULL OR last_sync_timestamp < ?1
            ORDER BY last_modified ASC
            "#
        );
        let items = sqlx::query_as::<_, Item>(&sql)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;
        Ok(items)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Inserts a new item and enqueues an INSERT.
    ///
    /// `last_modified` is set to the current time. Returns the stored item.
    pub async fn insert(&self, item: &Item) -> DbResult<Item> {
        let mut item = item.clone();
        item.touch(now_millis());
        validate_item(&item)?;

        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "INSERT INTO items ({ITEM_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
        );
        bind_item(sqlx::query(&sql), &item)
            .execute(&mut *tx)
            .await
            .map_err(|e| barcode_conflict(e, &item))?;

        enqueue_on(&mut *tx, EntityType::Item, &item.id, OperationKind::Insert).await?;
        tx.commit().await?;

        self.feed
            .publish(&mutation_events(Table::Items, ChangeKind::Insert));
        info!(item_id = %item.id, name = %item.name, "Item created");

        Ok(item)
    }

    /// Replaces an existing item and enqueues an UPDATE.
    ///
    /// Full-record replace: every column except `id` and
    /// `last_sync_timestamp` is overwritten.
    pub async fn update(&self, item: &Item) -> DbResult<Item> {
        let mut item = item.clone();
        item.touch(now_millis().max(item.last_modified + 1));
        validate_item(&item)?;

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE items SET
                name = ?2,
                barcode = ?3,
                category = ?4,
                description = ?5,
                location = ?6,
                status = ?7,
                last_modified = ?8
            WHERE id = ?1
            "#,
        )
        .bind(&item.id)
        .bind(&item.name)
        .bind(&item.barcode)
        .bind(&item.category)
        .bind(&item.description)
        .bind(&item.location)
        .bind(item.status)
        .bind(item.last_modified)
        .execute(&mut *tx)
        .await
        .map_err(|e| barcode_conflict(e, &item))?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Item", &item.id));
        }

        enqueue_on(&mut *tx, EntityType::Item, &item.id, OperationKind::Update).await?;
        tx.commit().await?;

        self.feed
            .publish(&mutation_events(Table::Items, ChangeKind::Update));
        debug!(item_id = %item.id, "Item updated");

        Ok(item)
    }

    /// Deletes an item and enqueues a DELETE.
    ///
    /// Checkout logs referencing the item are kept as history.
    pub async fn delete(&self, id: &str) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM items WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Item", id));
        }

        enqueue_on(&mut *tx, EntityType::Item, id, OperationKind::Delete).await?;
        tx.commit().await?;

        self.feed
            .publish(&mutation_events(Table::Items, ChangeKind::Delete));
        info!(item_id = %id, "Item deleted");

        Ok(())
    }

    // =========================================================================
    // Sync bookkeeping (never enqueues)
    // =========================================================================

    /// Records that the remote store confirmed version `version` of this item.
    ///
    /// Lands only while the row still carries that `last_modified`; an edit
    /// made while the upload was in flight keeps the row unsynced.
    pub async fn mark_synced(
        &self,
        id: &str,
        version: EpochMillis,
        at: EpochMillis,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE items SET last_sync_timestamp = ?3 WHERE id = ?1 AND last_modified = ?2",
        )
        .bind(id)
        .bind(version)
        .bind(at)
        .execute(&self.pool)
        .await?;

        let updated = result.rows_affected() > 0;
        if updated {
            self.feed
                .publish(&[ChangeEvent::new(Table::Items, ChangeKind::Update)]);
        }
        Ok(updated)
    }

    /// Stores an item received from the remote store.
    ///
    /// Last writer wins: an existing local copy is replaced only when the
    /// incoming `last_modified` is strictly newer. Returns `true` if a row
    /// was written.
    pub async fn apply_remote(&self, item: &Item, synced_at: EpochMillis) -> DbResult<bool> {
        validate_item(item)?;

        let sql = format!(
            r#"
            INSERT INTO items ({ITEM_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                barcode = excluded.barcode,
                category = excluded.category,
                description = excluded.description,
                location = excluded.location,
                status = excluded.status,
                last_modified = excluded.last_modified,
                last_sync_timestamp = excluded.last_sync_timestamp
            WHERE excluded.last_modified > items.last_modified
            "#
        );

        let mut stored = item.clone();
        stored.last_sync_timestamp = Some(synced_at);

        let result = bind_item(sqlx::query(&sql), &stored)
            .execute(&self.pool)
            .await
            .map_err(|e| barcode_conflict(e, &stored))?;

        let applied = result.rows_affected() > 0;
        if applied {
            self.feed
                .publish(&[ChangeEvent::new(Table::Items, ChangeKind::Update)]);
        }
        Ok(applied)
    }

    /// Counts items, optionally restricted to one status.
    pub async fn count(&self, status: Option<ItemStatus>) -> DbResult<i64> {
        let count: i64 = match status {
            Some(status) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM items WHERE status = ?1")
                    .bind(status)
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM items")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count)
    }

    /// Checks whether `barcode` is free, ignoring `except_id`.
    pub async fn barcode_available(&self, barcode: &str, except_id: Option<&str>) -> DbResult<bool> {
        validate_barcode(barcode)?;
        let taken: Option<String> = sqlx::query_scalar("SELECT id FROM items WHERE barcode = ?1")
            .bind(barcode)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match taken {
            None => true,
            Some(id) => except_id == Some(id.as_str()),
        })
    }
}

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

/// Binds all item columns in `ITEM_COLUMNS` order.
pub(crate) fn bind_item<'q>(query: SqliteQuery<'q>, item: &'q Item) -> SqliteQuery<'q> {
    query
        .bind(&item.id)
        .bind(&item.name)
        .bind(&item.barcode)
        .bind(&item.category)
        .bind(&item.description)
        .bind(&item.location)
        .bind(item.status)
        .bind(item.last_modified)
        .bind(item.last_sync_timestamp)
}

/// Attaches the conflicting barcode to a unique violation.
fn barcode_conflict(err: sqlx::Error, item: &Item) -> DbError {
    match DbError::from(err) {
        DbError::UniqueViolation { field, .. } if field.contains("barcode") => {
            DbError::duplicate("barcode", item.barcode.clone().unwrap_or_default())
        }
        DbError::UniqueViolation { field, .. } if field.contains("id") => {
            DbError::duplicate("id", &item.id)
        }
        other => other,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

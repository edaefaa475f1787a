//! # Staff Repository
//!
//! Database operations for staff members.

use sqlx::SqlitePool;
use stockroom_core::validation::validate_staff;
use stockroom_core::{now_millis, Entity, EntityType, EpochMillis, OperationKind, Staff};
use tracing::{debug, info};

use super::{enqueue_on, mutation_events};
use crate::changes::{ChangeEvent, ChangeFeed, ChangeKind, LiveQuery, Table};
use crate::error::{DbError, DbResult};

const STAFF_COLUMNS: &str =
    "id, name, department, email, position, active, last_modified, last_sync_timestamp";

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

/// Repository for staff database operations.
#[derive(Debug, Clone)]
pub struct StaffRepository {
    pool: SqlitePool,
    feed: ChangeFeed,
}

impl StaffRepository {
    /// Creates a new StaffRepository.
    pub fn new(pool: SqlitePool, feed: ChangeFeed) -> Self {
        StaffRepository { pool, feed }
    }

    pub async fn get_by_id(&self, id: &str) -> DbResult<Option<Staff>> {
        let sql = format!("SELECT {STAFF_COLUMNS} FROM staff WHERE id = ?1");
        let staff = sqlx::query_as::<_, Staff>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(staff)
    }

    /// All staff, ordered by name.
    pub async fn get_all(&self) -> DbResult<Vec<Staff>> {
        let sql = format!("SELECT {STAFF_COLUMNS} FROM staff ORDER BY name ASC, id ASC");
        let staff = sqlx::query_as::<_, Staff>(&sql).fetch_all(&self.pool).await?;
        Ok(staff)
    }

    /// Live view of all staff.
    pub fn watch_all(&self) -> LiveQuery<Vec<Staff>> {
        let repo = self.clone();
        self.feed.live(Table::Staff, move || {
            let repo = repo.clone();
            async move { repo.get_all().await }
        })
    }

    /// Staff of one department, ordered by name.
    pub async fn get_by_department(&self, department: &str) -> DbResult<Vec<Staff>> {
        let sql = format!(
            "SELECT {STAFF_COLUMNS} FROM staff WHERE department = ?1 ORDER BY name ASC, id ASC"
        );
        let staff = sqlx::query_as::<_, Staff>(&sql)
            .bind(department)
            .fetch_all(&self.pool)
            .await?;
        Ok(staff)
    }

    /// Live view of one department.
    pub fn watch_by_department(&self, department: &str) -> LiveQuery<Vec<Staff>> {
        let repo = self.clone();
        let department = department.to_string();
        self.feed.live(Table::Staff, move || {
            let repo = repo.clone();
            let department = department.clone();
            async move { repo.get_by_department(&department).await }
        })
    }

    pub async fn modified_after(&self, since: EpochMillis) -> DbResult<Vec<Staff>> {
        let sql = format!(
            "SELECT {STAFF_COLUMNS} FROM staff WHERE last_modified > ?1 ORDER BY last_modified ASC"
        );
        let staff = sqlx::query_as::<_, Staff>(&sql)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;
        Ok(staff)
    }

    pub async fn not_synced_since(&self, since: EpochMillis) -> DbResult<Vec<Staff>> {
        let sql = format!(
            r#"
            SELECT {STAFF_COLUMNS} FROM staff
            WHERE last_sync_timestamp IS NULL OR last_sync_timestamp < ?1
            ORDER BY last_modified ASC
            "#
        );
        let staff = sqlx::query_as::<_, Staff>(&sql)
            .bind(since)
            .fetch_all(&self.pool)
            .await?;
        Ok(staff)
    }

    /// Inserts a staff member and enqueues an INSERT.
    pub async fn insert(&self, staff: &Staff) -> DbResult<Staff> {
        let mut staff = staff.clone();
        staff.touch(now_millis());
        validate_staff(&staff)?;

        let mut tx = self.pool.begin().await?;

        let sql = format!("INSERT INTO staff ({STAFF_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)");
        bind_staff(sqlx::query(&sql), &staff)
            .execute(&mut *tx)
            .await
            .map_err(|e| match DbError::from(e) {
                DbError::UniqueViolation { .. } => DbError::duplicate("id", &staff.id),
                other => other,
            })?;

        enqueue_on(&mut *tx, EntityType::Staff, &staff.id, OperationKind::Insert).await?;
        tx.commit().await?;

        self.feed
            .publish(&mutation_events(Table::Staff, ChangeKind::Insert));
        info!(staff_id = %staff.id, name = %staff.name, "Staff member created");

        Ok(staff)
    }

    /// Replaces a staff member and enqueues an UPDATE.
    pub async fn update(&self, staff: &Staff) -> DbResult<Staff> {
        let mut staff = staff.clone();
        staff.touch(now_millis().max(staff.last_modified + 1));
        validate_staff(&staff)?;

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE staff SET
                name = ?2,
                department = ?3,
                email = ?4,
                position = ?5,
                active = ?6,
                last_modified = ?7
            WHERE id = ?1
            "#,
        )
        .bind(&staff.id)
        .bind(&staff.name)
        .bind(&staff.department)
        .bind(&staff.email)
        .bind(&staff.position)
        .bind(staff.active)
        .bind(staff.last_modified)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Staff", &staff.id));
        }

        enqueue_on(&mut *tx, EntityType::Staff, &staff.id, OperationKind::Update).await?;
        tx.commit().await?;

        self.feed
            .publish(&mutation_events(Table::Staff, ChangeKind::Update));
        debug!(staff_id = %staff.id, "Staff member updated");

        Ok(staff)
    }

    /// Deletes a staff member and enqueues a DELETE. Checkout history stays.
    pub async fn delete(&self, id: &str) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query("DELETE FROM staff WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Staff", id));
        }

        enqueue_on(&mut *tx, EntityType::Staff, id, OperationKind::Delete).await?;
        tx.commit().await?;

        self.feed
            .publish(&mutation_events(Table::Staff, ChangeKind::Delete));
        info!(staff_id = %id, "Staff member deleted");

        Ok(())
    }

    pub async fn mark_synced(
        &self,
        id: &str,
        version: EpochMillis,
        at: EpochMillis,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE staff SET last_sync_timestamp = ?3 WHERE id = ?1 AND last_modified = ?2",
        )
        .bind(id)
        .bind(version)
        .bind(at)
        .execute(&self.pool)
        .await?;

        let updated = result.rows_affected() > 0;
        if updated {
            self.feed
                .publish(&[ChangeEvent::new(Table::Staff, ChangeKind::Update)]);
        }
        Ok(updated)
    }

    /// Stores a staff record received from the remote store (last writer wins).
    pub async fn apply_remote(&self, staff: &Staff, synced_at: EpochMillis) -> DbResult<bool> {
        validate_staff(staff)?;

        let sql = format!(
            r#"
            INSERT INTO staff ({STAFF_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                department = excluded.department,
                email = excluded.email,
                position = excluded.position,
                active = excluded.active,
                last_modified = excluded.last_modified,
                last_sync_timestamp = excluded.last_sync_timestamp
            WHERE excluded.last_modified > staff.last_modified
            "#
        );

        let mut stored = staff.clone();
        stored.last_sync_timestamp = Some(synced_at);

        let result = bind_staff(sqlx::query(&sql), &stored)
            .execute(&self.pool)
            .await?;

        let applied = result.rows_affected() > 0;
        if applied {
            self.feed
                .publish(&[ChangeEvent::new(Table::Staff, ChangeKind::Update)]);
        }
        Ok(applied)
    }
}

fn bind_staff<'q>(query: SqliteQuery<'q>, staff: &'q Staff) -> SqliteQuery<'q> {
    query
        .bind(&staff.id)
        .bind(&staff.name)
        .bind(&staff.department)
        .bind(&staff.email)
        .bind(&staff.position)
        .bind(staff.active)
        .bind(staff.last_modified)
        .bind(staff.last_sync_timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_staff_crud_and_department_query() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.staff();

        let kim = repo
            .insert(&Staff::new("Kim Park", "Workshop").with_email("kim@example.com"))
            .await
            .unwrap();
        repo.insert(&Staff::new("Lee Chan", "Facilities")).await.unwrap();

        assert_eq!(repo.get_by_department("Workshop").await.unwrap().len(), 1);
        assert_eq!(repo.get_all().await.unwrap().len(), 2);

        let mut inactive = kim.clone();
        inactive.active = false;
        repo.update(&inactive).await.unwrap();
        assert!(!repo.get_by_id(&kim.id).await.unwrap().unwrap().active);

        repo.delete(&kim.id).await.unwrap();
        assert!(repo.get_by_id(&kim.id).await.unwrap().is_none());
        assert!(repo.delete(&kim.id).await.unwrap_err().is_not_found());

        // insert, insert, update, delete
        assert_eq!(db.pending().count().await.unwrap(), 4);
    }

    #[tokio::test]
    async fn test_invalid_email_rejected() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let err = db
            .staff()
            .insert(&Staff::new("Kim", "Workshop").with_email("not-an-email"))
            .await
            .unwrap_err();

        assert!(matches!(err, DbError::Domain(_)));
        assert_eq!(db.pending().count().await.unwrap(), 0);
    }
}

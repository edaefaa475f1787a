//! # Local Store Handle
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  DbConfig ──► Database::new ──► SqlitePool (WAL, FK on, busy timeout)  │
//! │                     │                                                   │
//! │                     ├── migrations::run_migrations (when enabled)       │
//! │                     │                                                   │
//! │                     └── ChangeFeed (one per handle, shared by clones)   │
//! │                                                                         │
//! │  db.items()  db.staff()  db.checkout_logs()  db.pending()               │
//! │       └────────── repositories borrow pool + feed clones ──────────┘    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `Database` is constructed once at startup and handed to the sync engine
//! and the UI layer. Cloning it is cheap.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::changes::ChangeFeed;
use crate::error::{DbError, DbResult};
use crate::migrations;
use crate::repository::checkout_log::CheckoutLogRepository;
use crate::repository::item::ItemRepository;
use crate::repository::pending::PendingOperationRepository;
use crate::repository::staff::StaffRepository;

const MEMORY_PATH: &str = ":memory:";

// =============================================================================
// DbConfig
// =============================================================================

/// Where the local store lives and how its pool behaves.
///
/// ```rust,ignore
/// let config = DbConfig::new(sync_config.database_path())
///     .max_connections(4)
///     .busy_timeout(Duration::from_secs(2));
/// ```
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// SQLite file, created on first connect. `:memory:` for a throwaway store.
    pub database_path: PathBuf,
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long a caller waits for a free pooled connection.
    pub connect_timeout: Duration,
    /// How long SQLite itself waits on a locked database file before
    /// returning `SQLITE_BUSY`.
    pub busy_timeout: Duration,
    /// `None` keeps idle connections open indefinitely.
    pub idle_timeout: Option<Duration>,
    pub run_migrations: bool,
}

impl DbConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        DbConfig {
            database_path: path.into(),
            max_connections: 5,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
            idle_timeout: Some(Duration::from_secs(600)),
            run_migrations: true,
        }
    }

    /// Single-connection store that disappears with the pool.
    ///
    /// Every SQLite in-memory connection opens a separate database, so the
    /// pool is pinned to one connection that is never recycled.
    pub fn in_memory() -> Self {
        DbConfig {
            max_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: None,
            ..DbConfig::new(MEMORY_PATH)
        }
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    pub fn run_migrations(mut self, run: bool) -> Self {
        self.run_migrations = run;
        self
    }

    fn is_in_memory(&self) -> bool {
        self.database_path.as_os_str() == MEMORY_PATH
    }

    fn connect_options(&self) -> SqliteConnectOptions {
        let options = if self.is_in_memory() {
            SqliteConnectOptions::new().in_memory(true)
        } else {
            SqliteConnectOptions::new()
                .filename(&self.database_path)
                .create_if_missing(true)
        };

        options
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .busy_timeout(self.busy_timeout)
    }

    fn pool_options(&self) -> SqlitePoolOptions {
        let options = SqlitePoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(self.min_connections.min(self.max_connections))
            .acquire_timeout(self.connect_timeout)
            .idle_timeout(self.idle_timeout);

        if self.is_in_memory() {
            options.max_lifetime(None)
        } else {
            options
        }
    }
}

// =============================================================================
// Database
// =============================================================================

/// Handle to the local store: the pool plus its change feed.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    feed: ChangeFeed,
}

impl Database {
    /// Opens (or creates) the store and applies pending migrations.
    pub async fn new(config: DbConfig) -> DbResult<Self> {
        info!(path = %config.database_path.display(), "Opening local store");

        let pool = config
            .pool_options()
            .connect_with(config.connect_options())
            .await
            .map_err(|e| DbError::ConnectionFailed(e.to_string()))?;

        debug!(
            max_connections = config.max_connections,
            in_memory = config.is_in_memory(),
            "Pool ready"
        );

        let db = Database {
            pool,
            feed: ChangeFeed::new(),
        };

        if config.run_migrations {
            db.run_migrations().await?;
        }

        Ok(db)
    }

    /// Safe to call repeatedly; applied migrations are skipped.
    pub async fn run_migrations(&self) -> DbResult<()> {
        migrations::run_migrations(&self.pool).await
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Commit notifications for every repository created from this handle.
    pub fn changes(&self) -> &ChangeFeed {
        &self.feed
    }

    pub fn items(&self) -> ItemRepository {
        ItemRepository::new(self.pool.clone(), self.feed.clone())
    }

    pub fn staff(&self) -> StaffRepository {
        StaffRepository::new(self.pool.clone(), self.feed.clone())
    }

    pub fn checkout_logs(&self) -> CheckoutLogRepository {
        CheckoutLogRepository::new(self.pool.clone(), self.feed.clone())
    }

    /// The outbox of operations waiting for the remote store.
    pub fn pending(&self) -> PendingOperationRepository {
        PendingOperationRepository::new(self.pool.clone(), self.feed.clone())
    }

    /// Closes every pooled connection. Later queries fail with
    /// [`DbError::ConnectionFailed`].
    pub async fn close(&self) {
        info!("Closing local store");
        self.pool.close().await;
    }

    pub async fn health_check(&self) -> bool {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }
}

//! # stockroom-db: Local Store for Stockroom
//!
//! SQLite-backed storage for items, staff, checkout history and the pending
//! operation queue, using sqlx for async access.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stockroom Data Flow                              │
//! │                                                                         │
//! │  UI action (scan + check out)        stockroom-sync (drain / refresh)  │
//! │       │                                     │                           │
//! │       ▼                                     ▼                           │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                   stockroom-db (THIS CRATE)                     │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐  ┌────────────────────┐  ┌──────────────┐  │   │
//! │  │   │   Database    │  │    Repositories    │  │  Migrations  │  │   │
//! │  │   │   (pool.rs)   │  │                    │  │  (embedded)  │  │   │
//! │  │   │               │  │ ItemRepository     │  │              │  │   │
//! │  │   │ SqlitePool    │◄─│ StaffRepository    │  │ 001_init.sql │  │   │
//! │  │   │ ChangeFeed    │  │ CheckoutLogRepo    │  │              │  │   │
//! │  │   │               │  │ PendingOperations  │  │              │  │   │
//! │  │   └───────────────┘  └────────────────────┘  └──────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite database file (WAL mode)                                       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`changes`] - Change feed and live queries
//! - [`error`] - Database error types
//! - [`repository`] - Entity repositories and the pending operation queue
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stockroom_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("path/to/stockroom.db")).await?;
//!
//! let drill = db.items().get_by_barcode("4006381333931").await?;
//! let log = db.checkout_logs().check_out(&item_id, &staff_id, None, None).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod changes;
pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use changes::{ChangeEvent, ChangeFeed, ChangeKind, LiveQuery, Table};
pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::checkout_log::CheckoutLogRepository;
pub use repository::item::ItemRepository;
pub use repository::pending::PendingOperationRepository;
pub use repository::staff::StaffRepository;

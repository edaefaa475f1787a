//! # stockroom-sync: Sync Engine for Stockroom
//!
//! Replays the local pending operation queue against the remote document
//! store, and pulls remote changes back into the local store.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Sync Engine Architecture                         │
//! │                                                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                     SyncAgent (background task)                  │  │
//! │  │                                                                  │  │
//! │  │  Listens for enqueue events, lifecycle transitions, sync_now()  │  │
//! │  │  Coalesces triggers into single drains                          │  │
//! │  └────────────────────────────┬─────────────────────────────────────┘  │
//! │                               ▼                                         │
//! │  ┌──────────────────────────────────────────────────────────────────┐  │
//! │  │                          SyncManager                             │  │
//! │  │                                                                  │  │
//! │  │  drain()               ordered replay, bounded retries          │  │
//! │  │  purge_failed()        archive exhausted operations             │  │
//! │  │  refresh_from_remote() last-writer-wins pull                    │  │
//! │  └───────────────┬──────────────────────────────┬───────────────────┘  │
//! │                  ▼                              ▼                       │
//! │  ┌────────────────────────────┐  ┌─────────────────────────────────┐   │
//! │  │ stockroom-db               │  │ RemoteStore (trait)             │   │
//! │  │ pending_operations         │  │   InMemoryRemoteStore           │   │
//! │  │ items / staff / logs       │  │   (cloud adapters live outside) │   │
//! │  └────────────────────────────┘  └─────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`agent`] - Background `SyncAgent` and its handle
//! - [`config`] - Sync configuration (mode, device ID, retry budget)
//! - [`error`] - Sync and remote store error types
//! - [`manager`] - `SyncManager`: drain, purge, refresh
//! - [`remote`] - `RemoteStore` adapter trait and in-memory store
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use stockroom_db::{Database, DbConfig};
//! use stockroom_sync::{InMemoryRemoteStore, LifecycleEvent, SyncAgent, SyncConfig};
//!
//! let config = SyncConfig::load_or_default(None);
//! let db = Database::new(DbConfig::new(config.database_path())).await?;
//! let remote = Arc::new(InMemoryRemoteStore::new());
//!
//! let agent = SyncAgent::start(&config, db.clone(), remote)?;
//!
//! // Every repository write now drains in the background.
//! db.items().insert(&item).await?;
//!
//! agent.notify(LifecycleEvent::Background).await?;
//! agent.shutdown().await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod agent;
pub mod config;
pub mod error;
pub mod manager;
pub mod remote;

// =============================================================================
// Re-exports
// =============================================================================

pub use agent::{LifecycleEvent, SyncAgent, SyncAgentHandle};
pub use config::{DatabaseSettings, DeviceConfig, SyncConfig, SyncMode, SyncSettings};
pub use error::{RemoteError, SyncError, SyncResult};
pub use manager::{DrainReport, RefreshReport, SyncManager, SyncState, ENTITY_NOT_FOUND};
pub use remote::{InMemoryRemoteStore, RemoteCall, RemoteStore};

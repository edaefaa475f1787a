//! # Sync Errors
//!
//! ```text
//! ┌───────────────────────────┬──────────────────────────────────────────────┐
//! │ SyncError                 │ stops the current call                       │
//! │   InvalidConfig ...       │   bad sync.toml / STOCKROOM_* override       │
//! │   Remote(RemoteError)     │   refresh could not talk to the store        │
//! │   Database(DbError)       │   local store failed mid-drain               │
//! │   SyncDisabled ...        │   agent refused or lost the request          │
//! ├───────────────────────────┼──────────────────────────────────────────────┤
//! │ RemoteError               │ returned by RemoteStore adapters             │
//! │                           │   during a drain it is stored on the pending │
//! │                           │   operation as `last_error`, not propagated  │
//! └───────────────────────────┴──────────────────────────────────────────────┘
//! ```

use stockroom_core::EntityType;
use stockroom_db::DbError;
use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Error)]
pub enum SyncError {
    // ---- config -------------------------------------------------------------
    #[error("Invalid sync configuration: {0}")]
    InvalidConfig(String),

    /// `device.id` resolved to an empty string.
    #[error("Device ID not configured")]
    MissingDeviceId,

    #[error("Could not read sync config: {0}")]
    ConfigLoadFailed(String),

    #[error("Could not write sync config: {0}")]
    ConfigSaveFailed(String),

    // ---- stores -------------------------------------------------------------
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Local store error: {0}")]
    Database(#[from] DbError),

    // ---- agent --------------------------------------------------------------
    /// `sync_now` while the device is in [`SyncMode::Offline`](crate::SyncMode).
    #[error("Sync is disabled (mode: offline)")]
    SyncDisabled,

    /// The drain behind a `sync_now` request returned an error.
    #[error("Drain failed: {0}")]
    DrainFailed(String),

    #[error("Sync agent is shutting down")]
    ShuttingDown,

    #[error("Channel error: {0}")]
    ChannelError(String),
}

impl SyncError {
    /// Whether calling again later, with nothing changed, could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote(err) => err.is_transient(),
            SyncError::Database(DbError::PoolExhausted | DbError::ConnectionFailed(_)) => true,
            SyncError::ChannelError(_) => true,
            _ => false,
        }
    }

    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidConfig(_)
                | SyncError::MissingDeviceId
                | SyncError::ConfigLoadFailed(_)
                | SyncError::ConfigSaveFailed(_)
        )
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

// =============================================================================
// RemoteError
// =============================================================================

/// Failure reported by a [`RemoteStore`](crate::remote::RemoteStore).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// No route to the store (offline, DNS, TLS handshake...).
    #[error("Remote store unreachable: {0}")]
    Unreachable(String),

    /// The store refused this document. Retrying the same payload will
    /// usually fail the same way.
    #[error("Remote store rejected {entity_type}/{id}: {reason}")]
    Rejected {
        entity_type: EntityType,
        id: String,
        reason: String,
    },

    /// A fetched document could not be turned back into a record.
    #[error("Invalid remote document {entity_type}/{id}: {reason}")]
    InvalidDocument {
        entity_type: EntityType,
        id: String,
        reason: String,
    },

    #[error("Remote store error: {0}")]
    Server(String),
}

impl RemoteError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Unreachable(_) | RemoteError::Server(_))
    }
}

//! # Error Types
//!
//! Domain-specific error types for stockroom-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Where errors come from                            │
//! │                                                                         │
//! │  stockroom-core errors (this file)                                     │
//! │  ├── CoreError        - Domain rule violations                         │
//! │  └── ValidationError  - Rejected field values                          │
//! │                                                                         │
//! │  stockroom-db errors                                                   │
//! │  └── DbError          - Local store failures (wraps CoreError)         │
//! │                                                                         │
//! │  stockroom-sync errors                                                 │
//! │  ├── RemoteError      - Remote store adapter failures                  │
//! │  └── SyncError        - Drain / agent / config failures                │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → DbError → SyncError               │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::types::{EntityType, ItemStatus};

// =============================================================================
// Core Error
// =============================================================================

/// Domain rule violations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Item id or barcode does not resolve to a local record.
    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Staff member not found: {0}")]
    StaffNotFound(String),

    #[error("Checkout log not found: {0}")]
    CheckoutLogNotFound(String),

    /// Item cannot be checked out in its current state.
    ///
    /// ## When This Occurs
    /// - Item already checked out by someone else
    /// - Item is in maintenance or retired
    #[error("Item {item_id} is {status} and cannot be checked out")]
    ItemUnavailable { item_id: String, status: ItemStatus },

    /// Staff member is inactive.
    #[error("Staff member {0} is inactive")]
    StaffInactive(String),

    /// Check-in requested for a log that is already closed.
    #[error("Checkout {0} has already been checked in")]
    AlreadyCheckedIn(String),

    /// Record received from (or sent to) the remote store does not match
    /// the schema for its entity type.
    #[error("Invalid {entity_type} record: {reason}")]
    InvalidRecord {
        entity_type: EntityType,
        reason: String,
    },

    /// A field failed validation.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    pub fn invalid_record(entity_type: EntityType, reason: impl Into<String>) -> Self {
        CoreError::InvalidRecord {
            entity_type,
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Field-level input problems, reported before anything is written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Empty or whitespace-only.
    #[error("{field} is required")]
    Required { field: String },

    /// Longer than `max` characters.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Invalid format (e.g., invalid UUID, bad barcode characters).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Not one of `allowed`.
    #[error("{field} must be one of: {allowed:?}")]
    NotAllowed { field: String, allowed: Vec<String> },

    /// Two timestamps are in the wrong order.
    #[error("{field} must not be earlier than {earliest}")]
    TooEarly { field: String, earliest: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Result of a domain operation.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

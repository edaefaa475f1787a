//! # stockroom-core: Pure Domain Logic for Stockroom
//!
//! Entities, outbox records, the remote record schema, validation rules and
//! checkout reports. Nothing in this crate performs I/O.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stockroom Architecture                           │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                    Mobile UI (not in this workspace)            │   │
//! │  │    Scan ──► Check out / Check in ──► History ──► Reports        │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ stockroom-core (THIS CRATE) ★                    │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   types   │  │  record   │  │  report   │  │ validation│  │   │
//! │  │   │   Item    │  │ Remote-   │  │ Checkout- │  │   rules   │  │   │
//! │  │   │   Staff   │  │ Record    │  │ Report    │  │  checks   │  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │            stockroom-db / stockroom-sync                        │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Entities and outbox records
//! - [`record`] - Tagged remote record schema
//! - [`report`] - Checkout history reports
//! - [`validation`] - Field and record validation
//! - [`error`] - Domain error types

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod record;
pub mod report;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, CoreResult, ValidationError};
pub use record::{Fields, RemoteRecord};
pub use report::CheckoutReport;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Replay attempts before a pending operation is abandoned.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

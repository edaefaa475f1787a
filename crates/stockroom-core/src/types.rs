//! # Domain Types
//!
//! Core domain types used throughout Stockroom.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │      Item       │   │      Staff      │   │   CheckoutLog   │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  id (UUID)      │   │  id (UUID)      │   │  id (UUID)      │       │
//! │  │  barcode        │   │  name           │   │  item_id        │       │
//! │  │  category       │   │  department     │   │  staff_id       │       │
//! │  │  status         │   │  active         │   │  checkin_time?  │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! │                                                                         │
//! │  ┌─────────────────┐   ┌─────────────────┐   ┌─────────────────┐       │
//! │  │ PendingOperation│   │   EntityType    │   │  OperationKind  │       │
//! │  │  ─────────────  │   │  ─────────────  │   │  ─────────────  │       │
//! │  │  entity_type    │   │  Item           │   │  Insert         │       │
//! │  │  entity_id      │   │  Staff          │   │  Update         │       │
//! │  │  retry_count    │   │  CheckoutLog    │   │  Delete         │       │
//! │  └─────────────────┘   └─────────────────┘   └─────────────────┘       │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Timestamps
//! Every timestamp is a signed epoch-millisecond integer ([`EpochMillis`]).
//! `last_modified` is bumped on each local edit; `last_sync_timestamp` is set
//! only when the record has been confirmed by the remote store.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Milliseconds since the Unix epoch.
pub type EpochMillis = i64;

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> EpochMillis {
    Utc::now().timestamp_millis()
}

/// Generates a new entity identifier (UUID v4, hyphenated).
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

// =============================================================================
// Entity Type
// =============================================================================

/// Tag identifying which table / remote collection a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    Item,
    Staff,
    CheckoutLog,
}

impl EntityType {
    /// All entity types, in dependency order (items and staff before logs).
    pub const ALL: [EntityType; 3] = [EntityType::Item, EntityType::Staff, EntityType::CheckoutLog];

    /// Name of the remote collection holding this entity type.
    pub fn collection(&self) -> &'static str {
        match self {
            EntityType::Item => "items",
            EntityType::Staff => "staff",
            EntityType::CheckoutLog => "checkout_logs",
        }
    }

    /// Tag as stored in the `pending_operations` table.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Item => "ITEM",
            EntityType::Staff => "STAFF",
            EntityType::CheckoutLog => "CHECKOUT_LOG",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ITEM" | "ITEMS" => Ok(EntityType::Item),
            "STAFF" => Ok(EntityType::Staff),
            "CHECKOUT_LOG" | "CHECKOUT_LOGS" => Ok(EntityType::CheckoutLog),
            _ => Err(ValidationError::NotAllowed {
                field: "entity_type".to_string(),
                allowed: vec![
                    "ITEM".to_string(),
                    "STAFF".to_string(),
                    "CHECKOUT_LOG".to_string(),
                ],
            }),
        }
    }
}

// =============================================================================
// Operation Kind
// =============================================================================

/// The kind of mutation a pending operation replays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
}

impl OperationKind {
    /// INSERT and UPDATE are both replayed as a remote upsert.
    #[inline]
    pub fn is_upsert(&self) -> bool {
        matches!(self, OperationKind::Insert | OperationKind::Update)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Insert => write!(f, "INSERT"),
            OperationKind::Update => write!(f, "UPDATE"),
            OperationKind::Delete => write!(f, "DELETE"),
        }
    }
}

// =============================================================================
// Entity Trait
// =============================================================================

/// Behaviour shared by every synchronized record.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Tag of this record type.
    const ENTITY_TYPE: EntityType;

    /// Stable identifier (never changes after creation).
    fn id(&self) -> &str;

    /// Epoch millis of the last local edit.
    fn last_modified(&self) -> EpochMillis;

    /// Bumps `last_modified` to `now`.
    fn touch(&mut self, now: EpochMillis);
}

// =============================================================================
// Item
// =============================================================================

/// Lifecycle status of a tracked item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "SCREAMING_SNAKE_CASE"))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    /// On the shelf, can be checked out.
    #[default]
    Available,
    /// Currently held by a staff member.
    CheckedOut,
    /// Out of service for repair.
    Maintenance,
    /// Permanently withdrawn from use.
    Retired,
}

impl ItemStatus {
    #[inline]
    pub fn is_available(&self) -> bool {
        matches!(self, ItemStatus::Available)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemStatus::Available => write!(f, "AVAILABLE"),
            ItemStatus::CheckedOut => write!(f, "CHECKED_OUT"),
            ItemStatus::Maintenance => write!(f, "MAINTENANCE"),
            ItemStatus::Retired => write!(f, "RETIRED"),
        }
    }
}

/// A physical item tracked by barcode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Item {
    /// Unique identifier (UUID v4).
    pub id: String,

    /// Display name shown in lists and reports.
    pub name: String,

    /// Scanned barcode (EAN-13, Code 128, QR payload...). Unique when present.
    pub barcode: Option<String>,

    /// Free-form grouping, e.g. "Laptops" or "Power Tools".
    pub category: String,

    pub description: Option<String>,

    /// Shelf or room the item normally lives in.
    pub location: Option<String>,

    pub status: ItemStatus,

    pub last_modified: EpochMillis,

    /// When the remote store last confirmed this record.
    pub last_sync_timestamp: Option<EpochMillis>,
}

impl Item {
    /// Creates a new available item with a fresh id.
    pub fn new(name: impl Into<String>, category: impl Into<String>) -> Self {
        Item {
            id: new_id(),
            name: name.into(),
            barcode: None,
            category: category.into(),
            description: None,
            location: None,
            status: ItemStatus::Available,
            last_modified: now_millis(),
            last_sync_timestamp: None,
        }
    }

    /// Sets the barcode.
    pub fn with_barcode(mut self, barcode: impl Into<String>) -> Self {
        self.barcode = Some(barcode.into());
        self
    }

    /// Sets the storage location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = Some(location.into());
        self
    }
}

impl Entity for Item {
    const ENTITY_TYPE: EntityType = EntityType::Item;

    fn id(&self) -> &str {
        &self.id
    }

    fn last_modified(&self) -> EpochMillis {
        self.last_modified
    }

    fn touch(&mut self, now: EpochMillis) {
        self.last_modified = now;
    }
}

// =============================================================================
// Staff
// =============================================================================

/// A staff member who can check items out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Staff {
    pub id: String,
    pub name: String,
    pub department: String,
    pub email: Option<String>,
    pub position: Option<String>,
    /// Inactive staff keep their history but cannot check items out.
    pub active: bool,
    pub last_modified: EpochMillis,
    pub last_sync_timestamp: Option<EpochMillis>,
}

impl Staff {
    /// Creates a new active staff record with a fresh id.
    pub fn new(name: impl Into<String>, department: impl Into<String>) -> Self {
        Staff {
            id: new_id(),
            name: name.into(),
            department: department.into(),
            email: None,
            position: None,
            active: true,
            last_modified: now_millis(),
            last_sync_timestamp: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

impl Entity for Staff {
    const ENTITY_TYPE: EntityType = EntityType::Staff;

    fn id(&self) -> &str {
        &self.id
    }

    fn last_modified(&self) -> EpochMillis {
        self.last_modified
    }

    fn touch(&mut self, now: EpochMillis) {
        self.last_modified = now;
    }
}

// =============================================================================
// Checkout Log
// =============================================================================

/// One checkout of an item by a staff member.
///
/// A log is *open* until `checkin_time` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct CheckoutLog {
    pub id: String,
    pub item_id: String,
    pub staff_id: String,
    pub checkout_time: EpochMillis,
    /// Expected return time, if the checkout has a deadline.
    pub due_time: Option<EpochMillis>,
    pub checkin_time: Option<EpochMillis>,
    pub notes: Option<String>,
    pub last_modified: EpochMillis,
    pub last_sync_timestamp: Option<EpochMillis>,
}

impl CheckoutLog {
    /// Opens a new checkout at `now`.
    pub fn open(
        item_id: impl Into<String>,
        staff_id: impl Into<String>,
        now: EpochMillis,
        due_time: Option<EpochMillis>,
    ) -> Self {
        CheckoutLog {
            id: new_id(),
            item_id: item_id.into(),
            staff_id: staff_id.into(),
            checkout_time: now,
            due_time,
            checkin_time: None,
            notes: None,
            last_modified: now,
            last_sync_timestamp: None,
        }
    }

    /// True while the item has not been returned.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.checkin_time.is_none()
    }

    /// Open and past its due time.
    pub fn is_overdue(&self, now: EpochMillis) -> bool {
        self.is_open() && self.due_time.is_some_and(|due| due < now)
    }

    /// Duration of a closed checkout.
    pub fn duration_millis(&self) -> Option<i64> {
        self.checkin_time.map(|t| t - self.checkout_time)
    }
}

impl Entity for CheckoutLog {
    const ENTITY_TYPE: EntityType = EntityType::CheckoutLog;

    fn id(&self) -> &str {
        &self.id
    }

    fn last_modified(&self) -> EpochMillis {
        self.last_modified
    }

    fn touch(&mut self, now: EpochMillis) {
        self.last_modified = now;
    }
}

// =============================================================================
// Pending Operation (Outbox)
// =============================================================================

/// A local mutation not yet confirmed by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct PendingOperation {
    pub id: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub operation: OperationKind,
    /// Creation time; governs replay order.
    pub created_at: EpochMillis,
    /// Number of failed replay attempts.
    pub retry_count: i64,
    /// Error text of the most recent failed attempt.
    pub last_error: Option<String>,
}

impl PendingOperation {
    pub fn new(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        operation: OperationKind,
        created_at: EpochMillis,
    ) -> Self {
        PendingOperation {
            id: new_id(),
            entity_type,
            entity_id: entity_id.into(),
            operation,
            created_at,
            retry_count: 0,
            last_error: None,
        }
    }

    /// True once the retry budget is spent; such operations are never replayed.
    #[inline]
    pub fn is_exhausted(&self, max_retries: u32) -> bool {
        self.retry_count >= i64::from(max_retries)
    }
}

/// A pending operation that spent its retry budget and was archived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct FailedOperation {
    pub id: String,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub operation: OperationKind,
    pub created_at: EpochMillis,
    pub retry_count: i64,
    pub last_error: Option<String>,
    /// When the operation was moved out of the queue.
    pub failed_at: EpochMillis,
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_parsing() {
        assert_eq!("item".parse::<EntityType>().unwrap(), EntityType::Item);
        assert_eq!("STAFF".parse::<EntityType>().unwrap(), EntityType::Staff);
        assert_eq!(
            "checkout_logs".parse::<EntityType>().unwrap(),
            EntityType::CheckoutLog
        );
        assert!("product".parse::<EntityType>().is_err());
    }

    #[test]
    fn test_entity_type_serde_tag() {
        let json = serde_json::to_string(&EntityType::CheckoutLog).unwrap();
        assert_eq!(json, "\"CHECKOUT_LOG\"");
        assert_eq!(EntityType::CheckoutLog.collection(), "checkout_logs");
    }

    #[test]
    fn test_operation_kind_upsert() {
        assert!(OperationKind::Insert.is_upsert());
        assert!(OperationKind::Update.is_upsert());
        assert!(!OperationKind::Delete.is_upsert());
    }

    #[test]
    fn test_item_defaults() {
        let item = Item::new("Drill", "Power Tools").with_barcode("4006381333931");
        assert_eq!(item.status, ItemStatus::Available);
        assert_eq!(item.barcode.as_deref(), Some("4006381333931"));
        assert!(item.last_sync_timestamp.is_none());
        assert!(Uuid::parse_str(&item.id).is_ok());
    }

    #[test]
    fn test_checkout_log_overdue() {
        let mut log = CheckoutLog::open("item", "staff", 1_000, Some(2_000));
        assert!(log.is_open());
        assert!(!log.is_overdue(1_500));
        assert!(log.is_overdue(2_500));

        log.checkin_time = Some(3_000);
        assert!(!log.is_overdue(4_000));
        assert_eq!(log.duration_millis(), Some(2_000));
    }

    #[test]
    fn test_pending_operation_exhaustion() {
        let mut op = PendingOperation::new(EntityType::Item, "x", OperationKind::Insert, 1);
        assert!(!op.is_exhausted(3));
        op.retry_count = 3;
        assert!(op.is_exhausted(3));
    }
}

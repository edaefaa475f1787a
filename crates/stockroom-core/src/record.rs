//! # Remote Record Schema
//!
//! Tagged representation of a record as it travels to and from the remote
//! document store.
//!
//! ## Wire Shape
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  RemoteRecord::Item(item)                                               │
//! │       │                                                                 │
//! │       │ to_fields()                                                     │
//! │       ▼                                                                 │
//! │  collection "items", document id = item.id                             │
//! │  { "id": "...", "name": "Drill", "barcode": "400...",                  │
//! │    "category": "Tools", "status": "AVAILABLE",                         │
//! │    "last_modified": 1717000000000, ... }                               │
//! │                                                                         │
//! │  Only scalar JSON values (string, number, bool, null) are allowed.     │
//! │  `last_sync_timestamp` is local bookkeeping and never leaves the       │
//! │  device.                                                                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CoreError, CoreResult};
use crate::types::{CheckoutLog, EntityType, EpochMillis, Item, Staff};
use crate::validation::{validate_checkout_log, validate_item, validate_staff};

/// Field map of one remote document.
pub type Fields = Map<String, Value>;

/// Field that stays local.
const LOCAL_ONLY_FIELD: &str = "last_sync_timestamp";

/// One record, tagged by entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity_type", content = "record", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemoteRecord {
    Item(Item),
    Staff(Staff),
    CheckoutLog(CheckoutLog),
}

impl RemoteRecord {
    pub fn entity_type(&self) -> EntityType {
        match self {
            RemoteRecord::Item(_) => EntityType::Item,
            RemoteRecord::Staff(_) => EntityType::Staff,
            RemoteRecord::CheckoutLog(_) => EntityType::CheckoutLog,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            RemoteRecord::Item(r) => &r.id,
            RemoteRecord::Staff(r) => &r.id,
            RemoteRecord::CheckoutLog(r) => &r.id,
        }
    }

    pub fn last_modified(&self) -> EpochMillis {
        match self {
            RemoteRecord::Item(r) => r.last_modified,
            RemoteRecord::Staff(r) => r.last_modified,
            RemoteRecord::CheckoutLog(r) => r.last_modified,
        }
    }

    /// Validates the wrapped record against its entity schema.
    pub fn validate(&self) -> CoreResult<()> {
        let result = match self {
            RemoteRecord::Item(r) => validate_item(r),
            RemoteRecord::Staff(r) => validate_staff(r),
            RemoteRecord::CheckoutLog(r) => validate_checkout_log(r),
        };
        result.map_err(|e| CoreError::invalid_record(self.entity_type(), e.to_string()))
    }

    /// Serializes the record into a flat field map.
    ///
    /// Fails when the record does not validate.
    pub fn to_fields(&self) -> CoreResult<Fields> {
        self.validate()?;

        let value = match self {
            RemoteRecord::Item(r) => serde_json::to_value(r),
            RemoteRecord::Staff(r) => serde_json::to_value(r),
            RemoteRecord::CheckoutLog(r) => serde_json::to_value(r),
        }
        .map_err(|e| CoreError::invalid_record(self.entity_type(), e.to_string()))?;

        let mut fields = match value {
            Value::Object(map) => map,
            other => {
                return Err(CoreError::invalid_record(
                    self.entity_type(),
                    format!("expected an object, got {other}"),
                ))
            }
        };
        fields.remove(LOCAL_ONLY_FIELD);
        Ok(fields)
    }

    /// Rebuilds a record from a field map, rejecting nested values, id
    /// mismatches and records that fail validation.
    pub fn from_fields(entity_type: EntityType, id: &str, fields: &Fields) -> CoreResult<Self> {
        if let Some((key, _)) = fields
            .iter()
            .find(|(_, v)| matches!(v, Value::Array(_) | Value::Object(_)))
        {
            return Err(CoreError::invalid_record(
                entity_type,
                format!("field '{key}' is not a scalar"),
            ));
        }

        let mut fields = fields.clone();
        fields.remove(LOCAL_ONLY_FIELD);
        let value = Value::Object(fields);

        let record = match entity_type {
            EntityType::Item => serde_json::from_value(value).map(RemoteRecord::Item),
            EntityType::Staff => serde_json::from_value(value).map(RemoteRecord::Staff),
            EntityType::CheckoutLog => {
                serde_json::from_value(value).map(RemoteRecord::CheckoutLog)
            }
        }
        .map_err(|e| CoreError::invalid_record(entity_type, e.to_string()))?;

        if record.id() != id {
            return Err(CoreError::invalid_record(
                entity_type,
                format!("document id '{id}' does not match record id '{}'", record.id()),
            ));
        }

        record.validate()?;
        Ok(record)
    }
}

impl From<Item> for RemoteRecord {
    fn from(item: Item) -> Self {
        RemoteRecord::Item(item)
    }
}

impl From<Staff> for RemoteRecord {
    fn from(staff: Staff) -> Self {
        RemoteRecord::Staff(staff)
    }
}

impl From<CheckoutLog> for RemoteRecord {
    fn from(log: CheckoutLog) -> Self {
        RemoteRecord::CheckoutLog(log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ItemStatus;

    #[test]
    fn test_fields_drop_local_bookkeeping() {
        let mut item = Item::new("Ladder", "Facilities").with_barcode("LAD-7");
        item.last_sync_timestamp = Some(42);

        let fields = RemoteRecord::from(item.clone()).to_fields().unwrap();
        assert!(!fields.contains_key("last_sync_timestamp"));
        assert_eq!(fields["status"], Value::String("AVAILABLE".into()));

        let back = RemoteRecord::from_fields(EntityType::Item, &item.id, &fields).unwrap();
        item.last_sync_timestamp = None;
        assert_eq!(back, RemoteRecord::Item(item));
    }

    #[test]
    fn test_from_fields_rejects_nested_values() {
        let staff = Staff::new("Rae", "Ops");
        let mut fields = RemoteRecord::from(staff.clone()).to_fields().unwrap();
        fields.insert("tags".into(), serde_json::json!(["a", "b"]));

        let err = RemoteRecord::from_fields(EntityType::Staff, &staff.id, &fields).unwrap_err();
        assert!(err.to_string().contains("not a scalar"));
    }

    #[test]
    fn test_from_fields_rejects_id_mismatch() {
        let item = Item::new("Tripod", "AV");
        let fields = RemoteRecord::from(item).to_fields().unwrap();
        let other_id = crate::types::new_id();

        assert!(RemoteRecord::from_fields(EntityType::Item, &other_id, &fields).is_err());
    }

    #[test]
    fn test_from_fields_rejects_wrong_schema() {
        let item = Item::new("Tripod", "AV");
        let fields = RemoteRecord::from(item.clone()).to_fields().unwrap();

        // An item document is not a valid staff record (missing department).
        assert!(RemoteRecord::from_fields(EntityType::Staff, &item.id, &fields).is_err());
    }

    #[test]
    fn test_invalid_record_is_not_serialized() {
        let mut item = Item::new("Tripod", "AV");
        item.name = String::new();
        item.status = ItemStatus::Retired;

        assert!(RemoteRecord::from(item).to_fields().is_err());
    }

    #[test]
    fn test_tagged_serde() {
        let staff = Staff::new("Rae", "Ops");
        let json = serde_json::to_value(RemoteRecord::from(staff)).unwrap();
        assert_eq!(json["entity_type"], "STAFF");
        assert_eq!(json["record"]["department"], "Ops");
    }
}

//! # Remote Store Adapter
//!
//! The seam between the sync layer and the cloud document store.
//!
//! ## Document Model
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Remote Document Store                            │
//! │                                                                         │
//! │   collection "items"           collection "staff"                       │
//! │   ┌───────────────────────┐    ┌───────────────────────┐               │
//! │   │ doc <item.id>         │    │ doc <staff.id>        │               │
//! │   │  { name, barcode, ..} │    │  { name, department } │               │
//! │   └───────────────────────┘    └───────────────────────┘               │
//! │                                                                         │
//! │   collection "checkout_logs"                                           │
//! │   ┌───────────────────────────────────────────┐                        │
//! │   │ doc <log.id>                              │                        │
//! │   │  { item_id, staff_id, checkout_time, .. } │                        │
//! │   └───────────────────────────────────────────┘                        │
//! │                                                                         │
//! │  upsert  = set(doc, fields) full replace, idempotent                    │
//! │  delete  = delete(doc), no-op when absent                               │
//! │  get_all = every document in one collection                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Records cross this boundary as [`RemoteRecord`] values. Adapters encode
//! them with [`encode`] and decode fetched documents with [`decode`], so an
//! invalid record never leaves the device and a malformed document never
//! reaches the local store.

pub mod memory;

use async_trait::async_trait;

use stockroom_core::{CoreError, EntityType, Fields, RemoteRecord};

use crate::error::RemoteError;

pub use memory::{InMemoryRemoteStore, RemoteCall};

/// Cloud document store as seen by the sync manager.
///
/// Implementations must be safe to call from several tasks at once; the
/// manager itself never issues overlapping calls.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Creates or fully replaces the document for `record`.
    async fn upsert(&self, record: &RemoteRecord) -> Result<(), RemoteError>;

    /// Deletes a document. Deleting a missing document succeeds.
    async fn delete(&self, entity_type: EntityType, id: &str) -> Result<(), RemoteError>;

    /// Fetches every document of one collection.
    async fn get_all(&self, entity_type: EntityType) -> Result<Vec<RemoteRecord>, RemoteError>;

    /// Cheap connectivity check consulted before each drain.
    async fn is_reachable(&self) -> bool;
}

/// Encodes a record into its document id and field map.
pub fn encode(record: &RemoteRecord) -> Result<(String, Fields), RemoteError> {
    let fields = record.to_fields().map_err(|e| RemoteError::Rejected {
        entity_type: record.entity_type(),
        id: record.id().to_string(),
        reason: reason(e),
    })?;
    Ok((record.id().to_string(), fields))
}

/// Decodes a fetched document back into a validated record.
pub fn decode(entity_type: EntityType, id: &str, fields: &Fields) -> Result<RemoteRecord, RemoteError> {
    RemoteRecord::from_fields(entity_type, id, fields).map_err(|e| RemoteError::InvalidDocument {
        entity_type,
        id: id.to_string(),
        reason: reason(e),
    })
}

fn reason(err: CoreError) -> String {
    match err {
        CoreError::InvalidRecord { reason, .. } => reason,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockroom_core::{Item, Staff};

    #[test]
    fn test_encode_uses_record_id() {
        let staff = Staff::new("Dana Fox", "Events");
        let (id, fields) = encode(&RemoteRecord::from(staff.clone())).unwrap();

        assert_eq!(id, staff.id);
        assert_eq!(fields["department"], "Events");
    }

    #[test]
    fn test_encode_rejects_invalid_record() {
        let mut item = Item::new("Drill", "Tools");
        item.name = "   ".into();

        let err = encode(&RemoteRecord::from(item.clone())).unwrap_err();
        assert!(matches!(
            err,
            RemoteError::Rejected { entity_type: EntityType::Item, ref id, .. } if *id == item.id
        ));
    }

    #[test]
    fn test_decode_reports_invalid_document() {
        let item = Item::new("Drill", "Tools");
        let (id, mut fields) = encode(&RemoteRecord::from(item)).unwrap();
        fields.remove("category");

        let err = decode(EntityType::Item, &id, &fields).unwrap_err();
        assert!(matches!(err, RemoteError::InvalidDocument { .. }));
        assert!(!err.is_transient());
    }
}

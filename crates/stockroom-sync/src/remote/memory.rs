//! # In-Memory Remote Store
//!
//! A [`RemoteStore`] that keeps its collections in process memory. Used by
//! tests and local development in place of the cloud backend.
//!
//! ## Fault Injection
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  set_online(false)      every call fails Unreachable,                  │
//! │                         is_reachable() reports false                   │
//! │                                                                         │
//! │  fail_next(n)           the next n upsert/delete calls fail with a     │
//! │                         Server error                                   │
//! │                                                                         │
//! │  reject_id(id)          writes for this document id are Rejected       │
//! │                         until allow_id(id)                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every call is appended to a call log ([`InMemoryRemoteStore::calls`]),
//! including calls that failed, so tests can assert how often an operation
//! was actually replayed.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use stockroom_core::{EntityType, Fields, RemoteRecord};

use super::{decode, encode, RemoteStore};
use crate::error::RemoteError;

/// One call received by the in-memory store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    Upsert { entity_type: EntityType, id: String },
    Delete { entity_type: EntityType, id: String },
    GetAll(EntityType),
}

impl RemoteCall {
    /// Document id touched by a write call.
    pub fn document_id(&self) -> Option<&str> {
        match self {
            RemoteCall::Upsert { id, .. } | RemoteCall::Delete { id, .. } => Some(id),
            RemoteCall::GetAll(_) => None,
        }
    }
}

#[derive(Debug, Default)]
struct Inner {
    collections: HashMap<EntityType, BTreeMap<String, Fields>>,
    fail_next: u32,
    rejected_ids: HashSet<String>,
    calls: Vec<RemoteCall>,
}

impl Inner {
    /// Applies injected faults to a write call.
    fn check_write(&mut self, entity_type: EntityType, id: &str) -> Result<(), RemoteError> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(RemoteError::Server("injected failure".into()));
        }
        if self.rejected_ids.contains(id) {
            return Err(RemoteError::Rejected {
                entity_type,
                id: id.to_string(),
                reason: "permission denied".into(),
            });
        }
        Ok(())
    }
}

/// Remote store backed by in-process maps.
#[derive(Debug)]
pub struct InMemoryRemoteStore {
    online: AtomicBool,
    inner: Mutex<Inner>,
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRemoteStore {
    /// Creates an empty, reachable store.
    pub fn new() -> Self {
        InMemoryRemoteStore {
            online: AtomicBool::new(true),
            inner: Mutex::new(Inner::default()),
        }
    }

    // =========================================================================
    // Fault Injection
    // =========================================================================

    /// Switches connectivity on or off.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        debug!(online, "In-memory remote connectivity changed");
    }

    /// Fails the next `n` write calls with a server error.
    pub async fn fail_next(&self, n: u32) {
        self.inner.lock().await.fail_next = n;
    }

    /// Rejects every write to document `id`.
    pub async fn reject_id(&self, id: impl Into<String>) {
        self.inner.lock().await.rejected_ids.insert(id.into());
    }

    /// Stops rejecting writes to document `id`.
    pub async fn allow_id(&self, id: &str) {
        self.inner.lock().await.rejected_ids.remove(id);
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Decoded copy of one document, if present and valid.
    pub async fn get(&self, entity_type: EntityType, id: &str) -> Option<RemoteRecord> {
        let inner = self.inner.lock().await;
        let fields = inner.collections.get(&entity_type)?.get(id)?;
        decode(entity_type, id, fields).ok()
    }

    /// Raw field map of one document.
    pub async fn raw(&self, entity_type: EntityType, id: &str) -> Option<Fields> {
        let inner = self.inner.lock().await;
        inner.collections.get(&entity_type)?.get(id).cloned()
    }

    /// Stores a document verbatim, bypassing validation.
    ///
    /// Simulates writes made by other devices or by hand in the console.
    pub async fn put_raw(&self, entity_type: EntityType, id: impl Into<String>, fields: Fields) {
        let mut inner = self.inner.lock().await;
        inner
            .collections
            .entry(entity_type)
            .or_default()
            .insert(id.into(), fields);
    }

    /// Number of documents in one collection.
    pub async fn len(&self, entity_type: EntityType) -> usize {
        let inner = self.inner.lock().await;
        inner.collections.get(&entity_type).map_or(0, BTreeMap::len)
    }

    /// True when every collection is empty.
    pub async fn is_empty(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.collections.values().all(BTreeMap::is_empty)
    }

    /// Every call received so far, oldest first.
    pub async fn calls(&self) -> Vec<RemoteCall> {
        self.inner.lock().await.calls.clone()
    }

    /// Number of write calls that targeted document `id`.
    pub async fn write_attempts(&self, id: &str) -> usize {
        let inner = self.inner.lock().await;
        inner
            .calls
            .iter()
            .filter(|call| call.document_id() == Some(id))
            .count()
    }

    fn unreachable(&self) -> Option<RemoteError> {
        if self.online.load(Ordering::SeqCst) {
            None
        } else {
            Some(RemoteError::Unreachable("in-memory store is offline".into()))
        }
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn upsert(&self, record: &RemoteRecord) -> Result<(), RemoteError> {
        let entity_type = record.entity_type();
        let mut inner = self.inner.lock().await;
        inner.calls.push(RemoteCall::Upsert {
            entity_type,
            id: record.id().to_string(),
        });

        if let Some(err) = self.unreachable() {
            return Err(err);
        }
        inner.check_write(entity_type, record.id())?;

        let (id, fields) = encode(record)?;
        inner
            .collections
            .entry(entity_type)
            .or_default()
            .insert(id, fields);

        debug!(collection = entity_type.collection(), id = %record.id(), "Document set");
        Ok(())
    }

    async fn delete(&self, entity_type: EntityType, id: &str) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(RemoteCall::Delete {
            entity_type,
            id: id.to_string(),
        });

        if let Some(err) = self.unreachable() {
            return Err(err);
        }
        inner.check_write(entity_type, id)?;

        let existed = inner
            .collections
            .get_mut(&entity_type)
            .and_then(|docs| docs.remove(id))
            .is_some();

        debug!(collection = entity_type.collection(), id = %id, existed, "Document deleted");
        Ok(())
    }

    async fn get_all(&self, entity_type: EntityType) -> Result<Vec<RemoteRecord>, RemoteError> {
        let mut inner = self.inner.lock().await;
        inner.calls.push(RemoteCall::GetAll(entity_type));

        if let Some(err) = self.unreachable() {
            return Err(err);
        }

        let Some(docs) = inner.collections.get(&entity_type) else {
            return Ok(Vec::new());
        };

        let mut records = Vec::with_capacity(docs.len());
        for (id, fields) in docs {
            match decode(entity_type, id, fields) {
                Ok(record) => records.push(record),
                Err(e) => warn!(error = %e, "Skipping malformed remote document"),
            }
        }
        Ok(records)
    }

    async fn is_reachable(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockroom_core::{Item, Staff};

    #[tokio::test]
    async fn test_upsert_replaces_document() {
        let store = InMemoryRemoteStore::new();
        let mut item = Item::new("Projector", "AV");

        store.upsert(&RemoteRecord::from(item.clone())).await.unwrap();
        item.location = Some("Room 4".into());
        store.upsert(&RemoteRecord::from(item.clone())).await.unwrap();

        assert_eq!(store.len(EntityType::Item).await, 1);
        assert_eq!(
            store.get(EntityType::Item, &item.id).await,
            Some(RemoteRecord::Item(item))
        );
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let store = InMemoryRemoteStore::new();
        store.delete(EntityType::Staff, "nope").await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_offline_fails_and_logs_call() {
        let store = InMemoryRemoteStore::new();
        let staff = Staff::new("Ana", "IT");
        store.set_online(false);

        assert!(!store.is_reachable().await);
        let err = store.upsert(&RemoteRecord::from(staff.clone())).await.unwrap_err();
        assert!(matches!(err, RemoteError::Unreachable(_)));
        assert_eq!(store.write_attempts(&staff.id).await, 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_fail_next_and_reject() {
        let store = InMemoryRemoteStore::new();
        let a = Item::new("Saw", "Tools");
        let b = Item::new("Level", "Tools");

        store.fail_next(1).await;
        assert!(matches!(
            store.upsert(&RemoteRecord::from(a.clone())).await,
            Err(RemoteError::Server(_))
        ));
        store.upsert(&RemoteRecord::from(a.clone())).await.unwrap();

        store.reject_id(b.id.clone()).await;
        assert!(matches!(
            store.upsert(&RemoteRecord::from(b.clone())).await,
            Err(RemoteError::Rejected { .. })
        ));
        store.allow_id(&b.id).await;
        store.upsert(&RemoteRecord::from(b)).await.unwrap();

        assert_eq!(store.len(EntityType::Item).await, 2);
    }

    #[tokio::test]
    async fn test_get_all_skips_malformed_documents() {
        let store = InMemoryRemoteStore::new();
        let good = Staff::new("Ana", "IT");
        store.upsert(&RemoteRecord::from(good.clone())).await.unwrap();

        let mut broken = Fields::new();
        broken.insert("name".into(), "No Department".into());
        store
            .put_raw(EntityType::Staff, stockroom_core::new_id(), broken)
            .await;

        let records = store.get_all(EntityType::Staff).await.unwrap();
        assert_eq!(records, vec![RemoteRecord::Staff(good)]);
        assert!(store.get_all(EntityType::Item).await.unwrap().is_empty());
    }
}

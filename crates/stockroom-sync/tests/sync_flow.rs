//! End-to-end outbox behaviour: repositories enqueue, the manager drains
//! into an in-memory remote store.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};

use stockroom_core::{
    now_millis, EntityType, Item, ItemStatus, OperationKind, PendingOperation, RemoteRecord, Staff,
};
use stockroom_db::{Database, DbConfig};
use stockroom_sync::{
    InMemoryRemoteStore, RemoteCall, RemoteError, RemoteStore, SyncManager, ENTITY_NOT_FOUND,
};

async fn setup() -> (Database, Arc<InMemoryRemoteStore>, SyncManager) {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let remote = Arc::new(InMemoryRemoteStore::new());
    let manager = SyncManager::new(db.clone(), remote.clone());
    (db, remote, manager)
}

// =============================================================================
// Queue properties
// =============================================================================

#[tokio::test]
async fn every_mutation_enqueues_one_operation() {
    let (db, _remote, _manager) = setup().await;

    let mut item = db.items().insert(&Item::new("Drill", "Tools")).await.unwrap();
    for location in ["Cage A", "Cage B", "Van 2"] {
        item.location = Some(location.into());
        item = db.items().update(&item).await.unwrap();
    }
    db.items().delete(&item.id).await.unwrap();

    let ops = db.pending().list_all().await.unwrap();
    let kinds: Vec<_> = ops.iter().map(|op| op.operation).collect();
    assert_eq!(
        kinds,
        vec![
            OperationKind::Insert,
            OperationKind::Update,
            OperationKind::Update,
            OperationKind::Update,
            OperationKind::Delete,
        ]
    );
    assert!(ops.iter().all(|op| op.entity_id == item.id));
    assert!(ops.windows(2).all(|w| w[0].created_at < w[1].created_at));
}

#[tokio::test]
async fn drain_replays_in_ascending_creation_order() {
    let (db, remote, manager) = setup().await;
    let base = now_millis();

    // Enqueued out of order; deletes need no local entity.
    let ids = ["c", "a", "b"];
    for (id, offset) in ids.iter().zip([300, 100, 200]) {
        let op = PendingOperation::new(EntityType::Staff, *id, OperationKind::Delete, base + offset);
        db.pending().enqueue(&op).await.unwrap();
    }

    let report = manager.drain().await.unwrap();
    assert_eq!(report.succeeded, 3);

    let order: Vec<_> = remote
        .calls()
        .await
        .into_iter()
        .filter_map(|call| call.document_id().map(str::to_string))
        .collect();
    assert_eq!(order, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn replaying_an_upsert_twice_leaves_remote_identical() {
    let (db, remote, manager) = setup().await;
    let item = db.items().insert(&Item::new("Ladder", "Facilities")).await.unwrap();

    manager.drain().await.unwrap();
    let first = remote.raw(EntityType::Item, &item.id).await.unwrap();

    // The same entity queued again without a local change.
    db.pending()
        .enqueue_now(EntityType::Item, &item.id, OperationKind::Update)
        .await
        .unwrap();
    manager.drain().await.unwrap();
    let second = remote.raw(EntityType::Item, &item.id).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(remote.len(EntityType::Item).await, 1);
    assert_eq!(remote.write_attempts(&item.id).await, 2);
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn insert_then_successful_drain_empties_queue() {
    let (db, remote, manager) = setup().await;
    let item = db
        .items()
        .insert(&Item::new("Projector", "AV").with_barcode("AV-000001"))
        .await
        .unwrap();

    manager.drain().await.unwrap();

    assert_eq!(db.pending().count().await.unwrap(), 0);
    let stored = remote.get(EntityType::Item, &item.id).await.unwrap();
    match stored {
        RemoteRecord::Item(stored) => {
            assert_eq!(stored.barcode.as_deref(), Some("AV-000001"));
            assert_eq!(stored.last_modified, item.last_modified);
        }
        other => panic!("unexpected record {other:?}"),
    }
}

#[tokio::test]
async fn update_for_locally_deleted_entity_fails_and_stays_queued() {
    let (db, remote, manager) = setup().await;
    let mut item = db.items().insert(&Item::new("Tripod", "AV")).await.unwrap();
    manager.drain().await.unwrap();

    // Edited, then deleted before the edit could sync.
    item.description = Some("carbon legs".into());
    db.items().update(&item).await.unwrap();
    db.items().delete(&item.id).await.unwrap();

    let report = manager.drain().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.succeeded, 1);

    let ops = db.pending().list_all().await.unwrap();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].operation, OperationKind::Update);
    assert_eq!(ops[0].retry_count, 1);
    assert_eq!(ops[0].last_error.as_deref(), Some(ENTITY_NOT_FOUND));

    // The delete still went through.
    assert!(remote.get(EntityType::Item, &item.id).await.is_none());
}

#[tokio::test]
async fn operation_failing_three_drains_is_never_replayed_again() {
    let (db, remote, manager) = setup().await;
    assert_eq!(manager.max_retries(), 3);

    let staff = db.staff().insert(&Staff::new("Robin Okafor", "Facilities")).await.unwrap();
    remote.reject_id(staff.id.clone()).await;

    for attempt in 1..=3 {
        let report = manager.drain().await.unwrap();
        assert_eq!(report.failed, 1, "drain {attempt}");
    }

    // Fourth drain: skipped even though the remote would now accept it.
    remote.allow_id(&staff.id).await;
    let report = manager.drain().await.unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.attempted, 0);
    assert_eq!(remote.write_attempts(&staff.id).await, 3);
    assert!(remote.get(EntityType::Staff, &staff.id).await.is_none());

    assert_eq!(manager.purge_failed().await.unwrap(), 1);
    let failed = db.pending().list_failed().await.unwrap();
    assert_eq!(failed[0].entity_id, staff.id);
    assert_eq!(failed[0].retry_count, 3);

    manager.drain().await.unwrap();
    assert_eq!(remote.write_attempts(&staff.id).await, 3);
}

#[tokio::test]
async fn transient_failure_recovers_on_next_drain() {
    let (db, remote, manager) = setup().await;
    let item = db.items().insert(&Item::new("Multimeter", "Measurement")).await.unwrap();
    remote.fail_next(1).await;

    assert_eq!(manager.drain().await.unwrap().failed, 1);
    let report = manager.drain().await.unwrap();

    assert_eq!(report.succeeded, 1);
    assert_eq!(db.pending().count().await.unwrap(), 0);
    assert!(remote.get(EntityType::Item, &item.id).await.is_some());
}

#[tokio::test]
async fn local_delete_removes_remote_document() {
    let (db, remote, manager) = setup().await;
    let item = db.items().insert(&Item::new("Harness", "Safety")).await.unwrap();
    manager.drain().await.unwrap();
    assert_eq!(remote.len(EntityType::Item).await, 1);

    db.items().delete(&item.id).await.unwrap();
    manager.drain().await.unwrap();

    assert_eq!(remote.len(EntityType::Item).await, 0);
    assert_eq!(
        remote.calls().await.last(),
        Some(&RemoteCall::Delete {
            entity_type: EntityType::Item,
            id: item.id.clone()
        })
    );
}

#[tokio::test]
async fn checkout_workflow_reaches_remote() {
    let (db, remote, manager) = setup().await;
    let item = db.items().insert(&Item::new("Laser Level", "Measurement")).await.unwrap();
    let staff = db.staff().insert(&Staff::new("Jordan Lee", "Workshop")).await.unwrap();

    let log = db
        .checkout_logs()
        .check_out(&item.id, &staff.id, None, Some("site visit".into()))
        .await
        .unwrap();
    manager.drain().await.unwrap();

    match remote.get(EntityType::Item, &item.id).await.unwrap() {
        RemoteRecord::Item(remote_item) => assert_eq!(remote_item.status, ItemStatus::CheckedOut),
        other => panic!("unexpected record {other:?}"),
    }
    assert!(remote.get(EntityType::CheckoutLog, &log.id).await.is_some());

    db.checkout_logs().check_in(&log.id).await.unwrap();
    manager.drain().await.unwrap();

    match remote.get(EntityType::CheckoutLog, &log.id).await.unwrap() {
        RemoteRecord::CheckoutLog(remote_log) => assert!(remote_log.checkin_time.is_some()),
        other => panic!("unexpected record {other:?}"),
    }
    assert_eq!(db.pending().count().await.unwrap(), 0);
}

#[tokio::test]
async fn refresh_skips_stale_remote_copies() {
    let (db, remote, manager) = setup().await;
    let item = db.items().insert(&Item::new("Hard Hat", "Safety")).await.unwrap();
    manager.drain().await.unwrap();

    // Local edit newer than the remote copy, already synced.
    let mut edited = item.clone();
    edited.location = Some("Shelf 3".into());
    let edited = db.items().update(&edited).await.unwrap();
    manager.drain().await.unwrap();

    let mut stale = edited.clone();
    stale.location = Some("Lost".into());
    stale.last_modified = item.last_modified - 1;
    remote
        .put_raw(
            EntityType::Item,
            stale.id.clone(),
            RemoteRecord::from(stale).to_fields().unwrap(),
        )
        .await;

    let report = manager.refresh_from_remote().await.unwrap();
    assert_eq!(report.stale, 1);
    assert_eq!(report.applied, 0);

    let local = db.items().get_by_id(&item.id).await.unwrap().unwrap();
    assert_eq!(local.location.as_deref(), Some("Shelf 3"));
}

// =============================================================================
// Drain exclusion
// =============================================================================

/// Remote store whose upserts block until the test releases them.
struct GatedStore {
    inner: InMemoryRemoteStore,
    entered: Notify,
    gate: Semaphore,
}

#[async_trait]
impl RemoteStore for GatedStore {
    async fn upsert(&self, record: &RemoteRecord) -> Result<(), RemoteError> {
        self.entered.notify_one();
        self.gate.acquire().await.unwrap().forget();
        self.inner.upsert(record).await
    }

    async fn delete(&self, entity_type: EntityType, id: &str) -> Result<(), RemoteError> {
        self.inner.delete(entity_type, id).await
    }

    async fn get_all(&self, entity_type: EntityType) -> Result<Vec<RemoteRecord>, RemoteError> {
        self.inner.get_all(entity_type).await
    }

    async fn is_reachable(&self) -> bool {
        self.inner.is_reachable().await
    }
}

#[tokio::test]
async fn overlapping_drain_coalesces_into_one_more_pass() {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();
    let remote = Arc::new(GatedStore {
        inner: InMemoryRemoteStore::new(),
        entered: Notify::new(),
        gate: Semaphore::new(0),
    });
    let manager = Arc::new(SyncManager::new(db.clone(), remote.clone()));

    let first = db.items().insert(&Item::new("Camera", "AV")).await.unwrap();

    let running = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.drain().await })
    };
    remote.entered.notified().await;

    // Queued while the first drain is blocked on the remote.
    let second = db.items().insert(&Item::new("Mic", "AV")).await.unwrap();
    let overlapping = manager.drain().await.unwrap();
    assert!(overlapping.coalesced());
    assert_eq!(overlapping.attempted, 0);

    remote.gate.add_permits(10);
    let report = running.await.unwrap().unwrap();

    assert_eq!(report.passes, 2);
    assert_eq!(report.succeeded, 2);
    assert_eq!(db.pending().count().await.unwrap(), 0);
    assert!(remote.inner.get(EntityType::Item, &first.id).await.is_some());
    assert!(remote.inner.get(EntityType::Item, &second.id).await.is_some());
}

#[tokio::test]
async fn unreachable_remote_consumes_no_retries() {
    let (db, remote, manager) = setup().await;
    db.items().insert(&Item::new("Gas Detector", "Safety")).await.unwrap();
    remote.set_online(false);

    for _ in 0..5 {
        assert!(manager.drain().await.unwrap().offline);
    }

    let ops = db.pending().list_all().await.unwrap();
    assert_eq!(ops[0].retry_count, 0);
    assert!(remote.calls().await.is_empty());
}

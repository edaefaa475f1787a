//! # Sync Manager
//!
//! Drains the pending operation queue against the remote store.
//!
//! ## Drain Pass
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  drain()                                                                │
//! │    │                                                                    │
//! │    ├── drain already running? ──► flag rerun, return (coalesced)       │
//! │    ├── remote unreachable?    ──► state OFFLINE, return (no retries)   │
//! │    │                                                                    │
//! │    └── for op in list_all()          (created_at ASC, rowid ASC)       │
//! │          │                                                              │
//! │          ├── retry_count >= max ──► skip                                │
//! │          │                                                              │
//! │          ├── INSERT / UPDATE ──► load entity ──► upsert                 │
//! │          │                       (missing: "entity not found")         │
//! │          ├── DELETE          ──► delete                                 │
//! │          │                                                              │
//! │          ├── ok   ──► remove op, stamp last_sync_timestamp             │
//! │          └── err  ──► increment_retry(op, error), continue             │
//! │                                                                         │
//! │    rerun flagged meanwhile? ──► one more pass                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## States
//! ```text
//!      ┌────────┐  drain()   ┌──────────┐  pass done  ┌────────┐
//!      │  IDLE  │ ─────────► │ DRAINING │ ──────────► │  IDLE  │
//!      └────────┘            └──────────┘             └────────┘
//!          │ remote unreachable                            ▲
//!          ▼                                               │
//!      ┌─────────┐          next reachable drain           │
//!      │ OFFLINE │ ────────────────────────────────────────┘
//!      └─────────┘
//! ```
//!
//! Per-operation failures never abort a drain. A local store failure does:
//! it is returned to the caller and the remaining operations stay queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tracing::{debug, error, info, warn};

use stockroom_core::{now_millis, EntityType, EpochMillis, PendingOperation, DEFAULT_MAX_RETRIES};
use stockroom_db::Database;

use crate::config::SyncConfig;
use crate::error::{RemoteError, SyncResult};
use crate::remote::RemoteStore;

/// Failure text recorded when an upsert's entity no longer exists locally.
pub const ENTITY_NOT_FOUND: &str = "entity not found";

// =============================================================================
// State & Reports
// =============================================================================

/// Observable state of the sync manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    #[default]
    Idle,
    Draining,
    Offline,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncState::Idle => write!(f, "IDLE"),
            SyncState::Draining => write!(f, "DRAINING"),
            SyncState::Offline => write!(f, "OFFLINE"),
        }
    }
}

/// Outcome of one `drain()` call, summed over every pass it ran.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    /// Operations replayed against the remote store.
    pub attempted: u32,
    /// Replays that succeeded; those operations left the queue.
    pub succeeded: u32,
    /// Replays that failed; their retry count went up.
    pub failed: u32,
    /// Operations skipped because their retry budget is spent.
    pub skipped: u32,
    /// Passes over the queue. Zero when the call coalesced into a running
    /// drain or found the remote unreachable.
    pub passes: u32,
    /// The remote store was unreachable.
    pub offline: bool,
}

impl DrainReport {
    /// True when this call ran no pass because another drain was running.
    pub fn coalesced(&self) -> bool {
        self.passes == 0 && !self.offline
    }

    fn absorb(&mut self, pass: DrainReport) {
        self.attempted += pass.attempted;
        self.succeeded += pass.succeeded;
        self.failed += pass.failed;
        self.skipped += pass.skipped;
        self.passes += 1;
    }
}

/// Outcome of `refresh_from_remote()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshReport {
    /// Documents fetched across all collections.
    pub fetched: u32,
    /// Records that replaced (or created) the local copy.
    pub applied: u32,
    /// Records left alone because the local copy is as new or newer.
    pub stale: u32,
    /// Records left alone because the entity has unsynced local changes.
    pub pending_local: u32,
}

// =============================================================================
// Sync Manager
// =============================================================================

/// Replays pending operations against a [`RemoteStore`].
pub struct SyncManager {
    db: Database,
    remote: Arc<dyn RemoteStore>,
    max_retries: u32,

    /// Held for the duration of a drain (or refresh).
    drain_lock: Mutex<()>,

    /// Set by callers that found a drain running.
    rerun: AtomicBool,

    state: watch::Sender<SyncState>,
}

impl SyncManager {
    /// Creates a manager with the default retry budget.
    pub fn new(db: Database, remote: Arc<dyn RemoteStore>) -> Self {
        let (state, _) = watch::channel(SyncState::Idle);
        SyncManager {
            db,
            remote,
            max_retries: DEFAULT_MAX_RETRIES,
            drain_lock: Mutex::new(()),
            rerun: AtomicBool::new(false),
            state,
        }
    }

    /// Creates a manager using the retry budget from `config`.
    pub fn from_config(db: Database, remote: Arc<dyn RemoteStore>, config: &SyncConfig) -> Self {
        Self::new(db, remote).with_max_retries(config.sync.max_retries)
    }

    /// Overrides the retry budget. Values below 1 are raised to 1.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Current state.
    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    /// Subscribes to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    /// Operations still waiting in the queue, exhausted ones included.
    pub async fn pending_count(&self) -> SyncResult<i64> {
        Ok(self.db.pending().count().await?)
    }

    // =========================================================================
    // Drain
    // =========================================================================

    /// Replays every eligible pending operation, oldest first.
    ///
    /// If another drain is running this returns immediately with a
    /// [coalesced](DrainReport::coalesced) report and the running drain makes
    /// one more pass before finishing.
    pub async fn drain(&self) -> SyncResult<DrainReport> {
        let mut report = DrainReport::default();

        loop {
            let Ok(guard) = self.drain_lock.try_lock() else {
                self.rerun.store(true, Ordering::SeqCst);
                debug!("Drain already running, rerun requested");
                return Ok(report);
            };

            loop {
                self.rerun.store(false, Ordering::SeqCst);

                if !self.remote.is_reachable().await {
                    info!("Remote store unreachable, drain postponed");
                    self.set_state(SyncState::Offline);
                    report.offline = true;
                    return Ok(report);
                }

                self.set_state(SyncState::Draining);
                match self.drain_pass().await {
                    Ok(pass) => report.absorb(pass),
                    Err(e) => {
                        error!(error = %e, "Drain aborted by local store failure");
                        self.set_state(SyncState::Idle);
                        return Err(e);
                    }
                }

                if !self.rerun.load(Ordering::SeqCst) {
                    break;
                }
                debug!("Rerun requested during drain, starting another pass");
            }

            self.set_state(SyncState::Idle);
            drop(guard);

            // A trigger may have landed between the last check and the unlock.
            if !self.rerun.load(Ordering::SeqCst) {
                break;
            }
        }

        info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            passes = report.passes,
            "Drain complete"
        );
        Ok(report)
    }

    /// One pass over a snapshot of the queue.
    async fn drain_pass(&self) -> SyncResult<DrainReport> {
        let pending = self.db.pending();
        let ops = pending.list_all().await?;
        let mut pass = DrainReport::default();

        debug!(queued = ops.len(), "Drain pass started");

        for op in ops {
            if op.is_exhausted(self.max_retries) {
                pass.skipped += 1;
                continue;
            }

            pass.attempted += 1;
            match self.replay(&op).await? {
                Ok(uploaded) => {
                    pending.remove(&op.id).await?;
                    if let Some(version) = uploaded {
                        let stamped = self
                            .db
                            .mark_synced(op.entity_type, &op.entity_id, version, now_millis())
                            .await?;
                        if !stamped {
                            debug!(
                                entity_type = %op.entity_type,
                                entity_id = %op.entity_id,
                                "Entity changed during upload, left unsynced"
                            );
                        }
                    }
                    pass.succeeded += 1;
                    debug!(
                        op_id = %op.id,
                        entity_type = %op.entity_type,
                        entity_id = %op.entity_id,
                        operation = %op.operation,
                        "Operation replayed"
                    );
                }
                Err(reason) => {
                    let retry_count = pending.increment_retry(&op.id, &reason).await?;
                    pass.failed += 1;
                    if retry_count >= i64::from(self.max_retries) {
                        warn!(
                            op_id = %op.id,
                            entity_type = %op.entity_type,
                            entity_id = %op.entity_id,
                            retry_count,
                            error = %reason,
                            "Operation exhausted its retry budget"
                        );
                    }
                }
            }
        }

        Ok(pass)
    }

    /// Replays one operation. The outer result carries local store
    /// failures; the inner one carries the per-operation failure text.
    ///
    /// A successful upsert yields the `last_modified` of the copy that was
    /// uploaded.
    async fn replay(
        &self,
        op: &PendingOperation,
    ) -> SyncResult<Result<Option<EpochMillis>, String>> {
        let outcome = if op.operation.is_upsert() {
            match self.db.load_record(op.entity_type, &op.entity_id).await? {
                Some(record) => {
                    let version = record.last_modified();
                    self.remote.upsert(&record).await.map(|()| Some(version))
                }
                None => return Ok(Err(ENTITY_NOT_FOUND.to_string())),
            }
        } else {
            self.remote.delete(op.entity_type, &op.entity_id).await.map(|()| None)
        };

        Ok(outcome.map_err(|e: RemoteError| e.to_string()))
    }

    // =========================================================================
    // Purge & Refresh
    // =========================================================================

    /// Archives operations that spent their retry budget.
    pub async fn purge_failed(&self) -> SyncResult<u64> {
        let purged = self.db.pending().purge_exceeding(self.max_retries).await?;
        if purged > 0 {
            info!(purged, max_retries = self.max_retries, "Archived exhausted operations");
        }
        Ok(purged)
    }

    /// Pulls every collection and applies records newer than the local copy.
    ///
    /// Entities with queued local changes are left alone so an unsynced edit
    /// is never overwritten before it reaches the remote store. Drains
    /// requested while the refresh held the lock run once it is released.
    pub async fn refresh_from_remote(&self) -> SyncResult<RefreshReport> {
        let refreshed = {
            let _guard = self.drain_lock.lock().await;
            self.refresh_locked().await
        };

        if self.rerun.load(Ordering::SeqCst) {
            debug!("Drain requested during refresh, running it now");
            self.drain().await?;
        }
        refreshed
    }

    async fn refresh_locked(&self) -> SyncResult<RefreshReport> {
        if !self.remote.is_reachable().await {
            self.set_state(SyncState::Offline);
            return Err(RemoteError::Unreachable("refresh postponed".into()).into());
        }
        self.set_state(SyncState::Idle);

        let pending = self.db.pending();
        let mut report = RefreshReport::default();

        for entity_type in EntityType::ALL {
            let records = self.remote.get_all(entity_type).await?;
            debug!(collection = entity_type.collection(), count = records.len(), "Fetched collection");

            for record in records {
                report.fetched += 1;

                if pending.count_for_entity(entity_type, record.id()).await? > 0 {
                    report.pending_local += 1;
                    continue;
                }

                if self.db.apply_remote(record, now_millis()).await? {
                    report.applied += 1;
                } else {
                    report.stale += 1;
                }
            }
        }

        info!(
            fetched = report.fetched,
            applied = report.applied,
            stale = report.stale,
            pending_local = report.pending_local,
            "Refresh complete"
        );
        Ok(report)
    }

    fn set_state(&self, state: SyncState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!(from = %current, to = %state, "Sync state changed");
            *current = state;
            true
        });
    }
}

impl std::fmt::Debug for SyncManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncManager")
            .field("max_retries", &self.max_retries)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{InMemoryRemoteStore, RemoteCall};
    use async_trait::async_trait;
    use stockroom_core::{Item, OperationKind, RemoteRecord, Staff};
    use stockroom_db::DbConfig;
    use tokio::sync::{Notify, Semaphore};

    async fn setup() -> (Database, Arc<InMemoryRemoteStore>, SyncManager) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let remote = Arc::new(InMemoryRemoteStore::new());
        let manager = SyncManager::new(db.clone(), remote.clone());
        (db, remote, manager)
    }

    #[tokio::test]
    async fn test_drain_uploads_and_empties_queue() {
        let (db, remote, manager) = setup().await;
        let item = db.items().insert(&Item::new("Drill", "Tools")).await.unwrap();

        let report = manager.drain().await.unwrap();

        assert_eq!(report.attempted, 1);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.passes, 1);
        assert_eq!(db.pending().count().await.unwrap(), 0);
        assert!(remote.get(EntityType::Item, &item.id).await.is_some());

        let local = db.items().get_by_id(&item.id).await.unwrap().unwrap();
        assert!(local.last_sync_timestamp.is_some());
        assert_eq!(manager.state(), SyncState::Idle);
    }

    #[tokio::test]
    async fn test_drain_replays_in_creation_order() {
        let (db, remote, manager) = setup().await;
        let mut staff = db.staff().insert(&Staff::new("Kai", "IT")).await.unwrap();
        let item = db.items().insert(&Item::new("Laptop", "IT")).await.unwrap();
        staff.position = Some("Lead".into());
        db.staff().update(&staff).await.unwrap();

        manager.drain().await.unwrap();

        assert_eq!(
            remote.calls().await,
            vec![
                RemoteCall::Upsert { entity_type: EntityType::Staff, id: staff.id.clone() },
                RemoteCall::Upsert { entity_type: EntityType::Item, id: item.id.clone() },
                RemoteCall::Upsert { entity_type: EntityType::Staff, id: staff.id.clone() },
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_entity_is_a_per_op_failure() {
        let (db, remote, manager) = setup().await;
        let staff = Staff::new("Ghost", "Nowhere");
        db.pending()
            .enqueue_now(EntityType::Staff, &staff.id, OperationKind::Update)
            .await
            .unwrap();

        let report = manager.drain().await.unwrap();

        assert_eq!(report.failed, 1);
        let ops = db.pending().list_all().await.unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].retry_count, 1);
        assert_eq!(ops[0].last_error.as_deref(), Some(ENTITY_NOT_FOUND));
        assert!(remote.calls().await.is_empty());
    }

    #[tokio::test]
    async fn test_offline_drain_leaves_retries_untouched() {
        let (db, remote, manager) = setup().await;
        db.items().insert(&Item::new("Tripod", "AV")).await.unwrap();
        remote.set_online(false);

        let report = manager.drain().await.unwrap();

        assert!(report.offline);
        assert_eq!(report.attempted, 0);
        assert_eq!(manager.state(), SyncState::Offline);
        let ops = db.pending().list_all().await.unwrap();
        assert_eq!(ops[0].retry_count, 0);

        remote.set_online(true);
        manager.drain().await.unwrap();
        assert_eq!(manager.state(), SyncState::Idle);
        assert_eq!(db.pending().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_ops_are_skipped_then_purged() {
        let (db, remote, manager) = setup().await;
        let manager = manager.with_max_retries(2);
        let item = db.items().insert(&Item::new("Saw", "Tools")).await.unwrap();
        remote.reject_id(item.id.clone()).await;

        assert_eq!(manager.drain().await.unwrap().failed, 1);
        assert_eq!(manager.drain().await.unwrap().failed, 1);

        let report = manager.drain().await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.attempted, 0);
        assert_eq!(remote.write_attempts(&item.id).await, 2);

        assert_eq!(manager.purge_failed().await.unwrap(), 1);
        assert_eq!(db.pending().count().await.unwrap(), 0);
        let failed = db.pending().list_failed().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert!(failed[0].last_error.as_deref().unwrap_or_default().contains("rejected"));
    }

    #[tokio::test]
    async fn test_refresh_applies_newer_and_protects_pending() {
        let (db, remote, manager) = setup().await;

        // Remote-only record lands locally.
        let remote_only = Item::new("Ladder", "Facilities");
        remote.upsert(&RemoteRecord::from(remote_only.clone())).await.unwrap();

        // Record with an unsynced local edit is left alone.
        let local = db.items().insert(&Item::new("Camera", "AV")).await.unwrap();
        let mut newer = local.clone();
        newer.name = "Camera (remote edit)".into();
        newer.last_modified = local.last_modified + 10_000;
        remote.upsert(&RemoteRecord::from(newer)).await.unwrap();

        let report = manager.refresh_from_remote().await.unwrap();

        assert_eq!(report.fetched, 2);
        assert_eq!(report.applied, 1);
        assert_eq!(report.pending_local, 1);

        let pulled = db.items().get_by_id(&remote_only.id).await.unwrap().unwrap();
        assert!(pulled.last_sync_timestamp.is_some());
        let kept = db.items().get_by_id(&local.id).await.unwrap().unwrap();
        assert_eq!(kept.name, "Camera");

        // Pulling never enqueues.
        assert_eq!(db.pending().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_refresh_offline_is_an_error() {
        let (_db, remote, manager) = setup().await;
        remote.set_online(false);

        let err = manager.refresh_from_remote().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(manager.state(), SyncState::Offline);
    }

    #[tokio::test]
    async fn test_state_updates_are_observable() {
        let (db, remote, manager) = setup().await;
        let mut rx = manager.subscribe();
        db.items().insert(&Item::new("Mic", "AV")).await.unwrap();

        remote.set_online(false);
        manager.drain().await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), SyncState::Offline);

        remote.set_online(true);
        manager.drain().await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), SyncState::Idle);
    }

    #[tokio::test]
    async fn test_local_store_failure_aborts_drain() {
        let (db, remote, manager) = setup().await;
        db.items().insert(&Item::new("Welder", "Workshop")).await.unwrap();
        sqlx::query("DROP TABLE items").execute(db.pool()).await.unwrap();

        assert!(manager.drain().await.is_err());
        assert_eq!(manager.state(), SyncState::Idle);

        let ops = db.pending().list_all().await.unwrap();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].retry_count, 0);
        assert!(remote.calls().await.is_empty());

        // The lock was released: the next drain runs (and fails) instead of coalescing.
        assert!(manager.drain().await.is_err());
    }

    /// Edits the uploaded item locally while its first upsert is in flight.
    struct EditDuringUpload {
        inner: InMemoryRemoteStore,
        db: Database,
        edited: AtomicBool,
    }

    #[async_trait]
    impl RemoteStore for EditDuringUpload {
        async fn upsert(&self, record: &RemoteRecord) -> Result<(), RemoteError> {
            if let RemoteRecord::Item(item) = record {
                if !self.edited.swap(true, Ordering::SeqCst) {
                    let mut moved = item.clone();
                    moved.location = Some("Van 3".into());
                    self.db.items().update(&moved).await.unwrap();
                }
            }
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
    async fn test_edit_during_upload_stays_unsynced() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let remote = Arc::new(EditDuringUpload {
            inner: InMemoryRemoteStore::new(),
            db: db.clone(),
            edited: AtomicBool::new(false),
        });
        let manager = SyncManager::new(db.clone(), remote.clone());
        let item = db.items().insert(&Item::new("Generator", "Facilities")).await.unwrap();

        manager.drain().await.unwrap();

        let local = db.items().get_by_id(&item.id).await.unwrap().unwrap();
        assert_eq!(local.location.as_deref(), Some("Van 3"));
        assert_eq!(local.last_sync_timestamp, None);
        let unsynced = db.items().not_synced_since(local.last_modified).await.unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(db.pending().count().await.unwrap(), 1);

        manager.drain().await.unwrap();

        let local = db.items().get_by_id(&item.id).await.unwrap().unwrap();
        assert!(local.last_sync_timestamp.is_some());
        match remote.inner.get(EntityType::Item, &item.id).await {
            Some(RemoteRecord::Item(uploaded)) => {
                assert_eq!(uploaded.location.as_deref(), Some("Van 3"));
            }
            other => panic!("unexpected remote copy {other:?}"),
        }
    }

    /// Holds every `get_all` until the test opens the gate.
    struct SlowPull {
        inner: InMemoryRemoteStore,
        entered: Notify,
        gate: Semaphore,
    }

    #[async_trait]
    impl RemoteStore for SlowPull {
        async fn upsert(&self, record: &RemoteRecord) -> Result<(), RemoteError> {
            self.inner.upsert(record).await
        }

        async fn delete(&self, entity_type: EntityType, id: &str) -> Result<(), RemoteError> {
            self.inner.delete(entity_type, id).await
        }

        async fn get_all(&self, entity_type: EntityType) -> Result<Vec<RemoteRecord>, RemoteError> {
            self.entered.notify_one();
            self.gate.acquire().await.unwrap().forget();
            self.inner.get_all(entity_type).await
        }

        async fn is_reachable(&self) -> bool {
            self.inner.is_reachable().await
        }
    }

    #[tokio::test]
    async fn test_drain_requested_during_refresh_runs_afterwards() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let remote = Arc::new(SlowPull {
            inner: InMemoryRemoteStore::new(),
            entered: Notify::new(),
            gate: Semaphore::new(0),
        });
        let manager = Arc::new(SyncManager::new(db.clone(), remote.clone()));

        let refreshing = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.refresh_from_remote().await })
        };
        remote.entered.notified().await;

        let item = db.items().insert(&Item::new("Dolly", "Warehouse")).await.unwrap();
        assert!(manager.drain().await.unwrap().coalesced());

        remote.gate.add_permits(EntityType::ALL.len());
        refreshing.await.unwrap().unwrap();

        assert_eq!(db.pending().count().await.unwrap(), 0);
        assert!(remote.inner.get(EntityType::Item, &item.id).await.is_some());
        assert_eq!(manager.state(), SyncState::Idle);
    }
}

//! Persistence worker.
//!
//! Single consumer of the write queue. Intents are applied strictly in
//! arrival order; the engine only ever enqueues and never waits.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{MatchStore, WriteIntent};

/// Counters reported when the worker stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    /// Intents applied successfully
    pub applied: u64,
    /// Intents that needed the reissue
    pub retried: u64,
    /// Intents dropped after an error
    pub dropped: u64,
}

/// Sending side of the write queue.
#[derive(Debug, Clone)]
pub struct PersistenceHandle {
    tx: mpsc::UnboundedSender<WriteIntent>,
    pending: Arc<AtomicUsize>,
}

impl PersistenceHandle {
    /// Enqueue an intent. Never blocks.
    ///
    /// Returns false if the worker is gone; the write is lost but the
    /// in-memory state is unaffected.
    pub fn submit(&self, intent: WriteIntent) -> bool {
        let label = intent.label();
        self.pending.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(intent).is_err() {
            self.pending.fetch_sub(1, Ordering::Relaxed);
            warn!(intent = label, "Persistence queue closed, dropping write");
            return false;
        }
        true
    }

    /// Intents queued but not yet applied.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    /// Send the shutdown sentinel and wait, bounded, for the worker to
    /// drain everything queued before it.
    pub async fn shutdown(
        &self,
        worker: JoinHandle<WorkerStats>,
        drain_timeout: Duration,
    ) -> Option<WorkerStats> {
        let _ = self.tx.send(WriteIntent::Shutdown);
        match tokio::time::timeout(drain_timeout, worker).await {
            Ok(Ok(stats)) => Some(stats),
            Ok(Err(e)) => {
                error!("Persistence worker panicked: {}", e);
                None
            }
            Err(_) => {
                warn!(pending = self.pending(), "Persistence worker did not drain in time");
                None
            }
        }
    }
}

/// Background task applying write intents to a store.
pub struct PersistenceWorker {
    store: Arc<dyn MatchStore>,
    rx: mpsc::UnboundedReceiver<WriteIntent>,
    pending: Arc<AtomicUsize>,
    stats: WorkerStats,
}

impl PersistenceWorker {
    /// Create a worker and the handle that feeds it.
    pub fn new(store: Arc<dyn MatchStore>) -> (Self, PersistenceHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let worker = Self {
            store,
            rx,
            pending: pending.clone(),
            stats: WorkerStats::default(),
        };
        (worker, PersistenceHandle { tx, pending })
    }

    /// Spawn the worker on the current runtime.
    pub fn spawn(self) -> JoinHandle<WorkerStats> {
        tokio::spawn(self.run())
    }

    /// Consume the queue until the sentinel arrives or every handle is
    /// dropped.
    pub async fn run(mut self) -> WorkerStats {
        info!("Persistence worker started");

        while let Some(intent) = self.rx.recv().await {
            if matches!(intent, WriteIntent::Shutdown) {
                info!("Persistence worker received shutdown");
                break;
            }
            self.handle(&intent);
            self.pending.fetch_sub(1, Ordering::Relaxed);
        }

        info!(
            applied = self.stats.applied,
            retried = self.stats.retried,
            dropped = self.stats.dropped,
            "Persistence worker stopped"
        );
        self.stats
    }

    /// Apply one intent; roll back and reissue once on a transient
    /// conflict, otherwise log and drop.
    fn handle(&mut self, intent: &WriteIntent) {
        let label = intent.label();

        let err = match intent.apply(self.store.as_ref()) {
            Ok(()) => {
                debug!(intent = label, "Write applied");
                self.stats.applied += 1;
                return;
            }
            Err(e) => e,
        };

        if !err.is_transient() {
            error!(intent = label, "Write failed, dropping: {}", err);
            self.stats.dropped += 1;
            return;
        }

        warn!(intent = label, "Transient write conflict, retrying once: {}", err);
        self.stats.retried += 1;
        if let Err(e) = self.store.rollback() {
            error!(intent = label, "Rollback failed: {}", e);
        }

        match intent.apply(self.store.as_ref()) {
            Ok(()) => self.stats.applied += 1,
            Err(e) => {
                error!(intent = label, "Write failed after retry, dropping: {}", e);
                self.stats.dropped += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entity::EntityId;
    use crate::game::normalize::SnapshotUpdate;
    use crate::game::snapshot::fixtures::{base_time, fresh};
    use crate::game::state::RosterEntry;
    use crate::store::{
        InMemoryStore, MatchRecord, Result, StoreError, StoredSnapshot,
    };
    use chrono::{DateTime, Utc};
    use std::sync::atomic::AtomicU32;

    /// Fails the first `failures` snapshot inserts with a conflict.
    struct FlakyStore {
        inner: InMemoryStore,
        failures: AtomicU32,
        rollbacks: AtomicU32,
        permanent: bool,
    }

    impl FlakyStore {
        fn new(failures: u32, permanent: bool) -> Self {
            Self {
                inner: InMemoryStore::new(),
                failures: AtomicU32::new(failures),
                rollbacks: AtomicU32::new(0),
                permanent,
            }
        }
    }

    impl MatchStore for FlakyStore {
        fn create_match(&self, id: &str, roster: &[RosterEntry], at: DateTime<Utc>) -> Result<()> {
            self.inner.create_match(id, roster, at)
        }

        fn insert_snapshot(&self, id: &str, snap: &SnapshotUpdate) -> Result<()> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(if self.permanent {
                    StoreError::Backend("disk full".into())
                } else {
                    StoreError::Transient("nested transaction".into())
                });
            }
            self.inner.insert_snapshot(id, snap)
        }

        fn update_final_place(&self, id: &str, e: EntityId, p: u32) -> Result<()> {
            self.inner.update_final_place(id, e, p)
        }

        fn close_match(&self, id: &str, w: Option<EntityId>, at: DateTime<Utc>) -> Result<()> {
            self.inner.close_match(id, w, at)
        }

        fn delete_match(&self, id: &str) -> Result<()> {
            self.inner.delete_match(id)
        }

        fn rollback(&self) -> Result<()> {
            self.rollbacks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn list_matches(&self) -> Result<Vec<MatchRecord>> {
            self.inner.list_matches()
        }

        fn match_snapshots(&self, id: &str) -> Result<Vec<StoredSnapshot>> {
            self.inner.match_snapshots(id)
        }
    }

    fn create(handle: &PersistenceHandle) {
        handle.submit(WriteIntent::CreateMatch {
            match_id: "m1".into(),
            roster: vec![RosterEntry::from(&fresh(1, 1, 1))],
            started_at: base_time(),
        });
    }

    fn insert(handle: &PersistenceHandle, seq: u64) {
        handle.submit(WriteIntent::InsertSnapshot {
            match_id: "m1".into(),
            snapshot: SnapshotUpdate::Public(fresh(1, 1, seq)),
        });
    }

    #[tokio::test]
    async fn test_applies_in_order_and_stops_on_sentinel() {
        let store = Arc::new(InMemoryStore::new());
        let (worker, handle) = PersistenceWorker::new(store.clone());
        let join = worker.spawn();

        create(&handle);
        for seq in 1..=5 {
            insert(&handle, seq);
        }
        handle.submit(WriteIntent::CloseMatch {
            match_id: "m1".into(),
            winner: Some(EntityId::new(1)),
            ended_at: base_time(),
        });

        let stats = handle.shutdown(join, Duration::from_secs(5)).await.unwrap();
        assert_eq!(stats.applied, 7);
        assert_eq!(handle.pending(), 0);

        let seqs: Vec<u64> = store
            .match_snapshots("m1")
            .unwrap()
            .iter()
            .map(|s| s.sequence_number)
            .collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
        assert_eq!(store.get_match("m1").unwrap().winner, Some(EntityId::new(1)));
    }

    #[tokio::test]
    async fn test_transient_conflict_retried_once() {
        let store = Arc::new(FlakyStore::new(1, false));
        let (worker, handle) = PersistenceWorker::new(store.clone());
        let join = worker.spawn();

        create(&handle);
        insert(&handle, 1);

        let stats = handle.shutdown(join, Duration::from_secs(5)).await.unwrap();
        assert_eq!(stats, WorkerStats { applied: 2, retried: 1, dropped: 0 });
        assert_eq!(store.rollbacks.load(Ordering::SeqCst), 1);
        assert_eq!(store.inner.snapshot_count(), 1);
    }

    #[tokio::test]
    async fn test_second_conflict_drops_write() {
        let store = Arc::new(FlakyStore::new(2, false));
        let (worker, handle) = PersistenceWorker::new(store.clone());
        let join = worker.spawn();

        create(&handle);
        insert(&handle, 1);
        insert(&handle, 2);

        let stats = handle.shutdown(join, Duration::from_secs(5)).await.unwrap();
        assert_eq!(stats.dropped, 1);
        assert_eq!(store.inner.snapshot_count(), 1);
    }

    #[tokio::test]
    async fn test_permanent_error_not_retried() {
        let store = Arc::new(FlakyStore::new(1, true));
        let (worker, handle) = PersistenceWorker::new(store.clone());
        let join = worker.spawn();

        create(&handle);
        insert(&handle, 1);
        insert(&handle, 2);

        let stats = handle.shutdown(join, Duration::from_secs(5)).await.unwrap();
        assert_eq!(stats, WorkerStats { applied: 2, retried: 0, dropped: 1 });
        assert_eq!(store.rollbacks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_submit_after_worker_gone() {
        let store = Arc::new(InMemoryStore::new());
        let (worker, handle) = PersistenceWorker::new(store);
        drop(worker);

        assert!(!handle.submit(WriteIntent::DeleteMatch { match_id: "m1".into() }));
        assert_eq!(handle.pending(), 0);
    }
}

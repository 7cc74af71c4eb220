//! The migration coordinator.
//!
//! [`Fsm`] owns the deferred-operation queue and the changing set, and
//! drives every entity through
//!
//! ```text
//! QUEUED ──scan + EXCLUSIVE lock──► CHANGING ──worker outcome──► terminal
//! ```
//!
//! # Architecture
//!
//! - Submissions go through [`Fsm::queue`], which merges under the state
//!   mutex (see [`merge`]).
//! - [`DispatcherDaemon`] calls [`Fsm::process_queue`] periodically. Each
//!   eligible entity takes a worker slot and an exclusive lock on its
//!   dataset, moves into the changing set, and runs on the blocking pool.
//! - Completion is a single critical section: the owning request's record
//!   is updated, the entity leaves the changing set and its lock is released
//!   while the state mutex is still held.
//! - The persisted requests are the recovery source: [`Fsm::start`] re-queues
//!   every unfinished request before the daemon starts.
//!
//! Lock order is state mutex, then lock table. Nothing takes them the other
//! way round.
//!
//! # Example
//!
//! ```ignore
//! let fsm = Arc::new(Fsm::new(config, locks, store, workers));
//! let shutdown = CancellationToken::new();
//! let handle = fsm.start(shutdown.clone())?;
//!
//! fsm.queue(entity, DeferredOp::Archive, Some(request.prepared_id));
//! // ...
//! shutdown.cancel();
//! handle.await?;
//! ```

mod daemon;
mod merge;
mod pool;
mod queue;
mod status;

pub use daemon::DispatcherDaemon;
pub use merge::{merge, Merge};
pub use pool::{default_max_workers, WorkerPermit, WorkerPool, FALLBACK_WORKERS};
pub use queue::{DeferredQueue, PrepareEntry, Preempted, QueueEntry};
pub use status::{EntityState, ServiceStatus};

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::error::IdsError;
use crate::lock::{Lock, LockManager, LockType};
use crate::model::{overlaps, DataEntity, DeferredOp, EntityKey, RequestedState, StatusInfo};
use crate::persistence::RequestStore;
use crate::workers::{self, WorkerContext};

/// Default delay before a WRITE is dispatched (60 seconds).
pub const DEFAULT_WRITE_DELAY_SECS: u64 = 60;

/// Default interval between queue scans (5 seconds).
pub const DEFAULT_PROCESS_INTERVAL_SECS: u64 = 5;

/// Coordinator settings.
#[derive(Debug, Clone)]
pub struct FsmConfig {
    /// How long a WRITE waits for further writes before dispatch.
    pub write_delay: Duration,
    /// Interval between dispatcher scans.
    pub process_interval: Duration,
    /// Upper bound on concurrently running tier workers.
    pub max_workers: usize,
}

impl Default for FsmConfig {
    fn default() -> Self {
        Self {
            write_delay: Duration::from_secs(DEFAULT_WRITE_DELAY_SECS),
            process_interval: Duration::from_secs(DEFAULT_PROCESS_INTERVAL_SECS),
            max_workers: default_max_workers(),
        }
    }
}

impl FsmConfig {
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }

    pub fn with_process_interval(mut self, interval: Duration) -> Self {
        self.process_interval = interval;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }
}

#[derive(Debug, Clone)]
struct ChangingEntry {
    entity: DataEntity,
    state: RequestedState,
    owner: Option<Uuid>,
}

#[derive(Debug, Default)]
struct FsmState {
    queue: DeferredQueue,
    changing: BTreeMap<EntityKey, ChangingEntry>,
}

/// Process-wide migration coordinator.
pub struct Fsm {
    config: FsmConfig,
    state: Mutex<FsmState>,
    locks: LockManager,
    store: Arc<dyn RequestStore>,
    workers: Arc<WorkerContext>,
    pool: WorkerPool,
}

impl Fsm {
    pub fn new(
        config: FsmConfig,
        locks: LockManager,
        store: Arc<dyn RequestStore>,
        workers: WorkerContext,
    ) -> Self {
        let pool = WorkerPool::new(config.max_workers);
        Self {
            config,
            state: Mutex::new(FsmState::default()),
            locks,
            store,
            workers: Arc::new(workers),
            pool,
        }
    }

    pub fn config(&self) -> &FsmConfig {
        &self.config
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    // =========================================================================
    // Submission
    // =========================================================================

    /// Queues `op` for `entity` on behalf of request `owner`.
    ///
    /// Older requests preempted by the merge are marked INCOMPLETE.
    pub fn queue(&self, entity: DataEntity, op: DeferredOp, owner: Option<Uuid>) {
        let mut state = self.state.lock();
        self.enqueue_locked(&mut state, entity, op, owner);
    }

    /// Registers `owner` as waiting for `entity` to come online and queues
    /// the RESTORE that brings it there.
    pub fn prepare(&self, entity: DataEntity, owner: Uuid) {
        let mut state = self.state.lock();
        self.enqueue_locked(&mut state, entity.clone(), DeferredOp::Prepare, Some(owner));
        self.enqueue_locked(&mut state, entity, DeferredOp::Restore, None);
    }

    fn enqueue_locked(
        &self,
        state: &mut FsmState,
        entity: DataEntity,
        op: DeferredOp,
        owner: Option<Uuid>,
    ) {
        let key = entity.key();
        let preempted = state.queue.enqueue(
            entity,
            op,
            owner,
            Instant::now(),
            self.config.write_delay,
        );
        for p in preempted {
            info!(
                entity = %p.key,
                prepared_id = %p.owner,
                "Queued operation preempted by a newer request"
            );
            self.settle(p.owner, p.key, StatusInfo::Incomplete);
        }
        debug!(
            entity = %key,
            op = %op,
            queued = ?state.queue.get(key).map(|e| e.state),
            "Operation queued"
        );
    }

    // =========================================================================
    // Dispatch
    // =========================================================================

    /// Dispatches every eligible queued entity and returns how many started.
    ///
    /// An entity is eligible once its write delay elapsed and nothing in the
    /// same dataset is changing. The scan stops when the worker pool is
    /// saturated; entities whose dataset is locked stay queued.
    ///
    /// Must be called from within a tokio runtime. Workers are spawned after
    /// the state mutex is released, since a rejected spawn completes the
    /// entity synchronously.
    pub fn process_queue(self: &Arc<Self>) -> usize {
        let mut started = Vec::new();
        {
            let mut state = self.state.lock();
            self.claim_ready(&mut state, &mut started);
        }

        let dispatched = started.len();
        for (entity, requested, in_flight) in started {
            let ctx = Arc::clone(&self.workers);
            tokio::task::spawn_blocking(move || {
                let outcome = workers::execute(&ctx, &entity, requested);
                in_flight.finish(outcome);
            });
        }
        dispatched
    }

    /// Moves every eligible queued entity into the changing set, holding its
    /// worker slot and exclusive lock in an [`InFlight`].
    fn claim_ready(
        self: &Arc<Self>,
        state: &mut FsmState,
        started: &mut Vec<(DataEntity, RequestedState, InFlight)>,
    ) {
        let now = Instant::now();

        for key in state.queue.ready(now) {
            let Some(dataset_id) = state.queue.get(key).map(|e| e.entity.dataset_id()) else {
                continue;
            };
            if state
                .changing
                .values()
                .any(|c| c.entity.dataset_id() == dataset_id)
            {
                trace!(entity = %key, dataset_id, "Dataset is changing, deferring");
                continue;
            }

            let Some(permit) = self.pool.try_acquire() else {
                debug!(
                    capacity = self.pool.capacity(),
                    remaining = state.queue.len(),
                    "Worker pool saturated, deferring remaining entries"
                );
                break;
            };
            let lock = match self.locks.lock([dataset_id], LockType::Exclusive) {
                Ok(lock) => lock,
                Err(e) => {
                    debug!(entity = %key, reason = %e, "Lock unavailable, retrying next scan");
                    continue;
                }
            };

            let Some(entry) = state.queue.remove(key) else {
                continue;
            };
            state.changing.insert(
                key,
                ChangingEntry {
                    entity: entry.entity.clone(),
                    state: entry.state,
                    owner: entry.owner,
                },
            );
            if let Some(owner) = entry.owner {
                self.settle(owner, key, StatusInfo::Retrieving);
            }
            info!(entity = %key, state = %entry.state, "Dispatching tier worker");

            let in_flight = InFlight {
                fsm: Arc::clone(self),
                key,
                lock: Some(lock),
                _permit: permit,
                finished: false,
            };
            started.push((entry.entity, entry.state, in_flight));
        }
    }

    /// Applies a worker outcome. The lock is released while the state mutex
    /// is still held.
    fn complete(&self, key: EntityKey, outcome: StatusInfo, lock: Option<Lock>) {
        let mut state = self.state.lock();
        match state.changing.remove(&key) {
            Some(entry) => {
                if let Some(owner) = entry.owner {
                    self.settle(owner, key, outcome);
                }
                self.release_prepares(&mut state, &entry, outcome);
                info!(entity = %key, state = %entry.state, outcome = %outcome, "Tier worker done");
            }
            None => error!(entity = %key, "Completed entity was not in the changing set"),
        }
        drop(lock);
    }

    /// Settles PREPARE waiters after a migration of their entity.
    fn release_prepares(&self, state: &mut FsmState, entry: &ChangingEntry, outcome: StatusInfo) {
        let key = entry.entity.key();
        if !state.queue.has_prepare(key) {
            return;
        }
        let settled = match entry.state {
            RequestedState::Restore => Some(outcome),
            // Writes leave the fast copy in place.
            RequestedState::Write => Some(StatusInfo::Completed),
            _ => None,
        };
        match settled {
            Some(status) => {
                if let Some(waiting) = state.queue.take_prepare(key) {
                    for owner in waiting.owners {
                        self.settle(owner, key, status);
                    }
                }
            }
            None if !state.queue.has_overlapping(&entry.entity) => {
                debug!(entity = %key, "Prepare still waiting, queueing restore");
                self.enqueue_locked(state, entry.entity.clone(), DeferredOp::Restore, None);
            }
            None => {}
        }
    }

    /// Updates one entity record of a persisted request.
    fn settle(&self, owner: Uuid, key: EntityKey, status: StatusInfo) {
        let mut request = match self.store.load(&owner) {
            Ok(Some(request)) => request,
            Ok(None) => {
                warn!(prepared_id = %owner, entity = %key, "Request vanished before its outcome");
                return;
            }
            Err(e) => {
                error!(prepared_id = %owner, error = %e, "Unable to load request");
                return;
            }
        };
        if !request.set_entity_status(key, status) {
            return;
        }
        if let Err(e) = self.store.save(&request) {
            error!(prepared_id = %owner, error = %e, "Unable to persist request status");
            return;
        }
        if request.is_finished() {
            info!(prepared_id = %owner, status = %request.status, "Request finished");
        }
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Whether a RESTORE overlapping `entity` is queued or running.
    pub fn is_restoring(&self, entity: &DataEntity) -> bool {
        let state = self.state.lock();
        state
            .changing
            .values()
            .any(|c| c.state == RequestedState::Restore && overlaps(&c.entity, entity))
            || state
                .queue
                .entries()
                .any(|e| e.state == RequestedState::Restore && overlaps(&e.entity, entity))
    }

    pub fn is_changing(&self, key: EntityKey) -> bool {
        self.state.lock().changing.contains_key(&key)
    }

    pub fn queued(&self, key: EntityKey) -> Option<QueueEntry> {
        self.state.lock().queue.get(key).cloned()
    }

    /// Snapshot of queue, changing set and locks.
    pub fn service_status(&self) -> ServiceStatus {
        let state = self.state.lock();
        ServiceStatus {
            queue: state
                .queue
                .entries()
                .map(|e| EntityState {
                    entity: e.entity.key(),
                    state: e.state,
                })
                .collect(),
            changing: state
                .changing
                .iter()
                .map(|(k, c)| EntityState {
                    entity: *k,
                    state: c.state,
                })
                .collect(),
            prepares: state.queue.prepares().map(|p| p.entity.key()).collect(),
            locks: self.locks.lock_info(),
            workers_in_flight: self.pool.in_flight(),
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Re-queues the non-terminal entities of every unfinished request.
    ///
    /// Requests are replayed in submission order so preemption between them
    /// resolves as it did originally. Returns the number of entities queued.
    pub fn recover(&self) -> Result<usize, IdsError> {
        let mut requests = self.store.unfinished()?;
        requests.sort_by_key(|r| r.submitted);

        let mut state = self.state.lock();
        let mut queued = 0;
        for request in &requests {
            let ops = request.requested_state.replay_ops();
            for record in request.entities.iter().filter(|r| !r.status.is_terminal()) {
                for &op in ops {
                    self.enqueue_locked(&mut state, record.entity.clone(), op, Some(request.prepared_id));
                    if op == DeferredOp::Prepare {
                        self.enqueue_locked(&mut state, record.entity.clone(), DeferredOp::Restore, None);
                    }
                }
                queued += 1;
            }
        }
        info!(requests = requests.len(), entities = queued, "Recovered unfinished requests");
        Ok(queued)
    }

    /// Recovers persisted work and spawns the dispatcher daemon.
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) -> Result<JoinHandle<()>, IdsError> {
        self.recover()?;
        let daemon = DispatcherDaemon::new(Arc::clone(self))
            .with_interval(self.config.process_interval);
        Ok(tokio::spawn(daemon.run(shutdown)))
    }

    /// Waits until no entity is changing, or `timeout` elapses.
    ///
    /// Returns whether the changing set drained.
    pub async fn wait_until_settled(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.state.lock().changing.is_empty() && self.pool.in_flight() == 0 {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// A dispatched entity. Reports its outcome exactly once, falling back to
/// ERROR if the worker task is torn down without reporting.
struct InFlight {
    fsm: Arc<Fsm>,
    key: EntityKey,
    lock: Option<Lock>,
    _permit: WorkerPermit,
    finished: bool,
}

impl InFlight {
    fn finish(mut self, outcome: StatusInfo) {
        self.finished = true;
        let lock = self.lock.take();
        self.fsm.complete(self.key, outcome, lock);
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if !self.finished {
            error!(entity = %self.key, "Tier worker ended without an outcome");
            let lock = self.lock.take();
            self.fsm.complete(self.key, StatusInfo::Error, lock);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{datafile, dataset};
    use crate::model::Request;
    use crate::persistence::{MemoryRequestStore, RequestStore};
    use crate::storage::{LocalFileStorage, Storage};
    use crate::workers::testing::{fixture, Fixture};
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        main: Arc<LocalFileStorage>,
        archive: Arc<LocalFileStorage>,
        fsm: Arc<Fsm>,
        store: Arc<MemoryRequestStore>,
    }

    fn harness(write_delay: Duration) -> Harness {
        let Fixture {
            _dir: dir,
            main,
            archive,
            ctx,
        } = fixture();
        let store = Arc::new(MemoryRequestStore::new());
        let config = FsmConfig::default()
            .with_write_delay(write_delay)
            .with_max_workers(4);
        let fsm = Arc::new(Fsm::new(config, LockManager::new(), store.clone(), ctx));
        Harness {
            _dir: dir,
            main,
            archive,
            fsm,
            store,
        }
    }

    fn ds1() -> DataEntity {
        DataEntity::Dataset(dataset(1))
    }

    fn submit(store: &MemoryRequestStore, state: RequestedState, entity: DataEntity) -> Uuid {
        let request = Request::new("alice", state, [entity], chrono::Duration::days(1));
        store.save(&request).unwrap();
        request.prepared_id
    }

    fn status_of(store: &MemoryRequestStore, id: Uuid) -> StatusInfo {
        store.load(&id).unwrap().unwrap().status
    }

    #[tokio::test]
    async fn test_archive_round_trip_releases_everything() {
        let h = harness(Duration::ZERO);
        let write = submit(&h.store, RequestedState::Write, ds1());
        h.fsm.queue(ds1(), DeferredOp::Write, Some(write));
        assert_eq!(h.fsm.process_queue(), 1);
        assert!(h.fsm.wait_until_settled(Duration::from_secs(5)).await);
        assert_eq!(status_of(&h.store, write), StatusInfo::Completed);

        let archive = submit(&h.store, RequestedState::Archive, ds1());
        h.fsm.queue(ds1(), DeferredOp::Archive, Some(archive));
        assert_eq!(h.fsm.process_queue(), 1);
        assert!(h.fsm.wait_until_settled(Duration::from_secs(5)).await);

        assert_eq!(status_of(&h.store, archive), StatusInfo::Completed);
        assert!(!h.main.exists("inv1/ds1").unwrap());
        assert!(h.fsm.locks().lock_info().is_empty());
        assert!(!h.fsm.is_changing(EntityKey::Dataset(1)));
        assert_eq!(h.fsm.pool().in_flight(), 0);
    }

    #[test]
    fn test_rejected_spawn_releases_lock_and_permit() {
        let h = harness(Duration::ZERO);
        let owner = submit(&h.store, RequestedState::Write, ds1());
        h.fsm.queue(ds1(), DeferredOp::Write, Some(owner));

        // A runtime that is gone drops blocking tasks without running them.
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .build()
            .unwrap();
        let handle = rt.handle().clone();
        rt.shutdown_background();

        let (tx, rx) = std::sync::mpsc::channel();
        let fsm = Arc::clone(&h.fsm);
        std::thread::spawn(move || {
            let _guard = handle.enter();
            tx.send(fsm.process_queue()).unwrap();
        });
        let dispatched = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("process_queue did not return");

        assert_eq!(dispatched, 1);
        assert!(!h.fsm.is_changing(EntityKey::Dataset(1)));
        assert!(h.fsm.locks().lock_info().is_empty());
        assert_eq!(h.fsm.pool().in_flight(), 0);
        let request = h.store.load(&owner).unwrap().unwrap();
        assert_eq!(request.entities[0].status, StatusInfo::Error);
        assert_eq!(request.status, StatusInfo::Incomplete);
    }

    #[tokio::test]
    async fn test_locked_dataset_stays_queued() {
        let h = harness(Duration::ZERO);
        let reader = h.fsm.locks().lock([1], LockType::Shared).unwrap();
        h.fsm.queue(ds1(), DeferredOp::Write, None);

        assert_eq!(h.fsm.process_queue(), 0);
        assert!(h.fsm.queued(EntityKey::Dataset(1)).is_some());

        drop(reader);
        assert_eq!(h.fsm.process_queue(), 1);
        assert!(h.fsm.wait_until_settled(Duration::from_secs(5)).await);
        assert!(h.fsm.queued(EntityKey::Dataset(1)).is_none());
    }

    #[tokio::test]
    async fn test_write_delay_holds_dispatch() {
        let h = harness(Duration::from_secs(3600));
        h.fsm.queue(ds1(), DeferredOp::Write, None);
        h.fsm.queue(ds1(), DeferredOp::Archive, None);

        assert_eq!(h.fsm.process_queue(), 0);
        let entry = h.fsm.queued(EntityKey::Dataset(1)).unwrap();
        assert_eq!(entry.state, RequestedState::WriteThenArchive);
    }

    #[tokio::test]
    async fn test_preempted_request_is_incomplete() {
        let h = harness(Duration::ZERO);
        let older = submit(&h.store, RequestedState::Archive, ds1());
        let newer = submit(&h.store, RequestedState::Restore, ds1());
        h.fsm.queue(ds1(), DeferredOp::Archive, Some(older));
        h.fsm.queue(ds1(), DeferredOp::Restore, Some(newer));

        assert_eq!(status_of(&h.store, older), StatusInfo::Incomplete);
        assert_eq!(status_of(&h.store, newer), StatusInfo::Submitted);
    }

    #[tokio::test]
    async fn test_failed_restore_fails_waiting_prepare() {
        let h = harness(Duration::ZERO);
        // Nothing was ever written to slow storage.
        let prepared = submit(&h.store, RequestedState::Prepare, ds1());
        h.fsm.prepare(ds1(), prepared);
        assert_eq!(h.fsm.process_queue(), 1);
        assert!(h.fsm.wait_until_settled(Duration::from_secs(5)).await);

        let request = h.store.load(&prepared).unwrap().unwrap();
        assert_eq!(request.entities[0].status, StatusInfo::NotFound);
        assert_eq!(request.status, StatusInfo::Incomplete);
        assert!(h.fsm.service_status().prepares.is_empty());
    }

    #[tokio::test]
    async fn test_same_dataset_datafiles_run_one_at_a_time() {
        let h = harness(Duration::ZERO);
        h.fsm
            .queue(DataEntity::Datafile(datafile(10, 1)), DeferredOp::Write, None);
        h.fsm
            .queue(DataEntity::Datafile(datafile(11, 1)), DeferredOp::Write, None);

        assert_eq!(h.fsm.process_queue(), 1);
        assert_eq!(h.fsm.service_status().queue.len(), 1);
        assert!(h.fsm.wait_until_settled(Duration::from_secs(5)).await);
        assert_eq!(h.fsm.process_queue(), 1);
        assert!(h.fsm.wait_until_settled(Duration::from_secs(5)).await);
        assert!(h.archive.exists("inv1/ds1/f10.dat").unwrap());
        assert!(h.archive.exists("inv1/ds1/f11.dat").unwrap());
    }

    #[tokio::test]
    async fn test_recover_replays_unfinished_requests() {
        let h = harness(Duration::from_secs(3600));
        let done = {
            let mut r = Request::new("alice", RequestedState::Restore, [ds1()], chrono::Duration::days(1));
            r.set_entity_status(EntityKey::Dataset(1), StatusInfo::Completed);
            h.store.save(&r).unwrap();
            r.prepared_id
        };
        let pending = Request::new(
            "alice",
            RequestedState::WriteThenArchive,
            [DataEntity::Dataset(dataset(2))],
            chrono::Duration::days(1),
        );
        h.store.save(&pending).unwrap();

        assert_eq!(h.fsm.recover().unwrap(), 1);

        let entry = h.fsm.queued(EntityKey::Dataset(2)).unwrap();
        assert_eq!(entry.state, RequestedState::WriteThenArchive);
        assert_eq!(entry.owner, Some(pending.prepared_id));
        assert!(h.fsm.queued(EntityKey::Dataset(1)).is_none());
        assert_eq!(status_of(&h.store, done), StatusInfo::Completed);
    }

    #[tokio::test]
    async fn test_service_status_lists_queue() {
        let h = harness(Duration::from_secs(3600));
        h.fsm.queue(ds1(), DeferredOp::Write, None);
        let status = h.fsm.service_status();
        assert_eq!(
            status.queue,
            vec![EntityState {
                entity: EntityKey::Dataset(1),
                state: RequestedState::Write
            }]
        );
        assert!(status.changing.is_empty());
    }
}

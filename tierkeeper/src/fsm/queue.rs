//! The deferred-operation queue.
//!
//! Holds at most one pending migration per entity, combined through
//! [`merge`](super::merge::merge), plus the PREPARE waiters which are
//! tracked on their own. The queue is plain data; the coordinator guards it
//! with its state mutex.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use uuid::Uuid;

use super::merge::merge;
use crate::model::{overlaps, DataEntity, DeferredOp, EntityKey, RequestedState};

/// A pending migration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub entity: DataEntity,
    pub state: RequestedState,
    /// Earliest dispatch time while a write delay runs.
    pub not_before: Option<Instant>,
    /// Request that will receive the outcome, if any.
    pub owner: Option<Uuid>,
}

impl QueueEntry {
    pub fn is_ready(&self, now: Instant) -> bool {
        self.not_before.map_or(true, |t| t <= now)
    }
}

/// Requests waiting for an entity to come online.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrepareEntry {
    pub entity: DataEntity,
    pub owners: Vec<Uuid>,
}

/// A queued entry of an older request discarded by a newer one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preempted {
    pub owner: Uuid,
    pub key: EntityKey,
}

#[derive(Debug, Default)]
pub struct DeferredQueue {
    entries: BTreeMap<EntityKey, QueueEntry>,
    prepares: BTreeMap<EntityKey, PrepareEntry>,
}

impl DeferredQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an operation for `entity`.
    ///
    /// Every queued entry overlapping `entity` is removed and its state
    /// becomes the current state for the merge. Entries owned by a different
    /// request are reported as preempted. An operation without an owner
    /// inherits the owner of the entry it merges into when the merge leaves
    /// that entry's state unchanged, and preempts it otherwise.
    pub fn enqueue(
        &mut self,
        entity: DataEntity,
        op: DeferredOp,
        owner: Option<Uuid>,
        now: Instant,
        write_delay: Duration,
    ) -> Vec<Preempted> {
        let key = entity.key();

        if op == DeferredOp::Prepare {
            if let Some(owner) = owner {
                let waiting = self
                    .prepares
                    .entry(key)
                    .or_insert_with(|| PrepareEntry {
                        entity,
                        owners: Vec::new(),
                    });
                if !waiting.owners.contains(&owner) {
                    waiting.owners.push(owner);
                }
            }
            return Vec::new();
        }

        let mut overlapping: Vec<EntityKey> = self
            .entries
            .values()
            .filter(|e| overlaps(&e.entity, &entity))
            .map(|e| e.entity.key())
            .collect();
        // The entry for the entity itself, if any, supplies the current state.
        overlapping.sort_by_key(|k| *k != key);

        let mut removed: Vec<QueueEntry> = overlapping
            .into_iter()
            .filter_map(|k| self.entries.remove(&k))
            .collect();
        let previous = if removed.is_empty() {
            None
        } else {
            Some(removed.remove(0))
        };
        let merged = merge(previous.as_ref().map(|p| p.state), op);

        let inherits = owner.is_none() && previous.as_ref().map(|p| p.state) == Some(merged.state);
        let mut preempted = Vec::new();
        for old in previous.iter().filter(|_| !inherits).chain(removed.iter()) {
            if let Some(old_owner) = old.owner {
                if owner != Some(old_owner) {
                    preempted.push(Preempted {
                        owner: old_owner,
                        key: old.entity.key(),
                    });
                }
            }
        }

        let writing = matches!(
            merged.state,
            RequestedState::Write | RequestedState::WriteThenArchive
        );
        let not_before = if merged.restart_delay {
            Some(now + write_delay)
        } else if writing {
            previous.as_ref().and_then(|p| p.not_before)
        } else {
            None
        };
        let owner = if inherits {
            previous.as_ref().and_then(|p| p.owner)
        } else {
            owner
        };

        self.entries.insert(
            key,
            QueueEntry {
                entity,
                state: merged.state,
                not_before,
                owner,
            },
        );
        preempted
    }

    pub fn get(&self, key: EntityKey) -> Option<&QueueEntry> {
        self.entries.get(&key)
    }

    pub fn remove(&mut self, key: EntityKey) -> Option<QueueEntry> {
        self.entries.remove(&key)
    }

    pub fn entries(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.values()
    }

    /// Keys whose write delay, if any, has elapsed.
    pub fn ready(&self, now: Instant) -> Vec<EntityKey> {
        self.entries
            .iter()
            .filter(|(_, e)| e.is_ready(now))
            .map(|(k, _)| *k)
            .collect()
    }

    /// Whether any queued migration overlaps `entity`.
    pub fn has_overlapping(&self, entity: &DataEntity) -> bool {
        self.entries.values().any(|e| overlaps(&e.entity, entity))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn prepares(&self) -> impl Iterator<Item = &PrepareEntry> {
        self.prepares.values()
    }

    pub fn take_prepare(&mut self, key: EntityKey) -> Option<PrepareEntry> {
        self.prepares.remove(&key)
    }

    pub fn has_prepare(&self, key: EntityKey) -> bool {
        self.prepares.contains_key(&key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{datafile, dataset};

    const DELAY: Duration = Duration::from_secs(60);

    fn ds(id: u64) -> DataEntity {
        DataEntity::Dataset(dataset(id))
    }

    #[test]
    fn test_same_op_twice_yields_one_entry() {
        let mut q = DeferredQueue::new();
        let now = Instant::now();
        let owner = Some(Uuid::new_v4());
        q.enqueue(ds(1), DeferredOp::Archive, owner, now, DELAY);
        let preempted = q.enqueue(ds(1), DeferredOp::Archive, owner, now, DELAY);
        assert!(preempted.is_empty());
        assert_eq!(q.len(), 1);
        assert_eq!(q.get(EntityKey::Dataset(1)).map(|e| e.state), Some(RequestedState::Archive));
    }

    #[test]
    fn test_newer_request_preempts_older() {
        let mut q = DeferredQueue::new();
        let now = Instant::now();
        let (old, new) = (Uuid::new_v4(), Uuid::new_v4());
        q.enqueue(ds(1), DeferredOp::Archive, Some(old), now, DELAY);
        let preempted = q.enqueue(ds(1), DeferredOp::Restore, Some(new), now, DELAY);

        assert_eq!(
            preempted,
            vec![Preempted {
                owner: old,
                key: EntityKey::Dataset(1)
            }]
        );
        let entry = q.get(EntityKey::Dataset(1)).unwrap();
        assert_eq!(entry.state, RequestedState::Restore);
        assert_eq!(entry.owner, Some(new));
    }

    #[test]
    fn test_write_delay_rules() {
        let mut q = DeferredQueue::new();
        let t0 = Instant::now();
        let owner = Some(Uuid::new_v4());
        q.enqueue(ds(1), DeferredOp::Write, owner, t0, DELAY);
        assert_eq!(q.get(EntityKey::Dataset(1)).unwrap().not_before, Some(t0 + DELAY));

        // ARCHIVE joins the pending write without moving the deadline.
        let t1 = t0 + Duration::from_secs(10);
        q.enqueue(ds(1), DeferredOp::Archive, owner, t1, DELAY);
        let entry = q.get(EntityKey::Dataset(1)).unwrap();
        assert_eq!(entry.state, RequestedState::WriteThenArchive);
        assert_eq!(entry.not_before, Some(t0 + DELAY));
        assert!(q.ready(t1).is_empty());
        assert_eq!(q.ready(t0 + DELAY), vec![EntityKey::Dataset(1)]);

        // Another WRITE restarts it.
        let t2 = t0 + Duration::from_secs(30);
        q.enqueue(ds(1), DeferredOp::Write, owner, t2, DELAY);
        let entry = q.get(EntityKey::Dataset(1)).unwrap();
        assert_eq!(entry.state, RequestedState::WriteThenArchive);
        assert_eq!(entry.not_before, Some(t2 + DELAY));
    }

    #[test]
    fn test_unowned_restore_keeps_pending_writer() {
        let mut q = DeferredQueue::new();
        let now = Instant::now();
        let owner = Uuid::new_v4();
        q.enqueue(ds(1), DeferredOp::Write, Some(owner), now, DELAY);
        let preempted = q.enqueue(ds(1), DeferredOp::Restore, None, now, DELAY);
        assert!(preempted.is_empty());
        let entry = q.get(EntityKey::Dataset(1)).unwrap();
        assert_eq!(entry.state, RequestedState::Write);
        assert_eq!(entry.owner, Some(owner));
    }

    #[test]
    fn test_unowned_restore_preempts_pending_archive() {
        let mut q = DeferredQueue::new();
        let now = Instant::now();
        let owner = Uuid::new_v4();
        q.enqueue(ds(1), DeferredOp::Archive, Some(owner), now, DELAY);
        let preempted = q.enqueue(ds(1), DeferredOp::Restore, None, now, DELAY);
        assert_eq!(preempted.len(), 1);
        assert_eq!(preempted[0].owner, owner);
        let entry = q.get(EntityKey::Dataset(1)).unwrap();
        assert_eq!(entry.state, RequestedState::Restore);
        assert_eq!(entry.owner, None);
    }

    #[test]
    fn test_dataset_absorbs_overlapping_datafiles() {
        let mut q = DeferredQueue::new();
        let now = Instant::now();
        let owner = Some(Uuid::new_v4());
        q.enqueue(DataEntity::Datafile(datafile(10, 1)), DeferredOp::Restore, owner, now, DELAY);
        q.enqueue(DataEntity::Datafile(datafile(20, 2)), DeferredOp::Restore, owner, now, DELAY);
        q.enqueue(ds(1), DeferredOp::Archive, owner, now, DELAY);

        assert_eq!(q.len(), 2);
        assert!(q.get(EntityKey::Datafile(10)).is_none());
        assert!(q.get(EntityKey::Datafile(20)).is_some());
        assert!(q.has_overlapping(&DataEntity::Datafile(datafile(11, 1))));
    }

    #[test]
    fn test_prepare_is_tracked_separately() {
        let mut q = DeferredQueue::new();
        let now = Instant::now();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        q.enqueue(ds(1), DeferredOp::Archive, Some(a), now, DELAY);
        q.enqueue(ds(1), DeferredOp::Prepare, Some(b), now, DELAY);
        q.enqueue(ds(1), DeferredOp::Prepare, Some(b), now, DELAY);

        assert_eq!(q.get(EntityKey::Dataset(1)).map(|e| e.state), Some(RequestedState::Archive));
        assert!(q.has_prepare(EntityKey::Dataset(1)));
        let waiting = q.take_prepare(EntityKey::Dataset(1)).unwrap();
        assert_eq!(waiting.owners, vec![b]);
    }
}

//! Non-blocking shared/exclusive locks keyed by dataset id.
//!
//! Readers take [`LockType::Shared`] locks, tier workers and deletions take
//! [`LockType::Exclusive`] locks. Acquisition never waits: a conflicting
//! request fails immediately with [`AlreadyLocked`], which callers report as
//! "data busy".
//!
//! A [`Lock`] releases its datasets when dropped, so every exit path of the
//! owning operation gives the lock back.
//!
//! # Example
//!
//! ```ignore
//! use tierkeeper::lock::{LockManager, LockType};
//!
//! let locks = LockManager::new();
//! let reading = locks.lock([4], LockType::Shared)?;
//! assert!(locks.lock([4], LockType::Exclusive).is_err());
//! drop(reading);
//! let _writing = locks.lock([4], LockType::Exclusive)?;
//! ```

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tracing::trace;

/// Kind of lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockType {
    Shared,
    Exclusive,
}

impl fmt::Display for LockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shared => write!(f, "SHARED"),
            Self::Exclusive => write!(f, "EXCLUSIVE"),
        }
    }
}

/// A dataset is held by a conflicting lock.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Dataset {dataset_id} is already locked")]
pub struct AlreadyLocked {
    pub dataset_id: u64,
}

#[derive(Debug, Clone, Copy)]
struct Holders {
    kind: LockType,
    count: usize,
}

type LockTable = HashMap<u64, Holders>;

/// Snapshot of one locked dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockInfo {
    pub dataset_id: u64,
    #[serde(rename = "type")]
    pub kind: LockType,
    pub count: usize,
}

/// Process-wide lock table.
#[derive(Clone, Default)]
pub struct LockManager {
    table: Arc<Mutex<LockTable>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks every dataset in `datasets` or none of them.
    pub fn lock<I>(&self, datasets: I, kind: LockType) -> Result<Lock, AlreadyLocked>
    where
        I: IntoIterator<Item = u64>,
    {
        let datasets: BTreeSet<u64> = datasets.into_iter().collect();
        let mut table = self.table.lock();

        for &id in &datasets {
            if let Some(holders) = table.get(&id) {
                if kind == LockType::Exclusive || holders.kind == LockType::Exclusive {
                    trace!(dataset_id = id, requested = %kind, held = %holders.kind, "Lock conflict");
                    return Err(AlreadyLocked { dataset_id: id });
                }
            }
        }

        for &id in &datasets {
            table
                .entry(id)
                .and_modify(|h| h.count += 1)
                .or_insert(Holders { kind, count: 1 });
        }
        trace!(datasets = ?datasets, kind = %kind, "Lock acquired");

        Ok(Lock {
            table: Arc::clone(&self.table),
            datasets,
            kind,
        })
    }

    /// Currently locked datasets, ordered by id.
    pub fn lock_info(&self) -> Vec<LockInfo> {
        let table = self.table.lock();
        let mut info: Vec<LockInfo> = table
            .iter()
            .map(|(&dataset_id, h)| LockInfo {
                dataset_id,
                kind: h.kind,
                count: h.count,
            })
            .collect();
        info.sort_by_key(|i| i.dataset_id);
        info
    }

    pub fn is_locked(&self, dataset_id: u64) -> bool {
        self.table.lock().contains_key(&dataset_id)
    }
}

/// A held lock. Dropping it releases every dataset it covers.
pub struct Lock {
    table: Arc<Mutex<LockTable>>,
    datasets: BTreeSet<u64>,
    kind: LockType,
}

impl Lock {
    pub fn kind(&self) -> LockType {
        self.kind
    }

    pub fn datasets(&self) -> impl Iterator<Item = u64> + '_ {
        self.datasets.iter().copied()
    }

    /// Releases the lock now.
    pub fn release(self) {}
}

impl fmt::Debug for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock")
            .field("datasets", &self.datasets)
            .field("kind", &self.kind)
            .finish()
    }
}

impl Drop for Lock {
    fn drop(&mut self) {
        let mut table = self.table.lock();
        for id in &self.datasets {
            let remove = match table.get_mut(id) {
                Some(h) => {
                    h.count = h.count.saturating_sub(1);
                    h.count == 0
                }
                None => false,
            };
            if remove {
                table.remove(id);
            }
        }
        trace!(datasets = ?self.datasets, kind = %self.kind, "Lock released");
    }
}

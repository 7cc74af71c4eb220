//! Bounded pool of tier worker slots.
//!
//! The dispatcher takes a permit before handing an entity to a worker. When
//! every slot is busy the scan stops and the remaining entries stay queued
//! for the next pass, so a burst of requests never turns into a burst of
//! threads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Fallback worker count when CPU detection fails.
pub const FALLBACK_WORKERS: usize = 4;

/// Default number of concurrent tier workers: one per CPU.
pub fn default_max_workers() -> usize {
    std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(FALLBACK_WORKERS)
}

#[derive(Debug)]
struct Counters {
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Semaphore-backed worker slots.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    counters: Arc<Counters>,
}

impl WorkerPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            counters: Arc::new(Counters {
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
            }),
        }
    }

    /// Takes a slot without waiting; `None` when the pool is saturated.
    pub fn try_acquire(&self) -> Option<WorkerPermit> {
        let permit = Arc::clone(&self.semaphore).try_acquire_owned().ok()?;
        let current = self.counters.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.counters
            .peak_in_flight
            .fetch_max(current, Ordering::Relaxed);
        Some(WorkerPermit {
            _permit: permit,
            counters: Arc::clone(&self.counters),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::Relaxed)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.counters.peak_in_flight.load(Ordering::Relaxed)
    }
}

/// A held worker slot, returned to the pool on drop.
#[derive(Debug)]
pub struct WorkerPermit {
    _permit: OwnedSemaphorePermit,
    counters: Arc<Counters>,
}

impl Drop for WorkerPermit {
    fn drop(&mut self) {
        self.counters.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

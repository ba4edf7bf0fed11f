//! Async gate for the cooperative backend.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::Gate;

/// Cooperative semaphore: waiting tasks are suspended, never the worker thread
#[derive(Debug)]
pub struct AsyncGate {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    occupancy: Arc<Occupancy>,
}

#[derive(Debug, Default)]
struct Occupancy {
    in_use: AtomicUsize,
    peak: AtomicUsize,
}

impl AsyncGate {
    /// Create a gate admitting at most `capacity` holders
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            occupancy: Arc::new(Occupancy::default()),
        }
    }

    /// Wait for a free slot. Dropping the returned future gives up the place in line.
    pub async fn acquire(&self) -> AsyncPermit {
        // The semaphore is private and never closed
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("Semaphore should not be closed");

        let in_use = self.occupancy.in_use.fetch_add(1, Ordering::SeqCst) + 1;
        self.occupancy.peak.fetch_max(in_use, Ordering::SeqCst);

        AsyncPermit {
            _permit: permit,
            occupancy: self.occupancy.clone(),
        }
    }
}

impl Gate for AsyncGate {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn in_use(&self) -> usize {
        self.occupancy.in_use.load(Ordering::SeqCst)
    }

    fn peak(&self) -> usize {
        self.occupancy.peak.load(Ordering::SeqCst)
    }
}

/// Slot held in an [`AsyncGate`]; released on drop
#[derive(Debug)]
pub struct AsyncPermit {
    _permit: OwnedSemaphorePermit,
    occupancy: Arc<Occupancy>,
}

impl Drop for AsyncPermit {
    fn drop(&mut self) {
        self.occupancy.in_use.fetch_sub(1, Ordering::SeqCst);
    }
}

//! Blocking gate for the thread-pool backend.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;

use super::Gate;

/// Blocking semaphore for OS worker threads.
///
/// Waiters park on a condition variable. A release wakes one waiter;
/// [`interrupt`](Self::interrupt) wakes all of them so they can notice
/// cancellation.
#[derive(Debug)]
pub struct BlockingGate {
    capacity: usize,
    slots: Mutex<Slots>,
    released: Condvar,
}

#[derive(Debug, Default)]
struct Slots {
    in_use: usize,
    peak: usize,
}

impl BlockingGate {
    /// Create a gate admitting at most `capacity` holders
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            slots: Mutex::new(Slots::default()),
            released: Condvar::new(),
        }
    }

    /// Block until a slot is free. Returns `None` if `cancel` fires first.
    pub fn acquire(self: &Arc<Self>, cancel: &CancellationToken) -> Option<BlockingPermit> {
        let mut slots = self.slots.lock();
        loop {
            if cancel.is_cancelled() {
                // Pass on a release wake-up this waiter may have consumed
                self.released.notify_one();
                return None;
            }
            if slots.in_use < self.capacity {
                slots.in_use += 1;
                slots.peak = slots.peak.max(slots.in_use);
                return Some(BlockingPermit { gate: self.clone() });
            }
            self.released.wait(&mut slots);
        }
    }

    /// Wake every waiter so it can re-check its cancellation token
    pub fn interrupt(&self) {
        let _slots = self.slots.lock();
        self.released.notify_all();
    }

    fn release(&self) {
        let mut slots = self.slots.lock();
        slots.in_use -= 1;
        self.released.notify_one();
    }
}

impl Gate for BlockingGate {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn in_use(&self) -> usize {
        self.slots.lock().in_use
    }

    fn peak(&self) -> usize {
        self.slots.lock().peak
    }
}

/// Slot held in a [`BlockingGate`]; released on drop
#[derive(Debug)]
pub struct BlockingPermit {
    gate: Arc<BlockingGate>,
}

impl Drop for BlockingPermit {
    fn drop(&mut self) {
        self.gate.release();
    }
}

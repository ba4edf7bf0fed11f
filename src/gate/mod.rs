//! Concurrency gates
//!
//! A gate is a counting admission primitive shared by every task of a batch.
//! Each backend has its own: [`AsyncGate`] suspends the calling future,
//! [`BlockingGate`] parks the calling thread. Both hand out RAII permits, so a
//! slot is returned on every exit path of the guarded section, including
//! errors, cancellation and unwinding panics.

pub mod blocking;
pub mod cooperative;

pub use blocking::{BlockingGate, BlockingPermit};
pub use cooperative::{AsyncGate, AsyncPermit};

/// Introspection shared by both gate kinds
pub trait Gate: Send + Sync {
    /// Maximum number of simultaneous holders
    fn capacity(&self) -> usize;

    /// Permits currently held
    fn in_use(&self) -> usize;

    /// Highest number of permits held at the same time
    fn peak(&self) -> usize;

    /// Permits that can be acquired without waiting
    fn available(&self) -> usize {
        self.capacity().saturating_sub(self.in_use())
    }
}

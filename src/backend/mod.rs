//! Scheduling backends
//!
//! The supervisor in [`Executor::run`](crate::batch::Executor::run) is written
//! once against the [`Backend`] and [`TaskHandle`] traits. A backend owns the
//! concurrency gate and knows how to launch tasks; a handle lets the
//! supervisor wait for, cancel and settle one launched task.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::batch::{OutcomeSink, Task};
use crate::gate::Gate;
use crate::Result;

pub mod cooperative;
pub mod preemptive;

pub use cooperative::{CooperativeBackend, CooperativeWork};
pub use preemptive::{PreemptiveBackend, PreemptiveWork};

/// Strategy for running the tasks of one batch
pub trait Backend: Send + 'static {
    /// Unit of work accepted by this backend
    type Work: Send + 'static;
    /// Value produced by a successful unit of work
    type Value: Send + 'static;
    /// Gate bounding simultaneous execution
    type Gate: Gate;

    /// Name used in logs and metric labels
    const NAME: &'static str;

    /// Create a backend whose gate admits `capacity` tasks at once
    fn with_capacity(capacity: usize) -> Self;

    /// Gate shared by every task of the batch
    fn gate(&self) -> &Self::Gate;

    /// Start every task. Each one must acquire the gate, run its unit of
    /// work, record into `sink` and release the gate, stopping early once
    /// its child of `cancel` fires.
    fn launch(
        &mut self,
        tasks: Vec<Task<Self::Work>>,
        sink: &Arc<OutcomeSink<Self::Value>>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Box<dyn TaskHandle>>>;
}

/// How a cancelled task ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    /// The task stopped and released its gate slot
    Drained,
    /// The task is still inside its unit of work and was left behind
    Detached,
}

/// Supervisor's view of one launched task
#[async_trait]
pub trait TaskHandle: Send {
    /// Key of the task
    fn key(&self) -> &str;

    /// Whether the task has stopped touching shared state
    fn is_finished(&self) -> bool;

    /// Signal cancellation; never blocks
    fn cancel(&self);

    /// Wait until the task has finished
    async fn join(&mut self);

    /// After [`cancel`](Self::cancel), wait for the task to let go of its
    /// slot. `grace` bounds the wait only where the backend cannot interrupt
    /// a running unit of work.
    async fn settle(&mut self, grace: Duration) -> Settled;
}

//! Batch executor and supervisor.
//!
//! An [`Executor`] is used exactly once:
//! - tasks are registered while it is [`BatchState::Created`]
//! - [`Executor::run`] moves it to [`BatchState::Running`], launches every
//!   task through the backend's gate, applies the optional deadline and
//!   returns the [`BatchOutcome`]
//! - afterwards it stays [`BatchState::Finished`] and rejects every call
//!
//! On timeout the supervisor cancels every unfinished task and waits for the
//! cancellation to settle before sealing the outcome sink, so no task can
//! write into an aggregate that was already returned.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::backend::{
    Backend, CooperativeBackend, PreemptiveBackend, Settled, TaskHandle,
};
use crate::batch::aggregation::{BatchOutcome, OutcomeSink};
use crate::batch::registry::TaskRegistry;
use crate::batch::types::{BatchState, ProgressCallback, TaskKey};
use crate::config::ExecutorConfig;
use crate::gate::Gate;
use crate::metrics::BatchMetrics;
use crate::{BatchError, Result};

/// Executor running units of work as tokio tasks
pub type CooperativeExecutor<T> = Executor<CooperativeBackend<T>>;

/// Executor running units of work on a pool of OS threads
pub type ThreadedExecutor<T> = Executor<PreemptiveBackend<T>>;

/// One-shot bounded-concurrency batch executor
pub struct Executor<B: Backend> {
    id: Uuid,
    config: ExecutorConfig,
    registry: TaskRegistry<B::Work>,
    backend: B,
    state: BatchState,
    progress_callback: Option<Arc<ProgressCallback>>,
}

impl<B: Backend> fmt::Debug for Executor<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("id", &self.id)
            .field("backend", &B::NAME)
            .field("config", &self.config)
            .field("tasks", &self.registry.len())
            .field("state", &self.state)
            .finish()
    }
}

impl<B: Backend> Executor<B> {
    /// Create an executor admitting `max_concurrent` tasks at once, with an
    /// optional deadline for the whole batch
    pub fn new(max_concurrent: usize, timeout: Option<Duration>) -> Result<Self> {
        let mut config = ExecutorConfig::default().with_max_concurrent(max_concurrent);
        config.timeout = timeout;
        Self::with_config(config)
    }

    /// Create an executor from a validated configuration
    pub fn with_config(config: ExecutorConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            id: Uuid::new_v4(),
            backend: B::with_capacity(config.max_concurrent),
            config,
            registry: TaskRegistry::new(),
            state: BatchState::Created,
            progress_callback: None,
        })
    }

    /// Set progress callback, called with `(completed, total)` after each
    /// recorded outcome
    pub fn with_progress_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.progress_callback = Some(Arc::new(Box::new(callback)));
        self
    }

    /// Identifier of this batch, as logged on the run span
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current lifecycle state
    pub fn state(&self) -> BatchState {
        self.state
    }

    /// Configuration in use
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Gate shared by the tasks of this batch
    pub fn gate(&self) -> &B::Gate {
        self.backend.gate()
    }

    /// Number of registered tasks
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// Returns true if no task is registered
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Register an already boxed unit of work
    pub fn register_work(&mut self, key: impl Into<TaskKey>, work: B::Work) -> Result<()> {
        self.ensure_state(BatchState::Created, "register")?;
        self.registry.insert(key, work)
    }

    fn ensure_state(&self, expected: BatchState, operation: &'static str) -> Result<()> {
        if self.state != expected {
            return Err(BatchError::InvalidState {
                state: self.state,
                operation,
            });
        }
        Ok(())
    }

    fn transition(&mut self, to: BatchState) {
        debug!(batch_id = %self.id, from = %self.state, to = %to, "Executor state change");
        self.state = to;
    }

    /// Run every registered task and aggregate the outcomes.
    ///
    /// Fails only with [`BatchError::InvalidState`] when the executor was
    /// already run, or with [`BatchError::Spawn`] when the backend could not
    /// start. Task failures are captured in the returned outcome.
    #[instrument(
        skip(self),
        fields(batch_id = %self.id, backend = B::NAME, tasks = self.registry.len())
    )]
    pub async fn run(&mut self) -> Result<BatchOutcome<B::Value>> {
        self.ensure_state(BatchState::Created, "run")?;
        self.transition(BatchState::Running);

        let started_at = Utc::now();
        let start = Instant::now();

        let tasks = std::mem::take(&mut self.registry).into_tasks();
        let keys: Vec<TaskKey> = tasks.iter().map(|task| task.key.clone()).collect();
        let total = keys.len();

        info!(
            name = ?self.config.name,
            total_tasks = total,
            max_concurrent = self.config.max_concurrent,
            timeout = ?self.config.timeout,
            "Starting batch execution"
        );

        let sink = Arc::new(OutcomeSink::new(total, self.progress_callback.clone()));
        let cancel = CancellationToken::new();
        // Cancels every task if this future is dropped mid-run
        let drop_guard = cancel.clone().drop_guard();

        let launched = self.backend.launch(tasks, &sink, &cancel);
        let mut handles = match launched {
            Ok(handles) => handles,
            Err(e) => {
                self.transition(BatchState::Finished);
                return Err(e);
            }
        };

        let timed_out = match self.config.timeout {
            None => {
                join_all(&mut handles).await;
                false
            }
            Some(deadline) => {
                if within_deadline(deadline, join_all(&mut handles)).await {
                    false
                } else {
                    warn!(
                        timeout_ms = deadline.as_millis() as u64,
                        unfinished = handles.iter().filter(|h| !h.is_finished()).count(),
                        "Batch deadline elapsed; cancelling unfinished tasks"
                    );
                    drain(&mut handles, self.config.drain_grace).await;
                    true
                }
            }
        };

        drop(drop_guard.disarm());
        let outcomes = sink.seal();
        let outcome = BatchOutcome::new(
            self.id,
            self.config.name.clone(),
            keys,
            outcomes,
            timed_out,
            started_at,
            start.elapsed(),
        );

        self.transition(BatchState::Finished);
        BatchMetrics::new(B::NAME).record_run(&outcome);

        let stats = outcome.stats();
        info!(
            succeeded = stats.succeeded,
            failed = stats.failed,
            cancelled = stats.cancelled,
            timed_out,
            peak_concurrency = self.backend.gate().peak(),
            batch_duration_ms = stats.elapsed.as_millis() as u64,
            "Batch execution completed"
        );

        Ok(outcome)
    }
}

async fn join_all(handles: &mut [Box<dyn TaskHandle>]) {
    for handle in handles.iter_mut() {
        handle.join().await;
    }
}

async fn within_deadline(deadline: Duration, work: impl Future<Output = ()>) -> bool {
    tokio::time::timeout(deadline, work).await.is_ok()
}

/// Cancel every unfinished task, then wait for each to settle. The grace
/// period is shared by the whole drain, not granted per task.
async fn drain(handles: &mut [Box<dyn TaskHandle>], grace: Duration) {
    for handle in handles.iter().filter(|h| !h.is_finished()) {
        handle.cancel();
    }

    let grace_ends = Instant::now() + grace;
    let mut detached = 0usize;
    for handle in handles.iter_mut() {
        let remaining = grace_ends.saturating_duration_since(Instant::now());
        if handle.settle(remaining).await == Settled::Detached {
            detached += 1;
            debug!(task = %handle.key(), "Task detached");
        }
    }

    if detached > 0 {
        warn!(detached, "Some workers ignored cancellation and were left running");
    }
}

impl<T: Send + 'static> CooperativeExecutor<T> {
    /// Register a future as the unit of work for `key`
    pub fn register<F>(&mut self, key: impl Into<TaskKey>, work: F) -> Result<()>
    where
        F: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.register_work(key, Box::pin(work))
    }
}

impl<T: Send + 'static> ThreadedExecutor<T> {
    /// Register a closure as the unit of work for `key`.
    ///
    /// The closure runs on a worker thread and receives the task's
    /// cancellation token; checking it is the only way a running closure
    /// can stop early once the deadline fires.
    pub fn register<F>(&mut self, key: impl Into<TaskKey>, work: F) -> Result<()>
    where
        F: FnOnce(&CancellationToken) -> anyhow::Result<T> + Send + 'static,
    {
        self.register_work(key, Box::new(work))
    }

    /// Run the batch from synchronous code on a private current-thread
    /// runtime.
    ///
    /// Fails with [`BatchError::InsideRuntime`] when called from within a
    /// tokio runtime; the executor is left untouched and can still be run
    /// with [`run`](Executor::run).
    pub fn run_blocking(&mut self) -> Result<BatchOutcome<T>> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(BatchError::InsideRuntime);
        }
        self.ensure_state(BatchState::Created, "run")?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        runtime.block_on(self.run())
    }
}

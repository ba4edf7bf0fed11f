//! # Bounded Batch
//!
//! Run a fixed set of keyed units of work with a hard cap on how many execute
//! at once, optionally cut the whole batch short after a deadline, and get
//! back one aggregate mapping every key to its value or captured failure.
//!
//! ## Overview
//!
//! An [`Executor`](batch::Executor) is a one-shot object: tasks are
//! registered while it is `Created`, [`run`](batch::Executor::run) moves it to
//! `Running` and then `Finished`, and every later call fails with
//! [`BatchError::InvalidState`]. The same supervisor algorithm drives two
//! scheduling backends:
//!
//! - [`CooperativeExecutor`](batch::CooperativeExecutor): units of work are
//!   futures spawned on the tokio runtime, admitted through an async
//!   semaphore and cancelled at their next suspension point.
//! - [`ThreadedExecutor`](batch::ThreadedExecutor): units of work are
//!   closures run by a pool of OS threads, admitted through a blocking
//!   semaphore; cancellation is best-effort for work already running.
//!
//! ## Quick Start
//!
//! ```rust
//! use bounded_batch::batch::CooperativeExecutor;
//! use std::time::Duration;
//!
//! # async fn example() -> bounded_batch::Result<()> {
//! let mut executor = CooperativeExecutor::<u64>::new(2, Some(Duration::from_secs(5)))?;
//! for i in 0..4u64 {
//!     executor.register(format!("task-{i}"), async move { anyhow::Ok(i * 2) })?;
//! }
//!
//! let outcome = executor.run().await?;
//! assert!(outcome.all_succeeded());
//! assert_eq!(outcome.result("task-3"), Some(&6));
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`batch`]: registry, executor state machine, supervisor and aggregate
//! - [`gate`]: concurrency gates for both backends
//! - [`backend`]: spawn / cancel / join primitives for both backends
//! - [`config`]: executor configuration
//! - [`metrics`]: Prometheus metrics for runs and tasks

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

use thiserror::Error;

use crate::batch::BatchState;

/// Result type for executor operations
pub type Result<T> = std::result::Result<T, BatchError>;

/// Errors caused by driving an executor incorrectly.
///
/// Failures of individual units of work never show up here; they are
/// captured per key in the [`BatchOutcome`](batch::BatchOutcome).
#[derive(Error, Debug)]
pub enum BatchError {
    /// Operation not allowed in the executor's current state
    #[error("invalid state: cannot {operation} while executor is {state}")]
    InvalidState {
        /// State the executor was in
        state: BatchState,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Task key is empty
    #[error("invalid task key: key must not be empty")]
    InvalidKey,

    /// Task key was already registered in this batch
    #[error("duplicate task key: '{0}' is already registered")]
    DuplicateKey(String),

    /// Constructor or configuration argument out of range
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration could not be parsed
    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),

    /// Blocking entry point used from inside an async runtime
    #[error("run_blocking called from within a tokio runtime; use run().await instead")]
    InsideRuntime,

    /// Worker thread or private runtime could not be started
    #[error("failed to start worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Task registry, executor and result aggregation
pub mod batch;

/// Concurrency gates
pub mod gate;

/// Scheduling backends
pub mod backend;

/// Executor configuration
pub mod config;

/// Prometheus metrics
pub mod metrics;

pub use batch::{
    BatchOutcome, BatchStats, Cancelled, CooperativeExecutor, Executor, Outcome, TaskFailure,
    ThreadedExecutor,
};
pub use config::ExecutorConfig;

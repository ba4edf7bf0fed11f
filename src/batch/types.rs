//! Core batch types shared by the registry, backends and aggregate.

use std::any::Any;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Caller-chosen identifier of a task, unique within one batch
pub type TaskKey = String;

/// A registered unit of work bound to its key
pub struct Task<W> {
    /// Unique, non-empty key
    pub key: TaskKey,
    /// Deferred computation supplied by the caller
    pub work: W,
}

impl<W> fmt::Debug for Task<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("key", &self.key)
            .field("work", &"<unit of work>")
            .finish()
    }
}

/// Lifecycle of an executor. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    /// Accepting task registrations
    Created,
    /// `run` has been called and has not returned yet
    Running,
    /// `run` has returned; the executor is spent
    Finished,
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchState::Created => "created",
            BatchState::Running => "running",
            BatchState::Finished => "finished",
        };
        f.write_str(name)
    }
}

/// Failure captured from a single unit of work
#[derive(Error, Debug)]
pub enum TaskFailure {
    /// The unit of work returned an error
    #[error(transparent)]
    Error(#[from] anyhow::Error),

    /// The unit of work panicked
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskFailure {
    /// Build a failure from a panic payload, keeping the message when it is a string
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        TaskFailure::Panicked(message)
    }

    /// Whether this failure is the unit of work acknowledging cancellation
    pub fn is_cancellation(&self) -> bool {
        match self {
            TaskFailure::Error(err) => err.is::<Cancelled>(),
            TaskFailure::Panicked(_) => false,
        }
    }
}

/// Error a unit of work returns after it noticed the batch was cancelled.
///
/// When the task's token had fired, an outcome carrying this error is not
/// stored and the key is reported through
/// [`BatchOutcome::cancelled`](crate::batch::BatchOutcome::cancelled). Returned
/// without a cancellation request it is an ordinary failure.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[error("task cancelled")]
pub struct Cancelled;

/// Final outcome of one task
#[derive(Debug)]
pub enum Outcome<T> {
    /// The unit of work produced a value
    Success(T),
    /// The unit of work failed
    Failure(TaskFailure),
}

impl<T> Outcome<T> {
    /// Returns true for [`Outcome::Success`]
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    /// The produced value, if any
    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Success(value) => Some(value),
            Outcome::Failure(_) => None,
        }
    }

    /// The captured failure, if any
    pub fn failure(&self) -> Option<&TaskFailure> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Failure(failure) => Some(failure),
        }
    }
}

impl<T> From<std::result::Result<T, TaskFailure>> for Outcome<T> {
    fn from(result: std::result::Result<T, TaskFailure>) -> Self {
        match result {
            Ok(value) => Outcome::Success(value),
            Err(failure) => Outcome::Failure(failure),
        }
    }
}

/// Callback for progress updates: `(completed, total)`
pub type ProgressCallback = Box<dyn Fn(usize, usize) + Send + Sync>;

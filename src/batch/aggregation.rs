//! Result aggregation for batch runs.
//!
//! Running tasks report into one [`OutcomeSink`]; the supervisor seals it
//! once the run is over and freezes the contents into a [`BatchOutcome`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::batch::types::{Outcome, ProgressCallback, TaskFailure, TaskKey};

/// Single aggregation point shared by every task of a batch.
///
/// Writes are serialized by a mutex. After [`seal`](Self::seal) every further
/// write is discarded, which keeps outcomes produced by detached workers out
/// of an aggregate that was already handed to the caller.
pub struct OutcomeSink<T> {
    state: Mutex<SinkState<T>>,
    total: usize,
    progress: Option<Arc<ProgressCallback>>,
}

struct SinkState<T> {
    outcomes: HashMap<TaskKey, Outcome<T>>,
    completed: usize,
    sealed: bool,
}

impl<T> OutcomeSink<T> {
    /// Create a sink for a batch of `total` tasks
    pub fn new(total: usize, progress: Option<Arc<ProgressCallback>>) -> Self {
        Self {
            state: Mutex::new(SinkState {
                outcomes: HashMap::with_capacity(total),
                completed: 0,
                sealed: false,
            }),
            total,
            progress,
        }
    }

    /// Record the outcome of one task.
    ///
    /// `cancel_requested` tells whether the task's cancellation token had
    /// fired. Only then is a [`Cancelled`](crate::Cancelled) error taken as
    /// an acknowledgement and left out; otherwise it is an ordinary failure.
    ///
    /// Returns `false` when the outcome was not stored.
    pub fn record(
        &self,
        key: &str,
        result: std::result::Result<T, TaskFailure>,
        cancel_requested: bool,
    ) -> bool {
        let completed = {
            let mut state = self.state.lock();
            if state.sealed {
                warn!(task = %key, "Discarding outcome produced after the batch returned");
                return false;
            }
            if let Err(failure) = &result {
                if cancel_requested && failure.is_cancellation() {
                    debug!(task = %key, "Task acknowledged cancellation");
                    return false;
                }
            }

            state.outcomes.insert(key.to_string(), Outcome::from(result));
            state.completed += 1;
            state.completed
        };

        if let Some(callback) = &self.progress {
            callback(completed, self.total);
        }
        true
    }

    /// Number of outcomes stored so far
    pub fn completed(&self) -> usize {
        self.state.lock().completed
    }

    /// Whether the sink stopped accepting outcomes
    pub fn is_sealed(&self) -> bool {
        self.state.lock().sealed
    }

    /// Stop accepting outcomes and take everything recorded so far
    pub(crate) fn seal(&self) -> HashMap<TaskKey, Outcome<T>> {
        let mut state = self.state.lock();
        state.sealed = true;
        std::mem::take(&mut state.outcomes)
    }
}

/// Counters and timing for one finished batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    /// Tasks registered
    pub total: usize,
    /// Tasks that produced a value
    pub succeeded: usize,
    /// Tasks that failed
    pub failed: usize,
    /// Tasks that produced nothing because the deadline cancelled them
    pub cancelled: usize,
    /// Wall-clock start of the run
    pub started_at: DateTime<Utc>,
    /// Time spent in `run`
    pub elapsed: Duration,
}

/// Immutable result of one batch run
#[derive(Debug)]
pub struct BatchOutcome<T> {
    batch_id: Uuid,
    name: Option<String>,
    outcomes: HashMap<TaskKey, Outcome<T>>,
    cancelled: Vec<TaskKey>,
    timed_out: bool,
    all_succeeded: bool,
    stats: BatchStats,
}

impl<T> BatchOutcome<T> {
    /// Freeze the sealed outcomes. `keys` are all registered keys in order;
    /// those without an outcome are reported as cancelled.
    pub(crate) fn new(
        batch_id: Uuid,
        name: Option<String>,
        keys: Vec<TaskKey>,
        outcomes: HashMap<TaskKey, Outcome<T>>,
        timed_out: bool,
        started_at: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        let total = keys.len();
        let cancelled: Vec<TaskKey> = keys
            .into_iter()
            .filter(|key| !outcomes.contains_key(key))
            .collect();
        let succeeded = outcomes.values().filter(|o| o.is_success()).count();
        let failed = outcomes.len() - succeeded;

        Self {
            batch_id,
            name,
            all_succeeded: failed == 0 && !timed_out,
            stats: BatchStats {
                total,
                succeeded,
                failed,
                cancelled: cancelled.len(),
                started_at,
                elapsed,
            },
            outcomes,
            cancelled,
            timed_out,
        }
    }

    /// Identifier of the run, as logged on its span
    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    /// Optional batch name from the configuration
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// True iff no task failed and the deadline did not elapse
    pub fn all_succeeded(&self) -> bool {
        self.all_succeeded
    }

    /// True iff the deadline elapsed before every task finished
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Successful values by key
    pub fn results(&self) -> impl Iterator<Item = (&str, &T)> {
        self.outcomes
            .iter()
            .filter_map(|(key, outcome)| outcome.value().map(|value| (key.as_str(), value)))
    }

    /// Captured failures by key
    pub fn failures(&self) -> impl Iterator<Item = (&str, &TaskFailure)> {
        self.outcomes
            .iter()
            .filter_map(|(key, outcome)| outcome.failure().map(|failure| (key.as_str(), failure)))
    }

    /// Value produced for `key`, if it succeeded
    pub fn result(&self, key: &str) -> Option<&T> {
        self.outcomes.get(key).and_then(Outcome::value)
    }

    /// Failure captured for `key`, if it failed
    pub fn failure(&self, key: &str) -> Option<&TaskFailure> {
        self.outcomes.get(key).and_then(Outcome::failure)
    }

    /// Outcome for `key`; `None` for unknown or cancelled keys
    pub fn outcome(&self, key: &str) -> Option<&Outcome<T>> {
        self.outcomes.get(key)
    }

    /// All outcomes by key
    pub fn outcomes(&self) -> &HashMap<TaskKey, Outcome<T>> {
        &self.outcomes
    }

    /// Keys that produced neither a value nor a failure, in registration order
    pub fn cancelled(&self) -> &[TaskKey] {
        &self.cancelled
    }

    /// Counters and timing for the run
    pub fn stats(&self) -> &BatchStats {
        &self.stats
    }

    /// Split into owned `(results, failures)` maps
    pub fn into_parts(self) -> (HashMap<TaskKey, T>, HashMap<TaskKey, TaskFailure>) {
        let mut results = HashMap::new();
        let mut failures = HashMap::new();
        for (key, outcome) in self.outcomes {
            match outcome {
                Outcome::Success(value) => {
                    results.insert(key, value);
                }
                Outcome::Failure(failure) => {
                    failures.insert(key, failure);
                }
            }
        }
        (results, failures)
    }
}

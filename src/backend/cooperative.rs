//! Cooperative backend: every task is a future spawned on the tokio runtime.
//!
//! Admission and the unit of work each race the task's cancellation token,
//! so cancellation takes effect at the next suspension point and the permit
//! is dropped on the way out.

use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use super::{Backend, Settled, TaskHandle};
use crate::batch::{OutcomeSink, Task, TaskFailure, TaskKey};
use crate::gate::AsyncGate;
use crate::Result;

/// Unit of work for the cooperative backend
pub type CooperativeWork<T> = BoxFuture<'static, anyhow::Result<T>>;

/// Backend spawning one tokio task per unit of work
pub struct CooperativeBackend<T> {
    gate: Arc<AsyncGate>,
    _value: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> Backend for CooperativeBackend<T> {
    type Work = CooperativeWork<T>;
    type Value = T;
    type Gate = AsyncGate;

    const NAME: &'static str = "cooperative";

    fn with_capacity(capacity: usize) -> Self {
        Self {
            gate: Arc::new(AsyncGate::new(capacity)),
            _value: PhantomData,
        }
    }

    fn gate(&self) -> &AsyncGate {
        &self.gate
    }

    fn launch(
        &mut self,
        tasks: Vec<Task<Self::Work>>,
        sink: &Arc<OutcomeSink<T>>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Box<dyn TaskHandle>>> {
        let mut handles: Vec<Box<dyn TaskHandle>> = Vec::with_capacity(tasks.len());

        for task in tasks {
            let key = task.key.clone();
            let token = cancel.child_token();
            let join = tokio::spawn(run_task(
                task,
                self.gate.clone(),
                sink.clone(),
                token.clone(),
            ));

            handles.push(Box::new(CooperativeHandle {
                key,
                token,
                join,
                finished: false,
            }));
        }

        Ok(handles)
    }
}

async fn run_task<T: Send + 'static>(
    task: Task<CooperativeWork<T>>,
    gate: Arc<AsyncGate>,
    sink: Arc<OutcomeSink<T>>,
    token: CancellationToken,
) {
    let Task { key, work } = task;

    let permit = tokio::select! {
        biased;
        _ = token.cancelled() => {
            debug!(task = %key, "Cancelled before admission");
            return;
        }
        permit = gate.acquire() => permit,
    };
    debug!(task = %key, "Acquired execution slot");

    let result = tokio::select! {
        biased;
        _ = token.cancelled() => None,
        result = AssertUnwindSafe(work).catch_unwind() => Some(result),
    };

    let result = match result {
        None => {
            debug!(task = %key, "Cancelled while running");
            None
        }
        Some(Ok(result)) => Some(result.map_err(TaskFailure::from)),
        Some(Err(payload)) => Some(Err(TaskFailure::from_panic(payload))),
    };
    if let Some(result) = result {
        sink.record(&key, result, token.is_cancelled());
    }

    drop(permit);
}

struct CooperativeHandle {
    key: TaskKey,
    token: CancellationToken,
    join: JoinHandle<()>,
    finished: bool,
}

#[async_trait]
impl TaskHandle for CooperativeHandle {
    fn key(&self) -> &str {
        &self.key
    }

    fn is_finished(&self) -> bool {
        self.finished || self.join.is_finished()
    }

    fn cancel(&self) {
        self.token.cancel();
    }

    async fn join(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = (&mut self.join).await {
            error!(task = %self.key, error = %e, "Task join error");
        }
        self.finished = true;
    }

    async fn settle(&mut self, _grace: Duration) -> Settled {
        // Cancellation is observed at the next suspension point
        self.join().await;
        Settled::Drained
    }
}

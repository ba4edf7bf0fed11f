//! Preemptive backend: units of work run on a pool of OS threads.
//!
//! The pool has `min(capacity, tasks)` named workers popping jobs from a
//! shared queue. A worker claims a job (`Queued -> Claimed`), acquires the
//! [`BlockingGate`] and then starts it (`Claimed -> Running`). Cancellation
//! races those transitions: a job still queued is `Withdrawn` and no worker
//! ever touches it; a claimed job is `Cancelled` and its worker gives the
//! slot back without starting it. Either way exactly one side wins and a
//! cancelled job is never started.
//!
//! A unit of work that is already running cannot be interrupted. It receives
//! its cancellation token and may return [`Cancelled`](crate::Cancelled)
//! early; otherwise the supervisor waits at most the drain grace period and
//! then detaches it. Anything a detached job records later is discarded by
//! the sealed [`OutcomeSink`].

use std::collections::VecDeque;
use std::marker::PhantomData;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Backend, Settled, TaskHandle};
use crate::batch::{OutcomeSink, Task, TaskFailure, TaskKey};
use crate::gate::{BlockingGate, Gate};
use crate::Result;

/// Unit of work for the preemptive backend
pub type PreemptiveWork<T> =
    Box<dyn FnOnce(&CancellationToken) -> anyhow::Result<T> + Send + 'static>;

const QUEUED: u8 = 0;
const CLAIMED: u8 = 1;
const RUNNING: u8 = 2;
const FINISHED: u8 = 3;
const WITHDRAWN: u8 = 4;
const CANCELLED: u8 = 5;

/// Lifecycle of one job, shared between its worker and its handle
#[derive(Debug)]
struct JobState(AtomicU8);

impl JobState {
    fn new() -> Self {
        Self(AtomicU8::new(QUEUED))
    }

    fn transition(&self, from: u8, to: u8) -> bool {
        self.0
            .compare_exchange(from, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Worker side: take the job off the queue unless it was withdrawn
    fn claim(&self) -> bool {
        self.transition(QUEUED, CLAIMED)
    }

    /// Worker side: start the claimed job unless it was cancelled meanwhile
    fn start(&self) -> bool {
        self.transition(CLAIMED, RUNNING)
    }

    /// Supervisor side: stop the job unless a worker already started it
    fn cancel(&self) {
        if !self.transition(QUEUED, WITHDRAWN) {
            self.transition(CLAIMED, CANCELLED);
        }
    }

    fn finish(&self) {
        self.0.store(FINISHED, Ordering::Release);
    }

    fn load(&self) -> u8 {
        self.0.load(Ordering::Acquire)
    }
}

struct Job<T> {
    task: Task<PreemptiveWork<T>>,
    token: CancellationToken,
    state: Arc<JobState>,
    // Dropping the sender also signals completion
    _done: oneshot::Sender<()>,
}

/// Backend running units of work on a pool of OS threads
pub struct PreemptiveBackend<T> {
    gate: Arc<BlockingGate>,
    _value: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> Backend for PreemptiveBackend<T> {
    type Work = PreemptiveWork<T>;
    type Value = T;
    type Gate = BlockingGate;

    const NAME: &'static str = "preemptive";

    fn with_capacity(capacity: usize) -> Self {
        Self {
            gate: Arc::new(BlockingGate::new(capacity)),
            _value: PhantomData,
        }
    }

    fn gate(&self) -> &BlockingGate {
        &self.gate
    }

    fn launch(
        &mut self,
        tasks: Vec<Task<Self::Work>>,
        sink: &Arc<OutcomeSink<T>>,
        cancel: &CancellationToken,
    ) -> Result<Vec<Box<dyn TaskHandle>>> {
        let mut handles: Vec<Box<dyn TaskHandle>> = Vec::with_capacity(tasks.len());
        let mut queue = VecDeque::with_capacity(tasks.len());

        for task in tasks {
            let token = cancel.child_token();
            let state = Arc::new(JobState::new());
            let (done_tx, done_rx) = oneshot::channel();

            handles.push(Box::new(PreemptiveHandle {
                key: task.key.clone(),
                token: token.clone(),
                state: state.clone(),
                done: Some(done_rx),
                gate: self.gate.clone(),
            }));
            queue.push_back(Job {
                task,
                token,
                state,
                _done: done_tx,
            });
        }

        let workers = pool_size(self.gate.capacity(), queue.len());
        let queue = Arc::new(Mutex::new(queue));

        for index in 0..workers {
            let queue = queue.clone();
            let gate = self.gate.clone();
            let sink = sink.clone();

            let spawned = thread::Builder::new()
                .name(format!("batch-worker-{index}"))
                .spawn(move || worker_loop(queue, gate, sink));

            if let Err(e) = spawned {
                if index == 0 {
                    return Err(e.into());
                }
                warn!(workers = index, error = %e, "Worker pool started short");
                break;
            }
        }

        debug!(workers, "Worker pool started");
        Ok(handles)
    }
}

fn pool_size(capacity: usize, jobs: usize) -> usize {
    capacity.min(jobs)
}

fn worker_loop<T>(
    queue: Arc<Mutex<VecDeque<Job<T>>>>,
    gate: Arc<BlockingGate>,
    sink: Arc<OutcomeSink<T>>,
) {
    loop {
        let job = queue.lock().pop_front();
        let Some(job) = job else { break };
        if !job.state.claim() {
            debug!(task = %job.task.key, "Withdrawn before a worker picked it up");
            continue;
        }
        run_job(job, &gate, &sink);
    }
}

fn run_job<T>(job: Job<T>, gate: &Arc<BlockingGate>, sink: &OutcomeSink<T>) {
    let Job {
        task,
        token,
        state,
        _done,
    } = job;

    let Some(permit) = gate.acquire(&token) else {
        state.cancel();
        debug!(task = %task.key, "Cancelled before admission");
        return;
    };
    if token.is_cancelled() {
        state.cancel();
    }
    if !state.start() {
        debug!(task = %task.key, "Cancelled before start");
        return;
    }
    debug!(task = %task.key, "Acquired execution slot");

    let Task { key, work } = task;
    let result = match catch_unwind(AssertUnwindSafe(|| work(&token))) {
        Ok(result) => result.map_err(TaskFailure::from),
        Err(payload) => Err(TaskFailure::from_panic(payload)),
    };

    sink.record(&key, result, token.is_cancelled());
    state.finish();
    drop(permit);
}

struct PreemptiveHandle {
    key: TaskKey,
    token: CancellationToken,
    state: Arc<JobState>,
    done: Option<oneshot::Receiver<()>>,
    gate: Arc<BlockingGate>,
}

impl PreemptiveHandle {
    async fn wait_done(&mut self) {
        if let Some(done) = self.done.as_mut() {
            // An error only means the job was dropped, which is completion too
            let _ = done.await;
            self.done = None;
        }
    }
}

#[async_trait]
impl TaskHandle for PreemptiveHandle {
    fn key(&self) -> &str {
        &self.key
    }

    fn is_finished(&self) -> bool {
        self.done.is_none() || matches!(self.state.load(), FINISHED | WITHDRAWN)
    }

    fn cancel(&self) {
        self.token.cancel();
        self.state.cancel();
        self.gate.interrupt();
    }

    async fn join(&mut self) {
        self.wait_done().await;
    }

    async fn settle(&mut self, grace: Duration) -> Settled {
        match self.state.load() {
            // No worker will touch a withdrawn job
            WITHDRAWN => Settled::Drained,
            // The claiming worker may still hold a slot; it lets go without
            // running the job once the interrupted gate wait returns
            CANCELLED => {
                self.wait_done().await;
                Settled::Drained
            }
            RUNNING => match tokio::time::timeout(grace, self.wait_done()).await {
                Ok(()) => Settled::Drained,
                Err(_) => {
                    warn!(
                        task = %self.key,
                        grace_ms = grace.as_millis() as u64,
                        "Worker still running after cancellation; detaching"
                    );
                    Settled::Detached
                }
            },
            _ => {
                self.wait_done().await;
                Settled::Drained
            }
        }
    }
}

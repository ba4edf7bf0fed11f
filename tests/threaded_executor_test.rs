//! Thread-pool executor tests
//!
//! Same contract as the cooperative executor, with units of work running as
//! blocking closures on OS worker threads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use bounded_batch::batch::{BatchState, TaskFailure, ThreadedExecutor};
use bounded_batch::gate::Gate;
use bounded_batch::{BatchError, Cancelled, ExecutorConfig};
use pretty_assertions::assert_eq;

#[test]
fn test_all_tasks_succeed() {
    let mut executor = ThreadedExecutor::<u64>::new(3, Some(Duration::from_secs(30))).unwrap();
    for i in 0..8u64 {
        executor
            .register(format!("job_{}", i), move |_| Ok(i * i))
            .unwrap();
    }

    let outcome = executor.run_blocking().expect("batch should run");

    assert!(outcome.all_succeeded());
    assert!(!outcome.timed_out());
    assert_eq!(outcome.results().count(), 8);
    assert_eq!(outcome.result("job_7"), Some(&49));
}

#[test]
fn test_failures_and_panics_are_captured() {
    let mut executor = ThreadedExecutor::<u32>::new(2, None).unwrap();
    executor.register("ok", |_| Ok(1)).unwrap();
    executor
        .register("error", |_| Err(anyhow::anyhow!("connection_error: reset")))
        .unwrap();
    executor
        .register("panic", |_| -> anyhow::Result<u32> { panic!("worker exploded") })
        .unwrap();

    let outcome = executor.run_blocking().unwrap();

    assert!(!outcome.all_succeeded());
    assert_eq!(outcome.result("ok"), Some(&1));
    assert_eq!(
        outcome.failure("error").map(|f| f.to_string()),
        Some("connection_error: reset".to_string())
    );
    assert!(matches!(
        outcome.failure("panic"),
        Some(TaskFailure::Panicked(msg)) if msg == "worker exploded"
    ));
    assert_eq!(executor.gate().in_use(), 0);
}

#[test]
fn test_concurrency_limit_is_respected() {
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut executor = ThreadedExecutor::<()>::new(2, None).unwrap();
    for i in 0..10 {
        let current = current.clone();
        let peak = peak.clone();
        executor
            .register(format!("job_{}", i), move |_| {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(15));
                current.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
    }

    let outcome = executor.run_blocking().unwrap();

    assert!(outcome.all_succeeded());
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert!(executor.gate().peak() <= 2);
    assert_eq!(executor.gate().in_use(), 0);
}

#[test]
fn test_timeout_stops_waiting_for_blocking_work() {
    let mut executor = ThreadedExecutor::<()>::new(2, Some(Duration::from_millis(100))).unwrap();
    for i in 0..3 {
        executor
            .register(format!("slow_{}", i), |_| {
                thread::sleep(Duration::from_secs(1));
                Ok(())
            })
            .unwrap();
    }

    let start = Instant::now();
    let outcome = executor.run_blocking().unwrap();
    let elapsed = start.elapsed();

    // Deadline plus the default drain grace, well short of the 1s work
    assert!(elapsed < Duration::from_millis(600), "run took {:?}", elapsed);
    assert!(outcome.timed_out());
    assert!(!outcome.all_succeeded());
    assert_eq!(outcome.results().count(), 0);
    assert_eq!(outcome.failures().count(), 0);
    assert_eq!(outcome.cancelled().len(), 3);
}

#[test]
fn test_detached_workers_cannot_change_the_outcome() {
    let config = ExecutorConfig::default()
        .with_max_concurrent(1)
        .with_timeout(Duration::from_millis(50))
        .with_drain_grace(Duration::ZERO);
    let mut executor = ThreadedExecutor::<&'static str>::with_config(config).unwrap();
    executor
        .register("late", |_| {
            thread::sleep(Duration::from_millis(150));
            Ok("too late")
        })
        .unwrap();

    let outcome = executor.run_blocking().unwrap();
    assert!(outcome.timed_out());
    assert!(outcome.result("late").is_none());

    // Let the detached worker finish and try to record
    thread::sleep(Duration::from_millis(250));
    assert!(outcome.result("late").is_none());
    assert_eq!(outcome.results().count(), 0);
    assert_eq!(outcome.cancelled(), &["late".to_string()]);
}

#[test]
fn test_work_observing_cancellation_drains() {
    let mut executor = ThreadedExecutor::<()>::new(2, Some(Duration::from_millis(50))).unwrap();
    for i in 0..2 {
        executor
            .register(format!("polling_{}", i), |token| {
                while !token.is_cancelled() {
                    thread::sleep(Duration::from_millis(5));
                }
                Err(Cancelled.into())
            })
            .unwrap();
    }

    let outcome = executor.run_blocking().unwrap();

    assert!(outcome.timed_out());
    assert_eq!(outcome.failures().count(), 0);
    assert_eq!(outcome.cancelled().len(), 2);
    // Both workers observed the token within the grace period
    assert_eq!(executor.gate().in_use(), 0);
}

#[test]
fn test_cancelled_error_without_deadline_is_a_failure() {
    let mut executor = ThreadedExecutor::<u32>::new(2, None).unwrap();
    executor.register("ok", |_| Ok(1)).unwrap();
    executor
        .register("self_cancel", |_| Err(Cancelled.into()))
        .unwrap();

    let outcome = executor.run_blocking().unwrap();

    assert!(!outcome.timed_out());
    assert!(!outcome.all_succeeded());
    assert_eq!(outcome.results().count() + outcome.failures().count(), 2);
    assert!(outcome.cancelled().is_empty());
    assert!(outcome
        .failure("self_cancel")
        .is_some_and(|failure| failure.is_cancellation()));
}

#[test]
fn test_queued_tasks_never_start_after_timeout() {
    let started = Arc::new(AtomicUsize::new(0));
    let mut executor = ThreadedExecutor::<()>::new(1, Some(Duration::from_millis(50))).unwrap();
    for i in 0..4 {
        let started = started.clone();
        executor
            .register(format!("job_{}", i), move |token| {
                started.fetch_add(1, Ordering::SeqCst);
                while !token.is_cancelled() {
                    thread::sleep(Duration::from_millis(5));
                }
                Err(Cancelled.into())
            })
            .unwrap();
    }

    let outcome = executor.run_blocking().unwrap();
    thread::sleep(Duration::from_millis(50));

    assert!(outcome.timed_out());
    assert_eq!(started.load(Ordering::SeqCst), 1);
    assert_eq!(outcome.cancelled().len(), 4);
}

#[test]
fn test_slots_are_returned_when_deadline_hits_busy_pool() {
    let mut executor = ThreadedExecutor::<usize>::new(4, Some(Duration::from_millis(20))).unwrap();
    for i in 0..200usize {
        executor
            .register(format!("job_{}", i), move |_| {
                thread::sleep(Duration::from_millis(1));
                Ok(i)
            })
            .unwrap();
    }

    let outcome = executor.run_blocking().unwrap();

    // Workers claiming jobs around the deadline gave their slots back
    assert_eq!(executor.gate().in_use(), 0);
    assert!(outcome.timed_out());
    assert_eq!(outcome.failures().count(), 0);
    assert_eq!(outcome.results().count() + outcome.cancelled().len(), 200);
}

#[test]
fn test_zero_task_batch() {
    let mut executor = ThreadedExecutor::<u32>::new(4, Some(Duration::from_millis(10))).unwrap();

    let outcome = executor.run_blocking().unwrap();

    assert!(outcome.all_succeeded());
    assert!(!outcome.timed_out());
    assert_eq!(outcome.results().count(), 0);
    assert_eq!(outcome.failures().count(), 0);
}

#[test]
fn test_executor_is_one_shot() {
    let mut executor = ThreadedExecutor::<u32>::new(1, None).unwrap();
    executor.register("a", |_| Ok(1)).unwrap();

    let first = executor.run_blocking().unwrap();

    assert!(matches!(
        executor.run_blocking(),
        Err(BatchError::InvalidState { state: BatchState::Finished, .. })
    ));
    assert!(matches!(
        executor.register("b", |_| Ok(2)),
        Err(BatchError::InvalidState { .. })
    ));
    assert_eq!(first.result("a"), Some(&1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_async_run_from_runtime() {
    let mut executor = ThreadedExecutor::<usize>::new(4, Some(Duration::from_secs(5))).unwrap();
    for i in 0..6usize {
        executor
            .register(format!("job_{}", i), move |_| {
                thread::sleep(Duration::from_millis(5));
                Ok(i)
            })
            .unwrap();
    }

    let outcome = executor.run().await.unwrap();

    assert!(outcome.all_succeeded());
    assert_eq!(outcome.results().map(|(_, v)| *v).sum::<usize>(), 15);
}

#[tokio::test]
async fn test_run_blocking_inside_runtime_is_rejected() {
    let mut executor = ThreadedExecutor::<u32>::new(1, None).unwrap();
    executor.register("a", |_| Ok(1)).unwrap();

    assert!(matches!(
        executor.run_blocking(),
        Err(BatchError::InsideRuntime)
    ));
    assert_eq!(executor.state(), BatchState::Created);

    // The executor is still usable from async code
    let outcome = executor.run().await.unwrap();
    assert_eq!(outcome.result("a"), Some(&1));
}

#[test]
fn test_invalid_construction() {
    assert!(matches!(
        ThreadedExecutor::<()>::new(0, None),
        Err(BatchError::InvalidArgument(_))
    ));
    assert!(matches!(
        ThreadedExecutor::<()>::new(1, Some(Duration::ZERO)),
        Err(BatchError::InvalidArgument(_))
    ));
}

//! Batch demo: probe a list of endpoints with a bounded number of in-flight
//! checks, first as tokio tasks, then on worker threads.
//!
//! Run with `RUST_LOG=bounded_batch=debug cargo run --example batch_demo`.

use std::error::Error;
use std::thread;
use std::time::Duration;

use bounded_batch::batch::{CooperativeExecutor, ThreadedExecutor};
use bounded_batch::metrics::export_metrics;
use bounded_batch::{Cancelled, ExecutorConfig};
use rand::Rng;
use tracing_subscriber::EnvFilter;

const ENDPOINTS: &[&str] = &[
    "10.0.0.1:8080",
    "10.0.0.2:8080",
    "10.0.0.3:3128",
    "10.0.0.4:3128",
    "10.0.0.5:1080",
    "10.0.0.6:1080",
    "10.0.0.7:8888",
    "10.0.0.8:8888",
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    println!("Bounded batch demo\n");

    // Cooperative: each probe is a future
    let config = ExecutorConfig::default()
        .with_name("async-probes")
        .with_max_concurrent(3)
        .with_timeout(Duration::from_millis(400));
    let mut executor = CooperativeExecutor::<u64>::with_config(config)?
        .with_progress_callback(|done, total| println!("  progress: {}/{}", done, total));

    for endpoint in ENDPOINTS {
        let latency = rand::thread_rng().gen_range(20..300);
        let fails = rand::thread_rng().gen_bool(0.2);
        executor.register(*endpoint, async move {
            tokio::time::sleep(Duration::from_millis(latency)).await;
            if fails {
                anyhow::bail!("connection refused");
            }
            Ok(latency)
        })?;
    }

    let outcome = executor.run().await?;
    println!("\nCooperative run '{}':", outcome.name().unwrap_or("-"));
    print_summary(&outcome);

    // Preemptive: each probe is a blocking closure on a worker thread
    let mut executor = ThreadedExecutor::<u64>::with_config(
        ExecutorConfig::default()
            .with_name("threaded-probes")
            .with_max_concurrent(4)
            .with_timeout(Duration::from_millis(250)),
    )?;

    for endpoint in ENDPOINTS {
        let latency = rand::thread_rng().gen_range(20..400);
        executor.register(*endpoint, move |token| {
            let mut waited = 0;
            while waited < latency {
                if token.is_cancelled() {
                    return Err(Cancelled.into());
                }
                thread::sleep(Duration::from_millis(10));
                waited += 10;
            }
            Ok(latency)
        })?;
    }

    let outcome = executor.run().await?;
    println!("\nThreaded run '{}':", outcome.name().unwrap_or("-"));
    print_summary(&outcome);

    println!("\nMetrics:\n{}", export_metrics()?);
    Ok(())
}

fn print_summary(outcome: &bounded_batch::BatchOutcome<u64>) {
    let stats = outcome.stats();
    println!(
        "  all_succeeded={} timed_out={} elapsed={:?}",
        outcome.all_succeeded(),
        outcome.timed_out(),
        stats.elapsed
    );

    let mut results: Vec<_> = outcome.results().collect();
    results.sort();
    for (endpoint, latency) in results {
        println!("  ok        {:<16} {}ms", endpoint, latency);
    }
    for (endpoint, failure) in outcome.failures() {
        println!("  failed    {:<16} {}", endpoint, failure);
    }
    for endpoint in outcome.cancelled() {
        println!("  cancelled {}", endpoint);
    }
}

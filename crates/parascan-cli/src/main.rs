#![doc = include_str!("../README.md")]

mod driver;

use clap::Parser;
use driver::config::{CliArgs, RunConfig};
use driver::telemetry::{init_telemetry, shutdown_telemetry};
use driver::workload::{RequestOutcome, run_request};
use parascan::WorkerPool;
use std::{sync::Arc, thread::scope};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = RunConfig::try_from(args)?;

    let providers = init_telemetry()?;
    log_startup_info(&config);

    let pool = Arc::new(WorkerPool::new(config.parallel.pool_size)?);
    let outcomes = run_requests(&config, &pool);

    // Workers finish whatever the merges left queued before telemetry goes.
    pool.shutdown();
    shutdown_telemetry(providers);

    let outcomes = outcomes?;
    for outcome in &outcomes {
        print_summary(outcome, config.expected_chunks());
    }

    let broken = outcomes
        .iter()
        .filter(|o| o.audit.ordering_violations().next().is_some())
        .count();
    if broken > 0 {
        anyhow::bail!("{broken} of {} merged streams broke ordering", outcomes.len());
    }
    if let Some(failed) = outcomes.iter().find(|o| !o.is_ok()) {
        anyhow::bail!(
            "request {} did not complete: {}",
            failed.request,
            failed.truncated.as_deref().unwrap_or("missing chunks"),
        );
    }
    Ok(())
}

/// Runs every request on its own consumer thread over the shared pool.
fn run_requests(
    config: &RunConfig,
    pool: &Arc<WorkerPool>,
) -> anyhow::Result<Vec<RequestOutcome>> {
    scope(|s| {
        let handles: Vec<_> = (0..config.requests)
            .map(|request| {
                let pool = Arc::clone(pool);
                s.spawn(move || run_request(request, config, pool))
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .map_err(|_| anyhow::anyhow!("consumer thread panicked"))?
            })
            .collect()
    })
}

fn print_summary(outcome: &RequestOutcome, expected: usize) {
    let stats = &outcome.stats;
    println!(
        "request {}: {}/{} chunks from {} series in {:.2}ms | tasks {} (peak {} inflight) | \
         exclusive runs {} | pool rejections {} | peak queue {}",
        outcome.request,
        outcome.audit.chunks,
        expected,
        outcome.audit.series,
        outcome.elapsed_ms,
        stats.tasks,
        stats.peak_inflight,
        stats.exclusive_acquisitions,
        stats.pool_rejections,
        stats.peak_queue_len,
    );
    if let Some(reason) = &outcome.truncated {
        println!("  truncated: {reason}");
    }
    for violation in &outcome.audit.violations {
        println!("  {violation}");
    }
}

fn log_startup_info(_config: &RunConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!("Starting parascan with full config: {:#?}", _config);
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting parascan: {} requests of {} series over {} workers",
            _config.requests,
            _config.series,
            _config.parallel.pool_size
        );
    }
}

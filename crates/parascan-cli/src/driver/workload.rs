//! One audited merge of a synthetic request.

use crate::driver::audit::{AuditReport, StreamAudit};
use crate::driver::config::RunConfig;
use crate::driver::telemetry::{
    decrement_merges_inflight, increment_merges, increment_merges_inflight,
    increment_truncated_merges, record_merge_duration, record_merge_stats,
};
use parascan::{Coordinator, MemoryBackend, MergeStats, ScanRequest, WorkerPool};
use std::{
    sync::Arc,
    time::{Instant, SystemTime, UNIX_EPOCH},
};

/// What one request produced.
#[derive(Debug)]
pub struct RequestOutcome {
    pub request: usize,
    pub audit: AuditReport,
    pub stats: MergeStats,
    pub truncated: Option<String>,
    pub elapsed_ms: f64,
}

impl RequestOutcome {
    /// A complete stream with every guarantee held.
    pub fn is_ok(&self) -> bool {
        self.truncated.is_none() && self.audit.is_clean()
    }
}

/// Builds the synthetic backend of one request, merges it over `pool` and
/// audits the merged stream.
pub fn run_request(
    request: usize,
    config: &RunConfig,
    pool: Arc<WorkerPool>,
) -> anyhow::Result<RequestOutcome> {
    #[cfg(feature = "tracing")]
    let _span = tracing::info_span!("merge", request).entered();

    let (mut backend, series) = MemoryBackend::synthetic(config.series, config.chunks_per_series);
    if let (Some(pulls), Some(first)) = (config.fail_after, series.first()) {
        backend.fail_after(first, pulls);
    }
    if let Some(delay) = config.pull_delay {
        backend = backend.with_pull_delay(delay);
    }

    let scan = ScanRequest::new(series.iter().cloned(), now_micros()?, config.timespan)
        .with_strategy(config.strategy)
        .with_archive(config.archive);

    increment_merges();
    increment_merges_inflight();
    let start = Instant::now();

    let merged = Coordinator::new(config.parallel.clone(), pool, &backend, &scan);
    let merge = match merged {
        Ok(merge) => merge,
        Err(e) => {
            decrement_merges_inflight();
            return Err(e.into());
        }
    };

    let mut audit = StreamAudit::new(config.chunks_per_series);
    let mut truncated = None;
    for chunk in merge.chunks() {
        match chunk {
            Ok(chunk) => audit.observe(&chunk),
            Err(e) => truncated = Some(e.to_string()),
        }
    }

    let elapsed_ms = start.elapsed().as_secs_f64() * 1_000.0;
    let stats = merge.stats();
    drop(merge);
    decrement_merges_inflight();

    record_merge_duration(elapsed_ms);
    record_merge_stats(&stats);
    if truncated.is_some() {
        increment_truncated_merges();
        #[cfg(feature = "tracing")]
        tracing::warn!("Request {request} truncated: {truncated:?}");
    }

    Ok(RequestOutcome {
        request,
        audit: audit.finish(&series),
        stats,
        truncated,
        elapsed_ms,
    })
}

fn now_micros() -> anyhow::Result<i64> {
    let micros = SystemTime::now().duration_since(UNIX_EPOCH)?.as_micros();
    Ok(i64::try_from(micros)?)
}

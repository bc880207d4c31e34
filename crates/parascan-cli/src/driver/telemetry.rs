//! # Telemetry Features
//!
//! Logs always go to the console through `tracing_subscriber::fmt`. Spans and
//! metrics can additionally be exported through OpenTelemetry.
//!
//! ## Feature matrix
//!
//! - `tracing`: Enables OpenTelemetry tracing. Each merge runs in a `merge`
//!   span and each scan task in a `scan_task` span.
//! - `metrics`: Enables OpenTelemetry metrics (merges, chunks, permit
//!   upgrades, pool rejections, merge duration).
//! - `stdout`: Enables the stdout exporter.
//!
//! ## Feature constraints
//!
//! - The `stdout` exporter requires at least one of `tracing` or `metrics`.
//!
//! ## Example usage
//!
//! ```bash
//! RUST_LOG=debug cargo run -p parascan-cli --features tracing,metrics,stdout -- --requests 4
//! ```

// Disallow using `stdout` without `tracing` or `metrics`
#[cfg(all(feature = "stdout", not(any(feature = "tracing", feature = "metrics"))))]
compile_error!(
    "The 'stdout' feature requires at least one of 'tracing' or 'metrics' to be enabled."
);

// Core imports - always needed
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

// Metrics-specific imports
#[cfg(feature = "metrics")]
use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};
#[cfg(feature = "metrics")]
use opentelemetry_sdk::metrics as sdkmetrics;
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

// Either
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry::{InstrumentationScope, KeyValue};
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_sdk::Resource;
#[cfg(any(feature = "metrics", feature = "tracing"))]
use opentelemetry_semantic_conventions as semvcns;

// Tracing-specific imports
#[cfg(feature = "tracing")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "tracing")]
use opentelemetry_sdk::trace as sdktrace;

use parascan::MergeStats;

pub struct TelemetryProviders {
    #[cfg(feature = "tracing")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
    #[cfg(feature = "metrics")]
    pub meter_provider: sdkmetrics::SdkMeterProvider,
}

pub fn init_telemetry() -> anyhow::Result<TelemetryProviders> {
    #[cfg(feature = "tracing")]
    let tracer_provider = init_tracer()?;

    #[cfg(feature = "metrics")]
    let meter_provider = init_metrics()?;

    #[cfg(any(feature = "metrics", feature = "tracing"))]
    let scope = InstrumentationScope::builder("parascan")
        .with_version(env!("CARGO_PKG_VERSION"))
        .with_schema_url(semvcns::SCHEMA_URL)
        .build();

    // Always subscribe to standard tracing logs printed to the console via
    // `tracing_subscriber::fmt`. This is unrelated to the `opentelemetry_stdout`
    // exporter - it logs spans/events as human-readable output.
    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true)
                .pretty(),
        );

    #[cfg(feature = "tracing")]
    let registry = {
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        registry.with(
            tracing_opentelemetry::layer()
                .with_tracer(tracer_provider.tracer_with_scope(scope.clone()))
                .with_error_records_to_exceptions(true),
        )
    };

    #[cfg(feature = "metrics")]
    let registry = {
        opentelemetry::global::set_meter_provider(meter_provider.clone());
        let meter = opentelemetry::global::meter_with_scope(scope);
        init_metric_handles(meter);

        registry.with(tracing_opentelemetry::MetricsLayer::new(
            meter_provider.clone(),
        ))
    };

    registry.init();

    Ok(TelemetryProviders {
        #[cfg(feature = "tracing")]
        tracer_provider,
        #[cfg(feature = "metrics")]
        meter_provider,
    })
}

/// Flushes and shuts down the exporters. Errors are reported on stderr since
/// logging may already be gone.
pub fn shutdown_telemetry(_providers: TelemetryProviders) {
    #[cfg(feature = "tracing")]
    {
        if let Err(err) = _providers.tracer_provider.force_flush() {
            eprintln!("Error flushing traces: {:#?}", err);
        }
        if let Err(err) = _providers.tracer_provider.shutdown() {
            eprintln!("Error shutting down tracer: {:#?}", err);
        }
    }

    #[cfg(feature = "metrics")]
    {
        if let Err(err) = _providers.meter_provider.force_flush() {
            eprintln!("Error flushing metrics: {:#?}", err);
        }
        if let Err(err) = _providers.meter_provider.shutdown() {
            eprintln!("Error shutting down meter: {:#?}", err);
        }
    }
}

#[cfg(any(feature = "metrics", feature = "tracing"))]
fn resource() -> Resource {
    Resource::builder()
        .with_service_name("parascan")
        .with_schema_url(
            [KeyValue::new(
                semvcns::resource::SERVICE_VERSION,
                env!("CARGO_PKG_VERSION"),
            )],
            semvcns::SCHEMA_URL,
        )
        .build()
}

#[cfg(feature = "metrics")]
fn init_metrics() -> anyhow::Result<sdkmetrics::SdkMeterProvider> {
    let builder = sdkmetrics::SdkMeterProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::MetricExporter;
        let exporter = MetricExporter::default();
        let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(exporter)
            .with_interval(std::time::Duration::from_secs(5))
            .build();

        builder.with_reader(reader)
    };

    Ok(builder.build())
}

#[cfg(feature = "tracing")]
fn init_tracer() -> anyhow::Result<sdktrace::SdkTracerProvider> {
    let builder = sdktrace::SdkTracerProvider::builder().with_resource(resource());

    #[cfg(feature = "stdout")]
    let builder = {
        use opentelemetry_stdout::SpanExporter;
        let exporter = SpanExporter::default();
        let batch = sdktrace::BatchSpanProcessor::builder(exporter)
            .with_batch_config(
                sdktrace::BatchConfigBuilder::default()
                    .with_scheduled_delay(std::time::Duration::from_secs(5))
                    .with_max_queue_size(2048)
                    .build(),
            )
            .build();
        builder.with_span_processor(batch)
    };

    Ok(builder.build())
}

// Metric handles - only compiled when metrics feature is enabled
#[cfg(feature = "metrics")]
static MERGES: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static MERGES_INFLIGHT: OnceLock<UpDownCounter<i64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static TRUNCATED_MERGES: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static MERGE_DURATION_MS: OnceLock<Histogram<f64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static CHUNKS_MERGED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static TASKS_STARTED: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static EXCLUSIVE_ACQUISITIONS: OnceLock<Counter<u64>> = OnceLock::new();
#[cfg(feature = "metrics")]
static POOL_REJECTIONS: OnceLock<Counter<u64>> = OnceLock::new();

#[cfg(feature = "metrics")]
fn init_metric_handles(meter: Meter) {
    let _ = MERGES.set(
        meter
            .u64_counter("merges")
            .with_description("Total merges started")
            .build(),
    );

    let _ = MERGES_INFLIGHT.set(
        meter
            .i64_up_down_counter("merges_inflight")
            .with_description("Concurrent merges")
            .build(),
    );

    let _ = TRUNCATED_MERGES.set(
        meter
            .u64_counter("truncated_merges")
            .with_description("Merges that ended early")
            .build(),
    );

    let _ = MERGE_DURATION_MS.set(
        meter
            .f64_histogram("merge_duration")
            .with_unit("ms")
            .with_description("End-to-end merge duration")
            .build(),
    );

    let _ = CHUNKS_MERGED.set(
        meter
            .u64_counter("chunks_merged")
            .with_description("Decoder chunks handed to consumers")
            .build(),
    );

    let _ = TASKS_STARTED.set(
        meter
            .u64_counter("scan_tasks_started")
            .with_description("Scan tasks run on the worker pool")
            .build(),
    );

    let _ = EXCLUSIVE_ACQUISITIONS.set(
        meter
            .u64_counter("exclusive_acquisitions")
            .with_description("Times a scan task took every permit for a same-series run")
            .build(),
    );

    let _ = POOL_REJECTIONS.set(
        meter
            .u64_counter("pool_rejections")
            .with_description("Admissions refused by a saturated worker pool")
            .build(),
    );
}

// Convenience functions that compile to no-ops when metrics are disabled
#[cfg(feature = "metrics")]
pub fn increment_merges() {
    if let Some(counter) = MERGES.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_merges() {}

#[cfg(feature = "metrics")]
pub fn increment_merges_inflight() {
    if let Some(counter) = MERGES_INFLIGHT.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_merges_inflight() {}

#[cfg(feature = "metrics")]
pub fn decrement_merges_inflight() {
    if let Some(counter) = MERGES_INFLIGHT.get() {
        counter.add(-1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn decrement_merges_inflight() {}

#[cfg(feature = "metrics")]
pub fn increment_truncated_merges() {
    if let Some(counter) = TRUNCATED_MERGES.get() {
        counter.add(1, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn increment_truncated_merges() {}

#[cfg(feature = "metrics")]
pub fn record_merge_duration(duration_ms: f64) {
    if let Some(histogram) = MERGE_DURATION_MS.get() {
        histogram.record(duration_ms, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_merge_duration(_duration_ms: f64) {}

/// Adds the counters of one finished merge.
#[cfg(feature = "metrics")]
pub fn record_merge_stats(stats: &MergeStats) {
    if let Some(counter) = CHUNKS_MERGED.get() {
        counter.add(stats.chunks_emitted, &[]);
    }
    if let Some(counter) = TASKS_STARTED.get() {
        counter.add(stats.tasks_started, &[]);
    }
    if let Some(counter) = EXCLUSIVE_ACQUISITIONS.get() {
        counter.add(stats.exclusive_acquisitions, &[]);
    }
    if let Some(counter) = POOL_REJECTIONS.get() {
        counter.add(stats.pool_rejections, &[]);
    }
}

#[cfg(not(feature = "metrics"))]
pub fn record_merge_stats(_stats: &MergeStats) {}

use crate::{
    Coordinator, DecoderChunk, Error, MemoryBackend, ParallelConfig, ScanRequest, SeriesId,
    WorkerPool,
};
use core::time::Duration;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::{self, scope};
use std::time::Instant;

fn pool(size: usize) -> Arc<WorkerPool> {
    Arc::new(WorkerPool::new(size).unwrap())
}

fn open(
    config: ParallelConfig,
    pool_size: usize,
    backend: &MemoryBackend,
    request: &ScanRequest,
) -> Coordinator {
    Coordinator::new(config, pool(pool_size), backend, request).unwrap()
}

fn payload(chunk: &DecoderChunk) -> String {
    String::from_utf8(chunk.payload().to_vec()).unwrap()
}

fn collect(merge: &Coordinator) -> Vec<DecoderChunk> {
    let mut out = Vec::new();
    while merge.has_next() {
        out.push(merge.next().unwrap());
    }
    out
}

/// Panics if a series reappears after another series interrupted it.
fn assert_contiguous(chunks: &[DecoderChunk]) {
    let mut finished: HashSet<&SeriesId> = HashSet::new();
    let mut current: Option<&SeriesId> = None;
    for chunk in chunks {
        let series = chunk.series().as_ref();
        if current == Some(series) {
            continue;
        }
        assert!(
            finished.insert(series),
            "chunks of {series} are not contiguous"
        );
        current = Some(series);
    }
}

#[test]
fn small_request_becomes_a_single_task() {
    let (backend, series) = MemoryBackend::synthetic(4, 1);
    let request = ScanRequest::new(series, 0, 0);
    let merge = open(ParallelConfig::new(4, 4), 4, &backend, &request);

    assert_eq!(merge.task_count(), 1);
    assert_eq!(merge.pending(), 1);
    assert_eq!(backend.ledger().opened(), 1);
}

#[test]
fn task_count_follows_the_chunk_size() {
    let (backend, series) = MemoryBackend::synthetic(40, 1);
    let request = ScanRequest::new(series, 0, 0);
    let merge = open(ParallelConfig::new(4, 4), 4, &backend, &request);
    assert_eq!(merge.task_count(), 10);
    assert!(merge.task_sizes().iter().all(|&n| n == 4));

    let (backend, series) = MemoryBackend::synthetic(10, 1);
    let request = ScanRequest::new(series, 0, 0);
    let merge = open(ParallelConfig::new(4, 4), 4, &backend, &request);
    let mut sizes = merge.task_sizes();
    sizes.sort_unstable();
    assert_eq!(sizes, vec![2, 4, 4]);
}

#[test]
fn rejects_disabled_config_and_mismatched_pool() {
    let (backend, series) = MemoryBackend::synthetic(4, 1);
    let request = ScanRequest::new(series, 0, 0);

    let result = Coordinator::new(ParallelConfig::default(), pool(2), &backend, &request);
    assert_eq!(result.err(), Some(Error::ParallelDisabled));

    let result = Coordinator::new(ParallelConfig::new(2, 4), pool(2), &backend, &request);
    assert_eq!(
        result.err(),
        Some(Error::PoolMismatch {
            expected: 4,
            actual: 2
        })
    );
    assert_eq!(backend.ledger().opened(), 0);
}

#[test]
fn empty_request_ends_immediately() {
    let backend = MemoryBackend::new();
    let request = ScanRequest::new(Vec::new(), 0, 0);
    let merge = open(ParallelConfig::new(2, 2), 2, &backend, &request);

    assert_eq!(merge.task_count(), 0);
    assert!(!merge.has_next());
    assert!(merge.next().is_none());
    assert_eq!(merge.chunks().count(), 0);
}

#[test]
fn merge_is_complete_and_keeps_series_contiguous() {
    let (backend, series) = MemoryBackend::synthetic(64, 5);
    let expected: HashSet<String> = series
        .iter()
        .flat_map(|id| (0..5).map(move |n| format!("{id}#{n}")))
        .collect();

    let config = ParallelConfig::new(3, 4).with_min_series_per_task(2);
    let request = ScanRequest::new(series, 0, 0);
    let merge = open(config, 4, &backend, &request);
    let chunks = collect(&merge);

    assert_eq!(chunks.len(), expected.len());
    let seen: HashSet<String> = chunks.iter().map(payload).collect();
    assert_eq!(seen, expected);
    assert_contiguous(&chunks);

    // Within a series, chunks keep the order of their source.
    let mut next_index: HashMap<&SeriesId, usize> = HashMap::new();
    for chunk in &chunks {
        let n = next_index.entry(chunk.series().as_ref()).or_default();
        assert!(payload(chunk).ends_with(&format!("#{n}")));
        *n += 1;
    }

    assert!(!merge.failed());
    assert_eq!(merge.pending(), 0);
    assert_eq!(merge.inflight(), 0);
    assert_eq!(merge.completed(), merge.task_count());
    assert_eq!(backend.ledger().closed(), merge.task_count());
    assert_eq!(merge.stats().chunks_emitted, chunks.len() as u64);
}

#[test]
fn run_of_one_series_is_not_split_by_other_tasks() {
    let a = SeriesId::new("a");
    let b = SeriesId::new("b");
    let mut backend = MemoryBackend::new().with_pull_delay(Duration::from_micros(200));
    backend.insert(a.clone(), ["a0", "a1", "a2"]);
    backend.insert(b.clone(), ["b0"]);

    let mut series = vec![a.clone(), b.clone()];
    for i in 0..30 {
        let id = SeriesId::new("noise").with_label("id", i.to_string());
        backend.insert(id.clone(), [format!("n{i}")]);
        series.push(id);
    }

    // Two series per task, so `a` and `b` share a source.
    let config = ParallelConfig::new(4, 4).with_min_series_per_task(2);
    for _ in 0..10 {
        let request = ScanRequest::new(series.clone(), 0, 0);
        let merge = open(config.clone(), 4, &backend, &request);
        let out: Vec<String> = collect(&merge).iter().map(payload).collect();

        let start = out.iter().position(|p| p == "a0").unwrap();
        assert_eq!(&out[start..start + 3], ["a0", "a1", "a2"]);
        let b_at = out.iter().position(|p| p == "b0").unwrap();
        assert!(b_at > start + 2);
        assert_eq!(out.len(), 34);
    }
}

#[test]
fn failing_source_truncates_without_hanging() {
    let (mut backend, series) = MemoryBackend::synthetic(16, 4);
    // Fails on its second pull.
    backend.fail_after(&series[5], 1);

    let request = ScanRequest::new(series, 0, 0);
    let merge = open(ParallelConfig::new(2, 4), 4, &backend, &request);

    let items: Vec<_> = merge.chunks().collect();
    let last = items.last().unwrap();
    assert!(matches!(last, Err(Error::Truncated { reason }) if reason.contains("injected")));
    assert!(items[..items.len() - 1].iter().all(Result::is_ok));
    assert!(items.len() - 1 < 64);

    assert!(merge.failed());
    assert!(!merge.has_next());
    assert_eq!(merge.inflight(), 0);
    assert_eq!(merge.pending(), 0);
    assert_eq!(backend.ledger().closed(), backend.ledger().opened());
}

#[test]
fn failure_is_silent_through_has_next() {
    let (mut backend, series) = MemoryBackend::synthetic(4, 4);
    backend.fail_after(&series[0], 1);

    let request = ScanRequest::new(series, 0, 0);
    let merge = open(ParallelConfig::new(1, 1), 1, &backend, &request);

    // The plain contract reports a clean end; only the flag tells.
    let chunks = collect(&merge);
    assert!(chunks.len() <= 1);
    assert!(merge.failed());
    assert!(merge.failure().unwrap().contains("injected failure"));
}

#[test]
fn running_tasks_never_exceed_the_inflight_ceiling() {
    let (backend, series) = MemoryBackend::synthetic(64, 3);
    let backend = backend.with_pull_delay(Duration::from_micros(100));

    let config = ParallelConfig::new(2, 8).with_min_series_per_task(2);
    let request = ScanRequest::new(series, 0, 0);
    let merge = open(config, 8, &backend, &request);
    assert_eq!(collect(&merge).len(), 192);

    let stats = merge.stats();
    assert!(stats.peak_inflight >= 1);
    assert!(stats.peak_inflight <= 2);
    assert_eq!(stats.tasks_started, stats.tasks);
}

#[test]
fn slow_consumer_never_overfills_the_queue() {
    let (backend, series) = MemoryBackend::synthetic(32, 8);
    let config = ParallelConfig::new(2, 4).with_min_series_per_task(2);
    let request = ScanRequest::new(series, 0, 0);
    let merge = open(config, 4, &backend, &request);
    assert_eq!(merge.queue_capacity(), 8);

    let mut count = 0;
    while merge.has_next() {
        merge.next().unwrap();
        count += 1;
        if count % 16 == 0 {
            thread::sleep(Duration::from_millis(2));
        }
    }

    assert_eq!(count, 256);
    let stats = merge.stats();
    assert!(stats.peak_queue_len <= 8);
    assert!(stats.peak_queue_len > 0);
}

#[test]
fn close_releases_blocked_producers() {
    let (backend, series) = MemoryBackend::synthetic(16, 32);
    let request = ScanRequest::new(series, 0, 0);
    let merge = open(ParallelConfig::new(1, 2), 2, &backend, &request);

    // Admit a task and let it fill the queue without consuming.
    assert!(merge.has_next());
    let deadline = Instant::now() + Duration::from_secs(10);
    while merge.stats().peak_queue_len < merge.queue_capacity() as u64 {
        assert!(Instant::now() < deadline);
        thread::sleep(Duration::from_millis(1));
    }

    merge.close();
    while merge.inflight() > 0 {
        assert!(Instant::now() < deadline, "producer still blocked");
        thread::sleep(Duration::from_millis(1));
    }

    assert!(!merge.has_next());
    assert_eq!(merge.pending(), 0);
    assert_eq!(merge.completed(), merge.task_count());
    assert_eq!(backend.ledger().closed(), backend.ledger().opened());
    assert!(!merge.failed());
}

#[test]
fn close_releases_a_blocked_consumer() {
    let (backend, series) = MemoryBackend::synthetic(1, 2);
    let backend = backend.with_pull_delay(Duration::from_millis(300));
    let request = ScanRequest::new(series, 0, 0);
    let merge = open(ParallelConfig::new(1, 1), 1, &backend, &request);

    scope(|s| {
        let consumer = s.spawn(|| {
            let started = Instant::now();
            (merge.next(), started.elapsed())
        });
        thread::sleep(Duration::from_millis(20));
        merge.close();

        let (chunk, waited) = consumer.join().unwrap();
        assert!(chunk.is_none());
        assert!(waited < Duration::from_millis(250));
    });
}

#[test]
fn closing_before_consuming_truncates() {
    let (backend, series) = MemoryBackend::synthetic(12, 2);
    let request = ScanRequest::new(series, 0, 0);
    let merge = open(ParallelConfig::new(2, 2), 2, &backend, &request);

    merge.close();
    merge.close();

    assert_eq!(backend.ledger().closed(), 3);
    assert_eq!(merge.completed(), 3);
    let items: Vec<_> = merge.chunks().collect();
    assert!(matches!(items.as_slice(), [Err(Error::Truncated { .. })]));
}

#[test]
fn shut_down_pool_fails_the_merge() {
    let (backend, series) = MemoryBackend::synthetic(8, 2);
    let request = ScanRequest::new(series, 0, 0);
    let pool = pool(2);
    let merge =
        Coordinator::new(ParallelConfig::new(2, 2), Arc::clone(&pool), &backend, &request)
            .unwrap();

    pool.shutdown();
    assert!(!merge.has_next());
    assert!(merge.failed());
    assert_eq!(merge.failure(), Some("worker pool is shut down"));
    assert_eq!(backend.ledger().closed(), backend.ledger().opened());
}

#[test]
fn closing_a_drained_merge_is_not_a_truncation() {
    let (backend, series) = MemoryBackend::synthetic(8, 2);
    let request = ScanRequest::new(series, 0, 0);
    let merge = open(ParallelConfig::new(2, 2), 2, &backend, &request);

    let items: Vec<_> = merge.chunks().collect();
    assert_eq!(items.len(), 16);
    assert!(items.iter().all(Result::is_ok));

    merge.close();
    assert!(merge.is_closed());
    assert!(!merge.failed());
    assert_eq!(merge.chunks().count(), 0);
}

#[test]
fn small_pool_bounds_running_tasks_below_the_ceiling() {
    let (backend, series) = MemoryBackend::synthetic(64, 3);
    let backend = backend.with_pull_delay(Duration::from_micros(100));

    let config = ParallelConfig::new(8, 2).with_min_series_per_task(2);
    let request = ScanRequest::new(series, 0, 0);
    let merge = open(config, 2, &backend, &request);
    assert_eq!(collect(&merge).len(), 192);

    let stats = merge.stats();
    assert!(stats.peak_inflight >= 1);
    assert!(stats.peak_inflight <= 2);
    assert_eq!(stats.tasks_started, stats.tasks);
}

use crate::{DecoderChunk, DecoderSource, Error, Result, ScanRequest, SeriesId, SourceFactory};
use bytes::Bytes;
use core::sync::atomic::{AtomicUsize, Ordering};
use core::time::Duration;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Counts what the sources of one [`MemoryBackend`] did.
#[derive(Debug, Default)]
pub struct SourceLedger {
    opened: AtomicUsize,
    closed: AtomicUsize,
    pulled: AtomicUsize,
}

impl SourceLedger {
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Chunks handed out across all sources.
    pub fn pulled(&self) -> usize {
        self.pulled.load(Ordering::SeqCst)
    }
}

/// A [`SourceFactory`] over series held in memory.
///
/// Each source emits, for every series of its subset in order, all chunks of
/// that series back to back. Time bounds and strategy are ignored. Failures
/// and per-pull latency can be injected to exercise the merge engine.
///
/// # Example
/// ```
/// use parascan::{DecoderSource, MemoryBackend, ScanRequest, SourceFactory};
///
/// let (backend, series) = MemoryBackend::synthetic(3, 2);
/// let request = ScanRequest::new(series, 0, 0);
///
/// let mut source = backend.open(&request, &request.series).unwrap();
/// let mut pulled = 0;
/// while source.has_next().unwrap() {
///     source.next().unwrap();
///     pulled += 1;
/// }
/// source.close().unwrap();
/// assert_eq!(pulled, 6);
/// assert_eq!(backend.ledger().closed(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MemoryBackend {
    series: HashMap<SeriesId, Vec<Bytes>>,
    failures: HashMap<SeriesId, usize>,
    pull_delay: Option<Duration>,
    ledger: Arc<SourceLedger>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a backend with `series` identities of `chunks_per_series`
    /// chunks each, and returns the identities in creation order.
    ///
    /// Payloads are `"<series>#<n>"`, so a consumer can check both
    /// membership and per-series order.
    pub fn synthetic(series: usize, chunks_per_series: usize) -> (Self, Vec<SeriesId>) {
        let mut backend = Self::new();
        let ids: Vec<_> = (0..series)
            .map(|i| {
                SeriesId::new(format!("metric.{}", i % 4))
                    .with_label("id", i.to_string())
                    .with_label("dc", if i % 2 == 0 { "eu" } else { "us" })
            })
            .collect();
        for id in &ids {
            let payloads: Vec<_> = (0..chunks_per_series)
                .map(|n| Bytes::from(format!("{id}#{n}")))
                .collect();
            backend.insert(id.clone(), payloads);
        }
        (backend, ids)
    }

    /// Stores the chunks of one series, replacing any previous ones.
    pub fn insert<P>(&mut self, series: SeriesId, chunks: impl IntoIterator<Item = P>)
    where
        P: Into<Bytes>,
    {
        self.series
            .insert(series, chunks.into_iter().map(Into::into).collect());
    }

    /// Makes the source that serves `series` fail once it has handed out
    /// `pulls` chunks.
    pub fn fail_after(&mut self, series: &SeriesId, pulls: usize) {
        self.failures.insert(series.clone(), pulls);
    }

    /// Sleeps for `delay` on every pull.
    #[must_use]
    pub fn with_pull_delay(mut self, delay: Duration) -> Self {
        self.pull_delay = Some(delay);
        self
    }

    /// Number of chunks stored for `series`.
    pub fn chunk_count(&self, series: &SeriesId) -> usize {
        self.series.get(series).map_or(0, Vec::len)
    }

    pub fn ledger(&self) -> Arc<SourceLedger> {
        Arc::clone(&self.ledger)
    }
}

impl SourceFactory for MemoryBackend {
    fn open(
        &self,
        _request: &ScanRequest,
        series: &[Arc<SeriesId>],
    ) -> Result<Box<dyn DecoderSource>> {
        let mut chunks = VecDeque::new();
        let mut fail_after: Option<usize> = None;

        for id in series {
            if let Some(payloads) = self.series.get(id.as_ref()) {
                chunks.extend(
                    payloads
                        .iter()
                        .map(|payload| DecoderChunk::new(Arc::clone(id), payload.clone())),
                );
            }
            if let Some(&pulls) = self.failures.get(id.as_ref()) {
                fail_after = Some(fail_after.map_or(pulls, |current| current.min(pulls)));
            }
        }

        self.ledger.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySource {
            chunks,
            fail_after,
            pulled: 0,
            closed: false,
            pull_delay: self.pull_delay,
            ledger: Arc::clone(&self.ledger),
        }))
    }
}

/// A [`DecoderSource`] replaying a fixed list of chunks.
#[derive(Debug)]
pub struct MemorySource {
    chunks: VecDeque<DecoderChunk>,
    fail_after: Option<usize>,
    pulled: usize,
    closed: bool,
    pull_delay: Option<Duration>,
    ledger: Arc<SourceLedger>,
}

impl MemorySource {
    pub fn new(chunks: impl IntoIterator<Item = DecoderChunk>) -> Self {
        let ledger = Arc::new(SourceLedger::default());
        ledger.opened.fetch_add(1, Ordering::SeqCst);
        Self {
            chunks: chunks.into_iter().collect(),
            fail_after: None,
            pulled: 0,
            closed: false,
            pull_delay: None,
            ledger,
        }
    }

    /// Fails the pull after `pulls` successful ones.
    #[must_use]
    pub fn failing_after(mut self, pulls: usize) -> Self {
        self.fail_after = Some(pulls);
        self
    }

    pub fn ledger(&self) -> Arc<SourceLedger> {
        Arc::clone(&self.ledger)
    }

    fn failure_due(&self) -> bool {
        self.fail_after.is_some_and(|pulls| self.pulled >= pulls)
    }
}

impl DecoderSource for MemorySource {
    fn has_next(&mut self) -> Result<bool> {
        Ok(!self.closed && (self.failure_due() || !self.chunks.is_empty()))
    }

    fn next(&mut self) -> Result<DecoderChunk> {
        if self.closed {
            return Err(Error::Protocol("next called on a closed source".to_string()));
        }
        if self.failure_due() {
            return Err(Error::Source(format!(
                "injected failure after {} pulls",
                self.pulled
            )));
        }
        let chunk = self
            .chunks
            .pop_front()
            .ok_or_else(|| Error::Protocol("next called on an exhausted source".to_string()))?;

        self.pulled += 1;
        self.ledger.pulled.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.pull_delay {
            std::thread::sleep(delay);
        }
        Ok(chunk)
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.chunks.clear();
            self.ledger.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(series: &Arc<SeriesId>, payload: &'static str) -> DecoderChunk {
        DecoderChunk::new(Arc::clone(series), payload.as_bytes())
    }

    #[test]
    fn replays_in_order_and_closes_once() {
        let a = Arc::new(SeriesId::new("a"));
        let mut source = MemorySource::new([chunk(&a, "1"), chunk(&a, "2")]);
        let ledger = source.ledger();

        assert_eq!(source.next().unwrap().payload().as_ref(), b"1");
        assert_eq!(source.next().unwrap().payload().as_ref(), b"2");
        assert!(!source.has_next().unwrap());
        assert!(matches!(source.next(), Err(Error::Protocol(_))));

        source.close().unwrap();
        source.close().unwrap();
        assert_eq!(ledger.closed(), 1);
        assert_eq!(ledger.pulled(), 2);
    }

    #[test]
    fn injected_failure_fires_on_the_configured_pull() {
        let a = Arc::new(SeriesId::new("a"));
        let mut source = MemorySource::new([chunk(&a, "1"), chunk(&a, "2"), chunk(&a, "3")])
            .failing_after(1);

        assert!(source.next().is_ok());
        assert!(source.has_next().unwrap());
        assert!(matches!(source.next(), Err(Error::Source(_))));
    }

    #[test]
    fn backend_groups_chunks_by_series() {
        let (backend, ids) = MemoryBackend::synthetic(3, 2);
        let request = ScanRequest::new(ids.clone(), 0, 0);
        let subset = [
            Arc::clone(&request.series[2]),
            Arc::clone(&request.series[0]),
        ];

        let mut source = backend.open(&request, &subset).unwrap();
        let mut seen = Vec::new();
        while source.has_next().unwrap() {
            let chunk = source.next().unwrap();
            seen.push(String::from_utf8(chunk.payload().to_vec()).unwrap());
        }

        assert_eq!(
            seen,
            vec![
                format!("{}#0", ids[2]),
                format!("{}#1", ids[2]),
                format!("{}#0", ids[0]),
                format!("{}#1", ids[0]),
            ]
        );
        assert_eq!(backend.chunk_count(&ids[1]), 2);
        assert_eq!(backend.ledger().opened(), 1);
    }

    #[test]
    fn backend_failure_applies_to_the_source_holding_the_series() {
        let (mut backend, ids) = MemoryBackend::synthetic(4, 3);
        backend.fail_after(&ids[3], 2);
        let request = ScanRequest::new(ids, 0, 0);

        let mut healthy = backend.open(&request, &request.series[..2]).unwrap();
        while healthy.has_next().unwrap() {
            healthy.next().unwrap();
        }

        let mut failing = backend.open(&request, &request.series[2..]).unwrap();
        failing.next().unwrap();
        failing.next().unwrap();
        assert!(matches!(failing.next(), Err(Error::Source(_))));
    }
}

use parascan::{
    Coordinator, DecoderChunk, DecoderSource, Error, MemoryBackend, ParallelConfig, Result,
    ScanRequest, ScanStrategy, SeriesId, SourceFactory, WorkerPool,
};
use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    thread::scope,
};

fn payloads(merge: &Coordinator) -> Vec<String> {
    merge
        .chunks()
        .map(|chunk| String::from_utf8(chunk.unwrap().payload().to_vec()).unwrap())
        .collect()
}

#[test]
fn concurrent_merges_share_one_pool() {
    const REQUESTS: usize = 6;

    let config = ParallelConfig::new(2, 4).with_min_series_per_task(2);
    let pool = Arc::new(WorkerPool::new(4).unwrap());

    scope(|s| {
        let handles: Vec<_> = (0..REQUESTS)
            .map(|r| {
                let config = config.clone();
                let pool = Arc::clone(&pool);
                s.spawn(move || {
                    let (backend, series) = MemoryBackend::synthetic(24 + r, 3);
                    let request = ScanRequest::new(series, 0, 0);
                    let merge = Coordinator::new(config, pool, &backend, &request).unwrap();
                    (payloads(&merge).len(), (24 + r) * 3)
                })
            })
            .collect();

        for handle in handles {
            let (got, expected) = handle.join().unwrap();
            assert_eq!(got, expected);
        }
    });

    assert_eq!(pool.queued(), 0);
}

/// Records the request context of every source it opens.
struct RecordingFactory {
    opened: Mutex<Vec<(ScanStrategy, bool, Option<String>, usize)>>,
    fail_on_open: Option<usize>,
    closed: Arc<AtomicUsize>,
}

struct CountdownSource {
    series: Vec<Arc<SeriesId>>,
    next: usize,
    closed: Arc<AtomicUsize>,
    is_closed: bool,
}

impl DecoderSource for CountdownSource {
    fn has_next(&mut self) -> Result<bool> {
        Ok(!self.is_closed && self.next < self.series.len() * 2)
    }

    fn next(&mut self) -> Result<DecoderChunk> {
        let series = self
            .series
            .get(self.next / 2)
            .ok_or_else(|| Error::Protocol("exhausted".to_string()))?;
        let chunk = DecoderChunk::new(Arc::clone(series), format!("{series}/{}", self.next % 2));
        self.next += 1;
        Ok(chunk)
    }

    fn close(&mut self) -> Result<()> {
        if !self.is_closed {
            self.is_closed = true;
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl SourceFactory for RecordingFactory {
    fn open(
        &self,
        request: &ScanRequest,
        series: &[Arc<SeriesId>],
    ) -> Result<Box<dyn DecoderSource>> {
        let mut opened = self.opened.lock().unwrap();
        if Some(opened.len()) == self.fail_on_open {
            return Err(Error::Source("backend unreachable".to_string()));
        }
        opened.push((
            request.strategy,
            request.archive,
            request.token.clone(),
            series.len(),
        ));
        Ok(Box::new(CountdownSource {
            series: series.to_vec(),
            next: 0,
            closed: Arc::clone(&self.closed),
            is_closed: false,
        }))
    }
}

fn request(n: usize) -> ScanRequest {
    ScanRequest::new(
        (0..n).map(|i| SeriesId::new("disk.io").with_label("dev", format!("sd{i}"))),
        1_700_000_000_000_000,
        -10,
    )
}

#[test]
fn custom_sources_receive_the_request_context() {
    let factory = RecordingFactory {
        opened: Mutex::new(Vec::new()),
        fail_on_open: None,
        closed: Arc::new(AtomicUsize::new(0)),
    };
    let request = request(9)
        .with_strategy(ScanStrategy::MultiScan)
        .with_archive(true)
        .with_token("read-token");

    let config = ParallelConfig::new(2, 2);
    let pool = Arc::new(WorkerPool::new(2).unwrap());
    let merge = Coordinator::new(config, pool, &factory, &request).unwrap();
    let out = payloads(&merge);

    assert_eq!(out.len(), 18);
    let mut per_series: HashMap<&str, Vec<&str>> = HashMap::new();
    for p in &out {
        let (series, n) = p.rsplit_once('/').unwrap();
        per_series.entry(series).or_default().push(n);
    }
    assert!(per_series.values().all(|ns| ns == &["0", "1"]));

    let opened = factory.opened.lock().unwrap();
    assert_eq!(opened.len(), 3);
    for (strategy, archive, token, _) in opened.iter() {
        assert_eq!(*strategy, ScanStrategy::MultiScan);
        assert!(*archive);
        assert_eq!(token.as_deref(), Some("read-token"));
    }
    let sizes: HashSet<usize> = opened.iter().map(|o| o.3).collect();
    assert_eq!(sizes, HashSet::from([4, 1]));
    assert_eq!(factory.closed.load(Ordering::SeqCst), 3);
}

#[test]
fn failed_open_closes_the_sources_already_opened() {
    let factory = RecordingFactory {
        opened: Mutex::new(Vec::new()),
        fail_on_open: Some(2),
        closed: Arc::new(AtomicUsize::new(0)),
    };
    let pool = Arc::new(WorkerPool::new(2).unwrap());

    let err = Coordinator::new(ParallelConfig::new(2, 2), pool, &factory, &request(12))
        .unwrap_err();

    assert_eq!(err, Error::Source("backend unreachable".to_string()));
    assert_eq!(factory.opened.lock().unwrap().len(), 2);
    assert_eq!(factory.closed.load(Ordering::SeqCst), 2);
}

#[test]
fn factory_can_be_shared_behind_an_arc() {
    let (backend, series) = MemoryBackend::synthetic(8, 2);
    let backend = Arc::new(backend);
    let request = ScanRequest::new(series, 0, 0);
    let pool = Arc::new(WorkerPool::new(2).unwrap());

    let merge = Coordinator::new(ParallelConfig::new(2, 2), pool, &backend, &request).unwrap();
    assert_eq!(payloads(&merge).len(), 16);
    assert_eq!(backend.ledger().closed(), 2);
}

use portable_atomic::{AtomicU64, Ordering};

/// Point-in-time counters for one merge.
///
/// Obtained from [`Coordinator::stats`](crate::Coordinator::stats). All
/// counters only grow while the merge runs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Scan tasks the request was split into.
    pub tasks: u64,
    /// Tasks that started running on a worker.
    pub tasks_started: u64,
    /// Times a task took every permit to emit a same-series run.
    pub exclusive_acquisitions: u64,
    /// Chunks handed to the output queue.
    pub chunks_emitted: u64,
    /// Admission attempts refused because the worker pool was saturated.
    pub pool_rejections: u64,
    /// Most tasks of this merge running at once.
    pub peak_inflight: u64,
    /// Most chunks buffered in the output queue at once.
    pub peak_queue_len: u64,
}

/// Live counters behind [`MergeStats`].
#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    tasks_started: AtomicU64,
    exclusive_acquisitions: AtomicU64,
    chunks_emitted: AtomicU64,
    pool_rejections: AtomicU64,
    peak_inflight: AtomicU64,
}

impl StatsRecorder {
    pub(crate) fn task_started(&self, inflight: usize) {
        self.tasks_started.fetch_add(1, Ordering::Relaxed);
        self.peak_inflight
            .fetch_max(inflight as u64, Ordering::Relaxed);
    }

    pub(crate) fn exclusive_acquired(&self) {
        self.exclusive_acquisitions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn chunk_emitted(&self) {
        self.chunks_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn pool_rejected(&self) {
        self.pool_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, tasks: usize, peak_queue_len: usize) -> MergeStats {
        MergeStats {
            tasks: tasks as u64,
            tasks_started: self.tasks_started.load(Ordering::Relaxed),
            exclusive_acquisitions: self.exclusive_acquisitions.load(Ordering::Relaxed),
            chunks_emitted: self.chunks_emitted.load(Ordering::Relaxed),
            pool_rejections: self.pool_rejections.load(Ordering::Relaxed),
            peak_inflight: self.peak_inflight.load(Ordering::Relaxed),
            peak_queue_len: peak_queue_len as u64,
        }
    }
}

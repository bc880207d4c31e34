//! The merge coordinator.
//!
//! A [`Coordinator`] turns one [`ScanRequest`] into a single stream of
//! [`DecoderChunk`]s. At construction it splits the request's series into
//! scan tasks, opens one source per task, and shuffles the tasks so that
//! concurrent requests do not hit the backend in the same order. Tasks are
//! then admitted to the shared [`WorkerPool`] lazily, as the consumer pulls.
//!
//! The stream keeps chunks of one series contiguous whenever the source
//! produced them back to back. It does not otherwise order chunks.

mod partition;
#[cfg(test)]
mod tests;

use crate::{
    DecoderChunk, Error, Interrupt, MergeStats, ParallelConfig, Result, ScanRequest,
    SourceFactory, WorkerPool,
    task::{MergeState, ScanTask},
};
use core::{
    fmt,
    sync::atomic::{AtomicBool, Ordering},
};
use parking_lot::Mutex;
use partition::partition;
use rand::seq::SliceRandom;
use std::sync::Arc;

/// Merges the output of parallel scan tasks into one pull-based stream.
///
/// # Example
/// ```
/// use parascan::{Coordinator, MemoryBackend, ParallelConfig, ScanRequest, WorkerPool};
/// use std::sync::Arc;
///
/// let (backend, series) = MemoryBackend::synthetic(12, 3);
/// let config = ParallelConfig::new(2, 4);
/// let pool = Arc::new(WorkerPool::new(config.pool_size).unwrap());
///
/// let request = ScanRequest::new(series, 0, 0);
/// let merge = Coordinator::new(config, pool, &backend, &request).unwrap();
///
/// let mut chunks = 0;
/// while merge.has_next() {
///     merge.next().unwrap();
///     chunks += 1;
/// }
/// assert_eq!(chunks, 36);
/// assert!(!merge.failed());
/// ```
pub struct Coordinator {
    config: ParallelConfig,
    pool: Arc<WorkerPool>,
    tasks: Vec<Arc<ScanTask>>,
    /// Index of the next task to hand to the pool. The lock also serializes
    /// admission decisions.
    cursor: Mutex<usize>,
    state: Arc<MergeState>,
    closing: Interrupt,
    /// Set by [`close`](Self::close) when nothing was left to deliver.
    closed_after_drain: AtomicBool,
}

impl Coordinator {
    /// Splits `request` into scan tasks and opens their sources.
    ///
    /// # Errors
    ///
    /// - [`Error::ParallelDisabled`] or [`Error::InvalidConfig`] if `config`
    ///   cannot drive a parallel merge.
    /// - [`Error::PoolMismatch`] if `pool` is not `config.pool_size` wide.
    /// - Any error returned by `factory`. Sources opened before the failure
    ///   are closed.
    pub fn new<F>(
        config: ParallelConfig,
        pool: Arc<WorkerPool>,
        factory: &F,
        request: &ScanRequest,
    ) -> Result<Self>
    where
        F: SourceFactory + ?Sized,
    {
        config.validate()?;
        if pool.size() != config.pool_size {
            return Err(Error::PoolMismatch {
                expected: config.pool_size,
                actual: pool.size(),
            });
        }

        let per_task = config.series_per_task(request.series.len());
        let groups = partition(&request.series, per_task);
        let state = Arc::new(MergeState::new(
            config.queue_capacity(),
            config.pool_size,
            groups.len(),
        ));

        let mut tasks = Vec::with_capacity(groups.len());
        for (index, series) in groups.into_iter().enumerate() {
            let source = factory.open(request, series).inspect_err(|_e| {
                #[cfg(feature = "tracing")]
                tracing::warn!("Failed to open source for task {index}: {_e}");
            })?;
            tasks.push(Arc::new(ScanTask::new(
                index,
                series.len(),
                source,
                Arc::clone(&state),
            )));
        }
        tasks.shuffle(&mut rand::rng());

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "Split {} series into {} scan tasks of up to {per_task} ({})",
            request.series.len(),
            tasks.len(),
            request.strategy,
        );

        Ok(Self {
            config,
            pool,
            tasks,
            cursor: Mutex::new(0),
            state,
            closing: Interrupt::new(),
            closed_after_drain: AtomicBool::new(false),
        })
    }

    /// Returns `true` once a chunk is ready, `false` once the stream is
    /// over.
    ///
    /// Blocks while the queue is empty and tasks remain, admitting a task
    /// to the pool on every wake-up. The stream is over when no task is
    /// pending or running and the queue is drained, or once the coordinator
    /// is closed.
    pub fn has_next(&self) -> bool {
        loop {
            if self.closing.is_triggered() {
                return false;
            }
            if !self.state.queue.is_empty() {
                return true;
            }
            if self.state.exhausted() {
                return !self.state.queue.is_empty();
            }
            self.schedule();
            self.state.queue.wait_non_empty(self.config.poll_interval);
        }
    }

    /// Takes the next chunk, blocking until one is available.
    ///
    /// Returns `None` when the stream is exhausted or when the wait is cut
    /// short by [`close`](Self::close). A `None` after
    /// [`has_next`](Self::has_next) returned `true` means the stream was
    /// interrupted, not that it completed.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&self) -> Option<DecoderChunk> {
        loop {
            match self
                .state
                .queue
                .pop_timeout(&self.closing, self.config.poll_interval)
            {
                Ok(Some(chunk)) => return Some(chunk),
                Ok(None) if self.state.exhausted() && self.state.queue.is_empty() => return None,
                Ok(None) => self.schedule(),
                Err(_) => return None,
            }
        }
    }

    /// Iterates over the merged stream, surfacing truncation as an error.
    ///
    /// Yields every chunk as `Ok`. If the stream ended because a scan failed
    /// or the coordinator was closed, the last item is an
    /// [`Error::Truncated`].
    pub const fn chunks(&self) -> Chunks<'_> {
        Chunks {
            coordinator: self,
            finished: false,
        }
    }

    /// Cancels every task, from the last submitted one backward, and wakes
    /// anyone blocked on the merge.
    ///
    /// Tasks that were never handed to the pool have their sources closed
    /// right away. Running tasks stop at their next check or blocked wait;
    /// this call does not wait for them. Calling it again does nothing.
    pub fn close(&self) {
        let mut cursor = self.cursor.lock();
        if self.closing.is_triggered() {
            return;
        }
        let drained = self.state.exhausted() && self.state.queue.is_empty();
        self.closed_after_drain.store(drained, Ordering::SeqCst);
        self.closing.trigger();

        let submitted = *cursor;
        for (index, task) in self.tasks.iter().enumerate().rev() {
            if index >= submitted {
                task.close_unstarted();
            } else {
                task.cancel();
            }
        }
        *cursor = self.tasks.len();
        drop(cursor);

        self.state.queue.close();
        self.state.semaphore.wake_all();

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "Closed merge with {submitted} of {} tasks submitted",
            self.tasks.len()
        );
    }

    /// Admits at most one task to the pool.
    fn schedule(&self) {
        let mut cursor = self.cursor.lock();
        if self.closing.is_triggered() {
            return;
        }
        let Some(task) = self.tasks.get(*cursor) else {
            return;
        };

        let state = &*self.state;
        let ceiling = self.config.max_inflight_per_request;
        // Tasks accepted by the pool but not started yet count as admitted.
        let admitted = cursor.saturating_sub(state.completed.load(Ordering::SeqCst));
        if admitted >= ceiling
            || state.inflight.load(Ordering::SeqCst) >= ceiling
            || state.pending.load(Ordering::SeqCst) == 0
        {
            return;
        }

        let task = Arc::clone(task);
        match self.pool.try_execute(move || task.run()) {
            Ok(()) => *cursor += 1,
            Err(Error::PoolSaturated) => state.stats.pool_rejected(),
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Cannot schedule scan task: {e}");
                state.fail(e.to_string());
                for task in &self.tasks[*cursor..] {
                    task.close_unstarted();
                }
                *cursor = self.tasks.len();
                drop(cursor);
                state.queue.notify_consumers();
            }
        }
    }

    /// Number of scan tasks the request was split into.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Number of series covered by each task, in scheduling order.
    pub fn task_sizes(&self) -> Vec<usize> {
        self.tasks.iter().map(|task| task.series()).collect()
    }

    /// Tasks not started yet.
    pub fn pending(&self) -> usize {
        self.state.pending.load(Ordering::SeqCst)
    }

    /// Tasks currently running.
    pub fn inflight(&self) -> usize {
        self.state.inflight.load(Ordering::SeqCst)
    }

    /// Tasks that finished, failed or were dropped by [`close`](Self::close).
    pub fn completed(&self) -> usize {
        self.state.completed.load(Ordering::SeqCst)
    }

    /// Returns `true` if any task failed. Once set, this never resets.
    ///
    /// [`has_next`](Self::has_next) reports the end of a failed merge like
    /// any other end, so callers that need completeness must check this (or
    /// use [`chunks`](Self::chunks)).
    pub fn failed(&self) -> bool {
        self.state.failed()
    }

    /// The first failure recorded by a task, if any.
    pub fn failure(&self) -> Option<&str> {
        self.state.failure()
    }

    pub fn is_closed(&self) -> bool {
        self.closing.is_triggered()
    }

    /// Capacity of the output queue.
    pub fn queue_capacity(&self) -> usize {
        self.state.queue.capacity()
    }

    pub fn config(&self) -> &ParallelConfig {
        &self.config
    }

    pub fn stats(&self) -> MergeStats {
        self.state
            .stats
            .snapshot(self.tasks.len(), self.state.queue.peak_len())
    }

    fn truncation(&self) -> Option<Error> {
        if let Some(reason) = self.failure() {
            return Some(Error::Truncated {
                reason: reason.to_string(),
            });
        }
        if self.failed() {
            return Some(Error::Truncated {
                reason: "merge failed".to_string(),
            });
        }
        // Closing a fully drained merge loses nothing.
        if self.is_closed() && !self.closed_after_drain.load(Ordering::SeqCst) {
            return Some(Error::Truncated {
                reason: "merge closed before completion".to_string(),
            });
        }
        None
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("config", &self.config)
            .field("tasks", &self.tasks.len())
            .field("pending", &self.pending())
            .field("inflight", &self.inflight())
            .field("completed", &self.completed())
            .field("queued", &self.state.queue.len())
            .field("failed", &self.failed())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Iterator returned by [`Coordinator::chunks`].
#[derive(Debug)]
pub struct Chunks<'a> {
    coordinator: &'a Coordinator,
    finished: bool,
}

impl Iterator for Chunks<'_> {
    type Item = Result<DecoderChunk>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if self.coordinator.has_next() {
            if let Some(chunk) = self.coordinator.next() {
                return Some(Ok(chunk));
            }
            self.finished = true;
            return Some(Err(Error::Truncated {
                reason: "stream interrupted".to_string(),
            }));
        }
        self.finished = true;
        self.coordinator.truncation().map(Err)
    }
}

impl core::iter::FusedIterator for Chunks<'_> {}

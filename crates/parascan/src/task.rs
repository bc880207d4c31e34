//! Scan tasks and the state they share with their coordinator.
//!
//! A [`ScanTask`] drains one [`DecoderSource`] into the output queue of its
//! merge. Tasks write concurrently, so they negotiate access through the
//! merge's [`FairSemaphore`]:
//!
//! - A chunk followed by a chunk of another series is pushed while holding a
//!   single permit, released right after the push.
//! - A chunk followed by a chunk of the same series is pushed while holding
//!   every permit. The permits stay held for the rest of the run and are
//!   only released once its last chunk is pushed, so no other task can
//!   interleave a chunk in the middle of the run.
//!
//! The task always holds back the last chunk it pulled, since whether it
//! starts or ends a run is only known once the following chunk is seen.

use crate::{
    BoundedQueue, DecoderChunk, DecoderSource, Error, FairSemaphore, Interrupt, Interrupted,
    Permits, stats::StatsRecorder,
};
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

/// State shared by a coordinator and all of its tasks.
pub(crate) struct MergeState {
    pub(crate) queue: BoundedQueue<DecoderChunk>,
    pub(crate) semaphore: FairSemaphore,
    /// Tasks not yet started.
    pub(crate) pending: CachePadded<AtomicUsize>,
    /// Tasks currently running.
    pub(crate) inflight: CachePadded<AtomicUsize>,
    /// Tasks that finished, failed or were cancelled before starting.
    pub(crate) completed: CachePadded<AtomicUsize>,
    pub(crate) stats: StatsRecorder,
    failed: AtomicBool,
    failure: OnceLock<String>,
}

impl MergeState {
    pub(crate) fn new(queue_capacity: usize, permits: usize, tasks: usize) -> Self {
        Self {
            queue: BoundedQueue::new(queue_capacity),
            semaphore: FairSemaphore::new(permits),
            pending: CachePadded::new(AtomicUsize::new(tasks)),
            inflight: CachePadded::new(AtomicUsize::new(0)),
            completed: CachePadded::new(AtomicUsize::new(0)),
            stats: StatsRecorder::default(),
            failed: AtomicBool::new(false),
            failure: OnceLock::new(),
        }
    }

    /// Raises the error flag. Only the first reason is kept; the flag is
    /// never cleared.
    pub(crate) fn fail(&self, reason: impl Into<String>) {
        let _ = self.failure.set(reason.into());
        self.failed.store(true, Ordering::SeqCst);
    }

    pub(crate) fn failed(&self) -> bool {
        self.failed.load(Ordering::SeqCst)
    }

    pub(crate) fn failure(&self) -> Option<&str> {
        self.failure.get().map(String::as_str)
    }

    /// `true` once no task is waiting to start and none is running.
    ///
    /// `pending` is read before `inflight`: a task raises `inflight` before
    /// lowering `pending`, so this order never observes a starting task in
    /// neither counter.
    pub(crate) fn exhausted(&self) -> bool {
        self.pending.load(Ordering::SeqCst) == 0 && self.inflight.load(Ordering::SeqCst) == 0
    }
}

/// Why a task stopped before draining its source.
enum Stop {
    /// Cancelled while waiting on the queue or the semaphore.
    Interrupted,
    Failed(Error),
}

impl From<Interrupted> for Stop {
    fn from(_: Interrupted) -> Self {
        Self::Interrupted
    }
}

impl From<Error> for Stop {
    fn from(e: Error) -> Self {
        Self::Failed(e)
    }
}

/// One partition of a request, drained on a pool worker.
pub(crate) struct ScanTask {
    index: usize,
    series: usize,
    source: Mutex<Option<Box<dyn DecoderSource>>>,
    done: Interrupt,
    state: Arc<MergeState>,
}

impl ScanTask {
    pub(crate) fn new(
        index: usize,
        series: usize,
        source: Box<dyn DecoderSource>,
        state: Arc<MergeState>,
    ) -> Self {
        Self {
            index,
            series,
            source: Mutex::new(Some(source)),
            done: Interrupt::new(),
            state,
        }
    }

    /// Drains the source into the output queue. Called once, on a worker.
    pub(crate) fn run(&self) {
        let state = &*self.state;

        // Raise inflight before lowering pending, see `MergeState::exhausted`.
        let inflight = state.inflight.fetch_add(1, Ordering::SeqCst) + 1;
        state.pending.fetch_sub(1, Ordering::SeqCst);
        state.stats.task_started(inflight);

        #[cfg(feature = "tracing")]
        let _span = tracing::debug_span!(
            "scan_task",
            task = self.index,
            series = self.series
        )
        .entered();

        let source = self.source.lock().take();
        if let Some(mut source) = source {
            let mut permits = Permits::new(&state.semaphore);
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                self.drain(source.as_mut(), &mut permits)
            }));
            permits.release_all();

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(Stop::Interrupted)) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Scan task cancelled");
                }
                Ok(Err(Stop::Failed(e))) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Scan task failed: {e}");
                    state.fail(e.to_string());
                }
                Err(_) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Scan task panicked");
                    state.fail(format!("scan task {} panicked", self.index));
                }
            }

            // The task is already finished either way.
            if let Err(_e) = source.close() {
                #[cfg(feature = "tracing")]
                tracing::debug!("Ignoring error while closing source: {_e}");
            }
        }

        state.completed.fetch_add(1, Ordering::SeqCst);
        state.inflight.fetch_sub(1, Ordering::SeqCst);
        state.queue.notify_consumers();
    }

    fn drain(
        &self,
        source: &mut dyn DecoderSource,
        permits: &mut Permits<'_>,
    ) -> Result<(), Stop> {
        let state = &*self.state;
        let mut held: Option<DecoderChunk> = None;

        while !self.done.is_triggered() && !state.failed() && source.has_next()? {
            let chunk = source.next()?;
            let Some(previous) = held.take() else {
                held = Some(chunk);
                continue;
            };

            if previous.same_series(&chunk) {
                if permits.acquire_all(&self.done)? {
                    state.stats.exclusive_acquired();
                }
                self.emit(previous)?;
            } else {
                permits.acquire(1, &self.done)?;
                self.emit(previous)?;
                permits.release_all();
            }
            held = Some(chunk);
        }

        if let Some(last) = held {
            permits.acquire(1, &self.done)?;
            self.emit(last)?;
        }
        Ok(())
    }

    fn emit(&self, chunk: DecoderChunk) -> Result<(), Interrupted> {
        self.state.queue.push(chunk, &self.done)?;
        self.state.stats.chunk_emitted();
        Ok(())
    }

    /// Asks the task to stop. The caller must wake the queue and the
    /// semaphore so a blocked task notices.
    pub(crate) fn cancel(&self) {
        self.done.trigger();
    }

    /// Closes the source of a task that was never handed to the pool and
    /// accounts for it as completed.
    pub(crate) fn close_unstarted(&self) {
        self.done.trigger();
        if let Some(mut source) = self.source.lock().take() {
            let _ = source.close();
        }
        self.state.pending.fetch_sub(1, Ordering::SeqCst);
        self.state.completed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) const fn series(&self) -> usize {
        self.series
    }
}

impl Drop for ScanTask {
    fn drop(&mut self) {
        if let Some(mut source) = self.source.get_mut().take() {
            let _ = source.close();
        }
    }
}

//! Fixed-size worker pool for scan tasks.
//!
//! This module defines the [`WorkerPool`] struct, a set of OS threads that
//! execute jobs taken from a single bounded channel. The channel holds at
//! most as many jobs as there are workers. When it is full,
//! [`try_execute`](WorkerPool::try_execute) refuses the job instead of
//! blocking, so a scheduler can treat saturation as transient and retry
//! later.
//!
//! A pool is meant to be long-lived and shared, behind an [`Arc`], by every
//! [`Coordinator`](crate::Coordinator) of a process. Each coordinator bounds
//! how many of its own tasks run at once; the pool bounds the total.

use crate::{Error, Result};
use core::sync::atomic::{AtomicUsize, Ordering};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A pool of worker threads fed through one bounded job channel.
///
/// # Example
/// ```
/// use parascan::{Error, WorkerPool};
/// use std::sync::mpsc;
///
/// let pool = WorkerPool::new(2).unwrap();
/// let (tx, rx) = mpsc::channel();
/// pool.try_execute(move || tx.send(21 * 2).unwrap()).unwrap();
/// assert_eq!(rx.recv().unwrap(), 42);
///
/// pool.shutdown();
/// assert_eq!(pool.try_execute(|| ()), Err(Error::PoolShutdown));
/// ```
pub struct WorkerPool {
    size: usize,
    /// Dropped on shutdown, which disconnects the workers once they drain
    /// the channel.
    sender: Mutex<Option<Sender<Job>>>,
    jobs: Receiver<Job>,
    busy: Arc<AtomicUsize>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawns `size` worker threads named `parascan-worker-<n>`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] if `size` is zero.
    /// - [`Error::WorkerSpawn`] if a thread cannot be created. Workers that
    ///   were already started are shut down.
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::InvalidConfig {
                reason: "worker pool size must be greater than 0".to_string(),
            });
        }

        let (sender, jobs) = crossbeam_channel::bounded(size);
        let pool = Self {
            size,
            sender: Mutex::new(Some(sender)),
            jobs,
            busy: Arc::new(AtomicUsize::new(0)),
            workers: Mutex::new(Vec::with_capacity(size)),
        };

        for worker_id in 0..size {
            let jobs = pool.jobs.clone();
            let busy = Arc::clone(&pool.busy);
            let spawned = thread::Builder::new()
                .name(format!("parascan-worker-{worker_id}"))
                .spawn(move || worker_loop(worker_id, &jobs, &busy));

            match spawned {
                Ok(handle) => pool.workers.lock().push(handle),
                Err(e) => {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Failed to spawn worker {worker_id}: {e}");
                    pool.shutdown();
                    return Err(Error::WorkerSpawn(e.to_string()));
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Worker pool started with {size} workers");

        Ok(pool)
    }

    /// Number of worker threads.
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Number of workers currently running a job.
    pub fn busy(&self) -> usize {
        self.busy.load(Ordering::SeqCst)
    }

    /// Number of jobs accepted but not yet picked up by a worker.
    pub fn queued(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_shutdown(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Hands `job` to the pool without blocking.
    ///
    /// # Errors
    ///
    /// - [`Error::PoolSaturated`] if the job channel is full. Retry later.
    /// - [`Error::PoolShutdown`] if [`shutdown`](Self::shutdown) was called.
    pub fn try_execute<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(Error::PoolShutdown);
        };
        match sender.try_send(Box::new(job)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(Error::PoolSaturated),
            Err(TrySendError::Disconnected(_)) => Err(Error::PoolShutdown),
        }
    }

    /// Stops accepting jobs, lets the workers finish everything already
    /// queued, and joins them.
    ///
    /// Calling this more than once is harmless. When called from one of the
    /// pool's own workers, that worker is not joined.
    pub fn shutdown(&self) {
        // === Phase 1: Refuse new jobs ===
        #[cfg(feature = "tracing")]
        tracing::debug!("Refusing new jobs ({} queued)", self.jobs.len());
        drop(self.sender.lock().take());

        // === Phase 2: Join workers once the channel drains ===
        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                #[cfg(feature = "tracing")]
                tracing::error!("Worker thread panicked outside of a job");
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Worker pool shutdown complete");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl core::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("busy", &self.busy())
            .field("queued", &self.queued())
            .field("shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}

/// Runs jobs until the channel is disconnected and drained.
///
/// A panicking job is contained so the worker keeps serving the pool.
fn worker_loop(_worker_id: usize, jobs: &Receiver<Job>, busy: &AtomicUsize) {
    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {_worker_id} started");

    while let Ok(job) = jobs.recv() {
        busy.fetch_add(1, Ordering::SeqCst);
        if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
            #[cfg(feature = "tracing")]
            tracing::warn!("Worker {_worker_id} recovered from a panicking job");
        }
        busy.fetch_sub(1, Ordering::SeqCst);
    }

    #[cfg(feature = "tracing")]
    tracing::trace!("Worker {_worker_id} stopped");
}

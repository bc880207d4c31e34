//! Error types for the parallel merge engine.
//!
//! ## Error Cases
//! - `ParallelDisabled`: the configuration does not enable parallel scans.
//! - `InvalidConfig`: a configuration value is out of range.
//! - `PoolMismatch`: the worker pool and the configuration disagree on size.
//! - `PoolSaturated` / `PoolShutdown`: the worker pool refused a job.
//! - `WorkerSpawn`: an OS thread for the worker pool could not be started.
//! - `Source` / `Protocol`: a decoder source failed or misbehaved.
//! - `Truncated`: the merged stream ended early because a scan failed.

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All errors the merge engine can surface.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// Parallel retrieval needs both a positive inflight ceiling and a
    /// positive pool size.
    #[error("parallel scans are disabled (max inflight and pool size must be positive)")]
    ParallelDisabled,

    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The semaphore is sized from the configuration, so the pool it guards
    /// must match.
    #[error("worker pool has {actual} threads but configuration expects {expected}")]
    PoolMismatch { expected: usize, actual: usize },

    /// Transient: every worker is busy and the job channel is full.
    #[error("worker pool is saturated")]
    PoolSaturated,

    #[error("worker pool is shut down")]
    PoolShutdown,

    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(String),

    /// A decoder source failed while opening, pulling or closing.
    #[error("source error: {0}")]
    Source(String),

    /// A decoder source violated its contract (e.g. `next` after exhaustion).
    #[error("source protocol violation: {0}")]
    Protocol(String),

    /// The merged stream ended early and is missing data.
    #[error("merged stream truncated: {reason}")]
    Truncated { reason: String },
}

/// Returned by blocking primitives when the waiter's [`Interrupt`] fires.
///
/// [`Interrupt`]: crate::Interrupt
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, thiserror::Error)]
#[error("wait interrupted")]
pub struct Interrupted;

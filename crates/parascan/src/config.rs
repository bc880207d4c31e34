use crate::{Error, Result};
use core::time::Duration;

/// Default lower bound on the number of series handled by one scan task.
pub const DEFAULT_MIN_SERIES_PER_TASK: usize = 4;

/// Default divisor used to split a request into scan tasks.
pub const DEFAULT_MAX_PARALLEL_TASKS: usize = 16;

/// Default upper bound on how long [`Coordinator::has_next`] waits for a
/// chunk before retrying admission.
///
/// [`Coordinator::has_next`]: crate::Coordinator::has_next
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Each inflight task may have this many chunks buffered in the output queue.
const QUEUE_SLOTS_PER_TASK: usize = 4;

/// Tuning for parallel scans.
///
/// Parallel retrieval is only enabled when both
/// [`max_inflight_per_request`](Self::max_inflight_per_request) and
/// [`pool_size`](Self::pool_size) are positive. Both default to `0`, so a
/// default configuration is disabled and callers fall back to sequential
/// retrieval.
///
/// # Example
/// ```
/// use parascan::ParallelConfig;
///
/// let config = ParallelConfig::new(4, 8).with_min_series_per_task(2);
/// assert!(config.is_enabled());
/// assert_eq!(config.series_per_task(40), 2);
/// assert_eq!(config.queue_capacity(), 16);
///
/// assert!(!ParallelConfig::default().is_enabled());
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParallelConfig {
    /// Minimum number of series per scan task.
    pub min_series_per_task: usize,
    /// The series list is split into at most roughly this many tasks.
    pub max_parallel_tasks: usize,
    /// Ceiling on the number of tasks of one request running at once.
    pub max_inflight_per_request: usize,
    /// Number of worker threads, and permits in the coordinating semaphore.
    pub pool_size: usize,
    /// Upper bound on a single consumer wait between admission attempts.
    pub poll_interval: Duration,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            min_series_per_task: DEFAULT_MIN_SERIES_PER_TASK,
            max_parallel_tasks: DEFAULT_MAX_PARALLEL_TASKS,
            max_inflight_per_request: 0,
            pool_size: 0,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl ParallelConfig {
    /// Creates an enabled configuration (when both values are positive) with
    /// default chunking.
    pub fn new(max_inflight_per_request: usize, pool_size: usize) -> Self {
        Self {
            max_inflight_per_request,
            pool_size,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn with_min_series_per_task(mut self, min_series_per_task: usize) -> Self {
        self.min_series_per_task = min_series_per_task;
        self
    }

    #[must_use]
    pub const fn with_max_parallel_tasks(mut self, max_parallel_tasks: usize) -> Self {
        self.max_parallel_tasks = max_parallel_tasks;
        self
    }

    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Returns `true` when parallel scans may be used at all.
    pub const fn is_enabled(&self) -> bool {
        self.max_inflight_per_request > 0 && self.pool_size > 0
    }

    /// Minimum number of series per task. Requests with fewer series than
    /// this gain nothing from the parallel path.
    pub const fn min_series_per_task(&self) -> usize {
        self.min_series_per_task
    }

    /// Number of series each task covers for a request of `total` series:
    /// `max(min_series_per_task, total / max_parallel_tasks)`.
    pub const fn series_per_task(&self, total: usize) -> usize {
        let spread = match total.checked_div(self.max_parallel_tasks) {
            Some(spread) => spread,
            None => 0,
        };
        if spread > self.min_series_per_task {
            spread
        } else {
            self.min_series_per_task
        }
    }

    /// Capacity of the output queue shared by the tasks of one request.
    pub const fn queue_capacity(&self) -> usize {
        self.max_inflight_per_request
            .saturating_mul(QUEUE_SLOTS_PER_TASK)
    }

    /// Checks that the configuration can drive a coordinator.
    ///
    /// # Errors
    ///
    /// - [`Error::ParallelDisabled`] if the feature is off.
    /// - [`Error::InvalidConfig`] if a chunking bound is zero.
    pub fn validate(&self) -> Result<()> {
        if !self.is_enabled() {
            return Err(Error::ParallelDisabled);
        }
        if self.min_series_per_task == 0 {
            return Err(Error::InvalidConfig {
                reason: "min_series_per_task must be greater than 0".to_string(),
            });
        }
        if self.max_parallel_tasks == 0 {
            return Err(Error::InvalidConfig {
                reason: "max_parallel_tasks must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

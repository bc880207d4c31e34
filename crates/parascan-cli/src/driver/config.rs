use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use parascan::{ParallelConfig, ScanStrategy};

/// Runtime configuration for the `parascan` binary.
///
/// The binary replays a synthetic series set through the parallel merge
/// engine and audits every merged stream. All values are parsed from CLI
/// arguments or environment variables.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "parascan",
    version,
    about = "Runs parallel merges over synthetic series and audits the merged streams"
)]
pub struct CliArgs {
    /// Number of series identities in every request.
    ///
    /// Environment variable: `SERIES`
    #[arg(long, env = "SERIES", default_value_t = 256)]
    pub series: usize,

    /// Number of chunks each series produces, back to back.
    ///
    /// Environment variable: `CHUNKS_PER_SERIES`
    #[arg(long, env = "CHUNKS_PER_SERIES", default_value_t = 16)]
    pub chunks_per_series: usize,

    /// Number of worker threads shared by all requests. Also the number of
    /// permits each merge uses to keep series runs contiguous.
    ///
    /// Environment variable: `POOL_SIZE`
    #[arg(long, env = "POOL_SIZE", default_value_t = 8)]
    pub pool_size: usize,

    /// Most scan tasks of one request allowed to run at once. The output
    /// queue of a request holds four chunks per inflight task.
    ///
    /// Environment variable: `MAX_INFLIGHT`
    #[arg(long, env = "MAX_INFLIGHT", default_value_t = 4)]
    pub max_inflight: usize,

    /// Lower bound on the number of series handled by one scan task.
    ///
    /// Environment variable: `MIN_SERIES_PER_TASK`
    #[arg(
        long,
        env = "MIN_SERIES_PER_TASK",
        default_value_t = parascan::DEFAULT_MIN_SERIES_PER_TASK
    )]
    pub min_series_per_task: usize,

    /// A request is split into roughly this many scan tasks, unless that
    /// would make tasks smaller than `MIN_SERIES_PER_TASK`.
    ///
    /// Environment variable: `MAX_PARALLEL_TASKS`
    #[arg(
        long,
        env = "MAX_PARALLEL_TASKS",
        default_value_t = parascan::DEFAULT_MAX_PARALLEL_TASKS
    )]
    pub max_parallel_tasks: usize,

    /// Longest time, in microseconds, a consumer waits for a chunk before it
    /// retries admitting a task.
    ///
    /// Environment variable: `POLL_INTERVAL_US`
    #[arg(long, env = "POLL_INTERVAL_US", default_value_t = 1_000)]
    pub poll_interval_us: u64,

    /// Simulated backend latency per pulled chunk, in microseconds.
    ///
    /// Environment variable: `PULL_DELAY_US`
    #[arg(long, env = "PULL_DELAY_US", default_value_t = 0)]
    pub pull_delay_us: u64,

    /// Makes the source holding the first series fail after this many pulls.
    ///
    /// Environment variable: `FAIL_AFTER`
    #[arg(long, env = "FAIL_AFTER")]
    pub fail_after: Option<usize>,

    /// Scan strategy forwarded to the sources (`optimized` or `multi-scan`).
    ///
    /// Environment variable: `SCAN_STRATEGY`
    #[arg(
        long,
        env = "SCAN_STRATEGY",
        default_value_t = ScanStrategy::Optimized
    )]
    pub strategy: ScanStrategy,

    /// Read from the archive rather than live data.
    #[arg(long, default_value_t = false)]
    pub archive: bool,

    /// Time span covered back from now, forwarded to the sources.
    ///
    /// Environment variable: `TIMESPAN`
    #[arg(
        long,
        env = "TIMESPAN",
        default_value_t = 3_600_000_000,
        allow_negative_numbers = true
    )]
    pub timespan: i64,

    /// Number of requests merged concurrently over the shared pool.
    ///
    /// Environment variable: `REQUESTS`
    #[arg(long, env = "REQUESTS", default_value_t = 1)]
    pub requests: usize,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub parallel: ParallelConfig,
    pub series: usize,
    pub chunks_per_series: usize,
    pub pull_delay: Option<Duration>,
    pub fail_after: Option<usize>,
    pub strategy: ScanStrategy,
    pub archive: bool,
    pub timespan: i64,
    pub requests: usize,
}

impl RunConfig {
    /// Chunks a complete merge of one request yields.
    pub fn expected_chunks(&self) -> usize {
        self.series.saturating_mul(self.chunks_per_series)
    }
}

impl TryFrom<CliArgs> for RunConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.pool_size == 0 || args.max_inflight == 0 {
            bail!("POOL_SIZE and MAX_INFLIGHT must both be greater than 0");
        }

        if args.requests == 0 {
            bail!("REQUESTS must be greater than 0");
        }

        if args.chunks_per_series == 0 {
            bail!("CHUNKS_PER_SERIES must be greater than 0");
        }

        if args.poll_interval_us == 0 {
            bail!("POLL_INTERVAL_US must be greater than 0");
        }

        let parallel = ParallelConfig::new(args.max_inflight, args.pool_size)
            .with_min_series_per_task(args.min_series_per_task)
            .with_max_parallel_tasks(args.max_parallel_tasks)
            .with_poll_interval(Duration::from_micros(args.poll_interval_us));
        parallel.validate()?;

        Ok(Self {
            parallel,
            series: args.series,
            chunks_per_series: args.chunks_per_series,
            pull_delay: (args.pull_delay_us > 0)
                .then(|| Duration::from_micros(args.pull_delay_us)),
            fail_after: args.fail_after,
            strategy: args.strategy,
            archive: args.archive,
            timespan: args.timespan,
            requests: args.requests,
        })
    }
}

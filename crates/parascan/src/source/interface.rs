use crate::{DecoderChunk, Error, Result, SeriesId};
use core::{fmt, str::FromStr};
use std::sync::Arc;

/// An ordered, closable producer of decoder chunks for a fixed set of series.
///
/// Implementations wrap a storage scan. Chunks of one series are expected to
/// come out back to back; the merge engine keeps such runs contiguous in its
/// output.
///
/// # Example
/// ```
/// use parascan::{DecoderChunk, DecoderSource, Error, Result, SeriesId};
/// use std::sync::Arc;
///
/// struct Once(Option<DecoderChunk>);
///
/// impl DecoderSource for Once {
///     fn has_next(&mut self) -> Result<bool> {
///         Ok(self.0.is_some())
///     }
///
///     fn next(&mut self) -> Result<DecoderChunk> {
///         self.0.take().ok_or_else(|| Error::Protocol("exhausted".into()))
///     }
///
///     fn close(&mut self) -> Result<()> {
///         self.0 = None;
///         Ok(())
///     }
/// }
///
/// let series = Arc::new(SeriesId::new("m"));
/// let mut source = Once(Some(DecoderChunk::new(series, &b"x"[..])));
/// assert!(source.has_next().unwrap());
/// source.next().unwrap();
/// assert!(source.next().is_err());
/// ```
pub trait DecoderSource: Send {
    /// Returns `true` if another chunk is available.
    fn has_next(&mut self) -> Result<bool>;

    /// Returns the next chunk.
    ///
    /// # Errors
    ///
    /// Fails if the backend fails, or with [`Error::Protocol`] when called
    /// after `has_next` returned `false`.
    fn next(&mut self) -> Result<DecoderChunk>;

    /// Releases backend resources. Must be idempotent.
    fn close(&mut self) -> Result<()>;
}

impl<S: DecoderSource + ?Sized> DecoderSource for Box<S> {
    fn has_next(&mut self) -> Result<bool> {
        (**self).has_next()
    }

    fn next(&mut self) -> Result<DecoderChunk> {
        (**self).next()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

/// How the backend is scanned.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ScanStrategy {
    /// Single scan with server-side row filtering, for live data.
    #[default]
    Optimized,
    /// One scan per series, usable for archived data.
    MultiScan,
}

impl fmt::Display for ScanStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Optimized => f.write_str("optimized"),
            Self::MultiScan => f.write_str("multi-scan"),
        }
    }
}

impl FromStr for ScanStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "optimized" => Ok(Self::Optimized),
            "multi-scan" | "multiscan" => Ok(Self::MultiScan),
            other => Err(Error::InvalidConfig {
                reason: format!("unknown scan strategy `{other}`"),
            }),
        }
    }
}

/// One retrieval request: which series, which time range, and how to scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanRequest {
    /// Every series to fetch, in request order.
    pub series: Vec<Arc<SeriesId>>,
    /// Upper time bound (inclusive), in platform time units.
    pub now: i64,
    /// Span covered back from `now`. Negative values count data points
    /// instead of time, as the backend defines.
    pub timespan: i64,
    pub strategy: ScanStrategy,
    /// Read from the archive rather than live data.
    pub archive: bool,
    /// Opaque read-authorization context forwarded to the backend.
    pub token: Option<String>,
}

impl ScanRequest {
    pub fn new(series: impl IntoIterator<Item = SeriesId>, now: i64, timespan: i64) -> Self {
        Self {
            series: series.into_iter().map(Arc::new).collect(),
            now,
            timespan,
            strategy: ScanStrategy::default(),
            archive: false,
            token: None,
        }
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: ScanStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    #[must_use]
    pub fn with_archive(mut self, archive: bool) -> Self {
        self.archive = archive;
        self
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

/// Opens a decoder source for a subset of a request's series.
///
/// A factory is shared across the tasks of a request, so it must be
/// `Send + Sync`. It is only called while the coordinator is constructed.
pub trait SourceFactory: Send + Sync {
    /// Opens a source producing chunks for `series`, using `request` for the
    /// time range, strategy and authorization.
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot be reached.
    fn open(
        &self,
        request: &ScanRequest,
        series: &[Arc<SeriesId>],
    ) -> Result<Box<dyn DecoderSource>>;
}

impl<F: SourceFactory + ?Sized> SourceFactory for Arc<F> {
    fn open(
        &self,
        request: &ScanRequest,
        series: &[Arc<SeriesId>],
    ) -> Result<Box<dyn DecoderSource>> {
        (**self).open(request, series)
    }
}

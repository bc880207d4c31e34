//! Checks a merged stream against the guarantees of the merge engine.
//!
//! Synthetic payloads are `"<series>#<n>"`, so the auditor can tell which
//! position of its series each chunk holds. It reports:
//!
//! - series whose chunks were split by another series,
//! - chunks that arrived out of source order,
//! - series that did not deliver every chunk.

use core::fmt;
use parascan::{DecoderChunk, SeriesId};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// The series reappeared after another series interrupted its run.
    Split { series: String },
    OutOfOrder {
        series: String,
        expected: usize,
        got: Option<usize>,
    },
    Incomplete {
        series: String,
        expected: usize,
        got: usize,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Split { series } => write!(f, "{series}: run split by another series"),
            Self::OutOfOrder {
                series,
                expected,
                got: Some(got),
            } => write!(f, "{series}: expected chunk #{expected}, got #{got}"),
            Self::OutOfOrder {
                series, expected, ..
            } => write!(f, "{series}: expected chunk #{expected}, got an unnumbered chunk"),
            Self::Incomplete {
                series,
                expected,
                got,
            } => write!(f, "{series}: {got} of {expected} chunks delivered"),
        }
    }
}

/// Outcome of auditing one stream.
#[derive(Debug, Clone, Default)]
pub struct AuditReport {
    pub chunks: usize,
    pub series: usize,
    pub violations: Vec<Violation>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty()
    }

    /// Violations other than missing chunks. These break the ordering
    /// guarantees even when the stream was legitimately truncated.
    pub fn ordering_violations(&self) -> impl Iterator<Item = &Violation> {
        self.violations
            .iter()
            .filter(|v| !matches!(v, Violation::Incomplete { .. }))
    }
}

/// Incremental auditor fed one chunk at a time.
#[derive(Debug)]
pub struct StreamAudit {
    chunks_per_series: usize,
    current: Option<Arc<SeriesId>>,
    finished: HashSet<Arc<SeriesId>>,
    delivered: HashMap<Arc<SeriesId>, usize>,
    chunks: usize,
    violations: Vec<Violation>,
}

impl StreamAudit {
    pub fn new(chunks_per_series: usize) -> Self {
        Self {
            chunks_per_series,
            current: None,
            finished: HashSet::new(),
            delivered: HashMap::new(),
            chunks: 0,
            violations: Vec::new(),
        }
    }

    pub fn observe(&mut self, chunk: &DecoderChunk) {
        self.chunks += 1;
        let series = chunk.series();

        if self.current.as_ref() != Some(series) {
            if let Some(previous) = self.current.replace(Arc::clone(series)) {
                self.finished.insert(previous);
            }
            if self.finished.contains(series) {
                self.violations.push(Violation::Split {
                    series: series.to_string(),
                });
            }
        }

        let delivered = self.delivered.entry(Arc::clone(series)).or_default();
        let position = sequence_number(chunk);
        if position != Some(*delivered) {
            self.violations.push(Violation::OutOfOrder {
                series: series.to_string(),
                expected: *delivered,
                got: position,
            });
        }
        *delivered += 1;
    }

    /// Closes the audit, checking that every series of `expected` delivered
    /// all of its chunks.
    pub fn finish(mut self, expected: &[SeriesId]) -> AuditReport {
        for series in expected {
            let got = self.delivered.get(series).copied().unwrap_or(0);
            if got != self.chunks_per_series {
                self.violations.push(Violation::Incomplete {
                    series: series.to_string(),
                    expected: self.chunks_per_series,
                    got,
                });
            }
        }

        AuditReport {
            chunks: self.chunks,
            series: self.delivered.len(),
            violations: self.violations,
        }
    }
}

fn sequence_number(chunk: &DecoderChunk) -> Option<usize> {
    let payload = core::str::from_utf8(chunk.payload()).ok()?;
    let (_, n) = payload.rsplit_once('#')?;
    n.parse().ok()
}

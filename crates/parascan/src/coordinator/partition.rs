use crate::SeriesId;
use std::sync::Arc;

/// Splits `series` into consecutive groups of `per_task` identities. The
/// last group may be smaller.
pub(crate) fn partition(series: &[Arc<SeriesId>], per_task: usize) -> Vec<&[Arc<SeriesId>]> {
    series.chunks(per_task.max(1)).collect()
}

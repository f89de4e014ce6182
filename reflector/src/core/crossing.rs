//! Watermark crossing rule and per-job failure grouping.

use std::collections::BTreeMap;

use crate::core::types::FailedTaskRecord;

/// Default number of failures per analysis crossing.
pub const DEFAULT_TRIGGER_THRESHOLD: u64 = 10;

/// Returns true when `count` has passed a multiple of `threshold` that
/// `watermark` has not.
///
/// A zero threshold never triggers.
pub fn crosses_threshold(count: u64, watermark: u64, threshold: u64) -> bool {
    if threshold == 0 {
        return false;
    }
    count / threshold > watermark / threshold
}

/// Count failed records per job id, sorted by job id.
pub fn failures_by_job(records: &[FailedTaskRecord]) -> BTreeMap<String, u64> {
    let mut counts = BTreeMap::new();
    for record in records {
        *counts.entry(record.job_id.clone()).or_insert(0) += 1;
    }
    counts
}

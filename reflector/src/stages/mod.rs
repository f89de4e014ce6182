//! Improvement pipeline stages: reflection, mutation, publish.
//!
//! Stages never return errors. Every failure (spawn error, timeout, missing
//! artifact) is logged with the job id and turned into a failed outcome so the
//! loop can short-circuit one job without touching the others.

use std::path::{Path, PathBuf};

use crate::core::types::Stage;

pub mod mutation;
pub mod publish;
pub mod reflection;

/// Per-stage subprocess log location: `{log_dir}/{job_id}/{count}-{stage}.log`.
pub(crate) fn stage_log_path(log_dir: &Path, job_id: &str, count: u64, stage: Stage) -> PathBuf {
    log_dir
        .join(job_id)
        .join(format!("{count}-{}.log", stage.as_str()))
}

/// Show `path` relative to `root` when it lives under it.
///
/// Agents run from `root`, so relative paths keep instructions short.
pub(crate) fn display_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

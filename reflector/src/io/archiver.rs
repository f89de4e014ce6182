//! Idempotent copy of failed-task artifacts into the archive tree.
//!
//! Layout: `{archive_dir}/{job_id}/{task_id}/trajectory.txt` and
//! `test-case-result.txt`. An existing destination file is never rewritten,
//! which is what makes repeated full-tree scans safe.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};

use crate::core::types::FailedTaskRecord;

pub const TRAJECTORY_NAME: &str = "trajectory.txt";
pub const TEST_RESULT_NAME: &str = "test-case-result.txt";

/// Tasks whose trajectory was copied by one `archive` call, keyed by job id.
pub type NewlyArchived = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone)]
pub struct Archiver {
    archive_dir: PathBuf,
}

impl Archiver {
    pub fn new(archive_dir: &Path) -> Self {
        Self {
            archive_dir: archive_dir.to_path_buf(),
        }
    }

    pub fn task_dir(&self, job_id: &str, task_id: &str) -> PathBuf {
        self.archive_dir.join(job_id).join(task_id)
    }

    /// Copy artifacts for every record that is not archived yet.
    ///
    /// A failure on one record is logged and does not stop the others.
    #[instrument(skip_all, fields(records = records.len()))]
    pub fn archive(&self, records: &[FailedTaskRecord]) -> NewlyArchived {
        let mut newly: NewlyArchived = BTreeMap::new();
        for record in records {
            match self.archive_one(record) {
                Ok(true) => {
                    newly
                        .entry(record.job_id.clone())
                        .or_default()
                        .push(record.task_id.clone());
                }
                Ok(false) => {}
                Err(err) => {
                    warn!(
                        job_id = %record.job_id,
                        task_id = %record.task_id,
                        err = format!("{err:#}"),
                        "failed to archive task"
                    );
                }
            }
        }

        let total: usize = newly.values().map(Vec::len).sum();
        if total > 0 {
            info!(newly_archived = total, "archived failed tasks");
        }
        newly
    }

    /// Returns true when the trajectory was copied by this call.
    fn archive_one(&self, record: &FailedTaskRecord) -> Result<bool> {
        let dest_dir = self.task_dir(&record.job_id, &record.task_id);
        fs::create_dir_all(&dest_dir)
            .with_context(|| format!("create archive dir {}", dest_dir.display()))?;

        let copied = copy_if_absent(&record.trajectory_path, &dest_dir.join(TRAJECTORY_NAME));

        if let Some(test_result) = &record.test_result_path {
            // Independent of the trajectory: attempted even when that copy
            // failed, and a verifier that finished late still gets its output
            // archived on a later pass.
            if let Err(err) = copy_if_absent(test_result, &dest_dir.join(TEST_RESULT_NAME)) {
                warn!(
                    job_id = %record.job_id,
                    task_id = %record.task_id,
                    err = format!("{err:#}"),
                    "failed to archive test result"
                );
            }
        }

        copied
    }
}

/// Copy `src` to `dest` unless `dest` exists. Returns whether a copy happened.
///
/// The copy lands in a sibling temp file first so an interrupted copy never
/// leaves a partial `dest` behind.
fn copy_if_absent(src: &Path, dest: &Path) -> Result<bool> {
    if dest.exists() {
        return Ok(false);
    }
    let tmp = tmp_path(dest);
    fs::copy(src, &tmp).with_context(|| format!("copy {} to {}", src.display(), tmp.display()))?;
    fs::rename(&tmp, dest).with_context(|| format!("replace {}", dest.display()))?;
    debug!(dest = %dest.display(), "copied artifact");
    Ok(true)
}

fn tmp_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    dest.with_file_name(name)
}

//! Read-only scan of the benchmark job tree for failed task runs.
//!
//! Layout: `{jobs_dir}/{job_id}/{task_id}/...`. The benchmark runner writes
//! into this tree while we read it, so anything incomplete is skipped rather
//! than reported.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::core::types::FailedTaskRecord;

const REWARD_FILE: &[&str] = &["verifier", "reward.txt"];
const TRAJECTORY_FILE: &[&str] = &["agent", "command-0", "stdout.txt"];
const TEST_RESULT_FILE: &[&str] = &["verifier", "test-stdout.txt"];

pub fn reward_path(task_dir: &Path) -> PathBuf {
    join_all(task_dir, REWARD_FILE)
}

pub fn trajectory_path(task_dir: &Path) -> PathBuf {
    join_all(task_dir, TRAJECTORY_FILE)
}

pub fn test_result_path(task_dir: &Path) -> PathBuf {
    join_all(task_dir, TEST_RESULT_FILE)
}

/// Walk `{root}/{job}/{task}` and return every task whose reward is zero and
/// whose trajectory exists.
///
/// A missing `root` yields no records. Sorted by (job id, task id).
#[instrument(skip_all, fields(root = %root.display()))]
pub fn scan(root: &Path) -> Result<Vec<FailedTaskRecord>> {
    if !root.exists() {
        debug!("jobs directory missing");
        return Ok(Vec::new());
    }

    let mut records = Vec::new();
    for (job_id, job_dir) in child_dirs(root).with_context(|| format!("read {}", root.display()))? {
        let tasks = match child_dirs(&job_dir) {
            Ok(tasks) => tasks,
            Err(err) => {
                // The runner may be creating or removing the job right now.
                debug!(job_id, err = %err, "skipping unreadable job directory");
                continue;
            }
        };
        for (task_id, task_dir) in tasks {
            if let Some(record) = inspect_task(&job_id, &task_id, &task_dir) {
                records.push(record);
            }
        }
    }

    records.sort_by(|a, b| (&a.job_id, &a.task_id).cmp(&(&b.job_id, &b.task_id)));
    debug!(failed = records.len(), "scan complete");
    Ok(records)
}

fn inspect_task(job_id: &str, task_id: &str, task_dir: &Path) -> Option<FailedTaskRecord> {
    let Some(reward) = read_reward(&reward_path(task_dir)) else {
        debug!(job_id, task_id, "reward not available yet");
        return None;
    };
    if reward != 0 {
        return None;
    }

    let trajectory = trajectory_path(task_dir);
    if !trajectory.is_file() {
        debug!(job_id, task_id, "failed task has no trajectory yet");
        return None;
    }

    let test_result = test_result_path(task_dir);
    Some(FailedTaskRecord {
        job_id: job_id.to_string(),
        task_id: task_id.to_string(),
        task_dir: task_dir.to_path_buf(),
        trajectory_path: trajectory,
        test_result_path: test_result.is_file().then_some(test_result),
        reward,
    })
}

/// Parse the reward marker. Missing, unreadable or non-integer means "not done".
fn read_reward(path: &Path) -> Option<i64> {
    let raw = fs::read_to_string(path).ok()?;
    raw.trim().parse::<i64>().ok()
}

/// Immediate subdirectories of `dir` as `(name, path)` pairs.
fn child_dirs(dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let Ok(entry) = entry else { continue };
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        dirs.push((entry.file_name().to_string_lossy().into_owned(), path));
    }
    Ok(dirs)
}

fn join_all(base: &Path, parts: &[&str]) -> PathBuf {
    parts.iter().fold(base.to_path_buf(), |acc, part| acc.join(part))
}

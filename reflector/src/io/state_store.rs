//! Persisted loop state: per-job watermarks and the processed-job set.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// On-disk form of the processed-job set (`.processed_failed_jobs.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessedJobsFile {
    #[serde(default)]
    pub processed_jobs: Vec<String>,
}

/// On-disk form of the watermark store (`.failure_watermarks.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WatermarksFile {
    #[serde(default)]
    pub watermarks: BTreeMap<String, u64>,
}

/// Jobs whose improvement pipeline already published a revision.
///
/// A processed job no longer triggers analysis.
#[derive(Debug, Clone)]
pub struct ProcessedJobSet {
    path: PathBuf,
    jobs: BTreeSet<String>,
}

impl ProcessedJobSet {
    /// Load the set, treating a missing file as empty.
    pub fn load(path: &Path) -> Result<Self> {
        let jobs = match read_json::<ProcessedJobsFile>(path)? {
            Some(file) => file.processed_jobs.into_iter().collect(),
            None => BTreeSet::new(),
        };
        debug!(path = %path.display(), processed = jobs.len(), "processed jobs loaded");
        Ok(Self {
            path: path.to_path_buf(),
            jobs,
        })
    }

    /// Delete the persisted set. Returns whether a file was removed.
    pub fn reset(path: &Path) -> Result<bool> {
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(path).with_context(|| format!("remove {}", path.display()))?;
        Ok(true)
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.jobs.contains(job_id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Add a job and save. Adding a known job does not touch the file.
    pub fn insert(&mut self, job_id: &str) -> Result<()> {
        if !self.jobs.insert(job_id.to_string()) {
            return Ok(());
        }
        self.save()
    }

    pub fn save(&self) -> Result<()> {
        let file = ProcessedJobsFile {
            processed_jobs: self.jobs.iter().cloned().collect(),
        };
        write_json(&self.path, &file)
    }
}

/// Per-job failure count at which analysis last ran.
///
/// Backed by a file when constructed with [`WatermarkStore::load`]; the
/// in-memory variant forgets every crossing when the process exits.
#[derive(Debug, Clone, Default)]
pub struct WatermarkStore {
    path: Option<PathBuf>,
    marks: BTreeMap<String, u64>,
}

impl WatermarkStore {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load persisted watermarks, treating a missing file as empty.
    pub fn load(path: &Path) -> Result<Self> {
        let marks = read_json::<WatermarksFile>(path)?
            .map(|file| file.watermarks)
            .unwrap_or_default();
        debug!(path = %path.display(), jobs = marks.len(), "watermarks loaded");
        Ok(Self {
            path: Some(path.to_path_buf()),
            marks,
        })
    }

    /// Watermark for `job_id`, zero when never recorded.
    pub fn get(&self, job_id: &str) -> u64 {
        self.marks.get(job_id).copied().unwrap_or(0)
    }

    /// Raise the watermark for `job_id` to `count`.
    ///
    /// Lower values are ignored so the watermark never decreases. The new
    /// value is kept in memory even if persisting it fails.
    pub fn record(&mut self, job_id: &str, count: u64) -> Result<()> {
        let current = self.marks.entry(job_id.to_string()).or_insert(0);
        if count <= *current {
            return Ok(());
        }
        *current = count;
        match &self.path {
            Some(path) => write_json(
                path,
                &WatermarksFile {
                    watermarks: self.marks.clone(),
                },
            ),
            None => Ok(()),
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let value =
        serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(value))
}

/// Atomically write pretty JSON (temp file + rename).
fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut buf = serde_json::to_string_pretty(value).context("serialize state json")?;
    buf.push('\n');
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf).with_context(|| format!("write temp state {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace state {}", path.display()))?;
    Ok(())
}

//! Per-iteration outcome summary and its status-line rendering.

use std::collections::BTreeMap;
use std::fmt;

use crate::io::archiver::NewlyArchived;

/// How far one job's improvement pipeline got in an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// The agent returned without a usable feedback report.
    NoFeedback,
    /// Feedback produced, the specification was not revised.
    MutationFailed,
    /// Specification revised, publishing failed.
    PublishFailed,
    /// All three stages succeeded.
    Published,
    /// A stop request arrived before the next stage could start.
    Interrupted,
}

impl PipelineOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineOutcome::NoFeedback => "no_feedback",
            PipelineOutcome::MutationFailed => "mutation_failed",
            PipelineOutcome::PublishFailed => "publish_failed",
            PipelineOutcome::Published => "published",
            PipelineOutcome::Interrupted => "interrupted",
        }
    }
}

/// What the loop decided for one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobDecision {
    /// Fewer failures than one threshold.
    Waiting { threshold: u64 },
    /// Crossing already handled at `watermark`.
    UpToDate { watermark: u64 },
    /// A previous pipeline published for this job.
    AlreadyProcessed,
    /// A crossing was detected and the pipeline ran.
    Triggered(PipelineOutcome),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub job_id: String,
    pub failed_count: u64,
    pub processed: bool,
    pub decision: JobDecision,
}

/// Result of one reconciliation iteration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IterationReport {
    pub failed_tasks: usize,
    pub newly_archived: NewlyArchived,
    pub processed_jobs: usize,
    pub jobs: Vec<JobReport>,
}

impl IterationReport {
    pub fn newly_archived_count(&self) -> usize {
        self.newly_archived.values().map(Vec::len).sum()
    }

    /// Jobs whose pipeline ran this iteration, with the outcome.
    pub fn triggered(&self) -> BTreeMap<&str, PipelineOutcome> {
        self.jobs
            .iter()
            .filter_map(|job| match job.decision {
                JobDecision::Triggered(outcome) => Some((job.job_id.as_str(), outcome)),
                _ => None,
            })
            .collect()
    }
}

impl fmt::Display for IterationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "status: failed_tasks={} jobs={} newly_archived={} processed_jobs={}",
            self.failed_tasks,
            self.jobs.len(),
            self.newly_archived_count(),
            self.processed_jobs
        )?;
        for job in &self.jobs {
            let state = if job.processed { "processed" } else { "pending" };
            write!(
                f,
                "job: id={} failed={} state={}",
                job.job_id, job.failed_count, state
            )?;
            match job.decision {
                JobDecision::Waiting { threshold } => writeln!(f, " waiting_for={threshold}")?,
                JobDecision::UpToDate { watermark } => writeln!(f, " watermark={watermark}")?,
                JobDecision::AlreadyProcessed => writeln!(f)?,
                JobDecision::Triggered(outcome) => {
                    writeln!(f, " pipeline={}", outcome.as_str())?;
                }
            }
        }
        Ok(())
    }
}

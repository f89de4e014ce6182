//! Reflection stage: ask the agent for a failure-mode report on one job.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::core::types::Stage;
use crate::io::agent::{AgentTask, ReasoningAgent};
use crate::io::prompt::{PromptEngine, ReflectionInputs};
use crate::io::shutdown::StopSignal;

use super::{display_path, stage_log_path};

/// Report written by the agent next to the archived tasks.
pub const FEEDBACK_FILE: &str = "FEEDBACK.md";

/// Feedback report produced for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feedback {
    pub job_id: String,
    pub path: PathBuf,
    pub content: String,
}

#[derive(Clone)]
pub struct ReflectionStage {
    root: PathBuf,
    archive_dir: PathBuf,
    log_dir: PathBuf,
    timeout: Duration,
    prompts: Arc<PromptEngine>,
}

impl ReflectionStage {
    pub fn new(
        root: &Path,
        archive_dir: &Path,
        log_dir: &Path,
        timeout: Duration,
        prompts: Arc<PromptEngine>,
    ) -> Self {
        Self {
            root: root.to_path_buf(),
            archive_dir: archive_dir.to_path_buf(),
            log_dir: log_dir.to_path_buf(),
            timeout,
            prompts,
        }
    }

    pub fn feedback_path(&self, job_id: &str) -> PathBuf {
        self.archive_dir.join(job_id).join(FEEDBACK_FILE)
    }

    /// Run the agent over the job's archive and return the report it wrote.
    ///
    /// The agent's exit status is not trusted: the stage succeeds iff a
    /// non-empty `FEEDBACK.md` exists once the process has returned.
    #[instrument(skip_all, fields(job_id = %job_id, failed_count = failed_count))]
    pub fn analyze<A: ReasoningAgent>(
        &self,
        agent: &A,
        job_id: &str,
        failed_count: u64,
        stop: &StopSignal,
    ) -> Option<Feedback> {
        let feedback_path = self.feedback_path(job_id);
        let shown_job_dir = display_path(&self.root, &self.archive_dir.join(job_id));
        let shown_feedback = display_path(&self.root, &feedback_path);

        let instruction = match self.prompts.render_reflection(&ReflectionInputs {
            job_id,
            job_dir: Path::new(&shown_job_dir),
            feedback_path: Path::new(&shown_feedback),
            failed_count,
        }) {
            Ok(text) => text,
            Err(err) => {
                warn!(err = format!("{err:#}"), "failed to render reflection instruction");
                return None;
            }
        };

        let task = AgentTask {
            instruction,
            workdir: self.root.clone(),
            log_path: stage_log_path(&self.log_dir, job_id, failed_count, Stage::Reflection),
            timeout: self.timeout,
        };
        match agent.run(&task, stop) {
            Ok(run) if run.timed_out => {
                warn!(timeout_secs = self.timeout.as_secs(), "reflection agent timed out");
            }
            Ok(run) if run.cancelled => warn!("reflection agent cancelled"),
            Ok(run) => info!(exit_code = ?run.exit_code, "reflection agent returned"),
            Err(err) => warn!(err = format!("{err:#}"), "reflection agent failed to run"),
        }

        read_feedback(job_id, &feedback_path)
    }
}

fn read_feedback(job_id: &str, path: &Path) -> Option<Feedback> {
    if !path.is_file() {
        warn!(path = %path.display(), "no feedback report produced");
        return None;
    }
    match fs::read_to_string(path) {
        Ok(content) if !content.is_empty() => Some(Feedback {
            job_id: job_id.to_string(),
            path: path.to_path_buf(),
            content,
        }),
        Ok(_) => {
            warn!(path = %path.display(), "feedback report is empty");
            None
        }
        Err(err) => {
            warn!(path = %path.display(), err = %err, "failed to read feedback report");
            None
        }
    }
}

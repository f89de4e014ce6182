//! Mutation stage: revise the behavior specification from a feedback report.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::core::types::Stage;
use crate::io::agent::{AgentTask, ReasoningAgent};
use crate::io::prompt::{MutationInputs, PromptEngine};
use crate::io::shutdown::StopSignal;

use super::reflection::Feedback;
use super::{display_path, stage_log_path};

#[derive(Clone)]
pub struct MutationStage {
    root: PathBuf,
    spec_path: PathBuf,
    signature_name: String,
    mutable_fields: Vec<String>,
    log_dir: PathBuf,
    timeout: Duration,
    prompts: Arc<PromptEngine>,
}

/// Target and constraints for a mutation.
#[derive(Debug, Clone)]
pub struct MutationTarget {
    pub spec_path: PathBuf,
    pub signature_name: String,
    pub mutable_fields: Vec<String>,
}

impl MutationStage {
    pub fn new(
        root: &Path,
        target: MutationTarget,
        log_dir: &Path,
        timeout: Duration,
        prompts: Arc<PromptEngine>,
    ) -> Self {
        Self {
            root: root.to_path_buf(),
            spec_path: target.spec_path,
            signature_name: target.signature_name,
            mutable_fields: target.mutable_fields,
            log_dir: log_dir.to_path_buf(),
            timeout,
            prompts,
        }
    }

    /// Ask the agent to revise only the named fields of the specification.
    ///
    /// Succeeds iff the agent exits with status zero. The specification's
    /// content is not inspected here.
    #[instrument(skip_all, fields(job_id = %feedback.job_id, failed_count = failed_count))]
    pub fn mutate<A: ReasoningAgent>(
        &self,
        agent: &A,
        feedback: &Feedback,
        failed_count: u64,
        stop: &StopSignal,
    ) -> bool {
        if !self.spec_path.is_file() {
            warn!(spec_path = %self.spec_path.display(), "specification not found");
            return false;
        }

        let shown_feedback = display_path(&self.root, &feedback.path);
        let shown_spec = display_path(&self.root, &self.spec_path);
        let instruction = match self.prompts.render_mutation(&MutationInputs {
            feedback_path: Path::new(&shown_feedback),
            spec_path: Path::new(&shown_spec),
            signature_name: &self.signature_name,
            mutable_fields: &self.mutable_fields,
        }) {
            Ok(text) => text,
            Err(err) => {
                warn!(err = format!("{err:#}"), "failed to render mutation instruction");
                return false;
            }
        };

        let task = AgentTask {
            instruction,
            workdir: self.root.clone(),
            log_path: stage_log_path(&self.log_dir, &feedback.job_id, failed_count, Stage::Mutation),
            timeout: self.timeout,
        };
        match agent.run(&task, stop) {
            Ok(run) if run.succeeded() => {
                info!(signature = %self.signature_name, "specification revised");
                true
            }
            Ok(run) => {
                warn!(
                    exit_code = ?run.exit_code,
                    timed_out = run.timed_out,
                    cancelled = run.cancelled,
                    "mutation agent did not succeed"
                );
                false
            }
            Err(err) => {
                warn!(err = format!("{err:#}"), "mutation agent failed to run");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ExternalRun;
    use crate::io::config::MutationConfig;
    use crate::test_support::{ScriptedAgent, ScriptedRun};
    use std::fs;

    fn stage(root: &Path) -> MutationStage {
        let defaults = MutationConfig::default();
        MutationStage::new(
            root,
            MutationTarget {
                spec_path: root.join(&defaults.spec_path),
                signature_name: defaults.signature_name,
                mutable_fields: defaults.mutable_fields,
            },
            &root.join("logs"),
            Duration::from_secs(5),
            Arc::new(PromptEngine::new().expect("prompts")),
        )
    }

    fn feedback(root: &Path) -> Feedback {
        Feedback {
            job_id: "run1".to_string(),
            path: root.join("failed-jobs/run1/FEEDBACK.md"),
            content: "agents forget to run tests".to_string(),
        }
    }

    fn write_spec(root: &Path) {
        let spec = root.join("nanocode/nanocode.py");
        fs::create_dir_all(spec.parent().expect("parent")).expect("mkdir");
        fs::write(spec, "class CodingAssistant:\n    \"\"\"prompt\"\"\"\n").expect("spec");
    }

    #[test]
    fn zero_exit_is_success_and_instruction_is_scoped() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_spec(temp.path());
        let stage = stage(temp.path());
        let agent = ScriptedAgent::new(vec![ScriptedRun::returns(ExternalRun::exited(0))]);

        assert!(stage.mutate(&agent, &feedback(temp.path()), 10, &StopSignal::new()));

        let tasks = agent.tasks();
        assert_eq!(tasks.len(), 1);
        let instruction = &tasks[0].instruction;
        assert!(instruction.contains("failed-jobs/run1/FEEDBACK.md"));
        assert!(instruction.contains("nanocode/nanocode.py"));
        assert!(instruction.contains("The answer field description"));
        assert!(tasks[0].log_path.ends_with("run1/10-mutation.log"));
    }

    #[test]
    fn nonzero_exit_is_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_spec(temp.path());
        let stage = stage(temp.path());
        let agent = ScriptedAgent::new(vec![ScriptedRun::returns(ExternalRun::exited(1))]);

        assert!(!stage.mutate(&agent, &feedback(temp.path()), 10, &StopSignal::new()));
    }

    #[test]
    fn timeout_is_failure_even_with_zero_code() {
        let temp = tempfile::tempdir().expect("tempdir");
        write_spec(temp.path());
        let stage = stage(temp.path());
        let agent = ScriptedAgent::new(vec![ScriptedRun::returns(ExternalRun {
            exit_code: Some(0),
            timed_out: true,
            cancelled: false,
        })]);

        assert!(!stage.mutate(&agent, &feedback(temp.path()), 10, &StopSignal::new()));
    }

    #[test]
    fn missing_spec_skips_agent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let stage = stage(temp.path());
        let agent = ScriptedAgent::new(Vec::new());

        assert!(!stage.mutate(&agent, &feedback(temp.path()), 10, &StopSignal::new()));
        assert!(agent.tasks().is_empty());
    }
}

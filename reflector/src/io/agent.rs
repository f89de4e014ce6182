//! Reasoning-agent abstraction.
//!
//! The [`ReasoningAgent`] trait is the only view the pipeline has of the
//! external agent: run one bounded task from an instruction and report how
//! the process ended. Tests use scripted agents that write artifacts
//! directly without spawning processes.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::types::ExternalRun;
use crate::io::config::AgentConfig;
use crate::io::process::{run_command_with_timeout, write_command_log};
use crate::io::shutdown::StopSignal;

/// Parameters for one agent invocation.
#[derive(Debug, Clone)]
pub struct AgentTask {
    /// Free-text instruction for the agent.
    pub instruction: String,
    /// Working directory for the agent process.
    pub workdir: PathBuf,
    /// Where stdout/stderr of the run are written.
    pub log_path: PathBuf,
    /// Hard wall-clock limit; the process group is killed when it elapses.
    pub timeout: Duration,
}

/// Capability interface over the external reasoning agent.
pub trait ReasoningAgent {
    /// Run `task` to completion, timeout or cancellation.
    ///
    /// `Err` means the agent could not be run at all (e.g. spawn failure).
    fn run(&self, task: &AgentTask, stop: &StopSignal) -> Result<ExternalRun>;
}

/// Agent backed by the `microcode task` CLI.
#[derive(Debug, Clone)]
pub struct MicrocodeAgent {
    config: AgentConfig,
}

impl MicrocodeAgent {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    fn api_key(&self) -> Option<String> {
        std::env::var(&self.config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

impl ReasoningAgent for MicrocodeAgent {
    #[instrument(skip_all, fields(program = %self.config.program, timeout_secs = task.timeout.as_secs()))]
    fn run(&self, task: &AgentTask, stop: &StopSignal) -> Result<ExternalRun> {
        let api_key = self.api_key();
        if api_key.is_none() {
            warn!(env = %self.config.api_key_env, "agent credential not set");
        }
        info!(workdir = %task.workdir.display(), "starting reasoning agent");

        let mut cmd = Command::new(&self.config.program);
        cmd.args(agent_args(&self.config, &task.instruction, api_key.as_deref()))
            .current_dir(&task.workdir);

        let output = run_command_with_timeout(cmd, task.timeout, self.config.output_limit_bytes, stop)
            .with_context(|| format!("run {}", self.config.program))?;
        // The run already happened; a missing log must not undo its effects.
        if let Err(err) = write_command_log(
            &task.log_path,
            &output,
            "agent",
            self.config.output_limit_bytes,
        ) {
            warn!(err = format!("{err:#}"), "failed to write agent log");
        }

        info!(
            exit_code = ?output.run.exit_code,
            timed_out = output.run.timed_out,
            cancelled = output.run.cancelled,
            "reasoning agent finished"
        );
        Ok(output.run)
    }
}

/// Build the argv (without the program) for one `task` invocation.
///
/// The credential, when present, is the only secret in the list; callers must
/// not log the returned vector.
pub fn agent_args(config: &AgentConfig, instruction: &str, api_key: Option<&str>) -> Vec<String> {
    let mut args = vec![
        "task".to_string(),
        instruction.to_string(),
        "--lm".to_string(),
        config.lm.clone(),
        "--sub-lm".to_string(),
        config.sub_lm.clone(),
        "--max-iterations".to_string(),
        config.max_iterations.to_string(),
        "--max-tokens".to_string(),
        config.max_tokens.to_string(),
    ];
    if config.verbose {
        args.push("--verbose".to_string());
    }
    args.extend(config.extra_args.iter().cloned());
    if let Some(key) = api_key {
        args.push("--api-key".to_string());
        args.push(key.to_string());
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_carry_models_and_caps() {
        let config = AgentConfig::default();
        let args = agent_args(&config, "look at failures", None);

        assert_eq!(args[0], "task");
        assert_eq!(args[1], "look at failures");
        let lm = args.iter().position(|a| a == "--lm").expect("--lm");
        assert_eq!(args[lm + 1], config.lm);
        let sub = args.iter().position(|a| a == "--sub-lm").expect("--sub-lm");
        assert_eq!(args[sub + 1], config.sub_lm);
        assert!(args.contains(&"--max-iterations".to_string()));
        assert!(args.contains(&"30".to_string()));
        assert!(args.contains(&"30000".to_string()));
        assert!(args.contains(&"--verbose".to_string()));
        assert!(!args.contains(&"--api-key".to_string()));
    }

    #[test]
    fn args_append_credential_and_extra_flags() {
        let config = AgentConfig {
            verbose: false,
            extra_args: vec!["--track-trace".to_string()],
            ..AgentConfig::default()
        };
        let args = agent_args(&config, "x", Some("sk-test"));

        assert!(!args.contains(&"--verbose".to_string()));
        assert!(args.contains(&"--track-trace".to_string()));
        assert_eq!(&args[args.len() - 2..], ["--api-key", "sk-test"]);
    }

    #[cfg(unix)]
    #[test]
    fn microcode_agent_runs_program_in_workdir_and_logs_output() {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("tempdir");
        let script = temp.path().join("fake-agent");
        fs::write(&script, "#!/bin/sh\necho \"ran $1 in $(pwd)\"\nexit 4\n").expect("script");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod");

        let agent = MicrocodeAgent::new(AgentConfig {
            program: script.display().to_string(),
            api_key_env: "REFLECTOR_TEST_UNSET_KEY".to_string(),
            ..AgentConfig::default()
        });
        let task = AgentTask {
            instruction: "analyze".to_string(),
            workdir: temp.path().to_path_buf(),
            log_path: temp.path().join("logs").join("agent.log"),
            timeout: Duration::from_secs(10),
        };

        let run = agent.run(&task, &StopSignal::new()).expect("run");

        assert_eq!(run, ExternalRun::exited(4));
        let log = fs::read_to_string(&task.log_path).expect("log");
        assert!(log.contains("ran task in"));
    }

    #[cfg(unix)]
    #[test]
    fn unwritable_log_keeps_the_run_outcome() {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("tempdir");
        let script = temp.path().join("fake-agent");
        fs::write(&script, "#!/bin/sh
echo revised
exit 0
").expect("script");
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).expect("chmod");
        // A regular file where the log directory should be.
        let blocker = temp.path().join("logs");
        fs::write(&blocker, "not a directory").expect("blocker");

        let agent = MicrocodeAgent::new(AgentConfig {
            program: script.display().to_string(),
            api_key_env: "REFLECTOR_TEST_UNSET_KEY".to_string(),
            ..AgentConfig::default()
        });
        let task = AgentTask {
            instruction: "revise".to_string(),
            workdir: temp.path().to_path_buf(),
            log_path: blocker.join("run1").join("10-mutation.log"),
            timeout: Duration::from_secs(10),
        };

        let run = agent.run(&task, &StopSignal::new()).expect("run");

        assert_eq!(run, ExternalRun::exited(0));
    }
}

//! Shared deterministic types for reflector core logic.
//!
//! These types define stable contracts between the scanner, archiver, stages
//! and the reconciliation loop. They carry no I/O handles.

use std::path::PathBuf;

/// One failed task run discovered by a scan pass.
///
/// Built fresh on every scan and dropped once the pass has folded it into
/// archive and trigger decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedTaskRecord {
    pub job_id: String,
    pub task_id: String,
    /// Task execution directory inside the job tree.
    pub task_dir: PathBuf,
    /// Agent transcript (`agent/command-0/stdout.txt`).
    pub trajectory_path: PathBuf,
    /// Verifier output (`verifier/test-stdout.txt`), when the verifier wrote one.
    pub test_result_path: Option<PathBuf>,
    /// Parsed reward; always zero for a failed record.
    pub reward: i64,
}

/// Outcome of one bounded external process invocation.
///
/// Collaborators report this instead of a raw `ExitStatus` so scripted test
/// doubles can construct it directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExternalRun {
    /// Exit code, `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    /// The hard timeout elapsed and the process group was killed.
    pub timed_out: bool,
    /// A stop request arrived and the process group was killed.
    pub cancelled: bool,
}

impl ExternalRun {
    /// A run that exited normally with the given code.
    pub fn exited(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            ..Self::default()
        }
    }

    pub fn succeeded(&self) -> bool {
        !self.timed_out && !self.cancelled && self.exit_code == Some(0)
    }
}

/// Pipeline stage identifiers, used in logs and status lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Reflection,
    Mutation,
    Publish,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Reflection => "reflection",
            Stage::Mutation => "mutation",
            Stage::Publish => "publish",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn external_run_success_requires_zero_exit_without_kill() {
        assert!(ExternalRun::exited(0).succeeded());
        assert!(!ExternalRun::exited(2).succeeded());
        assert!(!ExternalRun::default().succeeded());

        let timed_out = ExternalRun {
            exit_code: Some(0),
            timed_out: true,
            cancelled: false,
        };
        assert!(!timed_out.succeeded());
    }
}

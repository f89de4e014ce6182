//! Test-only helpers: temporary job trees and scripted collaborators.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::types::ExternalRun;
use crate::io::agent::{AgentTask, ReasoningAgent};
use crate::io::config::ReflectorConfig;
use crate::io::publisher::{PublishRequest, Publisher};
use crate::io::scanner::{reward_path, test_result_path, trajectory_path};
use crate::io::shutdown::StopSignal;

/// Temporary working directory laid out like a benchmark host.
pub struct JobTreeBuilder {
    temp: TempDir,
    jobs_dir: PathBuf,
    archive_dir: PathBuf,
}

impl JobTreeBuilder {
    /// Create an empty tree using the default config's relative paths.
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("create tempdir")?;
        let cfg = ReflectorConfig::default();
        let jobs_dir = temp.path().join(&cfg.jobs_dir);
        let archive_dir = temp.path().join(&cfg.archive_dir);
        fs::create_dir_all(&jobs_dir).context("create jobs dir")?;
        Ok(Self {
            temp,
            jobs_dir,
            archive_dir,
        })
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn jobs_dir(&self) -> &Path {
        &self.jobs_dir
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    /// Write one task directory. `reward: None` leaves the marker out.
    pub fn task(
        &self,
        job_id: &str,
        task_id: &str,
        reward: Option<&str>,
        trajectory: bool,
        test_result: bool,
    ) -> Result<PathBuf> {
        let task_dir = self.jobs_dir.join(job_id).join(task_id);
        fs::create_dir_all(&task_dir).context("create task dir")?;
        if let Some(reward) = reward {
            write_file(&reward_path(&task_dir), reward)?;
        }
        if trajectory {
            write_file(
                &trajectory_path(&task_dir),
                &format!("trajectory of {job_id}/{task_id}\n"),
            )?;
        }
        if test_result {
            write_file(
                &test_result_path(&task_dir),
                &format!("FAILED {task_id}\n"),
            )?;
        }
        Ok(task_dir)
    }

    /// A complete failed task: reward `0`, trajectory and test output.
    pub fn failed_task(&self, job_id: &str, task_id: &str) -> Result<PathBuf> {
        self.task(job_id, task_id, Some("0"), true, true)
    }

    /// `count` failed tasks named `task-000`, `task-001`, ...
    pub fn failed_tasks(&self, job_id: &str, count: usize) -> Result<()> {
        self.failed_tasks_from(job_id, 0, count)
    }

    /// `count` failed tasks numbered from `start`.
    pub fn failed_tasks_from(&self, job_id: &str, start: usize, count: usize) -> Result<()> {
        for i in start..start + count {
            self.failed_task(job_id, &format!("task-{i:03}"))?;
        }
        Ok(())
    }

    /// Write the default behavior specification file.
    pub fn write_spec(&self) -> Result<PathBuf> {
        let path = self
            .root()
            .join(ReflectorConfig::default().mutation.spec_path);
        write_file(
            &path,
            "class CodingAssistant(dspy.Signature):\n    \"\"\"You are a concise coding assistant.\"\"\"\n",
        )?;
        Ok(path)
    }
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("write {}", path.display()))
}

/// One queued response of a [`ScriptedAgent`].
#[derive(Debug, Clone)]
pub struct ScriptedRun {
    /// File the "agent" writes before returning.
    pub write: Option<(PathBuf, String)>,
    /// `Err` simulates a failure to run the agent at all.
    pub result: Result<ExternalRun, String>,
    /// Raise the stop signal before returning, as SIGINT would mid-run.
    pub request_stop: bool,
}

impl ScriptedRun {
    pub fn returns(run: ExternalRun) -> Self {
        Self {
            write: None,
            result: Ok(run),
            request_stop: false,
        }
    }

    pub fn writes(path: PathBuf, contents: &str, run: ExternalRun) -> Self {
        Self {
            write: Some((path, contents.to_string())),
            result: Ok(run),
            request_stop: false,
        }
    }

    pub fn fails(message: &str) -> Self {
        Self {
            write: None,
            result: Err(message.to_string()),
            request_stop: false,
        }
    }

    pub fn then_stop(mut self) -> Self {
        self.request_stop = true;
        self
    }
}

/// Agent that replays queued responses and records every task it receives.
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    runs: RefCell<VecDeque<ScriptedRun>>,
    tasks: RefCell<Vec<AgentTask>>,
}

impl ScriptedAgent {
    pub fn new(runs: Vec<ScriptedRun>) -> Self {
        Self {
            runs: RefCell::new(runs.into()),
            tasks: RefCell::new(Vec::new()),
        }
    }

    pub fn push(&self, run: ScriptedRun) {
        self.runs.borrow_mut().push_back(run);
    }

    pub fn tasks(&self) -> Vec<AgentTask> {
        self.tasks.borrow().clone()
    }
}

impl ReasoningAgent for ScriptedAgent {
    fn run(&self, task: &AgentTask, stop: &StopSignal) -> Result<ExternalRun> {
        self.tasks.borrow_mut().push(task.clone());
        let run = self
            .runs
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted agent has no run left"))?;
        if let Some((path, contents)) = &run.write {
            write_file(path, contents)?;
        }
        if run.request_stop {
            stop.request_stop();
        }
        run.result.map_err(|message| anyhow!(message))
    }
}

/// Publisher that replays queued outcomes and records every request.
#[derive(Debug, Default)]
pub struct ScriptedPublisher {
    outcomes: RefCell<VecDeque<Result<ExternalRun, String>>>,
    requests: RefCell<Vec<PublishRequest>>,
}

impl ScriptedPublisher {
    pub fn new(outcomes: Vec<Result<ExternalRun, String>>) -> Self {
        Self {
            outcomes: RefCell::new(outcomes.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<PublishRequest> {
        self.requests.borrow().clone()
    }
}

impl Publisher for ScriptedPublisher {
    fn publish(&self, request: &PublishRequest, _stop: &StopSignal) -> Result<ExternalRun> {
        self.requests.borrow_mut().push(request.clone());
        let outcome = self
            .outcomes
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted publisher has no outcome left"))?;
        outcome.map_err(|message| anyhow!(message))
    }
}

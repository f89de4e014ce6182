//! Publish adapter for the mutated specification.

use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument, warn};

use crate::core::types::ExternalRun;
use crate::io::process::{run_command_with_timeout, write_command_log};
use crate::io::shutdown::StopSignal;

#[derive(Debug, Clone)]
pub struct PublishRequest {
    pub workdir: PathBuf,
    pub log_path: PathBuf,
    pub timeout: Duration,
}

pub trait Publisher {
    fn publish(&self, request: &PublishRequest, stop: &StopSignal) -> Result<ExternalRun>;
}

/// Publisher that runs a fixed argv (default `uv run nanocode.py`).
#[derive(Debug, Clone)]
pub struct CommandPublisher {
    command: Vec<String>,
    output_limit_bytes: usize,
}

impl CommandPublisher {
    pub fn new(command: Vec<String>, output_limit_bytes: usize) -> Self {
        Self {
            command,
            output_limit_bytes,
        }
    }
}

impl Publisher for CommandPublisher {
    #[instrument(skip_all, fields(workdir = %request.workdir.display()))]
    fn publish(&self, request: &PublishRequest, stop: &StopSignal) -> Result<ExternalRun> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("publish command is empty"))?;
        info!(program = %program, "running publish command");

        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&request.workdir);
        let output = run_command_with_timeout(cmd, request.timeout, self.output_limit_bytes, stop)
            .with_context(|| format!("run {program}"))?;
        if let Err(err) =
            write_command_log(&request.log_path, &output, "publish", self.output_limit_bytes)
        {
            warn!(err = format!("{err:#}"), "failed to write publish log");
        }
        Ok(output.run)
    }
}

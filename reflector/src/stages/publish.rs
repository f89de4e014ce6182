//! Publish stage: release the mutated specification.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::core::types::Stage;
use crate::io::publisher::{PublishRequest, Publisher};
use crate::io::shutdown::StopSignal;

use super::stage_log_path;

#[derive(Debug, Clone)]
pub struct PublishStage {
    workdir: PathBuf,
    log_dir: PathBuf,
    timeout: Duration,
}

impl PublishStage {
    pub fn new(workdir: &Path, log_dir: &Path, timeout: Duration) -> Self {
        Self {
            workdir: workdir.to_path_buf(),
            log_dir: log_dir.to_path_buf(),
            timeout,
        }
    }

    /// Run the publish command once. Succeeds iff it exits with status zero.
    #[instrument(skip_all, fields(job_id = %job_id, failed_count = failed_count))]
    pub fn publish<P: Publisher>(
        &self,
        publisher: &P,
        job_id: &str,
        failed_count: u64,
        stop: &StopSignal,
    ) -> bool {
        let request = PublishRequest {
            workdir: self.workdir.clone(),
            log_path: stage_log_path(&self.log_dir, job_id, failed_count, Stage::Publish),
            timeout: self.timeout,
        };
        match publisher.publish(&request, stop) {
            Ok(run) if run.succeeded() => {
                info!("published new specification revision");
                true
            }
            Ok(run) => {
                warn!(
                    exit_code = ?run.exit_code,
                    timed_out = run.timed_out,
                    cancelled = run.cancelled,
                    "publish failed"
                );
                false
            }
            Err(err) => {
                warn!(err = format!("{err:#}"), "publish command failed to run");
                false
            }
        }
    }
}

//! Reconciliation loop: scan, archive, check crossings, run the pipeline.
//!
//! Iterations are strictly sequential. A failure inside one job's pipeline
//! only ends that job's pipeline for the iteration; an error from the
//! iteration itself is logged and the loop carries on unless it is running
//! a single pass.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, error, info, instrument, warn};

use crate::core::crossing::{crosses_threshold, failures_by_job};
use crate::io::agent::ReasoningAgent;
use crate::io::archiver::Archiver;
use crate::io::config::{ReflectorConfig, ReflectorPaths};
use crate::io::prompt::PromptEngine;
use crate::io::publisher::Publisher;
use crate::io::scanner::scan;
use crate::io::shutdown::StopSignal;
use crate::io::state_store::{ProcessedJobSet, WatermarkStore};
use crate::report::{IterationReport, JobDecision, JobReport, PipelineOutcome};
use crate::stages::mutation::{MutationStage, MutationTarget};
use crate::stages::publish::PublishStage;
use crate::stages::reflection::ReflectionStage;

/// How long `run` keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopMode {
    /// Exactly one iteration, no sleep.
    SinglePass,
    /// Iterate until a stop is requested, sleeping the poll interval in between.
    Continuous,
}

/// Reason why `run` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStop {
    /// The single pass finished.
    SinglePassDone,
    /// A stop request was observed.
    Stopped,
}

/// Summary of a `run` invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopOutcome {
    pub iterations: u32,
    pub stop: LoopStop,
}

pub struct Reconciler<'a, A: ReasoningAgent, P: Publisher> {
    paths: ReflectorPaths,
    threshold: u64,
    poll_interval: Duration,
    agent: &'a A,
    publisher: &'a P,
    stop: StopSignal,
    archiver: Archiver,
    watermarks: WatermarkStore,
    processed: ProcessedJobSet,
    reflection: ReflectionStage,
    mutation: MutationStage,
    publish: PublishStage,
}

impl<'a, A: ReasoningAgent, P: Publisher> Reconciler<'a, A, P> {
    /// Build a loop rooted at `root`, loading persisted state.
    pub fn new(
        root: &Path,
        cfg: &ReflectorConfig,
        agent: &'a A,
        publisher: &'a P,
        stop: StopSignal,
    ) -> Result<Self> {
        cfg.validate()?;
        let paths = ReflectorPaths::new(root, cfg);
        let processed = ProcessedJobSet::load(&paths.processed_file)
            .with_context(|| format!("load {}", paths.processed_file.display()))?;
        let watermarks = if cfg.persist_watermarks {
            WatermarkStore::load(&paths.watermark_file)
                .with_context(|| format!("load {}", paths.watermark_file.display()))?
        } else {
            WatermarkStore::in_memory()
        };

        let prompts = Arc::new(PromptEngine::new()?);
        let agent_timeout = Duration::from_secs(cfg.agent.timeout_secs);
        let reflection = ReflectionStage::new(
            root,
            &paths.archive_dir,
            &paths.log_dir,
            agent_timeout,
            Arc::clone(&prompts),
        );
        let mutation = MutationStage::new(
            root,
            MutationTarget {
                spec_path: paths.spec_path.clone(),
                signature_name: cfg.mutation.signature_name.clone(),
                mutable_fields: cfg.mutation.mutable_fields.clone(),
            },
            &paths.log_dir,
            agent_timeout,
            prompts,
        );
        let publish = PublishStage::new(
            &paths.publish_workdir,
            &paths.log_dir,
            Duration::from_secs(cfg.publish.timeout_secs),
        );

        Ok(Self {
            archiver: Archiver::new(&paths.archive_dir),
            paths,
            threshold: cfg.trigger_threshold,
            poll_interval: cfg.poll_interval(),
            agent,
            publisher,
            stop,
            watermarks,
            processed,
            reflection,
            mutation,
            publish,
        })
    }

    pub fn watermarks(&self) -> &WatermarkStore {
        &self.watermarks
    }

    pub fn processed(&self) -> &ProcessedJobSet {
        &self.processed
    }

    /// Run iterations according to `mode`, handing every report to `on_iteration`.
    ///
    /// In continuous mode iteration errors are logged and the loop continues;
    /// it only returns once a stop is requested. In single-pass mode an
    /// iteration error is returned.
    pub fn run<F: FnMut(&IterationReport)>(
        &mut self,
        mode: LoopMode,
        mut on_iteration: F,
    ) -> Result<LoopOutcome> {
        let mut iterations = 0u32;
        loop {
            if self.stop.is_stopped() {
                info!(iterations, "stop requested, leaving loop");
                return Ok(LoopOutcome {
                    iterations,
                    stop: LoopStop::Stopped,
                });
            }

            iterations += 1;
            match self.run_iteration() {
                Ok(report) => on_iteration(&report),
                Err(err) if mode == LoopMode::SinglePass => {
                    return Err(err.context("reconciliation iteration failed"));
                }
                Err(err) => {
                    error!(iteration = iterations, err = format!("{err:#}"), "iteration failed");
                }
            }

            if mode == LoopMode::SinglePass {
                return Ok(LoopOutcome {
                    iterations,
                    stop: LoopStop::SinglePassDone,
                });
            }

            debug!(secs = self.poll_interval.as_secs(), "sleeping until next scan");
            if self.stop.sleep(self.poll_interval) {
                info!(iterations, "stop requested during sleep");
                return Ok(LoopOutcome {
                    iterations,
                    stop: LoopStop::Stopped,
                });
            }
        }
    }

    /// One SCAN → ARCHIVE → per-job crossing check → pipeline pass.
    #[instrument(skip_all)]
    pub fn run_iteration(&mut self) -> Result<IterationReport> {
        let records = scan(&self.paths.jobs_dir)
            .with_context(|| format!("scan {}", self.paths.jobs_dir.display()))?;
        if records.is_empty() {
            info!("no failed tasks found");
        }
        let newly_archived = self.archiver.archive(&records);
        let counts = failures_by_job(&records);

        let mut jobs = Vec::with_capacity(counts.len());
        for (job_id, count) in counts {
            if self.stop.is_stopped() {
                info!(job_id = %job_id, "stop requested, skipping remaining jobs");
                break;
            }
            let decision = self.evaluate_job(&job_id, count);
            jobs.push(JobReport {
                processed: self.processed.contains(&job_id),
                job_id,
                failed_count: count,
                decision,
            });
        }

        Ok(IterationReport {
            failed_tasks: records.len(),
            newly_archived,
            processed_jobs: self.processed.len(),
            jobs,
        })
    }

    fn evaluate_job(&mut self, job_id: &str, count: u64) -> JobDecision {
        if self.processed.contains(job_id) {
            debug!(job_id, count, "job already processed");
            return JobDecision::AlreadyProcessed;
        }

        let watermark = self.watermarks.get(job_id);
        if !crosses_threshold(count, watermark, self.threshold) {
            if count < self.threshold {
                info!(job_id, count, threshold = self.threshold, "waiting for more failures");
                return JobDecision::Waiting {
                    threshold: self.threshold,
                };
            }
            debug!(job_id, count, watermark, "no new crossing");
            return JobDecision::UpToDate { watermark };
        }

        info!(job_id, count, watermark, "crossing detected, running improvement pipeline");
        JobDecision::Triggered(self.run_pipeline(job_id, count))
    }

    /// REFLECT → MUTATE → PUBLISH; each stage runs only if the previous succeeded.
    fn run_pipeline(&mut self, job_id: &str, count: u64) -> PipelineOutcome {
        let Some(feedback) = self.reflection.analyze(self.agent, job_id, count, &self.stop) else {
            warn!(job_id, "no feedback generated");
            return PipelineOutcome::NoFeedback;
        };
        info!(
            job_id,
            path = %feedback.path.display(),
            bytes = feedback.content.len(),
            "feedback generated"
        );

        // The crossing is consumed once feedback exists, whatever happens next.
        if let Err(err) = self.watermarks.record(job_id, count) {
            warn!(job_id, count, err = format!("{err:#}"), "failed to persist watermark");
        }

        if self.stop.is_stopped() {
            return PipelineOutcome::Interrupted;
        }
        if !self.mutation.mutate(self.agent, &feedback, count, &self.stop) {
            warn!(job_id, "failed to update specification");
            return PipelineOutcome::MutationFailed;
        }

        if self.stop.is_stopped() {
            return PipelineOutcome::Interrupted;
        }
        if !self.publish.publish(self.publisher, job_id, count, &self.stop) {
            warn!(job_id, "failed to publish specification");
            return PipelineOutcome::PublishFailed;
        }

        if let Err(err) = self.processed.insert(job_id) {
            warn!(job_id, err = format!("{err:#}"), "failed to persist processed job");
        }
        info!(job_id, "pipeline complete");
        PipelineOutcome::Published
    }
}

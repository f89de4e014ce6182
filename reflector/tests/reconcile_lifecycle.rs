//! End-to-end reconciliation scenarios over a temporary job tree.
//!
//! Uses scripted agent/publisher collaborators so no external process is
//! spawned; state files are real and survive across `Reconciler` instances
//! the same way they survive a restart.

use std::fs;

use reflector::core::types::ExternalRun;
use reflector::io::archiver::{TEST_RESULT_NAME, TRAJECTORY_NAME};
use reflector::io::config::ReflectorConfig;
use reflector::io::shutdown::StopSignal;
use reflector::io::state_store::{ProcessedJobsFile, WatermarksFile};
use reflector::reconcile::{LoopMode, LoopStop, Reconciler};
use reflector::report::{JobDecision, PipelineOutcome};
use reflector::stages::reflection::FEEDBACK_FILE;
use reflector::test_support::{JobTreeBuilder, ScriptedAgent, ScriptedPublisher, ScriptedRun};

fn feedback_run(tree: &JobTreeBuilder, job_id: &str) -> ScriptedRun {
    ScriptedRun::writes(
        tree.archive_dir().join(job_id).join(FEEDBACK_FILE),
        "## Failure modes\n- gives up before running the tests\n",
        ExternalRun::exited(0),
    )
}

fn read_processed(tree: &JobTreeBuilder) -> ProcessedJobsFile {
    let raw = fs::read_to_string(tree.root().join(".processed_failed_jobs.json"))
        .expect("processed file");
    serde_json::from_str(&raw).expect("parse processed file")
}

fn read_watermarks(tree: &JobTreeBuilder) -> WatermarksFile {
    let raw = fs::read_to_string(tree.root().join(".failure_watermarks.json"))
        .expect("watermark file");
    serde_json::from_str(&raw).expect("parse watermark file")
}

#[test]
fn ten_failures_run_full_pipeline_once() {
    let tree = JobTreeBuilder::new().expect("tree");
    tree.write_spec().expect("spec");
    tree.failed_tasks("run1", 10).expect("tasks");
    // A passing task and an unfinished one stay out of the archive.
    tree.task("run1", "passed", Some("1"), true, true)
        .expect("passed");
    tree.task("run1", "running", None, true, false)
        .expect("running");

    let agent = ScriptedAgent::new(vec![
        feedback_run(&tree, "run1"),
        ScriptedRun::returns(ExternalRun::exited(0)),
    ]);
    let publisher = ScriptedPublisher::new(vec![Ok(ExternalRun::exited(0))]);
    let cfg = ReflectorConfig::default();

    let mut reconciler = Reconciler::new(tree.root(), &cfg, &agent, &publisher, StopSignal::new())
        .expect("reconciler");
    let mut reports = Vec::new();
    let outcome = reconciler
        .run(LoopMode::SinglePass, |report| reports.push(report.clone()))
        .expect("run");

    assert_eq!(outcome.stop, LoopStop::SinglePassDone);
    assert_eq!(reports.len(), 1);
    let report = &reports[0];
    assert_eq!(report.failed_tasks, 10);
    assert_eq!(report.newly_archived_count(), 10);
    assert_eq!(
        report.triggered().get("run1"),
        Some(&PipelineOutcome::Published)
    );

    for i in 0..10 {
        let task_dir = tree.archive_dir().join("run1").join(format!("task-{i:03}"));
        assert!(task_dir.join(TRAJECTORY_NAME).is_file());
        assert!(task_dir.join(TEST_RESULT_NAME).is_file());
    }
    assert!(!tree.archive_dir().join("run1/passed").exists());
    assert!(!tree.archive_dir().join("run1/running").exists());
    assert!(tree.archive_dir().join("run1").join(FEEDBACK_FILE).is_file());

    let tasks = agent.tasks();
    assert_eq!(tasks.len(), 2);
    assert!(tasks[0].instruction.contains("failed-jobs/run1"));
    assert!(tasks[1].instruction.contains("nanocode/nanocode.py"));
    assert_eq!(publisher.requests().len(), 1);

    assert_eq!(read_processed(&tree).processed_jobs, vec!["run1".to_string()]);
    assert_eq!(read_watermarks(&tree).watermarks.get("run1"), Some(&10));
}

#[test]
fn rerun_after_restart_archives_nothing_and_does_not_retrigger() {
    let tree = JobTreeBuilder::new().expect("tree");
    tree.write_spec().expect("spec");
    tree.failed_tasks("run1", 10).expect("tasks");
    let cfg = ReflectorConfig::default();

    {
        let agent = ScriptedAgent::new(vec![
            feedback_run(&tree, "run1"),
            ScriptedRun::returns(ExternalRun::exited(0)),
        ]);
        let publisher = ScriptedPublisher::new(vec![Ok(ExternalRun::exited(0))]);
        let mut first = Reconciler::new(tree.root(), &cfg, &agent, &publisher, StopSignal::new())
            .expect("reconciler");
        first.run_iteration().expect("first pass");
    }

    let agent = ScriptedAgent::new(Vec::new());
    let publisher = ScriptedPublisher::new(Vec::new());
    let mut second = Reconciler::new(tree.root(), &cfg, &agent, &publisher, StopSignal::new())
        .expect("reconciler");
    let report = second.run_iteration().expect("second pass");

    assert_eq!(report.failed_tasks, 10);
    assert_eq!(report.newly_archived_count(), 0);
    assert_eq!(report.jobs[0].decision, JobDecision::AlreadyProcessed);
    assert!(agent.tasks().is_empty());
    assert!(publisher.requests().is_empty());
}

#[test]
fn one_job_failing_does_not_block_another() {
    let tree = JobTreeBuilder::new().expect("tree");
    tree.write_spec().expect("spec");
    tree.failed_tasks("job-a", 10).expect("tasks");
    tree.failed_tasks("job-b", 12).expect("tasks");

    // job-a: feedback but the mutation agent crashes. job-b: everything works.
    let agent = ScriptedAgent::new(vec![
        feedback_run(&tree, "job-a"),
        ScriptedRun::fails("agent binary vanished"),
        feedback_run(&tree, "job-b"),
        ScriptedRun::returns(ExternalRun::exited(0)),
    ]);
    let publisher = ScriptedPublisher::new(vec![Ok(ExternalRun::exited(0))]);
    let cfg = ReflectorConfig::default();
    let mut reconciler = Reconciler::new(tree.root(), &cfg, &agent, &publisher, StopSignal::new())
        .expect("reconciler");

    let report = reconciler.run_iteration().expect("iteration");
    let triggered = report.triggered();
    assert_eq!(triggered.get("job-a"), Some(&PipelineOutcome::MutationFailed));
    assert_eq!(triggered.get("job-b"), Some(&PipelineOutcome::Published));

    let processed = read_processed(&tree).processed_jobs;
    assert_eq!(processed, vec!["job-b".to_string()]);
    let watermarks = read_watermarks(&tree).watermarks;
    assert_eq!(watermarks.get("job-a"), Some(&10));
    assert_eq!(watermarks.get("job-b"), Some(&12));
}

#[test]
fn unpublished_job_retriggers_at_next_multiple_after_restart() {
    let tree = JobTreeBuilder::new().expect("tree");
    tree.write_spec().expect("spec");
    tree.failed_tasks("run1", 10).expect("tasks");
    let cfg = ReflectorConfig::default();

    {
        let agent = ScriptedAgent::new(vec![
            feedback_run(&tree, "run1"),
            ScriptedRun::returns(ExternalRun::exited(0)),
        ]);
        let publisher = ScriptedPublisher::new(vec![Ok(ExternalRun::exited(1))]);
        let mut reconciler =
            Reconciler::new(tree.root(), &cfg, &agent, &publisher, StopSignal::new())
                .expect("reconciler");
        let report = reconciler.run_iteration().expect("ten");
        assert_eq!(
            report.triggered().get("run1"),
            Some(&PipelineOutcome::PublishFailed)
        );
    }

    tree.failed_tasks_from("run1", 10, 9).expect("more tasks");
    let agent = ScriptedAgent::new(vec![
        feedback_run(&tree, "run1"),
        ScriptedRun::returns(ExternalRun::exited(0)),
    ]);
    let publisher = ScriptedPublisher::new(vec![Ok(ExternalRun::exited(0))]);
    let mut reconciler = Reconciler::new(tree.root(), &cfg, &agent, &publisher, StopSignal::new())
        .expect("reconciler");

    let at_nineteen = reconciler.run_iteration().expect("nineteen");
    assert_eq!(at_nineteen.newly_archived_count(), 9);
    assert_eq!(
        at_nineteen.jobs[0].decision,
        JobDecision::UpToDate { watermark: 10 }
    );
    assert!(agent.tasks().is_empty());

    tree.failed_tasks_from("run1", 19, 1).expect("twentieth");
    let at_twenty = reconciler.run_iteration().expect("twenty");
    assert_eq!(
        at_twenty.triggered().get("run1"),
        Some(&PipelineOutcome::Published)
    );
    assert_eq!(read_watermarks(&tree).watermarks.get("run1"), Some(&20));
}

#[test]
fn in_memory_watermarks_forget_crossings_on_restart() {
    let tree = JobTreeBuilder::new().expect("tree");
    tree.write_spec().expect("spec");
    tree.failed_tasks("run1", 10).expect("tasks");
    let cfg = ReflectorConfig {
        persist_watermarks: false,
        ..ReflectorConfig::default()
    };

    for _ in 0..2 {
        let agent = ScriptedAgent::new(vec![
            feedback_run(&tree, "run1"),
            ScriptedRun::returns(ExternalRun::exited(1)),
        ]);
        let publisher = ScriptedPublisher::new(Vec::new());
        let mut reconciler =
            Reconciler::new(tree.root(), &cfg, &agent, &publisher, StopSignal::new())
                .expect("reconciler");
        let report = reconciler.run_iteration().expect("iteration");
        assert_eq!(
            report.triggered().get("run1"),
            Some(&PipelineOutcome::MutationFailed)
        );
    }
    assert!(!tree.root().join(".failure_watermarks.json").exists());
}

//! Failure-driven self-improvement loop for a coding agent.
//!
//! Watches `jobs/` for failed benchmark tasks, archives them into
//! `failed-jobs/`, and revises the agent's behavior specification each time a
//! job crosses a new multiple of the trigger threshold.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use reflector::exit_codes;
use reflector::io::agent::MicrocodeAgent;
use reflector::io::config::{DEFAULT_CONFIG_FILE, ReflectorConfig, ReflectorPaths, load_config};
use reflector::io::publisher::CommandPublisher;
use reflector::io::shutdown::{StopSignal, install_signal_handler};
use reflector::io::state_store::ProcessedJobSet;
use reflector::logging;
use reflector::reconcile::{LoopMode, Reconciler};

#[derive(Parser, Debug)]
#[command(
    name = "reflector",
    version,
    about = "Reflect on failed benchmark runs and revise the agent specification"
)]
struct Cli {
    /// Config file (missing file means defaults).
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    /// Run a single iteration and exit.
    #[arg(long)]
    one_shot: bool,
    /// Seconds between scans in continuous mode.
    #[arg(long, value_name = "SECS")]
    poll_interval: Option<u64>,
    /// Forget which jobs were already processed before starting.
    #[arg(long)]
    reset_processed: bool,
    /// Benchmark job tree to scan.
    #[arg(long, value_name = "DIR")]
    jobs_dir: Option<PathBuf>,
    /// Archive root for failed-task artifacts and feedback.
    #[arg(long, value_name = "DIR")]
    archive_dir: Option<PathBuf>,
    /// Failures per job that make one crossing.
    #[arg(long, value_name = "N")]
    threshold: Option<u64>,
}

impl Cli {
    fn apply_overrides(&self, cfg: &mut ReflectorConfig) {
        if let Some(secs) = self.poll_interval {
            cfg.poll_interval_secs = secs;
        }
        if let Some(dir) = &self.jobs_dir {
            cfg.jobs_dir.clone_from(dir);
        }
        if let Some(dir) = &self.archive_dir {
            cfg.archive_dir.clone_from(dir);
        }
        if let Some(threshold) = self.threshold {
            cfg.trigger_threshold = threshold;
        }
    }

    fn mode(&self) -> LoopMode {
        if self.one_shot {
            LoopMode::SinglePass
        } else {
            LoopMode::Continuous
        }
    }
}

fn main() {
    let cli = Cli::parse();
    logging::init();
    match run(&cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run(cli: &Cli) -> Result<i32> {
    let stop = StopSignal::new();
    install_signal_handler(&stop)?;

    let mut cfg = load_config(&cli.config)?;
    cli.apply_overrides(&mut cfg);
    cfg.validate().context("invalid configuration")?;

    let root = std::env::current_dir().context("resolve working directory")?;
    let paths = ReflectorPaths::new(&root, &cfg);
    if cli.reset_processed && ProcessedJobSet::reset(&paths.processed_file)? {
        warn!(path = %paths.processed_file.display(), "processed job list reset");
    }

    let agent = MicrocodeAgent::new(cfg.agent.clone());
    let publisher =
        CommandPublisher::new(cfg.publish.command.clone(), cfg.publish.output_limit_bytes);
    let mut reconciler = Reconciler::new(&root, &cfg, &agent, &publisher, stop.clone())?;

    info!(
        jobs_dir = %paths.jobs_dir.display(),
        archive_dir = %paths.archive_dir.display(),
        threshold = cfg.trigger_threshold,
        one_shot = cli.one_shot,
        "reflector started"
    );
    let outcome = reconciler.run(cli.mode(), |report| print!("{report}"))?;
    info!(iterations = outcome.iterations, stop = ?outcome.stop, "reflector finished");

    if stop.is_stopped() {
        return Ok(exit_codes::INTERRUPTED);
    }
    Ok(exit_codes::OK)
}

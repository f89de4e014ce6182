//! Reflector configuration stored in `reflector.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::crossing::DEFAULT_TRIGGER_THRESHOLD;

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "reflector.toml";

/// Reflector configuration (TOML).
///
/// Missing fields default to the values the benchmark pipeline expects, so an
/// absent file is a valid configuration. Relative paths are resolved against
/// the working directory passed to [`ReflectorPaths::new`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReflectorConfig {
    /// Job tree written by the benchmark runner.
    pub jobs_dir: PathBuf,
    /// Archive of failed-task artifacts and per-job feedback.
    pub archive_dir: PathBuf,
    /// Persisted processed-job set.
    pub processed_file: PathBuf,
    /// Persisted per-job watermarks.
    pub watermark_file: PathBuf,
    /// Keep watermarks across restarts. When false they live in memory only.
    pub persist_watermarks: bool,
    /// Per-stage subprocess logs.
    pub log_dir: PathBuf,
    /// Seconds between scans in continuous mode.
    pub poll_interval_secs: u64,
    /// Failures per analysis crossing.
    pub trigger_threshold: u64,

    pub agent: AgentConfig,
    pub mutation: MutationConfig,
    pub publish: PublishConfig,
}

/// Reasoning-agent invocation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    pub program: String,
    /// Primary model identifier (`--lm`).
    pub lm: String,
    /// Secondary model identifier (`--sub-lm`).
    pub sub_lm: String,
    pub max_iterations: u32,
    pub max_tokens: u32,
    pub verbose: bool,
    /// Environment variable holding the API credential.
    pub api_key_env: String,
    /// Fixed flags appended after the standard ones.
    pub extra_args: Vec<String>,
    pub timeout_secs: u64,
    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

/// Specification mutation settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MutationConfig {
    /// Versioned behavior specification revised by the agent.
    pub spec_path: PathBuf,
    /// Name of the signature class inside the specification.
    pub signature_name: String,
    /// Human-readable names of the fields the agent may revise.
    pub mutable_fields: Vec<String>,
}

/// Publish command settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PublishConfig {
    /// Command argv (e.g. `["uv","run","nanocode.py"]`).
    pub command: Vec<String>,
    /// Directory the command runs from.
    pub workdir: PathBuf,
    pub timeout_secs: u64,
    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

impl Default for ReflectorConfig {
    fn default() -> Self {
        Self {
            jobs_dir: PathBuf::from("jobs"),
            archive_dir: PathBuf::from("failed-jobs"),
            processed_file: PathBuf::from(".processed_failed_jobs.json"),
            watermark_file: PathBuf::from(".failure_watermarks.json"),
            persist_watermarks: true,
            log_dir: PathBuf::from(".reflector/logs"),
            poll_interval_secs: 10,
            trigger_threshold: DEFAULT_TRIGGER_THRESHOLD,
            agent: AgentConfig::default(),
            mutation: MutationConfig::default(),
            publish: PublishConfig::default(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: "microcode".to_string(),
            lm: "openai/gpt-5.2".to_string(),
            sub_lm: "qwen/qwen3-coder".to_string(),
            max_iterations: 30,
            max_tokens: 30_000,
            verbose: true,
            api_key_env: "OPENROUTER_API_KEY".to_string(),
            extra_args: Vec::new(),
            timeout_secs: 1500,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for MutationConfig {
    fn default() -> Self {
        Self {
            spec_path: PathBuf::from("nanocode/nanocode.py"),
            signature_name: "CodingAssistant".to_string(),
            mutable_fields: vec![
                "The class docstring (the main system prompt)".to_string(),
                "The task field description".to_string(),
                "The answer field description".to_string(),
            ],
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            command: vec!["uv".to_string(), "run".to_string(), "nanocode.py".to_string()],
            workdir: PathBuf::from("nanocode"),
            timeout_secs: 300,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl ReflectorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.trigger_threshold == 0 {
            return Err(anyhow!("trigger_threshold must be > 0"));
        }
        if self.poll_interval_secs == 0 {
            return Err(anyhow!("poll_interval_secs must be > 0"));
        }
        if self.agent.program.trim().is_empty() {
            return Err(anyhow!("agent.program must be non-empty"));
        }
        if self.agent.timeout_secs == 0 {
            return Err(anyhow!("agent.timeout_secs must be > 0"));
        }
        if self.agent.output_limit_bytes == 0 {
            return Err(anyhow!("agent.output_limit_bytes must be > 0"));
        }
        if self.mutation.mutable_fields.is_empty() {
            return Err(anyhow!("mutation.mutable_fields must list at least one field"));
        }
        if self.publish.command.is_empty() || self.publish.command[0].trim().is_empty() {
            return Err(anyhow!("publish.command must be a non-empty array"));
        }
        if self.publish.timeout_secs == 0 {
            return Err(anyhow!("publish.timeout_secs must be > 0"));
        }
        if self.publish.output_limit_bytes == 0 {
            return Err(anyhow!("publish.output_limit_bytes must be > 0"));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Absolute locations derived from a config and a working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectorPaths {
    pub root: PathBuf,
    pub jobs_dir: PathBuf,
    pub archive_dir: PathBuf,
    pub processed_file: PathBuf,
    pub watermark_file: PathBuf,
    pub log_dir: PathBuf,
    pub spec_path: PathBuf,
    pub publish_workdir: PathBuf,
}

impl ReflectorPaths {
    pub fn new(root: &Path, cfg: &ReflectorConfig) -> Self {
        Self {
            root: root.to_path_buf(),
            jobs_dir: root.join(&cfg.jobs_dir),
            archive_dir: root.join(&cfg.archive_dir),
            processed_file: root.join(&cfg.processed_file),
            watermark_file: root.join(&cfg.watermark_file),
            log_dir: root.join(&cfg.log_dir),
            spec_path: root.join(&cfg.mutation.spec_path),
            publish_workdir: root.join(&cfg.publish.workdir),
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `ReflectorConfig::default()`.
pub fn load_config(path: &Path) -> Result<ReflectorConfig> {
    if !path.exists() {
        let cfg = ReflectorConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: ReflectorConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, ReflectorConfig::default());
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("reflector.toml");
        fs::write(
            &path,
            "trigger_threshold = 5\n\n[agent]\nlm = \"anthropic/claude\"\n",
        )
        .expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.trigger_threshold, 5);
        assert_eq!(cfg.agent.lm, "anthropic/claude");
        assert_eq!(cfg.agent.sub_lm, AgentConfig::default().sub_lm);
        assert_eq!(cfg.publish, PublishConfig::default());
    }

    #[test]
    fn zero_threshold_is_rejected() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("reflector.toml");
        fs::write(&path, "trigger_threshold = 0\n").expect("write");

        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("trigger_threshold"));
    }

    #[test]
    fn empty_publish_command_is_rejected() {
        let cfg = ReflectorConfig {
            publish: PublishConfig {
                command: Vec::new(),
                ..PublishConfig::default()
            },
            ..ReflectorConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn publish_output_limit_is_configurable() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("reflector.toml");
        fs::write(&path, "[publish]\noutput_limit_bytes = 2048\n").expect("write");

        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.publish.output_limit_bytes, 2048);
        assert_eq!(cfg.publish.command, PublishConfig::default().command);

        let zero = ReflectorConfig {
            publish: PublishConfig {
                output_limit_bytes: 0,
                ..PublishConfig::default()
            },
            ..ReflectorConfig::default()
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn paths_resolve_against_root() {
        let cfg = ReflectorConfig::default();
        let paths = ReflectorPaths::new(Path::new("/work"), &cfg);
        assert_eq!(paths.jobs_dir, Path::new("/work/jobs"));
        assert_eq!(paths.archive_dir, Path::new("/work/failed-jobs"));
        assert_eq!(paths.spec_path, Path::new("/work/nanocode/nanocode.py"));
        assert_eq!(paths.publish_workdir, Path::new("/work/nanocode"));
    }
}

//! Instruction templates handed to the reasoning agent.

use std::path::Path;

use anyhow::{Context, Result};
use minijinja::{Environment, context};

use crate::io::archiver::{TEST_RESULT_NAME, TRAJECTORY_NAME};

const REFLECTION_TEMPLATE: &str = include_str!("prompts/reflection.md");
const MUTATION_TEMPLATE: &str = include_str!("prompts/mutation.md");

/// Inputs for the feedback-report instruction.
#[derive(Debug, Clone)]
pub struct ReflectionInputs<'a> {
    pub job_id: &'a str,
    pub job_dir: &'a Path,
    pub feedback_path: &'a Path,
    pub failed_count: u64,
}

/// Inputs for the specification-revision instruction.
#[derive(Debug, Clone)]
pub struct MutationInputs<'a> {
    pub feedback_path: &'a Path,
    pub spec_path: &'a Path,
    pub signature_name: &'a str,
    pub mutable_fields: &'a [String],
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    pub fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("reflection", REFLECTION_TEMPLATE)
            .context("load reflection template")?;
        env.add_template("mutation", MUTATION_TEMPLATE)
            .context("load mutation template")?;
        Ok(Self { env })
    }

    pub fn render_reflection(&self, input: &ReflectionInputs<'_>) -> Result<String> {
        let template = self.env.get_template("reflection")?;
        let rendered = template.render(context! {
            job_id => input.job_id,
            job_dir => input.job_dir.display().to_string(),
            feedback_path => input.feedback_path.display().to_string(),
            failed_count => input.failed_count,
            trajectory_name => TRAJECTORY_NAME,
            test_result_name => TEST_RESULT_NAME,
        })?;
        Ok(rendered)
    }

    pub fn render_mutation(&self, input: &MutationInputs<'_>) -> Result<String> {
        let template = self.env.get_template("mutation")?;
        let rendered = template.render(context! {
            feedback_path => input.feedback_path.display().to_string(),
            spec_path => input.spec_path.display().to_string(),
            signature_name => input.signature_name,
            mutable_fields => input.mutable_fields,
        })?;
        Ok(rendered)
    }
}

//! CLI command implementations.

pub mod check_event;
pub mod synth;

use anyhow::{Context, Result};
use pipewright_config::{PipelineFile, VariableContext};
use pipewright_core::CloudAssembly;
use pipewright_core::secret::DynamicReferenceResolver;
use std::path::Path;
use tracing::info;

/// Variables seeded from the process environment and CLI overrides.
pub fn variables(account: Option<String>, region: Option<String>) -> VariableContext {
    let mut vars = VariableContext::new();
    vars.populate_env();
    vars.context.account = account;
    vars.context.region = region;
    vars
}

fn load(path: &Path, vars: VariableContext) -> Result<PipelineFile> {
    pipewright_config::load_file(path, vars)
        .with_context(|| format!("failed to load {}", path.display()))
}

fn synthesize(file: &PipelineFile) -> Result<CloudAssembly> {
    file.synthesize(&DynamicReferenceResolver)
        .context("synthesis failed")
}

pub fn validate(path: &Path, vars: VariableContext) -> Result<()> {
    let assembly = synthesize(&load(path, vars)?)?;
    info!(pipeline = %assembly.pipeline.name(), "Definition is valid");
    println!(
        "Configuration is valid: pipeline '{}' with {} stage(s), {} project(s)",
        assembly.pipeline.name(),
        assembly.pipeline.stages().len(),
        assembly.projects.len()
    );
    for step in assembly.pipeline.steps() {
        println!("  {}", step);
    }
    Ok(())
}

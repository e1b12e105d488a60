//! Self-mutating pipeline assembly.
//!
//! A pipeline runs, in order: its source, the synth step that regenerates the pipeline
//! definition, a self-mutation step that applies the regenerated definition, and then
//! each stage in declaration order.

use derive_more::Display;
use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info};

use crate::buildspec::BuildSpec;
use crate::source::{RepositoryRef, SourceBinding};
use crate::stage::Stage;
use crate::{Error, Result};

/// Phase that receives a synth step's own commands.
pub const SYNTH_COMMANDS_PHASE: &str = "build";

/// Build environment the synth step runs in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionEnvironment {
    /// Elevated mode, required to run container builds inside the synth step.
    pub privileged: bool,
}

/// The bootstrap build that regenerates the pipeline definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SynthStep {
    name: String,
    input: SourceBinding,
    build_spec: BuildSpec,
    environment: ExecutionEnvironment,
}

impl SynthStep {
    /// Combine a partial build spec with the step's own commands, which are appended
    /// to the `build` phase.
    pub fn new<S: Into<String>>(
        input: SourceBinding,
        partial_build_spec: BuildSpec,
        commands: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            name: "Synth".to_string(),
            input,
            build_spec: partial_build_spec.append_commands(SYNTH_COMMANDS_PHASE, commands),
            environment: ExecutionEnvironment::default(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input(&self) -> &SourceBinding {
        &self.input
    }

    pub fn build_spec(&self) -> &BuildSpec {
        &self.build_spec
    }

    pub fn environment(&self) -> ExecutionEnvironment {
        self.environment
    }
}

/// One step of the executed pipeline, in execution order.
#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum PipelineStep {
    #[display("Source({_0})")]
    Source(String),
    #[display("{_0}")]
    Synth(String),
    #[display("SelfMutate")]
    SelfMutate,
    #[display("Deploy({_0})")]
    Deploy(String),
}

/// An assembled, immutable pipeline graph.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineDefinition {
    name: String,
    definition_repository: RepositoryRef,
    synth: SynthStep,
    stages: Vec<Stage>,
}

impl PipelineDefinition {
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn definition_repository(&self) -> &RepositoryRef {
        &self.definition_repository
    }

    pub fn synth(&self) -> &SynthStep {
        &self.synth
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Steps in execution order. Stages run strictly one after another.
    pub fn steps(&self) -> Vec<PipelineStep> {
        let mut steps = vec![
            PipelineStep::Source(self.synth.input.repository().to_string()),
            PipelineStep::Synth(self.synth.name.clone()),
            PipelineStep::SelfMutate,
        ];
        steps.extend(
            self.stages
                .iter()
                .map(|s| PipelineStep::Deploy(s.name().to_string())),
        );
        steps
    }
}

/// Collects the parts of a pipeline and checks its invariants in one pass.
#[derive(Debug)]
pub struct PipelineBuilder {
    name: String,
    definition_repository: Option<RepositoryRef>,
    synth: Option<SynthStep>,
    docker_enabled_for_synth: bool,
    stages: Vec<Stage>,
}

impl PipelineBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            definition_repository: None,
            synth: None,
            docker_enabled_for_synth: false,
            stages: Vec::new(),
        }
    }

    /// Repository holding this pipeline's own definition. Defaults to the synth source.
    pub fn definition_repository(mut self, repository: RepositoryRef) -> Self {
        self.definition_repository = Some(repository);
        self
    }

    pub fn synth(mut self, step: SynthStep) -> Self {
        self.synth = Some(step);
        self
    }

    /// Run the synth step in a privileged environment so it can build containers.
    pub fn docker_enabled_for_synth(mut self, enabled: bool) -> Self {
        self.docker_enabled_for_synth = enabled;
        self
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stages(mut self, stages: impl IntoIterator<Item = Stage>) -> Self {
        self.stages.extend(stages);
        self
    }

    pub fn build(self) -> Result<PipelineDefinition> {
        if self.name.trim().is_empty() {
            return Err(Error::Assembly("pipeline name must not be empty".to_string()));
        }

        let mut synth = self.synth.ok_or_else(|| {
            Error::Assembly(format!("pipeline '{}' has no synth step source", self.name))
        })?;

        let definition_repository = match self.definition_repository {
            Some(repository) if &repository != synth.input.repository() => {
                return Err(Error::Assembly(format!(
                    "synth step of pipeline '{}' reads {} but the pipeline is defined in {}",
                    self.name,
                    synth.input.repository(),
                    repository
                )));
            }
            Some(repository) => repository,
            None => synth.input.repository().clone(),
        };

        if self.stages.is_empty() {
            return Err(Error::Assembly(format!(
                "pipeline '{}' has no stages",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for stage in &self.stages {
            if !seen.insert(stage.name()) {
                return Err(Error::Assembly(format!(
                    "pipeline '{}' declares stage '{}' more than once",
                    self.name,
                    stage.name()
                )));
            }
            debug!(
                pipeline = %self.name,
                stage = %stage.name(),
                units = stage.units().len(),
                "Added stage"
            );
        }

        if self.docker_enabled_for_synth {
            synth.environment.privileged = true;
        }

        info!(
            pipeline = %self.name,
            source = %definition_repository,
            stages = self.stages.len(),
            privileged = synth.environment.privileged,
            "Assembled pipeline"
        );

        Ok(PipelineDefinition {
            name: self.name,
            definition_repository,
            synth,
            stages: self.stages,
        })
    }
}

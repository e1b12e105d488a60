//! Pipeline definition parsing.
//!
//! A definition file declares credentials, build specs, one self-mutating pipeline and
//! any number of standalone projects:
//!
//! ```kdl
//! context account="123456789012" region="us-east-1"
//! credential "github" store="arn:aws:secretsmanager:${context.region}:${context.account}:secret:Token" field="access-token"
//!
//! buildspec "synth" {
//!     phase "install" { run "npm ci"; }
//!     phase "build" { run "npx cdk synth"; }
//! }
//!
//! pipeline "BlogPipeline" docker-enabled-for-synth=#true {
//!     source owner="meadf" repo="blog-pipeline" branch="main" credential="github"
//!     synth buildspec="synth"
//!     stage "BlogPipelineStage" { stack "QueueStack"; }
//! }
//! ```

use crate::variables::VariableContext;
use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode, KdlValue};
use pipewright_core::buildspec::BuildSpec;
use pipewright_core::pipeline::{PipelineDefinition, SynthStep};
use pipewright_core::project::Project;
use pipewright_core::secret::{CredentialRef, CredentialResolver, SecretHandle};
use pipewright_core::source::{RepositoryRef, SourceBinding};
use pipewright_core::stage::DeployableUnit;
use pipewright_core::synth::SourceCredentials;
use pipewright_core::webhook::{EventAction, FilterGroup};
use pipewright_core::{CloudAssembly, SynthContext, Synthesizer};
use std::collections::HashSet;
use std::path::Path;
use tracing::{debug, info};

/// Raw phases of a build spec, validated when the spec is composed.
pub type PhaseList = Vec<(String, Vec<String>)>;

/// Where a source binding points and which credential it uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub credential: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthConfig {
    pub name: Option<String>,
    pub buildspec: String,
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageConfig {
    pub name: String,
    pub stacks: Vec<DeployableUnit>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub name: String,
    pub definition_repository: Option<String>,
    pub docker_enabled_for_synth: bool,
    pub source: SourceConfig,
    pub synth: SynthConfig,
    pub stages: Vec<StageConfig>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectConfig {
    pub name: String,
    pub source: SourceConfig,
    pub buildspec: String,
    pub concurrent_build_limit: i64,
    pub report_build_status: bool,
    pub filter_groups: Vec<FilterGroup>,
}

/// A parsed definition file, with all variables interpolated.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineFile {
    pub context: SynthContext,
    pub credentials: Vec<(String, CredentialRef)>,
    pub source_credentials: Option<String>,
    pub buildspecs: Vec<(String, PhaseList)>,
    pub pipeline: PipelineConfig,
    pub projects: Vec<ProjectConfig>,
}

/// Read and parse a definition file.
pub fn load_file(path: impl AsRef<Path>, vars: VariableContext) -> ConfigResult<PipelineFile> {
    let path = path.as_ref();
    info!(path = %path.display(), "Loading pipeline definition");
    let text = std::fs::read_to_string(path)?;
    parse_definition(&text, vars)
}

/// Parse a definition from KDL text.
///
/// Account and region already set in `vars` take precedence over the file's `context`
/// node.
pub fn parse_definition(kdl: &str, mut vars: VariableContext) -> ConfigResult<PipelineFile> {
    let doc: KdlDocument = kdl.parse()?;

    // Context and variables first so every other node can reference them.
    for node in doc.nodes() {
        match node.name().value() {
            "context" => {
                if vars.context.account.is_none() {
                    vars.context.account = get_context_prop(node, "account", &vars);
                }
                if vars.context.region.is_none() {
                    vars.context.region = get_context_prop(node, "region", &vars);
                }
            }
            "var" => {
                for (key, value) in get_string_props(node, &vars) {
                    vars.set(&key, value);
                }
            }
            _ => {}
        }
    }

    let mut credentials: Vec<(String, CredentialRef)> = Vec::new();
    let mut source_credentials = None;
    let mut buildspecs: Vec<(String, PhaseList)> = Vec::new();
    let mut pipeline = None;
    let mut projects: Vec<ProjectConfig> = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "credential" => {
                let name = required_name(node, "credential", &vars)?;
                if credentials.iter().any(|(n, _)| *n == name) {
                    return Err(ConfigError::Duplicate(format!("credential '{}'", name)));
                }
                let store = get_string_prop(node, "store", &vars).ok_or_else(|| {
                    ConfigError::MissingField(format!("store for credential '{}'", name))
                })?;
                let field = get_string_prop(node, "field", &vars).ok_or_else(|| {
                    ConfigError::MissingField(format!("field for credential '{}'", name))
                })?;
                for (key, value) in [("store", &store), ("field", &field)] {
                    let missing = vars.unresolved(value);
                    if !missing.is_empty() {
                        return Err(ConfigError::InvalidValue {
                            field: key.to_string(),
                            message: format!(
                                "credential '{}' references unset variables: {}",
                                name,
                                missing.join(", ")
                            ),
                        });
                    }
                }
                credentials.push((name, CredentialRef::new(store, field)));
            }
            "source-credentials" => {
                if source_credentials.is_some() {
                    return Err(ConfigError::Duplicate("source-credentials".to_string()));
                }
                source_credentials = Some(required_name(node, "source-credentials", &vars)?);
            }
            "buildspec" => {
                let name = required_name(node, "buildspec", &vars)?;
                if buildspecs.iter().any(|(n, _)| *n == name) {
                    return Err(ConfigError::Duplicate(format!("buildspec '{}'", name)));
                }
                let phases = parse_phases(node, &vars)?;
                buildspecs.push((name, phases));
            }
            "pipeline" => {
                if pipeline.is_some() {
                    return Err(ConfigError::Duplicate("pipeline".to_string()));
                }
                pipeline = Some(parse_pipeline(node, &vars)?);
            }
            "project" => {
                let project = parse_project(node, &vars)?;
                if projects.iter().any(|p| p.name == project.name) {
                    return Err(ConfigError::Duplicate(format!("project '{}'", project.name)));
                }
                projects.push(project);
            }
            "context" | "var" => {}
            other => return Err(unknown_node(other, "definition")),
        }
    }

    let pipeline = pipeline.ok_or_else(|| ConfigError::MissingField("pipeline".to_string()))?;

    let file = PipelineFile {
        context: vars.context,
        credentials,
        source_credentials,
        buildspecs,
        pipeline,
        projects,
    };
    file.check_references()?;

    debug!(
        credentials = file.credentials.len(),
        buildspecs = file.buildspecs.len(),
        projects = file.projects.len(),
        "Parsed pipeline definition"
    );
    Ok(file)
}

impl PipelineFile {
    fn check_references(&self) -> ConfigResult<()> {
        let credentials: HashSet<&str> = self.credentials.iter().map(|(n, _)| n.as_str()).collect();
        let buildspecs: HashSet<&str> = self.buildspecs.iter().map(|(n, _)| n.as_str()).collect();

        let mut credential_refs: Vec<(&str, &str)> = vec![(
            self.pipeline.name.as_str(),
            self.pipeline.source.credential.as_str(),
        )];
        let mut buildspec_refs: Vec<(&str, &str)> = vec![(
            self.pipeline.name.as_str(),
            self.pipeline.synth.buildspec.as_str(),
        )];
        for project in &self.projects {
            credential_refs.push((project.name.as_str(), project.source.credential.as_str()));
            buildspec_refs.push((project.name.as_str(), project.buildspec.as_str()));
        }
        if let Some(name) = &self.source_credentials {
            credential_refs.push(("source-credentials", name.as_str()));
        }

        for (owner, name) in credential_refs {
            if !credentials.contains(name) {
                return Err(ConfigError::InvalidReference(format!(
                    "'{}' uses unknown credential '{}'",
                    owner, name
                )));
            }
        }
        for (owner, name) in buildspec_refs {
            if !buildspecs.contains(name) {
                return Err(ConfigError::InvalidReference(format!(
                    "'{}' uses unknown buildspec '{}'",
                    owner, name
                )));
            }
        }
        Ok(())
    }

    fn credential(&self, synth: &Synthesizer<'_>, name: &str) -> ConfigResult<SecretHandle> {
        let reference = self
            .credentials
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, r)| r)
            .ok_or_else(|| ConfigError::InvalidReference(format!("credential '{}'", name)))?;
        Ok(synth.resolve(reference)?)
    }

    fn buildspec(&self, name: &str) -> ConfigResult<BuildSpec> {
        let phases = self
            .buildspecs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, p)| p)
            .ok_or_else(|| ConfigError::InvalidReference(format!("buildspec '{}'", name)))?;
        Ok(BuildSpec::compose(phases.iter().cloned())?)
    }

    fn source(&self, synth: &Synthesizer<'_>, source: &SourceConfig) -> ConfigResult<SourceBinding> {
        let credential = self.credential(synth, &source.credential)?;
        Ok(SourceBinding::github(
            &source.owner,
            &source.repo,
            &source.branch,
            credential,
        )?)
    }

    /// Run the synthesis pass. Fails on the first violated invariant.
    pub fn synthesize(&self, resolver: &dyn CredentialResolver) -> ConfigResult<CloudAssembly> {
        let synth = Synthesizer::new(self.context.clone(), resolver);
        let config = &self.pipeline;

        let mut step = SynthStep::new(
            self.source(&synth, &config.source)?,
            self.buildspec(&config.synth.buildspec)?,
            config.synth.commands.iter().cloned(),
        );
        if let Some(name) = &config.synth.name {
            step = step.with_name(name);
        }

        let mut builder = PipelineDefinition::builder(&config.name)
            .synth(step)
            .docker_enabled_for_synth(config.docker_enabled_for_synth);
        if let Some(full_name) = &config.definition_repository {
            builder = builder.definition_repository(RepositoryRef::parse(full_name)?);
        }
        for stage in &config.stages {
            builder = builder.stage(synth.stage(&stage.name, &stage.stacks)?);
        }
        let pipeline = builder.build()?;

        let mut projects = Vec::with_capacity(self.projects.len());
        for project in &self.projects {
            let mut source = self
                .source(&synth, &project.source)?
                .with_webhook_filters(project.filter_groups.iter().cloned());
            if !project.report_build_status {
                source = source.without_build_status_reports();
            }
            projects.push(Project::new(
                &project.name,
                source,
                self.buildspec(&project.buildspec)?,
                project.concurrent_build_limit,
            )?);
        }

        let source_credentials = match &self.source_credentials {
            Some(name) => Some(SourceCredentials::github(self.credential(&synth, name)?)),
            None => None,
        };

        Ok(synth.assemble(pipeline, projects, source_credentials)?)
    }
}

fn parse_phases(node: &KdlNode, vars: &VariableContext) -> ConfigResult<PhaseList> {
    let mut phases = Vec::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            if child.name().value() != "phase" {
                return Err(unknown_node(child.name().value(), "buildspec"));
            }
            let name = required_name(child, "phase", vars)?;
            phases.push((name, get_run_commands(child, vars)?));
        }
    }
    Ok(phases)
}

fn parse_pipeline(node: &KdlNode, vars: &VariableContext) -> ConfigResult<PipelineConfig> {
    let name = required_name(node, "pipeline", vars)?;
    let docker_enabled_for_synth = get_bool_prop(node, "docker-enabled-for-synth").unwrap_or(false);
    let definition_repository = get_string_prop(node, "definition", vars);

    let mut source = None;
    let mut synth = None;
    let mut stages = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "source" => source = Some(parse_source(child, vars)?),
                "synth" => {
                    let buildspec = get_string_prop(child, "buildspec", vars).ok_or_else(|| {
                        ConfigError::MissingField(format!("buildspec for synth of '{}'", name))
                    })?;
                    synth = Some(SynthConfig {
                        name: get_string_prop(child, "name", vars),
                        buildspec,
                        commands: get_run_commands(child, vars)?,
                    });
                }
                "stage" => {
                    let stage_name = required_name(child, "stage", vars)?;
                    let stacks = child
                        .children()
                        .map(|c| {
                            c.nodes()
                                .iter()
                                .map(|n| match n.name().value() {
                                    "stack" => parse_stack(n, vars),
                                    other => Err(unknown_node(other, "stage")),
                                })
                                .collect::<ConfigResult<Vec<_>>>()
                        })
                        .transpose()?
                        .unwrap_or_default();
                    stages.push(StageConfig {
                        name: stage_name,
                        stacks,
                    });
                }
                other => return Err(unknown_node(other, "pipeline")),
            }
        }
    }

    Ok(PipelineConfig {
        source: source
            .ok_or_else(|| ConfigError::MissingField(format!("source for pipeline '{}'", name)))?,
        synth: synth
            .ok_or_else(|| ConfigError::MissingField(format!("synth for pipeline '{}'", name)))?,
        name,
        definition_repository,
        docker_enabled_for_synth,
        stages,
    })
}

fn parse_stack(node: &KdlNode, vars: &VariableContext) -> ConfigResult<DeployableUnit> {
    let name = required_name(node, "stack", vars)?;
    let properties: serde_json::Map<String, serde_json::Value> = node
        .entries()
        .iter()
        .filter_map(|e| {
            e.name()
                .map(|n| (n.value().to_string(), to_json(e.value(), vars)))
        })
        .collect();
    Ok(DeployableUnit::new(name).with_properties(serde_json::Value::Object(properties)))
}

fn parse_project(node: &KdlNode, vars: &VariableContext) -> ConfigResult<ProjectConfig> {
    let name = required_name(node, "project", vars)?;
    let buildspec = get_string_prop(node, "buildspec", vars)
        .ok_or_else(|| ConfigError::MissingField(format!("buildspec for project '{}'", name)))?;

    let concurrent_build_limit = match node.get("concurrent-build-limit") {
        None => 1,
        Some(value) => value
            .as_integer()
            .and_then(|i| i64::try_from(i).ok())
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "concurrent-build-limit".to_string(),
                message: format!("expected an integer, got {:?}", value),
            })?,
    };
    let report_build_status = get_bool_prop(node, "report-build-status").unwrap_or(true);

    let mut source = None;
    let mut filter_groups = Vec::new();
    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "source" => source = Some(parse_source(child, vars)?),
                "filter-group" => filter_groups.push(parse_filter_group(child, vars)?),
                other => return Err(unknown_node(other, "project")),
            }
        }
    }

    Ok(ProjectConfig {
        source: source
            .ok_or_else(|| ConfigError::MissingField(format!("source for project '{}'", name)))?,
        name,
        buildspec,
        concurrent_build_limit,
        report_build_status,
        filter_groups,
    })
}

fn parse_source(node: &KdlNode, vars: &VariableContext) -> ConfigResult<SourceConfig> {
    let prop = |key: &str| {
        get_string_prop(node, key, vars)
            .ok_or_else(|| ConfigError::MissingField(format!("{} for source", key)))
    };
    Ok(SourceConfig {
        owner: prop("owner")?,
        repo: prop("repo")?,
        branch: prop("branch")?,
        credential: prop("credential")?,
    })
}

fn parse_filter_group(node: &KdlNode, vars: &VariableContext) -> ConfigResult<FilterGroup> {
    let children: Vec<&KdlNode> = node
        .children()
        .map(|c| c.nodes().iter().collect())
        .unwrap_or_default();

    let mut actions = Vec::new();
    for child in children.iter().filter(|c| c.name().value() == "event") {
        for raw in get_all_string_args(child, vars) {
            let action = EventAction::parse(&raw);
            if !action.is_recognized() {
                return Err(ConfigError::InvalidValue {
                    field: "event".to_string(),
                    message: format!("unknown event action: {}", raw),
                });
            }
            actions.push(action);
        }
    }
    if actions.is_empty() {
        return Err(ConfigError::MissingField("event for filter-group".to_string()));
    }

    let mut group = FilterGroup::in_event_of(actions);
    for child in children {
        let kind = child.name().value();
        if kind == "event" {
            continue;
        }
        let value = get_first_string_arg(child, vars)
            .ok_or_else(|| ConfigError::MissingField(format!("value for {}", kind)))?;
        group = match kind {
            "branch-is" => group.and_branch_is(value),
            "branch-is-not" => group.and_branch_is_not(value),
            "base-branch-is" => group.and_base_branch_is(value),
            "base-branch-is-not" => group.and_base_branch_is_not(value),
            "actor-is" => group.and_actor_is(value),
            "actor-is-not" => group.and_actor_is_not(value),
            other => {
                return Err(ConfigError::InvalidValue {
                    field: "filter-group".to_string(),
                    message: format!("unknown condition: {}", other),
                });
            }
        };
    }
    Ok(group)
}

// Helper functions for extracting values from KDL nodes

fn required_name(node: &KdlNode, kind: &str, vars: &VariableContext) -> ConfigResult<String> {
    get_first_string_arg(node, vars).ok_or_else(|| ConfigError::MissingField(format!("{} name", kind)))
}

fn get_first_string_arg(node: &KdlNode, vars: &VariableContext) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| vars.interpolate(s))
}

fn get_all_string_args(node: &KdlNode, vars: &VariableContext) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| vars.interpolate(s))
        .collect()
}

fn get_string_prop(node: &KdlNode, name: &str, vars: &VariableContext) -> Option<String> {
    node.get(name)
        .and_then(|v| v.as_string())
        .map(|s| vars.interpolate(s))
}

/// A context value whose variables all resolved. Anything else leaves the context unset.
fn get_context_prop(node: &KdlNode, name: &str, vars: &VariableContext) -> Option<String> {
    get_string_prop(node, name, vars).filter(|v| !v.is_empty() && vars.unresolved(v).is_empty())
}

fn get_string_props(node: &KdlNode, vars: &VariableContext) -> Vec<(String, String)> {
    node.entries()
        .iter()
        .filter_map(|e| {
            let name = e.name()?.value().to_string();
            let value = e.value().as_string()?;
            Some((name, vars.interpolate(value)))
        })
        .collect()
}

fn get_bool_prop(node: &KdlNode, name: &str) -> Option<bool> {
    node.get(name).and_then(|v| v.as_bool())
}

fn get_run_commands(node: &KdlNode, vars: &VariableContext) -> ConfigResult<Vec<String>> {
    let Some(children) = node.children() else {
        return Ok(Vec::new());
    };
    let mut commands = Vec::new();
    for child in children.nodes() {
        if child.name().value() != "run" {
            return Err(unknown_node(child.name().value(), node.name().value()));
        }
        let command = get_first_string_arg(child, vars).ok_or_else(|| {
            ConfigError::MissingField(format!("command for run in '{}'", node.name().value()))
        })?;
        commands.push(command);
    }
    Ok(commands)
}

fn unknown_node(name: &str, parent: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: parent.to_string(),
        message: format!("unknown node '{}'", name),
    }
}

fn to_json(value: &KdlValue, vars: &VariableContext) -> serde_json::Value {
    match value {
        KdlValue::String(s) => serde_json::Value::String(vars.interpolate(s)),
        KdlValue::Integer(i) => i64::try_from(*i)
            .map(serde_json::Value::from)
            .unwrap_or_else(|_| serde_json::Value::String(i.to_string())),
        KdlValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        KdlValue::Bool(b) => serde_json::Value::Bool(*b),
        KdlValue::Null => serde_json::Value::Null,
    }
}

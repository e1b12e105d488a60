//! Top-level synthesis: one pass from typed inputs to a [`CloudAssembly`].

use serde::Serialize;
use std::collections::HashSet;
use tracing::info;

use crate::context::SynthContext;
use crate::pipeline::PipelineDefinition;
use crate::project::Project;
use crate::secret::{CredentialRef, CredentialResolver, SecretHandle};
use crate::stage::{Stage, StageContent};
use crate::{Error, Result};

/// Account-level credentials the build service uses to reach the source provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceCredentials {
    pub provider: &'static str,
    pub access_token: SecretHandle,
}

impl SourceCredentials {
    pub fn github(access_token: SecretHandle) -> Self {
        Self {
            provider: "GitHub",
            access_token,
        }
    }
}

/// The complete output of a synthesis pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CloudAssembly {
    pub context: SynthContext,
    pub pipeline: PipelineDefinition,
    pub projects: Vec<Project>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_credentials: Option<SourceCredentials>,
}

impl CloudAssembly {
    pub fn project(&self, name: &str) -> Option<&Project> {
        self.projects.iter().find(|p| p.name() == name)
    }
}

/// Carries the synthesis context and the injected credential resolver.
///
/// Every credential in an assembly goes through the same resolver.
pub struct Synthesizer<'a> {
    context: SynthContext,
    resolver: &'a dyn CredentialResolver,
}

impl<'a> Synthesizer<'a> {
    pub fn new(context: SynthContext, resolver: &'a dyn CredentialResolver) -> Self {
        Self { context, resolver }
    }

    pub fn context(&self) -> &SynthContext {
        &self.context
    }

    pub fn resolve(&self, reference: &CredentialRef) -> Result<SecretHandle> {
        self.resolver.resolve(reference)
    }

    /// Build a stage whose units come from `content`.
    pub fn stage(&self, name: impl Into<String>, content: &dyn StageContent) -> Result<Stage> {
        Stage::from_content(name, content, &self.context)
    }

    pub fn assemble(
        &self,
        pipeline: PipelineDefinition,
        projects: Vec<Project>,
        source_credentials: Option<SourceCredentials>,
    ) -> Result<CloudAssembly> {
        let mut names = HashSet::new();
        for project in &projects {
            if !names.insert(project.name()) {
                return Err(Error::Assembly(format!(
                    "project '{}' is declared more than once",
                    project.name()
                )));
            }
        }

        info!(
            pipeline = %pipeline.name(),
            projects = projects.len(),
            account = ?self.context.account,
            region = ?self.context.region,
            "Synthesized cloud assembly"
        );

        Ok(CloudAssembly {
            context: self.context.clone(),
            pipeline,
            projects,
            source_credentials,
        })
    }
}

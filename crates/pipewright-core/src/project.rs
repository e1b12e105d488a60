//! Standalone build projects (e.g. pull request verification).

use serde::Serialize;
use std::num::NonZeroU32;

use crate::buildspec::BuildSpec;
use crate::source::SourceBinding;
use crate::webhook::{FilterGroup, SourceEvent};
use crate::{Error, Result};

/// Maximum number of simultaneous executions of one project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ConcurrencyLimit(NonZeroU32);

impl ConcurrencyLimit {
    pub fn new(limit: i64) -> Result<Self> {
        u32::try_from(limit)
            .ok()
            .and_then(NonZeroU32::new)
            .map(Self)
            .ok_or(Error::InvalidConcurrencyLimit(limit))
    }

    pub fn get(self) -> u32 {
        self.0.get()
    }
}

/// A build unit triggered by source events independently of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Project {
    name: String,
    source: SourceBinding,
    build_spec: BuildSpec,
    concurrent_build_limit: ConcurrencyLimit,
}

impl Project {
    pub fn new(
        name: impl Into<String>,
        source: SourceBinding,
        build_spec: BuildSpec,
        concurrent_build_limit: i64,
    ) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::Assembly("project name must not be empty".to_string()));
        }
        let concurrent_build_limit = ConcurrencyLimit::new(concurrent_build_limit)?;
        Ok(Self {
            name,
            source,
            build_spec,
            concurrent_build_limit,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn source(&self) -> &SourceBinding {
        &self.source
    }

    pub fn build_spec(&self) -> &BuildSpec {
        &self.build_spec
    }

    pub fn concurrent_build_limit(&self) -> u32 {
        self.concurrent_build_limit.get()
    }

    pub fn filter_groups(&self) -> &[FilterGroup] {
        self.source
            .webhook()
            .map(|w| w.filter_groups.as_slice())
            .unwrap_or(&[])
    }

    /// Whether `event` should start a build of this project.
    pub fn should_build(&self, event: &SourceEvent) -> bool {
        self.source.accepts(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::{CredentialRef, CredentialResolver, DynamicReferenceResolver};
    use crate::webhook::EventAction;

    fn source() -> SourceBinding {
        let token = DynamicReferenceResolver
            .resolve(&CredentialRef::new("GitHubToken", "access-token"))
            .unwrap();
        SourceBinding::github("meadf", "blog-pipeline", "main", token)
            .unwrap()
            .with_webhook_filters([FilterGroup::in_event_of(EventAction::pull_request_activity())
                .and_branch_is_not("main")])
    }

    fn spec() -> BuildSpec {
        BuildSpec::compose([("install", vec!["npm ci"]), ("build", vec!["npm run test"])]).unwrap()
    }

    #[test]
    fn test_concurrency_limit_validation() {
        for bad in [0, -1, -100, i64::from(u32::MAX) + 1] {
            let result = Project::new("PullRequestProject", source(), spec(), bad);
            assert_eq!(result.unwrap_err(), Error::InvalidConcurrencyLimit(bad));
        }
    }

    #[test]
    fn test_concurrency_limit_carried_unchanged() {
        let project = Project::new("PullRequestProject", source(), spec(), 1).unwrap();
        assert_eq!(project.concurrent_build_limit(), 1);

        let value = serde_json::to_value(&project).unwrap();
        assert_eq!(value["concurrent_build_limit"], 1);
    }

    #[test]
    fn test_should_build() {
        let project = Project::new("PullRequestProject", source(), spec(), 1).unwrap();
        assert_eq!(project.filter_groups().len(), 1);
        assert!(project.should_build(&SourceEvent::new(EventAction::PullRequestCreated, "feat")));
        assert!(!project.should_build(&SourceEvent::new(EventAction::Push, "feat")));
    }

    #[test]
    fn test_empty_name_rejected() {
        let result = Project::new("", source(), spec(), 1);
        assert!(matches!(result, Err(Error::Assembly(_))));
    }
}

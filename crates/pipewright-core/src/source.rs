//! Source repository bindings.

use derive_more::Display;
use serde::Serialize;

use crate::secret::SecretHandle;
use crate::webhook::{FilterGroup, SourceEvent, should_trigger};
use crate::{Error, Result};

/// An `owner/repo` pair identifying a GitHub repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Display)]
#[display("{owner}/{repo}")]
pub struct RepositoryRef {
    pub owner: String,
    pub repo: String,
}

impl RepositoryRef {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Result<Self> {
        let owner = owner.into();
        let repo = repo.into();
        for (label, value) in [("owner", &owner), ("repo", &repo)] {
            if value.trim().is_empty() {
                return Err(Error::InvalidSource(format!("{} must not be empty", label)));
            }
            if value.contains('/') {
                return Err(Error::InvalidSource(format!(
                    "{} '{}' must not contain '/'",
                    label, value
                )));
            }
        }
        Ok(Self { owner, repo })
    }

    /// Parse an `owner/repo` string.
    pub fn parse(full_name: &str) -> Result<Self> {
        let (owner, repo) = full_name.split_once('/').ok_or_else(|| {
            Error::InvalidSource(format!("'{}' is not of the form owner/repo", full_name))
        })?;
        Self::new(owner, repo)
    }
}

/// Webhook delivery settings for a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebhookTrigger {
    pub filter_groups: Vec<FilterGroup>,
    /// Whether build results are reported back as commit statuses.
    pub report_build_status: bool,
}

/// A bound version-control source: repository, branch and credential.
///
/// Fields are private; a binding cannot be re-pointed after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceBinding {
    #[serde(flatten)]
    repository: RepositoryRef,
    branch: String,
    authentication: SecretHandle,
    #[serde(skip_serializing_if = "Option::is_none")]
    webhook: Option<WebhookTrigger>,
}

impl SourceBinding {
    pub fn github(
        owner: impl Into<String>,
        repo: impl Into<String>,
        branch: impl Into<String>,
        credential: SecretHandle,
    ) -> Result<Self> {
        let repository = RepositoryRef::new(owner, repo)?;
        let branch = branch.into();
        if branch.trim().is_empty() {
            return Err(Error::InvalidSource(format!(
                "branch for {} must not be empty",
                repository
            )));
        }
        Ok(Self {
            repository,
            branch,
            authentication: credential,
            webhook: None,
        })
    }

    /// Route inbound events through `filter_groups` before invoking a build.
    pub fn with_webhook_filters(mut self, filter_groups: impl IntoIterator<Item = FilterGroup>) -> Self {
        self.webhook = Some(WebhookTrigger {
            filter_groups: filter_groups.into_iter().collect(),
            report_build_status: true,
        });
        self
    }

    /// Stop reporting build results as commit statuses. No-op without a webhook.
    pub fn without_build_status_reports(mut self) -> Self {
        if let Some(webhook) = self.webhook.as_mut() {
            webhook.report_build_status = false;
        }
        self
    }

    pub fn repository(&self) -> &RepositoryRef {
        &self.repository
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn credential(&self) -> &SecretHandle {
        &self.authentication
    }

    pub fn webhook(&self) -> Option<&WebhookTrigger> {
        self.webhook.as_ref()
    }

    /// Whether `event` should start a build from this source.
    ///
    /// Sources without webhook filters never trigger on events.
    pub fn accepts(&self, event: &SourceEvent) -> bool {
        self.webhook
            .as_ref()
            .is_some_and(|w| should_trigger(&w.filter_groups, event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secret::{CredentialRef, CredentialResolver, DynamicReferenceResolver};
    use crate::webhook::EventAction;

    fn token() -> SecretHandle {
        DynamicReferenceResolver
            .resolve(&CredentialRef::new("GitHubToken", "access-token"))
            .unwrap()
    }

    #[test]
    fn test_github_binding() {
        let source = SourceBinding::github("meadf", "blog-pipeline", "main", token()).unwrap();
        assert_eq!(source.repository().to_string(), "meadf/blog-pipeline");
        assert_eq!(source.branch(), "main");
        assert!(source.webhook().is_none());
    }

    #[test]
    fn test_empty_fields_rejected() {
        for (owner, repo, branch) in [("", "r", "main"), ("o", " ", "main"), ("o", "r", "")] {
            let result = SourceBinding::github(owner, repo, branch, token());
            assert!(matches!(result, Err(Error::InvalidSource(_))));
        }
    }

    #[test]
    fn test_parse_full_name() {
        let repo = RepositoryRef::parse("meadf/blog-pipeline").unwrap();
        assert_eq!(repo.owner, "meadf");
        assert_eq!(repo.repo, "blog-pipeline");

        assert!(RepositoryRef::parse("no-slash").is_err());
        assert!(RepositoryRef::parse("a/b/c").is_err());
        assert!(RepositoryRef::parse("/repo").is_err());
    }

    #[test]
    fn test_accepts_routes_through_filters() {
        let source = SourceBinding::github("meadf", "blog-pipeline", "main", token())
            .unwrap()
            .with_webhook_filters([FilterGroup::in_event_of(EventAction::pull_request_activity())
                .and_branch_is_not("main")]);

        assert!(source.accepts(&SourceEvent::new(EventAction::PullRequestUpdated, "fix")));
        assert!(!source.accepts(&SourceEvent::new(EventAction::PullRequestUpdated, "main")));
        assert!(source.webhook().unwrap().report_build_status);
    }

    #[test]
    fn test_no_webhook_never_accepts() {
        let source = SourceBinding::github("o", "r", "main", token()).unwrap();
        assert!(!source.accepts(&SourceEvent::new(EventAction::Push, "main")));
    }

    #[test]
    fn test_serialized_binding_hides_secret_value() {
        let source = SourceBinding::github("o", "r", "main", token())
            .unwrap()
            .with_webhook_filters([])
            .without_build_status_reports();
        let value = serde_json::to_value(&source).unwrap();
        assert_eq!(value["owner"], "o");
        assert_eq!(value["repo"], "r");
        assert_eq!(
            value["authentication"],
            "{{resolve:secretsmanager:GitHubToken:SecretString:access-token::}}"
        );
        assert_eq!(value["webhook"]["report_build_status"], false);
    }
}

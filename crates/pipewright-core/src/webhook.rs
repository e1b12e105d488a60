//! Webhook filter evaluation.
//!
//! A [`FilterGroup`] is a conjunction: the event action must be one of the group's
//! actions and every predicate must hold. A set of groups is a disjunction. An empty
//! set never triggers.

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::fmt;

/// Source-control event actions a filter group can select.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventAction {
    Push,
    PullRequestCreated,
    PullRequestUpdated,
    PullRequestMerged,
    PullRequestReopened,
    PullRequestClosed,
    Released,
    Prereleased,
    /// An action this engine does not know. Never matches any filter group.
    Other(String),
}

impl EventAction {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "PUSH" => EventAction::Push,
            "PULL_REQUEST_CREATED" => EventAction::PullRequestCreated,
            "PULL_REQUEST_UPDATED" => EventAction::PullRequestUpdated,
            "PULL_REQUEST_MERGED" => EventAction::PullRequestMerged,
            "PULL_REQUEST_REOPENED" => EventAction::PullRequestReopened,
            "PULL_REQUEST_CLOSED" => EventAction::PullRequestClosed,
            "RELEASED" => EventAction::Released,
            "PRERELEASED" => EventAction::Prereleased,
            _ => EventAction::Other(s.to_string()),
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, EventAction::Other(_))
    }

    /// All pull request actions that represent a reviewable change.
    pub fn pull_request_activity() -> [EventAction; 3] {
        [
            EventAction::PullRequestCreated,
            EventAction::PullRequestUpdated,
            EventAction::PullRequestReopened,
        ]
    }
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventAction::Push => write!(f, "PUSH"),
            EventAction::PullRequestCreated => write!(f, "PULL_REQUEST_CREATED"),
            EventAction::PullRequestUpdated => write!(f, "PULL_REQUEST_UPDATED"),
            EventAction::PullRequestMerged => write!(f, "PULL_REQUEST_MERGED"),
            EventAction::PullRequestReopened => write!(f, "PULL_REQUEST_REOPENED"),
            EventAction::PullRequestClosed => write!(f, "PULL_REQUEST_CLOSED"),
            EventAction::Released => write!(f, "RELEASED"),
            EventAction::Prereleased => write!(f, "PRERELEASED"),
            EventAction::Other(s) => write!(f, "{}", s),
        }
    }
}

impl Serialize for EventAction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// An inbound source-control event, reduced to what filters look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEvent {
    pub action: EventAction,
    /// Head branch (push target, or the pull request's source branch).
    pub source_branch: Option<String>,
    /// Base branch of a pull request.
    pub target_branch: Option<String>,
    pub actor: Option<String>,
}

impl SourceEvent {
    pub fn new(action: EventAction, source_branch: impl AsRef<str>) -> Self {
        Self {
            action,
            source_branch: Some(branch_name(source_branch.as_ref()).to_string()),
            target_branch: None,
            actor: None,
        }
    }

    pub fn with_target_branch(mut self, branch: impl AsRef<str>) -> Self {
        self.target_branch = Some(branch_name(branch.as_ref()).to_string());
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Build an event from a GitHub webhook payload.
    ///
    /// Returns `None` when the payload lacks the fields the event type requires.
    /// Event types with no filter vocabulary map to [`EventAction::Other`].
    pub fn from_github_payload(event_type: &str, payload: &serde_json::Value) -> Option<Self> {
        let actor = payload
            .get("sender")
            .and_then(|s| s.get("login"))
            .and_then(|l| l.as_str())
            .map(String::from);

        let event = match event_type {
            "push" => {
                let git_ref = payload.get("ref")?.as_str()?;
                Self {
                    action: EventAction::Push,
                    source_branch: git_ref.strip_prefix("refs/heads/").map(String::from),
                    target_branch: None,
                    actor,
                }
            }
            "pull_request" => {
                let action = payload.get("action")?.as_str()?;
                let pr = payload.get("pull_request")?;
                let merged = pr.get("merged").and_then(|m| m.as_bool()).unwrap_or(false);
                let action = match action {
                    "opened" => EventAction::PullRequestCreated,
                    "synchronize" => EventAction::PullRequestUpdated,
                    "reopened" => EventAction::PullRequestReopened,
                    "closed" if merged => EventAction::PullRequestMerged,
                    "closed" => EventAction::PullRequestClosed,
                    other => EventAction::Other(format!("pull_request.{}", other)),
                };
                Self {
                    action,
                    source_branch: pr
                        .get("head")
                        .and_then(|h| h.get("ref"))
                        .and_then(|r| r.as_str())
                        .map(String::from),
                    target_branch: pr
                        .get("base")
                        .and_then(|b| b.get("ref"))
                        .and_then(|r| r.as_str())
                        .map(String::from),
                    actor,
                }
            }
            "release" => {
                let release = payload.get("release")?;
                let prerelease = release
                    .get("prerelease")
                    .and_then(|p| p.as_bool())
                    .unwrap_or(false);
                let action = match payload.get("action")?.as_str()? {
                    "published" | "released" if prerelease => EventAction::Prereleased,
                    "published" | "released" => EventAction::Released,
                    other => EventAction::Other(format!("release.{}", other)),
                };
                Self {
                    action,
                    source_branch: None,
                    target_branch: None,
                    actor,
                }
            }
            other => Self {
                action: EventAction::Other(other.to_string()),
                source_branch: None,
                target_branch: None,
                actor,
            },
        };
        Some(event)
    }
}

fn branch_name(s: &str) -> &str {
    s.strip_prefix("refs/heads/").unwrap_or(s)
}

/// What part of the event a predicate inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterTarget {
    /// The source (head) branch.
    HeadRef,
    /// The target (base) branch of a pull request.
    BaseRef,
    Actor,
}

impl FilterTarget {
    fn wire_name(self) -> &'static str {
        match self {
            FilterTarget::HeadRef => "HEAD_REF",
            FilterTarget::BaseRef => "BASE_REF",
            FilterTarget::Actor => "ACTOR_ACCOUNT_ID",
        }
    }
}

/// An equality test on one event attribute, optionally negated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    pub target: FilterTarget,
    pub value: String,
    /// When set, the predicate holds only if the attribute does NOT equal `value`.
    pub exclude: bool,
}

impl Predicate {
    fn holds(&self, event: &SourceEvent) -> bool {
        let observed = match self.target {
            FilterTarget::HeadRef => event.source_branch.as_deref().map(branch_name),
            FilterTarget::BaseRef => event.target_branch.as_deref().map(branch_name),
            FilterTarget::Actor => event.actor.as_deref(),
        };
        let hit = observed == Some(self.value.as_str());
        hit != self.exclude
    }

    /// Anchored pattern as the build service expects it.
    pub fn pattern(&self) -> String {
        match self.target {
            FilterTarget::HeadRef | FilterTarget::BaseRef => {
                format!("^refs/heads/{}$", regex::escape(&self.value))
            }
            FilterTarget::Actor => format!("^{}$", regex::escape(&self.value)),
        }
    }
}

impl Serialize for Predicate {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Predicate", 3)?;
        state.serialize_field("type", self.target.wire_name())?;
        state.serialize_field("pattern", &self.pattern())?;
        state.serialize_field("excludeMatchedPattern", &self.exclude)?;
        state.end()
    }
}

/// Event-action membership plus zero or more branch/actor predicates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterGroup {
    actions: Vec<EventAction>,
    predicates: Vec<Predicate>,
}

impl FilterGroup {
    /// A group matching any of the given actions.
    pub fn in_event_of(actions: impl IntoIterator<Item = EventAction>) -> Self {
        Self {
            actions: actions.into_iter().collect(),
            predicates: Vec::new(),
        }
    }

    pub fn actions(&self) -> &[EventAction] {
        &self.actions
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    fn and(mut self, target: FilterTarget, value: impl AsRef<str>, exclude: bool) -> Self {
        self.predicates.push(Predicate {
            target,
            value: branch_or_actor(target, value.as_ref()),
            exclude,
        });
        self
    }

    /// Require the source (head) branch to be `branch`.
    pub fn and_branch_is(self, branch: impl AsRef<str>) -> Self {
        self.and(FilterTarget::HeadRef, branch, false)
    }

    /// Exclude events whose source (head) branch is `branch`.
    pub fn and_branch_is_not(self, branch: impl AsRef<str>) -> Self {
        self.and(FilterTarget::HeadRef, branch, true)
    }

    pub fn and_base_branch_is(self, branch: impl AsRef<str>) -> Self {
        self.and(FilterTarget::BaseRef, branch, false)
    }

    pub fn and_base_branch_is_not(self, branch: impl AsRef<str>) -> Self {
        self.and(FilterTarget::BaseRef, branch, true)
    }

    pub fn and_actor_is(self, actor: impl AsRef<str>) -> Self {
        self.and(FilterTarget::Actor, actor, false)
    }

    pub fn and_actor_is_not(self, actor: impl AsRef<str>) -> Self {
        self.and(FilterTarget::Actor, actor, true)
    }

    /// True if the action is selected and every predicate holds.
    pub fn matches(&self, event: &SourceEvent) -> bool {
        event.action.is_recognized()
            && self.actions.contains(&event.action)
            && self.predicates.iter().all(|p| p.holds(event))
    }
}

fn branch_or_actor(target: FilterTarget, value: &str) -> String {
    match target {
        FilterTarget::HeadRef | FilterTarget::BaseRef => branch_name(value).to_string(),
        FilterTarget::Actor => value.to_string(),
    }
}

/// Decide whether `event` should trigger a build under `groups`.
///
/// Total and side-effect free. An empty group set never triggers.
pub fn should_trigger(groups: &[FilterGroup], event: &SourceEvent) -> bool {
    groups.iter().any(|group| group.matches(event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pr_group() -> FilterGroup {
        FilterGroup::in_event_of([EventAction::PullRequestCreated]).and_branch_is_not("main")
    }

    fn all_actions() -> Vec<EventAction> {
        vec![
            EventAction::Push,
            EventAction::PullRequestCreated,
            EventAction::PullRequestUpdated,
            EventAction::PullRequestMerged,
            EventAction::PullRequestReopened,
            EventAction::PullRequestClosed,
            EventAction::Released,
            EventAction::Prereleased,
            EventAction::Other("WORKFLOW_JOB_QUEUED".to_string()),
        ]
    }

    #[test]
    fn test_empty_group_set_never_triggers() {
        for action in all_actions() {
            for branch in ["main", "feature-x", ""] {
                let event = SourceEvent::new(action.clone(), branch).with_target_branch("main");
                assert!(!should_trigger(&[], &event));
            }
        }
    }

    #[test]
    fn test_exclusion_on_source_branch() {
        let groups = [pr_group()];

        let main = SourceEvent::new(EventAction::PullRequestCreated, "main");
        assert!(!should_trigger(&groups, &main));

        let feature = SourceEvent::new(EventAction::PullRequestCreated, "feature-x");
        assert!(should_trigger(&groups, &feature));

        let push = SourceEvent::new(EventAction::Push, "feature-x");
        assert!(!should_trigger(&groups, &push));
    }

    #[test]
    fn test_exclusion_ignores_target_branch() {
        let event =
            SourceEvent::new(EventAction::PullRequestCreated, "feature-x").with_target_branch("main");
        assert!(should_trigger(&[pr_group()], &event));
    }

    #[test]
    fn test_base_branch_predicate() {
        let group = FilterGroup::in_event_of([EventAction::PullRequestCreated])
            .and_base_branch_is_not("main");
        let event =
            SourceEvent::new(EventAction::PullRequestCreated, "feature-x").with_target_branch("main");
        assert!(!group.matches(&event));
    }

    #[test]
    fn test_groups_are_disjunctive() {
        let groups = [
            pr_group(),
            FilterGroup::in_event_of([EventAction::Push]).and_branch_is("main"),
        ];
        assert!(should_trigger(&groups, &SourceEvent::new(EventAction::Push, "main")));
        assert!(!should_trigger(&groups, &SourceEvent::new(EventAction::Push, "dev")));

        let reversed: Vec<FilterGroup> = groups.iter().rev().cloned().collect();
        assert!(should_trigger(&reversed, &SourceEvent::new(EventAction::Push, "main")));
    }

    #[test]
    fn test_unrecognized_action_never_matches() {
        let other = EventAction::parse("WORKFLOW_JOB_QUEUED");
        let group = FilterGroup::in_event_of([other.clone()]);
        assert!(!group.matches(&SourceEvent::new(other, "feature")));
    }

    #[test]
    fn test_actor_predicate() {
        let group = FilterGroup::in_event_of([EventAction::Push]).and_actor_is("12345");
        let event = SourceEvent::new(EventAction::Push, "main");
        assert!(!group.matches(&event));
        assert!(group.matches(&event.with_actor("12345")));
    }

    #[test]
    fn test_full_refs_are_normalized() {
        let group = FilterGroup::in_event_of([EventAction::Push]).and_branch_is("refs/heads/main");
        assert!(group.matches(&SourceEvent::new(EventAction::Push, "main")));
        assert!(group.matches(&SourceEvent::new(EventAction::Push, "refs/heads/main")));
    }

    #[test]
    fn test_action_parse_and_display() {
        for action in all_actions() {
            assert_eq!(EventAction::parse(&action.to_string()), action);
        }
        assert_eq!(
            EventAction::parse("pull_request_created"),
            EventAction::PullRequestCreated
        );
    }

    #[test]
    fn test_serialized_predicate() {
        let value = serde_json::to_value(pr_group()).unwrap();
        assert_eq!(
            value,
            json!({
                "actions": ["PULL_REQUEST_CREATED"],
                "predicates": [{
                    "type": "HEAD_REF",
                    "pattern": "^refs/heads/main$",
                    "excludeMatchedPattern": true
                }]
            })
        );
    }

    #[test]
    fn test_github_pull_request_payload() {
        let payload = json!({
            "action": "synchronize",
            "pull_request": {
                "merged": false,
                "head": { "ref": "feature-x" },
                "base": { "ref": "main" }
            },
            "sender": { "login": "octocat" }
        });
        let event = SourceEvent::from_github_payload("pull_request", &payload).unwrap();
        assert_eq!(event.action, EventAction::PullRequestUpdated);
        assert_eq!(event.source_branch.as_deref(), Some("feature-x"));
        assert_eq!(event.target_branch.as_deref(), Some("main"));
        assert_eq!(event.actor.as_deref(), Some("octocat"));
    }

    #[test]
    fn test_github_merged_payload() {
        let payload = json!({
            "action": "closed",
            "pull_request": { "merged": true, "head": { "ref": "x" }, "base": { "ref": "main" } }
        });
        let event = SourceEvent::from_github_payload("pull_request", &payload).unwrap();
        assert_eq!(event.action, EventAction::PullRequestMerged);
    }

    #[test]
    fn test_github_push_payload() {
        let payload = json!({ "ref": "refs/heads/main" });
        let event = SourceEvent::from_github_payload("push", &payload).unwrap();
        assert_eq!(event.action, EventAction::Push);
        assert_eq!(event.source_branch.as_deref(), Some("main"));

        let tag = json!({ "ref": "refs/tags/v1.0.0" });
        let event = SourceEvent::from_github_payload("push", &tag).unwrap();
        assert_eq!(event.source_branch, None);
    }

    #[test]
    fn test_github_unknown_event() {
        let event = SourceEvent::from_github_payload("issues", &json!({})).unwrap();
        assert!(!event.action.is_recognized());
        assert!(SourceEvent::from_github_payload("push", &json!({})).is_none());
    }

    #[test]
    fn test_full_ref_in_event_fields() {
        let event = SourceEvent {
            action: EventAction::PullRequestCreated,
            source_branch: Some("refs/heads/main".to_string()),
            target_branch: Some("refs/heads/release".to_string()),
            actor: None,
        };
        let not_main = FilterGroup::in_event_of([EventAction::PullRequestCreated])
            .and_branch_is_not("main");
        assert!(!should_trigger(&[not_main], &event));

        let into_release = FilterGroup::in_event_of([EventAction::PullRequestCreated])
            .and_base_branch_is("release");
        assert!(should_trigger(&[into_release], &event));
    }
}

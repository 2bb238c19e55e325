//! Trigger classification.

use tollgate_core::run::TriggerContext;
use tollgate_core::workflow::{TriggerConfig, TriggerKind};
use tracing::debug;

/// Raw event data delivered by the event source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    /// Event name, e.g. `push` or `pull_request`.
    pub name: String,
    /// Ref the event happened on (`refs/heads/main` or a bare branch name).
    pub git_ref: Option<String>,
    /// Target branch of a pull request.
    pub base_ref: Option<String>,
}

impl RawEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            git_ref: None,
            base_ref: None,
        }
    }

    pub fn push(branch: impl Into<String>) -> Self {
        Self::new("push").with_ref(branch)
    }

    pub fn pull_request(base: impl Into<String>) -> Self {
        Self::new("pull_request").with_base_ref(base)
    }

    pub fn with_ref(mut self, git_ref: impl Into<String>) -> Self {
        self.git_ref = Some(git_ref.into());
        self
    }

    pub fn with_base_ref(mut self, base_ref: impl Into<String>) -> Self {
        self.base_ref = Some(base_ref.into());
        self
    }

    /// Read the event from the environment.
    ///
    /// `TOLLGATE_EVENT`, `TOLLGATE_REF` and `TOLLGATE_BASE_REF` win over the
    /// `GITHUB_*` variables hosted runners export.
    pub fn from_env() -> Option<Self> {
        let var = |ours: &str, theirs: &str| {
            std::env::var(ours)
                .or_else(|_| std::env::var(theirs))
                .ok()
                .filter(|v| !v.is_empty())
        };

        let name = var("TOLLGATE_EVENT", "GITHUB_EVENT_NAME")?;
        Some(Self {
            name,
            git_ref: var("TOLLGATE_REF", "GITHUB_REF"),
            base_ref: var("TOLLGATE_BASE_REF", "GITHUB_BASE_REF"),
        })
    }

    /// The branch the trigger filter applies to.
    pub fn branch(&self) -> Option<String> {
        let kind = TriggerKind::from_event_name(&self.name);
        let git_ref = match kind {
            TriggerKind::PullRequest => self.base_ref.as_ref().or(self.git_ref.as_ref()),
            _ => self.git_ref.as_ref(),
        }?;
        Some(branch_name(git_ref))
    }
}

fn branch_name(git_ref: &str) -> String {
    git_ref
        .strip_prefix("refs/heads/")
        .unwrap_or(git_ref)
        .to_string()
}

/// Classifies raw events against a workflow's trigger configuration.
pub struct TriggerClassifier;

impl TriggerClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Produce the trigger context for a run.
    ///
    /// Events the workflow does not listen to are not errors: they yield a
    /// context with `applicable == false`.
    pub fn classify(&self, triggers: &[TriggerConfig], event: &RawEvent) -> TriggerContext {
        let kind = TriggerKind::from_event_name(&event.name);
        let branch = event.branch();

        let applicable = triggers.is_empty()
            || triggers
                .iter()
                .any(|trigger| self.trigger_matches(trigger, kind, branch.as_deref()));

        debug!(event = %event.name, %kind, ?branch, applicable, "Classified trigger");

        TriggerContext {
            kind,
            event_name: event.name.clone(),
            branch,
            applicable,
        }
    }

    fn trigger_matches(&self, trigger: &TriggerConfig, kind: TriggerKind, branch: Option<&str>) -> bool {
        if trigger.kind != kind {
            return false;
        }
        if trigger.branches.is_empty() {
            return true;
        }
        match branch {
            Some(branch) => self.branch_matches(&trigger.branches, branch),
            None => false,
        }
    }

    fn branch_matches(&self, patterns: &[String], branch: &str) -> bool {
        if patterns.is_empty() {
            return true;
        }
        patterns.iter().any(|p| self.glob_match(p, branch))
    }

    fn glob_match(&self, pattern: &str, text: &str) -> bool {
        if pattern == "*" || pattern == "**" {
            return true;
        }
        if let Some(prefix) = pattern.strip_suffix("/**") {
            return text.starts_with(&format!("{}/", prefix));
        }
        if let Some(prefix) = pattern.strip_suffix("/*") {
            let prefix_slash = format!("{}/", prefix);
            if let Some(rest) = text.strip_prefix(&prefix_slash) {
                return !rest.is_empty() && !rest.contains('/');
            }
            return false;
        }
        if let Some((head, tail)) = pattern.split_once('*')
            && !tail.contains('*')
        {
            return text.len() >= head.len() + tail.len()
                && text.starts_with(head)
                && text.ends_with(tail);
        }
        pattern == text
    }
}

impl Default for TriggerClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trigger(kind: TriggerKind, branches: &[&str]) -> TriggerConfig {
        TriggerConfig {
            kind,
            branches: branches.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_branch_match_exact() {
        let classifier = TriggerClassifier::new();
        assert!(classifier.branch_matches(&["main".to_string()], "main"));
        assert!(!classifier.branch_matches(&["main".to_string()], "develop"));
    }

    #[test]
    fn test_branch_match_glob() {
        let classifier = TriggerClassifier::new();
        assert!(classifier.branch_matches(&["feature/*".to_string()], "feature/foo"));
        assert!(!classifier.branch_matches(&["feature/*".to_string()], "feature/foo/bar"));
        assert!(classifier.branch_matches(&["release/**".to_string()], "release/v1/hotfix"));
        assert!(!classifier.branch_matches(&["release/**".to_string()], "releases"));
        assert!(classifier.branch_matches(&["v*-rc".to_string()], "v1.2-rc"));
    }

    #[test]
    fn test_empty_patterns_match_all() {
        let classifier = TriggerClassifier::new();
        assert!(classifier.branch_matches(&[], "any-branch"));
    }

    #[test]
    fn test_push_to_tracked_branch() {
        let triggers = vec![
            trigger(TriggerKind::Push, &["master"]),
            trigger(TriggerKind::PullRequest, &[]),
        ];
        let ctx = TriggerClassifier::new().classify(&triggers, &RawEvent::push("refs/heads/master"));

        assert_eq!(ctx.kind, TriggerKind::Push);
        assert_eq!(ctx.branch.as_deref(), Some("master"));
        assert!(ctx.applicable);
    }

    #[test]
    fn test_push_to_other_branch_is_not_applicable() {
        let triggers = vec![trigger(TriggerKind::Push, &["master"])];
        let ctx = TriggerClassifier::new().classify(&triggers, &RawEvent::push("topic"));

        assert_eq!(ctx.kind, TriggerKind::Push);
        assert!(!ctx.applicable);
    }

    #[test]
    fn test_pull_request_filters_on_base_branch() {
        let triggers = vec![trigger(TriggerKind::PullRequest, &["main"])];
        let classifier = TriggerClassifier::new();

        let event = RawEvent::pull_request("main").with_ref("refs/pull/7/merge");
        let ctx = classifier.classify(&triggers, &event);
        assert_eq!(ctx.kind, TriggerKind::PullRequest);
        assert_eq!(ctx.branch.as_deref(), Some("main"));
        assert!(ctx.applicable);

        let ctx = classifier.classify(&triggers, &RawEvent::pull_request("legacy"));
        assert!(!ctx.applicable);

        let event = RawEvent::new("pull_request")
            .with_ref("refs/pull/9/merge")
            .with_base_ref("refs/heads/main");
        assert_eq!(event.branch().as_deref(), Some("main"));
        assert!(classifier.classify(&triggers, &event).applicable);
    }

    #[test]
    fn test_other_events() {
        let classifier = TriggerClassifier::new();
        let event = RawEvent::new("workflow_dispatch");

        let ctx = classifier.classify(&[], &event);
        assert_eq!(ctx.kind, TriggerKind::Other);
        assert_eq!(ctx.event_name, "workflow_dispatch");
        assert!(ctx.applicable);

        let only_push = vec![trigger(TriggerKind::Push, &[])];
        assert!(!classifier.classify(&only_push, &event).applicable);

        let other = vec![trigger(TriggerKind::Other, &[])];
        assert!(classifier.classify(&other, &event).applicable);
    }
}

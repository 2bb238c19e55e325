//! Workflow discovery and event resolution.

use crate::commands::EventArgs;
use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};
use tollgate_core::workflow::WorkflowDefinition;
use tollgate_scheduler::RawEvent;
use tracing::debug;

/// Standard workflow locations, in lookup order.
const CANDIDATES: [&str; 6] = [
    ".tollgate/workflow.yaml",
    ".tollgate/workflow.yml",
    "tollgate.yaml",
    "tollgate.yml",
    ".tollgate.yaml",
    ".tollgate.yml",
];

/// Find the workflow file: an explicit path, or the first standard location
/// that exists under `root`.
pub fn find_workflow_file(path: Option<&str>, root: &Path) -> Option<PathBuf> {
    if let Some(p) = path {
        let path = PathBuf::from(p);
        return path.exists().then_some(path);
    }

    CANDIDATES
        .iter()
        .map(|candidate| root.join(candidate))
        .find(|path| path.exists())
}

/// Load and parse a workflow file.
pub fn load_workflow(path: &Path) -> Result<WorkflowDefinition> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let definition: WorkflowDefinition =
        serde_yaml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
    debug!(path = %path.display(), workflow = %definition.name, jobs = definition.jobs.len(), "Loaded workflow");
    Ok(definition)
}

/// Locate and load the workflow for a command.
pub fn resolve_workflow(path: Option<&str>) -> Result<(PathBuf, WorkflowDefinition)> {
    let root = std::env::current_dir()?;
    let file = find_workflow_file(path, &root).ok_or_else(|| match path {
        Some(p) => anyhow!("Workflow file not found: {}", p),
        None => anyhow!(
            "No workflow file found (looked for {})",
            CANDIDATES.join(", ")
        ),
    })?;
    let workflow = load_workflow(&file)?;
    Ok((file, workflow))
}

/// Build the raw event from flags, falling back to the hosting platform's
/// environment and finally to a push without a branch.
pub fn raw_event(args: &EventArgs) -> RawEvent {
    let env = RawEvent::from_env();

    let name = args
        .event
        .clone()
        .or_else(|| env.as_ref().map(|e| e.name.clone()))
        .unwrap_or_else(|| "push".to_string());
    let mut event = RawEvent::new(name);
    if let Some(git_ref) = args
        .branch
        .clone()
        .or_else(|| env.as_ref().and_then(|e| e.git_ref.clone()))
    {
        event = event.with_ref(git_ref);
    }
    if let Some(base_ref) = args
        .base_ref
        .clone()
        .or_else(|| env.as_ref().and_then(|e| e.base_ref.clone()))
    {
        event = event.with_base_ref(base_ref);
    }
    event
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovers_standard_locations() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_workflow_file(None, dir.path()).is_none());

        std::fs::write(dir.path().join("tollgate.yml"), "name: a\njobs: []\n").unwrap();
        assert_eq!(
            find_workflow_file(None, dir.path()),
            Some(dir.path().join("tollgate.yml"))
        );

        std::fs::create_dir(dir.path().join(".tollgate")).unwrap();
        std::fs::write(dir.path().join(".tollgate/workflow.yaml"), "name: b\njobs: []\n").unwrap();
        assert_eq!(
            find_workflow_file(None, dir.path()),
            Some(dir.path().join(".tollgate/workflow.yaml"))
        );
    }

    #[test]
    fn test_explicit_path_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.yaml");
        assert!(find_workflow_file(missing.to_str(), dir.path()).is_none());
    }

    #[test]
    fn test_load_workflow() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tollgate.yaml");
        std::fs::write(&path, "name: ci\njobs:\n  - name: build\n    run: make\n").unwrap();

        let workflow = load_workflow(&path).unwrap();
        assert_eq!(workflow.name, "ci");
        assert_eq!(workflow.jobs[0].run.as_deref(), Some("make"));

        std::fs::write(&path, "name: [").unwrap();
        assert!(load_workflow(&path).is_err());
    }

    #[test]
    fn test_flags_win_over_environment() {
        let args = EventArgs {
            event: Some("pull_request".to_string()),
            branch: Some("refs/pull/1/merge".to_string()),
            base_ref: Some("main".to_string()),
        };
        let event = raw_event(&args);
        assert_eq!(event.name, "pull_request");
        assert_eq!(event.branch().as_deref(), Some("main"));
    }
}

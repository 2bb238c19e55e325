//! Workflow definition types.
//!
//! These types represent the user-authored workflow YAML: the job templates,
//! their `needs` edges, guards, matrices and gate kinds.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WorkflowDefinition {
    #[serde(default = "default_version")]
    pub version: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub triggers: Vec<TriggerConfig>,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    pub jobs: Vec<JobDefinition>,
}

fn default_version() -> String {
    "1".to_string()
}

impl WorkflowDefinition {
    /// Look up a job template by name.
    pub fn job(&self, name: &str) -> Option<&JobDefinition> {
        self.jobs.iter().find(|j| j.name == name)
    }

    /// Names of the gate jobs, in declaration order.
    pub fn gates(&self) -> impl Iterator<Item = &JobDefinition> {
        self.jobs.iter().filter(|j| j.gate.is_some())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TriggerConfig {
    #[serde(rename = "type")]
    pub kind: TriggerKind,
    /// Branch patterns. Empty means every branch.
    #[serde(default)]
    pub branches: Vec<String>,
}

/// The kind of event that produced a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Push,
    PullRequest,
    Other,
}

impl TriggerKind {
    /// Classify a raw event name.
    pub fn from_event_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "push" => TriggerKind::Push,
            "pull_request" | "pull_request_target" | "pr" => TriggerKind::PullRequest,
            _ => TriggerKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Push => "push",
            TriggerKind::PullRequest => "pull_request",
            TriggerKind::Other => "other",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobDefinition {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, alias = "depends_on")]
    pub needs: Vec<String>,
    #[serde(default, rename = "if")]
    pub condition: Option<ConditionExpression>,
    /// Target platform, e.g. `ubuntu-latest` or `${{ matrix.os }}`.
    #[serde(default)]
    pub runs_on: Option<String>,
    #[serde(default)]
    pub matrix: Option<MatrixConfig>,
    /// Gate jobs have no body; their status is an aggregate of their needs.
    #[serde(default)]
    pub gate: Option<GateKind>,
    #[serde(default)]
    pub run: Option<String>,
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    #[serde(default)]
    pub timeout_minutes: Option<u32>,
}

fn default_shell() -> String {
    "bash".to_string()
}

impl JobDefinition {
    pub fn is_gate(&self) -> bool {
        self.gate.is_some()
    }

    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }
}

/// Guard attached to a job, either `if: <expr>` or `if: { if: .., unless: .. }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ConditionExpression {
    Simple(String),
    Structured {
        #[serde(rename = "if", default)]
        if_expr: Option<String>,
        #[serde(default)]
        unless: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MatrixConfig {
    pub dimensions: BTreeMap<String, Vec<serde_json::Value>>,
    #[serde(default)]
    pub include: Vec<BTreeMap<String, serde_json::Value>>,
    #[serde(default)]
    pub exclude: Vec<BTreeMap<String, serde_json::Value>>,
}

/// Aggregation rule of a gate job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum GateKind {
    /// Success iff every dependency succeeded.
    AllSucceeded,
    /// Success iff at least one dependency did not succeed.
    AnyFailed,
}

impl fmt::Display for GateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateKind::AllSucceeded => f.write_str("all_succeeded"),
            GateKind::AnyFailed => f.write_str("any_failed"),
        }
    }
}

/// Platform a job instance targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Linux,
    Macos,
    Windows,
}

impl Platform {
    /// The platform this binary was built for.
    pub fn host() -> Self {
        #[cfg(target_os = "macos")]
        return Platform::Macos;
        #[cfg(target_os = "windows")]
        return Platform::Windows;
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        return Platform::Linux;
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let label = s.trim().to_ascii_lowercase();
        let family = label.split('-').next().unwrap_or_default();
        match family {
            "linux" | "ubuntu" | "debian" => Ok(Platform::Linux),
            "macos" | "darwin" | "osx" => Ok(Platform::Macos),
            "windows" | "win" => Ok(Platform::Windows),
            _ => Err(format!("unknown platform '{}'", s)),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Linux => f.write_str("linux"),
            Platform::Macos => f.write_str("macos"),
            Platform::Windows => f.write_str("windows"),
        }
    }
}

/// Render a matrix value the way it appears in names and interpolation.
pub fn scalar_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        _ => value.to_string(),
    }
}

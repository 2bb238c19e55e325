//! Run and execution types.

use crate::ids::{JobKey, RunId};
use crate::workflow::{GateKind, Platform, TriggerKind};
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Classified trigger of one run. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TriggerContext {
    pub kind: TriggerKind,
    /// The raw event name as delivered by the event source.
    pub event_name: String,
    pub branch: Option<String>,
    /// False when the workflow's trigger filter rejected the event; every
    /// job of such a run is skipped.
    pub applicable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failure,
    Skipped,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failure | JobStatus::Skipped
        )
    }

    /// Statuses only move forward: Pending → Running → Success | Failure, or
    /// Pending straight to a terminal status.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match self {
            JobStatus::Pending => next != JobStatus::Pending,
            JobStatus::Running => matches!(next, JobStatus::Success | JobStatus::Failure),
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Failure => "failure",
            JobStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Why an instance was skipped instead of dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// The event did not match the workflow's triggers.
    TriggerNotApplicable,
    /// The guard evaluated to false.
    GuardFalse { guard: String },
    /// A dependency failed and the guard does not opt out of the fail-fast
    /// default.
    DependencyFailed { dependency: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::TriggerNotApplicable => write!(f, "trigger not applicable"),
            SkipReason::GuardFalse { guard } => write!(f, "guard is false: {}", guard),
            SkipReason::DependencyFailed { dependency } => {
                write!(f, "dependency {} failed", dependency)
            }
        }
    }
}

/// Terminal status of a gate job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GateResult {
    pub name: String,
    pub kind: GateKind,
    pub status: JobStatus,
    /// Dependency statuses the aggregate was computed from.
    pub dependencies: BTreeMap<String, JobStatus>,
}

impl GateResult {
    /// Whether this gate reports that something upstream failed.
    pub fn signals_failure(&self) -> bool {
        match self.kind {
            GateKind::AllSucceeded => self.status == JobStatus::Failure,
            GateKind::AnyFailed => self.status == JobStatus::Success,
        }
    }

    /// Process exit code for a hosting platform that checks this gate alone.
    pub fn exit_code(&self) -> i32 {
        match self.status {
            JobStatus::Failure => 1,
            _ => 0,
        }
    }
}

/// Per-instance outcome recorded in a run report.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobReport {
    pub key: JobKey,
    pub display_name: String,
    pub platform: Option<Platform>,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RunVerdict {
    Accepted,
    Rejected,
    NotApplicable,
}

impl RunVerdict {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunVerdict::Rejected => 1,
            RunVerdict::Accepted | RunVerdict::NotApplicable => 0,
        }
    }
}

impl fmt::Display for RunVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunVerdict::Accepted => f.write_str("accepted"),
            RunVerdict::Rejected => f.write_str("rejected"),
            RunVerdict::NotApplicable => f.write_str("not applicable"),
        }
    }
}

/// Everything that survives a run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunReport {
    pub run_id: RunId,
    pub workflow: String,
    pub trigger: TriggerContext,
    pub jobs: Vec<JobReport>,
    pub gates: Vec<GateResult>,
    pub verdict: RunVerdict,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn gate(&self, name: &str) -> Option<&GateResult> {
        self.gates.iter().find(|g| g.name == name)
    }

    /// Status of every instance of a job template.
    pub fn statuses_of(&self, job: &str) -> Vec<JobStatus> {
        self.jobs
            .iter()
            .filter(|j| j.key.job == job)
            .map(|j| j.status)
            .collect()
    }

    pub fn exit_code(&self) -> i32 {
        self.verdict.exit_code()
    }
}

/// Decide the overall verdict of a finished run.
///
/// Gates that reported (were not skipped) decide alone. Without any reporting
/// gate the run is rejected iff some non-gate instance failed.
pub fn resolve_verdict(
    trigger: &TriggerContext,
    gates: &[GateResult],
    jobs: &[JobReport],
) -> RunVerdict {
    if !trigger.applicable {
        return RunVerdict::NotApplicable;
    }

    let reporting: Vec<&GateResult> = gates
        .iter()
        .filter(|g| g.status != JobStatus::Skipped)
        .collect();

    let rejected = if reporting.is_empty() {
        jobs.iter().any(|j| {
            j.status == JobStatus::Failure && !gates.iter().any(|g| g.name == j.key.job)
        })
    } else {
        reporting.iter().any(|g| g.signals_failure())
    };

    if rejected {
        RunVerdict::Rejected
    } else {
        RunVerdict::Accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push() -> TriggerContext {
        TriggerContext {
            kind: TriggerKind::Push,
            event_name: "push".into(),
            branch: Some("main".into()),
            applicable: true,
        }
    }

    fn gate(name: &str, kind: GateKind, status: JobStatus) -> GateResult {
        GateResult {
            name: name.into(),
            kind,
            status,
            dependencies: BTreeMap::new(),
        }
    }

    fn job(name: &str, status: JobStatus) -> JobReport {
        JobReport {
            key: JobKey::single(name),
            display_name: name.into(),
            platform: None,
            status,
            skip_reason: None,
            exit_code: None,
            duration_ms: None,
            error: None,
        }
    }

    #[test]
    fn test_status_transitions_are_monotonic() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Running));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Skipped));
        assert!(JobStatus::Running.can_transition_to(JobStatus::Failure));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Skipped));
        assert!(!JobStatus::Running.can_transition_to(JobStatus::Pending));
        assert!(!JobStatus::Success.can_transition_to(JobStatus::Failure));
        assert!(!JobStatus::Skipped.can_transition_to(JobStatus::Running));
    }

    #[test]
    fn test_gate_failure_signal() {
        assert!(gate("ok", GateKind::AllSucceeded, JobStatus::Failure).signals_failure());
        assert!(!gate("ok", GateKind::AllSucceeded, JobStatus::Success).signals_failure());
        assert!(gate("ko", GateKind::AnyFailed, JobStatus::Success).signals_failure());
        assert!(!gate("ko", GateKind::AnyFailed, JobStatus::Skipped).signals_failure());
        assert_eq!(gate("ko", GateKind::AnyFailed, JobStatus::Skipped).exit_code(), 0);
        assert_eq!(gate("ok", GateKind::AllSucceeded, JobStatus::Failure).exit_code(), 1);
    }

    #[test]
    fn test_verdict_from_gates() {
        let gates = vec![
            gate("success", GateKind::AllSucceeded, JobStatus::Failure),
            gate("failure", GateKind::AnyFailed, JobStatus::Success),
        ];
        let jobs = vec![job("test", JobStatus::Failure)];
        assert_eq!(resolve_verdict(&push(), &gates, &jobs), RunVerdict::Rejected);

        let gates = vec![
            gate("success", GateKind::AllSucceeded, JobStatus::Success),
            gate("failure", GateKind::AnyFailed, JobStatus::Skipped),
        ];
        let jobs = vec![job("test", JobStatus::Success)];
        assert_eq!(resolve_verdict(&push(), &gates, &jobs), RunVerdict::Accepted);
    }

    #[test]
    fn test_verdict_falls_back_to_jobs_when_gates_skipped() {
        let gates = vec![gate("success", GateKind::AllSucceeded, JobStatus::Skipped)];
        let jobs = vec![job("test", JobStatus::Failure), job("lint", JobStatus::Success)];
        assert_eq!(resolve_verdict(&push(), &gates, &jobs), RunVerdict::Rejected);

        let jobs = vec![job("test", JobStatus::Success), job("lint", JobStatus::Skipped)];
        assert_eq!(resolve_verdict(&push(), &gates, &jobs), RunVerdict::Accepted);
    }

    #[test]
    fn test_verdict_not_applicable() {
        let trigger = TriggerContext {
            applicable: false,
            ..push()
        };
        assert_eq!(resolve_verdict(&trigger, &[], &[]), RunVerdict::NotApplicable);
        assert_eq!(RunVerdict::NotApplicable.exit_code(), 0);
    }
}

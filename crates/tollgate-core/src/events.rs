//! Run lifecycle events.

use crate::ids::{JobKey, RunId};
use crate::run::{GateResult, JobStatus, RunVerdict, SkipReason, TriggerContext};
use crate::workflow::Platform;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// All events published while a run progresses.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted(RunStartedPayload),
    JobSkipped(JobSkippedPayload),
    JobDispatched(JobDispatchedPayload),
    JobCompleted(JobCompletedPayload),
    GateEvaluated(GateEvaluatedPayload),
    RunCompleted(RunCompletedPayload),
}

impl RunEvent {
    /// Returns the subject this event is published under.
    pub fn subject(&self) -> String {
        match self {
            RunEvent::RunStarted(p) => format!("run.{}.started", p.run_id),
            RunEvent::JobSkipped(p) => format!("run.{}.job.{}.skipped", p.run_id, p.job),
            RunEvent::JobDispatched(p) => format!("run.{}.job.{}.dispatched", p.run_id, p.job),
            RunEvent::JobCompleted(p) => format!("run.{}.job.{}.completed", p.run_id, p.job),
            RunEvent::GateEvaluated(p) => format!("run.{}.gate.{}.evaluated", p.run_id, p.result.name),
            RunEvent::RunCompleted(p) => format!("run.{}.completed", p.run_id),
        }
    }

    pub fn run_id(&self) -> RunId {
        match self {
            RunEvent::RunStarted(p) => p.run_id,
            RunEvent::JobSkipped(p) => p.run_id,
            RunEvent::JobDispatched(p) => p.run_id,
            RunEvent::JobCompleted(p) => p.run_id,
            RunEvent::GateEvaluated(p) => p.run_id,
            RunEvent::RunCompleted(p) => p.run_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunStartedPayload {
    pub run_id: RunId,
    pub workflow: String,
    pub trigger: TriggerContext,
    pub instances: usize,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobSkippedPayload {
    pub run_id: RunId,
    pub job: JobKey,
    pub display_name: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobDispatchedPayload {
    pub run_id: RunId,
    pub job: JobKey,
    pub display_name: String,
    pub platform: Option<Platform>,
    pub dispatched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobCompletedPayload {
    pub run_id: RunId,
    pub job: JobKey,
    pub display_name: String,
    pub status: JobStatus,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GateEvaluatedPayload {
    pub run_id: RunId,
    pub result: GateResult,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunCompletedPayload {
    pub run_id: RunId,
    pub workflow: String,
    pub verdict: RunVerdict,
    pub jobs_succeeded: usize,
    pub jobs_failed: usize,
    pub jobs_skipped: usize,
    pub duration_ms: u64,
    pub completed_at: DateTime<Utc>,
}

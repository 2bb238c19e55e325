//! Port traits (hexagonal architecture).
//!
//! These traits define the interfaces between the scheduling core and the
//! collaborators it drives: the execution backend that runs job bodies and
//! the sink that receives run events.

use crate::Result;
use crate::events::RunEvent;
use crate::ids::{JobKey, RunId};
use crate::workflow::Platform;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// Everything a backend needs to execute one job instance.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
    pub run_id: RunId,
    pub job: JobKey,
    pub display_name: String,
    pub platform: Option<Platform>,
    pub matrix: BTreeMap<String, String>,
    pub variables: HashMap<String, String>,
    /// Script to run. `None` for jobs without a body.
    pub run: Option<String>,
    pub shell: String,
    pub timeout_minutes: Option<u32>,
}

/// Terminal outcome reported by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub success: bool,
    pub exit_code: i32,
    pub duration_ms: u64,
}

impl ExecutionResult {
    pub fn success(duration_ms: u64) -> Self {
        Self {
            success: true,
            exit_code: 0,
            duration_ms,
        }
    }

    pub fn failure(exit_code: i32, duration_ms: u64) -> Self {
        Self {
            success: false,
            exit_code,
            duration_ms,
        }
    }
}

/// Runs job bodies.
///
/// `Ok` carries exactly one terminal outcome. `Err` means the backend could
/// not start the job at all; the scheduler records the instance as failed.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    async fn execute(&self, request: DispatchRequest) -> Result<ExecutionResult>;

    /// Short name used in logs.
    fn name(&self) -> &str;
}

/// Receives run events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publish an event.
    async fn publish(&self, event: RunEvent) -> Result<()>;
}

/// Event sink that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<RunEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events received so far.
    pub fn events(&self) -> Vec<RunEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn publish(&self, event: RunEvent) -> Result<()> {
        self.events
            .lock()
            .map_err(|e| crate::Error::Internal(e.to_string()))?
            .push(event);
        Ok(())
    }
}

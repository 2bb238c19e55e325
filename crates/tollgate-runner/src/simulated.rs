//! Backend that reports scripted outcomes without executing anything.
//!
//! Used for dry runs and for rehearsing failures: jobs listed as failing
//! report exit code 1, jobs listed as unavailable are refused at dispatch.
//! Jobs are matched by template name (`test`) or instance key (`test[1]`).

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;
use tokio::time::{Duration, sleep};
use tollgate_core::ports::{DispatchRequest, ExecutionBackend, ExecutionResult};
use tollgate_core::{Error, JobKey, Result};
use tracing::debug;

#[derive(Debug, Default)]
pub struct SimulatedBackend {
    failing: HashSet<String>,
    unavailable: HashSet<String>,
    delay: Option<Duration>,
    dispatched: Mutex<Vec<JobKey>>,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing<I, S>(mut self, jobs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.failing.extend(jobs.into_iter().map(Into::into));
        self
    }

    pub fn unavailable<I, S>(mut self, jobs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unavailable.extend(jobs.into_iter().map(Into::into));
        self
    }

    /// Pretend every job takes this long.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Instances dispatched so far, in dispatch order.
    pub fn dispatched(&self) -> Vec<JobKey> {
        self.dispatched
            .lock()
            .map(|d| d.clone())
            .unwrap_or_default()
    }

    fn listed(set: &HashSet<String>, job: &JobKey) -> bool {
        set.contains(job.job()) || set.contains(&job.to_string())
    }
}

#[async_trait]
impl ExecutionBackend for SimulatedBackend {
    async fn execute(&self, request: DispatchRequest) -> Result<ExecutionResult> {
        self.dispatched
            .lock()
            .map_err(|e| Error::Internal(e.to_string()))?
            .push(request.job.clone());

        if Self::listed(&self.unavailable, &request.job) {
            return Err(Error::BackendDispatch {
                job: request.job.to_string(),
                message: "no runner available".to_string(),
            });
        }

        if let Some(delay) = self.delay {
            sleep(delay).await;
        }

        let duration_ms = self.delay.map(|d| d.as_millis() as u64).unwrap_or_default();
        if Self::listed(&self.failing, &request.job) {
            debug!(job = %request.job, "Simulating failure");
            Ok(ExecutionResult::failure(1, duration_ms))
        } else {
            debug!(job = %request.job, "Simulating success");
            Ok(ExecutionResult::success(duration_ms))
        }
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashMap};
    use tokio_test::{assert_err, assert_ok};
    use tollgate_core::RunId;

    fn request(job: JobKey) -> DispatchRequest {
        DispatchRequest {
            run_id: RunId::new(),
            display_name: job.to_string(),
            job,
            platform: None,
            matrix: BTreeMap::new(),
            variables: HashMap::new(),
            run: Some("cargo test".to_string()),
            shell: "bash".to_string(),
            timeout_minutes: None,
        }
    }

    #[tokio::test]
    async fn test_scripted_outcomes() {
        let backend = SimulatedBackend::new()
            .failing(["test[1]"])
            .unavailable(["deploy"]);

        let ok = assert_ok!(backend.execute(request(JobKey::matrixed("test", 0))).await);
        assert!(ok.success);

        let failed = assert_ok!(backend.execute(request(JobKey::matrixed("test", 1))).await);
        assert!(!failed.success);
        assert_eq!(failed.exit_code, 1);

        let refused = assert_err!(backend.execute(request(JobKey::single("deploy"))).await);
        assert!(matches!(refused, Error::BackendDispatch { .. }));

        assert_eq!(backend.dispatched().len(), 3);
    }
}

//! Shell-based job execution on the host.

use crate::runner::{OutputLine, OutputStream, RunnerConfig};
use async_trait::async_trait;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{Semaphore, mpsc};
use tokio::time::{Duration, timeout};
use tollgate_core::ports::{DispatchRequest, ExecutionBackend, ExecutionResult};
use tollgate_core::workflow::Platform;
use tollgate_core::{Error, JobKey, Result};
use tracing::{debug, info, warn};

/// Executes job bodies with `<shell> -c` on the host.
pub struct ShellBackend {
    config: RunnerConfig,
    permits: Arc<Semaphore>,
    output_tx: Option<mpsc::Sender<OutputLine>>,
}

impl ShellBackend {
    pub fn new(config: RunnerConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_parallel_jobs.max(1)));
        Self {
            config,
            permits,
            output_tx: None,
        }
    }

    /// Stream job output to a channel instead of the debug log.
    pub fn with_output(mut self, output_tx: mpsc::Sender<OutputLine>) -> Self {
        self.output_tx = Some(output_tx);
        self
    }

    fn check_platform(&self, request: &DispatchRequest) -> Result<()> {
        let Some(platform) = request.platform else {
            return Ok(());
        };
        let host = Platform::host();
        if platform == host {
            return Ok(());
        }
        if self.config.strict_platform {
            return Err(Error::BackendDispatch {
                job: request.job.to_string(),
                message: format!("targets {} but this host is {}", platform, host),
            });
        }
        warn!(job = %request.job, %platform, %host, "Running job for another platform on the host");
        Ok(())
    }

    fn environment(&self, request: &DispatchRequest) -> HashMap<String, String> {
        let mut env_vars = request.variables.clone();
        for (key, value) in &request.matrix {
            env_vars.insert(format!("MATRIX_{}", key.to_ascii_uppercase()), value.clone());
        }
        env_vars.insert("TOLLGATE_RUN_ID".to_string(), request.run_id.to_string());
        env_vars.insert("TOLLGATE_JOB".to_string(), request.job.to_string());
        env_vars
    }

    async fn execute_command(&self, command: &str, request: &DispatchRequest) -> Result<ExecutionResult> {
        let start = Instant::now();

        info!(job = %request.job, shell = %request.shell, "Executing job");

        let mut child = Command::new(&request.shell)
            .arg("-c")
            .arg(command)
            .current_dir(&self.config.workspace)
            .envs(self.environment(request))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::BackendDispatch {
                job: request.job.to_string(),
                message: format!("failed to spawn {}: {}", request.shell, e),
            })?;

        // Stream stdout and stderr
        let job = &request.job;
        let stdout_handle = child.stdout.take().map(|out| {
            tokio::spawn(stream_lines(out, OutputStream::Stdout, job.clone(), self.output_tx.clone()))
        });
        let stderr_handle = child.stderr.take().map(|err| {
            tokio::spawn(stream_lines(err, OutputStream::Stderr, job.clone(), self.output_tx.clone()))
        });

        let limit = request
            .timeout_minutes
            .or(self.config.default_timeout_minutes)
            .map(|minutes| Duration::from_secs(u64::from(minutes) * 60));

        let wait_result = match limit {
            Some(limit) => match timeout(limit, child.wait()).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(job = %request.job, timeout_secs = limit.as_secs(), "Job timed out, killing process");
                    let _ = child.kill().await;
                    return Ok(ExecutionResult::failure(-1, start.elapsed().as_millis() as u64));
                }
            },
            None => child.wait().await,
        };

        // Wait for output streaming to complete
        if let Some(handle) = stdout_handle {
            let _ = handle.await;
        }
        if let Some(handle) = stderr_handle {
            let _ = handle.await;
        }

        let status = wait_result.map_err(|e| Error::Internal(format!("Failed to wait for process: {}", e)))?;

        let exit_code = status.code().unwrap_or(-1);
        let duration_ms = start.elapsed().as_millis() as u64;

        debug!(job = %request.job, exit_code, duration_ms, "Command completed");

        Ok(if exit_code == 0 {
            ExecutionResult::success(duration_ms)
        } else {
            ExecutionResult::failure(exit_code, duration_ms)
        })
    }
}

impl Default for ShellBackend {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

#[async_trait]
impl ExecutionBackend for ShellBackend {
    async fn execute(&self, request: DispatchRequest) -> Result<ExecutionResult> {
        self.check_platform(&request)?;

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| Error::Internal(format!("Runner closed: {}", e)))?;

        match request.run.as_deref() {
            Some(command) => self.execute_command(command, &request).await,
            None => {
                debug!(job = %request.job, "Job has no body");
                Ok(ExecutionResult::success(0))
            }
        }
    }

    fn name(&self) -> &str {
        "shell"
    }
}

async fn stream_lines<R>(reader: R, stream: OutputStream, job: JobKey, tx: Option<mpsc::Sender<OutputLine>>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut line_number = 0u32;

    while let Ok(Some(content)) = lines.next_line().await {
        line_number += 1;
        match &tx {
            Some(tx) => {
                let output = OutputLine {
                    job: job.clone(),
                    stream,
                    content,
                    line_number,
                    timestamp: chrono::Utc::now(),
                };
                if tx.send(output).await.is_err() {
                    break;
                }
            }
            None => debug!(job = %job, ?stream, "{}", content),
        }
    }
}

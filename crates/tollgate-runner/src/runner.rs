//! Shared runner types.

use std::path::PathBuf;
use tollgate_core::JobKey;

/// Output line from job execution.
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub job: JobKey,
    pub stream: OutputStream,
    pub content: String,
    pub line_number: u32,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Output stream type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Configuration for job execution.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Upper bound on concurrently executing jobs.
    pub max_parallel_jobs: usize,
    /// Refuse jobs that target another platform instead of running them on the host.
    pub strict_platform: bool,
    /// Applied when a job sets no `timeout_minutes`.
    pub default_timeout_minutes: Option<u32>,
    pub workspace: PathBuf,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_parallel_jobs: 4,
            strict_platform: false,
            default_timeout_minutes: Some(60),
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

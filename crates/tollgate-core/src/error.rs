//! Error types for Tollgate.

use crate::guard::GuardError;
use crate::run::JobStatus;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Graph build errors (fatal, the run never starts)
    #[error("Cyclic dependency between jobs: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("Job '{job}' needs unknown job '{dependency}'")]
    UnknownDependency { job: String, dependency: String },

    #[error("Guard of job '{job}' cannot be evaluated: {source}")]
    GuardEvaluation {
        job: String,
        #[source]
        source: GuardError,
    },

    #[error("Invalid workflow: {0}")]
    InvalidWorkflow(String),

    #[error("Workflow has no jobs")]
    EmptyWorkflow,

    // Dispatch errors (contained to one job instance)
    #[error("Backend could not start job '{job}': {message}")]
    BackendDispatch { job: String, message: String },

    // Invariant breaches
    #[error("Job '{job}' cannot move from {from} to {to}")]
    InvalidTransition {
        job: String,
        from: JobStatus,
        to: JobStatus,
    },

    // Infrastructure errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error aborts a run before anything is dispatched.
    pub fn is_build_error(&self) -> bool {
        matches!(
            self,
            Error::CyclicDependency { .. }
                | Error::UnknownDependency { .. }
                | Error::GuardEvaluation { .. }
                | Error::InvalidWorkflow(_)
                | Error::EmptyWorkflow
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_lists_path() {
        let err = Error::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Cyclic dependency between jobs: a -> b -> a");
        assert!(err.is_build_error());
    }

    #[test]
    fn test_dispatch_error_is_not_fatal() {
        let err = Error::BackendDispatch {
            job: "test[0]".into(),
            message: "no runner".into(),
        };
        assert!(!err.is_build_error());
    }
}

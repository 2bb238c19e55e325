//! Gate evaluation.
//!
//! A gate is a job without a body whose status summarizes its dependencies.
//! It is evaluated inline by the scheduler and never reaches a backend.

use crate::dag::JobInstance;
use std::collections::{BTreeMap, HashMap};
use tollgate_core::guard::{GuardScope, Truth, all_succeeded};
use tollgate_core::run::{GateResult, JobStatus, SkipReason, TriggerContext};
use tollgate_core::workflow::GateKind;
use tollgate_core::{Error, Result};

/// Fold dependency statuses into a gate status.
///
/// Skipped counts as "not Success" for both kinds.
pub fn aggregate(kind: GateKind, statuses: &[JobStatus]) -> JobStatus {
    let ok = match kind {
        GateKind::AllSucceeded => all_succeeded(statuses),
        GateKind::AnyFailed => !all_succeeded(statuses),
    };
    if ok { JobStatus::Success } else { JobStatus::Failure }
}

/// Outcome of evaluating one gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateDecision {
    pub status: JobStatus,
    pub skip_reason: Option<SkipReason>,
    pub result: GateResult,
}

pub struct GateEvaluator;

impl GateEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Decide the terminal status of `gate` once all `dependencies` are terminal.
    pub fn evaluate(
        &self,
        gate: &JobInstance,
        dependencies: &[&JobInstance],
        trigger: &TriggerContext,
        variables: &HashMap<String, String>,
    ) -> Result<GateDecision> {
        let kind = gate
            .gate
            .ok_or_else(|| Error::Internal(format!("job '{}' is not a gate", gate.key)))?;

        let statuses: Vec<JobStatus> = dependencies.iter().map(|d| d.status()).collect();
        let summary: BTreeMap<String, JobStatus> = dependencies
            .iter()
            .map(|d| (d.key.to_string(), d.status()))
            .collect();

        let guard_false = match &gate.guard {
            Some(guard) => {
                let scope = GuardScope::new(trigger, variables, &gate.matrix).with_dependencies(&statuses);
                let truth = guard.evaluate(&scope).map_err(|source| Error::GuardEvaluation {
                    job: gate.key.to_string(),
                    source,
                })?;
                (truth == Truth::False).then(|| guard.source().to_string())
            }
            None => None,
        };

        let (status, skip_reason) = match guard_false {
            Some(guard) => (JobStatus::Skipped, Some(SkipReason::GuardFalse { guard })),
            None => (aggregate(kind, &statuses), None),
        };

        Ok(GateDecision {
            status,
            skip_reason,
            result: GateResult {
                name: gate.key.job().to_string(),
                kind,
                status,
                dependencies: summary,
            },
        })
    }
}

impl Default for GateEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use JobStatus::*;

    #[test]
    fn test_all_succeeded() {
        assert_eq!(aggregate(GateKind::AllSucceeded, &[Success, Success]), Success);
        assert_eq!(aggregate(GateKind::AllSucceeded, &[Success, Failure]), Failure);
        assert_eq!(aggregate(GateKind::AllSucceeded, &[Success, Skipped]), Failure);
        assert_eq!(aggregate(GateKind::AllSucceeded, &[]), Success);
    }

    #[test]
    fn test_any_failed() {
        assert_eq!(aggregate(GateKind::AnyFailed, &[Success, Success]), Failure);
        assert_eq!(aggregate(GateKind::AnyFailed, &[Success, Failure]), Success);
        assert_eq!(aggregate(GateKind::AnyFailed, &[Skipped]), Success);
        assert_eq!(aggregate(GateKind::AnyFailed, &[]), Failure);
    }

    #[test]
    fn test_kinds_are_complementary() {
        let cases: [&[JobStatus]; 4] = [&[Success], &[Failure], &[Success, Skipped], &[Failure, Skipped]];
        for statuses in cases {
            assert_ne!(
                aggregate(GateKind::AllSucceeded, statuses),
                aggregate(GateKind::AnyFailed, statuses)
            );
        }
    }
}

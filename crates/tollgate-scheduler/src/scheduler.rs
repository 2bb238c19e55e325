//! Run scheduling.
//!
//! The scheduler owns the status table of one run. It repeatedly settles
//! every instance whose dependencies are terminal (skip, evaluate a gate, or
//! dispatch to the backend) and then waits for any running instance to
//! finish. Only the scheduling loop mutates the graph.

use crate::dag::{GraphBuilder, JobGraph};
use crate::gate::GateEvaluator;
use crate::triggers::{RawEvent, TriggerClassifier};
use chrono::Utc;
use petgraph::graph::NodeIndex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tollgate_core::events::*;
use tollgate_core::guard::{GuardScope, Truth, any_failed};
use tollgate_core::ports::{DispatchRequest, EventSink, ExecutionBackend, ExecutionResult};
use tollgate_core::run::{GateResult, JobStatus, RunReport, SkipReason, resolve_verdict};
use tollgate_core::workflow::WorkflowDefinition;
use tollgate_core::{Error, JobKey, Result, RunId};
use tracing::{debug, info, warn};

type TaskOutput = (Result<ExecutionResult>, u64);

/// What to do with an instance whose dependencies are all terminal.
enum Settlement {
    Skip(SkipReason),
    Gate,
    Dispatch,
    Fail(String),
}

/// Drives a job graph to completion against an execution backend.
pub struct Scheduler {
    backend: Arc<dyn ExecutionBackend>,
    events: Option<Arc<dyn EventSink>>,
    classifier: TriggerClassifier,
    builder: GraphBuilder,
    gates: GateEvaluator,
}

impl Scheduler {
    pub fn new(backend: Arc<dyn ExecutionBackend>) -> Self {
        Self {
            backend,
            events: None,
            classifier: TriggerClassifier::new(),
            builder: GraphBuilder::new(),
            gates: GateEvaluator::new(),
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    /// Classify the event, build the graph and run it.
    pub async fn run_workflow(&self, workflow: &WorkflowDefinition, event: &RawEvent) -> Result<RunReport> {
        let trigger = self.classifier.classify(&workflow.triggers, event);
        let graph = self.builder.build(workflow, &trigger)?;
        self.run(graph).await
    }

    /// Run a graph until every instance is terminal.
    pub async fn run(&self, mut graph: JobGraph) -> Result<RunReport> {
        let run_id = RunId::new();
        let started_at = Utc::now();
        let start = Instant::now();

        info!(
            run_id = %run_id,
            workflow = %graph.workflow(),
            trigger = %graph.trigger().kind,
            applicable = graph.trigger().applicable,
            instances = graph.len(),
            backend = self.backend.name(),
            "Starting run"
        );

        self.publish(RunEvent::RunStarted(RunStartedPayload {
            run_id,
            workflow: graph.workflow().to_string(),
            trigger: graph.trigger().clone(),
            instances: graph.len(),
            started_at,
        }))
        .await;

        for instance in graph.instances().filter(|i| i.status() == JobStatus::Skipped) {
            if let Some(reason) = instance.skip_reason() {
                self.publish_skip(run_id, &graph, instance.key.clone(), reason.clone())
                    .await;
            }
        }

        let mut join_set: JoinSet<TaskOutput> = JoinSet::new();
        let mut running: HashMap<tokio::task::Id, NodeIndex> = HashMap::new();

        loop {
            self.settle(run_id, &mut graph, &mut join_set, &mut running)
                .await?;

            if join_set.is_empty() {
                break;
            }

            match join_set.join_next_with_id().await {
                Some(Ok((id, (result, duration_ms)))) => {
                    let idx = running
                        .remove(&id)
                        .ok_or_else(|| Error::Internal(format!("unknown task {}", id)))?;
                    self.finish(run_id, &mut graph, idx, result, duration_ms)
                        .await?;
                }
                Some(Err(e)) => {
                    let idx = running
                        .remove(&e.id())
                        .ok_or_else(|| Error::Internal(format!("unknown task {}", e.id())))?;
                    let key = graph.node(idx).key.clone();
                    warn!(run_id = %run_id, job = %key, error = %e, "Job task crashed");
                    self.finish(
                        run_id,
                        &mut graph,
                        idx,
                        Err(Error::Internal(e.to_string())),
                        0,
                    )
                    .await?;
                }
                None => break,
            }
        }

        if !graph.is_complete() {
            return Err(Error::Internal(
                "run ended with non-terminal instances".to_string(),
            ));
        }

        let jobs = graph.reports();
        let gates: Vec<GateResult> = graph
            .instances()
            .filter_map(|gate| {
                gate.gate.map(|kind| GateResult {
                    name: gate.key.job().to_string(),
                    kind,
                    status: gate.status(),
                    dependencies: graph
                        .dependencies_of(&gate.key)
                        .iter()
                        .map(|d| (d.key.to_string(), d.status()))
                        .collect(),
                })
            })
            .collect();
        let verdict = resolve_verdict(graph.trigger(), &gates, &jobs);

        let completed_at = Utc::now();
        let duration_ms = start.elapsed().as_millis() as u64;

        let count = |status: JobStatus| {
            graph
                .instances()
                .filter(|i| !i.is_gate() && i.status() == status)
                .count()
        };
        let (jobs_succeeded, jobs_failed, jobs_skipped) = (
            count(JobStatus::Success),
            count(JobStatus::Failure),
            count(JobStatus::Skipped),
        );

        info!(
            run_id = %run_id,
            %verdict,
            succeeded = jobs_succeeded,
            failed = jobs_failed,
            skipped = jobs_skipped,
            duration_ms,
            "Run completed"
        );

        self.publish(RunEvent::RunCompleted(RunCompletedPayload {
            run_id,
            workflow: graph.workflow().to_string(),
            verdict,
            jobs_succeeded,
            jobs_failed,
            jobs_skipped,
            duration_ms,
            completed_at,
        }))
        .await;

        Ok(RunReport {
            run_id,
            workflow: graph.workflow().to_string(),
            trigger: graph.trigger().clone(),
            jobs,
            gates,
            verdict,
            started_at,
            completed_at,
            duration_ms,
        })
    }

    /// One pass in topological order over every pending instance whose
    /// dependencies are terminal. Skips and gates settle within the pass;
    /// dispatched instances hold their dependents back until they finish.
    async fn settle(
        &self,
        run_id: RunId,
        graph: &mut JobGraph,
        join_set: &mut JoinSet<TaskOutput>,
        running: &mut HashMap<tokio::task::Id, NodeIndex>,
    ) -> Result<()> {
        let order = graph.order().to_vec();
        for idx in order {
            if graph.node(idx).status() != JobStatus::Pending {
                continue;
            }
            let deps = graph.dependency_indices(idx);
            if !deps.iter().all(|&d| graph.node(d).status().is_terminal()) {
                continue;
            }

            let key = graph.node(idx).key.clone();
            match self.settlement(graph, idx, &deps) {
                Settlement::Skip(reason) => {
                    debug!(run_id = %run_id, job = %key, %reason, "Skipping job");
                    graph.skip(idx, reason.clone())?;
                    self.publish_skip(run_id, graph, key, reason).await;
                }
                Settlement::Gate => self.evaluate_gate(run_id, graph, idx).await?,
                Settlement::Fail(message) => {
                    warn!(run_id = %run_id, job = %key, error = %message, "Guard failed at run time");
                    graph.complete(idx, JobStatus::Failure, None, 0, Some(message.clone()))?;
                    self.publish_completion(run_id, graph, idx).await;
                }
                Settlement::Dispatch => {
                    let request = self.dispatch_request(run_id, graph, idx);
                    graph.transition(idx, JobStatus::Running)?;

                    info!(run_id = %run_id, job = %key, platform = ?request.platform, "Dispatching job");
                    self.publish(RunEvent::JobDispatched(JobDispatchedPayload {
                        run_id,
                        job: key,
                        display_name: request.display_name.clone(),
                        platform: request.platform,
                        dispatched_at: Utc::now(),
                    }))
                    .await;

                    let backend = Arc::clone(&self.backend);
                    let handle = join_set.spawn(async move {
                        let started = Instant::now();
                        let result = backend.execute(request).await;
                        (result, started.elapsed().as_millis() as u64)
                    });
                    running.insert(handle.id(), idx);
                }
            }
        }
        Ok(())
    }

    fn settlement(&self, graph: &JobGraph, idx: NodeIndex, deps: &[NodeIndex]) -> Settlement {
        let instance = graph.node(idx);
        if instance.is_gate() {
            return Settlement::Gate;
        }

        let statuses: Vec<JobStatus> = deps.iter().map(|&d| graph.node(d).status()).collect();

        // Skipped dependencies are terminal and do not block.
        if instance.fails_fast() && any_failed(&statuses) {
            let mut blocking: Vec<_> = deps
                .iter()
                .map(|&d| graph.node(d))
                .filter(|d| d.status() == JobStatus::Failure)
                .map(|d| d.key.to_string())
                .collect();
            blocking.sort();
            return Settlement::Skip(SkipReason::DependencyFailed {
                dependency: blocking.into_iter().next().unwrap_or_default(),
            });
        }

        let Some(guard) = &instance.guard else {
            return Settlement::Dispatch;
        };
        let scope = GuardScope::new(graph.trigger(), graph.variables(), &instance.matrix)
            .with_dependencies(&statuses);
        match guard.evaluate(&scope) {
            Ok(Truth::False) => Settlement::Skip(SkipReason::GuardFalse {
                guard: guard.source().to_string(),
            }),
            Ok(_) => Settlement::Dispatch,
            Err(e) => Settlement::Fail(e.to_string()),
        }
    }

    async fn evaluate_gate(&self, run_id: RunId, graph: &mut JobGraph, idx: NodeIndex) -> Result<()> {
        let key = graph.node(idx).key.clone();
        let decision = {
            let deps = graph.dependencies_of(&key);
            self.gates
                .evaluate(graph.node(idx), &deps, graph.trigger(), graph.variables())?
        };

        match decision.skip_reason {
            Some(reason) => graph.skip(idx, reason)?,
            None => graph.complete(idx, decision.status, None, 0, None)?,
        }

        info!(
            run_id = %run_id,
            gate = %key,
            kind = %decision.result.kind,
            status = %decision.status,
            "Gate evaluated"
        );

        self.publish(RunEvent::GateEvaluated(GateEvaluatedPayload {
            run_id,
            result: decision.result,
        }))
        .await;
        Ok(())
    }

    async fn finish(
        &self,
        run_id: RunId,
        graph: &mut JobGraph,
        idx: NodeIndex,
        result: Result<ExecutionResult>,
        duration_ms: u64,
    ) -> Result<()> {
        let key = graph.node(idx).key.clone();
        match result {
            Ok(outcome) => {
                let status = if outcome.success {
                    JobStatus::Success
                } else {
                    JobStatus::Failure
                };
                info!(run_id = %run_id, job = %key, %status, exit_code = outcome.exit_code, "Job finished");
                graph.complete(idx, status, Some(outcome.exit_code), outcome.duration_ms, None)?;
            }
            Err(e) => {
                warn!(run_id = %run_id, job = %key, error = %e, "Job could not be executed");
                graph.complete(idx, JobStatus::Failure, None, duration_ms, Some(e.to_string()))?;
            }
        }
        self.publish_completion(run_id, graph, idx).await;
        Ok(())
    }

    fn dispatch_request(&self, run_id: RunId, graph: &JobGraph, idx: NodeIndex) -> DispatchRequest {
        let instance = graph.node(idx);
        DispatchRequest {
            run_id,
            job: instance.key.clone(),
            display_name: instance.display_name.clone(),
            platform: instance.platform,
            matrix: instance.matrix.clone(),
            variables: instance.variables.clone(),
            run: instance.run.clone(),
            shell: instance.shell.clone(),
            timeout_minutes: instance.timeout_minutes,
        }
    }

    async fn publish_skip(&self, run_id: RunId, graph: &JobGraph, key: JobKey, reason: SkipReason) {
        let display_name = graph
            .instance(&key)
            .map(|i| i.display_name.clone())
            .unwrap_or_else(|| key.to_string());
        self.publish(RunEvent::JobSkipped(JobSkippedPayload {
            run_id,
            job: key,
            display_name,
            reason,
        }))
        .await;
    }

    async fn publish_completion(&self, run_id: RunId, graph: &JobGraph, idx: NodeIndex) {
        let report = graph.node(idx).to_report();
        self.publish(RunEvent::JobCompleted(JobCompletedPayload {
            run_id,
            job: report.key,
            display_name: report.display_name,
            status: report.status,
            exit_code: report.exit_code,
            duration_ms: report.duration_ms.unwrap_or_default(),
            error: report.error,
        }))
        .await;
    }

    async fn publish(&self, event: RunEvent) {
        let Some(sink) = &self.events else {
            return;
        };
        let subject = event.subject();
        if let Err(e) = sink.publish(event).await {
            warn!(subject = %subject, error = %e, "Failed to publish run event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use tollgate_core::ports::MemoryEventSink;

    /// Backend that fails the listed jobs and records dispatch order.
    struct ScriptedBackend {
        failing: Vec<&'static str>,
        dispatched: Mutex<Vec<JobKey>>,
    }

    impl ScriptedBackend {
        fn new(failing: Vec<&'static str>) -> Self {
            Self {
                failing,
                dispatched: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ExecutionBackend for ScriptedBackend {
        async fn execute(&self, request: DispatchRequest) -> Result<ExecutionResult> {
            self.dispatched.lock().unwrap().push(request.job.clone());
            if request.job.job == "explode" {
                panic!("backend crashed");
            }
            if self.failing.contains(&request.job.job.as_str()) {
                Ok(ExecutionResult::failure(1, 1))
            } else {
                Ok(ExecutionResult::success(1))
            }
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn workflow(jobs: serde_json::Value) -> WorkflowDefinition {
        serde_json::from_value(json!({ "name": "ci", "jobs": jobs })).unwrap()
    }

    #[tokio::test]
    async fn test_fail_fast_skips_dependents() {
        let backend = Arc::new(ScriptedBackend::new(vec!["build"]));
        let wf = workflow(json!([
            { "name": "build", "run": "make" },
            { "name": "test", "needs": ["build"], "run": "make test" },
            { "name": "cleanup", "needs": ["build"], "if": "always()", "run": "make clean" },
            { "name": "report", "needs": ["build"], "if": "failure()", "run": "make report" },
        ]));

        let report = Scheduler::new(backend.clone())
            .run_workflow(&wf, &RawEvent::push("main"))
            .await
            .unwrap();

        assert_eq!(report.statuses_of("build"), vec![JobStatus::Failure]);
        assert_eq!(report.statuses_of("test"), vec![JobStatus::Skipped]);
        assert_eq!(report.statuses_of("cleanup"), vec![JobStatus::Success]);
        assert_eq!(report.statuses_of("report"), vec![JobStatus::Success]);

        let dispatched = backend.dispatched.lock().unwrap();
        assert!(!dispatched.contains(&JobKey::single("test")));
        assert_eq!(dispatched.len(), 3);
    }

    #[tokio::test]
    async fn test_skipped_dependency_does_not_block() {
        let backend = Arc::new(ScriptedBackend::new(vec!["a"]));
        let wf = workflow(json!([
            { "name": "a" },
            { "name": "b", "needs": ["a"] },
            { "name": "c", "needs": ["b"] },
        ]));

        let report = Scheduler::new(backend.clone())
            .run_workflow(&wf, &RawEvent::push("main"))
            .await
            .unwrap();

        let b = report.jobs.iter().find(|j| j.key.job == "b").unwrap();
        assert_eq!(b.status, JobStatus::Skipped);
        assert_eq!(
            b.skip_reason,
            Some(SkipReason::DependencyFailed {
                dependency: "a".to_string()
            })
        );
        // b never ran, so nothing failed upstream of c
        assert_eq!(report.statuses_of("c"), vec![JobStatus::Success]);
        assert!(backend.dispatched.lock().unwrap().contains(&JobKey::single("c")));
    }

    #[tokio::test]
    async fn test_guard_false_dependency_still_lets_dependents_run() {
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let wf = workflow(json!([
            { "name": "deploy", "if": "event.branch == 'release'", "run": "make deploy" },
            { "name": "notify", "needs": ["deploy"], "run": "make notify" },
        ]));

        let report = Scheduler::new(backend.clone())
            .run_workflow(&wf, &RawEvent::push("main"))
            .await
            .unwrap();

        assert_eq!(report.statuses_of("deploy"), vec![JobStatus::Skipped]);
        assert_eq!(report.statuses_of("notify"), vec![JobStatus::Success]);
        assert_eq!(
            *backend.dispatched.lock().unwrap(),
            vec![JobKey::single("notify")]
        );
    }

    #[tokio::test]
    async fn test_crashed_task_marks_failure() {
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let wf = workflow(json!([
            { "name": "explode" },
            { "name": "after", "needs": ["explode"] },
        ]));

        let report = Scheduler::new(backend)
            .run_workflow(&wf, &RawEvent::push("main"))
            .await
            .unwrap();

        let explode = report.jobs.iter().find(|j| j.key.job == "explode").unwrap();
        assert_eq!(explode.status, JobStatus::Failure);
        assert!(explode.error.is_some());
        assert_eq!(report.statuses_of("after"), vec![JobStatus::Skipped]);
    }

    #[tokio::test]
    async fn test_events_follow_the_run() {
        let backend = Arc::new(ScriptedBackend::new(vec![]));
        let sink = Arc::new(MemoryEventSink::new());
        let wf = workflow(json!([
            { "name": "build" },
            { "name": "ok", "needs": ["build"], "gate": "all_succeeded" },
        ]));

        let report = Scheduler::new(backend)
            .with_event_sink(sink.clone())
            .run_workflow(&wf, &RawEvent::push("main"))
            .await
            .unwrap();

        let events = sink.events();
        assert!(matches!(events.first(), Some(RunEvent::RunStarted(_))));
        assert!(matches!(events.last(), Some(RunEvent::RunCompleted(_))));
        assert!(events.iter().all(|e| e.run_id() == report.run_id));

        let kinds: Vec<&str> = events
            .iter()
            .map(|e| match e {
                RunEvent::RunStarted(_) => "started",
                RunEvent::JobSkipped(_) => "skipped",
                RunEvent::JobDispatched(_) => "dispatched",
                RunEvent::JobCompleted(_) => "completed",
                RunEvent::GateEvaluated(_) => "gate",
                RunEvent::RunCompleted(_) => "done",
            })
            .collect();
        assert_eq!(kinds, vec!["started", "dispatched", "completed", "gate", "done"]);
    }
}

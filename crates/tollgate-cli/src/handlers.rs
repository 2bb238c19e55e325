//! Command handlers.

use crate::commands::EventArgs;
use crate::config::{CliConfig, OutputFormat};
use crate::workflow::{raw_event, resolve_workflow};
use anyhow::{Context, Result, anyhow};
use console::style;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tollgate_core::ports::ExecutionBackend;
use tollgate_core::run::{JobReport, JobStatus, RunReport, SkipReason, TriggerContext};
use tollgate_core::workflow::{GateKind, Platform, TriggerKind, WorkflowDefinition};
use tollgate_runner::{OutputLine, OutputStream, ShellBackend, SimulatedBackend};
use tollgate_scheduler::{GraphBuilder, JobGraph, Scheduler, TriggerClassifier};

const TEMPLATE: &str = r#"name: ci

triggers:
  - type: push
    branches: ["main"]
  - type: pull_request

jobs:
  - name: test
    runs_on: "${{ matrix.os }}"
    matrix:
      dimensions:
        os: [ubuntu-latest, macos-latest, windows-latest]
    run: cargo test

  - name: fmt
    runs_on: ubuntu-latest
    run: cargo fmt --all -- --check

  - name: lint
    runs_on: ubuntu-latest
    run: cargo clippy -- -D warnings

  # Reports success when everything above passed on a push.
  - name: success
    needs: [test, fmt, lint]
    if: "${{ event.kind == 'push' }}"
    gate: all_succeeded

  # Reports success when anything above failed on a push.
  - name: failure
    needs: [test, fmt, lint]
    if: "${{ event.kind == 'push' && !success() }}"
    gate: any_failed
"#;

/// Write a starter workflow.
pub fn init(path: &str) -> Result<()> {
    let path = Path::new(path);

    if path.exists() {
        println!("{} {} already exists", style("!").yellow(), path.display());
        return Ok(());
    }

    std::fs::write(path, TEMPLATE).with_context(|| format!("writing {}", path.display()))?;
    println!("{} Created {}", style("✓").green(), path.display());
    Ok(())
}

/// Validate a workflow file.
pub fn validate(path: Option<&str>) -> Result<()> {
    let (file, workflow) = resolve_workflow(path)?;

    // Structure is checked against a push to the default branch; guards that
    // depend on the event only decide skips, not validity.
    let trigger = TriggerContext {
        kind: TriggerKind::Push,
        event_name: "push".to_string(),
        branch: None,
        applicable: true,
    };
    let graph = GraphBuilder::new().build(&workflow, &trigger)?;

    println!(
        "{} Workflow \"{}\" is valid ({})",
        style("✓").green(),
        workflow.name,
        file.display()
    );
    println!("  Jobs: {} ({} instances)", workflow.jobs.len(), graph.len());

    for job in &workflow.jobs {
        let instances = graph.instances_of(&job.name).len();
        let detail = match job.gate {
            Some(kind) => format!("gate, {}", kind),
            None if instances > 1 => format!("{} instances", instances),
            None => "job".to_string(),
        };
        let needs = if job.needs.is_empty() {
            String::new()
        } else {
            format!(" ← {}", job.needs.join(", "))
        };
        println!("    - {} ({}){}", job.name, detail, style(needs).dim());
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct PlanView {
    workflow: String,
    trigger: TriggerContext,
    instances: Vec<PlannedInstance>,
}

#[derive(Debug, Serialize)]
struct PlannedInstance {
    key: String,
    display_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    platform: Option<Platform>,
    status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    skip_reason: Option<SkipReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gate: Option<GateKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    guard: Option<String>,
    needs: Vec<String>,
}

impl PlanView {
    fn new(graph: &JobGraph) -> Self {
        Self {
            workflow: graph.workflow().to_string(),
            trigger: graph.trigger().clone(),
            instances: graph
                .instances()
                .map(|i| PlannedInstance {
                    key: i.key.to_string(),
                    display_name: i.display_name.clone(),
                    platform: i.platform,
                    status: i.status(),
                    skip_reason: i.skip_reason().cloned(),
                    gate: i.gate,
                    guard: i.guard.as_ref().map(|g| g.source().to_string()),
                    needs: graph
                        .dependencies_of(&i.key)
                        .iter()
                        .map(|d| d.key.to_string())
                        .collect(),
                })
                .collect(),
        }
    }
}

/// Show the graph an event would produce.
pub fn plan(config: &CliConfig, path: Option<&str>, event: &EventArgs, output: Option<OutputFormat>) -> Result<()> {
    let (_, workflow) = resolve_workflow(path)?;
    let event = raw_event(event);
    let trigger = TriggerClassifier::new().classify(&workflow.triggers, &event);
    let graph = GraphBuilder::new().build(&workflow, &trigger)?;
    let view = PlanView::new(&graph);

    match output.unwrap_or(config.output_format) {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&view)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&view)?),
        OutputFormat::Table => {
            println!(
                "\n{} Plan for {} ({})\n",
                style("▶").cyan().bold(),
                style(&view.workflow).bold(),
                describe_trigger(&view.trigger)
            );
            for instance in &view.instances {
                let marker = match instance.status {
                    JobStatus::Skipped => style("○").dim(),
                    _ if instance.gate.is_some() => style("◆").magenta(),
                    _ => style("●").cyan(),
                };
                let mut line = format!("  {} {}", marker, instance.display_name);
                if let Some(platform) = instance.platform {
                    line.push_str(&format!(" [{}]", platform));
                }
                if let Some(kind) = instance.gate {
                    line.push_str(&format!(" gate: {}", kind));
                }
                println!("{}", line);
                if !instance.needs.is_empty() {
                    println!("      {}", style(format!("needs {}", instance.needs.join(", "))).dim());
                }
                if let Some(guard) = &instance.guard {
                    println!("      {}", style(format!("if {}", guard)).dim());
                }
                if let Some(reason) = &instance.skip_reason {
                    println!("      {}", style(format!("skipped: {}", reason)).yellow());
                }
            }
            println!();
        }
    }
    Ok(())
}

/// Options of a `run` invocation.
pub struct RunOptions<'a> {
    pub path: Option<&'a str>,
    pub event: &'a EventArgs,
    pub gate: Option<&'a str>,
    pub dry_run: bool,
    pub fail: &'a [String],
    pub output: Option<OutputFormat>,
}

/// Run a workflow. Returns the process exit code.
pub async fn run(config: &CliConfig, options: RunOptions<'_>) -> Result<i32> {
    let (_, workflow) = resolve_workflow(options.path)?;
    let event = raw_event(options.event);
    let format = options.output.unwrap_or(config.output_format);
    let table = format == OutputFormat::Table;

    if let Some(gate) = options.gate {
        check_gate(&workflow, gate)?;
    }

    if table {
        println!(
            "\n{} Running workflow: {}",
            style("▶").cyan().bold(),
            style(&workflow.name).bold()
        );
    }

    let simulated = options.dry_run || !options.fail.is_empty();
    let mut printer = None;
    let backend: Arc<dyn ExecutionBackend> = if simulated {
        Arc::new(SimulatedBackend::new().failing(options.fail.iter().cloned()))
    } else if table {
        let (tx, rx) = mpsc::channel(256);
        printer = Some(tokio::spawn(print_output(rx)));
        Arc::new(ShellBackend::new(config.runner_config()).with_output(tx))
    } else {
        Arc::new(ShellBackend::new(config.runner_config()))
    };

    let report = Scheduler::new(backend)
        .run_workflow(&workflow, &event)
        .await;

    // The backend owned the output sender; it is gone once the run is.
    if let Some(printer) = printer {
        let _ = printer.await;
    }
    let report = report?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&report)?),
        OutputFormat::Table => print_report(&report, simulated),
    }

    match options.gate {
        Some(name) => report
            .gate(name)
            .map(|g| g.exit_code())
            .ok_or_else(|| anyhow!("Gate '{}' produced no result", name)),
        None => Ok(report.exit_code()),
    }
}

fn check_gate(workflow: &WorkflowDefinition, name: &str) -> Result<()> {
    if workflow.gates().any(|g| g.name == name) {
        return Ok(());
    }
    let known: Vec<&str> = workflow.gates().map(|g| g.name.as_str()).collect();
    Err(anyhow!(
        "Workflow has no gate named '{}' (gates: {})",
        name,
        if known.is_empty() { "none".to_string() } else { known.join(", ") }
    ))
}

async fn print_output(mut rx: mpsc::Receiver<OutputLine>) {
    while let Some(line) = rx.recv().await {
        let prefix = style(format!("[{}]", line.job)).dim();
        match line.stream {
            OutputStream::Stdout => println!("  {} {}", prefix, line.content),
            OutputStream::Stderr => eprintln!("  {} {}", prefix, line.content),
        }
    }
}

fn describe_trigger(trigger: &TriggerContext) -> String {
    let mut text = trigger.event_name.clone();
    if let Some(branch) = &trigger.branch {
        text.push_str(&format!(" on {}", branch));
    }
    if !trigger.applicable {
        text.push_str(", not applicable");
    }
    text
}

fn print_job(job: &JobReport) {
    let duration = job
        .duration_ms
        .map(|ms| format!(" ({}ms)", ms))
        .unwrap_or_default();
    match job.status {
        JobStatus::Success => println!("  {} {}{}", style("✓").green(), job.display_name, style(duration).dim()),
        JobStatus::Failure => {
            let detail = match (&job.error, job.exit_code) {
                (Some(error), _) => error.clone(),
                (None, Some(code)) => format!("exit code {}", code),
                (None, None) => "failed".to_string(),
            };
            println!(
                "  {} {}{} {}",
                style("✗").red(),
                job.display_name,
                style(duration).dim(),
                style(detail).red()
            );
        }
        JobStatus::Skipped => {
            let reason = job
                .skip_reason
                .as_ref()
                .map(|r| format!(" {}", r))
                .unwrap_or_default();
            println!("  {} {}{}", style("○").dim(), job.display_name, style(reason).dim());
        }
        JobStatus::Pending | JobStatus::Running => {
            println!("  {} {} {}", style("?").yellow(), job.display_name, job.status);
        }
    }
}

fn print_report(report: &RunReport, simulated: bool) {
    println!(
        "\n  {}{}\n",
        describe_trigger(&report.trigger),
        if simulated { ", simulated" } else { "" }
    );

    let gates: Vec<&str> = report.gates.iter().map(|g| g.name.as_str()).collect();
    for job in report.jobs.iter().filter(|j| !gates.contains(&j.key.job())) {
        print_job(job);
    }

    if !report.gates.is_empty() {
        println!("\n  Gates:");
        for gate in &report.gates {
            let marker = match gate.status {
                JobStatus::Success => style("✓").green(),
                JobStatus::Failure => style("✗").red(),
                _ => style("○").dim(),
            };
            println!("  {} {} ({}) {}", marker, gate.name, gate.kind, gate.status);
        }
    }

    let verdict = match report.exit_code() {
        0 => style(report.verdict.to_string()).green().bold(),
        _ => style(report.verdict.to_string()).red().bold(),
    };
    println!("\n  Verdict: {} in {}ms\n", verdict, report.duration_ms);
}

/// Print the JSON Schema of the workflow format.
pub fn schema() -> Result<()> {
    let schema = schemars::schema_for!(WorkflowDefinition);
    println!("{}", serde_json::to_string_pretty(&schema)?);
    Ok(())
}

/// Show configuration.
pub fn show_config(config: &CliConfig) -> Result<()> {
    println!("Current configuration:");
    println!("  output_format: {:?}", config.output_format);
    println!("  max_parallel_jobs: {}", config.max_parallel_jobs);
    println!("  strict_platform: {}", config.strict_platform);
    println!(
        "  default_timeout_minutes: {}",
        config
            .default_timeout_minutes
            .map(|m| m.to_string())
            .unwrap_or_else(|| "(not set)".to_string())
    );

    if let Ok(path) = CliConfig::config_path() {
        println!("\nConfig file: {}", path.display());
    }

    Ok(())
}

/// Set configuration.
pub fn set_config(key: &str, value: &str) -> Result<()> {
    let mut config = CliConfig::load().unwrap_or_default();
    config.set(key, value)?;
    config.save()?;

    println!("{} Set {} = {}", style("✓").green(), key, value);
    Ok(())
}

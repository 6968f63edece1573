//! Workflow command handlers

use anyhow::{Context, Result};
use chairside_core::agents::{AgentContext, AgentRegistry};
use chairside_core::automation::HttpAutomationClient;
use chairside_core::credentials::EnvCredentialProvider;
use chairside_core::models::{Configuration, ExecutionStatus, RunStatus, WorkflowState};
use chairside_core::workflow::{
    load_definition, load_directory, CheckpointStore, WorkflowMetrics, WorkflowOrchestrator,
    WorkflowPersistence, WorkflowValidator,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

fn open_store(config: &Configuration) -> Result<WorkflowPersistence> {
    WorkflowPersistence::new(config.resolved_store_path())
        .context("Failed to initialize run store")
}

fn agent_registry(config: &Configuration) -> AgentRegistry {
    let credentials = Arc::new(EnvCredentialProvider::from_env(config.credentials.clone()));
    let backend = Arc::new(HttpAutomationClient::from_config(&config.backend));
    AgentRegistry::with_builtin(AgentContext::new(credentials, backend))
}

/// Create workflow orchestrator with built-in and on-disk workflows registered
fn create_orchestrator(config: &Configuration) -> Result<WorkflowOrchestrator> {
    let store = Arc::new(open_store(config)?);
    let orchestrator =
        WorkflowOrchestrator::new(store, agent_registry(config), config.engine.clone());
    orchestrator
        .register_builtin()
        .context("Built-in workflow failed validation")?;

    let workflows_dir = config.resolved_workflows_dir();
    for definition in load_directory(&workflows_dir)? {
        match orchestrator.register_definition(&definition) {
            Ok(warnings) => {
                for warning in warnings {
                    tracing::warn!(workflow = %definition.name, "{}", warning);
                }
            }
            Err(e) => tracing::warn!("Skipping workflow from {}: {}", workflows_dir.display(), e),
        }
    }

    Ok(orchestrator)
}

fn parse_run_id(run_id: &str) -> Result<Uuid> {
    Uuid::parse_str(run_id.trim()).context("Invalid run ID format (expected UUID)")
}

/// Parse `key=value`; the value is JSON when it parses as JSON, a string otherwise
pub fn parse_field(raw: &str) -> Result<(String, Value)> {
    let (key, value) = raw
        .split_once('=')
        .with_context(|| format!("Invalid field '{}' (expected key=value)", raw))?;
    let key = key.trim();
    if key.is_empty() {
        anyhow::bail!("Invalid field '{}': key cannot be empty", raw);
    }

    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

/// Build state from an optional JSON input file, then `key=value` fields on top
pub fn build_fields(fields: &[String], input: Option<&Path>) -> Result<WorkflowState> {
    let mut state = match input {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read input file {}", path.display()))?;
            let value: Value = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse input file {}", path.display()))?;
            WorkflowState::from_value(value).with_context(|| {
                format!("Input file {} must contain a JSON object", path.display())
            })?
        }
        None => WorkflowState::new(),
    };

    for raw in fields {
        let (key, value) = parse_field(raw)?;
        state.set(key, value);
    }
    Ok(state)
}

fn format_success_rate(metrics: &WorkflowMetrics) -> String {
    format!("{:.1}%", metrics.success_rate())
}

fn print_run(run_id: Uuid, workflow_name: &str, status: &RunStatus, json: bool) -> Result<()> {
    if json {
        let mut output = serde_json::json!({
            "run_id": run_id.to_string(),
            "workflow_name": workflow_name,
        });
        if let (Some(output), Value::Object(status)) =
            (output.as_object_mut(), serde_json::to_value(status)?)
        {
            output.extend(status);
        }
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    match status {
        RunStatus::Running => {
            println!("⏳ Run {} of '{}' is running", run_id, workflow_name);
        }
        RunStatus::Suspended {
            awaiting,
            field,
            prompt,
        } => {
            println!("⏸️  Run {} of '{}' is waiting at '{}'", run_id, workflow_name, awaiting);
            if !prompt.is_empty() {
                println!("   {}", prompt);
            }
            if !field.is_empty() {
                println!();
                println!(
                    "Use 'chairside workflow resume {} -f {}=<value>' to continue",
                    run_id, field
                );
            }
        }
        RunStatus::Completed { final_state } => {
            println!("✅ Run {} of '{}' completed", run_id, workflow_name);
            println!();
            println!("Final state:");
            println!("{}", serde_json::to_string_pretty(final_state)?);
        }
        RunStatus::Failed { error } => {
            println!("❌ Run {} of '{}' failed", run_id, workflow_name);
            println!("   {}", error);
        }
        RunStatus::Cancelled => {
            println!("🚫 Run {} of '{}' was cancelled", run_id, workflow_name);
        }
    }
    Ok(())
}

/// Handle workflow start command
pub async fn handle_workflow_start(
    config: &Configuration,
    workflow_name: String,
    fields: Vec<String>,
    input: Option<PathBuf>,
    initiator: String,
    json: bool,
) -> Result<()> {
    let orchestrator = create_orchestrator(config)?;
    if orchestrator.graph(&workflow_name).is_err() {
        return Err(anyhow::anyhow!(
            "Workflow '{}' not found. Use 'chairside workflow list' to see available workflows.",
            workflow_name
        ));
    }

    let state = build_fields(&fields, input.as_deref())?;
    let handle = orchestrator
        .start(&workflow_name, state, &initiator)
        .await
        .context("Failed to start workflow")?;

    print_run(handle.run_id, &handle.workflow_name, &handle.status, json)
}

/// Handle workflow resume command
pub async fn handle_workflow_resume(
    config: &Configuration,
    run_id: String,
    fields: Vec<String>,
    input: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let run_id = parse_run_id(&run_id)?;
    let state = build_fields(&fields, input.as_deref())?;
    let orchestrator = create_orchestrator(config)?;

    let status = orchestrator
        .resume(run_id, state)
        .await
        .context("Failed to resume run")?;
    let workflow_name = orchestrator
        .engine()
        .store()
        .load(run_id)?
        .map(|c| c.workflow_name)
        .unwrap_or_default();

    print_run(run_id, &workflow_name, &status, json)
}

/// Handle workflow status command
pub async fn handle_workflow_status(config: &Configuration, run_id: String, json: bool) -> Result<()> {
    let run_id = parse_run_id(&run_id)?;
    let store = open_store(config)?;
    let checkpoint = store
        .load(run_id)?
        .ok_or_else(|| anyhow::anyhow!("Run '{}' not found", run_id))?;
    let transitions = store.transitions(run_id)?;

    if json {
        let output = serde_json::json!({
            "run_id": checkpoint.run_id.to_string(),
            "workflow_name": checkpoint.workflow_name,
            "current_node": checkpoint.current_node,
            "status": checkpoint.status,
            "awaiting": checkpoint.awaiting,
            "error": checkpoint.error,
            "state": checkpoint.state,
            "visits": checkpoint.visits,
            "sequence": checkpoint.sequence,
            "initiator": checkpoint.initiator,
            "started_at": checkpoint.started_at.to_rfc3339(),
            "updated_at": checkpoint.updated_at.to_rfc3339(),
            "completed_at": checkpoint.completed_at.map(|t| t.to_rfc3339()),
            "transitions": transitions,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Workflow Run Status");
    println!("===================");
    println!("Run ID:         {}", checkpoint.run_id);
    println!("Workflow:       {}", checkpoint.workflow_name);
    println!("Current Node:   {}", checkpoint.current_node);
    println!("Status:         {}", checkpoint.run_status().label());
    if let Some(pending) = &checkpoint.awaiting {
        println!("Waiting For:    {} ({})", pending.field, pending.prompt);
    }
    if let Some(error) = &checkpoint.error {
        println!("Error:          {}", error);
    }
    println!(
        "Started At:     {}",
        checkpoint.started_at.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(completed_at) = checkpoint.completed_at {
        println!(
            "Completed At:   {}",
            completed_at.format("%Y-%m-%d %H:%M:%S")
        );
        let duration = (completed_at - checkpoint.started_at).num_seconds();
        println!("Duration:       {} seconds", duration);
    }
    println!("Initiator:      {}", checkpoint.initiator);
    println!("Checkpoint:     #{}", checkpoint.sequence);

    if !transitions.is_empty() {
        println!();
        println!("Transitions:");
        println!("------------");
        for transition in transitions {
            let from = transition.from_node.as_deref().unwrap_or("<start>");
            let attempts = transition
                .attempts
                .map(|a| format!(", {} attempt(s)", a))
                .unwrap_or_default();
            println!(
                "  {} -> {} ({:?}{}) at {}",
                from,
                transition.to_node,
                transition.transition_type,
                attempts,
                transition.timestamp.format("%H:%M:%S")
            );
        }
    }

    Ok(())
}

/// Handle workflow cancel command
pub async fn handle_workflow_cancel(config: &Configuration, run_id: String, json: bool) -> Result<()> {
    let run_id = parse_run_id(&run_id)?;
    let orchestrator = create_orchestrator(config)?;
    let status = orchestrator
        .cancel(run_id)
        .context("Failed to cancel run")?;
    let workflow_name = orchestrator
        .engine()
        .store()
        .load(run_id)?
        .map(|c| c.workflow_name)
        .unwrap_or_default();

    print_run(run_id, &workflow_name, &status, json)
}

/// Handle workflow list command
pub async fn handle_workflow_list(config: &Configuration, json: bool) -> Result<()> {
    let orchestrator = create_orchestrator(config)?;
    let workflows = orchestrator.list_workflows();

    if json {
        let entries: Vec<Value> = workflows
            .iter()
            .filter_map(|name| orchestrator.graph(name).ok())
            .map(|graph| {
                serde_json::json!({
                    "name": graph.name(),
                    "description": graph.description(),
                    "inputs": graph.inputs(),
                    "start_node": graph.start_node(),
                    "nodes": graph.nodes().count(),
                })
            })
            .collect();
        let output = serde_json::json!({
            "workflows": entries,
            "count": workflows.len()
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    println!("Available Workflows:");
    println!("===================");
    for name in workflows {
        println!("  • {}", name);
        if let Ok(graph) = orchestrator.graph(&name) {
            if let Some(desc) = graph.description() {
                println!("    {}", desc);
            }
            println!(
                "    Inputs: {}, Start: {}, Nodes: {}",
                if graph.inputs().is_empty() {
                    "none".to_string()
                } else {
                    graph.inputs().join(", ")
                },
                graph.start_node(),
                graph.nodes().count()
            );
        }
    }

    println!();
    println!("Agents:");
    for (name, capabilities) in orchestrator.agents().describe() {
        println!("  • {}: {}", name, capabilities);
    }

    Ok(())
}

/// Handle workflow history command
pub async fn handle_workflow_history(
    config: &Configuration,
    workflow: Option<String>,
    limit: usize,
    json: bool,
) -> Result<()> {
    let store = open_store(config)?;
    let metrics = store.query_metrics(workflow.as_deref())?;
    let runs: Vec<_> = store
        .list(workflow.as_deref())?
        .into_iter()
        .take(limit)
        .collect();

    if json {
        let output = serde_json::json!({
            "workflow": workflow.as_deref().unwrap_or("all"),
            "metrics": metrics,
            "runs": runs.iter().map(|run| serde_json::json!({
                "run_id": run.run_id.to_string(),
                "workflow_name": run.workflow_name,
                "status": run.status,
                "current_node": run.current_node,
                "started_at": run.started_at.to_rfc3339(),
            })).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let workflow_name = workflow.as_deref().unwrap_or("All Workflows");
    println!("Workflow History: {}", workflow_name);
    println!("==================");
    println!("Total Runs:         {}", metrics.run_count);
    println!("Completed:          {}", metrics.success_count);
    println!("Failed:             {}", metrics.failure_count);
    println!("Cancelled:          {}", metrics.cancelled_count);
    println!("Waiting for input:  {}", metrics.suspended_count);
    if metrics.run_count > 0 {
        println!("Success Rate:       {}", format_success_rate(&metrics));
        println!(
            "Avg Duration:       {:.2}s",
            metrics.avg_duration_ms as f64 / 1000.0
        );
    }

    if !runs.is_empty() {
        println!();
        println!("Recent Runs:");
        for run in runs {
            let marker = match run.status {
                ExecutionStatus::Completed => "✅",
                ExecutionStatus::Failed => "❌",
                ExecutionStatus::Cancelled => "🚫",
                ExecutionStatus::Suspended => "⏸️ ",
                ExecutionStatus::Running => "⏳",
            };
            println!(
                "  {} {} {} at '{}' ({})",
                marker,
                run.run_id,
                run.workflow_name,
                run.current_node,
                run.started_at.format("%Y-%m-%d %H:%M")
            );
        }
    }

    Ok(())
}

/// Handle workflow recover command
pub async fn handle_workflow_recover(config: &Configuration, json: bool) -> Result<()> {
    let orchestrator = create_orchestrator(config)?;
    let recovered = orchestrator.recover_incomplete().await?;

    if json {
        let entries: Vec<Value> = recovered
            .iter()
            .map(|(run_id, result)| match result {
                Ok(status) => serde_json::json!({
                    "run_id": run_id.to_string(),
                    "result": status,
                }),
                Err(e) => serde_json::json!({
                    "run_id": run_id.to_string(),
                    "error": e.to_string(),
                }),
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "recovered": entries,
                "count": recovered.len(),
            }))?
        );
        return Ok(());
    }

    if recovered.is_empty() {
        println!("No interrupted runs found.");
        return Ok(());
    }

    println!("Recovered {} run(s):", recovered.len());
    for (run_id, result) in recovered {
        match result {
            Ok(status) => println!("  • {} → {}", run_id, status.label()),
            Err(e) => println!("  • {} → error: {}", run_id, e),
        }
    }

    Ok(())
}

/// Handle workflow validate command
pub async fn handle_workflow_validate(
    config: &Configuration,
    workflow_file: PathBuf,
    json: bool,
) -> Result<()> {
    let workflow = load_definition(&workflow_file)?;
    let agents = agent_registry(config);
    let validation_result = WorkflowValidator::validate_workflow(&workflow, &agents);

    if json {
        let json_output = serde_json::json!({
            "valid": validation_result.is_valid(),
            "workflow_name": workflow.name,
            "errors": validation_result.errors.iter().map(|e| serde_json::json!({
                "field": e.field,
                "message": e.message,
            })).collect::<Vec<_>>(),
            "warnings": validation_result.warnings,
        });
        println!("{}", serde_json::to_string_pretty(&json_output)?);
        if !validation_result.is_valid() {
            return Err(anyhow::anyhow!("Workflow validation failed"));
        }
        return Ok(());
    }

    println!("Validating workflow: {}", workflow.name);
    println!("File: {}", workflow_file.display());
    println!();

    if validation_result.is_valid() {
        println!("✓ Workflow is valid");
        println!();
        println!("Summary:");
        println!("  Name:        {}", workflow.name);
        if let Some(desc) = &workflow.description {
            println!("  Description: {}", desc);
        }
        println!("  Inputs:      {}", workflow.inputs.join(", "));
        println!("  Nodes:       {}", workflow.nodes.len());
        println!("  Edges:       {}", workflow.edges.len());
    } else {
        println!("✗ Workflow validation failed");
        println!();
        println!("Errors:");
        for error in &validation_result.errors {
            println!("  ✗ {}: {}", error.field, error.message);
        }
    }

    if !validation_result.warnings.is_empty() {
        println!();
        println!("Warnings:");
        for warning in &validation_result.warnings {
            println!("  ⚠  {}", warning);
        }
    }

    if !validation_result.is_valid() {
        return Err(anyhow::anyhow!("Workflow validation failed"));
    }
    Ok(())
}

/// Handle workflow list-defs command
pub async fn handle_workflow_list_defs(
    config: &Configuration,
    directory: Option<PathBuf>,
    json: bool,
) -> Result<()> {
    let workflows_dir = directory.unwrap_or_else(|| config.resolved_workflows_dir());

    if !workflows_dir.exists() {
        if json {
            println!("{{\"workflows\": []}}");
        } else {
            println!(
                "No workflow definitions directory found at: {}",
                workflows_dir.display()
            );
            println!("Create the directory and add workflow YAML or JSON files.");
        }
        return Ok(());
    }

    let mut paths: Vec<PathBuf> = std::fs::read_dir(&workflows_dir)
        .context("Failed to read workflows directory")?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && matches!(
                    path.extension().and_then(|s| s.to_str()),
                    Some("yaml") | Some("yml") | Some("json")
                )
        })
        .collect();
    paths.sort();

    let entries: Vec<(PathBuf, Result<_>)> = paths
        .into_iter()
        .map(|path| {
            let loaded = load_definition(&path);
            (path, loaded)
        })
        .collect();

    if json {
        let json_workflows: Vec<_> = entries
            .iter()
            .map(|(path, loaded)| {
                let file = path.file_name().and_then(|s| s.to_str()).unwrap_or("");
                match loaded {
                    Ok(workflow) => serde_json::json!({
                        "file": file,
                        "path": path.to_string_lossy(),
                        "name": &workflow.name,
                        "description": &workflow.description,
                        "nodes": workflow.nodes.len(),
                    }),
                    Err(e) => serde_json::json!({
                        "file": file,
                        "path": path.to_string_lossy(),
                        "error": format!("{:#}", e),
                    }),
                }
            })
            .collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "directory": workflows_dir.to_string_lossy(),
                "count": json_workflows.len(),
                "workflows": json_workflows,
            }))?
        );
        return Ok(());
    }

    println!("Workflow Definitions");
    println!("Directory: {}", workflows_dir.display());
    println!();

    if entries.is_empty() {
        println!("No workflow definitions found.");
        return Ok(());
    }

    println!("Found {} file(s):", entries.len());
    println!();
    for (path, loaded) in &entries {
        let file = path.file_name().and_then(|s| s.to_str()).unwrap_or("");
        match loaded {
            Ok(workflow) => {
                println!("  • {} ({})", workflow.name, file);
                if let Some(desc) = &workflow.description {
                    println!("    Description: {}", desc);
                }
                println!("    Nodes: {}", workflow.nodes.len());
            }
            Err(e) => println!("  ✗ {}: {:#}", file, e),
        }
        println!();
    }

    Ok(())
}

//! Orchestrator lifecycle: concurrency, cancellation, recovery and durable storage

mod common;

use async_trait::async_trait;
use chairside_core::agents::{AgentRegistry, TaskAgent};
use chairside_core::models::{
    AutomationResult, EdgeDefinition, ExecutionStatus, NodeDefinition, RunStatus,
    WorkflowDefinition, WorkflowState, END, START,
};
use chairside_core::workflow::{
    CheckpointStore, EngineError, InMemoryCheckpointStore, NodeError, NodeOutput,
    WorkflowOrchestrator, WorkflowPersistence, BASIC_SEARCH, SINGLE_PORTAL_LOGIN,
};
use common::{builtin_registry, fast_config, orchestrator, static_credentials, ScriptedBackend};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;
use tokio::sync::Notify;

/// Signals when it starts, then takes a while to finish
struct GatedAgent {
    name: &'static str,
    started: Arc<Notify>,
    delay: Duration,
    calls: Arc<AtomicU32>,
}

impl GatedAgent {
    fn new(name: &'static str, delay: Duration) -> Self {
        Self {
            name,
            started: Arc::new(Notify::new()),
            delay,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }
}

#[async_trait]
impl TaskAgent for GatedAgent {
    fn name(&self) -> &str {
        self.name
    }

    fn capabilities(&self) -> &str {
        "slow step"
    }

    fn reads(&self) -> &[&'static str] {
        &[]
    }

    fn writes(&self) -> &[&'static str] {
        &[]
    }

    async fn execute(&self, state: WorkflowState) -> Result<NodeOutput, NodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        tokio::time::sleep(self.delay).await;
        Ok(NodeOutput::proceed(state.with(self.name, true)))
    }
}

fn two_steps() -> WorkflowDefinition {
    WorkflowDefinition {
        name: "two-steps".to_string(),
        description: None,
        inputs: vec![],
        nodes: vec![
            NodeDefinition::agent("first", "first"),
            NodeDefinition::agent("second", "second"),
        ],
        edges: vec![
            EdgeDefinition::new(START, "first"),
            EdgeDefinition::new("first", "second"),
            EdgeDefinition::new("second", END),
        ],
        defaults: None,
    }
}

/// Orchestrator with `two-steps` registered; returns the first agent's start signal
/// and the second agent's call counter
fn gated_orchestrator() -> (
    WorkflowOrchestrator,
    Arc<InMemoryCheckpointStore>,
    Arc<Notify>,
    Arc<AtomicU32>,
) {
    let first = GatedAgent::new("first", Duration::from_millis(150));
    let second = GatedAgent::new("second", Duration::from_millis(1));
    let started = first.started.clone();
    let second_calls = second.calls.clone();

    let mut agents = AgentRegistry::new();
    agents.register(first);
    agents.register(second);

    let store = Arc::new(InMemoryCheckpointStore::new());
    let orchestrator = WorkflowOrchestrator::new(store.clone(), agents, fast_config());
    orchestrator.register_definition(&two_steps()).unwrap();
    (orchestrator, store, started, second_calls)
}

#[tokio::test]
async fn test_cancel_takes_effect_between_nodes() {
    let (orchestrator, store, started, second_calls) = gated_orchestrator();

    let (run_id, handle) = orchestrator
        .spawn("two-steps", WorkflowState::new(), "test")
        .unwrap();
    started.notified().await;

    assert!(orchestrator.is_running(run_id));
    let status = orchestrator.cancel(run_id).unwrap();
    assert_eq!(status, RunStatus::Running);

    let finished = handle.await.unwrap().unwrap();
    assert_eq!(finished, RunStatus::Cancelled);
    assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    assert!(!orchestrator.is_running(run_id));

    let checkpoint = store.load(run_id).unwrap().unwrap();
    assert_eq!(checkpoint.status, ExecutionStatus::Cancelled);
    // The in-flight node finished and its output was kept
    assert!(checkpoint.state.is_truthy("first"));
    assert_eq!(checkpoint.current_node, "second");
}

#[tokio::test]
async fn test_cancel_from_another_process_stops_the_driver() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("runs.json");

    let first = GatedAgent::new("first", Duration::from_millis(150));
    let second = GatedAgent::new("second", Duration::from_millis(1));
    let started = first.started.clone();
    let second_calls = second.calls.clone();
    let mut agents = AgentRegistry::new();
    agents.register(first);
    agents.register(second);
    let driver = WorkflowOrchestrator::new(
        Arc::new(WorkflowPersistence::new(&path).unwrap()),
        agents,
        fast_config(),
    );
    driver.register_definition(&two_steps()).unwrap();

    // Same store file, separate handle and registry, as a second CLI invocation would have
    let mut other_agents = AgentRegistry::new();
    other_agents.register(GatedAgent::new("first", Duration::from_millis(1)));
    other_agents.register(GatedAgent::new("second", Duration::from_millis(1)));
    let operator = WorkflowOrchestrator::new(
        Arc::new(WorkflowPersistence::new(&path).unwrap()),
        other_agents,
        fast_config(),
    );
    operator.register_definition(&two_steps()).unwrap();

    let (run_id, handle) = driver
        .spawn("two-steps", WorkflowState::new(), "test")
        .unwrap();
    started.notified().await;

    assert_eq!(operator.cancel(run_id).unwrap(), RunStatus::Cancelled);

    assert_eq!(handle.await.unwrap().unwrap(), RunStatus::Cancelled);
    assert_eq!(second_calls.load(Ordering::SeqCst), 0);
    let checkpoint = WorkflowPersistence::new(&path)
        .unwrap()
        .load(run_id)
        .unwrap()
        .unwrap();
    assert_eq!(checkpoint.status, ExecutionStatus::Cancelled);
}

#[tokio::test]
async fn test_second_driver_of_a_run_is_refused() {
    let (orchestrator, _store, started, _) = gated_orchestrator();

    let (run_id, handle) = orchestrator
        .spawn("two-steps", WorkflowState::new(), "test")
        .unwrap();
    started.notified().await;

    let err = orchestrator
        .resume(run_id, WorkflowState::new())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::RunBusy(id) if id == run_id));

    assert!(matches!(
        handle.await.unwrap().unwrap(),
        RunStatus::Completed { .. }
    ));
    assert_eq!(orchestrator.active_count(), 0);
}

#[tokio::test]
async fn test_cancel_suspended_and_finished_runs() {
    let backend = ScriptedBackend::new([
        AutomationResult::success("Logged in"),
        AutomationResult::success("Primary Insurance: Delta Dental"),
    ]);
    let (orchestrator, _store) = orchestrator(static_credentials(), backend);

    let handle = orchestrator
        .start(
            chairside_core::workflow::ELIGIBILITY_VERIFICATION,
            WorkflowState::new()
                .with("portal", "MoHealthNet")
                .with("patient_info", common::patient()),
            "test",
        )
        .await
        .unwrap();
    assert!(matches!(handle.status, RunStatus::Suspended { .. }));

    assert_eq!(
        orchestrator.cancel(handle.run_id).unwrap(),
        RunStatus::Cancelled
    );
    assert!(matches!(
        orchestrator.cancel(handle.run_id),
        Err(EngineError::RunAlreadyTerminal(_))
    ));
    assert!(matches!(
        orchestrator
            .resume(handle.run_id, WorkflowState::new().with("human_verified", true))
            .await,
        Err(EngineError::RunAlreadyTerminal(_))
    ));
}

#[tokio::test]
async fn test_concurrent_runs_do_not_share_state() {
    let backend = ScriptedBackend::with_delay([], Duration::from_millis(20));
    let (orchestrator, store) = orchestrator(static_credentials(), backend.clone());
    let orchestrator = Arc::new(orchestrator);

    let queries = [
        "medicaid dental coverage missouri",
        "cdt code d1120",
        "fluoride varnish frequency",
        "sealant age limits",
        "orthodontic prior authorization",
        "emomed office hours",
    ];
    let mut tasks = Vec::new();
    for (idx, query) in queries.into_iter().enumerate() {
        let orchestrator = orchestrator.clone();
        tasks.push(tokio::spawn(async move {
            let handle = orchestrator
                .start(
                    BASIC_SEARCH,
                    WorkflowState::new().with("query", query).with("slot", idx),
                    "test",
                )
                .await
                .unwrap();
            (query, idx, handle)
        }));
    }

    let mut run_ids = std::collections::HashSet::new();
    for task in tasks {
        let (query, idx, handle) = task.await.unwrap();
        let RunStatus::Completed { final_state } = handle.status else {
            panic!("run for '{}' did not complete", query);
        };
        assert_eq!(final_state.get_str("query"), Some(query));
        assert_eq!(final_state.get("slot"), Some(&serde_json::json!(idx)));
        assert!(final_state.contains("search_results"));
        run_ids.insert(handle.run_id);
    }

    assert_eq!(run_ids.len(), queries.len());
    assert_eq!(store.list(Some(BASIC_SEARCH)).unwrap().len(), queries.len());

    let calls = backend.calls();
    assert_eq!(calls.len(), queries.len());
    for query in queries {
        assert_eq!(
            calls.iter().filter(|c| c.instruction.contains(query)).count(),
            1
        );
    }
    assert!(calls.iter().all(|c| c.credential.is_none()));
}

#[tokio::test]
async fn test_recover_incomplete_drives_left_over_runs() {
    let backend = ScriptedBackend::new([AutomationResult::success("Logged in")]);
    let (orchestrator, _store) = orchestrator(static_credentials(), backend);
    let graph = orchestrator.graph(SINGLE_PORTAL_LOGIN).unwrap();

    let run_id = uuid::Uuid::new_v4();
    orchestrator
        .engine()
        .create_run(
            &graph,
            run_id,
            WorkflowState::new().with("portal", "MoHealthNet"),
            "crashed-process",
        )
        .unwrap();

    let recovered = orchestrator.recover_incomplete().await.unwrap();
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].0, run_id);
    assert!(matches!(
        recovered[0].1,
        Ok(RunStatus::Completed { .. })
    ));
    assert!(orchestrator.recover_incomplete().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_suspended_run_survives_a_restart() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("runs.json");
    let input = WorkflowState::new()
        .with("portal", "MoHealthNet")
        .with("patient_info", common::patient());

    let run_id = {
        let backend = ScriptedBackend::new([
            AutomationResult::success("Logged in"),
            AutomationResult::success("Primary Insurance: Delta Dental"),
        ]);
        let store = Arc::new(WorkflowPersistence::new(&path).unwrap());
        let orchestrator = WorkflowOrchestrator::new(
            store,
            builtin_registry(static_credentials(), backend),
            fast_config(),
        );
        orchestrator.register_builtin().unwrap();
        orchestrator
            .start(chairside_core::workflow::ELIGIBILITY_VERIFICATION, input, "day-shift")
            .await
            .unwrap()
            .run_id
    };

    let backend = ScriptedBackend::new([]);
    let store = Arc::new(WorkflowPersistence::new(&path).unwrap());
    let orchestrator = WorkflowOrchestrator::new(
        store.clone(),
        builtin_registry(static_credentials(), backend.clone()),
        fast_config(),
    );
    orchestrator.register_builtin().unwrap();

    assert!(matches!(
        orchestrator.status(run_id).unwrap(),
        RunStatus::Suspended { .. }
    ));
    let status = orchestrator
        .resume(run_id, WorkflowState::new().with("human_verified", true))
        .await
        .unwrap();
    assert!(matches!(status, RunStatus::Completed { .. }));
    assert_eq!(backend.call_count(), 0);

    let metrics = store.query_metrics(None).unwrap();
    assert_eq!(metrics.run_count, 1);
    assert_eq!(metrics.success_count, 1);
}

#[tokio::test]
async fn test_list_workflows_and_rejected_definition() {
    let (orchestrator, _store) = orchestrator(static_credentials(), ScriptedBackend::new([]));
    assert_eq!(
        orchestrator.list_workflows(),
        vec!["basic-search", "eligibility-verification", "single-portal-login"]
    );

    let mut broken = two_steps();
    broken.edges.clear();
    let err = orchestrator.register_definition(&broken).unwrap_err();
    assert!(err.violations.len() > 1);
    assert!(orchestrator.graph("two-steps").is_err());
}

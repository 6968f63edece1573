//! Workflow orchestration and run lifecycle management

use crate::agents::AgentRegistry;
use crate::models::workflow::{RunHandle, RunStatus, WorkflowDefinition};
use crate::models::{EngineConfig, WorkflowState};
use crate::workflow::definitions::builtin_workflows;
use crate::workflow::engine::WorkflowEngine;
use crate::workflow::error::{EngineError, GraphDefinitionError};
use crate::workflow::graph::WorkflowGraph;
use crate::workflow::persistence::CheckpointStore;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Claim on a run; at most one caller drives a run at a time
struct ActiveRun {
    run_id: Uuid,
    token: CancellationToken,
    active_runs: Arc<DashMap<Uuid, CancellationToken>>,
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.active_runs.remove(&self.run_id);
    }
}

/// Registry of built graphs plus the runs currently being driven
pub struct WorkflowOrchestrator {
    /// Execution engine
    engine: Arc<WorkflowEngine>,
    /// Agents that graphs resolve at build time
    agents: Arc<AgentRegistry>,
    /// Defaults applied when building graphs
    engine_config: EngineConfig,
    /// Built graphs by workflow name
    graphs: Arc<DashMap<String, Arc<WorkflowGraph>>>,
    /// Cancellation tokens of runs being driven right now
    active_runs: Arc<DashMap<Uuid, CancellationToken>>,
}

impl WorkflowOrchestrator {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        agents: AgentRegistry,
        engine_config: EngineConfig,
    ) -> Self {
        Self {
            engine: Arc::new(WorkflowEngine::new(store)),
            agents: Arc::new(agents),
            engine_config,
            graphs: Arc::new(DashMap::new()),
            active_runs: Arc::new(DashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.engine
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    /// Validate, build and register a workflow; returns validation warnings
    pub fn register_definition(
        &self,
        definition: &WorkflowDefinition,
    ) -> Result<Vec<String>, GraphDefinitionError> {
        let graph = WorkflowGraph::build_with(definition, &self.agents, &self.engine_config)?;
        let warnings = graph.warnings().to_vec();
        self.graphs
            .insert(definition.name.clone(), Arc::new(graph));
        tracing::debug!("Registered workflow '{}'", definition.name);
        Ok(warnings)
    }

    /// Register every built-in workflow
    pub fn register_builtin(&self) -> Result<(), GraphDefinitionError> {
        for definition in builtin_workflows() {
            self.register_definition(&definition)?;
        }
        Ok(())
    }

    pub fn graph(&self, name: &str) -> Result<Arc<WorkflowGraph>, EngineError> {
        self.graphs
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| EngineError::UnknownWorkflow(name.to_string()))
    }

    /// Registered workflow names, sorted
    pub fn list_workflows(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .graphs
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    fn claim(&self, run_id: Uuid) -> Result<ActiveRun, EngineError> {
        match self.active_runs.entry(run_id) {
            Entry::Occupied(_) => Err(EngineError::RunBusy(run_id)),
            Entry::Vacant(vacant) => {
                let token = CancellationToken::new();
                vacant.insert(token.clone());
                Ok(ActiveRun {
                    run_id,
                    token,
                    active_runs: self.active_runs.clone(),
                })
            }
        }
    }

    /// Start a run and drive it until it suspends or ends
    pub async fn start(
        &self,
        workflow_name: &str,
        initial_fields: WorkflowState,
        initiator: &str,
    ) -> Result<RunHandle, EngineError> {
        let graph = self.graph(workflow_name)?;
        let run_id = Uuid::new_v4();
        let active = self.claim(run_id)?;

        self.engine
            .create_run(&graph, run_id, initial_fields, initiator)?;
        let status = self.engine.run(&graph, run_id, &active.token).await?;

        tracing::info!(
            "Started workflow '{}' with run ID {}",
            workflow_name,
            run_id
        );
        Ok(RunHandle {
            run_id,
            workflow_name: workflow_name.to_string(),
            status,
        })
    }

    /// Checkpoint a new run and drive it on a background task
    ///
    /// Returns once the initial checkpoint is persisted.
    pub fn spawn(
        &self,
        workflow_name: &str,
        initial_fields: WorkflowState,
        initiator: &str,
    ) -> Result<(Uuid, JoinHandle<Result<RunStatus, EngineError>>), EngineError> {
        let graph = self.graph(workflow_name)?;
        let run_id = Uuid::new_v4();
        let active = self.claim(run_id)?;

        self.engine
            .create_run(&graph, run_id, initial_fields, initiator)?;

        let engine = self.engine.clone();
        let handle = tokio::spawn(async move {
            let result = engine.run(&graph, run_id, &active.token).await;
            tracing::info!("Workflow run {} stopped: {:?}", run_id, result);
            drop(active);
            result
        });

        Ok((run_id, handle))
    }

    /// Merge caller input into a suspended run and continue it
    pub async fn resume(
        &self,
        run_id: Uuid,
        fields: WorkflowState,
    ) -> Result<RunStatus, EngineError> {
        let graph = self.graph_for_run(run_id)?;
        let active = self.claim(run_id)?;
        self.engine
            .resume(&graph, run_id, fields, &active.token)
            .await
    }

    pub fn status(&self, run_id: Uuid) -> Result<RunStatus, EngineError> {
        self.engine.status(run_id)
    }

    /// Cancel a run
    ///
    /// A run being driven stops before its next node; the returned status is
    /// then still `Running`. Idle runs are cancelled immediately.
    pub fn cancel(&self, run_id: Uuid) -> Result<RunStatus, EngineError> {
        match self.claim(run_id) {
            Ok(_active) => self.engine.cancel(run_id),
            Err(EngineError::RunBusy(_)) => {
                if let Some(token) = self.active_runs.get(&run_id) {
                    token.cancel();
                }
                tracing::info!("Cancellation requested for run {}", run_id);
                self.engine.status(run_id)
            }
            Err(e) => Err(e),
        }
    }

    /// Re-drive runs a previous process left `running`
    pub async fn recover_incomplete(
        &self,
    ) -> Result<Vec<(Uuid, Result<RunStatus, EngineError>)>, EngineError> {
        let incomplete = self.engine.store().find_incomplete()?;
        let mut recovered = Vec::with_capacity(incomplete.len());

        for checkpoint in incomplete {
            let run_id = checkpoint.run_id;
            if self.is_running(run_id) {
                continue;
            }
            tracing::info!(
                "Recovering run {} of '{}' at node '{}'",
                run_id,
                checkpoint.workflow_name,
                checkpoint.current_node
            );

            let result = match (self.graph(&checkpoint.workflow_name), self.claim(run_id)) {
                (Ok(graph), Ok(active)) => self.engine.run(&graph, run_id, &active.token).await,
                (Err(e), _) | (_, Err(e)) => Err(e),
            };
            recovered.push((run_id, result));
        }

        Ok(recovered)
    }

    fn graph_for_run(&self, run_id: Uuid) -> Result<Arc<WorkflowGraph>, EngineError> {
        let checkpoint = self
            .engine
            .store()
            .load(run_id)?
            .ok_or(EngineError::RunNotFound(run_id))?;
        self.graph(&checkpoint.workflow_name)
    }

    /// Check if a run is currently being driven
    pub fn is_running(&self, run_id: Uuid) -> bool {
        self.active_runs.contains_key(&run_id)
    }

    /// Get count of runs being driven
    pub fn active_count(&self) -> usize {
        self.active_runs.len()
    }
}

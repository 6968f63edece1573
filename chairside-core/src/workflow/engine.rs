//! Graph execution engine
//!
//! A run is a single logical thread of control: one node executes at a time,
//! and the checkpoint is written after every node. Suspension persists the
//! run and returns to the caller; `resume` picks it up again by run id.

use crate::models::workflow::{
    ExecutionStatus, RunCheckpoint, RunHandle, RunStatus, StateTransition, TransitionType, END,
};
use crate::models::WorkflowState;
use crate::services::logging::{log_error, log_run_event};
use crate::workflow::directive::{Directive, NodeOutput};
use crate::workflow::error::{EngineError, NodeError};
use crate::workflow::graph::{GraphNode, Target, WorkflowGraph};
use crate::workflow::persistence::CheckpointStore;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

/// Outcome of running one node under its retry policy
struct NodeAttempt {
    /// Node output, or the reason the node gave up
    outcome: Result<NodeOutput, String>,
    attempts: u32,
}

/// Workflow execution engine
///
/// Holds no per-run state; graphs are passed in and checkpoints live in the store.
pub struct WorkflowEngine {
    store: Arc<dyn CheckpointStore>,
}

impl WorkflowEngine {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn CheckpointStore> {
        &self.store
    }

    /// Start a run and drive it until it suspends or ends
    pub async fn start(
        &self,
        graph: &WorkflowGraph,
        initial_state: WorkflowState,
        initiator: &str,
    ) -> Result<RunHandle, EngineError> {
        let checkpoint = self.create_run(graph, Uuid::new_v4(), initial_state, initiator)?;
        let run_id = checkpoint.run_id;
        let status = self
            .drive(graph, checkpoint, &CancellationToken::new())
            .await?;

        Ok(RunHandle {
            run_id,
            workflow_name: graph.name().to_string(),
            status,
        })
    }

    /// Check inputs and checkpoint the initial state at the start node
    pub fn create_run(
        &self,
        graph: &WorkflowGraph,
        run_id: Uuid,
        initial_state: WorkflowState,
        initiator: &str,
    ) -> Result<RunCheckpoint, EngineError> {
        let missing: Vec<String> = graph
            .inputs()
            .iter()
            .filter(|field| !initial_state.contains(field))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(EngineError::MissingInputs(missing));
        }

        let mut checkpoint = RunCheckpoint::new(
            run_id,
            graph.name(),
            graph.start_node(),
            initial_state,
            initiator,
        );
        self.store.save(&mut checkpoint)?;
        self.transition(
            run_id,
            None,
            graph.start_node(),
            TransitionType::Initial,
            None,
            None,
        )?;

        log_run_event(run_id, graph.name(), "started", Some(graph.start_node()));
        Ok(checkpoint)
    }

    /// Drive a created run from its current checkpoint
    pub async fn run(
        &self,
        graph: &WorkflowGraph,
        run_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<RunStatus, EngineError> {
        let checkpoint = self.load(run_id)?;
        Self::check_workflow(graph, &checkpoint)?;

        match checkpoint.status {
            status if status.is_terminal() => Err(EngineError::RunAlreadyTerminal(run_id)),
            ExecutionStatus::Suspended => Ok(checkpoint.run_status()),
            _ => self.drive(graph, checkpoint, cancel).await,
        }
    }

    /// Merge `input` into a suspended run and continue from the node that suspended
    pub async fn resume(
        &self,
        graph: &WorkflowGraph,
        run_id: Uuid,
        input: WorkflowState,
        cancel: &CancellationToken,
    ) -> Result<RunStatus, EngineError> {
        let mut checkpoint = self.load(run_id)?;
        Self::check_workflow(graph, &checkpoint)?;

        if checkpoint.status.is_terminal() {
            return Err(EngineError::RunAlreadyTerminal(run_id));
        }
        if checkpoint.status != ExecutionStatus::Suspended {
            return Err(EngineError::RunNotSuspended(run_id));
        }

        checkpoint.state.clear_pending_input();
        checkpoint.state.merge(input);
        checkpoint.status = ExecutionStatus::Running;
        checkpoint.awaiting = None;
        self.store.save(&mut checkpoint)?;
        if checkpoint.status.is_terminal() {
            return Err(EngineError::RunAlreadyTerminal(run_id));
        }
        self.transition(
            run_id,
            Some(&checkpoint.current_node),
            &checkpoint.current_node,
            TransitionType::Resumed,
            None,
            None,
        )?;

        log_run_event(
            run_id,
            &checkpoint.workflow_name,
            "resumed",
            Some(&checkpoint.current_node),
        );
        self.drive(graph, checkpoint, cancel).await
    }

    /// Status from the last persisted checkpoint
    pub fn status(&self, run_id: Uuid) -> Result<RunStatus, EngineError> {
        Ok(self.load(run_id)?.run_status())
    }

    /// Mark a run nobody is driving as cancelled
    pub fn cancel(&self, run_id: Uuid) -> Result<RunStatus, EngineError> {
        let mut checkpoint = self.load(run_id)?;
        if checkpoint.status.is_terminal() {
            return Err(EngineError::RunAlreadyTerminal(run_id));
        }

        checkpoint.state.clear_pending_input();
        self.finish(&mut checkpoint, ExecutionStatus::Cancelled, None)?;
        self.transition(
            run_id,
            Some(&checkpoint.current_node),
            &checkpoint.current_node,
            TransitionType::Cancelled,
            None,
            None,
        )?;
        Ok(checkpoint.run_status())
    }

    fn load(&self, run_id: Uuid) -> Result<RunCheckpoint, EngineError> {
        self.store
            .load(run_id)?
            .ok_or(EngineError::RunNotFound(run_id))
    }

    fn check_workflow(graph: &WorkflowGraph, checkpoint: &RunCheckpoint) -> Result<(), EngineError> {
        if checkpoint.workflow_name != graph.name() {
            return Err(EngineError::WorkflowMismatch {
                run_id: checkpoint.run_id,
                expected: checkpoint.workflow_name.clone(),
                actual: graph.name().to_string(),
            });
        }
        Ok(())
    }

    async fn drive(
        &self,
        graph: &WorkflowGraph,
        checkpoint: RunCheckpoint,
        cancel: &CancellationToken,
    ) -> Result<RunStatus, EngineError> {
        let span = tracing::info_span!(
            "workflow_run",
            run_id = %checkpoint.run_id,
            workflow = %checkpoint.workflow_name
        );
        self.advance(graph, checkpoint, cancel)
            .instrument(span)
            .await
    }

    /// Main execution loop
    async fn advance(
        &self,
        graph: &WorkflowGraph,
        mut checkpoint: RunCheckpoint,
        cancel: &CancellationToken,
    ) -> Result<RunStatus, EngineError> {
        let run_id = checkpoint.run_id;

        loop {
            if checkpoint.status == ExecutionStatus::Cancelled {
                return Ok(Self::cancelled_elsewhere(&checkpoint));
            }

            // Cancellation only takes effect between nodes
            if cancel.is_cancelled() {
                tracing::info!(node = %checkpoint.current_node, "Run cancelled");
                checkpoint.state.clear_pending_input();
                self.finish(&mut checkpoint, ExecutionStatus::Cancelled, None)?;
                self.transition(
                    run_id,
                    Some(&checkpoint.current_node),
                    &checkpoint.current_node,
                    TransitionType::Cancelled,
                    None,
                    None,
                )?;
                return Ok(checkpoint.run_status());
            }

            let node_name = checkpoint.current_node.clone();
            let node = graph
                .node(&node_name)
                .ok_or_else(|| EngineError::UnknownNode {
                    workflow: graph.name().to_string(),
                    node: node_name.clone(),
                })?;

            let visits = {
                let counter = checkpoint.visits.entry(node_name.clone()).or_insert(0);
                *counter += 1;
                *counter
            };

            let started = Instant::now();
            let attempt = if visits > graph.max_node_visits() {
                tracing::warn!(
                    node = %node_name,
                    "Visit budget of {} exhausted",
                    graph.max_node_visits()
                );
                NodeAttempt {
                    outcome: Err(format!(
                        "visit budget of {} exhausted",
                        graph.max_node_visits()
                    )),
                    attempts: 0,
                }
            } else {
                checkpoint.state.clear_node_failed(&node_name);
                self.execute_node(node, &checkpoint.state).await
            };
            let duration_ms = Some(started.elapsed().as_millis() as u64);
            let attempts = Some(attempt.attempts);

            let (output, routed_failure) = match attempt.outcome {
                Ok(output) => (output, false),
                Err(reason) if node.has_failure_edge() => {
                    tracing::warn!(node = %node_name, "Node failed, routing via failure edge: {}", reason);
                    let mut state = checkpoint.state.clone();
                    state.mark_node_failed(&node_name, &reason, attempt.attempts);
                    (NodeOutput::proceed(state), true)
                }
                Err(reason) => {
                    tracing::error!(node = %node_name, "Node failed: {}", reason);
                    self.finish(
                        &mut checkpoint,
                        ExecutionStatus::Failed,
                        Some(format!("node '{}' failed: {}", node_name, reason)),
                    )?;
                    self.transition(
                        run_id,
                        Some(&node_name),
                        &node_name,
                        TransitionType::Failed,
                        duration_ms,
                        attempts,
                    )?;
                    return Ok(checkpoint.run_status());
                }
            };

            checkpoint.state = output.state;
            match output.directive {
                Directive::Continue => match node.select_edge(&checkpoint.state) {
                    Some(Target::Node(next)) => {
                        checkpoint.current_node = next.clone();
                        self.store.save(&mut checkpoint)?;
                        if checkpoint.status == ExecutionStatus::Cancelled {
                            return Ok(Self::cancelled_elsewhere(&checkpoint));
                        }
                        self.transition(
                            run_id,
                            Some(&node_name),
                            next,
                            if routed_failure {
                                TransitionType::NodeFailed
                            } else {
                                TransitionType::Advance
                            },
                            duration_ms,
                            attempts,
                        )?;
                        tracing::info!("Run moved from '{}' to '{}'", node_name, next);
                    }
                    Some(Target::End) => {
                        self.finish(&mut checkpoint, ExecutionStatus::Completed, None)?;
                        self.transition(
                            run_id,
                            Some(&node_name),
                            END,
                            TransitionType::Completed,
                            duration_ms,
                            attempts,
                        )?;
                        return Ok(checkpoint.run_status());
                    }
                    None => {
                        let error = EngineError::NoMatchingEdge {
                            run_id,
                            node: node_name.clone(),
                        };
                        tracing::error!("{}", error);
                        self.finish(
                            &mut checkpoint,
                            ExecutionStatus::Failed,
                            Some(error.to_string()),
                        )?;
                        self.transition(
                            run_id,
                            Some(&node_name),
                            &node_name,
                            TransitionType::Failed,
                            duration_ms,
                            attempts,
                        )?;
                        return Err(error);
                    }
                },
                Directive::Suspend(mut pending) => {
                    pending.requested_by = node_name.clone();
                    checkpoint.state.set_pending_input(&pending);
                    checkpoint.status = ExecutionStatus::Suspended;
                    checkpoint.awaiting = Some(pending);
                    self.store.save(&mut checkpoint)?;
                    if checkpoint.status == ExecutionStatus::Cancelled {
                        return Ok(Self::cancelled_elsewhere(&checkpoint));
                    }
                    self.transition(
                        run_id,
                        Some(&node_name),
                        &node_name,
                        TransitionType::Suspended,
                        duration_ms,
                        attempts,
                    )?;
                    log_run_event(run_id, graph.name(), "suspended", Some(&node_name));
                    return Ok(checkpoint.run_status());
                }
                Directive::Complete => {
                    self.finish(&mut checkpoint, ExecutionStatus::Completed, None)?;
                    self.transition(
                        run_id,
                        Some(&node_name),
                        &node_name,
                        TransitionType::Completed,
                        duration_ms,
                        attempts,
                    )?;
                    return Ok(checkpoint.run_status());
                }
                Directive::Fail(reason) => {
                    self.finish(&mut checkpoint, ExecutionStatus::Failed, Some(reason))?;
                    self.transition(
                        run_id,
                        Some(&node_name),
                        &node_name,
                        TransitionType::Failed,
                        duration_ms,
                        attempts,
                    )?;
                    return Ok(checkpoint.run_status());
                }
            }
        }
    }

    /// The store kept a cancellation another caller made while this run was in a node
    fn cancelled_elsewhere(checkpoint: &RunCheckpoint) -> RunStatus {
        tracing::info!(node = %checkpoint.current_node, "Run was cancelled by another caller");
        checkpoint.run_status()
    }

    /// Run a node with timeout and retry; each attempt starts from the checkpointed state
    async fn execute_node(&self, node: &GraphNode, state: &WorkflowState) -> NodeAttempt {
        let policy = &node.retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 0..max_attempts {
            tracing::debug!(
                "Executing node '{}' (attempt {}/{})",
                node.name,
                attempt + 1,
                max_attempts
            );

            let run = node.run(state.clone());
            let result = match node.timeout {
                Some(limit) => match tokio::time::timeout(limit, run).await {
                    Ok(result) => result,
                    Err(_) => Err(NodeError::Transient(format!(
                        "node timed out after {}s",
                        limit.as_secs()
                    ))),
                },
                None => run.await,
            };

            match result {
                Ok(output) => {
                    return NodeAttempt {
                        outcome: Ok(output),
                        attempts: attempt + 1,
                    }
                }
                Err(NodeError::Fatal(reason)) => {
                    tracing::warn!("Permanent failure in node '{}' - skipping retry", node.name);
                    return NodeAttempt {
                        outcome: Err(reason),
                        attempts: attempt + 1,
                    };
                }
                Err(NodeError::Transient(reason)) => {
                    last_error = reason;
                    if attempt + 1 < max_attempts {
                        let delay = policy.delay_for_attempt(attempt);
                        tracing::info!(
                            "Retrying node '{}' after {}ms (attempt {}/{}): {}",
                            node.name,
                            delay.as_millis(),
                            attempt + 1,
                            max_attempts,
                            last_error
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        NodeAttempt {
            outcome: Err(format!(
                "retry exhausted after {} attempts: {}",
                max_attempts, last_error
            )),
            attempts: max_attempts,
        }
    }

    fn finish(
        &self,
        checkpoint: &mut RunCheckpoint,
        status: ExecutionStatus,
        error: Option<String>,
    ) -> Result<(), EngineError> {
        checkpoint.status = status;
        checkpoint.error = error;
        checkpoint.awaiting = None;
        self.store.save(checkpoint)?;

        if let Some(error) = &checkpoint.error {
            log_error(error, Some(&checkpoint.current_node));
        }
        let event = checkpoint.run_status().label();
        log_run_event(
            checkpoint.run_id,
            &checkpoint.workflow_name,
            event,
            Some(&checkpoint.current_node),
        );
        Ok(())
    }

    fn transition(
        &self,
        run_id: Uuid,
        from: Option<&str>,
        to: &str,
        transition_type: TransitionType,
        duration_ms: Option<u64>,
        attempts: Option<u32>,
    ) -> Result<(), EngineError> {
        let mut transition =
            StateTransition::new(run_id, from.map(str::to_string), to, transition_type);
        transition.duration_ms = duration_ms;
        transition.attempts = attempts;
        self.store.record_transition(transition)?;
        Ok(())
    }
}

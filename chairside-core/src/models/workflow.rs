//! Workflow orchestration data models

use crate::models::state::{PendingInput, WorkflowState};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// Reserved source marker; the single edge leaving it designates the start node
pub const START: &str = "__start__";
/// Reserved target marker; an edge into it completes the run successfully
pub const END: &str = "__end__";

/// Names no node may take
pub const RESERVED_NODE_NAMES: &[&str] = &[START, END];

/// Execution status for workflow runs
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Run is advancing (or was, when the process stopped)
    Running,
    /// Waiting for externally supplied input
    Suspended,
    /// Reached a success terminal
    Completed,
    /// Reached a failure terminal or exhausted a node without a failure edge
    Failed,
    /// Cancelled between node executions
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Workflow definition - reusable template for runs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Unique workflow identifier
    pub name: String,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Fields the caller must supply at start
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Nodes in declaration order
    pub nodes: Vec<NodeDefinition>,
    /// Edges; outgoing edges of a node are evaluated in declaration order
    pub edges: Vec<EdgeDefinition>,
    /// Default configuration for all nodes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<DefaultConfiguration>,
}

/// Default configuration applied to all nodes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DefaultConfiguration {
    /// Default node timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u32>,
    /// Default retry policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    /// How many times one node may run within a single run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_node_visits: Option<u32>,
}

/// Individual node definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDefinition {
    /// Node name (unique within workflow)
    pub name: String,
    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// What the node does
    #[serde(flatten)]
    pub kind: NodeKind,
    /// Maximum execution time per attempt in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u32>,
    /// Retry configuration for this node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
}

impl NodeDefinition {
    pub fn agent(name: impl Into<String>, agent: impl Into<String>) -> Self {
        Self::with_kind(
            name,
            NodeKind::Agent {
                agent: agent.into(),
            },
        )
    }

    pub fn decision(name: impl Into<String>) -> Self {
        Self::with_kind(name, NodeKind::Decision)
    }

    pub fn await_input(
        name: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::with_kind(
            name,
            NodeKind::AwaitInput {
                field: field.into(),
                reason: reason.into(),
                input_kind: crate::models::InputKind::Confirmation,
            },
        )
    }

    pub fn terminal(name: impl Into<String>, outcome: TerminalOutcome) -> Self {
        Self::with_kind(name, NodeKind::Terminal { outcome })
    }

    pub fn with_kind(name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            name: name.into(),
            description: None,
            kind,
            timeout_seconds: None,
            retry_policy: None,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn timeout(mut self, seconds: u32) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.kind, NodeKind::Terminal { .. })
    }
}

/// Node behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    /// Invoke a registered task agent
    Agent { agent: String },
    /// Pure routing step; outgoing edges pick the next node
    Decision,
    /// Suspend until `field` is present in state
    AwaitInput {
        field: String,
        reason: String,
        #[serde(default)]
        input_kind: crate::models::InputKind,
    },
    /// End the run
    Terminal { outcome: TerminalOutcome },
}

/// How a terminal node ends the run
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TerminalOutcome {
    Success,
    Failure,
}

/// Directed edge between nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDefinition {
    pub from: String,
    pub to: String,
    /// Guard over the state; defaults to unconditional
    #[serde(default)]
    pub when: EdgeCondition,
}

impl EdgeDefinition {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            when: EdgeCondition::Always,
        }
    }

    pub fn when(mut self, condition: EdgeCondition) -> Self {
        self.when = condition;
        self
    }
}

/// Predicate over workflow state guarding an edge
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EdgeCondition {
    /// Unconditional (default) edge
    #[default]
    Always,
    Truthy(String),
    Falsy(String),
    Present(String),
    Absent(String),
    Equals {
        field: String,
        value: Value,
    },
    /// The source node exhausted its retry or visit budget
    NodeFailed,
}

impl EdgeCondition {
    /// Evaluate the guard for an edge leaving `node`
    pub fn evaluate(&self, state: &WorkflowState, node: &str) -> bool {
        match self {
            Self::Always => true,
            Self::Truthy(field) => state.is_truthy(field),
            Self::Falsy(field) => !state.is_truthy(field),
            Self::Present(field) => state.contains(field),
            Self::Absent(field) => !state.contains(field),
            Self::Equals { field, value } => state.get(field) == Some(value),
            Self::NodeFailed => state.node_failed().is_some_and(|m| m.node == node),
        }
    }

    /// Field the guard reads, if any
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Truthy(field)
            | Self::Falsy(field)
            | Self::Present(field)
            | Self::Absent(field)
            | Self::Equals { field, .. } => Some(field),
            Self::Always | Self::NodeFailed => None,
        }
    }

    pub fn is_unconditional(&self) -> bool {
        matches!(self, Self::Always)
    }
}

/// Node-level retry policy for transient failures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts including the first (1-10)
    pub max_attempts: u32,
    /// Delay before first retry in milliseconds
    pub initial_delay_ms: u64,
    /// Whether to use exponential backoff
    #[serde(default)]
    pub exponential_backoff: bool,
    /// Multiplier for exponential backoff (>= 1.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Upper bound for a single delay in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            exponential_backoff: true,
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay_ms: 0,
            exponential_backoff: false,
            backoff_multiplier: 1.0,
            max_delay_ms: 0,
        }
    }

    /// Delay before the retry that follows zero-based `attempt`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms = if self.exponential_backoff {
            // initial * (multiplier ^ attempt)
            let delay = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
            delay.min(self.max_delay_ms as f64) as u64
        } else {
            self.initial_delay_ms.min(self.max_delay_ms)
        };

        Duration::from_millis(delay_ms)
    }
}

/// Current checkpoint of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCheckpoint {
    /// Unique run identifier
    pub run_id: Uuid,
    /// Name of the workflow definition
    pub workflow_name: String,
    /// Node that runs next (or that suspended / ended the run)
    pub current_node: String,
    /// Full state snapshot
    pub state: WorkflowState,
    /// Overall run status
    pub status: ExecutionStatus,
    /// Input the run is waiting for while suspended
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub awaiting: Option<PendingInput>,
    /// Failure description for failed runs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Per-node visit counters
    #[serde(default)]
    pub visits: BTreeMap<String, u32>,
    /// Incremented on every save
    pub sequence: u64,
    /// Identity of user/system that started the run
    pub initiator: String,
    /// When the run began
    pub started_at: DateTime<Utc>,
    /// When this checkpoint was written
    pub updated_at: DateTime<Utc>,
    /// When the run reached a terminal status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunCheckpoint {
    pub fn new(
        run_id: Uuid,
        workflow_name: impl Into<String>,
        start_node: impl Into<String>,
        state: WorkflowState,
        initiator: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            run_id,
            workflow_name: workflow_name.into(),
            current_node: start_node.into(),
            state,
            status: ExecutionStatus::Running,
            awaiting: None,
            error: None,
            visits: BTreeMap::new(),
            sequence: 0,
            initiator: initiator.into(),
            started_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Caller-facing status derived from the checkpoint
    pub fn run_status(&self) -> RunStatus {
        match self.status {
            ExecutionStatus::Running => RunStatus::Running,
            ExecutionStatus::Suspended => match &self.awaiting {
                Some(pending) => RunStatus::Suspended {
                    awaiting: pending.awaiting.clone(),
                    field: pending.field.clone(),
                    prompt: pending.prompt.clone(),
                },
                None => RunStatus::Suspended {
                    awaiting: self.current_node.clone(),
                    field: String::new(),
                    prompt: String::new(),
                },
            },
            ExecutionStatus::Completed => RunStatus::Completed {
                final_state: self.state.clone(),
            },
            ExecutionStatus::Failed => RunStatus::Failed {
                error: self
                    .error
                    .clone()
                    .unwrap_or_else(|| "run failed".to_string()),
            },
            ExecutionStatus::Cancelled => RunStatus::Cancelled,
        }
    }
}

/// Status reported to callers of start/resume/status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    /// Waiting for `field`; `prompt` says why
    Suspended {
        awaiting: String,
        field: String,
        prompt: String,
    },
    Completed {
        final_state: WorkflowState,
    },
    Failed {
        error: String,
    },
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed { .. } | Self::Failed { .. } | Self::Cancelled
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Suspended { .. } => "suspended",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Handle returned when a run is started
#[derive(Debug, Clone, PartialEq)]
pub struct RunHandle {
    pub run_id: Uuid,
    pub workflow_name: String,
    pub status: RunStatus,
}

/// State transition record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    /// Unique transition ID
    pub id: Uuid,
    /// Run the transition belongs to
    pub run_id: Uuid,
    /// Previous node (None for the initial transition)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_node: Option<String>,
    /// Node the run moved to
    pub to_node: String,
    /// Reason for transition
    pub transition_type: TransitionType,
    /// When transition occurred
    pub timestamp: DateTime<Utc>,
    /// Time spent in from_node (milliseconds)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    /// Attempts used by from_node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
}

impl StateTransition {
    pub fn new(
        run_id: Uuid,
        from_node: Option<String>,
        to_node: impl Into<String>,
        transition_type: TransitionType,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id,
            from_node,
            to_node: to_node.into(),
            transition_type,
            timestamp: Utc::now(),
            duration_ms: None,
            attempts: None,
        }
    }
}

/// Reason for state transition
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransitionType {
    /// Run created at the start node
    Initial,
    /// Node continued along an edge
    Advance,
    /// Node exhausted its budget and routed via its failure edge
    NodeFailed,
    /// Node requested external input
    Suspended,
    /// Caller supplied input
    Resumed,
    /// Success terminal reached
    Completed,
    /// Failure terminal reached or node failed without a failure edge
    Failed,
    /// Cancelled between nodes
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_status_serialization() {
        let status = ExecutionStatus::Suspended;
        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(json, "\"suspended\"");
        assert!(!status.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_retry_delay_linear() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 200,
            exponential_backoff: false,
            backoff_multiplier: 1.0,
            max_delay_ms: 10_000,
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
    }

    #[test]
    fn test_retry_delay_exponential_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_delay_ms: 100,
            exponential_backoff: true,
            backoff_multiplier: 2.0,
            max_delay_ms: 500,
        };

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(9), Duration::from_millis(500));
    }

    #[test]
    fn test_edge_condition_yaml_forms() {
        let edge: EdgeDefinition =
            serde_yaml::from_str("from: login\nto: done\nwhen:\n  truthy: login_successful\n")
                .unwrap();
        assert_eq!(
            edge.when,
            EdgeCondition::Truthy("login_successful".to_string())
        );

        let default_edge: EdgeDefinition = serde_yaml::from_str("from: login\nto: failed\n").unwrap();
        assert!(default_edge.when.is_unconditional());
    }

    #[test]
    fn test_node_failed_condition_is_scoped_to_source() {
        let mut state = WorkflowState::new();
        state.mark_node_failed("check_eligibility", "timeout", 3);

        assert!(EdgeCondition::NodeFailed.evaluate(&state, "check_eligibility"));
        assert!(!EdgeCondition::NodeFailed.evaluate(&state, "portal_login"));
    }

    #[test]
    fn test_node_kind_yaml() {
        let node: NodeDefinition = serde_yaml::from_str(
            "name: review\ntype: await_input\nfield: human_verified\nreason: Confirm coverage\n",
        )
        .unwrap();
        match node.kind {
            NodeKind::AwaitInput {
                field, input_kind, ..
            } => {
                assert_eq!(field, "human_verified");
                assert_eq!(input_kind, crate::models::InputKind::Other);
            }
            other => panic!("unexpected node kind: {:?}", other),
        }
    }

    #[test]
    fn test_suspended_run_status_reports_field_and_reason() {
        let mut checkpoint = RunCheckpoint::new(
            Uuid::new_v4(),
            "eligibility-verification",
            "primary_insurance_verification",
            WorkflowState::new(),
            "test",
        );
        checkpoint.status = ExecutionStatus::Suspended;
        checkpoint.awaiting = Some(PendingInput {
            awaiting: "primary_insurance_verification".to_string(),
            field: "human_verified".to_string(),
            prompt: "Confirm primary insurance".to_string(),
            kind: crate::models::InputKind::Confirmation,
            requested_by: "primary_insurance_verification".to_string(),
        });

        match checkpoint.run_status() {
            RunStatus::Suspended {
                awaiting, field, ..
            } => {
                assert_eq!(awaiting, "primary_insurance_verification");
                assert_eq!(field, "human_verified");
            }
            other => panic!("unexpected status: {:?}", other),
        }
    }
}

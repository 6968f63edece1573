//! Workflow error taxonomy

use thiserror::Error;
use uuid::Uuid;

/// A workflow definition failed build-time validation
///
/// Carries every violation found, not just the first.
#[derive(Error, Debug, Clone)]
#[error("workflow '{workflow}' is invalid: {}", .violations.join("; "))]
pub struct GraphDefinitionError {
    pub workflow: String,
    pub violations: Vec<String>,
    pub warnings: Vec<String>,
}

/// Failure raised by a node function
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// Retried with backoff per the node's retry policy
    #[error("transient failure: {0}")]
    Transient(String),

    /// Not retried; the node fails immediately
    #[error("{0}")]
    Fatal(String),
}

impl NodeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::Transient(reason) | Self::Fatal(reason) => reason,
        }
    }
}

/// Errors surfaced by the engine entry points
#[derive(Error, Debug)]
pub enum EngineError {
    /// No outgoing edge matched; the graph has a gap validation should have caught
    #[error("no outgoing edge of node '{node}' matched in run {run_id}")]
    NoMatchingEdge { run_id: Uuid, node: String },

    #[error("run {0} has already finished")]
    RunAlreadyTerminal(Uuid),

    #[error("run {0} is not waiting for input")]
    RunNotSuspended(Uuid),

    #[error("run {0} not found")]
    RunNotFound(Uuid),

    #[error("run {0} is being driven by another caller")]
    RunBusy(Uuid),

    #[error("workflow '{0}' is not registered")]
    UnknownWorkflow(String),

    #[error("node '{node}' does not exist in workflow '{workflow}'")]
    UnknownNode { workflow: String, node: String },

    #[error("missing required input fields: {}", .0.join(", "))]
    MissingInputs(Vec<String>),

    #[error("run {run_id} belongs to workflow '{expected}', not '{actual}'")]
    WorkflowMismatch {
        run_id: Uuid,
        expected: String,
        actual: String,
    },

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

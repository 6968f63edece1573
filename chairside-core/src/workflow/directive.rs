//! What a node tells the engine to do next

use crate::models::{PendingInput, WorkflowState};

#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Evaluate outgoing edges against the updated state
    Continue,
    /// Persist and return to the caller until `resume` supplies input
    Suspend(PendingInput),
    /// End the run successfully
    Complete,
    /// End the run as failed
    Fail(String),
}

/// Updated state plus directive produced by one node execution
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutput {
    pub state: WorkflowState,
    pub directive: Directive,
}

impl NodeOutput {
    pub fn proceed(state: WorkflowState) -> Self {
        Self {
            state,
            directive: Directive::Continue,
        }
    }

    pub fn suspend(state: WorkflowState, pending: PendingInput) -> Self {
        Self {
            state,
            directive: Directive::Suspend(pending),
        }
    }

    pub fn complete(state: WorkflowState) -> Self {
        Self {
            state,
            directive: Directive::Complete,
        }
    }

    pub fn fail(state: WorkflowState, reason: impl Into<String>) -> Self {
        Self {
            state,
            directive: Directive::Fail(reason.into()),
        }
    }
}

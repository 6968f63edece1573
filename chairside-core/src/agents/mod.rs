//! Task agents
//!
//! An agent composes one instruction for the automation backend, interprets
//! the classified result and maps it onto declared state fields. Agents keep
//! nothing between invocations; everything durable lives in the state they
//! are handed.

pub mod eligibility;
pub mod portal_login;
pub mod registry;
pub mod search;

pub use eligibility::*;
pub use portal_login::*;
pub use registry::*;
pub use search::*;

use crate::automation::AutomationBackend;
use crate::credentials::CredentialProvider;
use crate::models::{AutomationResult, FailureKind, PendingInput, WorkflowState};
use crate::workflow::{NodeError, NodeOutput};
use async_trait::async_trait;
use std::sync::Arc;

/// Single-responsibility unit of work invoked by agent nodes
#[async_trait]
pub trait TaskAgent: Send + Sync {
    /// Registry name referenced by workflow definitions
    fn name(&self) -> &str;

    /// One-line description of what the agent does
    fn capabilities(&self) -> &str;

    /// Fields the agent reads; checked against the workflow at build time
    fn reads(&self) -> &[&'static str];

    /// Fields the agent may write
    fn writes(&self) -> &[&'static str];

    async fn execute(&self, state: WorkflowState) -> Result<NodeOutput, NodeError>;
}

/// Collaborators shared by every agent
#[derive(Clone)]
pub struct AgentContext {
    pub credentials: Arc<dyn CredentialProvider>,
    pub backend: Arc<dyn AutomationBackend>,
}

impl AgentContext {
    pub fn new(
        credentials: Arc<dyn CredentialProvider>,
        backend: Arc<dyn AutomationBackend>,
    ) -> Self {
        Self {
            credentials,
            backend,
        }
    }

    /// Resolve credentials for `system` (if any) and make exactly one backend call
    ///
    /// The bundle lives only for the duration of this call. Credential errors
    /// and instructions that would leak a secret never reach the backend.
    pub async fn dispatch(
        &self,
        agent: &str,
        system: Option<&str>,
        instruction: &str,
    ) -> AutomationResult {
        let bundle = match system {
            Some(system) => match self.credentials.get(system) {
                Ok(bundle) => Some(bundle),
                Err(e) => {
                    tracing::warn!(agent = agent, system = system, "Credential lookup failed: {}", e);
                    return AutomationResult::failure(FailureKind::CredentialUnavailable, e.to_string());
                }
            },
            None => None,
        };

        if bundle.as_ref().is_some_and(|b| b.appears_in(instruction)) {
            tracing::error!(agent = agent, "Refusing to send instruction containing a secret value");
            return AutomationResult::failure(
                FailureKind::UnsafeInstruction,
                "instruction text contained a credential value",
            );
        }

        self.backend.invoke(instruction, bundle.as_ref()).await
    }
}

/// Map an automation result onto state and a directive
///
/// `apply` runs with `Some(payload)` on success and `None` after a recorded
/// failure, so agents can set their output flags either way. Transient
/// failures become [`NodeError::Transient`] for the engine's retry policy.
pub fn settle(
    agent: &str,
    mut state: WorkflowState,
    result: AutomationResult,
    apply: impl FnOnce(&mut WorkflowState, Option<&str>),
) -> Result<NodeOutput, NodeError> {
    match result {
        AutomationResult::Success { payload } => {
            state.clear_error();
            apply(&mut state, Some(&payload));
            Ok(NodeOutput::proceed(state))
        }
        AutomationResult::Failure { reason, kind } if kind.is_transient() => {
            Err(NodeError::Transient(format!("{}: {}", kind, reason)))
        }
        AutomationResult::Failure { reason, kind } => {
            tracing::warn!(agent = agent, kind = %kind, "Agent recorded failure: {}", reason);
            state.record_error(agent, kind, &reason);
            apply(&mut state, None);
            Ok(NodeOutput::proceed(state))
        }
        AutomationResult::NeedsInput { prompt, kind } => {
            let pending = PendingInput::from_prompt(agent, kind, prompt);
            state.set_pending_input(&pending);
            Ok(NodeOutput::suspend(state, pending))
        }
    }
}

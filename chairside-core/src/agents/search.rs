//! Web search agent

use crate::agents::{settle, AgentContext, TaskAgent};
use crate::models::WorkflowState;
use crate::workflow::{NodeError, NodeOutput};
use async_trait::async_trait;

/// Runs a web search through the automation backend; needs no credentials
pub struct WebSearchAgent {
    context: AgentContext,
}

impl WebSearchAgent {
    pub const NAME: &'static str = "web_search";

    pub fn new(context: AgentContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl TaskAgent for WebSearchAgent {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn capabilities(&self) -> &str {
        "Searches the web and reports the top results"
    }

    fn reads(&self) -> &[&'static str] {
        &["query"]
    }

    fn writes(&self) -> &[&'static str] {
        &["search_results"]
    }

    async fn execute(&self, state: WorkflowState) -> Result<NodeOutput, NodeError> {
        let query = state
            .get_str("query")
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| NodeError::Fatal("state field 'query' is missing or empty".to_string()))?;

        let instruction = format!(
            "Navigate to google.com and search for: {}\nReport the top results, one per line.",
            query
        );

        let result = self.context.dispatch(Self::NAME, None, &instruction).await;
        settle(Self::NAME, state, result, |state, payload| {
            if let Some(payload) = payload {
                state.set("search_results", payload);
            }
        })
    }
}

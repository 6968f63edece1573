//! Named agent registry resolved at graph build time

use crate::agents::{
    AgentContext, EligibilityAgent, PortalLoginAgent, TaskAgent, WebSearchAgent,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Agents by registry name
#[derive(Clone, Default)]
pub struct AgentRegistry {
    agents: BTreeMap<String, Arc<dyn TaskAgent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in agent sharing `context`
    pub fn with_builtin(context: AgentContext) -> Self {
        let mut registry = Self::new();
        registry.register(PortalLoginAgent::new(context.clone()));
        registry.register(EligibilityAgent::new(context.clone()));
        registry.register(WebSearchAgent::new(context));
        registry
    }

    /// Register an agent, replacing any agent with the same name
    pub fn register(&mut self, agent: impl TaskAgent + 'static) {
        self.register_arc(Arc::new(agent));
    }

    pub fn register_arc(&mut self, agent: Arc<dyn TaskAgent>) {
        self.agents.insert(agent.name().to_string(), agent);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskAgent>> {
        self.agents.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.agents.keys().map(String::as_str)
    }

    /// `(name, capability)` pairs in name order
    pub fn describe(&self) -> Vec<(String, String)> {
        self.agents
            .values()
            .map(|agent| (agent.name().to_string(), agent.capabilities().to_string()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::automation::AutomationBackend;
    use crate::credentials::{CredentialBundle, CredentialSpec, EnvCredentialProvider};
    use crate::models::AutomationResult;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct Idle;

    #[async_trait]
    impl AutomationBackend for Idle {
        async fn invoke(&self, _: &str, _: Option<&CredentialBundle>) -> AutomationResult {
            AutomationResult::success("idle")
        }
    }

    #[test]
    fn test_builtin_agents() {
        let context = AgentContext::new(
            Arc::new(EnvCredentialProvider::with_source(
                HashMap::new(),
                [CredentialSpec::new("mohealthnet")],
            )),
            Arc::new(Idle),
        );
        let registry = AgentRegistry::with_builtin(context);

        assert_eq!(
            registry.names().collect::<Vec<_>>(),
            vec!["eligibility_check", "portal_login", "web_search"]
        );
        assert!(registry
            .get("portal_login")
            .unwrap()
            .reads()
            .contains(&"portal"));
        assert!(registry.describe().iter().all(|(_, caps)| !caps.is_empty()));
    }
}

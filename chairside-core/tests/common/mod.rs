//! Shared fixtures for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chairside_core::agents::{AgentContext, AgentRegistry, TaskAgent};
use chairside_core::automation::AutomationBackend;
use chairside_core::credentials::{CredentialBundle, CredentialSpec, EnvCredentialProvider};
use chairside_core::models::{AutomationResult, EngineConfig, RetryPolicy, WorkflowState};
use chairside_core::workflow::{
    CheckpointStore, InMemoryCheckpointStore, NodeError, NodeOutput, WorkflowOrchestrator,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const USERNAME: &str = "frontdesk-7731";
pub const PASSWORD: &str = "Xq9!molar-Secret";

/// One call the scripted backend received
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub instruction: String,
    /// Credential handle, never the values
    pub credential: Option<String>,
    /// Whether any secret of the bundle occurred in the instruction
    pub leaked: bool,
}

/// Automation backend replaying canned results in order
pub struct ScriptedBackend {
    script: Mutex<VecDeque<AutomationResult>>,
    fallback: AutomationResult,
    delay: Option<Duration>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedBackend {
    pub fn new(script: impl IntoIterator<Item = AutomationResult>) -> Arc<Self> {
        Arc::new(Self::build(script, None))
    }

    /// Every call answers `result`
    pub fn always(result: AutomationResult) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: result,
            delay: None,
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn with_delay(
        script: impl IntoIterator<Item = AutomationResult>,
        delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self::build(script, Some(delay)))
    }

    fn build(script: impl IntoIterator<Item = AutomationResult>, delay: Option<Duration>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback: AutomationResult::success("ok"),
            delay,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl AutomationBackend for ScriptedBackend {
    async fn invoke(
        &self,
        instruction: &str,
        credentials: Option<&CredentialBundle>,
    ) -> AutomationResult {
        self.calls.lock().unwrap().push(RecordedCall {
            instruction: instruction.to_string(),
            credential: credentials.map(|c| c.handle().to_string()),
            leaked: credentials.is_some_and(|c| c.appears_in(instruction)),
        });
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}

/// Provider over a fixed map holding the MoHealthNet test secrets
pub fn static_credentials() -> Arc<EnvCredentialProvider<HashMap<String, String>>> {
    let source: HashMap<String, String> = [
        ("MOHEALTHNET_USERNAME", USERNAME),
        ("MOHEALTHNET_PASSWORD", PASSWORD),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    Arc::new(EnvCredentialProvider::with_source(
        source,
        [CredentialSpec::new("mohealthnet")],
    ))
}

/// Provider that knows `mohealthnet` but has no secrets for it
pub fn empty_credentials() -> Arc<EnvCredentialProvider<HashMap<String, String>>> {
    Arc::new(EnvCredentialProvider::with_source(
        HashMap::new(),
        [CredentialSpec::new("mohealthnet")],
    ))
}

/// Engine defaults with millisecond backoff
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        max_node_visits: 20,
        node_timeout_seconds: None,
        default_retry: fast_retry(3),
    }
}

pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_delay_ms: 1,
        exponential_backoff: true,
        backoff_multiplier: 2.0,
        max_delay_ms: 10,
    }
}

pub fn builtin_registry(
    credentials: Arc<EnvCredentialProvider<HashMap<String, String>>>,
    backend: Arc<ScriptedBackend>,
) -> AgentRegistry {
    AgentRegistry::with_builtin(AgentContext::new(credentials, backend))
}

/// Orchestrator over an in-memory store with every built-in workflow registered
pub fn orchestrator(
    credentials: Arc<EnvCredentialProvider<HashMap<String, String>>>,
    backend: Arc<ScriptedBackend>,
) -> (WorkflowOrchestrator, Arc<InMemoryCheckpointStore>) {
    let store = Arc::new(InMemoryCheckpointStore::new());
    let orchestrator = WorkflowOrchestrator::new(
        store.clone() as Arc<dyn CheckpointStore>,
        builtin_registry(credentials, backend),
        fast_config(),
    );
    orchestrator.register_builtin().unwrap();
    (orchestrator, store)
}

pub fn patient() -> serde_json::Value {
    serde_json::json!({
        "first_name": "Maria",
        "last_name": "Gonzales",
        "dob": "2016-04-02"
    })
}

type Behaviour = dyn Fn(WorkflowState, u32) -> Result<NodeOutput, NodeError> + Send + Sync;

/// In-process agent driven by a closure; the second argument is the call number
pub struct ScriptedAgent {
    name: &'static str,
    reads: &'static [&'static str],
    writes: &'static [&'static str],
    behaviour: Box<Behaviour>,
    calls: Arc<AtomicU32>,
}

impl ScriptedAgent {
    pub fn new(
        name: &'static str,
        reads: &'static [&'static str],
        writes: &'static [&'static str],
        behaviour: impl Fn(WorkflowState, u32) -> Result<NodeOutput, NodeError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            reads,
            writes,
            behaviour: Box::new(behaviour),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Shared call counter, readable after the agent moves into a registry
    pub fn counter(&self) -> Arc<AtomicU32> {
        self.calls.clone()
    }
}

#[async_trait]
impl TaskAgent for ScriptedAgent {
    fn name(&self) -> &str {
        self.name
    }

    fn capabilities(&self) -> &str {
        "test agent"
    }

    fn reads(&self) -> &[&'static str] {
        self.reads
    }

    fn writes(&self) -> &[&'static str] {
        self.writes
    }

    async fn execute(&self, state: WorkflowState) -> Result<NodeOutput, NodeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        (self.behaviour)(state, call)
    }
}

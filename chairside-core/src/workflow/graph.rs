//! Immutable, validated workflow graph shared by every run of a workflow

use crate::agents::{AgentRegistry, TaskAgent};
use crate::models::workflow::{
    EdgeCondition, NodeKind, RetryPolicy, TerminalOutcome, WorkflowDefinition, END, START,
};
use crate::models::{EngineConfig, PendingInput, WorkflowState};
use crate::workflow::directive::NodeOutput;
use crate::workflow::error::{GraphDefinitionError, NodeError};
use crate::workflow::validator::WorkflowValidator;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Where an edge leads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Node(String),
    /// Reserved end marker; the run completes successfully
    End,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(name) => f.write_str(name),
            Self::End => f.write_str(END),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GraphEdge {
    pub to: Target,
    pub when: EdgeCondition,
}

/// One node with its agent resolved and its policies settled
pub struct GraphNode {
    pub name: String,
    pub kind: NodeKind,
    agent: Option<Arc<dyn TaskAgent>>,
    /// Outgoing edges in declaration order
    pub edges: Vec<GraphEdge>,
    pub retry: RetryPolicy,
    pub timeout: Option<Duration>,
}

impl GraphNode {
    /// Whether a node-failed guard routes this node's failures
    pub fn has_failure_edge(&self) -> bool {
        self.edges.iter().any(|e| e.when == EdgeCondition::NodeFailed)
    }

    /// First outgoing edge whose guard holds over `state`
    pub fn select_edge(&self, state: &WorkflowState) -> Option<&Target> {
        self.edges
            .iter()
            .find(|edge| edge.when.evaluate(state, &self.name))
            .map(|edge| &edge.to)
    }

    /// Execute the node function once
    pub async fn run(&self, state: WorkflowState) -> Result<NodeOutput, NodeError> {
        match &self.kind {
            NodeKind::Agent { agent } => match &self.agent {
                Some(handler) => handler.execute(state).await,
                None => Err(NodeError::Fatal(format!("agent '{}' is not bound", agent))),
            },
            NodeKind::Decision => Ok(NodeOutput::proceed(state)),
            NodeKind::AwaitInput {
                field,
                reason,
                input_kind,
            } => {
                if state.contains(field) {
                    Ok(NodeOutput::proceed(state))
                } else {
                    let pending = PendingInput {
                        awaiting: self.name.clone(),
                        field: field.clone(),
                        prompt: reason.clone(),
                        kind: *input_kind,
                        requested_by: self.name.clone(),
                    };
                    let mut state = state;
                    state.set_pending_input(&pending);
                    Ok(NodeOutput::suspend(state, pending))
                }
            }
            NodeKind::Terminal {
                outcome: TerminalOutcome::Success,
            } => Ok(NodeOutput::complete(state)),
            NodeKind::Terminal {
                outcome: TerminalOutcome::Failure,
            } => {
                let reason = state
                    .node_failed()
                    .map(|marker| format!("node '{}' failed: {}", marker.node, marker.reason))
                    .or_else(|| state.error())
                    .unwrap_or_else(|| format!("reached failure terminal '{}'", self.name));
                Ok(NodeOutput::fail(state, reason))
            }
        }
    }
}

impl fmt::Debug for GraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphNode")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("edges", &self.edges)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Validated workflow, built once and shared read-only across runs
#[derive(Debug)]
pub struct WorkflowGraph {
    name: String,
    description: Option<String>,
    inputs: Vec<String>,
    start: String,
    nodes: HashMap<String, GraphNode>,
    order: Vec<String>,
    max_node_visits: u32,
    warnings: Vec<String>,
}

impl WorkflowGraph {
    /// Validate and build with engine defaults
    pub fn build(
        definition: &WorkflowDefinition,
        agents: &AgentRegistry,
    ) -> Result<Self, GraphDefinitionError> {
        Self::build_with(definition, agents, &EngineConfig::default())
    }

    /// Validate and build; node settings fall back to workflow defaults, then `config`
    pub fn build_with(
        definition: &WorkflowDefinition,
        agents: &AgentRegistry,
        config: &EngineConfig,
    ) -> Result<Self, GraphDefinitionError> {
        let warnings = WorkflowValidator::validate_workflow(definition, agents)
            .into_result(&definition.name)?;
        for warning in &warnings {
            tracing::warn!(workflow = %definition.name, "{}", warning);
        }

        let defaults = definition.defaults.clone().unwrap_or_default();
        let start = definition
            .edges
            .iter()
            .find(|e| e.from == START)
            .map(|e| e.to.clone())
            .unwrap_or_default();

        let mut nodes = HashMap::new();
        let mut order = Vec::with_capacity(definition.nodes.len());
        for node in &definition.nodes {
            let agent = match &node.kind {
                NodeKind::Agent { agent } => agents.get(agent),
                _ => None,
            };
            let edges = definition
                .edges
                .iter()
                .filter(|e| e.from == node.name)
                .map(|e| GraphEdge {
                    to: if e.to == END {
                        Target::End
                    } else {
                        Target::Node(e.to.clone())
                    },
                    when: e.when.clone(),
                })
                .collect();
            let retry = node
                .retry_policy
                .clone()
                .or_else(|| defaults.retry_policy.clone())
                .unwrap_or_else(|| config.default_retry.clone());
            let timeout = node
                .timeout_seconds
                .or(defaults.timeout_seconds)
                .or(config.node_timeout_seconds)
                .map(|secs| Duration::from_secs(secs as u64));

            order.push(node.name.clone());
            nodes.insert(
                node.name.clone(),
                GraphNode {
                    name: node.name.clone(),
                    kind: node.kind.clone(),
                    agent,
                    edges,
                    retry,
                    timeout,
                },
            );
        }

        Ok(Self {
            name: definition.name.clone(),
            description: definition.description.clone(),
            inputs: definition.inputs.clone(),
            start,
            nodes,
            order,
            max_node_visits: defaults.max_node_visits.unwrap_or(config.max_node_visits),
            warnings,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Fields that must be supplied at start
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    pub fn start_node(&self) -> &str {
        &self.start
    }

    pub fn node(&self, name: &str) -> Option<&GraphNode> {
        self.nodes.get(name)
    }

    /// Nodes in declaration order
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.order.iter().filter_map(|name| self.nodes.get(name))
    }

    pub fn max_node_visits(&self) -> u32 {
        self.max_node_visits
    }

    /// Non-fatal findings from validation (cycles, shadowed edges)
    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }
}

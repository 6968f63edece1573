//! Workflow validation logic

use crate::agents::AgentRegistry;
use crate::models::workflow::{
    EdgeCondition, NodeKind, RetryPolicy, WorkflowDefinition, END, RESERVED_NODE_NAMES, START,
};
use crate::models::{InputKind, WELL_KNOWN_FIELDS};
use crate::workflow::error::GraphDefinitionError;
use std::collections::{HashMap, HashSet, VecDeque};

/// Validation error type
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

/// Validation result
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, field: String, message: String) {
        self.errors.push(ValidationError { field, message });
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    /// Warnings on success, every violation otherwise
    pub fn into_result(self, workflow: &str) -> Result<Vec<String>, GraphDefinitionError> {
        if self.errors.is_empty() {
            return Ok(self.warnings);
        }
        Err(GraphDefinitionError {
            workflow: workflow.to_string(),
            violations: self
                .errors
                .into_iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect(),
            warnings: self.warnings,
        })
    }
}

/// Workflow validator
pub struct WorkflowValidator;

impl WorkflowValidator {
    /// Validate retry policy
    /// - max_attempts: 1-10
    /// - initial_delay_ms: at most 300000
    /// - backoff_multiplier >= 1.0
    pub fn validate_retry_policy(policy: &RetryPolicy) -> ValidationResult {
        let mut result = ValidationResult::new();

        if policy.max_attempts < 1 {
            result.add_error(
                "max_attempts".to_string(),
                "max_attempts must be at least 1".to_string(),
            );
        }
        if policy.max_attempts > 10 {
            result.add_error(
                "max_attempts".to_string(),
                "max_attempts cannot exceed 10".to_string(),
            );
        }

        if policy.initial_delay_ms > 300_000 {
            result.add_error(
                "initial_delay_ms".to_string(),
                "initial_delay_ms cannot exceed 300000 (5 minutes)".to_string(),
            );
        }

        if policy.backoff_multiplier < 1.0 {
            result.add_error(
                "backoff_multiplier".to_string(),
                "backoff_multiplier must be at least 1.0".to_string(),
            );
        }

        if policy.max_delay_ms < policy.initial_delay_ms {
            result.add_warning(format!(
                "max_delay_ms ({}) is below initial_delay_ms ({}); every delay will be {}ms",
                policy.max_delay_ms, policy.initial_delay_ms, policy.max_delay_ms
            ));
        }

        if policy.exponential_backoff && policy.backoff_multiplier > 3.0 {
            result.add_warning(format!(
                "High backoff_multiplier ({}) with exponential backoff may reach max delay ({}ms) quickly",
                policy.backoff_multiplier, policy.max_delay_ms
            ));
        }

        result
    }

    /// Validate a workflow definition against the agent registry
    ///
    /// Collects every violation instead of stopping at the first.
    pub fn validate_workflow(
        workflow: &WorkflowDefinition,
        agents: &AgentRegistry,
    ) -> ValidationResult {
        let mut result = ValidationResult::new();

        if workflow.name.trim().is_empty() {
            result.add_error(
                "name".to_string(),
                "Workflow name cannot be empty".to_string(),
            );
        }

        // Node names
        let mut seen = HashSet::new();
        for node in &workflow.nodes {
            if node.name.trim().is_empty() {
                result.add_error("nodes".to_string(), "Node name cannot be empty".to_string());
            }
            if RESERVED_NODE_NAMES.contains(&node.name.as_str()) {
                result.add_error(
                    format!("nodes.{}", node.name),
                    format!("'{}' is a reserved marker and cannot name a node", node.name),
                );
            }
            if !seen.insert(node.name.as_str()) {
                result.add_error(
                    format!("nodes.{}", node.name),
                    format!("Duplicate node name '{}'", node.name),
                );
            }
        }
        let nodes: HashMap<&str, &NodeKind> = workflow
            .nodes
            .iter()
            .map(|n| (n.name.as_str(), &n.kind))
            .collect();

        // Start designation
        let start_edges: Vec<_> = workflow.edges.iter().filter(|e| e.from == START).collect();
        match start_edges.len() {
            0 => result.add_error(
                "edges".to_string(),
                format!("No start node: add exactly one edge from '{}'", START),
            ),
            1 => {
                if !start_edges[0].when.is_unconditional() {
                    result.add_error(
                        format!("edges.{}", START),
                        "The start edge must be unconditional".to_string(),
                    );
                }
                if start_edges[0].to == END {
                    result.add_error(
                        format!("edges.{}", START),
                        format!("The start edge cannot lead straight to '{}'", END),
                    );
                }
            }
            n => result.add_error(
                "edges".to_string(),
                format!(
                    "Exactly one start node is required, found {} edges from '{}'",
                    n, START
                ),
            ),
        }

        // Edge endpoints
        for edge in &workflow.edges {
            if edge.to == START {
                result.add_error(
                    format!("edges.{}", edge.from),
                    format!("'{}' cannot be an edge target", START),
                );
            } else if edge.to != END && !nodes.contains_key(edge.to.as_str()) {
                result.add_error(
                    format!("edges.{}", edge.from),
                    format!("Edge target '{}' not found", edge.to),
                );
            }
            if edge.from == END {
                result.add_error(
                    "edges".to_string(),
                    format!("'{}' cannot be an edge source", END),
                );
            } else if edge.from != START && !nodes.contains_key(edge.from.as_str()) {
                result.add_error(
                    "edges".to_string(),
                    format!("Edge source '{}' not found", edge.from),
                );
            }
        }

        // Terminals
        let has_terminal = workflow.nodes.iter().any(|n| n.is_terminal())
            || workflow.edges.iter().any(|e| e.to == END);
        if !has_terminal {
            result.add_error(
                "nodes".to_string(),
                format!(
                    "At least one terminal node (or an edge into '{}') is required",
                    END
                ),
            );
        }

        // Per-node checks
        for node in &workflow.nodes {
            let outgoing: Vec<_> = workflow.edges.iter().filter(|e| e.from == node.name).collect();

            match &node.kind {
                NodeKind::Terminal { .. } => {
                    if !outgoing.is_empty() {
                        result.add_error(
                            format!("nodes.{}", node.name),
                            format!(
                                "Terminal node '{}' should not have outgoing edges",
                                node.name
                            ),
                        );
                    }
                    continue;
                }
                NodeKind::Agent { agent } => {
                    if !agents.contains(agent) {
                        result.add_error(
                            format!("nodes.{}.agent", node.name),
                            format!("Unknown agent '{}'", agent),
                        );
                    }
                }
                NodeKind::AwaitInput { field, .. } => {
                    if field.trim().is_empty() {
                        result.add_error(
                            format!("nodes.{}.field", node.name),
                            "Awaited field name cannot be empty".to_string(),
                        );
                    }
                }
                NodeKind::Decision => {}
            }

            if outgoing.is_empty() {
                result.add_error(
                    format!("nodes.{}", node.name),
                    format!(
                        "Non-terminal node '{}' has no outgoing edges (dead end)",
                        node.name
                    ),
                );
                continue;
            }

            match outgoing.iter().position(|e| e.when.is_unconditional()) {
                None => result.add_error(
                    format!("nodes.{}", node.name),
                    format!(
                        "Node '{}' needs an unconditional default edge after its guarded edges",
                        node.name
                    ),
                ),
                Some(idx) if idx + 1 < outgoing.len() => result.add_warning(format!(
                    "Node '{}': edges after the unconditional edge to '{}' are never taken",
                    node.name, outgoing[idx].to
                )),
                Some(_) => {}
            }

            if let Some(policy) = &node.retry_policy {
                let policy_validation = Self::validate_retry_policy(policy);
                for error in policy_validation.errors {
                    result.add_error(
                        format!("nodes.{}.retry_policy.{}", node.name, error.field),
                        error.message,
                    );
                }
                for warning in policy_validation.warnings {
                    result.add_warning(format!("Node '{}': {}", node.name, warning));
                }
            }

            if node.timeout_seconds == Some(0) {
                result.add_error(
                    format!("nodes.{}.timeout_seconds", node.name),
                    "timeout_seconds must be at least 1".to_string(),
                );
            }
        }

        if let Some(defaults) = &workflow.defaults {
            if let Some(default_retry_policy) = &defaults.retry_policy {
                let policy_validation = Self::validate_retry_policy(default_retry_policy);
                for error in policy_validation.errors {
                    result.add_error(
                        format!("defaults.retry_policy.{}", error.field),
                        error.message,
                    );
                }
                for warning in policy_validation.warnings {
                    result.add_warning(format!("Default retry policy: {}", warning));
                }
            }
            if defaults.max_node_visits == Some(0) {
                result.add_error(
                    "defaults.max_node_visits".to_string(),
                    "max_node_visits must be at least 1".to_string(),
                );
            }
        }

        Self::check_field_availability(workflow, agents, &mut result);

        if let Some(start) = start_edges.first().map(|e| e.to.as_str()) {
            for node in Self::find_unreachable_nodes(workflow, start) {
                result.add_error(
                    format!("nodes.{}", node),
                    format!("Node '{}' is unreachable from start node '{}'", node, start),
                );
            }

            // Cycles are bounded at run time by the visit budget
            if let Some(cycle) = Self::detect_cycle(workflow, start) {
                result.add_warning(format!(
                    "Cycle detected: {} → {}; bounded by max_node_visits",
                    cycle.join(" → "),
                    cycle[0]
                ));
            }
        }

        result
    }

    /// Every field an agent or guard reads must be an input, an agent output or an awaited field
    fn check_field_availability(
        workflow: &WorkflowDefinition,
        agents: &AgentRegistry,
        result: &mut ValidationResult,
    ) {
        let mut available: HashSet<String> =
            workflow.inputs.iter().cloned().collect();
        available.extend(WELL_KNOWN_FIELDS.iter().map(|f| f.to_string()));
        for kind in [
            InputKind::VerificationCode,
            InputKind::Confirmation,
            InputKind::Other,
        ] {
            available.insert(kind.field_name().to_string());
        }
        for node in &workflow.nodes {
            match &node.kind {
                NodeKind::Agent { agent } => {
                    if let Some(agent) = agents.get(agent) {
                        available.extend(agent.writes().iter().map(|f| f.to_string()));
                    }
                }
                NodeKind::AwaitInput { field, .. } => {
                    available.insert(field.clone());
                }
                _ => {}
            }
        }

        for node in &workflow.nodes {
            if let NodeKind::Agent { agent } = &node.kind {
                if let Some(agent) = agents.get(agent) {
                    for field in agent.reads() {
                        if !available.contains(*field) {
                            result.add_error(
                                format!("nodes.{}", node.name),
                                format!(
                                    "Agent '{}' reads '{}', which is neither an input nor written by any node",
                                    agent.name(),
                                    field
                                ),
                            );
                        }
                    }
                }
            }
        }

        for edge in &workflow.edges {
            if let Some(field) = edge.when.field() {
                if !available.contains(field) {
                    result.add_error(
                        format!("edges.{}", edge.from),
                        format!(
                            "Guard on edge '{}' → '{}' reads '{}', which is never written",
                            edge.from, edge.to, field
                        ),
                    );
                }
            }
            if edge.when == EdgeCondition::NodeFailed && edge.from == START {
                result.add_error(
                    format!("edges.{}", START),
                    "node_failed guards are not allowed on the start edge".to_string(),
                );
            }
        }
    }

    fn targets<'a>(workflow: &'a WorkflowDefinition, node: &str) -> Vec<&'a str> {
        workflow
            .edges
            .iter()
            .filter(|e| e.from == node && e.to != END)
            .map(|e| e.to.as_str())
            .collect()
    }

    /// Detect a cycle using DFS
    fn detect_cycle(workflow: &WorkflowDefinition, start: &str) -> Option<Vec<String>> {
        fn dfs(
            node: &str,
            workflow: &WorkflowDefinition,
            visited: &mut HashSet<String>,
            rec_stack: &mut Vec<String>,
        ) -> Option<Vec<String>> {
            visited.insert(node.to_string());
            rec_stack.push(node.to_string());

            for target in WorkflowValidator::targets(workflow, node) {
                if let Some(pos) = rec_stack.iter().position(|n| n == target) {
                    return Some(rec_stack[pos..].to_vec());
                }
                if !visited.contains(target) {
                    if let Some(cycle) = dfs(target, workflow, visited, rec_stack) {
                        return Some(cycle);
                    }
                }
            }

            rec_stack.pop();
            None
        }

        dfs(start, workflow, &mut HashSet::new(), &mut Vec::new())
    }

    /// Find unreachable nodes using BFS
    fn find_unreachable_nodes(workflow: &WorkflowDefinition, start: &str) -> Vec<String> {
        let mut reachable = HashSet::new();
        let mut queue = VecDeque::new();

        queue.push_back(start.to_string());
        reachable.insert(start.to_string());

        while let Some(node) = queue.pop_front() {
            for target in Self::targets(workflow, &node) {
                if reachable.insert(target.to_string()) {
                    queue.push_back(target.to_string());
                }
            }
        }

        workflow
            .nodes
            .iter()
            .filter(|n| !reachable.contains(&n.name))
            .map(|n| n.name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_retry_policy_valid() {
        let result = WorkflowValidator::validate_retry_policy(&RetryPolicy::default());
        assert!(result.is_valid());
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_validate_retry_policy_max_attempts_bounds() {
        let too_low = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        let result = WorkflowValidator::validate_retry_policy(&too_low);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].message.contains("at least 1"));

        let too_high = RetryPolicy {
            max_attempts: 15,
            ..RetryPolicy::default()
        };
        let result = WorkflowValidator::validate_retry_policy(&too_high);
        assert!(result.errors[0].message.contains("cannot exceed 10"));
    }

    #[test]
    fn test_validate_retry_policy_delay_too_high() {
        let policy = RetryPolicy {
            initial_delay_ms: 600_000,
            max_delay_ms: 600_000,
            ..RetryPolicy::default()
        };
        let result = WorkflowValidator::validate_retry_policy(&policy);
        assert!(!result.is_valid());
        assert!(result.errors[0].message.contains("cannot exceed 300000"));
    }

    #[test]
    fn test_validate_retry_policy_multiplier_too_low() {
        let policy = RetryPolicy {
            backoff_multiplier: 0.5,
            ..RetryPolicy::default()
        };
        let result = WorkflowValidator::validate_retry_policy(&policy);
        assert!(result.errors[0].message.contains("at least 1.0"));
    }

    #[test]
    fn test_validate_retry_policy_high_multiplier_warning() {
        let policy = RetryPolicy {
            backoff_multiplier: 5.0,
            ..RetryPolicy::default()
        };
        let result = WorkflowValidator::validate_retry_policy(&policy);
        assert!(result.is_valid());
        assert!(result.warnings[0].contains("High backoff_multiplier"));
    }

    #[test]
    fn test_into_result_formats_violations() {
        let mut result = ValidationResult::new();
        result.add_error("nodes.a".to_string(), "broken".to_string());
        let error = result.into_result("wf").unwrap_err();
        assert_eq!(error.violations, vec!["nodes.a: broken".to_string()]);
    }
}

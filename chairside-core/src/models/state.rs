//! Shared workflow state threaded through every node of a run

use crate::models::automation::{FailureKind, InputKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field holding the last recoverable failure recorded by an agent
pub const ERROR_FIELD: &str = "error";
/// Field holding the marker placed when a node exhausts its retry budget
pub const NODE_FAILED_FIELD: &str = "node_failed";
/// Field describing the input a suspended run is waiting for
pub const PENDING_INPUT_FIELD: &str = "pending_input";

/// Fields the engine and agents may write on any workflow
pub const WELL_KNOWN_FIELDS: &[&str] = &[ERROR_FIELD, NODE_FAILED_FIELD, PENDING_INPUT_FIELD];

/// Named field values for one run
///
/// Only node functions mutate it, one node at a time. It is cloned into each
/// node attempt so a retried node always starts from the checkpointed value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowState(Map<String, Value>);

impl WorkflowState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build state from a JSON object; any other JSON value is rejected
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Builder-style setter
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    /// Field exists and is not null
    pub fn contains(&self, field: &str) -> bool {
        self.0.get(field).is_some_and(|v| !v.is_null())
    }

    /// Truthiness used by edge guards
    ///
    /// Booleans are themselves, strings are truthy unless empty or `"false"`,
    /// numbers unless zero, arrays and objects unless empty; missing and null
    /// fields are falsy.
    pub fn is_truthy(&self, field: &str) -> bool {
        match self.0.get(field) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => !s.is_empty() && !s.eq_ignore_ascii_case("false"),
            Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
            Some(Value::Array(items)) => !items.is_empty(),
            Some(Value::Object(map)) => !map.is_empty(),
        }
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// Merge caller-supplied fields; supplied keys overwrite, others are kept
    pub fn merge(&mut self, other: WorkflowState) {
        for (field, value) in other.0 {
            self.0.insert(field, value);
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Record a recoverable failure in the well-known error field
    pub fn record_error(&mut self, agent: &str, kind: FailureKind, reason: &str) {
        self.set(
            ERROR_FIELD,
            serde_json::json!({
                "agent": agent,
                "kind": kind,
                "reason": reason,
            }),
        );
    }

    pub fn clear_error(&mut self) {
        self.0.remove(ERROR_FIELD);
    }

    /// Reason of the recorded failure, if any
    pub fn error(&self) -> Option<String> {
        match self.0.get(ERROR_FIELD)? {
            Value::String(reason) => Some(reason.clone()),
            Value::Object(map) => map
                .get("reason")
                .and_then(Value::as_str)
                .map(str::to_string),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    pub fn mark_node_failed(&mut self, node: &str, reason: &str, attempts: u32) {
        let marker = NodeFailure {
            node: node.to_string(),
            reason: reason.to_string(),
            attempts,
        };
        if let Ok(value) = serde_json::to_value(marker) {
            self.set(NODE_FAILED_FIELD, value);
        }
    }

    pub fn node_failed(&self) -> Option<NodeFailure> {
        self.0
            .get(NODE_FAILED_FIELD)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Drop the NodeFailed marker if it names `node`
    pub fn clear_node_failed(&mut self, node: &str) {
        if self.node_failed().is_some_and(|marker| marker.node == node) {
            self.0.remove(NODE_FAILED_FIELD);
        }
    }

    pub fn set_pending_input(&mut self, pending: &PendingInput) {
        if let Ok(value) = serde_json::to_value(pending) {
            self.set(PENDING_INPUT_FIELD, value);
        }
    }

    pub fn pending_input(&self) -> Option<PendingInput> {
        self.0
            .get(PENDING_INPUT_FIELD)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn clear_pending_input(&mut self) {
        self.0.remove(PENDING_INPUT_FIELD);
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for WorkflowState {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut state = WorkflowState::new();
        for (field, value) in iter {
            state.set(field, value);
        }
        state
    }
}

/// Marker placed in state when a node exhausts its retry or visit budget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFailure {
    pub node: String,
    pub reason: String,
    pub attempts: u32,
}

/// What a suspended run needs from a human before it can continue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingInput {
    /// What the run is waiting on (a review step name or the input kind)
    pub awaiting: String,
    /// Field the caller supplies on resume
    pub field: String,
    /// Human-readable reason shown to the operator
    pub prompt: String,
    pub kind: InputKind,
    /// Node that requested the suspension
    pub requested_by: String,
}

impl PendingInput {
    /// Pending input for a backend prompt such as a one-time code request
    pub fn from_prompt(node: &str, kind: InputKind, prompt: impl Into<String>) -> Self {
        let field = kind.field_name().to_string();
        Self {
            awaiting: field.clone(),
            field,
            prompt: prompt.into(),
            kind,
            requested_by: node.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truthiness() {
        let state = WorkflowState::new()
            .with("yes", true)
            .with("no", false)
            .with("text", "Delta Dental")
            .with("false_text", "false")
            .with("empty", "")
            .with("zero", 0)
            .with("list", json!([1]))
            .with("nothing", Value::Null);

        assert!(state.is_truthy("yes"));
        assert!(!state.is_truthy("no"));
        assert!(state.is_truthy("text"));
        assert!(!state.is_truthy("false_text"));
        assert!(!state.is_truthy("empty"));
        assert!(!state.is_truthy("zero"));
        assert!(state.is_truthy("list"));
        assert!(!state.is_truthy("nothing"));
        assert!(!state.is_truthy("missing"));
        assert!(!state.contains("nothing"));
    }

    #[test]
    fn test_merge_overwrites_supplied_keys_only() {
        let mut state = WorkflowState::new()
            .with("portal", "MoHealthNet")
            .with("human_verified", false);
        state.merge(WorkflowState::new().with("human_verified", true));

        assert_eq!(state.get_str("portal"), Some("MoHealthNet"));
        assert!(state.is_truthy("human_verified"));
    }

    #[test]
    fn test_node_failed_marker_round_trip() {
        let mut state = WorkflowState::new();
        state.mark_node_failed("check_eligibility", "backend timeout", 3);

        let marker = state.node_failed().unwrap();
        assert_eq!(marker.node, "check_eligibility");
        assert_eq!(marker.attempts, 3);

        state.clear_node_failed("portal_login");
        assert!(state.node_failed().is_some());
        state.clear_node_failed("check_eligibility");
        assert!(state.node_failed().is_none());
    }

    #[test]
    fn test_error_reason_extraction() {
        let mut state = WorkflowState::new();
        state.record_error("portal_login", FailureKind::Rejected, "Invalid password");
        assert_eq!(state.error().as_deref(), Some("Invalid password"));

        state.clear_error();
        assert!(state.error().is_none());
    }

    #[test]
    fn test_from_value_rejects_non_objects() {
        assert!(WorkflowState::from_value(json!(["a"])).is_none());
        let state = WorkflowState::from_value(json!({"query": "x"})).unwrap();
        assert_eq!(state.get_str("query"), Some("x"));
    }
}

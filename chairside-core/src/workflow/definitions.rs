//! Built-in workflow definitions and definition file loading

use crate::agents::{EligibilityAgent, PortalLoginAgent, WebSearchAgent};
use crate::models::workflow::{
    DefaultConfiguration, EdgeCondition, EdgeDefinition, NodeDefinition, NodeKind,
    TerminalOutcome, WorkflowDefinition, END, START,
};
use crate::models::InputKind;
use anyhow::{bail, Context, Result};
use std::path::Path;

pub const SINGLE_PORTAL_LOGIN: &str = "single-portal-login";
pub const ELIGIBILITY_VERIFICATION: &str = "eligibility-verification";
pub const BASIC_SEARCH: &str = "basic-search";

/// Every workflow shipped with the crate
pub fn builtin_workflows() -> Vec<WorkflowDefinition> {
    vec![single_portal_login(), eligibility_verification(), basic_search()]
}

/// Log into one payer portal
pub fn single_portal_login() -> WorkflowDefinition {
    WorkflowDefinition {
        name: SINGLE_PORTAL_LOGIN.to_string(),
        description: Some("Log into a single payer portal".to_string()),
        inputs: vec!["portal".to_string()],
        nodes: vec![
            NodeDefinition::agent("portal_login", PortalLoginAgent::NAME)
                .describe("Log into the portal named in 'portal'"),
            NodeDefinition::terminal("logged_in", TerminalOutcome::Success),
            NodeDefinition::terminal("login_failed", TerminalOutcome::Failure),
        ],
        edges: vec![
            EdgeDefinition::new(START, "portal_login"),
            EdgeDefinition::new("portal_login", "logged_in")
                .when(EdgeCondition::Truthy("login_successful".to_string())),
            EdgeDefinition::new("portal_login", "login_failed"),
        ],
        defaults: None,
    }
}

/// Medicaid eligibility check with human review of primary insurance
pub fn eligibility_verification() -> WorkflowDefinition {
    WorkflowDefinition {
        name: ELIGIBILITY_VERIFICATION.to_string(),
        description: Some(
            "Verify Medicaid eligibility and route primary-insurance findings to a human"
                .to_string(),
        ),
        inputs: vec!["portal".to_string(), "patient_info".to_string()],
        nodes: vec![
            NodeDefinition::agent("portal_login", PortalLoginAgent::NAME),
            NodeDefinition::agent("check_eligibility", EligibilityAgent::NAME)
                .describe("Look up DCN, benefits and other coverage"),
            NodeDefinition::with_kind(
                "primary_insurance_verification",
                NodeKind::AwaitInput {
                    field: "human_verified".to_string(),
                    reason: "Primary insurance detected; confirm coverage order before billing Medicaid"
                        .to_string(),
                    input_kind: InputKind::Confirmation,
                },
            ),
            NodeDefinition::with_kind(
                "human_escalation",
                NodeKind::AwaitInput {
                    field: "escalation_resolved".to_string(),
                    reason: "Automated check could not finish; verify eligibility manually"
                        .to_string(),
                    input_kind: InputKind::Confirmation,
                },
            ),
            NodeDefinition::terminal("verification_failed", TerminalOutcome::Failure),
        ],
        edges: vec![
            EdgeDefinition::new(START, "portal_login"),
            EdgeDefinition::new("portal_login", "check_eligibility")
                .when(EdgeCondition::Truthy("login_successful".to_string())),
            EdgeDefinition::new("portal_login", "human_escalation")
                .when(EdgeCondition::NodeFailed),
            EdgeDefinition::new("portal_login", "verification_failed"),
            EdgeDefinition::new("check_eligibility", "human_escalation")
                .when(EdgeCondition::NodeFailed),
            EdgeDefinition::new("check_eligibility", "verification_failed")
                .when(EdgeCondition::Present("error".to_string())),
            EdgeDefinition::new("check_eligibility", "primary_insurance_verification")
                .when(EdgeCondition::Truthy("has_primary_insurance".to_string())),
            EdgeDefinition::new("check_eligibility", END),
            EdgeDefinition::new("primary_insurance_verification", END)
                .when(EdgeCondition::Truthy("human_verified".to_string())),
            EdgeDefinition::new("primary_insurance_verification", "verification_failed"),
            EdgeDefinition::new("human_escalation", END)
                .when(EdgeCondition::Truthy("escalation_resolved".to_string())),
            EdgeDefinition::new("human_escalation", "verification_failed"),
        ],
        defaults: Some(DefaultConfiguration {
            timeout_seconds: Some(600),
            retry_policy: None,
            max_node_visits: Some(5),
        }),
    }
}

/// Single web search
pub fn basic_search() -> WorkflowDefinition {
    WorkflowDefinition {
        name: BASIC_SEARCH.to_string(),
        description: Some("Run one web search and keep the results".to_string()),
        inputs: vec!["query".to_string()],
        nodes: vec![NodeDefinition::agent("search", WebSearchAgent::NAME)],
        edges: vec![
            EdgeDefinition::new(START, "search"),
            EdgeDefinition::new("search", END),
        ],
        defaults: None,
    }
}

/// Load a definition from a `.yaml`, `.yml` or `.json` file
pub fn load_definition(path: &Path) -> Result<WorkflowDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read workflow file {}", path.display()))?;

    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse workflow YAML {}", path.display())),
        Some("json") => serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse workflow JSON {}", path.display())),
        _ => bail!(
            "Unsupported workflow file extension: {} (expected .yaml, .yml or .json)",
            path.display()
        ),
    }
}

/// Load every definition file in a directory; a missing directory yields nothing
pub fn load_directory(dir: &Path) -> Result<Vec<WorkflowDefinition>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read workflow directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("yaml") | Some("yml") | Some("json")
            )
        })
        .collect();
    paths.sort();

    paths.iter().map(|path| load_definition(path)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_builtin_names_are_unique() {
        let names: Vec<_> = builtin_workflows().into_iter().map(|w| w.name).collect();
        assert_eq!(
            names,
            vec![SINGLE_PORTAL_LOGIN, ELIGIBILITY_VERIFICATION, BASIC_SEARCH]
        );
    }

    #[test]
    fn test_load_yaml_and_json() {
        let dir = tempdir().unwrap();
        let yaml = "name: recheck\ninputs: [portal]\nnodes:\n  - name: login\n    type: agent\n    agent: portal_login\n  - name: done\n    type: terminal\n    outcome: success\nedges:\n  - from: __start__\n    to: login\n  - from: login\n    to: done\n";
        std::fs::write(dir.path().join("recheck.yaml"), yaml).unwrap();
        let json = serde_json::to_string(&basic_search()).unwrap();
        std::fs::write(dir.path().join("search.json"), json).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let loaded = load_directory(dir.path()).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].name, "recheck");
        assert_eq!(loaded[1].name, BASIC_SEARCH);
    }

    #[test]
    fn test_unsupported_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("flow.toml");
        std::fs::write(&path, "name = 'x'").unwrap();
        assert!(load_definition(&path).is_err());
    }
}

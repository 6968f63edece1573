//! Medicaid eligibility check agent

use crate::agents::portal_login::{take_verification_code, PortalProfile};
use crate::agents::{settle, AgentContext, TaskAgent};
use crate::models::WorkflowState;
use crate::workflow::{NodeError, NodeOutput};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Values that mean "no primary insurance on file"
const NEGATIVE_VALUES: &[&str] = &["", "none", "no", "n/a", "na", "not found", "false"];

/// Looks up a patient's eligibility, benefits and other coverage in a payer portal
pub struct EligibilityAgent {
    context: AgentContext,
}

impl EligibilityAgent {
    pub const NAME: &'static str = "eligibility_check";

    pub fn new(context: AgentContext) -> Self {
        Self { context }
    }

    fn instruction(profile: &PortalProfile, patient: &Map<String, Value>) -> String {
        let field = |name: &str| {
            patient
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string()
        };

        format!(
            "{login}\n\
             6. Navigate to the 'Participant Eligibility' section.\n\
             7. Enter the patient's information:\n\
             - First Name: {first}\n\
             - Last Name: {last}\n\
             - Date of Birth: {dob}\n\
             8. Report each of the following on its own line as 'Label: value':\n\
             - DCN Number\n\
             - Benefits/Coverage Details\n\
             - Primary Insurance (write 'None' if there is none)",
            login = profile.login_steps(),
            first = field("first_name"),
            last = field("last_name"),
            dob = field("dob"),
        )
    }
}

/// Parse `Label: value` lines into a map keyed by snake_case label
pub fn parse_eligibility(payload: &str) -> Map<String, Value> {
    let mut data = Map::new();
    for line in payload.lines() {
        let line = line.trim().trim_start_matches(['-', '*']).trim();
        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let key: String = label
            .trim()
            .to_lowercase()
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("_");
        if key.is_empty() || value.starts_with("//") {
            continue;
        }
        data.insert(key, Value::String(value.trim().to_string()));
    }
    data
}

/// Whether parsed eligibility data names a primary insurer
pub fn has_primary_insurance(data: &Map<String, Value>) -> bool {
    data.iter().any(|(key, value)| {
        key.contains("primary_insurance")
            && value.as_str().is_some_and(|v| {
                !NEGATIVE_VALUES.contains(&v.trim().to_lowercase().as_str())
            })
    })
}

#[async_trait]
impl TaskAgent for EligibilityAgent {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn capabilities(&self) -> &str {
        "Verifies Medicaid eligibility and detects primary insurance for a patient"
    }

    fn reads(&self) -> &[&'static str] {
        &["portal", "patient_info"]
    }

    fn writes(&self) -> &[&'static str] {
        &["eligibility_data", "has_primary_insurance", "portal_response"]
    }

    async fn execute(&self, mut state: WorkflowState) -> Result<NodeOutput, NodeError> {
        let portal = state
            .get_str("portal")
            .map(str::to_string)
            .ok_or_else(|| NodeError::Fatal("state field 'portal' is missing".to_string()))?;
        let patient = match state.get("patient_info") {
            Some(Value::Object(patient)) => patient.clone(),
            _ => {
                return Err(NodeError::Fatal(
                    "state field 'patient_info' must be an object".to_string(),
                ))
            }
        };

        let profile = PortalProfile::resolve(&portal);
        let mut instruction = Self::instruction(&profile, &patient);
        take_verification_code(&mut state, &mut instruction);

        tracing::info!(agent = Self::NAME, portal = %portal, "Checking patient eligibility");
        let result = self
            .context
            .dispatch(Self::NAME, Some(&profile.system), &instruction)
            .await;

        settle(Self::NAME, state, result, |state, payload| {
            if let Some(payload) = payload {
                let data = parse_eligibility(payload);
                state.set("has_primary_insurance", has_primary_insurance(&data));
                state.set("eligibility_data", Value::Object(data));
                state.set("portal_response", payload);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_eligibility_lines() {
        let data = parse_eligibility(
            "Logged in at https://www.emomed.com/portal\n\
             - DCN Number: 123456789\n\
             - Benefits/Coverage Details: Full Medicaid, dental included\n\
             - Primary Insurance: Delta Dental PPO\n",
        );

        assert_eq!(data["dcn_number"], json!("123456789"));
        assert_eq!(
            data["benefits_coverage_details"],
            json!("Full Medicaid, dental included")
        );
        assert!(has_primary_insurance(&data));
    }

    #[test]
    fn test_no_primary_insurance() {
        let data = parse_eligibility("DCN Number: 1\nPrimary Insurance: None\n");
        assert!(!has_primary_insurance(&data));
        assert!(!has_primary_insurance(&Map::new()));
    }

    #[test]
    fn test_instruction_uses_patient_fields() {
        let patient = json!({"first_name": "Ada", "last_name": "Lovelace", "dob": "1990-12-10"});
        let instruction = EligibilityAgent::instruction(
            &PortalProfile::resolve("MoHealthNet"),
            patient.as_object().unwrap(),
        );
        assert!(instruction.contains("First Name: Ada"));
        assert!(instruction.contains("Date of Birth: 1990-12-10"));
    }
}

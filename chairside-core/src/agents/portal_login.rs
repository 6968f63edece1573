//! Portal login agent

use crate::agents::{settle, AgentContext, TaskAgent};
use crate::credentials::normalize_system;
use crate::models::{InputKind, WorkflowState};
use crate::workflow::{NodeError, NodeOutput};
use async_trait::async_trait;
use serde_json::Value;

/// Known payer portal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalProfile {
    /// Credential system name
    pub system: String,
    /// Landing page once logged in
    pub home_url: String,
}

impl PortalProfile {
    /// Profile for a portal name as found in workflow state
    pub fn resolve(portal: &str) -> Self {
        let system = normalize_system(portal);
        let home_url = match system.as_str() {
            "mohealthnet" | "emomed" => "https://www.emomed.com/portal/wps/myportal".to_string(),
            _ => format!("the {} provider portal", portal.trim()),
        };
        let system = if system == "emomed" {
            "mohealthnet".to_string()
        } else {
            system
        };
        Self { system, home_url }
    }

    /// Login steps shared by every portal agent; never carries secret values
    pub fn login_steps(&self) -> String {
        format!(
            "1. Navigate to {home}\n\
             2. Check whether you need to log in: if the URL contains 'login', you are not logged in.\n\
             3. If you are not logged in, use the enter secrets tool with credential set '{system}'.\n\
             4. If login fails, stop and report the error message prefixed with 'Error:'.\n\
             5. Verify the login by confirming you reached {home}.",
            home = self.home_url,
            system = self.system,
        )
    }
}

/// Append a supplied one-time code to the instruction and drop it from state
///
/// Codes arrive as strings or, when typed on the command line, as JSON numbers.
/// A field holding anything else is left in state untouched.
pub(crate) fn take_verification_code(state: &mut WorkflowState, instruction: &mut String) {
    let field = InputKind::VerificationCode.field_name();
    let code = match state.get(field) {
        Some(Value::String(code)) => code.trim().to_string(),
        Some(Value::Number(code)) => code.to_string(),
        _ => return,
    };
    if code.is_empty() {
        return;
    }

    instruction.push_str(&format!(
        "\nIf the portal asks for a verification code, enter {}.",
        code
    ));
    state.remove(field);
}

/// Logs into a payer portal and reports whether the session is usable
pub struct PortalLoginAgent {
    context: AgentContext,
}

impl PortalLoginAgent {
    pub const NAME: &'static str = "portal_login";

    pub fn new(context: AgentContext) -> Self {
        Self { context }
    }
}

#[async_trait]
impl TaskAgent for PortalLoginAgent {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn capabilities(&self) -> &str {
        "Logs into a payer portal such as MoHealthNet (eMOMED) with stored credentials"
    }

    fn reads(&self) -> &[&'static str] {
        &["portal"]
    }

    fn writes(&self) -> &[&'static str] {
        &["login_successful", "portal_response"]
    }

    async fn execute(&self, mut state: WorkflowState) -> Result<NodeOutput, NodeError> {
        let portal = state
            .get_str("portal")
            .map(str::to_string)
            .ok_or_else(|| NodeError::Fatal("state field 'portal' is missing".to_string()))?;
        let profile = PortalProfile::resolve(&portal);

        let mut instruction = profile.login_steps();
        take_verification_code(&mut state, &mut instruction);

        tracing::info!(agent = Self::NAME, portal = %portal, "Logging into portal");
        let result = self
            .context
            .dispatch(Self::NAME, Some(&profile.system), &instruction)
            .await;

        settle(Self::NAME, state, result, |state, payload| {
            state.set("login_successful", payload.is_some());
            if let Some(payload) = payload {
                state.set("portal_response", payload);
            }
        })
    }
}

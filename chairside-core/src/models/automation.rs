//! Automation backend result types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classified outcome of one automation backend call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AutomationResult {
    /// Task finished; payload is the collected backend output
    Success { payload: String },
    /// Task failed or never reached the backend
    Failure { reason: String, kind: FailureKind },
    /// Backend is blocked on something only a human can supply
    NeedsInput { prompt: String, kind: InputKind },
}

impl AutomationResult {
    pub fn success(payload: impl Into<String>) -> Self {
        Self::Success {
            payload: payload.into(),
        }
    }

    pub fn failure(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self::Failure {
            reason: reason.into(),
            kind,
        }
    }

    pub fn needs_input(kind: InputKind, prompt: impl Into<String>) -> Self {
        Self::NeedsInput {
            prompt: prompt.into(),
            kind,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Reason code attached to a failed automation call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Backend ran the task and reported an error
    Rejected,
    /// Backend could not be reached or answered with a server error
    BackendUnavailable,
    /// Backend did not answer within the configured timeout
    BackendTimeout,
    /// Credential lookup failed; the backend was never called
    CredentialUnavailable,
    /// Instruction text contained a secret value and was not sent
    UnsafeInstruction,
}

impl FailureKind {
    /// Transient failures are retried by the node retry policy
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::BackendUnavailable | Self::BackendTimeout)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rejected => "rejected",
            Self::BackendUnavailable => "backend_unavailable",
            Self::BackendTimeout => "backend_timeout",
            Self::CredentialUnavailable => "credential_unavailable",
            Self::UnsafeInstruction => "unsafe_instruction",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of input a suspended run is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InputKind {
    /// One-time code sent to the practice (SMS, email, authenticator)
    VerificationCode,
    /// Yes/no confirmation from an operator
    Confirmation,
    #[default]
    Other,
}

impl InputKind {
    /// State field the caller supplies when resuming
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::VerificationCode => "verification_code",
            Self::Confirmation => "confirmation",
            Self::Other => "additional_input",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_failure_kinds() {
        assert!(FailureKind::BackendUnavailable.is_transient());
        assert!(FailureKind::BackendTimeout.is_transient());
        assert!(!FailureKind::Rejected.is_transient());
        assert!(!FailureKind::CredentialUnavailable.is_transient());
        assert!(!FailureKind::UnsafeInstruction.is_transient());
    }

    #[test]
    fn test_automation_result_serialization() {
        let result = AutomationResult::needs_input(InputKind::VerificationCode, "Enter code");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["result"], "needs_input");
        assert_eq!(json["kind"], "verification_code");
    }
}

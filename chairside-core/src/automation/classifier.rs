//! Textual classification of backend output

use crate::models::{AutomationResult, FailureKind, InputKind};

/// One classification predicate
///
/// Rules are consulted in order; the first rule returning `Some` decides the
/// result. Output no rule claims is a success.
pub trait ClassificationRule: Send + Sync {
    fn classify(&self, output: &str) -> Option<AutomationResult>;
}

/// What a [`MarkerRule`] produces when one of its markers matches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerOutcome {
    /// The whole output is a success payload
    Accepted,
    Failure(FailureKind),
    NeedsInput(InputKind),
}

/// Case-insensitive substring match against a list of markers
#[derive(Debug, Clone)]
pub struct MarkerRule {
    markers: Vec<String>,
    outcome: MarkerOutcome,
    last_line_only: bool,
}

impl MarkerRule {
    pub fn new<I, S>(markers: I, outcome: MarkerOutcome) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            markers: markers
                .into_iter()
                .map(|m| m.into().to_lowercase())
                .collect(),
            outcome,
            last_line_only: false,
        }
    }

    /// Only match the last non-empty line, where a backend leaves an open question
    pub fn on_last_line(mut self) -> Self {
        self.last_line_only = true;
        self
    }

    fn matches(&self, line: &str) -> bool {
        let lower = line.to_lowercase();
        self.markers.iter().any(|m| lower.contains(m.as_str()))
    }

    /// The line that carried the marker, used as reason or prompt
    fn matching_line<'a>(&self, output: &'a str) -> Option<&'a str> {
        if self.last_line_only {
            return output
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .filter(|line| self.matches(line));
        }
        output.lines().find(|line| self.matches(line))
    }
}

impl ClassificationRule for MarkerRule {
    fn classify(&self, output: &str) -> Option<AutomationResult> {
        let line = self.matching_line(output)?.trim();
        Some(match self.outcome {
            MarkerOutcome::Accepted => AutomationResult::success(output.trim()),
            MarkerOutcome::Failure(kind) => AutomationResult::failure(kind, line),
            MarkerOutcome::NeedsInput(kind) => AutomationResult::needs_input(kind, line),
        })
    }
}

/// Ordered rule set turning raw backend text into an [`AutomationResult`]
pub struct ResultClassifier {
    rules: Vec<Box<dyn ClassificationRule>>,
}

impl Default for ResultClassifier {
    fn default() -> Self {
        Self::new()
            .with_rule(MarkerRule::new(
                ["error:", "login failed", "task failed", "unable to complete"],
                MarkerOutcome::Failure(FailureKind::Rejected),
            ))
            .with_rule(MarkerRule::new(
                [
                    "code accepted",
                    "code verified",
                    "verification successful",
                    "verification succeeded",
                    "verified successfully",
                ],
                MarkerOutcome::Accepted,
            ))
            .with_rule(
                MarkerRule::new(
                    [
                        "verification code",
                        "one-time code",
                        "one time passcode",
                        "enter the code",
                    ],
                    MarkerOutcome::NeedsInput(InputKind::VerificationCode),
                )
                .on_last_line(),
            )
            .with_rule(
                MarkerRule::new(
                    ["please confirm", "awaiting confirmation", "confirm to continue"],
                    MarkerOutcome::NeedsInput(InputKind::Confirmation),
                )
                .on_last_line(),
            )
    }
}

impl ResultClassifier {
    /// Classifier with no rules; everything non-empty is a success
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_rule(mut self, rule: impl ClassificationRule + 'static) -> Self {
        self.rules.push(Box::new(rule));
        self
    }

    pub fn classify(&self, output: &str) -> AutomationResult {
        let output = output.trim();
        if output.is_empty() {
            return AutomationResult::failure(
                FailureKind::Rejected,
                "automation backend returned no output",
            );
        }

        self.rules
            .iter()
            .find_map(|rule| rule.classify(output))
            .unwrap_or_else(|| AutomationResult::success(output))
    }
}

//! HTTP client for the automation backend

use crate::automation::classifier::ResultClassifier;
use crate::credentials::CredentialBundle;
use crate::models::{AutomationResult, BackendConfig, FailureKind};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Outbound boundary to the browser-automation service
///
/// Implementations never fail: unreachable or slow backends come back as
/// [`AutomationResult::Failure`] with a transient [`FailureKind`].
#[async_trait]
pub trait AutomationBackend: Send + Sync {
    async fn invoke(
        &self,
        instruction: &str,
        credentials: Option<&CredentialBundle>,
    ) -> AutomationResult;
}

#[derive(Serialize)]
struct ExecuteTaskPayload<'a> {
    command: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    secrets: Option<SecretsPayload<'a>>,
}

/// Out-of-band credential channel; never part of `command`
#[derive(Serialize)]
struct SecretsPayload<'a> {
    handle: String,
    values: BTreeMap<&'a str, &'a str>,
}

/// `POST {base_url}/execute_task` client with streamed response collection
pub struct HttpAutomationClient {
    base_url: String,
    client: Client,
    timeout: Duration,
    classifier: ResultClassifier,
}

impl HttpAutomationClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let base = base_url.into();
        Self {
            base_url: base.trim_end_matches('/').to_string(),
            client: Client::new(),
            timeout,
            classifier: ResultClassifier::default(),
        }
    }

    pub fn from_config(config: &BackendConfig) -> Self {
        Self::new(
            config.base_url.clone(),
            Duration::from_secs(config.timeout_seconds),
        )
    }

    pub fn with_classifier(mut self, classifier: ResultClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self) -> String {
        format!("{}/execute_task", self.base_url)
    }

    /// Send the task and collect non-empty response lines
    async fn execute(
        &self,
        instruction: &str,
        credentials: Option<&CredentialBundle>,
    ) -> Result<String, AutomationResult> {
        let payload = ExecuteTaskPayload {
            command: instruction,
            secrets: credentials.map(|bundle| SecretsPayload {
                handle: bundle.handle().to_string(),
                values: bundle.exposed_fields(),
            }),
        };

        let mut response = self
            .client
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                AutomationResult::failure(
                    FailureKind::BackendUnavailable,
                    format!("automation backend unreachable: {}", e.without_url()),
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::status_failure(status, body.trim()));
        }

        let mut collected = String::new();
        let mut pending = Vec::new();
        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => pending.extend_from_slice(&chunk),
                Ok(None) => break,
                Err(e) => {
                    return Err(AutomationResult::failure(
                        FailureKind::BackendUnavailable,
                        format!("automation backend stream interrupted: {}", e.without_url()),
                    ))
                }
            }
            while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = pending.drain(..=pos).collect();
                push_line(&mut collected, &line);
            }
        }
        push_line(&mut collected, &pending);

        Ok(collected)
    }

    fn status_failure(status: StatusCode, body: &str) -> AutomationResult {
        let reason = if body.is_empty() {
            format!("automation backend returned {}", status)
        } else {
            format!("automation backend returned {}: {}", status, body)
        };

        if status == StatusCode::REQUEST_TIMEOUT || status == StatusCode::GATEWAY_TIMEOUT {
            AutomationResult::failure(FailureKind::BackendTimeout, reason)
        } else if status.is_server_error() {
            AutomationResult::failure(FailureKind::BackendUnavailable, reason)
        } else {
            AutomationResult::failure(FailureKind::Rejected, reason)
        }
    }
}

fn push_line(collected: &mut String, raw: &[u8]) {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim_end_matches(['\r', '\n']);
    if !line.trim().is_empty() {
        collected.push_str(line);
        collected.push('\n');
    }
}

#[async_trait]
impl AutomationBackend for HttpAutomationClient {
    async fn invoke(
        &self,
        instruction: &str,
        credentials: Option<&CredentialBundle>,
    ) -> AutomationResult {
        tracing::debug!(
            endpoint = %self.endpoint(),
            credential = credentials.map(|c| c.handle().to_string()).unwrap_or_default(),
            "Invoking automation backend"
        );

        match tokio::time::timeout(self.timeout, self.execute(instruction, credentials)).await {
            Ok(Ok(output)) => self.classifier.classify(&output),
            Ok(Err(failure)) => failure,
            Err(_) => AutomationResult::failure(
                FailureKind::BackendTimeout,
                format!(
                    "automation backend did not answer within {}s",
                    self.timeout.as_secs_f64()
                ),
            ),
        }
    }
}

//! Environment-backed credential provider

use crate::services::logging::log_credential_access;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use thiserror::Error;

/// Errors that can occur while resolving credentials
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Unknown credential system '{0}'")]
    UnknownSystem(String),

    #[error("Missing credential '{field}' for system '{system}'")]
    MissingCredential { system: String, field: String },
}

/// Opaque reference standing in for a bundle in logs and backend requests
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CredentialHandle(String);

impl CredentialHandle {
    pub fn for_system(system: &str) -> Self {
        Self(format!("credential:{}", system))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CredentialHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Secret fields for one external system
///
/// Scoped to a single automation call; drop it as soon as the call returns.
pub struct CredentialBundle {
    system: String,
    fields: BTreeMap<String, SecretString>,
}

impl CredentialBundle {
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields
            .insert(name.into(), SecretString::new(value.into()));
        self
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn handle(&self) -> CredentialHandle {
        CredentialHandle::for_system(&self.system)
    }

    pub fn field(&self, name: &str) -> Option<&SecretString> {
        self.fields.get(name)
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Whether any secret value occurs verbatim in `text`
    pub fn appears_in(&self, text: &str) -> bool {
        self.fields.values().any(|secret| {
            let value = secret.expose_secret();
            !value.is_empty() && text.contains(value.as_str())
        })
    }

    /// Field name to value pairs for the backend side channel
    pub(crate) fn exposed_fields(&self) -> BTreeMap<&str, &str> {
        self.fields
            .iter()
            .map(|(name, secret)| (name.as_str(), secret.expose_secret().as_str()))
            .collect()
    }
}

impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("system", &self.system)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Resolves a named external system to its secret bundle
pub trait CredentialProvider: Send + Sync {
    /// Look up credentials for `system`; read-only and uncached
    fn get(&self, system: &str) -> Result<CredentialBundle, CredentialError>;

    /// Registered system names
    fn systems(&self) -> Vec<String>;
}

/// Read-only key/value source backing the provider
pub trait SecretSource: Send + Sync {
    fn lookup(&self, key: &str) -> Option<String>;
}

/// Process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl SecretSource for ProcessEnv {
    fn lookup(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl SecretSource for HashMap<String, String> {
    fn lookup(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Registration of one external system
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSpec {
    /// System name agents ask for (case-insensitive)
    pub system: String,
    /// Variable prefix; defaults to the upper-cased system name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env_prefix: Option<String>,
    /// Secret field names, each read from `<PREFIX>_<FIELD>`
    #[serde(default = "default_fields")]
    pub fields: Vec<String>,
}

fn default_fields() -> Vec<String> {
    vec!["username".to_string(), "password".to_string()]
}

impl CredentialSpec {
    /// Username/password system
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            env_prefix: None,
            fields: default_fields(),
        }
    }

    /// Token-based system
    pub fn token(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            env_prefix: None,
            fields: vec!["token".to_string()],
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    fn variable(&self, field: &str) -> String {
        let prefix = self
            .env_prefix
            .clone()
            .unwrap_or_else(|| normalize_system(&self.system).to_uppercase());
        format!("{}_{}", prefix, field.to_uppercase())
    }
}

/// Canonical system key: lower-case ASCII alphanumerics and underscores
pub fn normalize_system(name: &str) -> String {
    name.trim()
        .chars()
        .filter_map(|c| {
            if c.is_ascii_alphanumeric() {
                Some(c.to_ascii_lowercase())
            } else if c == '_' || c == '-' || c == ' ' {
                Some('_')
            } else {
                None
            }
        })
        .collect()
}

/// Credential provider reading `<PREFIX>_<FIELD>` keys from a secret source
pub struct EnvCredentialProvider<S = ProcessEnv> {
    specs: HashMap<String, CredentialSpec>,
    source: S,
}

impl EnvCredentialProvider<ProcessEnv> {
    /// Provider over the process environment
    pub fn from_env(specs: impl IntoIterator<Item = CredentialSpec>) -> Self {
        Self::with_source(ProcessEnv, specs)
    }
}

impl<S: SecretSource> EnvCredentialProvider<S> {
    pub fn with_source(source: S, specs: impl IntoIterator<Item = CredentialSpec>) -> Self {
        let specs = specs
            .into_iter()
            .map(|spec| (normalize_system(&spec.system), spec))
            .collect();
        Self { specs, source }
    }

    pub fn register(&mut self, spec: CredentialSpec) {
        self.specs.insert(normalize_system(&spec.system), spec);
    }
}

impl<S: SecretSource> CredentialProvider for EnvCredentialProvider<S> {
    fn get(&self, system: &str) -> Result<CredentialBundle, CredentialError> {
        let key = normalize_system(system);
        let spec = self
            .specs
            .get(&key)
            .ok_or_else(|| CredentialError::UnknownSystem(system.to_string()))?;

        let mut bundle = CredentialBundle::new(key.clone());
        for field in &spec.fields {
            match self.source.lookup(&spec.variable(field)) {
                Some(value) if !value.trim().is_empty() => {
                    bundle = bundle.with_field(field.clone(), value);
                }
                _ => {
                    log_credential_access(&key, "missing");
                    return Err(CredentialError::MissingCredential {
                        system: key,
                        field: field.clone(),
                    });
                }
            }
        }

        log_credential_access(&key, "resolved");
        Ok(bundle)
    }

    fn systems(&self) -> Vec<String> {
        let mut systems: Vec<String> = self.specs.keys().cloned().collect();
        systems.sort();
        systems
    }
}

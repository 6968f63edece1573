//! Credential resolution for external systems
//!
//! Secrets are resolved per call, held in [`CredentialBundle`] for the
//! duration of one automation call and then dropped. Values are never logged,
//! serialized or written into workflow state.

pub mod provider;

pub use provider::*;

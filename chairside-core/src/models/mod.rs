//! Data models for chairside

pub mod automation;
pub mod configuration;
pub mod state;
pub mod workflow;

pub use automation::*;
pub use configuration::*;
pub use state::*;
pub use workflow::*;

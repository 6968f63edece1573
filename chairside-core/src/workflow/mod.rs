//! Workflow orchestration module

pub mod definitions;
pub mod directive;
pub mod engine;
pub mod error;
pub mod graph;
pub mod orchestrator;
pub mod persistence;
pub mod validator;

pub use definitions::*;
pub use directive::*;
pub use engine::*;
pub use error::*;
pub use graph::*;
pub use orchestrator::*;
pub use persistence::*;
pub use validator::*;

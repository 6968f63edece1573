//! # Chairside Core Library
//!
//! Workflow orchestration for practice-administration tasks driven through an
//! external browser-automation service: the graph engine with checkpointing and
//! suspend/resume, the task agents it sequences, and the credential boundary
//! that keeps secrets out of instruction text.

pub mod agents;
pub mod automation;
pub mod credentials;
pub mod models;
pub mod services;
pub mod workflow;

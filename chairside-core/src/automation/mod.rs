//! Client for the external browser-automation service
//!
//! The backend takes one natural-language instruction plus an optional
//! credential side channel and answers with streamed text. The text is turned
//! into an [`AutomationResult`](crate::models::AutomationResult) by a
//! [`ResultClassifier`].

pub mod classifier;
pub mod client;

pub use classifier::*;
pub use client::*;

//! AI completion client, prompt templating, and cost accounting.

pub mod client;
pub mod cost;
pub mod prompts;

pub use client::{AiClient, Completion};
pub use cost::{AiOperation, CostTable, CostTracker, Usage};

//! Engine module - Job execution lifecycle
//!
//! The engine module does NOT:
//! - Validate submissions or clamp requested limits
//! - Write audit records

pub mod orchestrator;

pub use orchestrator::Orchestrator;

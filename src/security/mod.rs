//! Security module - Policy layers around execution
//!
//! This module handles:
//! - Syntactic input validation (`validator`)
//! - Clamping requested limits into a policy (`policy`)
//! - Append-only audit records (`audit`)
//! - Child resource accounting (`monitor`)
//! - Composing all of the above around the orchestrator (`middleware`)
//!
//! The security module does NOT:
//! - Spawn processes or manage workspaces
//! - Provide OS-level isolation

pub mod audit;
pub mod middleware;
pub mod monitor;
pub mod policy;
pub mod validator;

pub use audit::{AuditSink, JsonlAuditSink, MemoryAuditSink};
pub use middleware::{PipelineMode, SecureMiddleware};
pub use policy::{Policy, PolicyEnforcer, PolicyLimits};
pub use validator::{InputValidator, ValidatorConfig, Verdict};

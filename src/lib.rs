//! Polyglot code execution
//!
//! Runs submitted source code in one of the registered languages inside a
//! per-job workspace, bounded by a wall-clock timeout, behind a pipeline of
//! input validation, policy clamping, audit logging and resource accounting.

pub mod app;
pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod history;
pub mod jobs;
pub mod languages;
pub mod redis_manager;
pub mod runner;
pub mod sandbox;
pub mod security;
pub mod smoke;

pub use app::Executor;
pub use config::Config;
pub use crate::core::{ExecutionRequest, ExecutionResult, Mode};
pub use error::ExecError;

//! Error kinds of the execution pipeline
//!
//! Every kind maps to a fixed exit-code sentinel and result mode, so a failure
//! anywhere in the pipeline still turns into a well-formed `ExecutionResult`.

use std::time::Duration;

use thiserror::Error;

use crate::core::Mode;

/// Exit code reported when a request is blocked or names an unknown language
pub const EXIT_REJECTED: i32 = 2;
/// Exit code reported when a required toolchain binary is missing
pub const EXIT_TOOL_MISSING: i32 = 127;
/// Exit code reported when the wall-clock timeout fired
pub const EXIT_TIMEOUT: i32 = 124;
/// Exit code reported for internal faults
pub const EXIT_FAULT: i32 = 1;

#[derive(Error, Debug)]
pub enum ExecError {
    /// The language id (after alias resolution) is not registered.
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    /// The input validator rejected the submission.
    #[error("blocked by policy: {0}")]
    Blocked(String),

    /// One or more tools the language needs are not on PATH.
    #[error("{} not installed", .0.join("/"))]
    ToolNotInstalled(Vec<String>),

    /// The process group was killed after the deadline.
    #[error("execution timed out after {0:?}")]
    TimeoutExceeded(Duration),

    /// Workspace, spawn or I/O failure.
    #[error("execution fault: {0:#}")]
    Fault(#[from] anyhow::Error),
}

impl ExecError {
    /// Exit-code sentinel for this error kind
    pub fn exit_code(&self) -> i32 {
        match self {
            ExecError::UnsupportedLanguage(_) | ExecError::Blocked(_) => EXIT_REJECTED,
            ExecError::ToolNotInstalled(_) => EXIT_TOOL_MISSING,
            ExecError::TimeoutExceeded(_) => EXIT_TIMEOUT,
            ExecError::Fault(_) => EXIT_FAULT,
        }
    }

    pub fn mode(&self) -> Mode {
        match self {
            ExecError::UnsupportedLanguage(_) => Mode::UnsupportedLanguage,
            ExecError::Blocked(_) => Mode::Blocked,
            ExecError::ToolNotInstalled(_) => Mode::ToolMissing,
            ExecError::TimeoutExceeded(_) => Mode::Timeout,
            ExecError::Fault(_) => Mode::Fault,
        }
    }
}

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ExecError;

/// How an execution ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    Blocked,
    UnsupportedLanguage,
    ToolMissing,
    Timeout,
    Executed,
    Fault,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::Blocked => "blocked",
            Mode::UnsupportedLanguage => "unsupported-language",
            Mode::ToolMissing => "tool-missing",
            Mode::Timeout => "timeout",
            Mode::Executed => "executed",
            Mode::Fault => "fault",
        };
        write!(f, "{}", s)
    }
}

fn default_timeout() -> i64 {
    10
}

fn default_memory_mb() -> i64 {
    256
}

fn default_blocks() -> usize {
    1
}

/// A single execution request as received from a caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub language: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
    /// Requested wall-clock timeout in seconds (clamped by policy)
    #[serde(default = "default_timeout")]
    pub timeout: i64,
    /// Requested memory in MB (clamped by policy)
    #[serde(default = "default_memory_mb")]
    pub memory_mb: i64,
    /// Number of fenced code blocks the submission was assembled from
    #[serde(default = "default_blocks")]
    pub blocks: usize,
}

impl ExecutionRequest {
    pub fn new(language: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            code: code.into(),
            stdin: None,
            timeout: default_timeout(),
            memory_mb: default_memory_mb(),
            blocks: default_blocks(),
        }
    }

    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    pub fn with_timeout(mut self, timeout: i64) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_memory_mb(mut self, memory_mb: i64) -> Self {
        self.memory_mb = memory_mb;
        self
    }

    pub fn with_blocks(mut self, blocks: usize) -> Self {
        self.blocks = blocks;
        self
    }
}

/// Result of one execution, always produced, whatever went wrong
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub ok: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub time_ms: u64,
    pub mode: Mode,
    pub language: String,
}

impl ExecutionResult {
    /// Result of a process that ran to completion
    pub fn executed(
        language: impl Into<String>,
        exit_code: i32,
        stdout: String,
        stderr: String,
        time_ms: u64,
    ) -> Self {
        Self {
            ok: exit_code == 0,
            exit_code,
            stdout,
            stderr,
            time_ms,
            mode: Mode::Executed,
            language: language.into(),
        }
    }

    /// Result for an error kind, with the error message as stderr
    pub fn from_error(err: &ExecError, language: impl Into<String>, time_ms: u64) -> Self {
        Self {
            ok: false,
            exit_code: err.exit_code(),
            stdout: String::new(),
            stderr: err.to_string(),
            time_ms,
            mode: err.mode(),
            language: language.into(),
        }
    }

    pub fn blocked(language: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::from_error(&ExecError::Blocked(reason.into()), language, 0)
    }

    /// Make `ok` agree with the mode and exit code
    pub fn normalized(mut self) -> Self {
        self.ok = self.mode == Mode::Executed && self.exit_code == 0;
        self
    }
}

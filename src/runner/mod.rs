//! Runner module - Execution backend abstraction
//!
//! This module provides a unified interface for running a synthesized shell
//! command inside a job workspace:
//! - `ProcessRunner`: spawns the command as a local process group with rlimits
//!
//! A real isolation layer (container, namespace, VM) plugs in by implementing
//! `Runner`.
//!
//! The runner module does NOT:
//! - Know about languages or source placement
//! - Decide exit-code sentinels or result modes
//! - Create or remove workspaces

pub mod process;

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command specification for execution
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Shell command line
    pub script: String,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
    /// Working directory
    pub work_dir: PathBuf,
}

impl CommandSpec {
    pub fn new(script: impl Into<String>, work_dir: impl AsRef<Path>) -> Self {
        Self {
            script: script.into(),
            env: Vec::new(),
            work_dir: work_dir.as_ref().to_path_buf(),
        }
    }

    pub fn with_env<K, V>(mut self, env: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.env = env.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        self
    }
}

/// Resource limits for execution
#[derive(Debug, Clone)]
pub struct RunLimits {
    /// Wall-clock limit
    pub timeout: Duration,
    /// Address space ceiling in bytes (RLIMIT_AS), if enforced
    pub memory_bytes: Option<u64>,
    /// Open file descriptor ceiling (RLIMIT_NOFILE), if enforced
    pub open_files: Option<u64>,
    /// Bytes kept per output stream; the rest is drained and dropped
    pub output_limit_bytes: usize,
}

impl RunLimits {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }

    pub fn with_memory_mb(mut self, memory_mb: Option<u64>) -> Self {
        self.memory_bytes = memory_mb.map(|mb| mb.saturating_mul(1024 * 1024));
        self
    }

    pub fn with_open_files(mut self, open_files: Option<u64>) -> Self {
        self.open_files = open_files;
        self
    }

    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output_limit_bytes = bytes;
        self
    }
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            memory_bytes: None,
            open_files: None,
            output_limit_bytes: 1024 * 1024,
        }
    }
}

/// Execution status (raw, no mode interpretation)
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    /// Program exited normally with given exit code
    Exited(i32),
    /// Killed by signal
    Signaled(i32),
    /// Wall-clock limit reached and the process group was killed
    TimedOut,
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Exited(0))
    }

    /// Shell-style exit code (`128 + signal` for signals)
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            RunStatus::Exited(code) => Some(*code),
            RunStatus::Signaled(signal) => Some(128 + signal),
            RunStatus::TimedOut => None,
        }
    }
}

/// Outcome of running a command
#[derive(Debug)]
pub struct RunOutcome {
    pub status: RunStatus,
    /// Wall-clock time from spawn to exit or kill
    pub elapsed: Duration,
    /// Captured stdout (partial on timeout)
    pub stdout: String,
    pub stderr: String,
    /// Set when either stream exceeded the output limit
    pub truncated: bool,
}

/// Runner trait for executing commands
#[async_trait]
pub trait Runner: Send + Sync {
    /// Run a command with the given limits and optional stdin
    async fn run(
        &self,
        cmd: &CommandSpec,
        limits: &RunLimits,
        stdin: Option<&str>,
    ) -> Result<RunOutcome>;
}

pub use process::ProcessRunner;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_mapping() {
        assert_eq!(RunStatus::Exited(3).exit_code(), Some(3));
        assert_eq!(RunStatus::Signaled(9).exit_code(), Some(137));
        assert_eq!(RunStatus::TimedOut.exit_code(), None);
        assert!(RunStatus::Exited(0).is_success());
        assert!(!RunStatus::Signaled(0).is_success());
    }

    #[test]
    fn test_limits_builder() {
        let limits = RunLimits::new(Duration::from_secs(2))
            .with_memory_mb(Some(64))
            .with_open_files(Some(128));
        assert_eq!(limits.memory_bytes, Some(64 * 1024 * 1024));
        assert_eq!(limits.open_files, Some(128));
        assert_eq!(limits.output_limit_bytes, 1024 * 1024);
    }
}

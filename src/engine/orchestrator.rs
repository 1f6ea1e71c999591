//! Execution orchestrator
//!
//! Drives one job from language id to result:
//! resolve → tool check → workspace → write source → synthesize command →
//! run (bounded by the effective timeout) → map outcome → remove workspace.
//!
//! Every failure is turned into an `ExecutionResult` with the matching
//! exit-code sentinel; nothing escapes `run`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::core::utils::missing_tools;
use crate::core::ExecutionResult;
use crate::error::ExecError;
use crate::languages::{LanguageRegistry, LanguageSpec};
use crate::runner::{CommandSpec, RunLimits, Runner};
use crate::sandbox::Workspace;
use crate::security::policy::Policy;

/// Limits one job runs under, before the language floor is applied
#[derive(Debug, Clone, Copy)]
struct JobLimits {
    timeout_secs: u64,
    memory_mb: u64,
    open_files: Option<u64>,
}

pub struct Orchestrator {
    registry: Arc<LanguageRegistry>,
    runner: Arc<dyn Runner>,
    workspace_root: PathBuf,
    output_limit_bytes: usize,
    rlimit_memory: bool,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<LanguageRegistry>,
        runner: Arc<dyn Runner>,
        workspace_root: impl AsRef<Path>,
    ) -> Self {
        Self {
            registry,
            runner,
            workspace_root: workspace_root.as_ref().to_path_buf(),
            output_limit_bytes: RunLimits::default().output_limit_bytes,
            rlimit_memory: false,
        }
    }

    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output_limit_bytes = bytes;
        self
    }

    /// Enforce the memory ceiling as an address-space rlimit
    pub fn with_memory_rlimit(mut self, enabled: bool) -> Self {
        self.rlimit_memory = enabled;
        self
    }

    pub fn registry(&self) -> &Arc<LanguageRegistry> {
        &self.registry
    }

    /// Run `code` as `language` with the given timeout (seconds) and memory (MB)
    pub async fn run(
        &self,
        language: &str,
        code: &str,
        stdin: Option<&str>,
        timeout_secs: u64,
        memory_mb: u64,
    ) -> ExecutionResult {
        let limits = JobLimits {
            timeout_secs,
            memory_mb,
            open_files: None,
        };
        self.execute(language, code, stdin, limits).await
    }

    /// Run `code` under a clamped policy
    pub async fn run_with_policy(
        &self,
        language: &str,
        code: &str,
        stdin: Option<&str>,
        policy: &Policy,
    ) -> ExecutionResult {
        let limits = JobLimits {
            timeout_secs: policy.timeout_secs,
            memory_mb: policy.memory_mb,
            open_files: Some(policy.max_open_files),
        };
        self.execute(language, code, stdin, limits).await
    }

    async fn execute(
        &self,
        language: &str,
        code: &str,
        stdin: Option<&str>,
        limits: JobLimits,
    ) -> ExecutionResult {
        let started = Instant::now();

        let result = match self.registry.resolve(language) {
            Some(spec) => self.try_execute(&spec, code, stdin, limits).await,
            None => Err(ExecError::UnsupportedLanguage(language.trim().to_lowercase())),
        };

        let result = result.unwrap_or_else(|err| {
            debug!(language, "Execution failed: {}", err);
            let label = match self.registry.canonical_id(language) {
                Some(id) => id.to_string(),
                None => language.trim().to_lowercase(),
            };
            ExecutionResult::from_error(&err, label, started.elapsed().as_millis() as u64)
        });

        info!(
            language = %result.language,
            exit_code = result.exit_code,
            mode = %result.mode,
            time_ms = result.time_ms,
            "Execution finished"
        );
        result
    }

    async fn try_execute(
        &self,
        spec: &LanguageSpec,
        code: &str,
        stdin: Option<&str>,
        limits: JobLimits,
    ) -> Result<ExecutionResult, ExecError> {
        let missing = missing_tools(&spec.tools);
        if !missing.is_empty() {
            return Err(ExecError::ToolNotInstalled(missing));
        }

        let timeout_secs = spec.effective_timeout(limits.timeout_secs);
        let workspace = Workspace::create(&self.workspace_root)?;
        debug!(language = %spec.id, workspace = %workspace.path().display(), timeout_secs, "Workspace ready");

        let result = self
            .run_in_workspace(&workspace, spec, code, stdin, timeout_secs, limits)
            .await;
        workspace.close();
        result
    }

    async fn run_in_workspace(
        &self,
        workspace: &Workspace,
        spec: &LanguageSpec,
        code: &str,
        stdin: Option<&str>,
        timeout_secs: u64,
        limits: JobLimits,
    ) -> Result<ExecutionResult, ExecError> {
        let work_dir = workspace.path();
        let source = spec.source_path(work_dir);
        workspace
            .write_source(&source, &spec.prepare_source(code), spec.executable)
            .await?;

        let cmd = CommandSpec::new(spec.command(&source, code, work_dir), work_dir)
            .with_env([("TMPDIR", work_dir.to_string_lossy().into_owned())]);
        let run_limits = RunLimits::new(Duration::from_secs(timeout_secs))
            .with_memory_mb(self.rlimit_memory.then_some(limits.memory_mb))
            .with_open_files(limits.open_files)
            .with_output_limit(self.output_limit_bytes);

        let outcome = self.runner.run(&cmd, &run_limits, stdin).await?;
        let time_ms = outcome.elapsed.as_millis() as u64;

        let mut stderr = outcome.stderr;
        if outcome.truncated {
            push_line(
                &mut stderr,
                &format!("output truncated at {} bytes", self.output_limit_bytes),
            );
        }

        let result = match outcome.status.exit_code() {
            Some(exit_code) => {
                ExecutionResult::executed(&spec.id, exit_code, outcome.stdout, stderr, time_ms)
            }
            None => {
                let err = ExecError::TimeoutExceeded(run_limits.timeout);
                push_line(&mut stderr, &err.to_string());
                ExecutionResult {
                    stdout: outcome.stdout,
                    stderr,
                    ..ExecutionResult::from_error(&err, &spec.id, time_ms)
                }
            }
        };
        Ok(result)
    }
}

fn push_line(buf: &mut String, line: &str) {
    if !buf.is_empty() && !buf.ends_with('\n') {
        buf.push('\n');
    }
    buf.push_str(line);
}

//! Executor facade
//!
//! Entry point used by the worker and the smoke runner: wires the registry,
//! runner, orchestrator and pipeline from `Config`, and keeps a bounded
//! history of submissions.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::Config;
use crate::core::{ExecutionRequest, ExecutionResult};
use crate::engine::Orchestrator;
use crate::history::{EventLog, HistoryEvent};
use crate::languages::LanguageRegistry;
use crate::runner::{ProcessRunner, Runner};
use crate::security::{
    InputValidator, JsonlAuditSink, PipelineMode, PolicyEnforcer, SecureMiddleware,
};

/// State reported for a job id; executions are synchronous, so there is
/// nothing to track once `submit` returns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    pub state: String,
    pub detail: String,
}

pub struct Executor {
    middleware: SecureMiddleware,
    history: EventLog,
}

impl Executor {
    pub fn new(middleware: SecureMiddleware, history_max_events: usize) -> Self {
        let history = EventLog::new(history_max_events);
        history.push("system", format!("pipeline={}", middleware.mode()));
        Self {
            middleware,
            history,
        }
    }

    /// Build the full stack from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        let registry = Arc::new(LanguageRegistry::load(config.languages_path.as_deref())?);
        let runner: Arc<dyn Runner> = Arc::new(match &config.shell {
            Some(shell) => ProcessRunner::with_shell(shell.as_str()),
            None => ProcessRunner::new(),
        });
        let orchestrator = Orchestrator::new(registry, runner, &config.workspace_root)
            .with_output_limit(config.output_limit_bytes)
            .with_memory_rlimit(config.rlimit_memory);

        let middleware = SecureMiddleware::new(
            Arc::new(orchestrator),
            InputValidator::new(config.validator.clone()),
            PolicyEnforcer::new(config.policy),
        )
        .with_mode(config.pipeline);
        let middleware = match config.pipeline {
            PipelineMode::Secure => {
                middleware.with_audit(Arc::new(JsonlAuditSink::open(&config.audit_path)?))
            }
            PipelineMode::Clamp => middleware.with_monitor(false),
        };

        info!(
            pipeline = %config.pipeline,
            workspace_root = %config.workspace_root.display(),
            "Executor ready"
        );
        Ok(Self::new(middleware, config.history_max_events))
    }

    /// Execute a request through the configured pipeline
    pub async fn submit(&self, request: &ExecutionRequest) -> ExecutionResult {
        let result = self.middleware.submit(request).await.normalized();
        self.history.push(
            "system",
            format!(
                "submit mode={} ok={} exit={} lang={}",
                result.mode, result.ok, result.exit_code, result.language
            ),
        );
        result
    }

    pub fn status(&self, job_id: &str) -> JobStatus {
        JobStatus {
            job_id: job_id.to_string(),
            state: "unsupported".into(),
            detail: "executions are synchronous; results are returned by submit".into(),
        }
    }

    pub fn history(&self) -> Vec<HistoryEvent> {
        self.history.snapshot()
    }

    /// Canonical ids of every registered language
    pub fn languages(&self) -> BTreeSet<String> {
        self.middleware.orchestrator().registry().available_languages()
    }

    pub fn pipeline(&self) -> PipelineMode {
        self.middleware.mode()
    }
}

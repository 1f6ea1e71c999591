//! Secure middleware
//!
//! The single execution pipeline wrapped around the orchestrator:
//! validate → (reject: audit REJECT, return blocked) → build policy →
//! audit START → usage snapshot → run → usage snapshot → audit END.
//!
//! `PipelineMode::Clamp` keeps only the whitelist check and the policy clamp.
//! The audit stage runs only when a sink is attached, the usage stage only
//! when monitoring is enabled.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::{ExecutionRequest, ExecutionResult};
use crate::engine::Orchestrator;
use crate::security::audit::{AuditSink, AuditTrail};
use crate::security::monitor::{self, UsageDelta};
use crate::security::policy::PolicyEnforcer;
use crate::security::validator::InputValidator;

/// Which stages run around the orchestrator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineMode {
    /// Validation, policy, audit and usage accounting
    #[default]
    Secure,
    /// Whitelist and policy clamp only
    Clamp,
}

impl fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipelineMode::Secure => "secure",
            PipelineMode::Clamp => "clamp",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for PipelineMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "secure" | "full" => Ok(PipelineMode::Secure),
            "clamp" | "guard" => Ok(PipelineMode::Clamp),
            other => anyhow::bail!("unknown pipeline mode: {}", other),
        }
    }
}

pub struct SecureMiddleware {
    orchestrator: Arc<Orchestrator>,
    validator: InputValidator,
    enforcer: PolicyEnforcer,
    audit: Option<Arc<dyn AuditSink>>,
    monitor: bool,
    mode: PipelineMode,
}

impl SecureMiddleware {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        validator: InputValidator,
        enforcer: PolicyEnforcer,
    ) -> Self {
        Self {
            orchestrator,
            validator,
            enforcer,
            audit: None,
            monitor: true,
            mode: PipelineMode::Secure,
        }
    }

    pub fn with_audit(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn with_monitor(mut self, enabled: bool) -> Self {
        self.monitor = enabled;
        self
    }

    pub fn with_mode(mut self, mode: PipelineMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> PipelineMode {
        self.mode
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Run a request through the pipeline. Always yields a result.
    pub async fn submit(&self, request: &ExecutionRequest) -> ExecutionResult {
        let language = self
            .orchestrator
            .registry()
            .canonical_id(&request.language)
            .map(str::to_string)
            .unwrap_or_else(|| request.language.trim().to_lowercase());

        match self.mode {
            PipelineMode::Secure => self.submit_secure(&language, request).await,
            PipelineMode::Clamp => self.submit_clamped(&language, request).await,
        }
    }

    async fn submit_secure(&self, language: &str, request: &ExecutionRequest) -> ExecutionResult {
        let trail = self
            .audit
            .as_ref()
            .map(|sink| AuditTrail::new(sink.clone(), language, &request.code));

        let verdict = self
            .validator
            .validate(language, &request.code, request.blocks);
        if !verdict.accepted {
            warn!(language, reason = %verdict.reason, "Submission blocked");
            if let Some(trail) = trail {
                trail.reject(&verdict.reason);
            }
            return ExecutionResult::blocked(language, verdict.reason);
        }

        let policy = self
            .enforcer
            .build_policy(request.timeout, request.memory_mb);
        let started = trail.map(|trail| trail.start(&policy));
        if let Some(started) = &started {
            info!(job_id = %started.job_id(), language, timeout_secs = policy.timeout_secs, "Job started");
        }

        let before = self.monitor.then(monitor::snapshot);
        let result = self
            .orchestrator
            .run_with_policy(language, &request.code, request.stdin.as_deref(), &policy)
            .await;
        let usage = before
            .map(|before| monitor::delta(&before, &monitor::snapshot()))
            .unwrap_or_default();

        if let Some(started) = started {
            started.end(&result, &usage);
        }
        log_usage(&usage);

        result
    }

    async fn submit_clamped(&self, language: &str, request: &ExecutionRequest) -> ExecutionResult {
        let verdict = self.validator.check_language(language);
        if !verdict.accepted {
            warn!(language, reason = %verdict.reason, "Submission blocked");
            return ExecutionResult::blocked(language, verdict.reason);
        }

        let policy = self
            .enforcer
            .build_policy(request.timeout, request.memory_mb);
        self.orchestrator
            .run_with_policy(language, &request.code, request.stdin.as_deref(), &policy)
            .await
    }
}

fn log_usage(usage: &UsageDelta) {
    tracing::debug!(
        user_time_secs = usage.user_time_secs,
        system_time_secs = usage.system_time_secs,
        max_rss_kb = usage.max_rss_kb,
        "Job resource usage"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Mode;
    use crate::languages::LanguageRegistry;
    use crate::runner::{CommandSpec, RunLimits, RunOutcome, RunStatus, Runner};
    use crate::security::audit::{AuditRecord, MemoryAuditSink};
    use crate::security::validator::ValidatorConfig;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records the limits of each call and pretends the command printed "ran"
    #[derive(Default)]
    struct RecordingRunner {
        calls: Mutex<Vec<RunLimits>>,
    }

    impl RecordingRunner {
        fn calls(&self) -> Vec<RunLimits> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Runner for RecordingRunner {
        async fn run(
            &self,
            _cmd: &CommandSpec,
            limits: &RunLimits,
            _stdin: Option<&str>,
        ) -> anyhow::Result<RunOutcome> {
            self.calls.lock().unwrap().push(limits.clone());
            Ok(RunOutcome {
                status: RunStatus::Exited(0),
                elapsed: Duration::from_millis(5),
                stdout: "ran\n".into(),
                stderr: String::new(),
                truncated: false,
            })
        }
    }

    fn pipeline(
        runner: Arc<RecordingRunner>,
        root: &std::path::Path,
        validator: ValidatorConfig,
    ) -> SecureMiddleware {
        let orchestrator = Orchestrator::new(
            Arc::new(LanguageRegistry::builtin().unwrap()),
            runner,
            root,
        );
        SecureMiddleware::new(
            Arc::new(orchestrator),
            InputValidator::new(validator),
            PolicyEnforcer::default(),
        )
    }

    #[tokio::test]
    async fn test_blocked_request_never_reaches_backend() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::default());
        let sink = Arc::new(MemoryAuditSink::default());
        let mw = pipeline(runner.clone(), root.path(), ValidatorConfig::default())
            .with_audit(sink.clone());

        let result = mw
            .submit(&ExecutionRequest::new("bash", "echo hi; curl evil"))
            .await;
        assert_eq!(result.mode, Mode::Blocked);
        assert_eq!(result.exit_code, 2);
        assert!(result.stderr.starts_with("blocked by policy: "));
        assert!(runner.calls().is_empty());

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert!(matches!(records[0], AuditRecord::Reject { .. }));
    }

    #[tokio::test]
    async fn test_allowed_request_is_audited_and_clamped() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::default());
        let sink = Arc::new(MemoryAuditSink::default());
        let mw = pipeline(runner.clone(), root.path(), ValidatorConfig::default())
            .with_audit(sink.clone());

        let request = ExecutionRequest::new("sh", "echo hi")
            .with_timeout(1000)
            .with_memory_mb(1);
        let result = mw.submit(&request).await;
        assert_eq!(result.mode, Mode::Executed);
        assert_eq!(result.stdout, "ran\n");
        assert_eq!(result.language, "bash");

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].timeout, Duration::from_secs(15));
        assert_eq!(calls[0].open_files, Some(2048));

        let records = sink.records();
        assert_eq!(records.len(), 2);
        match (&records[0], &records[1]) {
            (AuditRecord::Start { policy, request, .. }, AuditRecord::End { .. }) => {
                assert_eq!(policy.timeout_secs, 15);
                assert_eq!(policy.memory_mb, 32);
                assert_eq!(request.language, "bash");
            }
            other => panic!("unexpected records {:?}", other),
        }
        assert_eq!(records[0].job_id(), records[1].job_id());
    }

    #[tokio::test]
    async fn test_clamp_mode_skips_denylist_and_audit() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::default());
        let sink = Arc::new(MemoryAuditSink::default());
        let mw = pipeline(runner.clone(), root.path(), ValidatorConfig::default())
            .with_audit(sink.clone())
            .with_mode(PipelineMode::Clamp);

        let result = mw.submit(&ExecutionRequest::new("bash", "sudo true")).await;
        assert_eq!(result.mode, Mode::Executed);
        assert_eq!(runner.calls().len(), 1);
        assert!(sink.records().is_empty());
    }

    #[tokio::test]
    async fn test_whitelist_applies_to_canonical_id() {
        let root = tempfile::tempdir().unwrap();
        let runner = Arc::new(RecordingRunner::default());
        let config = ValidatorConfig {
            language_whitelist: vec!["bash".into()],
            ..Default::default()
        };
        let mw = pipeline(runner.clone(), root.path(), config).with_mode(PipelineMode::Clamp);

        assert_eq!(
            mw.submit(&ExecutionRequest::new("shell", "echo")).await.mode,
            Mode::Executed
        );
        let blocked = mw.submit(&ExecutionRequest::new("python", "print(1)")).await;
        assert_eq!(blocked.mode, Mode::Blocked);
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn test_pipeline_mode_parse() {
        assert_eq!("secure".parse::<PipelineMode>().unwrap(), PipelineMode::Secure);
        assert_eq!(" CLAMP ".parse::<PipelineMode>().unwrap(), PipelineMode::Clamp);
        assert!("bogus".parse::<PipelineMode>().is_err());
        assert_eq!(PipelineMode::Clamp.to_string(), "clamp");
    }
}

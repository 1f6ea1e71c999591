//! Audit trail
//!
//! Append-only START/END/REJECT records, one JSON object per line. A job
//! either gets a REJECT, or a START followed by an END; `AuditTrail` and
//! `StartedAudit` encode that ordering in their ownership.
//!
//! Raw code is never recorded, only its length and SHA-256 digest. A failing
//! sink never affects the job.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::core::{ExecutionResult, Mode};
use crate::security::monitor::UsageDelta;
use crate::security::policy::Policy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMeta {
    pub language: String,
    pub code_len: usize,
    pub code_sha256: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMeta {
    pub exit_code: i32,
    pub stdout_len: usize,
    pub stderr_len: usize,
    pub mode: Mode,
    pub language: String,
}

/// One line of the audit log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "evt", rename_all = "UPPERCASE")]
pub enum AuditRecord {
    Start {
        ts: DateTime<Utc>,
        job_id: Uuid,
        request: RequestMeta,
        policy: Policy,
    },
    End {
        ts: DateTime<Utc>,
        job_id: Uuid,
        elapsed_ms: u64,
        result: ResultMeta,
        resources: UsageDelta,
    },
    Reject {
        ts: DateTime<Utc>,
        job_id: Uuid,
        reason: String,
        request: RequestMeta,
    },
}

impl AuditRecord {
    pub fn job_id(&self) -> Uuid {
        match self {
            AuditRecord::Start { job_id, .. }
            | AuditRecord::End { job_id, .. }
            | AuditRecord::Reject { job_id, .. } => *job_id,
        }
    }
}

/// Destination for audit records
pub trait AuditSink: Send + Sync {
    fn append(&self, record: &AuditRecord) -> Result<()>;
}

/// JSONL file sink. The file is opened once in append mode and each record
/// is written as a single line under the lock.
#[derive(Debug)]
pub struct JsonlAuditSink {
    file: Mutex<File>,
}

impl JsonlAuditSink {
    /// Open (or create) the log at `path`, creating parent directories
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open audit log {}", path.display()))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl AuditSink for JsonlAuditSink {
    fn append(&self, record: &AuditRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow::anyhow!("audit lock poisoned"))?;
        file.write_all(line.as_bytes())?;

        Ok(())
    }
}

/// In-memory sink
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditSink {
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn append(&self, record: &AuditRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| anyhow::anyhow!("audit lock poisoned"))?
            .push(record.clone());
        Ok(())
    }
}

/// Audit state of a job that has not started yet
pub struct AuditTrail {
    sink: Arc<dyn AuditSink>,
    job_id: Uuid,
    request: RequestMeta,
}

/// Audit state of a running job
pub struct StartedAudit {
    sink: Arc<dyn AuditSink>,
    job_id: Uuid,
    started: Instant,
}

impl AuditTrail {
    pub fn new(sink: Arc<dyn AuditSink>, language: &str, code: &str) -> Self {
        Self {
            sink,
            job_id: Uuid::new_v4(),
            request: RequestMeta {
                language: language.to_string(),
                code_len: code.len(),
                code_sha256: format!("{:x}", Sha256::digest(code.as_bytes())),
            },
        }
    }

    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn start(self, policy: &Policy) -> StartedAudit {
        write_record(
            self.sink.as_ref(),
            &AuditRecord::Start {
                ts: Utc::now(),
                job_id: self.job_id,
                request: self.request,
                policy: *policy,
            },
        );
        StartedAudit {
            sink: self.sink,
            job_id: self.job_id,
            started: Instant::now(),
        }
    }

    pub fn reject(self, reason: &str) {
        write_record(
            self.sink.as_ref(),
            &AuditRecord::Reject {
                ts: Utc::now(),
                job_id: self.job_id,
                reason: reason.to_string(),
                request: self.request,
            },
        );
    }
}

impl StartedAudit {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub fn end(self, result: &ExecutionResult, resources: &UsageDelta) {
        write_record(
            self.sink.as_ref(),
            &AuditRecord::End {
                ts: Utc::now(),
                job_id: self.job_id,
                elapsed_ms: self.started.elapsed().as_millis() as u64,
                result: ResultMeta {
                    exit_code: result.exit_code,
                    stdout_len: result.stdout.len(),
                    stderr_len: result.stderr.len(),
                    mode: result.mode,
                    language: result.language.clone(),
                },
                resources: *resources,
            },
        );
    }
}

fn write_record(sink: &dyn AuditSink, record: &AuditRecord) {
    if let Err(e) = sink.append(record) {
        debug!(job_id = %record.job_id(), "Audit append failed: {:#}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::policy::PolicyEnforcer;

    struct FailingSink;

    impl AuditSink for FailingSink {
        fn append(&self, _record: &AuditRecord) -> Result<()> {
            anyhow::bail!("disk full")
        }
    }

    #[test]
    fn test_start_end_share_job_id() {
        let sink = Arc::new(MemoryAuditSink::default());
        let trail = AuditTrail::new(sink.clone(), "python", "print(1)");
        let job_id = trail.job_id();
        let started = trail.start(&PolicyEnforcer::default().build_policy(5, 64));
        let result = ExecutionResult::executed("python", 0, "1\n".into(), String::new(), 12);
        started.end(&result, &UsageDelta::default());

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert!(matches!(records[0], AuditRecord::Start { .. }));
        match &records[1] {
            AuditRecord::End { result, .. } => {
                assert_eq!(result.stdout_len, 2);
                assert_eq!(result.mode, Mode::Executed);
            }
            other => panic!("unexpected record {:?}", other),
        }
        assert!(records.iter().all(|r| r.job_id() == job_id));
    }

    #[test]
    fn test_code_is_digested_not_stored() {
        let sink = Arc::new(MemoryAuditSink::default());
        AuditTrail::new(sink.clone(), "bash", "echo secret").reject("nope");
        let line = serde_json::to_string(&sink.records()[0]).unwrap();
        assert!(!line.contains("echo secret"));
        assert!(line.contains("\"evt\":\"REJECT\""));
        assert!(line.contains("\"code_len\":11"));
    }

    #[test]
    fn test_failing_sink_is_swallowed() {
        let trail = AuditTrail::new(Arc::new(FailingSink), "bash", "true");
        trail.reject("whatever");
    }

    #[test]
    fn test_jsonl_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/audit.jsonl");
        let sink: Arc<dyn AuditSink> = Arc::new(JsonlAuditSink::open(&path).unwrap());

        AuditTrail::new(sink.clone(), "bash", "a").reject("first");
        AuditTrail::new(sink.clone(), "bash", "b").reject("second");

        let content = fs::read_to_string(&path).unwrap();
        let records: Vec<AuditRecord> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert_ne!(records[0].job_id(), records[1].job_id());
    }

    #[test]
    fn test_jsonl_sink_concurrent_jobs_keep_lines_whole() {
        const JOBS: usize = 16;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let sink: Arc<dyn AuditSink> = Arc::new(JsonlAuditSink::open(&path).unwrap());
        let policy = PolicyEnforcer::default().build_policy(5, 64);
        // Large enough that torn writes would show up as broken lines
        let stdout = "x".repeat(64 * 1024);

        std::thread::scope(|scope| {
            for i in 0..JOBS {
                let sink = sink.clone();
                let stdout = stdout.clone();
                scope.spawn(move || {
                    let code = format!("echo {}", i);
                    let started = AuditTrail::new(sink, "bash", &code).start(&policy);
                    let result = ExecutionResult::executed("bash", 0, stdout, String::new(), 1);
                    started.end(&result, &UsageDelta::default());
                });
            }
        });

        let content = fs::read_to_string(&path).unwrap();
        let records: Vec<AuditRecord> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records.len(), 2 * JOBS);

        let mut job_ids: Vec<_> = records.iter().map(AuditRecord::job_id).collect();
        job_ids.sort();
        job_ids.dedup();
        assert_eq!(job_ids.len(), JOBS);
    }
}

//! Queue job payloads

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::app::Executor;
use crate::core::{ExecutionRequest, ExecutionResult};

fn new_job_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Execution job received from the Redis queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteJob {
    /// Key the result is stored under; generated when the producer omits it
    #[serde(default = "new_job_id")]
    pub job_id: String,
    #[serde(flatten)]
    pub request: ExecutionRequest,
}

/// Result stored and published for an `ExecuteJob`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecuteJobResult {
    pub job_id: String,
    #[serde(flatten)]
    pub result: ExecutionResult,
}

pub async fn process_execute_job(executor: &Executor, job: &ExecuteJob) -> ExecuteJobResult {
    info!(
        job_id = %job.job_id,
        language = %job.request.language,
        code_len = job.request.code.len(),
        "Received execute job"
    );
    let result = executor.submit(&job.request).await;
    ExecuteJobResult {
        job_id: job.job_id.clone(),
        result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Mode;

    #[test]
    fn test_job_payload() {
        let job: ExecuteJob = serde_json::from_str(
            r#"{"job_id":"abc","language":"python","code":"print(1)","timeout":3}"#,
        )
        .unwrap();
        assert_eq!(job.job_id, "abc");
        assert_eq!(job.request.timeout, 3);
        assert_eq!(job.request.memory_mb, 256);

        let generated: ExecuteJob =
            serde_json::from_str(r#"{"language":"bash","code":"echo"}"#).unwrap();
        assert_eq!(generated.job_id.len(), 36);
    }

    #[test]
    fn test_result_payload_is_flat() {
        let result = ExecuteJobResult {
            job_id: "abc".into(),
            result: ExecutionResult::blocked("bash", "nope"),
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["job_id"], "abc");
        assert_eq!(json["exit_code"], 2);
        assert_eq!(json["mode"], "blocked");
        assert_eq!(result.result.mode, Mode::Blocked);
    }
}

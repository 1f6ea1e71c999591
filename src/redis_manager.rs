//! Redis plumbing for the execution worker
//!
//! Jobs arrive on a list consumed with BLPOP. Results are written under a
//! per-job key with a TTL for pollers and published on a channel for
//! subscribers.

use std::time::Duration;

use anyhow::{Context, Result};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tracing::{debug, info, warn};

use crate::jobs::{ExecuteJob, ExecuteJobResult};

/// Redis key constants
pub mod keys {
    /// List the worker pops `ExecuteJob` payloads from
    pub const EXEC_QUEUE: &str = "exec:queue";

    /// Prefix of the per-job result key
    pub const EXEC_RESULT_PREFIX: &str = "exec:result:";

    /// Pub/sub channel every finished result is announced on
    pub const EXEC_RESULT_CHANNEL: &str = "exec:results";

    pub fn result_key(job_id: &str) -> String {
        format!("{}{}", EXEC_RESULT_PREFIX, job_id)
    }
}

const RESULT_TTL_SECS: u64 = 60 * 60;
const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(3);
/// Longest payload prefix echoed into the log when a job cannot be parsed
const LOGGED_PAYLOAD_CHARS: usize = 200;

/// Queue side of the worker. Its connection is parked in BLPOP most of the
/// time, so results go through a separate [`ResultStore`].
pub struct RedisManager {
    client: redis::Client,
    queue_conn: MultiplexedConnection,
}

impl RedisManager {
    pub async fn with_url(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .with_context(|| format!("Invalid Redis URL {}", redis_url))?;
        let queue_conn = connect(&client).await?;
        info!("Connected to Redis at {}", redis_url);

        Ok(Self { client, queue_conn })
    }

    /// Wait for the next well-formed job.
    ///
    /// A dropped connection is re-established and the wait resumes. Payloads
    /// that fail to deserialize are logged and discarded.
    pub async fn pop_job(&mut self) -> Result<ExecuteJob> {
        loop {
            let popped: Option<(String, String)> =
                match self.queue_conn.blpop(keys::EXEC_QUEUE, 0.0).await {
                    Ok(popped) => popped,
                    Err(e) => {
                        warn!("BLPOP on {} failed: {}, reconnecting", keys::EXEC_QUEUE, e);
                        self.queue_conn = connect(&self.client).await?;
                        continue;
                    }
                };
            let Some((_, payload)) = popped else {
                continue;
            };

            match serde_json::from_str::<ExecuteJob>(&payload) {
                Ok(job) => {
                    debug!(job_id = %job.job_id, "Popped job");
                    return Ok(job);
                }
                Err(e) => {
                    let preview: String = payload.chars().take(LOGGED_PAYLOAD_CHARS).collect();
                    warn!("Discarding malformed job ({}): {}", e, preview);
                }
            }
        }
    }

    /// Open the connection results are written through
    pub async fn result_store(&self) -> Result<ResultStore> {
        Ok(ResultStore {
            client: self.client.clone(),
            conn: connect(&self.client).await?,
        })
    }
}

/// Result side of the worker. Cloned into every job task; clones share the
/// multiplexed connection.
#[derive(Clone)]
pub struct ResultStore {
    client: redis::Client,
    conn: MultiplexedConnection,
}

impl ResultStore {
    /// SET the result under `exec:result:<job_id>` with a one hour TTL, then
    /// PUBLISH it on `exec:results`.
    pub async fn store_execute_result(&mut self, result: &ExecuteJobResult) -> Result<()> {
        let json = serde_json::to_string(result).context("Failed to encode result")?;
        let key = keys::result_key(&result.job_id);

        if let Err(e) = self.set_result(&key, &json).await {
            warn!(job_id = %result.job_id, "Storing result failed: {}, retrying on a new connection", e);
            self.conn = connect(&self.client).await?;
            self.set_result(&key, &json)
                .await
                .with_context(|| format!("Failed to store {}", key))?;
        }

        // Nobody may be subscribed; pollers still have the key
        if let Err(e) = self
            .conn
            .publish::<_, _, ()>(keys::EXEC_RESULT_CHANNEL, &json)
            .await
        {
            debug!(job_id = %result.job_id, "Publish skipped: {}", e);
        }

        Ok(())
    }

    async fn set_result(&mut self, key: &str, json: &str) -> redis::RedisResult<()> {
        self.conn.set_ex(key, json, RESULT_TTL_SECS).await
    }
}

/// Connect, retrying until Redis answers
async fn connect(client: &redis::Client) -> Result<MultiplexedConnection> {
    loop {
        match client.get_multiplexed_async_connection().await {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                warn!(
                    "Redis unavailable ({}), retrying in {}s",
                    e,
                    CONNECT_RETRY_DELAY.as_secs()
                );
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_key_layout() {
        assert_eq!(keys::result_key("abc"), "exec:result:abc");
        assert_eq!(keys::EXEC_QUEUE, "exec:queue");
    }

    #[tokio::test]
    #[ignore = "requires a running Redis at REDIS_URL"]
    async fn test_round_trip_through_redis() {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".into());
        let mut manager = RedisManager::with_url(&url).await.unwrap();
        let mut store = manager.result_store().await.unwrap();
        store
            .conn
            .rpush::<_, _, ()>(keys::EXEC_QUEUE, "not json")
            .await
            .unwrap();
        store
            .conn
            .rpush::<_, _, ()>(
                keys::EXEC_QUEUE,
                r#"{"job_id":"redis-test","language":"bash","code":"echo"}"#,
            )
            .await
            .unwrap();

        // The malformed payload is skipped
        let job = manager.pop_job().await.unwrap();
        assert_eq!(job.job_id, "redis-test");
    }
}

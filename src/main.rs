use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Semaphore;
use tracing::{error, info};

use polyexec::config::{self, Config};
use polyexec::jobs::process_execute_job;
use polyexec::redis_manager::RedisManager;
use polyexec::smoke::{run_smoke, SmokeOptions};
use polyexec::Executor;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("polyexec=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    config::init_config(Config::from_env())?;
    let config = config::get_config();

    let executor = Arc::new(Executor::from_config(config)?);
    info!(
        "Loaded {} languages: {:?}",
        executor.languages().len(),
        executor.languages()
    );

    if std::env::args().nth(1).as_deref() == Some("smoke") {
        let summary = run_smoke(&executor, &SmokeOptions::from_env()).await;
        println!("{}", serde_json::to_string_pretty(&summary)?);
        std::process::exit(if summary.is_success() { 0 } else { 1 });
    }

    info!("Starting execution worker...");

    let mut redis = RedisManager::with_url(&config.redis_url).await?;
    let store = redis.result_store().await?;
    let permits = Arc::new(Semaphore::new(config.worker_concurrency));

    info!(
        "Waiting for jobs (concurrency {})...",
        config.worker_concurrency
    );

    loop {
        let permit = permits.clone().acquire_owned().await?;
        let job = redis.pop_job().await?;

        let executor = executor.clone();
        let mut store = store.clone();
        tokio::spawn(async move {
            let result = process_execute_job(&executor, &job).await;
            info!(
                job_id = %result.job_id,
                mode = %result.result.mode,
                exit_code = result.result.exit_code,
                "Job completed"
            );
            if let Err(e) = store.store_execute_result(&result).await {
                error!(job_id = %result.job_id, "Failed to store result: {:#}", e);
            }
            drop(permit);
        });
    }
}

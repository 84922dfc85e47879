use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use contest_judge::config::Config;
use contest_judge::judger::Judger;
use contest_judge::languages::LanguageProfiles;
use contest_judge::processor::SubmissionProcessor;
use contest_judge::runner::SandboxExecutor;
use contest_judge::sandbox::DockerRuntime;
use contest_judge::store::RedisStore;
use contest_judge::worker::Worker;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("contest_judge=info".parse()?),
        )
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env()?;

    // Load language configurations
    let profiles = LanguageProfiles::load(config.languages_path.as_deref())?;
    match &config.languages_path {
        Some(path) => info!("Loaded language configurations from {:?}", path),
        None => info!("Using built-in language configurations"),
    }

    info!("Starting Contest Judge Worker...");

    tokio::fs::create_dir_all(&config.sandbox.workspace_root)
        .await
        .with_context(|| {
            format!(
                "Failed to create workspace root {:?}",
                config.sandbox.workspace_root
            )
        })?;

    let runtime = Arc::new(DockerRuntime::new(config.sandbox.runtime_binary.clone()));
    let executor = Arc::new(SandboxExecutor::new(
        runtime,
        profiles,
        config.sandbox.clone(),
    ));
    info!(
        "Sandbox config: runtime={}, prefix={}, workspace_root={:?}, grace={:?}",
        config.sandbox.runtime_binary,
        config.sandbox.container_prefix,
        config.sandbox.workspace_root,
        config.sandbox.grace_period
    );

    // Leftovers of a crashed worker must not collide with new run names
    if let Err(e) = executor.sweep_orphans().await {
        warn!("Orphan sweep incomplete: {:#}", e);
    }

    let client = redis::Client::open(config.redis_url.clone())
        .context("Failed to create Redis client")?;
    let store = Arc::new(RedisStore::connect(&client).await?);
    info!("Connected to Redis at {}", config.redis_url);

    let processor = Arc::new(SubmissionProcessor::new(store, Judger::new(executor)));
    let worker = Worker::new(
        client,
        config.queue_name.clone(),
        processor,
        config.max_workers,
    );

    let interrupted = tokio::select! {
        result = worker.run() => {
            result?;
            false
        }
        _ = tokio::signal::ctrl_c() => true,
    };

    if interrupted {
        info!("Shutdown requested, draining in-flight submissions...");
        worker.drain().await;
    }

    info!("Contest Judge Worker stopped");
    Ok(())
}

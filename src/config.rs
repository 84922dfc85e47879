//! Worker configuration
//!
//! Values are read from environment variables (a `.env` file is honoured by
//! the binary) and fall back to defaults suited to a local Docker host.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Settings for the sandbox layer
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Directory under which per-run workspaces are created
    pub workspace_root: PathBuf,
    /// Container runtime CLI (docker or a compatible drop-in such as podman)
    pub runtime_binary: String,
    /// Prefix shared by every container and workspace this worker creates
    pub container_prefix: String,
    /// Added to the sandbox time limit before the supervisor kills a run
    pub grace_period: Duration,
    /// Compile time limit in seconds
    pub compile_time_limit_secs: f64,
    /// Compile memory limit in MB
    pub compile_memory_limit_mb: u32,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from("/tmp/contest-judge"),
            runtime_binary: "docker".to_string(),
            container_prefix: "judge".to_string(),
            grace_period: Duration::from_millis(2000),
            compile_time_limit_secs: 30.0,
            compile_memory_limit_mb: 1024,
        }
    }
}

/// Top-level worker configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub redis_url: String,
    /// Redis list holding queued submission ids
    pub queue_name: String,
    /// Number of submissions judged concurrently
    pub max_workers: usize,
    /// Optional override for the built-in language profiles
    pub languages_path: Option<PathBuf>,
    pub sandbox: SandboxConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = SandboxConfig::default();

        let sandbox = SandboxConfig {
            workspace_root: std::env::var("JUDGE_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.workspace_root),
            runtime_binary: std::env::var("JUDGE_SANDBOX_BINARY")
                .unwrap_or(defaults.runtime_binary),
            container_prefix: std::env::var("JUDGE_CONTAINER_PREFIX")
                .unwrap_or(defaults.container_prefix),
            grace_period: Duration::from_millis(env_or("JUDGE_GRACE_MS", 2000u64)?),
            compile_time_limit_secs: env_or(
                "JUDGE_COMPILE_TIME_LIMIT_SECS",
                defaults.compile_time_limit_secs,
            )?,
            compile_memory_limit_mb: env_or(
                "JUDGE_COMPILE_MEMORY_LIMIT_MB",
                defaults.compile_memory_limit_mb,
            )?,
        };

        let max_workers: usize = env_or("JUDGE_MAX_WORKERS", 4)?;
        if max_workers == 0 {
            anyhow::bail!("JUDGE_MAX_WORKERS must be at least 1");
        }

        Ok(Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".into()),
            queue_name: std::env::var("JUDGE_QUEUE").unwrap_or_else(|_| "judge:queue".into()),
            max_workers,
            languages_path: std::env::var("LANGUAGES_CONFIG").ok().map(PathBuf::from),
            sandbox,
        })
    }
}

/// Read and parse an environment variable, using `default` when it is unset
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {}", key, value)),
        Err(_) => Ok(default),
    }
}

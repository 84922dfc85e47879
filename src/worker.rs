//! Queue worker
//!
//! Pops submission ids from a Redis list and judges up to `max_workers` of
//! them concurrently. A slow submission only holds its own permit, so it never
//! delays the others.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::processor::SubmissionProcessor;

/// Queue payload; plain ids are accepted too
#[derive(Debug, Deserialize)]
struct QueuedSubmission {
    submission_id: i64,
}

/// Extract the submission id from a queue entry: `42` or `{"submission_id":42}`
pub fn parse_submission_id(payload: &str) -> Option<i64> {
    let payload = payload.trim();
    payload.parse::<i64>().ok().or_else(|| {
        serde_json::from_str::<QueuedSubmission>(payload)
            .ok()
            .map(|job| job.submission_id)
    })
}

pub struct Worker {
    client: redis::Client,
    queue: String,
    processor: Arc<SubmissionProcessor>,
    permits: Arc<Semaphore>,
    max_workers: usize,
}

impl Worker {
    pub fn new(
        client: redis::Client,
        queue: impl Into<String>,
        processor: Arc<SubmissionProcessor>,
        max_workers: usize,
    ) -> Self {
        Self {
            client,
            queue: queue.into(),
            processor,
            permits: Arc::new(Semaphore::new(max_workers)),
            max_workers,
        }
    }

    /// Pop and judge submissions until the future is dropped.
    ///
    /// A permit is taken before popping, so a submission is only removed
    /// from the queue when a slot is free to judge it.
    pub async fn run(&self) -> Result<()> {
        let mut conn = get_connection_with_retry(&self.client).await?;
        info!(
            "Waiting for submissions on {} ({} slots)...",
            self.queue, self.max_workers
        );

        loop {
            let permit = self
                .permits
                .clone()
                .acquire_owned()
                .await
                .context("Worker pool closed")?;

            // Block and wait for a submission id (BLPOP)
            let result: Option<(String, String)> = match conn.blpop(&self.queue, 0.0).await {
                Ok(res) => res,
                Err(e) => {
                    warn!("Redis BLPOP failed: {}. Attempting to reconnect...", e);
                    conn = get_connection_with_retry(&self.client).await?;
                    continue;
                }
            };

            let Some((_, payload)) = result else {
                continue;
            };

            let Some(submission_id) = parse_submission_id(&payload) else {
                warn!("Ignoring malformed queue entry: {}", payload);
                continue;
            };

            info!("Received submission {}", submission_id);
            let processor = self.processor.clone();
            tokio::spawn(async move {
                processor.process(submission_id).await;
                drop(permit);
            });
        }
    }

    /// Wait for every in-flight submission to finish
    pub async fn drain(&self) {
        let in_flight = self.max_workers - self.permits.available_permits();
        if in_flight > 0 {
            info!("Waiting for {} in-flight submissions...", in_flight);
        }
        if self.permits.acquire_many(self.max_workers as u32).await.is_err() {
            warn!("Worker pool closed while draining");
        }
        let gauges = self.processor.gauges();
        info!(
            "Worker drained: completed={}, system_errors={}",
            gauges.completed, gauges.system_errors
        );
    }
}

/// Get a Redis connection with retry logic
async fn get_connection_with_retry(client: &redis::Client) -> Result<MultiplexedConnection> {
    loop {
        match client.get_multiplexed_async_connection().await {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                warn!(
                    "Failed to connect to Redis: {}. Retrying in 3 seconds...",
                    e
                );
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_submission_id() {
        assert_eq!(parse_submission_id("42"), Some(42));
        assert_eq!(parse_submission_id(" 7\n"), Some(7));
        assert_eq!(
            parse_submission_id(r#"{"submission_id": 13, "priority": 1}"#),
            Some(13)
        );
        assert_eq!(parse_submission_id("judge me"), None);
        assert_eq!(parse_submission_id(r#"{"id": 13}"#), None);
    }
}

//! Redis-backed store
//!
//! Records are JSON documents under fixed keys; terminal results are also
//! published for real-time subscribers.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{info, warn};

use super::SubmissionStore;
use crate::judger::JudgeReport;
use crate::models::{Problem, Submission, TestCase};

/// Redis key constants
pub mod keys {
    /// Submission record key prefix
    pub const SUBMISSION_PREFIX: &str = "submission:";

    /// Problem record key prefix; test cases live under `problem:{id}:testcases`
    pub const PROBLEM_PREFIX: &str = "problem:";

    /// Judge result key prefix (for polling)
    pub const JUDGE_RESULT_PREFIX: &str = "judge:result:";

    /// Judge result channel (for pub/sub)
    pub const JUDGE_RESULT_CHANNEL: &str = "judge:results";

    pub fn submission(id: i64) -> String {
        format!("{}{}", SUBMISSION_PREFIX, id)
    }

    pub fn problem(id: i64) -> String {
        format!("{}{}", PROBLEM_PREFIX, id)
    }

    pub fn testcases(problem_id: i64) -> String {
        format!("{}{}:testcases", PROBLEM_PREFIX, problem_id)
    }

    pub fn judge_result(submission_id: i64) -> String {
        format!("{}{}", JUDGE_RESULT_PREFIX, submission_id)
    }
}

const RESULT_EXPIRY_SECS: u64 = 3600; // 1 hour

/// `SubmissionStore` on a shared, self-reconnecting Redis connection
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(client: &redis::Client) -> Result<Self> {
        let conn = connection_manager_with_retry(client).await?;
        info!("Store connected to Redis");
        Ok(Self { conn })
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let mut conn = self.conn.clone();
        let json: Option<String> = conn
            .get(key)
            .await
            .with_context(|| format!("Failed to read {}", key))?;
        let json = json.with_context(|| format!("{} not found", key))?;
        serde_json::from_str(&json).with_context(|| format!("Malformed record at {}", key))
    }

    async fn set_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let json = serde_json::to_string(value)?;
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(key, json)
            .await
            .with_context(|| format!("Failed to write {}", key))
    }
}

#[async_trait]
impl SubmissionStore for RedisStore {
    async fn load_submission(&self, submission_id: i64) -> Result<Submission> {
        self.get_json(&keys::submission(submission_id)).await
    }

    async fn load_problem(&self, problem_id: i64) -> Result<Problem> {
        self.get_json(&keys::problem(problem_id)).await
    }

    async fn load_test_cases(&self, problem_id: i64) -> Result<Vec<TestCase>> {
        let mut conn = self.conn.clone();
        let key = keys::testcases(problem_id);
        let json: Option<String> = conn
            .get(&key)
            .await
            .with_context(|| format!("Failed to read {}", key))?;

        match json {
            Some(json) => {
                serde_json::from_str(&json).with_context(|| format!("Malformed record at {}", key))
            }
            None => Ok(Vec::new()),
        }
    }

    async fn mark_status(&self, submission: &Submission) -> Result<()> {
        self.set_json(&keys::submission(submission.id), submission)
            .await
    }

    async fn finalize(&self, submission: &Submission, report: &JudgeReport) -> Result<()> {
        self.set_json(&keys::submission(submission.id), submission)
            .await?;

        let json = serde_json::to_string(report)?;
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(
            keys::judge_result(submission.id),
            &json,
            RESULT_EXPIRY_SECS,
        )
        .await
        .context("Failed to store judge result")?;

        // Publish to channel (ignore errors as there may be no subscribers)
        if let Err(e) = conn
            .publish::<_, _, ()>(keys::JUDGE_RESULT_CHANNEL, &json)
            .await
        {
            warn!(
                "Failed to publish result of submission {}: {}",
                submission.id, e
            );
        }

        Ok(())
    }
}

/// Create a connection manager, retrying until Redis is reachable
async fn connection_manager_with_retry(client: &redis::Client) -> Result<ConnectionManager> {
    loop {
        match ConnectionManager::new(client.clone()).await {
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

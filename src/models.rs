//! Records read from and written back to persistence

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::verdict::SubmissionStatus;

/// One user's code for one problem in one contest attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: i64,
    pub user_id: i64,
    pub problem_id: i64,
    pub contest_id: Option<i64>,
    pub source_code: String,
    /// Language tag as submitted; parsed when the submission is judged
    pub language: String,
    pub status: SubmissionStatus,
    /// 0-100, set once when a terminal status is reached
    pub score: Option<u32>,
    /// Total execution time in milliseconds
    pub execution_time_ms: Option<u64>,
    /// Peak memory in KB
    pub memory_kb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Submission {
    pub fn new(id: i64, user_id: i64, problem_id: i64, language: &str, source_code: &str) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id,
            problem_id,
            contest_id: None,
            source_code: source_code.to_string(),
            language: language.to_string(),
            status: SubmissionStatus::Queued,
            score: None,
            execution_time_ms: None,
            memory_kb: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to an intermediate status. Regressions are rejected.
    pub fn advance(&mut self, next: SubmissionStatus) -> Result<()> {
        if next.is_terminal() {
            bail!("terminal status {} must be set through finalize", next);
        }
        if !self.status.can_transition_to(next) {
            bail!(
                "illegal transition {} -> {} for submission {}",
                self.status,
                next,
                self.id
            );
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record the terminal verdict. Score and metrics are written exactly once.
    pub fn finalize(&mut self, verdict: &FinalVerdict) -> Result<()> {
        if !verdict.status.is_terminal() {
            bail!("{} is not a terminal status", verdict.status);
        }
        if !self.status.can_transition_to(verdict.status) {
            bail!(
                "illegal transition {} -> {} for submission {}",
                self.status,
                verdict.status,
                self.id
            );
        }
        self.status = verdict.status;
        self.score = Some(verdict.score);
        self.execution_time_ms = verdict.execution_time_ms;
        self.memory_kb = verdict.memory_kb;
        self.error_message = verdict.error_message.clone();
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Judging parameters of a problem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    pub id: i64,
    /// Time limit in seconds
    pub time_limit_secs: f64,
    pub memory_limit_mb: u32,
}

/// One (input, expected output) pair owned by a problem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestCase {
    pub id: i64,
    pub problem_id: i64,
    /// Position within the problem; ties are broken by id
    #[serde(default)]
    pub ordinal: u32,
    pub input: String,
    pub expected_output: String,
    /// Sample cases are shown to users, hidden ones are not
    #[serde(default)]
    pub is_sample: bool,
}

/// What the judge writes back for a finished submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalVerdict {
    pub status: SubmissionStatus,
    pub score: u32,
    pub execution_time_ms: Option<u64>,
    pub memory_kb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl FinalVerdict {
    pub fn system_error(message: impl Into<String>) -> Self {
        Self {
            status: SubmissionStatus::SystemError,
            score: 0,
            execution_time_ms: None,
            memory_kb: None,
            error_message: Some(message.into()),
        }
    }
}

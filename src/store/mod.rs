//! Store module - persistence boundary of the judge
//!
//! The judge reads submissions, problems and test cases, and writes back
//! status transitions and the final result. Everything else about the
//! surrounding service (users, contests, leaderboards) lives elsewhere.

pub mod memory;
pub mod redis;

use anyhow::Result;
use async_trait::async_trait;

use crate::judger::JudgeReport;
use crate::models::{Problem, Submission, TestCase};

/// Persistence operations needed to judge a submission
#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn load_submission(&self, submission_id: i64) -> Result<Submission>;

    async fn load_problem(&self, problem_id: i64) -> Result<Problem>;

    /// All test cases of a problem, samples included, in any order
    async fn load_test_cases(&self, problem_id: i64) -> Result<Vec<TestCase>>;

    /// Persist an intermediate status so pollers can observe progress
    async fn mark_status(&self, submission: &Submission) -> Result<()>;

    /// Persist the terminal record and announce the report
    async fn finalize(&self, submission: &Submission, report: &JudgeReport) -> Result<()>;
}

pub use memory::MemoryStore;
pub use self::redis::RedisStore;

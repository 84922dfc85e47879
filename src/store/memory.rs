//! In-process store for tests and local dry runs

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::SubmissionStore;
use crate::judger::JudgeReport;
use crate::models::{Problem, Submission, TestCase};
use crate::verdict::SubmissionStatus;

#[derive(Default)]
struct Inner {
    submissions: HashMap<i64, Submission>,
    problems: HashMap<i64, Problem>,
    testcases: HashMap<i64, Vec<TestCase>>,
    /// Every status written per submission, in order
    history: HashMap<i64, Vec<SubmissionStatus>>,
    reports: Vec<JudgeReport>,
}

/// `SubmissionStore` backed by in-memory maps
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_submission(&self, submission: Submission) {
        let mut inner = self.inner.lock().await;
        inner
            .history
            .entry(submission.id)
            .or_default()
            .push(submission.status);
        inner.submissions.insert(submission.id, submission);
    }

    pub async fn insert_problem(&self, problem: Problem, testcases: Vec<TestCase>) {
        let mut inner = self.inner.lock().await;
        inner.testcases.insert(problem.id, testcases);
        inner.problems.insert(problem.id, problem);
    }

    pub async fn submission(&self, submission_id: i64) -> Option<Submission> {
        self.inner
            .lock()
            .await
            .submissions
            .get(&submission_id)
            .cloned()
    }

    /// Statuses written for a submission, oldest first
    pub async fn history(&self, submission_id: i64) -> Vec<SubmissionStatus> {
        self.inner
            .lock()
            .await
            .history
            .get(&submission_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Reports announced so far
    pub async fn reports(&self) -> Vec<JudgeReport> {
        self.inner.lock().await.reports.clone()
    }

    async fn save(&self, submission: &Submission) {
        let mut inner = self.inner.lock().await;
        inner
            .history
            .entry(submission.id)
            .or_default()
            .push(submission.status);
        inner.submissions.insert(submission.id, submission.clone());
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn load_submission(&self, submission_id: i64) -> Result<Submission> {
        self.submission(submission_id)
            .await
            .ok_or_else(|| anyhow!("submission {} not found", submission_id))
    }

    async fn load_problem(&self, problem_id: i64) -> Result<Problem> {
        self.inner
            .lock()
            .await
            .problems
            .get(&problem_id)
            .cloned()
            .ok_or_else(|| anyhow!("problem {} not found", problem_id))
    }

    async fn load_test_cases(&self, problem_id: i64) -> Result<Vec<TestCase>> {
        Ok(self
            .inner
            .lock()
            .await
            .testcases
            .get(&problem_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn mark_status(&self, submission: &Submission) -> Result<()> {
        self.save(submission).await;
        Ok(())
    }

    async fn finalize(&self, submission: &Submission, report: &JudgeReport) -> Result<()> {
        self.save(submission).await;
        self.inner.lock().await.reports.push(report.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_err;

    #[tokio::test]
    async fn test_history_records_every_write() {
        let store = MemoryStore::new();
        let mut submission = Submission::new(1, 2, 3, "python", "print(1)");
        store.insert_submission(submission.clone()).await;

        submission.advance(SubmissionStatus::Running).unwrap();
        store.mark_status(&submission).await.unwrap();

        assert_eq!(
            store.history(1).await,
            vec![SubmissionStatus::Queued, SubmissionStatus::Running]
        );
        assert_eq!(
            store.load_submission(1).await.unwrap().status,
            SubmissionStatus::Running
        );
        assert_err!(store.load_submission(2).await);
        assert_err!(store.load_problem(3).await);
        assert!(store.load_test_cases(3).await.unwrap().is_empty());
    }
}

//! Submission processor
//!
//! One `process` call judges one submission end to end: status transitions,
//! judging, persisting the verdict and tearing down sandbox leftovers. Any
//! failure along the way, panics included, ends in a persisted
//! `SYSTEM_ERROR` instead of a stuck submission.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use tokio::task::JoinError;
use tracing::{error, info, warn};

use crate::judger::{JudgeReport, Judger};
use crate::runner::{truncate_chars, MAX_DIAGNOSTIC_CHARS};
use crate::store::SubmissionStore;
use crate::verdict::SubmissionStatus;

/// Counters owned by one processor
#[derive(Debug, Default)]
pub struct ProcessorGauges {
    active: AtomicUsize,
    completed: AtomicU64,
    system_errors: AtomicU64,
}

/// Point-in-time copy of `ProcessorGauges`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GaugeSnapshot {
    pub active: usize,
    pub completed: u64,
    pub system_errors: u64,
}

impl ProcessorGauges {
    pub fn snapshot(&self) -> GaugeSnapshot {
        GaugeSnapshot {
            active: self.active.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            system_errors: self.system_errors.load(Ordering::Relaxed),
        }
    }

    fn enter(&self) -> ActiveGuard<'_> {
        self.active.fetch_add(1, Ordering::Relaxed);
        ActiveGuard(self)
    }

    fn record(&self, status: SubmissionStatus) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        if status == SubmissionStatus::SystemError {
            self.system_errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

struct ActiveGuard<'a>(&'a ProcessorGauges);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Drives submissions from queued to a terminal status
pub struct SubmissionProcessor {
    store: Arc<dyn SubmissionStore>,
    judger: Judger,
    gauges: ProcessorGauges,
}

impl SubmissionProcessor {
    pub fn new(store: Arc<dyn SubmissionStore>, judger: Judger) -> Self {
        Self {
            store,
            judger,
            gauges: ProcessorGauges::default(),
        }
    }

    pub fn gauges(&self) -> GaugeSnapshot {
        self.gauges.snapshot()
    }

    /// Judge one submission and return the status it ended in.
    ///
    /// Never fails. Sandbox cleanup for the submission runs exactly once,
    /// whichever way processing ended.
    pub async fn process(&self, submission_id: i64) -> SubmissionStatus {
        let _active = self.gauges.enter();

        let status = match self.try_process(submission_id).await {
            Ok(status) => status,
            Err(e) => {
                error!("Submission {} failed: {:#}", submission_id, e);
                self.fail(submission_id, &e).await
            }
        };

        if let Err(e) = self
            .judger
            .executor()
            .cleanup_submission(submission_id)
            .await
        {
            warn!("{:#}", e);
        }

        self.gauges.record(status);
        info!("Submission {} finished: {}", submission_id, status);
        status
    }

    async fn try_process(&self, submission_id: i64) -> Result<SubmissionStatus> {
        let mut submission = self
            .store
            .load_submission(submission_id)
            .await
            .with_context(|| format!("Failed to load submission {}", submission_id))?;

        if submission.status.is_terminal() {
            info!(
                "Submission {} already judged ({}), skipping",
                submission_id, submission.status
            );
            return Ok(submission.status);
        }

        if submission.status == SubmissionStatus::Pending {
            submission.advance(SubmissionStatus::Queued)?;
            self.store
                .mark_status(&submission)
                .await
                .context("Failed to mark submission queued")?;
        }

        submission.advance(SubmissionStatus::Running)?;
        self.store
            .mark_status(&submission)
            .await
            .context("Failed to mark submission running")?;
        info!("Submission {} is running", submission_id);

        let problem = self
            .store
            .load_problem(submission.problem_id)
            .await
            .with_context(|| format!("Failed to load problem {}", submission.problem_id))?;
        let testcases = self
            .store
            .load_test_cases(problem.id)
            .await
            .with_context(|| format!("Failed to load test cases of problem {}", problem.id))?;

        let judger = self.judger.clone();
        let snapshot = submission.clone();
        let report =
            tokio::spawn(async move { judger.judge(&snapshot, &problem, &testcases).await })
                .await
                .map_err(join_error)?;

        submission.finalize(&report.verdict)?;
        self.store
            .finalize(&submission, &report)
            .await
            .context("Failed to persist verdict")?;

        Ok(submission.status)
    }

    /// Commit `SYSTEM_ERROR` for a submission whose processing failed
    async fn fail(&self, submission_id: i64, cause: &anyhow::Error) -> SubmissionStatus {
        let message = truncate_chars(&format!("{:#}", cause), MAX_DIAGNOSTIC_CHARS);

        let mut submission = match self.store.load_submission(submission_id).await {
            Ok(submission) => submission,
            Err(e) => {
                error!(
                    "Cannot record SYSTEM_ERROR for submission {}: {:#}",
                    submission_id, e
                );
                return SubmissionStatus::SystemError;
            }
        };

        if submission.status.is_terminal() {
            return submission.status;
        }

        let report = JudgeReport::system_error(submission_id, message);
        if let Err(e) = submission.finalize(&report.verdict) {
            error!("{:#}", e);
            return SubmissionStatus::SystemError;
        }
        if let Err(e) = self.store.finalize(&submission, &report).await {
            error!(
                "Failed to persist SYSTEM_ERROR for submission {}: {:#}",
                submission_id, e
            );
        }

        SubmissionStatus::SystemError
    }
}

fn join_error(e: JoinError) -> anyhow::Error {
    if !e.is_panic() {
        return anyhow!("judge task was cancelled");
    }
    let payload = e.into_panic();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    anyhow!("judge task panicked: {}", message)
}

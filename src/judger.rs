//! Judger module for evaluating a submission against its test cases
//!
//! This module handles the core judging logic: running the submission against
//! each test case in a fixed order, stopping at the first failure, and
//! turning the per-case outcomes into a final verdict and score.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::checker;
use crate::languages::Language;
use crate::models::{FinalVerdict, Problem, Submission, TestCase};
use crate::runner::{truncate_chars, CodeExecutor, ExecutionResult, RunRequest};
use crate::verdict::SubmissionStatus;

/// Longest output preview kept per test case
pub const OUTPUT_PREVIEW_CHARS: usize = 4096;

/// Outcome of one test case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseReport {
    pub testcase_id: i64,
    /// `None` when the case was skipped after an earlier failure
    pub verdict: Option<SubmissionStatus>,
    pub time_ms: Option<u64>,
    pub memory_kb: Option<u64>,
    /// Program output, truncated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl CaseReport {
    fn skipped(testcase_id: i64) -> Self {
        Self {
            testcase_id,
            verdict: None,
            time_ms: None,
            memory_kb: None,
            output: None,
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.verdict.is_none()
    }
}

/// Result of judging a submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeReport {
    pub submission_id: i64,
    pub verdict: FinalVerdict,
    pub cases: Vec<CaseReport>,
}

impl JudgeReport {
    /// Report for a submission that could not be judged at all
    pub fn system_error(submission_id: i64, message: impl Into<String>) -> Self {
        Self {
            submission_id,
            verdict: FinalVerdict::system_error(message),
            cases: Vec::new(),
        }
    }
}

/// `round(100 * passed / total)`, rounding halves up
pub fn score(passed: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    let passed = passed.min(total) as u64;
    let total = total as u64;
    ((200 * passed + total) / (2 * total)) as u32
}

/// Runs submissions against test cases with a fail-fast policy
#[derive(Clone)]
pub struct Judger {
    executor: Arc<dyn CodeExecutor>,
}

impl Judger {
    pub fn new(executor: Arc<dyn CodeExecutor>) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &Arc<dyn CodeExecutor> {
        &self.executor
    }

    /// Judge a submission. Never fails: problems become a `SYSTEM_ERROR` verdict.
    pub async fn judge(
        &self,
        submission: &Submission,
        problem: &Problem,
        testcases: &[TestCase],
    ) -> JudgeReport {
        let language = match submission.language.parse::<Language>() {
            Ok(language) => language,
            Err(e) => {
                warn!("Submission {} rejected: {}", submission.id, e);
                return JudgeReport::system_error(submission.id, e.to_string());
            }
        };

        if testcases.is_empty() {
            warn!(
                "Problem {} has no test cases, cannot judge submission {}",
                problem.id, submission.id
            );
            return JudgeReport::system_error(
                submission.id,
                format!("problem {} has no test cases", problem.id),
            );
        }

        let mut ordered: Vec<&TestCase> = testcases.iter().collect();
        ordered.sort_by_key(|tc| (tc.ordinal, tc.id));

        let total = ordered.len();
        let mut cases = Vec::with_capacity(total);
        let mut passed = 0usize;
        let mut total_time: Option<u64> = None;
        let mut peak_memory: Option<u64> = None;
        let mut failure: Option<(SubmissionStatus, Option<String>)> = None;

        for (index, tc) in ordered.iter().enumerate() {
            let request = RunRequest {
                submission_id: submission.id,
                case_index: index,
                language,
                source_code: submission.source_code.clone(),
                stdin: tc.input.clone(),
                time_limit_secs: problem.time_limit_secs,
                memory_limit_mb: problem.memory_limit_mb,
            };

            let result = self.executor.execute(&request).await;

            if let Some(t) = result.time_ms {
                total_time = Some(total_time.unwrap_or(0) + t);
            }
            if let Some(m) = result.memory_kb {
                peak_memory = Some(peak_memory.map_or(m, |prev| prev.max(m)));
            }

            let (verdict, message) = classify(tc, &result);
            debug!(
                "Submission {} testcase {} ({}/{}): {}",
                submission.id,
                tc.id,
                index + 1,
                total,
                verdict
            );

            cases.push(CaseReport {
                testcase_id: tc.id,
                verdict: Some(verdict),
                time_ms: result.time_ms,
                memory_kb: result.memory_kb,
                output: preview(&result.stdout),
            });

            if verdict == SubmissionStatus::Accepted {
                passed += 1;
            } else {
                failure = Some((verdict, message));
                break;
            }
        }

        for tc in ordered.iter().skip(cases.len()) {
            cases.push(CaseReport::skipped(tc.id));
        }

        let (status, error_message) = failure.unwrap_or((SubmissionStatus::Accepted, None));
        let score = if status.forces_zero_score() {
            0
        } else {
            score(passed, total)
        };

        info!(
            "Judge summary: submission_id={}, verdict={}, passed={}/{}, score={}, \
             time_ms={:?}, memory_kb={:?}",
            submission.id, status, passed, total, score, total_time, peak_memory
        );

        JudgeReport {
            submission_id: submission.id,
            verdict: FinalVerdict {
                status,
                score,
                execution_time_ms: total_time,
                memory_kb: peak_memory,
                error_message,
            },
            cases,
        }
    }
}

/// Verdict and diagnostic for one executed test case
fn classify(tc: &TestCase, result: &ExecutionResult) -> (SubmissionStatus, Option<String>) {
    match result.status.failure_verdict() {
        Some(verdict) => (verdict, result.diagnostic()),
        None => {
            let evaluation =
                checker::evaluate(Some(&tc.expected_output), Some(&result.stdout));
            let message = evaluation
                .message
                .map(|m| format!("testcase {}: {}", tc.id, m));
            (evaluation.verdict, message)
        }
    }
}

fn preview(output: &str) -> Option<String> {
    if output.is_empty() {
        None
    } else {
        Some(truncate_chars(output, OUTPUT_PREVIEW_CHARS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verdict::ExecutionStatus;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns scripted results by case index and counts invocations
    struct ScriptedExecutor {
        results: Vec<ExecutionResult>,
        calls: AtomicUsize,
    }

    impl ScriptedExecutor {
        fn new(results: Vec<ExecutionResult>) -> Arc<Self> {
            Arc::new(Self {
                results,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CodeExecutor for ScriptedExecutor {
        async fn execute(&self, request: &RunRequest) -> ExecutionResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.results[request.case_index].clone()
        }

        async fn cleanup_submission(&self, _submission_id: i64) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn ok(stdout: &str, time_ms: u64, memory_kb: u64) -> ExecutionResult {
        ExecutionResult {
            status: ExecutionStatus::Success,
            stdout: stdout.to_string(),
            stderr: String::new(),
            time_ms: Some(time_ms),
            memory_kb: Some(memory_kb),
            exit_code: Some(0),
        }
    }

    fn submission(language: &str) -> Submission {
        Submission::new(5, 1, 9, language, "int main() {}")
    }

    fn problem() -> Problem {
        Problem {
            id: 9,
            time_limit_secs: 1.0,
            memory_limit_mb: 256,
        }
    }

    fn cases(n: usize) -> Vec<TestCase> {
        (0..n)
            .map(|i| TestCase {
                id: 100 + i as i64,
                problem_id: 9,
                ordinal: i as u32,
                input: format!("{}", i),
                expected_output: "[0,1]".to_string(),
                is_sample: i == 0,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_all_cases_pass() {
        let executor = ScriptedExecutor::new(vec![
            ok("[0,1]\n", 10, 1000),
            ok("[0,1]", 20, 3000),
            ok("[0,1]\n", 5, 2000),
        ]);
        let judger = Judger::new(executor.clone());

        let report = judger.judge(&submission("cpp"), &problem(), &cases(3)).await;

        assert_eq!(report.verdict.status, SubmissionStatus::Accepted);
        assert_eq!(report.verdict.score, 100);
        assert_eq!(report.verdict.execution_time_ms, Some(35));
        assert_eq!(report.verdict.memory_kb, Some(3000));
        assert_eq!(report.verdict.error_message, None);
        assert_eq!(executor.calls(), 3);
    }

    #[tokio::test]
    async fn test_wrong_answer_stops_early() {
        let executor = ScriptedExecutor::new(vec![
            ok("[0,1]", 10, 1000),
            ok("[1,0]", 10, 1000),
            ok("[0,1]", 10, 1000),
        ]);
        let judger = Judger::new(executor.clone());

        let report = judger.judge(&submission("cpp"), &problem(), &cases(3)).await;

        assert_eq!(report.verdict.status, SubmissionStatus::WrongAnswer);
        assert_eq!(report.verdict.score, 33);
        assert_eq!(report.verdict.execution_time_ms, Some(20));
        assert_eq!(executor.calls(), 2);
        assert!(report.verdict.error_message.unwrap().contains("testcase 101"));
        assert!(report.cases[2].is_skipped());
        assert_eq!(report.cases[1].output.as_deref(), Some("[1,0]"));
    }

    #[tokio::test]
    async fn test_compilation_error_scores_zero() {
        let executor = ScriptedExecutor::new(vec![ExecutionResult::compilation_error(
            "main.cpp:1: error: expected ';'",
        )]);
        let judger = Judger::new(executor.clone());

        let report = judger.judge(&submission("cpp"), &problem(), &cases(4)).await;

        assert_eq!(report.verdict.status, SubmissionStatus::CompilationError);
        assert_eq!(report.verdict.score, 0);
        assert_eq!(report.verdict.execution_time_ms, None);
        assert_eq!(
            report.verdict.error_message.as_deref(),
            Some("main.cpp:1: error: expected ';'")
        );
        assert_eq!(executor.calls(), 1);
        assert_eq!(report.cases.iter().filter(|c| c.is_skipped()).count(), 3);
    }

    #[tokio::test]
    async fn test_fail_fast_partial_credit() {
        for (n, k) in [(5usize, 0usize), (5, 2), (5, 4), (7, 3), (3, 2)] {
            let mut results: Vec<ExecutionResult> = (0..n).map(|_| ok("[0,1]", 1, 1)).collect();
            results[k].status = ExecutionStatus::RuntimeError;
            let executor = ScriptedExecutor::new(results);
            let judger = Judger::new(executor.clone());

            let report = judger.judge(&submission("cpp"), &problem(), &cases(n)).await;

            assert_eq!(report.verdict.status, SubmissionStatus::RuntimeError);
            assert_eq!(executor.calls(), k + 1);
            assert_eq!(report.verdict.score, score(k, n));
        }
    }

    #[tokio::test]
    async fn test_system_error_forces_zero() {
        let executor = ScriptedExecutor::new(vec![
            ok("[0,1]", 1, 1),
            ok("[0,1]", 1, 1),
            ExecutionResult::system_error("sandbox unavailable"),
        ]);
        let judger = Judger::new(executor.clone());

        let report = judger.judge(&submission("cpp"), &problem(), &cases(3)).await;

        assert_eq!(report.verdict.status, SubmissionStatus::SystemError);
        assert_eq!(report.verdict.score, 0);
        assert_eq!(
            report.verdict.error_message.as_deref(),
            Some("sandbox unavailable")
        );
    }

    #[tokio::test]
    async fn test_unsupported_language_never_runs() {
        let executor = ScriptedExecutor::new(vec![]);
        let judger = Judger::new(executor.clone());

        let report = judger
            .judge(&submission("brainfuck"), &problem(), &cases(2))
            .await;

        assert_eq!(report.verdict.status, SubmissionStatus::SystemError);
        assert!(report
            .verdict
            .error_message
            .unwrap()
            .contains("unsupported language"));
        assert_eq!(executor.calls(), 0);
    }

    #[tokio::test]
    async fn test_no_testcases_is_system_error() {
        let executor = ScriptedExecutor::new(vec![]);
        let judger = Judger::new(executor.clone());

        let report = judger.judge(&submission("python"), &problem(), &[]).await;

        assert_eq!(report.verdict.status, SubmissionStatus::SystemError);
        assert_eq!(report.verdict.score, 0);
        assert_eq!(executor.calls(), 0);
    }

    #[tokio::test]
    async fn test_stable_order_by_ordinal_then_id() {
        let executor = ScriptedExecutor::new(vec![
            ok("[0,1]", 1, 1),
            ok("wrong", 1, 1),
            ok("[0,1]", 1, 1),
        ]);
        let judger = Judger::new(executor.clone());
        let mut testcases = cases(3);
        testcases[0].ordinal = 2;
        testcases[1].ordinal = 0;
        testcases[2].ordinal = 0;

        let report = judger.judge(&submission("cpp"), &problem(), &testcases).await;

        let order: Vec<i64> = report.cases.iter().map(|c| c.testcase_id).collect();
        assert_eq!(order, vec![101, 102, 100]);
        assert_eq!(report.cases[1].verdict, Some(SubmissionStatus::WrongAnswer));
    }

    #[test]
    fn test_score_rounding() {
        assert_eq!(score(1, 3), 33);
        assert_eq!(score(2, 3), 67);
        assert_eq!(score(1, 2), 50);
        assert_eq!(score(1, 8), 13);
        assert_eq!(score(0, 5), 0);
        assert_eq!(score(5, 5), 100);
        assert_eq!(score(0, 0), 0);
    }

    #[test]
    fn test_output_preview_is_truncated() {
        let long = "x".repeat(OUTPUT_PREVIEW_CHARS + 10);
        let text = preview(&long).unwrap();
        assert_eq!(text.chars().count(), OUTPUT_PREVIEW_CHARS + 3);
        assert_eq!(preview(""), None);
    }
}

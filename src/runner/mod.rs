//! Runner module - execution of untrusted submissions
//!
//! This module provides a unified interface for running a submission against
//! one input:
//! - `SandboxExecutor`: the production adapter driving the container sandbox
//! - `parser`: turns raw sandbox output into an `ExecutionResult`
//!
//! The runner module does NOT:
//! - Compare outputs or determine the submission verdict
//! - Touch persistence

pub mod parser;
pub mod sandboxed;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::languages::Language;
use crate::verdict::ExecutionStatus;

/// One execution of a submission against one test case input
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub submission_id: i64,
    /// Index of the test case in judging order
    pub case_index: usize,
    pub language: Language,
    pub source_code: String,
    pub stdin: String,
    /// Time limit in seconds, before language adjustment
    pub time_limit_secs: f64,
    /// Memory limit in MB, before language adjustment
    pub memory_limit_mb: u32,
}

/// Outcome of one sandbox run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub status: ExecutionStatus,
    /// Program output, with everything the sandbox added stripped
    pub stdout: String,
    pub stderr: String,
    /// Execution time in milliseconds; `None` if the program never ran
    pub time_ms: Option<u64>,
    /// Peak memory in KB; `None` if unknown or the program never ran
    pub memory_kb: Option<u64>,
    pub exit_code: Option<i32>,
}

impl ExecutionResult {
    /// Infrastructure failure before or around the run
    pub fn system_error(message: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::SystemError,
            stdout: String::new(),
            stderr: message.into(),
            time_ms: None,
            memory_kb: None,
            exit_code: None,
        }
    }

    /// The source did not build; the program never ran
    pub fn compilation_error(diagnostics: impl Into<String>) -> Self {
        Self {
            status: ExecutionStatus::CompilationError,
            stdout: String::new(),
            stderr: diagnostics.into(),
            time_ms: None,
            memory_kb: None,
            exit_code: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Diagnostic text worth showing to the user, if any
    pub fn diagnostic(&self) -> Option<String> {
        let text = self.stderr.trim();
        if text.is_empty() {
            None
        } else {
            Some(truncate_chars(text, MAX_DIAGNOSTIC_CHARS))
        }
    }
}

/// Upper bound for diagnostic text stored with a submission
pub const MAX_DIAGNOSTIC_CHARS: usize = 16 * 1024;

pub(crate) fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Executes submissions. Implementations never fail: every problem becomes
/// a classification inside the returned result.
#[async_trait]
pub trait CodeExecutor: Send + Sync {
    async fn execute(&self, request: &RunRequest) -> ExecutionResult;

    /// Destroy every workspace and container left by a submission's runs
    async fn cleanup_submission(&self, submission_id: i64) -> anyhow::Result<()>;
}

// Re-exports
pub use sandboxed::SandboxExecutor;

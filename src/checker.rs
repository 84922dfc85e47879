//! Output checker
//!
//! Compares a program's output against the expected answer. Comparison is
//! exact after whitespace normalization: no numeric tolerance and no
//! order-insensitive matching.

use crate::runner::truncate_chars;
use crate::verdict::SubmissionStatus;

/// Longest line excerpt quoted in a mismatch message
const EXCERPT_CHARS: usize = 64;

/// Result of comparing one output
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// `Accepted` or `WrongAnswer`
    pub verdict: SubmissionStatus,
    /// Where the outputs diverge; `None` when accepted
    pub message: Option<String>,
}

impl Evaluation {
    fn accepted() -> Self {
        Self {
            verdict: SubmissionStatus::Accepted,
            message: None,
        }
    }

    fn wrong_answer(message: String) -> Self {
        Self {
            verdict: SubmissionStatus::WrongAnswer,
            message: Some(message),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.verdict == SubmissionStatus::Accepted
    }
}

/// Normalize line endings and whitespace.
///
/// CRLF and CR become LF, trailing whitespace is stripped from each line and
/// leading/trailing whitespace from the whole text.
pub fn normalize(text: &str) -> String {
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    unified
        .split('\n')
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Compare expected and actual output
pub fn evaluate(expected: Option<&str>, actual: Option<&str>) -> Evaluation {
    let (expected, actual) = match (expected, actual) {
        (None, None) => return Evaluation::accepted(),
        (Some(_), None) => return Evaluation::wrong_answer("no output produced".to_string()),
        (None, Some(_)) => return Evaluation::wrong_answer("no expected output".to_string()),
        (Some(expected), Some(actual)) => (normalize(expected), normalize(actual)),
    };

    if expected == actual {
        return Evaluation::accepted();
    }

    Evaluation::wrong_answer(describe_mismatch(&expected, &actual))
}

/// Point at the first line where the normalized outputs differ
fn describe_mismatch(expected: &str, actual: &str) -> String {
    let expected_lines: Vec<&str> = expected.lines().collect();
    let actual_lines: Vec<&str> = actual.lines().collect();

    for (idx, (e, a)) in expected_lines.iter().zip(actual_lines.iter()).enumerate() {
        if e != a {
            return format!(
                "line {}: expected \"{}\", found \"{}\"",
                idx + 1,
                truncate_chars(e, EXCERPT_CHARS),
                truncate_chars(a, EXCERPT_CHARS)
            );
        }
    }

    format!(
        "expected {} lines, found {}",
        expected_lines.len(),
        actual_lines.len()
    )
}

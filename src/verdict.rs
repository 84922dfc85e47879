use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a submission.
///
/// `Pending -> Queued -> Running -> <terminal>`. Once a terminal status is
/// reached the record never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionStatus {
    Pending,
    Queued,
    Running,
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    CompilationError,
    PresentationError,
    SystemError,
}

impl SubmissionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            SubmissionStatus::Pending | SubmissionStatus::Queued | SubmissionStatus::Running
        )
    }

    /// Position in the lifecycle; every terminal status shares the last stage.
    fn stage(&self) -> u8 {
        match self {
            SubmissionStatus::Pending => 0,
            SubmissionStatus::Queued => 1,
            SubmissionStatus::Running => 2,
            _ => 3,
        }
    }

    /// Whether moving from `self` to `next` keeps the lifecycle monotonic.
    pub fn can_transition_to(&self, next: SubmissionStatus) -> bool {
        !self.is_terminal() && next.stage() > self.stage()
    }

    /// Verdicts that mean the program as a whole could not be evaluated.
    pub fn forces_zero_score(&self) -> bool {
        matches!(
            self,
            SubmissionStatus::CompilationError | SubmissionStatus::SystemError
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "PENDING",
            SubmissionStatus::Queued => "QUEUED",
            SubmissionStatus::Running => "RUNNING",
            SubmissionStatus::Accepted => "ACCEPTED",
            SubmissionStatus::WrongAnswer => "WRONG_ANSWER",
            SubmissionStatus::TimeLimitExceeded => "TIME_LIMIT_EXCEEDED",
            SubmissionStatus::MemoryLimitExceeded => "MEMORY_LIMIT_EXCEEDED",
            SubmissionStatus::RuntimeError => "RUNTIME_ERROR",
            SubmissionStatus::CompilationError => "COMPILATION_ERROR",
            SubmissionStatus::PresentationError => "PRESENTATION_ERROR",
            SubmissionStatus::SystemError => "SYSTEM_ERROR",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a single sandbox run, before output comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Success,
    CompilationError,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    SystemError,
}

impl ExecutionStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionStatus::Success)
    }

    /// Submission verdict for a run that did not succeed.
    ///
    /// `Success` has no direct verdict: it still needs output comparison.
    pub fn failure_verdict(&self) -> Option<SubmissionStatus> {
        match self {
            ExecutionStatus::Success => None,
            ExecutionStatus::CompilationError => Some(SubmissionStatus::CompilationError),
            ExecutionStatus::TimeLimitExceeded => Some(SubmissionStatus::TimeLimitExceeded),
            ExecutionStatus::MemoryLimitExceeded => Some(SubmissionStatus::MemoryLimitExceeded),
            ExecutionStatus::RuntimeError => Some(SubmissionStatus::RuntimeError),
            ExecutionStatus::SystemError => Some(SubmissionStatus::SystemError),
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Success => "SUCCESS",
            ExecutionStatus::CompilationError => "COMPILATION_ERROR",
            ExecutionStatus::TimeLimitExceeded => "TIME_LIMIT_EXCEEDED",
            ExecutionStatus::MemoryLimitExceeded => "MEMORY_LIMIT_EXCEEDED",
            ExecutionStatus::RuntimeError => "RUNTIME_ERROR",
            ExecutionStatus::SystemError => "SYSTEM_ERROR",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_is_monotonic() {
        use SubmissionStatus::*;

        assert!(Pending.can_transition_to(Queued));
        assert!(Queued.can_transition_to(Running));
        assert!(Running.can_transition_to(WrongAnswer));
        assert!(Queued.can_transition_to(SystemError));

        assert!(!Running.can_transition_to(Queued));
        assert!(!Running.can_transition_to(Running));
        assert!(!Accepted.can_transition_to(SystemError));
        assert!(!SystemError.can_transition_to(Running));
    }

    #[test]
    fn test_zero_score_verdicts() {
        assert!(SubmissionStatus::CompilationError.forces_zero_score());
        assert!(SubmissionStatus::SystemError.forces_zero_score());
        assert!(!SubmissionStatus::WrongAnswer.forces_zero_score());
        assert!(!SubmissionStatus::TimeLimitExceeded.forces_zero_score());
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&SubmissionStatus::TimeLimitExceeded).unwrap();
        assert_eq!(json, "\"TIME_LIMIT_EXCEEDED\"");
        assert_eq!(SubmissionStatus::WrongAnswer.to_string(), "WRONG_ANSWER");
        assert_eq!(
            ExecutionStatus::RuntimeError.failure_verdict(),
            Some(SubmissionStatus::RuntimeError)
        );
        assert_eq!(ExecutionStatus::Success.failure_verdict(), None);
    }
}

//! Sandbox output parser
//!
//! The sandbox reports on a run in two ways:
//! - an optional `meta.txt` in the run's metadata mount with `key:value` lines
//!   (`time_ms`, `memory_kb`, `status`); each key present there wins
//! - a trailer of marker lines on stdout (`JUDGE_TIME_MS:`, `JUDGE_MEMORY_KB:`,
//!   `JUDGE_STATUS:`), with the program's own stdout fenced by
//!   `JUDGE_OUTPUT_BEGIN` / `JUDGE_OUTPUT_END`
//!
//! Only stdout lines outside the fenced region count as markers. Stderr is
//! passed through from the program and never read for markers, and the
//! metadata mount is not writable by the program. When the same timing
//! marker appears twice the first reading is kept.

use std::collections::HashSet;
use std::time::Duration;

use super::ExecutionResult;
use crate::verdict::ExecutionStatus;

pub const TIME_MARKER: &str = "JUDGE_TIME_MS:";
pub const MEMORY_MARKER: &str = "JUDGE_MEMORY_KB:";
pub const STATUS_MARKER: &str = "JUDGE_STATUS:";
pub const OUTPUT_BEGIN: &str = "JUDGE_OUTPUT_BEGIN";
pub const OUTPUT_END: &str = "JUDGE_OUTPUT_END";

/// Exit code of `timeout(1)` and of the run script when the CPU limit is hit
pub const EXIT_TIMEOUT: i32 = 124;
/// SIGKILL exit code, used by the container runtime for OOM kills
pub const EXIT_KILLED: i32 = 137;

/// Raw telemetry of one finished sandbox run
#[derive(Debug, Clone, Default)]
pub struct RawExecution {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Wall-clock time measured by the supervisor
    pub elapsed: Duration,
    /// Contents of the out-of-band metadata file, if the sandbox wrote one
    pub meta: Option<String>,
}

/// Values recovered from markers or the metadata file
#[derive(Debug, Default)]
struct Signals {
    time_ms: Option<u64>,
    memory_kb: Option<u64>,
    statuses: HashSet<String>,
}

impl Signals {
    fn absorb(&mut self, key: &str, value: &str) {
        match key {
            "time_ms" => {
                if self.time_ms.is_none() {
                    self.time_ms = value.parse::<u64>().ok();
                }
            }
            "memory_kb" => {
                if let Ok(m) = value.parse::<u64>() {
                    self.memory_kb = Some(self.memory_kb.map_or(m, |prev| prev.max(m)));
                }
            }
            "status" => {
                self.statuses.insert(value.to_uppercase());
            }
            _ => {}
        }
    }

    fn has(&self, status: &str) -> bool {
        self.statuses.contains(status)
    }

    /// Per-key merge: values present here win, `fallback` fills the gaps
    fn or(self, fallback: Signals) -> Signals {
        Signals {
            time_ms: self.time_ms.or(fallback.time_ms),
            memory_kb: self.memory_kb.or(fallback.memory_kb),
            statuses: if self.statuses.is_empty() {
                fallback.statuses
            } else {
                self.statuses
            },
        }
    }
}

/// Parse a marker line, returning the signal key and value
fn parse_marker(line: &str) -> Option<(&'static str, &str)> {
    let line = line.trim();
    if let Some(v) = line.strip_prefix(TIME_MARKER) {
        Some(("time_ms", v.trim()))
    } else if let Some(v) = line.strip_prefix(MEMORY_MARKER) {
        Some(("memory_kb", v.trim()))
    } else if let Some(v) = line.strip_prefix(STATUS_MARKER) {
        Some(("status", v.trim()))
    } else {
        None
    }
}

/// Parse metadata file content (`key:value` per line)
fn parse_meta(content: &str) -> Signals {
    let mut signals = Signals::default();
    for line in content.lines() {
        let parts: Vec<&str> = line.splitn(2, ':').collect();
        if parts.len() != 2 {
            continue;
        }
        signals.absorb(parts[0].trim(), parts[1].trim());
    }
    signals
}

/// Split the sandbox stdout into program output and trailer signals
fn split_stream(stdout: &str) -> (String, Signals) {
    let mut signals = Signals::default();
    let mut region = Vec::new();
    let mut unfenced = Vec::new();
    let mut found_region = false;
    let mut inside = false;

    for line in stdout.lines() {
        if inside {
            if line.trim_end() == OUTPUT_END {
                inside = false;
            } else {
                region.push(line);
            }
            continue;
        }

        if line.trim_end() == OUTPUT_BEGIN {
            inside = true;
            found_region = true;
        } else if let Some((key, value)) = parse_marker(line) {
            signals.absorb(key, value);
        } else {
            unfenced.push(line);
        }
    }

    let lines = if found_region { region } else { unfenced };
    let mut output = lines.join("\n");
    if !output.is_empty() {
        output.push('\n');
    }
    (output, signals)
}

/// Drop marker lines, keeping what the program or its tools wrote
pub(crate) fn strip_markers(text: &str) -> String {
    text.lines()
        .filter(|line| parse_marker(line).is_none())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Whether a compile step's output carries a compiler-error marker
pub fn has_compilation_error_marker(stdout: &str, stderr: &str) -> bool {
    stdout.lines().chain(stderr.lines()).any(|line| {
        matches!(
            parse_marker(line),
            Some(("status", value)) if is_compile_failure(&value.to_uppercase())
        )
    })
}

fn is_compile_failure(status: &str) -> bool {
    status == "COMPILATION_ERROR" || status == "SYNTAX_ERROR"
}

/// Classify a raw sandbox run. The first matching rule wins.
fn classify(signals: &Signals, exit_code: i32) -> ExecutionStatus {
    if signals.has("COMPILATION_ERROR") || signals.has("SYNTAX_ERROR") {
        ExecutionStatus::CompilationError
    } else if exit_code == EXIT_TIMEOUT || signals.has("TIME_LIMIT_EXCEEDED") {
        ExecutionStatus::TimeLimitExceeded
    } else if exit_code == EXIT_KILLED || signals.has("MEMORY_LIMIT_EXCEEDED") {
        ExecutionStatus::MemoryLimitExceeded
    } else if exit_code != 0 || signals.has("RUNTIME_ERROR") {
        ExecutionStatus::RuntimeError
    } else if signals.has("SUCCESS") {
        ExecutionStatus::Success
    } else {
        ExecutionStatus::SystemError
    }
}

/// Turn raw sandbox telemetry into an `ExecutionResult`
pub fn parse(raw: &RawExecution) -> ExecutionResult {
    let (stdout, stream_signals) = split_stream(&raw.stdout);

    let signals = match raw.meta.as_deref() {
        Some(meta) => parse_meta(meta).or(stream_signals),
        None => stream_signals,
    };

    let status = classify(&signals, raw.exit_code);

    let mut stderr = strip_markers(&raw.stderr);
    if status == ExecutionStatus::SystemError {
        stderr = if stderr.trim().is_empty() {
            "unknown execution result".to_string()
        } else {
            format!("unknown execution result: {}", stderr.trim())
        };
    }

    let time_ms = signals
        .time_ms
        .unwrap_or_else(|| raw.elapsed.as_millis() as u64);

    ExecutionResult {
        status,
        stdout,
        stderr,
        time_ms: Some(time_ms),
        memory_kb: signals.memory_kb,
        exit_code: Some(raw.exit_code),
    }
}

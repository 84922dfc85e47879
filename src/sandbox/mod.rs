//! Sandbox module - container runtime and workspace management
//!
//! This module handles:
//! - Per-run workspace creation and removal
//! - Launching, killing and listing sandbox containers
//!
//! The sandbox module does NOT:
//! - Interpret exit codes or output (that's the runner's job)
//! - Compare outputs or score submissions

pub mod runtime;
pub mod workspace;

pub use runtime::{DockerRuntime, Invocation, ProcessOutput, SandboxRuntime};
pub use workspace::{ExecutionWorkspace, INPUT_FILE, META_FILE};

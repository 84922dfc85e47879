//! Container runtime wrapper
//!
//! Thin layer over the container CLI used as the sandbox. Each invocation
//! runs in a fresh, named, network-less container with the run's workspace
//! mounted at `/workspace` and, for runs, its metadata directory at
//! `META_MOUNT`. The container itself enforces the memory ceiling; the time
//! ceiling is enforced by the judge scripts inside the image.

use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{SandboxError, SandboxResult};

/// Script inside the sandbox image that builds a source file
pub const COMPILE_SCRIPT: &str = "/judge/compile.sh";
/// Script inside the sandbox image that runs a (built) source file
pub const RUN_SCRIPT: &str = "/judge/run.sh";
/// Mount point of the run's metadata directory inside the container
pub const META_MOUNT: &str = "/judge/meta";

/// Exit codes the container CLI uses for its own failures: daemon or
/// container setup error (125), command not executable (126), command not
/// found (127)
const RUNTIME_FAILURE_CODES: [i32; 3] = [125, 126, 127];

/// One container launch
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Container name; unique among concurrently running invocations
    pub container_name: String,
    /// Host directory mounted as the container's working directory
    pub workspace: PathBuf,
    /// Host directory mounted at `META_MOUNT`, outside the program's reach
    pub meta_dir: Option<PathBuf>,
    pub image: String,
    /// Command executed inside the container
    pub command: Vec<String>,
    /// Hard memory ceiling in MB
    pub memory_limit_mb: u32,
}

/// Raw process output of one invocation
#[derive(Debug, Clone, Default)]
pub struct ProcessOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code; 128 + signal number when the process was killed by a signal
    pub exit_code: i32,
}

/// Sandbox runtime interface
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Launch an invocation and wait for it to exit
    async fn launch(&self, invocation: &Invocation) -> SandboxResult<ProcessOutput>;

    /// Kill and remove a container by name. Unknown names are not an error.
    async fn kill(&self, container_name: &str) -> SandboxResult<()>;

    /// Names of existing containers starting with `prefix`
    async fn list(&self, prefix: &str) -> SandboxResult<Vec<String>>;
}

/// Docker-compatible CLI runtime
pub struct DockerRuntime {
    binary: String,
}

impl DockerRuntime {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Arguments for `docker run`
    pub fn run_args(invocation: &Invocation) -> Vec<String> {
        let memory = format!("{}m", invocation.memory_limit_mb);
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            invocation.container_name.clone(),
            "--network".to_string(),
            "none".to_string(),
            "--memory".to_string(),
            memory.clone(),
            "--memory-swap".to_string(),
            memory,
            "--pids-limit".to_string(),
            "64".to_string(),
            "--cpus".to_string(),
            "1".to_string(),
            "--read-only".to_string(),
            "--tmpfs".to_string(),
            "/tmp:rw,size=64m".to_string(),
            "--volume".to_string(),
            format!("{}:/workspace:rw", invocation.workspace.display()),
            "--workdir".to_string(),
            "/workspace".to_string(),
            "--label".to_string(),
            "contest-judge=sandbox".to_string(),
        ];
        if let Some(meta_dir) = &invocation.meta_dir {
            args.push("--volume".to_string());
            args.push(format!("{}:{}:rw", meta_dir.display(), META_MOUNT));
        }
        args.push(invocation.image.clone());
        args.extend(invocation.command.iter().cloned());
        args
    }

    async fn command_output(&self, args: &[&str]) -> SandboxResult<std::process::Output> {
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| SandboxError::Launch {
                program: self.binary.clone(),
                source,
            })
    }
}

#[async_trait]
impl SandboxRuntime for DockerRuntime {
    async fn launch(&self, invocation: &Invocation) -> SandboxResult<ProcessOutput> {
        let args = Self::run_args(invocation);
        debug!("Running {} with args: {:?}", self.binary, args);

        let child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SandboxError::Launch {
                program: self.binary.clone(),
                source,
            })?;

        let guard = child.id().map(ProcessGroupGuard::new);

        let output = child
            .wait_with_output()
            .await
            .map_err(|source| SandboxError::Launch {
                program: self.binary.clone(),
                source,
            })?;

        if let Some(guard) = guard {
            guard.disarm();
        }

        let exit_code = match (output.status.code(), output.status.signal()) {
            (Some(code), _) => code,
            (None, Some(signal)) => 128 + signal,
            (None, None) => -1,
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        // The judge scripts always print a trailer, so a silent stdout with
        // one of these codes means the container never ran.
        if RUNTIME_FAILURE_CODES.contains(&exit_code) && stdout.trim().is_empty() {
            let message = match stderr.trim() {
                "" => format!("exit code {}", exit_code),
                text => text.to_string(),
            };
            return Err(SandboxError::Runtime {
                command: format!("{} run {}", self.binary, invocation.container_name),
                message,
            });
        }

        Ok(ProcessOutput {
            stdout,
            stderr,
            exit_code,
        })
    }

    async fn kill(&self, container_name: &str) -> SandboxResult<()> {
        let output = self.command_output(&["rm", "--force", container_name]).await?;

        if output.status.success() {
            info!("Removed sandbox container {}", container_name);
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains("No such container") {
            return Ok(());
        }

        Err(SandboxError::Runtime {
            command: format!("{} rm --force {}", self.binary, container_name),
            message: stderr.trim().to_string(),
        })
    }

    async fn list(&self, prefix: &str) -> SandboxResult<Vec<String>> {
        let filter = format!("name=^{}", prefix);
        let output = self
            .command_output(&["ps", "--all", "--filter", &filter, "--format", "{{.Names}}"])
            .await?;

        if !output.status.success() {
            return Err(SandboxError::Runtime {
                command: format!("{} ps --all --filter {}", self.binary, filter),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        // The name filter is a substring/regex match; keep exact prefix matches only.
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|name| name.starts_with(prefix))
            .map(str::to_string)
            .collect())
    }
}

/// Kills the runtime client's whole process group unless disarmed.
///
/// The launch future is dropped when the supervisory timeout fires; the group
/// kill takes any helper processes down with the client.
struct ProcessGroupGuard {
    pgid: Option<Pid>,
}

impl ProcessGroupGuard {
    fn new(pid: u32) -> Self {
        Self {
            pgid: Some(Pid::from_raw(pid as i32)),
        }
    }

    fn disarm(mut self) {
        self.pgid = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            match killpg(pgid, Signal::SIGKILL) {
                Ok(()) => debug!("Killed process group {}", pgid),
                Err(nix::errno::Errno::ESRCH) => {}
                Err(e) => warn!("Failed to kill process group {}: {}", pgid, e),
            }
        }
    }
}

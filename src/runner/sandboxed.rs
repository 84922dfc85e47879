//! Sandboxed executor using the container runtime
//!
//! Executes untrusted user code in a fresh container per run. Each run owns a
//! workspace directory and a container that share one deterministic name, and
//! both are torn down on every exit path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::parser::{self, RawExecution};
use super::{CodeExecutor, ExecutionResult, RunRequest};
use crate::config::SandboxConfig;
use crate::error::{SandboxError, SandboxResult};
use crate::languages::{ExecutionStrategy, Language, LanguageProfile, LanguageProfiles};
use crate::sandbox::runtime::{COMPILE_SCRIPT, RUN_SCRIPT};
use crate::sandbox::workspace::{self, compile_name, run_name, submission_prefix};
use crate::sandbox::{
    ExecutionWorkspace, Invocation, ProcessOutput, SandboxRuntime, INPUT_FILE,
};
use crate::verdict::ExecutionStatus;

/// How a supervised invocation ended
enum Supervised {
    Exited(ProcessOutput),
    /// Still running at the deadline; the container has been killed
    TimedOut(Duration),
}

/// Executor that runs submissions inside the container sandbox
pub struct SandboxExecutor {
    runtime: Arc<dyn SandboxRuntime>,
    profiles: LanguageProfiles,
    config: SandboxConfig,
}

impl SandboxExecutor {
    pub fn new(
        runtime: Arc<dyn SandboxRuntime>,
        profiles: LanguageProfiles,
        config: SandboxConfig,
    ) -> Self {
        Self {
            runtime,
            profiles,
            config,
        }
    }

    /// Remove containers and workspaces left behind by a previous worker.
    ///
    /// Run once at startup, before any submission is taken from the queue.
    pub async fn sweep_orphans(&self) -> anyhow::Result<usize> {
        let prefix = format!("{}-", self.config.container_prefix);
        let removed = self.destroy_prefix(&prefix).await?;
        if removed > 0 {
            info!("Swept {} orphaned sandbox resources", removed);
        }
        Ok(removed)
    }

    /// Execute one run and surface every infrastructure failure as an error
    async fn run(&self, request: &RunRequest) -> SandboxResult<ExecutionResult> {
        let profile = self
            .profiles
            .get(request.language)
            .ok_or_else(|| SandboxError::UnsupportedLanguage(request.language.to_string()))?;

        let name = run_name(
            &self.config.container_prefix,
            request.submission_id,
            request.case_index,
        );
        let workspace = ExecutionWorkspace::create(&self.config.workspace_root, &name).await?;

        let result = self.run_in(&workspace, request, profile).await;
        self.teardown(&workspace, request.language).await;
        result
    }

    async fn run_in(
        &self,
        workspace: &ExecutionWorkspace,
        request: &RunRequest,
        profile: &LanguageProfile,
    ) -> SandboxResult<ExecutionResult> {
        let source_file = request.language.source_file();
        workspace.write_file(source_file, &request.source_code).await?;
        workspace.write_file(INPUT_FILE, &request.stdin).await?;

        if request.language.strategy() == ExecutionStrategy::Compiled {
            if let Some(failure) = self.compile(workspace, profile, source_file).await? {
                return Ok(failure);
            }
        }

        let time_limit = profile.calculate_time_limit(request.time_limit_secs);
        let memory_limit = profile.calculate_memory_limit(request.memory_limit_mb);

        let invocation = Invocation {
            container_name: workspace.name().to_string(),
            workspace: workspace.path().to_path_buf(),
            meta_dir: Some(workspace.meta_dir().to_path_buf()),
            image: profile.image.clone(),
            command: vec![
                RUN_SCRIPT.to_string(),
                source_file.to_string(),
                INPUT_FILE.to_string(),
                time_limit.to_string(),
            ],
            memory_limit_mb: memory_limit,
        };

        debug!(
            "Running {} ({}, {}s, {}MB)",
            workspace.name(),
            request.language,
            time_limit,
            memory_limit
        );

        let started = Instant::now();
        match self.supervise(&invocation, time_limit).await? {
            Supervised::Exited(output) => {
                let meta = workspace.read_meta().await?;
                Ok(parser::parse(&RawExecution {
                    stdout: output.stdout,
                    stderr: output.stderr,
                    exit_code: output.exit_code,
                    elapsed: started.elapsed(),
                    meta,
                }))
            }
            Supervised::TimedOut(elapsed) => Ok(ExecutionResult {
                status: ExecutionStatus::TimeLimitExceeded,
                stdout: String::new(),
                stderr: format!("killed after {} ms", elapsed.as_millis()),
                time_ms: Some(elapsed.as_millis() as u64),
                memory_kb: None,
                exit_code: None,
            }),
        }
    }

    /// Build the source. Returns `Some` with a compilation error when the
    /// program must not be run.
    async fn compile(
        &self,
        workspace: &ExecutionWorkspace,
        profile: &LanguageProfile,
        source_file: &str,
    ) -> SandboxResult<Option<ExecutionResult>> {
        let invocation = Invocation {
            container_name: compile_name(workspace.name()),
            workspace: workspace.path().to_path_buf(),
            meta_dir: None,
            image: profile.image.clone(),
            command: vec![COMPILE_SCRIPT.to_string(), source_file.to_string()],
            memory_limit_mb: self.config.compile_memory_limit_mb,
        };

        let output = match self
            .supervise(&invocation, self.config.compile_time_limit_secs)
            .await?
        {
            Supervised::Exited(output) => output,
            Supervised::TimedOut(elapsed) => {
                return Ok(Some(ExecutionResult::compilation_error(format!(
                    "compilation timed out after {} ms",
                    elapsed.as_millis()
                ))));
            }
        };

        if output.exit_code != 0
            || parser::has_compilation_error_marker(&output.stdout, &output.stderr)
        {
            debug!(
                "Compilation failed for {} (exit {})",
                workspace.name(),
                output.exit_code
            );
            let mut diagnostics = parser::strip_markers(&output.stderr);
            let stdout = parser::strip_markers(&output.stdout);
            if !stdout.trim().is_empty() {
                if !diagnostics.is_empty() {
                    diagnostics.push('\n');
                }
                diagnostics.push_str(&stdout);
            }
            return Ok(Some(ExecutionResult::compilation_error(diagnostics)));
        }

        Ok(None)
    }

    /// Launch under the supervisory deadline: `limit + grace`.
    async fn supervise(
        &self,
        invocation: &Invocation,
        limit_secs: f64,
    ) -> SandboxResult<Supervised> {
        let deadline = secs(limit_secs) + self.config.grace_period;
        let started = Instant::now();

        match timeout(deadline, self.runtime.launch(invocation)).await {
            Ok(output) => Ok(Supervised::Exited(output?)),
            Err(_) => {
                warn!(
                    "Sandbox {} still running after {:?}, killing",
                    invocation.container_name, deadline
                );
                if let Err(e) = self.runtime.kill(&invocation.container_name).await {
                    error!(
                        "Failed to kill timed out sandbox {}: {}",
                        invocation.container_name, e
                    );
                }
                Ok(Supervised::TimedOut(started.elapsed()))
            }
        }
    }

    async fn teardown(&self, workspace: &ExecutionWorkspace, language: Language) {
        let mut names = vec![workspace.name().to_string()];
        if language.strategy() == ExecutionStrategy::Compiled {
            names.push(compile_name(workspace.name()));
        }

        for name in names {
            if let Err(e) = self.runtime.kill(&name).await {
                warn!("Failed to remove sandbox {}: {}", name, e);
            }
        }

        if let Err(e) = workspace.cleanup().await {
            warn!("Failed to clean up workspace {}: {}", workspace.name(), e);
        }
    }

    /// Kill every container and remove every workspace whose name starts with `prefix`
    async fn destroy_prefix(&self, prefix: &str) -> anyhow::Result<usize> {
        let mut removed = 0;
        let mut failures = Vec::new();

        match self.runtime.list(prefix).await {
            Ok(names) => {
                for name in names {
                    match self.runtime.kill(&name).await {
                        Ok(()) => removed += 1,
                        Err(e) => failures.push(e.to_string()),
                    }
                }
            }
            Err(e) => failures.push(e.to_string()),
        }

        let root = &self.config.workspace_root;
        match workspace::list_workspaces(root, prefix).await {
            Ok(names) => {
                for name in names {
                    match workspace::remove_workspace(root, &name).await {
                        Ok(()) => removed += 1,
                        Err(e) => failures.push(e.to_string()),
                    }
                }
            }
            Err(e) => failures.push(e.to_string()),
        }

        if !failures.is_empty() {
            anyhow::bail!("cleanup of {}* incomplete: {}", prefix, failures.join("; "));
        }
        Ok(removed)
    }
}

#[async_trait]
impl CodeExecutor for SandboxExecutor {
    async fn execute(&self, request: &RunRequest) -> ExecutionResult {
        match self.run(request).await {
            Ok(result) => result,
            Err(e) => {
                error!(
                    "Sandbox run failed for submission {} case {}: {}",
                    request.submission_id, request.case_index, e
                );
                ExecutionResult::system_error(e.to_string())
            }
        }
    }

    async fn cleanup_submission(&self, submission_id: i64) -> anyhow::Result<()> {
        let prefix = submission_prefix(&self.config.container_prefix, submission_id);
        let removed = self
            .destroy_prefix(&prefix)
            .await
            .with_context(|| format!("Failed to clean up submission {}", submission_id))?;
        if removed > 0 {
            debug!(
                "Removed {} leftover sandbox resources of submission {}",
                removed, submission_id
            );
        }
        Ok(())
    }
}

/// Seconds as a `Duration`; negative or non-finite limits become zero.
fn secs(limit: f64) -> Duration {
    Duration::try_from_secs_f64(limit).unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{DockerRuntime, META_FILE};
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tokio_test::assert_ok;

    #[derive(Clone)]
    enum Behavior {
        Exit {
            stdout: &'static str,
            exit_code: i32,
            meta: Option<&'static str>,
        },
        Hang,
    }

    /// Scripted runtime that tracks which containers are alive
    struct FakeRuntime {
        compile: Behavior,
        run: Behavior,
        alive: Mutex<HashSet<String>>,
        launched: Mutex<Vec<String>>,
        /// Metadata the program itself writes into its workspace
        planted: Option<&'static str>,
    }

    impl FakeRuntime {
        fn new(compile: Behavior, run: Behavior) -> Self {
            Self {
                compile,
                run,
                alive: Mutex::new(HashSet::new()),
                launched: Mutex::new(Vec::new()),
                planted: None,
            }
        }

        fn launched(&self) -> Vec<String> {
            self.launched.lock().unwrap().clone()
        }

        fn alive(&self) -> usize {
            self.alive.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl SandboxRuntime for FakeRuntime {
        async fn launch(&self, invocation: &Invocation) -> SandboxResult<ProcessOutput> {
            let name = invocation.container_name.clone();
            self.launched.lock().unwrap().push(name.clone());
            self.alive.lock().unwrap().insert(name.clone());

            let behavior = if invocation.command[0] == COMPILE_SCRIPT {
                self.compile.clone()
            } else {
                self.run.clone()
            };

            match behavior {
                Behavior::Hang => std::future::pending().await,
                Behavior::Exit {
                    stdout,
                    exit_code,
                    meta,
                } => {
                    if let Some(planted) = self.planted {
                        std::fs::write(invocation.workspace.join(META_FILE), planted).unwrap();
                    }
                    if let (Some(meta), Some(dir)) = (meta, &invocation.meta_dir) {
                        std::fs::write(dir.join(META_FILE), meta).unwrap();
                    }
                    self.alive.lock().unwrap().remove(&name);
                    Ok(ProcessOutput {
                        stdout: stdout.to_string(),
                        stderr: String::new(),
                        exit_code,
                    })
                }
            }
        }

        async fn kill(&self, container_name: &str) -> SandboxResult<()> {
            self.alive.lock().unwrap().remove(container_name);
            Ok(())
        }

        async fn list(&self, prefix: &str) -> SandboxResult<Vec<String>> {
            Ok(self
                .alive
                .lock()
                .unwrap()
                .iter()
                .filter(|name| name.starts_with(prefix))
                .cloned()
                .collect())
        }
    }

    const OK: Behavior = Behavior::Exit {
        stdout: "",
        exit_code: 0,
        meta: None,
    };

    fn config(root: &std::path::Path) -> SandboxConfig {
        SandboxConfig {
            workspace_root: root.to_path_buf(),
            grace_period: Duration::from_millis(100),
            compile_time_limit_secs: 0.2,
            ..SandboxConfig::default()
        }
    }

    fn executor(runtime: Arc<dyn SandboxRuntime>, root: &std::path::Path) -> SandboxExecutor {
        SandboxExecutor::new(runtime, LanguageProfiles::builtin().unwrap(), config(root))
    }

    fn request(language: Language) -> RunRequest {
        RunRequest {
            submission_id: 11,
            case_index: 0,
            language,
            source_code: "print(input())".to_string(),
            stdin: "7\n".to_string(),
            time_limit_secs: 0.05,
            memory_limit_mb: 64,
        }
    }

    fn is_empty_dir(path: &std::path::Path) -> bool {
        std::fs::read_dir(path).unwrap().next().is_none()
    }

    #[tokio::test]
    async fn test_successful_run_reads_meta_file() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new(
            OK,
            Behavior::Exit {
                stdout: "JUDGE_OUTPUT_BEGIN\n7\nJUDGE_OUTPUT_END\n",
                exit_code: 0,
                meta: Some("time_ms:12\nmemory_kb:3000\nstatus:SUCCESS\n"),
            },
        ));
        let executor = executor(runtime.clone(), root.path());

        let result = executor.execute(&request(Language::Cpp)).await;

        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.stdout, "7\n");
        assert_eq!(result.time_ms, Some(12));
        assert_eq!(result.memory_kb, Some(3000));
        assert_eq!(
            runtime.launched(),
            vec!["judge-11-tc0-compile", "judge-11-tc0"]
        );
        assert!(is_empty_dir(root.path()));
    }

    #[tokio::test]
    async fn test_interpreted_language_skips_compile() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new(
            Behavior::Hang,
            Behavior::Exit {
                stdout: "7\nJUDGE_STATUS:SUCCESS\n",
                exit_code: 0,
                meta: None,
            },
        ));
        let executor = executor(runtime.clone(), root.path());

        let result = executor.execute(&request(Language::Python)).await;

        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(runtime.launched(), vec!["judge-11-tc0"]);
    }

    #[tokio::test]
    async fn test_timeout_kills_sandbox() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new(OK, Behavior::Hang));
        let executor = executor(runtime.clone(), root.path());

        let result = executor.execute(&request(Language::Python)).await;

        assert_eq!(result.status, ExecutionStatus::TimeLimitExceeded);
        assert!(result.time_ms.unwrap() >= 100);
        assert_eq!(runtime.alive(), 0);
        assert!(is_empty_dir(root.path()));
    }

    #[tokio::test]
    async fn test_compile_failure_never_runs() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new(
            Behavior::Exit {
                stdout: "main.cpp:1:1: error: expected ';'\nJUDGE_STATUS:COMPILATION_ERROR\n",
                exit_code: 1,
                meta: None,
            },
            OK,
        ));
        let executor = executor(runtime.clone(), root.path());

        let result = executor.execute(&request(Language::Cpp)).await;

        assert_eq!(result.status, ExecutionStatus::CompilationError);
        assert_eq!(result.stderr, "main.cpp:1:1: error: expected ';'");
        assert_eq!(result.time_ms, None);
        assert_eq!(runtime.launched(), vec!["judge-11-tc0-compile"]);
        assert!(is_empty_dir(root.path()));
    }

    #[tokio::test]
    async fn test_compile_timeout_is_compilation_error() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new(Behavior::Hang, OK));
        let executor = executor(runtime.clone(), root.path());

        let result = executor.execute(&request(Language::Java)).await;

        assert_eq!(result.status, ExecutionStatus::CompilationError);
        assert!(result.stderr.contains("timed out"));
        assert_eq!(runtime.alive(), 0);
    }

    #[tokio::test]
    async fn test_unavailable_runtime_is_system_error() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(DockerRuntime::new("/nonexistent/contest-judge-docker"));
        let executor = executor(runtime, root.path());

        let result = executor.execute(&request(Language::Python)).await;

        assert_eq!(result.status, ExecutionStatus::SystemError);
        assert!(result.diagnostic().unwrap().contains("failed to launch"));
        assert!(is_empty_dir(root.path()));
    }

    /// Container CLI whose daemon is unreachable
    fn daemon_down_client(dir: &std::path::Path) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("docker");
        std::fs::write(
            &path,
            "#!/bin/sh\n\
             echo 'docker: Cannot connect to the Docker daemon at \
             unix:///var/run/docker.sock. Is the docker daemon running?' >&2\n\
             exit 125\n",
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[tokio::test]
    async fn test_daemon_down_is_system_error() {
        let bin = tempfile::tempdir().unwrap();
        let client = daemon_down_client(bin.path());

        for language in [Language::Python, Language::Cpp] {
            let root = tempfile::tempdir().unwrap();
            let runtime = Arc::new(DockerRuntime::new(client.clone()));
            let executor = executor(runtime, root.path());

            let result = executor.execute(&request(language)).await;

            assert_eq!(result.status, ExecutionStatus::SystemError, "{}", language);
            assert!(result
                .diagnostic()
                .unwrap()
                .contains("Cannot connect to the Docker daemon"));
            assert!(is_empty_dir(root.path()));
        }
    }

    #[tokio::test]
    async fn test_meta_file_planted_in_workspace_is_ignored() {
        let root = tempfile::tempdir().unwrap();
        let mut runtime = FakeRuntime::new(
            OK,
            Behavior::Exit {
                stdout: "JUDGE_OUTPUT_BEGIN\n7\nJUDGE_OUTPUT_END\n\
                         JUDGE_TIME_MS:1900\nJUDGE_STATUS:SUCCESS\n",
                exit_code: 0,
                meta: None,
            },
        );
        runtime.planted = Some("time_ms:0\nstatus:SUCCESS\n");
        let executor = executor(Arc::new(runtime), root.path());

        let result = executor.execute(&request(Language::Python)).await;

        assert_eq!(result.status, ExecutionStatus::Success);
        assert_eq!(result.time_ms, Some(1900));
    }

    #[tokio::test]
    async fn test_cleanup_submission_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new(OK, OK));
        runtime.alive.lock().unwrap().extend([
            "judge-11-tc0".to_string(),
            "judge-11-tc1-compile".to_string(),
            "judge-110-tc0".to_string(),
        ]);
        std::fs::create_dir_all(root.path().join("judge-11-tc1")).unwrap();
        let executor = executor(runtime.clone(), root.path());

        assert_ok!(executor.cleanup_submission(11).await);
        assert_ok!(executor.cleanup_submission(11).await);

        assert_eq!(runtime.alive(), 1);
        assert!(is_empty_dir(root.path()));
    }

    #[tokio::test]
    async fn test_sweep_orphans() {
        let root = tempfile::tempdir().unwrap();
        let runtime = Arc::new(FakeRuntime::new(OK, OK));
        runtime
            .alive
            .lock()
            .unwrap()
            .extend(["judge-3-tc0".to_string(), "judge-4-tc2".to_string()]);
        std::fs::create_dir_all(root.path().join("judge-3-tc0")).unwrap();
        std::fs::create_dir_all(root.path().join("unrelated")).unwrap();
        let executor = executor(runtime.clone(), root.path());

        assert_eq!(executor.sweep_orphans().await.unwrap(), 3);
        assert_eq!(runtime.alive(), 0);
        assert!(root.path().join("unrelated").exists());
    }
}

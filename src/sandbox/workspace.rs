//! Per-run execution workspaces
//!
//! Every sandbox run owns one directory named after the run. The same name is
//! used for the run's container, so anything left behind by a crashed worker
//! can be found again by prefix.
//!
//! The run's metadata directory is a sibling (`{name}.meta`) rather than a
//! child: the program only ever sees the workspace, and the metadata mount is
//! writable by the sandbox's root user alone.

use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use crate::error::{SandboxError, SandboxResult};

/// File the program's stdin is read from inside the workspace
pub const INPUT_FILE: &str = "input.txt";
/// Out-of-band metadata file the sandbox may write into the metadata directory
pub const META_FILE: &str = "meta.txt";

/// Owner-writable only; the program runs unprivileged inside the sandbox
const META_DIR_MODE: u32 = 0o755;

/// Deterministic name for the run of `submission_id` against test case `case_index`
pub fn run_name(prefix: &str, submission_id: i64, case_index: usize) -> String {
    format!("{}tc{}", submission_prefix(prefix, submission_id), case_index)
}

/// Name of the compile container belonging to a run
pub fn compile_name(run_name: &str) -> String {
    format!("{}-compile", run_name)
}

/// Prefix shared by every run of one submission
pub fn submission_prefix(prefix: &str, submission_id: i64) -> String {
    format!("{}-{}-", prefix, submission_id)
}

/// Ephemeral directory holding the source, input and build artifacts of one run
#[derive(Debug)]
pub struct ExecutionWorkspace {
    name: String,
    path: PathBuf,
    meta_dir: PathBuf,
}

impl ExecutionWorkspace {
    /// Create the workspace, replacing anything stale under the same name
    pub async fn create(root: &Path, name: &str) -> SandboxResult<Self> {
        let path = root.join(name);
        let meta_dir = root.join(meta_dir_name(name));

        for dir in [&path, &meta_dir] {
            remove_dir(dir).await?;
            fs::create_dir_all(dir)
                .await
                .map_err(|e| SandboxError::workspace(dir, e))?;
        }
        fs::set_permissions(&meta_dir, Permissions::from_mode(META_DIR_MODE))
            .await
            .map_err(|e| SandboxError::workspace(&meta_dir, e))?;

        debug!("Created workspace {} at {:?}", name, path);

        Ok(Self {
            name: name.to_string(),
            path,
            meta_dir,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn meta_dir(&self) -> &Path {
        &self.meta_dir
    }

    pub async fn write_file(&self, file_name: &str, content: &str) -> SandboxResult<()> {
        let path = self.path.join(file_name);
        fs::write(&path, content)
            .await
            .map_err(|e| SandboxError::workspace(&path, e))
    }

    /// Read the metadata file, if the sandbox produced one
    pub async fn read_meta(&self) -> SandboxResult<Option<String>> {
        let path = self.meta_dir.join(META_FILE);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SandboxError::workspace(&path, e)),
        }
    }

    /// Remove the workspace and metadata directories. Safe to call more than once.
    pub async fn cleanup(&self) -> SandboxResult<()> {
        remove_dir(&self.path).await?;
        remove_dir(&self.meta_dir).await?;
        debug!("Cleaned up workspace {}", self.name);
        Ok(())
    }
}

impl Drop for ExecutionWorkspace {
    fn drop(&mut self) {
        // Covers runs whose future was dropped before cleanup() ran.
        for dir in [&self.path, &self.meta_dir] {
            if dir.exists() {
                if let Err(e) = std::fs::remove_dir_all(dir) {
                    warn!("Failed to remove workspace {:?} on drop: {}", dir, e);
                }
            }
        }
    }
}

fn meta_dir_name(name: &str) -> String {
    format!("{}.meta", name)
}

/// Remove a workspace (or metadata directory) by name. Missing directories are not an error.
pub async fn remove_workspace(root: &Path, name: &str) -> SandboxResult<()> {
    remove_dir(&root.join(name)).await
}

/// Names of workspace and metadata directories under `root` starting with `prefix`
pub async fn list_workspaces(root: &Path, prefix: &str) -> SandboxResult<Vec<String>> {
    let mut entries = match fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(SandboxError::workspace(root, e)),
    };

    let mut names = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| SandboxError::workspace(root, e))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(prefix) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

async fn remove_dir(path: &Path) -> SandboxResult<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SandboxError::workspace(path, e)),
    }
}

//! Error types for the sandbox layer

use thiserror::Error;

/// Failures while preparing or driving a sandbox run.
///
/// These never leave the execution adapter: they are turned into a
/// `SYSTEM_ERROR` classification with the error text as diagnostic.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("failed to launch sandbox runtime `{program}`: {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("workspace I/O failed for {path}: {source}")]
    Workspace {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("sandbox runtime command `{command}` failed: {message}")]
    Runtime { command: String, message: String },
}

impl SandboxError {
    pub fn workspace(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        SandboxError::Workspace {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

pub type SandboxResult<T> = std::result::Result<T, SandboxError>;

use std::io;
use std::path::PathBuf;

use tarvenv_archive::ArchiveError;
use tarvenv_sandbox::SandboxError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
    #[error("invalid {key} value '{value}': {reason}")]
    InvalidConfig {
        key: &'static str,
        value: String,
        reason: &'static str,
    },
    #[error("{action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to serialize manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

impl CoreError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io {
            action,
            path,
            source,
        }
    }

    /// Errors caused by the caller's input rather than the environment.
    #[must_use]
    pub fn is_user_error(&self) -> bool {
        match self {
            Self::Archive(err) => err.is_structure_error() || matches!(err, ArchiveError::Read { .. }),
            Self::InvalidConfig { .. } => true,
            _ => false,
        }
    }
}

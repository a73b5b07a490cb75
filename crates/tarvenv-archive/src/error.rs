use std::io;
use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum ArchiveError {
    #[error("failed to read archive {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("archive {path} is empty")]
    Empty { path: PathBuf },
    #[error(
        "archive {path} must contain exactly one top-level directory (found: {})",
        roots.join(", ")
    )]
    AmbiguousRoot { path: PathBuf, roots: Vec<String> },
    #[error("archive entry `{entry}` escapes the archive root")]
    UnsafeEntry { entry: String },
    #[error("`{}` is not present in the archive", path.display())]
    MissingEntry { path: PathBuf },
    #[error("refusing to overwrite existing {}", destination.display())]
    Collision { destination: PathBuf },
    #[error("failed to extract `{}` to {}", entry.display(), destination.display())]
    Extract {
        entry: PathBuf,
        destination: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ArchiveError {
    /// The archive layout itself is unusable; nothing can be inventoried.
    #[must_use]
    pub fn is_structure_error(&self) -> bool {
        matches!(
            self,
            Self::Empty { .. } | Self::AmbiguousRoot { .. } | Self::UnsafeEntry { .. }
        )
    }

    #[must_use]
    pub fn is_extraction_error(&self) -> bool {
        matches!(
            self,
            Self::Collision { .. } | Self::Extract { .. } | Self::MissingEntry { .. }
        )
    }
}

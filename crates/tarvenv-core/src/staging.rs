use std::fs;
use std::path::{Path, PathBuf};

use tarvenv_archive::{ArchiveInventory, CandidateRole, Inventory};
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::orchestrator::StagedCandidate;

const SOURCES_DIR: &str = "sources";
const ARCHIVE_WHEELS_DIR: &str = "archive-wheels";
const WHEELS_DIR: &str = "wheels";
const REQUIREMENTS_FILE: &str = "requirements.txt";
const MANIFEST_FILE: &str = "manifest.json";

/// Directories under the work directory that candidates are extracted into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    /// Creates the staging directories under `work_dir`.
    ///
    /// With `recreate`, previous staging output is removed first. The sandbox
    /// is never touched here, even when it lives inside `work_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Io`] when a directory cannot be removed or created.
    pub fn prepare(work_dir: impl Into<PathBuf>, recreate: bool) -> Result<Self, CoreError> {
        let area = Self {
            root: work_dir.into(),
        };
        if recreate {
            for dir in [area.sources_dir(), area.archive_wheels_dir(), area.wheels_dir()] {
                if dir.exists() {
                    info!(dir = %dir.display(), "removing previous staging output");
                    fs::remove_dir_all(&dir).map_err(CoreError::io("failed to remove", &dir))?;
                }
            }
            for file in [area.requirements_path(), area.manifest_path()] {
                if file.exists() {
                    fs::remove_file(&file).map_err(CoreError::io("failed to remove", &file))?;
                }
            }
        }
        for dir in [area.sources_dir(), area.archive_wheels_dir(), area.wheels_dir()] {
            fs::create_dir_all(&dir).map_err(CoreError::io("failed to create", &dir))?;
        }
        Ok(area)
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn sources_dir(&self) -> PathBuf {
        self.root.join(SOURCES_DIR)
    }

    /// Where bundled wheel alternatives are extracted before selection.
    #[must_use]
    pub fn archive_wheels_dir(&self) -> PathBuf {
        self.root.join(ARCHIVE_WHEELS_DIR)
    }

    /// The find-links directory every install resolves against.
    #[must_use]
    pub fn wheels_dir(&self) -> PathBuf {
        self.root.join(WHEELS_DIR)
    }

    #[must_use]
    pub fn requirements_path(&self) -> PathBuf {
        self.root.join(REQUIREMENTS_FILE)
    }

    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    /// Extracts every candidate location out of the archive.
    ///
    /// Source trees that already exist are reused so wheels an earlier run
    /// left in their `dist/` directory are found again.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Archive`] when an entry cannot be extracted or
    /// would overwrite an unrelated file.
    pub fn stage(
        &self,
        archive: &ArchiveInventory,
        inventory: &Inventory,
    ) -> Result<Vec<StagedCandidate>, CoreError> {
        let mut staged = Vec::with_capacity(inventory.candidates.len());
        for candidate in &inventory.candidates {
            let paths = match candidate.role {
                CandidateRole::PrebuiltWheel => {
                    let dest = self.archive_wheels_dir();
                    let mut paths = Vec::with_capacity(candidate.locations.len());
                    for location in &candidate.locations {
                        let Some(file_name) = location.file_name() else {
                            continue;
                        };
                        archive.extract(location, &dest, true)?;
                        paths.push(dest.join(file_name));
                    }
                    paths
                }
                CandidateRole::SourceTree => {
                    let Some(location) = candidate.locations.first() else {
                        continue;
                    };
                    let Some(dir_name) = location.file_name() else {
                        continue;
                    };
                    let tree = self.sources_dir().join(dir_name);
                    if tree.is_dir() {
                        debug!(candidate = %candidate.name, tree = %tree.display(), "reusing extracted source tree");
                    } else {
                        archive.extract(location, self.sources_dir(), false)?;
                    }
                    vec![tree]
                }
                CandidateRole::Opaque => {
                    warn!(candidate = %candidate.name, "opaque candidate cannot be staged");
                    continue;
                }
            };
            staged.push(StagedCandidate {
                name: candidate.name.clone(),
                role: candidate.role,
                paths,
            });
        }
        info!(candidates = staged.len(), work_dir = %self.root.display(), "staged candidates");
        Ok(staged)
    }
}

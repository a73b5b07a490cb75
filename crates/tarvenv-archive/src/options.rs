use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tarvenv_wheel::normalize_name;

pub const DEFAULT_PACKAGES_DIR: &str = "pkgs";

/// How the package directory of an archive is read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveOptions {
    /// Name of the packages directory directly under the archive root.
    pub packages_dir: String,
    /// Children whose name starts with one of these (case-insensitive) are
    /// not packages, e.g. the bundled `python-3.x` interpreter sources.
    pub ignore_prefixes: Vec<String>,
    /// Distribution names that are never handed to the orchestrator.
    pub skip: Vec<String>,
    /// Files that mark a directory as a buildable source tree.
    pub build_descriptors: Vec<String>,
    /// Names dropped everywhere in the archive.
    pub system_files: Vec<String>,
    /// Maps a derived distribution name to the name the distribution really
    /// installs under (e.g. `duo-client-python` -> `duo-client`).
    pub aliases: BTreeMap<String, String>,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        Self {
            packages_dir: DEFAULT_PACKAGES_DIR.to_string(),
            ignore_prefixes: vec!["python-".to_string()],
            skip: Vec::new(),
            build_descriptors: vec!["setup.py".to_string(), "pyproject.toml".to_string()],
            system_files: vec![".DS_Store".to_string()],
            aliases: BTreeMap::new(),
        }
    }
}

impl ArchiveOptions {
    pub(crate) fn is_ignored(&self, file_name: &str) -> bool {
        let lowered = file_name.to_ascii_lowercase();
        self.ignore_prefixes
            .iter()
            .any(|prefix| lowered.starts_with(&prefix.to_ascii_lowercase()))
    }

    pub(crate) fn is_skipped(&self, name: &str) -> bool {
        self.skip.iter().any(|skip| normalize_name(skip) == name)
    }

    pub(crate) fn is_system_file(&self, file_name: &str) -> bool {
        self.system_files.iter().any(|name| name == file_name)
    }

    /// Normalizes `raw` and applies the alias table.
    pub(crate) fn candidate_name(&self, raw: &str) -> String {
        let normalized = normalize_name(raw);
        self.aliases
            .iter()
            .find(|(from, _)| normalize_name(from) == normalized)
            .map_or(normalized, |(_, to)| normalize_name(to))
    }
}

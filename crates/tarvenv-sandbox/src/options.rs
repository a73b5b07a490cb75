use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_CAPTURE_BYTES: usize = 1024 * 1024;

/// How a sandbox is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxOptions {
    /// Interpreter used to run `-m venv`; discovered on `PATH` when unset.
    pub base_python: Option<PathBuf>,
    pub upgrade_pip: bool,
    /// Installed with `--no-deps --upgrade` right after creation.
    pub base_packages: Vec<String>,
    /// Uninstalled after creation so the archive's own copies are used.
    pub remove_packages: Vec<String>,
    /// Applied to every command run in the sandbox.
    pub env: Vec<(String, String)>,
    pub max_capture_bytes: usize,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            base_python: None,
            upgrade_pip: true,
            base_packages: vec!["wheel".to_string()],
            remove_packages: vec!["setuptools".to_string()],
            env: Vec::new(),
            max_capture_bytes: DEFAULT_MAX_CAPTURE_BYTES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstallTarget {
    Wheel(PathBuf),
    Requirement(String),
}

impl InstallTarget {
    pub(crate) fn as_arg(&self) -> String {
        match self {
            Self::Wheel(path) => path.display().to_string(),
            Self::Requirement(requirement) => requirement.clone(),
        }
    }
}

impl From<&Path> for InstallTarget {
    fn from(path: &Path) -> Self {
        Self::Wheel(path.to_path_buf())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallOptions {
    pub allow_index: bool,
    pub allow_deps: bool,
    pub find_links: Vec<PathBuf>,
    pub upgrade: bool,
}

impl InstallOptions {
    /// Local-only install from `wheels_dir`, the orchestrator's install call.
    #[must_use]
    pub fn offline(wheels_dir: impl Into<PathBuf>, allow_deps: bool) -> Self {
        Self {
            allow_index: false,
            allow_deps,
            find_links: vec![wheels_dir.into()],
            upgrade: false,
        }
    }

    pub(crate) fn pip_args(&self, targets: &[InstallTarget]) -> Vec<String> {
        let mut args = vec!["install".to_string()];
        if !self.allow_index {
            args.push("--no-index".to_string());
        }
        if !self.allow_deps {
            args.push("--no-deps".to_string());
        }
        for link in &self.find_links {
            args.push("--find-links".to_string());
            args.push(link.display().to_string());
        }
        if self.upgrade {
            args.push("--upgrade".to_string());
        }
        args.extend(targets.iter().map(InstallTarget::as_arg));
        args
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildRequest {
    pub source_tree: PathBuf,
    /// Extra variables for the build commands, e.g. `CFLAGS` for a bundled
    /// OpenSSL.
    pub env: Vec<(String, String)>,
    /// Script run with the sandbox interpreter before building, for trees
    /// that must bootstrap themselves (setuptools ships `bootstrap.py`).
    pub bootstrap: Option<String>,
}

impl BuildRequest {
    #[must_use]
    pub fn new(source_tree: impl Into<PathBuf>) -> Self {
        Self {
            source_tree: source_tree.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildMethod {
    SetupPy,
    PipWheel,
}

impl fmt::Display for BuildMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SetupPy => "setup.py bdist_wheel",
            Self::PipWheel => "pip wheel",
        })
    }
}

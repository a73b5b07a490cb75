use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::SandboxError;
use crate::options::{BuildRequest, InstallOptions, InstallTarget};
use crate::sandbox::Sandbox;

/// The environment operations the build/install loop depends on.
pub trait Environment {
    /// # Errors
    ///
    /// Fails when the installer exits unsuccessfully.
    fn install(
        &mut self,
        targets: &[InstallTarget],
        options: &InstallOptions,
    ) -> Result<(), SandboxError>;

    /// Builds one wheel from a source tree and returns its path.
    ///
    /// # Errors
    ///
    /// Fails when no build method produces exactly one wheel.
    fn build(&mut self, request: &BuildRequest) -> Result<PathBuf, SandboxError>;

    /// A wheel an earlier build left behind for `source_tree`.
    fn built_wheel(&self, source_tree: &Path) -> Option<PathBuf>;

    /// # Errors
    ///
    /// Fails when the requirement cannot be downloaded as a wheel.
    fn fetch_remote(&mut self, requirement: &str, dest: &Path) -> Result<PathBuf, SandboxError>;

    /// # Errors
    ///
    /// Fails when the installed set cannot be listed.
    fn installed_distributions(&self) -> Result<BTreeMap<String, String>, SandboxError>;

    /// # Errors
    ///
    /// Fails when installed requirements are inconsistent.
    fn check(&self) -> Result<(), SandboxError>;
}

impl Environment for Sandbox {
    fn install(
        &mut self,
        targets: &[InstallTarget],
        options: &InstallOptions,
    ) -> Result<(), SandboxError> {
        Sandbox::install(self, targets, options)
    }

    fn build(&mut self, request: &BuildRequest) -> Result<PathBuf, SandboxError> {
        Sandbox::build(self, request)
    }

    fn built_wheel(&self, source_tree: &Path) -> Option<PathBuf> {
        Sandbox::built_wheel(self, source_tree)
    }

    fn fetch_remote(&mut self, requirement: &str, dest: &Path) -> Result<PathBuf, SandboxError> {
        Sandbox::fetch_remote(self, requirement, dest)
    }

    fn installed_distributions(&self) -> Result<BTreeMap<String, String>, SandboxError> {
        Sandbox::installed_distributions(self)
    }

    fn check(&self) -> Result<(), SandboxError> {
        Sandbox::check(self)
    }
}

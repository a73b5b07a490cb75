//! End-to-end run: archive to installed environment.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tarvenv_archive::{ArchiveInventory, Compression, Inventory, ReleaseInfo};
use tarvenv_sandbox::{Environment, Sandbox};
use tarvenv_wheel::SupportedTags;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::CoreError;
use crate::orchestrator::orchestrate;
use crate::outcome::{IntegrityCheck, OrchestrationReport};
use crate::staging::StagingArea;

/// What `inspect` reports about an archive without touching any sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectReport {
    pub archive: PathBuf,
    pub compression: Compression,
    pub root: PathBuf,
    pub release: Option<ReleaseInfo>,
    pub entries: usize,
    pub inventory: Inventory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WheelArtifact {
    pub name: String,
    pub path: PathBuf,
    pub sha256: String,
}

/// A converged environment and the files describing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedEnvironment {
    pub release: Option<ReleaseInfo>,
    /// Normalized name -> version.
    pub installed: BTreeMap<String, String>,
    pub wheels: Vec<WheelArtifact>,
    pub requirements: PathBuf,
    pub manifest: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineReport {
    pub inventory: Inventory,
    pub orchestration: OrchestrationReport,
    /// Present only when every candidate was installed.
    pub resolved: Option<ResolvedEnvironment>,
}

impl PipelineReport {
    /// Every candidate is installed and the environment is consistent.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.resolved.is_some()
            && !matches!(
                self.orchestration.integrity,
                IntegrityCheck::Failed { .. }
            )
    }
}

/// Body of `manifest.json`.
#[derive(Serialize)]
struct Manifest<'a> {
    release: Option<&'a ReleaseInfo>,
    requirements: &'a [String],
    installed: &'a BTreeMap<String, String>,
    wheels: &'a [WheelArtifact],
}

/// # Errors
///
/// Returns [`CoreError::Archive`] when the archive cannot be read or has an
/// invalid layout.
pub fn inspect(config: &Config) -> Result<InspectReport, CoreError> {
    let archive = ArchiveInventory::open(config.tarball(), config.archive())?;
    Ok(InspectReport {
        archive: archive.path().to_path_buf(),
        compression: archive.compression(),
        root: archive.root().to_path_buf(),
        release: archive.release(),
        entries: archive.len(),
        inventory: archive.candidates(),
    })
}

/// Opens the archive, creates the sandbox and drives it to a fixed point.
///
/// A partial resolution is not an error: it comes back as a report without
/// a [`ResolvedEnvironment`].
///
/// # Errors
///
/// Returns an error when the archive is unusable, staging fails, or the
/// sandbox cannot be created or probed.
pub fn prepare_environment(config: &Config) -> Result<PipelineReport, CoreError> {
    let archive = ArchiveInventory::open(config.tarball(), config.archive())?;
    if let Some(release) = archive.release() {
        info!(
            release = %release.name,
            version = %release.version,
            commit = %release.commit,
            "opened vendor archive"
        );
    }
    let staging = StagingArea::prepare(config.work_dir(), config.recreate_work_dir())?;
    let mut sandbox = Sandbox::create(
        config.sandbox_path(),
        config.reset_sandbox(),
        config.sandbox(),
    )?;
    let tags = sandbox.supported_tags()?.clone();
    info!(tags = tags.len(), "probed target tags");
    run_pipeline(config, &archive, &staging, &mut sandbox, &tags)
}

/// Stages the archive's candidates and resolves them in `env`.
///
/// # Errors
///
/// See [`prepare_environment`].
pub fn run_pipeline(
    config: &Config,
    archive: &ArchiveInventory,
    staging: &StagingArea,
    env: &mut dyn Environment,
    tags: &SupportedTags,
) -> Result<PipelineReport, CoreError> {
    let inventory = archive.candidates();
    for duplicate in &inventory.duplicates {
        warn!(
            candidate = %duplicate.name,
            kept = %duplicate.kept.display(),
            dropped = %duplicate.dropped.display(),
            "duplicate candidate"
        );
    }
    let staged = staging.stage(archive, &inventory)?;
    let orchestration = orchestrate(
        env,
        tags,
        &staging.wheels_dir(),
        staged,
        config.orchestrator(),
    )?;

    let resolved = if orchestration.outcome.is_resolved() {
        Some(write_outputs(archive.release(), &orchestration, staging)?)
    } else {
        None
    };
    Ok(PipelineReport {
        inventory,
        orchestration,
        resolved,
    })
}

fn write_outputs(
    release: Option<ReleaseInfo>,
    report: &OrchestrationReport,
    staging: &StagingArea,
) -> Result<ResolvedEnvironment, CoreError> {
    let requirements = requirement_pins(report);
    let requirements_path = staging.requirements_path();
    let mut body = requirements.join("\n");
    if !body.is_empty() {
        body.push('\n');
    }
    fs::write(&requirements_path, body)
        .map_err(CoreError::io("failed to write", &requirements_path))?;

    let mut wheels = Vec::with_capacity(report.wheels.len());
    for (name, path) in &report.wheels {
        wheels.push(WheelArtifact {
            name: name.clone(),
            path: path.clone(),
            sha256: sha256_file(path)?,
        });
    }

    let manifest_path = staging.manifest_path();
    let manifest = Manifest {
        release: release.as_ref(),
        requirements: &requirements,
        installed: &report.installed,
        wheels: &wheels,
    };
    let json = serde_json::to_string_pretty(&manifest)?;
    fs::write(&manifest_path, json).map_err(CoreError::io("failed to write", &manifest_path))?;
    info!(
        requirements = %requirements_path.display(),
        manifest = %manifest_path.display(),
        wheels = wheels.len(),
        "wrote environment manifest"
    );

    Ok(ResolvedEnvironment {
        release,
        installed: report.installed.clone(),
        wheels,
        requirements: requirements_path,
        manifest: manifest_path,
    })
}

/// `name==version` for every candidate present in the environment, sorted.
fn requirement_pins(report: &OrchestrationReport) -> Vec<String> {
    let mut pins: Vec<String> = report
        .pre_resolved
        .iter()
        .chain(&report.installed_by_run)
        .filter_map(|name| {
            report
                .installed
                .get(name)
                .map(|version| format!("{name}=={version}"))
        })
        .collect();
    pins.sort();
    pins.dedup();
    pins
}

fn sha256_file(path: &Path) -> Result<String, CoreError> {
    let mut file = File::open(path).map_err(CoreError::io("failed to open", path))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(CoreError::io("failed to hash", path))?;
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests;

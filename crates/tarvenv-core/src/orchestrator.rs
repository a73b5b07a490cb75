//! Fixed-point build/install loop.
//!
//! No dependency metadata is trusted. Each pass first tries to obtain a wheel
//! for every unresolved candidate, then tries to install every queued wheel.
//! Failures are recorded and retried on the next pass; the loop ends when
//! nothing is left, when a pass changes nothing, or at the pass limit.

use std::collections::{BTreeMap, VecDeque};
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tarvenv_archive::CandidateRole;
use tarvenv_sandbox::{BuildRequest, Environment, InstallOptions, InstallTarget, SandboxError};
use tarvenv_wheel::{
    is_compatible_filename, normalize_name, requirement_name, SupportedTags, WheelDescriptor,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::DEFAULT_MAX_PASSES;
use crate::error::CoreError;
use crate::outcome::{
    CandidateFailure, IntegrityCheck, OrchestrationReport, Outcome, Phase, StopReason,
};

/// A candidate whose archive locations were extracted to the filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedCandidate {
    pub name: String,
    pub role: CandidateRole,
    /// Wheel alternatives for prebuilt wheels, the tree for source trees.
    pub paths: Vec<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorOptions {
    pub max_passes: usize,
    /// Fetch a wheel by pin when no bundled alternative fits the target.
    pub allow_remote_fetch: bool,
    /// Let pip pull dependencies from the wheels directory during install.
    pub install_deps: bool,
    /// Normalized name -> extra build variables.
    pub build_env: BTreeMap<String, Vec<(String, String)>>,
    /// Normalized name -> script run before building that tree.
    pub bootstrap_scripts: BTreeMap<String, String>,
    pub run_check: bool,
    /// Requirements fetched from the index and installed alongside the
    /// archive's packages, e.g. a platform helper the vendor leaves out.
    pub extra_requirements: Vec<String>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            max_passes: DEFAULT_MAX_PASSES,
            allow_remote_fetch: true,
            install_deps: true,
            build_env: BTreeMap::new(),
            bootstrap_scripts: BTreeMap::from([(
                "setuptools".to_string(),
                "bootstrap.py".to_string(),
            )]),
            run_check: true,
            extra_requirements: Vec::new(),
        }
    }
}

/// Why no wheel could be obtained for a candidate in one pass.
#[derive(Debug, Error)]
enum WheelError {
    #[error("no bundled wheel matches the target ({})", .alternatives.join(", "))]
    NoCompatibleWheel { alternatives: Vec<String> },
    #[error("{role:?} candidates cannot be built")]
    Unbuildable { role: CandidateRole },
    #[error("`{requirement}` is only available from the package index, which is disabled")]
    IndexDisabled { requirement: String },
    #[error("candidate has no staged files")]
    NothingStaged,
    #[error("failed to copy {} into the wheels directory: {source}", .from.display())]
    Copy {
        from: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

/// Runs the loop to a fixed point.
///
/// Candidates already installed in `env` are pre-resolved and never touched
/// beyond recording an existing wheel for them.
///
/// # Errors
///
/// Only failures to list the environment or to create `wheels_dir` are
/// errors; per-candidate failures are reported in the returned report.
pub fn orchestrate(
    env: &mut dyn Environment,
    tags: &SupportedTags,
    wheels_dir: &Path,
    candidates: Vec<StagedCandidate>,
    options: &OrchestratorOptions,
) -> Result<OrchestrationReport, CoreError> {
    fs::create_dir_all(wheels_dir).map_err(CoreError::io("failed to create", wheels_dir))?;
    Orchestrator {
        env,
        tags,
        wheels_dir,
        options,
        unresolved: IndexMap::new(),
        requested: BTreeMap::new(),
        queue: VecDeque::new(),
        wheels: IndexMap::new(),
        installed: IndexSet::new(),
        failures: Vec::new(),
    }
    .run(candidates)
}

struct Orchestrator<'a> {
    env: &'a mut dyn Environment,
    tags: &'a SupportedTags,
    wheels_dir: &'a Path,
    options: &'a OrchestratorOptions,
    /// U, in candidate order.
    unresolved: IndexMap<String, StagedCandidate>,
    /// Extra requirements by normalized name; they have nothing staged.
    requested: BTreeMap<String, String>,
    /// Q, most recently wheeled first.
    queue: VecDeque<String>,
    /// W.
    wheels: IndexMap<String, PathBuf>,
    installed: IndexSet<String>,
    failures: Vec<CandidateFailure>,
}

impl Orchestrator<'_> {
    fn run(mut self, candidates: Vec<StagedCandidate>) -> Result<OrchestrationReport, CoreError> {
        let already = self.env.installed_distributions()?;
        let mut pre_resolved = Vec::new();
        for candidate in candidates {
            if already.contains_key(&candidate.name) {
                debug!(candidate = %candidate.name, "already installed");
                if let Some(wheel) = self.existing_wheel(&candidate) {
                    self.wheels.insert(candidate.name.clone(), wheel);
                }
                pre_resolved.push(candidate.name);
            } else if self.unresolved.contains_key(&candidate.name) {
                warn!(candidate = %candidate.name, "ignoring repeated candidate");
            } else {
                self.unresolved.insert(candidate.name.clone(), candidate);
            }
        }
        for requirement in &self.options.extra_requirements {
            let name = normalize_name(requirement_name(requirement));
            if name.is_empty() {
                warn!(%requirement, "ignoring extra requirement without a name");
            } else if already.contains_key(&name) {
                debug!(candidate = %name, "extra requirement already installed");
                if !pre_resolved.contains(&name) {
                    pre_resolved.push(name);
                }
            } else if self.unresolved.contains_key(&name) {
                warn!(candidate = %name, "archive already provides extra requirement");
            } else {
                self.requested.insert(name.clone(), requirement.trim().to_string());
                self.unresolved.insert(
                    name.clone(),
                    StagedCandidate {
                        name,
                        role: CandidateRole::PrebuiltWheel,
                        paths: Vec::new(),
                    },
                );
            }
        }
        info!(
            candidates = self.unresolved.len(),
            pre_resolved = pre_resolved.len(),
            max_passes = self.options.max_passes,
            "starting build/install loop"
        );

        let mut passes = 0;
        let stop_reason = loop {
            if self.unresolved.is_empty() && self.queue.is_empty() {
                break StopReason::Converged;
            }
            if passes >= self.options.max_passes {
                break StopReason::PassLimit;
            }
            passes += 1;
            let before = self.state();
            self.build_phase(passes);
            self.install_phase(passes);
            info!(
                pass = passes,
                unresolved = self.unresolved.len(),
                queued = self.queue.len(),
                installed = self.installed.len(),
                "pass finished"
            );
            if self.state() == before {
                break StopReason::Stagnated;
            }
        };

        let outcome = if self.unresolved.is_empty() && self.queue.is_empty() {
            Outcome::Resolved
        } else {
            Outcome::Partial {
                unresolved: self.unresolved.keys().cloned().collect(),
                stuck_in_queue: self.queue.iter().cloned().collect(),
            }
        };
        match &outcome {
            Outcome::Resolved => info!(passes, "environment converged"),
            Outcome::Partial {
                unresolved,
                stuck_in_queue,
            } => warn!(
                passes,
                ?stop_reason,
                unresolved = %unresolved.join(", "),
                stuck_in_queue = %stuck_in_queue.join(", "),
                "environment did not converge"
            ),
        }

        let integrity = if outcome.is_resolved() && self.options.run_check {
            match self.env.check() {
                Ok(()) => IntegrityCheck::Passed,
                Err(err) => {
                    warn!(%err, "installed environment is inconsistent");
                    IntegrityCheck::Failed {
                        details: check_details(&err),
                    }
                }
            }
        } else {
            IntegrityCheck::Skipped
        };
        let installed = self.env.installed_distributions()?;

        Ok(OrchestrationReport {
            passes,
            stop_reason,
            wheels: self.wheels,
            pre_resolved,
            installed_by_run: self.installed.into_iter().collect(),
            failures: self.failures,
            installed,
            integrity,
            outcome,
        })
    }

    fn state(&self) -> (Vec<String>, VecDeque<String>) {
        (self.unresolved.keys().cloned().collect(), self.queue.clone())
    }

    fn build_phase(&mut self, pass: usize) {
        let snapshot: Vec<String> = self.unresolved.keys().cloned().collect();
        for name in snapshot {
            let Some(candidate) = self.unresolved.get(&name).cloned() else {
                continue;
            };
            match self.obtain_wheel(&candidate) {
                Ok(wheel) => {
                    debug!(candidate = %name, pass, wheel = %wheel.display(), "wheel ready");
                    self.unresolved.shift_remove(&name);
                    self.wheels.insert(name.clone(), wheel);
                    self.queue.push_front(name);
                }
                Err(err) => {
                    debug!(candidate = %name, pass, %err, "no wheel yet");
                    self.failures.push(CandidateFailure {
                        name,
                        pass,
                        phase: Phase::Build,
                        reason: err.to_string(),
                    });
                }
            }
        }
    }

    fn install_phase(&mut self, pass: usize) {
        let snapshot: Vec<String> = self.queue.iter().cloned().collect();
        let install_options =
            InstallOptions::offline(self.wheels_dir.to_path_buf(), self.options.install_deps);
        for name in snapshot {
            let Some(wheel) = self.wheels.get(&name).cloned() else {
                continue;
            };
            match self
                .env
                .install(&[InstallTarget::Wheel(wheel)], &install_options)
            {
                Ok(()) => {
                    info!(candidate = %name, pass, "installed");
                    self.queue.retain(|queued| queued != &name);
                    self.installed.insert(name);
                }
                Err(err) => {
                    debug!(candidate = %name, pass, %err, "install failed");
                    self.failures.push(CandidateFailure {
                        name,
                        pass,
                        phase: Phase::Install,
                        reason: err.to_string(),
                    });
                }
            }
        }
    }

    fn obtain_wheel(&mut self, candidate: &StagedCandidate) -> Result<PathBuf, WheelError> {
        if let Some(wheel) = self.wheels.get(&candidate.name) {
            return Ok(wheel.clone());
        }
        if let Some(requirement) = self.requested.get(&candidate.name) {
            if !self.options.allow_remote_fetch {
                return Err(WheelError::IndexDisabled {
                    requirement: requirement.clone(),
                });
            }
            info!(candidate = %candidate.name, %requirement, "fetching extra requirement");
            return Ok(self.env.fetch_remote(requirement, self.wheels_dir)?);
        }
        match candidate.role {
            CandidateRole::PrebuiltWheel => {
                if let Some(compatible) = self.compatible_alternative(candidate) {
                    return self.copy_into_wheels_dir(compatible);
                }
                let alternatives: Vec<String> = candidate
                    .paths
                    .iter()
                    .filter_map(|path| file_name(path))
                    .map(str::to_string)
                    .collect();
                let pin = alternatives
                    .iter()
                    .find_map(|name| WheelDescriptor::parse(name).ok())
                    .map(|descriptor| descriptor.pin());
                match pin {
                    Some(pin) if self.options.allow_remote_fetch => {
                        info!(candidate = %candidate.name, %pin, "no bundled wheel fits, fetching");
                        Ok(self.env.fetch_remote(&pin, self.wheels_dir)?)
                    }
                    _ => Err(WheelError::NoCompatibleWheel { alternatives }),
                }
            }
            CandidateRole::SourceTree => {
                let tree = candidate.paths.first().ok_or(WheelError::NothingStaged)?;
                let built = match self.env.built_wheel(tree) {
                    Some(previous) => {
                        debug!(candidate = %candidate.name, "reusing wheel from an earlier build");
                        previous
                    }
                    None => {
                        let request = BuildRequest {
                            source_tree: tree.clone(),
                            env: self
                                .options
                                .build_env
                                .get(&candidate.name)
                                .cloned()
                                .unwrap_or_default(),
                            bootstrap: self.options.bootstrap_scripts.get(&candidate.name).cloned(),
                        };
                        info!(candidate = %candidate.name, "building wheel");
                        self.env.build(&request)?
                    }
                };
                self.copy_into_wheels_dir(&built)
            }
            role @ CandidateRole::Opaque => Err(WheelError::Unbuildable { role }),
        }
    }

    /// The first wheel alternative the target can install.
    fn compatible_alternative<'c>(&self, candidate: &'c StagedCandidate) -> Option<&'c PathBuf> {
        candidate
            .paths
            .iter()
            .find(|path| {
                file_name(path).is_some_and(|name| is_compatible_filename(name, self.tags))
            })
    }

    /// A wheel for a pre-resolved candidate, obtained without building.
    fn existing_wheel(&self, candidate: &StagedCandidate) -> Option<PathBuf> {
        let found = match candidate.role {
            CandidateRole::PrebuiltWheel => self.compatible_alternative(candidate).cloned(),
            CandidateRole::SourceTree => candidate
                .paths
                .first()
                .and_then(|tree| self.env.built_wheel(tree)),
            CandidateRole::Opaque => None,
        }?;
        match self.copy_into_wheels_dir(&found) {
            Ok(wheel) => Some(wheel),
            Err(err) => {
                warn!(candidate = %candidate.name, %err, "cannot record existing wheel");
                None
            }
        }
    }

    fn copy_into_wheels_dir(&self, wheel: &Path) -> Result<PathBuf, WheelError> {
        let copy_err = |source| WheelError::Copy {
            from: wheel.to_path_buf(),
            source,
        };
        let name = wheel
            .file_name()
            .ok_or_else(|| copy_err(io::Error::from(io::ErrorKind::InvalidInput)))?;
        let dest = self.wheels_dir.join(name);
        if dest != wheel {
            fs::copy(wheel, &dest).map_err(copy_err)?;
        }
        Ok(dest)
    }
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(OsStr::to_str)
}

fn check_details(err: &SandboxError) -> String {
    match err {
        SandboxError::Command(command) if !command.stdout.trim().is_empty() => {
            command.stdout.trim().to_string()
        }
        other => other.to_string(),
    }
}

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use once_cell::unsync::OnceCell;
use serde::Deserialize;
use tarvenv_wheel::{
    normalize_name, requirement_name, SupportedTags, WheelDescriptor, WHEEL_SUFFIX,
};
use tracing::{debug, info, warn};

use crate::command::SandboxCommand;
use crate::error::{BuildAttempt, BuildError, EnvironmentCommandError, SandboxError};
use crate::options::{BuildMethod, BuildRequest, InstallOptions, InstallTarget, SandboxOptions};
use crate::process::{run_command, RunOutput};
use crate::tags::{TagsPayload, TAGS_SCRIPT};

const STALE_BUILD_DIRS: [&str; 2] = ["build", "dist"];
const EGG_INFO_SUFFIX: &str = ".egg-info";
const STDERR_TAIL_LINES: usize = 20;

/// Handle on one virtual environment directory.
///
/// Mutating operations take `&mut self`; a sandbox has a single writer.
#[derive(Debug)]
pub struct Sandbox {
    root: PathBuf,
    options: SandboxOptions,
    tags: OnceCell<SupportedTags>,
}

#[derive(Debug, Deserialize)]
struct PipListEntry {
    name: String,
    version: String,
}

impl Sandbox {
    /// Opens the sandbox at `path`, creating it when missing.
    ///
    /// A relative `path` is resolved against the current directory, since
    /// sandbox commands run from inside source trees. With `reset`, an existing directory is deleted first. A new sandbox is
    /// populated with `-m venv`, then pip is upgraded, base packages are
    /// installed and the configured packages are removed.
    ///
    /// # Errors
    ///
    /// Any failing step is returned as is; a half-created sandbox is left on
    /// disk for inspection.
    pub fn create(
        path: impl Into<PathBuf>,
        reset: bool,
        options: &SandboxOptions,
    ) -> Result<Self, SandboxError> {
        let root = absolute(&path.into())?;
        if reset && root.exists() {
            info!(sandbox = %root.display(), "resetting sandbox");
            fs::remove_dir_all(&root).map_err(SandboxError::io("failed to remove", &root))?;
        }
        let mut sandbox = Self {
            root,
            options: options.clone(),
            tags: OnceCell::new(),
        };
        if sandbox.python().is_file() {
            debug!(sandbox = %sandbox.root.display(), "reusing sandbox");
            return Ok(sandbox);
        }
        sandbox.populate()?;
        Ok(sandbox)
    }

    fn populate(&mut self) -> Result<(), SandboxError> {
        let base = self.base_python()?;
        info!(
            sandbox = %self.root.display(),
            python = %base.display(),
            "creating sandbox"
        );
        if let Some(parent) = self.root.parent() {
            fs::create_dir_all(parent).map_err(SandboxError::io("failed to create", parent))?;
        }
        let args = vec![
            "-m".to_string(),
            "venv".to_string(),
            self.root.display().to_string(),
        ];
        let output = run_command(
            &base,
            &args,
            &self.options.env,
            Path::new("."),
            self.options.max_capture_bytes,
        )
        .map_err(|source| SandboxError::Spawn {
            program: base.display().to_string(),
            source,
        })?;
        ensure_success(format!("{} {}", base.display(), args.join(" ")), output)?;

        if self.options.upgrade_pip {
            self.install(
                &[InstallTarget::Requirement("pip".into())],
                &InstallOptions {
                    allow_index: true,
                    allow_deps: true,
                    find_links: Vec::new(),
                    upgrade: true,
                },
            )?;
        }
        if !self.options.base_packages.is_empty() {
            let targets: Vec<InstallTarget> = self
                .options
                .base_packages
                .iter()
                .cloned()
                .map(InstallTarget::Requirement)
                .collect();
            self.install(
                &targets,
                &InstallOptions {
                    allow_index: true,
                    allow_deps: false,
                    find_links: Vec::new(),
                    upgrade: true,
                },
            )?;
        }
        if !self.options.remove_packages.is_empty() {
            let mut args = vec!["uninstall".to_string(), "--yes".to_string()];
            args.extend(self.options.remove_packages.iter().cloned());
            self.run_checked(SandboxCommand::Pip, &args, &[], &self.root)?;
        }
        Ok(())
    }

    fn base_python(&self) -> Result<PathBuf, SandboxError> {
        if let Some(explicit) = &self.options.base_python {
            return Ok(explicit.clone());
        }
        ["python3", "python"]
            .iter()
            .find_map(|candidate| which::which(candidate).ok())
            .ok_or(SandboxError::NoInterpreter)
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The sandbox interpreter.
    #[must_use]
    pub fn python(&self) -> PathBuf {
        SandboxCommand::interpreter(&self.root)
    }

    /// Runs a sandbox command. A non-zero exit is not an error here.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Spawn`] when the program cannot be started.
    pub fn run(
        &self,
        command: SandboxCommand,
        args: &[String],
        cwd: &Path,
    ) -> Result<RunOutput, SandboxError> {
        self.run_with_env(command, args, &[], cwd)
    }

    fn run_with_env(
        &self,
        command: SandboxCommand,
        args: &[String],
        extra_env: &[(String, String)],
        cwd: &Path,
    ) -> Result<RunOutput, SandboxError> {
        let (program, full_args) = command.invocation(&self.root, args);
        let mut env = self.options.env.clone();
        env.extend_from_slice(extra_env);
        debug!(%command, args = %full_args.join(" "), cwd = %cwd.display(), "running");
        run_command(&program, &full_args, &env, cwd, self.options.max_capture_bytes).map_err(
            |source| SandboxError::Spawn {
                program: program.display().to_string(),
                source,
            },
        )
    }

    fn run_checked(
        &self,
        command: SandboxCommand,
        args: &[String],
        extra_env: &[(String, String)],
        cwd: &Path,
    ) -> Result<RunOutput, SandboxError> {
        let output = self.run_with_env(command, args, extra_env, cwd)?;
        ensure_success(format!("{command} {}", args.join(" ")), output)
    }

    /// Installs wheel files or requirements with pip.
    ///
    /// # Errors
    ///
    /// A non-zero pip exit is returned as [`SandboxError::Command`].
    pub fn install(
        &mut self,
        targets: &[InstallTarget],
        options: &InstallOptions,
    ) -> Result<(), SandboxError> {
        let targets = targets
            .iter()
            .map(|target| match target {
                InstallTarget::Wheel(path) => absolute(path).map(InstallTarget::Wheel),
                InstallTarget::Requirement(_) => Ok(target.clone()),
            })
            .collect::<Result<Vec<_>, _>>()?;
        let options = InstallOptions {
            find_links: options
                .find_links
                .iter()
                .map(PathBuf::as_path)
                .map(absolute)
                .collect::<Result<_, _>>()?,
            ..options.clone()
        };
        let args = options.pip_args(&targets);
        self.run_checked(SandboxCommand::Pip, &args, &[], &self.root)?;
        Ok(())
    }

    /// Builds a wheel from a source tree into its `dist/` directory.
    ///
    /// `setup.py bdist_wheel` is tried first when the tree has a `setup.py`,
    /// then `pip wheel`. A method that exits cleanly without leaving exactly
    /// one wheel in `dist/` counts as a failed attempt.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Build`] when every method fails.
    pub fn build(&mut self, request: &BuildRequest) -> Result<PathBuf, SandboxError> {
        let tree = &absolute(&request.source_tree)?;
        clean_build_outputs(tree)?;
        let dist = tree.join("dist");

        if let Some(script) = &request.bootstrap {
            if tree.join(script).is_file() {
                debug!(tree = %tree.display(), script = %script, "bootstrapping source tree");
                self.run_checked(SandboxCommand::Python, &[script.clone()], &request.env, tree)?;
            }
        }

        let mut attempts = Vec::new();
        for method in build_methods(tree) {
            let args = build_args(method, &dist);
            debug!(tree = %tree.display(), %method, "building wheel");
            let output = self.run_with_env(method_command(method), &args, &request.env, tree)?;
            let stderr_tail = if output.success() {
                match find_wheel(&dist) {
                    Ok(wheel) => return Ok(wheel),
                    Err(err) => err.to_string(),
                }
            } else {
                output.stderr_tail(STDERR_TAIL_LINES)
            };
            debug!(tree = %tree.display(), %method, code = output.code, "build method failed");
            attempts.push(BuildAttempt {
                method,
                exit_code: output.code,
                stderr_tail,
            });
            if dist.exists() {
                fs::remove_dir_all(&dist).map_err(SandboxError::io("failed to remove", &dist))?;
            }
        }
        Err(BuildError {
            source_tree: tree.clone(),
            attempts,
        }
        .into())
    }

    /// The wheel a previous build left in `dist/`, if there is exactly one.
    #[must_use]
    pub fn built_wheel(&self, source_tree: &Path) -> Option<PathBuf> {
        find_wheel(&source_tree.join("dist")).ok()
    }

    /// Downloads the wheel for `requirement` from the package index.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Command`] when pip fails and
    /// [`SandboxError::MissingWheel`] when it succeeds without a wheel for
    /// the requested distribution.
    pub fn fetch_remote(&mut self, requirement: &str, dest: &Path) -> Result<PathBuf, SandboxError> {
        let dest = &absolute(dest)?;
        fs::create_dir_all(dest).map_err(SandboxError::io("failed to create", dest))?;
        let before = wheel_names(dest)?;
        let args = vec![
            "download".to_string(),
            "--no-deps".to_string(),
            "--only-binary".to_string(),
            ":all:".to_string(),
            "--dest".to_string(),
            dest.display().to_string(),
            requirement.to_string(),
        ];
        info!(requirement, "fetching wheel from the package index");
        self.run_checked(SandboxCommand::Pip, &args, &[], &self.root)?;

        let after = wheel_names(dest)?;
        if let Some(new) = after.difference(&before).next() {
            return Ok(dest.join(new));
        }
        // pip skips the download when a matching file is already present.
        let wanted = normalize_name(requirement_name(requirement));
        after
            .iter()
            .find(|name| {
                WheelDescriptor::parse(name)
                    .is_ok_and(|descriptor| descriptor.normalized_name() == wanted)
            })
            .map(|name| dest.join(name))
            .ok_or_else(|| SandboxError::MissingWheel {
                dir: dest.to_path_buf(),
            })
    }

    /// Normalized name -> version for everything installed in the sandbox.
    ///
    /// # Errors
    ///
    /// Fails when pip fails or prints something other than its JSON listing.
    pub fn installed_distributions(&self) -> Result<BTreeMap<String, String>, SandboxError> {
        let args = ["list", "--format", "json"].map(String::from);
        let output = self.run_checked(SandboxCommand::Pip, &args, &[], &self.root)?;
        parse_pip_list(&output.stdout)
    }

    /// Verifies installed requirements are satisfied (`pip check`).
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::Command`] listing the broken requirements.
    pub fn check(&self) -> Result<(), SandboxError> {
        self.run_checked(SandboxCommand::Pip, &["check".to_string()], &[], &self.root)?;
        Ok(())
    }

    /// Tags the sandbox interpreter can install, probed once and cached.
    ///
    /// # Errors
    ///
    /// Fails when the probe cannot run or prints malformed output.
    pub fn supported_tags(&self) -> Result<&SupportedTags, SandboxError> {
        self.tags.get_or_try_init(|| {
            let args = vec!["-c".to_string(), TAGS_SCRIPT.to_string()];
            let output = self.run_checked(SandboxCommand::Python, &args, &[], &self.root)?;
            let payload: TagsPayload =
                serde_json::from_str(output.stdout.trim()).map_err(|source| {
                    SandboxError::InvalidOutput {
                        what: "tag probe",
                        source,
                    }
                })?;
            let tags = payload.into_supported();
            debug!(count = tags.len(), "probed supported tags");
            Ok(tags)
        })
    }
}

fn absolute(path: &Path) -> Result<PathBuf, SandboxError> {
    std::path::absolute(path).map_err(SandboxError::io("failed to resolve", path))
}

fn ensure_success(command: String, output: RunOutput) -> Result<RunOutput, SandboxError> {
    if output.success() {
        return Ok(output);
    }
    Err(EnvironmentCommandError {
        command,
        exit_code: output.code,
        stdout: output.stdout,
        stderr: output.stderr,
    }
    .into())
}

fn build_methods(tree: &Path) -> Vec<BuildMethod> {
    if tree.join("setup.py").is_file() {
        vec![BuildMethod::SetupPy, BuildMethod::PipWheel]
    } else {
        vec![BuildMethod::PipWheel]
    }
}

fn method_command(method: BuildMethod) -> SandboxCommand {
    match method {
        BuildMethod::SetupPy => SandboxCommand::Python,
        BuildMethod::PipWheel => SandboxCommand::Pip,
    }
}

fn build_args(method: BuildMethod, dist: &Path) -> Vec<String> {
    match method {
        BuildMethod::SetupPy => vec!["setup.py".to_string(), "bdist_wheel".to_string()],
        BuildMethod::PipWheel => vec![
            "wheel".to_string(),
            "--no-deps".to_string(),
            "--no-build-isolation".to_string(),
            "--no-index".to_string(),
            "--wheel-dir".to_string(),
            dist.display().to_string(),
            ".".to_string(),
        ],
    }
}

/// Removes `build/`, `dist/` and `*.egg-info` left by earlier attempts.
fn clean_build_outputs(tree: &Path) -> Result<(), SandboxError> {
    let entries = fs::read_dir(tree).map_err(SandboxError::io("failed to read", tree))?;
    for entry in entries {
        let entry = entry.map_err(SandboxError::io("failed to read", tree))?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !STALE_BUILD_DIRS.contains(&name.as_ref()) && !name.ends_with(EGG_INFO_SUFFIX) {
            continue;
        }
        let path = entry.path();
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.map_err(SandboxError::io("failed to remove", &path))?;
        debug!(path = %path.display(), "removed stale build output");
    }
    Ok(())
}

/// The single wheel in `dir`.
///
/// # Errors
///
/// Returns [`SandboxError::MissingWheel`] when `dir` is absent or holds no
/// wheel and [`SandboxError::AmbiguousWheels`] when it holds several.
pub fn find_wheel(dir: &Path) -> Result<PathBuf, SandboxError> {
    if !dir.is_dir() {
        return Err(SandboxError::MissingWheel {
            dir: dir.to_path_buf(),
        });
    }
    let names: Vec<String> = wheel_names(dir)?.into_iter().collect();
    match names.as_slice() {
        [only] => Ok(dir.join(only)),
        [] => Err(SandboxError::MissingWheel {
            dir: dir.to_path_buf(),
        }),
        _ => {
            warn!(dir = %dir.display(), count = names.len(), "several wheels in build output");
            Err(SandboxError::AmbiguousWheels {
                dir: dir.to_path_buf(),
                wheels: names,
            })
        }
    }
}

fn wheel_names(dir: &Path) -> Result<BTreeSet<String>, SandboxError> {
    let mut names = BTreeSet::new();
    let entries = fs::read_dir(dir).map_err(SandboxError::io("failed to read", dir))?;
    for entry in entries {
        let path = entry.map_err(SandboxError::io("failed to read", dir))?.path();
        if !path.is_file() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(OsStr::to_str) {
            if name.ends_with(WHEEL_SUFFIX) {
                names.insert(name.to_string());
            }
        }
    }
    Ok(names)
}

fn parse_pip_list(stdout: &str) -> Result<BTreeMap<String, String>, SandboxError> {
    let entries: Vec<PipListEntry> =
        serde_json::from_str(stdout.trim()).map_err(|source| SandboxError::InvalidOutput {
            what: "pip list",
            source,
        })?;
    Ok(entries
        .into_iter()
        .map(|entry| (normalize_name(&entry.name), entry.version))
        .collect())
}

use std::collections::{BTreeMap, HashMap};
use std::env;
use std::path::{Path, PathBuf};

use tarvenv_archive::ArchiveOptions;
use tarvenv_sandbox::{SandboxOptions, DEFAULT_MAX_CAPTURE_BYTES};
use tarvenv_wheel::{normalize_name, requirement_name};

use crate::error::CoreError;
use crate::orchestrator::OrchestratorOptions;

const PYTHON_ENV: &str = "TARVENV_PYTHON";
const MAX_PASSES_ENV: &str = "TARVENV_MAX_PASSES";
const ONLINE_ENV: &str = "TARVENV_ONLINE";
const MAX_CAPTURE_ENV: &str = "TARVENV_MAX_CAPTURE_BYTES";

pub const DEFAULT_MAX_PASSES: usize = 10;
const DEFAULT_WORK_DIR: &str = "tarvenv-work";
const SANDBOX_DIR: &str = "venv";

/// Aliases for vendor directories whose name differs from the distribution
/// they install.
const DEFAULT_ALIASES: &[(&str, &str)] = &[("duo_client_python", "duo_client")];

#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    #[must_use]
    pub fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    #[must_use]
    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

/// `NAME:KEY=VALUE`: an extra variable for building one distribution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildEnvVar {
    pub distribution: String,
    pub key: String,
    pub value: String,
}

impl BuildEnvVar {
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] when `raw` is not `NAME:KEY=VALUE`.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let invalid = || CoreError::InvalidConfig {
            key: "--build-env",
            value: raw.to_string(),
            reason: "expected NAME:KEY=VALUE",
        };
        let (distribution, assignment) = raw.split_once(':').ok_or_else(invalid)?;
        let (key, value) = assignment.split_once('=').ok_or_else(invalid)?;
        if distribution.trim().is_empty() || key.trim().is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            distribution: normalize_name(distribution.trim()),
            key: key.trim().to_string(),
            value: value.to_string(),
        })
    }
}

/// Parses a `FROM=TO` alias.
///
/// # Errors
///
/// Returns [`CoreError::InvalidConfig`] when either side is empty.
pub fn parse_alias(raw: &str) -> Result<(String, String), CoreError> {
    match raw.split_once('=') {
        Some((from, to)) if !from.trim().is_empty() && !to.trim().is_empty() => {
            Ok((from.trim().to_string(), to.trim().to_string()))
        }
        _ => Err(CoreError::InvalidConfig {
            key: "--alias",
            value: raw.to_string(),
            reason: "expected FROM=TO",
        }),
    }
}

/// Values supplied on the command line. Unset fields fall back to the
/// environment, then to defaults.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub work_dir: Option<PathBuf>,
    pub sandbox: Option<PathBuf>,
    pub reset_sandbox: bool,
    pub recreate_work_dir: bool,
    pub max_passes: Option<usize>,
    pub offline: bool,
    pub python: Option<PathBuf>,
    pub skip: Vec<String>,
    pub ignore_prefixes: Vec<String>,
    pub aliases: Vec<(String, String)>,
    pub build_env: Vec<BuildEnvVar>,
    /// Prefix of a bundled OpenSSL build used when compiling `cryptography`.
    pub openssl_dir: Option<PathBuf>,
    /// Requirements fetched from the package index on top of the archive.
    pub extra_requirements: Vec<String>,
}

/// Immutable run configuration.
#[derive(Debug, Clone)]
pub struct Config {
    tarball: PathBuf,
    work_dir: PathBuf,
    sandbox_path: PathBuf,
    reset_sandbox: bool,
    recreate_work_dir: bool,
    sandbox: SandboxOptions,
    archive: ArchiveOptions,
    orchestrator: OrchestratorOptions,
}

impl Config {
    /// Builds the configuration from the process environment and `overrides`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] for malformed environment values.
    pub fn from_env(
        tarball: impl Into<PathBuf>,
        overrides: ConfigOverrides,
    ) -> Result<Self, CoreError> {
        Self::from_snapshot(&EnvSnapshot::capture(), tarball, overrides)
    }

    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] for malformed environment values
    /// or a zero pass limit.
    pub fn from_snapshot(
        snapshot: &EnvSnapshot,
        tarball: impl Into<PathBuf>,
        overrides: ConfigOverrides,
    ) -> Result<Self, CoreError> {
        let max_passes = match overrides.max_passes {
            Some(value) => value,
            None => parse_usize(snapshot, MAX_PASSES_ENV)?.unwrap_or(DEFAULT_MAX_PASSES),
        };
        if max_passes == 0 {
            return Err(CoreError::InvalidConfig {
                key: "max passes",
                value: "0".to_string(),
                reason: "at least one pass is required",
            });
        }
        let online = match snapshot.var(ONLINE_ENV) {
            Some(value) => {
                let lowered = value.trim().to_ascii_lowercase();
                !matches!(lowered.as_str(), "0" | "false" | "no" | "off" | "")
            }
            None => true,
        };
        let max_capture_bytes = match parse_usize(snapshot, MAX_CAPTURE_ENV)? {
            Some(0) | None => DEFAULT_MAX_CAPTURE_BYTES,
            Some(value) => value,
        };

        if let Some(nameless) = overrides
            .extra_requirements
            .iter()
            .find(|requirement| normalize_name(requirement_name(requirement)).is_empty())
        {
            return Err(CoreError::InvalidConfig {
                key: "--extra-requirement",
                value: nameless.clone(),
                reason: "expected a distribution name",
            });
        }

        let work_dir = absolute(
            overrides
                .work_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_WORK_DIR)),
        )?;
        let sandbox_path = match overrides.sandbox {
            Some(path) => absolute(path)?,
            None => work_dir.join(SANDBOX_DIR),
        };
        let base_python = overrides
            .python
            .or_else(|| snapshot.var(PYTHON_ENV).map(PathBuf::from));

        let mut archive = ArchiveOptions {
            skip: overrides.skip,
            ..ArchiveOptions::default()
        };
        archive.ignore_prefixes.extend(overrides.ignore_prefixes);
        for (from, to) in DEFAULT_ALIASES {
            archive.aliases.insert((*from).to_string(), (*to).to_string());
        }
        archive.aliases.extend(overrides.aliases);

        let mut build_env: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
        if let Some(openssl) = overrides.openssl_dir {
            build_env
                .entry("cryptography".to_string())
                .or_default()
                .extend(openssl_flags(&absolute(openssl)?));
        }
        for var in overrides.build_env {
            build_env
                .entry(var.distribution)
                .or_default()
                .push((var.key, var.value));
        }

        Ok(Self {
            tarball: absolute(tarball.into())?,
            work_dir,
            sandbox_path,
            reset_sandbox: overrides.reset_sandbox,
            recreate_work_dir: overrides.recreate_work_dir,
            sandbox: SandboxOptions {
                base_python,
                max_capture_bytes,
                ..SandboxOptions::default()
            },
            archive,
            orchestrator: OrchestratorOptions {
                max_passes,
                allow_remote_fetch: online && !overrides.offline,
                build_env,
                extra_requirements: overrides.extra_requirements,
                ..OrchestratorOptions::default()
            },
        })
    }

    #[must_use]
    pub fn tarball(&self) -> &Path {
        &self.tarball
    }

    #[must_use]
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    #[must_use]
    pub fn sandbox_path(&self) -> &Path {
        &self.sandbox_path
    }

    #[must_use]
    pub fn reset_sandbox(&self) -> bool {
        self.reset_sandbox
    }

    #[must_use]
    pub fn recreate_work_dir(&self) -> bool {
        self.recreate_work_dir
    }

    #[must_use]
    pub fn sandbox(&self) -> &SandboxOptions {
        &self.sandbox
    }

    #[must_use]
    pub fn archive(&self) -> &ArchiveOptions {
        &self.archive
    }

    #[must_use]
    pub fn orchestrator(&self) -> &OrchestratorOptions {
        &self.orchestrator
    }
}

fn parse_usize(snapshot: &EnvSnapshot, key: &'static str) -> Result<Option<usize>, CoreError> {
    snapshot
        .var(key)
        .map(|raw| {
            raw.trim().parse::<usize>().map_err(|_| CoreError::InvalidConfig {
                key,
                value: raw.to_string(),
                reason: "expected a non-negative integer",
            })
        })
        .transpose()
}

/// Commands run from inside staged trees, so every configured path is
/// resolved against the current directory up front.
fn absolute(path: PathBuf) -> Result<PathBuf, CoreError> {
    std::path::absolute(&path).map_err(CoreError::io("failed to resolve", &path))
}

fn openssl_flags(prefix: &Path) -> [(String, String); 2] {
    [
        (
            "CFLAGS".to_string(),
            format!("-I{}", prefix.join("include").display()),
        ),
        (
            "LDFLAGS".to_string(),
            format!("-L{} -Wl,-z,origin", prefix.join("lib").display()),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pairs: &[(&str, &str)], overrides: ConfigOverrides) -> Config {
        Config::from_snapshot(&EnvSnapshot::testing(pairs), "vendor.tgz", overrides)
            .expect("config")
    }

    #[test]
    fn defaults_without_environment() {
        let config = config(&[], ConfigOverrides::default());
        assert_eq!(config.orchestrator().max_passes, DEFAULT_MAX_PASSES);
        assert!(config.orchestrator().allow_remote_fetch);
        let cwd = env::current_dir().expect("cwd");
        assert_eq!(config.work_dir(), cwd.join("tarvenv-work"));
        assert_eq!(config.sandbox_path(), cwd.join("tarvenv-work/venv"));
        assert_eq!(config.tarball(), cwd.join("vendor.tgz"));
        assert_eq!(config.sandbox().base_python, None);
        assert_eq!(config.sandbox().base_packages, vec!["wheel".to_string()]);
        assert_eq!(config.sandbox().remove_packages, vec!["setuptools".to_string()]);
        assert!(config.orchestrator().extra_requirements.is_empty());
        assert_eq!(config.sandbox().max_capture_bytes, DEFAULT_MAX_CAPTURE_BYTES);
        assert_eq!(
            config.archive().aliases.get("duo_client_python").map(String::as_str),
            Some("duo_client")
        );
    }

    #[test]
    fn environment_supplies_defaults() {
        let config = config(
            &[
                ("TARVENV_PYTHON", "/opt/python3.8/bin/python3"),
                ("TARVENV_MAX_PASSES", "4"),
                ("TARVENV_ONLINE", "off"),
                ("TARVENV_MAX_CAPTURE_BYTES", "2048"),
            ],
            ConfigOverrides::default(),
        );
        assert_eq!(config.orchestrator().max_passes, 4);
        assert!(!config.orchestrator().allow_remote_fetch);
        assert_eq!(
            config.sandbox().base_python.as_deref(),
            Some(Path::new("/opt/python3.8/bin/python3"))
        );
        assert_eq!(config.sandbox().max_capture_bytes, 2048);
    }

    #[test]
    fn flags_win_over_environment() {
        let config = config(
            &[("TARVENV_MAX_PASSES", "4"), ("TARVENV_PYTHON", "/usr/bin/python3")],
            ConfigOverrides {
                max_passes: Some(7),
                python: Some(PathBuf::from("/usr/local/bin/python3.11")),
                offline: true,
                work_dir: Some(PathBuf::from("/tmp/work")),
                ..ConfigOverrides::default()
            },
        );
        assert_eq!(config.orchestrator().max_passes, 7);
        assert!(!config.orchestrator().allow_remote_fetch);
        assert_eq!(
            config.sandbox().base_python.as_deref(),
            Some(Path::new("/usr/local/bin/python3.11"))
        );
        assert_eq!(config.sandbox_path(), Path::new("/tmp/work/venv"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = Config::from_snapshot(
            &EnvSnapshot::testing(&[("TARVENV_MAX_PASSES", "many")]),
            "vendor.tgz",
            ConfigOverrides::default(),
        )
        .expect_err("invalid");
        assert!(err.is_user_error());

        let err = Config::from_snapshot(
            &EnvSnapshot::testing(&[]),
            "vendor.tgz",
            ConfigOverrides {
                max_passes: Some(0),
                ..ConfigOverrides::default()
            },
        )
        .expect_err("zero passes");
        assert!(matches!(err, CoreError::InvalidConfig { .. }));

        let err = Config::from_snapshot(
            &EnvSnapshot::testing(&[]),
            "vendor.tgz",
            ConfigOverrides {
                extra_requirements: vec![">=1.0".to_string()],
                ..ConfigOverrides::default()
            },
        )
        .expect_err("nameless requirement");
        assert!(matches!(
            err,
            CoreError::InvalidConfig {
                key: "--extra-requirement",
                ..
            }
        ));
    }

    #[test]
    fn relative_paths_are_resolved_against_the_current_directory() {
        let config = config(
            &[],
            ConfigOverrides {
                work_dir: Some(PathBuf::from("build/work")),
                sandbox: Some(PathBuf::from("venvs/authproxy")),
                openssl_dir: Some(PathBuf::from("openssl")),
                extra_requirements: vec!["twisted-iocpsupport".to_string()],
                ..ConfigOverrides::default()
            },
        );
        let cwd = env::current_dir().expect("cwd");
        assert_eq!(config.work_dir(), cwd.join("build/work"));
        assert_eq!(config.sandbox_path(), cwd.join("venvs/authproxy"));
        assert!(config.tarball().is_absolute());
        let crypto = &config.orchestrator().build_env["cryptography"];
        assert_eq!(
            crypto[0].1,
            format!("-I{}", cwd.join("openssl").join("include").display())
        );
        assert_eq!(
            config.orchestrator().extra_requirements,
            vec!["twisted-iocpsupport".to_string()]
        );
    }

    #[test]
    fn build_env_is_grouped_by_distribution() {
        let config = config(
            &[],
            ConfigOverrides {
                openssl_dir: Some(PathBuf::from("/opt/openssl")),
                build_env: vec![
                    BuildEnvVar::parse("Cryptography:CRYPTOGRAPHY_DONT_BUILD_RUST=1").expect("var"),
                    BuildEnvVar::parse("pyyaml:PYYAML_FORCE_CYTHON=1").expect("var"),
                ],
                ..ConfigOverrides::default()
            },
        );
        let build_env = &config.orchestrator().build_env;
        let crypto = &build_env["cryptography"];
        assert_eq!(crypto[0], ("CFLAGS".to_string(), "-I/opt/openssl/include".to_string()));
        assert_eq!(
            crypto[1],
            (
                "LDFLAGS".to_string(),
                "-L/opt/openssl/lib -Wl,-z,origin".to_string()
            )
        );
        assert_eq!(crypto[2].0, "CRYPTOGRAPHY_DONT_BUILD_RUST");
        assert_eq!(build_env["pyyaml"].len(), 1);
    }

    #[test]
    fn flag_values_are_validated() {
        assert!(BuildEnvVar::parse("cryptography").is_err());
        assert!(BuildEnvVar::parse(":CFLAGS=-O2").is_err());
        assert_eq!(
            parse_alias("twisted_connect_proxy=twisted-connect-proxy").expect("alias"),
            (
                "twisted_connect_proxy".to_string(),
                "twisted-connect-proxy".to_string()
            )
        );
        assert!(parse_alias("=x").is_err());
    }
}

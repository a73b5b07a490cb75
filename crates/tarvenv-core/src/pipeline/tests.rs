use std::collections::BTreeSet;

use anyhow::Result;
use tarvenv_sandbox::{
    find_wheel, BuildError, BuildRequest, EnvironmentCommandError, InstallOptions, InstallTarget,
    SandboxError,
};
use tarvenv_wheel::{TagTriple, WheelDescriptor};
use tempfile::TempDir;

use super::*;
use crate::config::{ConfigOverrides, EnvSnapshot};
use crate::fixtures::write_vendor_tarball;
use crate::outcome::Outcome;

/// Installs any wheel; builds every tree not listed in `broken`.
#[derive(Default)]
struct LenientEnv {
    installed: BTreeMap<String, String>,
    broken: BTreeSet<String>,
    check_failure: Option<String>,
}

impl Environment for LenientEnv {
    fn install(
        &mut self,
        targets: &[InstallTarget],
        _options: &InstallOptions,
    ) -> Result<(), SandboxError> {
        for target in targets {
            let InstallTarget::Wheel(wheel) = target else {
                continue;
            };
            let file = wheel.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            let descriptor = WheelDescriptor::parse(file).expect("well-formed test wheel");
            self.installed
                .insert(descriptor.normalized_name(), descriptor.version);
        }
        Ok(())
    }

    fn build(&mut self, request: &BuildRequest) -> Result<PathBuf, SandboxError> {
        let dir = request
            .source_tree
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        if self.broken.contains(&dir) {
            return Err(BuildError {
                source_tree: request.source_tree.clone(),
                attempts: Vec::new(),
            }
            .into());
        }
        let dist = request.source_tree.join("dist");
        fs::create_dir_all(&dist).expect("dist");
        let wheel = dist.join(format!("{dir}-py3-none-any.whl"));
        fs::write(&wheel, format!("built {dir}")).expect("wheel");
        Ok(wheel)
    }

    fn built_wheel(&self, source_tree: &Path) -> Option<PathBuf> {
        find_wheel(&source_tree.join("dist")).ok()
    }

    fn fetch_remote(&mut self, _requirement: &str, dest: &Path) -> Result<PathBuf, SandboxError> {
        Err(SandboxError::MissingWheel {
            dir: dest.to_path_buf(),
        })
    }

    fn installed_distributions(&self) -> Result<BTreeMap<String, String>, SandboxError> {
        let mut listing = self.installed.clone();
        listing.insert("pip".into(), "24.0".into());
        Ok(listing)
    }

    fn check(&self) -> Result<(), SandboxError> {
        match &self.check_failure {
            None => Ok(()),
            Some(details) => Err(EnvironmentCommandError {
                command: "pip check".into(),
                exit_code: 1,
                stdout: details.clone(),
                stderr: String::new(),
            }
            .into()),
        }
    }
}

struct Fixture {
    _temp: TempDir,
    config: Config,
    archive: ArchiveInventory,
    staging: StagingArea,
}

impl Fixture {
    fn new() -> Result<Self> {
        let temp = tempfile::tempdir()?;
        let tarball = temp.path().join("acme-2.4.0.tgz");
        write_vendor_tarball(&tarball)?;
        let config = Config::from_snapshot(
            &EnvSnapshot::testing(&[]),
            &tarball,
            ConfigOverrides {
                work_dir: Some(temp.path().join("work")),
                ..ConfigOverrides::default()
            },
        )?;
        let archive = ArchiveInventory::open(config.tarball(), config.archive())?;
        let staging = StagingArea::prepare(config.work_dir(), false)?;
        Ok(Self {
            _temp: temp,
            config,
            archive,
            staging,
        })
    }

    fn run(&self, env: &mut LenientEnv) -> Result<PipelineReport> {
        let tags = SupportedTags::from_triples([TagTriple::new("py3", "none", "any")]);
        Ok(run_pipeline(
            &self.config,
            &self.archive,
            &self.staging,
            env,
            &tags,
        )?)
    }
}

#[test]
fn inspect_describes_the_archive() -> Result<()> {
    let fixture = Fixture::new()?;
    let report = inspect(&fixture.config)?;
    assert_eq!(report.compression, Compression::Gzip);
    assert_eq!(report.root, PathBuf::from("acme-2.4.0-f00dfeed-src"));
    let release = report.release.expect("release info");
    assert_eq!(
        (release.name.as_str(), release.version.as_str(), release.commit.as_str()),
        ("acme", "2.4.0", "f00dfeed")
    );
    let names: BTreeSet<&str> = report.inventory.names().collect();
    assert_eq!(names, BTreeSet::from(["six", "twisted"]));
    assert_eq!(report.inventory.opaque.len(), 1);
    Ok(())
}

#[test]
fn inspect_rejects_a_missing_archive() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let config = Config::from_snapshot(
        &EnvSnapshot::testing(&[]),
        temp.path().join("missing.tgz"),
        ConfigOverrides::default(),
    )?;
    let err = inspect(&config).expect_err("no archive");
    assert!(err.is_user_error());
    Ok(())
}

#[test]
fn resolved_run_writes_requirements_and_manifest() -> Result<()> {
    let fixture = Fixture::new()?;
    let mut env = LenientEnv::default();
    let report = fixture.run(&mut env)?;

    assert!(report.succeeded());
    let resolved = report.resolved.as_ref().expect("resolved");
    assert_eq!(
        fs::read_to_string(&resolved.requirements)?,
        "six==1.16.0\ntwisted==22.4.0\n"
    );
    assert_eq!(resolved.installed.get("pip").map(String::as_str), Some("24.0"));

    let six = resolved
        .wheels
        .iter()
        .find(|wheel| wheel.name == "six")
        .expect("six artifact");
    assert_eq!(six.path, fixture.staging.wheels_dir().join("six-1.16.0-py2.py3-none-any.whl"));
    assert_eq!(six.sha256, hex::encode(Sha256::digest(b"six wheel")));

    let manifest: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&resolved.manifest)?)?;
    assert_eq!(manifest["release"]["commit"], "f00dfeed");
    assert_eq!(manifest["requirements"][1], "twisted==22.4.0");
    assert_eq!(manifest["wheels"].as_array().map(Vec::len), Some(2));
    assert_eq!(manifest["installed"]["six"], "1.16.0");
    Ok(())
}

#[test]
fn rerun_is_idempotent() -> Result<()> {
    let fixture = Fixture::new()?;
    let mut env = LenientEnv::default();
    let first = fixture.run(&mut env)?;
    let second = fixture.run(&mut env)?;

    assert_eq!(second.orchestration.passes, 0);
    assert!(second.orchestration.installed_by_run.is_empty());
    assert_eq!(
        first.resolved.map(|resolved| resolved.installed),
        second.resolved.map(|resolved| resolved.installed)
    );
    Ok(())
}

#[test]
fn partial_resolution_writes_nothing() -> Result<()> {
    let fixture = Fixture::new()?;
    let mut env = LenientEnv {
        broken: BTreeSet::from(["Twisted-22.4.0".to_string()]),
        ..LenientEnv::default()
    };
    let report = fixture.run(&mut env)?;

    assert!(!report.succeeded());
    assert!(report.resolved.is_none());
    assert_eq!(
        report.orchestration.outcome,
        Outcome::Partial {
            unresolved: vec!["twisted".to_string()],
            stuck_in_queue: Vec::new(),
        }
    );
    assert!(!fixture.staging.requirements_path().exists());
    assert!(!fixture.staging.manifest_path().exists());
    Ok(())
}

#[test]
fn inconsistent_environment_is_not_a_success() -> Result<()> {
    let fixture = Fixture::new()?;
    let mut env = LenientEnv {
        check_failure: Some("twisted 22.4.0 requires attrs".into()),
        ..LenientEnv::default()
    };
    let report = fixture.run(&mut env)?;
    assert!(report.resolved.is_some());
    assert!(!report.succeeded());
    Ok(())
}

use color_eyre::Result;
use serde_json::{json, Value};
use tarvenv_archive::CandidateRole;
use tarvenv_core::{
    inspect, parse_alias, prepare_environment, BuildEnvVar, Config, ConfigOverrides, CoreError,
    InspectReport, IntegrityCheck, Outcome, PipelineReport,
};

use crate::cli::{ArchiveArgs, BuildArgs, CommandCli, InspectArgs};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Ok,
    UserError,
    Failure,
}

impl CommandStatus {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::UserError => 1,
            Self::Failure => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::UserError => "user-error",
            Self::Failure => "failure",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub status: CommandStatus,
    pub message: String,
    /// Extra human-readable lines printed after the message.
    pub lines: Vec<String>,
    pub details: Value,
}

impl CommandOutcome {
    fn ok(message: String, lines: Vec<String>, details: Value) -> Self {
        Self {
            status: CommandStatus::Ok,
            message,
            lines,
            details,
        }
    }

    fn from_error(err: &CoreError) -> Self {
        let status = if err.is_user_error() {
            CommandStatus::UserError
        } else {
            CommandStatus::Failure
        };
        Self {
            status,
            message: err.to_string(),
            lines: Vec::new(),
            details: json!({ "reason": error_reason(err) }),
        }
    }
}

pub fn dispatch(command: &CommandCli) -> Result<CommandOutcome> {
    match command {
        CommandCli::Inspect(args) => run_inspect(args),
        CommandCli::Build(args) => run_build(args),
    }
}

fn run_inspect(args: &InspectArgs) -> Result<CommandOutcome> {
    let config = match archive_overrides(&args.archive, ConfigOverrides::default())
        .and_then(|overrides| Config::from_env(&args.archive.tarball, overrides))
    {
        Ok(config) => config,
        Err(err) => return Ok(CommandOutcome::from_error(&err)),
    };
    match inspect(&config) {
        Ok(report) => {
            let message = inspect_summary(&report);
            let lines = inspect_lines(&report);
            Ok(CommandOutcome::ok(message, lines, serde_json::to_value(&report)?))
        }
        Err(err) => Ok(CommandOutcome::from_error(&err)),
    }
}

fn run_build(args: &BuildArgs) -> Result<CommandOutcome> {
    let config = match build_overrides(args)
        .and_then(|overrides| Config::from_env(&args.archive.tarball, overrides))
    {
        Ok(config) => config,
        Err(err) => return Ok(CommandOutcome::from_error(&err)),
    };
    match prepare_environment(&config) {
        Ok(report) => Ok(build_outcome(&report)?),
        Err(err) => Ok(CommandOutcome::from_error(&err)),
    }
}

fn archive_overrides(
    args: &ArchiveArgs,
    overrides: ConfigOverrides,
) -> Result<ConfigOverrides, CoreError> {
    let aliases = args
        .aliases
        .iter()
        .map(String::as_str)
        .map(parse_alias)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ConfigOverrides {
        skip: args.skip.clone(),
        ignore_prefixes: args.ignore_prefixes.clone(),
        aliases,
        ..overrides
    })
}

fn build_overrides(args: &BuildArgs) -> Result<ConfigOverrides, CoreError> {
    let build_env = args
        .build_env
        .iter()
        .map(String::as_str)
        .map(BuildEnvVar::parse)
        .collect::<Result<Vec<_>, _>>()?;
    archive_overrides(
        &args.archive,
        ConfigOverrides {
            work_dir: args.work_dir.clone(),
            sandbox: args.sandbox.clone(),
            reset_sandbox: args.reset,
            recreate_work_dir: args.recreate_work_dir,
            max_passes: args.max_passes,
            offline: args.offline,
            python: args.python.clone(),
            build_env,
            openssl_dir: args.openssl_dir.clone(),
            extra_requirements: args.extra_requirements.clone(),
            ..ConfigOverrides::default()
        },
    )
}

fn inspect_summary(report: &InspectReport) -> String {
    let count = |role: CandidateRole| {
        report
            .inventory
            .candidates
            .iter()
            .filter(|candidate| candidate.role == role)
            .count()
    };
    let release = report.release.as_ref().map_or_else(
        || report.root.display().to_string(),
        |release| format!("{} {} ({})", release.name, release.version, release.commit),
    );
    format!(
        "{release}: {} packages ({} prebuilt wheels, {} source trees)",
        report.inventory.candidates.len(),
        count(CandidateRole::PrebuiltWheel),
        count(CandidateRole::SourceTree),
    )
}

fn inspect_lines(report: &InspectReport) -> Vec<String> {
    let width = report
        .inventory
        .candidates
        .iter()
        .map(|candidate| candidate.name.len())
        .max()
        .unwrap_or(0);
    let mut lines = Vec::new();
    for candidate in &report.inventory.candidates {
        let role = match candidate.role {
            CandidateRole::PrebuiltWheel => "wheel",
            CandidateRole::SourceTree => "source",
            CandidateRole::Opaque => "opaque",
        };
        let locations: Vec<String> = candidate
            .locations
            .iter()
            .filter_map(|location| location.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        lines.push(format!(
            "  {:<width$}  {role:<6}  {}",
            candidate.name,
            locations.join(", ")
        ));
    }
    for ignored in &report.inventory.ignored {
        lines.push(format!("  ignored: {}", ignored.path.display()));
    }
    for opaque in &report.inventory.opaque {
        lines.push(format!("  not a package: {}", opaque.display()));
    }
    for duplicate in &report.inventory.duplicates {
        lines.push(format!(
            "  duplicate {}: kept {}, dropped {}",
            duplicate.name,
            duplicate.kept.display(),
            duplicate.dropped.display()
        ));
    }
    lines
}

fn build_outcome(report: &PipelineReport) -> Result<CommandOutcome> {
    let orchestration = &report.orchestration;
    let details = serde_json::to_value(report)?;
    let mut lines = Vec::new();
    let (status, message) = match (&orchestration.outcome, &orchestration.integrity) {
        (Outcome::Resolved, IntegrityCheck::Failed { details: problems }) => {
            lines.extend(problems.lines().map(|line| format!("  {line}")));
            (
                CommandStatus::Failure,
                "all packages installed but the environment is inconsistent".to_string(),
            )
        }
        (Outcome::Resolved, _) => {
            if let Some(resolved) = &report.resolved {
                lines.push(format!("  requirements: {}", resolved.requirements.display()));
                lines.push(format!("  manifest: {}", resolved.manifest.display()));
            }
            (
                CommandStatus::Ok,
                format!(
                    "environment resolved in {} passes ({} installed by this run, {} already present)",
                    orchestration.passes,
                    orchestration.installed_by_run.len(),
                    orchestration.pre_resolved.len()
                ),
            )
        }
        (
            Outcome::Partial {
                unresolved,
                stuck_in_queue,
            },
            _,
        ) => {
            for name in unresolved.iter().chain(stuck_in_queue) {
                let reason = orchestration
                    .last_failure(name)
                    .map_or("no attempt recorded", |failure| failure.reason.as_str());
                lines.push(format!("  {name}: {reason}"));
            }
            (
                CommandStatus::Failure,
                format!(
                    "environment did not converge after {} passes ({:?}): {} without a wheel, {} not installed",
                    orchestration.passes,
                    orchestration.stop_reason,
                    unresolved.len(),
                    stuck_in_queue.len()
                ),
            )
        }
    };
    Ok(CommandOutcome {
        status,
        message,
        lines,
        details,
    })
}

fn error_reason(err: &CoreError) -> &'static str {
    match err {
        CoreError::Archive(_) => "archive",
        CoreError::Sandbox(_) => "sandbox",
        CoreError::InvalidConfig { .. } => "invalid-config",
        CoreError::Io { .. } => "io",
        CoreError::Manifest(_) => "manifest",
    }
}

use std::fmt::Write as _;
use std::io;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::options::BuildMethod;

/// A sandbox command ran and exited unsuccessfully.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[error("`{command}` exited with status {exit_code}: {}", crate::process::tail(.stderr, 5))]
pub struct EnvironmentCommandError {
    pub command: String,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// One failed wheel build method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildAttempt {
    pub method: BuildMethod,
    pub exit_code: i32,
    pub stderr_tail: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize)]
#[error("no build method produced a wheel for {}: {}", .source_tree.display(), summarize(.attempts))]
pub struct BuildError {
    pub source_tree: PathBuf,
    pub attempts: Vec<BuildAttempt>,
}

fn summarize(attempts: &[BuildAttempt]) -> String {
    let mut out = String::new();
    for (idx, attempt) in attempts.iter().enumerate() {
        if idx > 0 {
            out.push_str("; ");
        }
        let last_line = attempt.stderr_tail.lines().last().unwrap_or("no output");
        let _ = write!(out, "{} exited {} ({last_line})", attempt.method, attempt.exit_code);
    }
    out
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error(transparent)]
    Command(#[from] EnvironmentCommandError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no Python interpreter found; pass --python or set TARVENV_PYTHON")]
    NoInterpreter,
    #[error("no wheel found in {}", .dir.display())]
    MissingWheel { dir: PathBuf },
    #[error("expected one wheel in {} but found {}", .dir.display(), .wheels.join(", "))]
    AmbiguousWheels { dir: PathBuf, wheels: Vec<String> },
    #[error("invalid {what} output: {source}")]
    InvalidOutput {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl SandboxError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io {
            action,
            path,
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_error_lists_every_attempt() {
        let err = BuildError {
            source_tree: PathBuf::from("/work/sources/twisted-22.4.0"),
            attempts: vec![
                BuildAttempt {
                    method: BuildMethod::SetupPy,
                    exit_code: 1,
                    stderr_tail: "running bdist_wheel\nerror: invalid command".into(),
                },
                BuildAttempt {
                    method: BuildMethod::PipWheel,
                    exit_code: 2,
                    stderr_tail: String::new(),
                },
            ],
        };
        let message = err.to_string();
        assert!(message.contains("setup.py bdist_wheel exited 1 (error: invalid command)"));
        assert!(message.contains("pip wheel exited 2 (no output)"));
    }

    #[test]
    fn command_errors_show_the_stderr_tail() {
        let err = EnvironmentCommandError {
            command: "pip install six.whl".into(),
            exit_code: 1,
            stdout: String::new(),
            stderr: "a\nb\nc\nd\ne\nf\nERROR: no matching distribution".into(),
        };
        let message = err.to_string();
        assert!(message.starts_with("`pip install six.whl` exited with status 1"));
        assert!(message.contains("ERROR: no matching distribution"));
        assert!(!message.contains("a\n"));
    }
}

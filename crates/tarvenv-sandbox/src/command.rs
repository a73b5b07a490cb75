use std::fmt;
use std::path::{Path, PathBuf};

/// Executables that run inside a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SandboxCommand {
    Python,
    Pip,
}

/// Command -> (program relative to the interpreter, leading arguments).
const COMMAND_TABLE: &[(SandboxCommand, &[&str])] = &[
    (SandboxCommand::Python, &[]),
    (SandboxCommand::Pip, &["-m", "pip"]),
];

#[cfg(windows)]
const INTERPRETER: &[&str] = &["Scripts", "python.exe"];
#[cfg(not(windows))]
const INTERPRETER: &[&str] = &["bin", "python"];

impl SandboxCommand {
    /// Path of the sandbox interpreter below `root`.
    #[must_use]
    pub fn interpreter(root: &Path) -> PathBuf {
        INTERPRETER
            .iter()
            .fold(root.to_path_buf(), |path, part| path.join(part))
    }

    /// Program and full argument vector for running this command with `args`.
    #[must_use]
    pub fn invocation(self, root: &Path, args: &[String]) -> (PathBuf, Vec<String>) {
        let prefix = COMMAND_TABLE
            .iter()
            .find(|(command, _)| *command == self)
            .map_or(&[][..], |(_, prefix)| *prefix);
        let mut full: Vec<String> = prefix.iter().map(|arg| (*arg).to_string()).collect();
        full.extend_from_slice(args);
        (Self::interpreter(root), full)
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Pip => "pip",
        }
    }
}

impl fmt::Display for SandboxCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pip_runs_as_a_python_module() {
        let root = Path::new("/opt/venv");
        let (program, args) = SandboxCommand::Pip.invocation(root, &["list".to_string()]);
        assert_eq!(program, SandboxCommand::interpreter(root));
        assert_eq!(args, vec!["-m", "pip", "list"]);
    }

    #[test]
    fn python_passes_arguments_through() {
        let root = Path::new("/opt/venv");
        let (_, args) = SandboxCommand::Python.invocation(root, &["setup.py".to_string()]);
        assert_eq!(args, vec!["setup.py"]);
    }

    #[cfg(not(windows))]
    #[test]
    fn interpreter_lives_in_bin() {
        assert_eq!(
            SandboxCommand::interpreter(Path::new("/opt/venv")),
            Path::new("/opt/venv/bin/python")
        );
    }
}

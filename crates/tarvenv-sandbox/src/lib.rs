//! Isolated Python environment driven through its own interpreter and pip.
//!
//! Every executable that runs inside the sandbox goes through
//! [`SandboxCommand`]; nothing is looked up on `PATH` after creation.

#![deny(clippy::all)]

mod command;
mod environment;
mod error;
mod options;
mod process;
mod sandbox;
mod tags;

pub use command::SandboxCommand;
pub use environment::Environment;
pub use error::{BuildAttempt, BuildError, EnvironmentCommandError, SandboxError};
pub use options::{
    BuildMethod, BuildRequest, InstallOptions, InstallTarget, SandboxOptions,
    DEFAULT_MAX_CAPTURE_BYTES,
};
pub use process::{run_command, RunOutput};
pub use sandbox::{find_wheel, Sandbox};

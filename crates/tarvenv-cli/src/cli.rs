use std::path::PathBuf;

use clap::{value_parser, ArgAction, Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "tarvenv",
    author,
    version,
    about = "Turn a vendor source tarball into an installed Python environment",
    disable_help_subcommand = true
)]
pub struct TarvenvCli {
    #[arg(
        short,
        long,
        help = "Suppress human output (errors still print to stderr)",
        global = true
    )]
    pub quiet: bool,
    #[arg(
        short,
        long,
        action = ArgAction::Count,
        help = "Increase logging (-vv reaches trace)",
        global = true
    )]
    pub verbose: u8,
    #[arg(long, help = "Force trace logging regardless of -v/-q", global = true)]
    pub trace: bool,
    #[arg(
        long,
        help = "Emit {status,message,details} JSON envelopes",
        global = true
    )]
    pub json: bool,
    #[command(subcommand)]
    pub command: CommandCli,
}

#[derive(Subcommand, Debug)]
pub enum CommandCli {
    #[command(
        about = "Build and install every package of the archive into a sandbox",
        after_help = "Examples:\n  tarvenv build authproxy-6.0.0-src.tgz\n  tarvenv build --offline --openssl-dir /opt/openssl authproxy.tgz\n"
    )]
    Build(BuildArgs),
    #[command(about = "List the packages an archive provides without building anything")]
    Inspect(InspectArgs),
}

/// Flags shared by every command that reads an archive.
#[derive(Args, Debug, Clone)]
pub struct ArchiveArgs {
    #[arg(value_parser = value_parser!(PathBuf), help = "Vendor source tarball (.tar, .tgz, .tar.bz2)")]
    pub tarball: PathBuf,
    #[arg(long = "skip", value_name = "NAME", help = "Distribution to leave out (repeatable)")]
    pub skip: Vec<String>,
    #[arg(
        long = "ignore-prefix",
        value_name = "PREFIX",
        help = "Package directory prefix that is not a package (repeatable)"
    )]
    pub ignore_prefixes: Vec<String>,
    #[arg(
        long = "alias",
        value_name = "FROM=TO",
        help = "Install directory FROM under distribution name TO (repeatable)"
    )]
    pub aliases: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct InspectArgs {
    #[command(flatten)]
    pub archive: ArchiveArgs,
}

#[derive(Args, Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct BuildArgs {
    #[command(flatten)]
    pub archive: ArchiveArgs,
    #[arg(long, value_name = "DIR", help = "Sandbox location [default: <work-dir>/venv]")]
    pub sandbox: Option<PathBuf>,
    #[arg(long, value_name = "DIR", help = "Staging directory [default: tarvenv-work]")]
    pub work_dir: Option<PathBuf>,
    #[arg(long, help = "Delete and recreate the sandbox first")]
    pub reset: bool,
    #[arg(long, help = "Discard extracted sources and collected wheels first")]
    pub recreate_work_dir: bool,
    #[arg(long, value_name = "N", help = "Upper bound on build/install passes")]
    pub max_passes: Option<usize>,
    #[arg(long, help = "Never download a wheel missing from the archive")]
    pub offline: bool,
    #[arg(long, value_name = "PATH", help = "Interpreter used to create the sandbox")]
    pub python: Option<PathBuf>,
    #[arg(
        long = "build-env",
        value_name = "NAME:KEY=VALUE",
        help = "Extra variable when building one distribution (repeatable)"
    )]
    pub build_env: Vec<String>,
    #[arg(
        long,
        value_name = "DIR",
        help = "OpenSSL prefix used when compiling cryptography"
    )]
    pub openssl_dir: Option<PathBuf>,
    #[arg(
        long = "extra-requirement",
        value_name = "REQUIREMENT",
        help = "Fetch and install a requirement the archive does not bundle (repeatable)"
    )]
    pub extra_requirements: Vec<String>,
}

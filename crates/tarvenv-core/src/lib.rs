//! Turns a vendor source tarball into an installed Python environment.
//!
//! [`prepare_environment`] opens the archive, stages its packages, and runs
//! the build/install loop in [`orchestrator`] against a sandbox until every
//! package is installed or no further progress is possible.

#![deny(clippy::all)]

mod config;
mod error;
pub mod orchestrator;
mod outcome;
mod pipeline;
mod staging;

#[cfg(test)]
mod fixtures;

pub use config::{
    parse_alias, BuildEnvVar, Config, ConfigOverrides, EnvSnapshot, DEFAULT_MAX_PASSES,
};
pub use error::CoreError;
pub use orchestrator::{orchestrate, OrchestratorOptions, StagedCandidate};
pub use outcome::{
    CandidateFailure, IntegrityCheck, OrchestrationReport, Outcome, Phase, StopReason,
};
pub use pipeline::{
    inspect, prepare_environment, run_pipeline, InspectReport, PipelineReport,
    ResolvedEnvironment, WheelArtifact,
};
pub use staging::StagingArea;

use std::collections::BTreeMap;
use std::path::PathBuf;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    /// Nothing left to build or install.
    Converged,
    /// A full pass changed neither the unresolved set nor the install queue.
    Stagnated,
    PassLimit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Build,
    Install,
}

/// One failed attempt for one candidate in one pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateFailure {
    pub name: String,
    pub pass: usize,
    pub phase: Phase,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum IntegrityCheck {
    Skipped,
    Passed,
    Failed { details: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum Outcome {
    Resolved,
    /// Candidates that never got a wheel, and wheels that never installed.
    Partial {
        unresolved: Vec<String>,
        stuck_in_queue: Vec<String>,
    },
}

impl Outcome {
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrchestrationReport {
    pub passes: usize,
    pub stop_reason: StopReason,
    /// Candidate name -> wheel in the wheels directory.
    pub wheels: IndexMap<String, PathBuf>,
    /// Candidates already installed before the run.
    pub pre_resolved: Vec<String>,
    /// Candidates installed by this run, in install order.
    pub installed_by_run: Vec<String>,
    pub failures: Vec<CandidateFailure>,
    /// Normalized name -> version of everything in the environment at the end.
    pub installed: BTreeMap<String, String>,
    pub integrity: IntegrityCheck,
    pub outcome: Outcome,
}

impl OrchestrationReport {
    pub fn failures_for<'a, 'b>(&'a self, name: &'b str) -> impl Iterator<Item = &'a CandidateFailure> + use<'a, 'b> {
        self.failures.iter().filter(move |failure| failure.name == name)
    }

    /// The most recent failure reason for `name`.
    #[must_use]
    pub fn last_failure(&self, name: &str) -> Option<&CandidateFailure> {
        self.failures_for(name).last()
    }
}

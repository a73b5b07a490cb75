//! Read-only view over a vendor source tarball.
//!
//! The archive must contain exactly one top-level directory. Packages live in
//! a conventional subdirectory of that root (`pkgs` by default) and each
//! immediate child there is classified as a prebuilt wheel, a source tree or
//! an opaque directory.

#![deny(clippy::all)]

mod candidates;
mod error;
mod inventory;
mod options;
mod reader;

#[cfg(test)]
mod fixtures;

pub use candidates::{
    CandidateRole, DuplicateCandidate, IgnoredEntry, IgnoredReason, Inventory, PackageCandidate,
};
pub use error::ArchiveError;
pub use inventory::{ArchiveEntry, ArchiveInventory, EntryKind, ReleaseInfo};
pub use options::ArchiveOptions;
pub use reader::Compression;

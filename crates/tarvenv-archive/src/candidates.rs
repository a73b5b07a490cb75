use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tarvenv_wheel::{split_versioned_dir, WheelDescriptor, WHEEL_SUFFIX};
use tracing::{debug, warn};

use crate::inventory::{ArchiveInventory, EntryKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CandidateRole {
    PrebuiltWheel,
    SourceTree,
    Opaque,
}

/// A package found in the archive, named by its normalized distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageCandidate {
    pub name: String,
    pub role: CandidateRole,
    /// Archive paths. For prebuilt wheels every location is an alternative
    /// build of the same distribution (e.g. one per platform).
    pub locations: Vec<PathBuf>,
    /// The opaque directory an embedded wheel was found in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedded_in: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateCandidate {
    pub name: String,
    pub kept: PathBuf,
    pub dropped: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IgnoredReason {
    Prefix,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IgnoredEntry {
    pub path: PathBuf,
    pub reason: IgnoredReason,
}

/// Result of one scan of the packages directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub candidates: Vec<PackageCandidate>,
    pub ignored: Vec<IgnoredEntry>,
    /// Opaque directories that held no embedded wheel.
    pub opaque: Vec<PathBuf>,
    pub duplicates: Vec<DuplicateCandidate>,
}

impl Inventory {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PackageCandidate> {
        self.candidates.iter().find(|candidate| candidate.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.candidates.iter().map(|candidate| candidate.name.as_str())
    }
}

impl ArchiveInventory {
    /// Classifies one immediate child of the packages directory.
    #[must_use]
    pub fn classify(&self, child: &Path) -> CandidateRole {
        if file_name(child).is_some_and(|name| name.ends_with(WHEEL_SUFFIX)) {
            return CandidateRole::PrebuiltWheel;
        }
        let is_source_tree = self.entry_kind(child) == Some(EntryKind::Directory)
            && self
                .options()
                .build_descriptors
                .iter()
                .any(|descriptor| self.entry_kind(&child.join(descriptor)) == Some(EntryKind::File));
        if is_source_tree {
            CandidateRole::SourceTree
        } else {
            CandidateRole::Opaque
        }
    }

    /// Scans the packages directory and produces the candidate set.
    ///
    /// Opaque directories are searched recursively for embedded wheels. When
    /// several candidates claim the same name, top-level wheels win over
    /// source trees, which win over embedded wheels.
    #[must_use]
    pub fn candidates(&self) -> Inventory {
        let options = self.options();
        let mut inventory = Inventory::default();
        let mut wheels: IndexMap<String, Vec<PathBuf>> = IndexMap::new();
        let mut trees: Vec<PackageCandidate> = Vec::new();
        let mut embedded: IndexMap<String, PackageCandidate> = IndexMap::new();

        for child in self.children(&self.packages_dir()) {
            let Some(name) = file_name(&child.path) else {
                continue;
            };
            if options.is_ignored(name) {
                debug!(entry = name, "ignoring non-package entry");
                inventory.ignored.push(IgnoredEntry {
                    path: child.path.clone(),
                    reason: IgnoredReason::Prefix,
                });
                continue;
            }
            let role = self.classify(&child.path);
            if role == CandidateRole::Opaque {
                let found = self.embedded_wheels(&child.path);
                if found.is_empty() {
                    warn!(entry = name, "opaque package directory without embedded wheels");
                    inventory.opaque.push(child.path);
                    continue;
                }
                for wheel in found {
                    let wheel_name = self.wheel_candidate_name(&wheel);
                    if self.skip(&wheel_name, &wheel, &mut inventory) {
                        continue;
                    }
                    embedded
                        .entry(wheel_name.clone())
                        .or_insert_with(|| PackageCandidate {
                            name: wheel_name,
                            role: CandidateRole::PrebuiltWheel,
                            locations: Vec::new(),
                            embedded_in: Some(child.path.clone()),
                        })
                        .locations
                        .push(wheel);
                }
                continue;
            }

            let candidate_name = match role {
                CandidateRole::PrebuiltWheel => self.wheel_candidate_name(&child.path),
                _ => options.candidate_name(split_versioned_dir(name).0),
            };
            if self.skip(&candidate_name, &child.path, &mut inventory) {
                continue;
            }
            if role == CandidateRole::PrebuiltWheel {
                wheels.entry(candidate_name).or_default().push(child.path);
            } else {
                trees.push(PackageCandidate {
                    name: candidate_name,
                    role,
                    locations: vec![child.path],
                    embedded_in: None,
                });
            }
        }

        let mut merged: IndexMap<String, PackageCandidate> = IndexMap::new();
        let ordered = wheels
            .into_iter()
            .map(|(name, locations)| PackageCandidate {
                name,
                role: CandidateRole::PrebuiltWheel,
                locations,
                embedded_in: None,
            })
            .chain(trees)
            .chain(embedded.into_values());
        for candidate in ordered {
            if let Some(kept) = merged.get(&candidate.name) {
                warn!(
                    candidate = %candidate.name,
                    kept = %display_first(&kept.locations),
                    dropped = %display_first(&candidate.locations),
                    "duplicate package in archive"
                );
                inventory.duplicates.push(DuplicateCandidate {
                    name: candidate.name.clone(),
                    kept: kept.locations.first().cloned().unwrap_or_default(),
                    dropped: candidate.locations.first().cloned().unwrap_or_default(),
                });
                continue;
            }
            merged.insert(candidate.name.clone(), candidate);
        }

        inventory.candidates = merged.into_values().collect();
        inventory
            .candidates
            .sort_by(|a, b| a.locations.first().cmp(&b.locations.first()));
        debug!(
            candidates = inventory.candidates.len(),
            ignored = inventory.ignored.len(),
            opaque = inventory.opaque.len(),
            "scanned packages directory"
        );
        inventory
    }

    /// Wheel files anywhere below `dir`.
    #[must_use]
    pub fn embedded_wheels(&self, dir: &Path) -> Vec<PathBuf> {
        self.members_under(dir)
            .into_iter()
            .filter(|entry| entry.kind == EntryKind::File)
            .filter(|entry| {
                file_name(&entry.path).is_some_and(|name| {
                    name.ends_with(WHEEL_SUFFIX) && !self.options().is_ignored(name)
                })
            })
            .map(|entry| entry.path)
            .collect()
    }

    fn wheel_candidate_name(&self, wheel: &Path) -> String {
        let file = file_name(wheel).unwrap_or_default();
        match WheelDescriptor::parse(file) {
            Ok(descriptor) => self.options().candidate_name(&descriptor.distribution),
            Err(err) => {
                debug!(%err, "naming wheel after its first filename component");
                let stem = file.strip_suffix(WHEEL_SUFFIX).unwrap_or(file);
                self.options()
                    .candidate_name(stem.split('-').next().unwrap_or(stem))
            }
        }
    }

    fn skip(&self, name: &str, path: &Path, inventory: &mut Inventory) -> bool {
        if !self.options().is_skipped(name) {
            return false;
        }
        debug!(candidate = name, "skipping package by configuration");
        inventory.ignored.push(IgnoredEntry {
            path: path.to_path_buf(),
            reason: IgnoredReason::Skipped,
        });
        true
    }
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(OsStr::to_str)
}

fn display_first(locations: &[PathBuf]) -> String {
    locations
        .first()
        .map(|path| path.display().to_string())
        .unwrap_or_default()
}

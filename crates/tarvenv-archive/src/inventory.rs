use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use serde::{Deserialize, Serialize};
use tar::EntryType;
use tracing::{debug, warn};

use crate::error::ArchiveError;
use crate::options::ArchiveOptions;
use crate::reader::{open_stream, Compression};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
}

/// Release metadata encoded in a `{name}-{version}-{commit}-src` root
/// directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub name: String,
    pub version: String,
    pub commit: String,
}

impl ReleaseInfo {
    #[must_use]
    pub fn parse(dir_name: &str) -> Option<Self> {
        let parts: Vec<&str> = dir_name.split('-').collect();
        match parts.as_slice() {
            [name, version, commit, "src"]
                if !name.is_empty() && !version.is_empty() && !commit.is_empty() =>
            {
                Some(Self {
                    name: (*name).to_string(),
                    version: (*version).to_string(),
                    commit: (*commit).to_string(),
                })
            }
            _ => None,
        }
    }
}

/// Header index of a tarball with a validated single root directory.
///
/// Only headers are kept in memory; [`ArchiveInventory::extract`] streams the
/// archive again to copy content out.
#[derive(Debug, Clone)]
pub struct ArchiveInventory {
    path: PathBuf,
    compression: Compression,
    entries: BTreeMap<PathBuf, EntryKind>,
    root: PathBuf,
    options: ArchiveOptions,
}

impl ArchiveInventory {
    /// Reads every header of the archive and validates its layout.
    ///
    /// # Errors
    ///
    /// Returns a structure error when the archive is empty, does not have
    /// exactly one top-level directory, or contains entries escaping the
    /// root; returns [`ArchiveError::Read`] when it cannot be decoded.
    pub fn open(path: impl AsRef<Path>, options: &ArchiveOptions) -> Result<Self, ArchiveError> {
        let path = path.as_ref().to_path_buf();
        let read_err = |source: io::Error| ArchiveError::Read {
            path: path.clone(),
            source,
        };
        let compression = Compression::detect(&path).map_err(read_err)?;
        let mut archive = tar::Archive::new(open_stream(&path, compression).map_err(read_err)?);

        let mut entries = BTreeMap::new();
        for entry in archive.entries().map_err(read_err)? {
            let entry = entry.map_err(read_err)?;
            let kind = match entry.header().entry_type() {
                EntryType::Directory => EntryKind::Directory,
                EntryType::XGlobalHeader
                | EntryType::XHeader
                | EntryType::GNULongName
                | EntryType::GNULongLink => continue,
                _ => EntryKind::File,
            };
            let raw = entry.path().map_err(read_err)?;
            let Some(relative) = normalize_entry_path(&raw)? else {
                continue;
            };
            if relative.iter().any(|part| {
                part.to_str()
                    .is_some_and(|name| options.is_system_file(name))
            }) {
                continue;
            }
            for ancestor in relative.ancestors().skip(1) {
                if ancestor.as_os_str().is_empty() {
                    break;
                }
                entries
                    .entry(ancestor.to_path_buf())
                    .or_insert(EntryKind::Directory);
            }
            entries.insert(relative, kind);
        }

        if entries.is_empty() {
            return Err(ArchiveError::Empty { path });
        }
        let roots: BTreeSet<PathBuf> = entries
            .keys()
            .filter_map(|entry| entry.components().next())
            .map(|component| PathBuf::from(component.as_os_str()))
            .collect();
        let root = match roots.iter().next() {
            Some(root)
                if roots.len() == 1 && entries.get(root) == Some(&EntryKind::Directory) =>
            {
                root.clone()
            }
            _ => {
                return Err(ArchiveError::AmbiguousRoot {
                    path,
                    roots: roots
                        .iter()
                        .map(|root| root.display().to_string())
                        .collect(),
                })
            }
        };
        debug!(
            archive = %path.display(),
            root = %root.display(),
            entries = entries.len(),
            "indexed archive"
        );
        Ok(Self {
            path,
            compression,
            entries,
            root,
            options: options.clone(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn compression(&self) -> Compression {
        self.compression
    }

    #[must_use]
    pub fn options(&self) -> &ArchiveOptions {
        &self.options
    }

    /// The single top-level directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn packages_dir(&self) -> PathBuf {
        self.root.join(&self.options.packages_dir)
    }

    #[must_use]
    pub fn release(&self) -> Option<ReleaseInfo> {
        self.root.to_str().and_then(ReleaseInfo::parse)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn entry_kind(&self, path: &Path) -> Option<EntryKind> {
        self.entries.get(path).copied()
    }

    pub fn entries(&self) -> impl Iterator<Item = ArchiveEntry> + '_ {
        self.entries.iter().map(|(path, kind)| ArchiveEntry {
            path: path.clone(),
            kind: *kind,
        })
    }

    /// Entries whose parent is `dir`, in path order.
    #[must_use]
    pub fn children(&self, dir: &Path) -> Vec<ArchiveEntry> {
        self.entries()
            .filter(|entry| entry.path.parent() == Some(dir))
            .collect()
    }

    /// Every entry strictly below `dir`.
    #[must_use]
    pub fn members_under(&self, dir: &Path) -> Vec<ArchiveEntry> {
        self.entries()
            .filter(|entry| entry.path != dir && entry.path.starts_with(dir))
            .collect()
    }

    /// Copies one file or a whole directory subtree out of the archive.
    ///
    /// A file lands at `destination` (or inside it, when `destination` is an
    /// existing directory); a directory lands at `destination/<dir name>`.
    /// Returns the extracted file paths.
    ///
    /// # Errors
    ///
    /// Returns [`ArchiveError::Collision`] when a target file exists and
    /// `overwrite` is false, [`ArchiveError::MissingEntry`] for unknown
    /// paths, and [`ArchiveError::Extract`] on I/O failures.
    pub fn extract(
        &self,
        path: impl AsRef<Path>,
        destination: impl AsRef<Path>,
        overwrite: bool,
    ) -> Result<Vec<PathBuf>, ArchiveError> {
        let requested = path.as_ref();
        let destination = destination.as_ref();
        let missing = || ArchiveError::MissingEntry {
            path: requested.to_path_buf(),
        };
        let source = normalize_entry_path(requested)?.ok_or_else(missing)?;
        let kind = self.entry_kind(&source).ok_or_else(missing)?;
        let base_name = source.file_name().ok_or_else(missing)?;
        let target_root = match kind {
            EntryKind::File if !destination.is_dir() => destination.to_path_buf(),
            _ => destination.join(base_name),
        };

        let mut plan: BTreeMap<PathBuf, (PathBuf, EntryKind)> = BTreeMap::new();
        for (entry, entry_kind) in &self.entries {
            let Ok(relative) = entry.strip_prefix(&source) else {
                continue;
            };
            let target = if relative.as_os_str().is_empty() {
                target_root.clone()
            } else {
                target_root.join(relative)
            };
            plan.insert(entry.clone(), (target, *entry_kind));
        }

        if !overwrite {
            for (target, entry_kind) in plan.values() {
                if *entry_kind == EntryKind::File && fs::symlink_metadata(target).is_ok() {
                    return Err(ArchiveError::Collision {
                        destination: target.clone(),
                    });
                }
            }
        }

        for (entry, (target, entry_kind)) in &plan {
            if *entry_kind == EntryKind::Directory {
                fs::create_dir_all(target).map_err(|source| ArchiveError::Extract {
                    entry: entry.clone(),
                    destination: target.clone(),
                    source,
                })?;
            }
        }

        let read_err = |source: io::Error| ArchiveError::Read {
            path: self.path.clone(),
            source,
        };
        let mut extracted = Vec::new();
        let mut archive =
            tar::Archive::new(open_stream(&self.path, self.compression).map_err(read_err)?);
        for entry in archive.entries().map_err(read_err)? {
            let mut entry = entry.map_err(read_err)?;
            let raw = entry.path().map_err(read_err)?.into_owned();
            let Some(relative) = normalize_entry_path(&raw)? else {
                continue;
            };
            let Some((target, EntryKind::File)) = plan.get(&relative) else {
                continue;
            };
            if let Some(link) = symlinked_ancestor(&target_root, target) {
                return Err(ArchiveError::UnsafeEntry {
                    entry: format!("{} (through symlink {})", relative.display(), link.display()),
                });
            }
            if entry.header().entry_type() == EntryType::Symlink {
                let within = relative.strip_prefix(&source).unwrap_or(Path::new(""));
                let link = entry.link_name().map_err(read_err)?;
                if !link.as_deref().is_some_and(|link| link_stays_inside(within, link)) {
                    warn!(
                        entry = %relative.display(),
                        link = ?link.as_deref(),
                        "skipping symlink that points outside the extracted tree"
                    );
                    continue;
                }
            }
            write_entry(&mut entry, target).map_err(|source| ArchiveError::Extract {
                entry: relative.clone(),
                destination: target.clone(),
                source,
            })?;
            extracted.push(target.clone());
        }
        debug!(
            entry = %source.display(),
            destination = %target_root.display(),
            files = extracted.len(),
            "extracted archive entry"
        );
        Ok(extracted)
    }
}

fn write_entry<R: Read>(entry: &mut tar::Entry<'_, R>, target: &Path) -> io::Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::symlink_metadata(target) {
        Ok(meta) if meta.is_dir() => {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "a directory occupies the target path",
            ))
        }
        Ok(_) => fs::remove_file(target)?,
        Err(_) => {}
    }
    match entry.header().entry_type() {
        EntryType::Regular | EntryType::Continuous | EntryType::GNUSparse => {
            let mut out = File::create(target)?;
            io::copy(entry, &mut out)?;
            #[cfg(unix)]
            {
                if let Ok(mode) = entry.header().mode() {
                    fs::set_permissions(target, fs::Permissions::from_mode((mode & 0o777) | 0o600))?;
                }
            }
        }
        EntryType::Symlink => {
            entry.unpack(target)?;
        }
        other => {
            debug!(target = %target.display(), kind = ?other, "skipping unsupported entry type");
        }
    }
    Ok(())
}

/// Whether a symlink at `within` pointing at `link` resolves inside the
/// extracted tree, judged lexically.
fn link_stays_inside(within: &Path, link: &Path) -> bool {
    let mut depth = within.parent().map_or(0, |parent| parent.components().count());
    for component in link.components() {
        match component {
            Component::CurDir => {}
            Component::Normal(_) => depth += 1,
            Component::ParentDir if depth > 0 => depth -= 1,
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}

/// The first directory strictly between `root` and `target` that is a
/// symlink on disk.
fn symlinked_ancestor(root: &Path, target: &Path) -> Option<PathBuf> {
    let relative = target.strip_prefix(root).ok()?;
    let mut current = root.to_path_buf();
    for component in relative.parent()?.components() {
        current.push(component);
        if fs::symlink_metadata(&current).is_ok_and(|meta| meta.file_type().is_symlink()) {
            return Some(current);
        }
    }
    None
}

/// Strips `.` components and rejects anything that could escape the root.
fn normalize_entry_path(raw: &Path) -> Result<Option<PathBuf>, ArchiveError> {
    let mut normalized = PathBuf::new();
    for component in raw.components() {
        match component {
            Component::CurDir => {}
            Component::Normal(part) => normalized.push(part),
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ArchiveError::UnsafeEntry {
                    entry: raw.display().to_string(),
                })
            }
        }
    }
    if normalized.as_os_str().is_empty() {
        Ok(None)
    } else {
        Ok(Some(normalized))
    }
}

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::name::normalize_name;
use crate::tags::{SupportedTags, TagTriple};

pub const WHEEL_SUFFIX: &str = ".whl";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("unparseable wheel filename `{filename}`: {reason}")]
pub struct UnparseableWheelName {
    pub filename: String,
    pub reason: &'static str,
}

/// The parts of a binary-distribution filename:
/// `{distribution}-{version}[-{build_tag}]-{python_tag}-{abi_tag}-{platform_tag}.whl`.
///
/// Each tag field may advertise several alternatives joined with `.`; they
/// are kept in filename order with duplicates dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WheelDescriptor {
    pub distribution: String,
    pub version: String,
    pub build_tag: Option<String>,
    pub python_tags: Vec<String>,
    pub abi_tags: Vec<String>,
    pub platform_tags: Vec<String>,
}

impl WheelDescriptor {
    /// Parses a bare wheel filename (no directory components).
    ///
    /// The name is split on every `-`, so a distribution must use `_` for its
    /// own separators: `a-b-1.0-py3-none-any.whl` is rejected rather than
    /// read as distribution `a-b`. Versions and build tags must start with a
    /// digit, which is stricter than a pattern that lets the distribution
    /// absorb extra hyphens.
    ///
    /// # Errors
    ///
    /// Returns [`UnparseableWheelName`] when the name does not follow the
    /// wheel grammar.
    pub fn parse(filename: &str) -> Result<Self, UnparseableWheelName> {
        let fail = |reason| UnparseableWheelName {
            filename: filename.to_string(),
            reason,
        };
        let stem = filename
            .strip_suffix(WHEEL_SUFFIX)
            .ok_or_else(|| fail("missing .whl suffix"))?;
        let parts: Vec<&str> = stem.split('-').collect();
        if parts.iter().any(|part| part.is_empty()) {
            return Err(fail("empty component"));
        }
        let (distribution, version, build_tag, tags) = match parts.as_slice() {
            [distribution, version, tags @ ..] if tags.len() == 3 => {
                (*distribution, *version, None, tags)
            }
            [distribution, version, build, tags @ ..] if tags.len() == 3 => {
                if !build.starts_with(|ch: char| ch.is_ascii_digit()) {
                    return Err(fail("build tag must start with a digit"));
                }
                (*distribution, *version, Some((*build).to_string()), tags)
            }
            _ => return Err(fail("expected 5 or 6 dash-separated components")),
        };
        if !version.starts_with(|ch: char| ch.is_ascii_digit()) {
            return Err(fail("version must start with a digit"));
        }
        Ok(Self {
            distribution: distribution.to_string(),
            version: version.to_string(),
            build_tag,
            python_tags: split_tag_set(tags[0]).ok_or_else(|| fail("empty python tag"))?,
            abi_tags: split_tag_set(tags[1]).ok_or_else(|| fail("empty abi tag"))?,
            platform_tags: split_tag_set(tags[2]).ok_or_else(|| fail("empty platform tag"))?,
        })
    }

    /// Every python × abi × platform combination advertised by the filename.
    #[must_use]
    pub fn triples(&self) -> Vec<TagTriple> {
        let mut triples =
            Vec::with_capacity(self.python_tags.len() * self.abi_tags.len() * self.platform_tags.len());
        for python in &self.python_tags {
            for abi in &self.abi_tags {
                for platform in &self.platform_tags {
                    triples.push(TagTriple::new(python.as_str(), abi.as_str(), platform.as_str()));
                }
            }
        }
        triples
    }

    #[must_use]
    pub fn is_compatible(&self, target: &SupportedTags) -> bool {
        self.triples().iter().any(|triple| target.supports(triple))
    }

    #[must_use]
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.distribution)
    }

    /// `distribution==version`, the requirement used to fetch the same
    /// release from an index.
    #[must_use]
    pub fn pin(&self) -> String {
        format!("{}=={}", self.distribution, self.version)
    }
}

impl FromStr for WheelDescriptor {
    type Err = UnparseableWheelName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for WheelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.distribution, self.version)?;
        if let Some(build) = &self.build_tag {
            write!(f, "-{build}")?;
        }
        write!(
            f,
            "-{}-{}-{}{WHEEL_SUFFIX}",
            self.python_tags.join("."),
            self.abi_tags.join("."),
            self.platform_tags.join(".")
        )
    }
}

/// Compatibility check that never fails: a filename that cannot be parsed
/// is reported as incompatible.
#[must_use]
pub fn is_compatible_filename(filename: &str, target: &SupportedTags) -> bool {
    match WheelDescriptor::parse(filename) {
        Ok(descriptor) => descriptor.is_compatible(target),
        Err(err) => {
            debug!(%err, "treating wheel as incompatible");
            false
        }
    }
}

fn split_tag_set(field: &str) -> Option<Vec<String>> {
    let mut tags: Vec<String> = Vec::new();
    for tag in field.split('.') {
        if tag.is_empty() {
            return None;
        }
        if !tags.iter().any(|existing| existing == tag) {
            tags.push(tag.to_string());
        }
    }
    Some(tags)
}

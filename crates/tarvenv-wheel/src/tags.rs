use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

pub const ANY_PLATFORM: &str = "any";

/// One `python-abi-platform` compatibility triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TagTriple {
    pub python: String,
    pub abi: String,
    pub platform: String,
}

impl TagTriple {
    pub fn new(
        python: impl Into<String>,
        abi: impl Into<String>,
        platform: impl Into<String>,
    ) -> Self {
        Self {
            python: python.into().to_ascii_lowercase(),
            abi: abi.into().to_ascii_lowercase(),
            platform: platform.into().to_ascii_lowercase(),
        }
    }

    /// Parses the `py3-none-any` form.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let mut parts = raw.trim().splitn(3, '-');
        let python = parts.next().filter(|part| !part.is_empty())?;
        let abi = parts.next().filter(|part| !part.is_empty())?;
        let platform = parts.next().filter(|part| !part.is_empty())?;
        Some(Self::new(python, abi, platform))
    }
}

impl fmt::Display for TagTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}", self.python, self.abi, self.platform)
    }
}

/// The set of triples a target interpreter can install.
///
/// Insertion order is kept so the most specific tags (as reported by the
/// interpreter) stay first when the set is displayed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<TagTriple>", into = "Vec<TagTriple>")]
pub struct SupportedTags {
    ordered: Vec<TagTriple>,
    lookup: HashSet<TagTriple>,
    python_abi: HashSet<(String, String)>,
}

impl From<Vec<TagTriple>> for SupportedTags {
    fn from(triples: Vec<TagTriple>) -> Self {
        Self::from_triples(triples)
    }
}

impl From<SupportedTags> for Vec<TagTriple> {
    fn from(tags: SupportedTags) -> Self {
        tags.ordered
    }
}

impl SupportedTags {
    pub fn from_triples(triples: impl IntoIterator<Item = TagTriple>) -> Self {
        let mut tags = Self::default();
        for triple in triples {
            tags.insert(triple);
        }
        tags
    }

    /// Adds a triple, returning `false` when it was already present.
    pub fn insert(&mut self, triple: TagTriple) -> bool {
        if !self.lookup.insert(triple.clone()) {
            return false;
        }
        self.python_abi
            .insert((triple.python.clone(), triple.abi.clone()));
        self.ordered.push(triple);
        true
    }

    /// Whether a single triple is installable on this target.
    ///
    /// A triple with the `any` platform only needs its python/abi pair to be
    /// supported on some platform of the target.
    #[must_use]
    pub fn supports(&self, triple: &TagTriple) -> bool {
        if self.lookup.contains(triple) {
            return true;
        }
        triple.platform == ANY_PLATFORM
            && self
                .python_abi
                .contains(&(triple.python.clone(), triple.abi.clone()))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TagTriple> {
        self.ordered.iter()
    }
}

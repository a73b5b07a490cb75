use serde::Deserialize;
use tarvenv_wheel::{SupportedTags, TagTriple, ANY_PLATFORM};

/// Prints the interpreter version and every tag it can install, most
/// specific first. Falls back to a coarse cross product when neither pip's
/// internals nor `packaging` are importable.
pub(crate) const TAGS_SCRIPT: &str = r#"import json, sys, sysconfig
major, minor = sys.version_info[0], sys.version_info[1]

def collect_tags():
    try:
        from pip._internal.utils.compatibility_tags import get_supported
        return list(get_supported())
    except Exception:
        try:
            from packaging import tags as packaging_tags
        except Exception:
            return []
        return list(packaging_tags.sys_tags())

tags = [
    {"python": str(t.interpreter).lower(), "abi": str(t.abi).lower(), "platform": str(t.platform).lower()}
    for t in collect_tags()
]
plat = sysconfig.get_platform().lower().replace("-", "_").replace(".", "_")
print(json.dumps({
    "version": [major, minor],
    "python": [f"cp{major}{minor}", f"py{major}{minor}", f"py{major}"],
    "abi": [f"cp{major}{minor}", "abi3", "none"],
    "platform": [plat],
    "tags": tags,
}))
"#;

#[derive(Debug, Deserialize)]
pub(crate) struct TagsPayload {
    version: (u32, u32),
    python: Vec<String>,
    abi: Vec<String>,
    platform: Vec<String>,
    #[serde(default)]
    tags: Vec<TagPayload>,
}

#[derive(Debug, Deserialize)]
struct TagPayload {
    python: String,
    abi: String,
    platform: String,
}

impl TagsPayload {
    /// Ordered tag set, always including the pure-Python triples for the
    /// interpreter's major and minor version.
    pub(crate) fn into_supported(self) -> SupportedTags {
        let (major, minor) = self.version;
        let mut supported = if self.tags.is_empty() {
            let mut coarse = Vec::new();
            for python in &self.python {
                for abi in &self.abi {
                    for platform in &self.platform {
                        coarse.push(TagTriple::new(python, abi, platform));
                    }
                }
            }
            SupportedTags::from_triples(coarse)
        } else {
            SupportedTags::from_triples(
                self.tags
                    .into_iter()
                    .map(|tag| TagTriple::new(tag.python, tag.abi, tag.platform)),
            )
        };
        supported.insert(TagTriple::new(format!("py{major}{minor}"), "none", ANY_PLATFORM));
        supported.insert(TagTriple::new(format!("py{major}"), "none", ANY_PLATFORM));
        supported
    }
}

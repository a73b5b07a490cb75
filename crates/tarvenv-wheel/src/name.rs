/// Normalizes a distribution name so that `Foo_Bar`, `foo.bar` and `foo-bar`
/// compare equal.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut pending_separator = false;
    for ch in name.trim().chars() {
        if matches!(ch, '-' | '_' | '.') {
            pending_separator = !normalized.is_empty();
            continue;
        }
        if pending_separator {
            normalized.push('-');
            pending_separator = false;
        }
        normalized.push(ch.to_ascii_lowercase());
    }
    normalized
}

/// Splits a `name-version` directory name on its last hyphen.
///
/// Directories without a hyphen (or with an empty half) are returned whole
/// with no version.
#[must_use]
pub fn split_versioned_dir(dir_name: &str) -> (&str, Option<&str>) {
    match dir_name.rsplit_once('-') {
        Some((name, version)) if !name.is_empty() && !version.is_empty() => (name, Some(version)),
        _ => (dir_name, None),
    }
}

/// The distribution part of a `name==version` style requirement.
#[must_use]
pub fn requirement_name(requirement: &str) -> &str {
    let requirement = requirement.trim();
    let end = requirement
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        .unwrap_or(requirement.len());
    &requirement[..end]
}

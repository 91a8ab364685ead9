//! Package identifiers and the path arithmetic derived from them.

use std::path::{Component, Path};

/// Why a package identifier cannot be mapped onto a workspace.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PackageIdError {
    #[error("package identifier must not be empty")]
    Empty,

    #[error("package identifier '{package}' {reason}")]
    Invalid {
        package: String,
        reason: &'static str,
    },
}

/// Check that `package` is a non-empty relative path of normal components.
///
/// The identifier is joined onto the base directory, so anything that could
/// climb out of it (`..`, a root, a drive prefix) is rejected.
pub fn validate_package_id(package: &str) -> Result<(), PackageIdError> {
    if package.trim().is_empty() {
        return Err(PackageIdError::Empty);
    }
    let path = Path::new(package);
    if package.starts_with('/') || path.has_root() || path.is_absolute() {
        return Err(invalid(package, "must be relative"));
    }
    if package.contains('\\') {
        return Err(invalid(package, "must use '/' separators"));
    }
    // Inspect raw segments: `Path::components` normalizes `.` and `//` away.
    for segment in package.split('/') {
        match segment {
            "" => return Err(invalid(package, "must not contain empty segments")),
            "." => return Err(invalid(package, "must not contain '.' segments")),
            ".." => return Err(invalid(package, "must not contain '..' segments")),
            _ => {}
        }
    }
    if path
        .components()
        .any(|c| matches!(c, Component::Prefix(_)))
    {
        return Err(invalid(package, "must be relative"));
    }
    Ok(())
}

fn invalid(package: &str, reason: &'static str) -> PackageIdError {
    PackageIdError::Invalid {
        package: package.to_string(),
        reason,
    }
}

/// Single path segment naming a package's workspace under the base directory.
///
/// The encoding is injective (`%` and `/` are escaped), so two distinct
/// packages never share a workspace and one workspace never nests another.
pub fn workspace_slug(package: &str) -> String {
    let mut slug = String::with_capacity(package.len());
    for ch in package.chars() {
        match ch {
            '%' => slug.push_str("%25"),
            '/' => slug.push_str("%2F"),
            other => slug.push(other),
        }
    }
    slug
}

/// `/`-separated path of `dir` relative to `root`, or `.` for the root itself.
///
/// Returns `None` when `dir` is not inside `root`.
pub fn relative_package_id(root: &Path, dir: &Path) -> Option<String> {
    let rel = dir.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        return Some(".".to_string());
    }
    Some(parts.join("/"))
}

/// True if `path` is a strict ancestor of `descendant`.
pub fn is_strict_ancestor(path: &Path, descendant: &Path) -> bool {
    descendant != path && descendant.starts_with(path)
}

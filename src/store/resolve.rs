//! Artifact key normalization and cache root containment
//!
//! Keys are slash-separated relative paths. Normalization is purely lexical:
//! empty and `.` segments are dropped, `..` removes the previous segment, and
//! a `..` with nothing left to remove is a path escape. Nothing here touches
//! the filesystem.

use crate::error::{CacheError, CacheResult};
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// A normalized, root-relative artifact key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct ArtifactKey {
    segments: Vec<String>,
}

impl ArtifactKey {
    /// Normalize a raw request path into a key
    pub fn parse(raw: &str) -> CacheResult<Self> {
        let mut segments: Vec<String> = Vec::new();

        for segment in raw.split('/') {
            match segment {
                "" | "." => continue,
                ".." => {
                    if segments.pop().is_none() {
                        return Err(CacheError::PathEscape(raw.to_string()));
                    }
                }
                _ => {
                    validate_segment(raw, segment)?;
                    segments.push(segment.to_string());
                }
            }
        }

        Ok(Self { segments })
    }

    /// Whether this key addresses the cache root itself
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Path segments in order
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Final segment, if any
    pub fn file_name(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Key joined with `/`
    pub fn as_string(&self) -> String {
        self.segments.join("/")
    }

    /// Key as a relative filesystem path
    pub fn to_relative_path(&self) -> PathBuf {
        self.segments.iter().collect()
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_string())
    }
}

fn validate_segment(raw: &str, segment: &str) -> CacheResult<()> {
    if segment.contains('\0') {
        return Err(CacheError::invalid_key(raw, "contains a NUL byte"));
    }
    if segment.contains('\\') {
        return Err(CacheError::invalid_key(raw, "contains a backslash"));
    }
    // Drive prefixes and the like only show up as non-normal components.
    let mut components = Path::new(segment).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(CacheError::PathEscape(raw.to_string())),
    }
}

/// Map a request path to a location inside `root`
///
/// Fails with [`CacheError::PathEscape`] when the normalized path would leave
/// the root. An empty key resolves to `root` itself.
pub fn resolve(root: &Path, request_path: &str) -> CacheResult<PathBuf> {
    let key = ArtifactKey::parse(request_path)?;
    contain(root, &key, request_path)
}

/// Join an already-normalized key onto `root`, re-checking containment
pub(crate) fn contain(root: &Path, key: &ArtifactKey, request_path: &str) -> CacheResult<PathBuf> {
    let resolved = root.join(key.to_relative_path());
    if !resolved.starts_with(root) {
        return Err(CacheError::PathEscape(request_path.to_string()));
    }
    Ok(resolved)
}

//! Directory listings for the browse view

use crate::error::{CacheError, CacheResult};
use crate::scope::CacheRoot;
use crate::store::is_missing;
use crate::store::resolve::{self, ArtifactKey};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs;
use tracing::debug;

/// One child of a listed directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryEntry {
    pub name: String,
    pub is_directory: bool,
    /// Browse link: `<base_url>/<path relative to the cache root>`
    pub href: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

/// Link to an ancestor of the listed path
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breadcrumb {
    pub name: String,
    pub href: String,
}

/// What a browse request found
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Listing {
    /// Children sorted by name; empty when nothing exists at the path
    Directory {
        path: String,
        breadcrumbs: Vec<Breadcrumb>,
        entries: Vec<DirectoryEntry>,
    },
    /// The key names a file; its content is shown as text
    File {
        path: String,
        breadcrumbs: Vec<Breadcrumb>,
        content: String,
    },
}

impl Listing {
    /// Directory entries, or an empty slice for a file preview
    pub fn entries(&self) -> &[DirectoryEntry] {
        match self {
            Self::Directory { entries, .. } => entries,
            Self::File { .. } => &[],
        }
    }
}

/// List what is stored at `key` under `root`
///
/// Entry hrefs are built from `base_url` and the entry's path relative to
/// the cache root, so they stay valid however deep the listing is.
pub async fn list(root: &CacheRoot, key: &str, base_url: &str) -> CacheResult<Listing> {
    let parsed = ArtifactKey::parse(key)?;
    let path = resolve::contain(root.path(), &parsed, key)?;
    let base_url = base_url.trim_end_matches('/');
    let breadcrumbs = breadcrumbs(&parsed, base_url);
    let display_path = parsed.as_string();

    let meta = match fs::metadata(&path).await {
        Ok(meta) => meta,
        Err(e) if is_missing(&e) => {
            debug!("Nothing stored at {}, listing is empty", path.display());
            return Ok(Listing::Directory {
                path: display_path,
                breadcrumbs,
                entries: Vec::new(),
            });
        }
        Err(e) => return Err(CacheError::io(format!("reading metadata of {}", path.display()), e)),
    };

    if meta.is_file() {
        let bytes = fs::read(&path)
            .await
            .map_err(|e| CacheError::io(format!("reading {}", path.display()), e))?;
        return Ok(Listing::File {
            path: display_path,
            breadcrumbs,
            content: String::from_utf8_lossy(&bytes).into_owned(),
        });
    }

    let mut dir = fs::read_dir(&path)
        .await
        .map_err(|e| CacheError::io(format!("listing {}", path.display()), e))?;
    let mut entries = Vec::new();
    while let Some(entry) = dir
        .next_entry()
        .await
        .map_err(|e| CacheError::io(format!("listing {}", path.display()), e))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        // Entries can vanish between readdir and stat when the reaper runs
        let meta = match entry.metadata().await {
            Ok(meta) => meta,
            Err(e) => {
                debug!("Skipping {}: {}", entry.path().display(), e);
                continue;
            }
        };

        let relative = if display_path.is_empty() {
            name.clone()
        } else {
            format!("{}/{}", display_path, name)
        };
        let is_directory = meta.is_dir();
        entries.push(DirectoryEntry {
            href: format!("{}/{}", base_url, relative),
            size: (!is_directory).then(|| meta.len()),
            last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
            is_directory,
            name,
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(Listing::Directory {
        path: display_path,
        breadcrumbs,
        entries,
    })
}

fn breadcrumbs(key: &ArtifactKey, base_url: &str) -> Vec<Breadcrumb> {
    let mut href = base_url.to_string();
    key.segments()
        .iter()
        .map(|segment| {
            href.push('/');
            href.push_str(segment);
            Breadcrumb {
                name: segment.clone(),
                href: href.clone(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    const BASE: &str = "http://cache.local/global/browse";

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn lists_children_with_root_relative_hrefs() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a/y.jar", b"yy");
        write(dir.path(), "a/x.jar", b"x");
        std::fs::create_dir_all(dir.path().join("a/sub")).unwrap();
        let root = CacheRoot::new(dir.path());

        let listing = list(&root, "a", BASE).await.unwrap();
        let entries = listing.entries();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["sub", "x.jar", "y.jar"]);

        assert!(entries[0].is_directory);
        assert_eq!(entries[0].size, None);
        assert_eq!(entries[1].href, "http://cache.local/global/browse/a/x.jar");
        assert_eq!(entries[2].href, "http://cache.local/global/browse/a/y.jar");
        assert_eq!(entries[2].size, Some(2));
        assert!(!entries[2].is_directory);
    }

    #[tokio::test]
    async fn root_listing() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "org/a.pom", b"<project/>");
        let root = CacheRoot::new(dir.path());

        let listing = list(&root, "", &format!("{}/", BASE)).await.unwrap();
        match listing {
            Listing::Directory {
                path,
                breadcrumbs,
                entries,
            } => {
                assert_eq!(path, "");
                assert!(breadcrumbs.is_empty());
                assert_eq!(entries.len(), 1);
                assert_eq!(entries[0].href, "http://cache.local/global/browse/org");
            }
            other => panic!("expected directory, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_path_lists_empty() {
        let dir = TempDir::new().unwrap();
        let root = CacheRoot::new(dir.path());

        let listing = list(&root, "not/there", BASE).await.unwrap();
        assert!(matches!(listing, Listing::Directory { .. }));
        assert!(listing.entries().is_empty());
    }

    #[tokio::test]
    async fn file_is_previewed() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "g/a/1.0/a.pom", b"<project>\xff</project>");
        let root = CacheRoot::new(dir.path());

        match list(&root, "g/a/1.0/a.pom", BASE).await.unwrap() {
            Listing::File {
                content,
                breadcrumbs,
                ..
            } => {
                assert!(content.starts_with("<project>"));
                assert!(content.contains('\u{FFFD}'));
                let hrefs: Vec<_> = breadcrumbs.iter().map(|b| b.href.as_str()).collect();
                assert_eq!(
                    hrefs,
                    [
                        "http://cache.local/global/browse/g",
                        "http://cache.local/global/browse/g/a",
                        "http://cache.local/global/browse/g/a/1.0",
                        "http://cache.local/global/browse/g/a/1.0/a.pom",
                    ]
                );
            }
            other => panic!("expected file, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn escape_is_rejected() {
        let dir = TempDir::new().unwrap();
        let root = CacheRoot::new(dir.path().join("root"));
        let err = list(&root, "../", BASE).await.unwrap_err();
        assert!(matches!(err, CacheError::PathEscape(_)));
    }
}

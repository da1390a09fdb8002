//! GET/PUT of single artifacts with atomic replacement

use crate::error::{CacheError, CacheResult};
use crate::scope::CacheRoot;
use crate::store::is_missing;
use crate::store::resolve::{self, ArtifactKey};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tempfile::NamedTempFile;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

/// A boxed stream of artifact bytes
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Attempts at the final rename when a concurrent sweep removes the
/// destination's parent directories in between
const PUBLISH_ATTEMPTS: usize = 3;

const STAGING_PREFIX: &str = ".upload-";
const STAGING_SUFFIX: &str = ".part";

/// An artifact opened for reading
pub struct StoredObject {
    /// Content, streamed from a single open handle
    pub stream: ByteStream,
    /// Size in bytes at open time
    pub size: u64,
    /// Last modification time
    pub last_modified: DateTime<Utc>,
}

impl fmt::Debug for StoredObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredObject")
            .field("size", &self.size)
            .field("last_modified", &self.last_modified)
            .finish_non_exhaustive()
    }
}

/// Result of a successful PUT
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PutReceipt {
    /// Normalized key
    pub key: String,
    /// Bytes stored
    pub size: u64,
    /// Hex SHA-256 of the stored content
    pub sha256: String,
}

/// Reads and writes artifacts under any cache root
#[derive(Debug, Clone)]
pub struct ObjectStore {
    scratch_dir: PathBuf,
    max_object_bytes: Option<u64>,
}

impl ObjectStore {
    /// Create a store that stages uploads in `scratch_dir`
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: scratch_dir.into(),
            max_object_bytes: None,
        }
    }

    /// Reject uploads larger than `limit` bytes
    pub fn with_max_object_bytes(mut self, limit: Option<u64>) -> Self {
        self.max_object_bytes = limit;
        self
    }

    /// Directory holding in-flight uploads
    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    /// Open the artifact at `key`
    ///
    /// Returns `None` when nothing is stored there or the key names a
    /// directory. The returned stream reads the file as it was when opened;
    /// a later PUT to the same key does not affect it.
    pub async fn get(&self, root: &CacheRoot, key: &str) -> CacheResult<Option<StoredObject>> {
        let path = root.resolve(key)?;

        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Ok(None),
            Err(e) if is_missing(&e) => return Ok(None),
            Err(e) => return Err(CacheError::io(format!("reading metadata of {}", path.display()), e)),
        }

        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) if is_missing(&e) => {
                debug!("{} disappeared before it could be opened", path.display());
                return Ok(None);
            }
            Err(e) => return Err(CacheError::io(format!("opening {}", path.display()), e)),
        };

        // Take size and mtime from the handle so they describe what is streamed
        let meta = file
            .metadata()
            .await
            .map_err(|e| CacheError::io(format!("reading metadata of {}", path.display()), e))?;
        if !meta.is_file() {
            return Ok(None);
        }
        let last_modified = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        debug!("Serving {} ({} bytes)", path.display(), meta.len());
        Ok(Some(StoredObject {
            stream: Box::pin(ReaderStream::new(file)),
            size: meta.len(),
            last_modified,
        }))
    }

    /// Store `body` at `key`, replacing any previous object atomically
    pub async fn put(
        &self,
        root: &CacheRoot,
        key: &str,
        mut body: ByteStream,
    ) -> CacheResult<PutReceipt> {
        let parsed = ArtifactKey::parse(key)?;
        if parsed.is_root() {
            return Err(CacheError::invalid_key(key, "must name a file"));
        }
        let dest = resolve::contain(root.path(), &parsed, key)?;

        if fs::metadata(&dest).await.is_ok_and(|m| m.is_dir()) {
            return Err(CacheError::KeyIsDirectory(parsed.as_string()));
        }

        fs::create_dir_all(&self.scratch_dir).await.map_err(|e| {
            CacheError::io(format!("creating scratch dir {}", self.scratch_dir.display()), e)
        })?;
        let staged = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .suffix(STAGING_SUFFIX)
            .tempfile_in(&self.scratch_dir)
            .map_err(|e| CacheError::io("creating upload temp file", e))?;
        let handle = staged
            .as_file()
            .try_clone()
            .map_err(|e| CacheError::io("opening upload temp file", e))?;
        let mut file = File::from_std(handle);

        let mut hasher = Sha256::new();
        let mut size: u64 = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| CacheError::io("reading upload body", e))?;
            size += chunk.len() as u64;
            if let Some(limit) = self.max_object_bytes {
                if size > limit {
                    return Err(CacheError::PayloadTooLarge { limit });
                }
            }
            hasher.update(&chunk);
            file.write_all(&chunk)
                .await
                .map_err(|e| CacheError::io(format!("writing {}", staged.path().display()), e))?;
        }
        file.flush()
            .await
            .map_err(|e| CacheError::io("flushing upload temp file", e))?;
        file.sync_all()
            .await
            .map_err(|e| CacheError::io("syncing upload temp file", e))?;
        drop(file);

        let target = dest.clone();
        let normalized = parsed.as_string();
        tokio::task::spawn_blocking(move || publish(staged, &target, &normalized))
            .await
            .map_err(|e| CacheError::Internal(format!("publish task failed: {}", e)))??;

        let receipt = PutReceipt {
            key: parsed.as_string(),
            size,
            sha256: hex::encode(hasher.finalize()),
        };
        info!("Stored {} ({} bytes)", dest.display(), size);
        Ok(receipt)
    }
}

/// Move a fully written temp file over `dest`
fn publish(mut staged: NamedTempFile, dest: &Path, key: &str) -> CacheResult<()> {
    let mut attempt = 1;
    loop {
        ensure_parent(dest, key)?;
        let err = match staged.persist(dest) {
            Ok(_) => return Ok(()),
            Err(err) => err,
        };

        if is_cross_device(&err.error) {
            debug!(
                "Scratch dir is on another filesystem, copying into place for {}",
                dest.display()
            );
            return publish_by_copy(err.file, dest);
        }
        if is_directory(&err.error) {
            return Err(CacheError::KeyIsDirectory(key.to_string()));
        }
        if err.error.kind() == io::ErrorKind::NotFound && attempt < PUBLISH_ATTEMPTS {
            warn!(
                "Parent of {} removed during upload, recreating (attempt {})",
                dest.display(),
                attempt
            );
            staged = err.file;
            attempt += 1;
            continue;
        }
        return Err(CacheError::io(
            format!("moving upload into {}", dest.display()),
            err.error,
        ));
    }
}

/// Copy the staged upload next to `dest`, then rename it into place
///
/// The rename stays atomic because the second temp file shares the
/// destination's filesystem; it may briefly show up in directory listings.
fn publish_by_copy(staged: NamedTempFile, dest: &Path) -> CacheResult<()> {
    let parent = dest
        .parent()
        .ok_or_else(|| CacheError::Internal(format!("{} has no parent", dest.display())))?;

    let mut sibling = tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .suffix(STAGING_SUFFIX)
        .tempfile_in(parent)
        .map_err(|e| CacheError::io(format!("creating staging file in {}", parent.display()), e))?;
    let mut source = staged
        .reopen()
        .map_err(|e| CacheError::io("reopening upload temp file", e))?;
    io::copy(&mut source, sibling.as_file_mut())
        .map_err(|e| CacheError::io(format!("copying upload into {}", parent.display()), e))?;
    sibling
        .as_file()
        .sync_all()
        .map_err(|e| CacheError::io("syncing staging file", e))?;

    sibling.persist(dest).map_err(|e| {
        CacheError::io(format!("moving upload into {}", dest.display()), e.error)
    })?;
    Ok(())
}

/// Create the directories above `dest`
///
/// A stored file where a directory is needed means the key runs through
/// another artifact, which is the caller's conflict rather than a disk fault.
fn ensure_parent(dest: &Path, key: &str) -> CacheResult<()> {
    let Some(parent) = dest.parent() else {
        return Ok(());
    };
    std::fs::create_dir_all(parent).map_err(|e| {
        if e.kind() == io::ErrorKind::AlreadyExists || is_not_directory(&e) {
            CacheError::KeyUnderFile(key.to_string())
        } else {
            CacheError::io(format!("creating directory {}", parent.display()), e)
        }
    })
}

fn is_not_directory(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::ENOTDIR)
    }
    #[cfg(not(unix))]
    {
        let _ = err;
        false
    }
}

fn is_cross_device(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::EXDEV)
    }
    #[cfg(windows)]
    {
        // ERROR_NOT_SAME_DEVICE
        err.raw_os_error() == Some(17)
    }
    #[cfg(not(any(unix, windows)))]
    {
        let _ = err;
        false
    }
}

fn is_directory(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        matches!(err.raw_os_error(), Some(libc::EISDIR) | Some(libc::ENOTEMPTY))
    }
    #[cfg(not(unix))]
    {
        let _ = err;
        false
    }
}

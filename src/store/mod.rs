//! Path-addressed artifact store
//!
//! Artifacts live as plain files under a scope's cache root, one file per
//! key, with no sidecar metadata.
//!
//! # Write protocol
//!
//! | Step | Location | Visible to GET |
//! |------|----------|----------------|
//! | stream body | scratch temp file | no |
//! | fsync | scratch temp file | no |
//! | rename | destination | yes, all at once |
//!
//! A PUT that fails or is cancelled before the rename leaves the previous
//! object untouched; the temp file is removed when it is dropped.

pub mod listing;
pub mod object;
pub mod resolve;

pub use listing::{list, Breadcrumb, DirectoryEntry, Listing};
pub use object::{ByteStream, ObjectStore, PutReceipt, StoredObject};
pub use resolve::{resolve, ArtifactKey};

use std::io;

/// Whether an IO error means "there is nothing at this path"
///
/// A file standing where a parent directory is expected counts as missing.
pub(crate) fn is_missing(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::NotFound {
        return true;
    }
    #[cfg(unix)]
    {
        err.raw_os_error() == Some(libc::ENOTDIR)
    }
    #[cfg(not(unix))]
    {
        false
    }
}

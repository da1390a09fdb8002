//! Retention reaper
//!
//! Deletes artifacts whose modification time is older than the retention
//! window, then removes directories left with nothing in them. A sweep is a
//! single depth-first pass with no persisted state; failures on individual
//! entries are recorded in the report and the pass keeps going.

use crate::audit::AuditLog;
use crate::error::{CacheError, CacheResult};
use crate::scope::{Scope, ScopeRegistry};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// How long artifacts are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Files last modified more than this many days ago are deleted
    pub expiration_days: u32,
}

impl RetentionPolicy {
    pub fn new(expiration_days: u32) -> Self {
        Self { expiration_days }
    }

    /// Modification times strictly before this instant are expired
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(i64::from(self.expiration_days))
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self { expiration_days: 7 }
    }
}

/// One step of a sweep's walk
#[derive(Debug)]
pub enum Visit {
    Entry(walkdir::DirEntry),
    /// A directory whose contents could not be read
    Unreadable { path: PathBuf, error: io::Error },
}

/// Filesystem operations a sweep performs
pub trait SweepFs: Send + Sync {
    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Must refuse to remove a directory that is not empty
    fn remove_dir(&self, path: &Path) -> io::Result<()>;

    /// Everything below `root`, children before their parent, without
    /// following symlinks
    fn walk<'a>(&'a self, root: &Path) -> Box<dyn Iterator<Item = Visit> + 'a> {
        let root = root.to_path_buf();
        let walker = WalkDir::new(&root)
            .min_depth(1)
            .follow_links(false)
            .contents_first(true);
        Box::new(walker.into_iter().map(move |entry| match entry {
            Ok(entry) => Visit::Entry(entry),
            Err(err) => Visit::Unreadable {
                path: err.path().unwrap_or(&root).to_path_buf(),
                error: err.into(),
            },
        }))
    }
}

/// The local filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

impl SweepFs for LocalFs {
    fn remove_file(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        std::fs::remove_dir(path)
    }
}

/// An entry the sweep could not process
#[derive(Debug, Clone, Serialize)]
pub struct SweepError {
    pub path: PathBuf,
    pub action: &'static str,
    pub error: String,
}

/// Outcome of one sweep over a cache root
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub root: PathBuf,
    pub dry_run: bool,
    pub scanned_files: usize,
    pub deleted_files: usize,
    pub deleted_bytes: u64,
    pub deleted_dirs: usize,
    pub would_delete_files: usize,
    pub would_delete_bytes: u64,
    pub would_delete_dirs: usize,
    pub errors: Vec<SweepError>,
}

impl SweepReport {
    fn push_error(&mut self, path: impl Into<PathBuf>, action: &'static str, err: impl ToString) {
        self.errors.push(SweepError {
            path: path.into(),
            action,
            error: err.to_string(),
        });
    }

    fn record_file(&mut self, bytes: u64) {
        if self.dry_run {
            self.would_delete_files += 1;
            self.would_delete_bytes = self.would_delete_bytes.saturating_add(bytes);
        } else {
            self.deleted_files += 1;
            self.deleted_bytes = self.deleted_bytes.saturating_add(bytes);
        }
    }

    fn record_dir(&mut self) {
        if self.dry_run {
            self.would_delete_dirs += 1;
        } else {
            self.deleted_dirs += 1;
        }
    }

    /// Files removed, or that would be removed in a dry run
    pub fn removed_files(&self) -> usize {
        self.deleted_files + self.would_delete_files
    }

    /// Directories removed, or that would be removed in a dry run
    pub fn removed_dirs(&self) -> usize {
        self.deleted_dirs + self.would_delete_dirs
    }

    /// Bytes freed, or that would be freed in a dry run
    pub fn removed_bytes(&self) -> u64 {
        self.deleted_bytes + self.would_delete_bytes
    }
}

/// Age-based sweeper for a cache root
#[derive(Debug, Clone)]
pub struct Reaper<F: SweepFs = LocalFs> {
    policy: RetentionPolicy,
    dry_run: bool,
    fs: F,
}

impl Reaper<LocalFs> {
    pub fn new(policy: RetentionPolicy) -> Self {
        Self::with_fs(policy, LocalFs)
    }
}

impl<F: SweepFs> Reaper<F> {
    /// Sweep through a custom filesystem implementation
    pub fn with_fs(policy: RetentionPolicy, fs: F) -> Self {
        Self {
            policy,
            dry_run: false,
            fs,
        }
    }

    /// Report what would be removed without touching the disk
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// Sweep `root` using the current time
    pub fn sweep(&self, root: &Path) -> SweepReport {
        self.sweep_at(root, Utc::now())
    }

    /// Sweep `root` as if the current time were `now`
    ///
    /// `root` itself is never removed. Symlinks are neither followed nor
    /// deleted, and keep their parent directory alive.
    pub fn sweep_at(&self, root: &Path, now: DateTime<Utc>) -> SweepReport {
        let cutoff = self.policy.cutoff(now);
        let mut report = SweepReport {
            root: root.to_path_buf(),
            dry_run: self.dry_run,
            ..SweepReport::default()
        };
        // Directories with at least one child that survived this sweep
        let mut occupied: HashSet<PathBuf> = HashSet::new();

        if let Err(e) = std::fs::symlink_metadata(root) {
            if e.kind() == io::ErrorKind::NotFound {
                debug!("{} does not exist, nothing to sweep", root.display());
            } else {
                report.push_error(root, "visit", e);
            }
            return report;
        }

        debug!(
            "Sweeping {} (cutoff {}, dry run: {})",
            root.display(),
            cutoff.to_rfc3339(),
            self.dry_run
        );

        for visit in self.fs.walk(root) {
            let entry = match visit {
                Visit::Entry(entry) => entry,
                Visit::Unreadable { path, error } => {
                    warn!("Cannot visit {}: {}", path.display(), error);
                    keep(&mut occupied, &path);
                    occupied.insert(path.clone());
                    report.push_error(path, "visit", error);
                    continue;
                }
            };
            let path = entry.path();
            let file_type = entry.file_type();

            if file_type.is_dir() {
                if occupied.remove(path) {
                    keep(&mut occupied, path);
                } else {
                    self.remove_empty_dir(path, &mut occupied, &mut report);
                }
            } else if file_type.is_file() {
                report.scanned_files += 1;
                if !self.expire_file(&entry, cutoff, &mut report) {
                    keep(&mut occupied, path);
                }
            } else {
                keep(&mut occupied, path);
            }
        }

        info!(
            "Swept {}: {} file(s), {} dir(s), {} bytes{} ({} error(s))",
            root.display(),
            report.removed_files(),
            report.removed_dirs(),
            report.removed_bytes(),
            if self.dry_run { " would be removed" } else { " removed" },
            report.errors.len()
        );
        report
    }

    /// Delete an expired file; returns true if it is gone afterwards
    fn expire_file(
        &self,
        entry: &walkdir::DirEntry,
        cutoff: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> bool {
        let path = entry.path();
        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(err) => {
                report.push_error(path, "metadata", err);
                return false;
            }
        };
        let modified = match meta.modified() {
            Ok(time) => DateTime::<Utc>::from(time),
            Err(err) => {
                report.push_error(path, "modified", err);
                return false;
            }
        };
        if modified >= cutoff {
            return false;
        }

        if self.dry_run {
            report.record_file(meta.len());
            return true;
        }
        match self.fs.remove_file(path) {
            Ok(()) => {
                debug!("Deleted {}", path.display());
                report.record_file(meta.len());
                true
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => true,
            Err(err) => {
                warn!("Failed to delete {}: {}", path.display(), err);
                report.push_error(path, "remove_file", err);
                false
            }
        }
    }

    fn remove_empty_dir(
        &self,
        path: &Path,
        occupied: &mut HashSet<PathBuf>,
        report: &mut SweepReport,
    ) {
        if self.dry_run {
            report.record_dir();
            return;
        }
        match self.fs.remove_dir(path) {
            Ok(()) => {
                debug!("Removed empty directory {}", path.display());
                report.record_dir();
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) if is_not_empty(&err) => {
                // Something was written into it after the walk listed it
                debug!("{} is no longer empty, keeping it", path.display());
                keep(occupied, path);
            }
            Err(err) => {
                warn!("Failed to remove {}: {}", path.display(), err);
                report.push_error(path, "remove_dir", err);
                keep(occupied, path);
            }
        }
    }
}

impl<F: SweepFs + Clone + 'static> Reaper<F> {
    /// Sweep a scope's root on the blocking pool and audit the result
    pub async fn sweep_scope(&self, scope: &Scope, audit: &AuditLog) -> CacheResult<SweepReport> {
        let reaper = self.clone();
        let root = scope.root().path().to_path_buf();
        let report = tokio::task::spawn_blocking(move || reaper.sweep(&root))
            .await
            .map_err(|e| CacheError::Internal(format!("sweep task failed: {}", e)))?;

        audit
            .log(
                "reaper.sweep",
                &serde_json::json!({
                    "scope": scope.name(),
                    "dry_run": report.dry_run,
                    "expiration_days": self.policy.expiration_days,
                    "deleted_files": report.removed_files(),
                    "deleted_dirs": report.removed_dirs(),
                    "deleted_bytes": report.removed_bytes(),
                    "errors": report.errors.len(),
                }),
            )
            .await;
        Ok(report)
    }
}

/// Sweep every scope once per `period`, starting immediately
pub fn spawn_scheduler(
    reaper: Reaper,
    scopes: Arc<ScopeRegistry>,
    audit: Arc<AuditLog>,
    period: std::time::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            for scope in scopes.iter() {
                if let Err(e) = reaper.sweep_scope(scope, &audit).await {
                    warn!("Scheduled sweep of scope {} failed: {}", scope.name(), e);
                }
            }
        }
    })
}

/// Mark the parent of `path` as having a surviving child
fn keep(occupied: &mut HashSet<PathBuf>, path: &Path) {
    if let Some(parent) = path.parent() {
        occupied.insert(parent.to_path_buf());
    }
}

fn is_not_empty(err: &io::Error) -> bool {
    #[cfg(unix)]
    {
        matches!(err.raw_os_error(), Some(libc::ENOTEMPTY) | Some(libc::EEXIST))
    }
    #[cfg(not(unix))]
    {
        false
    }
}

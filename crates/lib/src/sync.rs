//! Reconciliation of a local package directory against its manifest.
//!
//! A package directory moves through three states: fresh (no valid
//! completion marker), reconciling, and synced (marker written). The
//! marker is removed before any work starts, so a crash or error anywhere
//! leaves the directory fresh and the next run repeats the whole pass.
//! Reconciliation prunes files the manifest no longer references, fetches
//! missing or corrupt files with verification, and finally overlays the
//! user-writable keep tree on top of the managed files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use rayon::prelude::*;
use thiserror::Error;
use tracing::{debug, info, trace};
use walkdir::WalkDir;

use crate::fetch::{FetchError, Fetcher};
use crate::hash;
use crate::manifest::{FileEntry, ManifestError, PackageManifest, join_relative};

/// Completion marker written after a successful reconciliation.
pub const MARKER_FILENAME: &str = "modpack.done";

/// User overlay directory within the package root.
pub const KEEP_DIR: &str = "keepmods";

/// Managed top-level areas subject to pruning.
pub const MANAGED_AREAS: &[&str] = &["mods", "config", "scripts"];

/// Errors that can occur during a sync pass.
#[derive(Debug, Error)]
pub enum SyncError {
  /// The manifest violates its structural invariants.
  #[error(transparent)]
  Manifest(#[from] ManifestError),

  /// A file transfer exhausted its retries.
  #[error("failed to fetch '{path}': {source}")]
  Fetch {
    path: String,
    #[source]
    source: FetchError,
  },

  /// A filesystem operation failed; the pass aborts without a marker.
  #[error("filesystem error at '{path}': {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// Walking a directory tree failed.
  #[error("failed to walk '{path}': {source}")]
  Walk {
    path: PathBuf,
    #[source]
    source: walkdir::Error,
  },

  /// The caller aborted the pass.
  #[error("sync cancelled")]
  Cancelled,
}

/// Cooperative cancellation flag shared with in-flight sync passes.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::Relaxed);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::Relaxed)
  }
}

/// What a sync pass did, for caller-side logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncOutcome {
  /// A full reconciliation ran (the marker was absent or invalidated).
  pub synced: bool,
  /// At least one keep-layer file was present and considered.
  pub keep_applied: bool,
  /// Number of files actually transferred.
  pub fetched: usize,
}

/// The set of subtrees excluded from pruning, precomputed from the
/// manifest's ignore markers before the prune phase begins.
#[derive(Debug, Default)]
pub struct IgnoreSet {
  roots: std::collections::HashSet<String>,
}

impl IgnoreSet {
  pub fn from_manifest(manifest: &PackageManifest) -> Self {
    let roots = manifest
      .files
      .iter()
      .filter_map(|entry| entry.ignored_subtree())
      .map(str::to_string)
      .collect();
    Self { roots }
  }

  /// Whether `path` (slash-separated, relative to the package root) is
  /// ignored. Ignore status propagates downward from any enclosing
  /// directory, so each ancestor prefix is checked.
  pub fn is_ignored(&self, path: &str) -> bool {
    if self.roots.is_empty() {
      return false;
    }
    let mut end = path.len();
    loop {
      if self.roots.contains(&path[..end]) {
        return true;
      }
      match path[..end].rfind('/') {
        Some(idx) => end = idx,
        None => return false,
      }
    }
  }
}

/// Client-side reconciliation engine for one package directory.
#[derive(Debug)]
pub struct SyncEngine<'a> {
  fetcher: &'a Fetcher,
  root: PathBuf,
  cancel: CancelFlag,
}

impl<'a> SyncEngine<'a> {
  pub fn new(fetcher: &'a Fetcher, root: impl Into<PathBuf>) -> Self {
    Self {
      fetcher,
      root: root.into(),
      cancel: CancelFlag::new(),
    }
  }

  /// Attach a cancellation flag checked between individual file fetches.
  pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Bring the package directory into conformance with `manifest`.
  ///
  /// A full reconciliation (prune, fetch, marker) runs when `force` is set
  /// or the completion marker is absent. The keep-layer overlay runs on
  /// every invocation regardless of marker state.
  pub fn sync(&self, manifest: &PackageManifest, force: bool) -> Result<SyncOutcome, SyncError> {
    manifest.validate()?;
    fs::create_dir_all(&self.root).map_err(|e| self.io_err(&self.root, e))?;

    let marker = self.root.join(MARKER_FILENAME);
    let mut outcome = SyncOutcome::default();

    if force || !marker.exists() {
      // Remove the marker first: an interrupted pass must restart fresh
      if marker.exists() {
        fs::remove_file(&marker).map_err(|e| self.io_err(&marker, e))?;
      }

      info!(root = %self.root.display(), package = %manifest.id, "reconciling package");
      outcome.fetched = self.reconcile(manifest)?;
      outcome.synced = true;

      fs::write(&marker, b"").map_err(|e| self.io_err(&marker, e))?;
      debug!(marker = %marker.display(), "sync marker written");
    }

    outcome.keep_applied = self.apply_keep_layer()?;
    Ok(outcome)
  }

  fn reconcile(&self, manifest: &PackageManifest) -> Result<usize, SyncError> {
    let ignored = IgnoreSet::from_manifest(manifest);
    self.prune(manifest, &ignored)?;
    self.fetch_all(manifest)
  }

  /// Delete local files the manifest does not reference, and now-empty
  /// directories, under each managed area. Ignored subtrees are left
  /// untouched. Filesystem errors abort the pass.
  fn prune(&self, manifest: &PackageManifest, ignored: &IgnoreSet) -> Result<(), SyncError> {
    let files = manifest.files_by_path();

    for area in MANAGED_AREAS {
      let base = self.root.join(area);
      if !base.is_dir() {
        continue;
      }

      // Children before parents, so emptied directories cascade upward
      for entry in WalkDir::new(&base).min_depth(1).contents_first(true) {
        let entry = entry.map_err(|e| SyncError::Walk {
          path: base.clone(),
          source: e,
        })?;
        let path = entry.path();
        let rel = match relative_key(&self.root, path) {
          Some(rel) => rel,
          None => continue,
        };

        if ignored.is_ignored(&rel) {
          trace!(path = %rel, "ignored subtree, skipping prune");
          continue;
        }

        if entry.file_type().is_file() {
          if !files.contains_key(rel.as_str()) {
            debug!(path = %rel, "pruning unmanaged file");
            fs::remove_file(path).map_err(|e| self.io_err(path, e))?;
          }
        } else if entry.file_type().is_dir() && !files.contains_key(rel.as_str()) {
          let mut children = fs::read_dir(path).map_err(|e| self.io_err(path, e))?;
          if children.next().is_none() {
            debug!(path = %rel, "pruning empty directory");
            fs::remove_dir(path).map_err(|e| self.io_err(path, e))?;
          }
        }
      }
    }

    Ok(())
  }

  /// Fetch every non-marker entry that is missing or fails verification.
  /// Individual downloads run on the worker pool, each writing through a
  /// private temporary file; the pass only succeeds once all of them do.
  fn fetch_all(&self, manifest: &PackageManifest) -> Result<usize, SyncError> {
    let entries: Vec<&FileEntry> = manifest.files.iter().filter(|f| !f.is_ignore_marker()).collect();

    let fetched = AtomicUsize::new(0);
    entries.par_iter().try_for_each(|entry| {
      if self.cancel.is_cancelled() {
        return Err(SyncError::Cancelled);
      }

      let dest = join_relative(&self.root, &entry.path);
      let expected = entry.expected();
      if hash::verify(&dest, &expected) {
        trace!(path = %entry.path, "verified, skipping fetch");
        return Ok(());
      }

      self.fetcher.fetch(&entry.url, &dest, &expected).map_err(|e| SyncError::Fetch {
        path: entry.path.clone(),
        source: e,
      })?;
      fetched.fetch_add(1, Ordering::Relaxed);
      Ok(())
    })?;

    Ok(fetched.into_inner())
  }

  /// Overlay the keep tree onto the package root. A zero-byte keep file
  /// deletes its managed counterpart; any other keep file replaces a
  /// missing or differing counterpart.
  fn apply_keep_layer(&self) -> Result<bool, SyncError> {
    let keep_root = self.root.join(KEEP_DIR);
    if !keep_root.is_dir() {
      fs::create_dir_all(&keep_root).map_err(|e| self.io_err(&keep_root, e))?;
    }

    let mut applied = false;
    for entry in WalkDir::new(&keep_root).min_depth(1) {
      let entry = entry.map_err(|e| SyncError::Walk {
        path: keep_root.clone(),
        source: e,
      })?;
      if !entry.file_type().is_file() {
        continue;
      }

      let src = entry.path();
      let rel = match relative_key(&keep_root, src) {
        Some(rel) => rel,
        None => continue,
      };
      let dst = join_relative(&self.root, &rel);
      applied = true;

      let size = entry.metadata().map_err(|e| SyncError::Walk {
        path: src.to_path_buf(),
        source: e,
      })?;
      if size.len() == 0 {
        // Deletion directive
        if dst.exists() {
          debug!(path = %rel, "keep layer removes managed file");
          fs::remove_file(&dst).map_err(|e| self.io_err(&dst, e))?;
        }
        continue;
      }

      let differs = match hash::sha1_file(&dst) {
        Ok(dst_digest) => {
          let src_digest = hash::sha1_file(src).map_err(|e| self.io_err(src, e))?;
          src_digest != dst_digest
        }
        Err(_) => true,
      };

      if differs {
        if let Some(parent) = dst.parent() {
          fs::create_dir_all(parent).map_err(|e| self.io_err(parent, e))?;
        }
        debug!(path = %rel, "keep layer overrides managed file");
        fs::copy(src, &dst).map_err(|e| self.io_err(&dst, e))?;
      }
    }

    Ok(applied)
  }

  fn io_err(&self, path: &Path, source: io::Error) -> SyncError {
    SyncError::Io {
      path: path.to_path_buf(),
      source,
    }
  }
}

/// Slash-separated path of `path` relative to `base`, or `None` when it is
/// not under `base`.
fn relative_key(base: &Path, path: &Path) -> Option<String> {
  let rel = path.strip_prefix(base).ok()?;
  let parts: Vec<String> = rel
    .components()
    .map(|c| c.as_os_str().to_string_lossy().into_owned())
    .collect();
  if parts.is_empty() { None } else { Some(parts.join("/")) }
}

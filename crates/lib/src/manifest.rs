//! Package manifests and the index document that chains them.
//!
//! A package manifest (`modpack.json`) is the authoritative list of files a
//! synchronized directory must contain, each entry carrying the relative
//! path, remote URL, SHA-1 digest, and size. The index document
//! (`index.json`) aggregates the published packages, describing each
//! package's own manifest by digest and size so the whole chain is
//! content-addressed.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hash::{Expected, sha1_bytes};

/// Name of the per-package manifest document.
pub const PACKAGE_MANIFEST_NAME: &str = "modpack.json";

/// Name of the top-level index document.
pub const INDEX_NAME: &str = "index.json";

/// Suffix marking a manifest entry as an ignore marker for the subtree
/// named by the remainder of its path.
pub const IGNORE_MARKER_SUFFIX: &str = ".__ignore__";

/// Errors for manifest validation and loading.
#[derive(Debug, Error)]
pub enum ManifestError {
  /// Two entries share the same relative path.
  #[error("duplicate manifest path: {path}")]
  DuplicatePath { path: String },

  /// An entry's path is absolute or traverses outside the root.
  #[error("unsafe manifest path: {path}")]
  UnsafePath { path: String },

  /// Failed to read a manifest document from disk.
  #[error("failed to read manifest '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// A manifest document did not parse.
  #[error("failed to parse manifest '{path}': {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}

/// A single remote file tracked by a package manifest.
///
/// Identity within a manifest is the relative `path`. Entries are immutable
/// once published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
  pub url: String,
  pub path: String,
  pub sha1: String,
  pub size: u64,
}

impl FileEntry {
  /// True when this entry is an ignore marker rather than real content.
  pub fn is_ignore_marker(&self) -> bool {
    self.path.ends_with(IGNORE_MARKER_SUFFIX)
  }

  /// The subtree an ignore marker excludes from pruning, if this entry is
  /// one.
  pub fn ignored_subtree(&self) -> Option<&str> {
    self.path.strip_suffix(IGNORE_MARKER_SUFFIX)
  }

  pub fn expected(&self) -> Expected {
    Expected::new(self.sha1.clone(), self.size)
  }
}

/// The per-package manifest document (`modpack.json`).
///
/// Known fields are typed; everything inherited from the package's version
/// document (libraries, argument templates, and so on) rides along in the
/// open tail and round-trips untouched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageManifest {
  pub id: String,
  pub name: String,
  pub version: String,
  pub time: String,
  #[serde(rename = "releaseTime")]
  pub release_time: String,
  pub files: Vec<FileEntry>,
  #[serde(flatten)]
  pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PackageManifest {
  /// Check structural invariants: unique relative paths, no path escaping
  /// the package root.
  pub fn validate(&self) -> Result<(), ManifestError> {
    let mut seen = BTreeMap::new();
    for entry in &self.files {
      if !is_clean_relative(&entry.path) {
        return Err(ManifestError::UnsafePath {
          path: entry.path.clone(),
        });
      }
      if seen.insert(entry.path.as_str(), ()).is_some() {
        return Err(ManifestError::DuplicatePath {
          path: entry.path.clone(),
        });
      }
    }
    Ok(())
  }

  /// Entries keyed by relative path.
  pub fn files_by_path(&self) -> BTreeMap<&str, &FileEntry> {
    self.files.iter().map(|f| (f.path.as_str(), f)).collect()
  }

  /// Load and parse a manifest document from disk.
  pub fn load(path: &Path) -> Result<Self, ManifestError> {
    let bytes = std::fs::read(path).map_err(|e| ManifestError::Read {
      path: path.to_path_buf(),
      source: e,
    })?;
    serde_json::from_slice(&bytes).map_err(|e| ManifestError::Parse {
      path: path.to_path_buf(),
      source: e,
    })
  }
}

/// Launcher self-update information carried by the index document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LauncherInfo {
  pub version: String,
  pub url: String,
}

/// A package as listed in the index document: display metadata plus the
/// content address of its manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRef {
  pub name: String,
  pub version: String,
  pub time: String,
  pub url: String,
  pub path: String,
  pub sha1: String,
  pub size: u64,
}

impl PackageRef {
  /// The manifest document described by this reference, as a fetchable
  /// entry relative to the package directory.
  pub fn manifest_entry(&self) -> FileEntry {
    FileEntry {
      url: format!("{}{}", self.url, PACKAGE_MANIFEST_NAME),
      path: PACKAGE_MANIFEST_NAME.to_string(),
      sha1: self.sha1.clone(),
      size: self.size,
    }
  }
}

/// The top-level index document (`index.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDocument {
  pub version: String,
  pub time: String,
  pub launcher: LauncherInfo,
  pub packages: BTreeMap<String, PackageRef>,
}

impl IndexDocument {
  pub fn package(&self, id: &str) -> Option<&PackageRef> {
    self.packages.get(id)
  }
}

/// The content address of a serialized document: where it lives, how it is
/// reached, and what its bytes hash to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentDescriptor {
  pub url: String,
  pub path: String,
  pub sha1: String,
  pub size: u64,
}

impl ContentDescriptor {
  /// Describe a rendered document body.
  pub fn for_bytes(url: String, path: String, content: &[u8]) -> Self {
    Self {
      url,
      path,
      sha1: sha1_bytes(content),
      size: content.len() as u64,
    }
  }
}

/// True when `path` stays inside the directory it is joined to: relative,
/// no `..` or empty components, no drive or root prefix.
pub fn is_clean_relative(path: &str) -> bool {
  if path.is_empty() || path.starts_with('/') || path.contains('\\') || path.contains(':') {
    return false;
  }
  path.split('/').all(|part| !part.is_empty() && part != "." && part != "..")
}

/// Join a validated relative path onto a root directory.
pub fn join_relative(root: &Path, relative: &str) -> PathBuf {
  let mut out = root.to_path_buf();
  for part in relative.split('/') {
    out.push(part);
  }
  out
}

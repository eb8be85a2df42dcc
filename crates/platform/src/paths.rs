//! Well-known directories for caches and local state.

use std::path::PathBuf;

/// Base cache directory for downloaded documents and artifacts.
///
/// Resolves to the platform cache directory (e.g. `~/.cache/modsync` on
/// Linux) and falls back to a `.modsync-cache` directory under the current
/// working directory when no cache location is available.
pub fn cache_dir() -> PathBuf {
  match dirs::cache_dir() {
    Some(dir) => dir.join("modsync"),
    None => PathBuf::from(".modsync-cache"),
  }
}

/// Cache directory for raw version documents.
pub fn versions_cache_dir() -> PathBuf {
  cache_dir().join("versions")
}

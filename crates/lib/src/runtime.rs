//! Runtime discovery and installation.
//!
//! Locates an installed runtime executable under a managed directory laid
//! out as `<kind>-<arch>/<version>/bin/java`, preferring the highest
//! version within the first kind that has any install. When nothing is
//! installed, a verified zip archive can be fetched and unpacked into
//! place.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use modsync_platform::{Arch, Os};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info};

use crate::fetch::{FetchError, Fetcher};
use crate::hash::Expected;

/// Runtime kinds in discovery preference order.
const RUNTIME_KINDS: &[&str] = &["jdk", "jre"];

/// Errors that can occur while locating or installing a runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
  #[error("io error at '{path}': {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error(transparent)]
  Fetch(#[from] FetchError),

  /// The downloaded archive could not be unpacked.
  #[error("failed to unpack runtime archive: {source}")]
  Unpack {
    #[source]
    source: zip::result::ZipError,
  },

  /// The unpacked archive contains no runtime executable.
  #[error("runtime archive had no '{expected}' inside")]
  NoExecutable { expected: String },
}

/// The runtime executable name for an OS.
pub fn java_binary_name(os: Os) -> &'static str {
  match os {
    Os::Windows => "java.exe",
    Os::Linux | Os::Osx => "java",
  }
}

/// Manages runtime installs under one directory.
#[derive(Debug)]
pub struct RuntimeManager<'a> {
  fetcher: &'a Fetcher,
  root: PathBuf,
  os: Os,
  arch: Arch,
}

impl<'a> RuntimeManager<'a> {
  pub fn new(fetcher: &'a Fetcher, root: impl Into<PathBuf>, os: Os, arch: Arch) -> Self {
    Self {
      fetcher,
      root: root.into(),
      os,
      arch,
    }
  }

  /// The installed runtime executable, or `None` when nothing usable is
  /// present.
  pub fn find_runtime(&self) -> Option<PathBuf> {
    for kind in RUNTIME_KINDS {
      let group = self.root.join(format!("{kind}-{}", self.arch.as_str()));
      if let Some(java) = self.best_in_group(&group) {
        return Some(java);
      }
    }
    None
  }

  fn best_in_group(&self, group: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(group).ok()?;

    let mut versions: Vec<(String, PathBuf)> = entries
      .filter_map(|entry| entry.ok())
      .map(|entry| entry.path())
      .filter_map(|folder| {
        let java = folder.join("bin").join(java_binary_name(self.os));
        let version = folder.file_name()?.to_string_lossy().into_owned();
        java.is_file().then_some((version, java))
      })
      .collect();

    versions.sort();
    versions.pop().map(|(version, java)| {
      debug!(version, java = %java.display(), "found installed runtime");
      java
    })
  }

  /// Download a runtime zip archive, verify it, and unpack it under
  /// `<kind>-<arch>/<version>/`. Returns the runtime executable path.
  pub fn install(&self, url: &str, expected: &Expected, version: &str) -> Result<PathBuf, RuntimeError> {
    let dest = self.root.join(format!("jre-{}", self.arch.as_str())).join(version);
    info!(url, version, dest = %dest.display(), "installing runtime");

    fs::create_dir_all(&dest).map_err(|e| RuntimeError::Io {
      path: dest.clone(),
      source: e,
    })?;

    let archive = NamedTempFile::new().map_err(|e| RuntimeError::Io {
      path: PathBuf::from("tempfile"),
      source: e,
    })?;
    self.fetcher.fetch(url, archive.path(), expected)?;

    unpack_zip(archive.path(), &dest)?;

    let java = dest.join("bin").join(java_binary_name(self.os));
    if !java.is_file() {
      return Err(RuntimeError::NoExecutable {
        expected: format!("bin/{}", java_binary_name(self.os)),
      });
    }
    Ok(java)
  }

  /// Find an installed runtime, installing one from `url` when absent.
  pub fn ensure(&self, url: &str, expected: &Expected, version: &str) -> Result<PathBuf, RuntimeError> {
    match self.find_runtime() {
      Some(java) => Ok(java),
      None => self.install(url, expected, version),
    }
  }
}

fn unpack_zip(archive_path: &Path, dest: &Path) -> Result<(), RuntimeError> {
  let file = fs::File::open(archive_path).map_err(|e| RuntimeError::Io {
    path: archive_path.to_path_buf(),
    source: e,
  })?;
  let mut archive =
    zip::ZipArchive::new(io::BufReader::new(file)).map_err(|e| RuntimeError::Unpack { source: e })?;

  for i in 0..archive.len() {
    let mut entry = archive.by_index(i).map_err(|e| RuntimeError::Unpack { source: e })?;
    let Some(rel) = entry.enclosed_name() else {
      continue;
    };
    let out_path = dest.join(rel);

    if entry.is_dir() {
      fs::create_dir_all(&out_path).map_err(|e| RuntimeError::Io {
        path: out_path.clone(),
        source: e,
      })?;
      continue;
    }

    if let Some(parent) = out_path.parent() {
      fs::create_dir_all(parent).map_err(|e| RuntimeError::Io {
        path: parent.to_path_buf(),
        source: e,
      })?;
    }
    let mut out = fs::File::create(&out_path).map_err(|e| RuntimeError::Io {
      path: out_path.clone(),
      source: e,
    })?;
    io::copy(&mut entry, &mut out).map_err(|e| RuntimeError::Io {
      path: out_path.clone(),
      source: e,
    })?;

    #[cfg(unix)]
    {
      use std::os::unix::fs::PermissionsExt;
      if let Some(mode) = entry.unix_mode() {
        fs::set_permissions(&out_path, fs::Permissions::from_mode(mode)).map_err(|e| RuntimeError::Io {
          path: out_path.clone(),
          source: e,
        })?;
      }
    }
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::hash::sha1_bytes;
  use std::io::Write;
  use tempfile::tempdir;

  fn seed_runtime(root: &Path, group: &str, version: &str, os: Os) {
    let bin = root.join(group).join(version).join("bin");
    fs::create_dir_all(&bin).unwrap();
    fs::write(bin.join(java_binary_name(os)), b"#!").unwrap();
  }

  #[test]
  fn finds_nothing_in_empty_root() {
    let temp = tempdir().unwrap();
    let fetcher = Fetcher::new();
    let manager = RuntimeManager::new(&fetcher, temp.path(), Os::Linux, Arch::X64);
    assert!(manager.find_runtime().is_none());
  }

  #[test]
  fn prefers_highest_version() {
    let temp = tempdir().unwrap();
    seed_runtime(temp.path(), "jre-x64", "8u40", Os::Linux);
    seed_runtime(temp.path(), "jre-x64", "8u51", Os::Linux);

    let fetcher = Fetcher::new();
    let manager = RuntimeManager::new(&fetcher, temp.path(), Os::Linux, Arch::X64);
    let java = manager.find_runtime().unwrap();
    assert_eq!(java, temp.path().join("jre-x64/8u51/bin/java"));
  }

  #[test]
  fn jdk_group_wins_over_jre() {
    let temp = tempdir().unwrap();
    seed_runtime(temp.path(), "jre-x64", "8u144", Os::Linux);
    seed_runtime(temp.path(), "jdk-x64", "8u144", Os::Linux);

    let fetcher = Fetcher::new();
    let manager = RuntimeManager::new(&fetcher, temp.path(), Os::Linux, Arch::X64);
    let java = manager.find_runtime().unwrap();
    assert!(java.starts_with(temp.path().join("jdk-x64")));
  }

  #[test]
  fn folders_without_executable_are_skipped() {
    let temp = tempdir().unwrap();
    fs::create_dir_all(temp.path().join("jre-x64/8u144/bin")).unwrap();

    let fetcher = Fetcher::new();
    let manager = RuntimeManager::new(&fetcher, temp.path(), Os::Linux, Arch::X64);
    assert!(manager.find_runtime().is_none());
  }

  #[test]
  fn install_unpacks_verified_archive() {
    // Build a runtime zip: bin/java inside
    let mut body = Vec::new();
    {
      let mut writer = zip::ZipWriter::new(std::io::Cursor::new(&mut body));
      let options = zip::write::SimpleFileOptions::default();
      writer.start_file("bin/java", options).unwrap();
      writer.write_all(b"#!runtime").unwrap();
      writer.finish().unwrap();
    }

    let mut server = mockito::Server::new();
    server.mock("GET", "/jre.zip").with_status(200).with_body(body.clone()).create();

    let temp = tempdir().unwrap();
    let fetcher = Fetcher::new();
    let manager = RuntimeManager::new(&fetcher, temp.path(), Os::Linux, Arch::X64);

    let expected = Expected::new(sha1_bytes(&body), body.len() as u64);
    let java = manager
      .install(&format!("{}/jre.zip", server.url()), &expected, "8u144")
      .unwrap();

    assert_eq!(java, temp.path().join("jre-x64/8u144/bin/java"));
    assert!(java.is_file());

    // Now discovery picks it up without any network access
    assert_eq!(manager.find_runtime().unwrap(), java);
  }

  #[test]
  fn ensure_prefers_installed_runtime() {
    let temp = tempdir().unwrap();
    seed_runtime(temp.path(), "jre-x64", "8u144", Os::Linux);

    let fetcher = Fetcher::new();
    let manager = RuntimeManager::new(&fetcher, temp.path(), Os::Linux, Arch::X64);

    // Unreachable URL: ensure must not fetch
    let java = manager
      .ensure("http://127.0.0.1:9/jre.zip", &Expected::default(), "8u144")
      .unwrap();
    assert!(java.ends_with("jre-x64/8u144/bin/java"));
  }
}

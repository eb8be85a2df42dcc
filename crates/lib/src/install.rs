//! Installation of a resolved version document into a game root.
//!
//! Applies everything a resolved document declares: the asset index and
//! its objects, the client jar, every allowed library via its download
//! variant, and native jars extracted into the natives directory. All
//! downloads are verified and skipped when already present.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use modsync_platform::Platform;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::document::{DocumentError, VersionDocument};
use crate::fetch::{FetchError, Fetcher};
use crate::hash::Expected;
use crate::library::{Library, LibraryError};
use crate::manifest::join_relative;
use crate::rules::Action;

/// Default origin for asset objects.
pub const DEFAULT_RESOURCES_URL: &str = "https://resources.download.minecraft.net/";

/// Directory native jars are extracted into, relative to the game root.
pub const NATIVES_DIR: &str = "natives";

/// Errors that can occur while installing a version document.
#[derive(Debug, Error)]
pub enum InstallError {
  #[error(transparent)]
  Document(#[from] DocumentError),

  #[error(transparent)]
  Library(#[from] LibraryError),

  /// A download exhausted its retries.
  #[error("failed to fetch '{target}': {source}")]
  Fetch {
    target: String,
    #[source]
    source: FetchError,
  },

  #[error("io error at '{path}': {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// A native jar could not be opened or extracted.
  #[error("failed to extract natives from '{path}': {source}")]
  Zip {
    path: PathBuf,
    #[source]
    source: zip::result::ZipError,
  },
}

/// Reference to the asset index document inside a version document.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetIndexRef {
  pub id: String,
  pub url: String,
  pub sha1: String,
  pub size: u64,
}

/// The asset index document: a flat map of object names to hashes.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetIndex {
  pub objects: std::collections::BTreeMap<String, AssetObject>,
}

/// One asset object, stored under a digest-derived path.
#[derive(Debug, Clone, Deserialize)]
pub struct AssetObject {
  pub hash: String,
  pub size: u64,
}

impl AssetObject {
  /// Digest-derived storage path fragment (`ab/abcdef...`).
  fn fragment(&self) -> String {
    format!("{}/{}", &self.hash[..2], self.hash)
  }

  /// Storage path relative to the game root.
  pub fn object_path(&self) -> String {
    format!("assets/objects/{}", self.fragment())
  }

  /// Source URL under the resources origin.
  pub fn url(&self, resources_base: &str) -> String {
    format!("{resources_base}{}", self.fragment())
  }

  pub fn expected(&self) -> Expected {
    Expected::new(self.hash.clone(), self.size)
  }
}

/// What an install pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallReport {
  pub fetched: usize,
  pub natives_extracted: usize,
}

/// Applies resolved version documents to a single game root.
#[derive(Debug)]
pub struct Installer<'a> {
  fetcher: &'a Fetcher,
  root: PathBuf,
  platform: Platform,
  resources_base: String,
}

impl<'a> Installer<'a> {
  pub fn new(fetcher: &'a Fetcher, root: impl Into<PathBuf>, platform: Platform) -> Self {
    Self {
      fetcher,
      root: root.into(),
      platform,
      resources_base: DEFAULT_RESOURCES_URL.to_string(),
    }
  }

  /// Override the asset objects origin.
  pub fn with_resources_base(mut self, base: impl Into<String>) -> Self {
    self.resources_base = base.into();
    self
  }

  /// Install everything the document declares. Idempotent: verified
  /// present files are never re-fetched.
  pub fn install(&self, doc: &VersionDocument) -> Result<InstallReport, InstallError> {
    let mut report = InstallReport::default();

    let index = self.install_asset_index(doc, &mut report)?;
    self.install_client(doc, &mut report)?;
    self.install_libraries(doc, &mut report)?;
    self.install_assets(&index, &mut report)?;
    report.natives_extracted = self.extract_natives(doc)?;

    info!(
      root = %self.root.display(),
      fetched = report.fetched,
      natives = report.natives_extracted,
      "version document installed"
    );
    Ok(report)
  }

  /// Fetch the asset index document and parse it.
  fn install_asset_index(&self, doc: &VersionDocument, report: &mut InstallReport) -> Result<AssetIndex, InstallError> {
    let index_ref = asset_index_ref(doc)?;
    let rel = format!("assets/indexes/{}.json", index_ref.id);
    let dest = join_relative(&self.root, &rel);

    let expected = Expected::new(index_ref.sha1.clone(), index_ref.size);
    self.ensure(&index_ref.url, &dest, &expected, &rel, report)?;

    let bytes = fs::read(&dest).map_err(|e| InstallError::Io {
      path: dest.clone(),
      source: e,
    })?;
    let index: AssetIndex = serde_json::from_slice(&bytes).map_err(|e| {
      InstallError::Document(DocumentError::Parse {
        id: index_ref.id.clone(),
        source: e,
      })
    })?;
    Ok(index)
  }

  fn install_client(&self, doc: &VersionDocument, report: &mut InstallReport) -> Result<(), InstallError> {
    let client = client_download(doc)?;
    let version = client_jar_version(doc)?;
    let rel = format!("versions/{version}/{version}.jar");
    let dest = join_relative(&self.root, &rel);
    self.ensure(&client.url, &dest, &Expected::new(client.sha1, client.size), &rel, report)
  }

  fn install_libraries(&self, doc: &VersionDocument, report: &mut InstallReport) -> Result<(), InstallError> {
    for library in document_libraries(doc)? {
      if library.action(&self.platform) != Action::Allow {
        debug!(library = %library.name, "disallowed on this platform, skipping");
        continue;
      }

      for download in library.downloads_for(&self.platform)? {
        let (url, rel) = download.resolve_url_and_path();
        let dest = join_relative(&self.root, &rel);
        self.ensure(&url, &dest, &download.expected(), &rel, report)?;
      }
    }
    Ok(())
  }

  fn install_assets(&self, index: &AssetIndex, report: &mut InstallReport) -> Result<(), InstallError> {
    for (name, object) in &index.objects {
      let rel = object.object_path();
      let dest = join_relative(&self.root, &rel);
      debug!(asset = %name, "checking asset object");
      self.ensure(&object.url(&self.resources_base), &dest, &object.expected(), &rel, report)?;
    }
    Ok(())
  }

  /// Extract native jars for allowed libraries into the natives
  /// directory, honoring each library's exclude prefixes. Returns the
  /// number of jars extracted.
  fn extract_natives(&self, doc: &VersionDocument) -> Result<usize, InstallError> {
    let natives_root = self.root.join(NATIVES_DIR);
    let mut extracted = 0;

    for library in document_libraries(doc)? {
      if library.action(&self.platform) != Action::Allow {
        continue;
      }
      let Some(extract) = &library.extract else {
        continue;
      };
      let Some(download) = library.native_download(&self.platform)? else {
        continue;
      };

      let (_, rel) = download.resolve_url_and_path();
      let jar = join_relative(&self.root, &rel);
      debug!(library = %library.name, jar = %jar.display(), "extracting natives");
      extract_jar(&jar, &natives_root, &extract.exclude)?;
      extracted += 1;
    }

    Ok(extracted)
  }

  fn ensure(
    &self,
    url: &str,
    dest: &Path,
    expected: &Expected,
    target: &str,
    report: &mut InstallReport,
  ) -> Result<(), InstallError> {
    let fetched = self.fetcher.ensure(url, dest, expected).map_err(|e| InstallError::Fetch {
      target: target.to_string(),
      source: e,
    })?;
    if fetched {
      report.fetched += 1;
    }
    Ok(())
  }
}

fn asset_index_ref(doc: &VersionDocument) -> Result<AssetIndexRef, DocumentError> {
  let value = doc.get("assetIndex").ok_or_else(|| DocumentError::MissingField {
    key: "assetIndex".to_string(),
  })?;
  serde_json::from_value(value.clone()).map_err(|_| DocumentError::FieldType {
    key: "assetIndex".to_string(),
    expected: "asset index reference",
  })
}

#[derive(Debug, Deserialize)]
struct ClientDownload {
  url: String,
  sha1: String,
  size: u64,
}

fn client_download(doc: &VersionDocument) -> Result<ClientDownload, DocumentError> {
  let value = doc
    .get("downloads")
    .and_then(|d| d.get("client"))
    .ok_or_else(|| DocumentError::MissingField {
      key: "downloads.client".to_string(),
    })?;
  serde_json::from_value(value.clone()).map_err(|_| DocumentError::FieldType {
    key: "downloads.client".to_string(),
    expected: "client download",
  })
}

/// The version name the client jar is stored under: an explicit `jar`
/// field when present, the document id otherwise.
fn client_jar_version(doc: &VersionDocument) -> Result<String, DocumentError> {
  match doc.opt_str_field("jar")? {
    Some(jar) => Ok(jar.to_string()),
    None => Ok(doc.id()?.to_string()),
  }
}

pub(crate) fn document_libraries(doc: &VersionDocument) -> Result<Vec<Library>, DocumentError> {
  let Some(values) = doc.get("libraries") else {
    return Ok(Vec::new());
  };
  serde_json::from_value(values.clone()).map_err(|e| DocumentError::Parse {
    id: "libraries".to_string(),
    source: e,
  })
}

/// Whether a zip entry name falls under any exclude prefix.
fn is_excluded(name: &str, excludes: &[String]) -> bool {
  excludes.iter().any(|prefix| name.starts_with(prefix.as_str()))
}

/// Extract a jar into `dest`, skipping excluded entries.
fn extract_jar(jar: &Path, dest: &Path, excludes: &[String]) -> Result<(), InstallError> {
  let file = fs::File::open(jar).map_err(|e| InstallError::Io {
    path: jar.to_path_buf(),
    source: e,
  })?;
  let mut archive = zip::ZipArchive::new(io::BufReader::new(file)).map_err(|e| InstallError::Zip {
    path: jar.to_path_buf(),
    source: e,
  })?;

  fs::create_dir_all(dest).map_err(|e| InstallError::Io {
    path: dest.to_path_buf(),
    source: e,
  })?;

  for i in 0..archive.len() {
    let mut entry = archive.by_index(i).map_err(|e| InstallError::Zip {
      path: jar.to_path_buf(),
      source: e,
    })?;

    if is_excluded(entry.name(), excludes) {
      continue;
    }
    let Some(rel) = entry.enclosed_name() else {
      continue;
    };
    let out_path = dest.join(rel);

    if entry.is_dir() {
      fs::create_dir_all(&out_path).map_err(|e| InstallError::Io {
        path: out_path.clone(),
        source: e,
      })?;
      continue;
    }

    if let Some(parent) = out_path.parent() {
      fs::create_dir_all(parent).map_err(|e| InstallError::Io {
        path: parent.to_path_buf(),
        source: e,
      })?;
    }
    let mut out = fs::File::create(&out_path).map_err(|e| InstallError::Io {
      path: out_path.clone(),
      source: e,
    })?;
    io::copy(&mut entry, &mut out).map_err(|e| InstallError::Io {
      path: out_path.clone(),
      source: e,
    })?;
  }

  Ok(())
}

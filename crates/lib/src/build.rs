//! Server-side manifest building.
//!
//! Walks a packages tree, computes digests for every file, rehosts
//! externally hosted library artifacts into the tree, and emits one
//! `modpack.json` per package plus the `index.json` chaining them. Output
//! is deterministic: rebuilding unchanged sources with pinned timestamps
//! reproduces byte-identical documents.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::document::{DocumentError, DocumentSource, LIBRARIES_KEY, VersionDocument, resolve};
use crate::fetch::{FetchError, Fetcher};
use crate::hash::{Expected, sha1_file};
use crate::library::{ArtifactFile, Library, LibraryError};
use crate::manifest::{
  ContentDescriptor, FileEntry, INDEX_NAME, IndexDocument, LauncherInfo, PACKAGE_MANIFEST_NAME, PackageManifest,
  PackageRef, join_relative,
};

/// Name of the per-package build metadata document.
pub const INFO_NAME: &str = "info.json";

/// Name of the optional raw version document inside a package directory.
pub const VERSION_DOCUMENT_NAME: &str = "version.json";

/// Subdirectory of a package holding the distributed content tree.
pub const FILES_DIR: &str = "files";

/// Errors that can occur while building manifests.
#[derive(Debug, Error)]
pub enum BuildError {
  /// URL prefixes must be slash-terminated so joins stay unambiguous.
  #[error("url prefix must end with '/': {prefix}")]
  UrlPrefix { prefix: String },

  /// A path handed to the URL builder is not under its root.
  #[error("path '{path}' is outside the published root")]
  OutsideRoot { path: PathBuf },

  /// A filesystem operation failed.
  #[error("io error at '{path}': {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// Walking a source tree failed.
  #[error("failed to walk '{path}': {source}")]
  Walk {
    path: PathBuf,
    #[source]
    source: walkdir::Error,
  },

  /// A document failed to serialize or a library declaration to parse.
  #[error("document serialization failed: {0}")]
  Serialize(#[from] serde_json::Error),

  /// A library artifact could neither be copied nor fetched.
  #[error("library artifact missing: {path}")]
  MissingArtifact { path: String },

  #[error(transparent)]
  Document(#[from] DocumentError),

  #[error(transparent)]
  Library(#[from] LibraryError),

  #[error(transparent)]
  Fetch(#[from] FetchError),
}

/// Maps local paths under a published root to their external URLs.
#[derive(Debug, Clone)]
pub struct UrlBuilder {
  prefix: String,
  root: PathBuf,
}

impl UrlBuilder {
  pub fn new(prefix: impl Into<String>, root: impl Into<PathBuf>) -> Result<Self, BuildError> {
    let prefix = prefix.into();
    if !prefix.ends_with('/') {
      return Err(BuildError::UrlPrefix { prefix });
    }
    Ok(Self {
      prefix,
      root: root.into(),
    })
  }

  /// External URL of a file under the published root.
  pub fn url_for(&self, path: &Path) -> Result<String, BuildError> {
    Ok(format!("{}{}", self.prefix, self.relative(path)?))
  }

  /// External URL of a directory under the published root, always
  /// slash-terminated.
  pub fn url_for_dir(&self, path: &Path) -> Result<String, BuildError> {
    let rel = self.relative(path)?;
    if rel.is_empty() {
      Ok(self.prefix.clone())
    } else {
      Ok(format!("{}{}/", self.prefix, rel))
    }
  }

  fn relative(&self, path: &Path) -> Result<String, BuildError> {
    let rel = path.strip_prefix(&self.root).map_err(|_| BuildError::OutsideRoot {
      path: path.to_path_buf(),
    })?;
    let parts: Vec<String> = rel
      .components()
      .map(|c| c.as_os_str().to_string_lossy().into_owned())
      .collect();
    Ok(parts.join("/"))
  }
}

/// Shared state for one build run. Timestamps are injected so rebuilds in
/// tests are reproducible and date-rollover policy stays with the caller.
#[derive(Debug)]
pub struct BuildContext<'a> {
  pub urls: UrlBuilder,
  pub fetcher: &'a Fetcher,
  pub launcher: LauncherInfo,
  /// ISO-8601 build timestamp stamped into every document.
  pub now: String,
  /// Calendar date (`YYYYMMDD`) driving the version ordinal.
  pub today: String,
}

impl<'a> BuildContext<'a> {
  /// A context stamped with the current wall clock.
  pub fn new(urls: UrlBuilder, fetcher: &'a Fetcher, launcher: LauncherInfo) -> Self {
    Self {
      urls,
      fetcher,
      launcher,
      now: current_time(),
      today: current_date(),
    }
  }
}

/// Current ISO-8601 timestamp in the wire format.
pub fn current_time() -> String {
  Utc::now().format("%Y-%m-%dT%H:%M:%S+0000").to_string()
}

/// Current calendar date in the version-stamp format.
pub fn current_date() -> String {
  Utc::now().format("%Y%m%d").to_string()
}

/// Compute the next `<date>-<ordinal>` version stamp.
///
/// The ordinal increments only when the previous build happened on the
/// same calendar date; any other previous value resets it to 0.
pub fn next_version(previous: Option<&str>, today: &str) -> String {
  if let Some((date, ordinal)) = previous.and_then(|v| v.split_once('-'))
    && date == today
  {
    let next = ordinal.parse::<u32>().map(|n| n + 1).unwrap_or(0);
    return format!("{today}-{next}");
  }
  format!("{today}-0")
}

/// Per-package build metadata (`info.json`), written back after each build.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct PackageInfo {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub version: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub time: Option<String>,
  #[serde(flatten)]
  pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Render a document the way every published JSON body is rendered.
pub fn render_json<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, BuildError> {
  Ok(serde_json::to_vec_pretty(value)?)
}

/// Serialize `value` to `path` and return its content descriptor.
///
/// Index and package manifests are addressed by their directory URL
/// (slash-terminated); every other document by its literal file URL. The
/// descriptor's `path` is relative to `base`.
pub fn write_document<T: serde::Serialize>(
  value: &T,
  path: &Path,
  base: &Path,
  urls: &UrlBuilder,
) -> Result<ContentDescriptor, BuildError> {
  let content = render_json(value)?;

  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).map_err(|e| BuildError::Io {
      path: parent.to_path_buf(),
      source: e,
    })?;
  }
  fs::write(path, &content).map_err(|e| BuildError::Io {
    path: path.to_path_buf(),
    source: e,
  })?;

  let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
  let url = if name == INDEX_NAME || name == PACKAGE_MANIFEST_NAME {
    urls.url_for_dir(path.parent().unwrap_or(Path::new("")))?
  } else {
    urls.url_for(path)?
  };

  let rel = path
    .strip_prefix(base)
    .map(|p| {
      p.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
    })
    .unwrap_or_else(|_| path.display().to_string());

  Ok(ContentDescriptor::for_bytes(url, rel, &content))
}

/// Walk every regular file under `files_root`, computing digest and size.
///
/// Entry paths are relative to `files_root`; URLs come from the builder.
/// The result is sorted by path so output is deterministic.
pub fn build_files(files_root: &Path, urls: &UrlBuilder) -> Result<Vec<FileEntry>, BuildError> {
  let mut files = Vec::new();
  if !files_root.is_dir() {
    return Ok(files);
  }

  for entry in WalkDir::new(files_root).sort_by_file_name() {
    let entry = entry.map_err(|e| BuildError::Walk {
      path: files_root.to_path_buf(),
      source: e,
    })?;
    if !entry.file_type().is_file() {
      continue;
    }

    let path = entry.path();
    let rel = path
      .strip_prefix(files_root)
      .expect("walked entries live under the walk root")
      .components()
      .map(|c| c.as_os_str().to_string_lossy().into_owned())
      .collect::<Vec<_>>()
      .join("/");

    let metadata = entry.metadata().map_err(|e| BuildError::Walk {
      path: path.to_path_buf(),
      source: e,
    })?;
    let sha1 = sha1_file(path).map_err(|e| BuildError::Io {
      path: path.to_path_buf(),
      source: e,
    })?;

    files.push(FileEntry {
      url: urls.url_for(path)?,
      path: rel,
      sha1,
      size: metadata.len(),
    });
  }

  files.sort_by(|a, b| a.path.cmp(&b.path));
  Ok(files)
}

/// Rehost externally hosted library artifacts into the package tree.
///
/// Each library pointing at an external repository is materialized under
/// `<pkg_dir>/libraries/` (copied from `artifact_source` when available,
/// fetched from its repository otherwise), hashed, and its download
/// metadata rewritten to the rehosted copy. Returns the number of
/// rehosted artifacts.
pub fn rehost_libraries(
  doc: &mut VersionDocument,
  pkg_dir: &Path,
  artifact_source: Option<&Path>,
  ctx: &BuildContext<'_>,
) -> Result<usize, BuildError> {
  let Some(serde_json::Value::Array(entries)) = doc.0.get_mut(LIBRARIES_KEY) else {
    return Ok(0);
  };

  let mut rehosted = 0;
  for value in entries.iter_mut() {
    let mut library: Library = serde_json::from_value(value.clone())?;
    if !library.needs_rehost() {
      continue;
    }

    let coordinates = library.coordinates()?;
    let rel = coordinates.artifact_path();
    let target = join_relative(pkg_dir, &coordinates.jar_path());

    let local_copy = artifact_source.map(|root| join_relative(root, &coordinates.jar_path()));
    match local_copy.filter(|src| src.is_file()) {
      Some(src) => {
        if let Some(parent) = target.parent() {
          fs::create_dir_all(parent).map_err(|e| BuildError::Io {
            path: parent.to_path_buf(),
            source: e,
          })?;
        }
        fs::copy(&src, &target).map_err(|e| BuildError::Io {
          path: src.clone(),
          source: e,
        })?;
        debug!(library = %library.name, from = %src.display(), "copied library artifact");
      }
      None => {
        let (url, _) = library.maven_download()?.resolve_url_and_path();
        debug!(library = %library.name, url, "fetching library artifact");
        ctx.fetcher.ensure(&url, &target, &Expected::default())?;
      }
    }

    if !target.is_file() {
      return Err(BuildError::MissingArtifact { path: rel });
    }

    let sha1 = sha1_file(&target).map_err(|e| BuildError::Io {
      path: target.clone(),
      source: e,
    })?;
    let size = fs::metadata(&target)
      .map_err(|e| BuildError::Io {
        path: target.clone(),
        source: e,
      })?
      .len();

    let downloads = library.downloads.get_or_insert_with(Default::default);
    downloads.artifact = Some(ArtifactFile {
      path: rel,
      url: ctx.urls.url_for(&target)?,
      sha1,
      size,
    });

    *value = serde_json::to_value(&library)?;
    rehosted += 1;
  }

  Ok(rehosted)
}

/// Assemble and write one package's manifest, returning its index entry.
///
/// The manifest starts from the resolved version document (when present),
/// takes the package's identity and version, and carries the hashed file
/// list.
pub fn build_package(
  ctx: &BuildContext<'_>,
  pkg_dir: &Path,
  id: &str,
  name: &str,
  version: &str,
  doc: Option<VersionDocument>,
) -> Result<PackageRef, BuildError> {
  let files = build_files(&pkg_dir.join(FILES_DIR), &ctx.urls)?;
  debug!(package = id, count = files.len(), "hashed package files");

  let mut extra = doc.map(|d| d.0).unwrap_or_default();
  for key in ["id", "name", "version", "time", "releaseTime", "files"] {
    extra.remove(key);
  }

  let manifest = PackageManifest {
    id: id.to_string(),
    name: name.to_string(),
    version: version.to_string(),
    time: ctx.now.clone(),
    release_time: ctx.now.clone(),
    files,
    extra,
  };

  let descriptor = write_document(&manifest, &pkg_dir.join(PACKAGE_MANIFEST_NAME), pkg_dir, &ctx.urls)?;

  Ok(PackageRef {
    name: name.to_string(),
    version: version.to_string(),
    time: ctx.now.clone(),
    url: descriptor.url,
    path: descriptor.path,
    sha1: descriptor.sha1,
    size: descriptor.size,
  })
}

/// Build every package directory under `packages_root` and the index
/// document chaining them. Returns the index's content descriptor.
pub fn build_tree(
  ctx: &BuildContext<'_>,
  packages_root: &Path,
  store: &dyn DocumentSource,
  artifact_source: Option<&Path>,
) -> Result<ContentDescriptor, BuildError> {
  let mut packages = std::collections::BTreeMap::new();

  let mut dirs: Vec<PathBuf> = fs::read_dir(packages_root)
    .map_err(|e| BuildError::Io {
      path: packages_root.to_path_buf(),
      source: e,
    })?
    .filter_map(|entry| entry.ok().map(|e| e.path()))
    .filter(|p| p.is_dir())
    .collect();
  dirs.sort();

  for pkg_dir in dirs {
    let dir_name = pkg_dir
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_default();
    let id = dir_name.to_lowercase();

    let info_path = pkg_dir.join(INFO_NAME);
    let mut info: PackageInfo = if info_path.is_file() {
      let bytes = fs::read(&info_path).map_err(|e| BuildError::Io {
        path: info_path.clone(),
        source: e,
      })?;
      serde_json::from_slice(&bytes)?
    } else {
      PackageInfo::default()
    };

    let version = next_version(info.version.as_deref(), &ctx.today);
    let name = info.name.clone().unwrap_or_else(|| capitalize(&id));

    let doc_path = pkg_dir.join(VERSION_DOCUMENT_NAME);
    let doc = if doc_path.is_file() {
      let bytes = fs::read(&doc_path).map_err(|e| BuildError::Io {
        path: doc_path.clone(),
        source: e,
      })?;
      let raw: serde_json::Value = serde_json::from_slice(&bytes)?;
      let raw = VersionDocument::from_value(&id, raw)?;
      let mut resolved = resolve(store, raw)?;
      let rehosted = rehost_libraries(&mut resolved, &pkg_dir, artifact_source, ctx)?;
      if rehosted > 0 {
        info!(package = %id, rehosted, "rehosted library artifacts");
      }
      Some(resolved)
    } else {
      None
    };

    info!(package = %id, version = %version, "building package");
    let package = build_package(ctx, &pkg_dir, &id, &name, &version, doc)?;

    info.id = Some(id.clone());
    info.name = Some(name);
    info.version = Some(version);
    info.time = Some(ctx.now.clone());
    fs::write(&info_path, render_json(&info)?).map_err(|e| BuildError::Io {
      path: info_path,
      source: e,
    })?;

    packages.insert(id, package);
  }

  let index = IndexDocument {
    version: "1.0".to_string(),
    time: ctx.now.clone(),
    launcher: ctx.launcher.clone(),
    packages,
  };

  write_document(&index, &packages_root.join(INDEX_NAME), packages_root, &ctx.urls)
}

fn capitalize(s: &str) -> String {
  let mut chars = s.chars();
  match chars.next() {
    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
    None => String::new(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::hash::sha1_bytes;
  use serde_json::json;
  use tempfile::tempdir;

  struct EmptySource;

  impl DocumentSource for EmptySource {
    fn load(&self, id: &str) -> Result<VersionDocument, DocumentError> {
      Err(DocumentError::NotFound {
        id: id.to_string(),
        path: PathBuf::new(),
      })
    }
  }

  fn test_context<'a>(fetcher: &'a Fetcher, root: &Path) -> BuildContext<'a> {
    BuildContext {
      urls: UrlBuilder::new("https://example.com/", root).unwrap(),
      fetcher,
      launcher: LauncherInfo {
        version: "1.2.0".to_string(),
        url: "https://example.com/launcher/".to_string(),
      },
      now: "2018-01-01T00:00:00+0000".to_string(),
      today: "20180101".to_string(),
    }
  }

  mod version_stamps {
    use super::*;

    #[test]
    fn first_build_starts_at_zero() {
      assert_eq!(next_version(None, "20180101"), "20180101-0");
    }

    #[test]
    fn same_date_increments_ordinal() {
      assert_eq!(next_version(Some("20180101-0"), "20180101"), "20180101-1");
      assert_eq!(next_version(Some("20180101-41"), "20180101"), "20180101-42");
    }

    #[test]
    fn date_rollover_resets_ordinal() {
      assert_eq!(next_version(Some("20180101-7"), "20180102"), "20180102-0");
    }

    #[test]
    fn unparseable_previous_resets() {
      assert_eq!(next_version(Some("20180101"), "20180101"), "20180101-0");
      assert_eq!(next_version(Some("garbage"), "20180101"), "20180101-0");
      assert_eq!(next_version(Some("20180101-x"), "20180101"), "20180101-0");
    }
  }

  mod url_builder {
    use super::*;

    #[test]
    fn requires_slash_terminated_prefix() {
      assert!(matches!(
        UrlBuilder::new("https://example.com", "/srv"),
        Err(BuildError::UrlPrefix { .. })
      ));
    }

    #[test]
    fn maps_paths_under_root() {
      let urls = UrlBuilder::new("https://example.com/", "/srv/web").unwrap();
      assert_eq!(
        urls.url_for(Path::new("/srv/web/packages/mint/files/mods/a.jar")).unwrap(),
        "https://example.com/packages/mint/files/mods/a.jar"
      );
      assert_eq!(
        urls.url_for_dir(Path::new("/srv/web/packages/mint")).unwrap(),
        "https://example.com/packages/mint/"
      );
      assert_eq!(urls.url_for_dir(Path::new("/srv/web")).unwrap(), "https://example.com/");
    }

    #[test]
    fn rejects_paths_outside_root() {
      let urls = UrlBuilder::new("https://example.com/", "/srv/web").unwrap();
      assert!(matches!(
        urls.url_for(Path::new("/etc/passwd")),
        Err(BuildError::OutsideRoot { .. })
      ));
    }
  }

  mod file_walk {
    use super::*;
    use std::fs;

    #[test]
    fn hashes_every_regular_file_sorted() {
      let temp = tempdir().unwrap();
      let files_root = temp.path().join("files");
      fs::create_dir_all(files_root.join("mods")).unwrap();
      fs::create_dir_all(files_root.join("config")).unwrap();
      fs::write(files_root.join("mods/b.jar"), b"bee").unwrap();
      fs::write(files_root.join("mods/a.jar"), b"ay").unwrap();
      fs::write(files_root.join("config/x.cfg"), b"x=1").unwrap();

      let urls = UrlBuilder::new("https://example.com/", temp.path()).unwrap();
      let files = build_files(&files_root, &urls).unwrap();

      let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
      assert_eq!(paths, vec!["config/x.cfg", "mods/a.jar", "mods/b.jar"]);

      let a = &files[1];
      assert_eq!(a.sha1, sha1_bytes(b"ay"));
      assert_eq!(a.size, 2);
      assert_eq!(a.url, "https://example.com/files/mods/a.jar");
    }

    #[test]
    fn missing_files_dir_is_empty() {
      let temp = tempdir().unwrap();
      let urls = UrlBuilder::new("https://example.com/", temp.path()).unwrap();
      assert!(build_files(&temp.path().join("files"), &urls).unwrap().is_empty());
    }
  }

  mod documents {
    use super::*;
    use std::fs;

    #[test]
    fn manifest_documents_use_directory_urls() {
      let temp = tempdir().unwrap();
      let urls = UrlBuilder::new("https://example.com/", temp.path()).unwrap();
      let pkg_dir = temp.path().join("mint");

      let descriptor =
        write_document(&json!({"id": "mint"}), &pkg_dir.join(PACKAGE_MANIFEST_NAME), &pkg_dir, &urls).unwrap();

      assert_eq!(descriptor.url, "https://example.com/mint/");
      assert_eq!(descriptor.path, "modpack.json");

      let written = fs::read(pkg_dir.join(PACKAGE_MANIFEST_NAME)).unwrap();
      assert_eq!(descriptor.sha1, sha1_bytes(&written));
      assert_eq!(descriptor.size, written.len() as u64);
    }

    #[test]
    fn plain_documents_use_file_urls() {
      let temp = tempdir().unwrap();
      let urls = UrlBuilder::new("https://example.com/", temp.path()).unwrap();

      let descriptor = write_document(
        &json!({"id": "1.12.2"}),
        &temp.path().join("mint/minecraft.json"),
        temp.path(),
        &urls,
      )
      .unwrap();

      assert_eq!(descriptor.url, "https://example.com/mint/minecraft.json");
      assert_eq!(descriptor.path, "mint/minecraft.json");
    }
  }

  mod tree_build {
    use super::*;
    use std::fs;

    fn seed_package(root: &Path) {
      let files = root.join("Mint").join(FILES_DIR);
      fs::create_dir_all(files.join("mods")).unwrap();
      fs::write(files.join("mods/a.jar"), b"jar bytes").unwrap();
      fs::write(
        root.join("Mint").join(INFO_NAME),
        serde_json::to_vec(&json!({"name": "Mint Pack"})).unwrap(),
      )
      .unwrap();
    }

    #[test]
    fn builds_index_and_package_manifest() {
      let temp = tempdir().unwrap();
      seed_package(temp.path());

      let fetcher = Fetcher::new();
      let ctx = test_context(&fetcher, temp.path());

      let descriptor = build_tree(&ctx, temp.path(), &EmptySource, None).unwrap();
      assert_eq!(descriptor.url, "https://example.com/");
      assert_eq!(descriptor.path, "index.json");

      let index: IndexDocument = serde_json::from_slice(&fs::read(temp.path().join(INDEX_NAME)).unwrap()).unwrap();
      let package = index.package("mint").expect("package listed under lowercased id");
      assert_eq!(package.name, "Mint Pack");
      assert_eq!(package.version, "20180101-0");
      assert_eq!(package.url, "https://example.com/Mint/");

      let manifest = PackageManifest::load(&temp.path().join("Mint").join(PACKAGE_MANIFEST_NAME)).unwrap();
      manifest.validate().unwrap();
      assert_eq!(manifest.id, "mint");
      assert_eq!(manifest.files.len(), 1);
      assert_eq!(manifest.files[0].path, "mods/a.jar");
      assert_eq!(manifest.files[0].sha1, sha1_bytes(b"jar bytes"));
      assert_eq!(manifest.files[0].url, "https://example.com/Mint/files/mods/a.jar");

      // The index entry content-addresses the manifest bytes
      let manifest_bytes = fs::read(temp.path().join("Mint").join(PACKAGE_MANIFEST_NAME)).unwrap();
      assert_eq!(package.sha1, sha1_bytes(&manifest_bytes));
      assert_eq!(package.size, manifest_bytes.len() as u64);
    }

    #[test]
    fn rebuild_with_pinned_clock_is_byte_identical_except_version() {
      let temp = tempdir().unwrap();
      seed_package(temp.path());

      let fetcher = Fetcher::new();
      let ctx = test_context(&fetcher, temp.path());

      build_tree(&ctx, temp.path(), &EmptySource, None).unwrap();
      let first = fs::read(temp.path().join("Mint").join(PACKAGE_MANIFEST_NAME)).unwrap();

      build_tree(&ctx, temp.path(), &EmptySource, None).unwrap();
      let second = fs::read(temp.path().join("Mint").join(PACKAGE_MANIFEST_NAME)).unwrap();

      // Same date: only the version ordinal advanced
      let first = String::from_utf8(first).unwrap().replace("20180101-0", "<v>");
      let second = String::from_utf8(second).unwrap().replace("20180101-1", "<v>");
      assert_eq!(first, second);
    }

    #[test]
    fn version_document_fields_flow_into_manifest() {
      let temp = tempdir().unwrap();
      seed_package(temp.path());
      fs::write(
        temp.path().join("Mint").join(VERSION_DOCUMENT_NAME),
        serde_json::to_vec(&json!({
          "id": "1.12.2-forge",
          "mainClass": "net.minecraft.launchwrapper.Launch",
          "libraries": []
        }))
        .unwrap(),
      )
      .unwrap();

      let fetcher = Fetcher::new();
      let ctx = test_context(&fetcher, temp.path());
      build_tree(&ctx, temp.path(), &EmptySource, None).unwrap();

      let manifest = PackageManifest::load(&temp.path().join("Mint").join(PACKAGE_MANIFEST_NAME)).unwrap();
      // Package identity wins over the document's id
      assert_eq!(manifest.id, "mint");
      assert_eq!(manifest.extra["mainClass"], "net.minecraft.launchwrapper.Launch");
    }
  }

  mod rehosting {
    use super::*;
    use std::fs;

    #[test]
    fn copies_local_artifact_and_rewrites_downloads() {
      let temp = tempdir().unwrap();
      let pkg_dir = temp.path().join("mint");
      fs::create_dir_all(&pkg_dir).unwrap();

      // A local mirror providing the artifact
      let mirror = temp.path().join("mirror");
      let jar = mirror.join("libraries/com/example/widget/1.2/widget-1.2.jar");
      fs::create_dir_all(jar.parent().unwrap()).unwrap();
      fs::write(&jar, b"widget bytes").unwrap();

      let mut doc = VersionDocument::from_value(
        "test",
        json!({"libraries": [
          {"name": "com.example:widget:1.2", "url": "https://repo.example.com/"},
          {"name": "com.mojang:vanilla:1.0"}
        ]}),
      )
      .unwrap();

      let fetcher = Fetcher::new();
      let ctx = test_context(&fetcher, temp.path());

      let rehosted = rehost_libraries(&mut doc, &pkg_dir, Some(&mirror), &ctx).unwrap();
      assert_eq!(rehosted, 1);

      let rehosted_jar = pkg_dir.join("libraries/com/example/widget/1.2/widget-1.2.jar");
      assert_eq!(fs::read(&rehosted_jar).unwrap(), b"widget bytes");

      let libraries = doc.array_field("libraries").unwrap();
      let artifact = &libraries[0]["downloads"]["artifact"];
      assert_eq!(artifact["path"], "com/example/widget/1.2/widget-1.2.jar");
      assert_eq!(artifact["sha1"], sha1_bytes(b"widget bytes"));
      assert_eq!(artifact["size"], 12);
      assert_eq!(
        artifact["url"],
        "https://example.com/mint/libraries/com/example/widget/1.2/widget-1.2.jar"
      );

      // The vanilla library was left untouched
      assert!(libraries[1].get("downloads").is_none());
    }

    #[test]
    fn fetches_artifact_when_no_local_copy_exists() {
      let mut server = mockito::Server::new();
      server
        .mock("GET", "/maven/com/example/widget/1.2/widget-1.2.jar")
        .with_status(200)
        .with_body("remote widget")
        .create();

      let temp = tempdir().unwrap();
      let pkg_dir = temp.path().join("mint");
      fs::create_dir_all(&pkg_dir).unwrap();

      let mut doc = VersionDocument::from_value(
        "test",
        json!({"libraries": [
          {"name": "com.example:widget:1.2", "url": format!("{}/maven/", server.url())}
        ]}),
      )
      .unwrap();

      let fetcher = Fetcher::new();
      let ctx = test_context(&fetcher, temp.path());

      let rehosted = rehost_libraries(&mut doc, &pkg_dir, None, &ctx).unwrap();
      assert_eq!(rehosted, 1);
      assert_eq!(
        fs::read(pkg_dir.join("libraries/com/example/widget/1.2/widget-1.2.jar")).unwrap(),
        b"remote widget"
      );
    }
  }
}

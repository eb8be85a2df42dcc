//! Library dependencies declared by version documents.
//!
//! A library is identified by maven coordinates (`group:artifact:version`)
//! and carries optional platform rules, a natives classifier map, and its
//! download descriptions. The download forms are a closed set of variants
//! chosen once at parse time; each variant knows how to produce its own
//! URL and install path.

use std::collections::BTreeMap;

use modsync_platform::Platform;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hash::Expected;
use crate::rules::{Action, Rule, evaluate};

/// Default repository for maven-style downloads that name no repo.
pub const DEFAULT_REPOSITORY: &str = "https://libraries.minecraft.net/";

/// Directory under the installation root where library jars live.
pub const LIBRARIES_DIR: &str = "libraries";

/// Errors for library parsing and download selection.
#[derive(Debug, Error)]
pub enum LibraryError {
  /// The `name` field is not `group:artifact:version`.
  #[error("malformed library coordinates: {name}")]
  MalformedCoordinates { name: String },

  /// Natives are declared but no classifier matches the platform.
  #[error("no matching classifier for '{library}' on {os}")]
  NoMatchingClassifier { library: String, os: String },
}

/// Maven coordinates `group:artifact:version`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coordinates {
  pub group: String,
  pub artifact: String,
  pub version: String,
}

impl Coordinates {
  pub fn parse(name: &str) -> Result<Self, LibraryError> {
    let mut parts = name.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
      (Some(group), Some(artifact), Some(version)) if !group.is_empty() && !artifact.is_empty() && !version.is_empty() => {
        Ok(Self {
          group: group.to_string(),
          artifact: artifact.to_string(),
          version: version.to_string(),
        })
      }
      _ => Err(LibraryError::MalformedCoordinates { name: name.to_string() }),
    }
  }

  /// Identity for dependency-list merging: version excluded.
  pub fn identity(&self) -> (&str, &str) {
    (&self.group, &self.artifact)
  }

  /// Jar path relative to the libraries root, maven layout.
  pub fn artifact_path(&self) -> String {
    format!(
      "{}/{}/{}/{}-{}.jar",
      self.group.replace('.', "/"),
      self.artifact,
      self.version,
      self.artifact,
      self.version
    )
  }

  /// Jar path relative to the installation root.
  pub fn jar_path(&self) -> String {
    format!("{LIBRARIES_DIR}/{}", self.artifact_path())
  }
}

/// An explicitly described artifact: path relative to the libraries root,
/// source URL, digest, and size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFile {
  pub path: String,
  pub url: String,
  pub sha1: String,
  pub size: u64,
}

impl ArtifactFile {
  pub fn expected(&self) -> Expected {
    Expected::new(self.sha1.clone(), self.size)
  }
}

/// Natives jar extraction options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractOptions {
  #[serde(default)]
  pub exclude: Vec<String>,
}

/// The `downloads` block of a library declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryDownloads {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub artifact: Option<ArtifactFile>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub classifiers: Option<BTreeMap<String, ArtifactFile>>,
}

/// One resolvable download belonging to a library.
///
/// The variant is selected when the declaration is parsed; call sites only
/// ever ask for the URL and install path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Download {
  /// An explicit artifact description.
  Artifact(ArtifactFile),
  /// An artifact selected from the classifiers map by natives key.
  Classifier { key: String, file: ArtifactFile },
  /// Derived from coordinates against a maven repository base.
  Maven { coordinates: Coordinates, repo: String },
}

impl Download {
  /// The source URL and install path (relative to the installation root)
  /// for this download.
  pub fn resolve_url_and_path(&self) -> (String, String) {
    match self {
      Self::Artifact(file) | Self::Classifier { file, .. } => {
        (file.url.clone(), format!("{LIBRARIES_DIR}/{}", file.path))
      }
      Self::Maven { coordinates, repo } => {
        let rel = coordinates.artifact_path();
        (format!("{repo}{rel}"), format!("{LIBRARIES_DIR}/{rel}"))
      }
    }
  }

  /// Digest and size to verify against, when the variant carries them.
  pub fn expected(&self) -> Expected {
    match self {
      Self::Artifact(file) | Self::Classifier { file, .. } => file.expected(),
      Self::Maven { .. } => Expected::default(),
    }
  }
}

/// A library declaration as it appears in a version document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Library {
  pub name: String,
  /// Bare maven repository base, the short-form upstream declaration.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub rules: Vec<Rule>,
  /// OS name to classifier key.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub natives: Option<BTreeMap<String, String>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub extract: Option<ExtractOptions>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub downloads: Option<LibraryDownloads>,
  #[serde(flatten)]
  pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Library {
  pub fn coordinates(&self) -> Result<Coordinates, LibraryError> {
    Coordinates::parse(&self.name)
  }

  /// Whether this library applies on the given platform.
  pub fn action(&self, platform: &Platform) -> Action {
    evaluate(&self.rules, platform)
  }

  /// Jar path relative to the installation root, used for classpath
  /// assembly.
  pub fn jar_path(&self) -> Result<String, LibraryError> {
    Ok(self.coordinates()?.jar_path())
  }

  /// True when the artifact lives in an external repository and must be
  /// rehosted into the package tree at build time.
  pub fn needs_rehost(&self) -> bool {
    self.url.is_some() || self.extra.contains_key("serverreq") || self.extra.contains_key("clientreq")
  }

  /// The maven-style download derived from the short-form declaration.
  pub fn maven_download(&self) -> Result<Download, LibraryError> {
    let mut repo = self.url.clone().unwrap_or_else(|| DEFAULT_REPOSITORY.to_string());
    if !repo.ends_with('/') {
      repo.push('/');
    }
    Ok(Download::Maven {
      coordinates: self.coordinates()?,
      repo,
    })
  }

  /// All downloads this library contributes on the given platform:
  /// the main artifact (explicit or maven-derived) plus the platform's
  /// native classifier when natives are declared.
  pub fn downloads_for(&self, platform: &Platform) -> Result<Vec<Download>, LibraryError> {
    let mut downloads = Vec::new();

    if let Some(artifact) = self.downloads.as_ref().and_then(|d| d.artifact.as_ref()) {
      downloads.push(Download::Artifact(artifact.clone()));
    } else if self.url.is_some() {
      downloads.push(self.maven_download()?);
    }

    if let Some(native) = self.native_download(platform)? {
      downloads.push(native);
    }

    Ok(downloads)
  }

  /// The native classifier download for the platform, or `None` when this
  /// library declares no natives. A declared natives map with no usable
  /// entry for the platform is an error, never a silent skip.
  pub fn native_download(&self, platform: &Platform) -> Result<Option<Download>, LibraryError> {
    let Some(natives) = &self.natives else {
      return Ok(None);
    };

    let os = platform.os.as_str();
    let no_match = || LibraryError::NoMatchingClassifier {
      library: self.name.clone(),
      os: os.to_string(),
    };

    let key = natives.get(os).ok_or_else(no_match)?;
    let file = self
      .downloads
      .as_ref()
      .and_then(|d| d.classifiers.as_ref())
      .and_then(|c| c.get(key))
      .ok_or_else(no_match)?;

    Ok(Some(Download::Classifier {
      key: key.clone(),
      file: file.clone(),
    }))
  }
}

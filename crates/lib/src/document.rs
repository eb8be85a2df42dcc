//! Version documents: inheritance, merging, and the local document store.
//!
//! A version document is a JSON mapping describing a runtime/platform
//! definition (main class, argument template, libraries, asset index). A
//! document may declare `inheritsFrom`; resolution loads the parent,
//! resolves it recursively, and merges the child's overrides on top,
//! producing a single flattened document. Inheritance cycles are a fatal
//! configuration error.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::fetch::{FetchError, Fetcher};
use crate::hash::Expected;

/// Key declaring the parent document a child inherits from.
pub const INHERITS_FROM: &str = "inheritsFrom";

/// The dependency list key whose merge unions by library identity instead
/// of concatenating.
pub const LIBRARIES_KEY: &str = "libraries";

/// Errors for document loading, access, and resolution.
#[derive(Debug, Error)]
pub enum DocumentError {
  /// No document with this id exists in the store.
  #[error("version document '{id}' not found at '{path}'")]
  NotFound { id: String, path: PathBuf },

  /// Failed to read or write a stored document.
  #[error("io error for version document '{path}': {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// A stored document did not parse as a JSON mapping.
  #[error("failed to parse version document '{id}': {source}")]
  Parse {
    id: String,
    #[source]
    source: serde_json::Error,
  },

  /// The document is valid JSON but not a mapping at the top level.
  #[error("version document '{id}' is not a JSON object")]
  NotAnObject { id: String },

  /// A required field is absent.
  #[error("missing required field '{key}'")]
  MissingField { key: String },

  /// A field is present with the wrong shape.
  #[error("field '{key}' is not a {expected}")]
  FieldType { key: String, expected: &'static str },

  /// The inheritance chain revisited a document id.
  #[error("inheritance cycle through version document '{id}'")]
  InheritanceCycle { id: String },

  /// Fetching a remote document failed.
  #[error(transparent)]
  Fetch(#[from] FetchError),
}

/// A version document: a JSON mapping with typed accessors that fail
/// loudly instead of defaulting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionDocument(pub Map<String, Value>);

impl VersionDocument {
  pub fn from_value(id: &str, value: Value) -> Result<Self, DocumentError> {
    match value {
      Value::Object(map) => Ok(Self(map)),
      _ => Err(DocumentError::NotAnObject { id: id.to_string() }),
    }
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.0.get(key)
  }

  /// A required string field.
  pub fn str_field(&self, key: &str) -> Result<&str, DocumentError> {
    match self.0.get(key) {
      None => Err(DocumentError::MissingField { key: key.to_string() }),
      Some(Value::String(s)) => Ok(s),
      Some(_) => Err(DocumentError::FieldType {
        key: key.to_string(),
        expected: "string",
      }),
    }
  }

  /// An optional string field; present-but-mistyped is still an error.
  pub fn opt_str_field(&self, key: &str) -> Result<Option<&str>, DocumentError> {
    match self.0.get(key) {
      None => Ok(None),
      Some(Value::String(s)) => Ok(Some(s)),
      Some(_) => Err(DocumentError::FieldType {
        key: key.to_string(),
        expected: "string",
      }),
    }
  }

  /// A required array field.
  pub fn array_field(&self, key: &str) -> Result<&Vec<Value>, DocumentError> {
    match self.0.get(key) {
      None => Err(DocumentError::MissingField { key: key.to_string() }),
      Some(Value::Array(items)) => Ok(items),
      Some(_) => Err(DocumentError::FieldType {
        key: key.to_string(),
        expected: "array",
      }),
    }
  }

  pub fn id(&self) -> Result<&str, DocumentError> {
    self.str_field("id")
  }

  /// The parent this document inherits from, if any.
  pub fn inherits_from(&self) -> Result<Option<&str>, DocumentError> {
    self.opt_str_field(INHERITS_FROM)
  }

  fn take_inherits_from(&mut self) -> Result<Option<String>, DocumentError> {
    let parent = self.inherits_from()?.map(str::to_string);
    if parent.is_some() {
      self.0.remove(INHERITS_FROM);
    }
    Ok(parent)
  }
}

/// Merge an override document onto a base document.
///
/// Per key in the override: two arrays concatenate, except `libraries`
/// which unions by (group, artifact) identity, keeping the base's entries
/// and order and appending only genuinely new ones; two mappings
/// shallow-merge; anything else replaces. Keys absent from the override
/// leave the base untouched.
pub fn merge(base: &VersionDocument, overlay: &VersionDocument) -> VersionDocument {
  let mut out = base.0.clone();
  for (key, value) in &overlay.0 {
    match (out.get_mut(key), value) {
      (Some(Value::Array(dst)), Value::Array(src)) if key == LIBRARIES_KEY => {
        merge_libraries(dst, src);
      }
      (Some(Value::Array(dst)), Value::Array(src)) => {
        dst.extend(src.iter().cloned());
      }
      (Some(Value::Object(dst)), Value::Object(src)) => {
        for (k, v) in src {
          dst.insert(k.clone(), v.clone());
        }
      }
      _ => {
        out.insert(key.clone(), value.clone());
      }
    }
  }
  VersionDocument(out)
}

fn merge_libraries(dst: &mut Vec<Value>, src: &[Value]) {
  let existing: HashSet<Option<(String, String)>> = dst.iter().map(library_identity).collect();
  for library in src {
    let identity = library_identity(library);
    // Entries without a parseable name can never collide, always append
    if identity.is_none() || !existing.contains(&identity) {
      dst.push(library.clone());
    }
  }
}

/// Library identity for merge purposes: the (group, artifact) prefix of
/// the `name` coordinates, version excluded.
fn library_identity(library: &Value) -> Option<(String, String)> {
  let name = library.get("name")?.as_str()?;
  let mut parts = name.split(':');
  let group = parts.next()?;
  let artifact = parts.next()?;
  Some((group.to_string(), artifact.to_string()))
}

/// Anything that can produce raw version documents by id.
pub trait DocumentSource {
  fn load(&self, id: &str) -> Result<VersionDocument, DocumentError>;
}

/// Flatten a document's inheritance chain.
///
/// While the document declares `inheritsFrom`, the parent is loaded,
/// recursively resolved, and the child merged on top of it. Resolving a
/// document without `inheritsFrom` returns it unchanged, so resolution is
/// idempotent. A revisited parent id is an `InheritanceCycle` error.
pub fn resolve(source: &dyn DocumentSource, doc: VersionDocument) -> Result<VersionDocument, DocumentError> {
  let mut visited = HashSet::new();
  resolve_with(source, doc, &mut visited)
}

fn resolve_with(
  source: &dyn DocumentSource,
  mut doc: VersionDocument,
  visited: &mut HashSet<String>,
) -> Result<VersionDocument, DocumentError> {
  let Some(parent_id) = doc.take_inherits_from()? else {
    return Ok(doc);
  };

  if !visited.insert(parent_id.clone()) {
    return Err(DocumentError::InheritanceCycle { id: parent_id });
  }

  debug!(parent = %parent_id, "resolving inherited version document");
  let parent = source.load(&parent_id)?;
  let parent = resolve_with(source, parent, visited)?;
  Ok(merge(&parent, &doc))
}

/// On-disk store of raw version documents, keyed by id.
///
/// Documents live at `<root>/<id>/<id>.json`. Only raw documents are
/// cached; resolution happens on every load. When a remote base URL is
/// configured, a missing document is fetched into the store first.
#[derive(Debug)]
pub struct VersionStore<'a> {
  root: PathBuf,
  remote: Option<(String, &'a Fetcher)>,
}

impl<'a> VersionStore<'a> {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      remote: None,
    }
  }

  /// Fill cache misses from `base_url` (slash-terminated) using `fetcher`.
  pub fn with_remote(mut self, base_url: impl Into<String>, fetcher: &'a Fetcher) -> Self {
    self.remote = Some((base_url.into(), fetcher));
    self
  }

  pub fn document_path(&self, id: &str) -> PathBuf {
    self.root.join(id).join(format!("{id}.json"))
  }

  /// Store a raw document, creating its directory.
  pub fn save(&self, id: &str, doc: &VersionDocument) -> Result<(), DocumentError> {
    let path = self.document_path(id);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).map_err(|e| DocumentError::Io {
        path: parent.to_path_buf(),
        source: e,
      })?;
    }
    let bytes = serde_json::to_vec_pretty(doc).map_err(|e| DocumentError::Parse {
      id: id.to_string(),
      source: e,
    })?;
    std::fs::write(&path, bytes).map_err(|e| DocumentError::Io { path, source: e })
  }
}

impl DocumentSource for VersionStore<'_> {
  fn load(&self, id: &str) -> Result<VersionDocument, DocumentError> {
    let path = self.document_path(id);

    if !path.exists() {
      match &self.remote {
        Some((base, fetcher)) => {
          let url = format!("{base}{id}/{id}.json");
          debug!(id, url, "filling version document cache");
          fetcher.fetch(&url, &path, &Expected::default())?;
        }
        None => {
          return Err(DocumentError::NotFound {
            id: id.to_string(),
            path,
          });
        }
      }
    }

    let bytes = std::fs::read(&path).map_err(|e| DocumentError::Io {
      path: path.clone(),
      source: e,
    })?;
    let value: Value = serde_json::from_slice(&bytes).map_err(|e| DocumentError::Parse {
      id: id.to_string(),
      source: e,
    })?;
    VersionDocument::from_value(id, value)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;
  use tempfile::tempdir;

  fn doc(value: Value) -> VersionDocument {
    VersionDocument::from_value("test", value).unwrap()
  }

  #[test]
  fn merge_scalar_overrides_and_keeps_rest() {
    let base = doc(json!({"id": "A", "mainClass": "a.Main", "jar": "A"}));
    let overlay = doc(json!({"id": "B"}));

    let merged = merge(&base, &overlay);
    assert_eq!(merged.str_field("id").unwrap(), "B");
    assert_eq!(merged.str_field("mainClass").unwrap(), "a.Main");
    assert_eq!(merged.str_field("jar").unwrap(), "A");
  }

  #[test]
  fn merge_concatenates_plain_sequences() {
    let base = doc(json!({"tags": ["one"]}));
    let overlay = doc(json!({"tags": ["two", "one"]}));

    let merged = merge(&base, &overlay);
    assert_eq!(merged.get("tags").unwrap(), &json!(["one", "two", "one"]));
  }

  #[test]
  fn merge_unions_libraries_by_identity() {
    let base = doc(json!({"libraries": [
      {"name": "com.example:x:1.0"},
      {"name": "com.example:y:1.0"},
    ]}));
    // Same (group, artifact) as base's x even though the version differs
    let overlay = doc(json!({"libraries": [
      {"name": "com.example:x:2.0", "marker": true},
      {"name": "com.example:z:1.0"},
    ]}));

    let merged = merge(&base, &overlay);
    let libraries = merged.array_field("libraries").unwrap();
    let names: Vec<&str> = libraries.iter().map(|l| l["name"].as_str().unwrap()).collect();

    // Base's copy and order retained, only genuinely new entries appended
    assert_eq!(names, vec!["com.example:x:1.0", "com.example:y:1.0", "com.example:z:1.0"]);
  }

  #[test]
  fn merge_shallow_merges_mappings() {
    let base = doc(json!({"downloads": {"client": {"url": "a"}, "server": {"url": "b"}}}));
    let overlay = doc(json!({"downloads": {"client": {"url": "c"}}}));

    let merged = merge(&base, &overlay);
    assert_eq!(merged.get("downloads").unwrap()["client"]["url"], "c");
    assert_eq!(merged.get("downloads").unwrap()["server"]["url"], "b");
  }

  struct MapSource(std::collections::BTreeMap<String, VersionDocument>);

  impl DocumentSource for MapSource {
    fn load(&self, id: &str) -> Result<VersionDocument, DocumentError> {
      self.0.get(id).cloned().ok_or_else(|| DocumentError::NotFound {
        id: id.to_string(),
        path: PathBuf::new(),
      })
    }
  }

  #[test]
  fn resolve_flattens_inheritance() {
    let mut docs = std::collections::BTreeMap::new();
    docs.insert("A".to_string(), doc(json!({"id": "A", "libraries": [{"name": "g:x:1"}]})));
    let source = MapSource(docs);

    let child = doc(json!({"id": "B", "inheritsFrom": "A"}));
    let resolved = resolve(&source, child).unwrap();

    assert_eq!(resolved.str_field("id").unwrap(), "B");
    assert!(resolved.inherits_from().unwrap().is_none());
    assert_eq!(resolved.array_field("libraries").unwrap().len(), 1);
  }

  #[test]
  fn resolve_without_inheritance_is_identity() {
    let source = MapSource(Default::default());
    let plain = doc(json!({"id": "A", "jar": "A"}));
    let resolved = resolve(&source, plain.clone()).unwrap();
    assert_eq!(resolved, plain);
  }

  #[test]
  fn resolve_walks_grandparents() {
    let mut docs = std::collections::BTreeMap::new();
    docs.insert(
      "A".to_string(),
      doc(json!({"id": "A", "mainClass": "a.Main", "libraries": [{"name": "g:a:1"}]})),
    );
    docs.insert(
      "B".to_string(),
      doc(json!({"id": "B", "inheritsFrom": "A", "libraries": [{"name": "g:b:1"}]})),
    );
    let source = MapSource(docs);

    let child = doc(json!({"id": "C", "inheritsFrom": "B", "libraries": [{"name": "g:c:1"}]}));
    let resolved = resolve(&source, child).unwrap();

    assert_eq!(resolved.str_field("mainClass").unwrap(), "a.Main");
    let names: Vec<&str> = resolved
      .array_field("libraries")
      .unwrap()
      .iter()
      .map(|l| l["name"].as_str().unwrap())
      .collect();
    assert_eq!(names, vec!["g:a:1", "g:b:1", "g:c:1"]);
  }

  #[test]
  fn resolve_detects_cycles() {
    let mut docs = std::collections::BTreeMap::new();
    docs.insert("A".to_string(), doc(json!({"id": "A", "inheritsFrom": "B"})));
    docs.insert("B".to_string(), doc(json!({"id": "B", "inheritsFrom": "A"})));
    let source = MapSource(docs);

    let child = doc(json!({"id": "C", "inheritsFrom": "A"}));
    let err = resolve(&source, child).unwrap_err();
    assert!(matches!(err, DocumentError::InheritanceCycle { .. }));
  }

  #[test]
  fn missing_field_is_loud() {
    let d = doc(json!({"id": "A"}));
    assert!(matches!(
      d.str_field("mainClass"),
      Err(DocumentError::MissingField { .. })
    ));
    assert!(matches!(
      doc(json!({"id": 7})).id(),
      Err(DocumentError::FieldType { .. })
    ));
  }

  #[test]
  fn store_roundtrips_documents() {
    let temp = tempdir().unwrap();
    let store = VersionStore::new(temp.path());

    let d = doc(json!({"id": "1.12.2", "jar": "1.12.2"}));
    store.save("1.12.2", &d).unwrap();

    let loaded = store.load("1.12.2").unwrap();
    assert_eq!(loaded, d);
  }

  #[test]
  fn store_miss_without_remote_is_not_found() {
    let temp = tempdir().unwrap();
    let store = VersionStore::new(temp.path());
    assert!(matches!(store.load("absent"), Err(DocumentError::NotFound { .. })));
  }

  #[test]
  fn store_fills_cache_from_remote_once() {
    let mut server = mockito::Server::new();
    let mock = server
      .mock("GET", "/versions/1.12.2/1.12.2.json")
      .with_status(200)
      .with_body(r#"{"id": "1.12.2", "jar": "1.12.2"}"#)
      .expect(1)
      .create();

    let temp = tempdir().unwrap();
    let fetcher = Fetcher::new();
    let store = VersionStore::new(temp.path()).with_remote(format!("{}/versions/", server.url()), &fetcher);

    let loaded = store.load("1.12.2").unwrap();
    assert_eq!(loaded.str_field("jar").unwrap(), "1.12.2");
    assert!(store.document_path("1.12.2").is_file());

    // Second load reads the cached raw document, no network
    let again = store.load("1.12.2").unwrap();
    assert_eq!(again, loaded);
    mock.assert();
  }
}

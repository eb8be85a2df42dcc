//! Verified HTTP downloads with bounded retries.
//!
//! Downloads stream into a temporary file beside their destination and are
//! only renamed into place after the expected digest and size check out, so
//! a partially transferred or corrupt body is never visible at the final
//! path. Transient failures (connection errors, non-success status codes,
//! verification mismatches) consume one attempt each; only exhausting the
//! whole retry budget surfaces as an error.

use std::fmt;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::hash::{self, Expected};

/// Number of download attempts before a transfer is considered failed.
const MAX_ATTEMPTS: u32 = 3;

/// Streaming copy buffer size.
const CHUNK_LEN: usize = 65536;

/// Per-request timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Errors that can occur while fetching remote content.
#[derive(Debug, Error)]
pub enum FetchError {
  /// Failed to create the destination's parent directory.
  #[error("failed to create directory '{path}': {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// Every attempt failed; the last failure is carried along.
  #[error("transfer failed for '{url}' after {attempts} attempts: {last}")]
  Exhausted {
    url: String,
    attempts: u32,
    last: AttemptFailure,
  },

  /// The response body was not valid JSON.
  #[error("invalid JSON from '{url}': {source}")]
  Json {
    url: String,
    #[source]
    source: serde_json::Error,
  },
}

/// Why a single download attempt failed.
#[derive(Debug)]
pub enum AttemptFailure {
  Request(reqwest::Error),
  Status(reqwest::StatusCode),
  Io(io::Error),
  Verification,
}

impl fmt::Display for AttemptFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Request(e) => write!(f, "request error: {e}"),
      Self::Status(code) => write!(f, "HTTP {code}"),
      Self::Io(e) => write!(f, "io error: {e}"),
      Self::Verification => write!(f, "digest or size mismatch"),
    }
  }
}

/// HTTP download context.
///
/// Owns the underlying connection pool; construct one per process and pass
/// it by reference to whichever component needs network access.
#[derive(Debug)]
pub struct Fetcher {
  client: reqwest::blocking::Client,
}

impl Default for Fetcher {
  fn default() -> Self {
    Self::new()
  }
}

impl Fetcher {
  pub fn new() -> Self {
    let client = reqwest::blocking::Client::builder()
      .timeout(REQUEST_TIMEOUT)
      .build()
      .expect("default TLS backend must be available");
    Self { client }
  }

  /// Download `url` to `dest`, verifying against `expected`.
  ///
  /// Up to [`MAX_ATTEMPTS`] attempts are made. Each attempt streams the
  /// body into a temporary file in `dest`'s directory and atomically
  /// renames it into place once verification succeeds. A verification
  /// failure deletes the temporary file and counts as a failed attempt.
  pub fn fetch(&self, url: &str, dest: &Path, expected: &Expected) -> Result<(), FetchError> {
    if let Some(parent) = dest.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent).map_err(|e| FetchError::CreateDir {
        path: parent.to_path_buf(),
        source: e,
      })?;
    }

    let mut last = None;
    for attempt in 1..=MAX_ATTEMPTS {
      match self.attempt(url, dest, expected) {
        Ok(bytes) => {
          debug!(url, bytes, attempt, "download complete");
          return Ok(());
        }
        Err(failure) => {
          warn!(url, attempt, %failure, "download attempt failed");
          last = Some(failure);
        }
      }
    }

    Err(FetchError::Exhausted {
      url: url.to_string(),
      attempts: MAX_ATTEMPTS,
      last: last.expect("at least one attempt ran"),
    })
  }

  /// Download `url` to `dest` only when the file is not already present
  /// and verified. Returns whether a network transfer happened.
  pub fn ensure(&self, url: &str, dest: &Path, expected: &Expected) -> Result<bool, FetchError> {
    if hash::verify(dest, expected) {
      trace!(path = %dest.display(), "already present and verified");
      return Ok(false);
    }
    self.fetch(url, dest, expected)?;
    Ok(true)
  }

  /// Fetch a JSON document body with the same retry budget as file
  /// transfers. A malformed body is a hard error, not a retried one.
  pub fn fetch_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T, FetchError> {
    let mut last = None;
    for attempt in 1..=MAX_ATTEMPTS {
      match self.attempt_body(url) {
        Ok(body) => {
          debug!(url, bytes = body.len(), attempt, "document fetched");
          return serde_json::from_slice(&body).map_err(|e| FetchError::Json {
            url: url.to_string(),
            source: e,
          });
        }
        Err(failure) => {
          warn!(url, attempt, %failure, "document fetch attempt failed");
          last = Some(failure);
        }
      }
    }

    Err(FetchError::Exhausted {
      url: url.to_string(),
      attempts: MAX_ATTEMPTS,
      last: last.expect("at least one attempt ran"),
    })
  }

  fn attempt(&self, url: &str, dest: &Path, expected: &Expected) -> Result<u64, AttemptFailure> {
    let mut response = self.client.get(url).send().map_err(AttemptFailure::Request)?;
    let status = response.status();
    if !status.is_success() {
      return Err(AttemptFailure::Status(status));
    }

    let total = response.content_length();
    trace!(url, ?total, "transfer started");

    let parent = dest.parent().filter(|p| !p.as_os_str().is_empty());
    let mut temp = NamedTempFile::new_in(parent.unwrap_or(Path::new("."))).map_err(AttemptFailure::Io)?;

    let mut buffer = [0u8; CHUNK_LEN];
    let mut written: u64 = 0;
    loop {
      let read = response.read(&mut buffer).map_err(AttemptFailure::Io)?;
      if read == 0 {
        break;
      }
      temp.write_all(&buffer[..read]).map_err(AttemptFailure::Io)?;
      written += read as u64;
      trace!(url, written, ?total, "transfer progress");
    }
    temp.flush().map_err(AttemptFailure::Io)?;

    if !expected.is_empty() && !hash::verify(temp.path(), expected) {
      // Dropping the NamedTempFile removes the partial download
      return Err(AttemptFailure::Verification);
    }

    temp.persist(dest).map_err(|e| AttemptFailure::Io(e.error))?;
    Ok(written)
  }

  fn attempt_body(&self, url: &str) -> Result<Vec<u8>, AttemptFailure> {
    let mut response = self.client.get(url).send().map_err(AttemptFailure::Request)?;
    let status = response.status();
    if !status.is_success() {
      return Err(AttemptFailure::Status(status));
    }

    let mut body = Vec::new();
    response.read_to_end(&mut body).map_err(AttemptFailure::Io)?;
    Ok(body)
  }
}

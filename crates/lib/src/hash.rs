//! SHA-1 content digests and local file verification.
//!
//! Every byte a manifest tracks is identified by a lowercase 40-character
//! hex digest plus its size. Verification compares the size first because
//! it is cheap and rules out most mismatches without reading the file.

use std::fs;
use std::io::{self, Read};
use std::path::Path;

use sha1::{Digest, Sha1};

const READ_BUF_LEN: usize = 8192;

/// Expected content properties for a tracked file.
///
/// Either field may be absent; an absent field is simply not checked.
/// A completely empty expectation only requires the file to exist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expected {
  pub sha1: Option<String>,
  pub size: Option<u64>,
}

impl Expected {
  pub fn new(sha1: impl Into<String>, size: u64) -> Self {
    Self {
      sha1: Some(sha1.into()),
      size: Some(size),
    }
  }

  /// True when there is nothing to check beyond existence.
  pub fn is_empty(&self) -> bool {
    self.sha1.is_none() && self.size.is_none()
  }
}

/// Compute the lowercase hex SHA-1 digest of a file's contents.
///
/// Reads the file in fixed-size chunks so arbitrarily large files never
/// get buffered whole.
pub fn sha1_file(path: &Path) -> io::Result<String> {
  let mut file = fs::File::open(path)?;
  let mut hasher = Sha1::new();
  let mut buffer = [0u8; READ_BUF_LEN];

  loop {
    let bytes_read = file.read(&mut buffer)?;
    if bytes_read == 0 {
      break;
    }
    hasher.update(&buffer[..bytes_read]);
  }

  Ok(hex::encode(hasher.finalize()))
}

/// Compute the lowercase hex SHA-1 digest of a byte slice.
pub fn sha1_bytes(data: &[u8]) -> String {
  let mut hasher = Sha1::new();
  hasher.update(data);
  hex::encode(hasher.finalize())
}

/// Check a local file against an expectation.
///
/// A missing path, or a path that is not a regular file, verifies as
/// `false`; this function never fails. The size comparison short-circuits
/// before any hashing happens. Expected digests are compared
/// case-insensitively since some documents carry uppercase hex.
pub fn verify(path: &Path, expected: &Expected) -> bool {
  let Ok(metadata) = fs::metadata(path) else {
    return false;
  };
  if !metadata.is_file() {
    return false;
  }

  if let Some(size) = expected.size
    && metadata.len() != size
  {
    return false;
  }

  let Some(expected_sha1) = expected.sha1.as_deref() else {
    // No digest to compare, the size check alone decides
    return true;
  };

  match sha1_file(path) {
    Ok(actual) => actual == expected_sha1.to_ascii_lowercase(),
    Err(_) => false,
  }
}

//! modsync-platform: OS and architecture detection for modsync
//!
//! Provides the `Platform` identifier used to evaluate package rules and
//! select native classifiers, plus the well-known cache directories.

pub mod arch;
pub mod os;
pub mod paths;

use std::fmt;

use thiserror::Error;

pub use arch::Arch;
pub use os::Os;

/// Errors that can occur during platform detection.
#[derive(Debug, Error)]
pub enum PlatformError {
  /// The running OS/architecture pair is not supported.
  #[error("unsupported platform: {os}/{arch}")]
  Unsupported { os: String, arch: String },
}

/// Platform identifier combining OS and architecture (e.g. "windows-x64")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform {
  pub os: Os,
  pub arch: Arch,
}

impl Platform {
  /// Create a new platform identifier
  pub fn new(os: Os, arch: Arch) -> Self {
    Self { os, arch }
  }

  /// Detect the current platform at runtime
  ///
  /// Returns `None` if the OS or architecture is not supported
  pub fn current() -> Option<Self> {
    Some(Self {
      os: Os::current()?,
      arch: Arch::current()?,
    })
  }

  /// Detect the current platform, failing with a `PlatformError` when the
  /// OS or architecture is unknown.
  pub fn detect() -> Result<Self, PlatformError> {
    Self::current().ok_or_else(|| PlatformError::Unsupported {
      os: std::env::consts::OS.to_string(),
      arch: std::env::consts::ARCH.to_string(),
    })
  }
}

impl fmt::Display for Platform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}-{}", self.os, self.arch)
  }
}

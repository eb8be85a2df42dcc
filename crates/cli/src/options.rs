//! The local options document driving a sync run.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Name of the options document next to the instance tree.
pub const OPTIONS_NAME: &str = "options.json";

fn default_vm_options() -> String {
  "-Xmx8G -Xmn768M".to_string()
}

fn default_keep_launcher() -> bool {
  true
}

/// User settings: which index to follow, which package to sync, and how
/// to launch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Options {
  /// URL of the published index document.
  pub url: String,
  /// Package id to synchronize.
  pub package: String,
  #[serde(default = "default_vm_options")]
  pub vm_opt: String,
  #[serde(default = "default_keep_launcher")]
  pub keep_launcher: bool,
}

impl Options {
  pub fn load(path: &Path) -> Result<Self> {
    let bytes = std::fs::read(path).with_context(|| format!("options file missing: {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("options file invalid: {}", path.display()))
  }

  /// JVM options split into individual arguments.
  pub fn vm_options(&self) -> Vec<String> {
    self.vm_opt.split_whitespace().map(str::to_string).collect()
  }
}

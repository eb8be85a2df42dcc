//! modsync-lib: manifest-driven package synchronization
//!
//! This crate provides the core engine for distributing versioned file
//! bundles from a server-built manifest to clients:
//! - `manifest`: the content-addressed file list and index chain
//! - `build`: the server-side builder emitting those documents
//! - `sync`: client-side reconciliation of a local tree against a manifest
//! - `document`: version documents with inheritance and merging
//! - `rules` / `library`: platform-conditional dependency declarations
//! - `install` / `launch` / `runtime`: applying a resolved document and
//!   preparing the hand-off to an external process launcher

pub mod build;
pub mod document;
pub mod fetch;
pub mod hash;
pub mod install;
pub mod launch;
pub mod library;
pub mod manifest;
pub mod rules;
pub mod runtime;
pub mod sync;

pub use build::{BuildContext, BuildError, UrlBuilder, build_tree, next_version};
pub use document::{DocumentError, DocumentSource, VersionDocument, VersionStore, merge, resolve};
pub use fetch::{FetchError, Fetcher};
pub use hash::Expected;
pub use install::{InstallError, Installer};
pub use launch::{AuthSession, LaunchError, LaunchOptions, LaunchSpec, build_launch_spec};
pub use library::{Download, Library, LibraryError};
pub use manifest::{
  ContentDescriptor, FileEntry, IndexDocument, LauncherInfo, ManifestError, PackageManifest, PackageRef,
};
pub use rules::{Action, Rule, evaluate};
pub use runtime::{RuntimeError, RuntimeManager};
pub use sync::{CancelFlag, SyncEngine, SyncError, SyncOutcome};

mod options;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use modsync_lib::{
  BuildContext, Fetcher, IndexDocument, LauncherInfo, PackageManifest, SyncEngine, UrlBuilder, VersionStore,
  build_tree,
  manifest::PACKAGE_MANIFEST_NAME,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::options::{OPTIONS_NAME, Options};

/// modsync - manifest-driven package synchronization
#[derive(Parser)]
#[command(name = "modsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Synchronize the configured package from its published index
  Sync {
    /// Base directory holding options.json and the instance tree
    #[arg(default_value = ".")]
    root: PathBuf,

    /// Package id to sync (overrides the options file)
    #[arg(short, long)]
    package: Option<String>,

    /// Reconcile even when the completion marker is present
    #[arg(short, long)]
    force: bool,
  },

  /// Build manifests and the index for a published tree
  Build {
    /// Published web root on disk
    root: PathBuf,

    /// External URL the web root is served under (must end with '/')
    #[arg(short, long)]
    site: String,

    /// Local mirror providing library artifacts for rehosting
    #[arg(long)]
    mirror: Option<PathBuf>,
  },
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .without_time()
    .init();

  let cli = Cli::parse();

  match cli.command {
    Commands::Sync { root, package, force } => cmd_sync(&root, package, force),
    Commands::Build { root, site, mirror } => cmd_build(&root, &site, mirror.as_deref()),
  }
}

fn cmd_sync(root: &Path, package: Option<String>, force: bool) -> Result<()> {
  let options = Options::load(&root.join(OPTIONS_NAME))?;
  let package = package.unwrap_or_else(|| options.package.clone());

  let fetcher = Fetcher::new();

  info!(url = %options.url, "fetching package index");
  let index: IndexDocument = fetcher.fetch_json(&options.url)?;

  check_launcher(&index.launcher)?;

  let Some(package_ref) = index.package(&package) else {
    bail!("package '{package}' is not listed in the index");
  };
  println!(
    ":: {} {} ({})",
    package_ref.name, package_ref.version, package_ref.time
  );

  let instance_dir = root.join("instances").join(&package);
  let manifest_entry = package_ref.manifest_entry();
  let manifest_path = instance_dir.join(PACKAGE_MANIFEST_NAME);

  let is_fresh = fetcher
    .ensure(&manifest_entry.url, &manifest_path, &manifest_entry.expected())
    .context("fetching package manifest")?;

  let manifest = PackageManifest::load(&manifest_path)?;

  let engine = SyncEngine::new(&fetcher, &instance_dir);
  let outcome = engine.sync(&manifest, force || is_fresh)?;

  if outcome.synced {
    println!(":: reconciled, {} file(s) fetched", outcome.fetched);
  } else {
    println!(":: already up to date");
  }
  if outcome.keep_applied {
    println!(":: keep layer applied");
  }

  Ok(())
}

fn check_launcher(launcher: &LauncherInfo) -> Result<()> {
  let own_version = env!("CARGO_PKG_VERSION");
  if launcher.version == own_version {
    info!("launcher is latest");
    return Ok(());
  }

  warn!(
    current = own_version,
    published = %launcher.version,
    "launcher update available"
  );
  bail!(
    "launcher update required: version {} is published at {}",
    launcher.version,
    launcher.url
  );
}

fn cmd_build(root: &Path, site: &str, mirror: Option<&Path>) -> Result<()> {
  let fetcher = Fetcher::new();
  let urls = UrlBuilder::new(site, root)?;

  let launcher = LauncherInfo {
    version: env!("CARGO_PKG_VERSION").to_string(),
    url: format!("{site}launcher/"),
  };
  let ctx = BuildContext::new(urls, &fetcher, launcher);

  let store = VersionStore::new(root.join("versions"));
  let packages_root = root.join("packages");

  let descriptor = build_tree(&ctx, &packages_root, &store, mirror)?;
  println!("{}", descriptor.url);
  Ok(())
}

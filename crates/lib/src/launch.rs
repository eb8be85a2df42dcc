//! Launch specification assembly.
//!
//! Produces everything an external process launcher needs: the resolved
//! classpath, the `${placeholder}`-substituted argument vector, and the
//! JVM options. Nothing here spawns a process.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use modsync_platform::{Os, Platform};
use thiserror::Error;
use tracing::debug;

use crate::document::{DocumentError, VersionDocument};
use crate::install::NATIVES_DIR;
use crate::library::LibraryError;
use crate::manifest::join_relative;
use crate::rules::Action;

/// Errors that can occur while assembling a launch specification.
#[derive(Debug, Error)]
pub enum LaunchError {
  #[error(transparent)]
  Document(#[from] DocumentError),

  #[error(transparent)]
  Library(#[from] LibraryError),
}

/// Authentication values consumed from the external identity flow.
#[derive(Debug, Clone)]
pub struct AuthSession {
  pub uuid: String,
  pub access_token: String,
  pub player_name: String,
}

/// Caller-supplied launch inputs.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
  pub version_name: String,
  pub game_dir: PathBuf,
  pub auth: AuthSession,
  pub user_type: String,
  /// Extra JVM options, e.g. memory limits.
  pub vm_options: Vec<String>,
}

/// A fully resolved launch command, minus the spawning.
#[derive(Debug, Clone)]
pub struct LaunchSpec {
  pub runtime: PathBuf,
  pub jvm_args: Vec<String>,
  pub classpath: Vec<PathBuf>,
  pub main_class: String,
  pub game_args: Vec<String>,
}

impl LaunchSpec {
  /// Classpath separator for the given OS.
  pub fn classpath_separator(os: Os) -> &'static str {
    match os {
      Os::Windows => ";",
      Os::Linux | Os::Osx => ":",
    }
  }

  /// Flatten into a full argument vector (runtime first) for the process
  /// launcher.
  pub fn command_line(&self, os: Os) -> Vec<String> {
    let mut args = vec![self.runtime.display().to_string()];
    args.extend(self.jvm_args.iter().cloned());
    args.push("-cp".to_string());
    args.push(
      self
        .classpath
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(Self::classpath_separator(os)),
    );
    args.push(self.main_class.clone());
    args.extend(self.game_args.iter().cloned());
    args
  }
}

/// Substitute `${key}` placeholders in a template string.
pub fn substitute(template: &str, values: &BTreeMap<&str, String>) -> String {
  let mut out = template.to_string();
  for (key, value) in values {
    out = out.replace(&format!("${{{key}}}"), value);
  }
  out
}

/// Assemble a launch specification from a resolved version document.
///
/// The classpath contains every allowed library whose jar exists under
/// `game_root`, with the client jar last. The argument template comes
/// from the document's `minecraftArguments` field.
pub fn build_launch_spec(
  doc: &VersionDocument,
  game_root: &Path,
  platform: &Platform,
  runtime: PathBuf,
  options: &LaunchOptions,
) -> Result<LaunchSpec, LaunchError> {
  let main_class = doc.str_field("mainClass")?.to_string();
  let template = doc.str_field("minecraftArguments")?;
  let assets_index = doc.str_field("assets")?.to_string();

  let values = BTreeMap::from([
    ("version_name", options.version_name.clone()),
    ("game_directory", options.game_dir.display().to_string()),
    ("assets_root", game_root.join("assets").display().to_string()),
    ("assets_index_name", assets_index),
    ("auth_uuid", options.auth.uuid.clone()),
    ("auth_access_token", options.auth.access_token.clone()),
    ("auth_player_name", options.auth.player_name.clone()),
    ("user_type", options.user_type.clone()),
  ]);
  let game_args = substitute(template, &values)
    .split_whitespace()
    .map(str::to_string)
    .collect();

  let mut classpath = Vec::new();
  for library in crate::install::document_libraries(doc)? {
    if library.action(platform) != Action::Allow {
      continue;
    }
    let jar = join_relative(game_root, &library.jar_path()?);
    // Natives-only libraries have no main jar on disk; skip silently
    if jar.is_file() {
      classpath.push(jar);
    } else {
      debug!(library = %library.name, "no jar on disk, excluded from classpath");
    }
  }

  let jar_version = match doc.opt_str_field("jar")? {
    Some(jar) => jar.to_string(),
    None => doc.id()?.to_string(),
  };
  classpath.push(join_relative(game_root, &format!("versions/{jar_version}/{jar_version}.jar")));

  let mut jvm_args = vec![
    format!("-Djava.library.path={}", game_root.join(NATIVES_DIR).display()),
    format!(
      "-Dminecraft.client.jar={}",
      join_relative(game_root, &format!("versions/{jar_version}/{jar_version}.jar")).display()
    ),
  ];
  jvm_args.extend(options.vm_options.iter().cloned());

  Ok(LaunchSpec {
    runtime,
    jvm_args,
    classpath,
    main_class,
    game_args,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use modsync_platform::Arch;
  use serde_json::json;
  use tempfile::tempdir;

  fn doc(value: serde_json::Value) -> VersionDocument {
    VersionDocument::from_value("test", value).unwrap()
  }

  fn options() -> LaunchOptions {
    LaunchOptions {
      version_name: "20180101-0".to_string(),
      game_dir: PathBuf::from("."),
      auth: AuthSession {
        uuid: "uuid-1234".to_string(),
        access_token: "token-abcd".to_string(),
        player_name: "Steve".to_string(),
      },
      user_type: "mojang".to_string(),
      vm_options: vec!["-Xmx8G".to_string()],
    }
  }

  #[test]
  fn substitute_replaces_known_placeholders() {
    let values = BTreeMap::from([("auth_player_name", "Steve".to_string())]);
    assert_eq!(
      substitute("--username ${auth_player_name} --demo ${unknown}", &values),
      "--username Steve --demo ${unknown}"
    );
  }

  #[test]
  fn spec_assembles_args_and_classpath() {
    let temp = tempdir().unwrap();

    // Only jars that exist make it onto the classpath
    let present = temp.path().join("libraries/g/present/1/present-1.jar");
    std::fs::create_dir_all(present.parent().unwrap()).unwrap();
    std::fs::write(&present, b"jar").unwrap();

    let d = doc(json!({
      "id": "1.12.2",
      "assets": "1.12",
      "mainClass": "net.minecraft.client.main.Main",
      "minecraftArguments": "--username ${auth_player_name} --uuid ${auth_uuid} --assetIndex ${assets_index_name}",
      "libraries": [
        {"name": "g:present:1"},
        {"name": "g:absent:1"}
      ]
    }));

    let platform = Platform::new(Os::Linux, Arch::X64);
    let spec = build_launch_spec(&d, temp.path(), &platform, PathBuf::from("/usr/bin/java"), &options()).unwrap();

    assert_eq!(spec.main_class, "net.minecraft.client.main.Main");
    assert_eq!(
      spec.game_args,
      vec!["--username", "Steve", "--uuid", "uuid-1234", "--assetIndex", "1.12"]
    );

    assert_eq!(spec.classpath.len(), 2);
    assert_eq!(spec.classpath[0], present);
    assert!(spec.classpath[1].ends_with("versions/1.12.2/1.12.2.jar"));

    assert!(spec.jvm_args.iter().any(|a| a.starts_with("-Djava.library.path=")));
    assert!(spec.jvm_args.contains(&"-Xmx8G".to_string()));
  }

  #[test]
  fn disallowed_libraries_stay_off_the_classpath() {
    let temp = tempdir().unwrap();
    let jar = temp.path().join("libraries/g/banned/1/banned-1.jar");
    std::fs::create_dir_all(jar.parent().unwrap()).unwrap();
    std::fs::write(&jar, b"jar").unwrap();

    let d = doc(json!({
      "id": "1.12.2",
      "assets": "1.12",
      "mainClass": "Main",
      "minecraftArguments": "",
      "libraries": [
        {"name": "g:banned:1", "rules": [{"action": "disallow"}]}
      ]
    }));

    let platform = Platform::new(Os::Linux, Arch::X64);
    let spec = build_launch_spec(&d, temp.path(), &platform, PathBuf::from("java"), &options()).unwrap();

    // Client jar only
    assert_eq!(spec.classpath.len(), 1);
  }

  #[test]
  fn missing_main_class_is_an_error() {
    let d = doc(json!({"id": "1.12.2"}));
    let platform = Platform::new(Os::Linux, Arch::X64);
    let err = build_launch_spec(&d, Path::new("."), &platform, PathBuf::from("java"), &options()).unwrap_err();
    assert!(matches!(err, LaunchError::Document(DocumentError::MissingField { .. })));
  }

  #[test]
  fn command_line_layout() {
    let spec = LaunchSpec {
      runtime: PathBuf::from("/usr/bin/java"),
      jvm_args: vec!["-Xmx8G".to_string()],
      classpath: vec![PathBuf::from("a.jar"), PathBuf::from("b.jar")],
      main_class: "Main".to_string(),
      game_args: vec!["--demo".to_string()],
    };

    let args = spec.command_line(Os::Linux);
    assert_eq!(args, vec!["/usr/bin/java", "-Xmx8G", "-cp", "a.jar:b.jar", "Main", "--demo"]);

    let args = spec.command_line(Os::Windows);
    assert!(args.contains(&"a.jar;b.jar".to_string()));
  }
}

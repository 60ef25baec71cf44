//! Development environments.
//!
//! A [`DevEnvironment`] puts the exact toolchain a build would use on `PATH`,
//! alongside the project's extra tools and native libraries. Nothing here is
//! cached: every call re-resolves against the current manifest.

mod libs;
mod shell;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::deps::DependencyFingerprint;
use crate::manifest::Project;
use crate::platform::{Os, Platform};
use crate::toolchain::{ToolchainError, ToolchainResolver};
use crate::util::hash::ObjectHash;

pub use libs::{LibraryResolver, SearchPathResolver, library_dirs};
pub use shell::Shell;

#[derive(Debug, Error)]
pub enum DevEnvError {
  #[error("native library '{name}' not found for {platform}")]
  NativeLibraryMissing { name: String, platform: Platform },

  #[error("tool '{tool}' not found in the toolchain or on PATH")]
  ToolNotFound { tool: String },

  #[error(transparent)]
  Toolchain(#[from] ToolchainError),
}

/// A resolved shell environment for one platform.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DevEnvironment {
  pub platform: Platform,
  pub toolchain: ObjectHash,
  pub toolchain_root: PathBuf,
  /// Toolchain executables first, then the project's extra tools.
  pub tools: Vec<PathBuf>,
  pub library_dirs: Vec<PathBuf>,
  /// Every variable the environment sets, `PATH` included.
  pub env: BTreeMap<String, String>,
  pub dependency_fingerprint: DependencyFingerprint,
}

impl DevEnvironment {
  pub fn activation_script(&self, shell: Shell) -> String {
    let mut lines = vec![
      shell.comment(&format!("shipyard environment for {}", self.platform)),
      shell.comment(&format!("dependencies {}", self.dependency_fingerprint.short())),
    ];
    lines.extend(self.env.iter().map(|(name, value)| shell.export_var(name, value)));
    lines.push(String::new());
    lines.join("\n")
  }

  /// A process for `program` with the environment applied on top of the
  /// inherited one.
  pub fn command(&self, program: impl AsRef<std::ffi::OsStr>) -> Command {
    let mut cmd = Command::new(program);
    cmd.envs(&self.env);
    cmd
  }

  pub fn has_tool(&self, name: &str) -> bool {
    self
      .tools
      .iter()
      .any(|t| t.file_stem().is_some_and(|stem| stem == name))
  }
}

/// Builds development environments from the same toolchain resolver and
/// store the build uses.
pub struct Provisioner {
  resolver: Arc<ToolchainResolver>,
  libraries: Arc<dyn LibraryResolver>,
}

impl Provisioner {
  pub fn new(resolver: Arc<ToolchainResolver>) -> Self {
    Self {
      resolver,
      libraries: Arc::new(SearchPathResolver::from_env()),
    }
  }

  pub fn with_library_resolver(mut self, libraries: Arc<dyn LibraryResolver>) -> Self {
    self.libraries = libraries;
    self
  }

  pub async fn provision(&self, project: &Project, host: Platform) -> Result<DevEnvironment, DevEnvError> {
    let spec = &project.manifest.toolchain;
    if !project.declares(&host) {
      return Err(
        ToolchainError::Unavailable {
          toolchain: format!("{} {}", spec.name, spec.version),
          platform: host,
        }
        .into(),
      );
    }

    let toolchain = self.resolver.resolve(spec, host).await?;
    let inherited_path: Vec<PathBuf> = std::env::var_os("PATH")
      .map(|p| std::env::split_paths(&p).collect())
      .unwrap_or_default();

    let mut tools = toolchain.executables();
    let search = std::env::join_paths(toolchain.bin_dirs.iter().chain(&inherited_path)).ok();
    for name in &project.manifest.shell.tools {
      let path = which::which_in(name, search.as_ref(), &project.root)
        .map_err(|_| DevEnvError::ToolNotFound { tool: name.clone() })?;
      debug!(tool = %name, path = %path.display(), "resolved shell tool");
      if !tools.contains(&path) {
        tools.push(path);
      }
    }

    // Unlike the build, the shell needs every library, optional or not.
    let (library_dirs, missing) = libs::library_dirs(self.libraries.as_ref(), &project.manifest.native_libraries, host);
    if let Some(name) = missing.into_iter().next() {
      return Err(DevEnvError::NativeLibraryMissing { name, platform: host });
    }

    let mut path_dirs: Vec<PathBuf> = toolchain.bin_dirs.clone();
    for dir in tools.iter().filter_map(|t| t.parent()) {
      push_unique(&mut path_dirs, dir);
    }

    let mut env = BTreeMap::new();
    let lib_var = host.os.library_path_var();
    if host.os == Os::Windows {
      // The loader searches PATH on Windows.
      for dir in &library_dirs {
        push_unique(&mut path_dirs, dir);
      }
    } else if !library_dirs.is_empty() {
      let inherited: Vec<PathBuf> = std::env::var_os(lib_var)
        .map(|p| std::env::split_paths(&p).collect())
        .unwrap_or_default();
      let dirs: Vec<PathBuf> = library_dirs.iter().chain(&inherited).cloned().collect();
      env.insert(lib_var.to_string(), join(host.os, &dirs));
    }
    path_dirs.extend(inherited_path);
    env.insert("PATH".to_string(), join(host.os, &path_dirs));

    env.insert("SHIPYARD_SHELL".to_string(), "1".to_string());
    env.insert("SHIPYARD_PLATFORM".to_string(), host.triple());
    env.insert("SHIPYARD_TOOLCHAIN".to_string(), toolchain.id.to_string());
    env.extend(toolchain.env.clone());
    env.extend(project.manifest.shell.env.clone());

    info!(
      platform = %host,
      toolchain = %toolchain.id,
      tools = tools.len(),
      libraries = library_dirs.len(),
      "development environment ready"
    );

    Ok(DevEnvironment {
      platform: host,
      toolchain: toolchain.id.clone(),
      toolchain_root: toolchain.root.clone(),
      tools,
      library_dirs,
      env,
      dependency_fingerprint: DependencyFingerprint::of(&project.dependencies),
    })
  }
}

fn push_unique(dirs: &mut Vec<PathBuf>, dir: &Path) {
  if !dirs.iter().any(|d| d == dir) {
    dirs.push(dir.to_path_buf());
  }
}

fn join(os: Os, dirs: &[PathBuf]) -> String {
  dirs
    .iter()
    .map(|d| d.to_string_lossy())
    .collect::<Vec<_>>()
    .join(&os.path_separator().to_string())
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;
  use crate::deps::DependencyCache;
  use crate::matrix::BuildContext;
  use crate::store::Store;
  use crate::util::testutil::{RecordingCompiler, manifest_json, write_project};
  use serial_test::serial;
  use std::os::unix::fs::PermissionsExt;
  use tempfile::TempDir;

  struct Fixture {
    temp: TempDir,
    root: PathBuf,
  }

  impl Fixture {
    fn new(edit: impl FnOnce(&mut serde_json::Value)) -> Self {
      let temp = TempDir::new().unwrap();
      let root = temp.path().join("project");
      let host = Platform::current().unwrap().triple();
      let mut manifest: serde_json::Value = serde_json::from_str(&manifest_json(&[host.as_str()])).unwrap();
      edit(&mut manifest);
      write_project(&root, &manifest.to_string(), &[("src/main.rs", "fn main() {}")]);
      Self { temp, root }
    }

    fn resolver(&self) -> Arc<ToolchainResolver> {
      Arc::new(ToolchainResolver::new(Store::open(self.temp.path().join("store")).unwrap()))
    }

    fn provisioner(&self) -> Provisioner {
      Provisioner::new(self.resolver()).with_library_resolver(Arc::new(SearchPathResolver::default().without_defaults()))
    }

    fn project(&self) -> Project {
      Project::load(&self.root).unwrap()
    }

    fn host_tools(&self) -> PathBuf {
      let dir = self.temp.path().join("host-bin");
      std::fs::create_dir_all(&dir).unwrap();
      let tool = dir.join("jq");
      std::fs::write(&tool, "#!/bin/sh\n").unwrap();
      std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
      dir
    }
  }

  fn host() -> Platform {
    Platform::current().unwrap()
  }

  #[tokio::test]
  #[serial]
  async fn toolchain_matches_the_build() {
    let fx = Fixture::new(|_| {});
    let project = fx.project();
    let resolver = fx.resolver();

    let env = Provisioner::new(resolver.clone())
      .with_library_resolver(Arc::new(SearchPathResolver::default().without_defaults()))
      .provision(&project, host())
      .await
      .unwrap();

    let ctx = BuildContext::new(host(), Arc::new(project.manifest.toolchain.clone()), resolver);
    assert_eq!(env.toolchain, ctx.toolchain_id().await.unwrap());
    assert!(env.has_tool("cc"));
    assert!(env.env["PATH"].starts_with(&*env.toolchain_root.join("bin").to_string_lossy()));
    assert_eq!(env.env["SHIPYARD_SHELL"], "1");

    let compiler = RecordingCompiler::new();
    let deps = DependencyCache::new()
      .get_or_build(&ctx, &project.dependencies, &compiler)
      .await
      .unwrap();
    assert_eq!(env.dependency_fingerprint, deps.key.fingerprint);
  }

  #[tokio::test]
  #[serial]
  async fn extra_tools_resolve_from_host_path() {
    let fx = Fixture::new(|m| m["shell"] = serde_json::json!({ "tools": ["jq"], "env": { "RUST_LOG": "debug" } }));
    let host_bin = fx.host_tools();

    let env = temp_env::async_with_vars([("PATH", Some(host_bin.as_os_str()))], fx.provisioner().provision(&fx.project(), host()))
      .await
      .unwrap();

    assert!(env.tools.contains(&host_bin.join("jq")));
    assert!(env.env["PATH"].contains(&*host_bin.to_string_lossy()));
    assert_eq!(env.env["RUST_LOG"], "debug");
  }

  #[tokio::test]
  #[serial]
  async fn missing_tool_is_an_error() {
    let fx = Fixture::new(|m| m["shell"] = serde_json::json!({ "tools": ["definitely-not-a-tool"] }));

    let err = fx.provisioner().provision(&fx.project(), host()).await.unwrap_err();

    assert!(matches!(err, DevEnvError::ToolNotFound { tool } if tool == "definitely-not-a-tool"));
  }

  #[tokio::test]
  #[serial]
  async fn missing_library_is_an_error_even_when_optional() {
    let fx = Fixture::new(|m| m["nativeLibraries"] = serde_json::json!([{ "name": "ssl", "searchPaths": ["libs"] }]));

    let err = fx.provisioner().provision(&fx.project(), host()).await.unwrap_err();

    assert!(matches!(err, DevEnvError::NativeLibraryMissing { ref name, .. } if name == "ssl"));
  }

  #[tokio::test]
  #[serial]
  async fn library_dirs_lead_the_loader_path() {
    let fx = Fixture::new(|m| m["nativeLibraries"] = serde_json::json!([{ "name": "ssl", "searchPaths": ["libs"] }]));
    let libs = fx.root.join("libs");
    std::fs::create_dir_all(&libs).unwrap();
    let file = host().os.library_file_names("ssl").remove(0);
    std::fs::write(libs.join(file), "").unwrap();

    let env = fx.provisioner().provision(&fx.project(), host()).await.unwrap();

    let var = host().os.library_path_var();
    assert!(env.env[var].starts_with(&*libs.to_string_lossy()));
    assert_eq!(env.library_dirs, vec![libs]);
  }

  #[tokio::test]
  #[serial]
  async fn libraries_sharing_a_dir_list_it_once() {
    let fx = Fixture::new(|m| {
      m["nativeLibraries"] = serde_json::json!([
        { "name": "ssl", "searchPaths": ["libs"] },
        { "name": "crypto", "searchPaths": ["libs"], "required": true },
        { "name": "z", "searchPaths": ["libs"] }
      ])
    });
    let libs = fx.root.join("libs");
    std::fs::create_dir_all(&libs).unwrap();
    for name in ["ssl", "crypto"] {
      std::fs::write(libs.join(host().os.library_file_names(name).remove(0)), "").unwrap();
    }

    let err = fx.provisioner().provision(&fx.project(), host()).await.unwrap_err();
    assert!(matches!(err, DevEnvError::NativeLibraryMissing { ref name, .. } if name == "z"));

    std::fs::write(libs.join(host().os.library_file_names("z").remove(0)), "").unwrap();
    let env = fx.provisioner().provision(&fx.project(), host()).await.unwrap();
    assert_eq!(env.library_dirs, vec![libs]);
  }

  #[tokio::test]
  #[serial]
  async fn activation_script_exports_everything() {
    let fx = Fixture::new(|m| m["shell"] = serde_json::json!({ "env": { "GREETING": "hi there" } }));
    let env = fx.provisioner().provision(&fx.project(), host()).await.unwrap();

    let script = env.activation_script(Shell::Bash);
    assert!(script.contains("export GREETING='hi there'"));
    assert!(script.contains("export SHIPYARD_SHELL='1'"));

    let fish = env.activation_script(Shell::Fish);
    assert!(fish.contains("set -gx PATH "));
  }

  #[tokio::test]
  #[serial]
  async fn command_runs_inside_the_environment() {
    let fx = Fixture::new(|m| m["shell"] = serde_json::json!({ "env": { "GREETING": "hello" } }));
    let env = fx.provisioner().provision(&fx.project(), host()).await.unwrap();

    let output = env.command("/bin/sh").args(["-c", "echo $GREETING"]).output().unwrap();
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "hello");
  }
}

//! Shared test helpers for CLI integration tests.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

use shipyard_lib::platform::{Arch, Os, Platform};

pub fn host() -> Platform {
  Platform::current().expect("tests run on a supported platform")
}

/// A declared platform other than the host, built with the same commands.
pub fn other() -> Platform {
  let arch = match host().arch {
    Arch::X86_64 => Arch::Aarch64,
    Arch::Aarch64 => Arch::X86_64,
  };
  Platform::new(arch, Os::Linux)
}

/// Compile commands use shell builtins only: the compile PATH holds nothing
/// but the toolchain.
pub const DEPS_COMMAND: &str = r#"while read -r line; do echo "$line"; done < dependencies.json > "$out/dependencies.json""#;
pub const PACKAGE_COMMAND: &str = r#"greet > "$out/greeting.txt" && echo "$SHIPYARD_PLATFORM" > "$out/platform.txt""#;

/// Isolated project and store.
pub struct TestEnv {
  pub temp: TempDir,
}

impl TestEnv {
  /// A project building for the host and one other platform.
  pub fn new() -> Self {
    Self::with_manifest(|_| {})
  }

  pub fn with_manifest(edit: impl FnOnce(&mut serde_json::Value)) -> Self {
    let env = Self {
      temp: TempDir::new().unwrap(),
    };

    let platforms = [host().triple(), other().triple()];
    let sources: serde_json::Map<String, serde_json::Value> = platforms
      .iter()
      .map(|p| (p.clone(), serde_json::json!({ "type": "path", "path": "toolchain" })))
      .collect();

    let mut manifest = serde_json::json!({
      "name": "hello",
      "version": "1.0.0",
      "platforms": platforms,
      "toolchain": {
        "name": "hellochain",
        "version": "0.1.0",
        "sources": sources,
        "commands": { "dependencies": DEPS_COMMAND, "package": PACKAGE_COMMAND }
      },
      "dependencies": [
        { "name": "anyhow", "version": "1.0.98", "integrity": "sha256-111" },
        { "name": "serde", "version": "1.0.219", "integrity": "sha256-222" }
      ]
    });
    edit(&mut manifest);

    env.write_file("shipyard.json", &serde_json::to_string_pretty(&manifest).unwrap());
    env.write_file("src/main.rs", "fn main() { println!(\"hello\"); }\n");
    env.write_executable("toolchain/bin/greet", "#!/bin/sh\necho hello from the toolchain\n");
    env
  }

  pub fn project_path(&self) -> PathBuf {
    self.temp.path().join("project")
  }

  /// Store path (isolated per test).
  pub fn store_path(&self) -> PathBuf {
    let p = self.temp.path().join("store");
    std::fs::create_dir_all(&p).unwrap();
    dunce::canonicalize(&p).unwrap_or(p)
  }

  /// Write a file relative to the project directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.project_path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  pub fn write_executable(&self, relative_path: &str, content: &str) {
    self.write_file(relative_path, content);
    #[cfg(unix)]
    {
      use std::os::unix::fs::PermissionsExt;
      let path = self.project_path().join(relative_path);
      std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }
  }

  pub fn edit_manifest(&self, edit: impl FnOnce(&mut serde_json::Value)) {
    let path = self.project_path().join("shipyard.json");
    let mut manifest: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    edit(&mut manifest);
    std::fs::write(path, serde_json::to_string_pretty(&manifest).unwrap()).unwrap();
  }

  /// Names of the committed entries of one store kind.
  pub fn entries(&self, kind_dir: &str) -> Vec<String> {
    let dir = self.store_path().join(kind_dir);
    let mut names: Vec<String> = std::fs::read_dir(&dir)
      .map(|rd| {
        rd.flatten()
          .filter(|e| e.path().join(".shipyard-complete").exists())
          .map(|e| e.file_name().to_string_lossy().into_owned())
          .collect()
      })
      .unwrap_or_default();
    names.sort();
    names
  }

  /// Get a pre-configured Command for the yard binary.
  ///
  /// Runs inside the project with an isolated store and no inherited
  /// library search path or log filter.
  pub fn yard_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("yard");
    cmd.current_dir(self.project_path());
    cmd.env("SHIPYARD_STORE", self.store_path());
    cmd.env_remove("SHIPYARD_LIBRARY_PATH");
    cmd.env_remove("RUST_LOG");
    cmd
  }

  pub fn build_json(&self, extra: &[&str]) -> (bool, serde_json::Value) {
    let output = self.yard_cmd().args(["build", "-o", "json"]).args(extra).output().unwrap();
    let json = serde_json::from_slice(&output.stdout).unwrap();
    (output.status.success(), json)
  }
}

pub fn read(path: &Path) -> String {
  std::fs::read_to_string(path).unwrap()
}

//! Test utilities for shipyard-lib.
//!
//! Project fixtures on disk and a compiler that records what it was asked to do.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use crate::compile::{CompileError, CompileKind, CompileRequest, Compiler};
use crate::consts::MANIFEST_FILENAME;
use crate::platform::Platform;

/// A manifest for project "demo" with a path toolchain under `toolchain/`
/// for each of `platforms` and one locked dependency.
pub fn manifest_json(platforms: &[&str]) -> String {
  let sources: serde_json::Map<String, serde_json::Value> = platforms
    .iter()
    .map(|p| (p.to_string(), serde_json::json!({ "type": "path", "path": "toolchain" })))
    .collect();

  serde_json::json!({
    "name": "demo",
    "version": "0.1.0",
    "platforms": platforms,
    "toolchain": {
      "name": "testchain",
      "version": "1.0.0",
      "sources": sources,
      "commands": {
        "dependencies": "echo deps > \"$out/deps.txt\"",
        "package": "echo pkg > \"$out/pkg.txt\""
      }
    },
    "dependencies": [
      { "name": "serde", "version": "1.0.0", "integrity": "sha256-aaa" }
    ]
  })
  .to_string()
}

/// Write `shipyard.json`, a toolchain with one executable, and `files`.
pub fn write_project(root: &Path, manifest: &str, files: &[(&str, &str)]) {
  std::fs::create_dir_all(root).unwrap();
  std::fs::write(root.join(MANIFEST_FILENAME), manifest).unwrap();

  let bin = root.join("toolchain/bin");
  std::fs::create_dir_all(&bin).unwrap();
  std::fs::write(bin.join("cc"), "#!/bin/sh\n").unwrap();
  #[cfg(unix)]
  {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(bin.join("cc"), std::fs::Permissions::from_mode(0o755)).unwrap();
  }

  for (rel, content) in files {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
  }
}

/// A compiler that records invocations, writes a small artifact, and fails
/// where told to.
#[derive(Debug, Default)]
pub struct RecordingCompiler {
  calls: Mutex<Vec<(CompileKind, Platform)>>,
  failures: Mutex<Vec<(CompileKind, Option<Platform>)>>,
  delay: Option<Duration>,
}

impl RecordingCompiler {
  pub fn new() -> Self {
    Self::default()
  }

  /// Sleep inside every compile, to widen race windows.
  pub fn with_delay(delay: Duration) -> Self {
    Self {
      delay: Some(delay),
      ..Self::default()
    }
  }

  /// Fail compiles of `kind`, on `platform` or on every platform.
  pub fn fail_on(&self, kind: CompileKind, platform: Option<Platform>) {
    self.failures.lock().unwrap().push((kind, platform));
  }

  pub fn clear_failures(&self) {
    self.failures.lock().unwrap().clear();
  }

  pub fn count(&self, kind: CompileKind) -> usize {
    self.calls.lock().unwrap().iter().filter(|(k, _)| *k == kind).count()
  }

  pub fn count_for(&self, kind: CompileKind, platform: Platform) -> usize {
    self
      .calls
      .lock()
      .unwrap()
      .iter()
      .filter(|(k, p)| *k == kind && *p == platform)
      .count()
  }

  fn should_fail(&self, kind: CompileKind, platform: Platform) -> bool {
    self
      .failures
      .lock()
      .unwrap()
      .iter()
      .any(|(k, p)| *k == kind && p.is_none_or(|p| p == platform))
  }
}

impl Compiler for RecordingCompiler {
  async fn compile(&self, request: CompileRequest<'_>) -> Result<(), CompileError> {
    self.calls.lock().unwrap().push((request.kind, request.platform));

    if let Some(delay) = self.delay {
      tokio::time::sleep(delay).await;
    }

    if self.should_fail(request.kind, request.platform) {
      return Err(CompileError::Failed {
        diagnostic: format!("injected {} failure on {}", request.kind, request.platform),
      });
    }

    let mut listing: Vec<String> = walkdir::WalkDir::new(request.src_dir)
      .into_iter()
      .flatten()
      .filter(|e| e.file_type().is_file())
      .map(|e| e.path().strip_prefix(request.src_dir).unwrap().to_string_lossy().replace('\\', "/"))
      .collect();
    listing.sort();

    let artifact = format!("{}\n{}\n{}\n", request.kind, request.platform, listing.join("\n"));
    tokio::fs::write(request.out_dir.join(format!("{}.out", request.kind)), artifact).await?;
    Ok(())
  }
}

//! Project manifest loading and validation.
//!
//! A [`Project`] is a validated manifest anchored at its root directory, with
//! relative paths resolved and the locked dependency list assembled from
//! explicit entries and an optional `Cargo.lock` import.

mod cargo_lock;
mod types;

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::consts::MANIFEST_FILENAME;
use crate::platform::Platform;

pub use cargo_lock::{parse_cargo_lock, read_cargo_lock};
pub use types::*;

#[derive(Debug, Error)]
pub enum ManifestError {
  #[error("no {MANIFEST_FILENAME} found in {0}")]
  NotFound(PathBuf),

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("unsupported manifest format version {0}, expected {MANIFEST_FORMAT_VERSION}")]
  UnsupportedVersion(u32),

  #[error("invalid manifest: {0}")]
  Invalid(String),

  #[error("failed to import dependencies from {path}: {message}")]
  CargoLock { path: PathBuf, message: String },
}

/// A loaded project: root directory, manifest, and its locked dependencies.
#[derive(Debug, Clone)]
pub struct Project {
  pub root: PathBuf,
  pub manifest: ProjectManifest,
  /// Imported and explicit dependencies, sorted by (name, version).
  pub dependencies: Vec<Dependency>,
}

impl Project {
  /// Load `shipyard.json` from `dir`.
  pub fn load(dir: &Path) -> Result<Self, ManifestError> {
    let root = dunce::canonicalize(dir).map_err(|_| ManifestError::NotFound(dir.to_path_buf()))?;
    let path = root.join(MANIFEST_FILENAME);
    if !path.is_file() {
      return Err(ManifestError::NotFound(root));
    }

    let content = std::fs::read_to_string(&path).map_err(|e| ManifestError::Read {
      path: path.clone(),
      source: e,
    })?;
    let manifest: ProjectManifest =
      serde_json::from_str(&content).map_err(|e| ManifestError::Parse { path: path.clone(), source: e })?;

    debug!(path = %path.display(), name = %manifest.name, "loaded manifest");
    Self::from_manifest(root, manifest)
  }

  /// Build a project from an already-parsed manifest.
  ///
  /// Relative toolchain and library paths are resolved against `root`.
  pub fn from_manifest(root: PathBuf, mut manifest: ProjectManifest) -> Result<Self, ManifestError> {
    validate(&manifest)?;

    for source in manifest.toolchain.sources.values_mut() {
      if let ToolchainSource::Path { path } = source
        && path.is_relative()
      {
        *path = root.join(&*path);
      }
    }
    for lib in &mut manifest.native_libraries {
      for dir in &mut lib.search_paths {
        if dir.is_relative() {
          *dir = root.join(&*dir);
        }
      }
    }

    let mut dependencies = match &manifest.dependencies_from {
      Some(lock) => read_cargo_lock(&root.join(lock))?,
      None => Vec::new(),
    };
    dependencies.extend(manifest.dependencies.iter().cloned());
    dependencies.sort();

    let mut seen = BTreeSet::new();
    for dep in &dependencies {
      if !seen.insert((dep.name.as_str(), dep.version.as_str())) {
        return Err(ManifestError::Invalid(format!(
          "dependency {} {} is declared more than once",
          dep.name, dep.version
        )));
      }
    }

    Ok(Self {
      root,
      manifest,
      dependencies,
    })
  }

  pub fn name(&self) -> &str {
    &self.manifest.name
  }

  pub fn platforms(&self) -> &[Platform] {
    &self.manifest.platforms
  }

  pub fn declares(&self, platform: &Platform) -> bool {
    self.manifest.platforms.contains(platform)
  }
}

fn validate(manifest: &ProjectManifest) -> Result<(), ManifestError> {
  if manifest.format_version != MANIFEST_FORMAT_VERSION {
    return Err(ManifestError::UnsupportedVersion(manifest.format_version));
  }
  if manifest.name.trim().is_empty() {
    return Err(ManifestError::Invalid("project name is empty".to_string()));
  }
  if manifest.platforms.is_empty() {
    return Err(ManifestError::Invalid("no platforms declared".to_string()));
  }

  let mut platforms = BTreeSet::new();
  for platform in &manifest.platforms {
    if !platforms.insert(platform) {
      return Err(ManifestError::Invalid(format!("platform {} is declared more than once", platform)));
    }
  }

  if manifest.toolchain.bin_dirs.is_empty() {
    return Err(ManifestError::Invalid("toolchain declares no bin directories".to_string()));
  }

  for dep in &manifest.dependencies {
    if dep.name.trim().is_empty() || dep.version.trim().is_empty() {
      return Err(ManifestError::Invalid("dependency with empty name or version".to_string()));
    }
    if dep.integrity.trim().is_empty() {
      return Err(ManifestError::Invalid(format!("dependency {} has no integrity value", dep.name)));
    }
  }

  for lib in &manifest.native_libraries {
    if lib.name.trim().is_empty() {
      return Err(ManifestError::Invalid("native library with empty name".to_string()));
    }
  }

  Ok(())
}

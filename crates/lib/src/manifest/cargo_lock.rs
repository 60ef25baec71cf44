//! Dependency import from `Cargo.lock`.
//!
//! Registry packages carry a `checksum`, which becomes the integrity value.
//! Git packages are pinned by the commit in their `source` fragment.
//! Packages without a `source` are workspace members, i.e. project source,
//! and are never treated as dependencies.

use std::path::Path;

use serde::Deserialize;

use super::{Dependency, ManifestError};

#[derive(Debug, Deserialize)]
struct CargoLock {
  #[serde(default)]
  package: Vec<LockedPackage>,
}

#[derive(Debug, Deserialize)]
struct LockedPackage {
  name: String,
  version: String,
  source: Option<String>,
  checksum: Option<String>,
}

pub fn read_cargo_lock(path: &Path) -> Result<Vec<Dependency>, ManifestError> {
  let content = std::fs::read_to_string(path).map_err(|e| ManifestError::Read {
    path: path.to_path_buf(),
    source: e,
  })?;
  parse_cargo_lock(&content).map_err(|message| ManifestError::CargoLock {
    path: path.to_path_buf(),
    message,
  })
}

pub fn parse_cargo_lock(content: &str) -> Result<Vec<Dependency>, String> {
  let lock: CargoLock = toml::from_str(content).map_err(|e| e.to_string())?;

  let mut deps = Vec::new();
  for package in lock.package {
    let Some(source) = package.source else {
      continue;
    };

    let integrity = if let Some(checksum) = package.checksum {
      format!("sha256-{}", checksum)
    } else if let Some(rev) = source.strip_prefix("git+").and_then(|s| s.rsplit_once('#')).map(|(_, rev)| rev) {
      format!("git-{}", rev)
    } else {
      return Err(format!(
        "package {} {} from {} has no checksum or pinned revision",
        package.name, package.version, source
      ));
    };

    deps.push(Dependency {
      name: package.name,
      version: package.version,
      integrity,
    });
  }

  deps.sort();
  Ok(deps)
}

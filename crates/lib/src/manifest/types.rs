//! Project manifest types.
//!
//! The manifest (`shipyard.json`) is the single declaration both the build
//! matrix and the development shell are derived from.
//!
//! ```json
//! {
//!   "name": "gai",
//!   "version": "0.3.1",
//!   "platforms": ["x86_64-linux", "aarch64-darwin"],
//!   "toolchain": {
//!     "name": "rust",
//!     "version": "1.86.0",
//!     "sources": {
//!       "x86_64-linux": { "type": "url", "url": "https://...", "sha256": "..." },
//!       "aarch64-darwin": { "type": "path", "path": "toolchains/darwin" }
//!     },
//!     "commands": {
//!       "dependencies": "cargo build --release --offline",
//!       "package": "cargo build --release --offline"
//!     }
//!   },
//!   "dependenciesFrom": "Cargo.lock",
//!   "nativeLibraries": [{ "name": "ssl" }],
//!   "shell": { "tools": ["rust-analyzer"] }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::platform::Platform;

/// Current manifest format version.
pub const MANIFEST_FORMAT_VERSION: u32 = 1;

fn default_format_version() -> u32 {
  MANIFEST_FORMAT_VERSION
}

fn default_bin_dirs() -> Vec<String> {
  vec!["bin".to_string()]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectManifest {
  #[serde(default = "default_format_version")]
  pub format_version: u32,

  pub name: String,

  pub version: String,

  /// The declared build matrix.
  pub platforms: Vec<Platform>,

  pub toolchain: ToolchainSpec,

  #[serde(default)]
  pub dependencies: Vec<Dependency>,

  /// A `Cargo.lock` whose registry and git packages are imported as dependencies.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub dependencies_from: Option<PathBuf>,

  #[serde(default)]
  pub native_libraries: Vec<NativeLibrary>,

  #[serde(default)]
  pub source: SourceSpec,

  #[serde(default)]
  pub shell: ShellSpec,
}

/// One locked external dependency.
///
/// Field order matters: the derived `Ord` sorts by name, then version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Dependency {
  pub name: String,
  pub version: String,
  /// Integrity value pinning the exact dependency content (e.g. `sha256-...`).
  pub integrity: String,
}

impl Dependency {
  pub fn new(name: &str, version: &str, integrity: &str) -> Self {
    Self {
      name: name.to_string(),
      version: version.to_string(),
      integrity: integrity.to_string(),
    }
  }
}

/// A pinned toolchain description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolchainSpec {
  pub name: String,

  pub version: String,

  /// Where to obtain the toolchain for each supported platform.
  pub sources: BTreeMap<Platform, ToolchainSource>,

  /// Directories, relative to the toolchain root, holding executables.
  #[serde(default = "default_bin_dirs")]
  pub bin_dirs: Vec<String>,

  /// Extra variables exported to compiles and shells.
  #[serde(default)]
  pub env: BTreeMap<String, String>,

  #[serde(default)]
  pub commands: BuildCommands,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolchainSource {
  /// A directory on disk. Relative paths are resolved against the project root.
  Path { path: PathBuf },
  /// A file or `.tar`/`.tar.gz`/`.tgz` archive pinned by its SHA-256.
  Url { url: String, sha256: String },
}

/// Shell commands run by the command-backed compiler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildCommands {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub dependencies: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub package: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeLibrary {
  pub name: String,
  /// Directories searched before the platform defaults.
  #[serde(default)]
  pub search_paths: Vec<PathBuf>,
  /// Fail a platform's build when the library cannot be found for it.
  /// Otherwise the build proceeds and only the shell insists on it.
  #[serde(default)]
  pub required: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
  /// Project ignore rules, in addition to `.shipyardignore`.
  #[serde(default)]
  pub ignore: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellSpec {
  /// Extra tools exposed in the development shell.
  #[serde(default)]
  pub tools: Vec<String>,
  #[serde(default)]
  pub env: BTreeMap<String, String>,
}

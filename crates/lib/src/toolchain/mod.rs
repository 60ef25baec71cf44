//! Toolchain resolution.
//!
//! A toolchain is resolved from the manifest's pinned description alone: the
//! host's installed compilers are never consulted. Each (spec, platform) pair
//! hashes to a [`Toolchain::id`] and is materialized once into
//! `<store>/toolchains/<id>/`.

pub mod fetch;

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::manifest::{BuildCommands, ToolchainSource, ToolchainSpec};
use crate::platform::Platform;
use crate::store::lock::{EntryLock, StoreLockError};
use crate::store::{EntryKind, KeyedLocks, Store, StoreError};
use crate::util::hash::{DirHashError, HashError, Hashable, ObjectHash, hash_directory};

#[derive(Debug, Error)]
pub enum ToolchainError {
  #[error("toolchain {toolchain} is not available for {platform}")]
  Unavailable { toolchain: String, platform: Platform },

  #[error("toolchain source directory not found: {path}")]
  MissingSource { path: PathBuf },

  #[error("failed to fetch {url}: {message}")]
  Fetch { url: String, message: String },

  #[error("hash mismatch for {url}: expected {expected}, got {actual}")]
  HashMismatch {
    url: String,
    expected: String,
    actual: String,
  },

  #[error("failed to unpack toolchain: {message}")]
  Unpack { message: String },

  #[error("failed to hash toolchain source: {0}")]
  Hash(#[from] DirHashError),

  #[error("failed to compute toolchain id: {0}")]
  Key(#[from] HashError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("failed to lock toolchain entry: {0}")]
  Lock(#[from] StoreLockError),

  #[error("io error: {0}")]
  Io(#[from] io::Error),
}

/// How the source of a toolchain is identified in its id.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum SourceIdentity {
  Path { content: String },
  Url { sha256: String },
}

#[derive(Debug, Clone, Serialize)]
struct ToolchainKey {
  name: String,
  version: String,
  platform: Platform,
  bin_dirs: Vec<String>,
  env: BTreeMap<String, String>,
  commands: BuildCommands,
  source: SourceIdentity,
}

impl Hashable for ToolchainKey {}

/// A toolchain's id along with the key it hashes. Computing one reads the
/// whole source directory of a path toolchain, so callers keep it around.
#[derive(Debug, Clone)]
pub struct ToolchainIdentity {
  pub id: ObjectHash,
  key: ToolchainKey,
}

/// A materialized toolchain for one platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
  pub id: ObjectHash,
  pub name: String,
  pub version: String,
  pub platform: Platform,
  /// The store directory holding the toolchain.
  pub root: PathBuf,
  /// Absolute bin directories, in declaration order.
  pub bin_dirs: Vec<PathBuf>,
  pub env: BTreeMap<String, String>,
}

impl Toolchain {
  /// The bin directories joined as a `PATH` value.
  pub fn path_value(&self) -> Result<OsString, std::env::JoinPathsError> {
    std::env::join_paths(&self.bin_dirs)
  }

  /// Executables found directly in the bin directories, sorted by name.
  pub fn executables(&self) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = self
      .bin_dirs
      .iter()
      .filter_map(|dir| fs::read_dir(dir).ok())
      .flat_map(|entries| entries.flatten())
      .map(|entry| entry.path())
      .filter(|path| path.is_file() && is_tool(path))
      .collect();
    found.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    found
  }
}

#[cfg(unix)]
fn is_tool(path: &Path) -> bool {
  crate::util::hash::is_executable(path)
}

#[cfg(not(unix))]
fn is_tool(path: &Path) -> bool {
  matches!(
    path.extension().and_then(|e| e.to_str()),
    Some("exe" | "cmd" | "bat" | "ps1")
  )
}

/// Resolves toolchain specs into materialized toolchains, once per id.
#[derive(Debug)]
pub struct ToolchainResolver {
  store: Store,
  locks: KeyedLocks<Arc<Toolchain>>,
}

impl ToolchainResolver {
  pub fn new(store: Store) -> Self {
    Self {
      store,
      locks: KeyedLocks::new(),
    }
  }

  pub fn store(&self) -> &Store {
    &self.store
  }

  /// Hash `spec` for `platform` without materializing anything.
  pub fn identify(spec: &ToolchainSpec, platform: Platform) -> Result<ToolchainIdentity, ToolchainError> {
    let key = key_for(spec, platform, source_for(spec, platform)?)?;
    Ok(ToolchainIdentity {
      id: key.compute_hash()?,
      key,
    })
  }

  /// [`ToolchainResolver::identify`] on the blocking pool.
  pub async fn identify_async(spec: Arc<ToolchainSpec>, platform: Platform) -> Result<ToolchainIdentity, ToolchainError> {
    tokio::task::spawn_blocking(move || Self::identify(&spec, platform))
      .await
      .map_err(io::Error::other)?
  }

  /// The id `spec` resolves to on `platform`, without materializing it.
  pub fn toolchain_id(spec: &ToolchainSpec, platform: Platform) -> Result<ObjectHash, ToolchainError> {
    Ok(Self::identify(spec, platform)?.id)
  }

  pub async fn resolve(&self, spec: &ToolchainSpec, platform: Platform) -> Result<Arc<Toolchain>, ToolchainError> {
    let identity = Self::identify_async(Arc::new(spec.clone()), platform).await?;
    self.resolve_identified(spec, platform, &identity).await
  }

  /// Resolve with an identity computed earlier for the same spec and platform.
  pub async fn resolve_identified(
    &self,
    spec: &ToolchainSpec,
    platform: Platform,
    identity: &ToolchainIdentity,
  ) -> Result<Arc<Toolchain>, ToolchainError> {
    let source = source_for(spec, platform)?;
    let id = &identity.id;

    let slot = self.locks.slot(id);
    let mut guard = slot.lock().await;
    if let Some(toolchain) = guard.as_ref() {
      return Ok(toolchain.clone());
    }

    // Other processes, shells included, may be materializing the same entry.
    let _entry = EntryLock::acquire_async(&self.store, EntryKind::Toolchain, id).await?;
    let root = match self.store.get_valid(EntryKind::Toolchain, id)? {
      Some(path) => {
        debug!(toolchain = %spec.name, platform = %platform, id = %id, "toolchain already materialized");
        path
      }
      None => {
        info!(toolchain = %spec.name, version = %spec.version, platform = %platform, id = %id, "materializing toolchain");
        let path = self.store.prepare_entry(EntryKind::Toolchain, id)?;
        if let Err(e) = self.materialize(source, &path).await {
          self.store.discard_entry(&path);
          return Err(e);
        }
        self.store.commit_entry(&path, &identity.key)?;
        path
      }
    };

    let toolchain = Arc::new(Toolchain {
      id: id.clone(),
      name: spec.name.clone(),
      version: spec.version.clone(),
      platform,
      bin_dirs: spec.bin_dirs.iter().map(|dir| root.join(dir)).collect(),
      root,
      env: spec.env.clone(),
    });
    *guard = Some(toolchain.clone());
    Ok(toolchain)
  }

  async fn materialize(&self, source: &ToolchainSource, dest: &Path) -> Result<(), ToolchainError> {
    match source {
      ToolchainSource::Path { path } => {
        let (src, dest) = (path.clone(), dest.to_path_buf());
        tokio::task::spawn_blocking(move || copy_tree(&src, &dest))
          .await
          .map_err(io::Error::other)?
      }
      ToolchainSource::Url { url, sha256 } => {
        let staging = self.store.staging_dir("fetch-")?;
        let file = fetch::fetch_verified(url, sha256, staging.path()).await?;

        if fetch::is_archive(&file) {
          let dest = dest.to_path_buf();
          tokio::task::spawn_blocking(move || fetch::unpack_archive(&file, &dest))
            .await
            .map_err(io::Error::other)?
        } else {
          install_binary(&file, &dest.join("bin"))
        }
      }
    }
  }
}

fn source_for(spec: &ToolchainSpec, platform: Platform) -> Result<&ToolchainSource, ToolchainError> {
  spec.sources.get(&platform).ok_or_else(|| ToolchainError::Unavailable {
    toolchain: format!("{} {}", spec.name, spec.version),
    platform,
  })
}

fn key_for(spec: &ToolchainSpec, platform: Platform, source: &ToolchainSource) -> Result<ToolchainKey, ToolchainError> {
  let source = match source {
    ToolchainSource::Path { path } => {
      if !path.is_dir() {
        return Err(ToolchainError::MissingSource { path: path.clone() });
      }
      SourceIdentity::Path {
        content: hash_directory(path, &[])?.0,
      }
    }
    ToolchainSource::Url { sha256, .. } => SourceIdentity::Url {
      sha256: sha256.to_ascii_lowercase(),
    },
  };

  Ok(ToolchainKey {
    name: spec.name.clone(),
    version: spec.version.clone(),
    platform,
    bin_dirs: spec.bin_dirs.clone(),
    env: spec.env.clone(),
    commands: spec.commands.clone(),
    source,
  })
}

/// Copy a directory tree, keeping permissions and symlinks.
fn copy_tree(src: &Path, dest: &Path) -> Result<(), ToolchainError> {
  for entry in WalkDir::new(src).sort_by_file_name() {
    let entry = entry.map_err(|e| ToolchainError::Io(io::Error::other(e)))?;
    let rel = entry.path().strip_prefix(src).unwrap_or(entry.path());
    let target = dest.join(rel);
    let file_type = entry.file_type();

    if file_type.is_dir() {
      fs::create_dir_all(&target)?;
    } else if file_type.is_symlink() {
      copy_symlink(entry.path(), &target)?;
    } else {
      // fs::copy carries the permission bits over.
      fs::copy(entry.path(), &target)?;
    }
  }
  Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dest: &Path) -> io::Result<()> {
  let link = fs::read_link(src)?;
  std::os::unix::fs::symlink(link, dest)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dest: &Path) -> io::Result<()> {
  fs::copy(src, dest).map(|_| ())
}

fn install_binary(file: &Path, bin: &Path) -> Result<(), ToolchainError> {
  fs::create_dir_all(bin)?;
  let name = file.file_name().ok_or_else(|| ToolchainError::Unpack {
    message: format!("downloaded file has no name: {}", file.display()),
  })?;
  let target = bin.join(name);
  fs::copy(file, &target)?;

  #[cfg(unix)]
  {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(&target, fs::Permissions::from_mode(0o755))?;
  }
  Ok(())
}

//! Package builds.
//!
//! Compiles the filtered project source against an already-built dependency
//! artifact set. The dependency set is an opaque input here: only its entry
//! hash enters the package key.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::compile::{CompileKind, CompileRequest, Compiler};
use crate::deps::DependencyArtifactSet;
use crate::manifest::Project;
use crate::matrix::BuildContext;
use crate::platform::Platform;
use crate::source::{FilteredSourceTree, SourceError};
use crate::store::lock::{EntryLock, StoreLockError};
use crate::store::{EntryKind, KeyedLocks, StoreError};
use crate::toolchain::ToolchainError;
use crate::util::hash::{ContentHash, HashError, Hashable, ObjectHash};

#[derive(Debug, Error)]
pub enum PackageError {
  #[error("package for {platform} failed to build: {diagnostic}")]
  BuildFailed { platform: Platform, diagnostic: String },

  #[error(transparent)]
  Toolchain(#[from] ToolchainError),

  #[error("failed to stage source: {0}")]
  Stage(#[from] SourceError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("failed to lock package entry: {0}")]
  Lock(#[from] StoreLockError),

  #[error("failed to compute package key: {0}")]
  Key(#[from] HashError),
}

impl PackageError {
  pub fn diagnostic(&self) -> String {
    match self {
      PackageError::BuildFailed { diagnostic, .. } => diagnostic.clone(),
      other => other.to_string(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageKey {
  pub name: String,
  pub version: String,
  pub platform: Platform,
  pub toolchain_id: ObjectHash,
  /// Entry hash of the dependency artifact set.
  pub dependencies: ObjectHash,
  pub source: ContentHash,
}

impl Hashable for PackageKey {}

/// A built package in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Package {
  pub platform: Platform,
  pub key_hash: ObjectHash,
  pub path: PathBuf,
  pub cache_hit: bool,
  pub toolchain_id: ObjectHash,
  pub dependencies: ObjectHash,
}

/// Builds packages, at most once per key at a time.
#[derive(Debug, Default)]
pub struct PackageBuilder {
  locks: KeyedLocks<Package>,
}

impl PackageBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  pub async fn build<C: Compiler>(
    &self,
    ctx: &BuildContext,
    project: &Project,
    tree: &FilteredSourceTree,
    deps: &DependencyArtifactSet,
    library_dirs: &[PathBuf],
    compiler: &C,
  ) -> Result<Package, PackageError> {
    let toolchain_id = ctx.toolchain_id().await?;
    let key = PackageKey {
      name: project.manifest.name.clone(),
      version: project.manifest.version.clone(),
      platform: ctx.platform,
      toolchain_id: toolchain_id.clone(),
      dependencies: deps.key_hash.clone(),
      source: tree.hash(),
    };
    let key_hash = key.compute_hash()?;

    let slot = self.locks.slot(&key_hash);
    let mut guard = slot.lock().await;
    if let Some(package) = guard.as_ref() {
      return Ok(package.clone());
    }

    let package = |path: PathBuf, cache_hit: bool| Package {
      platform: ctx.platform,
      key_hash: key_hash.clone(),
      path,
      cache_hit,
      toolchain_id: toolchain_id.clone(),
      dependencies: deps.key_hash.clone(),
    };

    let _entry = EntryLock::acquire_async(&ctx.store, EntryKind::Package, &key_hash).await?;
    if let Some(path) = ctx.store.get_valid(EntryKind::Package, &key_hash)? {
      info!(platform = %ctx.platform, key = %key_hash, "package up to date");
      let built = package(path, true);
      *guard = Some(built.clone());
      return Ok(built);
    }

    info!(
      platform = %ctx.platform,
      key = %key_hash,
      files = tree.len(),
      source = %key.source.short(),
      "building package"
    );
    let toolchain = ctx.resolve_toolchain().await?;

    let staging = ctx.store.staging_dir("src-")?;
    let src_dir = staging.path().join("src");
    tree.stage(&src_dir)?;

    let out = ctx.store.prepare_entry(EntryKind::Package, &key_hash)?;
    let request = CompileRequest {
      kind: CompileKind::Package,
      platform: ctx.platform,
      toolchain: &toolchain,
      src_dir: &src_dir,
      out_dir: &out,
      deps_dir: Some(&deps.path),
      library_dirs,
    };

    if let Err(e) = compiler.compile(request).await {
      let diagnostic = e.diagnostic();
      warn!(platform = %ctx.platform, key = %key_hash, error = %diagnostic, "package build failed");
      ctx.store.discard_entry(&out);
      return Err(PackageError::BuildFailed {
        platform: ctx.platform,
        diagnostic,
      });
    }

    ctx.store.commit_entry(&out, &key)?;
    debug!(path = %out.display(), "package entry committed");

    let built = package(out, false);
    *guard = Some(built.clone());
    Ok(built)
  }
}

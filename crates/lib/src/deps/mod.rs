//! Dependency cache.
//!
//! Compiles the locked dependency set on its own, keyed only by what can
//! change its output: the platform, the toolchain, and the dependency
//! fingerprint. Project source never enters the key, so editing the project
//! reuses the cached artifacts.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::compile::{CompileKind, CompileRequest, Compiler};
use crate::manifest::Dependency;
use crate::matrix::BuildContext;
use crate::platform::Platform;
use crate::store::lock::{EntryLock, StoreLockError};
use crate::store::{EntryKind, KeyedLocks, StoreError};
use crate::toolchain::ToolchainError;
use crate::util::hash::{HashError, Hashable, ObjectHash};

/// File staged as the sole input of a dependency compile.
pub const DEPENDENCIES_FILENAME: &str = "dependencies.json";

#[derive(Debug, Error)]
pub enum DependencyError {
  #[error("dependency set {key} failed to build: {diagnostic}")]
  BuildFailed { key: ObjectHash, diagnostic: String },

  #[error(transparent)]
  Toolchain(#[from] ToolchainError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("failed to lock dependency entry: {0}")]
  Lock(#[from] StoreLockError),

  #[error("failed to compute dependency key: {0}")]
  Key(#[from] HashError),

  #[error("failed to stage dependencies: {0}")]
  Stage(#[from] std::io::Error),
}

impl DependencyError {
  pub fn diagnostic(&self) -> String {
    match self {
      DependencyError::BuildFailed { diagnostic, .. } => diagnostic.clone(),
      other => other.to_string(),
    }
  }
}

/// SHA-256 over the dependency list sorted by (name, version).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DependencyFingerprint(pub String);

impl DependencyFingerprint {
  /// Order of `deps` does not matter.
  pub fn of(deps: &[Dependency]) -> Self {
    let mut sorted: Vec<&Dependency> = deps.iter().collect();
    sorted.sort();

    let mut hasher = Sha256::new();
    for dep in sorted {
      hasher.update(dep.name.as_bytes());
      hasher.update([0]);
      hasher.update(dep.version.as_bytes());
      hasher.update([0]);
      hasher.update(dep.integrity.as_bytes());
      hasher.update(b"\n");
    }
    Self(format!("{:x}", hasher.finalize()))
  }

  pub fn short(&self) -> &str {
    &self.0[..self.0.len().min(12)]
  }
}

impl fmt::Display for DependencyFingerprint {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyKey {
  pub platform: Platform,
  pub toolchain_id: ObjectHash,
  pub fingerprint: DependencyFingerprint,
}

impl Hashable for DependencyKey {}

/// Compiled dependency artifacts in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyArtifactSet {
  pub key: DependencyKey,
  /// Names the store entry.
  pub key_hash: ObjectHash,
  pub path: PathBuf,
  /// Whether the entry already existed when it was requested.
  pub cache_hit: bool,
}

#[derive(Debug, Serialize)]
struct StagedDependencies<'a> {
  fingerprint: &'a DependencyFingerprint,
  dependencies: Vec<&'a Dependency>,
}

#[derive(Debug, Clone)]
enum Memo {
  Built(Arc<DependencyArtifactSet>),
  Failed(String),
}

/// Builds and caches dependency artifact sets, at most once per key.
///
/// Results are remembered for the lifetime of the cache, failures included:
/// every caller waiting on a key that failed receives the same failure.
#[derive(Debug, Default)]
pub struct DependencyCache {
  memo: KeyedLocks<Memo>,
}

impl DependencyCache {
  pub fn new() -> Self {
    Self::default()
  }

  /// The key `deps` would be cached under in `ctx`, without building.
  pub async fn key_for(ctx: &BuildContext, deps: &[Dependency]) -> Result<DependencyKey, DependencyError> {
    Ok(DependencyKey {
      platform: ctx.platform,
      toolchain_id: ctx.toolchain_id().await?,
      fingerprint: DependencyFingerprint::of(deps),
    })
  }

  pub async fn get_or_build<C: Compiler>(
    &self,
    ctx: &BuildContext,
    deps: &[Dependency],
    compiler: &C,
  ) -> Result<Arc<DependencyArtifactSet>, DependencyError> {
    let key = Self::key_for(ctx, deps).await?;
    let key_hash = key.compute_hash()?;

    let slot = self.memo.slot(&key_hash);
    let mut guard = slot.lock().await;
    match guard.as_ref() {
      Some(Memo::Built(set)) => return Ok(set.clone()),
      Some(Memo::Failed(diagnostic)) => {
        return Err(DependencyError::BuildFailed {
          key: key_hash,
          diagnostic: diagnostic.clone(),
        });
      }
      None => {}
    }

    let _entry = EntryLock::acquire_async(&ctx.store, EntryKind::Dependencies, &key_hash).await?;
    if let Some(path) = ctx.store.get_valid(EntryKind::Dependencies, &key_hash)? {
      info!(platform = %ctx.platform, key = %key_hash, "dependency cache hit");
      let set = Arc::new(DependencyArtifactSet {
        key,
        key_hash,
        path,
        cache_hit: true,
      });
      *guard = Some(Memo::Built(set.clone()));
      return Ok(set);
    }

    info!(
      platform = %ctx.platform,
      key = %key_hash,
      fingerprint = %key.fingerprint.short(),
      count = deps.len(),
      "building dependencies"
    );
    let toolchain = ctx.resolve_toolchain().await?;

    let staging = ctx.store.staging_dir("deps-")?;
    let mut sorted: Vec<&Dependency> = deps.iter().collect();
    sorted.sort();
    let staged = StagedDependencies {
      fingerprint: &key.fingerprint,
      dependencies: sorted,
    };
    let json = serde_json::to_string_pretty(&staged).map_err(std::io::Error::other)?;
    tokio::fs::write(staging.path().join(DEPENDENCIES_FILENAME), json).await?;

    let out = ctx.store.prepare_entry(EntryKind::Dependencies, &key_hash)?;
    let request = CompileRequest {
      kind: CompileKind::Dependencies,
      platform: ctx.platform,
      toolchain: &toolchain,
      src_dir: staging.path(),
      out_dir: &out,
      deps_dir: None,
      library_dirs: &[],
    };

    if let Err(e) = compiler.compile(request).await {
      let diagnostic = e.diagnostic();
      warn!(platform = %ctx.platform, key = %key_hash, error = %diagnostic, "dependency build failed");
      ctx.store.discard_entry(&out);
      *guard = Some(Memo::Failed(diagnostic.clone()));
      return Err(DependencyError::BuildFailed {
        key: key_hash,
        diagnostic,
      });
    }

    ctx.store.commit_entry(&out, &key)?;
    debug!(path = %out.display(), "dependency entry committed");

    let set = Arc::new(DependencyArtifactSet {
      key,
      key_hash,
      path: out,
      cache_hit: false,
    });
    *guard = Some(Memo::Built(set.clone()));
    Ok(set)
  }
}

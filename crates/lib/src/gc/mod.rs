//! Store garbage collection.
//!
//! Every successful build records a root listing the store entries it used.
//! Collection removes entries no root references, along with incomplete
//! entries and leftover staging directories.

use std::collections::{BTreeSet, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::{fs, io};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::store::{EntryKind, Store, StoreError, is_complete};
use crate::util::hash::hash_bytes;

const ROOT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum GcError {
  #[error("failed to read store directory: {0}")]
  ReadStore(#[from] io::Error),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error("failed to write gc root {path}: {message}")]
  WriteRoot { path: PathBuf, message: String },
}

/// The store entries one project's last build used.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GcRoot {
  pub version: u32,
  pub project: String,
  pub project_root: PathBuf,
  pub toolchains: BTreeSet<String>,
  pub dependencies: BTreeSet<String>,
  pub packages: BTreeSet<String>,
}

impl GcRoot {
  pub fn new(project: &str, project_root: &Path) -> Self {
    Self {
      version: ROOT_VERSION,
      project: project.to_string(),
      project_root: project_root.to_path_buf(),
      ..Self::default()
    }
  }

  fn entries(&self, kind: EntryKind) -> &BTreeSet<String> {
    match kind {
      EntryKind::Toolchain => &self.toolchains,
      EntryKind::Dependencies => &self.dependencies,
      EntryKind::Package => &self.packages,
    }
  }

  pub fn is_empty(&self) -> bool {
    EntryKind::ALL.iter().all(|kind| self.entries(*kind).is_empty())
  }
}

/// `<store>/roots/<project>-<hash of project root>.json`
pub fn root_path(store: &Store, project: &str, project_root: &Path) -> PathBuf {
  let hash = hash_bytes(project_root.to_string_lossy().as_bytes());
  store
    .roots_dir()
    .join(format!("{}-{}.json", file_stem(project), &hash.0[..12]))
}

/// `project` reduced to characters safe in a single file name component.
fn file_stem(project: &str) -> String {
  let cleaned: String = project
    .chars()
    .map(|c| {
      if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
        c
      } else {
        '_'
      }
    })
    .collect();
  match cleaned.trim_start_matches('.') {
    "" => "project".to_string(),
    stem => stem.to_string(),
  }
}

/// Replace the project's root with `root`.
pub fn write_root(store: &Store, root: &GcRoot) -> Result<PathBuf, GcError> {
  let path = root_path(store, &root.project, &root.project_root);
  let write_err = |message: String| GcError::WriteRoot {
    path: path.clone(),
    message,
  };

  let content = serde_json::to_string_pretty(root).map_err(|e| write_err(e.to_string()))?;
  fs::create_dir_all(store.roots_dir()).map_err(|e| write_err(e.to_string()))?;

  // Readers only ever see a whole root.
  let mut tmp = tempfile::NamedTempFile::new_in(store.roots_dir()).map_err(|e| write_err(e.to_string()))?;
  tmp.write_all(content.as_bytes()).map_err(|e| write_err(e.to_string()))?;
  tmp.persist(&path).map_err(|e| write_err(e.to_string()))?;

  debug!(path = %path.display(), "gc root written");
  Ok(path)
}

/// The project's current root, if one exists and parses.
pub fn read_root(store: &Store, project: &str, project_root: &Path) -> Option<GcRoot> {
  let path = root_path(store, project, project_root);
  let content = fs::read_to_string(&path).ok()?;
  serde_json::from_str(&content)
    .inspect_err(|e| warn!(path = %path.display(), error = %e, "ignoring unreadable gc root"))
    .ok()
}

/// All readable roots. Unparsable files are skipped.
pub fn read_roots(store: &Store) -> Result<Vec<GcRoot>, GcError> {
  let dir = store.roots_dir();
  if !dir.exists() {
    return Ok(Vec::new());
  }

  let mut roots = Vec::new();
  for entry in fs::read_dir(&dir)?.flatten() {
    let path = entry.path();
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
      continue;
    }
    match fs::read_to_string(&path)
      .map_err(|e| e.to_string())
      .and_then(|c| serde_json::from_str::<GcRoot>(&c).map_err(|e| e.to_string()))
    {
      Ok(root) => roots.push(root),
      Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable gc root"),
    }
  }
  roots.sort_by(|a, b| a.project.cmp(&b.project));
  Ok(roots)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KindStats {
  pub scanned: usize,
  pub deleted: usize,
  pub bytes_freed: u64,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GcStats {
  pub toolchains: KindStats,
  pub dependencies: KindStats,
  pub packages: KindStats,
  pub staging_removed: usize,
}

impl GcStats {
  pub fn kind(&self, kind: EntryKind) -> &KindStats {
    match kind {
      EntryKind::Toolchain => &self.toolchains,
      EntryKind::Dependencies => &self.dependencies,
      EntryKind::Package => &self.packages,
    }
  }

  fn kind_mut(&mut self, kind: EntryKind) -> &mut KindStats {
    match kind {
      EntryKind::Toolchain => &mut self.toolchains,
      EntryKind::Dependencies => &mut self.dependencies,
      EntryKind::Package => &mut self.packages,
    }
  }

  pub fn total_deleted(&self) -> usize {
    EntryKind::ALL.iter().map(|k| self.kind(*k).deleted).sum()
  }

  pub fn total_bytes_freed(&self) -> u64 {
    EntryKind::ALL.iter().map(|k| self.kind(*k).bytes_freed).sum()
  }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GcResult {
  pub stats: GcStats,
  pub deleted_paths: Vec<PathBuf>,
  pub roots: usize,
}

fn dir_size(path: &Path) -> u64 {
  WalkDir::new(path)
    .into_iter()
    .filter_map(|e| e.ok())
    .filter(|e| e.file_type().is_file())
    .filter_map(|e| e.metadata().ok())
    .map(|m| m.len())
    .sum()
}

/// Remove unreferenced and incomplete entries. The caller holds the store
/// lock exclusively.
pub fn collect_garbage(store: &Store, dry_run: bool) -> Result<GcResult, GcError> {
  let roots = read_roots(store)?;

  let mut stats = GcStats::default();
  let mut deleted_paths = Vec::new();

  for kind in EntryKind::ALL {
    let live: HashSet<&str> = roots
      .iter()
      .flat_map(|root| root.entries(kind).iter().map(String::as_str))
      .collect();
    sweep(store, kind, &live, dry_run, &mut stats, &mut deleted_paths)?;
  }

  if !dry_run {
    // No build or shell can hold an entry lock while gc holds the store lock.
    stats.staging_removed = clear_dir(&store.tmp_dir())? + clear_dir(&store.locks_dir())?;
  }

  info!(
    toolchains_deleted = stats.toolchains.deleted,
    dependencies_deleted = stats.dependencies.deleted,
    packages_deleted = stats.packages.deleted,
    bytes_freed = stats.total_bytes_freed(),
    dry_run,
    "garbage collection complete"
  );

  Ok(GcResult {
    stats,
    deleted_paths,
    roots: roots.len(),
  })
}

fn sweep(
  store: &Store,
  kind: EntryKind,
  live: &HashSet<&str>,
  dry_run: bool,
  stats: &mut GcStats,
  deleted_paths: &mut Vec<PathBuf>,
) -> Result<(), GcError> {
  for name in store.list_entries(kind)? {
    let path = store.kind_dir(kind).join(&name);
    let kind_stats = stats.kind_mut(kind);
    kind_stats.scanned += 1;

    let complete = is_complete(&path);
    if complete && live.contains(name.as_str()) {
      continue;
    }

    if complete {
      debug!(path = %path.display(), "removing unreferenced entry");
    } else {
      debug!(path = %path.display(), "removing incomplete entry");
    }

    let size = dir_size(&path);
    if !dry_run
      && let Err(e) = fs::remove_dir_all(&path)
    {
      warn!(path = %path.display(), error = %e, "failed to delete store entry");
      continue;
    }

    kind_stats.deleted += 1;
    kind_stats.bytes_freed += size;
    deleted_paths.push(path);
  }

  Ok(())
}

fn clear_dir(dir: &Path) -> Result<usize, GcError> {
  if !dir.exists() {
    return Ok(0);
  }

  let mut removed = 0;
  for entry in fs::read_dir(dir)?.flatten() {
    let path = entry.path();
    let result = if path.is_dir() {
      fs::remove_dir_all(&path)
    } else {
      fs::remove_file(&path)
    };
    match result {
      Ok(()) => removed += 1,
      Err(e) => warn!(path = %path.display(), error = %e, "failed to remove staging leftover"),
    }
  }
  Ok(removed)
}

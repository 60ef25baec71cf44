//! Source filtering.
//!
//! Reduces a project tree to the files that can affect a build and captures
//! them as a [`FilteredSourceTree`]. Two filters of the same tree with the same
//! rules always produce the same entries in the same order, and therefore the
//! same [`ContentHash`], regardless of timestamps or ownership.

mod ignore;

use std::fs;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::util::hash::{ContentHash, is_executable};

pub use ignore::{BUILTIN_RULES, IgnoreRule, IgnoreRules};

#[derive(Debug, Clone, Error)]
pub enum SourceError {
  #[error("source unreadable at {path}: {message}")]
  Unreadable { path: PathBuf, message: String },

  #[error("invalid ignore rules: {0}")]
  InvalidRules(String),
}

impl SourceError {
  fn unreadable(path: &Path, message: impl ToString) -> Self {
    Self::Unreadable {
      path: path.to_path_buf(),
      message: message.to_string(),
    }
  }
}

/// One file of a filtered tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
  /// Relative path with `/` separators.
  pub path: String,
  pub content: Vec<u8>,
  pub executable: bool,
}

/// An ordered snapshot of the build-relevant files under a root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilteredSourceTree {
  entries: Vec<SourceEntry>,
}

impl FilteredSourceTree {
  pub fn entries(&self) -> &[SourceEntry] {
    &self.entries
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn paths(&self) -> impl Iterator<Item = &str> {
    self.entries.iter().map(|e| e.path.as_str())
  }

  /// Hash over `path \0 mode \0 length \0 content` of every entry, in order.
  pub fn hash(&self) -> ContentHash {
    let mut hasher = Sha256::new();
    for entry in &self.entries {
      hasher.update(entry.path.as_bytes());
      hasher.update([0]);
      hasher.update(if entry.executable { b"x" } else { b"-" });
      hasher.update([0]);
      hasher.update(entry.content.len().to_string().as_bytes());
      hasher.update([0]);
      hasher.update(&entry.content);
    }
    ContentHash(format!("{:x}", hasher.finalize()))
  }

  /// Write the tree into `dir`, which must be empty or absent.
  pub fn stage(&self, dir: &Path) -> Result<(), SourceError> {
    fs::create_dir_all(dir).map_err(|e| SourceError::unreadable(dir, e))?;

    for entry in &self.entries {
      let dest = dir.join(&entry.path);
      if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| SourceError::unreadable(parent, e))?;
      }
      fs::write(&dest, &entry.content).map_err(|e| SourceError::unreadable(&dest, e))?;

      #[cfg(unix)]
      if entry.executable {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&dest, fs::Permissions::from_mode(0o755)).map_err(|e| SourceError::unreadable(&dest, e))?;
      }
    }

    Ok(())
  }
}

/// Applies ignore rules to a project root.
#[derive(Debug, Clone)]
pub struct SourceFilter {
  rules: IgnoreRules,
}

impl Default for SourceFilter {
  fn default() -> Self {
    Self::new(IgnoreRules::builtin())
  }
}

impl SourceFilter {
  pub fn new(rules: IgnoreRules) -> Self {
    Self { rules }
  }

  /// Filter with the built-in rules, `project_rules` and `.shipyardignore`.
  pub fn for_project(root: &Path, project_rules: &[String]) -> Result<Self, SourceError> {
    let rules = IgnoreRules::for_project(root, project_rules).map_err(SourceError::InvalidRules)?;
    Ok(Self::new(rules))
  }

  pub fn rules(&self) -> &IgnoreRules {
    &self.rules
  }

  pub fn filter(&self, root: &Path) -> Result<FilteredSourceTree, SourceError> {
    let files = list_files(root, &self.rules)?;

    let mut entries = Vec::with_capacity(files.len());
    for rel in files {
      let full = root.join(&rel);
      let content = fs::read(&full).map_err(|e| SourceError::unreadable(&full, e))?;
      entries.push(SourceEntry {
        executable: is_executable(&full),
        path: rel,
        content,
      });
    }

    debug!(root = %root.display(), files = entries.len(), "filtered source tree");
    Ok(FilteredSourceTree { entries })
  }
}

/// Enumerate build-relevant regular files under `root`, relative and sorted.
pub fn list_files(root: &Path, rules: &IgnoreRules) -> Result<Vec<String>, SourceError> {
  let meta = fs::metadata(root).map_err(|e| SourceError::unreadable(root, e))?;
  if !meta.is_dir() {
    return Err(SourceError::unreadable(root, "not a directory"));
  }

  let rel_of = |path: &Path| -> String {
    path
      .strip_prefix(root)
      .unwrap_or(path)
      .to_string_lossy()
      .replace('\\', "/")
  };

  let walker = WalkDir::new(root).into_iter().filter_entry(|e| {
    e.depth() == 0 || !rules.is_ignored(&rel_of(e.path()), e.file_type().is_dir())
  });

  let mut files = Vec::new();
  for entry in walker {
    let entry = entry.map_err(|e| {
      let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
      SourceError::Unreadable {
        path,
        message: e.to_string(),
      }
    })?;

    let file_type = entry.file_type();
    if file_type.is_symlink() {
      warn!(path = %entry.path().display(), "skipping symlink in source tree");
      continue;
    }
    if file_type.is_file() {
      files.push(rel_of(entry.path()));
    }
  }

  files.sort();
  Ok(files)
}

//! The content-addressed store.
//!
//! Every cached artifact lives in a directory named by the object hash of its
//! key. An entry is only valid once its completion marker is written, and the
//! marker records a hash of the entry's contents so a damaged entry is
//! detected on the next lookup.
//!
//! # Layout
//!
//! ```text
//! store/
//! ├── .lock                  # cross-process store lock
//! ├── toolchains/<hash>/     # materialized toolchains
//! ├── deps/<hash>/           # dependency artifact sets
//! ├── packages/<hash>/       # final packages
//! ├── roots/<project>.json   # gc roots
//! ├── locks/                 # per-entry build locks
//! └── tmp/                   # staging directories
//! ```

mod keyed;
pub mod lock;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, warn};

use crate::platform::paths::store_dir;
use crate::util::hash::{DirHashError, ObjectHash, hash_directory};

pub use keyed::KeyedLocks;

/// Marker file name indicating an entry completed successfully.
pub const COMPLETE_MARKER: &str = ".shipyard-complete";

/// Names excluded when hashing entry contents.
/// - the marker itself (written after the hash)
/// - `tmp`, the scratch directory handed to compiles
pub const ENTRY_HASH_EXCLUSIONS: &[&str] = &[COMPLETE_MARKER, "tmp"];

const MARKER_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("failed to create directory '{path}': {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to remove '{path}': {source}")]
  Remove {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write marker in '{path}': {message}")]
  WriteMarker { path: PathBuf, message: String },

  #[error("failed to hash entry: {0}")]
  Hash(#[from] DirHashError),

  #[error("io error: {0}")]
  Io(#[from] io::Error),
}

/// The kinds of entries the store holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
  Toolchain,
  Dependencies,
  Package,
}

impl EntryKind {
  pub const ALL: [EntryKind; 3] = [EntryKind::Toolchain, EntryKind::Dependencies, EntryKind::Package];

  pub fn dir_name(&self) -> &'static str {
    match self {
      EntryKind::Toolchain => "toolchains",
      EntryKind::Dependencies => "deps",
      EntryKind::Package => "packages",
    }
  }
}

/// Completion marker content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMarker {
  pub version: u32,
  /// Always "complete" for committed entries.
  pub status: String,
  /// Full SHA-256 of the entry contents.
  pub output_hash: String,
  /// The key the entry was built for, kept for inspection.
  pub key: serde_json::Value,
}

/// Result of checking a store entry.
#[derive(Debug)]
pub enum EntryState {
  /// Committed and intact.
  Valid(EntryMarker),
  /// No directory for this hash.
  Missing,
  /// Directory without a readable marker (interrupted build).
  Incomplete,
  /// Marker present but the contents no longer match it.
  Corrupt { expected: String, actual: String },
}

/// Handle to a store on disk.
///
/// Cheap to clone; all state lives in the filesystem.
#[derive(Debug, Clone)]
pub struct Store {
  root: PathBuf,
}

impl Store {
  /// Open (creating if needed) the store at `root`.
  pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
    let store = Self { root: root.into() };
    for dir in EntryKind::ALL
      .iter()
      .map(|kind| store.kind_dir(*kind))
      .chain([store.tmp_dir(), store.roots_dir()])
    {
      fs::create_dir_all(&dir).map_err(|e| StoreError::CreateDir { path: dir, source: e })?;
    }
    Ok(store)
  }

  /// Open the store named by `$SHIPYARD_STORE`, or the default data location.
  pub fn default_location() -> Result<Self, StoreError> {
    Self::open(store_dir())
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn kind_dir(&self, kind: EntryKind) -> PathBuf {
    self.root.join(kind.dir_name())
  }

  pub fn entry_path(&self, kind: EntryKind, hash: &ObjectHash) -> PathBuf {
    self.kind_dir(kind).join(&hash.0)
  }

  pub fn tmp_dir(&self) -> PathBuf {
    self.root.join("tmp")
  }

  pub fn roots_dir(&self) -> PathBuf {
    self.root.join("roots")
  }

  pub fn locks_dir(&self) -> PathBuf {
    self.root.join("locks")
  }

  /// A scratch directory under `tmp/`, removed when dropped.
  pub fn staging_dir(&self, prefix: &str) -> Result<TempDir, StoreError> {
    let tmp = self.tmp_dir();
    fs::create_dir_all(&tmp).map_err(|e| StoreError::CreateDir {
      path: tmp.clone(),
      source: e,
    })?;
    Ok(tempfile::Builder::new().prefix(prefix).tempdir_in(&tmp)?)
  }

  /// Check the state of an entry without modifying it.
  pub fn lookup(&self, kind: EntryKind, hash: &ObjectHash) -> EntryState {
    let path = self.entry_path(kind, hash);
    if !path.exists() {
      return EntryState::Missing;
    }

    let marker = match read_marker(&path) {
      Ok(Some(marker)) => marker,
      Ok(None) => return EntryState::Incomplete,
      Err(e) => {
        debug!(path = %path.display(), error = %e, "unreadable marker");
        return EntryState::Incomplete;
      }
    };

    match hash_directory(&path, ENTRY_HASH_EXCLUSIONS) {
      Ok(actual) if actual.0 == marker.output_hash => EntryState::Valid(marker),
      Ok(actual) => EntryState::Corrupt {
        expected: marker.output_hash,
        actual: actual.0,
      },
      Err(e) => EntryState::Corrupt {
        expected: marker.output_hash,
        actual: format!("<unhashable: {}>", e),
      },
    }
  }

  /// Return the entry path if the entry is valid. Damaged or incomplete
  /// entries are removed so the caller rebuilds them.
  pub fn get_valid(&self, kind: EntryKind, hash: &ObjectHash) -> Result<Option<PathBuf>, StoreError> {
    let path = self.entry_path(kind, hash);
    match self.lookup(kind, hash) {
      EntryState::Valid(_) => Ok(Some(path)),
      EntryState::Missing => Ok(None),
      EntryState::Incomplete => {
        debug!(path = %path.display(), "incomplete entry found, removing");
        remove_dir(&path)?;
        Ok(None)
      }
      EntryState::Corrupt { expected, actual } => {
        warn!(
          path = %path.display(),
          expected = %expected,
          actual = %actual,
          "store entry corrupted, will rebuild"
        );
        remove_dir(&path)?;
        Ok(None)
      }
    }
  }

  /// Create an empty directory for a new entry, clearing any leftovers.
  pub fn prepare_entry(&self, kind: EntryKind, hash: &ObjectHash) -> Result<PathBuf, StoreError> {
    let path = self.entry_path(kind, hash);
    if path.exists() {
      remove_dir(&path)?;
    }
    fs::create_dir_all(&path).map_err(|e| StoreError::CreateDir {
      path: path.clone(),
      source: e,
    })?;
    Ok(path)
  }

  /// Seal an entry by hashing its contents and writing the marker.
  pub fn commit_entry<K: Serialize>(&self, path: &Path, key: &K) -> Result<EntryMarker, StoreError> {
    let scratch = path.join("tmp");
    if scratch.exists() {
      remove_dir(&scratch)?;
    }

    let output_hash = hash_directory(path, ENTRY_HASH_EXCLUSIONS)?;
    let marker = EntryMarker {
      version: MARKER_VERSION,
      status: "complete".to_string(),
      output_hash: output_hash.0,
      key: serde_json::to_value(key).map_err(|e| StoreError::WriteMarker {
        path: path.to_path_buf(),
        message: e.to_string(),
      })?,
    };

    let content = serde_json::to_string(&marker).map_err(|e| StoreError::WriteMarker {
      path: path.to_path_buf(),
      message: e.to_string(),
    })?;
    fs::write(path.join(COMPLETE_MARKER), format!("{}\n", content)).map_err(|e| StoreError::WriteMarker {
      path: path.to_path_buf(),
      message: e.to_string(),
    })?;

    Ok(marker)
  }

  /// Remove a failed or unwanted entry. Missing entries are ignored.
  pub fn discard_entry(&self, path: &Path) {
    if path.exists()
      && let Err(e) = remove_dir(path)
    {
      warn!(path = %path.display(), error = %e, "failed to discard store entry");
    }
  }

  /// Names of every entry directory of `kind`, sorted.
  pub fn list_entries(&self, kind: EntryKind) -> Result<Vec<String>, StoreError> {
    let dir = self.kind_dir(kind);
    if !dir.exists() {
      return Ok(Vec::new());
    }

    let mut names: Vec<String> = fs::read_dir(&dir)?
      .flatten()
      .filter(|e| e.path().is_dir())
      .filter_map(|e| e.file_name().to_str().map(str::to_string))
      .collect();
    names.sort();
    Ok(names)
  }
}

/// Read an entry's completion marker.
///
/// Returns `Ok(None)` if the marker does not exist.
pub fn read_marker(entry: &Path) -> Result<Option<EntryMarker>, io::Error> {
  let marker_path = entry.join(COMPLETE_MARKER);
  if !marker_path.exists() {
    return Ok(None);
  }

  let content = fs::read_to_string(&marker_path)?;
  let marker: EntryMarker = serde_json::from_str(&content).map_err(io::Error::other)?;
  Ok(Some(marker))
}

pub fn is_complete(entry: &Path) -> bool {
  matches!(read_marker(entry), Ok(Some(_)))
}

fn remove_dir(path: &Path) -> Result<(), StoreError> {
  fs::remove_dir_all(path).map_err(|e| StoreError::Remove {
    path: path.to_path_buf(),
    source: e,
  })
}

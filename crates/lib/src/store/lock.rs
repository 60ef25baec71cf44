//! Cross-process store locking.
//!
//! Builds take the store lock exclusively, shells take it shared, so a shell
//! never observes a half-written entry and two `yard build` runs never race
//! on the same store. A second writer waits for the first and then reuses
//! whatever it committed.
//!
//! Shells may still materialize a missing toolchain under the shared lock.
//! [`EntryLock`] serializes that per entry, across processes.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::{EntryKind, Store};
use crate::util::hash::ObjectHash;

const LOCK_FILENAME: &str = ".lock";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
  Shared,
  Exclusive,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LockMetadata {
  pub version: u32,
  pub pid: u32,
  pub started_at_unix: u64,
  pub command: String,
  pub store: PathBuf,
}

#[derive(Debug, Error)]
pub enum StoreLockError {
  #[error(
    "store is locked by another process: {command} (PID {pid}, started at unix time {started_at_unix})\n\
     If no yard process is running, remove the lock file:\n  {lock_path}"
  )]
  Contention {
    command: String,
    pid: u32,
    started_at_unix: u64,
    lock_path: PathBuf,
  },

  #[error(
    "store is locked (could not read lock metadata)\n\
     If no yard process is running, remove the lock file:\n  {lock_path}"
  )]
  ContentionUnknown { lock_path: PathBuf },

  #[error("failed to open lock file: {0}")]
  OpenFile(#[source] io::Error),

  #[error("failed to write lock metadata: {0}")]
  WriteMetadata(#[source] io::Error),

  #[error("failed to acquire lock: {0}")]
  LockFailed(#[source] io::Error),
}

/// A held store lock, released on drop.
pub struct StoreLock {
  file: File,
  lock_path: PathBuf,
}

impl StoreLock {
  /// Take the store lock, waiting for any conflicting holder to release it.
  pub fn acquire(store: &Store, mode: LockMode, command: &str) -> Result<Self, StoreLockError> {
    Self::lock(store, mode, command, true)
  }

  /// Take the store lock, failing with a contention error instead of waiting.
  pub fn try_acquire(store: &Store, mode: LockMode, command: &str) -> Result<Self, StoreLockError> {
    Self::lock(store, mode, command, false)
  }

  fn lock(store: &Store, mode: LockMode, command: &str, wait: bool) -> Result<Self, StoreLockError> {
    let lock_path = store.root().join(LOCK_FILENAME);
    let file = open_lock_file(&lock_path)?;

    if let Err(err) = lock_file(&file, mode, false) {
      if err.kind() != io::ErrorKind::WouldBlock {
        return Err(StoreLockError::LockFailed(err));
      }
      let contention = read_contention_error(&lock_path);
      if !wait {
        return Err(contention);
      }
      warn!(holder = %holder(&contention), command, "store is busy, waiting for the lock");
      lock_file(&file, mode, true).map_err(StoreLockError::LockFailed)?;
    }

    if mode == LockMode::Exclusive {
      write_metadata(&file, command, store.root())?;
    }

    Ok(StoreLock { file, lock_path })
  }

  /// Read the metadata through the held handle (a second handle would be
  /// refused on Windows, where locks are mandatory).
  pub fn read_metadata(&self) -> io::Result<LockMetadata> {
    use std::io::{Seek, SeekFrom};

    let mut file = &self.file;
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).map_err(io::Error::other)
  }

  pub fn lock_path(&self) -> &Path {
    &self.lock_path
  }
}

/// Exclusive lock on one store entry, held while the entry is checked, built,
/// and committed. Blocks until other holders, in any process, let go.
#[derive(Debug)]
pub struct EntryLock {
  _file: File,
}

impl EntryLock {
  pub fn acquire(store: &Store, kind: EntryKind, hash: &ObjectHash) -> Result<Self, StoreLockError> {
    let dir = store.locks_dir();
    std::fs::create_dir_all(&dir).map_err(StoreLockError::OpenFile)?;
    let path = dir.join(format!("{}-{}.lock", kind.dir_name(), hash));
    let file = open_lock_file(&path)?;

    if let Err(err) = lock_file(&file, LockMode::Exclusive, false) {
      if err.kind() != io::ErrorKind::WouldBlock {
        return Err(StoreLockError::LockFailed(err));
      }
      debug!(kind = kind.dir_name(), hash = %hash, "entry is being built elsewhere, waiting");
      lock_file(&file, LockMode::Exclusive, true).map_err(StoreLockError::LockFailed)?;
    }

    Ok(EntryLock { _file: file })
  }

  /// [`EntryLock::acquire`] off the async runtime's worker threads.
  pub async fn acquire_async(store: &Store, kind: EntryKind, hash: &ObjectHash) -> Result<Self, StoreLockError> {
    let (store, hash) = (store.clone(), hash.clone());
    tokio::task::spawn_blocking(move || Self::acquire(&store, kind, &hash))
      .await
      .map_err(|e| StoreLockError::LockFailed(io::Error::other(e)))?
  }
}

fn open_lock_file(path: &Path) -> Result<File, StoreLockError> {
  OpenOptions::new()
    .read(true)
    .write(true)
    .create(true)
    .truncate(false)
    .open(path)
    .map_err(StoreLockError::OpenFile)
}

fn holder(contention: &StoreLockError) -> String {
  match contention {
    StoreLockError::Contention { command, pid, .. } => format!("{} (PID {})", command, pid),
    _ => "another process".to_string(),
  }
}

fn write_metadata(file: &File, command: &str, store: &Path) -> Result<(), StoreLockError> {
  let metadata = LockMetadata {
    version: 1,
    pid: std::process::id(),
    started_at_unix: SystemTime::now()
      .duration_since(UNIX_EPOCH)
      .unwrap_or_default()
      .as_secs(),
    command: command.to_string(),
    store: store.to_path_buf(),
  };

  file.set_len(0).map_err(StoreLockError::WriteMetadata)?;
  let mut writer = io::BufWriter::new(file);
  serde_json::to_writer_pretty(&mut writer, &metadata).map_err(|e| StoreLockError::WriteMetadata(io::Error::other(e)))?;
  writer.flush().map_err(StoreLockError::WriteMetadata)?;

  Ok(())
}

fn read_contention_error(lock_path: &Path) -> StoreLockError {
  if let Ok(mut file) = File::open(lock_path) {
    let mut contents = String::new();
    if file.read_to_string(&mut contents).is_ok()
      && let Ok(metadata) = serde_json::from_str::<LockMetadata>(&contents)
    {
      return StoreLockError::Contention {
        command: metadata.command,
        pid: metadata.pid,
        started_at_unix: metadata.started_at_unix,
        lock_path: lock_path.to_path_buf(),
      };
    }
  }

  StoreLockError::ContentionUnknown {
    lock_path: lock_path.to_path_buf(),
  }
}

#[cfg(unix)]
fn lock_file(file: &File, mode: LockMode, block: bool) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  let operation = match (mode, block) {
    (LockMode::Shared, false) => FlockOperation::NonBlockingLockShared,
    (LockMode::Exclusive, false) => FlockOperation::NonBlockingLockExclusive,
    (LockMode::Shared, true) => FlockOperation::LockShared,
    (LockMode::Exclusive, true) => FlockOperation::LockExclusive,
  };

  flock(file.as_fd(), operation).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(windows)]
fn lock_file(file: &File, mode: LockMode, block: bool) -> io::Result<()> {
  use std::os::windows::io::AsRawHandle;
  use windows_sys::Win32::Foundation::HANDLE;
  use windows_sys::Win32::Storage::FileSystem::{LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx};

  let handle = file.as_raw_handle() as HANDLE;
  let mut flags = if block { 0 } else { LOCKFILE_FAIL_IMMEDIATELY };
  if mode == LockMode::Exclusive {
    flags |= LOCKFILE_EXCLUSIVE_LOCK;
  }

  // SAFETY: OVERLAPPED is valid when zero-initialized and the handle is owned
  // by `file` for the duration of the call.
  let result = unsafe {
    let mut overlapped = std::mem::zeroed();
    LockFileEx(handle, flags, 0, 1, 0, &mut overlapped)
  };

  if result == 0 {
    Err(io::Error::last_os_error())
  } else {
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn temp_store() -> (TempDir, Store) {
    let temp = TempDir::new().unwrap();
    let store = Store::open(temp.path()).unwrap();
    (temp, store)
  }

  #[test]
  fn exclusive_lock_writes_metadata() {
    let (_temp, store) = temp_store();
    let lock = StoreLock::acquire(&store, LockMode::Exclusive, "build").unwrap();

    let metadata = lock.read_metadata().unwrap();
    assert_eq!(metadata.command, "build");
    assert_eq!(metadata.pid, std::process::id());
    assert!(lock.lock_path().exists());
  }

  #[test]
  fn multiple_shared_locks() {
    let (_temp, store) = temp_store();
    let lock1 = StoreLock::acquire(&store, LockMode::Shared, "shell").unwrap();
    let lock2 = StoreLock::acquire(&store, LockMode::Shared, "shell").unwrap();
    assert_eq!(lock1.lock_path(), lock2.lock_path());
  }

  #[cfg(unix)]
  #[test]
  fn exclusive_lock_reports_holder() {
    let (_temp, store) = temp_store();
    let _held = StoreLock::acquire(&store, LockMode::Exclusive, "build").unwrap();

    let err = StoreLock::try_acquire(&store, LockMode::Exclusive, "gc").err().unwrap();
    match err {
      StoreLockError::Contention { command, pid, .. } => {
        assert_eq!(command, "build");
        assert_eq!(pid, std::process::id());
      }
      other => panic!("expected contention, got {:?}", other),
    }
  }

  #[cfg(unix)]
  #[test]
  fn shared_lock_refused_while_exclusive_held() {
    let (_temp, store) = temp_store();
    let _held = StoreLock::acquire(&store, LockMode::Exclusive, "gc").unwrap();

    assert!(StoreLock::try_acquire(&store, LockMode::Shared, "shell").is_err());
  }

  #[cfg(unix)]
  #[test]
  fn second_writer_waits_for_the_first() {
    use std::sync::mpsc;
    use std::time::{Duration, Instant};

    let (_temp, store) = temp_store();
    let held = StoreLock::acquire(&store, LockMode::Exclusive, "build").unwrap();
    let (tx, rx) = mpsc::channel();

    let waiter_store = store.clone();
    let waiter = std::thread::spawn(move || {
      let start = Instant::now();
      let lock = StoreLock::acquire(&waiter_store, LockMode::Exclusive, "gc").unwrap();
      tx.send(start.elapsed()).unwrap();
      lock.read_metadata().unwrap().command
    });

    std::thread::sleep(Duration::from_millis(200));
    assert!(rx.try_recv().is_err(), "waiter got the lock while it was held");
    drop(held);

    assert!(rx.recv_timeout(Duration::from_secs(10)).unwrap() >= Duration::from_millis(200));
    assert_eq!(waiter.join().unwrap(), "gc");
  }

  #[cfg(unix)]
  #[test]
  fn entry_lock_serializes_holders() {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    let (_temp, store) = temp_store();
    let hash = ObjectHash("abc123".to_string());
    let inside = Arc::new(AtomicUsize::new(0));
    let overlap = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..4)
      .map(|_| {
        let (store, hash, inside, overlap) = (store.clone(), hash.clone(), inside.clone(), overlap.clone());
        std::thread::spawn(move || {
          let _lock = EntryLock::acquire(&store, EntryKind::Toolchain, &hash).unwrap();
          if inside.fetch_add(1, Ordering::SeqCst) > 0 {
            overlap.fetch_add(1, Ordering::SeqCst);
          }
          std::thread::sleep(Duration::from_millis(50));
          inside.fetch_sub(1, Ordering::SeqCst);
        })
      })
      .collect();
    for handle in handles {
      handle.join().unwrap();
    }

    assert_eq!(overlap.load(Ordering::SeqCst), 0);
    assert!(store.locks_dir().join("toolchains-abc123.lock").exists());
  }

  #[test]
  fn lock_released_on_drop() {
    let (_temp, store) = temp_store();
    {
      let _lock = StoreLock::acquire(&store, LockMode::Exclusive, "build").unwrap();
    }
    assert!(StoreLock::acquire(&store, LockMode::Exclusive, "gc").is_ok());
  }
}

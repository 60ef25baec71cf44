mod build;
mod fingerprint;
mod gc;
mod info;
mod shell;

use std::path::PathBuf;

use anyhow::{Context, Result};

use shipyard_lib::manifest::Project;
use shipyard_lib::store::Store;
use shipyard_lib::store::lock::{LockMode, StoreLock};

use crate::output::OutputFormat;

pub use build::cmd_build;
pub use fingerprint::cmd_fingerprint;
pub use gc::cmd_gc;
pub use info::cmd_info;
pub use shell::cmd_shell;

/// Flags shared by every subcommand.
pub struct GlobalArgs {
  pub project: PathBuf,
  pub store: Option<PathBuf>,
  pub output: OutputFormat,
  /// Wait for a busy store rather than failing.
  pub wait: bool,
}

impl GlobalArgs {
  pub fn open_store(&self) -> Result<Store> {
    let store = match &self.store {
      Some(path) => Store::open(path),
      None => Store::default_location(),
    };
    store.context("Failed to open store")
  }

  pub fn lock_store(&self, store: &Store, mode: LockMode, command: &str) -> Result<StoreLock> {
    let lock = if self.wait {
      StoreLock::acquire(store, mode, command)
    } else {
      StoreLock::try_acquire(store, mode, command)
    };
    lock.context("Failed to acquire store lock")
  }

  pub fn load_project(&self) -> Result<Project> {
    Project::load(&self.project).with_context(|| format!("Failed to load project at {}", self.project.display()))
  }
}

//! Native library lookup.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::consts::LIBRARY_PATH_ENV;
use crate::manifest::NativeLibrary;
use crate::platform::Platform;

/// Finds the shared library file for a native library on a platform.
pub trait LibraryResolver: Send + Sync {
  fn resolve(&self, library: &NativeLibrary, platform: Platform) -> Option<PathBuf>;
}

/// Searches the library's own search paths, then extra directories, then the
/// platform's loader defaults (only when the platform is the host).
#[derive(Debug, Clone, Default)]
pub struct SearchPathResolver {
  extra: Vec<PathBuf>,
  skip_defaults: bool,
}

impl SearchPathResolver {
  pub fn new(extra: Vec<PathBuf>) -> Self {
    Self {
      extra,
      skip_defaults: false,
    }
  }

  /// Extra directories from `$SHIPYARD_LIBRARY_PATH`.
  pub fn from_env() -> Self {
    let extra = std::env::var_os(LIBRARY_PATH_ENV)
      .map(|value| std::env::split_paths(&value).collect())
      .unwrap_or_default();
    Self::new(extra)
  }

  /// Do not fall back to the loader's default directories.
  pub fn without_defaults(mut self) -> Self {
    self.skip_defaults = true;
    self
  }

  fn candidates(&self, library: &NativeLibrary, platform: Platform) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = library.search_paths.iter().chain(&self.extra).cloned().collect();
    if !self.skip_defaults && Platform::current() == Some(platform) {
      dirs.extend(platform.os.default_library_dirs().iter().map(PathBuf::from));
    }
    dirs
  }
}

impl LibraryResolver for SearchPathResolver {
  fn resolve(&self, library: &NativeLibrary, platform: Platform) -> Option<PathBuf> {
    self
      .candidates(library, platform)
      .iter()
      .find_map(|dir| find_in_dir(dir, &library.name, platform))
  }
}

fn find_in_dir(dir: &Path, name: &str, platform: Platform) -> Option<PathBuf> {
  trace!(dir = %dir.display(), library = name, "probing");
  let mut matches: Vec<PathBuf> = fs::read_dir(dir)
    .ok()?
    .flatten()
    .filter(|entry| {
      entry
        .file_name()
        .to_str()
        .is_some_and(|file| platform.os.matches_library(name, file))
    })
    .map(|entry| entry.path())
    .collect();
  // Prefer the unversioned name, which sorts first.
  matches.sort();
  matches.into_iter().next()
}

/// Directories holding each library that resolves, deduplicated in order.
pub fn library_dirs(
  resolver: &dyn LibraryResolver,
  libraries: &[NativeLibrary],
  platform: Platform,
) -> (Vec<PathBuf>, Vec<String>) {
  let mut dirs: Vec<PathBuf> = Vec::new();
  let mut missing = Vec::new();

  for library in libraries {
    match resolver.resolve(library, platform) {
      Some(file) => {
        if let Some(dir) = file.parent()
          && !dirs.iter().any(|d| d == dir)
        {
          dirs.push(dir.to_path_buf());
        }
      }
      None => missing.push(library.name.clone()),
    }
  }

  (dirs, missing)
}

//! The compiler capability.
//!
//! Stages never run tools directly. They describe a compile with a
//! [`CompileRequest`] and hand it to a [`Compiler`]; [`CommandCompiler`] is the
//! implementation used outside tests.

mod cmd;

use std::fmt;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::platform::Platform;
use crate::toolchain::Toolchain;

pub use cmd::CommandCompiler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompileKind {
  /// Compile the locked dependency set only.
  Dependencies,
  /// Compile the project against prebuilt dependency artifacts.
  Package,
}

impl CompileKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      CompileKind::Dependencies => "dependencies",
      CompileKind::Package => "package",
    }
  }
}

impl fmt::Display for CompileKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Everything a compile may read or write.
#[derive(Debug, Clone, Copy)]
pub struct CompileRequest<'a> {
  pub kind: CompileKind,
  pub platform: Platform,
  pub toolchain: &'a Toolchain,
  /// Staged inputs. Read-only by convention.
  pub src_dir: &'a Path,
  /// The store entry being produced.
  pub out_dir: &'a Path,
  /// Dependency artifacts, for package compiles.
  pub deps_dir: Option<&'a Path>,
  /// Native library directories for the linker.
  pub library_dirs: &'a [PathBuf],
}

#[derive(Debug, Error)]
pub enum CompileError {
  #[error("{diagnostic}")]
  Failed { diagnostic: String },

  #[error("no {kind} command configured for the toolchain")]
  NotConfigured { kind: CompileKind },

  #[error("failed to run compiler: {0}")]
  Io(#[from] io::Error),
}

impl CompileError {
  /// Text suitable for a per-platform failure line.
  pub fn diagnostic(&self) -> String {
    match self {
      CompileError::Failed { diagnostic } => diagnostic.clone(),
      other => other.to_string(),
    }
  }
}

/// Runs compiles. Implementations must be shareable across platform tasks.
pub trait Compiler: Send + Sync {
  fn compile(&self, request: CompileRequest<'_>) -> impl Future<Output = Result<(), CompileError>> + Send;
}

//! Per-platform build failures.
//!
//! Every stage reports its own error type; [`BuildError`] tags it with the
//! stage it came from so a matrix report can say where each platform stopped.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::deps::DependencyError;
use crate::package::PackageError;
use crate::platform::Platform;
use crate::source::SourceError;
use crate::toolchain::ToolchainError;

/// The pipeline stage a failure originated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
  Toolchain,
  Source,
  Dependencies,
  NativeLibraries,
  Package,
}

impl Stage {
  pub fn as_str(&self) -> &'static str {
    match self {
      Stage::Toolchain => "toolchain",
      Stage::Source => "source",
      Stage::Dependencies => "dependencies",
      Stage::NativeLibraries => "native-libraries",
      Stage::Package => "package",
    }
  }
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Error)]
pub enum BuildError {
  #[error("toolchain unavailable: {0}")]
  ToolchainUnavailable(#[from] ToolchainError),

  #[error("source unreadable: {0}")]
  SourceUnreadable(#[from] SourceError),

  #[error("dependency build failed: {0}")]
  DependencyBuildFailed(#[from] DependencyError),

  #[error("package build failed: {0}")]
  PackageBuildFailed(#[from] PackageError),

  #[error("native library '{name}' not found for {platform}")]
  NativeLibraryMissing { name: String, platform: Platform },

  #[error("build task for {platform} panicked during {stage}: {message}")]
  Panicked {
    platform: Platform,
    stage: Stage,
    message: String,
  },
}

impl BuildError {
  pub fn stage(&self) -> Stage {
    match self {
      BuildError::ToolchainUnavailable(_) => Stage::Toolchain,
      BuildError::SourceUnreadable(_) => Stage::Source,
      BuildError::DependencyBuildFailed(_) => Stage::Dependencies,
      BuildError::NativeLibraryMissing { .. } => Stage::NativeLibraries,
      BuildError::PackageBuildFailed(_) => Stage::Package,
      BuildError::Panicked { stage, .. } => *stage,
    }
  }

  /// The underlying message without the stage prefix.
  pub fn diagnostic(&self) -> String {
    match self {
      BuildError::ToolchainUnavailable(e) => e.to_string(),
      BuildError::SourceUnreadable(e) => e.to_string(),
      BuildError::DependencyBuildFailed(e) => e.diagnostic(),
      BuildError::PackageBuildFailed(e) => e.diagnostic(),
      other => other.to_string(),
    }
  }
}

//! Target platform identifiers and host paths.

pub mod arch;
pub mod os;
pub mod paths;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub use arch::Arch;
pub use os::Os;

/// Platform identifier combining architecture and OS (e.g., "aarch64-darwin").
///
/// Serialized as its triple. Parsing accepts both `<arch>-<os>` and
/// `<os>-<arch>` together with common aliases, so `linux-x64` and
/// `x86_64-linux` name the same platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Platform {
  pub arch: Arch,
  pub os: Os,
}

impl Platform {
  pub fn new(arch: Arch, os: Os) -> Self {
    Self { arch, os }
  }

  /// Detect the current platform at runtime
  ///
  /// Returns `None` if the OS or architecture is not supported
  pub fn current() -> Option<Self> {
    Some(Self {
      arch: Arch::current()?,
      os: Os::current()?,
    })
  }

  /// Returns the platform triple string (e.g., "aarch64-darwin")
  pub fn triple(&self) -> String {
    format!("{}-{}", self.arch, self.os)
  }
}

impl fmt::Display for Platform {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.triple())
  }
}

impl FromStr for Platform {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    // x86_64 contains an underscore, never a dash, so the first dash splits.
    let (first, second) = s
      .split_once('-')
      .ok_or_else(|| format!("invalid platform '{}': expected <arch>-<os>", s))?;

    if let (Ok(arch), Ok(os)) = (first.parse::<Arch>(), second.parse::<Os>()) {
      return Ok(Self::new(arch, os));
    }
    if let (Ok(os), Ok(arch)) = (first.parse::<Os>(), second.parse::<Arch>()) {
      return Ok(Self::new(arch, os));
    }
    Err(format!("invalid platform '{}': unknown architecture or operating system", s))
  }
}

impl Serialize for Platform {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&self.triple())
  }
}

impl<'de> Deserialize<'de> for Platform {
  fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
  }
}

use std::fmt;
use std::str::FromStr;

/// Operating systems a build matrix can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Os {
  Linux,
  MacOs,
  Windows,
}

impl Os {
  /// Detect the current operating system at runtime
  pub fn current() -> Option<Self> {
    match std::env::consts::OS {
      "linux" => Some(Self::Linux),
      "macos" => Some(Self::MacOs),
      "windows" => Some(Self::Windows),
      _ => None,
    }
  }

  /// Returns the lowercase string identifier for this OS
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Linux => "linux",
      Self::MacOs => "darwin",
      Self::Windows => "windows",
    }
  }

  /// Environment variable the dynamic loader consults for shared libraries.
  pub fn library_path_var(&self) -> &'static str {
    match self {
      Self::Linux => "LD_LIBRARY_PATH",
      Self::MacOs => "DYLD_LIBRARY_PATH",
      Self::Windows => "PATH",
    }
  }

  /// Separator between entries of PATH-like variables.
  pub fn path_separator(&self) -> char {
    match self {
      Self::Windows => ';',
      Self::Linux | Self::MacOs => ':',
    }
  }

  /// Candidate file names for a shared library called `name`.
  ///
  /// On Linux versioned names (`libssl.so.3`) are matched by prefix, see
  /// [`Os::matches_library`].
  pub fn library_file_names(&self, name: &str) -> Vec<String> {
    match self {
      Self::Linux => vec![format!("lib{}.so", name)],
      Self::MacOs => vec![format!("lib{}.dylib", name)],
      Self::Windows => vec![format!("{}.dll", name), format!("lib{}.dll", name)],
    }
  }

  /// Whether `file_name` is a shared library file for `name` on this OS.
  pub fn matches_library(&self, name: &str, file_name: &str) -> bool {
    match self {
      Self::Linux => {
        let base = format!("lib{}.so", name);
        file_name == base || file_name.starts_with(&format!("{}.", base))
      }
      Self::MacOs => {
        let prefix = format!("lib{}", name);
        file_name == format!("{}.dylib", prefix)
          || (file_name.starts_with(&format!("{}.", prefix)) && file_name.ends_with(".dylib"))
      }
      Self::Windows => self
        .library_file_names(name)
        .iter()
        .any(|candidate| candidate.eq_ignore_ascii_case(file_name)),
    }
  }

  /// Default directories the platform's loader searches.
  pub fn default_library_dirs(&self) -> &'static [&'static str] {
    match self {
      Self::Linux => &[
        "/usr/local/lib",
        "/usr/lib",
        "/usr/lib64",
        "/lib",
        "/lib64",
        "/usr/lib/x86_64-linux-gnu",
        "/usr/lib/aarch64-linux-gnu",
      ],
      Self::MacOs => &["/usr/local/lib", "/opt/homebrew/lib", "/usr/lib"],
      Self::Windows => &["C:\\Windows\\System32"],
    }
  }
}

impl FromStr for Os {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "linux" => Ok(Self::Linux),
      "darwin" | "macos" | "osx" => Ok(Self::MacOs),
      "windows" | "win" => Ok(Self::Windows),
      other => Err(format!("unknown operating system '{}'", other)),
    }
  }
}

impl fmt::Display for Os {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

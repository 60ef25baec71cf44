//! Shell detection and activation script rendering.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shell {
  Bash,
  Zsh,
  Fish,
  PowerShell,
  Sh,
}

impl Shell {
  /// The user's shell from `$SHELL`, or the platform default.
  pub fn detect() -> Self {
    if let Some(shell) = std::env::var_os("SHELL") {
      let name = Path::new(&shell)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("")
        .to_lowercase();
      return name.parse().unwrap_or(Shell::Sh);
    }

    if cfg!(windows) { Shell::PowerShell } else { Shell::Sh }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Shell::Bash => "bash",
      Shell::Zsh => "zsh",
      Shell::Fish => "fish",
      Shell::PowerShell => "powershell",
      Shell::Sh => "sh",
    }
  }

  /// Program to launch for an interactive session.
  pub fn program(&self) -> &'static str {
    match self {
      Shell::PowerShell => "pwsh",
      other => other.as_str(),
    }
  }

  pub fn export_var(&self, name: &str, value: &str) -> String {
    match self {
      Shell::Fish => format!("set -gx {} {}", name, posix_quote(value)),
      Shell::PowerShell => format!("$env:{} = {}", name, powershell_quote(value)),
      Shell::Bash | Shell::Zsh | Shell::Sh => format!("export {}={}", name, posix_quote(value)),
    }
  }

  pub fn comment(&self, text: &str) -> String {
    format!("# {}", text)
  }
}

impl FromStr for Shell {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "bash" => Ok(Shell::Bash),
      "zsh" => Ok(Shell::Zsh),
      "fish" => Ok(Shell::Fish),
      "sh" | "dash" | "ash" => Ok(Shell::Sh),
      "pwsh" | "powershell" | "pwsh.exe" | "powershell.exe" => Ok(Shell::PowerShell),
      other => Err(format!("unsupported shell: {}", other)),
    }
  }
}

impl fmt::Display for Shell {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

// Single quotes suppress every expansion in sh and fish; only the quote
// itself needs escaping.
fn posix_quote(value: &str) -> String {
  format!("'{}'", value.replace('\'', r"'\''"))
}

fn powershell_quote(value: &str) -> String {
  format!("'{}'", value.replace('\'', "''"))
}

//! Command-backed compiler.
//!
//! Runs the toolchain's configured commands in an isolated environment:
//! - Clears all environment variables
//! - Sets PATH to the toolchain's bin directories only
//! - Sets HOME to /homeless-shelter
//! - Sets TMPDIR/TMP/TEMP/TEMPDIR to `tmp` inside the output directory
//! - Sets `out`, `src` and (for package compiles) `deps`
//! - Merges the toolchain's own environment last

use std::collections::BTreeMap;

use tokio::process::Command;
use tracing::{debug, info};

use super::{CompileError, CompileKind, CompileRequest, Compiler};
use crate::manifest::BuildCommands;

/// Trailing stderr lines kept in a failure diagnostic.
const DIAGNOSTIC_LINES: usize = 20;

#[derive(Debug, Clone, Default)]
pub struct CommandCompiler {
  commands: BuildCommands,
  shell: Option<String>,
}

impl CommandCompiler {
  pub fn new(commands: BuildCommands) -> Self {
    Self { commands, shell: None }
  }

  /// Run commands through `shell` instead of the platform default.
  pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
    self.shell = Some(shell.into());
    self
  }

  fn command_for(&self, kind: CompileKind) -> Option<&str> {
    match kind {
      CompileKind::Dependencies => self.commands.dependencies.as_deref(),
      CompileKind::Package => self.commands.package.as_deref(),
    }
  }
}

impl Compiler for CommandCompiler {
  async fn compile(&self, request: CompileRequest<'_>) -> Result<(), CompileError> {
    let Some(cmd) = self.command_for(request.kind) else {
      if request.kind == CompileKind::Dependencies {
        debug!(platform = %request.platform, "no dependency command configured, nothing to compile");
        return Ok(());
      }
      return Err(CompileError::NotConfigured { kind: request.kind });
    };

    info!(kind = %request.kind, platform = %request.platform, cmd = %cmd, "compiling");

    let tmp_dir = request.out_dir.join("tmp");
    tokio::fs::create_dir_all(&tmp_dir).await?;

    let path = request.toolchain.path_value().map_err(std::io::Error::other)?;
    let library_path = std::env::join_paths(request.library_dirs).map_err(std::io::Error::other)?;

    let (shell_cmd, shell_args) = get_shell(self.shell.as_deref());

    let mut command = Command::new(&shell_cmd);
    command
      .args(&shell_args)
      .arg(cmd)
      .current_dir(request.src_dir)
      .env_clear()
      .env("PATH", path)
      .env("HOME", "/homeless-shelter")
      .env("TMPDIR", &tmp_dir)
      .env("TMP", &tmp_dir)
      .env("TEMP", &tmp_dir)
      .env("TEMPDIR", &tmp_dir)
      .env("out", request.out_dir)
      .env("src", request.src_dir)
      .env("LIBRARY_PATH", library_path)
      .env("SHIPYARD_PLATFORM", request.platform.triple())
      .env("SHIPYARD_TOOLCHAIN", request.toolchain.id.to_string())
      .env("SHIPYARD_BUILD_KIND", request.kind.as_str())
      .env("LANG", "C")
      .env("LC_ALL", "C")
      // 1980-01-01, the ZIP epoch.
      .env("SOURCE_DATE_EPOCH", "315532800");

    if let Some(deps) = request.deps_dir {
      command.env("deps", deps);
    }
    merge_env(&mut command, &request.toolchain.env);

    debug!(shell = %shell_cmd, src = %request.src_dir.display(), "spawning compiler");
    let output = command.output().await?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
      debug!(stdout = %stdout.trim(), "compiler stdout");
    }

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      debug!(stderr = %stderr, "compiler stderr");
      return Err(CompileError::Failed {
        diagnostic: diagnostic(output.status.code(), &stderr),
      });
    }

    tokio::fs::remove_dir_all(&tmp_dir).await.ok();
    Ok(())
  }
}

fn merge_env(command: &mut Command, env: &BTreeMap<String, String>) {
  for (key, value) in env {
    command.env(key, value);
  }
}

fn diagnostic(code: Option<i32>, stderr: &str) -> String {
  let status = match code {
    Some(code) => format!("exited with code {}", code),
    None => "terminated by signal".to_string(),
  };

  let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
  if lines.is_empty() {
    return status;
  }
  let tail = &lines[lines.len().saturating_sub(DIAGNOSTIC_LINES)..];
  format!("{}\n{}", status, tail.join("\n"))
}

/// Shell and argument prefix for running a command string.
///
/// The user's `$SHELL` is never used: interactive shells may source profile
/// files that leak host state into the build.
fn get_shell(override_shell: Option<&str>) -> (String, Vec<String>) {
  if let Some(shell) = override_shell {
    let args = if shell.contains("powershell") || shell.contains("pwsh") {
      vec!["-NoProfile".to_string(), "-Command".to_string()]
    } else if shell.contains("cmd") {
      vec!["/C".to_string()]
    } else {
      vec!["-c".to_string()]
    };
    return (shell.to_string(), args);
  }

  #[cfg(unix)]
  {
    ("/bin/sh".to_string(), vec!["-c".to_string()])
  }

  #[cfg(windows)]
  {
    (
      "powershell.exe".to_string(),
      vec![
        "-NoProfile".to_string(),
        "-ExecutionPolicy".to_string(),
        "Bypass".to_string(),
        "-Command".to_string(),
      ],
    )
  }
}

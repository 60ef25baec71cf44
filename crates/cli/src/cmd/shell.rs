//! Implementation of the `yard shell` command.

use std::process::{ExitCode, ExitStatus};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use tracing::debug;

use shipyard_lib::devenv::{Provisioner, Shell};
use shipyard_lib::platform::Platform;
use shipyard_lib::store::lock::LockMode;
use shipyard_lib::toolchain::ToolchainResolver;

use super::GlobalArgs;
use crate::output::emit_json;

fn exit_code(status: ExitStatus) -> ExitCode {
  match status.code() {
    Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
    None => ExitCode::FAILURE,
  }
}

/// Provision the host's development environment, then print it, run a
/// command in it, or spawn an interactive shell in it.
pub fn cmd_shell(args: &GlobalArgs, print: bool, shell: Option<&str>, command: &[String]) -> Result<ExitCode> {
  let project = args.load_project()?;
  let store = args.open_store()?;
  let host = Platform::current().context("Unsupported host platform")?;
  let shell = match shell {
    Some(name) => name.parse::<Shell>().map_err(|e| anyhow!(e))?,
    None => Shell::detect(),
  };

  // Shared keeps gc out. Concurrent shells and builds serialize on the
  // toolchain entry itself while it is materialized.
  let lock = args.lock_store(&store, LockMode::Shared, "shell")?;
  let provisioner = Provisioner::new(Arc::new(ToolchainResolver::new(store)));
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let env = rt
    .block_on(provisioner.provision(&project, host))
    .context("Failed to provision development environment")?;
  // The environment only points into complete entries; builds may proceed.
  drop(lock);

  if args.output.is_json() {
    emit_json(&env)?;
    return Ok(ExitCode::SUCCESS);
  }

  if print {
    print!("{}", env.activation_script(shell));
    return Ok(ExitCode::SUCCESS);
  }

  let (program, rest) = match command.split_first() {
    Some((program, rest)) => (program.as_str(), rest),
    None => (shell.program(), &[][..]),
  };
  debug!(program, platform = %host, "running inside development environment");

  let status = env
    .command(program)
    .args(rest)
    .current_dir(&project.root)
    .status()
    .with_context(|| format!("Failed to run {}", program))?;

  Ok(exit_code(status))
}

mod cmd;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use shipyard_lib::platform::Platform;

use cmd::GlobalArgs;
use output::{Mark, OutputFormat, emit};

/// yard - reproducible builds with a shared dependency cache
#[derive(Parser)]
#[command(name = "yard")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Project directory containing shipyard.json
  #[arg(short = 'C', long, global = true, default_value = ".")]
  project: PathBuf,

  /// Store directory (overrides SHIPYARD_STORE)
  #[arg(long, global = true)]
  store: Option<PathBuf>,

  /// Output format
  #[arg(short, long, global = true, value_enum, default_value_t)]
  output: OutputFormat,

  /// Fail instead of waiting when another yard process holds the store
  #[arg(long, global = true)]
  no_wait: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build the project for every platform in its matrix
  Build {
    /// Only build these platforms (repeatable)
    #[arg(short, long = "platform")]
    platforms: Vec<Platform>,

    /// Maximum number of platforms building at once
    #[arg(short, long)]
    jobs: Option<usize>,
  },

  /// Enter a development shell mirroring the build environment
  Shell {
    /// Print an activation script instead of spawning a shell
    #[arg(long)]
    print: bool,

    /// Shell to spawn or render for (auto-detected if not specified)
    #[arg(long)]
    shell: Option<String>,

    /// Command to run inside the environment
    #[arg(last = true)]
    command: Vec<String>,
  },

  /// Print the dependency fingerprint and per-platform cache keys
  Fingerprint {
    /// Only show these platforms (repeatable)
    #[arg(short, long = "platform")]
    platforms: Vec<Platform>,
  },

  /// Remove store entries no project build references
  Gc {
    /// Show what would be removed without deleting anything
    #[arg(long)]
    dry_run: bool,
  },

  /// Show version, platform, store, and project information
  Info,
}

fn init_tracing(verbose: bool) {
  let default = if verbose { "debug" } else { "warn" };
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

fn main() -> ExitCode {
  let cli = Cli::parse();
  init_tracing(cli.verbose);

  let args = GlobalArgs {
    project: cli.project,
    store: cli.store,
    output: cli.output,
    wait: !cli.no_wait,
  };

  let result = match cli.command {
    Commands::Build { platforms, jobs } => cmd::cmd_build(&args, &platforms, jobs),
    Commands::Shell { print, shell, command } => cmd::cmd_shell(&args, print, shell.as_deref(), &command),
    Commands::Fingerprint { platforms } => cmd::cmd_fingerprint(&args, &platforms).map(|_| ExitCode::SUCCESS),
    Commands::Gc { dry_run } => cmd::cmd_gc(&args, dry_run).map(|_| ExitCode::SUCCESS),
    Commands::Info => cmd::cmd_info(&args).map(|_| ExitCode::SUCCESS),
  };

  match result {
    Ok(code) => code,
    Err(e) => {
      emit(Mark::Failed, &format!("{:#}", e));
      ExitCode::FAILURE
    }
  }
}

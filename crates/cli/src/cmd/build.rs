//! Implementation of the `yard build` command.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;

use shipyard_lib::compile::CommandCompiler;
use shipyard_lib::error::Stage;
use shipyard_lib::matrix::{MatrixEvaluator, MatrixReport, PlatformOutcome};
use shipyard_lib::platform::Platform;
use shipyard_lib::store::lock::LockMode;

use super::GlobalArgs;
use crate::output::{build_verdict, emit, emit_json, platform_line};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlatformSummary<'a> {
  platform: Platform,
  success: bool,
  #[serde(skip_serializing_if = "Option::is_none")]
  path: Option<&'a Path>,
  #[serde(skip_serializing_if = "Option::is_none")]
  cached: Option<bool>,
  #[serde(skip_serializing_if = "Option::is_none")]
  stage: Option<Stage>,
  #[serde(skip_serializing_if = "Option::is_none")]
  error: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BuildSummary<'a> {
  success: bool,
  platforms: Vec<PlatformSummary<'a>>,
  duration_ms: u128,
}

fn summarize(report: &MatrixReport, elapsed: std::time::Duration) -> BuildSummary<'_> {
  let platforms = report
    .outcomes
    .iter()
    .map(|(platform, outcome)| match outcome {
      PlatformOutcome::Built(package) => PlatformSummary {
        platform: *platform,
        success: true,
        path: Some(&package.path),
        cached: Some(package.cache_hit),
        stage: None,
        error: None,
      },
      PlatformOutcome::Failed(e) => PlatformSummary {
        platform: *platform,
        success: false,
        path: None,
        cached: None,
        stage: Some(e.stage()),
        error: Some(e.diagnostic()),
      },
    })
    .collect();

  BuildSummary {
    success: report.is_success(),
    platforms,
    duration_ms: elapsed.as_millis(),
  }
}

/// Build the project's matrix, or the requested subset of it.
///
/// Prints one line per platform and exits non-zero if any platform failed.
pub fn cmd_build(args: &GlobalArgs, platforms: &[Platform], jobs: Option<usize>) -> Result<ExitCode> {
  let start = Instant::now();
  let project = args.load_project()?;
  let store = args.open_store()?;

  let _lock = args.lock_store(&store, LockMode::Exclusive, "build")?;

  let mut evaluator = MatrixEvaluator::new(store);
  if let Some(jobs) = jobs {
    evaluator = evaluator.with_parallelism(jobs);
  }
  let compiler = Arc::new(CommandCompiler::new(project.manifest.toolchain.commands.clone()));

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let report = rt.block_on(evaluator.evaluate(&project, platforms, compiler));

  if args.output.is_json() {
    emit_json(&summarize(&report, start.elapsed()))?;
  } else {
    for (platform, outcome) in &report.outcomes {
      println!("{}", platform_line(*platform, outcome));
    }

    println!();
    let (mark, message) = build_verdict(&report, start.elapsed());
    emit(mark, &message);
  }

  Ok(if report.is_success() {
    ExitCode::SUCCESS
  } else {
    ExitCode::FAILURE
  })
}

//! Implementation of the `yard fingerprint` command.
//!
//! Read-only: computes cache keys without building or materializing anything.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;

use shipyard_lib::deps::{DependencyCache, DependencyFingerprint};
use shipyard_lib::manifest::Project;
use shipyard_lib::matrix::BuildContext;
use shipyard_lib::platform::Platform;
use shipyard_lib::toolchain::ToolchainResolver;
use shipyard_lib::util::hash::Hashable;

use super::GlobalArgs;
use crate::output::{emit_json, field, short};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlatformKey {
  #[serde(skip_serializing_if = "Option::is_none")]
  toolchain: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  dependencies: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  error: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FingerprintReport {
  fingerprint: DependencyFingerprint,
  dependency_count: usize,
  platforms: BTreeMap<Platform, PlatformKey>,
}

async fn platform_key(ctx: &BuildContext, project: &Project) -> PlatformKey {
  let keys = DependencyCache::key_for(ctx, &project.dependencies).await.and_then(|key| {
    let hash = key.compute_hash()?;
    Ok((key.toolchain_id, hash))
  });
  match keys {
    Ok((toolchain, deps)) => PlatformKey {
      toolchain: Some(toolchain.0),
      dependencies: Some(deps.0),
      error: None,
    },
    Err(e) => PlatformKey {
      toolchain: None,
      dependencies: None,
      error: Some(e.to_string()),
    },
  }
}

pub fn cmd_fingerprint(args: &GlobalArgs, platforms: &[Platform]) -> Result<()> {
  let project = args.load_project()?;
  let resolver = Arc::new(ToolchainResolver::new(args.open_store()?));
  let spec = Arc::new(project.manifest.toolchain.clone());

  let targets = if platforms.is_empty() {
    project.platforms().to_vec()
  } else {
    platforms.to_vec()
  };

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let platforms = rt.block_on(async {
    let mut keys = BTreeMap::new();
    for platform in targets {
      let ctx = BuildContext::new(platform, spec.clone(), resolver.clone());
      keys.insert(platform, platform_key(&ctx, &project).await);
    }
    keys
  });

  let report = FingerprintReport {
    fingerprint: DependencyFingerprint::of(&project.dependencies),
    dependency_count: project.dependencies.len(),
    platforms,
  };

  if args.output.is_json() {
    return emit_json(&report);
  }

  println!("{}", report.fingerprint);
  field("Dependencies", &report.dependency_count.to_string());
  for (platform, key) in &report.platforms {
    let value = match (&key.dependencies, &key.toolchain, &key.error) {
      (Some(deps), Some(toolchain), _) => format!("deps {} toolchain {}", deps, short(toolchain)),
      (_, _, Some(error)) => format!("unavailable: {}", error),
      _ => "unknown".to_string(),
    };
    field(&platform.triple(), &value);
  }

  Ok(())
}

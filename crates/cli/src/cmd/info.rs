use std::time::SystemTime;

use anyhow::Result;
use serde::Serialize;

use shipyard_lib::gc;
use shipyard_lib::manifest::{ManifestError, Project};
use shipyard_lib::platform::Platform;

use super::GlobalArgs;
use crate::output::{Mark, emit, emit_json, field};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProjectInfo {
  name: String,
  version: String,
  root: String,
  platforms: Vec<Platform>,
  toolchain: String,
  dependencies: usize,
  #[serde(skip_serializing_if = "Option::is_none")]
  last_build: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Info {
  version: &'static str,
  host: Option<Platform>,
  store: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  project: Option<ProjectInfo>,
  /// Why a manifest that exists could not be loaded.
  #[serde(skip_serializing_if = "Option::is_none")]
  project_error: Option<String>,
}

pub fn cmd_info(args: &GlobalArgs) -> Result<()> {
  let store = args.open_store()?;
  let store_root = dunce::canonicalize(store.root()).unwrap_or_else(|_| store.root().to_path_buf());

  // Outside a project, info still reports the host and store.
  let (project, project_error) = match Project::load(&args.project) {
    Ok(project) => (Some(project), None),
    Err(ManifestError::NotFound(_)) => (None, None),
    Err(e) => (None, Some(e.to_string())),
  };
  let project = project.map(|project| {
    let last_build = std::fs::metadata(gc::root_path(&store, project.name(), &project.root))
      .and_then(|m| m.modified())
      .ok()
      .map(|t: SystemTime| humantime::format_rfc3339_seconds(t).to_string());
    ProjectInfo {
      name: project.manifest.name.clone(),
      version: project.manifest.version.clone(),
      root: project.root.display().to_string(),
      platforms: project.platforms().to_vec(),
      toolchain: format!("{} {}", project.manifest.toolchain.name, project.manifest.toolchain.version),
      dependencies: project.dependencies.len(),
      last_build,
    }
  });

  let info = Info {
    version: env!("CARGO_PKG_VERSION"),
    host: Platform::current(),
    store: store_root.display().to_string(),
    project,
    project_error,
  };

  if args.output.is_json() {
    return emit_json(&info);
  }

  println!("yard {}", info.version);
  field(
    "Platform",
    &info
      .host
      .map(|p| p.triple())
      .unwrap_or_else(|| "unsupported".to_string()),
  );
  field("Store", &info.store);

  if let Some(project) = &info.project {
    println!();
    println!("Project {} {}", project.name, project.version);
    field("Root", &project.root);
    let platforms: Vec<String> = project.platforms.iter().map(|p| p.triple()).collect();
    field("Platforms", &platforms.join(", "));
    field("Toolchain", &project.toolchain);
    field("Dependencies", &project.dependencies.to_string());
    field("Last build", project.last_build.as_deref().unwrap_or("never"));
  }
  if let Some(error) = &info.project_error {
    println!();
    emit(Mark::Warn, &format!("Project at {} could not be loaded: {}", args.project.display(), error));
  }

  Ok(())
}

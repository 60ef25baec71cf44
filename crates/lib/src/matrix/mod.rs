//! Platform matrix evaluation.
//!
//! Every requested platform runs the full pipeline (toolchain, source,
//! dependencies, native libraries, package) as its own task. Tasks share the
//! toolchain, dependency, and package caches, so identical work requested by
//! two platforms or two concurrent evaluations happens once. A failure is
//! recorded against its platform and never stops the others.

mod context;

pub use context::BuildContext;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::compile::Compiler;
use crate::deps::DependencyCache;
use crate::devenv::{LibraryResolver, SearchPathResolver, library_dirs};
use crate::error::{BuildError, Stage};
use crate::gc::{self, GcRoot};
use crate::manifest::Project;
use crate::package::{Package, PackageBuilder};
use crate::platform::Platform;
use crate::source::{FilteredSourceTree, SourceError, SourceFilter};
use crate::store::Store;
use crate::toolchain::{ToolchainError, ToolchainResolver};

/// What happened to one platform.
#[derive(Debug)]
pub enum PlatformOutcome {
  Built(Package),
  Failed(BuildError),
}

impl PlatformOutcome {
  pub fn package(&self) -> Option<&Package> {
    match self {
      PlatformOutcome::Built(package) => Some(package),
      PlatformOutcome::Failed(_) => None,
    }
  }

  pub fn error(&self) -> Option<&BuildError> {
    match self {
      PlatformOutcome::Built(_) => None,
      PlatformOutcome::Failed(e) => Some(e),
    }
  }
}

#[derive(Debug, Default)]
pub struct MatrixReport {
  pub outcomes: BTreeMap<Platform, PlatformOutcome>,
  /// The gc root written for this run, if any platform succeeded.
  pub gc_root: Option<PathBuf>,
}

impl MatrixReport {
  pub fn is_success(&self) -> bool {
    !self.outcomes.is_empty() && self.outcomes.values().all(|o| o.package().is_some())
  }

  pub fn get(&self, platform: &Platform) -> Option<&PlatformOutcome> {
    self.outcomes.get(platform)
  }

  pub fn packages(&self) -> impl Iterator<Item = &Package> {
    self.outcomes.values().filter_map(PlatformOutcome::package)
  }

  pub fn failures(&self) -> impl Iterator<Item = (&Platform, &BuildError)> {
    self
      .outcomes
      .iter()
      .filter_map(|(platform, outcome)| outcome.error().map(|e| (platform, e)))
  }
}

fn default_parallelism() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}

/// Runs builds across a platform matrix.
///
/// Caches live as long as the evaluator: reuse one evaluator for concurrent
/// or repeated evaluations to get in-process single-flight.
pub struct MatrixEvaluator {
  resolver: Arc<ToolchainResolver>,
  dependencies: Arc<DependencyCache>,
  packages: Arc<PackageBuilder>,
  libraries: Arc<dyn LibraryResolver>,
  parallelism: usize,
}

impl MatrixEvaluator {
  pub fn new(store: Store) -> Self {
    Self::with_resolver(Arc::new(ToolchainResolver::new(store)))
  }

  /// Share a toolchain resolver with other users of the same store.
  pub fn with_resolver(resolver: Arc<ToolchainResolver>) -> Self {
    Self {
      resolver,
      dependencies: Arc::new(DependencyCache::new()),
      packages: Arc::new(PackageBuilder::new()),
      libraries: Arc::new(SearchPathResolver::from_env()),
      parallelism: default_parallelism(),
    }
  }

  /// Maximum number of platforms building at once.
  pub fn with_parallelism(mut self, parallelism: usize) -> Self {
    self.parallelism = parallelism.max(1);
    self
  }

  pub fn with_library_resolver(mut self, libraries: Arc<dyn LibraryResolver>) -> Self {
    self.libraries = libraries;
    self
  }

  pub fn store(&self) -> &Store {
    self.resolver.store()
  }

  pub fn resolver(&self) -> &Arc<ToolchainResolver> {
    &self.resolver
  }

  /// Build `project` for each of `platforms`, or for every declared platform
  /// when `platforms` is empty.
  pub async fn evaluate<C: Compiler + 'static>(
    &self,
    project: &Project,
    platforms: &[Platform],
    compiler: Arc<C>,
  ) -> MatrixReport {
    let targets: BTreeSet<Platform> = if platforms.is_empty() {
      project.platforms().iter().copied().collect()
    } else {
      platforms.iter().copied().collect()
    };
    info!(
      project = %project.name(),
      platforms = targets.len(),
      parallelism = self.parallelism,
      "evaluating build matrix"
    );

    // One snapshot of the source for every platform.
    let tree = filter_source(project).await.map(Arc::new);
    if let Ok(tree) = &tree {
      debug!(files = tree.len(), hash = %tree.hash().short(), "source filtered");
    }

    let shared = Arc::new(project.clone());
    let spec = Arc::new(project.manifest.toolchain.clone());
    let semaphore = Arc::new(Semaphore::new(self.parallelism));

    let mut join_set = JoinSet::new();
    let mut running = HashMap::new();

    for platform in targets {
      let stage = StageTracker::default();
      let job = PlatformJob {
        ctx: BuildContext::new(platform, spec.clone(), self.resolver.clone()),
        project: shared.clone(),
        tree: tree.clone(),
        dependencies: self.dependencies.clone(),
        packages: self.packages.clone(),
        libraries: self.libraries.clone(),
        compiler: compiler.clone(),
        stage: stage.clone(),
      };
      let semaphore = semaphore.clone();

      let handle = join_set.spawn(async move {
        // The semaphore is never closed.
        let _permit = semaphore.acquire_owned().await;
        job.run().await
      });
      running.insert(handle.id(), (platform, stage));
    }

    let mut report = MatrixReport::default();
    while let Some(joined) = join_set.join_next().await {
      match joined {
        Ok((platform, Ok(package))) => {
          info!(platform = %platform, key = %package.key_hash, cached = package.cache_hit, "platform built");
          report.outcomes.insert(platform, PlatformOutcome::Built(package));
        }
        Ok((platform, Err(e))) => {
          error!(platform = %platform, stage = %e.stage(), error = %e, "platform failed");
          report.outcomes.insert(platform, PlatformOutcome::Failed(e));
        }
        Err(e) => {
          let Some((platform, stage)) = running.get(&e.id()).map(|(p, s)| (*p, s.current())) else {
            error!(error = %e, "untracked build task failed");
            continue;
          };
          let message = panic_message(e);
          error!(platform = %platform, stage = %stage, error = %message, "build task panicked");
          report.outcomes.insert(
            platform,
            PlatformOutcome::Failed(BuildError::Panicked {
              platform,
              stage,
              message,
            }),
          );
        }
      }
    }

    report.gc_root = self.record_root(project, &report);
    report
  }

  /// Point the project's gc root at what this run built. Runs covering only
  /// part of the matrix add to the existing root instead of replacing it.
  fn record_root(&self, project: &Project, report: &MatrixReport) -> Option<PathBuf> {
    if report.packages().next().is_none() {
      return None;
    }

    let store = self.store();
    let covers_matrix = project
      .platforms()
      .iter()
      .all(|p| report.get(p).and_then(PlatformOutcome::package).is_some());
    let mut root = if covers_matrix {
      GcRoot::new(project.name(), &project.root)
    } else {
      gc::read_root(store, project.name(), &project.root).unwrap_or_else(|| GcRoot::new(project.name(), &project.root))
    };

    for package in report.packages() {
      root.toolchains.insert(package.toolchain_id.0.clone());
      root.dependencies.insert(package.dependencies.0.clone());
      root.packages.insert(package.key_hash.0.clone());
    }

    match gc::write_root(store, &root) {
      Ok(path) => Some(path),
      Err(e) => {
        warn!(error = %e, "failed to record gc root");
        None
      }
    }
  }
}

async fn filter_source(project: &Project) -> Result<FilteredSourceTree, SourceError> {
  let root = project.root.clone();
  let rules = project.manifest.source.ignore.clone();
  tokio::task::spawn_blocking(move || SourceFilter::for_project(&root, &rules)?.filter(&root))
    .await
    .unwrap_or_else(|e| {
      Err(SourceError::Unreadable {
        path: project.root.clone(),
        message: e.to_string(),
      })
    })
}

fn panic_message(e: JoinError) -> String {
  if !e.is_panic() {
    return e.to_string();
  }
  let payload = e.into_panic();
  if let Some(s) = payload.downcast_ref::<&str>() {
    s.to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "unknown panic".to_string()
  }
}

/// The stage a platform task is in, readable after the task has panicked.
#[derive(Debug, Clone)]
struct StageTracker(Arc<Mutex<Stage>>);

impl Default for StageTracker {
  fn default() -> Self {
    Self(Arc::new(Mutex::new(Stage::Toolchain)))
  }
}

impl StageTracker {
  fn enter(&self, stage: Stage) {
    *self.0.lock().unwrap_or_else(PoisonError::into_inner) = stage;
  }

  fn current(&self) -> Stage {
    *self.0.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

struct PlatformJob<C> {
  ctx: BuildContext,
  project: Arc<Project>,
  tree: Result<Arc<FilteredSourceTree>, SourceError>,
  dependencies: Arc<DependencyCache>,
  packages: Arc<PackageBuilder>,
  libraries: Arc<dyn LibraryResolver>,
  compiler: Arc<C>,
  stage: StageTracker,
}

impl<C: Compiler> PlatformJob<C> {
  async fn run(self) -> (Platform, Result<Package, BuildError>) {
    (self.ctx.platform, self.build().await)
  }

  async fn build(&self) -> Result<Package, BuildError> {
    let platform = self.ctx.platform;
    self.stage.enter(Stage::Toolchain);
    if !self.project.declares(&platform) {
      return Err(
        ToolchainError::Unavailable {
          toolchain: format!("{} {}", self.ctx.toolchain.name, self.ctx.toolchain.version),
          platform,
        }
        .into(),
      );
    }

    self.ctx.resolve_toolchain().await?;
    self.stage.enter(Stage::Source);
    let tree = self.tree.clone()?;

    self.stage.enter(Stage::Dependencies);
    let deps = self
      .dependencies
      .get_or_build(&self.ctx, &self.project.dependencies, self.compiler.as_ref())
      .await?;

    self.stage.enter(Stage::NativeLibraries);
    let library_dirs = self.native_library_dirs()?;

    self.stage.enter(Stage::Package);
    let package = self
      .packages
      .build(&self.ctx, &self.project, &tree, &deps, &library_dirs, self.compiler.as_ref())
      .await?;
    Ok(package)
  }

  fn native_library_dirs(&self) -> Result<Vec<PathBuf>, BuildError> {
    let platform = self.ctx.platform;
    let libraries = &self.project.manifest.native_libraries;
    let (dirs, missing) = library_dirs(self.libraries.as_ref(), libraries, platform);

    for name in missing {
      if libraries.iter().any(|lib| lib.name == name && lib.required) {
        return Err(BuildError::NativeLibraryMissing { name, platform });
      }
      debug!(library = %name, platform = %platform, "optional native library not found");
    }
    Ok(dirs)
  }
}

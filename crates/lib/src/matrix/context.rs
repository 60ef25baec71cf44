use std::sync::Arc;

use tokio::sync::OnceCell;

use crate::manifest::ToolchainSpec;
use crate::platform::Platform;
use crate::store::Store;
use crate::toolchain::{Toolchain, ToolchainError, ToolchainIdentity, ToolchainResolver};
use crate::util::hash::ObjectHash;

/// Everything one platform's build needs besides the project itself: the
/// target platform, the pinned toolchain, and the cache it resolves into.
///
/// The toolchain identity is computed on first use and shared by clones.
#[derive(Debug, Clone)]
pub struct BuildContext {
  pub platform: Platform,
  pub toolchain: Arc<ToolchainSpec>,
  pub store: Store,
  resolver: Arc<ToolchainResolver>,
  identity: Arc<OnceCell<ToolchainIdentity>>,
}

impl BuildContext {
  pub fn new(platform: Platform, toolchain: Arc<ToolchainSpec>, resolver: Arc<ToolchainResolver>) -> Self {
    Self {
      platform,
      toolchain,
      store: resolver.store().clone(),
      resolver,
      identity: Arc::new(OnceCell::new()),
    }
  }

  pub fn resolver(&self) -> &Arc<ToolchainResolver> {
    &self.resolver
  }

  pub async fn toolchain_identity(&self) -> Result<&ToolchainIdentity, ToolchainError> {
    self
      .identity
      .get_or_try_init(|| ToolchainResolver::identify_async(self.toolchain.clone(), self.platform))
      .await
  }

  /// The toolchain id for this platform. Nothing is materialized.
  pub async fn toolchain_id(&self) -> Result<ObjectHash, ToolchainError> {
    Ok(self.toolchain_identity().await?.id.clone())
  }

  pub async fn resolve_toolchain(&self) -> Result<Arc<Toolchain>, ToolchainError> {
    let identity = self.toolchain_identity().await?;
    self
      .resolver
      .resolve_identified(&self.toolchain, self.platform, identity)
      .await
  }
}

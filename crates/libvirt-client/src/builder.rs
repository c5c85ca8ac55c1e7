//! Client construction
//!
//! Callers build one client per operation through a [`ClientBuilder`], so
//! tests can hand out a shared mock instead of connecting to a hypervisor.

use std::path::PathBuf;
use std::sync::Arc;

use crate::error::LibvirtError;
use crate::libvirt_trait::LibvirtClientTrait;
use crate::virsh::{DEFAULT_VIRSH, VirshClient};

/// Builds a connected client for a URI and storage pool
#[async_trait::async_trait]
pub trait ClientBuilder: Send + Sync {
    /// Connect to `uri`; a non-empty `pool` must exist
    async fn build(&self, uri: &str, pool: &str) -> Result<Arc<dyn LibvirtClientTrait>, LibvirtError>;
}

/// Builds [`VirshClient`]s
#[derive(Debug, Clone)]
pub struct VirshClientBuilder {
    virsh: PathBuf,
}

impl VirshClientBuilder {
    /// Builder using `virsh` from `PATH`
    pub fn new() -> Self {
        Self {
            virsh: PathBuf::from(DEFAULT_VIRSH),
        }
    }

    /// Builder using a specific virsh binary
    pub fn with_binary(virsh: impl Into<PathBuf>) -> Self {
        Self { virsh: virsh.into() }
    }
}

impl Default for VirshClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ClientBuilder for VirshClientBuilder {
    async fn build(&self, uri: &str, pool: &str) -> Result<Arc<dyn LibvirtClientTrait>, LibvirtError> {
        let client = VirshClient::connect(uri, pool, self.virsh.clone()).await?;
        Ok(Arc::new(client))
    }
}

/// Hands out clones of one mock client and records the requested URIs
#[cfg(feature = "test-util")]
#[derive(Clone)]
pub struct MockClientBuilder {
    client: crate::mock::MockLibvirtClient,
    builds: Arc<std::sync::Mutex<Vec<(String, String)>>>,
}

#[cfg(feature = "test-util")]
impl MockClientBuilder {
    /// Builder returning `client` for every build
    pub fn new(client: crate::mock::MockLibvirtClient) -> Self {
        Self {
            client,
            builds: Arc::default(),
        }
    }

    /// `(uri, pool)` of every build so far
    pub fn builds(&self) -> Vec<(String, String)> {
        self.builds
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[cfg(feature = "test-util")]
#[async_trait::async_trait]
impl ClientBuilder for MockClientBuilder {
    async fn build(&self, uri: &str, pool: &str) -> Result<Arc<dyn LibvirtClientTrait>, LibvirtError> {
        self.builds
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((uri.to_string(), pool.to_string()));
        if !pool.is_empty() {
            self.client.lookup_pool(pool).await.map_err(|e| {
                LibvirtError::NotFound(format!("can't find storage pool {pool:?}: {e}"))
            })?;
        }
        Ok(Arc::new(self.client.clone()))
    }
}

//! Identity Resolver
//!
//! Resolves this node's service provider id from the registry and caches
//! it. Registration can lag node deployment, so an unregistered endpoint
//! is an expected state: the cycle skips its work and the next cycle
//! retries the lookup until registration lands.

use tokio::sync::RwLock;
use tracing::info;

use crate::error::{Error, Result};
use crate::network::RegistryClient;
use crate::replication::NodeIdentity;
use std::sync::Arc;

/// Resolves and caches this node's registry identity
pub struct IdentityResolver {
    registry: Arc<dyn RegistryClient>,
    /// This node's own endpoint
    endpoint: String,
    /// Operator-configured id; 0 means unknown, resolve via registry
    configured_id: u64,
    cache: RwLock<Option<NodeIdentity>>,
}

impl IdentityResolver {
    pub fn new(registry: Arc<dyn RegistryClient>, endpoint: String, configured_id: u64) -> Self {
        Self {
            registry,
            endpoint,
            configured_id,
            cache: RwLock::new(None),
        }
    }

    /// Resolve this node's identity, serving from cache once a valid id
    /// is known. Returns `Unregistered` when the registry reports id 0;
    /// nothing is cached in that case so the next call retries.
    pub async fn resolve(&self) -> Result<NodeIdentity> {
        if let Some(identity) = self.cache.read().await.clone() {
            return Ok(identity);
        }

        if self.configured_id != 0 {
            let identity = NodeIdentity {
                service_provider_id: self.configured_id,
                endpoint: self.endpoint.clone(),
            };
            info!(
                "Using configured service provider id {} for {}",
                identity.service_provider_id, identity.endpoint
            );
            *self.cache.write().await = Some(identity.clone());
            return Ok(identity);
        }

        let id = self.registry.service_provider_id(&self.endpoint).await?;
        if id == 0 {
            return Err(Error::Unregistered(self.endpoint.clone()));
        }

        let identity = NodeIdentity {
            service_provider_id: id,
            endpoint: self.endpoint.clone(),
        };
        info!(
            "Recovered service provider id {} for {}",
            id, self.endpoint
        );
        *self.cache.write().await = Some(identity.clone());
        Ok(identity)
    }

    /// The cached identity, if one has been resolved
    pub async fn cached(&self) -> Option<NodeIdentity> {
        self.cache.read().await.clone()
    }
}

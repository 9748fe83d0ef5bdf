//! Network Module
//!
//! HTTP clients for the three external collaborators of the replication
//! state machine: discovery providers (which users does this node serve),
//! the service registry (is this node registered), and peer storage nodes
//! (clock status, sync issuance, sync progress).

use std::collections::HashMap;

use crate::error::Result;
use crate::replication::{RegisteredUser, SyncType};

mod discovery;
mod peer;
mod registry;

pub use discovery::HttpDiscoveryClient;
pub use peer::HttpPeerClient;
pub use registry::HttpRegistryClient;

/// Client for discovery providers, which index the user-to-node mapping
#[async_trait::async_trait]
pub trait DiscoveryClient: Send + Sync {
    /// The currently selected provider endpoint, if any is healthy
    async fn current_endpoint(&self) -> Option<String>;

    /// Fetch all users whose primary is the given node endpoint
    async fn primary_users(&self, node_endpoint: &str) -> Result<Vec<RegisteredUser>>;
}

/// Client for the service registry, the authority on node registration
#[async_trait::async_trait]
pub trait RegistryClient: Send + Sync {
    /// Resolve the service provider id registered for an endpoint.
    /// An id of 0 means the endpoint is not registered.
    async fn service_provider_id(&self, endpoint: &str) -> Result<u64>;
}

/// Client for peer storage nodes
#[async_trait::async_trait]
pub trait PeerClient: Send + Sync {
    /// Fetch the clock values a peer holds for a batch of wallets.
    /// Wallets the peer has no record for are absent from the result.
    async fn batch_clock_status(
        &self,
        endpoint: &str,
        wallets: &[String],
    ) -> Result<HashMap<String, u64>>;

    /// Ask a secondary to sync a wallet's content from its primary
    async fn request_sync(
        &self,
        secondary: &str,
        wallet: &str,
        primary: &str,
        sync_type: SyncType,
    ) -> Result<()>;

    /// Poll the clock value a secondary currently reports for a wallet
    async fn sync_status(&self, secondary: &str, wallet: &str) -> Result<u64>;
}

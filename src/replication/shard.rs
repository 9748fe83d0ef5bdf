//! Shard Selector
//!
//! Narrows this node's primary users down to the modulo slice owned by
//! the current cycle. Spreading users across `modulo_base` slices keeps
//! each cycle's fan-out bounded and spreads sync load over time.

use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::network::DiscoveryClient;
use crate::replication::RegisteredUser;

/// Selects the users to process in one cycle
pub struct ShardSelector {
    discovery: Arc<dyn DiscoveryClient>,
    modulo_base: u64,
}

impl ShardSelector {
    pub fn new(discovery: Arc<dyn DiscoveryClient>, modulo_base: u64) -> Self {
        Self {
            discovery,
            modulo_base,
        }
    }

    /// Whether a user's id falls in the given slice
    pub fn in_slice(&self, user: &RegisteredUser, slice: u64) -> bool {
        user.user_id % self.modulo_base == slice
    }

    /// Fetch this node's primary users and keep only the current slice
    pub async fn select(&self, node_endpoint: &str, slice: u64) -> Result<Vec<RegisteredUser>> {
        let users = self.discovery.primary_users(node_endpoint).await?;
        let total = users.len();
        let selected: Vec<RegisteredUser> = users
            .into_iter()
            .filter(|user| self.in_slice(user, slice))
            .collect();
        debug!(
            "Slice {}/{} holds {} of {} primary users",
            slice,
            self.modulo_base,
            selected.len(),
            total
        );
        Ok(selected)
    }
}

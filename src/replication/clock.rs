//! Clock Comparator
//!
//! Decides which secondaries are stale. Takes this node's clock values
//! for the slice's wallets plus batched clock reports from every assigned
//! secondary, then emits one decision per (user, secondary) pair. All
//! comparison work for a slice finishes before anything is dispatched, so
//! each cycle acts on one consistent snapshot.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::network::PeerClient;
use crate::replication::RegisteredUser;
use crate::state::ClockStore;

/// Outcome of comparing one user's primary clock against one secondary
#[derive(Debug, Clone)]
pub struct SyncDecision {
    pub user_wallet: String,
    pub primary_endpoint: String,
    pub secondary_endpoint: String,
    /// This node's clock for the wallet at comparison time
    pub primary_clock: u64,
    /// What the secondary reported; `None` when it has no record
    pub secondary_clock: Option<u64>,
}

impl SyncDecision {
    /// A secondary needs a sync when it reports no clock at all or one
    /// strictly behind the primary's. Equal clocks never sync.
    pub fn needs_sync(&self) -> bool {
        match self.secondary_clock {
            None => true,
            Some(clock) => self.primary_clock > clock,
        }
    }
}

/// Compares primary and secondary clock values for a slice of users
pub struct ClockComparator {
    peers: Arc<dyn PeerClient>,
    clocks: Arc<dyn ClockStore>,
}

impl ClockComparator {
    pub fn new(peers: Arc<dyn PeerClient>, clocks: Arc<dyn ClockStore>) -> Self {
        Self { peers, clocks }
    }

    /// Produce a decision for every (user, assigned secondary) pair in
    /// the slice. Secondaries whose clock query fails are excluded from
    /// this cycle's decisions; the failure touches nothing else.
    pub async fn compare(
        &self,
        users: &[RegisteredUser],
        self_endpoint: &str,
    ) -> Result<Vec<SyncDecision>> {
        // Group wallets by secondary so each node is queried once
        let mut wallets_by_node: HashMap<String, Vec<String>> = HashMap::new();
        let mut wallets = Vec::with_capacity(users.len());
        for user in users {
            wallets.push(user.wallet.clone());
            for secondary in user.secondaries() {
                wallets_by_node
                    .entry(secondary.to_string())
                    .or_default()
                    .push(user.wallet.clone());
            }
        }

        let primary_clocks = self.clocks.clock_values(&wallets).await?;

        // Query every secondary in parallel; one failed node drops only
        // its own wallets from this cycle
        let queries = wallets_by_node.into_iter().map(|(node, node_wallets)| {
            let peers = self.peers.clone();
            async move {
                debug!("Requesting {} clock values from {}", node_wallets.len(), node);
                let result = peers.batch_clock_status(&node, &node_wallets).await;
                (node, result)
            }
        });

        let mut clocks_by_node: HashMap<String, HashMap<String, u64>> = HashMap::new();
        for (node, result) in futures::future::join_all(queries).await {
            match result {
                Ok(clocks) => {
                    clocks_by_node.insert(node, clocks);
                }
                Err(e) => {
                    warn!(
                        "Clock query to {} failed, excluding its wallets this cycle: {}",
                        node, e
                    );
                }
            }
        }

        let mut decisions = Vec::new();
        for user in users {
            // A wallet this node has no clock row for yet compares as 0
            let primary_clock = primary_clocks.get(&user.wallet).copied().unwrap_or(0);
            let replica_set = user.replica_set(self_endpoint);
            for secondary in &replica_set.secondaries {
                let node_clocks = match clocks_by_node.get(secondary) {
                    Some(clocks) => clocks,
                    None => continue,
                };
                decisions.push(SyncDecision {
                    user_wallet: user.wallet.clone(),
                    primary_endpoint: replica_set.primary.clone(),
                    secondary_endpoint: secondary.clone(),
                    primary_clock,
                    secondary_clock: node_clocks.get(&user.wallet).copied(),
                });
            }
        }

        Ok(decisions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replication::testing::MockPeers;
    use crate::state::StateStore;
    use tempfile::tempdir;

    const SELF: &str = "https://cn1.example.com";
    const CN2: &str = "https://cn2.example.com";
    const CN3: &str = "https://cn3.example.com";

    fn user(user_id: u64, wallet: &str, s1: Option<&str>, s2: Option<&str>) -> RegisteredUser {
        RegisteredUser {
            user_id,
            wallet: wallet.to_string(),
            secondary1: s1.map(String::from),
            secondary2: s2.map(String::from),
        }
    }

    async fn store_with_clocks(clocks: &[(&str, u64)]) -> (tempfile::TempDir, Arc<StateStore>) {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path().to_path_buf()).unwrap();
        for (wallet, clock) in clocks {
            store.set_clock_value(wallet, *clock).await.unwrap();
        }
        (dir, Arc::new(store))
    }

    #[tokio::test]
    async fn test_equal_clocks_never_sync() {
        let (_dir, store) = store_with_clocks(&[("0xa", 42)]).await;
        let peers = Arc::new(MockPeers::default());
        peers.set_clock(CN2, "0xa", 42);

        let comparator = ClockComparator::new(peers, store);
        let decisions = comparator
            .compare(&[user(1, "0xa", Some(CN2), None)], SELF)
            .await
            .unwrap();

        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].secondary_clock, Some(42));
        assert!(!decisions[0].needs_sync());
    }

    #[tokio::test]
    async fn test_missing_secondary_clock_needs_sync() {
        let (_dir, store) = store_with_clocks(&[("0xa", 42)]).await;
        let peers = Arc::new(MockPeers::default());
        // CN2 responds but has no record for the wallet
        peers.clocks.lock().unwrap().insert(CN2.to_string(), HashMap::new());

        let comparator = ClockComparator::new(peers, store);
        let decisions = comparator
            .compare(&[user(1, "0xa", Some(CN2), None)], SELF)
            .await
            .unwrap();

        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].secondary_clock, None);
        assert!(decisions[0].needs_sync());
    }

    #[tokio::test]
    async fn test_stale_and_ahead_secondaries() {
        let (_dir, store) = store_with_clocks(&[("0xa", 42)]).await;
        let peers = Arc::new(MockPeers::default());
        peers.set_clock(CN2, "0xa", 17);
        peers.set_clock(CN3, "0xa", 50);

        let comparator = ClockComparator::new(peers, store);
        let decisions = comparator
            .compare(&[user(1, "0xa", Some(CN2), Some(CN3))], SELF)
            .await
            .unwrap();

        assert_eq!(decisions.len(), 2);
        let stale = decisions
            .iter()
            .find(|d| d.secondary_endpoint == CN2)
            .unwrap();
        let ahead = decisions
            .iter()
            .find(|d| d.secondary_endpoint == CN3)
            .unwrap();
        assert!(stale.needs_sync());
        assert!(!ahead.needs_sync());
        assert_eq!(stale.primary_endpoint, SELF);
    }

    #[tokio::test]
    async fn test_failed_node_excluded_others_kept() {
        let (_dir, store) = store_with_clocks(&[("0xa", 42), ("0xb", 7)]).await;
        let peers = Arc::new(MockPeers::default());
        peers.set_clock(CN3, "0xb", 3);
        peers.fail_endpoint(CN2);

        let comparator = ClockComparator::new(peers, store);
        let decisions = comparator
            .compare(
                &[
                    user(1, "0xa", Some(CN2), None),
                    user(2, "0xb", Some(CN3), None),
                ],
                SELF,
            )
            .await
            .unwrap();

        // The failed node contributes no decisions; the healthy one does
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].secondary_endpoint, CN3);
        assert!(decisions[0].needs_sync());
    }

    #[tokio::test]
    async fn test_unknown_primary_wallet_compares_as_zero() {
        let (_dir, store) = store_with_clocks(&[]).await;
        let peers = Arc::new(MockPeers::default());
        peers.set_clock(CN2, "0xa", 5);

        let comparator = ClockComparator::new(peers, store);
        let decisions = comparator
            .compare(&[user(1, "0xa", Some(CN2), None)], SELF)
            .await
            .unwrap();

        assert_eq!(decisions[0].primary_clock, 0);
        assert!(!decisions[0].needs_sync());
    }
}

//! Replication Module
//!
//! The replication state machine. Keeps every secondary of every user this
//! node serves as primary converged with the primary's content, one modulo
//! slice of users per cycle: resolve identity, select the slice, compare
//! clock values, dispatch sync jobs, advance the slice, reschedule.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::queue::SyncPriority;

mod clock;
mod cycle;
mod dispatch;
mod identity;
mod monitor;
mod shard;

pub use clock::{ClockComparator, SyncDecision};
pub use cycle::{seed_cycle_queue, CycleHandler, CycleOrchestrator, CycleReport};
pub use dispatch::{SyncDispatcher, SyncJobHandler};
pub use identity::IdentityResolver;
pub use monitor::{MonitorOutcome, SyncMonitor};
pub use shard::ShardSelector;

/// Whether a sync was scheduled by the recurring cycle or requested by an
/// operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncType {
    Recurring,
    Manual,
}

impl SyncType {
    /// Wire representation sent to secondaries
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncType::Recurring => "RECURRING",
            SyncType::Manual => "MANUAL",
        }
    }

    /// The queue priority this sync type carries. Manual syncs always run
    /// ahead of recurring ones.
    pub fn priority(&self) -> SyncPriority {
        match self {
            SyncType::Manual => SyncPriority::High,
            SyncType::Recurring => SyncPriority::Low,
        }
    }
}

impl fmt::Display for SyncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// This node's resolved registry identity
#[derive(Debug, Clone, Serialize)]
pub struct NodeIdentity {
    pub service_provider_id: u64,
    pub endpoint: String,
}

impl NodeIdentity {
    /// Whether the registry recognizes this node. An id of 0 means the
    /// endpoint is not registered.
    pub fn is_registered(&self) -> bool {
        self.service_provider_id != 0
    }
}

/// A user listing from a discovery provider. The queried node is the
/// user's primary; secondary slots may not be assigned yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredUser {
    pub user_id: u64,
    pub wallet: String,
    #[serde(default)]
    pub secondary1: Option<String>,
    #[serde(default)]
    pub secondary2: Option<String>,
}

impl RegisteredUser {
    /// Assigned secondaries in slot order, skipping empty slots
    pub fn secondaries(&self) -> impl Iterator<Item = &str> {
        self.secondary1
            .as_deref()
            .into_iter()
            .chain(self.secondary2.as_deref())
            .filter(|s| !s.is_empty())
    }

    /// The user's replica assignment as seen from its primary
    pub fn replica_set(&self, primary: &str) -> ReplicaSet {
        ReplicaSet {
            primary: primary.to_string(),
            secondaries: self.secondaries().map(String::from).collect(),
        }
    }
}

/// A user's replica assignment: one primary, up to two secondaries
#[derive(Debug, Clone, Serialize)]
pub struct ReplicaSet {
    pub primary: String,
    pub secondaries: Vec<String>,
}

/// A unit of sync work: replicate one wallet's content from its primary
/// to one secondary. Serialized as the sync queue's job payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
    pub user_wallet: String,
    pub primary_endpoint: String,
    pub secondary_endpoint: String,
    /// Primary clock at decision time; the convergence target monitored
    /// after the sync request is issued
    pub primary_clock_snapshot: u64,
    pub sync_type: SyncType,
    pub enqueued_at: DateTime<Utc>,
}

impl SyncJob {
    pub fn priority(&self) -> SyncPriority {
        self.sync_type.priority()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_type_priority() {
        assert_eq!(SyncType::Manual.priority(), SyncPriority::High);
        assert_eq!(SyncType::Recurring.priority(), SyncPriority::Low);
    }

    #[test]
    fn test_sync_type_wire_format() {
        assert_eq!(SyncType::Recurring.as_str(), "RECURRING");
        assert_eq!(SyncType::Manual.as_str(), "MANUAL");
        assert_eq!(
            serde_json::to_string(&SyncType::Manual).unwrap(),
            "\"MANUAL\""
        );
    }

    #[test]
    fn test_secondaries_skip_unassigned_slots() {
        let user = RegisteredUser {
            user_id: 7,
            wallet: "0xabc".to_string(),
            secondary1: None,
            secondary2: Some("https://cn3.example.com".to_string()),
        };
        let secondaries: Vec<&str> = user.secondaries().collect();
        assert_eq!(secondaries, vec!["https://cn3.example.com"]);

        let user = RegisteredUser {
            user_id: 8,
            wallet: "0xdef".to_string(),
            secondary1: Some("".to_string()),
            secondary2: None,
        };
        assert_eq!(user.secondaries().count(), 0);
    }

    #[test]
    fn test_replica_set_view() {
        let user = RegisteredUser {
            user_id: 1,
            wallet: "0xabc".to_string(),
            secondary1: Some("https://cn2.example.com".to_string()),
            secondary2: Some("https://cn3.example.com".to_string()),
        };
        let replica_set = user.replica_set("https://cn1.example.com");
        assert_eq!(replica_set.primary, "https://cn1.example.com");
        assert_eq!(
            replica_set.secondaries,
            vec!["https://cn2.example.com", "https://cn3.example.com"]
        );
    }

    #[test]
    fn test_sync_job_payload_round_trip() {
        let job = SyncJob {
            user_wallet: "0xabc".to_string(),
            primary_endpoint: "https://cn1.example.com".to_string(),
            secondary_endpoint: "https://cn2.example.com".to_string(),
            primary_clock_snapshot: 42,
            sync_type: SyncType::Manual,
            enqueued_at: Utc::now(),
        };
        let payload = serde_json::to_string(&job).unwrap();
        let decoded: SyncJob = serde_json::from_str(&payload).unwrap();
        assert_eq!(decoded.user_wallet, job.user_wallet);
        assert_eq!(decoded.primary_clock_snapshot, 42);
        assert_eq!(decoded.sync_type, SyncType::Manual);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared stand-ins for the network collaborators, used by the
    //! replication component tests.

    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    use super::{RegisteredUser, SyncType};
    use crate::error::{Error, Result};
    use crate::network::{DiscoveryClient, PeerClient, RegistryClient};

    pub(crate) struct MockRegistry {
        pub id: u64,
        pub calls: AtomicU64,
    }

    impl MockRegistry {
        pub fn new(id: u64) -> Self {
            Self {
                id,
                calls: AtomicU64::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl RegistryClient for MockRegistry {
        async fn service_provider_id(&self, _endpoint: &str) -> Result<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.id)
        }
    }

    pub(crate) struct MockDiscovery {
        pub users: Vec<RegisteredUser>,
        pub available: bool,
    }

    impl MockDiscovery {
        pub fn new(users: Vec<RegisteredUser>) -> Self {
            Self {
                users,
                available: true,
            }
        }

        pub fn unavailable() -> Self {
            Self {
                users: Vec::new(),
                available: false,
            }
        }
    }

    #[async_trait::async_trait]
    impl DiscoveryClient for MockDiscovery {
        async fn current_endpoint(&self) -> Option<String> {
            if self.available {
                Some("https://dp1.example.com".to_string())
            } else {
                None
            }
        }

        async fn primary_users(&self, _node_endpoint: &str) -> Result<Vec<RegisteredUser>> {
            if !self.available {
                return Err(Error::DiscoveryUnavailable);
            }
            Ok(self.users.clone())
        }
    }

    #[derive(Default)]
    pub(crate) struct MockPeers {
        /// Per-endpoint wallet clocks served by batch_clock_status
        pub clocks: Mutex<HashMap<String, HashMap<String, u64>>>,
        /// Endpoints whose batch queries fail
        pub fail_batch: Mutex<HashSet<String>>,
        /// Recorded request_sync calls: (secondary, wallet, primary, type)
        pub sync_requests: Mutex<Vec<(String, String, String, SyncType)>>,
        /// Clock served by sync_status, per endpoint
        pub status_clock: Mutex<HashMap<String, u64>>,
    }

    impl MockPeers {
        pub fn set_clock(&self, endpoint: &str, wallet: &str, clock: u64) {
            self.clocks
                .lock()
                .unwrap()
                .entry(endpoint.to_string())
                .or_default()
                .insert(wallet.to_string(), clock);
        }

        pub fn fail_endpoint(&self, endpoint: &str) {
            self.fail_batch.lock().unwrap().insert(endpoint.to_string());
        }
    }

    #[async_trait::async_trait]
    impl PeerClient for MockPeers {
        async fn batch_clock_status(
            &self,
            endpoint: &str,
            wallets: &[String],
        ) -> Result<HashMap<String, u64>> {
            if self.fail_batch.lock().unwrap().contains(endpoint) {
                return Err(Error::Network(format!("{} unreachable", endpoint)));
            }
            let clocks = self.clocks.lock().unwrap();
            let node_clocks = clocks.get(endpoint).cloned().unwrap_or_default();
            Ok(wallets
                .iter()
                .filter_map(|w| node_clocks.get(w).map(|c| (w.clone(), *c)))
                .collect())
        }

        async fn request_sync(
            &self,
            secondary: &str,
            wallet: &str,
            primary: &str,
            sync_type: SyncType,
        ) -> Result<()> {
            self.sync_requests.lock().unwrap().push((
                secondary.to_string(),
                wallet.to_string(),
                primary.to_string(),
                sync_type,
            ));
            Ok(())
        }

        async fn sync_status(&self, secondary: &str, _wallet: &str) -> Result<u64> {
            self.status_clock
                .lock()
                .unwrap()
                .get(secondary)
                .copied()
                .ok_or_else(|| Error::Network(format!("{} unreachable", secondary)))
        }
    }
}

//! Sync Dispatcher
//!
//! Turns sync decisions into durable queue jobs and executes them.
//! Cycle-driven syncs enqueue at low priority; operator-requested ones at
//! high priority, so a manual sync never waits behind the recurring
//! backlog. Executing a job means one sync request to the secondary
//! followed by monitoring until convergence or timeout.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Result;
use crate::network::PeerClient;
use crate::queue::{JobHandler, JobRecord, QueueName};
use crate::replication::{SyncDecision, SyncJob, SyncMonitor, SyncType};
use crate::state::StateStore;

/// Creates sync jobs on the durable sync queue
#[derive(Clone)]
pub struct SyncDispatcher {
    store: Arc<StateStore>,
    /// This node's own endpoint, the primary for every dispatched sync
    self_endpoint: String,
}

impl SyncDispatcher {
    pub fn new(store: Arc<StateStore>, self_endpoint: String) -> Self {
        Self {
            store,
            self_endpoint,
        }
    }

    /// Enqueue a recurring sync decided by the cycle
    pub async fn dispatch_recurring(&self, decision: &SyncDecision) -> Result<i64> {
        self.enqueue_job(
            &decision.user_wallet,
            &decision.primary_endpoint,
            &decision.secondary_endpoint,
            decision.primary_clock,
            SyncType::Recurring,
        )
        .await
    }

    /// Enqueue an operator-requested sync. The primary clock is
    /// snapshotted at enqueue time; a wallet with no clock row yet
    /// snapshots 0.
    pub async fn dispatch_manual(&self, wallet: &str, secondary_endpoint: &str) -> Result<i64> {
        let snapshot = self.store.clock_value(wallet).await?.unwrap_or(0);
        let primary = self.self_endpoint.clone();
        self.enqueue_job(wallet, &primary, secondary_endpoint, snapshot, SyncType::Manual)
            .await
    }

    async fn enqueue_job(
        &self,
        wallet: &str,
        primary: &str,
        secondary: &str,
        snapshot: u64,
        sync_type: SyncType,
    ) -> Result<i64> {
        let job = SyncJob {
            user_wallet: wallet.to_string(),
            primary_endpoint: primary.to_string(),
            secondary_endpoint: secondary.to_string(),
            primary_clock_snapshot: snapshot,
            sync_type,
            enqueued_at: Utc::now(),
        };
        let payload = serde_json::to_string(&job)?;
        let id = self
            .store
            .enqueue(QueueName::Sync, sync_type.priority(), payload)
            .await?;
        info!(
            "Enqueued {} sync job {} for {} -> {} (snapshot {})",
            sync_type, id, wallet, secondary, snapshot
        );
        Ok(id)
    }
}

/// Executes sync jobs from the sync queue
pub struct SyncJobHandler {
    peers: Arc<dyn PeerClient>,
    monitor: SyncMonitor,
    shutdown: CancellationToken,
}

impl SyncJobHandler {
    pub fn new(peers: Arc<dyn PeerClient>, monitor: SyncMonitor, shutdown: CancellationToken) -> Self {
        Self {
            peers,
            monitor,
            shutdown,
        }
    }
}

#[async_trait::async_trait]
impl JobHandler for SyncJobHandler {
    async fn process(&self, record: JobRecord) -> Result<()> {
        let job: SyncJob = record.decode()?;
        info!(
            "Processing {} sync | user {} | target {} | job {}",
            job.sync_type, job.user_wallet, job.secondary_endpoint, record.id
        );

        // A rejected or unreachable sync request fails the job; a later
        // cycle re-detects the stale secondary
        self.peers
            .request_sync(
                &job.secondary_endpoint,
                &job.user_wallet,
                &job.primary_endpoint,
                job.sync_type,
            )
            .await?;

        let outcome = self
            .monitor
            .monitor_sync(
                &job.user_wallet,
                job.primary_clock_snapshot,
                &job.secondary_endpoint,
                &self.shutdown,
            )
            .await;

        if outcome.converged {
            info!(
                "Sync for {} on {} converged in {}ms",
                job.user_wallet,
                job.secondary_endpoint,
                outcome.elapsed.as_millis()
            );
        } else {
            warn!(
                "Sync for {} on {} did not converge within {}ms",
                job.user_wallet,
                job.secondary_endpoint,
                outcome.elapsed.as_millis()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{JobState, SyncPriority};
    use crate::replication::testing::MockPeers;
    use std::time::Duration;
    use tempfile::tempdir;

    const SELF: &str = "https://cn1.example.com";
    const CN2: &str = "https://cn2.example.com";

    #[tokio::test]
    async fn test_recurring_dispatch_is_low_priority() {
        let dir = tempdir().unwrap();
        let store = Arc::new(StateStore::open(dir.path().to_path_buf()).unwrap());
        let dispatcher = SyncDispatcher::new(store.clone(), SELF.to_string());

        let decision = SyncDecision {
            user_wallet: "0xa".to_string(),
            primary_endpoint: SELF.to_string(),
            secondary_endpoint: CN2.to_string(),
            primary_clock: 42,
            secondary_clock: None,
        };
        dispatcher.dispatch_recurring(&decision).await.unwrap();

        let jobs = store.jobs(QueueName::Sync).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].priority, SyncPriority::Low);

        let job: SyncJob = jobs[0].decode().unwrap();
        assert_eq!(job.sync_type, SyncType::Recurring);
        assert_eq!(job.primary_clock_snapshot, 42);
        assert_eq!(job.primary_endpoint, SELF);
        assert_eq!(job.secondary_endpoint, CN2);
    }

    #[tokio::test]
    async fn test_manual_dispatch_is_high_priority() {
        let dir = tempdir().unwrap();
        let store = Arc::new(StateStore::open(dir.path().to_path_buf()).unwrap());
        store.set_clock_value("0xa", 50).await.unwrap();
        let dispatcher = SyncDispatcher::new(store.clone(), SELF.to_string());

        dispatcher.dispatch_manual("0xa", CN2).await.unwrap();

        let jobs = store.jobs(QueueName::Sync).await.unwrap();
        assert_eq!(jobs[0].priority, SyncPriority::High);

        let job: SyncJob = jobs[0].decode().unwrap();
        assert_eq!(job.sync_type, SyncType::Manual);
        assert_eq!(job.primary_clock_snapshot, 50);
    }

    #[tokio::test]
    async fn test_manual_dispatch_unknown_wallet_snapshots_zero() {
        let dir = tempdir().unwrap();
        let store = Arc::new(StateStore::open(dir.path().to_path_buf()).unwrap());
        let dispatcher = SyncDispatcher::new(store.clone(), SELF.to_string());

        dispatcher.dispatch_manual("0xmissing", CN2).await.unwrap();

        let jobs = store.jobs(QueueName::Sync).await.unwrap();
        let job: SyncJob = jobs[0].decode().unwrap();
        assert_eq!(job.primary_clock_snapshot, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_issues_request_then_monitors() {
        let peers = Arc::new(MockPeers::default());
        // The secondary reports convergence on the first poll
        peers.status_clock.lock().unwrap().insert(CN2.to_string(), 42);

        let monitor = SyncMonitor::new(
            peers.clone(),
            Duration::from_secs(360),
            Duration::from_secs(15),
        );
        let handler = SyncJobHandler::new(peers.clone(), monitor, CancellationToken::new());

        let job = SyncJob {
            user_wallet: "0xa".to_string(),
            primary_endpoint: SELF.to_string(),
            secondary_endpoint: CN2.to_string(),
            primary_clock_snapshot: 42,
            sync_type: SyncType::Recurring,
            enqueued_at: Utc::now(),
        };
        let record = JobRecord {
            id: 1,
            queue: QueueName::Sync,
            priority: SyncPriority::Low,
            state: JobState::Active,
            payload: serde_json::to_string(&job).unwrap(),
            enqueued_at: Utc::now(),
        };

        handler.process(record).await.unwrap();

        let requests = peers.sync_requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, CN2);
        assert_eq!(requests[0].1, "0xa");
        assert_eq!(requests[0].2, SELF);
        assert_eq!(requests[0].3, SyncType::Recurring);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handler_timeout_is_not_an_error() {
        let peers = Arc::new(MockPeers::default());
        // The secondary never reaches the snapshot
        peers.status_clock.lock().unwrap().insert(CN2.to_string(), 10);

        let monitor = SyncMonitor::new(
            peers.clone(),
            Duration::from_secs(60),
            Duration::from_secs(15),
        );
        let handler = SyncJobHandler::new(peers.clone(), monitor, CancellationToken::new());

        let job = SyncJob {
            user_wallet: "0xa".to_string(),
            primary_endpoint: SELF.to_string(),
            secondary_endpoint: CN2.to_string(),
            primary_clock_snapshot: 50,
            sync_type: SyncType::Recurring,
            enqueued_at: Utc::now(),
        };
        let record = JobRecord {
            id: 2,
            queue: QueueName::Sync,
            priority: SyncPriority::Low,
            state: JobState::Active,
            payload: serde_json::to_string(&job).unwrap(),
            enqueued_at: Utc::now(),
        };

        // The monitor times out but the job still completes cleanly
        assert!(handler.process(record).await.is_ok());
    }
}

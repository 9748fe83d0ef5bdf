//! Cycle Orchestrator
//!
//! One cycle of the replication state machine: resolve identity, select
//! the slice, compare clocks, dispatch syncs, advance the slice. Cycles
//! never overlap (the cycle queue runs one job at a time) and each cycle
//! schedules its successor after the configured delay, so the machine
//! keeps ticking for the life of the process.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::queue::{JobHandler, JobRecord, QueueName, SyncPriority};
use crate::replication::{ClockComparator, IdentityResolver, ShardSelector, SyncDispatcher};
use crate::state::StateStore;

/// Payload of a cycle queue job
#[derive(Debug, Serialize, Deserialize)]
struct CycleJob {
    scheduled_at: DateTime<Utc>,
}

/// What one cycle did, for logging and introspection
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CycleReport {
    pub slice: u64,
    pub users_in_slice: usize,
    pub decisions: usize,
    pub syncs_issued: usize,
    pub skipped: bool,
}

impl CycleReport {
    fn skipped(slice: u64) -> Self {
        Self {
            slice,
            skipped: true,
            ..Default::default()
        }
    }
}

/// Runs one full pass of the replication state machine
pub struct CycleOrchestrator {
    identity: Arc<IdentityResolver>,
    shard: ShardSelector,
    comparator: ClockComparator,
    dispatcher: SyncDispatcher,
    store: Arc<StateStore>,
    self_endpoint: String,
    modulo_base: u64,
}

impl CycleOrchestrator {
    pub fn new(
        identity: Arc<IdentityResolver>,
        shard: ShardSelector,
        comparator: ClockComparator,
        dispatcher: SyncDispatcher,
        store: Arc<StateStore>,
        self_endpoint: String,
        modulo_base: u64,
    ) -> Self {
        Self {
            identity,
            shard,
            comparator,
            dispatcher,
            store,
            self_endpoint,
            modulo_base,
        }
    }

    /// Run one cycle. A node that is not yet registered or has no usable
    /// discovery provider skips the cycle without advancing the slice;
    /// the next cycle retries from the same position.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let slice = self.store.ensure_cycle_slice(self.modulo_base).await?;
        self.store.set_cycle_started_at(Utc::now()).await?;

        let run_id = Uuid::new_v4();
        info!(
            "Cycle {} started on slice {}/{}",
            run_id, slice, self.modulo_base
        );

        let identity = match self.identity.resolve().await {
            Ok(identity) => identity,
            Err(e) if e.skips_cycle() => {
                info!("Cycle {} skipped: {}", run_id, e);
                return Ok(CycleReport::skipped(slice));
            }
            Err(e) => return Err(e),
        };
        debug!(
            "Cycle {} running as service provider {}",
            run_id, identity.service_provider_id
        );

        let users = match self.shard.select(&self.self_endpoint, slice).await {
            Ok(users) => users,
            Err(e) if e.skips_cycle() => {
                info!("Cycle {} skipped: {}", run_id, e);
                return Ok(CycleReport::skipped(slice));
            }
            Err(e) => return Err(e),
        };
        info!(
            "Cycle {}: {} users in slice {}",
            run_id,
            users.len(),
            slice
        );

        let decisions = self.comparator.compare(&users, &self.self_endpoint).await?;

        let mut syncs_issued = 0;
        for decision in &decisions {
            debug!(
                "Cycle {}: {} on {} | primary clock {} | secondary clock {:?}",
                run_id,
                decision.user_wallet,
                decision.secondary_endpoint,
                decision.primary_clock,
                decision.secondary_clock
            );
            if !decision.needs_sync() {
                continue;
            }
            // One failed dispatch leaves the rest of the slice untouched
            match self.dispatcher.dispatch_recurring(decision).await {
                Ok(_) => syncs_issued += 1,
                Err(e) => {
                    warn!(
                        "Failed to dispatch sync for {} to {}: {}",
                        decision.user_wallet, decision.secondary_endpoint, e
                    );
                }
            }
        }

        // Advance only after the dispatch phase completes
        let next_slice = (slice + 1) % self.modulo_base;
        self.store.set_cycle_slice(next_slice).await?;

        info!(
            "Cycle {} finished: slice {} -> {}, {} decisions, {} syncs issued",
            run_id,
            slice,
            next_slice,
            decisions.len(),
            syncs_issued
        );

        Ok(CycleReport {
            slice,
            users_in_slice: users.len(),
            decisions: decisions.len(),
            syncs_issued,
            skipped: false,
        })
    }
}

/// Cycle queue handler: runs one cycle, then schedules the next one
pub struct CycleHandler {
    orchestrator: Arc<CycleOrchestrator>,
    store: Arc<StateStore>,
    cycle_delay: Duration,
    shutdown: CancellationToken,
}

impl CycleHandler {
    pub fn new(
        orchestrator: Arc<CycleOrchestrator>,
        store: Arc<StateStore>,
        cycle_delay: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            orchestrator,
            store,
            cycle_delay,
            shutdown,
        }
    }

    /// Fire-and-forget reschedule: the cycle job acks immediately and the
    /// successor is enqueued once the delay passes. A shutdown during the
    /// delay drops the reschedule; startup seeding covers that case.
    fn schedule_next(&self) {
        let store = self.store.clone();
        let delay = self.cycle_delay;
        let shutdown = self.shutdown.clone();
        info!("Next cycle in {}ms", delay.as_millis());
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.cancelled() => return,
            }
            let payload = match serde_json::to_string(&CycleJob {
                scheduled_at: Utc::now(),
            }) {
                Ok(payload) => payload,
                Err(e) => {
                    error!("Failed to encode cycle job: {}", e);
                    return;
                }
            };
            if let Err(e) = store
                .enqueue(QueueName::Cycle, SyncPriority::Low, payload)
                .await
            {
                error!("Failed to schedule next cycle: {}", e);
            }
        });
    }
}

#[async_trait::async_trait]
impl JobHandler for CycleHandler {
    async fn process(&self, record: JobRecord) -> Result<()> {
        if let Ok(job) = record.decode::<CycleJob>() {
            debug!("Cycle job {} scheduled at {}", record.id, job.scheduled_at);
        }

        // No cycle failure may stop the loop; the reschedule always runs
        if let Err(e) = self.orchestrator.run_cycle().await {
            error!("Cycle failed: {}", e);
        }
        self.schedule_next();
        Ok(())
    }
}

/// Reset the cycle queue to exactly one pending job. Called at startup so
/// a restart always resumes the loop; sync jobs are left untouched and
/// interrupted ones are recovered separately.
pub async fn seed_cycle_queue(store: &StateStore) -> Result<i64> {
    let cleared = store.clear_queue(QueueName::Cycle).await?;
    if cleared > 0 {
        info!("Cleared {} stale cycle jobs", cleared);
    }
    let payload = serde_json::to_string(&CycleJob {
        scheduled_at: Utc::now(),
    })?;
    store
        .enqueue(QueueName::Cycle, SyncPriority::Low, payload)
        .await
}

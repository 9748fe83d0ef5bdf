//! WolfSync - Content Replication Manager
//!
//! A Rust service that keeps user content replicated across a fleet of
//! storage nodes. Each user has one primary node and up to two secondary
//! nodes; logical clocks order the content writes each node has seen.
//!
//! # Architecture
//!
//! WolfSync runs a recurring replication cycle on every primary node. Each
//! cycle handles one slice of the user population: the node resolves its
//! own identity against the fleet registry, fetches its users from a
//! discovery provider, compares primary and secondary clock values, and
//! enqueues a sync job for every secondary that has fallen behind. Sync
//! jobs are issued to the lagging secondary and monitored until the
//! secondary catches up or a monitoring window expires.
//!
//! # Features
//!
//! - Recurring replication cycles over a sliced user population
//! - Durable, priority-ordered job queues that survive restarts
//! - Bounded parallel sync issuance with per-job monitoring
//! - Manual high-priority syncs for operator intervention
//! - Persistent cycle position so restarts resume where they left off
//! - HTTP API for status, queue introspection and manual syncs

pub mod api;
pub mod config;
pub mod error;
pub mod network;
pub mod queue;
pub mod replication;
pub mod state;

pub use config::WolfSyncConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::WolfSyncConfig;
    pub use crate::error::{Error, Result};
    pub use crate::queue::{JobRecord, QueueName, SyncPriority};
    pub use crate::replication::{CycleOrchestrator, ReplicaSet, SyncJob, SyncType};
    pub use crate::state::StateStore;
}

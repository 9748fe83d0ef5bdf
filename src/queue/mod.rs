//! Job Queue Module
//!
//! Priority job queues for the replication state machine. The durable
//! backing store lives in [`crate::state::StateStore`]; this module holds
//! the queue vocabulary and the worker pools that drain it.

mod worker;

pub use worker::{JobHandler, WorkerPool};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two independently-scheduled queues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueName {
    /// Drives the recurring replication cycle (single slot)
    Cycle,
    /// Carries individual sync-and-monitor operations (worker pool)
    Sync,
}

impl QueueName {
    /// Stable identifier used in the backing store
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Cycle => "cycle",
            QueueName::Sync => "sync",
        }
    }

    /// Parse a stored queue identifier
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cycle" => Some(QueueName::Cycle),
            "sync" => Some(QueueName::Sync),
            _ => None,
        }
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Priority of a queued job. High priority jobs are dequeued before low
/// priority ones; within a band jobs are dequeued in enqueue order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPriority {
    High,
    Low,
}

impl SyncPriority {
    /// Numeric rank stored in the queue (lower dequeues first)
    pub fn rank(&self) -> i64 {
        match self {
            SyncPriority::High => 1,
            SyncPriority::Low => 2,
        }
    }

    /// Parse a stored rank
    pub fn from_rank(rank: i64) -> Option<Self> {
        match rank {
            1 => Some(SyncPriority::High),
            2 => Some(SyncPriority::Low),
            _ => None,
        }
    }
}

impl std::fmt::Display for SyncPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncPriority::High => write!(f, "HIGH"),
            SyncPriority::Low => write!(f, "LOW"),
        }
    }
}

/// Lifecycle state of a queued job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    /// Waiting to be dequeued
    Pending,
    /// Claimed by a worker
    Active,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Active => "active",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobState::Pending),
            "active" => Some(JobState::Active),
            _ => None,
        }
    }
}

/// A job as stored in (and dequeued from) the durable queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Queue-assigned job id
    pub id: i64,
    /// Queue this job belongs to
    pub queue: QueueName,
    /// Dequeue priority
    pub priority: SyncPriority,
    /// Lifecycle state
    pub state: JobState,
    /// JSON-encoded job payload
    pub payload: String,
    /// When the job was enqueued
    pub enqueued_at: DateTime<Utc>,
}

impl JobRecord {
    /// Decode the payload into a typed job
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> crate::Result<T> {
        Ok(serde_json::from_str(&self.payload)?)
    }
}

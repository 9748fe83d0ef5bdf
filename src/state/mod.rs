//! State Management Module
//!
//! Durable node-local state: the replication cycle position, the per-user
//! clock values this node is authoritative for, and the backing store for
//! both job queues.

mod store;

pub use store::{QueueCounts, StateStore};

use std::collections::HashMap;

use crate::error::Result;

/// Read access to this node's authoritative per-user clock values.
///
/// Clock values are advanced by the content-mutation path; the replication
/// state machine only ever reads them.
#[async_trait::async_trait]
pub trait ClockStore: Send + Sync {
    /// Fetch clock values for a batch of wallets. Wallets with no local
    /// content are absent from the result.
    async fn clock_values(&self, wallets: &[String]) -> Result<HashMap<String, u64>>;

    /// Fetch the clock value for a single wallet
    async fn clock_value(&self, wallet: &str) -> Result<Option<u64>>;
}

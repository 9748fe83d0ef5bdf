//! State Store
//!
//! Persistent storage for node state, backed by SQLite. Holds the cycle
//! position, this node's per-user clock values, and the durable job queues
//! drained by the worker pools.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use rand::Rng;
use rusqlite::{params, Connection};
use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::queue::{JobRecord, JobState, QueueName, SyncPriority};
use crate::state::ClockStore;

/// Counts of jobs per lifecycle state in one queue
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct QueueCounts {
    pub pending: u64,
    pub active: u64,
}

/// Persistent state store backed by SQLite
pub struct StateStore {
    /// Database connection
    conn: Mutex<Connection>,
}

impl StateStore {
    /// Create or open the state store database
    pub fn open(state_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&state_dir)?;

        let db_path = state_dir.join("state.db");
        let conn = Connection::open(&db_path)?;

        // Initialize schema
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS node_state (
                key TEXT PRIMARY KEY,
                value_int INTEGER,
                value_text TEXT,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS user_clocks (
                wallet TEXT PRIMARY KEY,
                clock INTEGER NOT NULL,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            );

            CREATE TABLE IF NOT EXISTS sync_jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                queue TEXT NOT NULL,
                priority INTEGER NOT NULL,
                state TEXT NOT NULL DEFAULT 'pending',
                payload TEXT NOT NULL,
                enqueued_at TEXT NOT NULL,
                started_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_sync_jobs_ready
                ON sync_jobs(queue, state, priority, id);
            "#,
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ============ Cycle position ============

    /// Get the stored cycle slice, if any
    pub async fn cycle_slice(&self) -> Result<Option<u64>> {
        let conn = self.conn.lock().await;
        let result: std::result::Result<i64, _> = conn.query_row(
            "SELECT value_int FROM node_state WHERE key = 'cycle_slice'",
            [],
            |row| row.get(0),
        );

        match result {
            Ok(slice) => Ok(Some(slice as u64)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::State(format!("Failed to get cycle slice: {}", e))),
        }
    }

    /// Set the cycle slice
    pub async fn set_cycle_slice(&self, slice: u64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO node_state (key, value_int) VALUES ('cycle_slice', ?1)
            ON CONFLICT(key) DO UPDATE SET value_int = ?1, updated_at = CURRENT_TIMESTAMP
            "#,
            params![slice as i64],
        )?;
        Ok(())
    }

    /// Load the cycle slice, initializing it to a uniformly random value in
    /// `[0, modulo_base)` when absent or out of range for the configured base
    pub async fn ensure_cycle_slice(&self, modulo_base: u64) -> Result<u64> {
        if let Some(slice) = self.cycle_slice().await? {
            if slice < modulo_base {
                return Ok(slice);
            }
        }

        let slice = rand::thread_rng().gen_range(0..modulo_base);
        self.set_cycle_slice(slice).await?;
        Ok(slice)
    }

    /// Record when the current cycle started
    pub async fn set_cycle_started_at(&self, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO node_state (key, value_text) VALUES ('cycle_started_at', ?1)
            ON CONFLICT(key) DO UPDATE SET value_text = ?1, updated_at = CURRENT_TIMESTAMP
            "#,
            params![at.to_rfc3339()],
        )?;
        Ok(())
    }

    /// Get when the most recent cycle started
    pub async fn cycle_started_at(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock().await;
        let result: std::result::Result<String, _> = conn.query_row(
            "SELECT value_text FROM node_state WHERE key = 'cycle_started_at'",
            [],
            |row| row.get(0),
        );

        match result {
            Ok(raw) => Ok(Some(parse_timestamp(&raw)?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::State(format!("Failed to get cycle start: {}", e))),
        }
    }

    // ============ User clock values ============

    /// Set the clock value for a wallet. Called by the content-mutation
    /// path when local content changes; the replication state machine
    /// treats clock values as read-only.
    pub async fn set_clock_value(&self, wallet: &str, clock: u64) -> Result<()> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO user_clocks (wallet, clock) VALUES (?1, ?2)
            ON CONFLICT(wallet) DO UPDATE SET clock = ?2, updated_at = CURRENT_TIMESTAMP
            "#,
            params![wallet, clock as i64],
        )?;
        Ok(())
    }

    /// Fetch clock values for a batch of wallets in one query
    pub async fn clock_values(&self, wallets: &[String]) -> Result<HashMap<String, u64>> {
        if wallets.is_empty() {
            return Ok(HashMap::new());
        }

        let conn = self.conn.lock().await;
        let placeholders = vec!["?"; wallets.len()].join(", ");
        let sql = format!(
            "SELECT wallet, clock FROM user_clocks WHERE wallet IN ({})",
            placeholders
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(wallets.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut values = HashMap::new();
        for row in rows {
            let (wallet, clock) = row?;
            values.insert(wallet, clock as u64);
        }

        Ok(values)
    }

    /// Fetch the clock value for a single wallet
    pub async fn clock_value(&self, wallet: &str) -> Result<Option<u64>> {
        let conn = self.conn.lock().await;
        let result: std::result::Result<i64, _> = conn.query_row(
            "SELECT clock FROM user_clocks WHERE wallet = ?1",
            params![wallet],
            |row| row.get(0),
        );

        match result {
            Ok(clock) => Ok(Some(clock as u64)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::State(format!("Failed to get clock value: {}", e))),
        }
    }

    // ============ Job queues ============

    /// Enqueue a job and return its id
    pub async fn enqueue(
        &self,
        queue: QueueName,
        priority: SyncPriority,
        payload: String,
    ) -> Result<i64> {
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO sync_jobs (queue, priority, state, payload, enqueued_at)
            VALUES (?1, ?2, 'pending', ?3, ?4)
            "#,
            params![
                queue.as_str(),
                priority.rank(),
                payload,
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Atomically claim up to `max` ready jobs from a queue, highest
    /// priority first, FIFO within a priority band. Claimed jobs move to
    /// the active state and stay there until acked or failed.
    pub async fn dequeue(&self, queue: QueueName, max: usize) -> Result<Vec<JobRecord>> {
        if max == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        let mut claimed = Vec::new();
        {
            let mut stmt = tx.prepare(
                r#"
                SELECT id, priority, payload, enqueued_at FROM sync_jobs
                WHERE queue = ?1 AND state = 'pending'
                ORDER BY priority ASC, id ASC
                LIMIT ?2
                "#,
            )?;
            let rows = stmt.query_map(params![queue.as_str(), max as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;
            for row in rows {
                claimed.push(row?);
            }
        }

        let now = Utc::now().to_rfc3339();
        let mut records = Vec::with_capacity(claimed.len());
        for (id, rank, payload, enqueued_at) in claimed {
            tx.execute(
                "UPDATE sync_jobs SET state = 'active', started_at = ?1 WHERE id = ?2",
                params![now, id],
            )?;
            records.push(JobRecord {
                id,
                queue,
                priority: SyncPriority::from_rank(rank)
                    .ok_or_else(|| Error::State(format!("Invalid priority rank {}", rank)))?,
                state: JobState::Active,
                payload,
                enqueued_at: parse_timestamp(&enqueued_at)?,
            });
        }

        tx.commit()?;
        Ok(records)
    }

    /// Acknowledge a completed job, removing it from the queue
    pub async fn ack(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        let removed = conn.execute("DELETE FROM sync_jobs WHERE id = ?1", params![id])?;
        if removed == 0 {
            return Err(Error::JobNotFound(id));
        }
        Ok(())
    }

    /// Mark a job failed, removing it from the queue. Failed jobs are not
    /// retried; a later cycle re-detects any still-stale secondary.
    pub async fn fail(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().await;
        let removed = conn.execute("DELETE FROM sync_jobs WHERE id = ?1", params![id])?;
        if removed == 0 {
            return Err(Error::JobNotFound(id));
        }
        Ok(())
    }

    /// Reset jobs left active by a previous process back to pending so
    /// they are picked up again (at-least-once delivery)
    pub async fn recover_orphans(&self) -> Result<u64> {
        let conn = self.conn.lock().await;
        let recovered = conn.execute(
            "UPDATE sync_jobs SET state = 'pending', started_at = NULL WHERE state = 'active'",
            [],
        )?;
        Ok(recovered as u64)
    }

    /// Remove every job in a queue, returning how many were removed
    pub async fn clear_queue(&self, queue: QueueName) -> Result<u64> {
        let conn = self.conn.lock().await;
        let removed = conn.execute(
            "DELETE FROM sync_jobs WHERE queue = ?1",
            params![queue.as_str()],
        )?;
        Ok(removed as u64)
    }

    /// Count pending and active jobs in a queue
    pub async fn queue_counts(&self, queue: QueueName) -> Result<QueueCounts> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT state, COUNT(*) FROM sync_jobs WHERE queue = ?1 GROUP BY state",
        )?;
        let rows = stmt.query_map(params![queue.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = QueueCounts::default();
        for row in rows {
            let (state, count) = row?;
            match state.as_str() {
                "pending" => counts.pending = count as u64,
                "active" => counts.active = count as u64,
                _ => {}
            }
        }

        Ok(counts)
    }

    /// Snapshot every job in a queue (active first) for introspection
    pub async fn jobs(&self, queue: QueueName) -> Result<Vec<JobRecord>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            r#"
            SELECT id, priority, state, payload, enqueued_at FROM sync_jobs
            WHERE queue = ?1
            ORDER BY state ASC, priority ASC, id ASC
            "#,
        )?;
        let rows = stmt.query_map(params![queue.as_str()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (id, rank, state, payload, enqueued_at) = row?;
            records.push(JobRecord {
                id,
                queue,
                priority: SyncPriority::from_rank(rank)
                    .ok_or_else(|| Error::State(format!("Invalid priority rank {}", rank)))?,
                state: JobState::parse(&state)
                    .ok_or_else(|| Error::State(format!("Invalid job state {}", state)))?,
                payload,
                enqueued_at: parse_timestamp(&enqueued_at)?,
            });
        }

        Ok(records)
    }
}

#[async_trait::async_trait]
impl ClockStore for StateStore {
    async fn clock_values(&self, wallets: &[String]) -> Result<HashMap<String, u64>> {
        StateStore::clock_values(self, wallets).await
    }

    async fn clock_value(&self, wallet: &str) -> Result<Option<u64>> {
        StateStore::clock_value(self, wallet).await
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::State(format!("Invalid timestamp {}: {}", raw, e)))
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::State(format!("SQLite error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_cycle_slice_persists() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path().to_path_buf()).unwrap();

        assert_eq!(store.cycle_slice().await.unwrap(), None);

        let slice = store.ensure_cycle_slice(24).await.unwrap();
        assert!(slice < 24);

        // Stable across repeated loads
        assert_eq!(store.ensure_cycle_slice(24).await.unwrap(), slice);

        // And across reopening the database
        drop(store);
        let store = StateStore::open(dir.path().to_path_buf()).unwrap();
        assert_eq!(store.cycle_slice().await.unwrap(), Some(slice));
    }

    #[tokio::test]
    async fn test_out_of_range_slice_rerandomized() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path().to_path_buf()).unwrap();

        store.set_cycle_slice(30).await.unwrap();
        let slice = store.ensure_cycle_slice(24).await.unwrap();
        assert!(slice < 24);
    }

    #[tokio::test]
    async fn test_clock_values() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path().to_path_buf()).unwrap();

        store.set_clock_value("0xaaa", 5).await.unwrap();
        store.set_clock_value("0xbbb", 9).await.unwrap();
        store.set_clock_value("0xbbb", 12).await.unwrap();

        let values = store
            .clock_values(&["0xaaa".into(), "0xbbb".into(), "0xccc".into()])
            .await
            .unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values["0xaaa"], 5);
        assert_eq!(values["0xbbb"], 12);

        assert_eq!(store.clock_value("0xaaa").await.unwrap(), Some(5));
        assert_eq!(store.clock_value("0xccc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_dequeue_priority_then_fifo() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path().to_path_buf()).unwrap();

        let low_a = store
            .enqueue(QueueName::Sync, SyncPriority::Low, "\"a\"".into())
            .await
            .unwrap();
        let low_b = store
            .enqueue(QueueName::Sync, SyncPriority::Low, "\"b\"".into())
            .await
            .unwrap();
        let high_c = store
            .enqueue(QueueName::Sync, SyncPriority::High, "\"c\"".into())
            .await
            .unwrap();

        let jobs = store.dequeue(QueueName::Sync, 10).await.unwrap();
        let ids: Vec<i64> = jobs.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![high_c, low_a, low_b]);
        assert!(jobs.iter().all(|j| j.state == JobState::Active));

        // Nothing pending left
        assert!(store.dequeue(QueueName::Sync, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dequeue_respects_limit() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path().to_path_buf()).unwrap();

        for i in 0..5 {
            store
                .enqueue(QueueName::Sync, SyncPriority::Low, format!("{}", i))
                .await
                .unwrap();
        }

        assert_eq!(store.dequeue(QueueName::Sync, 2).await.unwrap().len(), 2);
        assert_eq!(store.dequeue(QueueName::Sync, 2).await.unwrap().len(), 2);
        assert_eq!(store.dequeue(QueueName::Sync, 2).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ack_and_fail_remove() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path().to_path_buf()).unwrap();

        let a = store
            .enqueue(QueueName::Sync, SyncPriority::Low, "\"a\"".into())
            .await
            .unwrap();
        let b = store
            .enqueue(QueueName::Sync, SyncPriority::Low, "\"b\"".into())
            .await
            .unwrap();
        store.dequeue(QueueName::Sync, 10).await.unwrap();

        store.ack(a).await.unwrap();
        store.fail(b).await.unwrap();

        let counts = store.queue_counts(QueueName::Sync).await.unwrap();
        assert_eq!(counts.pending, 0);
        assert_eq!(counts.active, 0);

        assert!(store.ack(a).await.is_err());
    }

    #[tokio::test]
    async fn test_recover_orphans() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path().to_path_buf()).unwrap();

        store
            .enqueue(QueueName::Sync, SyncPriority::Low, "\"a\"".into())
            .await
            .unwrap();
        let claimed = store.dequeue(QueueName::Sync, 1).await.unwrap();
        assert_eq!(claimed.len(), 1);

        // Simulate a crash before ack
        assert_eq!(store.recover_orphans().await.unwrap(), 1);

        let counts = store.queue_counts(QueueName::Sync).await.unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.active, 0);

        let reclaimed = store.dequeue(QueueName::Sync, 1).await.unwrap();
        assert_eq!(reclaimed.len(), 1);
        assert_eq!(reclaimed[0].id, claimed[0].id);
    }

    #[tokio::test]
    async fn test_queues_are_independent() {
        let dir = tempdir().unwrap();
        let store = StateStore::open(dir.path().to_path_buf()).unwrap();

        store
            .enqueue(QueueName::Cycle, SyncPriority::Low, "{}".into())
            .await
            .unwrap();
        store
            .enqueue(QueueName::Sync, SyncPriority::High, "{}".into())
            .await
            .unwrap();

        assert_eq!(store.dequeue(QueueName::Cycle, 10).await.unwrap().len(), 1);
        assert_eq!(store.queue_counts(QueueName::Sync).await.unwrap().pending, 1);

        assert_eq!(store.clear_queue(QueueName::Sync).await.unwrap(), 1);
        assert_eq!(store.queue_counts(QueueName::Sync).await.unwrap().pending, 0);
    }
}

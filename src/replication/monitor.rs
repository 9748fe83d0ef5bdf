//! Sync Monitor
//!
//! After a sync request is issued, polls the secondary's reported clock
//! for the wallet until it reaches the primary snapshot or the monitoring
//! window closes. The monitor deliberately occupies its worker slot for
//! the whole wait; concurrency is bounded by the sync pool, not here.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::network::PeerClient;

/// Result of monitoring one sync attempt
#[derive(Debug, Clone, Copy)]
pub struct MonitorOutcome {
    pub converged: bool,
    pub elapsed: Duration,
}

/// Polls a secondary until it converges on a primary clock snapshot
pub struct SyncMonitor {
    peers: Arc<dyn PeerClient>,
    /// Window after which an unconverged sync is abandoned
    max_duration: Duration,
    /// Delay between polls
    retry_delay: Duration,
}

impl SyncMonitor {
    pub fn new(peers: Arc<dyn PeerClient>, max_duration: Duration, retry_delay: Duration) -> Self {
        Self {
            peers,
            max_duration,
            retry_delay,
        }
    }

    /// Poll until the secondary reports a clock at or past the snapshot,
    /// or the window closes. Poll failures are logged and the loop keeps
    /// going. Timing out is an expected outcome, not an error; the next
    /// cycle re-detects a still-stale secondary.
    pub async fn monitor_sync(
        &self,
        wallet: &str,
        primary_clock_snapshot: u64,
        secondary: &str,
        cancel: &CancellationToken,
    ) -> MonitorOutcome {
        let started = Instant::now();

        loop {
            let elapsed = started.elapsed();
            if elapsed >= self.max_duration {
                debug!(
                    "Monitoring window for {} on {} closed after {}ms",
                    wallet,
                    secondary,
                    elapsed.as_millis()
                );
                return MonitorOutcome {
                    converged: false,
                    elapsed,
                };
            }

            match self.peers.sync_status(secondary, wallet).await {
                Ok(clock) => {
                    // The secondary can overshoot the snapshot when writes
                    // landed on the primary after it was taken
                    if clock >= primary_clock_snapshot {
                        return MonitorOutcome {
                            converged: true,
                            elapsed: started.elapsed(),
                        };
                    }
                    debug!(
                        "Secondary {} reports clock {} for {}, waiting for {}",
                        secondary, clock, wallet, primary_clock_snapshot
                    );
                }
                Err(e) => {
                    debug!(
                        "Sync status poll for {} on {} failed: {}",
                        wallet, secondary, e
                    );
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.retry_delay) => {}
                _ = cancel.cancelled() => {
                    return MonitorOutcome {
                        converged: false,
                        elapsed: started.elapsed(),
                    };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, Result};
    use crate::replication::SyncType;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    const CN2: &str = "https://cn2.example.com";

    /// Serves a fixed clock value on every poll
    struct FixedClock {
        clock: u64,
        polls: AtomicU64,
    }

    impl FixedClock {
        fn new(clock: u64) -> Self {
            Self {
                clock,
                polls: AtomicU64::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl PeerClient for FixedClock {
        async fn batch_clock_status(
            &self,
            _endpoint: &str,
            _wallets: &[String],
        ) -> Result<HashMap<String, u64>> {
            unreachable!()
        }

        async fn request_sync(
            &self,
            _secondary: &str,
            _wallet: &str,
            _primary: &str,
            _sync_type: SyncType,
        ) -> Result<()> {
            unreachable!()
        }

        async fn sync_status(&self, _secondary: &str, _wallet: &str) -> Result<u64> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            Ok(self.clock)
        }
    }

    /// Serves a scripted sequence of poll responses
    struct Script {
        responses: Mutex<VecDeque<Result<u64>>>,
        polls: AtomicU64,
    }

    impl Script {
        fn new(responses: Vec<Result<u64>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                polls: AtomicU64::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl PeerClient for Script {
        async fn batch_clock_status(
            &self,
            _endpoint: &str,
            _wallets: &[String],
        ) -> Result<HashMap<String, u64>> {
            unreachable!()
        }

        async fn request_sync(
            &self,
            _secondary: &str,
            _wallet: &str,
            _primary: &str,
            _sync_type: SyncType,
        ) -> Result<()> {
            unreachable!()
        }

        async fn sync_status(&self, _secondary: &str, _wallet: &str) -> Result<u64> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(Error::Internal("script exhausted".to_string())))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_converges_on_first_poll() {
        let peers = Arc::new(FixedClock::new(50));
        let monitor = SyncMonitor::new(
            peers.clone(),
            Duration::from_secs(360),
            Duration::from_secs(15),
        );

        let outcome = monitor
            .monitor_sync("0xa", 42, CN2, &CancellationToken::new())
            .await;
        assert!(outcome.converged);
        assert_eq!(peers.polls.load(Ordering::SeqCst), 1);
        assert!(outcome.elapsed < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_converges_after_catching_up() {
        let peers = Arc::new(Script::new(vec![Ok(10), Ok(20), Ok(42)]));
        let monitor = SyncMonitor::new(
            peers.clone(),
            Duration::from_secs(360),
            Duration::from_secs(15),
        );

        let outcome = monitor
            .monitor_sync("0xa", 42, CN2, &CancellationToken::new())
            .await;
        assert!(outcome.converged);
        assert_eq!(peers.polls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.elapsed.as_secs(), 30);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_errors_do_not_terminate() {
        let peers = Arc::new(Script::new(vec![
            Err(Error::Network("connection refused".to_string())),
            Err(Error::Network("connection refused".to_string())),
            Ok(50),
        ]));
        let monitor = SyncMonitor::new(
            peers.clone(),
            Duration::from_secs(360),
            Duration::from_secs(15),
        );

        let outcome = monitor
            .monitor_sync("0xa", 42, CN2, &CancellationToken::new())
            .await;
        assert!(outcome.converged);
        assert_eq!(peers.polls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_secondary_times_out_after_full_window() {
        let peers = Arc::new(FixedClock::new(10));
        let monitor = SyncMonitor::new(
            peers.clone(),
            Duration::from_millis(360_000),
            Duration::from_millis(15_000),
        );

        let outcome = monitor
            .monitor_sync("0xa", 50, CN2, &CancellationToken::new())
            .await;
        assert!(!outcome.converged);
        // Polls at 0s, 15s, ..., 345s; the 360s check closes the window
        assert_eq!(peers.polls.load(Ordering::SeqCst), 24);
        assert!(outcome.elapsed >= Duration::from_secs(360));
        assert!(outcome.elapsed < Duration::from_secs(361));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_the_wait() {
        let peers = Arc::new(FixedClock::new(0));
        let monitor = SyncMonitor::new(
            peers.clone(),
            Duration::from_secs(360),
            Duration::from_secs(15),
        );
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(40)).await;
            canceller.cancel();
        });

        let outcome = monitor.monitor_sync("0xa", 50, CN2, &cancel).await;
        assert!(!outcome.converged);
        assert!(outcome.elapsed < Duration::from_secs(60));
    }
}

//! Background reconciler: probes the authoritative store and replays
//! buffered writes once it recovers.
//!
//! The reconciler owns its timer exclusively; no external caller fires a
//! tick. Shutdown cancels the loop deterministically between entries.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use kari_observability::MemoryEvent;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::adapter::{AuthoritativeAdapter, CacheAdapter};
use crate::keys::{BUFFER_PREFIX, BufferedWrite};

/// Reconciler timing and drain limits.
#[derive(Debug, Clone, Copy)]
pub struct ReconcilerConfig {
    /// Tick interval
    pub interval: Duration,
    /// Maximum entries replayed per tick before yielding
    pub drain_budget: usize,
    /// Health probe deadline
    pub health_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            drain_budget: 200,
            health_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Default)]
struct ReconcilerStats {
    ticks: AtomicU64,
    healthy_ticks: AtomicU64,
    replayed_total: AtomicU64,
    replay_failures: AtomicU64,
    poison_dropped: AtomicU64,
}

/// Point-in-time reconciler counters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ReconcilerStatsSnapshot {
    /// Ticks observed since start
    pub ticks: u64,
    /// Ticks where the authoritative store answered its probe
    pub healthy_ticks: u64,
    /// Buffered writes successfully replayed
    pub replayed_total: u64,
    /// Replay attempts that stopped a tick
    pub replay_failures: u64,
    /// Undecodable buffered payloads dropped
    pub poison_dropped: u64,
}

/// Replays buffered writes against the authoritative store.
pub struct Reconciler {
    authoritative: Arc<dyn AuthoritativeAdapter>,
    cache: Arc<dyn CacheAdapter>,
    config: ReconcilerConfig,
    stats: Arc<ReconcilerStats>,
}

/// Handle to a running reconciler loop.
pub struct ReconcilerHandle {
    cancel: CancellationToken,
    join: JoinHandle<()>,
    stats: Arc<ReconcilerStats>,
}

impl ReconcilerHandle {
    /// Cancel the timer and wait for the loop to finish. Idempotent against
    /// an already-finished loop.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.join.await;
        tracing::info!(event = MemoryEvent::ReconcilerStopped.as_str(), "reconciler stopped");
    }

    /// Cheap counter snapshot.
    pub fn stats(&self) -> ReconcilerStatsSnapshot {
        ReconcilerStatsSnapshot {
            ticks: self.stats.ticks.load(Ordering::Relaxed),
            healthy_ticks: self.stats.healthy_ticks.load(Ordering::Relaxed),
            replayed_total: self.stats.replayed_total.load(Ordering::Relaxed),
            replay_failures: self.stats.replay_failures.load(Ordering::Relaxed),
            poison_dropped: self.stats.poison_dropped.load(Ordering::Relaxed),
        }
    }
}

impl Reconciler {
    /// Build a reconciler over the authoritative and cache adapters.
    pub fn new(
        authoritative: Arc<dyn AuthoritativeAdapter>,
        cache: Arc<dyn CacheAdapter>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            authoritative,
            cache,
            config,
            stats: Arc::new(ReconcilerStats::default()),
        }
    }

    /// Start the background loop. The returned handle owns cancellation.
    pub fn spawn(self) -> ReconcilerHandle {
        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();
        let stats = self.stats.clone();
        let join = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut was_healthy: Option<bool> = None;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        was_healthy = Some(self.run_tick(was_healthy, &loop_cancel).await);
                    }
                    () = loop_cancel.cancelled() => break,
                }
            }
        });
        ReconcilerHandle {
            cancel,
            join,
            stats,
        }
    }

    async fn run_tick(&self, was_healthy: Option<bool>, cancel: &CancellationToken) -> bool {
        self.stats.ticks.fetch_add(1, Ordering::Relaxed);
        let healthy = match tokio::time::timeout(self.config.health_timeout, self.authoritative.health())
            .await
        {
            Ok(report) => report.ok,
            Err(_) => false,
        };

        if !healthy {
            return false;
        }
        self.stats.healthy_ticks.fetch_add(1, Ordering::Relaxed);

        if was_healthy == Some(false) {
            let backlog = self
                .cache
                .scan(BUFFER_PREFIX)
                .await
                .map(|keys| keys.len())
                .unwrap_or(0);
            tracing::info!(
                event = MemoryEvent::ReconcilerRecovered.as_str(),
                backlog,
                "authoritative store recovered; draining buffered writes"
            );
        }

        self.drain(cancel).await;
        true
    }

    /// Replay buffered writes in lexicographic key order, up to the per-tick
    /// budget. Stops for this tick on the first replay failure.
    async fn drain(&self, cancel: &CancellationToken) {
        let mut keys = match self.cache.scan(BUFFER_PREFIX).await {
            Ok(keys) => keys,
            Err(error) => {
                tracing::warn!(
                    event = MemoryEvent::ReconcilerReplayFailed.as_str(),
                    error = %error,
                    "buffer scan failed; retrying next tick"
                );
                return;
            }
        };
        if keys.is_empty() {
            return;
        }
        keys.sort();
        let total = keys.len();

        let mut replayed = 0usize;
        for key in keys.iter().take(self.config.drain_budget) {
            if cancel.is_cancelled() {
                return;
            }
            let payload = match self.cache.get(key).await {
                Ok(Some(payload)) => payload,
                // Expired or deleted between scan and get.
                Ok(None) => continue,
                Err(error) => {
                    self.stats.replay_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        event = MemoryEvent::ReconcilerReplayFailed.as_str(),
                        key = %key,
                        error = %error,
                        "buffer read failed; retrying next tick"
                    );
                    return;
                }
            };
            let buffered = match BufferedWrite::decode(&payload) {
                Ok(buffered) => buffered,
                Err(error) => {
                    // Poison payloads cannot ever replay; TTL would discard
                    // them anyway, so drop them now instead of wedging the
                    // drain.
                    self.stats.poison_dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        event = MemoryEvent::ReconcilerReplayFailed.as_str(),
                        key = %key,
                        error = %error,
                        "undecodable buffered payload dropped"
                    );
                    let _ = self.cache.delete(key).await;
                    continue;
                }
            };
            match self
                .authoritative
                .upsert(&buffered.upsert_key, &buffered.entry)
                .await
            {
                Ok(()) => {
                    if let Err(error) = self.cache.delete(key).await {
                        self.stats.replay_failures.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            event = MemoryEvent::ReconcilerReplayFailed.as_str(),
                            key = %key,
                            error = %error,
                            "buffer delete failed after replay; upsert is idempotent on retry"
                        );
                        return;
                    }
                    replayed += 1;
                    self.stats.replayed_total.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        event = MemoryEvent::ReconcilerReplayed.as_str(),
                        key = %key,
                        "buffered write replayed"
                    );
                }
                Err(error) => {
                    self.stats.replay_failures.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        event = MemoryEvent::ReconcilerReplayFailed.as_str(),
                        key = %key,
                        error = %error,
                        replayed,
                        "replay upsert failed; stopping drain for this tick"
                    );
                    return;
                }
            }
        }

        if total > self.config.drain_budget {
            tracing::debug!(
                event = MemoryEvent::ReconcilerBudgetYield.as_str(),
                replayed,
                remaining = total - replayed,
                budget = self.config.drain_budget,
                "drain budget reached; yielding until next tick"
            );
        }
    }
}

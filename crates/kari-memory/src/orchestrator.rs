//! Tiered recall ladder and write fan-out.
//!
//! Recall walks a priority ladder and returns the first non-empty,
//! non-failing tier; a single tier failure is logged at WARN and skipped.
//! Writes fan out to every registered adapter and succeed when at least one
//! accepts; a failed authoritative upsert buffers the write into the cache
//! for the reconciler to replay.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use kari_observability::{CorrelationId, MemoryEvent, MetricsRegistry, names};
use kari_types::{EnrichedMemory, MemoryEntry, TenantContext, now_unix_ms};
use tokio_util::sync::CancellationToken;

use crate::adapter::{AdapterError, AdapterSet, with_deadline};
use crate::enrichment::{Enricher, rank_score};
use crate::error::{AdapterFailure, MemoryError};
use crate::keys::{
    BUFFER_TTL, BufferedWrite, SHORT_TERM_TTL, buffer_key, short_term_key,
};

/// Maximum entries retained in the short-term cache payload per scope.
const SHORT_TERM_CAP: usize = 50;

/// Ladder tier that produced a recall hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecallTier {
    /// Vector adapter, semantic ranking
    Vector,
    /// Full-text index
    TextIndex,
    /// Vector hits enriched through the authoritative store
    VectorEnriched,
    /// Authoritative store, recency ranking
    Authoritative,
    /// Short-term cache
    Cache,
    /// Read-only analytics store; results are stale by definition
    Analytics,
}

impl RecallTier {
    /// Stable identifier for logs and provenance.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::TextIndex => "text_index",
            Self::VectorEnriched => "vector_enriched",
            Self::Authoritative => "authoritative",
            Self::Cache => "cache",
            Self::Analytics => "analytics",
        }
    }
}

/// One recall result with provenance.
#[derive(Debug, Clone)]
pub struct RecallHit {
    /// The recalled entry
    pub entry: MemoryEntry,
    /// Native score from the producing adapter
    pub score: f32,
    /// Tier that produced the hit
    pub tier: RecallTier,
    /// Whether the producing tier is explicitly stale (analytics)
    pub stale: bool,
    /// Monotonic observation timestamp, unix milliseconds
    pub observed_at_ms: i64,
}

/// Outcome of a write fan-out that was accepted by at least one adapter.
#[derive(Debug, Clone)]
pub struct WriteReceipt {
    /// Adapter kinds that accepted the write
    pub accepted: Vec<&'static str>,
    /// Vector id captured from the vector adapter, when indexing succeeded
    pub vector_id: Option<String>,
    /// Whether the write was buffered for later replay
    pub buffered: bool,
    /// Adapters that rejected the write
    pub failures: Vec<AdapterFailure>,
}

/// Write-through / read-fallback coordinator over the adapter set.
pub struct MemoryOrchestrator {
    adapters: AdapterSet,
    metrics: Arc<MetricsRegistry>,
    enricher: Enricher,
    authoritative_healthy: AtomicBool,
    access_counts: DashMap<String, u64>,
}

impl MemoryOrchestrator {
    /// Build an orchestrator over the registered adapters.
    pub fn new(adapters: AdapterSet, metrics: Arc<MetricsRegistry>, enricher: Enricher) -> Self {
        adapters.log_missing();
        Self {
            adapters,
            metrics,
            enricher,
            authoritative_healthy: AtomicBool::new(true),
            access_counts: DashMap::new(),
        }
    }

    /// The adapter set this orchestrator coordinates.
    pub fn adapters(&self) -> &AdapterSet {
        &self.adapters
    }

    /// Last observed authoritative store health, as seen by the write path.
    pub fn authoritative_healthy(&self) -> bool {
        self.authoritative_healthy.load(Ordering::Relaxed)
    }

    /// Recall up to `limit` entries for the query, walking the tier ladder.
    /// Returns an empty list (not an error) when every tier is empty or
    /// failing.
    pub async fn recall_context(
        &self,
        ctx: &TenantContext,
        query: &str,
        limit: usize,
        correlation_id: &CorrelationId,
        cancel: &CancellationToken,
    ) -> Result<Vec<RecallHit>, MemoryError> {
        self.metrics.counter(names::MEMORY_RECALL_TOTAL, &[]).inc();
        if limit == 0 {
            return Ok(Vec::new());
        }

        let ladder: [RecallTier; 6] = [
            RecallTier::Vector,
            RecallTier::TextIndex,
            RecallTier::VectorEnriched,
            RecallTier::Authoritative,
            RecallTier::Cache,
            RecallTier::Analytics,
        ];

        for tier in ladder {
            if cancel.is_cancelled() {
                return Err(MemoryError::Cancelled);
            }
            match self.recall_tier(tier, ctx, query, limit).await {
                Ok(hits) if !hits.is_empty() => {
                    tracing::debug!(
                        event = MemoryEvent::RecallTierServed.as_str(),
                        correlation_id = %correlation_id,
                        tier = tier.as_str(),
                        hits = hits.len(),
                        "recall served"
                    );
                    if tier == RecallTier::Analytics {
                        tracing::warn!(
                            event = MemoryEvent::RecallStaleAnalytics.as_str(),
                            correlation_id = %correlation_id,
                            hits = hits.len(),
                            "recall served from read-only analytics tier; results are stale"
                        );
                    }
                    for hit in &hits {
                        let id = hit.entry.memory_id();
                        *self.access_counts.entry(id).or_insert(0) += 1;
                    }
                    return Ok(hits);
                }
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!(
                        event = MemoryEvent::RecallTierFailed.as_str(),
                        correlation_id = %correlation_id,
                        tier = tier.as_str(),
                        error = %error,
                        "recall tier failed; continuing down the ladder"
                    );
                }
            }
        }

        self.metrics.counter(names::MEMORY_RECALL_MISS_TOTAL, &[]).inc();
        tracing::debug!(
            event = MemoryEvent::RecallMiss.as_str(),
            correlation_id = %correlation_id,
            "every recall tier empty or failing"
        );
        Ok(Vec::new())
    }

    /// Recall and annotate the results. Enrichment is best-effort and never
    /// fails the containing recall.
    pub async fn recall_enriched(
        &self,
        ctx: &TenantContext,
        query: &str,
        limit: usize,
        correlation_id: &CorrelationId,
        cancel: &CancellationToken,
    ) -> Result<Vec<EnrichedMemory>, MemoryError> {
        let hits = self
            .recall_context(ctx, query, limit, correlation_id, cancel)
            .await?;
        let mut enriched = self.enricher.enrich(&hits).await;
        for memory in &mut enriched {
            let id = memory.entry.memory_id();
            memory.access_count = self.access_counts.get(&id).map_or(1, |count| *count);
        }
        Ok(enriched)
    }

    async fn recall_tier(
        &self,
        tier: RecallTier,
        ctx: &TenantContext,
        query: &str,
        limit: usize,
    ) -> Result<Vec<RecallHit>, AdapterError> {
        let deadline = self.adapters.timeouts().recall;
        let observed_at_ms = now_unix_ms();
        let hits = match tier {
            RecallTier::Vector => {
                let Some(vector) = self.adapters.vector() else {
                    return Ok(Vec::new());
                };
                with_deadline(deadline, vector.recall(ctx, query, limit))
                    .await?
                    .into_iter()
                    .map(|hit| RecallHit {
                        entry: hit.entry,
                        score: hit.score,
                        tier,
                        stale: false,
                        observed_at_ms,
                    })
                    .collect()
            }
            RecallTier::TextIndex => {
                let Some(index) = self.adapters.text_index() else {
                    return Ok(Vec::new());
                };
                with_deadline(deadline, index.search(ctx, query, limit))
                    .await?
                    .into_iter()
                    .map(|entry| RecallHit {
                        entry,
                        score: 0.0,
                        tier,
                        stale: false,
                        observed_at_ms,
                    })
                    .collect()
            }
            RecallTier::VectorEnriched => {
                let (Some(vector), Some(authoritative)) =
                    (self.adapters.vector(), self.adapters.authoritative())
                else {
                    return Ok(Vec::new());
                };
                let vector_hits = with_deadline(deadline, vector.recall(ctx, query, limit)).await?;
                let mut merged = Vec::with_capacity(vector_hits.len());
                for hit in vector_hits {
                    let entry = with_deadline(deadline, authoritative.get_by_vector(&hit.id))
                        .await?
                        .unwrap_or(hit.entry);
                    let score = rank_score(query, &entry, hit.score);
                    merged.push(RecallHit {
                        entry,
                        score,
                        tier,
                        stale: false,
                        observed_at_ms,
                    });
                }
                merged.sort_by(|a, b| {
                    b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal)
                });
                merged
            }
            RecallTier::Authoritative => {
                let Some(authoritative) = self.adapters.authoritative() else {
                    return Ok(Vec::new());
                };
                with_deadline(deadline, authoritative.recall(ctx, query, limit))
                    .await?
                    .into_iter()
                    .map(|entry| RecallHit {
                        entry,
                        score: 0.0,
                        tier,
                        stale: false,
                        observed_at_ms,
                    })
                    .collect()
            }
            RecallTier::Cache => {
                let Some(cache) = self.adapters.cache() else {
                    return Ok(Vec::new());
                };
                let key = short_term_key(&ctx.tenant_id, &ctx.user_id);
                let Some(payload) = with_deadline(deadline, cache.get(&key)).await? else {
                    return Ok(Vec::new());
                };
                let entries: Vec<MemoryEntry> = serde_json::from_str(&payload)?;
                let query_lower = query.to_lowercase();
                entries
                    .into_iter()
                    .rev()
                    .filter(|entry| cache_entry_matches(entry, &query_lower))
                    .take(limit)
                    .map(|entry| RecallHit {
                        entry,
                        score: 0.0,
                        tier,
                        stale: false,
                        observed_at_ms,
                    })
                    .collect()
            }
            RecallTier::Analytics => {
                let Some(analytics) = self.adapters.analytics() else {
                    return Ok(Vec::new());
                };
                with_deadline(deadline, analytics.query(ctx, query, limit))
                    .await?
                    .into_iter()
                    .map(|entry| RecallHit {
                        entry,
                        score: 0.0,
                        tier,
                        stale: true,
                        observed_at_ms,
                    })
                    .collect()
            }
        };
        let mut hits: Vec<RecallHit> = hits;
        hits.truncate(limit);
        Ok(hits)
    }

    /// Persist a `(query, result)` pair across every registered adapter.
    /// Succeeds when at least one adapter accepts the write.
    pub async fn update_memory(
        &self,
        ctx: &TenantContext,
        query: &str,
        result: serde_json::Value,
        correlation_id: &CorrelationId,
        cancel: &CancellationToken,
    ) -> Result<WriteReceipt, MemoryError> {
        if cancel.is_cancelled() {
            return Err(MemoryError::Cancelled);
        }

        let mut entry = MemoryEntry::new(ctx, query, result);
        let mut accepted: Vec<&'static str> = Vec::new();
        let mut failures: Vec<AdapterFailure> = Vec::new();
        let store_deadline = self.adapters.timeouts().store;

        // 1. Vector index; capture the returned vector id.
        if let Some(vector) = self.adapters.vector() {
            match with_deadline(store_deadline, vector.store(&entry)).await {
                Ok(vector_id) => {
                    entry.vector_id = Some(vector_id);
                    accepted.push("vector");
                }
                Err(error) => self.record_write_failure(&mut failures, "vector", &error, correlation_id),
            }
        }

        // 2. Authoritative upsert, keyed by the vector id or a synthetic id.
        let mut authoritative_failed = false;
        if let Some(authoritative) = self.adapters.authoritative() {
            let upsert_key = entry
                .vector_id
                .clone()
                .unwrap_or_else(|| entry.memory_id());
            match with_deadline(store_deadline, authoritative.upsert(&upsert_key, &entry)).await {
                Ok(()) => {
                    accepted.push("authoritative");
                    self.authoritative_healthy.store(true, Ordering::Relaxed);
                }
                Err(error) => {
                    authoritative_failed = true;
                    self.authoritative_healthy.store(false, Ordering::Relaxed);
                    self.record_write_failure(&mut failures, "authoritative", &error, correlation_id);
                }
            }
        }

        // 3. Short-term cache entry.
        if let Some(cache) = self.adapters.cache() {
            match self.append_short_term(ctx, &entry).await {
                Ok(()) => accepted.push("cache"),
                Err(error) => self.record_write_failure(&mut failures, "cache", &error, correlation_id),
            }

            // 4. Buffer the write when the authoritative store rejected it.
            if authoritative_failed {
                let buffered = BufferedWrite {
                    upsert_key: entry
                        .vector_id
                        .clone()
                        .unwrap_or_else(|| entry.memory_id()),
                    entry: entry.clone(),
                    buffered_at_ms: now_unix_ms(),
                };
                match self.buffer_write(cache.as_ref(), ctx, &buffered).await {
                    Ok(key) => {
                        tracing::info!(
                            event = MemoryEvent::WriteBuffered.as_str(),
                            correlation_id = %correlation_id,
                            key = %key,
                            "write buffered until the authoritative store recovers"
                        );
                    }
                    Err(error) => {
                        tracing::warn!(
                            event = MemoryEvent::BufferDisabled.as_str(),
                            correlation_id = %correlation_id,
                            error = %error,
                            "cache backend unavailable; buffering disabled for this write"
                        );
                    }
                }
            }
        } else if authoritative_failed {
            tracing::warn!(
                event = MemoryEvent::BufferDisabled.as_str(),
                correlation_id = %correlation_id,
                "no cache adapter registered; authoritative write lost until caller retries"
            );
        }

        // 5. Optional text index.
        if let Some(index) = self.adapters.text_index() {
            match with_deadline(store_deadline, index.index(&entry)).await {
                Ok(()) => accepted.push("text_index"),
                Err(error) => self.record_write_failure(&mut failures, "text_index", &error, correlation_id),
            }
        }

        // 6. The analytics store is never written.

        if accepted.is_empty() {
            tracing::error!(
                event = MemoryEvent::WriteAllAdaptersFailed.as_str(),
                correlation_id = %correlation_id,
                failures = failures.len(),
                "write rejected by every adapter"
            );
            return Err(MemoryError::AllAdaptersFailed { failures });
        }

        self.metrics.counter(names::MEMORY_STORE_TOTAL, &[]).inc();
        tracing::debug!(
            event = MemoryEvent::WriteAccepted.as_str(),
            correlation_id = %correlation_id,
            accepted = ?accepted,
            buffered = authoritative_failed,
            "memory write accepted"
        );
        Ok(WriteReceipt {
            accepted,
            vector_id: entry.vector_id,
            buffered: authoritative_failed,
            failures,
        })
    }

    fn record_write_failure(
        &self,
        failures: &mut Vec<AdapterFailure>,
        adapter: &'static str,
        error: &AdapterError,
        correlation_id: &CorrelationId,
    ) {
        tracing::warn!(
            event = MemoryEvent::WriteAdapterFailed.as_str(),
            correlation_id = %correlation_id,
            adapter,
            error = %error,
            "adapter rejected write during fan-out"
        );
        failures.push(AdapterFailure {
            adapter,
            message: error.to_string(),
        });
    }

    async fn append_short_term(
        &self,
        ctx: &TenantContext,
        entry: &MemoryEntry,
    ) -> Result<(), AdapterError> {
        let Some(cache) = self.adapters.cache() else {
            return Ok(());
        };
        let deadline = self.adapters.timeouts().store;
        let key = short_term_key(&ctx.tenant_id, &ctx.user_id);
        let mut entries: Vec<MemoryEntry> = match with_deadline(deadline, cache.get(&key)).await? {
            Some(payload) => serde_json::from_str(&payload).unwrap_or_default(),
            None => Vec::new(),
        };
        entries.push(entry.clone());
        if entries.len() > SHORT_TERM_CAP {
            let excess = entries.len() - SHORT_TERM_CAP;
            entries.drain(..excess);
        }
        let payload = serde_json::to_string(&entries)?;
        with_deadline(deadline, cache.set(&key, &payload, SHORT_TERM_TTL)).await
    }

    async fn buffer_write(
        &self,
        cache: &dyn crate::adapter::CacheAdapter,
        ctx: &TenantContext,
        buffered: &BufferedWrite,
    ) -> Result<String, AdapterError> {
        let deadline = self.adapters.timeouts().store;
        let key = buffer_key(&ctx.tenant_id, &ctx.user_id, buffered.entry.timestamp_ms);
        let payload = buffered.encode()?;
        with_deadline(deadline, cache.set(&key, &payload, BUFFER_TTL)).await?;
        Ok(key)
    }
}

fn cache_entry_matches(entry: &MemoryEntry, query_lower: &str) -> bool {
    let entry_query = entry.query.to_lowercase();
    if entry_query.contains(query_lower) || query_lower.contains(entry_query.as_str()) {
        return true;
    }
    let query_tokens: std::collections::HashSet<&str> = query_lower.split_whitespace().collect();
    entry_query
        .split_whitespace()
        .any(|token| query_tokens.contains(token))
}

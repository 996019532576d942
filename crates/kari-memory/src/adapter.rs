//! Uniform backend adapter contracts.
//!
//! Five adapter kinds are recognized: vector (semantic search), authoritative
//! (relational source of truth), cache (ephemeral TTL store with prefix
//! scan), text index (optional keyword search), and analytics (read-only
//! aggregates). Adapters are registered at init; a missing adapter degrades
//! functionality but never aborts startup.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kari_observability::{HealthReport, MemoryEvent};
use kari_types::{MemoryEntry, TenantContext};
use thiserror::Error;

/// Errors any adapter method may surface.
#[derive(Debug, Error)]
pub enum AdapterError {
    /// The backend is unreachable or refused the connection.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The operation exceeded its per-adapter timeout.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Transport or storage I/O failure.
    #[error("io failure: {0}")]
    Io(String),

    /// Payload could not be encoded or decoded.
    #[error("payload codec failure: {0}")]
    Codec(#[from] serde_json::Error),
}

/// One scored hit from the vector index.
#[derive(Debug, Clone)]
pub struct VectorHit {
    /// Vector id assigned at index time
    pub id: String,
    /// Native similarity score, higher is closer
    pub score: f32,
    /// Entry payload stored alongside the vector
    pub entry: MemoryEntry,
}

/// Semantic search over embedded memory entries.
#[async_trait]
pub trait VectorAdapter: Send + Sync {
    /// Recall up to `limit` entries ranked by vector distance.
    async fn recall(
        &self,
        ctx: &TenantContext,
        query: &str,
        limit: usize,
    ) -> Result<Vec<VectorHit>, AdapterError>;

    /// Index an entry; returns the assigned vector id.
    async fn store(&self, entry: &MemoryEntry) -> Result<String, AdapterError>;

    /// Probe backend health.
    async fn health(&self) -> HealthReport;

    /// Release the backend connection. Connectionless adapters keep the
    /// default no-op.
    async fn close(&self) {}
}

/// The relational source of truth for memory entries.
#[async_trait]
pub trait AuthoritativeAdapter: Send + Sync {
    /// Insert or replace the entry keyed by `vector_id` (or a synthetic id).
    async fn upsert(&self, key: &str, entry: &MemoryEntry) -> Result<(), AdapterError>;

    /// Recall up to `limit` entries ranked by recency.
    async fn recall(
        &self,
        ctx: &TenantContext,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, AdapterError>;

    /// Fetch the entry linked to a vector id, when present.
    async fn get_by_vector(&self, vector_id: &str) -> Result<Option<MemoryEntry>, AdapterError>;

    /// Probe backend health.
    async fn health(&self) -> HealthReport;

    /// Release the backend connection. Connectionless adapters keep the
    /// default no-op.
    async fn close(&self) {}
}

/// Ephemeral key-value store used for the short-term cache and write buffer.
#[async_trait]
pub trait CacheAdapter: Send + Sync {
    /// Fetch a value, `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, AdapterError>;

    /// Store a value with a TTL.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AdapterError>;

    /// List live keys under a prefix. Order is backend-defined; callers sort.
    async fn scan(&self, prefix: &str) -> Result<Vec<String>, AdapterError>;

    /// Delete a key. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), AdapterError>;

    /// Probe backend health.
    async fn health(&self) -> HealthReport;

    /// Release the backend connection. Connectionless adapters keep the
    /// default no-op.
    async fn close(&self) {}
}

/// Optional keyword/full-text index.
#[async_trait]
pub trait TextIndexAdapter: Send + Sync {
    /// Index an entry for keyword search.
    async fn index(&self, entry: &MemoryEntry) -> Result<(), AdapterError>;

    /// Search up to `limit` entries ranked by text relevance.
    async fn search(
        &self,
        ctx: &TenantContext,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, AdapterError>;

    /// Probe backend health.
    async fn health(&self) -> HealthReport;

    /// Release the backend connection. Connectionless adapters keep the
    /// default no-op.
    async fn close(&self) {}
}

/// Read-only analytics store. No write path exists on this contract.
#[async_trait]
pub trait AnalyticsAdapter: Send + Sync {
    /// Query aggregated entries. Results are stale by definition.
    async fn query(
        &self,
        ctx: &TenantContext,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, AdapterError>;

    /// Probe backend health.
    async fn health(&self) -> HealthReport;

    /// Release the backend connection. Connectionless adapters keep the
    /// default no-op.
    async fn close(&self) {}
}

/// Per-adapter operation deadlines.
#[derive(Debug, Clone, Copy)]
pub struct AdapterTimeouts {
    /// Recall/search deadline
    pub recall: Duration,
    /// Store/upsert/index deadline
    pub store: Duration,
    /// Health probe deadline
    pub health: Duration,
}

impl Default for AdapterTimeouts {
    fn default() -> Self {
        Self {
            recall: Duration::from_secs(5),
            store: Duration::from_secs(10),
            health: Duration::from_secs(2),
        }
    }
}

/// The set of adapters registered at initialization.
#[derive(Default, Clone)]
pub struct AdapterSet {
    vector: Option<Arc<dyn VectorAdapter>>,
    authoritative: Option<Arc<dyn AuthoritativeAdapter>>,
    cache: Option<Arc<dyn CacheAdapter>>,
    text_index: Option<Arc<dyn TextIndexAdapter>>,
    analytics: Option<Arc<dyn AnalyticsAdapter>>,
    order: Vec<&'static str>,
    timeouts: AdapterTimeoutsOrDefault,
}

#[derive(Debug, Clone, Copy, Default)]
struct AdapterTimeoutsOrDefault(Option<AdapterTimeouts>);

impl AdapterSet {
    /// Empty set; every registration is optional.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the default operation deadlines.
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: AdapterTimeouts) -> Self {
        self.timeouts = AdapterTimeoutsOrDefault(Some(timeouts));
        self
    }

    /// Register the vector adapter.
    #[must_use]
    pub fn with_vector(mut self, adapter: Arc<dyn VectorAdapter>) -> Self {
        tracing::info!(event = MemoryEvent::AdapterRegistered.as_str(), adapter = "vector", "adapter registered");
        self.vector = Some(adapter);
        self.record_registration("vector");
        self
    }

    /// Register the authoritative adapter.
    #[must_use]
    pub fn with_authoritative(mut self, adapter: Arc<dyn AuthoritativeAdapter>) -> Self {
        tracing::info!(event = MemoryEvent::AdapterRegistered.as_str(), adapter = "authoritative", "adapter registered");
        self.authoritative = Some(adapter);
        self.record_registration("authoritative");
        self
    }

    /// Register the cache adapter.
    #[must_use]
    pub fn with_cache(mut self, adapter: Arc<dyn CacheAdapter>) -> Self {
        tracing::info!(event = MemoryEvent::AdapterRegistered.as_str(), adapter = "cache", "adapter registered");
        self.cache = Some(adapter);
        self.record_registration("cache");
        self
    }

    /// Register the text index adapter.
    #[must_use]
    pub fn with_text_index(mut self, adapter: Arc<dyn TextIndexAdapter>) -> Self {
        tracing::info!(event = MemoryEvent::AdapterRegistered.as_str(), adapter = "text_index", "adapter registered");
        self.text_index = Some(adapter);
        self.record_registration("text_index");
        self
    }

    /// Register the analytics adapter.
    #[must_use]
    pub fn with_analytics(mut self, adapter: Arc<dyn AnalyticsAdapter>) -> Self {
        tracing::info!(event = MemoryEvent::AdapterRegistered.as_str(), adapter = "analytics", "adapter registered");
        self.analytics = Some(adapter);
        self.record_registration("analytics");
        self
    }

    /// Log which adapter kinds are missing; called once at init.
    pub fn log_missing(&self) {
        for (name, present) in [
            ("vector", self.vector.is_some()),
            ("authoritative", self.authoritative.is_some()),
            ("cache", self.cache.is_some()),
            ("text_index", self.text_index.is_some()),
            ("analytics", self.analytics.is_some()),
        ] {
            if !present {
                tracing::warn!(
                    event = MemoryEvent::AdapterMissing.as_str(),
                    adapter = name,
                    "adapter not registered; related functionality degrades"
                );
            }
        }
    }

    fn record_registration(&mut self, kind: &'static str) {
        self.order.retain(|existing| *existing != kind);
        self.order.push(kind);
    }

    /// Adapter kinds in registration order.
    pub fn registration_order(&self) -> &[&'static str] {
        &self.order
    }

    /// Close adapter connections in reverse registration order. Called once
    /// at shutdown; connectionless adapters no-op.
    pub async fn close_reverse(&self) {
        for kind in self.order.iter().rev().copied() {
            let closed = match kind {
                "vector" => {
                    if let Some(adapter) = &self.vector {
                        adapter.close().await;
                        true
                    } else {
                        false
                    }
                }
                "authoritative" => {
                    if let Some(adapter) = &self.authoritative {
                        adapter.close().await;
                        true
                    } else {
                        false
                    }
                }
                "cache" => {
                    if let Some(adapter) = &self.cache {
                        adapter.close().await;
                        true
                    } else {
                        false
                    }
                }
                "text_index" => {
                    if let Some(adapter) = &self.text_index {
                        adapter.close().await;
                        true
                    } else {
                        false
                    }
                }
                "analytics" => {
                    if let Some(adapter) = &self.analytics {
                        adapter.close().await;
                        true
                    } else {
                        false
                    }
                }
                _ => false,
            };
            if closed {
                tracing::info!(
                    event = MemoryEvent::AdapterClosed.as_str(),
                    adapter = kind,
                    "adapter connection released"
                );
            }
        }
    }

    /// Effective operation deadlines.
    pub fn timeouts(&self) -> AdapterTimeouts {
        self.timeouts.0.unwrap_or_default()
    }

    /// The vector adapter, when registered.
    pub fn vector(&self) -> Option<&Arc<dyn VectorAdapter>> {
        self.vector.as_ref()
    }

    /// The authoritative adapter, when registered.
    pub fn authoritative(&self) -> Option<&Arc<dyn AuthoritativeAdapter>> {
        self.authoritative.as_ref()
    }

    /// The cache adapter, when registered.
    pub fn cache(&self) -> Option<&Arc<dyn CacheAdapter>> {
        self.cache.as_ref()
    }

    /// The text index adapter, when registered.
    pub fn text_index(&self) -> Option<&Arc<dyn TextIndexAdapter>> {
        self.text_index.as_ref()
    }

    /// The analytics adapter, when registered.
    pub fn analytics(&self) -> Option<&Arc<dyn AnalyticsAdapter>> {
        self.analytics.as_ref()
    }
}

/// Enforce a deadline on one adapter operation.
pub(crate) async fn with_deadline<T, F>(limit: Duration, operation: F) -> Result<T, AdapterError>
where
    F: Future<Output = Result<T, AdapterError>>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => Err(AdapterError::Timeout(limit)),
    }
}

//! kari-core - Explicit assembly of the memory and routing subsystems.
//!
//! A [`Core`] value is constructed once at startup and passed by reference;
//! background tasks are owned by its lifecycle rather than imported side
//! effects. Initialization order: metrics, provider/runtime registry,
//! backend adapters (each independently; missing adapters degrade but never
//! abort), cache, reconciler (only when both the authoritative store and
//! cache are registered), router (health monitor starts lazily on first
//! use). Shutdown is deterministic and idempotent.

mod config;
mod enrichment_bridge;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use kari_memory::{
    AdapterSet, AnalyticsAdapter, AuthoritativeAdapter, CacheAdapter, Enricher, MemoryError,
    MemoryOrchestrator, RecallHit, Reconciler, ReconcilerHandle, TextIndexAdapter, VectorAdapter,
    WriteReceipt,
};
use kari_observability::{CorrelationId, MetricsRegistry};
use kari_router::{
    ChatOutcome, LlmRegistry, LlmRouter, OpenAiCompatibleConfig, OpenAiCompatibleProvider,
    ProviderCapability, ProviderCategory, ProviderFactory, ProviderSpec, RoutingRequest,
    SecretResolver, install_default_catalog,
};
use kari_types::{EnrichedMemory, TenantContext};
use tokio_util::sync::CancellationToken;

pub use config::{CoreConfig, ElasticConfig, PostgresConfig};

/// Core-wide health view: one report per registered adapter plus the
/// router's provider status.
#[derive(Debug, serde::Serialize)]
pub struct CoreHealthSnapshot {
    /// Adapter probe results, keyed by adapter kind
    pub adapters: std::collections::BTreeMap<&'static str, kari_observability::HealthReport>,
    /// Router status including per-provider health and degraded stats
    pub router: kari_router::RouterStatusSnapshot,
}

async fn probed(
    timeout: Duration,
    probe: impl std::future::Future<Output = kari_observability::HealthReport>,
) -> kari_observability::HealthReport {
    match tokio::time::timeout(timeout, probe).await {
        Ok(report) => report,
        Err(_) => kari_observability::HealthReport::unhealthy(format!(
            "health probe timed out after {timeout:?}"
        )),
    }
}

/// Remote providers wired automatically when their API key resolves. Each
/// speaks the OpenAI-compatible wire format.
const COMPATIBLE_REMOTES: [(&str, &str, &str); 3] = [
    ("openai", "https://api.openai.com/v1", "gpt-4o-mini"),
    ("deepseek", "https://api.deepseek.com/v1", "deepseek-chat"),
    (
        "gemini",
        "https://generativelanguage.googleapis.com/v1beta/openai",
        "gemini-2.0-flash",
    ),
];

struct RemoteProviderFactory {
    name: String,
    base_url: String,
    model: String,
    capabilities: Vec<ProviderCapability>,
}

impl ProviderFactory for RemoteProviderFactory {
    fn build(
        &self,
        config: &std::collections::BTreeMap<String, String>,
    ) -> std::result::Result<Arc<dyn kari_router::ChatProvider>, kari_router::ProviderError> {
        let provider = OpenAiCompatibleProvider::new(OpenAiCompatibleConfig {
            name: self.name.clone(),
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            api_key: config.get("api_key").cloned(),
            timeout: Duration::from_secs(30),
            capabilities: self.capabilities.clone(),
        })?;
        Ok(Arc::new(provider))
    }
}

/// Builder for [`Core`]. Adapters are registered here; everything else is
/// derived from the config.
pub struct CoreBuilder {
    config: CoreConfig,
    adapters: AdapterSet,
    secrets: Option<SecretResolver>,
}

impl CoreBuilder {
    /// Register the vector adapter.
    #[must_use]
    pub fn with_vector(mut self, adapter: Arc<dyn VectorAdapter>) -> Self {
        self.adapters = self.adapters.with_vector(adapter);
        self
    }

    /// Register the authoritative adapter.
    #[must_use]
    pub fn with_authoritative(mut self, adapter: Arc<dyn AuthoritativeAdapter>) -> Self {
        self.adapters = self.adapters.with_authoritative(adapter);
        self
    }

    /// Register the cache adapter.
    #[must_use]
    pub fn with_cache(mut self, adapter: Arc<dyn CacheAdapter>) -> Self {
        self.adapters = self.adapters.with_cache(adapter);
        self
    }

    /// Register the text index adapter.
    #[must_use]
    pub fn with_text_index(mut self, adapter: Arc<dyn TextIndexAdapter>) -> Self {
        self.adapters = self.adapters.with_text_index(adapter);
        self
    }

    /// Register the analytics adapter.
    #[must_use]
    pub fn with_analytics(mut self, adapter: Arc<dyn AnalyticsAdapter>) -> Self {
        self.adapters = self.adapters.with_analytics(adapter);
        self
    }

    /// Override secret resolution (defaults to the process environment).
    #[must_use]
    pub fn with_secrets(mut self, secrets: SecretResolver) -> Self {
        self.secrets = Some(secrets);
        self
    }

    /// Wire everything together in the documented order.
    pub async fn initialize(self) -> Result<Core> {
        let CoreBuilder {
            config,
            mut adapters,
            secrets,
        } = self;
        adapters = adapters.with_timeouts(config.adapter_timeouts);

        // 1. Metrics registry.
        let metrics = Arc::new(MetricsRegistry::new());

        // 2. Provider/runtime registry with the default catalog, plus any
        //    remote provider whose key resolves.
        let secrets = Arc::new(secrets.unwrap_or_else(SecretResolver::from_env));
        let registry = Arc::new(LlmRegistry::new());
        install_default_catalog(&registry);
        for (name, base_url, model) in COMPATIBLE_REMOTES {
            if secrets.api_key(name).is_none() {
                continue;
            }
            let mut capabilities =
                vec![ProviderCapability::Streaming, ProviderCapability::FunctionCalling];
            if name == "openai" {
                capabilities.push(ProviderCapability::Embeddings);
            }
            registry.register_provider(ProviderSpec {
                name: name.to_string(),
                category: ProviderCategory::Llm,
                requires_api_key: true,
                description: format!("{name} chat completions"),
                capabilities: capabilities.clone(),
                default_model: Some(model.to_string()),
                fallback_models: Vec::new(),
                factory: Arc::new(RemoteProviderFactory {
                    name: name.to_string(),
                    base_url: base_url.to_string(),
                    model: model.to_string(),
                    capabilities,
                }),
            });
        }

        // 3. Cache from config when none was registered explicitly.
        #[cfg(feature = "valkey")]
        if adapters.cache().is_none()
            && let Some(redis_url) = &config.redis_url
        {
            match kari_memory::adapters::ValkeyCacheAdapter::new(redis_url) {
                Ok(adapter) => adapters = adapters.with_cache(Arc::new(adapter)),
                Err(error) => tracing::warn!(
                    event = "core.init.cache_unavailable",
                    error = %error,
                    "valkey cache adapter init failed; continuing without cache"
                ),
            }
        }

        // 4. Router (its background health monitor starts lazily).
        let router = Arc::new(LlmRouter::new(
            registry.clone(),
            metrics.clone(),
            secrets,
            config.router.clone(),
        ));

        // 5. Orchestrator with router-backed enrichment.
        let enricher = Enricher::with_backend(Arc::new(
            enrichment_bridge::RouterEnrichmentBackend::new(router.clone()),
        ));
        let orchestrator =
            Arc::new(MemoryOrchestrator::new(adapters.clone(), metrics.clone(), enricher));

        // 6. Reconciler, only when both sides of the buffer path exist.
        let reconciler = match (adapters.authoritative(), adapters.cache()) {
            (Some(authoritative), Some(cache)) => {
                let handle = Reconciler::new(
                    authoritative.clone(),
                    cache.clone(),
                    config.reconciler,
                )
                .spawn();
                tracing::info!(
                    event = "core.init.reconciler_started",
                    interval_secs = config.reconciler.interval.as_secs(),
                    drain_budget = config.reconciler.drain_budget,
                    "reconciler started"
                );
                Some(handle)
            }
            _ => {
                tracing::info!(
                    event = "core.init.reconciler_skipped",
                    "reconciler not started; requires both authoritative and cache adapters"
                );
                None
            }
        };

        tracing::info!(event = "core.init.completed", "core initialized");
        Ok(Core {
            metrics,
            registry,
            router,
            orchestrator,
            reconciler: tokio::sync::Mutex::new(reconciler),
            shutdown_done: AtomicBool::new(false),
        })
    }
}

/// The assembled memory and routing core.
pub struct Core {
    metrics: Arc<MetricsRegistry>,
    registry: Arc<LlmRegistry>,
    router: Arc<LlmRouter>,
    orchestrator: Arc<MemoryOrchestrator>,
    reconciler: tokio::sync::Mutex<Option<ReconcilerHandle>>,
    shutdown_done: AtomicBool,
}

impl Core {
    /// Start building a core over a configuration.
    pub fn builder(config: CoreConfig) -> CoreBuilder {
        CoreBuilder {
            config,
            adapters: AdapterSet::new(),
            secrets: None,
        }
    }

    /// The process metrics registry.
    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// The provider/runtime registry.
    pub fn registry(&self) -> &Arc<LlmRegistry> {
        &self.registry
    }

    /// The provider router.
    pub fn router(&self) -> &Arc<LlmRouter> {
        &self.router
    }

    /// The memory orchestrator.
    pub fn orchestrator(&self) -> &Arc<MemoryOrchestrator> {
        &self.orchestrator
    }

    /// Persist a `(query, result)` pair for the scope.
    pub async fn update_memory(
        &self,
        ctx: &TenantContext,
        query: &str,
        result: serde_json::Value,
        cancel: &CancellationToken,
    ) -> std::result::Result<WriteReceipt, MemoryError> {
        let correlation_id = CorrelationId::new_model_op();
        self.orchestrator
            .update_memory(ctx, query, result, &correlation_id, cancel)
            .await
    }

    /// Recall stored context for a query.
    pub async fn recall_context(
        &self,
        ctx: &TenantContext,
        query: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> std::result::Result<Vec<RecallHit>, MemoryError> {
        let correlation_id = CorrelationId::new_model_op();
        self.orchestrator
            .recall_context(ctx, query, limit, &correlation_id, cancel)
            .await
    }

    /// Recall with best-effort enrichment.
    pub async fn recall_enriched(
        &self,
        ctx: &TenantContext,
        query: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> std::result::Result<Vec<EnrichedMemory>, MemoryError> {
        let correlation_id = CorrelationId::new_model_op();
        self.orchestrator
            .recall_enriched(ctx, query, limit, &correlation_id, cancel)
            .await
    }

    /// Route a chat request through the provider router.
    pub async fn chat(&self, request: RoutingRequest, cancel: &CancellationToken) -> ChatOutcome {
        self.router.process_chat_request(request, cancel).await
    }

    /// Probe every registered adapter and assemble a core-wide health view
    /// alongside the router's provider status. Probe failures mutate the
    /// snapshot, never the request path.
    pub async fn health_snapshot(&self) -> CoreHealthSnapshot {
        let adapters = self.orchestrator.adapters();
        let probe_timeout = adapters.timeouts().health;
        let mut adapter_reports = std::collections::BTreeMap::new();
        if let Some(vector) = adapters.vector() {
            adapter_reports.insert("vector", probed(probe_timeout, vector.health()).await);
        }
        if let Some(authoritative) = adapters.authoritative() {
            adapter_reports
                .insert("authoritative", probed(probe_timeout, authoritative.health()).await);
        }
        if let Some(cache) = adapters.cache() {
            adapter_reports.insert("cache", probed(probe_timeout, cache.health()).await);
        }
        if let Some(text_index) = adapters.text_index() {
            adapter_reports.insert("text_index", probed(probe_timeout, text_index.health()).await);
        }
        if let Some(analytics) = adapters.analytics() {
            adapter_reports.insert("analytics", probed(probe_timeout, analytics.health()).await);
        }
        CoreHealthSnapshot {
            adapters: adapter_reports,
            router: self.router.get_provider_status().await,
        }
    }

    /// Aggregate view over the memories a query recalls. Derived data only;
    /// nothing is persisted.
    pub async fn memory_analytics(
        &self,
        ctx: &TenantContext,
        query: &str,
        limit: usize,
        cancel: &CancellationToken,
    ) -> std::result::Result<kari_memory::MemoryAnalyticsSnapshot, MemoryError> {
        let enriched = self.recall_enriched(ctx, query, limit, cancel).await?;
        Ok(kari_memory::summarize_memories(&enriched))
    }

    /// Deterministic, idempotent shutdown: cancel the router's health
    /// monitor, stop the reconciler timer, then close adapter connections
    /// in reverse registration order.
    pub async fn shutdown(&self) {
        if self.shutdown_done.swap(true, Ordering::SeqCst) {
            return;
        }
        self.router.shutdown().await;
        if let Some(handle) = self.reconciler.lock().await.take() {
            handle.shutdown().await;
        }
        self.orchestrator.adapters().close_reverse().await;
        tracing::info!(event = "core.shutdown.completed", "core shut down");
    }
}

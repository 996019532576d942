//! Policy-based provider selection and dispatch.
//!
//! Dispatch for one request: consume a token from the provider's window,
//! execute with a deadline, retry with exponential backoff and jitter, fall
//! back to up to two more providers per the active policy, and finally hand
//! the request to the deterministic degraded responder.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use kari_observability::{CorrelationId, MetricsRegistry, RouterEvent, names};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::degraded::{DegradedResponder, DegradedSnapshot};
use crate::error::{DegradedReason, FailureRecord, ProviderError, infer_degraded_reason};
use crate::health::{DispatchGate, HealthLedger, LedgerConfig, RateLimitConfig, SlotDecision};
use crate::policy::{
    PriorityMap, ProviderPriority, RotationState, RoutingPolicy, order_providers,
};
use crate::provider::{ChunkStream, GenerationParams, ProviderCapability};
use crate::registry::{LlmRegistry, ProviderCategory, ProviderSpec};
use crate::secrets::SecretResolver;

/// A routable chat request.
#[derive(Debug, Clone)]
pub struct RoutingRequest {
    pub message: String,
    pub stream: bool,
    pub preferred_provider: Option<String>,
    pub preferred_model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub conversation_id: Option<String>,
    /// Minted at the outermost entry; propagated unchanged everywhere.
    pub correlation_id: CorrelationId,
}

impl RoutingRequest {
    /// Non-streaming request with a fresh correlation ID.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stream: false,
            preferred_provider: None,
            preferred_model: None,
            max_tokens: None,
            temperature: None,
            conversation_id: None,
            correlation_id: CorrelationId::new_router(),
        }
    }

    /// Request a chunked response.
    #[must_use]
    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }

    /// Hint the provider to use.
    #[must_use]
    pub fn with_preferred_provider(mut self, provider: impl Into<String>) -> Self {
        self.preferred_provider = Some(provider.into());
        self
    }

    /// Hint the model to use. `provider:model` splits into both hints.
    #[must_use]
    pub fn with_preferred_model(mut self, model: impl Into<String>) -> Self {
        self.preferred_model = Some(model.into());
        self
    }
}

/// Router tuning knobs. Defaults mirror production behavior.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub policy: RoutingPolicy,
    pub priority_order: Vec<ProviderPriority>,
    pub retry_attempts: u32,
    pub retry_initial_delay: Duration,
    pub retry_max_delay: Duration,
    pub retry_jitter: Duration,
    pub call_timeout: Duration,
    pub health_check_timeout: Duration,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_timeout: Duration,
    pub rate_limit_backoff: Duration,
    /// Hard cap on how long one dispatch waits for a window slot.
    pub rate_limit_wait_cap: Duration,
    pub default_rate_limit: RateLimitConfig,
    pub rate_limit_overrides: HashMap<String, RateLimitConfig>,
    pub health_refresh_interval: Duration,
    /// Fallback providers tried after the chosen one fails.
    pub fallback_chain_length: usize,
    pub latency_history: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        let mut rate_limit_overrides = HashMap::new();
        for (provider, max_requests) in
            [("openai", 60u32), ("anthropic", 30), ("gemini", 40), ("deepseek", 40)]
        {
            rate_limit_overrides.insert(
                provider.to_string(),
                RateLimitConfig {
                    max_requests,
                    window: Duration::from_secs(60),
                },
            );
        }
        Self {
            policy: RoutingPolicy::Priority,
            priority_order: ProviderPriority::DEFAULT_ORDER.to_vec(),
            retry_attempts: 3,
            retry_initial_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(10),
            retry_jitter: Duration::from_millis(500),
            call_timeout: Duration::from_secs(30),
            health_check_timeout: Duration::from_secs(2),
            circuit_breaker_threshold: 3,
            circuit_breaker_timeout: Duration::from_secs(60),
            rate_limit_backoff: Duration::from_secs(15),
            rate_limit_wait_cap: Duration::from_secs(15),
            default_rate_limit: RateLimitConfig::default(),
            rate_limit_overrides,
            health_refresh_interval: Duration::from_secs(180),
            fallback_chain_length: 2,
            latency_history: 20,
        }
    }
}

/// Result of routing one chat request.
pub struct ChatOutcome {
    /// Provider that served the request, `None` in degraded mode
    pub provider: Option<String>,
    /// Model that served the request, when known
    pub model: Option<String>,
    /// Set when the degraded responder produced the reply
    pub degraded_reason: Option<DegradedReason>,
    /// Ordered chunk sequence; single chunk for non-streaming providers
    pub stream: ChunkStream,
}

/// Per-provider status plus a health summary.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RouterStatusSnapshot {
    pub policy: RoutingPolicy,
    pub providers: BTreeMap<String, ProviderStatusEntry>,
    pub healthy: usize,
    pub unhealthy: usize,
    pub total: usize,
    pub degraded: DegradedSnapshot,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ProviderStatusEntry {
    pub priority: &'static str,
    pub supports_streaming: bool,
    pub requires_api_key: bool,
    pub default_model: Option<String>,
    pub health: crate::health::ProviderHealthSnapshot,
}

struct RoutingState {
    policy: RoutingPolicy,
    priority_order: Vec<ProviderPriority>,
}

/// Local-first provider router.
pub struct LlmRouter {
    registry: Arc<LlmRegistry>,
    metrics: Arc<MetricsRegistry>,
    secrets: Arc<SecretResolver>,
    config: RouterConfig,
    routing: std::sync::RwLock<RoutingState>,
    priorities: std::sync::RwLock<PriorityMap>,
    rotation: std::sync::Mutex<RotationState>,
    health: HealthLedger,
    degraded: DegradedResponder,
    monitor: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    monitor_cancel: CancellationToken,
}

impl LlmRouter {
    /// Build a router over a registry.
    pub fn new(
        registry: Arc<LlmRegistry>,
        metrics: Arc<MetricsRegistry>,
        secrets: Arc<SecretResolver>,
        config: RouterConfig,
    ) -> Self {
        let health = HealthLedger::new(LedgerConfig {
            circuit_threshold: config.circuit_breaker_threshold,
            circuit_timeout: config.circuit_breaker_timeout,
            rate_limit_backoff: config.rate_limit_backoff,
            latency_history: config.latency_history,
        });
        let routing = RoutingState {
            policy: config.policy,
            priority_order: config.priority_order.clone(),
        };
        Self {
            registry,
            metrics,
            secrets,
            config,
            routing: std::sync::RwLock::new(routing),
            priorities: std::sync::RwLock::new(PriorityMap::default()),
            rotation: std::sync::Mutex::new(RotationState::default()),
            health,
            degraded: DegradedResponder::new(),
            monitor: tokio::sync::Mutex::new(None),
            monitor_cancel: CancellationToken::new(),
        }
    }

    /// The registry this router consults.
    pub fn registry(&self) -> &Arc<LlmRegistry> {
        &self.registry
    }

    /// Health ledger handle, for status surfaces.
    pub fn health(&self) -> &HealthLedger {
        &self.health
    }

    /// Register a provider and start tracking its health.
    pub fn register_provider(&self, spec: ProviderSpec) {
        self.health.track(&spec.name);
        self.registry.register_provider(spec);
    }

    /// Unregister a provider and drop its health state, so a later
    /// re-registration behaves like the first.
    pub fn unregister_provider(&self, name: &str) -> bool {
        let removed = self.registry.unregister_provider(name);
        if removed {
            self.health.untrack(name);
        }
        removed
    }

    /// Swap the routing policy and bucket order at runtime. Rotation
    /// cursors reset.
    pub fn configure_routing(
        &self,
        policy: RoutingPolicy,
        priority_order: Option<Vec<ProviderPriority>>,
    ) {
        if let Ok(mut routing) = self.routing.write() {
            routing.policy = policy;
            if let Some(order) = priority_order
                && !order.is_empty()
            {
                routing.priority_order = order;
            }
        }
        if let Ok(mut rotation) = self.rotation.lock() {
            rotation.reset();
        }
    }

    /// Override the priority bucket for one provider.
    pub fn set_provider_priority(&self, provider: &str, priority: ProviderPriority) {
        if let Ok(mut priorities) = self.priorities.write() {
            priorities.set(provider, priority);
        }
    }

    fn active_policy(&self) -> RoutingPolicy {
        self.routing
            .read()
            .map(|routing| routing.policy)
            .unwrap_or(RoutingPolicy::Priority)
    }

    fn rate_limit_for(&self, provider: &str) -> RateLimitConfig {
        self.config
            .rate_limit_overrides
            .get(provider)
            .copied()
            .unwrap_or(self.config.default_rate_limit)
    }

    fn record_selection(&self, provider: &str, result: &str) {
        self.metrics
            .counter(
                names::PROVIDER_SELECTIONS_TOTAL,
                &[
                    ("provider", provider),
                    ("policy", self.active_policy().as_str()),
                    ("result", result),
                ],
            )
            .inc();
    }

    fn record_fallback(&self, from: &str, to: &str, reason: &str) {
        self.metrics
            .counter(
                names::PROVIDER_FALLBACKS_TOTAL,
                &[("from", from), ("to", to), ("reason", reason)],
            )
            .inc();
    }

    async fn is_provider_healthy(&self, provider: &str) -> bool {
        self.health.track(provider);
        matches!(self.health.gate(provider).await, DispatchGate::Dispatchable)
    }

    fn meets_requirements(&self, spec: &ProviderSpec, request: &RoutingRequest) -> bool {
        if request.stream && !spec.has_capability(ProviderCapability::Streaming) {
            return false;
        }
        if spec.requires_api_key && self.secrets.api_key(&spec.name).is_none() {
            tracing::warn!(
                event = RouterEvent::NoSuitableProvider.as_str(),
                provider = %spec.name,
                requires_api_key = true,
                "provider missing required API key; filtered from candidates"
            );
            return false;
        }
        true
    }

    /// Healthy providers meeting the request's requirements, ordered by the
    /// active policy.
    async fn available_providers(&self, request: &RoutingRequest) -> Vec<String> {
        let mut buckets: BTreeMap<ProviderPriority, Vec<String>> = BTreeMap::new();
        for name in self.registry.list_providers(Some(ProviderCategory::Llm)) {
            let Some(spec) = self.registry.provider_spec(&name) else {
                continue;
            };
            if !self.meets_requirements(&spec, request) {
                continue;
            }
            if !self.is_provider_healthy(&name).await {
                continue;
            }
            let bucket = self
                .priorities
                .read()
                .map(|priorities| priorities.bucket_for(&name))
                .unwrap_or(ProviderPriority::Fallback);
            buckets.entry(bucket).or_default().push(name);
        }
        for bucket in buckets.values_mut() {
            bucket.sort();
        }

        let (policy, priority_order) = match self.routing.read() {
            Ok(routing) => (routing.policy, routing.priority_order.clone()),
            Err(_) => (RoutingPolicy::Priority, ProviderPriority::DEFAULT_ORDER.to_vec()),
        };
        match self.rotation.lock() {
            Ok(mut rotation) => order_providers(policy, &priority_order, &buckets, &mut rotation),
            Err(_) => Vec::new(),
        }
    }

    /// Select the best provider for a request per the active policy and the
    /// request's preferred provider/model hints. Returns the provider name
    /// and the model that will serve.
    pub async fn select_provider(&self, request: &RoutingRequest) -> Option<(String, Option<String>)> {
        self.ensure_background_monitor().await;

        let mut preferred_provider = request.preferred_provider.clone();
        let mut preferred_model = request.preferred_model.clone();

        // A "provider:model" hint fills a missing provider.
        if let Some(model) = preferred_model.clone()
            && let Some((provider_part, model_part)) = model.split_once(':')
        {
            if preferred_provider.is_none() {
                preferred_provider = Some(provider_part.to_string());
            }
            preferred_model = Some(model_part.to_string());
        }

        if let (Some(provider), Some(model)) = (preferred_provider.clone(), preferred_model.clone())
        {
            let spec = self.registry.provider_spec(&provider);
            let model_is_default = spec
                .as_ref()
                .is_some_and(|spec| spec.default_model.as_deref() == Some(model.as_str()));
            if model_is_default && self.is_provider_healthy(&provider).await {
                tracing::info!(
                    event = RouterEvent::ProviderSelected.as_str(),
                    correlation_id = %request.correlation_id,
                    provider = %provider,
                    model = %model,
                    policy = self.active_policy().as_str(),
                    "using preferred provider/model"
                );
                self.record_selection(&provider, "selected");
                return Some((provider, Some(model)));
            }
            tracing::warn!(
                event = RouterEvent::PreferredHintDropped.as_str(),
                correlation_id = %request.correlation_id,
                provider = %provider,
                model = %model,
                "preferred provider/model unavailable; hint dropped"
            );
            preferred_provider = None;
            preferred_model = None;
        }

        let model_only_hint =
            if preferred_provider.is_none() { preferred_model.clone() } else { None };
        if let Some(model) = model_only_hint {
            for name in self.registry.list_providers(Some(ProviderCategory::Llm)) {
                let declares_default = self
                    .registry
                    .provider_spec(&name)
                    .is_some_and(|spec| spec.default_model.as_deref() == Some(model.as_str()));
                if declares_default && self.is_provider_healthy(&name).await {
                    tracing::info!(
                        event = RouterEvent::ProviderSelected.as_str(),
                        correlation_id = %request.correlation_id,
                        provider = %name,
                        model = %model,
                        "resolved provider for preferred model"
                    );
                    self.record_selection(&name, "selected");
                    return Some((name, Some(model)));
                }
            }
            tracing::warn!(
                event = RouterEvent::PreferredHintDropped.as_str(),
                correlation_id = %request.correlation_id,
                model = %model,
                "preferred model unavailable across providers; hint dropped"
            );
        }

        if let Some(provider) = preferred_provider.clone() {
            if self.is_provider_healthy(&provider).await {
                let model =
                    self.registry.provider_spec(&provider).and_then(|spec| spec.default_model);
                tracing::info!(
                    event = RouterEvent::ProviderSelected.as_str(),
                    correlation_id = %request.correlation_id,
                    provider = %provider,
                    "using preferred provider"
                );
                self.record_selection(&provider, "selected");
                return Some((provider, model));
            }
            tracing::warn!(
                event = RouterEvent::PreferredHintDropped.as_str(),
                correlation_id = %request.correlation_id,
                provider = %provider,
                "preferred provider unhealthy; falling back to policy selection"
            );
        }

        let candidates = self.available_providers(request).await;
        let Some(selected) = candidates.first() else {
            tracing::warn!(
                event = RouterEvent::NoSuitableProvider.as_str(),
                correlation_id = %request.correlation_id,
                policy = self.active_policy().as_str(),
                "no suitable providers found for request"
            );
            self.record_selection("none", "unavailable");
            return None;
        };
        let model = self.registry.provider_spec(selected).and_then(|spec| spec.default_model);
        tracing::info!(
            event = RouterEvent::ProviderSelected.as_str(),
            correlation_id = %request.correlation_id,
            provider = %selected,
            policy = self.active_policy().as_str(),
            "selected provider via routing policy"
        );
        self.record_selection(selected, "selected");
        Some((selected.clone(), model))
    }

    /// Route a chat request: selection, retries, fallback chain, degraded
    /// mode. The caller always receives a well-formed outcome.
    pub async fn process_chat_request(
        &self,
        request: RoutingRequest,
        cancel: &CancellationToken,
    ) -> ChatOutcome {
        let mut failures: Vec<FailureRecord> = Vec::new();

        let Some((primary, model)) = self.select_provider(&request).await else {
            return self.degraded_outcome(&request, &failures);
        };

        let mut chain = vec![primary.clone()];
        chain.extend(self.fallback_providers(&primary, &request).await);

        let mut previous: Option<String> = None;
        for provider_name in chain {
            if cancel.is_cancelled() {
                return cancelled_outcome();
            }
            if let Some(from) = &previous
                && let Some(last) = failures.last()
            {
                let reason = infer_degraded_reason(std::slice::from_ref(last));
                self.record_fallback(from, &provider_name, reason.as_str());
                tracing::info!(
                    event = RouterEvent::FallbackAttempt.as_str(),
                    correlation_id = %request.correlation_id,
                    from = %from,
                    to = %provider_name,
                    reason = reason.as_str(),
                    "attempting fallback provider"
                );
            }

            match self.attempt_provider(&provider_name, &request, cancel).await {
                Ok(stream) => {
                    if previous.is_some() {
                        self.record_selection(&provider_name, "fallback_selected");
                    }
                    let model = if provider_name == primary {
                        model.clone()
                    } else {
                        self.registry
                            .provider_spec(&provider_name)
                            .and_then(|spec| spec.default_model)
                    };
                    return ChatOutcome {
                        provider: Some(provider_name),
                        model,
                        degraded_reason: None,
                        stream: with_cancellation(stream, cancel.clone()),
                    };
                }
                Err(ProviderError::Cancelled) => return cancelled_outcome(),
                Err(error) => {
                    self.record_selection(&provider_name, "failure");
                    failures.push(FailureRecord {
                        provider: provider_name.clone(),
                        error,
                    });
                    previous = Some(provider_name);
                }
            }
        }

        self.degraded_outcome(&request, &failures)
    }

    /// Embed texts through the first healthy provider declaring the
    /// embeddings capability.
    pub async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        for name in self.registry.list_providers(None) {
            let Some(spec) = self.registry.provider_spec(&name) else {
                continue;
            };
            if !spec.has_capability(ProviderCapability::Embeddings) {
                continue;
            }
            if !self.is_provider_healthy(&name).await {
                continue;
            }
            let mut config = BTreeMap::new();
            if let Some(key) = self.secrets.api_key(&name) {
                config.insert("api_key".to_string(), key);
            }
            let instance = self.registry.get_provider(&name, &config)?;
            return instance.embed(texts).await;
        }
        Err(ProviderError::Incapable(
            "no healthy embeddings provider registered".to_string(),
        ))
    }

    async fn fallback_providers(&self, exclude: &str, request: &RoutingRequest) -> Vec<String> {
        self.available_providers(request)
            .await
            .into_iter()
            .filter(|name| name != exclude)
            .take(self.config.fallback_chain_length)
            .collect()
    }

    async fn attempt_provider(
        &self,
        provider: &str,
        request: &RoutingRequest,
        cancel: &CancellationToken,
    ) -> Result<ChunkStream, ProviderError> {
        self.respect_rate_limit(provider, cancel).await?;

        let spec = self.registry.provider_spec(provider).ok_or_else(|| {
            ProviderError::MissingConfiguration(format!("provider not registered: {provider}"))
        })?;
        let mut config = BTreeMap::new();
        if let Some(key) = self.secrets.api_key(provider) {
            config.insert("api_key".to_string(), key);
        }
        let instance = self.registry.get_provider(provider, &config)?;
        let params = GenerationParams {
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };
        let use_stream = request.stream && spec.has_capability(ProviderCapability::Streaming);

        let mut delay = self.config.retry_initial_delay;
        let mut last_error = ProviderError::Other("no attempts made".to_string());
        let mut attempt_messages: Vec<String> = Vec::new();
        for attempt in 1..=self.config.retry_attempts.max(1) {
            let started = Instant::now();
            let call = async {
                if use_stream {
                    instance.stream(&request.message, &params).await
                } else {
                    let text = instance.generate(&request.message, &params).await?;
                    Ok(futures::stream::once(async move { Ok(text) }).boxed())
                }
            };
            let outcome = tokio::select! {
                result = tokio::time::timeout(self.config.call_timeout, call) => match result {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ProviderError::Timeout(format!(
                        "provider call exceeded {:?}",
                        self.config.call_timeout
                    ))),
                },
                () = cancel.cancelled() => Err(ProviderError::Cancelled),
            };
            let elapsed = started.elapsed();

            match outcome {
                Ok(stream) => {
                    self.health.record_success(provider, elapsed).await;
                    self.metrics
                        .histogram(
                            names::PROVIDER_LATENCY_SECONDS,
                            &[("provider", provider), ("policy", self.active_policy().as_str())],
                        )
                        .observe(elapsed.as_secs_f64());
                    tracing::info!(
                        event = RouterEvent::AttemptSucceeded.as_str(),
                        correlation_id = %request.correlation_id,
                        provider,
                        attempt,
                        elapsed_ms = elapsed.as_millis(),
                        "provider attempt succeeded"
                    );
                    return Ok(stream);
                }
                Err(ProviderError::Cancelled) => return Err(ProviderError::Cancelled),
                Err(error) => {
                    self.health.record_failure(provider, elapsed, &error).await;
                    self.metrics
                        .counter(
                            names::PROVIDER_FAILURES_TOTAL,
                            &[("provider", provider), ("error_type", error.error_type())],
                        )
                        .inc();
                    tracing::warn!(
                        event = RouterEvent::AttemptFailed.as_str(),
                        correlation_id = %request.correlation_id,
                        provider,
                        attempt,
                        attempts = self.config.retry_attempts,
                        elapsed_ms = elapsed.as_millis(),
                        error = %error,
                        "provider attempt failed"
                    );
                    let retryable = error.is_retryable();
                    let message = error.to_string();
                    if !attempt_messages.contains(&message) {
                        attempt_messages.push(message);
                    }
                    last_error = error;
                    if !retryable || attempt >= self.config.retry_attempts {
                        break;
                    }
                    let base = delay.min(self.config.retry_max_delay);
                    let jitter = self.config.retry_jitter.mul_f64(rand::random::<f64>());
                    tracing::debug!(
                        event = RouterEvent::AttemptRetrying.as_str(),
                        correlation_id = %request.correlation_id,
                        provider,
                        attempt,
                        backoff_ms = (base + jitter).as_millis(),
                        "retrying provider after backoff"
                    );
                    tokio::select! {
                        () = tokio::time::sleep(base + jitter) => {}
                        () = cancel.cancelled() => return Err(ProviderError::Cancelled),
                    }
                    delay = delay.saturating_mul(2);
                }
            }
        }
        Err(aggregate_attempt_error(provider, last_error, &attempt_messages))
    }

    async fn respect_rate_limit(
        &self,
        provider: &str,
        cancel: &CancellationToken,
    ) -> Result<(), ProviderError> {
        self.health.track(provider);
        let limit = self.rate_limit_for(provider);
        let SlotDecision::WaitUntil(boundary) = self.health.acquire_slot(provider, &limit).await
        else {
            return Ok(());
        };
        // Sleep to the window boundary (capped), then retry exactly once.
        let wait = boundary
            .saturating_duration_since(Instant::now())
            .min(self.config.rate_limit_wait_cap)
            + Duration::from_millis(1);
        tracing::warn!(
            event = RouterEvent::RateLimitWait.as_str(),
            provider,
            wait_ms = wait.as_millis(),
            "rate-limit window exhausted; waiting for the boundary"
        );
        tokio::select! {
            () = tokio::time::sleep(wait) => {}
            () = cancel.cancelled() => return Err(ProviderError::Cancelled),
        }
        match self.health.acquire_slot(provider, &limit).await {
            SlotDecision::Proceed => Ok(()),
            SlotDecision::WaitUntil(_) => Err(ProviderError::RateLimited(format!(
                "rate-limit window still exhausted for {provider}"
            ))),
        }
    }

    fn degraded_outcome(&self, request: &RoutingRequest, failures: &[FailureRecord]) -> ChatOutcome {
        let reason = infer_degraded_reason(failures);
        if let Some(last) = failures.last() {
            self.record_fallback(&last.provider, "degraded", reason.as_str());
        }
        let failed: Vec<String> =
            failures.iter().map(|record| record.provider.clone()).collect();
        let text = self.degraded.respond(&request.message, reason, &failed);
        ChatOutcome {
            provider: None,
            model: None,
            degraded_reason: Some(reason),
            stream: futures::stream::once(async move { Ok(text) }).boxed(),
        }
    }

    /// Status of every registered provider plus a health summary.
    pub async fn get_provider_status(&self) -> RouterStatusSnapshot {
        let mut providers = BTreeMap::new();
        let mut healthy = 0;
        let mut unhealthy = 0;
        for name in self.registry.list_providers(None) {
            self.health.track(&name);
            let Some(snapshot) = self.health.snapshot(&name).await else {
                continue;
            };
            if snapshot.is_healthy {
                healthy += 1;
            } else {
                unhealthy += 1;
            }
            let spec = self.registry.provider_spec(&name);
            let priority = self
                .priorities
                .read()
                .map(|priorities| priorities.bucket_for(&name))
                .unwrap_or(ProviderPriority::Fallback);
            providers.insert(
                name.clone(),
                ProviderStatusEntry {
                    priority: priority.as_str(),
                    supports_streaming: spec
                        .as_ref()
                        .is_some_and(|spec| spec.has_capability(ProviderCapability::Streaming)),
                    requires_api_key: spec.as_ref().is_some_and(|spec| spec.requires_api_key),
                    default_model: spec.and_then(|spec| spec.default_model),
                    health: snapshot,
                },
            );
        }
        RouterStatusSnapshot {
            policy: self.active_policy(),
            total: providers.len(),
            providers,
            healthy,
            unhealthy,
            degraded: self.degraded.snapshot(),
        }
    }

    /// Probe every provider once and fold the results into the ledger.
    pub async fn refresh_provider_health(&self) {
        for name in self.registry.list_providers(None) {
            self.health.track(&name);
            let report = self.registry.health_check(&name, self.config.health_check_timeout).await;
            self.health.observe_probe(&name, report.ok, report.detail.clone()).await;
        }
        tracing::debug!(
            event = RouterEvent::HealthRefreshed.as_str(),
            "provider health refresh completed"
        );
    }

    /// Start the background health monitor if it is not already running.
    /// Double-start is prevented by the lock and a finished-handle check.
    pub async fn ensure_background_monitor(&self) {
        let mut guard = self.monitor.lock().await;
        if let Some(handle) = guard.as_ref()
            && !handle.is_finished()
        {
            return;
        }
        let registry = self.registry.clone();
        let ledger = self.health.clone();
        let interval = self.config.health_refresh_interval;
        let timeout = self.config.health_check_timeout;
        let cancel = self.monitor_cancel.clone();
        tracing::info!(
            event = RouterEvent::HealthMonitorStarted.as_str(),
            interval_secs = interval.as_secs(),
            "background health monitor started"
        );
        *guard = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // Consume the immediate tick; selection just ran its own checks.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for name in registry.list_providers(None) {
                            ledger.track(&name);
                            let report = registry.health_check(&name, timeout).await;
                            ledger.observe_probe(&name, report.ok, report.detail.clone()).await;
                        }
                        tracing::debug!(
                            event = RouterEvent::HealthRefreshed.as_str(),
                            "background provider health refresh completed"
                        );
                    }
                    () = cancel.cancelled() => break,
                }
            }
        }));
    }

    /// Cancel the background monitor. Idempotent.
    pub async fn shutdown(&self) {
        self.monitor_cancel.cancel();
        let handle = self.monitor.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
            tracing::info!(
                event = RouterEvent::HealthMonitorStopped.as_str(),
                "background health monitor stopped"
            );
        }
    }
}

/// Fold every attempt's message into one error, preserving the kind of the
/// final failure so downstream classification still holds.
fn aggregate_attempt_error(
    provider: &str,
    last_error: ProviderError,
    messages: &[String],
) -> ProviderError {
    if messages.len() <= 1 {
        return last_error;
    }
    let summary = format!(
        "{provider} exhausted its retries ({} distinct errors): {}",
        messages.len(),
        messages.join("; ")
    );
    match last_error {
        ProviderError::RateLimited(_) => ProviderError::RateLimited(summary),
        ProviderError::Timeout(_) => ProviderError::Timeout(summary),
        ProviderError::Network(_) => ProviderError::Network(summary),
        ProviderError::ResourceExhausted(_) => ProviderError::ResourceExhausted(summary),
        ProviderError::MissingConfiguration(_) => ProviderError::MissingConfiguration(summary),
        ProviderError::Incapable(_) => ProviderError::Incapable(summary),
        ProviderError::Cancelled => ProviderError::Cancelled,
        ProviderError::Other(_) => ProviderError::Other(summary),
    }
}

fn cancelled_outcome() -> ChatOutcome {
    ChatOutcome {
        provider: None,
        model: None,
        degraded_reason: None,
        stream: futures::stream::once(async { Err(ProviderError::Cancelled) }).boxed(),
    }
}

/// Terminate the chunk sequence promptly when the token fires.
fn with_cancellation(stream: ChunkStream, cancel: CancellationToken) -> ChunkStream {
    futures::stream::unfold((stream, cancel), |(mut stream, cancel)| async move {
        tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            item = stream.next() => item.map(|item| (item, (stream, cancel))),
        }
    })
    .boxed()
}

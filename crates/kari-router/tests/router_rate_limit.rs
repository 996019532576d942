#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use kari_observability::{MetricsRegistry, names};
use kari_router::test_support::{ScriptedProvider, scripted_spec};
use kari_router::{
    LlmRegistry, LlmRouter, ProviderError, ProviderPriority, RateLimitConfig, RouterConfig,
    RoutingRequest, SecretResolver, collect_text,
};
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn window_is_never_exceeded_and_waits_for_the_boundary() -> Result<()> {
    let provider = Arc::new(ScriptedProvider::new("local"));
    let mut config = RouterConfig::default();
    config.rate_limit_overrides.insert(
        "local".to_string(),
        RateLimitConfig {
            max_requests: 2,
            window: Duration::from_secs(2),
        },
    );
    let router = LlmRouter::new(
        Arc::new(LlmRegistry::new()),
        Arc::new(MetricsRegistry::new()),
        Arc::new(SecretResolver::with_sources(Vec::new())),
        config,
    );
    router.register_provider(scripted_spec(provider.clone(), "m"));
    router.set_provider_priority("local", ProviderPriority::Local);
    let cancel = CancellationToken::new();

    let started = tokio::time::Instant::now();
    for _ in 0..2 {
        let outcome = router.process_chat_request(RoutingRequest::new("hi"), &cancel).await;
        assert!(outcome.degraded_reason.is_none());
    }
    // Window is full: the third dispatch sleeps to the boundary, refills,
    // and then proceeds.
    let outcome = router.process_chat_request(RoutingRequest::new("hi"), &cancel).await;
    assert!(outcome.degraded_reason.is_none());
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(provider.calls(), 3);

    router.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn rate_limit_error_sets_cooldown_and_falls_back() -> Result<()> {
    let local = Arc::new(ScriptedProvider::new("local"));
    let remote = Arc::new(ScriptedProvider::new("openai"));
    let metrics = Arc::new(MetricsRegistry::new());
    let router = LlmRouter::new(
        Arc::new(LlmRegistry::new()),
        metrics.clone(),
        Arc::new(SecretResolver::with_sources(Vec::new())),
        RouterConfig::default(),
    );
    router.register_provider(scripted_spec(local.clone(), "local-default"));
    router.set_provider_priority("local", ProviderPriority::Local);
    let mut spec = scripted_spec(remote.clone(), "gpt-test");
    spec.requires_api_key = false;
    router.register_provider(spec);
    router.set_provider_priority("openai", ProviderPriority::Remote);
    let cancel = CancellationToken::new();

    // The local provider reports throttling with the legacy wire phrasing;
    // the classifier lands it in the rate-limited kind.
    local.push_result(Err(ProviderError::from_message("429 Too Many Requests")));
    let outcome = router.process_chat_request(RoutingRequest::new("hi"), &cancel).await;

    assert_eq!(outcome.provider.as_deref(), Some("openai"));
    let text = collect_text(outcome.stream).await?;
    assert_eq!(text, "response from openai");

    // Cooldown of at least 15s is recorded against the throttled provider.
    let snapshot = router
        .health()
        .snapshot("local")
        .await
        .ok_or_else(|| anyhow::anyhow!("local not tracked"))?;
    let remaining = snapshot
        .rate_limited_remaining_ms
        .ok_or_else(|| anyhow::anyhow!("no rate-limit cooldown recorded"))?;
    assert!(remaining >= 14_000, "cooldown too short: {remaining}ms");

    // The fallback transition is recorded with the inferred reason.
    assert_eq!(
        metrics.counter_value(
            names::PROVIDER_FALLBACKS_TOTAL,
            &[("from", "local"), ("to", "openai"), ("reason", "api_rate_limits")],
        ),
        1
    );
    assert_eq!(
        metrics.counter_value(
            names::PROVIDER_FAILURES_TOTAL,
            &[("provider", "local"), ("error_type", "rate_limited")],
        ),
        1
    );

    router.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn exhausted_providers_degrade_rather_than_queueing_forever() -> Result<()> {
    let provider = Arc::new(ScriptedProvider::new("local"));
    let mut config = RouterConfig::default();
    config.rate_limit_overrides.insert(
        "local".to_string(),
        RateLimitConfig {
            max_requests: 1,
            // Window far beyond the 15s wait cap: the dispatch gives up
            // instead of queueing indefinitely.
            window: Duration::from_secs(120),
        },
    );
    let router = LlmRouter::new(
        Arc::new(LlmRegistry::new()),
        Arc::new(MetricsRegistry::new()),
        Arc::new(SecretResolver::with_sources(Vec::new())),
        config,
    );
    router.register_provider(scripted_spec(provider.clone(), "m"));
    router.set_provider_priority("local", ProviderPriority::Local);
    let cancel = CancellationToken::new();

    let outcome = router.process_chat_request(RoutingRequest::new("one"), &cancel).await;
    assert!(outcome.degraded_reason.is_none());

    let outcome = router.process_chat_request(RoutingRequest::new("two"), &cancel).await;
    assert_eq!(
        outcome.degraded_reason,
        Some(kari_router::DegradedReason::ApiRateLimits)
    );
    assert_eq!(provider.calls(), 1);

    router.shutdown().await;
    Ok(())
}

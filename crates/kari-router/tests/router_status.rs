#![allow(missing_docs)]

use std::sync::Arc;

use anyhow::Result;
use kari_observability::MetricsRegistry;
use kari_router::test_support::{ScriptedProvider, scripted_spec};
use kari_router::{
    LlmRegistry, LlmRouter, ProviderCapability, ProviderError, ProviderPriority, RouterConfig,
    RoutingPolicy, RoutingRequest, SecretResolver, collect_text,
};
use tokio_util::sync::CancellationToken;

fn router_with_providers(
    providers: &[(&str, ProviderPriority, Arc<ScriptedProvider>)],
) -> LlmRouter {
    let router = LlmRouter::new(
        Arc::new(LlmRegistry::new()),
        Arc::new(MetricsRegistry::new()),
        Arc::new(SecretResolver::with_sources(Vec::new())),
        RouterConfig::default(),
    );
    for (name, priority, provider) in providers {
        router.register_provider(scripted_spec(provider.clone(), &format!("{name}-default")));
        router.set_provider_priority(name, *priority);
    }
    router
}

#[tokio::test(start_paused = true)]
async fn status_snapshot_reports_latency_and_summary() -> Result<()> {
    let solo = Arc::new(ScriptedProvider::new("solo"));
    let router = router_with_providers(&[("solo", ProviderPriority::Local, solo.clone())]);
    let cancel = CancellationToken::new();

    for _ in 0..5 {
        let outcome = router.process_chat_request(RoutingRequest::new("hi"), &cancel).await;
        assert!(outcome.degraded_reason.is_none());
        let _ = collect_text(outcome.stream).await?;
    }

    let status = router.get_provider_status().await;
    assert_eq!(status.total, 1);
    assert_eq!(status.healthy, 1);
    assert_eq!(status.unhealthy, 0);
    assert_eq!(status.policy, RoutingPolicy::Priority);
    let solo_entry = status
        .providers
        .get("solo")
        .ok_or_else(|| anyhow::anyhow!("solo missing"))?;
    assert_eq!(solo_entry.priority, "local");
    assert_eq!(solo_entry.default_model.as_deref(), Some("solo-default"));
    assert!(solo_entry.supports_streaming);
    assert_eq!(solo_entry.health.total_requests, 5);
    assert!(solo_entry.health.latency_avg_ms.is_some());
    assert!(solo_entry.health.latency_p95_ms.is_some());

    router.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn degraded_activations_surface_in_the_status_snapshot() -> Result<()> {
    let router = router_with_providers(&[]);
    let cancel = CancellationToken::new();

    let outcome = router.process_chat_request(RoutingRequest::new("hi"), &cancel).await;
    assert!(outcome.degraded_reason.is_some());

    let status = router.get_provider_status().await;
    assert_eq!(status.degraded.activations, 1);
    assert!(status.degraded.last_reason.is_some());
    assert!(status.degraded.last_activated_ms.is_some());

    router.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn hybrid_policy_rotates_within_buckets_across_requests() -> Result<()> {
    let a = Arc::new(ScriptedProvider::new("local_a"));
    let b = Arc::new(ScriptedProvider::new("local_b"));
    let remote = Arc::new(ScriptedProvider::new("remote_c"));
    let router = router_with_providers(&[
        ("local_a", ProviderPriority::Local, a),
        ("local_b", ProviderPriority::Local, b),
        ("remote_c", ProviderPriority::Remote, remote),
    ]);
    router.configure_routing(RoutingPolicy::Hybrid, None);

    let request = RoutingRequest::new("hi");
    let first = router.select_provider(&request).await.map(|(name, _)| name);
    let second = router.select_provider(&request).await.map(|(name, _)| name);
    let third = router.select_provider(&request).await.map(|(name, _)| name);
    // Rotation stays inside the local bucket; the remote provider never
    // jumps the ladder.
    assert_eq!(first.as_deref(), Some("local_a"));
    assert_eq!(second.as_deref(), Some("local_b"));
    assert_eq!(third.as_deref(), Some("local_a"));

    router.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn configure_routing_resets_rotation_state() -> Result<()> {
    let a = Arc::new(ScriptedProvider::new("alpha"));
    let b = Arc::new(ScriptedProvider::new("beta"));
    let router = router_with_providers(&[
        ("alpha", ProviderPriority::Remote, a),
        ("beta", ProviderPriority::Remote, b),
    ]);
    router.configure_routing(RoutingPolicy::RoundRobin, None);

    let request = RoutingRequest::new("hi");
    let first = router.select_provider(&request).await.map(|(name, _)| name);
    assert_eq!(first.as_deref(), Some("alpha"));

    // Reconfiguring resets the cursor back to the head of the list.
    router.configure_routing(RoutingPolicy::RoundRobin, None);
    let after_reset = router.select_provider(&request).await.map(|(name, _)| name);
    assert_eq!(after_reset.as_deref(), Some("alpha"));

    router.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn embed_texts_uses_the_first_healthy_embeddings_provider() -> Result<()> {
    let chat_only = Arc::new(ScriptedProvider::new("chat_only"));
    let embedder = Arc::new(
        ScriptedProvider::new("embedder").with_capabilities(vec![
            ProviderCapability::Streaming,
            ProviderCapability::Embeddings,
        ]),
    );
    embedder.set_embeddings(vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    let router = router_with_providers(&[
        ("chat_only", ProviderPriority::Local, chat_only),
        ("embedder", ProviderPriority::Remote, embedder),
    ]);

    let vectors = router.embed_texts(&["a".to_string(), "b".to_string()]).await?;
    assert_eq!(vectors.len(), 2);

    router.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn embed_texts_without_an_embeddings_provider_is_incapable() -> Result<()> {
    let chat_only = Arc::new(ScriptedProvider::new("chat_only"));
    let router = router_with_providers(&[("chat_only", ProviderPriority::Local, chat_only)]);
    let result = router.embed_texts(&["a".to_string()]).await;
    assert!(matches!(result, Err(ProviderError::Incapable(_))));
    router.shutdown().await;
    Ok(())
}

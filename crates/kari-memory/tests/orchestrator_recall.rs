#![allow(missing_docs)]

use std::sync::Arc;

use anyhow::Result;
use kari_memory::adapters::{
    InMemoryAnalyticsAdapter, InMemoryAuthoritativeAdapter, InMemoryCacheAdapter,
    InMemoryTextIndexAdapter, InMemoryVectorAdapter,
};
use kari_memory::{AdapterSet, Enricher, MemoryOrchestrator, RecallTier};
use kari_observability::{CorrelationId, MetricsRegistry, names};
use kari_types::TenantContext;
use tokio_util::sync::CancellationToken;

fn ctx() -> TenantContext {
    TenantContext::new("t1", "u1")
}

fn orchestrator_with(adapters: AdapterSet) -> MemoryOrchestrator {
    MemoryOrchestrator::new(adapters, Arc::new(MetricsRegistry::new()), Enricher::heuristic())
}

fn seeded_core() -> (
    MemoryOrchestrator,
    Arc<InMemoryVectorAdapter>,
    Arc<InMemoryAuthoritativeAdapter>,
    Arc<InMemoryCacheAdapter>,
) {
    let vector = Arc::new(InMemoryVectorAdapter::new());
    let authoritative = Arc::new(InMemoryAuthoritativeAdapter::new());
    let cache = Arc::new(InMemoryCacheAdapter::new());
    let adapters = AdapterSet::new()
        .with_vector(vector.clone())
        .with_authoritative(authoritative.clone())
        .with_cache(cache.clone());
    (orchestrator_with(adapters), vector, authoritative, cache)
}

#[tokio::test]
async fn recall_after_write_hits_the_vector_tier_first() -> Result<()> {
    let (orchestrator, _, _, _) = seeded_core();
    let correlation_id = CorrelationId::new_router();
    let cancel = CancellationToken::new();

    orchestrator
        .update_memory(&ctx(), "likes python", serde_json::json!({"value": true}), &correlation_id, &cancel)
        .await?;

    let hits = orchestrator
        .recall_context(&ctx(), "python", 5, &correlation_id, &cancel)
        .await?;
    assert!(!hits.is_empty());
    assert_eq!(hits[0].entry.query, "likes python");
    assert_eq!(hits[0].tier, RecallTier::Vector);
    assert!(!hits[0].stale);
    assert!(hits[0].observed_at_ms > 0);
    Ok(())
}

#[tokio::test]
async fn recall_never_exceeds_the_requested_limit() -> Result<()> {
    let (orchestrator, _, _, _) = seeded_core();
    let correlation_id = CorrelationId::new_router();
    let cancel = CancellationToken::new();

    for index in 0..8 {
        orchestrator
            .update_memory(&ctx(), &format!("python note {index}"), serde_json::json!(index), &correlation_id, &cancel)
            .await?;
    }

    let hits = orchestrator
        .recall_context(&ctx(), "python", 3, &correlation_id, &cancel)
        .await?;
    assert!(hits.len() <= 3);
    Ok(())
}

#[tokio::test]
async fn failed_vector_tier_is_skipped_not_fatal() -> Result<()> {
    let (orchestrator, vector, _, _) = seeded_core();
    let correlation_id = CorrelationId::new_router();
    let cancel = CancellationToken::new();

    orchestrator
        .update_memory(&ctx(), "likes rust", serde_json::json!({"value": true}), &correlation_id, &cancel)
        .await?;
    vector.set_available(false);

    let hits = orchestrator
        .recall_context(&ctx(), "rust", 5, &correlation_id, &cancel)
        .await?;
    assert!(!hits.is_empty(), "authoritative tier should serve after vector fails");
    assert_eq!(hits[0].tier, RecallTier::Authoritative);
    Ok(())
}

#[tokio::test]
async fn total_miss_returns_empty_and_counts_a_miss() -> Result<()> {
    let metrics = Arc::new(MetricsRegistry::new());
    let orchestrator = MemoryOrchestrator::new(
        AdapterSet::new().with_vector(Arc::new(InMemoryVectorAdapter::new())),
        metrics.clone(),
        Enricher::heuristic(),
    );
    let correlation_id = CorrelationId::new_router();
    let cancel = CancellationToken::new();

    let hits = orchestrator
        .recall_context(&ctx(), "nothing indexed", 5, &correlation_id, &cancel)
        .await?;
    assert!(hits.is_empty());
    assert_eq!(metrics.counter_value(names::MEMORY_RECALL_MISS_TOTAL, &[]), 1);
    assert_eq!(metrics.counter_value(names::MEMORY_RECALL_TOTAL, &[]), 1);
    Ok(())
}

#[tokio::test]
async fn analytics_tier_is_last_resort_and_marked_stale() -> Result<()> {
    let analytics = Arc::new(InMemoryAnalyticsAdapter::new());
    let entry = kari_types::MemoryEntry::new(&ctx(), "historic python stats", serde_json::json!(1));
    analytics.preload(vec![entry]).await;

    let orchestrator = orchestrator_with(AdapterSet::new().with_analytics(analytics));
    let correlation_id = CorrelationId::new_router();
    let cancel = CancellationToken::new();

    let hits = orchestrator
        .recall_context(&ctx(), "python", 5, &correlation_id, &cancel)
        .await?;
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].tier, RecallTier::Analytics);
    assert!(hits[0].stale);
    Ok(())
}

#[tokio::test]
async fn text_index_serves_before_authoritative() -> Result<()> {
    let text_index = Arc::new(InMemoryTextIndexAdapter::new());
    let authoritative = Arc::new(InMemoryAuthoritativeAdapter::new());
    let orchestrator = orchestrator_with(
        AdapterSet::new()
            .with_text_index(text_index)
            .with_authoritative(authoritative),
    );
    let correlation_id = CorrelationId::new_router();
    let cancel = CancellationToken::new();

    orchestrator
        .update_memory(&ctx(), "keyword searchable note", serde_json::json!("x"), &correlation_id, &cancel)
        .await?;

    let hits = orchestrator
        .recall_context(&ctx(), "searchable", 5, &correlation_id, &cancel)
        .await?;
    assert_eq!(hits[0].tier, RecallTier::TextIndex);
    Ok(())
}

#[tokio::test]
async fn written_quadruple_matches_on_exact_query_recall() -> Result<()> {
    let (orchestrator, _, _, _) = seeded_core();
    let correlation_id = CorrelationId::new_router();
    let cancel = CancellationToken::new();

    orchestrator
        .update_memory(&ctx(), "favorite editor", serde_json::json!("helix"), &correlation_id, &cancel)
        .await?;
    let hits = orchestrator
        .recall_context(&ctx(), "favorite editor", 5, &correlation_id, &cancel)
        .await?;
    let hit = hits.first().ok_or_else(|| anyhow::anyhow!("no recall hit"))?;
    assert_eq!(hit.entry.tenant_id, "t1");
    assert_eq!(hit.entry.user_id, "u1");
    assert_eq!(hit.entry.query, "favorite editor");
    assert_eq!(hit.entry.result, serde_json::json!("helix"));
    Ok(())
}

#[tokio::test]
async fn cancelled_recall_surfaces_the_cancelled_kind() -> Result<()> {
    let (orchestrator, _, _, _) = seeded_core();
    let correlation_id = CorrelationId::new_router();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = orchestrator
        .recall_context(&ctx(), "python", 5, &correlation_id, &cancel)
        .await;
    assert!(matches!(result, Err(kari_memory::MemoryError::Cancelled)));
    Ok(())
}

#[tokio::test]
async fn recall_is_tenant_scoped() -> Result<()> {
    let (orchestrator, _, _, _) = seeded_core();
    let correlation_id = CorrelationId::new_router();
    let cancel = CancellationToken::new();

    orchestrator
        .update_memory(&ctx(), "likes python", serde_json::json!(true), &correlation_id, &cancel)
        .await?;

    let other = TenantContext::new("t2", "u9");
    let hits = orchestrator
        .recall_context(&other, "python", 5, &correlation_id, &cancel)
        .await?;
    assert!(hits.is_empty());
    Ok(())
}

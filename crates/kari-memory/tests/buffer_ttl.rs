#![allow(missing_docs)]

//! Buffer and short-term cache TTL behavior under the paused clock.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use kari_memory::adapters::{
    InMemoryAuthoritativeAdapter, InMemoryCacheAdapter, InMemoryVectorAdapter,
};
use kari_memory::{
    AdapterSet, BUFFER_PREFIX, BUFFER_TTL, CacheAdapter, Enricher, MemoryOrchestrator, Reconciler,
    ReconcilerConfig, SHORT_TERM_TTL, buffer_prefix_for, short_term_key,
};
use kari_observability::{CorrelationId, MetricsRegistry};
use kari_types::TenantContext;
use tokio_util::sync::CancellationToken;

fn ctx() -> TenantContext {
    TenantContext::new("t1", "u1")
}

#[tokio::test(start_paused = true)]
async fn buffered_write_is_lost_after_its_ttl() -> Result<()> {
    let authoritative = Arc::new(InMemoryAuthoritativeAdapter::new());
    let cache = Arc::new(InMemoryCacheAdapter::new());
    let adapters = AdapterSet::new()
        .with_vector(Arc::new(InMemoryVectorAdapter::new()))
        .with_authoritative(authoritative.clone())
        .with_cache(cache.clone());
    let orchestrator =
        MemoryOrchestrator::new(adapters, Arc::new(MetricsRegistry::new()), Enricher::heuristic());
    let correlation_id = CorrelationId::new_model_op();
    let cancel = CancellationToken::new();

    authoritative.set_available(false);
    orchestrator
        .update_memory(&ctx(), "doomed buffer", serde_json::json!(1), &correlation_id, &cancel)
        .await?;
    assert_eq!(cache.scan(&buffer_prefix_for("t1", "u1")).await?.len(), 1);

    // Past the one-hour buffer TTL the write is gone; a later recovery has
    // nothing to replay.
    tokio::time::advance(BUFFER_TTL + Duration::from_secs(1)).await;
    assert!(cache.scan(BUFFER_PREFIX).await?.is_empty());

    authoritative.set_available(true);
    let handle = Reconciler::new(authoritative.clone(), cache, ReconcilerConfig::default()).spawn();
    tokio::time::advance(Duration::from_secs(6)).await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(authoritative.is_empty().await, "an expired buffer entry must not replay");
    handle.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn short_term_cache_expires_after_thirty_minutes() -> Result<()> {
    let vector = Arc::new(InMemoryVectorAdapter::new());
    let authoritative = Arc::new(InMemoryAuthoritativeAdapter::new());
    let cache = Arc::new(InMemoryCacheAdapter::new());
    let adapters = AdapterSet::new()
        .with_vector(vector.clone())
        .with_authoritative(authoritative.clone())
        .with_cache(cache.clone());
    let orchestrator =
        MemoryOrchestrator::new(adapters, Arc::new(MetricsRegistry::new()), Enricher::heuristic());
    let correlation_id = CorrelationId::new_model_op();
    let cancel = CancellationToken::new();

    orchestrator
        .update_memory(&ctx(), "short lived", serde_json::json!(1), &correlation_id, &cancel)
        .await?;
    assert!(cache.get(&short_term_key("t1", "u1")).await?.is_some());

    tokio::time::advance(SHORT_TERM_TTL + Duration::from_secs(1)).await;
    assert!(cache.get(&short_term_key("t1", "u1")).await?.is_none());

    // With the cache expired and the other tiers down, recall misses.
    vector.set_available(false);
    authoritative.set_available(false);
    let hits = orchestrator
        .recall_context(&ctx(), "short lived", 5, &correlation_id, &cancel)
        .await?;
    assert!(hits.is_empty());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn short_term_cache_caps_retained_entries() -> Result<()> {
    let cache = Arc::new(InMemoryCacheAdapter::new());
    let adapters = AdapterSet::new().with_cache(cache.clone());
    let orchestrator =
        MemoryOrchestrator::new(adapters, Arc::new(MetricsRegistry::new()), Enricher::heuristic());
    let correlation_id = CorrelationId::new_model_op();
    let cancel = CancellationToken::new();

    for index in 0..60 {
        orchestrator
            .update_memory(&ctx(), &format!("note {index}"), serde_json::json!(index), &correlation_id, &cancel)
            .await?;
    }

    let payload = cache
        .get(&short_term_key("t1", "u1"))
        .await?
        .ok_or_else(|| anyhow::anyhow!("short-term cache entry missing"))?;
    let entries: Vec<kari_types::MemoryEntry> = serde_json::from_str(&payload)?;
    assert_eq!(entries.len(), 50, "short-term cache retains the newest fifty entries");
    assert_eq!(entries.last().map(|entry| entry.query.as_str()), Some("note 59"));
    Ok(())
}

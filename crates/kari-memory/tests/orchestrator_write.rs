#![allow(missing_docs)]

use std::sync::Arc;

use anyhow::Result;
use kari_memory::adapters::{
    InMemoryAuthoritativeAdapter, InMemoryCacheAdapter, InMemoryVectorAdapter,
};
use kari_memory::{
    AdapterSet, AuthoritativeAdapter, BUFFER_PREFIX, CacheAdapter, Enricher, MemoryError,
    MemoryOrchestrator,
};
use kari_observability::{CorrelationId, MetricsRegistry, names};
use kari_types::TenantContext;
use tokio_util::sync::CancellationToken;

fn ctx() -> TenantContext {
    TenantContext::new("t1", "u1")
}

#[tokio::test]
async fn fanout_reports_every_accepting_adapter_and_captures_vector_id() -> Result<()> {
    let metrics = Arc::new(MetricsRegistry::new());
    let adapters = AdapterSet::new()
        .with_vector(Arc::new(InMemoryVectorAdapter::new()))
        .with_authoritative(Arc::new(InMemoryAuthoritativeAdapter::new()))
        .with_cache(Arc::new(InMemoryCacheAdapter::new()));
    let orchestrator = MemoryOrchestrator::new(adapters, metrics.clone(), Enricher::heuristic());
    let correlation_id = CorrelationId::new_router();
    let cancel = CancellationToken::new();

    let receipt = orchestrator
        .update_memory(&ctx(), "likes python", serde_json::json!({"value": true}), &correlation_id, &cancel)
        .await?;

    assert!(receipt.accepted.contains(&"vector"));
    assert!(receipt.accepted.contains(&"authoritative"));
    assert!(receipt.accepted.contains(&"cache"));
    assert!(receipt.vector_id.is_some());
    assert!(!receipt.buffered);
    assert!(receipt.failures.is_empty());
    assert_eq!(metrics.counter_value(names::MEMORY_STORE_TOTAL, &[]), 1);
    Ok(())
}

#[tokio::test]
async fn authoritative_outage_buffers_the_write() -> Result<()> {
    let authoritative = Arc::new(InMemoryAuthoritativeAdapter::new());
    let cache = Arc::new(InMemoryCacheAdapter::new());
    let adapters = AdapterSet::new()
        .with_vector(Arc::new(InMemoryVectorAdapter::new()))
        .with_authoritative(authoritative.clone())
        .with_cache(cache.clone());
    let orchestrator =
        MemoryOrchestrator::new(adapters, Arc::new(MetricsRegistry::new()), Enricher::heuristic());
    let correlation_id = CorrelationId::new_router();
    let cancel = CancellationToken::new();

    authoritative.set_available(false);
    let receipt = orchestrator
        .update_memory(&ctx(), "q2", serde_json::json!({"v": 2}), &correlation_id, &cancel)
        .await?;

    assert!(receipt.buffered);
    assert!(receipt.accepted.contains(&"vector"));
    assert!(receipt.accepted.contains(&"cache"));
    assert!(receipt.failures.iter().any(|f| f.adapter == "authoritative"));
    assert!(!orchestrator.authoritative_healthy());

    let buffered_keys = cache.scan(BUFFER_PREFIX).await?;
    assert_eq!(buffered_keys.len(), 1);
    assert!(buffered_keys[0].starts_with("kari:mem:buffer:t1:u1:"));
    Ok(())
}

#[tokio::test]
async fn cache_outage_disables_buffering_without_failing_the_write() -> Result<()> {
    let authoritative = Arc::new(InMemoryAuthoritativeAdapter::new());
    let cache = Arc::new(InMemoryCacheAdapter::new());
    let adapters = AdapterSet::new()
        .with_vector(Arc::new(InMemoryVectorAdapter::new()))
        .with_authoritative(authoritative.clone())
        .with_cache(cache.clone());
    let orchestrator =
        MemoryOrchestrator::new(adapters, Arc::new(MetricsRegistry::new()), Enricher::heuristic());
    let correlation_id = CorrelationId::new_router();
    let cancel = CancellationToken::new();

    authoritative.set_available(false);
    cache.set_available(false);
    let receipt = orchestrator
        .update_memory(&ctx(), "q3", serde_json::json!(3), &correlation_id, &cancel)
        .await?;

    assert_eq!(receipt.accepted, vec!["vector"]);
    assert!(receipt.failures.iter().any(|f| f.adapter == "cache"));
    Ok(())
}

#[tokio::test]
async fn write_rejected_everywhere_surfaces_per_adapter_errors() -> Result<()> {
    let vector = Arc::new(InMemoryVectorAdapter::new());
    let authoritative = Arc::new(InMemoryAuthoritativeAdapter::new());
    let cache = Arc::new(InMemoryCacheAdapter::new());
    vector.set_available(false);
    authoritative.set_available(false);
    cache.set_available(false);

    let metrics = Arc::new(MetricsRegistry::new());
    let adapters = AdapterSet::new()
        .with_vector(vector)
        .with_authoritative(authoritative)
        .with_cache(cache);
    let orchestrator = MemoryOrchestrator::new(adapters, metrics.clone(), Enricher::heuristic());
    let correlation_id = CorrelationId::new_router();
    let cancel = CancellationToken::new();

    let result = orchestrator
        .update_memory(&ctx(), "doomed", serde_json::json!(0), &correlation_id, &cancel)
        .await;

    match result {
        Err(MemoryError::AllAdaptersFailed { failures }) => {
            let adapters: Vec<&str> = failures.iter().map(|f| f.adapter).collect();
            assert!(adapters.contains(&"vector"));
            assert!(adapters.contains(&"authoritative"));
            assert!(adapters.contains(&"cache"));
        }
        other => anyhow::bail!("expected AllAdaptersFailed, got {other:?}"),
    }
    assert_eq!(metrics.counter_value(names::MEMORY_STORE_TOTAL, &[]), 0);
    Ok(())
}

#[tokio::test]
async fn replaying_an_existing_row_is_an_upsert_noop() -> Result<()> {
    let authoritative = InMemoryAuthoritativeAdapter::new();
    let entry = kari_types::MemoryEntry::new(&ctx(), "q", serde_json::json!(1));
    authoritative.upsert("vec-1", &entry).await?;
    authoritative.upsert("vec-1", &entry).await?;
    assert_eq!(authoritative.len().await, 1);
    Ok(())
}

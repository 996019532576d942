#![allow(missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use kari_core::{Core, CoreConfig};
use kari_memory::adapters::{
    InMemoryAuthoritativeAdapter, InMemoryCacheAdapter, InMemoryVectorAdapter,
};
use kari_memory::{BUFFER_PREFIX, CacheAdapter, ReconcilerConfig};
use kari_observability::names;
use kari_router::RoutingRequest;
use kari_types::TenantContext;
use tokio_util::sync::CancellationToken;

fn ctx() -> TenantContext {
    TenantContext::new("t1", "u1")
}

struct Fixture {
    core: Core,
    vector: Arc<InMemoryVectorAdapter>,
    authoritative: Arc<InMemoryAuthoritativeAdapter>,
}

async fn initialized_core() -> Result<Fixture> {
    let vector = Arc::new(InMemoryVectorAdapter::new());
    let authoritative = Arc::new(InMemoryAuthoritativeAdapter::new());
    let cache = Arc::new(InMemoryCacheAdapter::new());
    let core = Core::builder(CoreConfig::default())
        .with_vector(vector.clone())
        .with_authoritative(authoritative.clone())
        .with_cache(cache)
        .initialize()
        .await?;
    Ok(Fixture {
        core,
        vector,
        authoritative,
    })
}

#[tokio::test]
async fn store_then_recall_with_all_adapters_healthy() -> Result<()> {
    let fixture = initialized_core().await?;
    let cancel = CancellationToken::new();

    let receipt = fixture
        .core
        .update_memory(&ctx(), "likes python", serde_json::json!({"value": true}), &cancel)
        .await?;
    assert!(receipt.accepted.contains(&"authoritative"));

    let hits = fixture.core.recall_context(&ctx(), "python", 5, &cancel).await?;
    assert!(hits.iter().any(|hit| hit.entry.query == "likes python"));

    let metrics = fixture.core.metrics();
    assert_eq!(metrics.counter_value(names::MEMORY_STORE_TOTAL, &[]), 1);
    assert_eq!(metrics.counter_value(names::MEMORY_RECALL_TOTAL, &[]), 1);

    fixture.core.shutdown().await;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn authoritative_outage_buffers_and_reconciler_replays() -> Result<()> {
    let vector = Arc::new(InMemoryVectorAdapter::new());
    let authoritative = Arc::new(InMemoryAuthoritativeAdapter::new());
    let cache = Arc::new(InMemoryCacheAdapter::new());
    let mut config = CoreConfig::default();
    config.reconciler = ReconcilerConfig {
        interval: Duration::from_secs(5),
        drain_budget: 200,
        health_timeout: Duration::from_secs(2),
    };
    let core = Core::builder(config)
        .with_vector(vector.clone())
        .with_authoritative(authoritative.clone())
        .with_cache(cache.clone())
        .initialize()
        .await?;
    let cancel = CancellationToken::new();

    authoritative.set_available(false);
    let receipt = core
        .update_memory(&ctx(), "q2", serde_json::json!({"v": 2}), &cancel)
        .await?;
    assert!(receipt.buffered);
    assert!(receipt.accepted.contains(&"vector"));
    assert!(receipt.accepted.contains(&"cache"));

    let keys = cache.scan(BUFFER_PREFIX).await?;
    assert_eq!(keys.len(), 1);
    assert!(keys[0].starts_with("kari:mem:buffer:t1:u1:"));

    // Recovery plus two reconciler ticks: the buffer key is gone and the
    // authoritative store holds the entry.
    authoritative.set_available(true);
    for _ in 0..2 {
        tokio::time::advance(Duration::from_secs(5)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(cache.scan(BUFFER_PREFIX).await?.is_empty());
    assert!(authoritative.contains_query("q2").await);

    core.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn missing_adapters_never_abort_startup() -> Result<()> {
    let core = Core::builder(CoreConfig::default()).initialize().await?;
    let cancel = CancellationToken::new();

    // No adapters at all: recall misses cleanly, the write surfaces every
    // failure, and chat still answers through the fallback provider.
    let hits = core.recall_context(&ctx(), "anything", 5, &cancel).await?;
    assert!(hits.is_empty());

    let write = core
        .update_memory(&ctx(), "q", serde_json::json!(1), &cancel)
        .await;
    assert!(write.is_err());

    let outcome = core.chat(RoutingRequest::new("hello"), &cancel).await;
    assert_eq!(outcome.provider.as_deref(), Some("fallback"));
    let text = kari_router::collect_text(outcome.stream).await?;
    assert!(text.contains("ref "));

    core.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn shutdown_is_idempotent() -> Result<()> {
    let fixture = initialized_core().await?;
    fixture.core.shutdown().await;
    fixture.core.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn enriched_recall_annotates_entries_end_to_end() -> Result<()> {
    let fixture = initialized_core().await?;
    let cancel = CancellationToken::new();

    fixture
        .core
        .update_memory(&ctx(), "i prefer rust over java", serde_json::json!("noted"), &cancel)
        .await?;
    let enriched = fixture
        .core
        .recall_enriched(&ctx(), "prefer rust", 5, &cancel)
        .await?;
    let first = enriched.first().ok_or_else(|| anyhow::anyhow!("no enriched result"))?;
    assert_eq!(first.memory_type, kari_types::MemoryType::Preference);

    fixture.core.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn vector_outage_degrades_recall_to_authoritative() -> Result<()> {
    let fixture = initialized_core().await?;
    let cancel = CancellationToken::new();

    fixture
        .core
        .update_memory(&ctx(), "resilient entry", serde_json::json!(1), &cancel)
        .await?;
    fixture.vector.set_available(false);

    let hits = fixture.core.recall_context(&ctx(), "resilient", 5, &cancel).await?;
    assert!(!hits.is_empty());
    assert!(fixture.authoritative.contains_query("resilient entry").await);

    fixture.core.shutdown().await;
    Ok(())
}

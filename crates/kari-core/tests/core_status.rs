#![allow(missing_docs)]

//! Core-wide health snapshots and derived memory analytics.

use std::sync::Arc;

use anyhow::Result;
use kari_core::{Core, CoreConfig};
use kari_memory::adapters::{
    InMemoryAnalyticsAdapter, InMemoryAuthoritativeAdapter, InMemoryCacheAdapter,
    InMemoryVectorAdapter,
};
use kari_memory::{MemoryFilter, search_memories};
use kari_types::{MemoryType, TenantContext};
use tokio_util::sync::CancellationToken;

fn ctx() -> TenantContext {
    TenantContext::new("t1", "u1")
}

#[tokio::test]
async fn health_snapshot_covers_every_registered_adapter() -> Result<()> {
    let authoritative = Arc::new(InMemoryAuthoritativeAdapter::new());
    let core = Core::builder(CoreConfig::default())
        .with_vector(Arc::new(InMemoryVectorAdapter::new()))
        .with_authoritative(authoritative.clone())
        .with_cache(Arc::new(InMemoryCacheAdapter::new()))
        .with_analytics(Arc::new(InMemoryAnalyticsAdapter::new()))
        .initialize()
        .await?;

    let snapshot = core.health_snapshot().await;
    assert_eq!(snapshot.adapters.len(), 4);
    assert!(snapshot.adapters.values().all(|report| report.ok));
    // The default catalog always contributes the fallback provider.
    assert!(snapshot.router.providers.contains_key("fallback"));

    authoritative.set_available(false);
    let snapshot = core.health_snapshot().await;
    let authoritative_report = snapshot
        .adapters
        .get("authoritative")
        .ok_or_else(|| anyhow::anyhow!("authoritative report missing"))?;
    assert!(!authoritative_report.ok);

    // The snapshot serializes for status surfaces.
    let encoded = serde_json::to_string(&snapshot)?;
    assert!(encoded.contains("authoritative"));

    core.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn memory_analytics_aggregates_recalled_entries() -> Result<()> {
    let core = Core::builder(CoreConfig::default())
        .with_vector(Arc::new(InMemoryVectorAdapter::new()))
        .with_authoritative(Arc::new(InMemoryAuthoritativeAdapter::new()))
        .with_cache(Arc::new(InMemoryCacheAdapter::new()))
        .initialize()
        .await?;
    let cancel = CancellationToken::new();

    core.update_memory(&ctx(), "i prefer tabs", serde_json::json!("ok"), &cancel).await?;
    core.update_memory(&ctx(), "the build is green", serde_json::json!("ok"), &cancel).await?;

    let snapshot = core.memory_analytics(&ctx(), "prefer tabs build green is the", 10, &cancel).await?;
    assert!(snapshot.total >= 1);
    let counted: usize = snapshot.by_type.values().sum();
    assert_eq!(counted, snapshot.total);

    core.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn filtered_search_composes_with_enriched_recall() -> Result<()> {
    let core = Core::builder(CoreConfig::default())
        .with_vector(Arc::new(InMemoryVectorAdapter::new()))
        .with_authoritative(Arc::new(InMemoryAuthoritativeAdapter::new()))
        .with_cache(Arc::new(InMemoryCacheAdapter::new()))
        .initialize()
        .await?;
    let cancel = CancellationToken::new();

    core.update_memory(&ctx(), "i prefer short meetings", serde_json::json!(1), &cancel).await?;
    core.update_memory(&ctx(), "the meeting is at noon", serde_json::json!(2), &cancel).await?;

    let enriched = core.recall_enriched(&ctx(), "meetings meeting", 10, &cancel).await?;
    let filter = MemoryFilter {
        memory_type: Some(MemoryType::Preference),
        ..MemoryFilter::default()
    };
    let results = search_memories("meetings", enriched, &filter, 10);
    assert!(!results.is_empty());
    assert!(results.iter().all(|memory| memory.memory_type == MemoryType::Preference));

    core.shutdown().await;
    Ok(())
}

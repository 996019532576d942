#![allow(missing_docs)]
#![cfg(feature = "valkey")]

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::Result;
use kari_memory::CacheAdapter;
use kari_memory::adapters::ValkeyCacheAdapter;

fn live_redis_url() -> Option<String> {
    if let Ok(url) = std::env::var("VALKEY_URL")
        && !url.trim().is_empty()
    {
        return Some(url);
    }
    None
}

fn unique_prefix() -> Result<String> {
    let suffix = SystemTime::now().duration_since(UNIX_EPOCH)?.as_micros();
    Ok(format!("kari:test:cache:{suffix}"))
}

#[tokio::test]
#[ignore = "requires live valkey server"]
async fn valkey_roundtrip_scan_and_delete() -> Result<()> {
    let Some(redis_url) = live_redis_url() else {
        eprintln!("skip: set VALKEY_URL");
        return Ok(());
    };
    let prefix = unique_prefix()?;
    let adapter = ValkeyCacheAdapter::new(&redis_url)?;

    let key_a = format!("{prefix}:a");
    let key_b = format!("{prefix}:b");
    adapter.set(&key_a, "payload-a", Duration::from_secs(60)).await?;
    adapter.set(&key_b, "payload-b", Duration::from_secs(60)).await?;

    assert_eq!(adapter.get(&key_a).await?.as_deref(), Some("payload-a"));

    let mut keys = adapter.scan(&prefix).await?;
    keys.sort();
    assert_eq!(keys, vec![key_a.clone(), key_b.clone()]);

    adapter.delete(&key_a).await?;
    adapter.delete(&key_b).await?;
    assert!(adapter.get(&key_a).await?.is_none());
    Ok(())
}

#[tokio::test]
#[ignore = "requires live valkey server"]
async fn valkey_ttl_expires_entries() -> Result<()> {
    let Some(redis_url) = live_redis_url() else {
        eprintln!("skip: set VALKEY_URL");
        return Ok(());
    };
    let prefix = unique_prefix()?;
    let adapter = ValkeyCacheAdapter::new(&redis_url)?;

    let key = format!("{prefix}:short");
    adapter.set(&key, "soon gone", Duration::from_millis(150)).await?;
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(adapter.get(&key).await?.is_none());
    Ok(())
}

#[tokio::test]
#[ignore = "requires live valkey server"]
async fn valkey_health_answers_ping() -> Result<()> {
    let Some(redis_url) = live_redis_url() else {
        eprintln!("skip: set VALKEY_URL");
        return Ok(());
    };
    let adapter = ValkeyCacheAdapter::new(&redis_url)?;
    let report = adapter.health().await;
    assert!(report.ok);
    Ok(())
}

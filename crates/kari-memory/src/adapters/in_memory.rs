//! In-memory reference adapters.
//!
//! Each adapter honors the uniform contract and adds an availability switch
//! so tests can simulate backend outages. Cache TTLs use the tokio clock so
//! paused-time tests drive expiry deterministically.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use kari_observability::HealthReport;
use kari_types::{MemoryEntry, TenantContext};
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::adapter::{
    AdapterError, AnalyticsAdapter, AuthoritativeAdapter, CacheAdapter, TextIndexAdapter,
    VectorAdapter, VectorHit,
};

fn unavailable(kind: &str) -> AdapterError {
    AdapterError::Unavailable(format!("{kind} backend disabled"))
}

fn token_overlap_score(query: &str, entry: &MemoryEntry) -> f32 {
    let query_lower = query.to_lowercase();
    let query_tokens: HashSet<&str> = query_lower.split_whitespace().collect();
    if query_tokens.is_empty() {
        return 0.0;
    }
    let content = format!("{} {}", entry.query, entry.result).to_lowercase();
    let content_tokens: HashSet<&str> = content.split_whitespace().collect();
    let intersection = query_tokens.intersection(&content_tokens).count() as f32;
    let union = query_tokens.union(&content_tokens).count() as f32;
    if union == 0.0 { 0.0 } else { intersection / union }
}

fn matches_scope(entry: &MemoryEntry, ctx: &TenantContext) -> bool {
    entry.tenant_id == ctx.tenant_id && entry.user_id == ctx.user_id
}

/// In-memory semantic index scoring by token overlap.
pub struct InMemoryVectorAdapter {
    rows: RwLock<Vec<(String, MemoryEntry)>>,
    next_id: AtomicU64,
    available: AtomicBool,
}

impl InMemoryVectorAdapter {
    /// Empty, available index.
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            available: AtomicBool::new(true),
        }
    }

    /// Toggle simulated availability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    /// Number of indexed rows.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Whether the index is empty.
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

impl Default for InMemoryVectorAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorAdapter for InMemoryVectorAdapter {
    async fn recall(
        &self,
        ctx: &TenantContext,
        query: &str,
        limit: usize,
    ) -> Result<Vec<VectorHit>, AdapterError> {
        if !self.available.load(Ordering::Relaxed) {
            return Err(unavailable("vector"));
        }
        let rows = self.rows.read().await;
        let mut hits: Vec<VectorHit> = rows
            .iter()
            .filter(|(_, entry)| matches_scope(entry, ctx))
            .map(|(id, entry)| VectorHit {
                id: id.clone(),
                score: token_overlap_score(query, entry),
                entry: entry.clone(),
            })
            .filter(|hit| hit.score > 0.0)
            .collect();
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn store(&self, entry: &MemoryEntry) -> Result<String, AdapterError> {
        if !self.available.load(Ordering::Relaxed) {
            return Err(unavailable("vector"));
        }
        let id = format!("vec-{}", self.next_id.fetch_add(1, Ordering::Relaxed));
        self.rows.write().await.push((id.clone(), entry.clone()));
        Ok(id)
    }

    async fn health(&self) -> HealthReport {
        if self.available.load(Ordering::Relaxed) {
            HealthReport::healthy(0)
        } else {
            HealthReport::unhealthy("vector backend disabled")
        }
    }
}

/// In-memory relational source of truth with upsert semantics.
pub struct InMemoryAuthoritativeAdapter {
    rows: RwLock<BTreeMap<String, MemoryEntry>>,
    available: AtomicBool,
    fail_upserts: AtomicBool,
}

impl InMemoryAuthoritativeAdapter {
    /// Empty, available store.
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
            fail_upserts: AtomicBool::new(false),
        }
    }

    /// Toggle simulated availability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    /// Fail upserts while health stays up. Simulates a store that answers
    /// probes but rejects writes.
    pub fn set_fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::Relaxed);
    }

    /// Number of stored rows.
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Whether any row matches the exact query text. Test helper.
    pub async fn contains_query(&self, query: &str) -> bool {
        self.rows.read().await.values().any(|entry| entry.query == query)
    }
}

impl Default for InMemoryAuthoritativeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthoritativeAdapter for InMemoryAuthoritativeAdapter {
    async fn upsert(&self, key: &str, entry: &MemoryEntry) -> Result<(), AdapterError> {
        if !self.available.load(Ordering::Relaxed) {
            return Err(unavailable("authoritative"));
        }
        if self.fail_upserts.load(Ordering::Relaxed) {
            return Err(AdapterError::Io("simulated upsert rejection".to_string()));
        }
        self.rows.write().await.insert(key.to_string(), entry.clone());
        Ok(())
    }

    async fn recall(
        &self,
        ctx: &TenantContext,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, AdapterError> {
        if !self.available.load(Ordering::Relaxed) {
            return Err(unavailable("authoritative"));
        }
        let rows = self.rows.read().await;
        let mut entries: Vec<MemoryEntry> = rows
            .values()
            .filter(|entry| matches_scope(entry, ctx))
            .filter(|entry| token_overlap_score(query, entry) > 0.0)
            .cloned()
            .collect();
        entries.sort_by_key(|entry| std::cmp::Reverse(entry.timestamp_ms));
        entries.truncate(limit);
        Ok(entries)
    }

    async fn get_by_vector(&self, vector_id: &str) -> Result<Option<MemoryEntry>, AdapterError> {
        if !self.available.load(Ordering::Relaxed) {
            return Err(unavailable("authoritative"));
        }
        Ok(self.rows.read().await.get(vector_id).cloned())
    }

    async fn health(&self) -> HealthReport {
        if self.available.load(Ordering::Relaxed) {
            HealthReport::healthy(0)
        } else {
            HealthReport::unhealthy("authoritative backend disabled")
        }
    }
}

struct CacheSlot {
    value: String,
    expires_at: Instant,
}

/// In-memory TTL cache with prefix scan.
pub struct InMemoryCacheAdapter {
    slots: RwLock<HashMap<String, CacheSlot>>,
    available: AtomicBool,
}

impl InMemoryCacheAdapter {
    /// Empty, available cache.
    pub fn new() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Toggle simulated availability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }
}

impl Default for InMemoryCacheAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheAdapter for InMemoryCacheAdapter {
    async fn get(&self, key: &str) -> Result<Option<String>, AdapterError> {
        if !self.available.load(Ordering::Relaxed) {
            return Err(unavailable("cache"));
        }
        let slots = self.slots.read().await;
        Ok(slots
            .get(key)
            .filter(|slot| slot.expires_at > Instant::now())
            .map(|slot| slot.value.clone()))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), AdapterError> {
        if !self.available.load(Ordering::Relaxed) {
            return Err(unavailable("cache"));
        }
        self.slots.write().await.insert(
            key.to_string(),
            CacheSlot {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<String>, AdapterError> {
        if !self.available.load(Ordering::Relaxed) {
            return Err(unavailable("cache"));
        }
        let now = Instant::now();
        let slots = self.slots.read().await;
        let mut keys: Vec<String> = slots
            .iter()
            .filter(|(key, slot)| key.starts_with(prefix) && slot.expires_at > now)
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<(), AdapterError> {
        if !self.available.load(Ordering::Relaxed) {
            return Err(unavailable("cache"));
        }
        self.slots.write().await.remove(key);
        Ok(())
    }

    async fn health(&self) -> HealthReport {
        if self.available.load(Ordering::Relaxed) {
            HealthReport::healthy(0)
        } else {
            HealthReport::unhealthy("cache backend disabled")
        }
    }
}

/// In-memory keyword index.
pub struct InMemoryTextIndexAdapter {
    rows: RwLock<Vec<MemoryEntry>>,
    available: AtomicBool,
}

impl InMemoryTextIndexAdapter {
    /// Empty, available index.
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Toggle simulated availability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }
}

impl Default for InMemoryTextIndexAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TextIndexAdapter for InMemoryTextIndexAdapter {
    async fn index(&self, entry: &MemoryEntry) -> Result<(), AdapterError> {
        if !self.available.load(Ordering::Relaxed) {
            return Err(unavailable("text_index"));
        }
        self.rows.write().await.push(entry.clone());
        Ok(())
    }

    async fn search(
        &self,
        ctx: &TenantContext,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, AdapterError> {
        if !self.available.load(Ordering::Relaxed) {
            return Err(unavailable("text_index"));
        }
        let rows = self.rows.read().await;
        let mut scored: Vec<(f32, MemoryEntry)> = rows
            .iter()
            .filter(|entry| matches_scope(entry, ctx))
            .map(|entry| (token_overlap_score(query, entry), entry.clone()))
            .filter(|(score, _)| *score > 0.0)
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored.into_iter().take(limit).map(|(_, entry)| entry).collect())
    }

    async fn health(&self) -> HealthReport {
        if self.available.load(Ordering::Relaxed) {
            HealthReport::healthy(0)
        } else {
            HealthReport::unhealthy("text index backend disabled")
        }
    }
}

/// Read-only analytics store over preloaded rows.
pub struct InMemoryAnalyticsAdapter {
    rows: RwLock<Vec<MemoryEntry>>,
    available: AtomicBool,
}

impl InMemoryAnalyticsAdapter {
    /// Empty, available store.
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Load aggregate rows. This is test/bootstrap seeding, not a write
    /// path; the core never calls it.
    pub async fn preload(&self, entries: Vec<MemoryEntry>) {
        self.rows.write().await.extend(entries);
    }

    /// Toggle simulated availability.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }
}

impl Default for InMemoryAnalyticsAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnalyticsAdapter for InMemoryAnalyticsAdapter {
    async fn query(
        &self,
        ctx: &TenantContext,
        query: &str,
        limit: usize,
    ) -> Result<Vec<MemoryEntry>, AdapterError> {
        if !self.available.load(Ordering::Relaxed) {
            return Err(unavailable("analytics"));
        }
        let rows = self.rows.read().await;
        Ok(rows
            .iter()
            .filter(|entry| matches_scope(entry, ctx))
            .filter(|entry| token_overlap_score(query, entry) > 0.0)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn health(&self) -> HealthReport {
        if self.available.load(Ordering::Relaxed) {
            HealthReport::healthy(0)
        } else {
            HealthReport::unhealthy("analytics backend disabled")
        }
    }
}

//! kari-memory - Tiered memory orchestrator over heterogeneous backends.
//!
//! The orchestrator coordinates a vector index, an authoritative relational
//! store, an ephemeral cache/buffer, an optional full-text index, and a
//! read-only analytics store behind one recall/write surface. Writes fan out
//! to every healthy adapter and buffer into the cache when the authoritative
//! store is down; a background reconciler replays the buffer on recovery.

mod adapter;
pub mod adapters;
mod analytics;
mod enrichment;
mod error;
mod keys;
mod orchestrator;
mod reconciler;
mod search;

pub use adapter::{
    AdapterError, AdapterSet, AdapterTimeouts, AnalyticsAdapter, AuthoritativeAdapter,
    CacheAdapter, TextIndexAdapter, VectorAdapter, VectorHit,
};
pub use analytics::{ConfidenceBand, MemoryAnalyticsSnapshot, summarize_memories};
pub use enrichment::{
    Enricher, EnrichmentBackend, EntityLabel, LinguisticFeatures, classify_memory_type,
    cosine_similarity, rank_score, semantic_cluster, token_jaccard,
};
pub use error::{AdapterFailure, MemoryError};
pub use keys::{
    BUFFER_PREFIX, BUFFER_TTL, BufferedWrite, SHORT_TERM_TTL, buffer_key, buffer_prefix_for,
    short_term_key,
};
pub use orchestrator::{MemoryOrchestrator, RecallHit, RecallTier, WriteReceipt};
pub use reconciler::{Reconciler, ReconcilerConfig, ReconcilerHandle, ReconcilerStatsSnapshot};
pub use search::{MemoryFilter, rank_memories, search_memories};

//! kari-types - Common type definitions for the Kari memory and routing core.
//!
//! This crate provides the shared data structures used across the memory
//! orchestrator and the provider router. All types serialize with serde so
//! they can cross the cache/buffer boundary unchanged.

use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tenant/user scope attached to every memory operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    /// Tenant identifier
    pub tenant_id: String,
    /// User identifier within the tenant
    pub user_id: String,
    /// Optional conversation session identifier
    pub session_id: Option<String>,
}

impl TenantContext {
    /// Build a context without a session scope.
    pub fn new(tenant_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_id: user_id.into(),
            session_id: None,
        }
    }

    /// Attach a session scope.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Origin of a memory write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Captured from a live conversation turn
    Conversation,
    /// Produced by a system component (enrichment, migration jobs)
    System,
    /// Bulk-imported from an external source
    Import,
}

impl SourceKind {
    /// Stable identifier for logs and storage payloads.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Conversation => "conversation",
            Self::System => "system",
            Self::Import => "import",
        }
    }
}

/// A single memory record. Immutable once written; the authoritative store
/// is the only source of truth for these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Owning tenant
    pub tenant_id: String,
    /// Owning user
    pub user_id: String,
    /// Session the entry was captured in, when known
    pub session_id: Option<String>,
    /// The query/content this memory answers
    pub query: String,
    /// Stored result payload
    pub result: serde_json::Value,
    /// Capture time, unix milliseconds
    pub timestamp_ms: i64,
    /// Link into the vector index, when indexed
    pub vector_id: Option<String>,
    /// Optional confidence attached at capture time (0.0-1.0)
    pub confidence: Option<f32>,
    /// Origin of the write
    pub source_kind: SourceKind,
}

impl MemoryEntry {
    /// Create an entry timestamped now.
    pub fn new(ctx: &TenantContext, query: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            tenant_id: ctx.tenant_id.clone(),
            user_id: ctx.user_id.clone(),
            session_id: ctx.session_id.clone(),
            query: query.into(),
            result,
            timestamp_ms: now_unix_ms(),
            vector_id: None,
            confidence: None,
            source_kind: SourceKind::Conversation,
        }
    }

    /// Identity within a session scope: `(tenant, user, timestamp)`.
    pub fn memory_id(&self) -> String {
        format!("mem:{}:{}:{}", self.tenant_id, self.user_id, self.timestamp_ms)
    }
}

/// Memory type label produced by enrichment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    /// Declarative statement about the world
    Fact,
    /// User preference
    Preference,
    /// Conversational context
    Context,
}

impl MemoryType {
    /// Stable identifier for logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fact => "fact",
            Self::Preference => "preference",
            Self::Context => "context",
        }
    }
}

/// Semantic cluster label produced by enrichment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemanticCluster {
    /// Code, tooling, infrastructure
    Technical,
    /// People and relationships
    Personal,
    /// Projects, tasks, business
    Work,
    /// Everything else
    General,
}

impl SemanticCluster {
    /// Stable identifier for logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Technical => "technical",
            Self::Personal => "personal",
            Self::Work => "work",
            Self::General => "general",
        }
    }
}

/// Derived annotations over a [`MemoryEntry`]. Never a source of truth.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedMemory {
    /// The underlying entry
    pub entry: MemoryEntry,
    /// Classified memory type
    pub memory_type: MemoryType,
    /// Semantic cluster
    pub cluster: SemanticCluster,
    /// Related memory ids, capped at five
    pub relationships: Vec<String>,
    /// Relevance score against the recall query
    pub relevance_score: f32,
    /// How often this memory has been recalled
    pub access_count: u64,
    /// Last recall time
    pub last_accessed: DateTime<Utc>,
}

/// Current wall-clock time as unix milliseconds.
pub fn now_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as i64)
        .unwrap_or(0)
}

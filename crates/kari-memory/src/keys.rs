//! Cache and buffer key scheme.
//!
//! Two logically distinct uses of the same ephemeral store share the
//! `kari:mem:` namespace. Buffer keys embed a zero-padded millisecond
//! timestamp so lexicographic scan order equals chronological order.

use std::time::Duration;

use kari_types::MemoryEntry;
use serde::{Deserialize, Serialize};

/// Short-term recall cache TTL.
pub const SHORT_TERM_TTL: Duration = Duration::from_secs(30 * 60);

/// Write buffer TTL. On expiry the buffered write is lost and logged.
pub const BUFFER_TTL: Duration = Duration::from_secs(60 * 60);

/// Global prefix of every buffered write key.
pub const BUFFER_PREFIX: &str = "kari:mem:buffer:";

/// Short-term cache key for a tenant/user scope.
pub fn short_term_key(tenant_id: &str, user_id: &str) -> String {
    format!("kari:mem:{tenant_id}:{user_id}")
}

/// Buffered-write key for one entry. Timestamps are zero-padded to sixteen
/// digits for lexicographic ordering.
pub fn buffer_key(tenant_id: &str, user_id: &str, timestamp_ms: i64) -> String {
    let clamped = timestamp_ms.max(0);
    format!("{BUFFER_PREFIX}{tenant_id}:{user_id}:{clamped:016}")
}

/// Prefix covering every buffered write for a tenant/user scope.
pub fn buffer_prefix_for(tenant_id: &str, user_id: &str) -> String {
    format!("{BUFFER_PREFIX}{tenant_id}:{user_id}:")
}

/// Self-contained payload buffered when the authoritative store is down.
/// Sufficient to reconstruct an upsert on replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferedWrite {
    /// Upsert key: the vector id when indexing succeeded, else a synthetic id
    pub upsert_key: String,
    /// The full entry to replay
    pub entry: MemoryEntry,
    /// When the write was buffered, unix milliseconds
    pub buffered_at_ms: i64,
}

impl BufferedWrite {
    /// Encode for the cache backend.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decode a buffered payload.
    pub fn decode(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}

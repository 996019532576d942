//! Derived memory aggregates. Computed from enriched recall results, never
//! persisted anywhere.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kari_types::EnrichedMemory;
use serde::Serialize;

/// Confidence band used by the distribution aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceBand {
    /// confidence < 0.5
    Low,
    /// 0.5 <= confidence < 0.7
    Medium,
    /// 0.7 <= confidence < 0.9
    High,
    /// confidence >= 0.9
    VeryHigh,
}

impl ConfidenceBand {
    fn for_confidence(confidence: f32) -> Self {
        if confidence >= 0.9 {
            Self::VeryHigh
        } else if confidence >= 0.7 {
            Self::High
        } else if confidence >= 0.5 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// Stable identifier for serialization and display.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::VeryHigh => "very_high",
        }
    }
}

/// Aggregate view over a set of enriched memories.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryAnalyticsSnapshot {
    /// When the snapshot was computed
    pub captured_at: DateTime<Utc>,
    /// Total memories aggregated
    pub total: usize,
    /// Count per memory type label
    pub by_type: BTreeMap<&'static str, usize>,
    /// Count per semantic cluster
    pub by_cluster: BTreeMap<&'static str, usize>,
    /// Count per confidence band
    pub confidence_distribution: BTreeMap<&'static str, usize>,
    /// Total relationships across all memories
    pub relationship_count: usize,
    /// Memories with at least one relationship
    pub connected: usize,
}

/// Aggregate enriched memories into a snapshot.
pub fn summarize_memories(memories: &[EnrichedMemory]) -> MemoryAnalyticsSnapshot {
    let mut by_type: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut by_cluster: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut confidence_distribution: BTreeMap<&'static str, usize> = BTreeMap::new();
    let mut relationship_count = 0;
    let mut connected = 0;

    for memory in memories {
        *by_type.entry(memory.memory_type.as_str()).or_insert(0) += 1;
        *by_cluster.entry(memory.cluster.as_str()).or_insert(0) += 1;
        let confidence = memory.entry.confidence.unwrap_or(0.8);
        let band = ConfidenceBand::for_confidence(confidence);
        *confidence_distribution.entry(band.as_str()).or_insert(0) += 1;
        relationship_count += memory.relationships.len();
        if !memory.relationships.is_empty() {
            connected += 1;
        }
    }

    MemoryAnalyticsSnapshot {
        captured_at: Utc::now(),
        total: memories.len(),
        by_type,
        by_cluster,
        confidence_distribution,
        relationship_count,
        connected,
    }
}

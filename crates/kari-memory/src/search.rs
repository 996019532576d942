//! Filtered, ranked search over enriched recall results.

use kari_types::{EnrichedMemory, MemoryType, SemanticCluster};

/// Filter conditions applied to enriched memories.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryFilter {
    /// Keep only this memory type
    pub memory_type: Option<MemoryType>,
    /// Keep only this semantic cluster
    pub cluster: Option<SemanticCluster>,
    /// Keep only entries at or above this confidence
    pub min_confidence: Option<f32>,
    /// Keep only entries with at least one relationship
    pub connected_only: bool,
}

impl MemoryFilter {
    /// Whether a memory passes every set condition.
    pub fn passes(&self, memory: &EnrichedMemory) -> bool {
        if let Some(memory_type) = self.memory_type
            && memory.memory_type != memory_type
        {
            return false;
        }
        if let Some(cluster) = self.cluster
            && memory.cluster != cluster
        {
            return false;
        }
        if let Some(min_confidence) = self.min_confidence {
            let confidence = memory.entry.confidence.unwrap_or(0.8);
            if confidence < min_confidence {
                return false;
            }
        }
        if self.connected_only && memory.relationships.is_empty() {
            return false;
        }
        true
    }
}

/// Rank memories against a query: keyword overlap, semantic relevance, and
/// confidence blended at 0.4 / 0.4 / 0.2. Ties keep the incoming order.
pub fn rank_memories(query: &str, memories: &mut [EnrichedMemory]) {
    let query_lower = query.to_lowercase();
    let query_tokens: Vec<&str> = query_lower.split_whitespace().collect();
    let score = |memory: &EnrichedMemory| -> f32 {
        let content = format!("{} {}", memory.entry.query, memory.entry.result).to_lowercase();
        let keyword = if query_tokens.is_empty() {
            0.0
        } else {
            let matched = query_tokens
                .iter()
                .filter(|token| content.split_whitespace().any(|word| word == **token))
                .count();
            matched as f32 / query_tokens.len() as f32
        };
        let confidence = memory.entry.confidence.unwrap_or(0.8);
        0.4 * keyword + 0.4 * memory.relevance_score.clamp(0.0, 1.0) + 0.2 * confidence
    };
    memories.sort_by(|a, b| {
        score(b).partial_cmp(&score(a)).unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Apply a filter and ranking to enriched memories, capped at `limit`.
pub fn search_memories(
    query: &str,
    memories: Vec<EnrichedMemory>,
    filter: &MemoryFilter,
    limit: usize,
) -> Vec<EnrichedMemory> {
    let mut kept: Vec<EnrichedMemory> =
        memories.into_iter().filter(|memory| filter.passes(memory)).collect();
    rank_memories(query, &mut kept);
    kept.truncate(limit);
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use kari_types::{MemoryEntry, TenantContext};

    fn memory(query: &str, memory_type: MemoryType, confidence: f32) -> EnrichedMemory {
        let ctx = TenantContext::new("t1", "u1");
        let mut entry = MemoryEntry::new(&ctx, query, serde_json::json!("r"));
        entry.confidence = Some(confidence);
        EnrichedMemory {
            entry,
            memory_type,
            cluster: SemanticCluster::General,
            relationships: Vec::new(),
            relevance_score: 0.5,
            access_count: 1,
            last_accessed: Utc::now(),
        }
    }

    #[test]
    fn filters_compose() {
        let filter = MemoryFilter {
            memory_type: Some(MemoryType::Preference),
            min_confidence: Some(0.7),
            ..MemoryFilter::default()
        };
        assert!(filter.passes(&memory("a", MemoryType::Preference, 0.9)));
        assert!(!filter.passes(&memory("a", MemoryType::Fact, 0.9)));
        assert!(!filter.passes(&memory("a", MemoryType::Preference, 0.5)));
    }

    #[test]
    fn search_ranks_keyword_matches_first() {
        let memories = vec![
            memory("unrelated topic", MemoryType::Context, 0.8),
            memory("python tooling notes", MemoryType::Context, 0.8),
        ];
        let results =
            search_memories("python tooling", memories, &MemoryFilter::default(), 10);
        assert_eq!(results[0].entry.query, "python tooling notes");
    }

    #[test]
    fn search_honors_the_limit() {
        let memories = (0..8)
            .map(|index| memory(&format!("note {index}"), MemoryType::Context, 0.8))
            .collect();
        let results = search_memories("note", memories, &MemoryFilter::default(), 3);
        assert_eq!(results.len(), 3);
    }
}

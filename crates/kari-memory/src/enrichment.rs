//! Best-effort annotation of recalled entries: type classification, semantic
//! clustering, and relationship detection.
//!
//! Keyword rules always produce a provisional label. When an NLP or
//! embedding backend is healthy its signal refines the label; when it is
//! not, the heuristics stand alone. Enrichment never fails a recall.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use kari_observability::MemoryEvent;
use kari_types::{EnrichedMemory, MemoryEntry, MemoryType, SemanticCluster};

use crate::orchestrator::RecallHit;

/// Jaccard threshold proposing a relationship candidate.
const RELATIONSHIP_JACCARD_THRESHOLD: f32 = 0.3;
/// Cosine threshold confirming a candidate when embeddings are available.
const RELATIONSHIP_COSINE_THRESHOLD: f32 = 0.7;
/// Relationship cap per entry.
const RELATIONSHIP_CAP: usize = 5;
/// Comparison candidates scanned per entry.
const RELATIONSHIP_CANDIDATE_CAP: usize = 20;

const PREFERENCE_KEYWORDS: [&str; 6] = ["prefer", "like", "dislike", "favorite", "hate", "love"];
const FACT_KEYWORDS: [&str; 7] = ["is", "are", "was", "were", "fact", "true", "false"];
const TECHNICAL_KEYWORDS: [&str; 7] =
    ["code", "programming", "api", "function", "class", "software", "tech"];
const PERSONAL_KEYWORDS: [&str; 6] = ["user", "person", "people", "team", "family", "friend"];
const WORK_KEYWORDS: [&str; 6] = ["project", "task", "work", "business", "meeting", "deadline"];

/// Entity label surfaced by an NLP backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityLabel {
    /// Organization mention
    Organization,
    /// Person mention
    Person,
    /// Place mention
    Place,
    /// Product mention
    Product,
}

/// Linguistic signal from an NLP backend.
#[derive(Debug, Clone, Default)]
pub struct LinguisticFeatures {
    /// Whether a subject/predicate pattern was detected
    pub has_subject_predicate: bool,
    /// Entity labels found in the text
    pub entities: Vec<EntityLabel>,
}

/// Optional NLP/embedding services consulted during enrichment. Implemented
/// outside this crate, typically by bridging to the provider router.
#[async_trait]
pub trait EnrichmentBackend: Send + Sync {
    /// Whether the backend should be consulted at all right now.
    async fn healthy(&self) -> bool;

    /// Linguistic features for a text, `None` on any failure.
    async fn linguistic_features(&self, text: &str) -> Option<LinguisticFeatures>;

    /// Embeddings for a batch of texts, `None` on any failure.
    async fn embed(&self, texts: &[String]) -> Option<Vec<Vec<f32>>>;
}

/// Classify content into fact / preference / context from keyword rules.
/// Keywords match as substrings, so inflected forms ("prefers") count.
pub fn classify_memory_type(content: &str) -> MemoryType {
    let lower = content.to_lowercase();
    if PREFERENCE_KEYWORDS.iter().any(|word| lower.contains(word)) {
        MemoryType::Preference
    } else if FACT_KEYWORDS.iter().any(|word| lower.contains(word)) {
        MemoryType::Fact
    } else {
        MemoryType::Context
    }
}

/// Assign a semantic cluster from keyword heuristics. Keywords match as
/// substrings, so inflected forms ("codes") count.
pub fn semantic_cluster(content: &str) -> SemanticCluster {
    let lower = content.to_lowercase();
    if TECHNICAL_KEYWORDS.iter().any(|word| lower.contains(word)) {
        SemanticCluster::Technical
    } else if PERSONAL_KEYWORDS.iter().any(|word| lower.contains(word)) {
        SemanticCluster::Personal
    } else if WORK_KEYWORDS.iter().any(|word| lower.contains(word)) {
        SemanticCluster::Work
    } else {
        SemanticCluster::General
    }
}

/// Token-set Jaccard similarity between two texts.
pub fn token_jaccard(a: &str, b: &str) -> f32 {
    let a_lower = a.to_lowercase();
    let b_lower = b.to_lowercase();
    let a_tokens: HashSet<&str> = a_lower.split_whitespace().collect();
    let b_tokens: HashSet<&str> = b_lower.split_whitespace().collect();
    if a_tokens.is_empty() || b_tokens.is_empty() {
        return 0.0;
    }
    let intersection = a_tokens.intersection(&b_tokens).count() as f32;
    let union = a_tokens.union(&b_tokens).count() as f32;
    if union == 0.0 { 0.0 } else { intersection / union }
}

/// Cosine similarity between two vectors, clamped to `[0, 1]`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

/// Blended relevance score: keyword overlap, native adapter score, and
/// stored confidence at 0.4 / 0.4 / 0.2.
pub fn rank_score(query: &str, entry: &MemoryEntry, native_score: f32) -> f32 {
    let query_lower = query.to_lowercase();
    let query_tokens: HashSet<&str> = query_lower.split_whitespace().collect();
    let content = entry_content(entry).to_lowercase();
    let content_tokens: HashSet<&str> = content.split_whitespace().collect();
    let keyword_score = if query_tokens.is_empty() {
        0.0
    } else {
        query_tokens.intersection(&content_tokens).count() as f32 / query_tokens.len() as f32
    };
    let confidence = entry.confidence.unwrap_or(0.8);
    0.4 * keyword_score + 0.4 * native_score.clamp(0.0, 1.0) + 0.2 * confidence
}

fn entry_content(entry: &MemoryEntry) -> String {
    let result_text = match &entry.result {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    };
    format!("{} {}", entry.query, result_text)
}

/// Best-effort enricher over recall results.
pub struct Enricher {
    backend: Option<Arc<dyn EnrichmentBackend>>,
}

impl Enricher {
    /// Heuristics only; no NLP/embedding backend.
    pub fn heuristic() -> Self {
        Self { backend: None }
    }

    /// Heuristics refined by a backend when it is healthy.
    pub fn with_backend(backend: Arc<dyn EnrichmentBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    /// Annotate every hit. Failures inside the backend degrade to the
    /// heuristics; this method itself never fails.
    pub async fn enrich(&self, hits: &[RecallHit]) -> Vec<EnrichedMemory> {
        let backend = match &self.backend {
            Some(backend) => {
                if backend.healthy().await {
                    Some(backend.clone())
                } else {
                    tracing::debug!(
                        event = MemoryEvent::EnrichmentBackendSkipped.as_str(),
                        "enrichment backend unhealthy; using keyword heuristics"
                    );
                    None
                }
            }
            None => None,
        };

        let mut enriched = Vec::with_capacity(hits.len());
        for hit in hits {
            let content = entry_content(&hit.entry);
            let features = match &backend {
                Some(backend) => backend.linguistic_features(&content).await,
                None => None,
            };
            let memory_type = classify_with_features(&content, features.as_ref());
            let cluster = cluster_with_features(&content, features.as_ref());
            let relationships = self
                .detect_relationships(&hit.entry, hits, backend.as_deref())
                .await;
            enriched.push(EnrichedMemory {
                entry: hit.entry.clone(),
                memory_type,
                cluster,
                relationships,
                relevance_score: hit.score.clamp(0.0, 1.0),
                access_count: 1,
                last_accessed: Utc::now(),
            });
        }
        enriched
    }

    async fn detect_relationships(
        &self,
        entry: &MemoryEntry,
        all: &[RecallHit],
        backend: Option<&dyn EnrichmentBackend>,
    ) -> Vec<String> {
        let entry_id = entry.memory_id();
        let content = entry_content(entry);
        let mut candidates: Vec<(String, String)> = Vec::new();
        for other in all.iter().take(RELATIONSHIP_CANDIDATE_CAP) {
            let other_id = other.entry.memory_id();
            if other_id == entry_id {
                continue;
            }
            let other_content = entry_content(&other.entry);
            if token_jaccard(&content, &other_content) >= RELATIONSHIP_JACCARD_THRESHOLD {
                candidates.push((other_id, other_content));
            }
        }
        candidates.truncate(RELATIONSHIP_CAP);

        let Some(backend) = backend else {
            return candidates.into_iter().map(|(id, _)| id).collect();
        };

        // Confirm candidates by embedding cosine when the backend answers.
        let mut texts = vec![content];
        texts.extend(candidates.iter().map(|(_, text)| text.clone()));
        let Some(vectors) = backend.embed(&texts).await else {
            return candidates.into_iter().map(|(id, _)| id).collect();
        };
        let Some((anchor, rest)) = vectors.split_first() else {
            return candidates.into_iter().map(|(id, _)| id).collect();
        };
        candidates
            .into_iter()
            .zip(rest)
            .filter(|(_, vector)| {
                cosine_similarity(anchor, vector) >= RELATIONSHIP_COSINE_THRESHOLD
            })
            .map(|((id, _), _)| id)
            .collect()
    }
}

fn classify_with_features(content: &str, features: Option<&LinguisticFeatures>) -> MemoryType {
    let provisional = classify_memory_type(content);
    match (provisional, features) {
        // A fact label only stands when the backend confirms a
        // subject/predicate pattern.
        (MemoryType::Fact, Some(features)) if !features.has_subject_predicate => {
            MemoryType::Context
        }
        (label, _) => label,
    }
}

fn cluster_with_features(content: &str, features: Option<&LinguisticFeatures>) -> SemanticCluster {
    if let Some(features) = features {
        if features
            .entities
            .iter()
            .any(|label| matches!(label, EntityLabel::Organization | EntityLabel::Product))
        {
            return SemanticCluster::Technical;
        }
        if features
            .entities
            .iter()
            .any(|label| matches!(label, EntityLabel::Person | EntityLabel::Place))
        {
            return SemanticCluster::Personal;
        }
    }
    semantic_cluster(content)
}

//! Routing policies and the local-first priority ladder.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

/// Coarse provider class used by the priority ladder, local-first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderPriority {
    /// GGUF/llama.cpp class local runtimes
    Local = 1,
    /// Transformers running locally
    Transformer = 2,
    /// Deterministic NLP responders
    Nlp = 3,
    /// Small distilled models
    Lightweight = 4,
    /// Managed remote APIs
    Remote = 5,
    /// Deterministic and offline fallbacks
    Fallback = 6,
}

impl ProviderPriority {
    /// The default local-first ladder.
    pub const DEFAULT_ORDER: [ProviderPriority; 6] = [
        Self::Local,
        Self::Transformer,
        Self::Nlp,
        Self::Lightweight,
        Self::Remote,
        Self::Fallback,
    ];

    /// Stable identifier for logs and status output.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Transformer => "transformer",
            Self::Nlp => "nlp",
            Self::Lightweight => "lightweight",
            Self::Remote => "remote",
            Self::Fallback => "fallback",
        }
    }
}

/// Rule governing provider ordering within the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingPolicy {
    /// Strict local-first ladder; ties alphabetical
    Priority,
    /// Rotate across the flattened healthy list
    RoundRobin,
    /// Rotate within each bucket, preserving bucket order
    Hybrid,
}

impl RoutingPolicy {
    /// Stable identifier for metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Priority => "priority",
            Self::RoundRobin => "round_robin",
            Self::Hybrid => "hybrid",
        }
    }
}

/// Provider name to priority-bucket mapping.
#[derive(Debug, Clone)]
pub struct PriorityMap {
    map: HashMap<String, ProviderPriority>,
}

impl Default for PriorityMap {
    fn default() -> Self {
        let mut map = HashMap::new();
        for (name, priority) in [
            ("llamacpp", ProviderPriority::Local),
            ("llama_cpp", ProviderPriority::Local),
            ("transformers", ProviderPriority::Transformer),
            ("huggingface", ProviderPriority::Transformer),
            ("spacy", ProviderPriority::Nlp),
            ("distilbert", ProviderPriority::Lightweight),
            ("openai", ProviderPriority::Remote),
            ("anthropic", ProviderPriority::Remote),
            ("gemini", ProviderPriority::Remote),
            ("deepseek", ProviderPriority::Remote),
            ("cohere", ProviderPriority::Remote),
            ("copilotkit", ProviderPriority::Remote),
            ("fallback", ProviderPriority::Fallback),
        ] {
            map.insert(name.to_string(), priority);
        }
        Self { map }
    }
}

impl PriorityMap {
    /// Bucket for a provider; unknown providers land in the fallback bucket.
    pub fn bucket_for(&self, provider: &str) -> ProviderPriority {
        self.map.get(provider).copied().unwrap_or(ProviderPriority::Fallback)
    }

    /// Override the bucket for one provider.
    pub fn set(&mut self, provider: impl Into<String>, priority: ProviderPriority) {
        self.map.insert(provider.into(), priority);
    }
}

/// Rotation cursors for the round-robin and hybrid policies.
#[derive(Debug, Default)]
pub(crate) struct RotationState {
    round_robin_offset: usize,
    hybrid_offsets: HashMap<ProviderPriority, usize>,
}

impl RotationState {
    pub(crate) fn reset(&mut self) {
        self.round_robin_offset = 0;
        self.hybrid_offsets.clear();
    }
}

/// Order candidate buckets according to the active policy. Buckets arrive
/// with sorted members; bucket iteration follows `priority_order`.
pub(crate) fn order_providers(
    policy: RoutingPolicy,
    priority_order: &[ProviderPriority],
    buckets: &BTreeMap<ProviderPriority, Vec<String>>,
    rotation: &mut RotationState,
) -> Vec<String> {
    let flattened: Vec<String> = priority_order
        .iter()
        .filter_map(|priority| buckets.get(priority))
        .flat_map(|bucket| bucket.iter().cloned())
        .collect();
    if flattened.is_empty() {
        return flattened;
    }

    match policy {
        RoutingPolicy::Priority => flattened,
        RoutingPolicy::RoundRobin => {
            let offset = rotation.round_robin_offset % flattened.len();
            rotation.round_robin_offset = (rotation.round_robin_offset + 1) % flattened.len();
            let mut rotated = Vec::with_capacity(flattened.len());
            rotated.extend_from_slice(&flattened[offset..]);
            rotated.extend_from_slice(&flattened[..offset]);
            rotated
        }
        RoutingPolicy::Hybrid => {
            let mut ordered = Vec::with_capacity(flattened.len());
            for priority in priority_order {
                let Some(bucket) = buckets.get(priority) else {
                    continue;
                };
                if bucket.is_empty() {
                    continue;
                }
                let cursor = rotation.hybrid_offsets.entry(*priority).or_insert(0);
                let offset = *cursor % bucket.len();
                *cursor = (*cursor + 1) % bucket.len();
                ordered.extend_from_slice(&bucket[offset..]);
                ordered.extend_from_slice(&bucket[..offset]);
            }
            ordered
        }
    }
}

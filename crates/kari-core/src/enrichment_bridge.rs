//! Bridges memory enrichment onto the provider router.
//!
//! Embeddings come from the first healthy provider declaring the
//! embeddings capability. Linguistic features stay with the keyword
//! heuristics until an NLP-class provider contract exists.

use std::sync::Arc;

use async_trait::async_trait;
use kari_memory::{EnrichmentBackend, LinguisticFeatures};
use kari_router::{LlmRouter, ProviderCapability};

pub(crate) struct RouterEnrichmentBackend {
    router: Arc<LlmRouter>,
}

impl RouterEnrichmentBackend {
    pub(crate) fn new(router: Arc<LlmRouter>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl EnrichmentBackend for RouterEnrichmentBackend {
    async fn healthy(&self) -> bool {
        for name in self.router.registry().list_providers(None) {
            let declares_embeddings = self
                .router
                .registry()
                .provider_spec(&name)
                .is_some_and(|spec| spec.has_capability(ProviderCapability::Embeddings));
            if declares_embeddings && self.router.health().is_dispatchable(&name).await {
                return true;
            }
        }
        false
    }

    async fn linguistic_features(&self, _text: &str) -> Option<LinguisticFeatures> {
        None
    }

    async fn embed(&self, texts: &[String]) -> Option<Vec<Vec<f32>>> {
        self.router.embed_texts(texts).await.ok()
    }
}

//! Deterministic offline provider backing the fallback priority bucket.

use async_trait::async_trait;
use kari_observability::HealthReport;
use sha2::{Digest, Sha256};

use crate::error::ProviderError;
use crate::provider::{ChatProvider, GenerationParams, ProviderCapability};

const CAPABILITIES: [ProviderCapability; 1] = [ProviderCapability::LocalExecution];

/// Always-available responder that never leaves the host. Replies are a
/// fixed function of the prompt so repeated calls are reproducible.
#[derive(Debug, Default)]
pub struct DeterministicFallbackProvider;

impl DeterministicFallbackProvider {
    /// Create the provider.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ChatProvider for DeterministicFallbackProvider {
    fn name(&self) -> &str {
        "fallback"
    }

    fn capabilities(&self) -> &[ProviderCapability] {
        &CAPABILITIES
    }

    async fn generate(
        &self,
        prompt: &str,
        _params: &GenerationParams,
    ) -> Result<String, ProviderError> {
        let digest = Sha256::digest(prompt.as_bytes());
        let reference = hex::encode(&digest[..4]);
        Ok(format!(
            "I can only give a brief offline answer right now. I received your \
             message and will be able to respond fully once a model provider is \
             back online. (ref {reference})"
        ))
    }

    async fn health_check(&self) -> HealthReport {
        HealthReport::healthy(0)
    }
}

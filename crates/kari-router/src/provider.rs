//! Provider invocation contract.
//!
//! Providers declare capabilities up front; the router picks the invocation
//! shape (stream vs generate) from the declared set, never by probing for
//! methods at dispatch time.

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use kari_observability::HealthReport;
use serde::Serialize;

use crate::error::ProviderError;

/// Capabilities a provider can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderCapability {
    /// Incremental chunked responses
    Streaming,
    /// Text embeddings
    Embeddings,
    /// Tool/function calling
    FunctionCalling,
    /// Image understanding
    Vision,
    /// Runs fully offline on this host
    LocalExecution,
}

/// Sampling parameters forwarded to a provider call.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerationParams {
    /// Completion token cap
    pub max_tokens: Option<u32>,
    /// Sampling temperature
    pub temperature: Option<f32>,
}

/// Ordered lazy sequence of response chunks.
pub type ChunkStream = BoxStream<'static, Result<String, ProviderError>>;

/// An inference provider the router can dispatch to.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Registry name of this provider.
    fn name(&self) -> &str;

    /// Declared capability set.
    fn capabilities(&self) -> &[ProviderCapability];

    /// Produce a complete response for the prompt.
    async fn generate(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<String, ProviderError>;

    /// Produce an ordered chunk stream. The default wraps [`Self::generate`]
    /// in a single-chunk sequence for providers without native streaming.
    async fn stream(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<ChunkStream, ProviderError> {
        let text = self.generate(prompt, params).await?;
        Ok(futures::stream::once(async move { Ok(text) }).boxed())
    }

    /// Embed a batch of texts. Only meaningful when the provider declares
    /// [`ProviderCapability::Embeddings`].
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let _ = texts;
        Err(ProviderError::Incapable(format!(
            "{} does not expose embeddings",
            self.name()
        )))
    }

    /// Probe provider health.
    async fn health_check(&self) -> HealthReport;
}

/// Drain a chunk stream into one string. Convenience for non-streaming
/// callers; stops at the first failed chunk.
pub async fn collect_text(mut stream: ChunkStream) -> Result<String, ProviderError> {
    let mut text = String::new();
    while let Some(chunk) = stream.next().await {
        text.push_str(&chunk?);
    }
    Ok(text)
}

//! Scripted providers for router and core tests. Not part of the public
//! surface.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use kari_observability::HealthReport;
use std::sync::Mutex;

use crate::error::ProviderError;
use crate::provider::{ChatProvider, GenerationParams, ProviderCapability};
use crate::registry::{InstanceFactory, ProviderCategory, ProviderSpec};

/// Provider whose responses are scripted per call, with call counting.
pub struct ScriptedProvider {
    name: String,
    capabilities: Vec<ProviderCapability>,
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    default_response: String,
    calls: AtomicU64,
    healthy: AtomicBool,
    embeddings: Mutex<Option<Vec<Vec<f32>>>>,
}

impl ScriptedProvider {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            default_response: format!("response from {name}"),
            name,
            capabilities: vec![ProviderCapability::Streaming],
            script: Mutex::new(VecDeque::new()),
            calls: AtomicU64::new(0),
            healthy: AtomicBool::new(true),
            embeddings: Mutex::new(None),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Vec<ProviderCapability>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Queue one scripted outcome; consumed in FIFO order before the
    /// default response applies.
    pub fn push_result(&self, result: Result<String, ProviderError>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(result);
        }
    }

    /// Queue `count` copies of a failure.
    pub fn push_failures(&self, count: usize, error: ProviderError) {
        for _ in 0..count {
            self.push_result(Err(error.clone()));
        }
    }

    /// Fixed embedding vectors returned by `embed`.
    pub fn set_embeddings(&self, vectors: Vec<Vec<f32>>) {
        if let Ok(mut embeddings) = self.embeddings.lock() {
            *embeddings = Some(vectors);
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::Relaxed);
    }

    /// How many generate calls reached this provider.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> &[ProviderCapability] {
        &self.capabilities
    }

    async fn generate(
        &self,
        _prompt: &str,
        _params: &GenerationParams,
    ) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let scripted = self.script.lock().ok().and_then(|mut script| script.pop_front());
        match scripted {
            Some(result) => result,
            None => Ok(self.default_response.clone()),
        }
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let embeddings = self.embeddings.lock().ok().and_then(|guard| guard.clone());
        match embeddings {
            Some(mut vectors) => {
                vectors.truncate(texts.len());
                Ok(vectors)
            }
            None => Err(ProviderError::Incapable("no scripted embeddings".to_string())),
        }
    }

    async fn health_check(&self) -> HealthReport {
        if self.healthy.load(Ordering::Relaxed) {
            HealthReport::healthy(1)
        } else {
            HealthReport::unhealthy("scripted unhealthy")
        }
    }
}

/// Spec wrapping a scripted provider with sensible defaults.
pub fn scripted_spec(provider: Arc<ScriptedProvider>, default_model: &str) -> ProviderSpec {
    ProviderSpec {
        name: provider.name().to_string(),
        category: ProviderCategory::Llm,
        requires_api_key: false,
        description: "scripted test provider".to_string(),
        capabilities: provider.capabilities().to_vec(),
        default_model: Some(default_model.to_string()),
        fallback_models: Vec::new(),
        factory: Arc::new(InstanceFactory(provider)),
    }
}

/// Empty init config, for registry lookups in tests.
pub fn empty_config() -> BTreeMap<String, String> {
    BTreeMap::new()
}

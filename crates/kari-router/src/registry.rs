//! Provider/runtime registry with compatibility matching.
//!
//! Thread-safe maps from name to spec, an instance cache keyed by the hash
//! of initialization config, and priority-ordered runtime selection for
//! models.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use kari_observability::{HealthReport, RouterEvent};
use kari_types::now_unix_ms;
use serde::Serialize;

use crate::error::ProviderError;
use crate::provider::{ChatProvider, ProviderCapability};

/// What a provider supplies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderCategory {
    /// Chat/completion models
    Llm,
    /// Embedding models
    Embedding,
    /// UI framework integrations
    UiFramework,
}

/// Builds provider instances from initialization config.
pub trait ProviderFactory: Send + Sync {
    /// Build (or reuse) an instance for the given config.
    fn build(
        &self,
        config: &BTreeMap<String, String>,
    ) -> Result<Arc<dyn ChatProvider>, ProviderError>;

    /// Discover available models. Defaults to none; the registry then falls
    /// back to the spec's `fallback_models`.
    fn discover(&self) -> Vec<ModelMetadata> {
        Vec::new()
    }
}

/// Factory wrapping one pre-built instance. Config is ignored; useful for
/// local and scripted providers.
pub struct InstanceFactory(pub Arc<dyn ChatProvider>);

impl ProviderFactory for InstanceFactory {
    fn build(
        &self,
        _config: &BTreeMap<String, String>,
    ) -> Result<Arc<dyn ChatProvider>, ProviderError> {
        Ok(self.0.clone())
    }
}

/// Specification for a model provider (where models come from).
#[derive(Clone)]
pub struct ProviderSpec {
    pub name: String,
    pub category: ProviderCategory,
    pub requires_api_key: bool,
    pub description: String,
    pub capabilities: Vec<ProviderCapability>,
    /// The model selected when a request names none.
    pub default_model: Option<String>,
    /// Models advertised when discovery returns nothing.
    pub fallback_models: Vec<ModelMetadata>,
    pub factory: Arc<dyn ProviderFactory>,
}

impl ProviderSpec {
    /// Whether the provider declares a capability.
    pub fn has_capability(&self, capability: ProviderCapability) -> bool {
        self.capabilities.contains(&capability)
    }
}

/// Runtime startup latency class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupTime {
    Fast,
    Medium,
    Slow,
}

/// Runtime throughput class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Throughput {
    Low,
    Medium,
    High,
}

/// Loads models into an execution engine.
pub trait RuntimeAdapter: Send + Sync {
    /// Whether the engine is usable on this host.
    fn is_available(&self) -> bool {
        true
    }

    /// Load a model with the given config.
    fn load(&self, config: &BTreeMap<String, String>) -> Result<(), ProviderError>;

    /// Probe engine health.
    fn health(&self) -> HealthReport;
}

/// Specification for a model runtime (how models execute).
#[derive(Clone)]
pub struct RuntimeSpec {
    pub name: String,
    pub description: String,
    /// Model families this runtime supports; empty means any.
    pub family: Vec<String>,
    /// Model formats this runtime supports.
    pub supports: Vec<String>,
    pub requires_gpu: bool,
    pub memory_efficient: bool,
    pub supports_streaming: bool,
    pub supports_batching: bool,
    pub startup_time: StartupTime,
    pub throughput: Throughput,
    /// Selection priority in `[0, 100]`; higher wins.
    pub priority: u8,
    /// Engine binding; `None` for catalog-only registrations.
    pub adapter: Option<Arc<dyn RuntimeAdapter>>,
}

/// Metadata for a specific model.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModelMetadata {
    pub id: String,
    pub name: String,
    pub provider: String,
    /// llama, mistral, qwen, ...
    pub family: String,
    /// gguf, safetensors, fp16, ...
    pub format: String,
    pub parameters: Option<String>,
    pub quantization: Option<String>,
    pub context_length: Option<u32>,
    pub local_path: Option<String>,
}

/// Hard requirements narrowing runtime selection.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeRequirements {
    pub requires_gpu: bool,
    pub memory_efficient: bool,
    pub streaming: bool,
    pub high_throughput: bool,
    pub fast_startup: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct InstanceKey {
    component: String,
    config_hash: u64,
}

#[derive(Debug, Clone)]
struct CachedHealth {
    report: HealthReport,
    checked_at_ms: i64,
}

/// Thread-safe provider/runtime registry. Reads dominate; registration and
/// unregistration are the only write paths.
#[derive(Default)]
pub struct LlmRegistry {
    providers: RwLock<HashMap<String, ProviderSpec>>,
    runtimes: RwLock<HashMap<String, RuntimeSpec>>,
    instances: DashMap<InstanceKey, Arc<dyn ChatProvider>>,
    health_cache: DashMap<String, CachedHealth>,
}

impl LlmRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a provider spec.
    pub fn register_provider(&self, spec: ProviderSpec) {
        let name = spec.name.clone();
        if let Ok(mut providers) = self.providers.write() {
            providers.insert(name.clone(), spec);
        }
        tracing::info!(
            event = RouterEvent::RegistryRegistered.as_str(),
            component = %name,
            kind = "provider",
            "provider registered"
        );
    }

    /// Drop a provider and any cached instances. Returns whether it existed.
    pub fn unregister_provider(&self, name: &str) -> bool {
        let removed = self
            .providers
            .write()
            .map(|mut providers| providers.remove(name).is_some())
            .unwrap_or(false);
        if removed {
            self.instances.retain(|key, _| key.component != name);
            self.health_cache.remove(name);
            tracing::info!(
                event = RouterEvent::RegistryUnregistered.as_str(),
                component = name,
                kind = "provider",
                "provider unregistered"
            );
        }
        removed
    }

    /// Register (or replace) a runtime spec.
    pub fn register_runtime(&self, spec: RuntimeSpec) {
        let name = spec.name.clone();
        if let Ok(mut runtimes) = self.runtimes.write() {
            runtimes.insert(name.clone(), spec);
        }
        tracing::info!(
            event = RouterEvent::RegistryRegistered.as_str(),
            component = %name,
            kind = "runtime",
            "runtime registered"
        );
    }

    /// Drop a runtime. Returns whether it existed.
    pub fn unregister_runtime(&self, name: &str) -> bool {
        let removed = self
            .runtimes
            .write()
            .map(|mut runtimes| runtimes.remove(name).is_some())
            .unwrap_or(false);
        if removed {
            self.health_cache.remove(name);
            tracing::info!(
                event = RouterEvent::RegistryUnregistered.as_str(),
                component = name,
                kind = "runtime",
                "runtime unregistered"
            );
        }
        removed
    }

    /// The spec registered under a provider name.
    pub fn provider_spec(&self, name: &str) -> Option<ProviderSpec> {
        self.providers.read().ok()?.get(name).cloned()
    }

    /// The spec registered under a runtime name.
    pub fn runtime_spec(&self, name: &str) -> Option<RuntimeSpec> {
        self.runtimes.read().ok()?.get(name).cloned()
    }

    /// Provider names, sorted, optionally filtered by category.
    pub fn list_providers(&self, category: Option<ProviderCategory>) -> Vec<String> {
        let Ok(providers) = self.providers.read() else {
            return Vec::new();
        };
        let mut names: Vec<String> = providers
            .values()
            .filter(|spec| category.is_none_or(|wanted| spec.category == wanted))
            .map(|spec| spec.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Runtime names, sorted.
    pub fn list_runtimes(&self) -> Vec<String> {
        let Ok(runtimes) = self.runtimes.read() else {
            return Vec::new();
        };
        let mut names: Vec<String> = runtimes.keys().cloned().collect();
        names.sort();
        names
    }

    /// Build or reuse a provider instance. Instances are cached per
    /// `(provider, config hash)`.
    pub fn get_provider(
        &self,
        name: &str,
        config: &BTreeMap<String, String>,
    ) -> Result<Arc<dyn ChatProvider>, ProviderError> {
        let spec = self.provider_spec(name).ok_or_else(|| {
            ProviderError::MissingConfiguration(format!("provider not registered: {name}"))
        })?;
        let key = InstanceKey {
            component: name.to_string(),
            config_hash: config_fingerprint(config),
        };
        if let Some(instance) = self.instances.get(&key) {
            return Ok(instance.clone());
        }
        let instance = spec.factory.build(config)?;
        self.instances.insert(key, instance.clone());
        Ok(instance)
    }

    /// Models a provider advertises: discovery output, else the spec's
    /// fallback list.
    pub fn provider_models(&self, name: &str) -> Vec<ModelMetadata> {
        let Some(spec) = self.provider_spec(name) else {
            return Vec::new();
        };
        let discovered = spec.factory.discover();
        if discovered.is_empty() { spec.fallback_models } else { discovered }
    }

    /// Runtimes compatible with the model, sorted by descending priority
    /// (ties alphabetical).
    pub fn compatible_runtimes(&self, model: &ModelMetadata) -> Vec<String> {
        let Ok(runtimes) = self.runtimes.read() else {
            return Vec::new();
        };
        let mut compatible: Vec<(&String, &RuntimeSpec)> = runtimes
            .iter()
            .filter(|(_, spec)| is_compatible(model, spec))
            .collect();
        compatible.sort_by(|a, b| b.1.priority.cmp(&a.1.priority).then_with(|| a.0.cmp(b.0)));
        compatible.into_iter().map(|(name, _)| name.clone()).collect()
    }

    /// The highest-priority compatible runtime passing the requirement
    /// predicates, else the first compatible runtime, else `None`.
    pub fn optimal_runtime(
        &self,
        model: &ModelMetadata,
        requirements: &RuntimeRequirements,
    ) -> Option<String> {
        let compatible = self.compatible_runtimes(model);
        if compatible.is_empty() {
            return None;
        }
        let survivor = compatible.iter().find(|name| {
            self.runtime_spec(name)
                .is_some_and(|spec| meets_requirements(&spec, requirements))
        });
        survivor.cloned().or_else(|| compatible.first().cloned())
    }

    /// Probe one component (provider or runtime) and cache the result.
    pub async fn health_check(&self, component: &str, timeout: Duration) -> HealthReport {
        let report = if self.provider_spec(component).is_some() {
            match self.get_provider(component, &BTreeMap::new()) {
                Ok(instance) => match tokio::time::timeout(timeout, instance.health_check()).await {
                    Ok(report) => report,
                    Err(_) => HealthReport::unhealthy(format!(
                        "health check timed out after {timeout:?}"
                    )),
                },
                Err(error) => HealthReport::unhealthy(error.to_string()),
            }
        } else if let Some(spec) = self.runtime_spec(component) {
            match spec.adapter {
                Some(adapter) if adapter.is_available() => adapter.health(),
                Some(_) => HealthReport::unhealthy("runtime unavailable on this host"),
                // Catalog-only registration: healthy by declaration.
                None => HealthReport::healthy(0),
            }
        } else {
            HealthReport::unhealthy(format!("component not registered: {component}"))
        };
        self.health_cache.insert(
            component.to_string(),
            CachedHealth {
                report: report.clone(),
                checked_at_ms: now_unix_ms(),
            },
        );
        report
    }

    /// Last cached probe for a component, with its check timestamp.
    pub fn cached_health(&self, component: &str) -> Option<(HealthReport, i64)> {
        self.health_cache
            .get(component)
            .map(|cached| (cached.report.clone(), cached.checked_at_ms))
    }
}

fn is_compatible(model: &ModelMetadata, runtime: &RuntimeSpec) -> bool {
    if !model.format.is_empty() && !runtime.supports.iter().any(|format| format == &model.format) {
        return false;
    }
    if !model.family.is_empty()
        && !runtime.family.is_empty()
        && !runtime.family.iter().any(|family| family == &model.family)
    {
        return false;
    }
    true
}

fn meets_requirements(spec: &RuntimeSpec, requirements: &RuntimeRequirements) -> bool {
    if requirements.requires_gpu && !spec.requires_gpu {
        return false;
    }
    if requirements.memory_efficient && !spec.memory_efficient {
        return false;
    }
    if requirements.streaming && !spec.supports_streaming {
        return false;
    }
    if requirements.high_throughput && spec.throughput != Throughput::High {
        return false;
    }
    if requirements.fast_startup && spec.startup_time != StartupTime::Fast {
        return false;
    }
    true
}

/// Stable fingerprint over sorted config pairs.
fn config_fingerprint(config: &BTreeMap<String, String>) -> u64 {
    let mut hasher = DefaultHasher::new();
    for (key, value) in config {
        key.hash(&mut hasher);
        value.hash(&mut hasher);
    }
    hasher.finish()
}

/// Core runtime catalog mirroring the engines the platform ships with.
pub fn default_runtime_catalog() -> Vec<RuntimeSpec> {
    vec![
        RuntimeSpec {
            name: "llama_cpp".to_string(),
            description: "llama.cpp runtime for GGUF models".to_string(),
            family: ["llama", "mistral", "qwen", "phi", "gemma", "codellama"]
                .map(String::from)
                .to_vec(),
            supports: vec!["gguf".to_string()],
            requires_gpu: false,
            memory_efficient: true,
            supports_streaming: true,
            supports_batching: false,
            startup_time: StartupTime::Fast,
            throughput: Throughput::Medium,
            priority: 80,
            adapter: None,
        },
        RuntimeSpec {
            name: "transformers".to_string(),
            description: "Transformers runtime for safetensors models".to_string(),
            family: ["llama", "mistral", "qwen", "phi", "gemma", "bert", "gpt"]
                .map(String::from)
                .to_vec(),
            supports: ["safetensors", "fp16", "bf16", "int8", "int4"]
                .map(String::from)
                .to_vec(),
            requires_gpu: false,
            memory_efficient: false,
            supports_streaming: true,
            supports_batching: true,
            startup_time: StartupTime::Medium,
            throughput: Throughput::Medium,
            priority: 60,
            adapter: None,
        },
        RuntimeSpec {
            name: "vllm".to_string(),
            description: "vLLM runtime for high-performance GPU serving".to_string(),
            family: ["llama", "mistral", "qwen", "phi", "gemma"].map(String::from).to_vec(),
            supports: ["safetensors", "fp16", "bf16"].map(String::from).to_vec(),
            requires_gpu: true,
            memory_efficient: false,
            supports_streaming: true,
            supports_batching: true,
            startup_time: StartupTime::Slow,
            throughput: Throughput::High,
            priority: 90,
            adapter: None,
        },
        RuntimeSpec {
            name: "core_helpers".to_string(),
            description: "Lightweight models for degraded mode".to_string(),
            family: ["tinyllama", "distilbert"].map(String::from).to_vec(),
            supports: ["gguf", "safetensors"].map(String::from).to_vec(),
            requires_gpu: false,
            memory_efficient: true,
            supports_streaming: false,
            supports_batching: false,
            startup_time: StartupTime::Fast,
            throughput: Throughput::Low,
            priority: 10,
            adapter: None,
        },
    ]
}

/// Register the core runtime catalog and the deterministic fallback
/// provider into a registry.
pub fn install_default_catalog(registry: &LlmRegistry) {
    for runtime in default_runtime_catalog() {
        registry.register_runtime(runtime);
    }
    let fallback = Arc::new(crate::providers::DeterministicFallbackProvider::new());
    registry.register_provider(ProviderSpec {
        name: "fallback".to_string(),
        category: ProviderCategory::Llm,
        requires_api_key: false,
        description: "Deterministic offline responder".to_string(),
        capabilities: vec![ProviderCapability::LocalExecution],
        default_model: Some("deterministic".to_string()),
        fallback_models: Vec::new(),
        factory: Arc::new(InstanceFactory(fallback)),
    });
}

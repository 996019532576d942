//! kari-router - Local-first LLM provider routing.
//!
//! A pluggable registry of inference providers and execution runtimes, a
//! policy-driven router with per-provider health state (circuit breaker,
//! token-bucket rate limiting, latency history), exponential-backoff retries,
//! a bounded fallback chain, streaming support, and a deterministic degraded
//! responder for when every provider fails.

#![allow(missing_docs)]

mod degraded;
mod error;
mod health;
mod policy;
mod provider;
mod providers;
mod registry;
mod router;
mod secrets;
#[doc(hidden)]
pub mod test_support;

pub use degraded::{DegradedResponder, DegradedSnapshot};
pub use error::{DegradedReason, FailureRecord, ProviderError, infer_degraded_reason};
pub use health::{HealthLedger, ProviderHealthSnapshot, RateLimitConfig};
pub use policy::{PriorityMap, ProviderPriority, RoutingPolicy};
pub use provider::{ChatProvider, ChunkStream, GenerationParams, ProviderCapability, collect_text};
pub use providers::{
    DeterministicFallbackProvider, OpenAiCompatibleConfig, OpenAiCompatibleProvider,
};
pub use registry::{
    InstanceFactory, LlmRegistry, ModelMetadata, ProviderCategory, ProviderFactory, ProviderSpec,
    RuntimeAdapter, RuntimeRequirements, RuntimeSpec, StartupTime, Throughput,
    default_runtime_catalog, install_default_catalog,
};
pub use router::{
    ChatOutcome, LlmRouter, ProviderStatusEntry, RouterConfig, RouterStatusSnapshot,
    RoutingRequest,
};
pub use secrets::{EnvSecretSource, MapSecretSource, SecretResolver, SecretSource};

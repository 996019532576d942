//! Provider error taxonomy.
//!
//! Transport and provider failures are normalized into this taxonomy once,
//! at the wrapper boundary, before the router sees them. Substring matching
//! survives only in [`ProviderError::from_message`] as the last-resort
//! classifier for providers that surface bare strings.

use serde::Serialize;
use thiserror::Error;

/// Normalized provider failure kinds.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// The provider indicated throttling. Triggers a per-provider cooldown.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// The call exceeded its deadline.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Transport-level failure (connection refused/reset, DNS).
    #[error("network failure: {0}")]
    Network(String),

    /// Quota or capacity exhausted on the provider side.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A required capability or credential is absent.
    #[error("missing configuration: {0}")]
    MissingConfiguration(String),

    /// The provider cannot serve this invocation shape at all.
    #[error("provider incapable: {0}")]
    Incapable(String),

    /// Cooperative cancellation. Not an error log.
    #[error("cancelled")]
    Cancelled,

    /// Anything the classifier could not place.
    #[error("{0}")]
    Other(String),
}

impl ProviderError {
    /// Stable label for failure metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::RateLimited(_) => "rate_limited",
            Self::Timeout(_) => "timeout",
            Self::Network(_) => "network",
            Self::ResourceExhausted(_) => "resource_exhausted",
            Self::MissingConfiguration(_) => "missing_configuration",
            Self::Incapable(_) => "incapable",
            Self::Cancelled => "cancelled",
            Self::Other(_) => "other",
        }
    }

    /// Whether retrying the same provider can help. Rate limiting is not
    /// retryable in place: the cooldown is already set and the fallback
    /// chain moves on.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Network(_) | Self::ResourceExhausted(_) | Self::Other(_) => {
                true
            }
            Self::RateLimited(_)
            | Self::MissingConfiguration(_)
            | Self::Incapable(_)
            | Self::Cancelled => false,
        }
    }

    /// Last-resort classifier for free-form provider error strings.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        if lower.contains("rate limit") || lower.contains("429") {
            Self::RateLimited(message)
        } else if lower.contains("timeout") || lower.contains("timed out") {
            Self::Timeout(message)
        } else if lower.contains("connection") || lower.contains("network") {
            Self::Network(message)
        } else if lower.contains("quota")
            || lower.contains("exhaust")
            || lower.contains("memory")
            || lower.contains("resource")
        {
            Self::ResourceExhausted(message)
        } else {
            Self::Other(message)
        }
    }
}

/// One provider failure accumulated along the fallback chain.
#[derive(Debug, Clone)]
pub struct FailureRecord {
    /// Provider that failed
    pub provider: String,
    /// The normalized failure
    pub error: ProviderError,
}

/// Why the router entered degraded mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedReason {
    /// Every provider in the chain failed with unclassified errors
    AllProvidersFailed,
    /// At least one failure was throttling
    ApiRateLimits,
    /// At least one failure was a timeout or transport error
    NetworkIssues,
    /// At least one failure was quota/capacity exhaustion
    ResourceExhaustion,
}

impl DegradedReason {
    /// Stable identifier for logs, metrics, and the degraded reply tag.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AllProvidersFailed => "all_providers_failed",
            Self::ApiRateLimits => "api_rate_limits",
            Self::NetworkIssues => "network_issues",
            Self::ResourceExhaustion => "resource_exhaustion",
        }
    }
}

/// Infer the degraded reason from the accumulated failures. Rate limiting
/// dominates, then transport trouble, then exhaustion.
pub fn infer_degraded_reason(failures: &[FailureRecord]) -> DegradedReason {
    if failures
        .iter()
        .any(|record| matches!(record.error, ProviderError::RateLimited(_)))
    {
        return DegradedReason::ApiRateLimits;
    }
    if failures
        .iter()
        .any(|record| matches!(record.error, ProviderError::Timeout(_) | ProviderError::Network(_)))
    {
        return DegradedReason::NetworkIssues;
    }
    if failures
        .iter()
        .any(|record| matches!(record.error, ProviderError::ResourceExhausted(_)))
    {
        return DegradedReason::ResourceExhaustion;
    }
    DegradedReason::AllProvidersFailed
}

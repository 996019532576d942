//! Shared health snapshot shape for adapters, providers, and runtimes.

use serde::{Deserialize, Serialize};

/// Result of one health probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Whether the component answered its probe
    pub ok: bool,
    /// Probe round-trip, when measured
    pub latency_ms: Option<u64>,
    /// Error or status detail
    pub detail: Option<String>,
}

impl HealthReport {
    /// Healthy report with a measured latency.
    pub fn healthy(latency_ms: u64) -> Self {
        Self {
            ok: true,
            latency_ms: Some(latency_ms),
            detail: None,
        }
    }

    /// Unhealthy report carrying the probe failure detail.
    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            latency_ms: None,
            detail: Some(detail.into()),
        }
    }
}

//! Error types for memory orchestration.

use thiserror::Error;

/// One adapter's rejection during write fan-out.
#[derive(Debug, Clone)]
pub struct AdapterFailure {
    /// Adapter kind that rejected the write
    pub adapter: &'static str,
    /// The adapter's error message
    pub message: String,
}

impl std::fmt::Display for AdapterFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.adapter, self.message)
    }
}

/// Errors surfaced by the memory orchestrator.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Every adapter rejected the write; carries per-adapter detail.
    #[error("write rejected by every adapter: {}", summarize(failures))]
    AllAdaptersFailed {
        /// Per-adapter rejection messages
        failures: Vec<AdapterFailure>,
    },

    /// The operation was cancelled cooperatively.
    #[error("operation cancelled")]
    Cancelled,
}

fn summarize(failures: &[AdapterFailure]) -> String {
    if failures.is_empty() {
        return "no adapters registered".to_string();
    }
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

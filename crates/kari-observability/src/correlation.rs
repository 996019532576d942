//! Request correlation identifiers.
//!
//! A correlation ID is minted once at the outermost entry of a request and
//! carried as a value through every span, log line, and metric label of its
//! processing. It is never reconstructed from logging state.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlation token attached to a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Mint an ID for a router entry point (`llm-router-{uuid}`).
    pub fn new_router() -> Self {
        Self(format!("llm-router-{}", Uuid::new_v4()))
    }

    /// Mint an ID for a registry/model operation (`model-op-{12 hex}`).
    pub fn new_model_op() -> Self {
        let simple = Uuid::new_v4().simple().to_string();
        let short = simple.get(..12).unwrap_or(simple.as_str());
        Self(format!("model-op-{short}"))
    }

    /// Adopt an ID handed in by an outer layer.
    pub fn from_external(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The token as a borrowed string, for log fields.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_ids_carry_prefix_and_are_unique() {
        let a = CorrelationId::new_router();
        let b = CorrelationId::new_router();
        assert!(a.as_str().starts_with("llm-router-"));
        assert_ne!(a, b);
    }

    #[test]
    fn model_op_ids_are_twelve_hex_chars() {
        let id = CorrelationId::new_model_op();
        let suffix = id.as_str().trim_start_matches("model-op-");
        assert_eq!(suffix.len(), 12);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn external_ids_pass_through_unchanged() {
        let id = CorrelationId::from_external("llm-router-abc");
        assert_eq!(id.as_str(), "llm-router-abc");
    }
}

//! Providers shipped with the router: an OpenAI-compatible HTTP client and
//! the deterministic offline fallback.

mod fallback;
mod http;

pub use fallback::DeterministicFallbackProvider;
pub use http::{OpenAiCompatibleConfig, OpenAiCompatibleProvider};

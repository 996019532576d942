//! Adapter implementations shipped with the core.
//!
//! The in-memory adapters back tests and local development; the Valkey
//! cache adapter (feature `valkey`) backs the ephemeral cache/buffer layer
//! in deployments. Vector, relational, text-index, and analytics engines
//! are external collaborators implemented against the contracts in
//! [`crate::adapter`].

mod in_memory;

pub use in_memory::{
    InMemoryAnalyticsAdapter, InMemoryAuthoritativeAdapter, InMemoryCacheAdapter,
    InMemoryTextIndexAdapter, InMemoryVectorAdapter,
};

#[cfg(feature = "valkey")]
mod valkey;

#[cfg(feature = "valkey")]
pub use valkey::ValkeyCacheAdapter;

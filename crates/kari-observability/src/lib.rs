//! kari-observability - Structured observability substrate for the Kari core.
//!
//! Correlation IDs are first-class values threaded through every interface,
//! metrics register once per process with collision de-duplication, and every
//! subsystem logs against a centralized event-name catalog.

mod correlation;
mod events;
mod health;
mod metrics;

pub use correlation::CorrelationId;
pub use events::{MemoryEvent, RouterEvent};
pub use health::HealthReport;
pub use metrics::{Counter, Histogram, HistogramSnapshot, MetricsRegistry, names, normalize_label};

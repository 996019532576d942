//! Deterministic offline responder for when no provider can be dispatched.

use std::sync::atomic::{AtomicU64, Ordering};

use kari_observability::RouterEvent;
use kari_types::now_unix_ms;
use serde::Serialize;
use std::sync::Mutex;

use crate::error::DegradedReason;

const MESSAGE_EXCERPT_CHARS: usize = 120;

/// Activation bookkeeping surfaced in the router status snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct DegradedSnapshot {
    /// How many times degraded mode has engaged
    pub activations: u64,
    /// Reason of the most recent activation
    pub last_reason: Option<DegradedReason>,
    /// When the most recent activation happened, unix milliseconds
    pub last_activated_ms: Option<i64>,
}

/// Produces the fixed-structure degraded reply and tracks activations.
#[derive(Default)]
pub struct DegradedResponder {
    activations: AtomicU64,
    last: Mutex<Option<(DegradedReason, i64)>>,
}

impl DegradedResponder {
    /// Fresh responder with no recorded activations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an activation and produce the structured reply.
    pub fn respond(
        &self,
        message: &str,
        reason: DegradedReason,
        failed_providers: &[String],
    ) -> String {
        self.activations.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut last) = self.last.lock() {
            *last = Some((reason, now_unix_ms()));
        }
        tracing::error!(
            event = RouterEvent::DegradedActivated.as_str(),
            reason = reason.as_str(),
            failed_providers = ?failed_providers,
            "degraded mode engaged"
        );

        let providers = if failed_providers.is_empty() {
            "none were reachable".to_string()
        } else {
            failed_providers.join(", ")
        };
        let excerpt = excerpt(message);
        format!(
            "I'm answering in degraded mode: {}. Providers attempted: {providers}. \
             Your request (\"{excerpt}\") was received and normal service resumes \
             automatically once a provider recovers. [degraded:{}]",
            reason_text(reason),
            reason.as_str()
        )
    }

    /// Point-in-time activation stats.
    pub fn snapshot(&self) -> DegradedSnapshot {
        let last = self.last.lock().ok().and_then(|guard| *guard);
        DegradedSnapshot {
            activations: self.activations.load(Ordering::Relaxed),
            last_reason: last.map(|(reason, _)| reason),
            last_activated_ms: last.map(|(_, at)| at),
        }
    }
}

fn reason_text(reason: DegradedReason) -> &'static str {
    match reason {
        DegradedReason::AllProvidersFailed => "every configured model provider failed",
        DegradedReason::ApiRateLimits => "model providers are rate limiting requests",
        DegradedReason::NetworkIssues => "model providers are unreachable over the network",
        DegradedReason::ResourceExhaustion => "model providers are out of capacity",
    }
}

fn excerpt(message: &str) -> String {
    if message.chars().count() <= MESSAGE_EXCERPT_CHARS {
        return message.to_string();
    }
    let mut out: String = message.chars().take(MESSAGE_EXCERPT_CHARS - 3).collect();
    out.push_str("...");
    out
}

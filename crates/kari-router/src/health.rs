//! Per-provider health state: circuit breaker, rate-limit window, latency
//! ring.
//!
//! Each provider's state is guarded by its own async mutex; state
//! transitions (circuit open, window rollover) happen under that lock.
//! Readers take point-in-time snapshots. Exactly one of healthy /
//! circuit-open / rate-limited governs dispatch at any instant: the gate
//! checks the circuit first, then the cooldown, then plain health.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use kari_observability::RouterEvent;
use kari_types::now_unix_ms;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::ProviderError;

/// Token-bucket window configuration.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Requests allowed per window
    pub max_requests: u32,
    /// Window length
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 30,
            window: Duration::from_secs(60),
        }
    }
}

/// Dispatch gate decision for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DispatchGate {
    /// The provider may be dispatched to.
    Dispatchable,
    /// Circuit is open; dispatch is suppressed.
    CircuitOpen,
    /// Rate-limit cooldown is active.
    RateLimited,
    /// Health checks currently mark the provider down.
    Unhealthy,
    /// The provider is not tracked.
    Unknown,
}

/// Window slot decision for one dispatch attempt.
#[derive(Debug, Clone, Copy)]
pub(crate) enum SlotDecision {
    /// A token was consumed; proceed.
    Proceed,
    /// The window is exhausted until the given instant.
    WaitUntil(Instant),
}

#[derive(Debug)]
struct HealthState {
    is_healthy: bool,
    last_check_ms: i64,
    consecutive_failures: u32,
    last_error: Option<String>,
    circuit_open_until: Option<Instant>,
    rate_limited_until: Option<Instant>,
    window_start: Instant,
    requests_in_window: u32,
    latency_samples: VecDeque<f64>,
    total_requests: u64,
}

impl HealthState {
    fn new() -> Self {
        Self {
            is_healthy: true,
            last_check_ms: now_unix_ms(),
            consecutive_failures: 0,
            last_error: None,
            circuit_open_until: None,
            rate_limited_until: None,
            window_start: Instant::now(),
            requests_in_window: 0,
            latency_samples: VecDeque::new(),
            total_requests: 0,
        }
    }

    fn push_latency(&mut self, seconds: f64, history: usize) {
        if self.latency_samples.len() >= history {
            self.latency_samples.pop_front();
        }
        self.latency_samples.push_back(seconds);
    }
}

/// Point-in-time provider health view for status endpoints and tests.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealthSnapshot {
    pub is_healthy: bool,
    pub consecutive_failures: u32,
    pub last_check_ms: i64,
    pub last_error: Option<String>,
    /// Remaining circuit-open time, when the circuit is open
    pub circuit_open_remaining_ms: Option<u64>,
    /// Remaining rate-limit cooldown, when one is active
    pub rate_limited_remaining_ms: Option<u64>,
    pub latency_avg_ms: Option<f64>,
    pub latency_p95_ms: Option<f64>,
    pub total_requests: u64,
}

/// Ledger tuning knobs.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LedgerConfig {
    pub circuit_threshold: u32,
    pub circuit_timeout: Duration,
    pub rate_limit_backoff: Duration,
    pub latency_history: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            circuit_threshold: 3,
            circuit_timeout: Duration::from_secs(60),
            rate_limit_backoff: Duration::from_secs(15),
            latency_history: 20,
        }
    }
}

struct LedgerInner {
    states: DashMap<String, Arc<Mutex<HealthState>>>,
    config: LedgerConfig,
}

/// Shared handle over all providers' health state.
#[derive(Clone)]
pub struct HealthLedger {
    inner: Arc<LedgerInner>,
}

impl HealthLedger {
    pub(crate) fn new(config: LedgerConfig) -> Self {
        Self {
            inner: Arc::new(LedgerInner {
                states: DashMap::new(),
                config,
            }),
        }
    }

    /// Track a provider. Idempotent; state survives re-registration.
    pub fn track(&self, provider: &str) {
        self.inner
            .states
            .entry(provider.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(HealthState::new())));
    }

    /// Stop tracking a provider.
    pub fn untrack(&self, provider: &str) {
        self.inner.states.remove(provider);
    }

    /// Providers currently tracked, sorted.
    pub fn tracked(&self) -> Vec<String> {
        let mut names: Vec<String> =
            self.inner.states.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    fn state(&self, provider: &str) -> Option<Arc<Mutex<HealthState>>> {
        self.inner.states.get(provider).map(|entry| entry.clone())
    }

    /// Evaluate the dispatch gate, lazily clearing expired circuit and
    /// cooldown windows.
    pub(crate) async fn gate(&self, provider: &str) -> DispatchGate {
        let Some(state) = self.state(provider) else {
            return DispatchGate::Unknown;
        };
        let mut state = state.lock().await;
        let now = Instant::now();

        if let Some(until) = state.circuit_open_until {
            if now < until {
                return DispatchGate::CircuitOpen;
            }
            state.circuit_open_until = None;
            state.is_healthy = true;
            state.consecutive_failures = 0;
            tracing::info!(
                event = RouterEvent::CircuitClosed.as_str(),
                provider,
                "circuit cooldown elapsed; provider dispatchable again"
            );
        }

        if let Some(until) = state.rate_limited_until {
            if now < until {
                return DispatchGate::RateLimited;
            }
            state.rate_limited_until = None;
        }

        if state.is_healthy { DispatchGate::Dispatchable } else { DispatchGate::Unhealthy }
    }

    /// Whether the provider may be dispatched to right now.
    pub async fn is_dispatchable(&self, provider: &str) -> bool {
        matches!(self.gate(provider).await, DispatchGate::Dispatchable)
    }

    /// Consume a window token, or report when the window frees up.
    pub(crate) async fn acquire_slot(
        &self,
        provider: &str,
        limit: &RateLimitConfig,
    ) -> SlotDecision {
        let Some(state) = self.state(provider) else {
            return SlotDecision::Proceed;
        };
        let mut state = state.lock().await;
        let now = Instant::now();
        if now.duration_since(state.window_start) >= limit.window {
            state.window_start = now;
            state.requests_in_window = 0;
        }
        if state.requests_in_window >= limit.max_requests {
            return SlotDecision::WaitUntil(state.window_start + limit.window);
        }
        state.requests_in_window += 1;
        SlotDecision::Proceed
    }

    /// Record a successful call: clear the failure streak and the circuit,
    /// push latency into the ring.
    pub async fn record_success(&self, provider: &str, latency: Duration) {
        let Some(state) = self.state(provider) else {
            return;
        };
        let mut state = state.lock().await;
        state.is_healthy = true;
        state.consecutive_failures = 0;
        state.last_error = None;
        state.circuit_open_until = None;
        state.total_requests += 1;
        state.last_check_ms = now_unix_ms();
        let history = self.inner.config.latency_history;
        state.push_latency(latency.as_secs_f64(), history);
    }

    /// Record a failed call; open the circuit at the failure threshold and
    /// start the cooldown on rate-limit errors. Returns whether the circuit
    /// opened on this failure.
    pub async fn record_failure(
        &self,
        provider: &str,
        latency: Duration,
        error: &ProviderError,
    ) -> bool {
        let Some(state) = self.state(provider) else {
            return false;
        };
        let mut state = state.lock().await;
        state.is_healthy = false;
        state.consecutive_failures += 1;
        state.last_error = Some(error.to_string());
        state.last_check_ms = now_unix_ms();
        let history = self.inner.config.latency_history;
        state.push_latency(latency.as_secs_f64(), history);

        if matches!(error, ProviderError::RateLimited(_)) {
            state.rate_limited_until =
                Some(Instant::now() + self.inner.config.rate_limit_backoff);
            tracing::warn!(
                event = RouterEvent::RateLimited.as_str(),
                provider,
                backoff_secs = self.inner.config.rate_limit_backoff.as_secs(),
                "provider rate limited; cooldown set"
            );
        }

        if state.consecutive_failures >= self.inner.config.circuit_threshold {
            let newly_opened = state.circuit_open_until.is_none();
            state.circuit_open_until =
                Some(Instant::now() + self.inner.config.circuit_timeout);
            if newly_opened {
                tracing::error!(
                    event = RouterEvent::CircuitOpened.as_str(),
                    provider,
                    consecutive_failures = state.consecutive_failures,
                    timeout_secs = self.inner.config.circuit_timeout.as_secs(),
                    "circuit breaker opened"
                );
                return true;
            }
        }
        false
    }

    /// Apply a background health probe outcome. Probes flip `is_healthy`
    /// but never touch the circuit or the failure streak.
    pub async fn observe_probe(&self, provider: &str, ok: bool, detail: Option<String>) {
        let Some(state) = self.state(provider) else {
            return;
        };
        let mut state = state.lock().await;
        state.is_healthy = ok;
        state.last_check_ms = now_unix_ms();
        if !ok {
            state.last_error = detail;
        }
    }

    /// Snapshot one provider's state.
    pub async fn snapshot(&self, provider: &str) -> Option<ProviderHealthSnapshot> {
        let state = self.state(provider)?;
        let state = state.lock().await;
        let now = Instant::now();
        let remaining = |until: Option<Instant>| {
            until.and_then(|until| {
                until.checked_duration_since(now).map(|left| left.as_millis() as u64)
            })
        };
        Some(ProviderHealthSnapshot {
            is_healthy: state.is_healthy,
            consecutive_failures: state.consecutive_failures,
            last_check_ms: state.last_check_ms,
            last_error: state.last_error.clone(),
            circuit_open_remaining_ms: remaining(state.circuit_open_until),
            rate_limited_remaining_ms: remaining(state.rate_limited_until),
            latency_avg_ms: latency_avg_ms(&state.latency_samples),
            latency_p95_ms: latency_p95_ms(&state.latency_samples),
            total_requests: state.total_requests,
        })
    }
}

fn latency_avg_ms(samples: &VecDeque<f64>) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let sum: f64 = samples.iter().sum();
    Some(sum / samples.len() as f64 * 1000.0)
}

fn latency_p95_ms(samples: &VecDeque<f64>) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted: Vec<f64> = samples.iter().copied().collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let index = ((sorted.len() as f64 * 0.95) as usize)
        .saturating_sub(1)
        .min(sorted.len() - 1);
    sorted.get(index).map(|value| value * 1000.0)
}

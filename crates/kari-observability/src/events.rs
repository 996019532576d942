//! Centralized observability event names, one enum per subsystem.
//!
//! Log lines reference these via `event = MemoryEvent::X.as_str()` so the
//! catalog stays greppable and tests can assert uniqueness.

/// Memory subsystem event identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryEvent {
    /// An adapter was registered at startup
    AdapterRegistered,
    /// An adapter was missing at startup; functionality degrades
    AdapterMissing,
    /// An adapter connection was released at shutdown
    AdapterClosed,
    /// A recall ladder tier produced results
    RecallTierServed,
    /// A recall ladder tier failed and was skipped
    RecallTierFailed,
    /// Every tier came back empty or failing
    RecallMiss,
    /// A recall was served solely from the read-only analytics tier
    RecallStaleAnalytics,
    /// A write was accepted by at least one adapter
    WriteAccepted,
    /// One adapter rejected a write during fan-out
    WriteAdapterFailed,
    /// Every adapter rejected the write
    WriteAllAdaptersFailed,
    /// A write was buffered because the authoritative store was down
    WriteBuffered,
    /// Buffering skipped because the cache backend is unavailable
    BufferDisabled,
    /// Reconciler observed the authoritative store recovering
    ReconcilerRecovered,
    /// Reconciler replayed one buffered write
    ReconcilerReplayed,
    /// Reconciler stopped draining this tick after a replay failure
    ReconcilerReplayFailed,
    /// Reconciler hit the per-tick drain budget and yielded
    ReconcilerBudgetYield,
    /// Reconciler shut down
    ReconcilerStopped,
    /// Enrichment backend was skipped (unhealthy or absent)
    EnrichmentBackendSkipped,
}

impl MemoryEvent {
    /// Every memory event, for catalog tests.
    pub const ALL: &'static [MemoryEvent] = &[
        Self::AdapterRegistered,
        Self::AdapterMissing,
        Self::AdapterClosed,
        Self::RecallTierServed,
        Self::RecallTierFailed,
        Self::RecallMiss,
        Self::RecallStaleAnalytics,
        Self::WriteAccepted,
        Self::WriteAdapterFailed,
        Self::WriteAllAdaptersFailed,
        Self::WriteBuffered,
        Self::BufferDisabled,
        Self::ReconcilerRecovered,
        Self::ReconcilerReplayed,
        Self::ReconcilerReplayFailed,
        Self::ReconcilerBudgetYield,
        Self::ReconcilerStopped,
        Self::EnrichmentBackendSkipped,
    ];

    /// Dotted event identifier.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AdapterRegistered => "memory.adapter.registered",
            Self::AdapterMissing => "memory.adapter.missing",
            Self::AdapterClosed => "memory.adapter.closed",
            Self::RecallTierServed => "memory.recall.tier_served",
            Self::RecallTierFailed => "memory.recall.tier_failed",
            Self::RecallMiss => "memory.recall.miss",
            Self::RecallStaleAnalytics => "memory.recall.stale_analytics",
            Self::WriteAccepted => "memory.write.accepted",
            Self::WriteAdapterFailed => "memory.write.adapter_failed",
            Self::WriteAllAdaptersFailed => "memory.write.all_adapters_failed",
            Self::WriteBuffered => "memory.write.buffered",
            Self::BufferDisabled => "memory.write.buffer_disabled",
            Self::ReconcilerRecovered => "memory.reconciler.recovered",
            Self::ReconcilerReplayed => "memory.reconciler.replayed",
            Self::ReconcilerReplayFailed => "memory.reconciler.replay_failed",
            Self::ReconcilerBudgetYield => "memory.reconciler.budget_yield",
            Self::ReconcilerStopped => "memory.reconciler.stopped",
            Self::EnrichmentBackendSkipped => "memory.enrichment.backend_skipped",
        }
    }
}

/// Router subsystem event identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterEvent {
    /// A provider was selected for dispatch
    ProviderSelected,
    /// A preferred provider/model hint was dropped
    PreferredHintDropped,
    /// No suitable provider was found at selection time
    NoSuitableProvider,
    /// One provider attempt failed
    AttemptFailed,
    /// One provider attempt succeeded
    AttemptSucceeded,
    /// Retrying the same provider after backoff
    AttemptRetrying,
    /// Rate-limit window exhausted; waiting for the boundary
    RateLimitWait,
    /// A provider entered rate-limited cooldown
    RateLimited,
    /// A provider circuit opened after a failure streak
    CircuitOpened,
    /// A provider circuit closed after cooldown
    CircuitClosed,
    /// Falling back to the next provider in the chain
    FallbackAttempt,
    /// The whole chain failed; degraded mode engaged
    DegradedActivated,
    /// Background health monitor started
    HealthMonitorStarted,
    /// Background health monitor stopped
    HealthMonitorStopped,
    /// A health refresh pass completed
    HealthRefreshed,
    /// Registry registered a component
    RegistryRegistered,
    /// Registry dropped a component
    RegistryUnregistered,
}

impl RouterEvent {
    /// Every router event, for catalog tests.
    pub const ALL: &'static [RouterEvent] = &[
        Self::ProviderSelected,
        Self::PreferredHintDropped,
        Self::NoSuitableProvider,
        Self::AttemptFailed,
        Self::AttemptSucceeded,
        Self::AttemptRetrying,
        Self::RateLimitWait,
        Self::RateLimited,
        Self::CircuitOpened,
        Self::CircuitClosed,
        Self::FallbackAttempt,
        Self::DegradedActivated,
        Self::HealthMonitorStarted,
        Self::HealthMonitorStopped,
        Self::HealthRefreshed,
        Self::RegistryRegistered,
        Self::RegistryUnregistered,
    ];

    /// Dotted event identifier.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProviderSelected => "router.select.provider_selected",
            Self::PreferredHintDropped => "router.select.preferred_hint_dropped",
            Self::NoSuitableProvider => "router.select.no_suitable_provider",
            Self::AttemptFailed => "router.dispatch.attempt_failed",
            Self::AttemptSucceeded => "router.dispatch.attempt_succeeded",
            Self::AttemptRetrying => "router.dispatch.attempt_retrying",
            Self::RateLimitWait => "router.rate_limit.window_wait",
            Self::RateLimited => "router.rate_limit.cooldown_set",
            Self::CircuitOpened => "router.circuit.opened",
            Self::CircuitClosed => "router.circuit.closed",
            Self::FallbackAttempt => "router.fallback.attempt",
            Self::DegradedActivated => "router.degraded.activated",
            Self::HealthMonitorStarted => "router.health.monitor_started",
            Self::HealthMonitorStopped => "router.health.monitor_stopped",
            Self::HealthRefreshed => "router.health.refreshed",
            Self::RegistryRegistered => "router.registry.registered",
            Self::RegistryUnregistered => "router.registry.unregistered",
        }
    }
}

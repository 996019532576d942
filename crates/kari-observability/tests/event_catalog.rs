#![allow(missing_docs)]

use std::collections::HashSet;

use kari_observability::{MemoryEvent, RouterEvent};

#[test]
fn event_ids_are_non_empty_and_unique() {
    let mut seen = HashSet::new();
    for event in MemoryEvent::ALL {
        let id = event.as_str();
        assert!(!id.is_empty());
        assert!(seen.insert(id), "duplicate observability event id detected: {id}");
    }
    for event in RouterEvent::ALL {
        let id = event.as_str();
        assert!(!id.is_empty());
        assert!(seen.insert(id), "duplicate observability event id detected: {id}");
    }
}

#[test]
fn event_ids_follow_namespace_convention() {
    for event in MemoryEvent::ALL {
        assert!(
            event.as_str().starts_with("memory."),
            "unexpected event namespace: {}",
            event.as_str()
        );
    }
    for event in RouterEvent::ALL {
        assert!(
            event.as_str().starts_with("router."),
            "unexpected event namespace: {}",
            event.as_str()
        );
    }
}

#[test]
fn degraded_and_circuit_events_are_registered() {
    let ids: HashSet<&str> = RouterEvent::ALL.iter().copied().map(RouterEvent::as_str).collect();
    for expected in [
        "router.circuit.opened",
        "router.circuit.closed",
        "router.rate_limit.cooldown_set",
        "router.degraded.activated",
        "router.fallback.attempt",
    ] {
        assert!(ids.contains(expected), "missing expected router event: {expected}");
    }
}

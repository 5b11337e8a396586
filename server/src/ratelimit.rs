//! Attempt Counters
//!
//! Advisory in-memory rate limiting for the abuse-prone endpoints (recovery
//! code issuance and verification, webhook floods). The store is explicitly
//! injected, rebuildable, and not relied on for correctness: losing it on a
//! restart only resets the counters. Correctness limits (per-code attempt
//! caps) live on the persisted entities themselves.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

/// One counter window.
#[derive(Debug, Clone)]
pub struct AttemptWindow {
    pub count: u32,
    pub reset_at: DateTime<Utc>,
}

/// Outcome of recording an attempt.
#[derive(Debug, Clone)]
pub struct AttemptDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

/// Injected `(key) -> {count, reset_at}` counter store.
#[derive(Default)]
pub struct AttemptStore {
    windows: DashMap<String, AttemptWindow>,
}

impl AttemptStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one attempt against `key`, allowing up to `limit` attempts per
    /// `window_secs` rolling window.
    pub fn hit(&self, key: &str, limit: u32, window_secs: i64) -> AttemptDecision {
        let now = Utc::now();
        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| AttemptWindow {
                count: 0,
                reset_at: now + Duration::seconds(window_secs),
            });

        if entry.reset_at <= now {
            entry.count = 0;
            entry.reset_at = now + Duration::seconds(window_secs);
        }
        entry.count += 1;

        AttemptDecision {
            allowed: entry.count <= limit,
            remaining: limit.saturating_sub(entry.count),
            reset_at: entry.reset_at,
        }
    }

    /// Current window for a key, if one is live.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<AttemptWindow> {
        self.windows.get(key).map(|w| w.clone())
    }

    /// Drop expired windows. Storage hygiene only; `hit` resets expired
    /// windows on its own.
    pub fn cleanup(&self) {
        let now = Utc::now();
        self.windows.retain(|_, window| window.reset_at > now);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_enforced_within_window() {
        let store = AttemptStore::new();
        for i in 1..=3 {
            let decision = store.hit("ip:203.0.113.9", 3, 60);
            assert!(decision.allowed, "attempt {i} should be allowed");
        }
        let decision = store.hit("ip:203.0.113.9", 3, 60);
        assert!(!decision.allowed);
        assert_eq!(decision.remaining, 0);
    }

    #[test]
    fn keys_are_independent() {
        let store = AttemptStore::new();
        store.hit("a", 1, 60);
        let decision = store.hit("b", 1, 60);
        assert!(decision.allowed);
    }

    #[test]
    fn cleanup_drops_only_expired_windows() {
        let store = AttemptStore::new();
        store.hit("live", 5, 3600);
        store.hit("dead", 5, -1);
        store.cleanup();
        assert!(store.get("live").is_some());
        assert!(store.get("dead").is_none());
    }
}

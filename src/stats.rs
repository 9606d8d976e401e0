//! Per-model request counters backing `GET /stats`.
//!
//! Every dispatch attempt increments a counter keyed by model id. Unlike the
//! ring-buffer traffic log this replaces, there's no eviction or bounded
//! capacity to reason about — just a handful of atomics per model, cheap
//! enough to keep forever for the process lifetime.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde::Serialize;

#[derive(Default)]
struct Counters {
    attempts: AtomicU64,
    successes: AtomicU64,
    fallbacks_engaged: AtomicU64,
    wrapped_payment_failures: AtomicU64,
}

#[derive(Debug, Serialize)]
pub struct ModelStats {
    pub attempts: u64,
    pub successes: u64,
    pub fallbacks_engaged: u64,
    pub wrapped_payment_failures: u64,
}

pub struct StatsRegistry {
    by_model: DashMap<String, Counters>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self { by_model: DashMap::new() }
    }

    /// Record one dispatch attempt against `model_id`. `is_fallback` is true
    /// for every attempt after the first in a request's candidate chain.
    pub fn record_attempt(&self, model_id: &str, is_fallback: bool) {
        let counters = self.by_model.entry(model_id.to_string()).or_default();
        counters.attempts.fetch_add(1, Ordering::Relaxed);
        if is_fallback {
            counters.fallbacks_engaged.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_success(&self, model_id: &str) {
        let counters = self.by_model.entry(model_id.to_string()).or_default();
        counters.successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_wrapped_payment_failure(&self, model_id: &str) {
        let counters = self.by_model.entry(model_id.to_string()).or_default();
        counters.wrapped_payment_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot all counters as a plain map, suitable for JSON serialization.
    pub fn snapshot(&self) -> std::collections::HashMap<String, ModelStats> {
        self.by_model
            .iter()
            .map(|entry| {
                let c = entry.value();
                (
                    entry.key().clone(),
                    ModelStats {
                        attempts: c.attempts.load(Ordering::Relaxed),
                        successes: c.successes.load(Ordering::Relaxed),
                        fallbacks_engaged: c.fallbacks_engaged.load(Ordering::Relaxed),
                        wrapped_payment_failures: c.wrapped_payment_failures.load(Ordering::Relaxed),
                    },
                )
            })
            .collect()
    }
}

impl Default for StatsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_and_success_are_tracked_per_model() {
        let stats = StatsRegistry::new();
        stats.record_attempt("a/x", false);
        stats.record_attempt("b/y", true);
        stats.record_success("a/x");

        let snapshot = stats.snapshot();
        assert_eq!(snapshot["a/x"].attempts, 1);
        assert_eq!(snapshot["a/x"].successes, 1);
        assert_eq!(snapshot["b/y"].attempts, 1);
        assert_eq!(snapshot["b/y"].fallbacks_engaged, 1);
        assert_eq!(snapshot["b/y"].successes, 0);
    }

    #[test]
    fn wrapped_payment_failures_increment_independently() {
        let stats = StatsRegistry::new();
        stats.record_attempt("a/x", false);
        stats.record_wrapped_payment_failure("a/x");
        let snapshot = stats.snapshot();
        assert_eq!(snapshot["a/x"].wrapped_payment_failures, 1);
    }
}

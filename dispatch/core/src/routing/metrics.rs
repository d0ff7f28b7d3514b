//! Router Metrics
//!
//! Per-backend and router-wide counters:
//! - Successes and errors per backend, with the last error message
//! - Retries, fallbacks and interruptions
//! - Cumulative latency of successful calls

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

// ============================================================================
// Counter
// ============================================================================

/// A simple atomic counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Counter starting at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Add `n`
    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Per-Backend Metrics
// ============================================================================

/// Counters for one backend
#[derive(Debug, Default)]
pub struct BackendMetrics {
    successes: Counter,
    errors: Counter,
    total_latency_ms: Counter,
    last_error: RwLock<Option<String>>,
}

impl BackendMetrics {
    /// Record a successful call
    pub fn record_success(&self, latency: Duration) {
        self.successes.inc();
        self.total_latency_ms.add(latency.as_millis() as u64);
    }

    /// Record a failed call
    pub fn record_error(&self, message: impl Into<String>) {
        self.errors.inc();
        *self.last_error.write() = Some(message.into());
    }

    /// Point-in-time copy
    pub fn snapshot(&self) -> BackendStats {
        let successes = self.successes.get();
        BackendStats {
            successes,
            errors: self.errors.get(),
            avg_latency_ms: if successes == 0 {
                0.0
            } else {
                self.total_latency_ms.get() as f64 / successes as f64
            },
            last_error: self.last_error.read().clone(),
        }
    }
}

/// Snapshot of one backend's counters
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendStats {
    /// Successful calls
    pub successes: u64,
    /// Failed calls (each attempt counts)
    pub errors: u64,
    /// Mean latency of successful calls
    pub avg_latency_ms: f64,
    /// Most recent error message
    pub last_error: Option<String>,
}

// ============================================================================
// Router Metrics
// ============================================================================

/// Router-wide counters
#[derive(Debug, Default)]
pub struct RouterMetrics {
    /// Calls to `complete`
    pub requests: Counter,
    /// Calls that returned a result
    pub successes: Counter,
    /// Calls that exhausted every backend
    pub failures: Counter,
    /// Retries on the same backend
    pub retries: Counter,
    /// Successes served by a fallback backend
    pub fallbacks: Counter,
    /// Calls stopped by the caller's context
    pub interrupted: Counter,
    backends: DashMap<String, Arc<BackendMetrics>>,
}

impl RouterMetrics {
    /// Empty metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters for `backend`, created on first use
    pub fn backend(&self, backend: &str) -> Arc<BackendMetrics> {
        if let Some(existing) = self.backends.get(backend) {
            return Arc::clone(&existing);
        }
        Arc::clone(
            &self
                .backends
                .entry(backend.to_string())
                .or_insert_with(|| Arc::new(BackendMetrics::default())),
        )
    }

    /// Point-in-time copy
    pub fn snapshot(&self) -> RouterStats {
        RouterStats {
            requests: self.requests.get(),
            successes: self.successes.get(),
            failures: self.failures.get(),
            retries: self.retries.get(),
            fallbacks: self.fallbacks.get(),
            interrupted: self.interrupted.get(),
            backends: self
                .backends
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().snapshot()))
                .collect(),
        }
    }
}

/// Snapshot of router counters
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterStats {
    /// Calls to `complete`
    pub requests: u64,
    /// Calls that returned a result
    pub successes: u64,
    /// Calls that exhausted every backend
    pub failures: u64,
    /// Retries on the same backend
    pub retries: u64,
    /// Successes served by a fallback backend
    pub fallbacks: u64,
    /// Calls stopped by the caller's context
    pub interrupted: u64,
    /// Per-backend counters keyed by backend name
    pub backends: BTreeMap<String, BackendStats>,
}

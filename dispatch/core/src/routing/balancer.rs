//! Weighted Smooth Round-Robin Balancer
//!
//! Interleaved weighted round-robin over a fixed set of backends. A backend
//! with weight 3 is picked three times as often as one with weight 1, and the
//! picks are spread out rather than bunched: for weights 3:2:1 the cycle is
//! `A A B A B C`.
//!
//! The pool is fixed at construction. Selection state lives behind a single
//! mutex and each `next()` holds it for a bounded scan of at most
//! `n * max_weight / gcd` steps.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::{normalize_weight, Backend};

/// A backend and its static weight
#[derive(Clone)]
pub struct WeightedEntry {
    /// Backend handle
    pub backend: Arc<dyn Backend>,
    /// Normalized weight (always >= 1)
    pub weight: u64,
}

impl WeightedEntry {
    /// Wrap a backend, normalizing non-positive weights to 1
    pub fn new(backend: Arc<dyn Backend>, weight: i64) -> Self {
        Self {
            backend,
            weight: normalize_weight(weight),
        }
    }

    /// Wrap a backend using the weight from its descriptor
    pub fn from_backend(backend: Arc<dyn Backend>) -> Self {
        let weight = backend.descriptor().weight;
        Self::new(backend, weight)
    }
}

#[derive(Debug)]
struct BalancerState {
    current_weight: u64,
    last_index: usize,
}

/// Selects one backend per call by weighted smooth round-robin
pub struct Balancer {
    entries: Vec<WeightedEntry>,
    max_weight: u64,
    gcd: u64,
    state: Mutex<BalancerState>,
}

impl Balancer {
    /// Build a balancer over `entries` in the given order
    pub fn new(entries: Vec<WeightedEntry>) -> Self {
        let max_weight = entries.iter().map(|e| e.weight).max().unwrap_or(0);
        let gcd = entries.iter().map(|e| e.weight).fold(0, gcd);
        let last_index = entries.len().saturating_sub(1);
        Self {
            entries,
            max_weight,
            gcd,
            state: Mutex::new(BalancerState {
                current_weight: 0,
                last_index,
            }),
        }
    }

    /// Build from backends, taking weights from their descriptors
    pub fn from_backends(backends: impl IntoIterator<Item = Arc<dyn Backend>>) -> Self {
        Self::new(backends.into_iter().map(WeightedEntry::from_backend).collect())
    }

    /// Next backend in the weighted cycle; `None` only for an empty pool
    pub fn next(&self) -> Option<Arc<dyn Backend>> {
        match self.entries.len() {
            0 => None,
            1 => Some(Arc::clone(&self.entries[0].backend)),
            n => {
                let mut state = self.state.lock();
                loop {
                    state.last_index = (state.last_index + 1) % n;
                    if state.last_index == 0 {
                        state.current_weight = state.current_weight.saturating_sub(self.gcd);
                        if state.current_weight == 0 {
                            state.current_weight = self.max_weight;
                        }
                    }
                    let entry = &self.entries[state.last_index];
                    if entry.weight >= state.current_weight {
                        return Some(Arc::clone(&entry.backend));
                    }
                }
            }
        }
    }

    /// Look up a backend by name
    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn Backend>> {
        self.entries
            .iter()
            .find(|e| e.backend.name() == name)
            .map(|e| Arc::clone(&e.backend))
    }

    /// Every backend in construction order
    pub fn all(&self) -> Vec<Arc<dyn Backend>> {
        self.entries.iter().map(|e| Arc::clone(&e.backend)).collect()
    }

    /// Names and weights in construction order
    pub fn weights(&self) -> Vec<(String, u64)> {
        self.entries
            .iter()
            .map(|e| (e.backend.name().to_string(), e.weight))
            .collect()
    }

    /// Number of backends
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the pool is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn gcd(a: u64, b: u64) -> u64 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

//! Admission Control
//!
//! Token bucket shared by every caller of a router. Each outbound call costs
//! one token; tokens refill continuously at a fixed rate up to a burst
//! capacity. When the bucket is short, callers are delayed rather than
//! rejected.
//!
//! # Design
//!
//! - The bucket lock is held only to refill and reserve, never across a sleep
//! - A caller that finds the bucket short reserves its tokens anyway (the
//!   count goes negative) and sleeps exactly its own deficit, so concurrent
//!   callers queue fairly without waking each other
//! - An interrupted wait hands its reservation back
//!
//! # Usage
//!
//! ```
//! use dispatch_core::routing::{AdmissionConfig, AdmissionController};
//!
//! let limiter = AdmissionController::new(
//!     AdmissionConfig::new().with_capacity(5.0).with_refill_rate(1.0),
//! );
//! assert!(limiter.try_acquire(1.0));
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::context::{CallContext, Interrupt};

// =============================================================================
// Configuration
// =============================================================================

/// Token bucket parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Maximum tokens that can accumulate (burst size)
    pub capacity: f64,

    /// Tokens added per second
    pub refill_rate: f64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            capacity: 5.0,
            refill_rate: 1.0,
        }
    }
}

impl AdmissionConfig {
    /// Create a configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the burst capacity
    #[must_use]
    pub fn with_capacity(mut self, capacity: f64) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the refill rate in tokens per second
    #[must_use]
    pub fn with_refill_rate(mut self, rate: f64) -> Self {
        self.refill_rate = rate;
        self
    }

    /// Replace non-finite or non-positive values with the defaults
    #[must_use]
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        let usable = |v: f64| v.is_finite() && v > 0.0;

        let capacity = if usable(self.capacity) {
            self.capacity
        } else {
            tracing::warn!(capacity = self.capacity, "invalid admission capacity, using default");
            defaults.capacity
        };
        let refill_rate = if usable(self.refill_rate) {
            self.refill_rate
        } else {
            tracing::warn!(
                refill_rate = self.refill_rate,
                "invalid admission refill rate, using default"
            );
            defaults.refill_rate
        };
        Self {
            capacity,
            refill_rate,
        }
    }
}

// =============================================================================
// Token Bucket
// =============================================================================

#[derive(Debug)]
struct TokenBucketState {
    /// May be negative while callers are waiting on reservations
    tokens: f64,
    last_refill: Instant,
}

/// Snapshot of admission activity
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AdmissionStats {
    /// Calls admitted
    pub admitted: u64,
    /// Calls that had to wait
    pub throttled: u64,
    /// Total time spent waiting, in milliseconds
    pub total_wait_ms: u64,
    /// Waits abandoned because the context fired
    pub interrupted: u64,
}

/// Rate limiter gating outbound backend calls
#[derive(Debug)]
pub struct AdmissionController {
    config: AdmissionConfig,
    state: Mutex<TokenBucketState>,
    admitted: AtomicU64,
    throttled: AtomicU64,
    total_wait_ms: AtomicU64,
    interrupted: AtomicU64,
}

impl AdmissionController {
    /// Create a full bucket. Unusable rates fall back to the defaults
    pub fn new(config: AdmissionConfig) -> Self {
        let config = config.sanitized();
        Self {
            state: Mutex::new(TokenBucketState {
                tokens: config.capacity,
                last_refill: Instant::now(),
            }),
            config,
            admitted: AtomicU64::new(0),
            throttled: AtomicU64::new(0),
            total_wait_ms: AtomicU64::new(0),
            interrupted: AtomicU64::new(0),
        }
    }

    /// Shorthand for `new(AdmissionConfig { capacity, refill_rate })`
    pub fn with_rate(capacity: f64, refill_rate: f64) -> Self {
        Self::new(AdmissionConfig {
            capacity,
            refill_rate,
        })
    }

    /// The active configuration
    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    fn refill(&self, state: &mut TokenBucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.config.refill_rate).min(self.config.capacity);
        state.last_refill = now;
    }

    /// Debit `cost` tokens and return how long the caller must wait for them
    fn reserve(&self, cost: f64) -> Duration {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens -= cost;
        if state.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-state.tokens / self.config.refill_rate)
        }
    }

    fn refund(&self, cost: f64) {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens = (state.tokens + cost).min(self.config.capacity);
    }

    fn record(&self, waited: Duration) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
        if !waited.is_zero() {
            self.throttled.fetch_add(1, Ordering::Relaxed);
            self.total_wait_ms
                .fetch_add(waited.as_millis() as u64, Ordering::Relaxed);
        }
    }

    /// Wait until `cost` tokens are available and take them
    pub async fn wait(&self, cost: f64) {
        let deficit = self.reserve(cost);
        if !deficit.is_zero() {
            tracing::debug!(wait_ms = deficit.as_millis() as u64, "admission throttled");
            tokio::time::sleep(deficit).await;
        }
        self.record(deficit);
    }

    /// Like [`wait`](Self::wait) but gives up when `ctx` fires, returning
    /// the reserved tokens
    pub async fn wait_with(&self, ctx: &CallContext, cost: f64) -> Result<(), Interrupt> {
        ctx.check()?;
        let deficit = self.reserve(cost);
        if !deficit.is_zero() {
            tracing::debug!(wait_ms = deficit.as_millis() as u64, "admission throttled");
            if let Err(interrupt) = ctx.sleep(deficit).await {
                self.refund(cost);
                self.interrupted.fetch_add(1, Ordering::Relaxed);
                return Err(interrupt);
            }
        }
        self.record(deficit);
        Ok(())
    }

    /// Take `cost` tokens only if they are available right now
    pub fn try_acquire(&self, cost: f64) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= cost {
            state.tokens -= cost;
            drop(state);
            self.record(Duration::ZERO);
            true
        } else {
            false
        }
    }

    /// Tokens currently available (negative while reservations are pending)
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens
    }

    /// Activity counters
    pub fn stats(&self) -> AdmissionStats {
        AdmissionStats {
            admitted: self.admitted.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            total_wait_ms: self.total_wait_ms.load(Ordering::Relaxed),
            interrupted: self.interrupted.load(Ordering::Relaxed),
        }
    }
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new(AdmissionConfig::default())
    }
}

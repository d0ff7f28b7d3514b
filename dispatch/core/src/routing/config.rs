//! Routing Configuration
//!
//! Retry policy and router-wide settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::admission::AdmissionConfig;

// ============================================================================
// Retry Configuration
// ============================================================================

/// Retry configuration for a single router call
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Extra attempts on the same backend after the first one
    pub max_retries: u32,

    /// Delay before the first retry
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay
    pub max_backoff_ms: u64,

    /// Backoff multiplier
    pub backoff_multiplier: f32,

    /// Add up to 25% jitter to backoff
    pub use_jitter: bool,

    /// Whether to try the remaining backends once the selected one gives up
    pub fallback_on_failure: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 10_000,
            backoff_multiplier: 2.0,
            use_jitter: false,
            fallback_on_failure: true,
        }
    }
}

impl RetryConfig {
    /// Total attempts on the selected backend
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Backoff before retry N (1-indexed): `initial * multiplier^(N-1)`
    #[must_use]
    pub fn backoff_for_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.initial_backoff_ms as f64 * f64::from(self.backoff_multiplier).powi(exponent);
        let capped = base.min(self.max_backoff_ms as f64);

        let duration_ms = if self.use_jitter {
            let jitter = rand::random::<f64>() * 0.25;
            (capped * (1.0 + jitter)) as u64
        } else {
            capped as u64
        };

        Duration::from_millis(duration_ms)
    }

    /// Fast settings for tests: millisecond backoff, no jitter
    #[must_use]
    pub fn fast() -> Self {
        Self {
            initial_backoff_ms: 1,
            max_backoff_ms: 10,
            ..Self::default()
        }
    }
}

// ============================================================================
// Router Configuration
// ============================================================================

/// Router-wide settings
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Retry and fallback policy
    pub retry: RetryConfig,

    /// Outbound rate limit
    pub admission: AdmissionConfig,
}

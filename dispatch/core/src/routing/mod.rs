//! Completion Routing
//!
//! Rate-limited, weighted routing of completion requests across backends,
//! with bounded retry and fallback.
//!
//! # Architecture
//!
//! ```text
//! +---------------------+
//! |       Router        |  <-- Entry point for all completions
//! +----------+----------+
//!            |
//!            v
//! +---------------------+
//! | AdmissionController |  <-- Token bucket shared by all callers
//! +----------+----------+
//!            |
//!            v
//! +---------------------+
//! |  override / Balancer|  <-- Pinned backend or weighted round-robin
//! +----------+----------+
//!            |
//!     +------+------+
//!     |      |      |
//!     v      v      v
//! +------+ +------+ +------+
//! |OpenAI| |Gemini| | ...  |  <-- Backends, retried then failed over
//! +------+ +------+ +------+
//! ```
//!
//! # Design Principles
//!
//! 1. **Weighted Fairness**: traffic splits by configured weight without bursts
//! 2. **Bounded Outbound Rate**: one token per call, shared across agents
//! 3. **Graceful Degradation**: retry, then every other backend once
//! 4. **Prompt Cancellation**: the caller's context is checked at every wait

pub mod admission;
pub mod balancer;
pub mod config;
pub mod metrics;
pub mod router;

pub use admission::{AdmissionConfig, AdmissionController, AdmissionStats};
pub use balancer::{Balancer, WeightedEntry};
pub use config::{RetryConfig, RouterConfig};
pub use metrics::{BackendStats, RouterStats};
pub use router::{BackendFailure, HealthReport, Router, RouterError, HEALTH_CHECK_TIMEOUT};

//! Dispatch Core - Completion Dispatch for Agent Simulations
//!
//! This crate sits between a simulation that needs decisions for many agents
//! and a pool of hosted LLM providers. It spreads traffic across providers by
//! weight, holds the outbound request rate under a budget, retries and fails
//! over when providers misbehave, and avoids calls altogether when an agent's
//! situation has not meaningfully changed.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                          Simulation                               │
//! │        Observation[] ──────────────┐        CompletionRequest     │
//! └────────────────────────────────────┼──────────────────┬───────────┘
//!                                      │                  │
//! ┌────────────────────────────────────┼──────────────────┼───────────┐
//! │                     DISPATCH CORE  ▼                  │           │
//! │  ┌──────────────────────────────────────────────┐     │           │
//! │  │ BatchAggregator                               │     │           │
//! │  │  FingerprintPolicy ─► DecisionCache (TTL)     │     │           │
//! │  │  PromptBuilder ─► parse_reply                 │     │           │
//! │  └──────────────────────┬───────────────────────┘     │           │
//! │                         ▼                              ▼           │
//! │  ┌───────────────────────────────────────────────────────────┐    │
//! │  │ Router: AdmissionController ─► override / Balancer         │    │
//! │  │         ─► retry with backoff ─► fallback                  │    │
//! │  └──────────────────────┬────────────────────────────────────┘    │
//! │                         ▼                                          │
//! │  ┌──────────────┐  ┌──────────────┐        DiagnosticsSink         │
//! │  │ OpenAiBackend │  │ GeminiBackend│        (memory, jsonl)        │
//! │  └──────────────┘  └──────────────┘                                │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use dispatch_core::{load_config, CallContext, DispatchService, Observation};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config()?;
//!     let service = DispatchService::from_config(&config)?;
//!
//!     let ctx = CallContext::new();
//!     let batch = vec![Observation::new("npc-1", "Ada", (120.0, 80.0))];
//!     let result = service.resolve(&ctx, &batch).await?;
//!     println!("{}", result.decisions[0].action);
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: Provider abstraction with OpenAI-compatible and Gemini variants
//! - [`config`]: TOML configuration with environment overrides
//! - [`context`]: Cancellation and deadlines shared by every blocking call
//! - [`decision`]: Observations, fingerprints, the decision cache and batching
//! - [`diagnostics`]: Per-call and per-batch traces
//! - [`routing`]: Weighted balancing, admission control and the router
//! - [`service`]: Wiring a configuration into a running stack

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod context;
pub mod decision;
pub mod diagnostics;
pub mod routing;
pub mod service;

// Backend exports
pub use backend::{
    create_backend, Backend, BackendDescriptor, BackendError, CompletionRequest,
    CompletionResult, GeminiBackend, OpenAiBackend, Protocol,
};

// Context exports
pub use context::{CallContext, Interrupt};

// Decision exports
pub use decision::{
    BatchAggregator, BatchConfig, BatchError, BatchResult, BatchStats, Decision, DecisionCache,
    FingerprintPolicy, Observation, PointOfInterest, VisiblePeer,
};

// Diagnostics exports
pub use diagnostics::{
    BatchTrace, CallTrace, DiagnosticsSink, JsonlSink, MemorySink, MultiSink, NullSink,
};

// Routing exports
pub use routing::{
    AdmissionConfig, AdmissionController, Balancer, HealthReport, RetryConfig, Router,
    RouterConfig, RouterError, RouterStats, WeightedEntry,
};

// Service exports
pub use service::{DispatchService, ServiceError, ServiceStats, SkippedBackend};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, ConfigError, ConfigSource,
    DispatchConfig, DispatchToml,
};

//! Completion Router
//!
//! The single entry point for outbound completions. A call goes through:
//!
//! 1. **Admission**: one token from the shared bucket
//! 2. **Selection**: the agent's pinned backend, else the balancer's pick
//! 3. **Retry**: retryable errors back off exponentially and try the same
//!    backend again, up to `max_retries` times
//! 4. **Fallback**: every other backend, in balancer order, gets one attempt
//!
//! The caller's [`CallContext`] is honoured at every step. Once it fires the
//! call returns [`RouterError::Interrupted`] without trying anything else.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::admission::AdmissionController;
use super::balancer::Balancer;
use super::config::{RetryConfig, RouterConfig};
use super::metrics::{RouterMetrics, RouterStats};
use crate::backend::{Backend, BackendError, CompletionRequest, CompletionResult};
use crate::context::{CallContext, Interrupt};
use crate::diagnostics::{CallTrace, DiagnosticsSink, NullSink};

/// Upper bound on a single health check
pub const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Errors
// ============================================================================

/// One failed attempt, kept for the exhaustion report
#[derive(Debug, Clone)]
pub struct BackendFailure {
    /// Backend that failed
    pub backend: String,
    /// What went wrong
    pub error: BackendError,
}

/// Router errors
#[derive(Debug, Error)]
pub enum RouterError {
    /// The balancer has no backends
    #[error("no backends configured")]
    NoBackends,

    /// An override named a backend that does not exist
    #[error("unknown backend: {0}")]
    UnknownBackend(String),

    /// Every attempt on every backend failed
    #[error("all backends failed after {attempts} attempts{}", last_failure(.failures))]
    Exhausted {
        /// Attempts made across all backends
        attempts: u32,
        /// Failures in the order they happened
        failures: Vec<BackendFailure>,
    },

    /// The caller's context fired
    #[error("interrupted: {0}")]
    Interrupted(#[from] Interrupt),
}

fn last_failure(failures: &[BackendFailure]) -> String {
    failures
        .last()
        .map(|f| format!(" (last: {}: {})", f.backend, f.error))
        .unwrap_or_default()
}

// ============================================================================
// Health Reports
// ============================================================================

/// Result of health-checking one backend
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// Backend name
    pub backend: String,
    /// Model name
    pub model: String,
    /// Whether the check succeeded
    pub healthy: bool,
    /// Check wall time
    pub latency: Duration,
    /// Error message when unhealthy
    pub error: Option<String>,
}

// ============================================================================
// Router
// ============================================================================

/// Rate-limited, retrying, failing-over completion router
pub struct Router {
    balancer: Balancer,
    admission: AdmissionController,
    overrides: DashMap<String, String>,
    retry: RetryConfig,
    metrics: RouterMetrics,
    sink: Arc<dyn DiagnosticsSink>,
}

impl Router {
    /// Create a router over `balancer`
    pub fn new(balancer: Balancer, config: RouterConfig) -> Self {
        Self {
            balancer,
            admission: AdmissionController::new(config.admission),
            overrides: DashMap::new(),
            retry: config.retry,
            metrics: RouterMetrics::new(),
            sink: Arc::new(NullSink),
        }
    }

    /// Report every attempt to `sink`
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Pin `agent_id` to the backend called `backend`
    pub fn set_override(
        &self,
        agent_id: impl Into<String>,
        backend: impl Into<String>,
    ) -> Result<(), RouterError> {
        let backend = backend.into();
        if self.balancer.get_by_name(&backend).is_none() {
            return Err(RouterError::UnknownBackend(backend));
        }
        self.overrides.insert(agent_id.into(), backend);
        Ok(())
    }

    /// Remove an agent's pin, returning the backend it was pinned to
    pub fn clear_override(&self, agent_id: &str) -> Option<String> {
        self.overrides.remove(agent_id).map(|(_, backend)| backend)
    }

    /// Backend an agent is pinned to
    pub fn override_for(&self, agent_id: &str) -> Option<String> {
        self.overrides.get(agent_id).map(|b| b.value().clone())
    }

    /// The balancer
    pub fn balancer(&self) -> &Balancer {
        &self.balancer
    }

    /// The admission controller
    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// The retry policy
    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Names of every backend in balancer order
    pub fn active_backends(&self) -> Vec<String> {
        self.balancer
            .all()
            .iter()
            .map(|b| b.name().to_string())
            .collect()
    }

    /// Counter snapshot
    pub fn stats(&self) -> RouterStats {
        self.metrics.snapshot()
    }

    fn select(&self, request: &CompletionRequest) -> Option<Arc<dyn Backend>> {
        let pinned = request
            .agent_id
            .as_deref()
            .and_then(|agent| self.overrides.get(agent).map(|b| b.value().clone()));

        if let Some(name) = pinned {
            if let Some(backend) = self.balancer.get_by_name(&name) {
                tracing::debug!(backend = %name, "using agent override");
                return Some(backend);
            }
            tracing::warn!(backend = %name, "override names a missing backend, balancing instead");
        }
        self.balancer.next()
    }

    fn interrupted(&self, interrupt: Interrupt) -> RouterError {
        self.metrics.interrupted.inc();
        RouterError::Interrupted(interrupt)
    }

    /// Complete `request` on some backend
    pub async fn complete(
        &self,
        ctx: &CallContext,
        request: &CompletionRequest,
    ) -> Result<CompletionResult, RouterError> {
        self.metrics.requests.inc();

        ctx.check().map_err(|i| self.interrupted(i))?;
        if self.balancer.is_empty() {
            self.metrics.failures.inc();
            return Err(RouterError::NoBackends);
        }

        self.admission
            .wait_with(ctx, 1.0)
            .await
            .map_err(|i| self.interrupted(i))?;

        let primary = self.select(request).ok_or(RouterError::NoBackends)?;
        let mut failures: Vec<BackendFailure> = Vec::new();
        let mut attempts = 0u32;

        for attempt in 1..=self.retry.max_attempts() {
            if attempt > 1 {
                let mut backoff = self.retry.backoff_for_retry(attempt - 1);
                if let Some(BackendError::RateLimited {
                    retry_after: Some(hint),
                }) = failures.last().map(|f| &f.error)
                {
                    backoff = backoff.max(*hint).min(Duration::from_millis(self.retry.max_backoff_ms));
                }
                self.metrics.retries.inc();
                tracing::warn!(
                    backend = %primary.name(),
                    attempt,
                    backoff_ms = backoff.as_millis() as u64,
                    "retrying backend"
                );
                ctx.sleep(backoff).await.map_err(|i| self.interrupted(i))?;
            }

            attempts += 1;
            match self.attempt(ctx, &primary, request, attempt, false).await {
                Ok(result) => {
                    self.metrics.successes.inc();
                    return Ok(result);
                }
                Err(BackendError::Interrupted(i)) => return Err(self.interrupted(i)),
                Err(error) => {
                    let retryable = error.is_retryable();
                    failures.push(BackendFailure {
                        backend: primary.name().to_string(),
                        error,
                    });
                    if !retryable {
                        break;
                    }
                }
            }
        }

        if self.retry.fallback_on_failure {
            for backend in self.balancer.all() {
                if backend.name() == primary.name() {
                    continue;
                }
                ctx.check().map_err(|i| self.interrupted(i))?;

                attempts += 1;
                match self.attempt(ctx, &backend, request, 1, true).await {
                    Ok(result) => {
                        tracing::info!(
                            from = %primary.name(),
                            to = %backend.name(),
                            "fallback succeeded"
                        );
                        self.metrics.fallbacks.inc();
                        self.metrics.successes.inc();
                        return Ok(result);
                    }
                    Err(BackendError::Interrupted(i)) => return Err(self.interrupted(i)),
                    Err(error) => failures.push(BackendFailure {
                        backend: backend.name().to_string(),
                        error,
                    }),
                }
            }
        }

        self.metrics.failures.inc();
        tracing::warn!(attempts, "all backends failed");
        Err(RouterError::Exhausted { attempts, failures })
    }

    async fn attempt(
        &self,
        ctx: &CallContext,
        backend: &Arc<dyn Backend>,
        request: &CompletionRequest,
        attempt: u32,
        fallback: bool,
    ) -> Result<CompletionResult, BackendError> {
        let start = Instant::now();
        let result = match ctx.run(backend.complete(ctx, request)).await {
            Ok(result) => result,
            Err(interrupt) => Err(BackendError::Interrupted(interrupt)),
        };
        let latency = start.elapsed();

        let descriptor = backend.descriptor();
        let mut trace = CallTrace::new(&descriptor.name, &descriptor.model);
        trace.agent_id.clone_from(&request.agent_id);
        trace.attempt = attempt;
        trace.fallback = fallback;
        trace.latency_ms = latency.as_millis() as u64;
        trace.prompt_chars = request.prompt.chars().count();

        match &result {
            Ok(completion) => {
                trace.success = true;
                trace.response_chars = completion.content.chars().count();
                self.metrics.backend(&descriptor.name).record_success(latency);
            }
            Err(error) => {
                trace.error_kind = Some(error.kind().to_string());
                trace.error = Some(error.to_string());
                if !error.is_interrupt() {
                    tracing::warn!(backend = %descriptor.name, attempt, error = %error, "backend call failed");
                    self.metrics.backend(&descriptor.name).record_error(error.to_string());
                }
            }
        }
        self.sink.record_call(&trace);

        result
    }

    /// Health-check every backend concurrently, bypassing admission
    pub async fn health_check_all(&self, ctx: &CallContext) -> Vec<HealthReport> {
        let checks = self.balancer.all().into_iter().map(|backend| async move {
            let check_ctx = ctx.with_timeout(HEALTH_CHECK_TIMEOUT);
            let start = Instant::now();
            let outcome = match check_ctx.run(backend.health_check(&check_ctx)).await {
                Ok(outcome) => outcome,
                Err(interrupt) => Err(BackendError::Interrupted(interrupt)),
            };
            let descriptor = backend.descriptor();
            HealthReport {
                backend: descriptor.name.clone(),
                model: descriptor.model.clone(),
                healthy: outcome.is_ok(),
                latency: start.elapsed(),
                error: outcome.err().map(|e| e.to_string()),
            }
        });
        futures::future::join_all(checks).await
    }
}

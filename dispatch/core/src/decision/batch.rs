//! Batch Aggregator
//!
//! Resolves decisions for many agents with at most one backend call:
//!
//! 1. Fingerprint each observation and serve what the cache already knows
//! 2. Describe the remaining agents in one combined prompt
//! 3. Send it through the router under a bounded timeout
//! 4. Split the reply back into per-agent decisions and cache them
//!
//! A failed call never fails the batch. Every agent without a decision gets
//! the substitute decision instead. Only the caller's own cancellation or
//! deadline is reported as an error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::cache::DecisionCache;
use super::fingerprint::FingerprintPolicy;
use super::observation::{validate_batch, BatchResult, Decision, Observation, ObservationError};
use super::prompt::{parse_reply, PromptBuilder};
use crate::backend::CompletionRequest;
use crate::context::{CallContext, Interrupt};
use crate::diagnostics::{BatchOutcome, BatchTrace, DiagnosticsSink, NullSink};
use crate::routing::Router;

/// Default bound on the combined call
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(25);

/// Batch tuning knobs
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Bound on the combined call, retries and fallbacks included
    pub call_timeout: Duration,
    /// Output tokens requested for any batch
    pub base_tokens: u32,
    /// Additional output tokens per uncached agent
    pub tokens_per_agent: u32,
    /// Sampling temperature
    pub temperature: f32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            base_tokens: 100,
            tokens_per_agent: 80,
            temperature: 0.7,
        }
    }
}

impl BatchConfig {
    /// Output token budget for `agents` uncached agents
    #[must_use]
    pub fn token_budget(&self, agents: usize) -> u32 {
        let agents = u32::try_from(agents).unwrap_or(u32::MAX);
        self.base_tokens
            .saturating_add(self.tokens_per_agent.saturating_mul(agents))
    }
}

/// Why a batch could not be resolved
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BatchError {
    /// The caller's context fired
    #[error("batch interrupted: {0}")]
    Interrupted(#[from] Interrupt),

    /// An observation failed validation
    #[error("invalid observation: {0}")]
    InvalidObservation(#[from] ObservationError),
}

/// Aggregator counters
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    /// Observations submitted
    pub total_observations: u64,
    /// Observations served from cache
    pub cache_hits: u64,
    /// Combined calls a backend answered
    pub calls_made: u64,
    /// Combined calls that failed and were replaced by defaults
    pub fallbacks_used: u64,
    /// Individual substitute decisions handed out
    pub defaulted_decisions: u64,
    /// `cache_hits / total_observations`
    pub cache_hit_rate: f64,
}

/// Groups many agents' decisions into one routed call
pub struct BatchAggregator {
    router: Arc<Router>,
    cache: Arc<DecisionCache<Decision>>,
    policy: FingerprintPolicy,
    prompts: PromptBuilder,
    config: BatchConfig,
    sink: Arc<dyn DiagnosticsSink>,
    total_observations: AtomicU64,
    cache_hits: AtomicU64,
    calls_made: AtomicU64,
    fallbacks_used: AtomicU64,
    defaulted_decisions: AtomicU64,
}

impl BatchAggregator {
    /// Aggregator with default fingerprinting, prompts and tuning
    pub fn new(router: Arc<Router>, cache: Arc<DecisionCache<Decision>>) -> Self {
        Self {
            router,
            cache,
            policy: FingerprintPolicy::default(),
            prompts: PromptBuilder::default(),
            config: BatchConfig::default(),
            sink: Arc::new(NullSink),
            total_observations: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            calls_made: AtomicU64::new(0),
            fallbacks_used: AtomicU64::new(0),
            defaulted_decisions: AtomicU64::new(0),
        }
    }

    /// Use `policy` for cache keys
    #[must_use]
    pub fn with_fingerprint(mut self, policy: FingerprintPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Use `prompts` (and its action vocabulary)
    #[must_use]
    pub fn with_prompts(mut self, prompts: PromptBuilder) -> Self {
        self.prompts = prompts;
        self
    }

    /// Use `config`
    #[must_use]
    pub fn with_config(mut self, config: BatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Report batch outcomes to `sink`
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sink = sink;
        self
    }

    /// The shared cache
    pub fn cache(&self) -> &DecisionCache<Decision> {
        &self.cache
    }

    /// The fingerprint policy
    pub fn fingerprint_policy(&self) -> FingerprintPolicy {
        self.policy
    }

    /// Counter snapshot
    pub fn stats(&self) -> BatchStats {
        let total = self.total_observations.load(Ordering::Relaxed);
        let hits = self.cache_hits.load(Ordering::Relaxed);
        BatchStats {
            total_observations: total,
            cache_hits: hits,
            calls_made: self.calls_made.load(Ordering::Relaxed),
            fallbacks_used: self.fallbacks_used.load(Ordering::Relaxed),
            defaulted_decisions: self.defaulted_decisions.load(Ordering::Relaxed),
            cache_hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
        }
    }

    /// One decision per observation, in order
    pub async fn resolve(
        &self,
        ctx: &CallContext,
        observations: &[Observation],
    ) -> Result<BatchResult, BatchError> {
        if observations.is_empty() {
            return Ok(BatchResult::default());
        }
        validate_batch(observations)?;
        ctx.check()?;

        let start = Instant::now();
        self.total_observations
            .fetch_add(observations.len() as u64, Ordering::Relaxed);

        let fingerprints: Vec<String> = observations
            .iter()
            .map(|obs| self.policy.fingerprint(obs))
            .collect();
        let mut decisions: Vec<Option<Decision>> = vec![None; observations.len()];
        let mut from_cache = vec![false; observations.len()];
        let mut uncached: Vec<usize> = Vec::new();

        for (i, fingerprint) in fingerprints.iter().enumerate() {
            if let Some(cached) = self.cache.get(fingerprint) {
                tracing::debug!(agent = %observations[i].agent_id, "decision cache hit");
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                decisions[i] = Some(cached);
                from_cache[i] = true;
            } else {
                uncached.push(i);
            }
        }

        if uncached.is_empty() {
            self.sink.record_batch(&BatchTrace::new(
                observations.len(),
                observations.len(),
                BatchOutcome::Cached,
                start.elapsed(),
            ));
            return Ok(finish(observations, decisions, from_cache, None));
        }

        ctx.check()?;

        let pending: Vec<&Observation> = uncached.iter().map(|&i| &observations[i]).collect();
        let mut request = CompletionRequest::new(self.prompts.build(&pending))
            .with_max_tokens(self.config.token_budget(pending.len()))
            .with_temperature(self.config.temperature);
        if let [only] = pending.as_slice() {
            request = request.with_agent(only.agent_id.clone());
        }

        let call_ctx = ctx.with_timeout(self.config.call_timeout);

        let (outcome, strategy) = match self.router.complete(&call_ctx, &request).await {
            Ok(reply) => {
                self.calls_made.fetch_add(1, Ordering::Relaxed);
                let parsed = parse_reply(&reply.content, &pending, self.prompts.vocabulary());
                for (decision, &idx) in parsed.decisions.into_iter().zip(&uncached) {
                    if let Some(decision) = decision {
                        self.cache.insert(fingerprints[idx].clone(), decision.clone());
                        decisions[idx] = Some(decision);
                    }
                }
                (BatchOutcome::Resolved, parsed.strategy)
            }
            Err(error) => {
                ctx.check()?;
                tracing::warn!(
                    agents = pending.len(),
                    error = %error,
                    "batch call failed, using default decisions"
                );
                self.fallbacks_used.fetch_add(1, Ordering::Relaxed);
                (BatchOutcome::Defaulted, None)
            }
        };

        self.sink.record_batch(&BatchTrace::new(
            observations.len(),
            observations.len() - uncached.len(),
            outcome,
            start.elapsed(),
        ));

        let defaulted = decisions.iter().filter(|d| d.is_none()).count();
        self.defaulted_decisions
            .fetch_add(defaulted as u64, Ordering::Relaxed);

        Ok(finish(observations, decisions, from_cache, strategy))
    }
}

fn finish(
    observations: &[Observation],
    decisions: Vec<Option<Decision>>,
    from_cache: Vec<bool>,
    strategy: Option<String>,
) -> BatchResult {
    let decisions = decisions
        .into_iter()
        .zip(observations)
        .map(|(decision, obs)| decision.unwrap_or_else(|| Decision::fallback(obs)))
        .collect();
    BatchResult {
        decisions,
        from_cache,
        strategy,
    }
}

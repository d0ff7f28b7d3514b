//! Dispatch Service
//!
//! Wires a resolved [`DispatchConfig`] into a running stack: backends, the
//! balancer, the router with its agent pins, the decision cache and the batch
//! aggregator, all reporting to the same diagnostics sinks.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::{create_backend, Backend, BackendError, CompletionRequest, CompletionResult};
use crate::config::DispatchConfig;
use crate::context::CallContext;
use crate::decision::{
    BatchAggregator, BatchError, BatchResult, BatchStats, CacheStats, DecisionCache,
    FingerprintPolicy, Observation,
};
use crate::diagnostics::{CallTotals, DiagnosticsSink, JsonlSink, MemorySink, MultiSink};
use crate::routing::{
    AdmissionStats, Balancer, HealthReport, Router, RouterError, RouterStats, WeightedEntry,
};

/// Errors building the service
#[derive(Debug, Error)]
pub enum ServiceError {
    /// A backend client could not be constructed
    #[error("failed to build backend {name}: {source}")]
    Backend {
        /// Backend name
        name: String,
        /// Underlying error
        source: BackendError,
    },

    /// The trace file could not be opened
    #[error("failed to open trace file {path}: {source}")]
    TraceFile {
        /// Configured path
        path: std::path::PathBuf,
        /// Underlying IO error
        source: std::io::Error,
    },
}

/// Why a configured backend was left out
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedBackend {
    /// Backend name
    pub name: String,
    /// Human-readable reason
    pub reason: String,
}

/// Snapshot of every counter in the stack
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceStats {
    /// Router counters
    pub router: RouterStats,
    /// Admission bucket state
    pub admission: AdmissionStats,
    /// Aggregator counters
    pub batch: BatchStats,
    /// Decision cache counters
    pub cache: CacheStats,
    /// Totals from the in-memory trace sink
    pub traces: CallTotals,
}

/// A fully wired dispatch stack
pub struct DispatchService {
    router: Arc<Router>,
    aggregator: BatchAggregator,
    memory: Arc<MemorySink>,
    skipped: Vec<SkippedBackend>,
}

impl DispatchService {
    /// Build backends from `config` and wire the stack
    ///
    /// Disabled backends and backends without an API key are skipped with a
    /// warning. A stack with no usable backends still builds; its calls fail
    /// with [`RouterError::NoBackends`].
    pub fn from_config(config: &DispatchConfig) -> Result<Self, ServiceError> {
        let mut backends: Vec<Arc<dyn Backend>> = Vec::new();
        let mut skipped = Vec::new();

        for settings in &config.backends {
            let name = settings.descriptor.name.clone();
            if !settings.descriptor.enabled {
                tracing::info!(backend = %name, "backend disabled, skipping");
                skipped.push(SkippedBackend {
                    name,
                    reason: "disabled".to_string(),
                });
                continue;
            }
            let Some(api_key) = settings.api_key.clone() else {
                tracing::warn!(
                    backend = %name,
                    env = %settings.api_key_env,
                    "no API key found, skipping backend"
                );
                skipped.push(SkippedBackend {
                    name,
                    reason: format!("no API key ({} unset)", settings.api_key_env),
                });
                continue;
            };

            let backend = create_backend(settings.descriptor.clone(), api_key)
                .map_err(|source| ServiceError::Backend {
                    name: name.clone(),
                    source,
                })?;
            tracing::info!(
                backend = %name,
                protocol = %settings.descriptor.protocol,
                model = %backend.descriptor().model,
                weight = settings.descriptor.effective_weight(),
                "loaded backend"
            );
            backends.push(backend);
        }

        let mut service = Self::with_backends(config, backends)?;
        service.skipped = skipped;
        Ok(service)
    }

    /// Wire the stack around already-built backends
    pub fn with_backends(
        config: &DispatchConfig,
        backends: Vec<Arc<dyn Backend>>,
    ) -> Result<Self, ServiceError> {
        let memory = Arc::new(MemorySink::new(config.diagnostics.recent_capacity));
        let mut sink = MultiSink::new(vec![memory.clone() as Arc<dyn DiagnosticsSink>]);
        if let Some(path) = &config.diagnostics.trace_path {
            let jsonl = JsonlSink::open(path).map_err(|source| ServiceError::TraceFile {
                path: path.clone(),
                source,
            })?;
            sink = sink.with(Arc::new(jsonl));
        }
        let sink: Arc<dyn DiagnosticsSink> = Arc::new(sink);

        let balancer = Balancer::new(
            backends
                .into_iter()
                .map(WeightedEntry::from_backend)
                .collect(),
        );
        let router =
            Arc::new(Router::new(balancer, config.router.clone()).with_sink(Arc::clone(&sink)));

        for (agent, backend) in &config.overrides {
            if let Err(e) = router.set_override(agent.clone(), backend.clone()) {
                tracing::warn!(agent = %agent, error = %e, "ignoring agent override");
            }
        }

        let cache = Arc::new(DecisionCache::new(config.cache.max_size, config.cache.ttl));
        let aggregator = BatchAggregator::new(Arc::clone(&router), cache)
            .with_fingerprint(FingerprintPolicy::new(config.cache.grid_size))
            .with_prompts(config.prompt_builder())
            .with_config(config.batch.clone())
            .with_sink(sink);

        Ok(Self {
            router,
            aggregator,
            memory,
            skipped: Vec::new(),
        })
    }

    /// The router
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// The batch aggregator
    pub fn aggregator(&self) -> &BatchAggregator {
        &self.aggregator
    }

    /// Recent traces kept in memory
    pub fn traces(&self) -> &MemorySink {
        &self.memory
    }

    /// Configured backends that were not built
    pub fn skipped_backends(&self) -> &[SkippedBackend] {
        &self.skipped
    }

    /// Route one completion
    pub async fn complete(
        &self,
        ctx: &CallContext,
        request: &CompletionRequest,
    ) -> Result<CompletionResult, RouterError> {
        self.router.complete(ctx, request).await
    }

    /// Resolve a batch of observations
    pub async fn resolve(
        &self,
        ctx: &CallContext,
        observations: &[Observation],
    ) -> Result<BatchResult, BatchError> {
        self.aggregator.resolve(ctx, observations).await
    }

    /// Health-check every backend
    pub async fn health_check(&self, ctx: &CallContext) -> Vec<HealthReport> {
        self.router.health_check_all(ctx).await
    }

    /// Counter snapshot across the stack
    pub fn stats(&self) -> ServiceStats {
        ServiceStats {
            router: self.router.stats(),
            admission: self.router.admission().stats(),
            batch: self.aggregator.stats(),
            cache: self.aggregator.cache().stats(),
            traces: self.memory.totals(),
        }
    }
}

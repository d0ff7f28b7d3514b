//! Backend Traits
//!
//! The [`Backend`] trait lets the router treat every inference provider the
//! same way. Implementations only differ in how a [`CompletionRequest`] is
//! put on the wire and how the reply is read back.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::BackendError;
use crate::context::CallContext;

/// Wire protocol family spoken by a backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// OpenAI-compatible `/chat/completions`
    #[serde(rename = "openai")]
    OpenAi,
    /// Google Gemini `generateContent`
    Gemini,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::Gemini => write!(f, "gemini"),
        }
    }
}

/// Static description of one configured backend
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackendDescriptor {
    /// Unique name used for overrides and stats
    pub name: String,
    /// Encoding variant
    pub protocol: Protocol,
    /// Endpoint root, without trailing slash
    pub base_url: String,
    /// Model identifier sent to the provider
    pub model: String,
    /// Relative share of traffic; values <= 0 count as 1
    pub weight: i64,
    /// Disabled backends are never built
    pub enabled: bool,
}

impl BackendDescriptor {
    /// Create an enabled descriptor with weight 1
    pub fn new(
        name: impl Into<String>,
        protocol: Protocol,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            protocol,
            base_url: base_url.into(),
            model: model.into(),
            weight: 1,
            enabled: true,
        }
    }

    /// Set the weight
    #[must_use]
    pub fn with_weight(mut self, weight: i64) -> Self {
        self.weight = weight;
        self
    }

    /// Weight as used for balancing
    #[must_use]
    pub fn effective_weight(&self) -> u64 {
        normalize_weight(self.weight)
    }
}

/// Weights that are unset or non-positive count as 1
#[must_use]
pub fn normalize_weight(weight: i64) -> u64 {
    u64::try_from(weight).ok().filter(|w| *w > 0).unwrap_or(1)
}

/// One completion request
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Agent the request is issued for, used for per-agent overrides
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Prompt text
    pub prompt: String,
    /// Maximum output tokens
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
}

impl CompletionRequest {
    /// Request with 150 max tokens at temperature 0.7
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            agent_id: None,
            prompt: prompt.into(),
            max_tokens: 150,
            temperature: 0.7,
        }
    }

    /// The tiny request used for health checks
    #[must_use]
    pub fn health_check_request() -> Self {
        Self {
            agent_id: None,
            prompt: "Say 'ok'".to_string(),
            max_tokens: 5,
            temperature: 0.0,
        }
    }

    /// Attach the requesting agent
    #[must_use]
    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Set max tokens
    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set temperature
    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// A successful completion
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionResult {
    /// Generated text
    pub content: String,
    /// Name of the backend that served the request
    pub backend: String,
    /// Model that produced the text
    pub model: String,
    /// Wall time of the backend call
    pub latency: Duration,
    /// Prompt tokens, when reported
    pub input_tokens: Option<u32>,
    /// Completion tokens, when reported
    pub output_tokens: Option<u32>,
}

/// An inference provider
#[async_trait]
pub trait Backend: Send + Sync {
    /// Static description
    fn descriptor(&self) -> &BackendDescriptor;

    /// Unique backend name
    fn name(&self) -> &str {
        &self.descriptor().name
    }

    /// Issue one completion.
    ///
    /// Must return [`BackendError::Interrupted`] promptly once `ctx` fires.
    async fn complete(
        &self,
        ctx: &CallContext,
        request: &CompletionRequest,
    ) -> Result<CompletionResult, BackendError>;

    /// Cheap liveness check
    async fn health_check(&self, ctx: &CallContext) -> Result<(), BackendError> {
        self.complete(ctx, &CompletionRequest::health_check_request())
            .await
            .map(|_| ())
    }
}

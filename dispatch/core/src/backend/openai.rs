//! OpenAI-compatible Backend
//!
//! Speaks the `/chat/completions` dialect used by OpenAI and the many
//! providers that clone its API (Groq, Together, local gateways).

use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::error::BackendError;
use super::http::{self, Decoded};
use super::traits::{Backend, BackendDescriptor, CompletionRequest, CompletionResult};
use crate::context::CallContext;

/// Default endpoint root
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Backend for OpenAI-compatible chat completion APIs
pub struct OpenAiBackend {
    descriptor: BackendDescriptor,
    api_key: String,
    http_client: reqwest::Client,
}

impl OpenAiBackend {
    /// Create a backend; an empty base URL falls back to [`DEFAULT_BASE_URL`]
    pub fn new(
        mut descriptor: BackendDescriptor,
        api_key: impl Into<String>,
    ) -> Result<Self, BackendError> {
        if descriptor.base_url.is_empty() {
            descriptor.base_url = DEFAULT_BASE_URL.to_string();
        }
        Ok(Self {
            descriptor,
            api_key: api_key.into(),
            http_client: http::build_client()?,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.descriptor.base_url.trim_end_matches('/')
        )
    }
}

/// Request body for one completion
pub(crate) fn encode_request(model: &str, request: &CompletionRequest) -> serde_json::Value {
    json!({
        "model": model,
        "messages": [
            { "role": "user", "content": request.prompt }
        ],
        "temperature": request.temperature,
        "max_tokens": request.max_tokens,
    })
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Choice {
    message: Message,
}

#[derive(Deserialize)]
struct Message {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

/// Pull the completion text out of a 2xx body
pub(crate) fn decode_response(body: &str) -> Result<Decoded, BackendError> {
    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| BackendError::MalformedResponse(format!("invalid JSON: {e}")))?;

    if let Some(error) = parsed.error.filter(|e| !e.message.is_empty()) {
        return Err(BackendError::Api(error.message));
    }

    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| BackendError::MalformedResponse("no choices returned".to_string()))?;

    Ok(Decoded {
        content,
        input_tokens: parsed.usage.as_ref().and_then(|u| u.prompt_tokens),
        output_tokens: parsed.usage.as_ref().and_then(|u| u.completion_tokens),
    })
}

#[async_trait]
impl Backend for OpenAiBackend {
    fn descriptor(&self) -> &BackendDescriptor {
        &self.descriptor
    }

    async fn complete(
        &self,
        ctx: &CallContext,
        request: &CompletionRequest,
    ) -> Result<CompletionResult, BackendError> {
        let start = Instant::now();
        let builder = self
            .http_client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&encode_request(&self.descriptor.model, request));

        let body = http::send(ctx, builder).await?;
        let decoded = decode_response(&body)?;

        Ok(CompletionResult {
            content: decoded.content,
            backend: self.descriptor.name.clone(),
            model: self.descriptor.model.clone(),
            latency: start.elapsed(),
            input_tokens: decoded.input_tokens,
            output_tokens: decoded.output_tokens,
        })
    }
}

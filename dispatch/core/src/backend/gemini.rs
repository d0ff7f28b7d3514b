//! Google Gemini Backend

use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::error::BackendError;
use super::http::{self, Decoded};
use super::traits::{Backend, BackendDescriptor, CompletionRequest, CompletionResult};
use crate::context::CallContext;

/// Default endpoint root
pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Model used when none is configured
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

/// Backend for the Gemini `generateContent` API
pub struct GeminiBackend {
    descriptor: BackendDescriptor,
    api_key: String,
    http_client: reqwest::Client,
}

impl GeminiBackend {
    /// Create a backend, filling in the default base URL and model
    pub fn new(
        mut descriptor: BackendDescriptor,
        api_key: impl Into<String>,
    ) -> Result<Self, BackendError> {
        if descriptor.base_url.is_empty() {
            descriptor.base_url = DEFAULT_BASE_URL.to_string();
        }
        if descriptor.model.is_empty() {
            descriptor.model = DEFAULT_MODEL.to_string();
        }
        Ok(Self {
            descriptor,
            api_key: api_key.into(),
            http_client: http::build_client()?,
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.descriptor.base_url.trim_end_matches('/'),
            self.descriptor.model
        )
    }
}

pub(crate) fn encode_request(request: &CompletionRequest) -> serde_json::Value {
    json!({
        "contents": [
            { "parts": [ { "text": request.prompt } ] }
        ],
        "generationConfig": {
            "temperature": request.temperature,
            "maxOutputTokens": request.max_tokens,
        },
    })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    prompt_token_count: Option<u32>,
    candidates_token_count: Option<u32>,
}

#[derive(Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
}

pub(crate) fn decode_response(body: &str) -> Result<Decoded, BackendError> {
    let parsed: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| BackendError::MalformedResponse(format!("invalid JSON: {e}")))?;

    if let Some(error) = parsed.error.filter(|e| !e.message.is_empty()) {
        return Err(BackendError::Api(error.message));
    }

    let content = parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .and_then(|c| c.parts.into_iter().next())
        .map(|p| p.text)
        .ok_or_else(|| BackendError::MalformedResponse("no candidates returned".to_string()))?;

    Ok(Decoded {
        content,
        input_tokens: parsed.usage_metadata.as_ref().and_then(|u| u.prompt_token_count),
        output_tokens: parsed
            .usage_metadata
            .as_ref()
            .and_then(|u| u.candidates_token_count),
    })
}

#[async_trait]
impl Backend for GeminiBackend {
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
            .query(&[("key", self.api_key.as_str())])
            .json(&encode_request(request));

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

//! Shared HTTP plumbing for the JSON backends

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::RequestBuilder;

use super::error::BackendError;
use crate::context::CallContext;

/// Per-request timeout applied by every backend client
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Text and token counts pulled out of a provider reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Decoded {
    pub content: String,
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
}

pub(crate) fn build_client() -> Result<reqwest::Client, BackendError> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| BackendError::Network(format!("failed to build HTTP client: {e}")))
}

/// Send `request` under `ctx` and return the raw body of a 2xx reply.
///
/// Non-success statuses are classified with [`BackendError::from_status`].
pub(crate) async fn send(ctx: &CallContext, request: RequestBuilder) -> Result<String, BackendError> {
    ctx.run(async move {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.text().await?);
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let body = response.text().await.unwrap_or_default();
        Err(match BackendError::from_status(status.as_u16(), &body) {
            BackendError::RateLimited { .. } => BackendError::RateLimited { retry_after },
            other => other,
        })
    })
    .await?
}

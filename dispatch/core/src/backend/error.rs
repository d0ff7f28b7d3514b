//! Backend error taxonomy
//!
//! Every failure a backend can report is classified as either retryable
//! (worth another attempt on the same backend) or fatal (move on).

use std::time::Duration;

use thiserror::Error;

use crate::context::Interrupt;

/// Longest slice of an error body kept in messages
pub const MAX_ERROR_BODY_CHARS: usize = 200;

/// Errors returned by a single backend call
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// Connection refused, reset, DNS failure and similar
    #[error("network error: {0}")]
    Network(String),

    /// The HTTP client timed out
    #[error("request timed out")]
    Timeout,

    /// HTTP 429
    #[error("rate limited by backend")]
    RateLimited {
        /// Hint from the `Retry-After` header, when present
        retry_after: Option<Duration>,
    },

    /// HTTP 5xx
    #[error("server error {status}: {body}")]
    Server {
        /// Status code
        status: u16,
        /// Truncated response body
        body: String,
    },

    /// HTTP 401 or 403
    #[error("authentication rejected (HTTP {status})")]
    Authentication {
        /// Status code
        status: u16,
    },

    /// Any other non-success status
    #[error("client error {status}: {body}")]
    Client {
        /// Status code
        status: u16,
        /// Truncated response body
        body: String,
    },

    /// The body could not be decoded or carried no completion
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The backend answered 200 with an error payload
    #[error("API error: {0}")]
    Api(String),

    /// The caller's context fired during the call
    #[error("interrupted: {0}")]
    Interrupted(#[from] Interrupt),
}

impl BackendError {
    /// Classify a non-success HTTP status
    #[must_use]
    pub fn from_status(status: u16, body: &str) -> Self {
        let body = truncate(body, MAX_ERROR_BODY_CHARS);
        match status {
            401 | 403 => Self::Authentication { status },
            429 => Self::RateLimited { retry_after: None },
            500..=599 => Self::Server { status, body },
            _ => Self::Client { status, body },
        }
    }

    /// Whether another attempt on the same backend may succeed
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout | Self::RateLimited { .. } | Self::Server { .. }
        )
    }

    /// Whether the caller's context stopped the call
    #[must_use]
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }

    /// Short stable label used in traces
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Timeout => "timeout",
            Self::RateLimited { .. } => "rate_limited",
            Self::Server { .. } => "server",
            Self::Authentication { .. } => "authentication",
            Self::Client { .. } => "client",
            Self::MalformedResponse(_) => "malformed_response",
            Self::Api(_) => "api",
            Self::Interrupted(_) => "interrupted",
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::MalformedResponse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

pub(crate) fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

//! LLM Backend Integration
//!
//! Abstracted access to remote inference providers through the [`Backend`]
//! trait.
//!
//! # Available Backends
//!
//! - **OpenAI-compatible**: `/chat/completions` with bearer auth
//! - **Gemini**: `generateContent` with an API key query parameter
//!
//! # Usage
//!
//! ```ignore
//! use dispatch_core::backend::{create_backend, BackendDescriptor, Protocol};
//!
//! let descriptor = BackendDescriptor::new("groq", Protocol::OpenAi, url, "llama-3.1-8b-instant");
//! let backend = create_backend(descriptor, api_key)?;
//! let result = backend.complete(&ctx, &CompletionRequest::new("Hello!")).await?;
//! ```

mod error;
mod gemini;
mod http;
mod openai;
mod traits;

use std::sync::Arc;

pub use error::{BackendError, MAX_ERROR_BODY_CHARS};
pub use gemini::GeminiBackend;
pub use http::REQUEST_TIMEOUT;
pub use openai::OpenAiBackend;
pub use traits::{
    normalize_weight, Backend, BackendDescriptor, CompletionRequest, CompletionResult, Protocol,
};

/// Build the backend variant matching `descriptor.protocol`
pub fn create_backend(
    descriptor: BackendDescriptor,
    api_key: impl Into<String>,
) -> Result<Arc<dyn Backend>, BackendError> {
    Ok(match descriptor.protocol {
        Protocol::OpenAi => Arc::new(OpenAiBackend::new(descriptor, api_key)?),
        Protocol::Gemini => Arc::new(GeminiBackend::new(descriptor, api_key)?),
    })
}

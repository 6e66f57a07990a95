//! HTTP implementations of the model and search capabilities.

mod openrouter;
mod tavily;

pub use openrouter::OpenRouterModel;
pub use tavily::TavilySearch;

use std::time::Duration;

use crate::error::ResearchError;

/// Provider error bodies are truncated to this many characters after redaction.
const MAX_ERROR_BODY: usize = 300;

fn http_client(timeout: Duration) -> Result<reqwest::Client, ResearchError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| ResearchError::InvalidConfiguration(format!("http client: {err}")))
}

fn error_excerpt(body: &str) -> String {
    let redacted = crate::security::redact(body.trim());
    if redacted.chars().count() <= MAX_ERROR_BODY {
        return redacted;
    }
    let mut excerpt: String = redacted.chars().take(MAX_ERROR_BODY).collect();
    excerpt.push('…');
    excerpt
}

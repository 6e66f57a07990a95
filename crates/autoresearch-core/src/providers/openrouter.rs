//! OpenAI-compatible chat-completions client (OpenRouter by default).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Value, json};
use tracing::debug;

use super::{error_excerpt, http_client};
use crate::config::LlmConfig;
use crate::error::{ModelError, ResearchError};
use crate::model::{LanguageModel, ModelRequest};
use crate::security::SecretValue;

pub struct OpenRouterModel {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f32,
    api_key: SecretValue,
    timeout: Duration,
}

impl OpenRouterModel {
    pub fn new(config: &LlmConfig, api_key: SecretValue, timeout: Duration) -> Result<Self, ResearchError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            temperature: config.temperature,
            api_key,
            timeout,
        })
    }

    fn request_body(&self, request: &ModelRequest) -> Value {
        json!({
            "model": self.model,
            "temperature": self.temperature,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": request.instructions },
                { "role": "user", "content": request.render_prompt() },
            ],
        })
    }

    fn map_http_error(status: StatusCode, body: &str) -> ModelError {
        match status.as_u16() {
            401 | 403 => ModelError::Auth(error_excerpt(body)),
            429 => ModelError::RateLimited,
            code => ModelError::Provider {
                status: code,
                message: error_excerpt(body),
            },
        }
    }

    fn parse_content(body: &Value) -> Result<String, ModelError> {
        body.get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(Value::as_str)
            .filter(|content| !content.trim().is_empty())
            .map(str::to_string)
            .ok_or_else(|| ModelError::InvalidResponse("no message content in completion".into()))
    }
}

#[async_trait]
impl LanguageModel for OpenRouterModel {
    async fn complete(&self, request: &ModelRequest) -> Result<String, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);
        debug!(role = %request.role, model = %self.model, "sending completion request");

        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose())
            .json(&self.request_body(request))
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    ModelError::Timeout(self.timeout)
                } else {
                    ModelError::Network(error_excerpt(&err.to_string()))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| ModelError::Network(error_excerpt(&err.to_string())))?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &body));
        }

        let json: Value = serde_json::from_str(&body)
            .map_err(|err| ModelError::InvalidResponse(format!("invalid JSON envelope: {err}")))?;
        Self::parse_content(&json)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

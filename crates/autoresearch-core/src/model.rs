//! Language-model boundary.
//!
//! Stages never talk to a provider directly: they build a [`ModelRequest`]
//! (role instructions, structured input, expected output schema) and hand it
//! to a [`LanguageModel`]. Responses are parsed and validated against the
//! stage's schema before use, with a single corrective re-ask on malformed
//! output.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ModelError;

static FENCED_JSON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").expect("invalid fenced json regex")
});

/// Agent roles that call out to a language model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    /// Decomposes the request into search queries
    Planner,
    /// Synthesizes research into a cited report
    Writer,
    /// Scores drafts against the retrieved sources
    Critic,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Planner => "planner",
            AgentRole::Writer => "writer",
            AgentRole::Critic => "critic",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single structured-output request.
#[derive(Debug, Clone, Serialize)]
pub struct ModelRequest {
    pub role: AgentRole,
    pub instructions: String,
    pub input: Value,
    /// JSON shape the response must conform to.
    pub schema: Value,
    /// Set on the corrective re-ask: what was wrong with the previous answer.
    pub correction: Option<String>,
}

impl ModelRequest {
    pub fn new(role: AgentRole, instructions: impl Into<String>, input: Value, schema: Value) -> Self {
        Self {
            role,
            instructions: instructions.into(),
            input,
            schema,
            correction: None,
        }
    }

    pub fn with_correction(mut self, reason: impl Into<String>) -> Self {
        self.correction = Some(reason.into());
        self
    }

    /// Render the user-facing message sent alongside the instructions.
    pub fn render_prompt(&self) -> String {
        let mut prompt = format!(
            "INPUT:\n{}\n\nRespond with valid JSON only, matching this schema:\n{}",
            serde_json::to_string_pretty(&self.input).unwrap_or_default(),
            serde_json::to_string_pretty(&self.schema).unwrap_or_default()
        );
        if let Some(reason) = &self.correction {
            prompt.push_str(&format!(
                "\n\nYour previous response was rejected: {reason}\nReturn a corrected response that fixes this."
            ));
        }
        prompt
    }
}

/// Capability interface for structured-output language models.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Return the raw model response text for a request.
    async fn complete(&self, request: &ModelRequest) -> Result<String, ModelError>;

    fn name(&self) -> &str;
}

/// Why a structured call did not yield a usable value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuredError {
    /// The model boundary itself failed (transport, auth, timeout).
    Model(ModelError),
    /// The response did not conform to the expected structure.
    Malformed(String),
}

/// Call the model and deserialize its response into `T`.
pub async fn generate_structured<T: DeserializeOwned>(
    model: &dyn LanguageModel,
    request: &ModelRequest,
    timeout: Duration,
) -> Result<T, StructuredError> {
    let raw = match tokio::time::timeout(timeout, model.complete(request)).await {
        Ok(result) => result.map_err(StructuredError::Model)?,
        Err(_) => return Err(StructuredError::Model(ModelError::Timeout(timeout))),
    };

    debug!(role = %request.role, bytes = raw.len(), "model responded");

    let json = extract_json(&raw)
        .ok_or_else(|| StructuredError::Malformed("response contained no JSON object".into()))?;
    serde_json::from_str(json)
        .map_err(|err| StructuredError::Malformed(format!("response did not match schema: {err}")))
}

/// Run a structured call and validate it, re-asking once with a corrective
/// note if the first answer is malformed.
///
/// Returns `Malformed` with the last defect if the second answer is also
/// unusable. Model-boundary failures are returned immediately.
pub async fn generate_validated<T, U, F>(
    model: &dyn LanguageModel,
    request: ModelRequest,
    timeout: Duration,
    validate: F,
) -> Result<U, StructuredError>
where
    T: DeserializeOwned,
    F: Fn(T) -> Result<U, String>,
{
    let role = request.role;
    let first = generate_structured::<T>(model, &request, timeout)
        .await
        .and_then(|value| validate(value).map_err(StructuredError::Malformed));

    let reason = match first {
        Err(StructuredError::Malformed(reason)) => reason,
        other => return other,
    };

    warn!(%role, %reason, "malformed model output; retrying with corrective instruction");

    let corrective = request.with_correction(reason);
    generate_structured::<T>(model, &corrective, timeout)
        .await
        .and_then(|value| validate(value).map_err(StructuredError::Malformed))
}

/// Locate the JSON object in a model response (fenced block or bare object).
pub fn extract_json(raw: &str) -> Option<&str> {
    if let Some(caps) = FENCED_JSON.captures(raw) {
        return caps.get(1).map(|m| m.as_str());
    }

    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (start < end).then(|| &raw[start..=end])
}

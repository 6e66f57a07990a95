use std::{path::PathBuf, time::Duration};

use thiserror::Error;

use crate::model::AgentRole;

/// Session-level error type for AutoResearch.
///
/// Everything that can end a session in `Failed`, plus the start-up
/// configuration failures surfaced before a session exists.
#[derive(Debug, Error)]
pub enum ResearchError {
    #[error("research query is empty")]
    EmptyQuery,
    #[error("planner returned a malformed plan: {0}")]
    MalformedPlan(String),
    #[error("no research data gathered ({failed_queries} of {planned_queries} queries failed)")]
    NoResearchData {
        planned_queries: usize,
        failed_queries: usize,
    },
    #[error("writer returned a malformed draft: {0}")]
    MalformedDraft(String),
    #[error("critic returned a malformed critique: {0}")]
    MalformedCritique(String),
    #[error("session timed out after {0:?}")]
    Timeout(Duration),
    #[error("{role} model call failed: {source}")]
    Model {
        role: AgentRole,
        #[source]
        source: ModelError,
    },
    #[error("configuration error: {0}")]
    InvalidConfiguration(String),
    #[error("missing environment variable: {0}")]
    MissingSecret(String),
    #[error("I/O error while reading {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ResearchError {
    pub fn config_io(path: PathBuf, source: std::io::Error) -> Self {
        Self::ConfigIo { path, source }
    }

    pub fn model(role: AgentRole, source: ModelError) -> Self {
        Self::Model { role, source }
    }

    /// Short machine-readable tag, used for metrics and JSON output.
    pub fn kind(&self) -> &'static str {
        match self {
            ResearchError::EmptyQuery => "empty_query",
            ResearchError::MalformedPlan(_) => "malformed_plan",
            ResearchError::NoResearchData { .. } => "no_research_data",
            ResearchError::MalformedDraft(_) => "malformed_draft",
            ResearchError::MalformedCritique(_) => "malformed_critique",
            ResearchError::Timeout(_) => "timeout",
            ResearchError::Model { .. } => "model",
            ResearchError::InvalidConfiguration(_) => "invalid_configuration",
            ResearchError::MissingSecret(_) => "missing_secret",
            ResearchError::ConfigIo { .. } => "config_io",
        }
    }
}

/// Failure reported by a search provider for a single call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SearchError {
    #[error("network error: {0}")]
    Network(String),
    #[error("rate limited by search provider")]
    RateLimited,
    #[error("search call timed out after {0:?}")]
    Timeout(Duration),
    #[error("search provider unavailable ({status}): {message}")]
    Unavailable { status: u16, message: String },
    #[error("search provider rejected query: {0}")]
    InvalidQuery(String),
    #[error("search provider rejected credentials: {0}")]
    Auth(String),
    #[error("search provider returned an unreadable response: {0}")]
    InvalidResponse(String),
}

impl SearchError {
    /// Transient failures are retried with backoff; the rest fail fast.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SearchError::Network(_)
                | SearchError::RateLimited
                | SearchError::Timeout(_)
                | SearchError::Unavailable { .. }
        )
    }
}

/// Failure reported by the language-model boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("network error: {0}")]
    Network(String),
    #[error("rate limited by model provider")]
    RateLimited,
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),
    #[error("model provider rejected credentials: {0}")]
    Auth(String),
    #[error("model provider error ({status}): {message}")]
    Provider { status: u16, message: String },
    #[error("model returned an unusable response: {0}")]
    InvalidResponse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_errors_are_classified() {
        assert!(SearchError::Network("reset".into()).is_transient());
        assert!(SearchError::RateLimited.is_transient());
        assert!(SearchError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(
            SearchError::Unavailable {
                status: 503,
                message: "down".into()
            }
            .is_transient()
        );
        assert!(!SearchError::InvalidQuery("empty".into()).is_transient());
        assert!(!SearchError::Auth("bad key".into()).is_transient());
        assert!(!SearchError::InvalidResponse("missing field `url`".into()).is_transient());
    }

    #[test]
    fn research_error_reasons_are_human_readable() {
        let err = ResearchError::NoResearchData {
            planned_queries: 3,
            failed_queries: 3,
        };
        assert_eq!(
            err.to_string(),
            "no research data gathered (3 of 3 queries failed)"
        );
        assert_eq!(err.kind(), "no_research_data");

        let err = ResearchError::model(AgentRole::Critic, ModelError::RateLimited);
        assert_eq!(
            err.to_string(),
            "critic model call failed: rate limited by model provider"
        );
    }
}

//! Search-provider boundary and the retrying client the researcher uses.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::RetryConfig;
use crate::error::SearchError;
use crate::metrics;
use crate::state::{ResearchQuery, SearchResult};

/// Upper bound of the random jitter, as a fraction of the computed delay.
pub const JITTER_FRACTION: f64 = 0.25;

/// One hit returned by a search provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub url: String,
    pub title: Option<String>,
    pub snippet: String,
    /// Provider timestamp, when it reports one.
    pub retrieved_at: Option<DateTime<Utc>>,
}

/// Web-search provider capability.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, SearchError>;

    fn name(&self) -> &str;
}

/// A query that could not be served, after retries where applicable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchFailure {
    pub query: ResearchQuery,
    pub attempts: u32,
    #[serde(serialize_with = "serialize_error")]
    pub last_error: SearchError,
}

fn serialize_error<S: serde::Serializer>(err: &SearchError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&err.to_string())
}

/// Wraps a [`SearchProvider`] with bounded exponential-backoff retry.
#[derive(Clone)]
pub struct ResilientSearchClient {
    provider: Arc<dyn SearchProvider>,
    policy: RetryConfig,
    call_timeout: Duration,
    max_results: usize,
}

impl ResilientSearchClient {
    pub fn new(
        provider: Arc<dyn SearchProvider>,
        policy: RetryConfig,
        call_timeout: Duration,
        max_results: usize,
    ) -> Self {
        Self {
            provider,
            policy,
            call_timeout,
            max_results,
        }
    }

    /// Execute one planned query, retrying transient failures.
    pub async fn search(&self, query: &ResearchQuery) -> Result<Vec<SearchResult>, SearchFailure> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            debug!(
                query_id = query.id(),
                provider = self.provider.name(),
                attempt,
                max_attempts,
                "dispatching search"
            );

            let outcome = match tokio::time::timeout(
                self.call_timeout,
                self.provider.search(query.text(), self.max_results),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(SearchError::Timeout(self.call_timeout)),
            };

            match outcome {
                Ok(hits) => {
                    metrics::record_search_attempt("success");
                    info!(
                        query_id = query.id(),
                        attempt,
                        hits = hits.len(),
                        "search succeeded"
                    );
                    return Ok(into_results(query, hits));
                }
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    metrics::record_search_attempt("retry");
                    let delay = backoff_delay(&self.policy, attempt);
                    warn!(
                        query_id = query.id(),
                        error = %err,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "search failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    metrics::record_search_attempt("failure");
                    warn!(
                        query_id = query.id(),
                        error = %err,
                        attempt,
                        transient = err.is_transient(),
                        "search failed permanently"
                    );
                    return Err(SearchFailure {
                        query: query.clone(),
                        attempts: attempt,
                        last_error: err,
                    });
                }
            }
        }
    }
}

/// Delay before the retry that follows failed attempt `attempt` (1-based).
///
/// `initial × multiplier^(attempt-1)`, plus up to [`JITTER_FRACTION`] of that
/// when jitter is enabled.
pub fn backoff_delay(policy: &RetryConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1) as i32;
    let base = policy.initial_backoff_ms as f64 * policy.backoff_multiplier.powi(exponent);
    let jitter = if policy.jitter {
        base * JITTER_FRACTION * rand::thread_rng().gen_range(0.0..1.0)
    } else {
        0.0
    };
    Duration::from_micros(((base + jitter) * 1000.0).round() as u64)
}

fn into_results(query: &ResearchQuery, hits: Vec<SearchHit>) -> Vec<SearchResult> {
    let now = Utc::now();
    let mut seen = std::collections::HashSet::new();
    hits.into_iter()
        .filter(|hit| !hit.url.trim().is_empty() && seen.insert(hit.url.clone()))
        .map(|hit| SearchResult {
            query_id: query.id().to_string(),
            url: hit.url,
            title: hit.title,
            snippet: hit.snippet,
            retrieved_at: hit.retrieved_at.unwrap_or(now),
        })
        .collect()
}

//! Tavily web-search client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use super::{error_excerpt, http_client};
use crate::config::SearchConfig;
use crate::error::{ResearchError, SearchError};
use crate::search::{SearchHit, SearchProvider};
use crate::security::SecretValue;

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    url: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    content: String,
}

pub struct TavilySearch {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretValue,
    timeout: Duration,
}

impl TavilySearch {
    pub fn new(config: &SearchConfig, api_key: SecretValue, timeout: Duration) -> Result<Self, ResearchError> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            timeout,
        })
    }

    fn map_http_error(status: StatusCode, body: &str) -> SearchError {
        match status.as_u16() {
            400 | 422 => SearchError::InvalidQuery(error_excerpt(body)),
            401 | 403 => SearchError::Auth(error_excerpt(body)),
            429 => SearchError::RateLimited,
            code => SearchError::Unavailable {
                status: code,
                message: error_excerpt(body),
            },
        }
    }

    fn decode_hits(body: &str) -> Result<Vec<SearchHit>, SearchError> {
        let parsed: TavilyResponse = serde_json::from_str(body)
            .map_err(|err| SearchError::InvalidResponse(err.to_string()))?;
        Ok(Self::into_hits(parsed))
    }

    fn into_hits(response: TavilyResponse) -> Vec<SearchHit> {
        response
            .results
            .into_iter()
            .filter(|r| !r.url.trim().is_empty())
            .map(|r| SearchHit {
                url: r.url,
                title: r.title.filter(|t| !t.trim().is_empty()),
                snippet: r.content,
                retrieved_at: None,
            })
            .collect()
    }
}

#[async_trait]
impl SearchProvider for TavilySearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, SearchError> {
        let url = format!("{}/search", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(self.api_key.expose())
            .json(&json!({
                "query": query,
                "max_results": max_results,
                "search_depth": "basic",
            }))
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() {
                    SearchError::Timeout(self.timeout)
                } else {
                    SearchError::Network(error_excerpt(&err.to_string()))
                }
            })?;

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(err) if status.is_success() => {
                return Err(SearchError::Network(error_excerpt(&err.to_string())));
            }
            Err(err) => format!("(body unreadable: {err})"),
        };
        if !status.is_success() {
            return Err(Self::map_http_error(status, &body));
        }

        Self::decode_hits(&body)
    }

    fn name(&self) -> &str {
        "tavily"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_map_to_search_errors() {
        assert!(matches!(
            TavilySearch::map_http_error(StatusCode::BAD_REQUEST, "query too long"),
            SearchError::InvalidQuery(_)
        ));
        assert!(matches!(
            TavilySearch::map_http_error(StatusCode::FORBIDDEN, ""),
            SearchError::Auth(_)
        ));
        assert_eq!(
            TavilySearch::map_http_error(StatusCode::TOO_MANY_REQUESTS, ""),
            SearchError::RateLimited
        );
        let unavailable = TavilySearch::map_http_error(StatusCode::SERVICE_UNAVAILABLE, "busy");
        assert!(unavailable.is_transient());
    }

    #[test]
    fn schema_mismatch_is_not_retried() {
        let err = TavilySearch::decode_hits(r#"{"results": [{"title": "no url"}]}"#).unwrap_err();
        assert!(matches!(err, SearchError::InvalidResponse(_)));
        assert!(!err.is_transient());

        let hits = TavilySearch::decode_hits(r#"{"results": []}"#).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn results_without_urls_are_dropped() {
        let response: TavilyResponse = serde_json::from_str(
            r#"{"results": [
                {"url": "https://a.example", "title": "A", "content": "alpha"},
                {"url": "  ", "content": "orphan"},
                {"url": "https://b.example", "title": "", "content": "beta"}
            ]}"#,
        )
        .unwrap();

        let hits = TavilySearch::into_hits(response);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].title.as_deref(), Some("A"));
        assert_eq!(hits[1].title, None);
    }
}

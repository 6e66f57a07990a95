#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use autoresearch_core::{
    AgentRole, LanguageModel, ModelError, ModelRequest, SearchError, SearchHit, SearchProvider,
    SessionConfig,
};
use serde_json::{Value, json};

/// Language model that answers by role: a fixed plan, a writer that cites
/// every source it is shown and titles each draft `v<n>`, and a critic that
/// replays scripted scores.
pub struct ScriptedModel {
    queries: Vec<String>,
    scores: Mutex<VecDeque<u8>>,
    calls: Mutex<HashMap<AgentRole, usize>>,
    writer_inputs: Mutex<Vec<Value>>,
    malformed: Option<AgentRole>,
    hang: bool,
}

impl ScriptedModel {
    pub fn new(queries: &[&str], scores: &[u8]) -> Self {
        Self {
            queries: queries.iter().map(|q| q.to_string()).collect(),
            scores: Mutex::new(scores.iter().copied().collect()),
            calls: Mutex::new(HashMap::new()),
            writer_inputs: Mutex::new(Vec::new()),
            malformed: None,
            hang: false,
        }
    }

    /// Make every answer for `role` structurally invalid.
    pub fn malformed_for(mut self, role: AgentRole) -> Self {
        self.malformed = Some(role);
        self
    }

    /// A model whose every call never returns.
    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::new(&[], &[])
        }
    }

    pub fn calls(&self, role: AgentRole) -> usize {
        self.calls.lock().unwrap().get(&role).copied().unwrap_or(0)
    }

    pub fn writer_inputs(&self) -> Vec<Value> {
        self.writer_inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, request: &ModelRequest) -> Result<String, ModelError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let count = calls.entry(request.role).or_default();
            *count += 1;
            *count
        };
        if self.hang {
            std::future::pending::<()>().await;
        }

        if self.malformed == Some(request.role) {
            return Ok(match request.role {
                AgentRole::Planner => json!({ "queries": [] }),
                AgentRole::Writer => json!({ "title": "Empty", "sections": [], "citations": [] }),
                AgentRole::Critic => json!({ "score": 150 }),
            }
            .to_string());
        }

        match request.role {
            AgentRole::Planner => Ok(json!({ "queries": self.queries }).to_string()),
            AgentRole::Writer => {
                self.writer_inputs.lock().unwrap().push(request.input.clone());
                let citations: Vec<Value> = request.input["sources"]
                    .as_array()
                    .map(|sources| sources.iter().map(|s| s["url"].clone()).collect())
                    .unwrap_or_default();
                Ok(json!({
                    "title": format!("Research Report v{call}"),
                    "sections": [
                        { "heading": "Summary", "body": "Findings drawn from the sources." }
                    ],
                    "citations": citations,
                })
                .to_string())
            }
            AgentRole::Critic => {
                let score = self
                    .scores
                    .lock()
                    .unwrap()
                    .pop_front()
                    .ok_or_else(|| ModelError::InvalidResponse("no score scripted".into()))?;
                Ok(json!({ "score": score, "feedback": ["tighten the claims"] }).to_string())
            }
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Search provider keyed by query text. Queries starting with `fail` always
/// return a transient error; everything else gets its configured hit count.
pub struct MockSearch {
    hits: HashMap<String, usize>,
    calls: AtomicUsize,
}

impl MockSearch {
    pub fn new(hits: &[(&str, usize)]) -> Self {
        Self {
            hits: hits.iter().map(|(q, n)| (q.to_string(), *n)).collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SearchProvider for MockSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, SearchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if query.starts_with("fail") {
            return Err(SearchError::Unavailable {
                status: 503,
                message: "search backend down".into(),
            });
        }

        let count = self.hits.get(query).copied().unwrap_or(0).min(max_results);
        Ok((1..=count)
            .map(|n| SearchHit {
                url: format!("https://{query}.example/{n}"),
                title: Some(format!("{query} #{n}")),
                snippet: format!("{query} finding {n}"),
                retrieved_at: None,
            })
            .collect())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

pub fn session_config() -> SessionConfig {
    let mut config = SessionConfig::default();
    config.retry.jitter = false;
    config
}

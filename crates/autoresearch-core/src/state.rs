//! Session data model and the single mutable record threaded through every stage.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::search::SearchFailure;

/// One planned search query. Immutable once planned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResearchQuery {
    id: String,
    text: String,
}

impl ResearchQuery {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// A retrieved source, tagged with the query that found it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchResult {
    pub query_id: String,
    pub url: String,
    pub title: Option<String>,
    pub snippet: String,
    pub retrieved_at: DateTime<Utc>,
}

/// Sources as sent to the model, sorted by URL so prompts do not depend on
/// aggregation order.
pub(crate) fn source_payload(results: &[SearchResult]) -> Vec<Value> {
    let mut sorted: Vec<&SearchResult> = results.iter().collect();
    sorted.sort_by(|a, b| a.url.cmp(&b.url).then_with(|| a.query_id.cmp(&b.query_id)));
    sorted
        .into_iter()
        .map(|r| {
            json!({
                "url": r.url,
                "title": r.title,
                "snippet": r.snippet,
                "query_id": r.query_id,
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftSection {
    pub heading: String,
    pub body: String,
}

/// Structured report content produced by the writer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    pub title: String,
    pub sections: Vec<DraftSection>,
    /// Source URLs cited by the report.
    pub citations: Vec<String>,
}

impl Draft {
    pub fn citation_set(&self) -> BTreeSet<&str> {
        self.citations.iter().map(String::as_str).collect()
    }

    pub fn render_markdown(&self) -> String {
        let mut output = format!("# {}\n", self.title);
        for section in &self.sections {
            let _ = write!(output, "\n## {}\n\n{}\n", section.heading, section.body.trim_end());
        }
        output.push_str("\n## Sources\n\n");
        for (idx, url) in self.citations.iter().enumerate() {
            let _ = writeln!(output, "{}. {}", idx + 1, url);
        }
        output
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Reject,
}

/// Evaluator output for one draft. Superseded, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Critique {
    score: u8,
    feedback: Vec<String>,
    verdict: Verdict,
}

impl Critique {
    /// Build a critique, deriving the verdict from `score` and `pass_threshold`.
    pub fn new(score: u8, feedback: Vec<String>, pass_threshold: u8) -> Self {
        let verdict = if score >= pass_threshold {
            Verdict::Pass
        } else {
            Verdict::Reject
        };
        Self {
            score,
            feedback,
            verdict,
        }
    }

    pub fn score(&self) -> u8 {
        self.score
    }

    pub fn feedback(&self) -> &[String] {
        &self.feedback
    }

    pub fn verdict(&self) -> Verdict {
        self.verdict
    }

    pub fn passed(&self) -> bool {
        self.verdict == Verdict::Pass
    }
}

/// The aggregate owned by the orchestrator for the lifetime of one session.
///
/// Stages receive it by reference and never retain it. The revision counter
/// can only move forward through [`SharedResearchState::advance_revision`],
/// which refuses to pass the configured bound.
#[derive(Debug, Clone, Serialize)]
pub struct SharedResearchState {
    session_id: String,
    query: String,
    plan: Vec<ResearchQuery>,
    results: Vec<SearchResult>,
    failures: Vec<SearchFailure>,
    draft: Option<Draft>,
    critique: Option<Critique>,
    revision: u32,
}

impl SharedResearchState {
    /// Fresh state seeded only with the user query.
    pub fn new(session_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            query: query.into(),
            plan: Vec::new(),
            results: Vec::new(),
            failures: Vec::new(),
            draft: None,
            critique: None,
            revision: 0,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn plan(&self) -> &[ResearchQuery] {
        &self.plan
    }

    pub fn results(&self) -> &[SearchResult] {
        &self.results
    }

    pub fn failures(&self) -> &[SearchFailure] {
        &self.failures
    }

    pub fn draft(&self) -> Option<&Draft> {
        self.draft.as_ref()
    }

    pub fn critique(&self) -> Option<&Critique> {
        self.critique.as_ref()
    }

    pub fn revision(&self) -> u32 {
        self.revision
    }

    pub(crate) fn set_plan(&mut self, plan: Vec<ResearchQuery>) {
        self.plan = plan;
    }

    pub(crate) fn record_research(&mut self, results: Vec<SearchResult>, failures: Vec<SearchFailure>) {
        self.results = results;
        self.failures = failures;
    }

    /// Replace the current draft; prior drafts are not retained.
    pub(crate) fn replace_draft(&mut self, draft: Draft) {
        self.draft = Some(draft);
    }

    pub(crate) fn record_critique(&mut self, critique: Critique) {
        self.critique = Some(critique);
    }

    /// Increment the revision counter unless it already sits at `max`.
    ///
    /// Returns the new value, or `None` when the bound is reached.
    pub(crate) fn advance_revision(&mut self, max: u32) -> Option<u32> {
        if self.revision >= max {
            return None;
        }
        self.revision += 1;
        Some(self.revision)
    }

    pub(crate) fn take_draft(&mut self) -> Option<Draft> {
        self.draft.take()
    }
}

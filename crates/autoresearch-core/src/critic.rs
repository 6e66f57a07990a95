//! Critic stage: scores a draft against the retrieved sources.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};

use crate::error::ResearchError;
use crate::model::{AgentRole, LanguageModel, ModelRequest, StructuredError, generate_validated};
use crate::state::{Critique, Draft, SearchResult, source_payload};

const CRITIC_INSTRUCTIONS: &str = "\
You are a chief editor grading a research report strictly. Score it from 0 to 100 on factual \
grounding, completeness and clarity. Cross-check every claim against the supplied sources and \
penalise assertions the sources do not support; `unsupported_citations` lists cited URLs that \
were never retrieved. When the score is below the pass threshold, give specific, actionable \
feedback items the writer can fix.";

#[derive(Debug, Deserialize)]
struct CritiqueOutput {
    score: i64,
    #[serde(default)]
    feedback: Vec<String>,
}

pub struct CriticStage {
    model: Arc<dyn LanguageModel>,
    pass_threshold: u8,
    call_timeout: Duration,
}

impl CriticStage {
    pub fn new(model: Arc<dyn LanguageModel>, pass_threshold: u8, call_timeout: Duration) -> Self {
        Self {
            model,
            pass_threshold,
            call_timeout,
        }
    }

    #[instrument(name = "stage.critic", skip_all, fields(citations = draft.citations.len()))]
    pub async fn critique(
        &self,
        draft: &Draft,
        sources: &[SearchResult],
    ) -> Result<Critique, ResearchError> {
        let unsupported = unsupported_citations(draft, sources);

        let request = ModelRequest::new(
            AgentRole::Critic,
            CRITIC_INSTRUCTIONS,
            json!({
                "draft": draft,
                "sources": source_payload(sources),
                "unsupported_citations": unsupported,
                "pass_threshold": self.pass_threshold,
            }),
            json!({ "score": "integer 0-100", "feedback": ["specific actionable fix"] }),
        );

        let threshold = self.pass_threshold;
        let critique = generate_validated(self.model.as_ref(), request, self.call_timeout, |output| {
            validate_critique(output, threshold)
        })
        .await
        .map_err(|err| match err {
            StructuredError::Malformed(reason) => ResearchError::MalformedCritique(reason),
            StructuredError::Model(source) => ResearchError::model(AgentRole::Critic, source),
        })?;

        info!(
            score = critique.score(),
            verdict = ?critique.verdict(),
            feedback = critique.feedback().len(),
            unsupported = unsupported.len(),
            sources = sources.len(),
            "critic evaluated draft"
        );
        Ok(critique)
    }
}

/// Cited URLs that no retrieved source backs.
pub fn unsupported_citations<'a>(draft: &'a Draft, sources: &[SearchResult]) -> Vec<&'a str> {
    let known: HashSet<&str> = sources.iter().map(|s| s.url.as_str()).collect();
    draft
        .citations
        .iter()
        .map(String::as_str)
        .filter(|url| !known.contains(url))
        .collect()
}

fn validate_critique(output: CritiqueOutput, threshold: u8) -> Result<Critique, String> {
    let score = u8::try_from(output.score)
        .ok()
        .filter(|score| *score <= 100)
        .ok_or_else(|| format!("score {} is outside 0..=100", output.score))?;

    let feedback: Vec<String> = output
        .feedback
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect();

    let critique = Critique::new(score, feedback, threshold);
    if !critique.passed() && critique.feedback().is_empty() {
        return Err(format!(
            "score {score} rejects the draft but no feedback items were given"
        ));
    }
    Ok(critique)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use crate::state::{DraftSection, Verdict};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    struct Scripted {
        replies: Mutex<Vec<String>>,
        requests: Mutex<Vec<ModelRequest>>,
    }

    impl Scripted {
        fn new(replies: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl LanguageModel for Scripted {
        async fn complete(&self, request: &ModelRequest) -> Result<String, ModelError> {
            self.requests.lock().unwrap().push(request.clone());
            let mut replies = self.replies.lock().unwrap();
            if replies.is_empty() {
                return Err(ModelError::InvalidResponse("no reply scripted".into()));
            }
            Ok(replies.remove(0))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn draft() -> Draft {
        Draft {
            title: "Report".into(),
            sections: vec![DraftSection {
                heading: "Findings".into(),
                body: "Text".into(),
            }],
            citations: vec!["https://a.example".into(), "https://invented.example".into()],
        }
    }

    fn sources() -> Vec<SearchResult> {
        vec![SearchResult {
            query_id: "q1".into(),
            url: "https://a.example".into(),
            title: None,
            snippet: "fact".into(),
            retrieved_at: Utc::now(),
        }]
    }

    #[tokio::test]
    async fn verdict_comes_from_threshold_not_model() {
        let model = Scripted::new(&[r#"{"score": 85, "feedback": [], "status": "REJECT"}"#]);
        let critic = CriticStage::new(model, 80, Duration::from_secs(5));

        let critique = critic.critique(&draft(), &sources()).await.unwrap();
        assert_eq!(critique.verdict(), Verdict::Pass);
        assert_eq!(critique.score(), 85);
    }

    #[tokio::test]
    async fn unsupported_citations_are_sent_to_evaluator() {
        let model = Scripted::new(&[r#"{"score": 60, "feedback": ["remove invented source"]}"#]);
        let critic = CriticStage::new(model.clone(), 80, Duration::from_secs(5));

        let critique = critic.critique(&draft(), &sources()).await.unwrap();
        assert_eq!(critique.verdict(), Verdict::Reject);

        let requests = model.requests.lock().unwrap();
        assert_eq!(
            requests[0].input["unsupported_citations"],
            json!(["https://invented.example"])
        );
    }

    #[tokio::test]
    async fn reject_without_feedback_is_retried_then_fatal() {
        let model = Scripted::new(&[r#"{"score": 50, "feedback": []}"#, r#"{"score": 40}"#]);
        let critic = CriticStage::new(model.clone(), 80, Duration::from_secs(5));

        let err = critic.critique(&draft(), &sources()).await.unwrap_err();
        assert!(matches!(err, ResearchError::MalformedCritique(_)));
        assert_eq!(model.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn out_of_range_score_is_corrected_on_retry() {
        let model = Scripted::new(&[r#"{"score": 140}"#, r#"{"score": 90}"#]);
        let critic = CriticStage::new(model, 80, Duration::from_secs(5));

        let critique = critic.critique(&draft(), &sources()).await.unwrap();
        assert_eq!(critique.score(), 90);
    }

    #[tokio::test]
    async fn sources_are_sent_in_canonical_order() {
        let mut forward = sources();
        forward.push(SearchResult {
            url: "https://0.example".into(),
            ..forward[0].clone()
        });
        let mut backward = forward.clone();
        backward.reverse();

        let model = Scripted::new(&[r#"{"score": 90}"#, r#"{"score": 90}"#]);
        let critic = CriticStage::new(model.clone(), 80, Duration::from_secs(5));
        critic.critique(&draft(), &forward).await.unwrap();
        critic.critique(&draft(), &backward).await.unwrap();

        let requests = model.requests.lock().unwrap();
        assert_eq!(requests[0].input["sources"], requests[1].input["sources"]);
        assert_eq!(requests[0].input["sources"][0]["url"], "https://0.example");
    }

    #[test]
    fn negative_scores_are_malformed() {
        let err = validate_critique(
            CritiqueOutput {
                score: -5,
                feedback: vec!["x".into()],
            },
            80,
        )
        .unwrap_err();
        assert!(err.contains("outside"));
    }
}

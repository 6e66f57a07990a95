//! Planner stage: decomposes the user request into targeted search queries.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::config::PlannerConfig;
use crate::error::ResearchError;
use crate::model::{AgentRole, LanguageModel, ModelRequest, StructuredError, generate_validated};
use crate::state::ResearchQuery;

const PLANNER_INSTRUCTIONS: &str = "\
You are a lead research strategist. Given a user request, create a targeted research plan \
of distinct web search queries. Do not use generic queries; each query must cover a different \
aspect of the request (for example market size, technical limitations, key competitors) and \
must not overlap with the others.";

#[derive(Debug, Deserialize)]
struct PlanOutput {
    queries: Vec<String>,
}

pub struct PlannerStage {
    model: Arc<dyn LanguageModel>,
    config: PlannerConfig,
    call_timeout: Duration,
}

impl PlannerStage {
    pub fn new(model: Arc<dyn LanguageModel>, config: PlannerConfig, call_timeout: Duration) -> Self {
        Self {
            model,
            config,
            call_timeout,
        }
    }

    #[instrument(name = "stage.planner", skip(self))]
    pub async fn plan(&self, query: &str) -> Result<Vec<ResearchQuery>, ResearchError> {
        let request = ModelRequest::new(
            AgentRole::Planner,
            PLANNER_INSTRUCTIONS,
            json!({
                "request": query,
                "min_queries": self.config.min_queries,
                "max_queries": self.config.max_queries,
            }),
            json!({ "queries": ["non-empty search query string"] }),
        );

        let plan = generate_validated(self.model.as_ref(), request, self.call_timeout, |output| {
            validate_plan(output, &self.config)
        })
        .await
        .map_err(|err| match err {
            StructuredError::Malformed(reason) => ResearchError::MalformedPlan(reason),
            StructuredError::Model(source) => ResearchError::model(AgentRole::Planner, source),
        })?;

        info!(queries = plan.len(), "planner produced research plan");
        Ok(plan)
    }
}

fn validate_plan(output: PlanOutput, config: &PlannerConfig) -> Result<Vec<ResearchQuery>, String> {
    if output.queries.iter().any(|q| q.trim().is_empty()) {
        return Err("queries must be non-empty strings".to_string());
    }

    let mut seen = HashSet::new();
    let distinct: Vec<String> = output
        .queries
        .into_iter()
        .map(|q| q.trim().to_string())
        .filter(|q| seen.insert(q.to_lowercase()))
        .collect();

    if distinct.len() < config.min_queries {
        return Err(format!(
            "expected at least {} distinct queries, got {}",
            config.min_queries,
            distinct.len()
        ));
    }

    if distinct.len() > config.max_queries {
        warn!(
            returned = distinct.len(),
            max = config.max_queries,
            "planner returned too many queries; truncating"
        );
    }

    Ok(distinct
        .into_iter()
        .take(config.max_queries)
        .enumerate()
        .map(|(idx, text)| ResearchQuery::new(format!("q{}", idx + 1), text))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ModelError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Replies(Mutex<Vec<&'static str>>);

    #[async_trait]
    impl LanguageModel for Replies {
        async fn complete(&self, _request: &ModelRequest) -> Result<String, ModelError> {
            let mut replies = self.0.lock().unwrap();
            if replies.is_empty() {
                return Err(ModelError::InvalidResponse("no reply scripted".into()));
            }
            Ok(replies.remove(0).to_string())
        }

        fn name(&self) -> &str {
            "replies"
        }
    }

    fn stage(replies: Vec<&'static str>) -> PlannerStage {
        PlannerStage::new(
            Arc::new(Replies(Mutex::new(replies))),
            PlannerConfig::default(),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn plan_assigns_sequential_ids() {
        let planner = stage(vec![r#"{"queries": ["market size", "limitations", "competitors"]}"#]);
        let plan = planner.plan("solid state batteries").await.unwrap();

        let ids: Vec<&str> = plan.iter().map(ResearchQuery::id).collect();
        assert_eq!(ids, vec!["q1", "q2", "q3"]);
        assert_eq!(plan[2].text(), "competitors");
    }

    #[tokio::test]
    async fn duplicates_are_collapsed_and_extras_truncated() {
        let planner = stage(vec![
            r#"{"queries": ["A", "a ", "b", "c", "d", "e", "f", "g"]}"#,
        ]);
        let plan = planner.plan("topic").await.unwrap();

        let texts: Vec<&str> = plan.iter().map(ResearchQuery::text).collect();
        assert_eq!(texts, vec!["A", "b", "c", "d", "e"]);
    }

    #[tokio::test]
    async fn malformed_plan_gets_one_corrective_retry() {
        let planner = stage(vec![
            r#"{"queries": ["only one"]}"#,
            r#"{"queries": ["one", "two", "three"]}"#,
        ]);
        let plan = planner.plan("topic").await.unwrap();
        assert_eq!(plan.len(), 3);
    }

    #[tokio::test]
    async fn persistent_malformation_is_malformed_plan() {
        let planner = stage(vec![r#"{"queries": ["", "x", "y"]}"#, r#"{"plan": []}"#]);
        let err = planner.plan("topic").await.unwrap_err();
        assert!(matches!(err, ResearchError::MalformedPlan(_)));
    }
}

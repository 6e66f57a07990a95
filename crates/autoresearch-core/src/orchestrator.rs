//! Cyclic orchestration graph driving a research session to a terminal state.
//!
//! The topology is fixed:
//!
//! ```text
//! Planning → Researching → Writing → Critiquing ─┬─→ Done
//!                             ▲                  │
//!                             └──── Revising ◄───┘
//! ```
//!
//! plus `Failed`, reachable from every non-terminal state. Each transition is
//! one call to [`ResearchGraph::step`]; the only conditional edge is decided
//! by the pure [`route`] function so the revision bound lives in one place.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{Instrument, error, info, info_span};
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::critic::CriticStage;
use crate::error::ResearchError;
use crate::events::{EventCollector, ProgressEvent};
use crate::metrics;
use crate::model::LanguageModel;
use crate::planner::PlannerStage;
use crate::researcher::ResearcherStage;
use crate::search::{ResilientSearchClient, SearchFailure, SearchProvider};
use crate::state::{Critique, Draft, SearchResult, SharedResearchState};
use crate::trace::{TraceCollector, TraceEvent, TraceSummary};
use crate::writer::WriterStage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GraphState {
    Planning,
    Researching,
    Writing,
    Critiquing,
    Revising,
    Done,
    Failed,
}

impl GraphState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GraphState::Planning => "planning",
            GraphState::Researching => "researching",
            GraphState::Writing => "writing",
            GraphState::Critiquing => "critiquing",
            GraphState::Revising => "revising",
            GraphState::Done => "done",
            GraphState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, GraphState::Done | GraphState::Failed)
    }
}

/// Outcome of the conditional edge leaving `Critiquing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    /// Critic passed the draft.
    Approve,
    /// Rejected, but the revision budget is spent.
    Exhausted,
    /// Rejected with budget left: loop back to the writer.
    Revise,
}

pub fn route(critique: &Critique, revision: u32, max_revisions: u32) -> RouteDecision {
    if critique.passed() {
        RouteDecision::Approve
    } else if revision >= max_revisions {
        RouteDecision::Exhausted
    } else {
        RouteDecision::Revise
    }
}

/// Successful terminal result, possibly unapproved when revisions ran out.
#[derive(Debug, Clone, Serialize)]
pub struct FinalReport {
    pub session_id: String,
    pub query: String,
    pub draft: Draft,
    /// `false` when the session ended on the revision limit rather than a pass.
    pub approved: bool,
    pub revisions: u32,
    pub critique: Option<Critique>,
    pub sources: Vec<SearchResult>,
    pub failed_queries: Vec<SearchFailure>,
    pub trace: Vec<TraceEvent>,
}

impl FinalReport {
    pub fn trace_summary(&self) -> TraceSummary {
        TraceSummary::from_events(&self.trace)
    }

    pub fn render_markdown(&self) -> String {
        let mut output = String::new();
        if !self.approved {
            let score = self
                .critique
                .as_ref()
                .map(|c| c.score().to_string())
                .unwrap_or_else(|| "n/a".to_string());
            output.push_str(&format!(
                "> **Unapproved draft:** revision limit reached after {} revision(s); last critic score {}.\n\n",
                self.revisions, score
            ));
        }
        if !self.failed_queries.is_empty() {
            output.push_str(&format!(
                "> Partial coverage: {} planned search(es) returned no data.\n\n",
                self.failed_queries.len()
            ));
        }
        output.push_str(&self.draft.render_markdown());
        output
    }
}

/// Hard-failure terminal result.
#[derive(Debug, Serialize)]
pub struct FailureReport {
    pub session_id: String,
    pub query: String,
    /// State the session was in when the error occurred.
    pub failed_in: GraphState,
    pub kind: &'static str,
    pub reason: String,
    pub revisions: u32,
    pub trace: Vec<TraceEvent>,
    #[serde(skip)]
    pub error: ResearchError,
}

impl FailureReport {
    pub fn trace_summary(&self) -> TraceSummary {
        TraceSummary::from_events(&self.trace)
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionOutcome {
    Completed(FinalReport),
    Failed(FailureReport),
}

impl SessionOutcome {
    pub fn session_id(&self) -> &str {
        match self {
            SessionOutcome::Completed(report) => &report.session_id,
            SessionOutcome::Failed(report) => &report.session_id,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, SessionOutcome::Completed(_))
    }

    pub fn trace(&self) -> &[TraceEvent] {
        match self {
            SessionOutcome::Completed(report) => &report.trace,
            SessionOutcome::Failed(report) => &report.trace,
        }
    }
}

/// Options for running a research session.
#[derive(Debug, Clone)]
pub struct SessionOptions<'a> {
    pub query: &'a str,
    pub session_id: Option<String>,
    /// Per-session override of `SessionConfig::max_revisions`.
    pub max_revisions: Option<u32>,
}

impl<'a> SessionOptions<'a> {
    pub fn new(query: &'a str) -> Self {
        Self {
            query,
            session_id: None,
            max_revisions: None,
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_max_revisions(mut self, max_revisions: u32) -> Self {
        self.max_revisions = Some(max_revisions);
        self
    }
}

/// The planner → researcher → writer ⇄ critic graph.
pub struct ResearchGraph {
    config: SessionConfig,
    planner: PlannerStage,
    researcher: ResearcherStage,
    writer: WriterStage,
    critic: CriticStage,
    events: EventCollector,
}

impl ResearchGraph {
    pub fn new(
        model: Arc<dyn LanguageModel>,
        search: Arc<dyn SearchProvider>,
        config: SessionConfig,
    ) -> Self {
        let call_timeout = config.call_timeout();
        let client = ResilientSearchClient::new(
            search,
            config.retry.clone(),
            call_timeout,
            config.research.max_results_per_query,
        );

        Self {
            planner: PlannerStage::new(model.clone(), config.planner.clone(), call_timeout),
            researcher: ResearcherStage::new(client, config.research.concurrency),
            writer: WriterStage::new(model.clone(), call_timeout),
            critic: CriticStage::new(model, config.pass_threshold, call_timeout),
            events: EventCollector::disabled(),
            config,
        }
    }

    /// Stream progress events to `events` for every session run on this graph.
    pub fn with_events(mut self, events: EventCollector) -> Self {
        self.events = events;
        self
    }

    /// Run one session end-to-end with default options.
    pub async fn run_session(&self, query: &str) -> SessionOutcome {
        self.run_session_with_options(SessionOptions::new(query)).await
    }

    /// Run one session end-to-end. Always terminates in `Done` or `Failed`.
    pub async fn run_session_with_options(&self, options: SessionOptions<'_>) -> SessionOutcome {
        let started = Instant::now();
        let session_id = options
            .session_id
            .unwrap_or_else(|| format!("session-{}", Uuid::new_v4()));
        let max_revisions = options.max_revisions.unwrap_or(self.config.max_revisions);

        let mut state = SharedResearchState::new(session_id.clone(), options.query.trim());
        let mut trace = TraceCollector::new();
        let mut current = GraphState::Planning;

        if state.query().is_empty() {
            return self.fail(state, current, ResearchError::EmptyQuery, trace, started);
        }

        let timeout = self.config.session_timeout();
        let span = info_span!("session", session_id = %session_id);
        let driven = tokio::time::timeout(
            timeout,
            self.drive(&mut current, &mut state, &mut trace, max_revisions),
        )
        .instrument(span)
        .await;

        let result = match driven {
            Ok(result) => result,
            Err(_) => Err(ResearchError::Timeout(timeout)),
        };

        match result {
            Ok(()) => self.complete(state, trace, started),
            Err(err) => self.fail(state, current, err, trace, started),
        }
    }

    async fn drive(
        &self,
        current: &mut GraphState,
        state: &mut SharedResearchState,
        trace: &mut TraceCollector,
        max_revisions: u32,
    ) -> Result<(), ResearchError> {
        while !current.is_terminal() {
            *current = self.step(*current, state, trace, max_revisions).await?;
        }
        Ok(())
    }

    /// Execute the work of `current` and return the next state.
    pub async fn step(
        &self,
        current: GraphState,
        state: &mut SharedResearchState,
        trace: &mut TraceCollector,
        max_revisions: u32,
    ) -> Result<GraphState, ResearchError> {
        let session_id = state.session_id().to_string();

        match current {
            GraphState::Planning => {
                self.events.emit(ProgressEvent::PlanningStarted {
                    session_id: session_id.clone(),
                    query: state.query().to_string(),
                });
                let plan = self.planner.plan(state.query()).await?;

                trace.record(current, format!("{} queries planned", plan.len()));
                self.events.emit(ProgressEvent::PlanReady {
                    session_id,
                    queries: plan.iter().map(|q| q.text().to_string()).collect(),
                });
                state.set_plan(plan);
                Ok(GraphState::Researching)
            }
            GraphState::Researching => {
                let output = self.researcher.research(state.plan()).await?;

                trace.record(
                    current,
                    format!(
                        "{} sources, {} failed queries",
                        output.results.len(),
                        output.failures.len()
                    ),
                );
                self.events.emit(ProgressEvent::ResearchComplete {
                    session_id,
                    sources: output.results.len(),
                    failed_queries: output.failures.len(),
                });
                state.record_research(output.results, output.failures);
                Ok(GraphState::Writing)
            }
            GraphState::Writing => {
                let draft = self.writer.write(state).await?;

                trace.record(
                    current,
                    format!(
                        "revision {}: \"{}\" with {} citations",
                        state.revision(),
                        draft.title,
                        draft.citations.len()
                    ),
                );
                self.events.emit(ProgressEvent::DraftReady {
                    session_id,
                    revision: state.revision(),
                });
                state.replace_draft(draft);
                Ok(GraphState::Critiquing)
            }
            GraphState::Critiquing => {
                let Some(draft) = state.draft() else {
                    return Err(ResearchError::MalformedDraft(
                        "no draft available for critique".to_string(),
                    ));
                };
                let critique = self.critic.critique(draft, state.results()).await?;
                let decision = route(&critique, state.revision(), max_revisions);

                trace.record(
                    current,
                    format!("score {} → {:?}", critique.score(), decision),
                );
                let event = match decision {
                    RouteDecision::Approve => ProgressEvent::DraftApproved {
                        session_id,
                        score: critique.score(),
                        revision: state.revision(),
                    },
                    RouteDecision::Exhausted | RouteDecision::Revise => {
                        ProgressEvent::DraftRejected {
                            session_id,
                            score: critique.score(),
                            revision: state.revision(),
                            feedback_items: critique.feedback().len(),
                        }
                    }
                };
                self.events.emit(event);
                state.record_critique(critique);

                Ok(match decision {
                    RouteDecision::Revise => GraphState::Revising,
                    RouteDecision::Approve | RouteDecision::Exhausted => GraphState::Done,
                })
            }
            GraphState::Revising => match state.advance_revision(max_revisions) {
                Some(revision) => {
                    trace.record(current, format!("starting revision {revision}"));
                    Ok(GraphState::Writing)
                }
                None => Ok(GraphState::Done),
            },
            GraphState::Done | GraphState::Failed => Ok(current),
        }
    }

    fn complete(
        &self,
        mut state: SharedResearchState,
        mut trace: TraceCollector,
        started: Instant,
    ) -> SessionOutcome {
        let Some(draft) = state.take_draft() else {
            let err = ResearchError::MalformedDraft("session finished without a draft".into());
            return self.fail(state, GraphState::Done, err, trace, started);
        };

        let critique = state.critique().cloned();
        let approved = critique.as_ref().is_some_and(Critique::passed);
        let revisions = state.revision();

        trace.record(
            GraphState::Done,
            if approved {
                "report approved".to_string()
            } else {
                "revision limit reached; report unapproved".to_string()
            },
        );
        self.events.emit(ProgressEvent::FinalReportReady {
            session_id: state.session_id().to_string(),
            approved,
            revisions,
        });

        let duration_ms = started.elapsed().as_millis() as u64;
        metrics::record_session(
            if approved { "approved" } else { "unapproved" },
            revisions,
            duration_ms,
        );
        info!(
            session_id = state.session_id(),
            approved,
            revisions,
            duration_ms,
            "research session completed"
        );

        SessionOutcome::Completed(FinalReport {
            session_id: state.session_id().to_string(),
            query: state.query().to_string(),
            draft,
            approved,
            revisions,
            critique,
            sources: state.results().to_vec(),
            failed_queries: state.failures().to_vec(),
            trace: trace.into_events(),
        })
    }

    fn fail(
        &self,
        state: SharedResearchState,
        failed_in: GraphState,
        err: ResearchError,
        mut trace: TraceCollector,
        started: Instant,
    ) -> SessionOutcome {
        let reason = err.to_string();

        trace.record(GraphState::Failed, format!("{} failed: {reason}", failed_in.as_str()));
        self.events.emit(ProgressEvent::SessionFailed {
            session_id: state.session_id().to_string(),
            reason: reason.clone(),
        });

        let duration_ms = started.elapsed().as_millis() as u64;
        metrics::record_session("failed", state.revision(), duration_ms);
        error!(
            session_id = state.session_id(),
            state = failed_in.as_str(),
            kind = err.kind(),
            %reason,
            "research session failed"
        );

        SessionOutcome::Failed(FailureReport {
            session_id: state.session_id().to_string(),
            query: state.query().to_string(),
            failed_in,
            kind: err.kind(),
            reason,
            revisions: state.revision(),
            trace: trace.into_events(),
            error: err,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pass_always_approves() {
        let critique = Critique::new(90, vec![], 80);
        assert_eq!(route(&critique, 0, 3), RouteDecision::Approve);
        assert_eq!(route(&critique, 3, 3), RouteDecision::Approve);
    }

    #[test]
    fn reject_revises_until_bound() {
        let critique = Critique::new(60, vec!["more sources".into()], 80);
        assert_eq!(route(&critique, 0, 3), RouteDecision::Revise);
        assert_eq!(route(&critique, 2, 3), RouteDecision::Revise);
        assert_eq!(route(&critique, 3, 3), RouteDecision::Exhausted);
        assert_eq!(route(&critique, 0, 0), RouteDecision::Exhausted);
    }

    #[test]
    fn graph_can_be_shared_across_sessions() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ResearchGraph>();
    }

    #[test]
    fn terminal_states() {
        assert!(GraphState::Done.is_terminal());
        assert!(GraphState::Failed.is_terminal());
        assert!(!GraphState::Revising.is_terminal());
    }

    #[test]
    fn unapproved_report_is_annotated() {
        let report = FinalReport {
            session_id: "s".into(),
            query: "q".into(),
            draft: Draft {
                title: "T".into(),
                sections: vec![],
                citations: vec!["https://a.example".into()],
            },
            approved: false,
            revisions: 3,
            critique: Some(Critique::new(70, vec!["x".into()], 80)),
            sources: vec![],
            failed_queries: vec![],
            trace: vec![],
        };
        let markdown = report.render_markdown();
        assert!(markdown.starts_with("> **Unapproved draft:**"));
        assert!(markdown.contains("last critic score 70"));
    }
}

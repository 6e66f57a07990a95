//! AutoResearch core: a cyclic multi-agent research pipeline.
//!
//! A session moves through an explicit state graph. The planner decomposes
//! the request into search queries, the researcher fans them out against a
//! search provider with retry, the writer drafts a cited report and the critic
//! scores it, looping back to the writer until the draft passes or the
//! revision budget is spent.

mod config;
mod critic;
mod error;
mod events;
mod metrics;
mod model;
mod orchestrator;
mod planner;
pub mod providers;
mod researcher;
mod search;
mod security;
mod state;
mod telemetry;
mod trace;
mod writer;

pub use config::{
    Config, ConfigLoader, LlmConfig, LoggingConfig, PlannerConfig, ResearchConfig, RetryConfig,
    SearchConfig, SessionConfig,
};
pub use critic::{CriticStage, unsupported_citations};
pub use error::{ModelError, ResearchError, SearchError};
pub use events::{EventCollector, EventEnvelope, ProgressEvent};
pub use metrics::{init_metrics_from_env, record_search_attempt, record_session};
pub use model::{
    AgentRole, LanguageModel, ModelRequest, StructuredError, extract_json, generate_structured,
    generate_validated,
};
pub use orchestrator::{
    FailureReport, FinalReport, GraphState, ResearchGraph, RouteDecision, SessionOptions,
    SessionOutcome, route,
};
pub use planner::PlannerStage;
pub use researcher::{ResearchOutput, ResearcherStage};
pub use search::{
    JITTER_FRACTION, ResilientSearchClient, SearchFailure, SearchHit, SearchProvider,
    backoff_delay,
};
pub use security::{SecretValue, redact, require_env};
pub use state::{
    Critique, Draft, DraftSection, ResearchQuery, SearchResult, SharedResearchState, Verdict,
};
pub use telemetry::{TelemetryOptions, init_telemetry};
pub use trace::{TraceCollector, TraceEvent, TraceStep, TraceSummary, persist_trace};
pub use writer::WriterStage;

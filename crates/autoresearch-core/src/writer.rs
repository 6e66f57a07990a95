//! Writer stage: synthesizes a cited report draft from aggregated research.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::error::ResearchError;
use crate::model::{AgentRole, LanguageModel, ModelRequest, StructuredError, generate_validated};
use crate::state::{Draft, DraftSection, SharedResearchState, source_payload};

const WRITER_INSTRUCTIONS: &str = "\
You are a senior technical writer. Write a comprehensive report answering the request, using \
only the supplied sources. Synthesize the research into a narrative rather than listing facts. \
If the research lacks information for a section, state \"Data not found\". Cite sources inline \
using [URL] and list every cited URL in `citations`; each factual claim category must carry at \
least one citation.";

const REVISION_INSTRUCTIONS: &str = "\
This is a revision. The previous draft was rejected by the editor. Address every item in \
`critique.feedback` explicitly; do not drop supported content that was not criticised.";

#[derive(Debug, Deserialize)]
struct DraftOutput {
    title: String,
    sections: Vec<SectionOutput>,
    citations: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SectionOutput {
    heading: String,
    body: String,
}

pub struct WriterStage {
    model: Arc<dyn LanguageModel>,
    call_timeout: Duration,
}

impl WriterStage {
    pub fn new(model: Arc<dyn LanguageModel>, call_timeout: Duration) -> Self {
        Self {
            model,
            call_timeout,
        }
    }

    /// Produce a draft for the current state.
    ///
    /// At revision 0 only the query and sources are used; later revisions
    /// also carry the latest critique's feedback.
    #[instrument(
        name = "stage.writer",
        skip_all,
        fields(session_id = state.session_id(), revision = state.revision())
    )]
    pub async fn write(&self, state: &SharedResearchState) -> Result<Draft, ResearchError> {
        let revising = state.revision() > 0;
        let mut input = json!({
            "request": state.query(),
            "sources": source_payload(state.results()),
        });

        let mut instructions = WRITER_INSTRUCTIONS.to_string();
        if revising {
            if let Some(critique) = state.critique() {
                input["critique"] = json!({
                    "score": critique.score(),
                    "feedback": critique.feedback(),
                });
                instructions.push_str("\n\n");
                instructions.push_str(REVISION_INSTRUCTIONS);
            }
        }

        let request = ModelRequest::new(
            AgentRole::Writer,
            instructions,
            input,
            json!({
                "title": "string",
                "sections": [{ "heading": "string", "body": "markdown string" }],
                "citations": ["source url"],
            }),
        );

        let known: HashSet<&str> = state.results().iter().map(|r| r.url.as_str()).collect();
        let draft = generate_validated(self.model.as_ref(), request, self.call_timeout, validate_draft)
            .await
            .map_err(|err| match err {
                StructuredError::Malformed(reason) => ResearchError::MalformedDraft(reason),
                StructuredError::Model(source) => ResearchError::model(AgentRole::Writer, source),
            })?;

        let unknown = draft
            .citations
            .iter()
            .filter(|url| !known.contains(url.as_str()))
            .count();
        if unknown > 0 {
            warn!(unknown, "draft cites urls that were not retrieved");
        }

        info!(
            sections = draft.sections.len(),
            citations = draft.citations.len(),
            revising,
            "writer produced draft"
        );
        Ok(draft)
    }
}

fn validate_draft(output: DraftOutput) -> Result<Draft, String> {
    let title = output.title.trim().to_string();
    if title.is_empty() {
        return Err("title must not be empty".to_string());
    }
    if output.sections.is_empty() {
        return Err("draft body must contain at least one section".to_string());
    }
    if let Some(section) = output.sections.iter().find(|s| s.body.trim().is_empty()) {
        return Err(format!("section \"{}\" has an empty body", section.heading));
    }

    let mut seen = HashSet::new();
    let citations: Vec<String> = output
        .citations
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty() && seen.insert(c.clone()))
        .collect();
    if citations.is_empty() {
        return Err("citations must list at least one source url".to_string());
    }

    Ok(Draft {
        title,
        sections: output
            .sections
            .into_iter()
            .map(|s| DraftSection {
                heading: s.heading.trim().to_string(),
                body: s.body,
            })
            .collect(),
        citations,
    })
}

use std::fmt::Write as _;
use std::fs::{File, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::orchestrator::GraphState;

/// One recorded state transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEvent {
    pub state: GraphState,
    pub message: String,
    pub timestamp_ms: u128,
}

impl TraceEvent {
    pub fn new(state: GraphState, message: impl Into<String>) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Self {
            state,
            message: message.into(),
            timestamp_ms,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceCollector {
    events: Vec<TraceEvent>,
}

impl TraceCollector {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn record(&mut self, state: GraphState, message: impl Into<String>) {
        self.events.push(TraceEvent::new(state, message));
    }

    pub fn into_events(self) -> Vec<TraceEvent> {
        self.events
    }

    pub fn summary(&self) -> TraceSummary {
        TraceSummary::from_events(&self.events)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStep {
    pub index: usize,
    pub state: GraphState,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceSummary {
    pub steps: Vec<TraceStep>,
}

impl TraceSummary {
    pub fn from_events(events: &[TraceEvent]) -> Self {
        let steps = events
            .iter()
            .enumerate()
            .map(|(idx, event)| TraceStep {
                index: idx + 1,
                state: event.state,
                message: event.message.clone(),
            })
            .collect();
        Self { steps }
    }

    /// Sequence of visited states, in order.
    pub fn states(&self) -> Vec<GraphState> {
        self.steps.iter().map(|step| step.state).collect()
    }

    pub fn render_markdown(&self) -> String {
        if self.steps.is_empty() {
            return "No trace events recorded.".to_string();
        }
        let mut output = String::from("### Session Trace\n");
        for step in &self.steps {
            let _ = writeln!(
                output,
                "{}. {} → {}",
                step.index,
                step.state.as_str(),
                step.message
            );
        }
        output
    }

    pub fn render_mermaid(&self) -> String {
        if self.steps.is_empty() {
            return "flowchart TD\n  %% no trace events captured".to_string();
        }

        let mut output = String::from("flowchart TD\n  %% auto-generated session trace\n");
        for step in &self.steps {
            let label = sanitize_mermaid(&format!("{}: {}", step.state.as_str(), step.message));
            let _ = writeln!(output, "  step{}[\"{label}\"]", step.index);
        }

        for idx in 1..self.steps.len() {
            let _ = writeln!(output, "  step{idx} --> step{}", idx + 1);
        }

        output
    }
}

fn sanitize_mermaid(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('[', "(")
        .replace(']', ")")
        .replace('\n', "<br/>")
}

/// Write the session trace as pretty JSON to `<dir>/<session_id>.json`.
pub fn persist_trace<P: AsRef<Path>>(
    dir: P,
    session_id: &str,
    events: &[TraceEvent],
) -> Result<PathBuf> {
    let dir = dir.as_ref();
    create_dir_all(dir)
        .with_context(|| format!("failed to create trace directory {}", dir.display()))?;
    let path = dir.join(format!("{session_id}.json"));
    let payload = serde_json::to_vec_pretty(events)?;
    let mut file = File::create(&path)
        .with_context(|| format!("failed to create trace file {}", path.display()))?;
    file.write_all(&payload)
        .with_context(|| format!("failed to write trace file {}", path.display()))?;
    Ok(path)
}

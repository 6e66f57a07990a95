//! Researcher stage: concurrent fan-out of planned queries.

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::error::ResearchError;
use crate::search::{ResilientSearchClient, SearchFailure};
use crate::state::{ResearchQuery, SearchResult};

/// Aggregated research for one plan.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ResearchOutput {
    /// Results in completion order; consumers must not rely on the ordering.
    pub results: Vec<SearchResult>,
    pub failures: Vec<SearchFailure>,
}

pub struct ResearcherStage {
    client: ResilientSearchClient,
    concurrency: usize,
}

impl ResearcherStage {
    pub fn new(client: ResilientSearchClient, concurrency: usize) -> Self {
        Self {
            client,
            concurrency: concurrency.max(1),
        }
    }

    /// Run every planned query and aggregate what comes back.
    ///
    /// Failed queries degrade coverage but do not abort the stage; only a
    /// plan that yields no results at all is fatal.
    #[instrument(name = "stage.researcher", skip_all, fields(queries = plan.len()))]
    pub async fn research(&self, plan: &[ResearchQuery]) -> Result<ResearchOutput, ResearchError> {
        let mut settled = stream::iter(plan)
            .map(|query| self.client.search(query))
            .buffer_unordered(self.concurrency);

        let mut output = ResearchOutput::default();
        while let Some(outcome) = settled.next().await {
            match outcome {
                Ok(results) => output.results.extend(results),
                Err(failure) => output.failures.push(failure),
            }
        }

        if output.results.is_empty() {
            warn!(
                failed = output.failures.len(),
                planned = plan.len(),
                "research produced no usable sources"
            );
            return Err(ResearchError::NoResearchData {
                planned_queries: plan.len(),
                failed_queries: output.failures.len(),
            });
        }

        info!(
            sources = output.results.len(),
            failed = output.failures.len(),
            "research aggregated"
        );
        Ok(output)
    }
}

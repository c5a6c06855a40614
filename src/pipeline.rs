//! Search → fetch → classify → export, in that order.

use crate::classifier::classify;
use crate::error::Result;
use crate::export::{export, Destination};
use crate::models::ClassifiedPaper;
use crate::pubmed::{DroppedRecord, PubMedClient};
use crate::query::SearchQuery;
use tracing::info;

/// Options for one pipeline run
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub query: SearchQuery,
    pub destination: Destination,
    /// Export every fetched paper instead of only flagged ones
    pub include_all: bool,
}

/// What a run produced
#[derive(Debug, Default)]
pub struct RunSummary {
    /// PMIDs returned by the search
    pub found: usize,
    /// Records successfully fetched and parsed
    pub fetched: usize,
    /// Papers with at least one company-affiliated author
    pub flagged: usize,
    /// Rows written to the destination
    pub exported: usize,
    pub dropped: Vec<DroppedRecord>,
}

/// Fetch, classify and filter papers for `query` without writing anything
pub async fn collect(
    client: &PubMedClient,
    query: &SearchQuery,
    include_all: bool,
) -> Result<(Vec<ClassifiedPaper>, RunSummary)> {
    let mut summary = RunSummary::default();

    let ids = client.search(query).await?;
    summary.found = ids.len();
    if ids.is_empty() {
        info!(query = query.term(), "No papers found");
        return Ok((Vec::new(), summary));
    }

    let outcome = client.fetch(&ids).await?;
    summary.fetched = outcome.papers.len();
    summary.dropped = outcome.dropped;

    let classified: Vec<ClassifiedPaper> = outcome.papers.iter().map(classify).collect();
    summary.flagged = classified.iter().filter(|c| c.has_company_affiliation).count();
    info!(
        fetched = summary.fetched,
        flagged = summary.flagged,
        "Classified papers"
    );

    let rows: Vec<ClassifiedPaper> = if include_all {
        classified
    } else {
        classified
            .into_iter()
            .filter(|c| c.has_company_affiliation)
            .collect()
    };
    summary.exported = rows.len();

    Ok((rows, summary))
}

/// Run the full pipeline and write the CSV
pub async fn run(client: &PubMedClient, options: &PipelineOptions) -> Result<RunSummary> {
    let (rows, summary) = collect(client, &options.query, options.include_all).await?;
    export(&rows, &options.destination)?;
    Ok(summary)
}

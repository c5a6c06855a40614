//! get-papers-list - PubMed company-affiliation finder
//!
//! Searches PubMed, fetches the matching records and exports the papers that
//! have at least one author affiliated with a pharmaceutical or biotech
//! company.
//!
//! ## Usage
//!
//! ```bash
//! get-papers-list "cancer immunotherapy[Title/Abstract]" --file results.csv
//! get-papers-list "diabetes[MeSH Terms]" --mindate 2020 --maxdate 2024 --debug
//! ```

use anyhow::Result;
use clap::Parser;
use get_papers_list::pipeline::{self, PipelineOptions};
use get_papers_list::pubmed::EUTILS_BASE_URL;
use get_papers_list::query::{DateType, DEFAULT_MAX_RESULTS};
use get_papers_list::{ClientConfig, Destination, PapersError, PubMedClient, SearchQuery};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, Level};
use tracing_subscriber::{fmt, EnvFilter};

// ============================================================================
// CLI Definition
// ============================================================================

/// Find PubMed papers with authors from pharmaceutical/biotech companies
#[derive(Parser)]
#[command(name = "get-papers-list")]
#[command(version, about, long_about = None)]
struct Cli {
    /// PubMed search query (e.g. "cancer treatment[Title/Abstract]")
    query: String,

    /// Write CSV to this file instead of standard output
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Print debug information to standard error
    #[arg(short, long)]
    debug: bool,

    /// Maximum number of papers to fetch
    #[arg(long, default_value_t = DEFAULT_MAX_RESULTS)]
    max_results: usize,

    /// Contact e-mail sent to NCBI with every request
    #[arg(long, env = "NCBI_EMAIL")]
    email: Option<String>,

    /// NCBI API key (raises the rate limit from 3 to 10 requests/second)
    #[arg(long, env = "NCBI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Start of date range (YYYY, YYYY/MM or YYYY/MM/DD)
    #[arg(long, requires = "maxdate")]
    mindate: Option<String>,

    /// End of date range (YYYY, YYYY/MM or YYYY/MM/DD)
    #[arg(long, requires = "mindate")]
    maxdate: Option<String>,

    /// Date field the range applies to
    #[arg(long, default_value = "pdat", value_parser = ["pdat", "edat", "mdat"])]
    datetype: String,

    /// Export every fetched paper, not only those with company authors
    #[arg(long)]
    all: bool,

    /// E-utilities base URL
    #[arg(long, env = "NCBI_EUTILS_URL", default_value = EUTILS_BASE_URL, hide = true)]
    base_url: String,
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.debug { Level::DEBUG } else { Level::WARN };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,get_papers_list={}", log_level)));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

/// Exit code for a failed run: the `PapersError` mapping, 1 for anything else
fn exit_code(error: &anyhow::Error) -> u8 {
    error
        .downcast_ref::<PapersError>()
        .map(PapersError::exit_code)
        .unwrap_or(1)
}

async fn run(cli: Cli) -> Result<()> {
    let mut query = SearchQuery::new(cli.query)?.max_results(cli.max_results);
    if let (Some(min), Some(max)) = (&cli.mindate, &cli.maxdate) {
        let date_type: DateType = cli.datetype.parse()?;
        query = query.date_range(min, max, date_type)?;
    }

    let config = ClientConfig::default()
        .with_base_url(cli.base_url)
        .with_email(cli.email)
        .with_api_key(cli.api_key);
    let client = PubMedClient::new(config)?;

    let options = PipelineOptions {
        query,
        destination: Destination::from(cli.file),
        include_all: cli.all,
    };

    let summary = pipeline::run(&client, &options).await?;
    debug!(
        found = summary.found,
        fetched = summary.fetched,
        flagged = summary.flagged,
        dropped = summary.dropped.len(),
        "Pipeline complete"
    );

    if let Destination::File(path) = &options.destination {
        println!("Saved {} papers to {}", summary.exported, path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_exit_code_follows_papers_error() {
        let usage = anyhow::Error::from(PapersError::InvalidQuery("empty".into()));
        assert_eq!(exit_code(&usage), 2);

        let runtime = anyhow::Error::from(PapersError::RateLimited(Some(1)));
        assert_eq!(exit_code(&runtime), 1);
    }

    #[test]
    fn test_exit_code_survives_context() {
        let result: std::result::Result<(), PapersError> =
            Err(PapersError::InvalidQuery("bad date".into()));
        let err = result.context("building query").expect_err("context keeps the error");
        assert_eq!(exit_code(&err), 2);
    }

    #[test]
    fn test_exit_code_for_foreign_error() {
        assert_eq!(exit_code(&anyhow::anyhow!("something else")), 1);
    }

    #[test]
    fn test_missing_query_is_usage_error() {
        let err = Cli::try_parse_from(["get-papers-list"]).err();
        assert_eq!(err.map(|e| e.exit_code()), Some(2));
    }

    #[test]
    fn test_mindate_requires_maxdate() {
        let err = Cli::try_parse_from(["get-papers-list", "x", "--mindate", "2020"]).err();
        assert_eq!(err.map(|e| e.exit_code()), Some(2));
    }
}

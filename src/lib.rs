//! # get-papers-list
//!
//! Search PubMed and flag papers with authors from pharmaceutical or biotech
//! companies.
//!
//! ## Modules
//!
//! - [`query`] - ESearch query construction
//! - [`pubmed`] - E-utilities client (ESearch, EFetch)
//! - [`efetch`] - EFetch XML parsing
//! - [`classifier`] - Affiliation heuristic
//! - [`export`] - CSV output
//! - [`pipeline`] - Orchestration used by the CLI
//! - [`error`] - Custom error types
//!
//! ## Usage
//!
//! ```rust,no_run
//! use get_papers_list::{pipeline, ClientConfig, PubMedClient, SearchQuery};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = PubMedClient::new(ClientConfig::default())?;
//!     let query = SearchQuery::new("cancer immunotherapy")?.max_results(20);
//!     let (papers, _) = pipeline::collect(&client, &query, false).await?;
//!     println!("{} papers with company authors", papers.len());
//!     Ok(())
//! }
//! ```

pub mod classifier;
pub mod efetch;
pub mod error;
pub mod export;
pub mod models;
pub mod pipeline;
pub mod pubmed;
pub mod query;

pub use error::{PapersError, Result};
pub use export::Destination;
pub use models::{AuthorRecord, ClassifiedPaper, PaperRecord, PublicationDate};
pub use pubmed::{ClientConfig, PubMedClient};
pub use query::SearchQuery;

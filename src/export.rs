//! CSV export of classified papers.

use crate::error::Result;
use crate::models::ClassifiedPaper;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

/// Fixed CSV header
pub const CSV_COLUMNS: &[&str] = &[
    "PubmedID",
    "Title",
    "PublicationDate",
    "NonAcademicAuthors",
    "CompanyAffiliations",
    "CorrespondingAuthorEmail",
];

/// Separator for multi-valued cells
const LIST_SEPARATOR: &str = "; ";

/// Where the CSV goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Stdout,
    File(PathBuf),
}

impl From<Option<PathBuf>> for Destination {
    fn from(path: Option<PathBuf>) -> Self {
        path.map(Destination::File).unwrap_or(Destination::Stdout)
    }
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    pubmed_id: &'a str,
    title: &'a str,
    publication_date: String,
    non_academic_authors: String,
    company_affiliations: String,
    corresponding_author_email: &'a str,
}

impl<'a> From<&'a ClassifiedPaper> for CsvRow<'a> {
    fn from(classified: &'a ClassifiedPaper) -> Self {
        let paper = &classified.paper;
        Self {
            pubmed_id: &paper.id,
            title: &paper.title,
            publication_date: paper.publication_date.to_string(),
            non_academic_authors: classified.company_authors.join(LIST_SEPARATOR),
            company_affiliations: classified.company_names.join(LIST_SEPARATOR),
            corresponding_author_email: paper.corresponding_email().unwrap_or_default(),
        }
    }
}

/// Write `papers` as CSV to `writer`. The header is written even when there are no rows.
pub fn write_csv<W: Write>(papers: &[ClassifiedPaper], writer: W) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);

    wtr.write_record(CSV_COLUMNS)?;
    for paper in papers {
        wtr.serialize(CsvRow::from(paper))?;
    }

    wtr.flush()?;
    Ok(())
}

/// Export `papers` to `destination`
pub fn export(papers: &[ClassifiedPaper], destination: &Destination) -> Result<()> {
    match destination {
        Destination::Stdout => {
            let stdout = std::io::stdout();
            write_csv(papers, stdout.lock())
        }
        Destination::File(path) => {
            let file = std::fs::File::create(path)?;
            write_csv(papers, std::io::BufWriter::new(file))?;
            info!(path = %path.display(), rows = papers.len(), "Saved CSV");
            Ok(())
        }
    }
}

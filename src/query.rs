//! ESearch query construction.
//!
//! The search term is passed through verbatim; PubMed's own syntax (field tags,
//! boolean operators) is validated by the ESearch endpoint, not here.

use crate::error::{PapersError, Result};
use regex::Regex;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Default number of IDs to collect
pub const DEFAULT_MAX_RESULTS: usize = 100;

/// IDs requested per ESearch page
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// ESearch refuses `retmax` above this value
pub const MAX_PAGE_SIZE: usize = 10_000;

/// Date field the range filter applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateType {
    /// Publication date
    #[default]
    Publication,
    /// Entrez date (when the record was added)
    Entrez,
    /// Last modification date
    Modification,
}

impl DateType {
    pub fn as_param(&self) -> &'static str {
        match self {
            DateType::Publication => "pdat",
            DateType::Entrez => "edat",
            DateType::Modification => "mdat",
        }
    }
}

impl fmt::Display for DateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_param())
    }
}

impl FromStr for DateType {
    type Err = PapersError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pdat" => Ok(DateType::Publication),
            "edat" => Ok(DateType::Entrez),
            "mdat" => Ok(DateType::Modification),
            other => Err(PapersError::InvalidQuery(format!(
                "unknown date type '{}', expected pdat, edat or mdat",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DateRange {
    min: String,
    max: String,
    date_type: DateType,
}

/// A validated PubMed search request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    term: String,
    max_results: usize,
    page_size: usize,
    date_range: Option<DateRange>,
}

impl SearchQuery {
    /// Create a query for `term`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQuery` if the term is empty or whitespace only.
    pub fn new(term: impl Into<String>) -> Result<Self> {
        let term = term.into().trim().to_string();
        if term.is_empty() {
            return Err(PapersError::InvalidQuery("query must not be empty".to_string()));
        }
        Ok(Self {
            term,
            max_results: DEFAULT_MAX_RESULTS,
            page_size: DEFAULT_PAGE_SIZE,
            date_range: None,
        })
    }

    pub fn max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    /// IDs per ESearch request, clamped to `1..=MAX_PAGE_SIZE`
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    /// Restrict results to `min..=max`.
    ///
    /// Dates are `YYYY`, `YYYY/MM` or `YYYY/MM/DD` as E-utilities expects.
    pub fn date_range(mut self, min: &str, max: &str, date_type: DateType) -> Result<Self> {
        let (min, max) = (min.trim(), max.trim());
        for date in [min, max] {
            if !date_pattern().is_match(date) {
                return Err(PapersError::InvalidQuery(format!(
                    "invalid date '{}', expected YYYY, YYYY/MM or YYYY/MM/DD",
                    date
                )));
            }
        }
        self.date_range = Some(DateRange {
            min: min.to_string(),
            max: max.to_string(),
            date_type,
        });
        Ok(self)
    }

    pub fn term(&self) -> &str {
        &self.term
    }

    pub fn limit(&self) -> usize {
        self.max_results
    }

    pub fn per_page(&self) -> usize {
        self.page_size
    }

    /// ESearch parameters for the page starting at `retstart`
    pub fn to_params(&self, retstart: usize, retmax: usize) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("db", "pubmed".to_string()),
            ("term", self.term.clone()),
            ("retstart", retstart.to_string()),
            ("retmax", retmax.to_string()),
            ("retmode", "json".to_string()),
        ];

        if let Some(range) = &self.date_range {
            params.push(("datetype", range.date_type.as_param().to_string()));
            params.push(("mindate", range.min.clone()));
            params.push(("maxdate", range.max.clone()));
        }

        params
    }
}

fn date_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^\d{4}(/(0?[1-9]|1[0-2])(/(0?[1-9]|[12]\d|3[01]))?)?$")
            .expect("date pattern is valid")
    })
}

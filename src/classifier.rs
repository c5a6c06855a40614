//! Affiliation classifier.
//!
//! Flags authors whose affiliation names a pharmaceutical or biotech company.
//! This is a keyword heuristic: false positives and negatives are expected.
//!
//! Each affiliation is split into institutions on `;` and each institution into
//! comma-separated parts. A part names a company when it
//!
//! - contains a known company name, or
//! - carries a corporate suffix or sector word and no academic keyword.
//!
//! Academic keywords only veto signals found in the same part, so
//! "Department of Oncology, Genentech Inc." still yields "Genentech Inc.".

use crate::models::{email_pattern, ClassifiedPaper, PaperRecord};
use regex::Regex;
use std::sync::OnceLock;

/// Large pharma and biotech names that qualify on their own
const KNOWN_COMPANIES: &[&str] = &[
    "abbvie",
    "amgen",
    "astellas",
    "astrazeneca",
    "bayer",
    "biogen",
    "boehringer ingelheim",
    "bristol-myers squibb",
    "daiichi sankyo",
    "eisai",
    "eli lilly",
    "genentech",
    "gilead",
    "glaxosmithkline",
    "gsk",
    "hoffmann-la roche",
    "illumina",
    "janssen",
    "johnson & johnson",
    "merck",
    "moderna",
    "novartis",
    "novo nordisk",
    "pfizer",
    "regeneron",
    "roche",
    "sanofi",
    "servier",
    "takeda",
    "vertex pharmaceuticals",
];

/// Academic and public-sector keywords, matched as substrings
const EXCLUSION_KEYWORDS: &[&str] = &[
    "universit",
    "institut",
    "hospital",
    "school",
    "college",
    "department of",
    "faculty",
    "academy",
    "medical center",
    "medical centre",
    "ministry",
];

fn inclusion_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(
            r"\b(?:inc|ltd|limited|corp|corporation|gmbh|llc|plc|ag|pharmaceuticals?|pharma|biopharma|biotech|therapeutics)\b",
        )
        .expect("inclusion pattern is valid")
    })
}

/// "Co." after a name, matched on the original case so that a trailing
/// state code ("Aurora, CO.") never counts
fn co_suffix_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\w[\w.'-]*\s+(?:Co\.|&\s*(?i:co)\.)").expect("co. pattern is valid")
    })
}

fn known_company_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let names = KNOWN_COMPANIES
            .iter()
            .map(|name| regex::escape(name))
            .collect::<Vec<_>>()
            .join("|");
        Regex::new(&format!(r"\b(?:{})\b", names)).expect("company pattern is valid")
    })
}

fn electronic_address_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)electronic address:?").expect("electronic address pattern is valid")
    })
}

/// Company names in one author's affiliation, first qualifying part per institution
pub fn company_names(affiliation: &str) -> Vec<String> {
    let cleaned = email_pattern().replace_all(affiliation, "");
    let cleaned = electronic_address_pattern().replace_all(&cleaned, "");

    cleaned
        .split(';')
        .filter_map(|institution| {
            institution
                .split(',')
                .map(str::trim)
                .find(|part| part_names_company(part))
                .map(str::to_string)
        })
        .collect()
}

/// Whether one comma-separated affiliation part names a company
fn part_names_company(part: &str) -> bool {
    let part = part.trim();
    let normalized = part.to_lowercase();
    if normalized.is_empty() {
        return false;
    }
    if known_company_pattern().is_match(&normalized) {
        return true;
    }
    (inclusion_pattern().is_match(&normalized) || co_suffix_pattern().is_match(part))
        && !EXCLUSION_KEYWORDS.iter().any(|k| normalized.contains(k))
}

/// Classify a paper by its authors' affiliations.
///
/// Pure function of the record: classifying the same paper again yields the
/// same result.
pub fn classify(paper: &PaperRecord) -> ClassifiedPaper {
    let mut company_authors: Vec<String> = Vec::new();
    let mut names: Vec<String> = Vec::new();

    for author in &paper.authors {
        let found = company_names(&author.affiliation);
        if found.is_empty() {
            continue;
        }
        if !company_authors.contains(&author.name) {
            company_authors.push(author.name.clone());
        }
        for name in found {
            if !names.contains(&name) {
                names.push(name);
            }
        }
    }

    ClassifiedPaper {
        paper: paper.clone(),
        has_company_affiliation: !company_authors.is_empty(),
        company_authors,
        company_names: names,
    }
}

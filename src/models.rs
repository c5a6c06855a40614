//! Paper and author records built from PubMed responses.

use chrono::NaiveDate;
use regex::Regex;
use std::fmt;
use std::sync::OnceLock;

/// E-mail addresses as they appear in affiliation strings
pub(crate) fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9-]+(?:\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}")
            .expect("email pattern is valid")
    })
}

/// First e-mail address in `text`
pub fn extract_email(text: &str) -> Option<String> {
    email_pattern().find(text).map(|m| m.as_str().to_string())
}

/// A single author as listed in the PubMed record
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AuthorRecord {
    /// Display name (`ForeName LastName` or collective name)
    pub name: String,
    /// Affiliation text, multiple affiliations joined with "; "
    pub affiliation: String,
    /// E-mail address found in the affiliation text
    pub email: Option<String>,
}

/// Paper metadata from EFetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaperRecord {
    /// PubMed ID
    pub id: String,
    pub title: String,
    pub publication_date: PublicationDate,
    /// Authors in source order
    pub authors: Vec<AuthorRecord>,
}

impl PaperRecord {
    /// First author e-mail in author order.
    ///
    /// PubMed has no explicit corresponding-author marker; the address printed
    /// in an affiliation is the closest signal.
    pub fn corresponding_email(&self) -> Option<&str> {
        self.authors.iter().find_map(|a| a.email.as_deref())
    }
}

/// Publication date with the precision PubMed provides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublicationDate {
    Day(NaiveDate),
    Month { year: i32, month: u32 },
    Year(i32),
    #[default]
    Unknown,
}

impl PublicationDate {
    /// Build a date from the raw `Year`, `Month` and `Day` element texts.
    ///
    /// Month may be numeric ("06") or an English abbreviation ("Jun").
    /// Missing or unparseable parts degrade precision rather than failing.
    pub fn from_parts(year: Option<&str>, month: Option<&str>, day: Option<&str>) -> Self {
        let Some(year) = year.and_then(|y| y.trim().parse::<i32>().ok()) else {
            return PublicationDate::Unknown;
        };
        let Some(month) = month.and_then(parse_month) else {
            return PublicationDate::Year(year);
        };
        match day
            .and_then(|d| d.trim().parse::<u32>().ok())
            .and_then(|d| NaiveDate::from_ymd_opt(year, month, d))
        {
            Some(date) => PublicationDate::Day(date),
            None => PublicationDate::Month { year, month },
        }
    }

    /// Leading year of a free-form `MedlineDate` such as "1998 Dec-1999 Jan".
    pub fn from_medline_date(text: &str) -> Self {
        text.split_whitespace()
            .next()
            .and_then(|token| token.get(..4))
            .and_then(|y| y.parse::<i32>().ok())
            .map(PublicationDate::Year)
            .unwrap_or(PublicationDate::Unknown)
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, PublicationDate::Unknown)
    }
}

impl fmt::Display for PublicationDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublicationDate::Day(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            PublicationDate::Month { year, month } => write!(f, "{:04}-{:02}", year, month),
            PublicationDate::Year(year) => write!(f, "{}", year),
            PublicationDate::Unknown => Ok(()),
        }
    }
}

fn parse_month(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<u32>() {
        return (1..=12).contains(&n).then_some(n);
    }
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let prefix = raw.get(..3)?.to_ascii_lowercase();
    MONTHS
        .iter()
        .position(|m| *m == prefix)
        .map(|idx| idx as u32 + 1)
}

/// A paper annotated by the affiliation classifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedPaper {
    pub paper: PaperRecord,
    /// True when at least one author is company-affiliated
    pub has_company_affiliation: bool,
    /// Names of company-affiliated authors, source order, no duplicates
    pub company_authors: Vec<String>,
    /// Company names extracted from affiliations, source order, no duplicates
    pub company_names: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_date() {
        let date = PublicationDate::from_parts(Some("2023"), Some("Jun"), Some("5"));
        assert_eq!(date.to_string(), "2023-06-05");
    }

    #[test]
    fn test_partial_dates() {
        assert_eq!(
            PublicationDate::from_parts(Some("2021"), Some("11"), None).to_string(),
            "2021-11"
        );
        assert_eq!(PublicationDate::from_parts(Some("2019"), None, None).to_string(), "2019");
        assert_eq!(PublicationDate::from_parts(None, Some("Jan"), None), PublicationDate::Unknown);
        // February 30th degrades to month precision
        assert_eq!(
            PublicationDate::from_parts(Some("2020"), Some("Feb"), Some("30")),
            PublicationDate::Month { year: 2020, month: 2 }
        );
    }

    #[test]
    fn test_medline_date() {
        assert_eq!(
            PublicationDate::from_medline_date("1998 Dec-1999 Jan"),
            PublicationDate::Year(1998)
        );
        assert_eq!(PublicationDate::from_medline_date("Spring"), PublicationDate::Unknown);
    }

    #[test]
    fn test_extract_email() {
        assert_eq!(
            extract_email("Genentech Inc., South San Francisco, CA. Electronic address: jdoe@gene.com."),
            Some("jdoe@gene.com".to_string())
        );
        assert_eq!(extract_email("Department of Biology, Stanford University"), None);
    }

    #[test]
    fn test_corresponding_email() {
        let paper = PaperRecord {
            id: "1".into(),
            title: "T".into(),
            publication_date: PublicationDate::Unknown,
            authors: vec![
                AuthorRecord { name: "A".into(), ..Default::default() },
                AuthorRecord {
                    name: "B".into(),
                    affiliation: "Pfizer Inc. b@pfizer.com".into(),
                    email: Some("b@pfizer.com".into()),
                },
            ],
        };
        assert_eq!(paper.corresponding_email(), Some("b@pfizer.com"));
    }
}

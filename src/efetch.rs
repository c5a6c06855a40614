//! EFetch XML parsing.
//!
//! A `PubmedArticleSet` document is split into its `PubmedArticle` elements and
//! every article is parsed on its own, so one bad record does not take the
//! whole batch down with it.

use crate::error::{OptionExt, PapersError, Result};
use crate::models::{extract_email, AuthorRecord, PaperRecord, PublicationDate};
use quick_xml::events::Event;
use quick_xml::name::QName;
use quick_xml::Reader;
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;

/// A record that could not be turned into a `PaperRecord`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordFailure {
    /// PMID, when it could still be recovered from the raw fragment
    pub id: Option<String>,
    pub reason: String,
}

/// Result of parsing one EFetch response
#[derive(Debug, Default)]
pub struct ParsedBatch {
    pub papers: Vec<PaperRecord>,
    pub failures: Vec<RecordFailure>,
    /// Set when the document itself broke off; articles after that point are lost
    pub truncated: Option<String>,
}

/// Parse an EFetch `PubmedArticleSet` response.
pub fn parse_fetch_response(xml: &str) -> ParsedBatch {
    let mut batch = ParsedBatch::default();
    let (fragments, truncated) = split_articles(xml);
    batch.truncated = truncated;

    for fragment in fragments {
        match parse_article(fragment) {
            Ok(paper) => batch.papers.push(paper),
            Err(e) => {
                let id = recover_pmid(fragment);
                debug!(pmid = ?id, error = %e, "Skipping malformed article");
                batch.failures.push(RecordFailure {
                    id,
                    reason: e.to_string(),
                });
            }
        }
    }

    batch
}

/// Inner XML of every `PubmedArticle`, plus the error that stopped the scan (if any)
fn split_articles(xml: &str) -> (Vec<&str>, Option<String>) {
    let mut reader = Reader::from_str(xml);
    let mut fragments = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"PubmedArticle" => {
                let span = match reader.read_to_end(QName(b"PubmedArticle")) {
                    Ok(span) => span,
                    Err(e) => return (fragments, Some(format!("unterminated PubmedArticle: {}", e))),
                };
                let range = usize::try_from(span.start)
                    .ok()
                    .zip(usize::try_from(span.end).ok());
                match range.and_then(|(start, end)| xml.get(start..end)) {
                    Some(fragment) => fragments.push(fragment),
                    None => return (fragments, Some("article span out of bounds".to_string())),
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                let position = reader.buffer_position();
                return (fragments, Some(format!("XML error at byte {}: {}", position, e)));
            }
        }
    }

    (fragments, None)
}

fn recover_pmid(fragment: &str) -> Option<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"<MedlineCitation[^>]*>\s*<PMID[^>]*>\s*(\d+)\s*</PMID>")
            .expect("PMID pattern is valid")
    });
    pattern
        .captures(fragment)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

#[derive(Default)]
struct DateParts {
    year: Option<String>,
    month: Option<String>,
    day: Option<String>,
}

impl DateParts {
    fn set(&mut self, field: &str, text: &str) {
        let slot = match field {
            "Year" => &mut self.year,
            "Month" => &mut self.month,
            "Day" => &mut self.day,
            _ => return,
        };
        slot.get_or_insert_with(String::new).push_str(text);
    }

    fn to_date(&self) -> PublicationDate {
        PublicationDate::from_parts(self.year.as_deref(), self.month.as_deref(), self.day.as_deref())
    }
}

#[derive(Default)]
struct AuthorParts {
    last_name: String,
    fore_name: String,
    collective_name: String,
    affiliations: Vec<String>,
}

impl AuthorParts {
    fn into_record(self) -> Option<AuthorRecord> {
        let name = if !self.collective_name.trim().is_empty() {
            collapse_whitespace(&self.collective_name)
        } else if !self.last_name.trim().is_empty() {
            collapse_whitespace(&format!("{} {}", self.fore_name, self.last_name))
        } else {
            return None;
        };

        let affiliation = self
            .affiliations
            .iter()
            .map(|a| collapse_whitespace(a))
            .filter(|a| !a.is_empty())
            .collect::<Vec<_>>()
            .join("; ");
        let email = extract_email(&affiliation);

        Some(AuthorRecord {
            name,
            affiliation,
            email,
        })
    }
}

#[derive(Default)]
struct ArticleParts {
    pmid: String,
    title: String,
    pub_date: DateParts,
    medline_date: String,
    article_date: DateParts,
    authors: Vec<AuthorParts>,
    /// Pre-2014 records carry a single affiliation on the article
    article_affiliation: String,
}

fn parse_article(fragment: &str) -> Result<PaperRecord> {
    let mut reader = Reader::from_str(fragment);
    let mut stack: Vec<String> = Vec::new();
    let mut parts = ArticleParts::default();

    loop {
        let event = reader
            .read_event()
            .map_err(|e| PapersError::Parse(format!("invalid article XML: {}", e)))?;
        match event {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                let parent = stack.last().map(String::as_str);
                match (parent, name.as_str()) {
                    (Some("AuthorList"), "Author") => parts.authors.push(AuthorParts::default()),
                    (Some("AffiliationInfo"), "Affiliation") if contains(&stack, "AuthorList") => {
                        if let Some(author) = parts.authors.last_mut() {
                            author.affiliations.push(String::new());
                        }
                    }
                    _ => {}
                }
                stack.push(name);
            }
            Event::End(_) => {
                stack.pop();
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| PapersError::Parse(format!("bad text content: {}", e)))?;
                route_text(&stack, &text, &mut parts);
            }
            Event::CData(c) => {
                let text = String::from_utf8_lossy(&c.into_inner()).into_owned();
                route_text(&stack, &text, &mut parts);
            }
            Event::Eof => break,
            _ => {}
        }
    }

    build_record(parts)
}

fn ends_with(stack: &[String], tail: &[&str]) -> bool {
    stack.len() >= tail.len()
        && stack[stack.len() - tail.len()..]
            .iter()
            .zip(tail)
            .all(|(a, b)| a == b)
}

fn contains(stack: &[String], name: &str) -> bool {
    stack.iter().any(|s| s == name)
}

fn route_text(stack: &[String], text: &str, parts: &mut ArticleParts) {
    let Some(leaf) = stack.last().map(String::as_str) else {
        return;
    };

    if ends_with(stack, &["MedlineCitation", "PMID"]) {
        parts.pmid.push_str(text);
    } else if contains(stack, "ArticleTitle") {
        parts.title.push_str(text);
    } else if contains(stack, "PubDate") && contains(stack, "JournalIssue") {
        if leaf == "MedlineDate" {
            parts.medline_date.push_str(text);
        } else {
            parts.pub_date.set(leaf, text);
        }
    } else if ends_with(stack, &["ArticleDate", leaf]) {
        parts.article_date.set(leaf, text);
    } else if contains(stack, "AuthorList") && contains(stack, "Author") {
        let Some(author) = parts.authors.last_mut() else {
            return;
        };
        if contains(stack, "CollectiveName") {
            author.collective_name.push_str(text);
        } else if contains(stack, "Affiliation") {
            if let Some(affiliation) = author.affiliations.last_mut() {
                affiliation.push_str(text);
            }
        } else if leaf == "LastName" {
            author.last_name.push_str(text);
        } else if leaf == "ForeName" {
            author.fore_name.push_str(text);
        }
    } else if ends_with(stack, &["Article", "Affiliation"]) {
        parts.article_affiliation.push_str(text);
    }
}

fn build_record(parts: ArticleParts) -> Result<PaperRecord> {
    let id = Some(parts.pmid.trim().to_string())
        .filter(|id| !id.is_empty())
        .ok_or_parse("missing PMID")?;

    let title = collapse_whitespace(&parts.title);
    if title.is_empty() {
        return Err(PapersError::Parse(format!("PMID {} has no ArticleTitle", id)));
    }

    let mut publication_date = parts.pub_date.to_date();
    if !publication_date.is_known() && !parts.medline_date.trim().is_empty() {
        publication_date = PublicationDate::from_medline_date(&parts.medline_date);
    }
    if !publication_date.is_known() {
        publication_date = parts.article_date.to_date();
    }

    let mut authors = parts.authors;
    let article_affiliation = parts.article_affiliation.trim();
    if !article_affiliation.is_empty() {
        if let Some(first) = authors.first_mut() {
            if first.affiliations.is_empty() {
                first.affiliations.push(article_affiliation.to_string());
            }
        }
    }

    Ok(PaperRecord {
        id,
        title,
        publication_date,
        authors: authors.into_iter().filter_map(AuthorParts::into_record).collect(),
    })
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE_SET: &str = r#"<?xml version="1.0" ?>
<!DOCTYPE PubmedArticleSet PUBLIC "-//NLM//DTD PubMedArticle, 1st January 2024//EN" "https://dtd.nlm.nih.gov/ncbi/pubmed/out/pubmed_240101.dtd">
<PubmedArticleSet>
<PubmedArticle>
  <MedlineCitation Status="MEDLINE" Owner="NLM">
    <PMID Version="1">38000001</PMID>
    <Article PubModel="Print">
      <Journal>
        <JournalIssue CitedMedium="Internet">
          <PubDate><Year>2023</Year><Month>Jun</Month><Day>15</Day></PubDate>
        </JournalIssue>
      </Journal>
      <ArticleTitle>Targeting <i>KRAS</i> in lung cancer &amp; beyond.</ArticleTitle>
      <AuthorList CompleteYN="Y">
        <Author ValidYN="Y">
          <LastName>Doe</LastName>
          <ForeName>Jane</ForeName>
          <Initials>J</Initials>
          <AffiliationInfo>
            <Affiliation>Research Scientist, Pfizer Inc., New York, NY, USA. jane.doe@pfizer.com.</Affiliation>
          </AffiliationInfo>
        </Author>
        <Author ValidYN="Y">
          <LastName>Smith</LastName>
          <ForeName>John</ForeName>
          <AffiliationInfo><Affiliation>Department of Biology, Stanford University, Stanford, CA.</Affiliation></AffiliationInfo>
          <AffiliationInfo><Affiliation>Genentech Inc., South San Francisco, CA.</Affiliation></AffiliationInfo>
        </Author>
        <Author ValidYN="Y">
          <CollectiveName>KRAS Study Group</CollectiveName>
        </Author>
      </AuthorList>
    </Article>
    <CommentsCorrectionsList>
      <CommentsCorrections RefType="CommentIn"><RefSource>Nature</RefSource><PMID Version="1">37000000</PMID></CommentsCorrections>
    </CommentsCorrectionsList>
  </MedlineCitation>
</PubmedArticle>
<PubmedArticle>
  <MedlineCitation>
    <PMID Version="1">38000002</PMID>
    <Article>
      <Journal><JournalIssue><PubDate><MedlineDate>1998 Dec-1999 Jan</MedlineDate></PubDate></JournalIssue></Journal>
      <ArticleTitle>Old record</ArticleTitle>
      <AuthorList><Author><LastName>Old</LastName><ForeName>Al</ForeName></Author></AuthorList>
      <Affiliation>Merck Research Laboratories, Rahway, NJ.</Affiliation>
    </Article>
  </MedlineCitation>
</PubmedArticle>
</PubmedArticleSet>"#;

    #[test]
    fn test_parse_articles() {
        let batch = parse_fetch_response(ARTICLE_SET);
        assert!(batch.failures.is_empty());
        assert!(batch.truncated.is_none());
        assert_eq!(batch.papers.len(), 2);

        let paper = &batch.papers[0];
        assert_eq!(paper.id, "38000001");
        assert_eq!(paper.title, "Targeting KRAS in lung cancer & beyond.");
        assert_eq!(paper.publication_date.to_string(), "2023-06-15");
        assert_eq!(paper.authors.len(), 3);
        assert_eq!(paper.authors[0].name, "Jane Doe");
        assert_eq!(paper.authors[0].email.as_deref(), Some("jane.doe@pfizer.com"));
        assert_eq!(
            paper.authors[1].affiliation,
            "Department of Biology, Stanford University, Stanford, CA.; Genentech Inc., South San Francisco, CA."
        );
        assert_eq!(paper.authors[2].name, "KRAS Study Group");
        assert_eq!(paper.corresponding_email(), Some("jane.doe@pfizer.com"));
    }

    #[test]
    fn test_legacy_article_affiliation_and_medline_date() {
        let batch = parse_fetch_response(ARTICLE_SET);
        let paper = &batch.papers[1];
        assert_eq!(paper.publication_date, PublicationDate::Year(1998));
        assert_eq!(paper.authors[0].affiliation, "Merck Research Laboratories, Rahway, NJ.");
    }

    #[test]
    fn test_record_without_title_is_reported() {
        let xml = r#"<PubmedArticleSet>
<PubmedArticle><MedlineCitation><PMID>1</PMID><Article><ArticleTitle>Fine</ArticleTitle></Article></MedlineCitation></PubmedArticle>
<PubmedArticle><MedlineCitation><PMID>2</PMID><Article></Article></MedlineCitation></PubmedArticle>
</PubmedArticleSet>"#;
        let batch = parse_fetch_response(xml);
        assert_eq!(batch.papers.len(), 1);
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.failures[0].id.as_deref(), Some("2"));
    }

    #[test]
    fn test_bad_entity_is_per_record() {
        let xml = r#"<PubmedArticleSet>
<PubmedArticle><MedlineCitation><PMID>10</PMID><Article><ArticleTitle>Broken &bogus; title</ArticleTitle></Article></MedlineCitation></PubmedArticle>
<PubmedArticle><MedlineCitation><PMID>11</PMID><Article><ArticleTitle>Good</ArticleTitle></Article></MedlineCitation></PubmedArticle>
</PubmedArticleSet>"#;
        let batch = parse_fetch_response(xml);
        assert_eq!(batch.papers.len(), 1);
        assert_eq!(batch.papers[0].id, "11");
        assert_eq!(batch.failures[0].id.as_deref(), Some("10"));
    }

    #[test]
    fn test_cited_pmid_is_not_taken_for_the_record() {
        let xml = r#"<PubmedArticleSet>
<PubmedArticle><MedlineCitation><Article><ArticleTitle>No PMID</ArticleTitle></Article>
<CommentsCorrectionsList><CommentsCorrections RefType="ErratumIn"><PMID Version="1">99999</PMID></CommentsCorrections></CommentsCorrectionsList>
</MedlineCitation></PubmedArticle>
<PubmedArticle><MedlineCitation Status="MEDLINE"><PMID Version="1">31</PMID><Article><ArticleTitle>Broken &bogus;</ArticleTitle></Article></MedlineCitation></PubmedArticle>
</PubmedArticleSet>"#;
        let batch = parse_fetch_response(xml);
        assert!(batch.papers.is_empty());
        assert_eq!(batch.failures.len(), 2);
        assert_eq!(batch.failures[0].id, None);
        assert_eq!(batch.failures[1].id.as_deref(), Some("31"));
    }

    #[test]
    fn test_truncated_document_keeps_earlier_articles() {
        let xml = r#"<PubmedArticleSet>
<PubmedArticle><MedlineCitation><PMID>20</PMID><Article><ArticleTitle>Complete</ArticleTitle></Article></MedlineCitation></PubmedArticle>
<PubmedArticle><MedlineCitation><PMID>21</PMID><Article><ArticleTitle>Cut"#;
        let batch = parse_fetch_response(xml);
        assert_eq!(batch.papers.len(), 1);
        assert!(batch.truncated.is_some());
    }

    #[test]
    fn test_not_xml() {
        let batch = parse_fetch_response("");
        assert!(batch.papers.is_empty());
        assert!(batch.failures.is_empty());
    }
}

//! PubMed E-utilities client.
//!
//! ESearch (JSON) collects PMIDs for a query, EFetch (XML) pulls the full
//! records in batches. Requests are issued one at a time with the NCBI
//! courtesy interval between them; throttling responses are surfaced to the
//! caller and never retried.

use crate::efetch::{parse_fetch_response, ParsedBatch};
use crate::error::{PapersError, Result};
use crate::models::PaperRecord;
use crate::query::SearchQuery;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

/// E-utilities base URL
pub const EUTILS_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/";

/// Maximum PMIDs per EFetch request
pub const MAX_FETCH_BATCH: usize = 200;

/// ESearch cannot page past this many records for PubMed
const ESEARCH_MAX_RECORDS: usize = 10_000;

/// 3 requests/second without an API key
const INTERVAL_WITHOUT_KEY: Duration = Duration::from_millis(340);

/// 10 requests/second with an API key
const INTERVAL_WITH_KEY: Duration = Duration::from_millis(100);

/// Client settings
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// E-utilities base URL (overridden in tests)
    pub base_url: String,
    /// Contact address sent as `email`, recommended by NCBI
    pub email: Option<String>,
    /// NCBI API key, raises the rate limit to 10 req/s
    pub api_key: Option<String>,
    /// Tool name sent as `tool`
    pub tool: String,
    pub timeout: Duration,
    /// Minimum spacing between requests; derived from `api_key` when unset
    pub request_interval: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: EUTILS_BASE_URL.to_string(),
            email: None,
            api_key: None,
            tool: env!("CARGO_PKG_NAME").to_string(),
            timeout: Duration::from_secs(30),
            request_interval: None,
        }
    }
}

impl ClientConfig {
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = email.filter(|e| !e.trim().is_empty());
        self
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.trim().is_empty());
        self
    }

    pub fn with_request_interval(mut self, interval: Duration) -> Self {
        self.request_interval = Some(interval);
        self
    }

    fn interval(&self) -> Duration {
        self.request_interval.unwrap_or(if self.api_key.is_some() {
            INTERVAL_WITH_KEY
        } else {
            INTERVAL_WITHOUT_KEY
        })
    }
}

/// A PMID that was requested but did not produce a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedRecord {
    pub id: String,
    pub reason: String,
}

/// Records fetched for a list of PMIDs
#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Parsed papers, unique by PMID, in response order
    pub papers: Vec<PaperRecord>,
    pub dropped: Vec<DroppedRecord>,
}

/// One page of ESearch results
#[derive(Debug, PartialEq, Eq)]
struct SearchPage {
    /// Total matches reported by ESearch
    count: usize,
    ids: Vec<String>,
}

/// PubMed E-utilities client
pub struct PubMedClient {
    client: reqwest::Client,
    config: ClientConfig,
    esearch_url: Url,
    efetch_url: Url,
    last_request: Mutex<Option<Instant>>,
}

impl PubMedClient {
    /// Create a new PubMedClient
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()
            .map_err(|e| PapersError::Config(format!("Failed to build HTTP client: {}", e)))?;

        let mut base = config.base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base = Url::parse(&base)
            .map_err(|e| PapersError::Config(format!("Invalid base URL '{}': {}", base, e)))?;
        let endpoint = |name: &str| {
            base.join(name)
                .map_err(|e| PapersError::Config(format!("Invalid endpoint {}: {}", name, e)))
        };

        Ok(Self {
            client,
            esearch_url: endpoint("esearch.fcgi")?,
            efetch_url: endpoint("efetch.fcgi")?,
            config,
            last_request: Mutex::new(None),
        })
    }

    /// Collect PMIDs matching `query`, paging through ESearch as needed.
    ///
    /// Stops at the query's result limit, when ESearch runs out of matches, or
    /// at the ESearch paging ceiling. Duplicate PMIDs are dropped.
    pub async fn search(&self, query: &SearchQuery) -> Result<Vec<String>> {
        let limit = query.limit();
        let mut ids = Vec::new();
        let mut seen = HashSet::new();
        let mut retstart = 0;

        info!(query = query.term(), limit = limit, "Starting PubMed search");

        while ids.len() < limit {
            if retstart >= ESEARCH_MAX_RECORDS {
                warn!(
                    collected = ids.len(),
                    "ESearch paging limit reached, narrow the query to see more results"
                );
                break;
            }

            let retmax = query.per_page().min(limit - ids.len());
            let page = self.search_page(query, retstart, retmax).await?;
            let received = page.ids.len();
            debug!(
                retstart = retstart,
                received = received,
                count = page.count,
                "ESearch page"
            );

            for id in page.ids {
                if ids.len() >= limit {
                    break;
                }
                if seen.insert(id.clone()) {
                    ids.push(id);
                }
            }

            retstart += received;
            if received == 0 || retstart >= page.count {
                break;
            }
        }

        info!(found = ids.len(), "PubMed search complete");
        Ok(ids)
    }

    async fn search_page(&self, query: &SearchQuery, retstart: usize, retmax: usize) -> Result<SearchPage> {
        let params = query.to_params(retstart, retmax);
        let body = self.get_text(&self.esearch_url, params).await?;
        parse_search_response(&body)
    }

    /// Fetch full records for `ids` in batches of at most `MAX_FETCH_BATCH`.
    ///
    /// Records that fail to parse are skipped and listed in
    /// `FetchOutcome::dropped`; transport and HTTP errors abort the fetch.
    pub async fn fetch(&self, ids: &[String]) -> Result<FetchOutcome> {
        let mut outcome = FetchOutcome::default();
        let mut seen = HashSet::new();
        let batch_count = ids.len().div_ceil(MAX_FETCH_BATCH);

        for (batch_idx, chunk) in ids.chunks(MAX_FETCH_BATCH).enumerate() {
            info!(
                batch = batch_idx + 1,
                total_batches = batch_count,
                papers = chunk.len(),
                "Fetching records"
            );

            let params = vec![
                ("db", "pubmed".to_string()),
                ("id", chunk.join(",")),
                ("retmode", "xml".to_string()),
            ];
            let xml = self.get_text(&self.efetch_url, params).await?;
            let batch = parse_fetch_response(&xml);
            if let Some(reason) = &batch.truncated {
                warn!(batch = batch_idx + 1, reason = %reason, "EFetch response ended early");
            }
            reconcile(chunk, batch, &mut seen, &mut outcome);
        }

        for dropped in &outcome.dropped {
            warn!(pmid = %dropped.id, reason = %dropped.reason, "Skipped record");
        }
        info!(
            fetched = outcome.papers.len(),
            dropped = outcome.dropped.len(),
            "Fetch complete"
        );

        Ok(outcome)
    }

    /// GET an E-utilities endpoint and return the body text
    async fn get_text(&self, endpoint: &Url, mut params: Vec<(&'static str, String)>) -> Result<String> {
        params.push(("tool", self.config.tool.clone()));
        if let Some(email) = &self.config.email {
            params.push(("email", email.clone()));
        }
        if let Some(key) = &self.config.api_key {
            params.push(("api_key", key.clone()));
        }

        self.wait_for_rate_limit().await;

        debug!(url = %endpoint, "E-utilities request");
        let response = self
            .client
            .get(endpoint.clone())
            .query(&params)
            .send()
            .await?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            return Err(PapersError::RateLimited(retry_after));
        }

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), error = %error_text, "E-utilities error");
            return Err(api_error(status.as_u16(), &error_text)
                .unwrap_or_else(|| PapersError::Api {
                    code: status.as_u16(),
                    message: format!("E-utilities returned {}", status),
                }));
        }

        Ok(response.text().await?)
    }

    /// Wait until the courtesy interval since the previous request has passed
    async fn wait_for_rate_limit(&self) {
        let interval = self.config.interval();
        let remaining = self
            .last_request
            .lock()
            .ok()
            .and_then(|last| *last)
            .map(|t| interval.saturating_sub(t.elapsed()))
            .unwrap_or(Duration::ZERO);

        if !remaining.is_zero() {
            tokio::time::sleep(remaining).await;
        }

        if let Ok(mut last) = self.last_request.lock() {
            *last = Some(Instant::now());
        }
    }
}

/// Merge one parsed EFetch batch into `outcome`, accounting for every requested PMID
fn reconcile(
    requested: &[String],
    batch: ParsedBatch,
    seen: &mut HashSet<String>,
    outcome: &mut FetchOutcome,
) {
    let ParsedBatch {
        papers,
        failures,
        truncated,
    } = batch;

    let mut accounted: HashSet<String> = HashSet::new();
    for paper in papers {
        accounted.insert(paper.id.clone());
        if seen.insert(paper.id.clone()) {
            outcome.papers.push(paper);
        } else {
            debug!(pmid = %paper.id, "Duplicate record ignored");
        }
    }

    let mut anonymous = Vec::new();
    for failure in failures {
        match failure.id {
            Some(id) if accounted.insert(id.clone()) => outcome.dropped.push(DroppedRecord {
                id,
                reason: failure.reason,
            }),
            Some(_) => {}
            None => anonymous.push(failure.reason),
        }
    }

    let mut anonymous = anonymous.into_iter();
    for id in requested {
        if accounted.contains(id) || seen.contains(id) {
            continue;
        }
        let reason = anonymous
            .next()
            .or_else(|| truncated.as_ref().map(|t| format!("response truncated: {}", t)))
            .unwrap_or_else(|| "not returned by EFetch".to_string());
        accounted.insert(id.clone());
        outcome.dropped.push(DroppedRecord {
            id: id.clone(),
            reason,
        });
    }
}

// === ESearch Response Types ===

#[derive(Debug, Deserialize)]
struct ESearchResponse {
    #[serde(default)]
    esearchresult: Option<ESearchResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ESearchResult {
    #[serde(default)]
    count: Option<String>,
    #[serde(default)]
    idlist: Vec<String>,
    #[serde(rename = "ERROR", default)]
    error: Option<String>,
    #[serde(default)]
    errorlist: Option<ESearchErrorList>,
}

#[derive(Debug, Deserialize)]
struct ESearchErrorList {
    #[serde(default)]
    phrasesnotfound: Vec<String>,
    #[serde(default)]
    fieldsnotfound: Vec<String>,
}

/// Parse an ESearch JSON body
fn parse_search_response(body: &str) -> Result<SearchPage> {
    let response: ESearchResponse = serde_json::from_str(body)
        .map_err(|e| PapersError::Parse(format!("Failed to parse ESearch response: {}", e)))?;

    if let Some(error) = response.error {
        return Err(service_error(200, error));
    }

    let result = response
        .esearchresult
        .ok_or_else(|| PapersError::Parse("ESearch response has no esearchresult".to_string()))?;

    if let Some(error) = result.error {
        return Err(PapersError::InvalidQuery(error));
    }

    if let Some(errors) = &result.errorlist {
        if !errors.phrasesnotfound.is_empty() {
            warn!(phrases = ?errors.phrasesnotfound, "PubMed did not recognise some phrases");
        }
        if !errors.fieldsnotfound.is_empty() {
            warn!(fields = ?errors.fieldsnotfound, "PubMed did not recognise some field tags");
        }
    }

    let count = match result.count.as_deref() {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| PapersError::Parse(format!("Invalid ESearch count '{}'", raw)))?,
        None => result.idlist.len(),
    };

    Ok(SearchPage {
        count,
        ids: result.idlist,
    })
}

/// Map an E-utilities JSON error body to an error, if it is one.
///
/// Only `esearchresult.ERROR` is a rejection of the query itself; the
/// top-level `error` carries service messages (API key, rate).
fn api_error(code: u16, body: &str) -> Option<PapersError> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    if let Some(message) = value
        .get("esearchresult")
        .and_then(|r| r.get("ERROR"))
        .and_then(|e| e.as_str())
    {
        return Some(PapersError::InvalidQuery(message.to_string()));
    }
    value
        .get("error")
        .and_then(|e| e.as_str())
        .map(|message| service_error(code, message.to_string()))
}

fn service_error(code: u16, message: String) -> PapersError {
    if message.to_lowercase().contains("api key") {
        PapersError::Config(message)
    } else {
        PapersError::Api { code, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::efetch::RecordFailure;
    use crate::models::PublicationDate;

    fn paper(id: &str) -> PaperRecord {
        PaperRecord {
            id: id.to_string(),
            title: format!("Paper {}", id),
            publication_date: PublicationDate::Unknown,
            authors: Vec::new(),
        }
    }

    #[test]
    fn test_parse_search_response() {
        let body = r#"{"header":{"type":"esearch","version":"0.3"},
            "esearchresult":{"count":"1234","retmax":"2","retstart":"0",
            "idlist":["38000001","38000002"],"translationset":[],"querytranslation":"cancer"}}"#;
        let page = parse_search_response(body).expect("valid response");
        assert_eq!(page.count, 1234);
        assert_eq!(page.ids, vec!["38000001", "38000002"]);
    }

    #[test]
    fn test_parse_search_error() {
        let body = r#"{"esearchresult":{"ERROR":"Invalid query syntax"}}"#;
        assert!(matches!(
            parse_search_response(body),
            Err(PapersError::InvalidQuery(msg)) if msg == "Invalid query syntax"
        ));
    }

    #[test]
    fn test_parse_search_phrase_not_found() {
        let body = r#"{"esearchresult":{"count":"0","idlist":[],
            "errorlist":{"phrasesnotfound":["zzqqxx"],"fieldsnotfound":[]}}}"#;
        let page = parse_search_response(body).expect("phrase errors are warnings");
        assert_eq!(page.count, 0);
        assert!(page.ids.is_empty());
    }

    #[test]
    fn test_parse_search_garbage() {
        assert!(matches!(parse_search_response("<html>"), Err(PapersError::Parse(_))));
    }

    #[test]
    fn test_api_error() {
        assert!(matches!(
            api_error(429, r#"{"error":"API rate limit exceeded","count":"11"}"#),
            Some(PapersError::Api { code: 429, message }) if message == "API rate limit exceeded"
        ));
        assert!(matches!(
            api_error(400, r#"{"error":"API key invalid","api-key":"bogus"}"#),
            Some(PapersError::Config(message)) if message == "API key invalid"
        ));
        assert!(matches!(
            api_error(400, r#"{"esearchresult":{"ERROR":"Invalid query syntax"}}"#),
            Some(PapersError::InvalidQuery(_))
        ));
        assert!(api_error(502, "Bad Gateway").is_none());
    }

    #[test]
    fn test_top_level_error_is_not_a_query_error() {
        let err = parse_search_response(r#"{"error":"API key invalid"}"#).expect_err("service error");
        assert!(matches!(err, PapersError::Config(_)));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_reconcile_reports_every_missing_id() {
        let requested: Vec<String> = ["1", "2", "3", "4"].iter().map(|s| s.to_string()).collect();
        let batch = ParsedBatch {
            papers: vec![paper("1")],
            failures: vec![
                RecordFailure {
                    id: Some("2".into()),
                    reason: "PMID 2 has no ArticleTitle".into(),
                },
                RecordFailure {
                    id: None,
                    reason: "missing PMID".into(),
                },
            ],
            truncated: None,
        };

        let mut seen = HashSet::new();
        let mut outcome = FetchOutcome::default();
        reconcile(&requested, batch, &mut seen, &mut outcome);

        assert_eq!(outcome.papers.len(), 1);
        let dropped: Vec<(&str, &str)> = outcome
            .dropped
            .iter()
            .map(|d| (d.id.as_str(), d.reason.as_str()))
            .collect();
        assert_eq!(
            dropped,
            vec![
                ("2", "PMID 2 has no ArticleTitle"),
                ("3", "missing PMID"),
                ("4", "not returned by EFetch"),
            ]
        );
    }

    #[test]
    fn test_reconcile_skips_duplicates() {
        let requested = vec!["7".to_string()];
        let mut seen = HashSet::new();
        let mut outcome = FetchOutcome::default();
        for _ in 0..2 {
            let batch = ParsedBatch {
                papers: vec![paper("7")],
                ..Default::default()
            };
            reconcile(&requested, batch, &mut seen, &mut outcome);
        }
        assert_eq!(outcome.papers.len(), 1);
        assert!(outcome.dropped.is_empty());
    }

    #[test]
    fn test_interval_depends_on_api_key() {
        assert_eq!(ClientConfig::default().interval(), INTERVAL_WITHOUT_KEY);
        let keyed = ClientConfig::default().with_api_key(Some("key".into()));
        assert_eq!(keyed.interval(), INTERVAL_WITH_KEY);
        let fixed = keyed.with_request_interval(Duration::ZERO);
        assert_eq!(fixed.interval(), Duration::ZERO);
    }

    #[test]
    fn test_endpoints_from_base_url() {
        let client = PubMedClient::new(ClientConfig::default().with_base_url("http://127.0.0.1:9/eutils"))
            .expect("valid config");
        assert_eq!(client.esearch_url.as_str(), "http://127.0.0.1:9/eutils/esearch.fcgi");
        assert_eq!(client.efetch_url.as_str(), "http://127.0.0.1:9/eutils/efetch.fcgi");
    }
}

//! DuckDuckGo HTML search port.
//!
//! Uses the no-JS HTML endpoint (`/html/?q=...`) and scrapes the result list.
//! DuckDuckGo wraps outbound links in a redirect (`/l/?uddg=<encoded>`), so
//! hrefs are unwrapped before being returned as hits.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::{classify_reqwest, classify_status, PortError, PortResult, SearchHit, SearchPort, Throttle};

/// User-Agent string for search requests.
const USER_AGENT: &str = concat!("BattleCard/", env!("CARGO_PKG_VERSION"));

/// Default search endpoint.
const DEFAULT_ENDPOINT: &str = "https://html.duckduckgo.com";

/// Per-request timeout.
const SEARCH_TIMEOUT_SECS: u64 = 15;

/// Maximum hits returned per query.
const MAX_HITS: usize = 10;

/// Search port backed by DuckDuckGo's HTML endpoint.
pub struct DuckDuckGoSearch {
    client: Client,
    throttle: Arc<Throttle>,
    endpoint: String,
}

impl DuckDuckGoSearch {
    pub fn new(throttle: Arc<Throttle>) -> PortResult<Self> {
        Self::with_endpoint(throttle, DEFAULT_ENDPOINT)
    }

    /// Point the port at a different endpoint (for tests against a mock server).
    pub fn with_endpoint(throttle: Arc<Throttle>, endpoint: &str) -> PortResult<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(SEARCH_TIMEOUT_SECS))
            .build()
            .map_err(|e| PortError::ServiceUnavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            throttle,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl SearchPort for DuckDuckGoSearch {
    async fn search(&self, query: &str) -> PortResult<Vec<SearchHit>> {
        let url = format!("{}/html/?q={}", self.endpoint, urlencoding::encode(query));

        let _permit = self.throttle.acquire().await;
        debug!(%query, "dispatching web search");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| classify_reqwest(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(&url, status));
        }

        let body = response
            .text()
            .await
            .map_err(|e| classify_reqwest(&url, e))?;

        let hits = parse_results(&body);
        debug!(hits = hits.len(), "search complete");
        Ok(hits)
    }
}

/// Parse the DuckDuckGo HTML result list into hits.
fn parse_results(html: &str) -> Vec<SearchHit> {
    let doc = Html::parse_document(html);
    let result_sel = Selector::parse("div.result").unwrap();
    let title_sel = Selector::parse("a.result__a").unwrap();
    let snippet_sel = Selector::parse("a.result__snippet, div.result__snippet").unwrap();

    let mut hits = Vec::new();

    for result in doc.select(&result_sel) {
        let Some(anchor) = result.select(&title_sel).next() else {
            continue;
        };
        let Some(href) = anchor.value().attr("href") else {
            continue;
        };
        let Some(target) = unwrap_redirect(href) else {
            continue;
        };

        let title = anchor.text().collect::<String>().trim().to_string();
        let snippet = result
            .select(&snippet_sel)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        if title.is_empty() {
            continue;
        }

        hits.push(SearchHit {
            title,
            url: target,
            snippet,
        });

        if hits.len() >= MAX_HITS {
            break;
        }
    }

    hits
}

/// Unwrap DuckDuckGo's `/l/?uddg=<encoded>` redirect; pass through direct links.
fn unwrap_redirect(href: &str) -> Option<String> {
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }

    // Protocol-relative or path-relative redirect links.
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else if href.starts_with('/') {
        format!("https://duckduckgo.com{href}")
    } else {
        return None;
    };

    let parsed = Url::parse(&absolute).ok()?;
    for (key, value) in parsed.query_pairs() {
        if key == "uddg" {
            return Some(value.into_owned());
        }
    }

    // A direct absolute link with no redirect wrapper.
    if parsed.path() != "/l/" {
        return Some(parsed.to_string());
    }

    None
}

//! Page fetcher: HTTP GET + script/style stripping + text extraction.
//!
//! Returns cleaned, line-trimmed page text suitable for LLM consumption,
//! never raw HTML. Private/loopback targets are refused before any request
//! goes out.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::{classify_reqwest, classify_status, FetchPort, PortError, PortResult, Throttle};

/// User-Agent string for fetch requests.
const USER_AGENT: &str = concat!("BattleCard/", env!("CARGO_PKG_VERSION"));

/// Default per-request timeout.
const FETCH_TIMEOUT_SECS: u64 = 30;

/// Fetches pages over HTTP and reduces them to clean text.
pub struct PageFetcher {
    client: Client,
    throttle: Arc<Throttle>,
    /// Allow localhost/private IPs (for integration tests with mock servers).
    allow_localhost: bool,
}

impl PageFetcher {
    pub fn new(throttle: Arc<Throttle>) -> PortResult<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()
            .map_err(|e| PortError::ServiceUnavailable(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            throttle,
            allow_localhost: false,
        })
    }

    /// Allow fetching from localhost/private IPs (for integration tests).
    pub fn allow_localhost(mut self) -> Self {
        self.allow_localhost = true;
        self
    }
}

#[async_trait]
impl FetchPort for PageFetcher {
    async fn fetch(&self, url: &str) -> PortResult<String> {
        let parsed = Url::parse(url)
            .map_err(|e| PortError::ParseError(format!("invalid URL '{url}': {e}")))?;

        if !self.allow_localhost && is_ssrf_target(&parsed) {
            return Err(PortError::NotFound(format!("{url}: blocked target")));
        }

        let _permit = self.throttle.acquire().await;
        debug!(%url, "fetching page");

        let response = self
            .client
            .get(parsed.as_str())
            .send()
            .await
            .map_err(|e| classify_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(url, status));
        }

        let body = response
            .text()
            .await
            .map_err(|e| classify_reqwest(url, e))?;

        let text = html_to_text(&body);
        if text.is_empty() {
            return Err(PortError::ParseError(format!(
                "{url}: document yielded no text content"
            )));
        }

        Ok(text)
    }
}

/// Strip script/style/nav chrome and collapse the document to trimmed,
/// non-empty text lines.
pub fn html_to_text(html: &str) -> String {
    let doc = Html::parse_document(html);

    // Prefer <main>/<article> content; fall back to <body>.
    let content_sel = Selector::parse("main, article").unwrap();
    let body_sel = Selector::parse("body").unwrap();
    let skip_sel = Selector::parse("script, style, nav, header, footer, noscript, svg").unwrap();

    let root = doc
        .select(&content_sel)
        .next()
        .or_else(|| doc.select(&body_sel).next());

    let Some(root) = root else {
        return String::new();
    };

    let skip_ids: std::collections::HashSet<_> =
        doc.select(&skip_sel).map(|el| el.id()).collect();

    let mut lines: Vec<String> = Vec::new();
    for node in root.descendants() {
        if let Some(text) = node.value().as_text() {
            // Skip text inside chrome elements.
            let in_skipped = node.ancestors().any(|a| skip_ids.contains(&a.id()));
            if in_skipped {
                continue;
            }
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                lines.push(trimmed.to_string());
            }
        }
    }

    lines.join("\n")
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
fn is_ssrf_target(url: &Url) -> bool {
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    if let Some(host) = url.host_str() {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return is_private_ip(&ip);
        }
        if host == "localhost"
            || host == "127.0.0.1"
            || host == "[::1]"
            || host.ends_with(".local")
            || host.ends_with(".internal")
        {
            return true;
        }
    }

    false
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_to_text_strips_chrome() {
        let html = r#"<html><head><style>.x{}</style></head><body>
            <nav><a href="/">Home</a></nav>
            <main>
                <h1>Pricing</h1>
                <p>Pro plan costs $12/month.</p>
                <script>track();</script>
            </main>
            <footer>© Acme</footer>
        </body></html>"#;

        let text = html_to_text(html);
        assert!(text.contains("Pricing"));
        assert!(text.contains("$12/month"));
        assert!(!text.contains("track()"));
        assert!(!text.contains("Home"));
        assert!(!text.contains("© Acme"));
    }

    #[test]
    fn html_to_text_falls_back_to_body() {
        let html = "<html><body><p>No main element here.</p></body></html>";
        assert_eq!(html_to_text(html), "No main element here.");
    }

    #[test]
    fn ssrf_blocks_file_scheme() {
        let url = Url::parse("file:///etc/passwd").unwrap();
        assert!(is_ssrf_target(&url));
    }

    #[test]
    fn ssrf_blocks_private_targets() {
        for bad in [
            "http://192.168.1.1/admin",
            "http://10.0.0.1/",
            "http://127.0.0.1:8080/",
            "http://localhost:3000/api",
        ] {
            assert!(is_ssrf_target(&Url::parse(bad).unwrap()), "{bad}");
        }
    }

    #[test]
    fn ssrf_allows_public() {
        let url = Url::parse("https://acme.example.com/pricing").unwrap();
        assert!(!is_ssrf_target(&url));
    }

    #[tokio::test]
    async fn fetch_returns_clean_text() {
        let server = wiremock::MockServer::start().await;
        let page = r#"<html><body><main>
            <h1>Plans</h1>
            <p>Starter: $5/month</p>
        </main></body></html>"#;

        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/pricing"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(page))
            .mount(&server)
            .await;

        let throttle = Throttle::new(2, 0);
        let fetcher = PageFetcher::new(throttle).unwrap().allow_localhost();
        let text = fetcher
            .fetch(&format!("{}/pricing", server.uri()))
            .await
            .unwrap();

        assert!(text.contains("Plans"));
        assert!(text.contains("$5/month"));
    }

    #[tokio::test]
    async fn fetch_maps_404_to_not_found() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path("/missing"))
            .respond_with(wiremock::ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let throttle = Throttle::new(2, 0);
        let fetcher = PageFetcher::new(throttle).unwrap().allow_localhost();
        let err = fetcher
            .fetch(&format!("{}/missing", server.uri()))
            .await
            .unwrap_err();

        assert!(matches!(err, PortError::NotFound(_)));
    }

    #[tokio::test]
    async fn fetch_refuses_blocked_target() {
        let throttle = Throttle::new(2, 0);
        let fetcher = PageFetcher::new(throttle).unwrap();
        let err = fetcher.fetch("http://127.0.0.1:9/x").await.unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));
    }
}

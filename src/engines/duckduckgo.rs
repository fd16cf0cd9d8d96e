//! DuckDuckGo handler, targeting the HTML-only endpoint.

use scraper::Html;

use super::{
    fallback_snippet, first_text, parse_selector, EngineKind, RawSearchLink, SearchEngine,
    MIN_RESULT_HTML_BYTES,
};
use crate::Result;

const RESULT_SELECTORS: &[&str] = &[".result", ".results_links", ".web-result"];
const TITLE_SELECTORS: &[&str] = &[".result__title a", "h2 a", "a.result__a"];
const SNIPPET_SELECTORS: &[&str] = &[".result__snippet", ".result__body"];

pub struct DuckDuckGo;

impl SearchEngine for DuckDuckGo {
    fn kind(&self) -> EngineKind {
        EngineKind::DuckDuckGo
    }

    fn build_search_url(&self, query: &str, _limit: usize) -> String {
        // The HTML endpoint has no result-count parameter; it serves a fixed
        // first page which is always enough for our limits.
        format!(
            "https://html.duckduckgo.com/html/?q={}&kl=us-en",
            urlencoding::encode(query)
        )
    }

    fn result_selectors(&self) -> &'static [&'static str] {
        RESULT_SELECTORS
    }

    fn extract_results(&self, html: &str, selector: &str) -> Result<Vec<RawSearchLink>> {
        let document = Html::parse_document(html);
        let container = parse_selector(selector)?;
        let title_sels: Vec<_> = TITLE_SELECTORS
            .iter()
            .map(|s| parse_selector(s))
            .collect::<Result<_>>()?;
        let snippet_sels: Vec<_> = SNIPPET_SELECTORS
            .iter()
            .map(|s| parse_selector(s))
            .collect::<Result<_>>()?;

        let mut links = Vec::new();
        for element in document.select(&container) {
            let Some((anchor, title)) = title_sels.iter().find_map(|sel| {
                element.select(sel).next().and_then(|a| {
                    let text = a.text().collect::<String>().trim().to_string();
                    (!text.is_empty()).then_some((a, text))
                })
            }) else {
                continue;
            };
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            if href.is_empty() {
                continue;
            }

            let snippet = snippet_sels
                .iter()
                .find_map(|sel| first_text(&element, sel))
                .unwrap_or_else(|| fallback_snippet(&element, &title));

            links.push(RawSearchLink {
                title,
                url: href.to_string(),
                snippet,
            });
        }
        Ok(links)
    }

    /// Unwraps `duckduckgo.com/l/?uddg=<encoded>` redirect URLs. The target
    /// is percent-decoded and protocol-relative forms are normalized to
    /// https.
    fn clean_url(&self, url: &str) -> String {
        if !url.contains("duckduckgo.com/l/") {
            return url.to_string();
        }
        let Some(start) = url.find("uddg=") else {
            return url.to_string();
        };
        let encoded = &url[start + 5..];
        let encoded = encoded.split('&').next().unwrap_or(encoded);
        match urlencoding::decode(encoded) {
            Ok(decoded) => {
                let decoded = decoded.into_owned();
                if let Some(rest) = decoded.strip_prefix("//") {
                    format!("https://{}", rest)
                } else {
                    decoded
                }
            }
            Err(_) => url.to_string(),
        }
    }

    fn is_blocked(&self, title: &str, html: Option<&str>) -> bool {
        let title = title.to_lowercase();
        if title.contains("anomaly") || title.contains("captcha") || title.contains("blocked") {
            return true;
        }
        matches!(html, Some(h) if h.len() < MIN_RESULT_HTML_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_search_url_encodes_query() {
        let url = DuckDuckGo.build_search_url("rust async runtime", 10);
        assert!(url.starts_with("https://html.duckduckgo.com/html/?q="));
        assert!(url.contains("rust%20async%20runtime"));
        assert!(url.contains("kl=us-en"));
    }

    #[test]
    fn test_clean_url_unwraps_uddg_redirect() {
        let cleaned = DuckDuckGo
            .clean_url("https://duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fpage&rut=x");
        assert_eq!(cleaned, "https://example.com/page");
    }

    #[test]
    fn test_clean_url_protocol_relative_redirect() {
        let cleaned =
            DuckDuckGo.clean_url("//duckduckgo.com/l/?uddg=%2F%2Fexample.com%2Fdocs&rut=abc");
        assert_eq!(cleaned, "https://example.com/docs");
    }

    #[test]
    fn test_clean_url_passes_through_direct_urls() {
        let direct = "https://example.com/direct";
        assert_eq!(DuckDuckGo.clean_url(direct), direct);
    }

    #[test]
    fn test_clean_url_without_uddg_param() {
        let url = "https://duckduckgo.com/l/?other=1";
        assert_eq!(DuckDuckGo.clean_url(url), url);
    }

    #[test]
    fn test_extract_results_basic() {
        let html = r#"
            <html><body>
            <div class="result">
                <h2 class="result__title"><a href="https://duckduckgo.com/l/?uddg=https%3A%2F%2Fdocs.rs%2Ftokio">Tokio docs</a></h2>
                <a class="result__snippet">An asynchronous runtime for the Rust programming language.</a>
            </div>
            <div class="result">
                <h2 class="result__title"><a href="https://example.org">Example</a></h2>
            </div>
            </body></html>
        "#;
        let links = DuckDuckGo.extract_results(html, ".result").unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].title, "Tokio docs");
        assert!(links[0].url.contains("uddg="));
        assert_eq!(
            links[0].snippet,
            "An asynchronous runtime for the Rust programming language."
        );
    }

    #[test]
    fn test_extract_results_skips_titleless_containers() {
        let html = r#"<div class="result"><span>no anchor here</span></div>"#;
        let links = DuckDuckGo.extract_results(html, ".result").unwrap();
        assert!(links.is_empty());
    }

    #[test]
    fn test_blocked_by_title() {
        assert!(DuckDuckGo.is_blocked("DuckDuckGo — Anomaly detected", None));
        assert!(DuckDuckGo.is_blocked("Captcha required", None));
        assert!(!DuckDuckGo.is_blocked("rust at DuckDuckGo", None));
    }

    #[test]
    fn test_blocked_by_tiny_payload() {
        assert!(DuckDuckGo.is_blocked("results", Some("<html></html>")));
        let big = "x".repeat(MIN_RESULT_HTML_BYTES + 1);
        assert!(!DuckDuckGo.is_blocked("results", Some(&big)));
    }
}

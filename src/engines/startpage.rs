//! Startpage handler.

use scraper::Html;

use super::{
    fallback_snippet, first_text, parse_selector, EngineKind, RawSearchLink, SearchEngine,
    MIN_RESULT_HTML_BYTES,
};
use crate::Result;

const RESULT_SELECTORS: &[&str] = &[".w-gl__result", "div.result", ".search-result"];
const TITLE_SELECTORS: &[&str] = &["a.w-gl__result-title h3", "a.result-link h3", "h3"];
const LINK_SELECTORS: &[&str] = &["a.w-gl__result-title", "a.result-link", "a[href]"];
const SNIPPET_SELECTORS: &[&str] = &["p.w-gl__description", "p.description", "p"];

pub struct Startpage;

impl SearchEngine for Startpage {
    fn kind(&self) -> EngineKind {
        EngineKind::Startpage
    }

    fn build_search_url(&self, query: &str, _limit: usize) -> String {
        format!(
            "https://www.startpage.com/sp/search?query={}&cat=web&language=english",
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
        let link_sels: Vec<_> = LINK_SELECTORS
            .iter()
            .map(|s| parse_selector(s))
            .collect::<Result<_>>()?;
        let snippet_sels: Vec<_> = SNIPPET_SELECTORS
            .iter()
            .map(|s| parse_selector(s))
            .collect::<Result<_>>()?;

        let mut links = Vec::new();
        for element in document.select(&container) {
            let Some(title) = title_sels.iter().find_map(|sel| first_text(&element, sel)) else {
                continue;
            };
            let Some(href) = link_sels.iter().find_map(|sel| {
                element
                    .select(sel)
                    .next()
                    .and_then(|a| a.value().attr("href"))
                    .filter(|h| !h.is_empty())
            }) else {
                continue;
            };

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

    /// Startpage result links are already direct; pass URLs through.
    fn clean_url(&self, url: &str) -> String {
        url.to_string()
    }

    fn is_blocked(&self, title: &str, html: Option<&str>) -> bool {
        let title = title.to_lowercase();
        if title.contains("are you human")
            || title.contains("captcha")
            || title.contains("attention required")
        {
            return true;
        }
        matches!(html, Some(h) if h.len() < MIN_RESULT_HTML_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_search_url() {
        let url = Startpage.build_search_url("rust web framework", 8);
        assert!(url.starts_with("https://www.startpage.com/sp/search?query="));
        assert!(url.contains("rust%20web%20framework"));
    }

    #[test]
    fn test_clean_url_is_passthrough() {
        let url = "https://example.com/page?x=1#frag";
        assert_eq!(Startpage.clean_url(url), url);
    }

    #[test]
    fn test_extract_results_modern_markup() {
        let html = r#"
            <html><body>
            <div class="w-gl__result">
                <a class="w-gl__result-title" href="https://www.rust-lang.org/"><h3>Rust Programming Language</h3></a>
                <p class="w-gl__description">A language empowering everyone to build reliable software.</p>
            </div>
            </body></html>
        "#;
        let links = Startpage.extract_results(html, ".w-gl__result").unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].title, "Rust Programming Language");
        assert_eq!(links[0].url, "https://www.rust-lang.org/");
        assert_eq!(
            links[0].snippet,
            "A language empowering everyone to build reliable software."
        );
    }

    #[test]
    fn test_extract_results_generic_fallback_markup() {
        let html = r#"
            <div class="result">
                <a class="result-link" href="https://docs.rs/"><h3>Docs.rs</h3></a>
                <p>Documentation host for every crate published to crates.io.</p>
            </div>
        "#;
        let links = Startpage.extract_results(html, "div.result").unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url, "https://docs.rs/");
    }

    #[test]
    fn test_blocked_titles() {
        assert!(Startpage.is_blocked("Are you human?", None));
        assert!(Startpage.is_blocked("Attention Required! | Cloudflare", None));
        assert!(!Startpage.is_blocked("rust - Startpage Search", None));
    }
}

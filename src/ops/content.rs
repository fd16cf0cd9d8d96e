//! Raw content retrieval, link extraction and selector-driven JSON
//! extraction.

use std::collections::BTreeMap;

use scraper::Html;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::engines::parse_selector;
use crate::nav::{goto_with_retry, DEFAULT_NAV_ATTEMPTS};
use crate::ops::post_load_wait;
use crate::page::{NavigateOptions, PageDriver};
use crate::{Result, ScrapeError};

#[derive(Debug, Clone, Deserialize)]
pub struct ContentParams {
    pub url: String,
    #[serde(default)]
    pub wait_after_load_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContentResult {
    pub html: String,
    pub title: Option<String>,
    pub url: String,
}

/// Navigates and returns the fully rendered HTML.
pub async fn get_content(page: &dyn PageDriver, params: &ContentParams) -> Result<ContentResult> {
    goto_with_retry(
        page,
        &params.url,
        &NavigateOptions::default(),
        DEFAULT_NAV_ATTEMPTS,
    )
    .await?;
    post_load_wait(params.wait_after_load_ms).await;

    let html = page.content().await?;
    let title = page.title().await.unwrap_or(None);
    let url = page
        .url()
        .await
        .unwrap_or(None)
        .unwrap_or_else(|| params.url.clone());

    Ok(ContentResult { html, title, url })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkItem {
    pub text: String,
    pub href: String,
}

/// Navigates and returns all http(s) links on the page, resolved against
/// the page URL and deduplicated while keeping document order.
pub async fn extract_links(page: &dyn PageDriver, params: &ContentParams) -> Result<Vec<LinkItem>> {
    let content = get_content(page, params).await?;
    Ok(links_from_html(&content.html, &content.url))
}

/// Pure extraction half of `extract_links`.
pub fn links_from_html(html: &str, base_url: &str) -> Vec<LinkItem> {
    let document = Html::parse_document(html);
    let Ok(anchor) = scraper::Selector::parse("a[href]") else {
        return Vec::new();
    };
    let base = Url::parse(base_url).ok();

    let mut seen = std::collections::HashSet::new();
    let mut links = Vec::new();
    for element in document.select(&anchor) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let resolved = match (&base, Url::parse(href)) {
            (_, Ok(absolute)) => absolute,
            (Some(base), Err(_)) => match base.join(href) {
                Ok(joined) => joined,
                Err(_) => continue,
            },
            (None, Err(_)) => continue,
        };
        if resolved.scheme() != "http" && resolved.scheme() != "https" {
            continue;
        }
        let href = resolved.to_string();
        if !seen.insert(href.clone()) {
            continue;
        }
        let text = element.text().collect::<String>().trim().to_string();
        links.push(LinkItem { text, href });
    }
    links
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractJsonParams {
    pub url: String,
    /// Output field name to CSS selector. Each field takes the text of the
    /// first matching element, or null when nothing matches.
    pub fields: BTreeMap<String, String>,
    #[serde(default)]
    pub wait_after_load_ms: Option<u64>,
}

/// Navigates and extracts a flat JSON object driven by a field-to-selector
/// mapping.
pub async fn extract_json(
    page: &dyn PageDriver,
    params: &ExtractJsonParams,
) -> Result<serde_json::Value> {
    if params.fields.is_empty() {
        return Err(ScrapeError::InvalidParams(
            "at least one field mapping is required".to_string(),
        ));
    }
    let content = get_content(
        page,
        &ContentParams {
            url: params.url.clone(),
            wait_after_load_ms: params.wait_after_load_ms,
        },
    )
    .await?;
    json_from_html(&content.html, &params.fields)
}

/// Pure extraction half of `extract_json`.
pub fn json_from_html(
    html: &str,
    fields: &BTreeMap<String, String>,
) -> Result<serde_json::Value> {
    let document = Html::parse_document(html);
    let mut out = serde_json::Map::new();
    for (field, css) in fields {
        let selector = parse_selector(css)?;
        let value = document
            .select(&selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string());
        out.insert(
            field.clone(),
            match value {
                Some(text) => serde_json::Value::String(text),
                None => serde_json::Value::Null,
            },
        );
    }
    Ok(serde_json::Value::Object(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_links_resolved_against_base() {
        let html = r#"<a href="/docs">Docs</a> <a href="https://other.org/a">Other</a>"#;
        let links = links_from_html(html, "https://example.com/page");
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].href, "https://example.com/docs");
        assert_eq!(links[0].text, "Docs");
        assert_eq!(links[1].href, "https://other.org/a");
    }

    #[test]
    fn test_links_skip_non_http_schemes() {
        let html = r#"<a href="mailto:x@y.z">Mail</a> <a href="javascript:void(0)">JS</a>"#;
        assert!(links_from_html(html, "https://example.com").is_empty());
    }

    #[test]
    fn test_links_deduplicated_in_order() {
        let html = r#"<a href="/a">First</a> <a href="/b">B</a> <a href="/a">Again</a>"#;
        let links = links_from_html(html, "https://example.com");
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].text, "First");
    }

    #[test]
    fn test_json_from_html_maps_fields() {
        let html = r#"<h1 class="name">Widget</h1><span id="price">$9.99</span>"#;
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), "h1.name".to_string());
        fields.insert("price".to_string(), "#price".to_string());
        fields.insert("missing".to_string(), ".nope".to_string());

        let value = json_from_html(html, &fields).unwrap();
        assert_eq!(value["name"], "Widget");
        assert_eq!(value["price"], "$9.99");
        assert!(value["missing"].is_null());
    }

    #[test]
    fn test_json_from_html_invalid_selector() {
        let mut fields = BTreeMap::new();
        fields.insert("x".to_string(), ":::bad".to_string());
        assert!(json_from_html("<p></p>", &fields).is_err());
    }
}

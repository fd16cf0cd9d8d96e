//! Element scraping: outer HTML, geometry and attributes per selector.

use serde::{Deserialize, Serialize};

use crate::nav::{goto_with_retry, DEFAULT_NAV_ATTEMPTS};
use crate::ops::post_load_wait;
use crate::page::{NavigateOptions, PageDriver};
use crate::{Result, ScrapeError};

/// Cap on captured elements per selector.
pub const MAX_ELEMENTS_PER_SELECTOR: usize = 50;

#[derive(Debug, Clone, Deserialize)]
pub struct ScrapeParams {
    pub url: String,
    pub selectors: Vec<String>,
    #[serde(default)]
    pub wait_after_load_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// One captured element.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementCapture {
    pub html: String,
    /// Flattened plain text, comma joined across block boundaries.
    pub text: String,
    pub attributes: Vec<(String, String)>,
    pub bounding_box: Option<BoundingBox>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SelectorCapture {
    pub selector: String,
    pub count: usize,
    pub elements: Vec<ElementCapture>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScrapeResult {
    pub url: String,
    pub selectors: Vec<SelectorCapture>,
}

/// Attributes worth reporting; event handlers and style never appear.
const ATTRIBUTE_ALLOWLIST: &[&str] = &[
    "id", "class", "href", "src", "alt", "title", "name", "type", "value", "rel", "target",
    "placeholder", "aria-label",
];

/// In-page capture script. Runs per selector and returns a JSON array of
/// `{html, text, attributes, rect}` entries, capped at the element limit.
fn capture_script(selector: &str, allowlist_json: &str) -> String {
    format!(
        r#"
(() => {{
    const allow = new Set({allowlist});
    const out = [];
    const nodes = document.querySelectorAll({selector});
    for (const el of nodes) {{
        if (out.length >= {limit}) break;
        const attrs = [];
        for (const a of el.attributes) {{
            if (allow.has(a.name) || a.name.startsWith('data-')) {{
                attrs.push([a.name, a.value]);
            }}
        }}
        const rect = el.getBoundingClientRect();
        out.push({{
            html: el.outerHTML,
            text: el.innerText || el.textContent || '',
            attributes: attrs,
            rect: {{ x: rect.x, y: rect.y, width: rect.width, height: rect.height }}
        }});
    }}
    return out;
}})()
"#,
        allowlist = allowlist_json,
        selector = serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".to_string()),
        limit = MAX_ELEMENTS_PER_SELECTOR,
    )
}

#[derive(Debug, Deserialize)]
struct RawCapture {
    html: String,
    text: String,
    attributes: Vec<(String, String)>,
    rect: Option<BoundingBox>,
}

/// Navigates and captures elements for each requested selector.
pub async fn scrape_elements(page: &dyn PageDriver, params: &ScrapeParams) -> Result<ScrapeResult> {
    if params.selectors.is_empty() {
        return Err(ScrapeError::InvalidParams(
            "at least one selector is required".to_string(),
        ));
    }

    goto_with_retry(
        page,
        &params.url,
        &NavigateOptions::default(),
        DEFAULT_NAV_ATTEMPTS,
    )
    .await?;
    post_load_wait(params.wait_after_load_ms).await;

    let allowlist_json = serde_json::to_string(ATTRIBUTE_ALLOWLIST)
        .map_err(|e| ScrapeError::Other(e.to_string()))?;

    let mut selectors = Vec::with_capacity(params.selectors.len());
    for selector in &params.selectors {
        let value = page.evaluate(&capture_script(selector, &allowlist_json)).await?;
        let raw: Vec<RawCapture> = serde_json::from_value(value)
            .map_err(|e| ScrapeError::Parse(format!("element capture decode failed: {}", e)))?;

        let elements: Vec<ElementCapture> = raw
            .into_iter()
            .map(|c| ElementCapture {
                html: c.html,
                text: flatten_text(&c.text),
                attributes: c.attributes,
                bounding_box: c.rect.filter(|r| r.width > 0.0 || r.height > 0.0),
            })
            .collect();

        selectors.push(SelectorCapture {
            selector: selector.clone(),
            count: elements.len(),
            elements,
        });
    }

    let url = page
        .url()
        .await
        .unwrap_or(None)
        .unwrap_or_else(|| params.url.clone());
    Ok(ScrapeResult { url, selectors })
}

/// Collapses rendered multi-line text (list items, headings) into one
/// comma-joined line.
pub fn flatten_text(text: &str) -> String {
    text.split('\n')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flatten_text_joins_lines() {
        assert_eq!(flatten_text("Heading\nitem one\nitem two"), "Heading, item one, item two");
    }

    #[test]
    fn test_flatten_text_drops_blank_lines() {
        assert_eq!(flatten_text("a\n\n  \nb"), "a, b");
    }

    #[test]
    fn test_flatten_text_single_line_untouched() {
        assert_eq!(flatten_text("just one line"), "just one line");
    }

    #[test]
    fn test_capture_script_embeds_selector_and_limit() {
        let script = capture_script("div.item", "[\"id\"]");
        assert!(script.contains("\"div.item\""));
        assert!(script.contains("50"));
    }

    #[test]
    fn test_capture_script_escapes_quotes_in_selector() {
        let script = capture_script(r#"a[title="x"]"#, "[]");
        assert!(script.contains(r#"a[title=\"x\"]"#));
    }

    #[test]
    fn test_raw_capture_decode() {
        let value = serde_json::json!([{
            "html": "<p>x</p>",
            "text": "x",
            "attributes": [["id", "p1"]],
            "rect": {"x": 1.0, "y": 2.0, "width": 3.0, "height": 4.0}
        }]);
        let raw: Vec<RawCapture> = serde_json::from_value(value).unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].attributes[0].0, "id");
        assert_eq!(raw[0].rect.as_ref().unwrap().width, 3.0);
    }

    #[test]
    fn test_attribute_allowlist_excludes_handlers() {
        assert!(!ATTRIBUTE_ALLOWLIST.contains(&"onclick"));
        assert!(!ATTRIBUTE_ALLOWLIST.contains(&"style"));
        assert!(ATTRIBUTE_ALLOWLIST.contains(&"href"));
    }
}

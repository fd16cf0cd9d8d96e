//! Page-to-Markdown extraction.
//!
//! Navigation blocks heavy resources, the captured HTML is sanitized, and
//! the structural HTML-to-Markdown conversion is followed by cleanup passes
//! that remove the noise real pages leave behind: duplicated title
//! paragraphs, empty links, repeated paragraphs and trailing bare URLs.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::nav::{goto_with_retry, DEFAULT_NAV_ATTEMPTS};
use crate::ops::post_load_wait;
use crate::page::{InterceptPolicy, NavigateOptions, PageDriver};
use crate::{Result, ScrapeError};

#[derive(Debug, Clone, Deserialize)]
pub struct MarkdownParams {
    pub url: String,
    /// Settle delay after load for client-rendered pages, in milliseconds.
    #[serde(default)]
    pub wait_after_load_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarkdownResult {
    pub markdown: String,
    pub title: Option<String>,
    pub url: String,
    pub word_count: usize,
}

/// Navigates to a page and extracts its content as cleaned Markdown.
pub async fn extract_markdown(
    page: &dyn PageDriver,
    params: &MarkdownParams,
) -> Result<MarkdownResult> {
    page.set_intercept_policy(InterceptPolicy::block_heavy())
        .await?;
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
    let final_url = page.url().await.unwrap_or(None).unwrap_or_else(|| params.url.clone());

    let markdown = html_to_markdown(&html)?;

    Ok(MarkdownResult {
        word_count: count_words(&markdown),
        markdown,
        title,
        url: final_url,
    })
}

/// Converts sanitized HTML to Markdown and applies the cleanup passes.
pub fn html_to_markdown(html: &str) -> Result<String> {
    let sanitized = sanitize_html(html);
    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "noscript", "iframe", "svg"])
        .build();
    let markdown = converter
        .convert(&sanitized)
        .map_err(|e| ScrapeError::Parse(format!("markdown conversion failed: {}", e)))?;
    Ok(cleanup_markdown(&markdown))
}

/// Strips scripting vectors from captured HTML before conversion: script
/// and style bodies, inline event handlers, and javascript: URLs. Images
/// survive so the converter can keep them.
fn sanitize_html(html: &str) -> String {
    static SCRIPT_RE: OnceLock<Regex> = OnceLock::new();
    static STYLE_RE: OnceLock<Regex> = OnceLock::new();
    static EVENT_ATTR_RE: OnceLock<Regex> = OnceLock::new();
    static JS_HREF_RE: OnceLock<Regex> = OnceLock::new();

    let script = SCRIPT_RE
        .get_or_init(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script>").unwrap());
    let style = STYLE_RE.get_or_init(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style>").unwrap());
    let event_attr = EVENT_ATTR_RE
        .get_or_init(|| Regex::new(r#"(?i)\son[a-z]+\s*=\s*("[^"]*"|'[^']*'|[^\s>]+)"#).unwrap());
    let js_href = JS_HREF_RE
        .get_or_init(|| Regex::new(r#"(?i)(href|src)\s*=\s*["']\s*javascript:[^"']*["']"#).unwrap());

    let out = script.replace_all(html, "");
    let out = style.replace_all(&out, "");
    let out = event_attr.replace_all(&out, "");
    js_href.replace_all(&out, "").into_owned()
}

/// Cleanup passes over converted Markdown, line oriented:
/// 1. drop a paragraph immediately followed by a heading with identical text
/// 2. strip links whose visible text is empty
/// 3. collapse two consecutive paragraphs with identical text
/// 4. drop a trailing bare URL that repeats the preceding link's target
fn cleanup_markdown(markdown: &str) -> String {
    static EMPTY_LINK_RE: OnceLock<Regex> = OnceLock::new();
    let empty_link =
        EMPTY_LINK_RE.get_or_init(|| Regex::new(r"\[\s*\]\([^)]*\)").unwrap());

    let stripped = empty_link.replace_all(markdown, "");

    let lines: Vec<&str> = stripped.lines().collect();
    let mut kept: Vec<String> = Vec::with_capacity(lines.len());

    for (i, line) in lines.iter().enumerate() {
        let trimmed = line.trim();

        // Pass 1: paragraph duplicated by the heading that follows it.
        if !trimmed.is_empty() && !trimmed.starts_with('#') {
            if let Some(next) = next_nonempty(&lines, i + 1) {
                let heading_text = next.trim_start_matches('#').trim();
                if next.trim().starts_with('#') && heading_text == trimmed {
                    continue;
                }
            }
        }

        // Pass 3: consecutive identical paragraphs.
        if !trimmed.is_empty() {
            if let Some(prev) = kept.iter().rev().find(|l| !l.trim().is_empty()) {
                if prev.trim() == trimmed {
                    continue;
                }
            }
        }

        kept.push(line.to_string());
    }

    // Pass 4: trailing bare URL repeating the last link target.
    while let Some(last) = kept.iter().rposition(|l| !l.trim().is_empty()) {
        let trailing = kept[last].trim().to_string();
        let is_bare_url = trailing.starts_with("http://") || trailing.starts_with("https://");
        if is_bare_url && preceding_link_target(&kept[..last]) == Some(trailing.clone()) {
            kept.remove(last);
        } else {
            break;
        }
    }

    let cleaned = kept.join("\n");
    collapse_blank_runs(cleaned.trim())
}

fn next_nonempty<'a>(lines: &[&'a str], from: usize) -> Option<&'a str> {
    lines[from..].iter().find(|l| !l.trim().is_empty()).copied()
}

/// Target URL of the last Markdown link in the given lines, if any.
fn preceding_link_target(lines: &[String]) -> Option<String> {
    static LINK_RE: OnceLock<Regex> = OnceLock::new();
    let link = LINK_RE.get_or_init(|| Regex::new(r"\[[^\]]+\]\(([^)]+)\)").unwrap());
    lines
        .iter()
        .rev()
        .find_map(|l| link.captures_iter(l).last().map(|c| c[1].to_string()))
}

fn collapse_blank_runs(text: &str) -> String {
    static BLANK_RE: OnceLock<Regex> = OnceLock::new();
    let blank = BLANK_RE.get_or_init(|| Regex::new(r"\n{3,}").unwrap());
    blank.replace_all(text, "\n\n").into_owned()
}

/// Word count over `\w+` tokens.
pub fn count_words(markdown: &str) -> usize {
    static WORD_RE: OnceLock<Regex> = OnceLock::new();
    let word = WORD_RE.get_or_init(|| Regex::new(r"\w+").unwrap());
    word.find_iter(markdown).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_title_paragraph_removed() {
        let markdown = html_to_markdown("<p>Title</p><h1>Title</h1>").unwrap();
        assert_eq!(markdown, "# Title");
    }

    #[test]
    fn test_empty_links_stripped() {
        let cleaned = cleanup_markdown("before [](https://example.com/t) after");
        assert_eq!(cleaned, "before  after");
    }

    #[test]
    fn test_consecutive_identical_paragraphs_collapsed() {
        let cleaned = cleanup_markdown("Repeated line\n\nRepeated line\n\nOther");
        assert_eq!(cleaned, "Repeated line\n\nOther");
    }

    #[test]
    fn test_trailing_bare_url_dropped() {
        let cleaned =
            cleanup_markdown("See [the docs](https://docs.rs/tokio)\n\nhttps://docs.rs/tokio");
        assert_eq!(cleaned, "See [the docs](https://docs.rs/tokio)");
    }

    #[test]
    fn test_trailing_url_kept_when_different() {
        let text = "See [the docs](https://docs.rs/tokio)\n\nhttps://example.com/other";
        assert_eq!(cleanup_markdown(text), text);
    }

    #[test]
    fn test_sanitize_removes_scripts_and_handlers() {
        let html = r#"<div onclick="evil()"><script>alert(1)</script><p>ok</p></div>"#;
        let sanitized = sanitize_html(html);
        assert!(!sanitized.contains("script"));
        assert!(!sanitized.contains("onclick"));
        assert!(sanitized.contains("<p>ok</p>"));
    }

    #[test]
    fn test_sanitize_keeps_images() {
        let sanitized = sanitize_html(r#"<img src="https://example.com/a.png" alt="pic">"#);
        assert!(sanitized.contains("<img"));
    }

    #[test]
    fn test_sanitize_strips_javascript_urls() {
        let sanitized = sanitize_html(r#"<a href="javascript:alert(1)">x</a>"#);
        assert!(!sanitized.contains("javascript:"));
    }

    #[test]
    fn test_count_words() {
        assert_eq!(count_words("# Title\n\nsome body text here"), 5);
        assert_eq!(count_words(""), 0);
        assert_eq!(count_words("hyphen-ated counts as two"), 5);
    }

    #[test]
    fn test_blank_runs_collapsed() {
        assert_eq!(collapse_blank_runs("a\n\n\n\nb"), "a\n\nb");
    }
}

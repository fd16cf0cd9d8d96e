//! Bing handler, including its layered redirect URL decoding.
//!
//! Bing wraps result targets in `bing.com/ck/a?...&u=a1<base64>` redirect
//! URLs. The wrapped value may be percent-encoded, base64-encoded (standard
//! or URL-safe alphabet), or both, so decoding runs in stages and falls back
//! to the original URL when nothing verifiably decodes to an http(s) target.

use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use scraper::Html;
use url::Url;

use super::{
    fallback_snippet, first_text, parse_selector, EngineKind, RawSearchLink, SearchEngine,
    MIN_RESULT_HTML_BYTES,
};
use crate::Result;

const RESULT_SELECTORS: &[&str] = &["li.b_algo", "#b_results > li", "ol#b_results li"];
const TITLE_SELECTORS: &[&str] = &["h2 a", "h2", ".b_title a"];
const SNIPPET_SELECTORS: &[&str] = &[".b_caption p", "div.b_caption", "p"];

/// Query parameters that may carry the redirect target, probed in order.
const REDIRECT_PARAMS: &[&str] = &["u", "url", "p", "r", "target"];

/// Tracking parameters stripped from decoded targets.
const TRACKING_PARAMS: &[&str] = &["msclkid", "utm_source", "utm_medium", "utm_campaign"];

pub struct Bing;

impl SearchEngine for Bing {
    fn kind(&self) -> EngineKind {
        EngineKind::Bing
    }

    fn build_search_url(&self, query: &str, limit: usize) -> String {
        format!(
            "https://www.bing.com/search?q={}&count={}",
            urlencoding::encode(query),
            limit.max(10)
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
        let anchor_sel = parse_selector("a[href]")?;

        let mut links = Vec::new();
        for element in document.select(&container) {
            let Some(title) = title_sels.iter().find_map(|sel| first_text(&element, sel)) else {
                continue;
            };
            let Some(href) = element
                .select(&anchor_sel)
                .next()
                .and_then(|a| a.value().attr("href"))
                .filter(|h| !h.is_empty())
            else {
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

    fn clean_url(&self, url: &str) -> String {
        let Ok(parsed) = Url::parse(url) else {
            return url.to_string();
        };
        let is_bing_redirect = parsed
            .host_str()
            .is_some_and(|h| h == "bing.com" || h.ends_with(".bing.com"))
            && (parsed.path().starts_with("/ck")
                || parsed
                    .query_pairs()
                    .any(|(k, _)| REDIRECT_PARAMS.contains(&k.as_ref())));
        if !is_bing_redirect {
            return url.to_string();
        }

        for param in REDIRECT_PARAMS {
            let Some(value) = parsed
                .query_pairs()
                .find(|(k, _)| k == param)
                .map(|(_, v)| v.into_owned())
            else {
                continue;
            };
            if let Some(target) = decode_redirect_value(&value) {
                return strip_tracking(&target);
            }
        }
        url.to_string()
    }

    fn is_blocked(&self, title: &str, html: Option<&str>) -> bool {
        let title = title.to_lowercase();
        if title.contains("captcha")
            || title.contains("unusual traffic")
            || title.contains("verify")
        {
            return true;
        }
        matches!(html, Some(h) if h.len() < MIN_RESULT_HTML_BYTES)
    }
}

/// Decodes one candidate redirect value through the staged pipeline:
/// percent-decoding first, then base64 (URL-safe, then standard alphabet)
/// with Bing's `a1` version prefix stripped. A stage only wins when its
/// output is a plausible http(s) URL.
fn decode_redirect_value(value: &str) -> Option<String> {
    let percent_decoded = urlencoding::decode(value)
        .map(|d| d.into_owned())
        .unwrap_or_else(|_| value.to_string());
    if is_http_url(&percent_decoded) {
        return Some(percent_decoded);
    }

    let candidate = percent_decoded
        .strip_prefix("a1")
        .unwrap_or(&percent_decoded)
        .trim_end_matches('=');
    for decoded in [
        URL_SAFE_NO_PAD.decode(candidate),
        STANDARD_NO_PAD.decode(candidate),
    ] {
        if let Ok(bytes) = decoded {
            if let Ok(text) = String::from_utf8(bytes) {
                if is_http_url(&text) {
                    return Some(text);
                }
            }
        }
    }
    None
}

fn is_http_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// Drops the fragment and known tracking parameters from a decoded target.
fn strip_tracking(target: &str) -> String {
    let Ok(mut parsed) = Url::parse(target) else {
        return target.split('#').next().unwrap_or(target).to_string();
    };
    parsed.set_fragment(None);
    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| !TRACKING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        parsed.set_query(None);
    } else {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(kept)
            .finish();
        parsed.set_query(Some(&query));
    }
    parsed.to_string()
}

//! Search engine handlers.
//!
//! Each engine implements [`SearchEngine`]: URL construction, an ordered
//! selector list, DOM extraction, redirect unwrapping and block detection.
//! The set is closed: adding an engine means adding an [`EngineKind`]
//! variant and a registry entry.

use std::time::Duration;

use scraper::ElementRef;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::page::{InterceptPolicy, NavigateOptions, PageDriver};
use crate::{Result, ScrapeError};

mod bing;
mod duckduckgo;
mod startpage;

pub use bing::Bing;
pub use duckduckgo::DuckDuckGo;
pub use startpage::Startpage;

/// Navigation timeout for a result page.
pub(crate) const SEARCH_NAV_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-selector wait while result markup renders.
const SELECTOR_WAIT: Duration = Duration::from_millis(1000);

/// Fixed extra delay applied when no selector appeared in time.
const NO_SELECTOR_FALLBACK_DELAY: Duration = Duration::from_millis(400);

/// Result pages smaller than this are treated as block/interstitial pages.
pub(crate) const MIN_RESULT_HTML_BYTES: usize = 1000;

/// One unprocessed result scraped from an engine's result page. The URL may
/// still carry the engine's own redirect wrapper; `clean_url` unwraps it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSearchLink {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// The closed set of supported engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    DuckDuckGo,
    Startpage,
    Bing,
}

impl EngineKind {
    /// All engines, fast tier first.
    pub const ALL: [EngineKind; 3] = [
        EngineKind::DuckDuckGo,
        EngineKind::Startpage,
        EngineKind::Bing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::DuckDuckGo => "duckduckgo",
            EngineKind::Startpage => "startpage",
            EngineKind::Bing => "bing",
        }
    }
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine-specific search behavior.
pub trait SearchEngine: Send + Sync {
    /// Which engine this handler implements.
    fn kind(&self) -> EngineKind;

    /// Builds the result-page URL for a query.
    fn build_search_url(&self, query: &str, limit: usize) -> String;

    /// Ordered candidate selectors for result containers. The first selector
    /// yielding at least one result wins; there is no merging across
    /// selectors.
    fn result_selectors(&self) -> &'static [&'static str];

    /// Extracts raw results from rendered HTML using one selector.
    fn extract_results(&self, html: &str, selector: &str) -> Result<Vec<RawSearchLink>>;

    /// Unwraps the engine's redirect wrapper from a result URL. Returns the
    /// input unchanged when no wrapper is recognized.
    fn clean_url(&self, url: &str) -> String;

    /// Heuristic CAPTCHA/verification detection from the page title and an
    /// abnormally small HTML payload.
    fn is_blocked(&self, title: &str, html: Option<&str>) -> bool;
}

/// Returns the handler for an engine kind.
pub fn engine_for(kind: EngineKind) -> &'static dyn SearchEngine {
    static DUCKDUCKGO: DuckDuckGo = DuckDuckGo;
    static STARTPAGE: Startpage = Startpage;
    static BING: Bing = Bing;
    match kind {
        EngineKind::DuckDuckGo => &DUCKDUCKGO,
        EngineKind::Startpage => &STARTPAGE,
        EngineKind::Bing => &BING,
    }
}

/// Raw results plus diagnostics from one engine invocation.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSearchOutcome {
    pub links: Vec<RawSearchLink>,
    pub selector_used: Option<String>,
    pub page_title: Option<String>,
    pub page_url: Option<String>,
}

/// Shared search flow, common to all engine handlers.
///
/// Blocks heavy resources, navigates to the result page (DOM content
/// loaded, short timeout), waits briefly for any candidate selector, tries
/// selectors in order until one yields results, and fails the whole
/// invocation with `Blocked` when the page looks like a CAPTCHA wall.
pub async fn perform_search(
    page: &dyn PageDriver,
    engine: &dyn SearchEngine,
    query: &str,
    limit: usize,
) -> Result<EngineSearchOutcome> {
    page.set_intercept_policy(InterceptPolicy::block_heavy())
        .await?;

    let url = engine.build_search_url(query, limit);
    debug!("searching {} via {}", engine.kind(), url);
    page.goto(&url, &NavigateOptions::dom_content_loaded(SEARCH_NAV_TIMEOUT))
        .await?;

    let mut selector_appeared = false;
    for selector in engine.result_selectors() {
        if page.wait_for_selector(selector, SELECTOR_WAIT).await? {
            selector_appeared = true;
            break;
        }
    }
    if !selector_appeared {
        // The markup may still be rendering; give it one fixed grace delay
        // instead of failing outright.
        tokio::time::sleep(NO_SELECTOR_FALLBACK_DELAY).await;
    }

    let html = page.content().await?;
    let page_title = page.title().await.unwrap_or(None);
    let page_url = page.url().await.unwrap_or(None);

    let mut links = Vec::new();
    let mut selector_used = None;
    for selector in engine.result_selectors() {
        let extracted = engine.extract_results(&html, selector)?;
        if !extracted.is_empty() {
            links = extracted;
            selector_used = Some(selector.to_string());
            break;
        }
    }

    let title_for_check = page_title.as_deref().unwrap_or("");
    if engine.is_blocked(title_for_check, Some(&html)) {
        return Err(ScrapeError::Blocked {
            engine: engine.kind().to_string(),
        });
    }

    debug!(
        "{} returned {} raw results (selector: {:?})",
        engine.kind(),
        links.len(),
        selector_used
    );

    Ok(EngineSearchOutcome {
        links,
        selector_used,
        page_title,
        page_url,
    })
}

/// Fallback snippet heuristic: the longest nearby text chunk exceeding 20
/// characters that isn't identical to the title.
pub(crate) fn fallback_snippet(element: &ElementRef<'_>, title: &str) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|t| t.len() > 20 && *t != title)
        .max_by_key(|t| t.len())
        .unwrap_or_default()
        .to_string()
}

/// Extracts trimmed text of the first match of `selector` inside `element`.
pub(crate) fn first_text(element: &ElementRef<'_>, selector: &scraper::Selector) -> Option<String> {
    element
        .select(selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Parses a CSS selector, mapping failures onto the crate error type.
pub(crate) fn parse_selector(css: &str) -> Result<scraper::Selector> {
    scraper::Selector::parse(css)
        .map_err(|e| ScrapeError::Parse(format!("failed to parse selector '{}': {:?}", css, e)))
}

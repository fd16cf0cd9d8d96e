//! Tiered multi-engine search orchestration.
//!
//! Fast tier first (DuckDuckGo + Startpage concurrently), Bing only when the
//! fast tier came up short, and a final all-engines pass when everything
//! else produced nothing. Engine failures are isolated: one engine erroring
//! or timing out never fails the search as a whole.

use std::collections::HashSet;
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use crate::engines::{engine_for, perform_search, EngineKind, RawSearchLink};
use crate::harden::harden_page;
use crate::page::BrowserSession;
use crate::score::calculate_score;
use crate::Result;

/// Wall-clock budget for one engine invocation, navigation included.
pub const ENGINE_TIMEOUT: Duration = Duration::from_secs(8);

/// Default number of results returned when the caller does not say.
pub const DEFAULT_RESULT_LIMIT: usize = 10;

/// Result hosts that point back into an engine rather than out to the web.
const ENGINE_HOSTS: &[&str] = &["duckduckgo.com", "startpage.com", "bing.com"];

/// A finished search result. Scores are an internal ranking detail and are
/// not part of the returned shape; `source` names the engine that first
/// surfaced the link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub source: EngineKind,
}

/// Terminal state of one engine invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Success,
    Error,
    Timeout,
    Skipped,
}

/// Per-engine diagnostics for one search.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub engine: EngineKind,
    pub state: EngineState,
    pub results: usize,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Merge accounting across all engines that actually ran.
#[derive(Debug, Clone, Serialize)]
pub struct DedupStats {
    pub raw_results: usize,
    pub unique_results: usize,
    pub duplicates_removed: usize,
    pub final_results: usize,
}

/// Diagnostics bundle accompanying every search response.
#[derive(Debug, Clone, Serialize)]
pub struct SearchDebug {
    pub query: String,
    pub per_engine_limit: usize,
    pub engines: Vec<EngineStatus>,
    pub dedup: DedupStats,
}

/// Ranked results plus diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    pub debug: SearchDebug,
}

/// How many results to request from each engine. Engines over-fetch so the
/// merged set survives dedup and filtering.
pub fn per_engine_count(limit: usize) -> usize {
    (((limit as f64) * 0.8).ceil() as usize).max(3)
}

/// Unique-result threshold above which the fallback tier is skipped.
pub fn skip_threshold(limit: usize) -> usize {
    (((limit as f64) * 0.7).ceil() as usize).max(5)
}

/// Canonical dedup key: lowercased `scheme://host/path`, dropping query and
/// fragment. Unparseable URLs fall back to the trimmed raw string.
pub fn dedup_key(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => match parsed.host_str() {
            Some(host) => {
                format!("{}://{}{}", parsed.scheme(), host, parsed.path()).to_lowercase()
            }
            None => url.trim().to_lowercase(),
        },
        Err(_) => url.trim().to_lowercase(),
    }
}

/// Runs the tiered search against a live browser session and returns ranked,
/// deduplicated results.
pub async fn run_search(
    session: &dyn BrowserSession,
    query: &str,
    limit: usize,
) -> Result<SearchResponse> {
    let limit = if limit == 0 { DEFAULT_RESULT_LIMIT } else { limit };
    let per_engine = per_engine_count(limit);

    let mut statuses: Vec<EngineStatus> = Vec::new();
    let mut merged: Vec<(EngineKind, RawSearchLink)> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    let mut raw_total = 0usize;

    // Fast tier.
    let fast = [EngineKind::DuckDuckGo, EngineKind::Startpage];
    let outcomes = run_engines(session, &fast, query, per_engine).await;
    for (kind, outcome, duration_ms) in outcomes {
        raw_total +=
            merge_outcome(kind, outcome, duration_ms, &mut statuses, &mut merged, &mut seen);
    }

    // Fallback tier, skipped when the fast tier already has enough uniques.
    if merged.len() >= skip_threshold(limit) {
        debug!(
            "skipping bing: {} unique results >= threshold {}",
            merged.len(),
            skip_threshold(limit)
        );
        statuses.push(EngineStatus {
            engine: EngineKind::Bing,
            state: EngineState::Skipped,
            results: 0,
            duration_ms: 0,
            error: None,
        });
    } else {
        let outcomes = run_engines(session, &[EngineKind::Bing], query, per_engine).await;
        for (kind, outcome, duration_ms) in outcomes {
            raw_total +=
                merge_outcome(kind, outcome, duration_ms, &mut statuses, &mut merged, &mut seen);
        }
    }

    // Everything failed or was filtered out; try all engines once more
    // together.
    if merged.is_empty() {
        warn!("no results from tiered search for '{}', retrying all engines", query);
        // Every engine runs again, so the earlier statuses are stale;
        // replace them to keep one entry per engine in the debug bundle.
        statuses.clear();
        let outcomes = run_engines(session, &EngineKind::ALL, query, per_engine).await;
        for (kind, outcome, duration_ms) in outcomes {
            raw_total +=
                merge_outcome(kind, outcome, duration_ms, &mut statuses, &mut merged, &mut seen);
        }
    }

    let unique = merged.len();
    let mut scored: Vec<(f64, EngineKind, RawSearchLink)> = merged
        .into_iter()
        .map(|(source, link)| (calculate_score(&link, query), source, link))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);

    let results: Vec<SearchResult> = scored
        .into_iter()
        .map(|(_, source, link)| SearchResult {
            title: link.title,
            url: link.url,
            snippet: link.snippet,
            source,
        })
        .collect();

    let debug = SearchDebug {
        query: query.to_string(),
        per_engine_limit: per_engine,
        engines: statuses,
        dedup: DedupStats {
            raw_results: raw_total,
            unique_results: unique,
            duplicates_removed: raw_total - unique,
            final_results: results.len(),
        },
    };

    Ok(SearchResponse { results, debug })
}

/// Runs a set of engines concurrently, each on its own auxiliary page with
/// its own timeout. Pages are always closed, including on error and timeout.
async fn run_engines(
    session: &dyn BrowserSession,
    kinds: &[EngineKind],
    query: &str,
    count: usize,
) -> Vec<(EngineKind, std::result::Result<Vec<RawSearchLink>, EngineState>, u64)> {
    let futures: Vec<_> = kinds
        .iter()
        .map(|&kind| run_one_engine(session, kind, query, count))
        .collect();
    join_all(futures).await
}

async fn run_one_engine(
    session: &dyn BrowserSession,
    kind: EngineKind,
    query: &str,
    count: usize,
) -> (EngineKind, std::result::Result<Vec<RawSearchLink>, EngineState>, u64) {
    let engine = engine_for(kind);
    let started = std::time::Instant::now();

    let page = match session.open_page().await {
        Ok(page) => page,
        Err(e) => {
            warn!("{}: failed to open page: {}", kind, e);
            return (kind, Err(EngineState::Error), elapsed_ms(started));
        }
    };

    let attempt = async {
        harden_page(page.as_ref()).await?;
        perform_search(page.as_ref(), engine, query, count).await
    };
    let outcome = match tokio::time::timeout(ENGINE_TIMEOUT, attempt).await {
        Ok(Ok(outcome)) => Ok(filter_links(kind, outcome.links)),
        Ok(Err(e)) => {
            warn!("{}: search failed: {}", kind, e);
            Err(EngineState::Error)
        }
        Err(_) => {
            warn!("{}: search timed out after {:?}", kind, ENGINE_TIMEOUT);
            Err(EngineState::Timeout)
        }
    };

    if let Err(e) = page.close().await {
        warn!("{}: failed to close search page: {}", kind, e);
    }

    (kind, outcome, elapsed_ms(started))
}

fn elapsed_ms(started: std::time::Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Unwraps redirect URLs and drops links that are unusable after cleaning:
/// near-empty titles, non-http targets, and links pointing back into an
/// engine.
fn filter_links(kind: EngineKind, links: Vec<RawSearchLink>) -> Vec<RawSearchLink> {
    let engine = engine_for(kind);
    links
        .into_iter()
        .filter_map(|mut link| {
            link.url = engine.clean_url(&link.url);
            if link.title.trim().chars().count() <= 3 {
                return None;
            }
            if !link.url.starts_with("http://") && !link.url.starts_with("https://") {
                return None;
            }
            let host = Url::parse(&link.url)
                .ok()
                .and_then(|u| u.host_str().map(str::to_string))?;
            let internal = ENGINE_HOSTS
                .iter()
                .any(|e| host == *e || host.ends_with(&format!(".{}", e)));
            (!internal).then_some(link)
        })
        .collect()
}

/// Folds one engine outcome into the merged list, recording its status and
/// returning how many raw links it contributed.
fn merge_outcome(
    kind: EngineKind,
    outcome: std::result::Result<Vec<RawSearchLink>, EngineState>,
    duration_ms: u64,
    statuses: &mut Vec<EngineStatus>,
    merged: &mut Vec<(EngineKind, RawSearchLink)>,
    seen: &mut HashSet<String>,
) -> usize {
    match outcome {
        Ok(links) => {
            let raw = links.len();
            let mut kept = 0usize;
            for link in links {
                if seen.insert(dedup_key(&link.url)) {
                    merged.push((kind, link));
                    kept += 1;
                }
            }
            statuses.push(EngineStatus {
                engine: kind,
                state: EngineState::Success,
                results: kept,
                duration_ms,
                error: None,
            });
            raw
        }
        Err(state) => {
            statuses.push(EngineStatus {
                engine: kind,
                state,
                results: 0,
                duration_ms,
                error: match state {
                    EngineState::Timeout => Some("engine timed out".to_string()),
                    _ => Some("engine invocation failed".to_string()),
                },
            });
            0
        }
    }
}

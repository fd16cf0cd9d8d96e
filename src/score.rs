//! Relevance scoring for aggregated search results.
//!
//! `calculate_score` is a pure function of (result, query): no hidden state,
//! identical inputs always yield identical output. The weight table is an
//! immutable configuration record, never mutated at runtime. Scores are
//! clamped to `[0, MAX_SCORE]` and used only for sort ordering; they are
//! stripped before results leave the orchestrator.

use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

use chrono::{Datelike, NaiveDate, Utc};
use regex::Regex;
use url::Url;

use crate::engines::RawSearchLink;

/// Hard upper bound for any score.
pub const MAX_SCORE: f64 = 150.0;

/// Meaningful short tokens kept despite the >2 character filter.
const SHORT_TOKEN_ALLOWLIST: &[&str] = &[
    "ai", "uk", "js", "go", "ui", "ux", "vr", "ar", "ml", "dl", "it", "io",
];

/// Immutable scoring weights.
#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    pub title_word: f64,
    pub title_substring: f64,
    pub snippet_word: f64,
    pub snippet_substring: f64,
    pub domain_exact: f64,
    pub domain_affix: f64,
    pub domain_contains: f64,
    pub path_contains: f64,
    pub synergy_per_token: f64,
    pub synergy_cap: f64,
    pub coverage_scale: f64,
    pub combo_all_areas: f64,
    pub combo_two_with_url: f64,
    pub combo_title_snippet: f64,
    pub diversity_per_token: f64,
    pub authority: f64,
    pub brand: f64,
    pub recency_very_recent: f64,
    pub recency_recent: f64,
    pub recency_moderate: f64,
    pub recency_fair: f64,
    pub long_title_penalty: f64,
    pub informative_snippet_bonus: f64,
    pub short_snippet_penalty: f64,
}

/// Default weight table.
pub const DEFAULT_WEIGHTS: ScoreWeights = ScoreWeights {
    title_word: 25.0,
    title_substring: 12.0,
    snippet_word: 12.0,
    snippet_substring: 6.0,
    domain_exact: 30.0,
    domain_affix: 18.0,
    domain_contains: 10.0,
    path_contains: 6.0,
    synergy_per_token: 6.0,
    synergy_cap: 18.0,
    coverage_scale: 20.0,
    combo_all_areas: 10.0,
    combo_two_with_url: 6.0,
    combo_title_snippet: 4.0,
    diversity_per_token: 3.0,
    authority: 8.0,
    brand: 20.0,
    recency_very_recent: 25.0,
    recency_recent: 18.0,
    recency_moderate: 10.0,
    recency_fair: 5.0,
    long_title_penalty: 5.0,
    informative_snippet_bonus: 5.0,
    short_snippet_penalty: 5.0,
};

/// Splits a query into scoring tokens: lowercased whitespace-separated
/// terms longer than two characters, plus the short-token allow-list.
pub fn tokenize_query(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .filter(|t| t.chars().count() > 2 || SHORT_TOKEN_ALLOWLIST.contains(&t.as_str()))
        .collect()
}

/// Root domain of a URL: second-to-last dot-separated label of the
/// hostname after stripping a leading `www.`.
pub(crate) fn root_domain(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let labels: Vec<&str> = host.split('.').collect();
    match labels.len() {
        0 => None,
        1 => Some(labels[0].to_string()),
        n => Some(labels[n - 2].to_string()),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchStrength {
    None,
    Substring,
    Word,
}

fn match_in_text(haystack_lower: &str, token: &str) -> MatchStrength {
    if !haystack_lower.contains(token) {
        return MatchStrength::None;
    }
    let pattern = format!(r"\b{}\b", regex::escape(token));
    match Regex::new(&pattern) {
        Ok(re) if re.is_match(haystack_lower) => MatchStrength::Word,
        _ => MatchStrength::Substring,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Area {
    Title,
    Snippet,
    Url,
}

/// Scores one result against a query using the default weights and the
/// current date for recency.
pub fn calculate_score(link: &RawSearchLink, query: &str) -> f64 {
    score_with_reference(link, query, Utc::now().date_naive())
}

/// Deterministic scoring core: all date arithmetic is relative to `today`.
pub fn score_with_reference(link: &RawSearchLink, query: &str, today: NaiveDate) -> f64 {
    let w = &DEFAULT_WEIGHTS;
    let tokens = tokenize_query(query);

    let title_lower = link.title.to_lowercase();
    let snippet_lower = link.snippet.to_lowercase();
    let url_lower = link.url.to_lowercase();
    let root = root_domain(&link.url).unwrap_or_default();
    let path_lower = Url::parse(&link.url)
        .map(|u| u.path().to_lowercase())
        .unwrap_or_default();

    let mut score = 0.0;
    let mut synergy = 0.0;
    let mut matched_combos = 0usize;
    let mut distinct_matched = 0usize;
    let mut union_areas: Vec<Area> = Vec::new();

    for token in &tokens {
        let mut areas: Vec<Area> = Vec::new();

        match match_in_text(&title_lower, token) {
            MatchStrength::Word => {
                score += w.title_word;
                areas.push(Area::Title);
            }
            MatchStrength::Substring => {
                score += w.title_substring;
                areas.push(Area::Title);
            }
            MatchStrength::None => {}
        }

        match match_in_text(&snippet_lower, token) {
            MatchStrength::Word => {
                score += w.snippet_word;
                areas.push(Area::Snippet);
            }
            MatchStrength::Substring => {
                score += w.snippet_substring;
                areas.push(Area::Snippet);
            }
            MatchStrength::None => {}
        }

        // URL tiers, highest first: exact root domain, domain affix,
        // domain substring, path substring.
        if !root.is_empty() && root == *token {
            score += w.domain_exact;
            areas.push(Area::Url);
        } else if !root.is_empty() && (root.starts_with(token.as_str()) || root.ends_with(token.as_str())) {
            score += w.domain_affix;
            areas.push(Area::Url);
        } else if !root.is_empty() && root.contains(token.as_str()) {
            score += w.domain_contains;
            areas.push(Area::Url);
        } else if path_lower.contains(token.as_str()) {
            score += w.path_contains;
            areas.push(Area::Url);
        }

        if areas.len() >= 2 {
            synergy += w.synergy_per_token;
        }
        matched_combos += areas.len();
        if !areas.is_empty() {
            distinct_matched += 1;
        }
        for area in areas {
            if !union_areas.contains(&area) {
                union_areas.push(area);
            }
        }
    }

    score += synergy.min(w.synergy_cap);

    if !tokens.is_empty() {
        let coverage = matched_combos as f64 / (tokens.len() * 3) as f64;
        score += coverage * w.coverage_scale;
    }

    let has = |a: Area| union_areas.contains(&a);
    if has(Area::Title) && has(Area::Snippet) && has(Area::Url) {
        score += w.combo_all_areas;
    } else if union_areas.len() == 2 && has(Area::Url) {
        score += w.combo_two_with_url;
    } else if union_areas.len() == 2 && has(Area::Title) && has(Area::Snippet) {
        score += w.combo_title_snippet;
    }

    score += distinct_matched.saturating_sub(1) as f64 * w.diversity_per_token;

    if is_authority_domain(&url_lower, &root) {
        score += w.authority;
    }

    if !root.is_empty() && tokens.iter().any(|t| *t == root) {
        score += w.brand;
    }

    // Recency is scaled by a quality factor so a fresh-but-irrelevant
    // result cannot outrank an old-but-relevant one.
    let recency = recency_bonus(&snippet_lower, &url_lower, today, w);
    if recency > 0.0 {
        let quality = (score / 50.0).clamp(0.3, 1.0);
        score += recency * quality;
    }

    if link.title.chars().count() > 100 {
        score -= w.long_title_penalty;
    }
    let snippet_len = link.snippet.chars().count();
    if (50..=300).contains(&snippet_len) {
        score += w.informative_snippet_bonus;
    } else if snippet_len < 20 {
        score -= w.short_snippet_penalty;
    }

    score.clamp(0.0, MAX_SCORE)
}

/// Short, clean two-label domains (no hyphens/underscores) read as
/// established sites.
fn is_authority_domain(url_lower: &str, root: &str) -> bool {
    let Ok(parsed) = Url::parse(url_lower) else {
        return false;
    };
    let Some(host) = parsed.host_str() else {
        return false;
    };
    let host = host.strip_prefix("www.").unwrap_or(host);
    let labels: Vec<&str> = host.split('.').collect();
    labels.len() == 2
        && !root.is_empty()
        && root.chars().count() <= 12
        && !host.contains('-')
        && !host.contains('_')
}

fn iso_date_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d{4})-(\d{2})-(\d{2})\b").unwrap())
}

fn day_month_year_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(\d{1,2})\s+(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]*\s+(\d{4})\b",
        )
        .unwrap()
    })
}

fn hours_ago_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d+)\s+(?:hour|minute)s?\s+ago\b").unwrap())
}

fn days_ago_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(\d+)\s+days?\s+ago\b").unwrap())
}

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

fn month_number(name: &str) -> Option<u32> {
    let lower = name.to_lowercase();
    MONTH_NAMES
        .iter()
        .position(|m| lower.starts_with(m))
        .map(|i| i as u32 + 1)
}

/// Regex matching the current or previous month name with the current year,
/// memoised per month. The cache is bounded: it is cleared before it can
/// grow past a year's worth of keys.
fn month_year_regex(today: NaiveDate) -> Regex {
    static CACHE: OnceLock<Mutex<HashMap<String, Regex>>> = OnceLock::new();
    let cache = CACHE.get_or_init(|| Mutex::new(HashMap::new()));

    let key = format!("{}-{:02}", today.year(), today.month());
    if let Ok(mut guard) = cache.lock() {
        if let Some(re) = guard.get(&key) {
            return re.clone();
        }
        let current = MONTH_NAMES[today.month0() as usize];
        let previous = MONTH_NAMES[today.month0().checked_sub(1).unwrap_or(11) as usize];
        let pattern = format!(
            r"(?i)\b(?:{}|{})[a-z]*\s+{}\b",
            current,
            previous,
            today.year()
        );
        let re = Regex::new(&pattern).unwrap_or_else(|_| Regex::new(r"\bnever-matches\b").unwrap());
        if guard.len() >= 12 {
            guard.clear();
        }
        guard.insert(key, re.clone());
        return re;
    }
    Regex::new(r"\bnever-matches\b").unwrap()
}

fn parse_absolute_date(text: &str) -> Option<NaiveDate> {
    if let Some(caps) = iso_date_regex().captures(text) {
        let y = caps[1].parse().ok()?;
        let m = caps[2].parse().ok()?;
        let d = caps[3].parse().ok()?;
        if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
            return Some(date);
        }
    }
    if let Some(caps) = day_month_year_regex().captures(text) {
        let d = caps[1].parse().ok()?;
        let m = month_number(&caps[2])?;
        let y = caps[3].parse().ok()?;
        if let Some(date) = NaiveDate::from_ymd_opt(y, m, d) {
            return Some(date);
        }
    }
    None
}

fn bucket_for_age(age_days: i64, w: &ScoreWeights) -> f64 {
    if age_days < 2 {
        w.recency_very_recent
    } else if age_days < 7 {
        w.recency_recent
    } else if age_days < 30 {
        w.recency_moderate
    } else if age_days < 180 {
        w.recency_fair
    } else {
        0.0
    }
}

/// Raw (unscaled) recency bonus. Absolute dates in the snippet or URL win;
/// relative-language patterns are the fallback.
fn recency_bonus(snippet_lower: &str, url_lower: &str, today: NaiveDate, w: &ScoreWeights) -> f64 {
    for text in [snippet_lower, url_lower] {
        if let Some(date) = parse_absolute_date(text) {
            let age = (today - date).num_days().max(0);
            return bucket_for_age(age, w);
        }
    }

    if snippet_lower.contains("today") || hours_ago_regex().is_match(snippet_lower) {
        return w.recency_very_recent;
    }
    if let Some(caps) = days_ago_regex().captures(snippet_lower) {
        if let Ok(n) = caps[1].parse::<i64>() {
            return bucket_for_age(n, w);
        }
    }
    if snippet_lower.contains("yesterday") || snippet_lower.contains("this week") {
        return w.recency_recent;
    }

    let year = today.year().to_string();
    if url_lower.contains(&format!("/{}/", year)) || url_lower.contains(&format!("/{}-", year)) {
        return w.recency_moderate;
    }
    if month_year_regex(today).is_match(snippet_lower) {
        return w.recency_moderate;
    }

    0.0
}

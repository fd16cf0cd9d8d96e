//! Integration tests driving the runner and orchestrator against mock
//! browser sessions.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use scrapeflow::engines::{engine_for, EngineKind};
use scrapeflow::ops::pdf::{generate_pdf, PdfParams, PdfPayload};
use scrapeflow::{
    acquire_healthy_session, calculate_score, goto_with_retry, run_search, BrowserRunner,
    BrowserSession, EngineState, ImageFormat, InterceptPolicy, NavigateOptions, PageDriver,
    PdfOptions, Result, ScrapeError, SessionLease, SessionPool, SlotStatus, Viewport,
};

/// Call counters and navigation log shared across one mock browser.
#[derive(Default)]
struct MockState {
    opened_pages: AtomicUsize,
    closed_pages: AtomicUsize,
    disconnects: AtomicUsize,
    goto_urls: Mutex<Vec<String>>,
    /// `(url marker, html)` pairs; `content()` serves the first fixture
    /// whose marker appears in the page's current URL.
    fixtures: Vec<(&'static str, String)>,
}

impl MockState {
    fn visited(&self, marker: &str) -> bool {
        self.goto_urls
            .lock()
            .unwrap()
            .iter()
            .any(|u| u.contains(marker))
    }
}

struct MockPage {
    state: Arc<MockState>,
    current_url: Mutex<Option<String>>,
    goto_error: Option<String>,
}

#[async_trait]
impl PageDriver for MockPage {
    async fn goto(&self, url: &str, _opts: &NavigateOptions) -> Result<()> {
        self.state.goto_urls.lock().unwrap().push(url.to_string());
        if let Some(message) = &self.goto_error {
            return Err(ScrapeError::Navigation(message.clone()));
        }
        *self.current_url.lock().unwrap() = Some(url.to_string());
        Ok(())
    }

    async fn set_user_agent(&self, _user_agent: &str) -> Result<()> {
        Ok(())
    }

    async fn set_viewport(&self, _viewport: Viewport) -> Result<()> {
        Ok(())
    }

    async fn set_extra_headers(&self, _headers: &[(&str, &str)]) -> Result<()> {
        Ok(())
    }

    async fn inject_on_new_document(&self, _script: &str) -> Result<()> {
        Ok(())
    }

    async fn set_intercept_policy(&self, _policy: InterceptPolicy) -> Result<()> {
        Ok(())
    }

    async fn wait_for_selector(&self, _css: &str, _timeout: Duration) -> Result<bool> {
        Ok(true)
    }

    async fn content(&self) -> Result<String> {
        let current = self.current_url.lock().unwrap().clone().unwrap_or_default();
        for (marker, html) in &self.state.fixtures {
            if current.contains(marker) {
                return Ok(html.clone());
            }
        }
        Ok(pad_html("<html><body>empty</body></html>"))
    }

    async fn evaluate(&self, _script: &str) -> Result<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }

    async fn title(&self) -> Result<Option<String>> {
        Ok(Some("mock page".to_string()))
    }

    async fn url(&self) -> Result<Option<String>> {
        Ok(self.current_url.lock().unwrap().clone())
    }

    async fn screenshot(
        &self,
        _format: ImageFormat,
        _full_page: bool,
        _quality: Option<u8>,
    ) -> Result<Vec<u8>> {
        Ok(vec![0x89, 0x50, 0x4e, 0x47])
    }

    async fn pdf(&self, _opts: &PdfOptions) -> Result<Vec<u8>> {
        Ok(b"%PDF-1.4 mock".to_vec())
    }

    async fn emulate_media(&self, _media: &str) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state.closed_pages.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockSession {
    state: Arc<MockState>,
    probe_ok: bool,
}

#[async_trait]
impl BrowserSession for MockSession {
    async fn probe(&self) -> Result<()> {
        if self.probe_ok {
            Ok(())
        } else {
            Err(ScrapeError::Browser("probe refused".to_string()))
        }
    }

    async fn open_page(&self) -> Result<Box<dyn PageDriver>> {
        self.state.opened_pages.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockPage {
            state: Arc::clone(&self.state),
            current_url: Mutex::new(None),
            goto_error: None,
        }))
    }

    async fn disconnect(&self) -> Result<()> {
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockPool {
    state: Arc<MockState>,
    acquire_calls: AtomicUsize,
    fail_acquire: bool,
    probe_ok: bool,
    statuses: Mutex<Vec<(String, SlotStatus)>>,
}

impl MockPool {
    fn new(state: Arc<MockState>) -> Self {
        Self {
            state,
            acquire_calls: AtomicUsize::new(0),
            fail_acquire: false,
            probe_ok: true,
            statuses: Mutex::new(Vec::new()),
        }
    }

    fn last_status(&self) -> Option<(String, SlotStatus)> {
        self.statuses.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl SessionPool for MockPool {
    async fn acquire(&self) -> Result<SessionLease> {
        let n = self.acquire_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_acquire {
            return Err(ScrapeError::Browser("pool is empty".to_string()));
        }
        Ok(SessionLease {
            session_id: format!("session-{}", n),
            slot_id: format!("slot-{}", n),
            session: Box::new(MockSession {
                state: Arc::clone(&self.state),
                probe_ok: self.probe_ok,
            }),
        })
    }

    async fn report_status(
        &self,
        slot_id: &str,
        status: SlotStatus,
        _reason: Option<&str>,
    ) -> Result<()> {
        self.statuses
            .lock()
            .unwrap()
            .push((slot_id.to_string(), status));
        Ok(())
    }
}

/// Pads a fixture so the block-detection size heuristic does not trip.
fn pad_html(html: &str) -> String {
    format!("{}<!-- {} -->", html, "x".repeat(1200))
}

fn ddg_fixture() -> String {
    let mut results = String::new();
    let targets = [
        ("Cloudflare Workers", "https%3A%2F%2Fworkers.cloudflare.com%2F"),
        (
            "Workers documentation",
            "https%3A%2F%2Fdevelopers.cloudflare.com%2Fworkers%2F",
        ),
        (
            "Cloudflare Workers blog",
            "https%3A%2F%2Fblog.cloudflare.com%2Fworkers%2F",
        ),
        (
            "Workers examples",
            "https%3A%2F%2Fgithub.com%2Fcloudflare%2Fworkers-sdk",
        ),
    ];
    for (title, encoded) in targets {
        results.push_str(&format!(
            r#"<div class="result">
                 <h2 class="result__title"><a href="https://duckduckgo.com/l/?uddg={}&rut=x">{}</a></h2>
                 <a class="result__snippet">Deploy serverless code instantly across the globe with Cloudflare Workers.</a>
               </div>"#,
            encoded, title
        ));
    }
    pad_html(&format!("<html><body>{}</body></html>", results))
}

fn startpage_fixture() -> String {
    let mut results = String::new();
    let targets = [
        ("Workers pricing", "https://workers.cloudflare.com/pricing"),
        ("Workers KV storage", "https://developers.cloudflare.com/kv/"),
        // Duplicate of a DuckDuckGo result after normalization.
        ("Cloudflare Workers home", "https://workers.cloudflare.com/"),
    ];
    for (title, href) in targets {
        results.push_str(&format!(
            r#"<div class="w-gl__result">
                 <a class="w-gl__result-title" href="{}"><h3>{}</h3></a>
                 <p class="w-gl__description">Cloudflare Workers lets you run code at the edge without servers.</p>
               </div>"#,
            href, title
        ));
    }
    pad_html(&format!("<html><body>{}</body></html>", results))
}

fn search_fixtures() -> Vec<(&'static str, String)> {
    vec![
        ("duckduckgo.com", ddg_fixture()),
        ("startpage.com", startpage_fixture()),
    ]
}

// --- operation runner ---

#[tokio::test]
async fn runner_releases_resources_on_success() {
    let state = Arc::new(MockState::default());
    let pool = Arc::new(MockPool::new(Arc::clone(&state)));
    let runner = BrowserRunner::new(Arc::clone(&pool) as Arc<dyn SessionPool>);

    let value = runner
        .run_with_browser(Duration::from_secs(5), |_ctx| {
            Box::pin(async { Ok(41 + 1) })
        })
        .await
        .unwrap();

    assert_eq!(value, 42);
    assert_eq!(state.opened_pages.load(Ordering::SeqCst), 1);
    assert_eq!(state.closed_pages.load(Ordering::SeqCst), 1);
    assert_eq!(state.disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(pool.last_status().unwrap().1, SlotStatus::Idle);
}

#[tokio::test]
async fn runner_releases_resources_on_error() {
    let state = Arc::new(MockState::default());
    let pool = Arc::new(MockPool::new(Arc::clone(&state)));
    let runner = BrowserRunner::new(Arc::clone(&pool) as Arc<dyn SessionPool>);

    let result: std::result::Result<(), _> = runner
        .run_with_browser(Duration::from_secs(5), |_ctx| {
            Box::pin(async { Err(ScrapeError::Navigation("dns failure".to_string())) })
        })
        .await;

    assert!(result.is_err());
    assert_eq!(state.closed_pages.load(Ordering::SeqCst), 1);
    assert_eq!(state.disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(pool.last_status().unwrap().1, SlotStatus::Error);
}

#[tokio::test(start_paused = true)]
async fn runner_releases_resources_on_timeout() {
    let state = Arc::new(MockState::default());
    let pool = Arc::new(MockPool::new(Arc::clone(&state)));
    let runner = BrowserRunner::new(Arc::clone(&pool) as Arc<dyn SessionPool>);

    let result: std::result::Result<(), _> = runner
        .run_with_browser(Duration::from_millis(100), |_ctx| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
        })
        .await;

    match result {
        Err(ScrapeError::OperationTimeout { ms }) => assert_eq!(ms, 100),
        other => panic!("expected timeout, got {:?}", other.err()),
    }
    assert_eq!(state.closed_pages.load(Ordering::SeqCst), 1);
    assert_eq!(state.disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(pool.last_status().unwrap().1, SlotStatus::Error);
}

// --- session acquisition ---

#[tokio::test(start_paused = true)]
async fn acquisition_exhaustion_after_bounded_retries() {
    let state = Arc::new(MockState::default());
    let mut pool = MockPool::new(state);
    pool.fail_acquire = true;

    let result = acquire_healthy_session(&pool).await;
    match result {
        Err(ScrapeError::SessionExhausted { attempts, .. }) => assert_eq!(attempts, 5),
        other => panic!("expected exhaustion, got {:?}", other.err()),
    }
    assert_eq!(pool.acquire_calls.load(Ordering::SeqCst), 5);
}

#[tokio::test(start_paused = true)]
async fn acquisition_disconnects_unhealthy_sessions() {
    let state = Arc::new(MockState::default());
    let mut pool = MockPool::new(Arc::clone(&state));
    pool.probe_ok = false;

    let result = acquire_healthy_session(&pool).await;
    assert!(result.is_err());
    // Every probed-and-rejected session is disconnected.
    assert_eq!(state.disconnects.load(Ordering::SeqCst), 5);
    assert!(pool
        .statuses
        .lock()
        .unwrap()
        .iter()
        .all(|(_, s)| *s == SlotStatus::Error));
}

#[tokio::test]
async fn acquisition_reports_busy_on_success() {
    let state = Arc::new(MockState::default());
    let pool = MockPool::new(state);

    let lease = acquire_healthy_session(&pool).await.unwrap();
    assert_eq!(lease.slot_id, "slot-0");
    assert_eq!(pool.last_status().unwrap().1, SlotStatus::Busy);
}

// --- navigation retry ---

#[tokio::test(start_paused = true)]
async fn retry_terminates_after_max_attempts() {
    let state = Arc::new(MockState::default());
    let page = MockPage {
        state: Arc::clone(&state),
        current_url: Mutex::new(None),
        goto_error: Some("net::ERR_CONNECTION_RESET".to_string()),
    };

    let result = goto_with_retry(
        &page,
        "https://example.com",
        &NavigateOptions::default(),
        3,
    )
    .await;

    assert!(result.is_err());
    assert_eq!(state.goto_urls.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn retry_gives_up_immediately_on_permanent_errors() {
    let state = Arc::new(MockState::default());
    let page = MockPage {
        state: Arc::clone(&state),
        current_url: Mutex::new(None),
        goto_error: Some("certificate has expired".to_string()),
    };

    let result = goto_with_retry(
        &page,
        "https://example.com",
        &NavigateOptions::default(),
        3,
    )
    .await;

    assert!(result.is_err());
    assert_eq!(state.goto_urls.lock().unwrap().len(), 1);
}

// --- tiered search ---

#[tokio::test]
async fn fast_tier_skips_bing_when_enough_uniques() {
    let state = Arc::new(MockState {
        fixtures: search_fixtures(),
        ..Default::default()
    });
    let session = MockSession {
        state: Arc::clone(&state),
        probe_ok: true,
    };

    let response = run_search(&session, "cloudflare workers", 5).await.unwrap();

    // 4 + 3 raw results with one duplicate leaves 6 uniques, over the
    // threshold of 5, so the fallback engine never navigates.
    assert!(!state.visited("bing.com"));
    assert!(state.visited("duckduckgo.com"));
    assert!(state.visited("startpage.com"));

    let bing = response
        .debug
        .engines
        .iter()
        .find(|s| s.engine == EngineKind::Bing)
        .unwrap();
    assert_eq!(bing.state, EngineState::Skipped);
}

#[tokio::test]
async fn search_end_to_end_contract() {
    let state = Arc::new(MockState {
        fixtures: search_fixtures(),
        ..Default::default()
    });
    let session = MockSession {
        state: Arc::clone(&state),
        probe_ok: true,
    };

    let response = run_search(&session, "cloudflare workers", 5).await.unwrap();

    assert!(response.results.len() <= 5);
    assert!(!response.results.is_empty());
    assert_eq!(
        response.debug.dedup.final_results,
        response.results.len()
    );
    assert_eq!(response.debug.dedup.duplicates_removed, 1);

    // Sources only from engines that actually ran.
    for result in &response.results {
        assert_ne!(result.source, EngineKind::Bing);
    }

    // Redirect wrappers are unwrapped before results leave the orchestrator.
    for result in &response.results {
        assert!(result.url.starts_with("https://"));
        assert!(!result.url.contains("uddg="));
    }

    // Internal ordering is by descending score.
    let scores: Vec<f64> = response
        .results
        .iter()
        .map(|r| {
            calculate_score(
                &scrapeflow::engines::RawSearchLink {
                    title: r.title.clone(),
                    url: r.url.clone(),
                    snippet: r.snippet.clone(),
                },
                "cloudflare workers",
            )
        })
        .collect();
    for pair in scores.windows(2) {
        assert!(pair[0] >= pair[1]);
    }

    // Search pages are auxiliary and always closed.
    assert_eq!(
        state.opened_pages.load(Ordering::SeqCst),
        state.closed_pages.load(Ordering::SeqCst)
    );
}

#[tokio::test]
async fn recovery_pass_reports_each_engine_once() {
    // No fixtures: every engine parses zero results, so the tiered run
    // comes up empty and the all-engines retry kicks in.
    let state = Arc::new(MockState::default());
    let session = MockSession {
        state: Arc::clone(&state),
        probe_ok: true,
    };

    let response = run_search(&session, "cloudflare workers", 5).await.unwrap();

    assert!(response.results.is_empty());
    assert_eq!(response.debug.engines.len(), 3);
    let distinct: std::collections::HashSet<EngineKind> = response
        .debug
        .engines
        .iter()
        .map(|s| s.engine)
        .collect();
    assert_eq!(distinct.len(), 3);

    // Fast tier, fallback, and retry each opened their own pages.
    assert_eq!(state.opened_pages.load(Ordering::SeqCst), 6);
    assert_eq!(
        state.opened_pages.load(Ordering::SeqCst),
        state.closed_pages.load(Ordering::SeqCst)
    );
}

// --- pdf rendering ---

#[tokio::test]
async fn pdf_payload_matches_requested_encoding() {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    let state = Arc::new(MockState::default());
    let page = MockPage {
        state: Arc::clone(&state),
        current_url: Mutex::new(None),
        goto_error: None,
    };

    let params = PdfParams {
        url: "https://example.com/report".to_string(),
        landscape: false,
        base64: false,
        wait_after_load_ms: None,
    };
    let binary = generate_pdf(&page, &params).await.unwrap();
    let PdfPayload::Binary(bytes) = &binary.payload else {
        panic!("expected raw bytes by default, got {:?}", binary.payload);
    };
    assert_eq!(bytes.as_slice(), b"%PDF-1.4 mock");
    assert_eq!(binary.metadata.size, bytes.len());
    assert_eq!(binary.metadata.content_type, "application/pdf");

    let encoded = generate_pdf(&page, &PdfParams { base64: true, ..params })
        .await
        .unwrap();
    let PdfPayload::Base64(data) = &encoded.payload else {
        panic!("expected base64 payload, got {:?}", encoded.payload);
    };
    assert_eq!(STANDARD.decode(data).unwrap().as_slice(), bytes.as_slice());
    // Size reports the document itself, not the encoded string.
    assert_eq!(encoded.metadata.size, bytes.len());
}

// --- scoring and decoding properties ---

#[test]
fn scoring_is_idempotent_and_bounded() {
    let link = scrapeflow::engines::RawSearchLink {
        title: "Cloudflare Workers documentation".to_string(),
        url: "https://developers.cloudflare.com/workers/".to_string(),
        snippet: "Build serverless applications on Cloudflare's global network.".to_string(),
    };
    let first = calculate_score(&link, "cloudflare workers");
    let second = calculate_score(&link, "cloudflare workers");
    assert_eq!(first, second);
    assert!((0.0..=150.0).contains(&first));
}

#[test]
fn duckduckgo_redirect_decoding_contract() {
    let cleaned = engine_for(EngineKind::DuckDuckGo)
        .clean_url("https://duckduckgo.com/l/?uddg=https%3A%2F%2Fexample.com%2Fpage&rut=x");
    assert_eq!(cleaned, "https://example.com/page");
}

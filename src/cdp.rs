//! Chrome DevTools Protocol implementations of the session and page traits.
//!
//! Only available when the `headless` Cargo feature is enabled. A
//! [`LocalBrowserPool`] manages a single lazily launched browser process and
//! hands out leases over it with slot-level concurrency control; [`CdpPage`]
//! drives one tab via chromiumoxide.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetEmulatedMediaParams,
};
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams as FetchEnableParams, EventRequestPaused,
    FailRequestParams, HeaderEntry, RequestPattern, RequestStage,
};
use chromiumoxide::cdp::browser_protocol::network::{
    ErrorReason, ResourceType, SetExtraHttpHeadersParams, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat, PrintToPdfParams,
};
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::harden::{SEC_FETCH_DEFAULTS, USER_AGENT};
use crate::page::{
    BrowserSession, ImageFormat, InterceptPolicy, NavigateOptions, PageDriver, PdfOptions,
    Viewport, WaitUntil,
};
use crate::pool::{SessionLease, SessionPool, SlotStatus};
use crate::{Result, ScrapeError};

/// Well-known Chrome/Chromium executable paths per platform.
#[cfg(target_os = "macos")]
const KNOWN_PATHS: &[&str] = &[
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    "/Applications/Google Chrome Canary.app/Contents/MacOS/Google Chrome Canary",
    "/Applications/Microsoft Edge.app/Contents/MacOS/Microsoft Edge",
];

#[cfg(all(unix, not(target_os = "macos")))]
const KNOWN_PATHS: &[&str] = &[
    "/opt/google/chrome/chrome",
    "/opt/chromium.org/chromium/chrome",
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
];

/// Well-known command names to search in PATH.
const KNOWN_COMMANDS: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
];

/// Detects an existing Chrome/Chromium installation.
///
/// Checks the `CHROME` environment variable, then well-known command names
/// in PATH, then well-known filesystem paths.
pub fn detect_chrome() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("CHROME") {
        let p = PathBuf::from(&path);
        if p.exists() {
            debug!("chrome found via CHROME env var: {}", path);
            return Some(p);
        }
    }

    for cmd in KNOWN_COMMANDS {
        if let Ok(path) = which::which(cmd) {
            debug!("chrome found in PATH: {}", path.display());
            return Some(path);
        }
    }

    for path_str in KNOWN_PATHS {
        let p = Path::new(path_str);
        if p.exists() {
            debug!("chrome found at known path: {}", path_str);
            return Some(p.to_path_buf());
        }
    }

    None
}

/// Configuration for the local browser pool.
#[derive(Debug, Clone)]
pub struct LocalPoolConfig {
    /// Maximum number of concurrently leased sessions (tabs).
    pub max_sessions: usize,
    /// Whether to run the browser in headless mode.
    pub headless: bool,
    /// Path to the Chrome/Chromium executable. If `None`, auto-detected.
    pub chrome_path: Option<String>,
    /// Proxy URL for the browser to use.
    pub proxy_url: Option<String>,
    /// Additional launch arguments for Chrome.
    pub launch_args: Vec<String>,
}

impl Default for LocalPoolConfig {
    fn default() -> Self {
        Self {
            max_sessions: 4,
            headless: true,
            chrome_path: None,
            proxy_url: None,
            launch_args: Vec::new(),
        }
    }
}

/// A session pool over one lazily launched local browser process.
///
/// Each lease is backed by the shared browser; a semaphore bounds how many
/// leases are out at once. Slot status reports land in an in-memory table,
/// mirroring what a remote pool manager would track.
pub struct LocalBrowserPool {
    config: LocalPoolConfig,
    browser: Mutex<Option<Arc<Browser>>>,
    handler_task: Mutex<Option<JoinHandle<()>>>,
    permits: Arc<Semaphore>,
    slot_statuses: std::sync::Mutex<HashMap<String, SlotStatus>>,
    next_slot: AtomicU64,
}

impl LocalBrowserPool {
    pub fn new(config: LocalPoolConfig) -> Self {
        let max = config.max_sessions;
        Self {
            config,
            browser: Mutex::new(None),
            handler_task: Mutex::new(None),
            permits: Arc::new(Semaphore::new(max)),
            slot_statuses: std::sync::Mutex::new(HashMap::new()),
            next_slot: AtomicU64::new(0),
        }
    }

    /// Last reported status for a slot. Test and diagnostics hook.
    pub fn slot_status(&self, slot_id: &str) -> Option<SlotStatus> {
        self.slot_statuses
            .lock()
            .ok()
            .and_then(|statuses| statuses.get(slot_id).copied())
    }

    /// Lazily launches the browser and returns a shared handle.
    async fn acquire_browser(&self) -> Result<Arc<Browser>> {
        let mut guard = self.browser.lock().await;
        if let Some(ref browser) = *guard {
            return Ok(Arc::clone(browser));
        }

        debug!("launching local browser");
        let mut builder = BrowserConfig::builder();

        if self.config.headless {
            builder = builder.arg("--headless=new");
        }

        if let Some(ref path) = self.config.chrome_path {
            builder = builder.chrome_executable(path);
        } else {
            let detected = detect_chrome().ok_or_else(|| {
                ScrapeError::Browser(
                    "no Chrome/Chromium installation found; set chrome_path or CHROME".to_string(),
                )
            })?;
            debug!("using chrome at: {}", detected.display());
            builder = builder.chrome_executable(detected);
        }

        // Chrome's --headless=new mode injects "HeadlessChrome" into the
        // default UA, which result pages trivially detect and block.
        builder = builder.arg(format!("--user-agent={}", USER_AGENT));
        builder = builder.arg("--disable-blink-features=AutomationControlled");

        builder = builder
            .arg("--disable-gpu")
            .arg("--no-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-extensions")
            .arg("--disable-background-networking")
            .arg("--disable-default-apps")
            .arg("--disable-sync")
            .arg("--disable-translate")
            .arg("--mute-audio")
            .arg("--no-first-run");

        if let Some(ref proxy) = self.config.proxy_url {
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }
        for arg in &self.config.launch_args {
            builder = builder.arg(arg);
        }

        let browser_config = builder
            .build()
            .map_err(|e| ScrapeError::Browser(format!("failed to build browser config: {}", e)))?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| ScrapeError::Browser(format!("failed to launch browser: {}", e)))?;

        let task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("browser CDP handler error: {}", e);
                }
            }
            debug!("browser CDP handler exited");
        });
        *self.handler_task.lock().await = Some(task);

        let browser = Arc::new(browser);
        *guard = Some(Arc::clone(&browser));
        Ok(browser)
    }

    /// Shuts down the browser process and its event handler.
    pub async fn shutdown(&self) {
        if let Some(task) = self.handler_task.lock().await.take() {
            task.abort();
        }
        if self.browser.lock().await.take().is_some() {
            debug!("local browser pool shut down");
        }
    }
}

#[async_trait]
impl SessionPool for LocalBrowserPool {
    async fn acquire(&self) -> Result<SessionLease> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| ScrapeError::Browser(format!("session semaphore closed: {}", e)))?;
        let browser = self.acquire_browser().await?;

        let slot = self.next_slot.fetch_add(1, Ordering::Relaxed);
        let slot_id = format!("slot-{}", slot);
        let session_id = format!("local-{}", slot);
        if let Ok(mut statuses) = self.slot_statuses.lock() {
            statuses.insert(slot_id.clone(), SlotStatus::Idle);
        }

        Ok(SessionLease {
            session_id,
            slot_id,
            session: Box::new(CdpSession {
                browser,
                _permit: permit,
            }),
        })
    }

    async fn report_status(
        &self,
        slot_id: &str,
        status: SlotStatus,
        reason: Option<&str>,
    ) -> Result<()> {
        let mut statuses = self
            .slot_statuses
            .lock()
            .map_err(|_| ScrapeError::Other("slot status table poisoned".to_string()))?;
        if !statuses.contains_key(slot_id) {
            return Err(ScrapeError::InvalidParams(format!(
                "unknown slot: {}",
                slot_id
            )));
        }
        if let Some(reason) = reason {
            debug!("slot {} -> {} ({})", slot_id, status, reason);
        }
        statuses.insert(slot_id.to_string(), status);
        Ok(())
    }
}

/// One leased view of the shared local browser.
struct CdpSession {
    browser: Arc<Browser>,
    _permit: tokio::sync::OwnedSemaphorePermit,
}

#[async_trait]
impl BrowserSession for CdpSession {
    async fn probe(&self) -> Result<()> {
        self.browser
            .version()
            .await
            .map(|_| ())
            .map_err(|e| ScrapeError::Browser(format!("browser probe failed: {}", e)))
    }

    async fn open_page(&self) -> Result<Box<dyn PageDriver>> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| ScrapeError::Browser(format!("failed to open page: {}", e)))?;
        Ok(Box::new(CdpPage {
            page,
            intercept_task: std::sync::Mutex::new(None),
        }))
    }

    async fn disconnect(&self) -> Result<()> {
        // The browser process is shared with other leases; releasing the
        // permit on drop is the whole disconnect.
        Ok(())
    }
}

/// One browser tab driven over CDP.
struct CdpPage {
    page: Page,
    intercept_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

fn browser_err(context: &str, e: impl std::fmt::Display) -> ScrapeError {
    ScrapeError::Browser(format!("{}: {}", context, e))
}

impl CdpPage {
    fn replace_intercept_task(&self, task: Option<JoinHandle<()>>) {
        if let Ok(mut slot) = self.intercept_task.lock() {
            if let Some(previous) = slot.take() {
                previous.abort();
            }
            *slot = task;
        }
    }

    async fn wait_for_dom_content(&self) -> Result<()> {
        loop {
            let state: String = self
                .page
                .evaluate("document.readyState")
                .await
                .ok()
                .and_then(|v| v.into_value().ok())
                .unwrap_or_default();
            if state == "interactive" || state == "complete" {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

#[async_trait]
impl PageDriver for CdpPage {
    async fn goto(&self, url: &str, opts: &NavigateOptions) -> Result<()> {
        let navigation = async {
            self.page
                .goto(url)
                .await
                .map_err(|e| ScrapeError::Navigation(format!("navigation to {} failed: {}", url, e)))?;
            match opts.wait_until {
                WaitUntil::Load => {
                    self.page
                        .wait_for_navigation()
                        .await
                        .map_err(|e| ScrapeError::Navigation(format!("load wait failed: {}", e)))?;
                    Ok(())
                }
                WaitUntil::DomContentLoaded => self.wait_for_dom_content().await,
            }
        };
        tokio::time::timeout(opts.timeout, navigation)
            .await
            .map_err(|_| {
                ScrapeError::Navigation(format!(
                    "navigation to {} timed out after {:?}",
                    url, opts.timeout
                ))
            })?
    }

    async fn set_user_agent(&self, user_agent: &str) -> Result<()> {
        self.page
            .set_user_agent(SetUserAgentOverrideParams::new(user_agent))
            .await
            .map(|_| ())
            .map_err(|e| browser_err("failed to set user agent", e))
    }

    async fn set_viewport(&self, viewport: Viewport) -> Result<()> {
        self.page
            .execute(SetDeviceMetricsOverrideParams::new(
                viewport.width as i64,
                viewport.height as i64,
                1.0,
                false,
            ))
            .await
            .map(|_| ())
            .map_err(|e| browser_err("failed to set viewport", e))
    }

    async fn set_extra_headers(&self, headers: &[(&str, &str)]) -> Result<()> {
        let map: serde_json::Map<String, serde_json::Value> = headers
            .iter()
            .map(|(name, value)| ((*name).to_string(), serde_json::Value::from(*value)))
            .collect();
        self.page
            .execute(SetExtraHttpHeadersParams::new(
                chromiumoxide::cdp::browser_protocol::network::Headers::new(
                    serde_json::Value::Object(map),
                ),
            ))
            .await
            .map(|_| ())
            .map_err(|e| browser_err("failed to set headers", e))
    }

    async fn inject_on_new_document(&self, script: &str) -> Result<()> {
        self.page
            .execute(AddScriptToEvaluateOnNewDocumentParams::new(script))
            .await
            .map(|_| ())
            .map_err(|e| browser_err("failed to register init script", e))
    }

    async fn set_intercept_policy(&self, policy: InterceptPolicy) -> Result<()> {
        let pattern = RequestPattern::builder()
            .url_pattern("*")
            .request_stage(RequestStage::Request)
            .build();
        self.page
            .execute(FetchEnableParams::builder().pattern(pattern).build())
            .await
            .map_err(|e| browser_err("failed to enable request interception", e))?;

        let mut events = self
            .page
            .event_listener::<EventRequestPaused>()
            .await
            .map_err(|e| browser_err("failed to listen for paused requests", e))?;

        let page = self.page.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                let request_id = event.request_id.clone();

                let heavy = matches!(
                    event.resource_type,
                    ResourceType::Image
                        | ResourceType::Stylesheet
                        | ResourceType::Font
                        | ResourceType::Media
                );
                if policy.block_heavy_resources && heavy {
                    let fail = FailRequestParams::new(request_id, ErrorReason::BlockedByClient);
                    if let Err(e) = page.execute(fail).await {
                        debug!("failed to block request: {}", e);
                    }
                    continue;
                }

                let mut params = ContinueRequestParams::new(request_id);
                if policy.fill_sec_fetch_headers {
                    if let Some(headers) = backfill_sec_fetch(&event) {
                        params.headers = Some(headers);
                    }
                }
                if let Err(e) = page.execute(params).await {
                    debug!("failed to continue request: {}", e);
                }
            }
        });
        self.replace_intercept_task(Some(task));
        Ok(())
    }

    async fn wait_for_selector(&self, css: &str, timeout: Duration) -> Result<bool> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.page.find_element(css).await.is_ok() {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn content(&self) -> Result<String> {
        self.page
            .content()
            .await
            .map_err(|e| browser_err("failed to get page content", e))
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| browser_err("evaluation failed", e))?;
        result
            .into_value()
            .map_err(|e| browser_err("evaluation result decode failed", e))
    }

    async fn title(&self) -> Result<Option<String>> {
        self.page
            .get_title()
            .await
            .map_err(|e| browser_err("failed to get title", e))
    }

    async fn url(&self) -> Result<Option<String>> {
        self.page
            .url()
            .await
            .map_err(|e| browser_err("failed to get url", e))
    }

    async fn screenshot(
        &self,
        format: ImageFormat,
        full_page: bool,
        quality: Option<u8>,
    ) -> Result<Vec<u8>> {
        let cdp_format = match format {
            ImageFormat::Png => CaptureScreenshotFormat::Png,
            ImageFormat::Jpeg => CaptureScreenshotFormat::Jpeg,
            ImageFormat::Webp => CaptureScreenshotFormat::Webp,
        };
        let mut builder = ScreenshotParams::builder()
            .format(cdp_format)
            .full_page(full_page);
        if let Some(q) = quality {
            builder = builder.quality(q as i64);
        }
        self.page
            .screenshot(builder.build())
            .await
            .map_err(|e| browser_err("screenshot failed", e))
    }

    async fn pdf(&self, opts: &PdfOptions) -> Result<Vec<u8>> {
        let params = PrintToPdfParams {
            landscape: Some(opts.landscape),
            print_background: Some(opts.print_background),
            margin_top: Some(opts.margin_inches),
            margin_bottom: Some(opts.margin_inches),
            margin_left: Some(opts.margin_inches),
            margin_right: Some(opts.margin_inches),
            prefer_css_page_size: Some(opts.prefer_css_page_size),
            ..Default::default()
        };
        self.page
            .pdf(params)
            .await
            .map_err(|e| browser_err("pdf rendering failed", e))
    }

    async fn emulate_media(&self, media: &str) -> Result<()> {
        self.page
            .execute(SetEmulatedMediaParams::builder().media(media).build())
            .await
            .map(|_| ())
            .map_err(|e| browser_err("failed to emulate media", e))
    }

    async fn close(&self) -> Result<()> {
        self.replace_intercept_task(None);
        if let Err(e) = self.page.clone().close().await {
            debug!("page close reported: {}", e);
        }
        Ok(())
    }
}

/// Builds the full header list for a paused request with missing
/// `sec-fetch-*` values filled in. Returns `None` when nothing is missing.
fn backfill_sec_fetch(event: &EventRequestPaused) -> Option<Vec<HeaderEntry>> {
    let existing = event.request.headers.inner();
    let existing_map = existing.as_object()?;

    let has = |name: &str| {
        existing_map
            .keys()
            .any(|k| k.eq_ignore_ascii_case(name))
    };
    let missing: Vec<&(&str, &str)> = SEC_FETCH_DEFAULTS
        .iter()
        .filter(|(name, _)| !has(name))
        .collect();
    if missing.is_empty() {
        return None;
    }

    let mut entries: Vec<HeaderEntry> = existing_map
        .iter()
        .filter_map(|(name, value)| {
            value
                .as_str()
                .map(|v| HeaderEntry::new(name.clone(), v.to_string()))
        })
        .collect();
    for (name, value) in missing {
        entries.push(HeaderEntry::new((*name).to_string(), (*value).to_string()));
    }
    Some(entries)
}

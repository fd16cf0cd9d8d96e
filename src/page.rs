//! Browser session and page driver abstractions.
//!
//! Implementations may drive a locally launched browser or a remote one
//! handed out by a session pool; the CDP-backed implementation lives in
//! `cdp` behind the `headless` feature. All configuration is passed per
//! call; the traits themselves are stateless seams.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// Event to consider a navigation finished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WaitUntil {
    /// Wait for the full page load event.
    #[default]
    Load,
    /// Wait only until the DOM is parsed; subresources may still be loading.
    DomContentLoaded,
}

/// Options for a single navigation.
#[derive(Debug, Clone)]
pub struct NavigateOptions {
    /// Completion event to wait for.
    pub wait_until: WaitUntil,
    /// Maximum time to wait for the navigation to complete.
    pub timeout: Duration,
}

impl Default for NavigateOptions {
    fn default() -> Self {
        Self {
            wait_until: WaitUntil::Load,
            timeout: Duration::from_secs(30),
        }
    }
}

impl NavigateOptions {
    /// DOM-content-loaded navigation with the given timeout, as used for
    /// search result pages where subresources are irrelevant.
    pub fn dom_content_loaded(timeout: Duration) -> Self {
        Self {
            wait_until: WaitUntil::DomContentLoaded,
            timeout,
        }
    }
}

/// Page viewport dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

/// Request interception behavior for a page.
///
/// `block_heavy_resources` aborts image/stylesheet/font/media requests to
/// cut load time on result pages. `fill_sec_fetch_headers` back-fills
/// missing `sec-fetch-*` headers on outgoing requests without overwriting
/// values the page already set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterceptPolicy {
    pub block_heavy_resources: bool,
    pub fill_sec_fetch_headers: bool,
}

impl InterceptPolicy {
    /// Header back-fill only, installed during page hardening.
    pub fn sec_fetch_only() -> Self {
        Self {
            block_heavy_resources: false,
            fill_sec_fetch_headers: true,
        }
    }

    /// Heavy-resource blocking plus header back-fill, used for search and
    /// text-extraction navigations.
    pub fn block_heavy() -> Self {
        Self {
            block_heavy_resources: true,
            fill_sec_fetch_headers: true,
        }
    }
}

/// Screenshot output encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
}

impl ImageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Webp => "webp",
        }
    }
}

/// Options for PDF rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfOptions {
    /// Landscape orientation.
    pub landscape: bool,
    /// Print background graphics.
    pub print_background: bool,
    /// Uniform margin in inches.
    pub margin_inches: f64,
    /// Honor CSS-declared page size over the paper format.
    pub prefer_css_page_size: bool,
}

impl Default for PdfOptions {
    fn default() -> Self {
        Self {
            landscape: false,
            print_background: true,
            margin_inches: 0.5,
            prefer_css_page_size: false,
        }
    }
}

/// A live connection to a browser session.
///
/// Disconnecting drops the connection but never terminates the underlying
/// session; a pooled session must stay reusable after release.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Cheap fail-fast health check (version/handshake request).
    async fn probe(&self) -> Result<()>;

    /// Opens a fresh page (tab) on this session.
    async fn open_page(&self) -> Result<Box<dyn PageDriver>>;

    /// Drops the connection, leaving the remote session alive.
    async fn disconnect(&self) -> Result<()>;
}

/// Operations the core needs from a single browser page.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Navigates to a URL and waits per the supplied options.
    async fn goto(&self, url: &str, opts: &NavigateOptions) -> Result<()>;

    /// Overrides the user agent for this page.
    async fn set_user_agent(&self, user_agent: &str) -> Result<()>;

    /// Sets the page viewport.
    async fn set_viewport(&self, viewport: Viewport) -> Result<()>;

    /// Sets extra HTTP headers sent with every request from this page.
    async fn set_extra_headers(&self, headers: &[(&str, &str)]) -> Result<()>;

    /// Registers a script evaluated on every new document before any of the
    /// page's own scripts run.
    async fn inject_on_new_document(&self, script: &str) -> Result<()>;

    /// Enables request interception with the given policy.
    async fn set_intercept_policy(&self, policy: InterceptPolicy) -> Result<()>;

    /// Waits for a CSS selector to match, returning whether it appeared
    /// within the timeout. Absence is not an error; a CAPTCHA or error page
    /// may have loaded instead and the caller detects that from content.
    async fn wait_for_selector(&self, css: &str, timeout: Duration) -> Result<bool>;

    /// Returns the full rendered HTML of the page.
    async fn content(&self) -> Result<String>;

    /// Evaluates a JavaScript expression and returns its JSON value.
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    /// Returns the current document title, if any.
    async fn title(&self) -> Result<Option<String>>;

    /// Returns the current page URL, if any.
    async fn url(&self) -> Result<Option<String>>;

    /// Captures a screenshot of the page.
    async fn screenshot(
        &self,
        format: ImageFormat,
        full_page: bool,
        quality: Option<u8>,
    ) -> Result<Vec<u8>>;

    /// Renders the page to PDF.
    async fn pdf(&self, opts: &PdfOptions) -> Result<Vec<u8>>;

    /// Switches CSS media emulation (e.g. "print").
    async fn emulate_media(&self, media: &str) -> Result<()>;

    /// Closes the page. Closing an already-closed page is not an error.
    async fn close(&self) -> Result<()>;
}

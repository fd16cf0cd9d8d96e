//! PDF rendering with consent-banner suppression.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::nav::{goto_with_retry, DEFAULT_NAV_ATTEMPTS};
use crate::ops::post_load_wait;
use crate::page::{InterceptPolicy, NavigateOptions, PageDriver, PdfOptions};
use crate::Result;

#[derive(Debug, Clone, Deserialize)]
pub struct PdfParams {
    pub url: String,
    #[serde(default)]
    pub landscape: bool,
    /// Return the document base64 encoded instead of as raw bytes.
    #[serde(default)]
    pub base64: bool,
    #[serde(default)]
    pub wait_after_load_ms: Option<u64>,
}

/// Raw bytes by default; a base64 string only when the caller asked for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PdfPayload {
    Binary(Vec<u8>),
    Base64(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct PdfMetadata {
    /// Size of the rendered document in bytes, before any encoding.
    pub size: usize,
    pub content_type: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct PdfResult {
    pub payload: PdfPayload,
    pub metadata: PdfMetadata,
}

/// Known cookie/consent dialog selectors hidden before the page renders.
const CONSENT_SELECTORS: &[&str] = &[
    "#onetrust-consent-sdk",
    "#onetrust-banner-sdk",
    "#CybotCookiebotDialog",
    "#cookie-banner",
    "#cookie-notice",
    ".cookie-banner",
    ".cookie-consent",
    ".cc-window",
    ".gdpr-banner",
    "[id*='cookie-consent']",
    "[class*='cookie-popup']",
    "[aria-label*='cookie']",
];

/// Builds the suppression script: a pre-emptive stylesheet hiding known
/// selectors, a one-shot purge of matching nodes, and a mutation observer
/// that keeps removing re-injected dialogs before disconnecting itself.
fn consent_suppression_script() -> String {
    format!(
        r#"
(() => {{
    const SELECTORS = {selectors_json};
    const style = document.createElement('style');
    style.textContent = SELECTORS.join(', ') + ' {{ display: none !important; visibility: hidden !important; }}';
    (document.head || document.documentElement).appendChild(style);

    const purge = (root) => {{
        for (const sel of SELECTORS) {{
            try {{
                root.querySelectorAll(sel).forEach((el) => el.remove());
            }} catch (e) {{}}
        }}
    }};
    purge(document);

    const observer = new MutationObserver(() => purge(document));
    observer.observe(document.documentElement, {{ childList: true, subtree: true }});
    setTimeout(() => observer.disconnect(), {watch_ms});
}})();
"#,
        selectors_json = serde_json::to_string(CONSENT_SELECTORS)
            .unwrap_or_else(|_| "[]".to_string()),
        watch_ms = CONSENT_WATCH_MS,
    )
}

/// How long the mutation watcher keeps purging re-injected dialogs.
const CONSENT_WATCH_MS: u64 = 5000;

/// Navigates and renders the page as PDF with print media emulation.
pub async fn generate_pdf(page: &dyn PageDriver, params: &PdfParams) -> Result<PdfResult> {
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

    page.evaluate(&consent_suppression_script()).await?;
    page.emulate_media("print").await?;

    let opts = PdfOptions {
        landscape: params.landscape,
        ..PdfOptions::default()
    };
    let bytes = page.pdf(&opts).await?;
    let size = bytes.len();
    debug!("rendered {} as {} byte pdf", params.url, size);

    let payload = if params.base64 {
        PdfPayload::Base64(STANDARD.encode(&bytes))
    } else {
        PdfPayload::Binary(bytes)
    };

    Ok(PdfResult {
        payload,
        metadata: PdfMetadata {
            size,
            content_type: "application/pdf",
        },
    })
}

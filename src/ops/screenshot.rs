//! Screenshot capture.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::nav::{goto_with_retry, DEFAULT_NAV_ATTEMPTS};
use crate::ops::post_load_wait;
use crate::page::{ImageFormat, NavigateOptions, PageDriver, Viewport};
use crate::{Result, ScrapeError};

#[derive(Debug, Clone, Deserialize)]
pub struct ScreenshotParams {
    pub url: String,
    #[serde(default)]
    pub format: ImageFormat,
    #[serde(default)]
    pub full_page: bool,
    /// JPEG/WebP quality, 0-100. Ignored for PNG.
    #[serde(default)]
    pub quality: Option<u8>,
    #[serde(default)]
    pub viewport: Option<Viewport>,
    #[serde(default)]
    pub wait_after_load_ms: Option<u64>,
}

/// Captured image, always base64 at this boundary regardless of the
/// underlying capture encoding.
#[derive(Debug, Clone, Serialize)]
pub struct ScreenshotResult {
    pub data: String,
    pub format: ImageFormat,
    pub content_type: String,
    /// Decoded image size in bytes.
    pub size: usize,
}

/// Applies viewport configuration, navigates, and captures the page.
pub async fn capture_screenshot(
    page: &dyn PageDriver,
    params: &ScreenshotParams,
) -> Result<ScreenshotResult> {
    if let Some(q) = params.quality {
        if q > 100 {
            return Err(ScrapeError::InvalidParams(format!(
                "quality must be 0-100, got {}",
                q
            )));
        }
    }

    if let Some(viewport) = params.viewport {
        page.set_viewport(viewport).await?;
    }
    goto_with_retry(
        page,
        &params.url,
        &NavigateOptions::default(),
        DEFAULT_NAV_ATTEMPTS,
    )
    .await?;
    post_load_wait(params.wait_after_load_ms).await;

    let quality = match params.format {
        ImageFormat::Png => None,
        _ => params.quality,
    };
    let bytes = page
        .screenshot(params.format, params.full_page, quality)
        .await?;

    Ok(ScreenshotResult {
        size: bytes.len(),
        data: STANDARD.encode(&bytes),
        format: params.format,
        content_type: format!("image/{}", params.format.as_str()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_defaults() {
        let params: ScreenshotParams =
            serde_json::from_str(r#"{"url": "https://example.com"}"#).unwrap();
        assert_eq!(params.format, ImageFormat::Png);
        assert!(!params.full_page);
        assert!(params.quality.is_none());
        assert!(params.viewport.is_none());
    }

    #[test]
    fn test_params_with_viewport() {
        let params: ScreenshotParams = serde_json::from_str(
            r#"{"url": "https://example.com", "format": "jpeg", "quality": 80,
                "viewport": {"width": 800, "height": 600}}"#,
        )
        .unwrap();
        assert_eq!(params.format, ImageFormat::Jpeg);
        assert_eq!(params.quality, Some(80));
        assert_eq!(params.viewport.unwrap().width, 800);
    }
}

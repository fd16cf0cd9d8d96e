//! Page hardening against bot detection.
//!
//! Everything here runs on a freshly opened page before any navigation.
//! Detection scripts execute at the earliest possible point in a document's
//! life, so the spoofing script must be registered through the browser's
//! on-new-document hook rather than evaluated after navigation starts.

use rand::seq::SliceRandom;
use tracing::debug;

use crate::page::{InterceptPolicy, PageDriver, Viewport};
use crate::Result;

/// Realistic desktop user agent. Headless Chrome injects "HeadlessChrome"
/// into its default UA, which result pages trivially detect and block.
pub const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Common desktop resolutions to randomize the viewport over.
pub const VIEWPORTS: &[Viewport] = &[
    Viewport {
        width: 1920,
        height: 1080,
    },
    Viewport {
        width: 1366,
        height: 768,
    },
    Viewport {
        width: 1536,
        height: 864,
    },
    Viewport {
        width: 1440,
        height: 900,
    },
    Viewport {
        width: 1600,
        height: 900,
    },
];

/// Browser-realistic headers sent with every request from a hardened page.
pub const BASE_HEADERS: &[(&str, &str)] = &[
    (
        "Accept",
        "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,*/*;q=0.8",
    ),
    ("Accept-Language", "en-US,en;q=0.9"),
    (
        "sec-ch-ua",
        "\"Google Chrome\";v=\"131\", \"Chromium\";v=\"131\", \"Not_A Brand\";v=\"24\"",
    ),
    ("sec-ch-ua-mobile", "?0"),
    ("sec-ch-ua-platform", "\"macOS\""),
    ("Upgrade-Insecure-Requests", "1"),
];

/// Baseline `sec-fetch-*` values back-filled by request interception when a
/// request is missing them. Existing values are never overwritten.
pub const SEC_FETCH_DEFAULTS: &[(&str, &str)] = &[
    ("sec-fetch-dest", "document"),
    ("sec-fetch-mode", "navigate"),
    ("sec-fetch-site", "none"),
    ("sec-fetch-user", "?1"),
];

/// Fingerprint-spoofing script registered to run before any page script.
///
/// Based on the puppeteer-extra stealth plugin technique set: automation
/// flags, plugin/language normalization, chrome global stubs, permissions
/// and media interception, WebGL vendor spoofing, screen/viewport tie-in,
/// timing jitter, and iframe navigator inheritance.
pub const STEALTH_SCRIPT: &str = r#"
(() => {
    const origRandom = Math.random;

    // Automation flag
    Object.defineProperty(navigator, 'webdriver', {
        get: () => undefined,
        configurable: true
    });

    // Languages
    Object.defineProperty(navigator, 'languages', {
        get: () => ['en-US', 'en'],
        configurable: true
    });

    // Plausible plugins list
    Object.defineProperty(navigator, 'plugins', {
        get: () => [
            { name: 'Chrome PDF Plugin', filename: 'internal-pdf-viewer', description: 'Portable Document Format' },
            { name: 'Chrome PDF Viewer', filename: 'mhjfbmdgcfjbbpaeojofohoefgiehjai', description: '' },
            { name: 'Native Client', filename: 'internal-nacl-plugin', description: '' }
        ],
        configurable: true
    });

    // chrome global with loadTimes/csi stubs
    if (!window.chrome) {
        window.chrome = {
            runtime: {},
            loadTimes: function() {},
            csi: function() {},
            app: {}
        };
    }

    // Permissions query: report the real Notification state
    if (window.navigator.permissions && window.navigator.permissions.query) {
        const originalQuery = window.navigator.permissions.query.bind(window.navigator.permissions);
        window.navigator.permissions.query = (parameters) => (
            parameters && parameters.name === 'notifications'
                ? Promise.resolve({ state: Notification.permission })
                : originalQuery(parameters)
        );
    }

    // getUserMedia rejects after a short randomized delay instead of
    // throwing synchronously like headless builds do
    if (navigator.mediaDevices) {
        navigator.mediaDevices.getUserMedia = () => new Promise((resolve, reject) => {
            setTimeout(
                () => reject(new DOMException('Permission denied', 'NotAllowedError')),
                100 + origRandom() * 200
            );
        });
    }

    // WebGL vendor/renderer
    if (window.WebGLRenderingContext) {
        const getParameter = WebGLRenderingContext.prototype.getParameter;
        WebGLRenderingContext.prototype.getParameter = function(parameter) {
            if (parameter === 37445) { return 'Intel Inc.'; }
            if (parameter === 37446) { return 'Intel Iris OpenGL Engine'; }
            return getParameter.call(this, parameter);
        };
    }

    // Screen dimensions follow the actual viewport
    Object.defineProperty(screen, 'availWidth', { get: () => window.innerWidth });
    Object.defineProperty(screen, 'availHeight', { get: () => window.innerHeight });

    // Timing jitter against fingerprint clustering
    const origDateNow = Date.now;
    Date.now = () => origDateNow() + Math.floor(origRandom() * 2);
    const origPerfNow = performance.now.bind(performance);
    performance.now = () => origPerfNow() + origRandom() * 0.1;
    Math.random = () => {
        const v = origRandom() + (origRandom() - 0.5) * 1e-9;
        return v < 0 ? 0 : (v >= 1 ? 0.9999999999 : v);
    };

    // Nested frames inherit the spoofed navigator
    const frameDesc = Object.getOwnPropertyDescriptor(HTMLIFrameElement.prototype, 'contentWindow');
    if (frameDesc && frameDesc.get) {
        Object.defineProperty(HTMLIFrameElement.prototype, 'contentWindow', {
            get() {
                const win = frameDesc.get.call(this);
                if (win) {
                    try {
                        Object.defineProperty(win.navigator, 'webdriver', {
                            get: () => undefined,
                            configurable: true
                        });
                    } catch (e) {}
                }
                return win;
            }
        });
    }
})();
"#;

/// Picks a viewport at random from the fixed resolution set.
pub fn random_viewport() -> Viewport {
    let mut rng = rand::thread_rng();
    *VIEWPORTS
        .choose(&mut rng)
        .unwrap_or(&Viewport {
            width: 1920,
            height: 1080,
        })
}

/// Hardens a freshly opened page. Must complete before the first navigation.
pub async fn harden_page(page: &dyn PageDriver) -> Result<Viewport> {
    let viewport = random_viewport();
    debug!(
        "hardening page: viewport {}x{}",
        viewport.width, viewport.height
    );

    page.set_user_agent(USER_AGENT).await?;
    page.set_viewport(viewport).await?;
    page.set_extra_headers(BASE_HEADERS).await?;
    page.inject_on_new_document(STEALTH_SCRIPT).await?;
    page.set_intercept_policy(InterceptPolicy::sec_fetch_only())
        .await?;

    Ok(viewport)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_viewport_from_fixed_set() {
        for _ in 0..50 {
            let vp = random_viewport();
            assert!(VIEWPORTS.contains(&vp));
        }
    }

    #[test]
    fn test_viewports_are_desktop_sized() {
        for vp in VIEWPORTS {
            assert!(vp.width >= 1280);
            assert!(vp.height >= 720);
            assert!(vp.width > vp.height);
        }
    }

    #[test]
    fn test_user_agent_not_headless() {
        assert!(!USER_AGENT.contains("Headless"));
        assert!(USER_AGENT.contains("Chrome/"));
    }

    #[test]
    fn test_base_headers_contain_client_hints() {
        let names: Vec<&str> = BASE_HEADERS.iter().map(|(n, _)| *n).collect();
        assert!(names.contains(&"Accept"));
        assert!(names.contains(&"Accept-Language"));
        assert!(names.contains(&"sec-ch-ua"));
        assert!(names.contains(&"sec-ch-ua-platform"));
    }

    #[test]
    fn test_sec_fetch_defaults_complete() {
        let names: Vec<&str> = SEC_FETCH_DEFAULTS.iter().map(|(n, _)| *n).collect();
        assert_eq!(
            names,
            vec![
                "sec-fetch-dest",
                "sec-fetch-mode",
                "sec-fetch-site",
                "sec-fetch-user"
            ]
        );
    }

    #[test]
    fn test_stealth_script_covers_detection_vectors() {
        assert!(STEALTH_SCRIPT.contains("webdriver"));
        assert!(STEALTH_SCRIPT.contains("navigator, 'languages'"));
        assert!(STEALTH_SCRIPT.contains("navigator, 'plugins'"));
        assert!(STEALTH_SCRIPT.contains("window.chrome"));
        assert!(STEALTH_SCRIPT.contains("permissions.query"));
        assert!(STEALTH_SCRIPT.contains("getUserMedia"));
        assert!(STEALTH_SCRIPT.contains("37445"));
        assert!(STEALTH_SCRIPT.contains("availWidth"));
        assert!(STEALTH_SCRIPT.contains("contentWindow"));
    }
}

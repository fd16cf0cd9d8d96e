//! Navigation with bounded retry on transient network failures.

use std::time::Duration;

use tracing::{debug, warn};

use crate::page::{NavigateOptions, PageDriver};
use crate::Result;

/// Default number of navigation attempts.
pub const DEFAULT_NAV_ATTEMPTS: u32 = 3;

/// Initial retry backoff, doubled per attempt: 1s, 2s, 4s, ...
const NAV_BACKOFF_BASE: Duration = Duration::from_millis(1000);

/// Error-message substrings that identify transient network failures worth
/// retrying. Anything else propagates immediately.
const TRANSIENT_ERROR_PATTERNS: &[&str] = &[
    "net::ERR",
    "connection closed",
    "connection reset",
    "network changed",
    "timed out",
    "timeout",
];

/// Returns whether a navigation error message matches the transient
/// allow-list. Matching is case-insensitive.
pub fn is_transient_nav_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    TRANSIENT_ERROR_PATTERNS
        .iter()
        .any(|p| lower.contains(&p.to_lowercase()))
}

/// Navigates with up to `max_attempts` tries, retrying only allow-listed
/// transient failures with exponential backoff. The original error is
/// propagated unchanged on a non-transient failure or on exhaustion.
pub async fn goto_with_retry(
    page: &dyn PageDriver,
    url: &str,
    opts: &NavigateOptions,
    max_attempts: u32,
) -> Result<()> {
    let mut attempt = 0;

    loop {
        attempt += 1;
        match page.goto(url, opts).await {
            Ok(()) => {
                if attempt > 1 {
                    debug!("navigation to {} succeeded on attempt {}", url, attempt);
                }
                return Ok(());
            }
            Err(e) => {
                let message = e.to_string();
                if attempt >= max_attempts || !is_transient_nav_error(&message) {
                    return Err(e);
                }
                let backoff = NAV_BACKOFF_BASE * 2u32.saturating_pow(attempt - 1);
                warn!(
                    "transient navigation failure for {} (attempt {}/{}), retrying in {:?}: {}",
                    url, attempt, max_attempts, backoff, message
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

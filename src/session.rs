//! Healthy-session acquisition with probing and bounded retry.

use std::time::Duration;

use tracing::{debug, warn};

use crate::pool::{SessionLease, SessionPool, SlotStatus};
use crate::{Result, ScrapeError};

/// Maximum acquisition attempts before giving up.
pub const ACQUIRE_MAX_ATTEMPTS: u32 = 5;

/// Maximum attempts for a single status report.
pub const STATUS_REPORT_MAX_ATTEMPTS: u32 = 3;

/// Initial backoff, doubled per attempt, for both acquisition and reporting.
pub const BACKOFF_BASE: Duration = Duration::from_millis(200);

/// Backoff for the given 1-indexed attempt: 200ms × 2^(attempt−1).
fn backoff_for_attempt(attempt: u32) -> Duration {
    BACKOFF_BASE * 2u32.saturating_pow(attempt.saturating_sub(1))
}

/// Reports slot status with bounded exponential-backoff retry.
///
/// Status reporting is best-effort: callers on the main flow swallow the
/// returned error after retries are exhausted, since a failed status update
/// must never abort an otherwise healthy operation.
pub async fn report_status_with_retry(
    pool: &dyn SessionPool,
    slot_id: &str,
    status: SlotStatus,
    reason: Option<&str>,
) -> Result<()> {
    let mut last_err = None;

    for attempt in 1..=STATUS_REPORT_MAX_ATTEMPTS {
        match pool.report_status(slot_id, status, reason).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                debug!(
                    "status report '{}' for slot {} failed (attempt {}/{}): {}",
                    status, slot_id, attempt, STATUS_REPORT_MAX_ATTEMPTS, e
                );
                last_err = Some(e);
                if attempt < STATUS_REPORT_MAX_ATTEMPTS {
                    tokio::time::sleep(backoff_for_attempt(attempt)).await;
                }
            }
        }
    }

    let err = last_err.unwrap_or_else(|| ScrapeError::Other("status report failed".into()));
    warn!(
        "giving up on status report '{}' for slot {}: {}",
        status, slot_id, err
    );
    Err(err)
}

/// Acquires a session from the pool and probes it before trusting it.
///
/// Unhealthy candidates are reported as `error` (best-effort) and a fresh
/// candidate is requested, up to [`ACQUIRE_MAX_ATTEMPTS`] attempts with
/// exponential backoff. Exhaustion surfaces as `SessionExhausted`.
pub async fn acquire_healthy_session(pool: &dyn SessionPool) -> Result<SessionLease> {
    let mut last_error = String::from("no session candidates offered");

    for attempt in 1..=ACQUIRE_MAX_ATTEMPTS {
        match pool.acquire().await {
            Ok(lease) => match lease.session.probe().await {
                Ok(()) => {
                    debug!(
                        "acquired healthy session {} (slot {}) on attempt {}",
                        lease.session_id, lease.slot_id, attempt
                    );
                    // Best-effort: mark the slot busy for the pool's benefit.
                    let _ = report_status_with_retry(pool, &lease.slot_id, SlotStatus::Busy, None)
                        .await;
                    return Ok(lease);
                }
                Err(probe_err) => {
                    warn!(
                        "session {} failed probe on attempt {}: {}",
                        lease.session_id, attempt, probe_err
                    );
                    last_error = probe_err.to_string();
                    let _ = report_status_with_retry(
                        pool,
                        &lease.slot_id,
                        SlotStatus::Error,
                        Some(&last_error),
                    )
                    .await;
                    let _ = lease.session.disconnect().await;
                }
            },
            Err(acquire_err) => {
                warn!(
                    "session acquisition attempt {}/{} failed: {}",
                    attempt, ACQUIRE_MAX_ATTEMPTS, acquire_err
                );
                last_error = acquire_err.to_string();
            }
        }

        if attempt < ACQUIRE_MAX_ATTEMPTS {
            tokio::time::sleep(backoff_for_attempt(attempt)).await;
        }
    }

    Err(ScrapeError::SessionExhausted {
        attempts: ACQUIRE_MAX_ATTEMPTS,
        last_error,
    })
}

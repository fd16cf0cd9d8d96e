//! Operation runner: the umbrella tying session acquisition, page hardening
//! and caller-supplied operations together with timeout and cleanup.
//!
//! State machine per invocation:
//! `Acquiring -> Hardening -> Executing -> (Idle-Report | Error-Report) -> Released`.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::harden::harden_page;
use crate::page::{BrowserSession, PageDriver};
use crate::pool::{SessionPool, SlotStatus};
use crate::session::{acquire_healthy_session, report_status_with_retry};
use crate::{Result, ScrapeError};

/// Default wall-clock budget for a single operation.
pub const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything an operation gets to work with: the hardened primary page,
/// plus the owning session for operations that open auxiliary pages.
pub struct BrowserContext<'a> {
    pub session: &'a dyn BrowserSession,
    pub page: &'a dyn PageDriver,
}

/// Runs operations against pooled browser sessions.
///
/// When a task spawner is supplied, successful-path idle reports are
/// detached (fire-and-forget); without one they are awaited inline.
pub struct BrowserRunner {
    pool: Arc<dyn SessionPool>,
    spawner: Option<Handle>,
}

impl BrowserRunner {
    /// Creates a runner over the given session pool.
    pub fn new(pool: Arc<dyn SessionPool>) -> Self {
        Self {
            pool,
            spawner: None,
        }
    }

    /// Supplies a runtime handle for detached status reporting.
    pub fn with_spawner(mut self, handle: Handle) -> Self {
        self.spawner = Some(handle);
        self
    }

    /// Returns the session pool this runner draws from.
    pub fn pool(&self) -> &Arc<dyn SessionPool> {
        &self.pool
    }

    /// Acquires a session, opens and hardens one page, races the operation
    /// against `timeout`, reports the session status back to the pool, and
    /// releases all resources on every exit path.
    ///
    /// Exactly one page is opened and closed per invocation; the session is
    /// disconnected (not terminated) and never left in `busy` state.
    pub async fn run_with_browser<T, F>(&self, timeout: Duration, operation: F) -> Result<T>
    where
        T: Send,
        F: for<'a> FnOnce(BrowserContext<'a>) -> BoxFuture<'a, Result<T>> + Send,
    {
        let lease = acquire_healthy_session(self.pool.as_ref()).await?;
        debug!(
            "running operation on session {} (slot {}) with {:?} budget",
            lease.session_id, lease.slot_id, timeout
        );

        let result = match lease.session.open_page().await {
            Err(open_err) => Err(open_err),
            Ok(page) => {
                let execution = async {
                    harden_page(page.as_ref()).await?;
                    operation(BrowserContext {
                        session: lease.session.as_ref(),
                        page: page.as_ref(),
                    })
                    .await
                };

                let outcome = match tokio::time::timeout(timeout, execution).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ScrapeError::OperationTimeout {
                        ms: timeout.as_millis() as u64,
                    }),
                };

                // The page is closed no matter how the operation ended; a
                // failed close must not mask the operation's own result.
                if let Err(close_err) = page.close().await {
                    warn!("failed to close page after operation: {}", close_err);
                }

                outcome
            }
        };

        match &result {
            Ok(_) => self.report_idle(&lease.slot_id).await,
            Err(e) => {
                let reason = e.to_string();
                let _ = report_status_with_retry(
                    self.pool.as_ref(),
                    &lease.slot_id,
                    SlotStatus::Error,
                    Some(&reason),
                )
                .await;
            }
        }

        // Disconnect, not terminate: the session stays poolable.
        if let Err(disc_err) = lease.session.disconnect().await {
            warn!(
                "failed to disconnect session {}: {}",
                lease.session_id, disc_err
            );
        }

        result
    }

    async fn report_idle(&self, slot_id: &str) {
        match &self.spawner {
            Some(handle) => {
                let pool = Arc::clone(&self.pool);
                let slot = slot_id.to_string();
                handle.spawn(async move {
                    let _ =
                        report_status_with_retry(pool.as_ref(), &slot, SlotStatus::Idle, None)
                            .await;
                });
            }
            None => {
                let _ = report_status_with_retry(
                    self.pool.as_ref(),
                    slot_id,
                    SlotStatus::Idle,
                    None,
                )
                .await;
            }
        }
    }
}

//! Session pool collaborator interface.
//!
//! The pool manager that tracks session health and hands out remote browser
//! connections lives outside this crate. This module defines the seam it is
//! consumed through: acquire a candidate session, report slot status back.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::page::BrowserSession;
use crate::Result;

/// Pool-visible health status of a session slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotStatus {
    /// Session is healthy and available for reuse.
    Idle,
    /// Session is currently executing an operation.
    Busy,
    /// Session failed a probe or an operation.
    Error,
}

impl std::fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotStatus::Idle => write!(f, "idle"),
            SlotStatus::Busy => write!(f, "busy"),
            SlotStatus::Error => write!(f, "error"),
        }
    }
}

/// A candidate session handed out by the pool manager.
///
/// The lease carries the live connection plus the identifiers needed to
/// report status back. The underlying remote session is shared, not owned:
/// disconnecting the lease must leave it poolable.
pub struct SessionLease {
    /// Opaque session identifier assigned by the pool manager.
    pub session_id: String,
    /// Identifier of the pool slot this session occupies.
    pub slot_id: String,
    /// Live connection to the remote browser.
    pub session: Box<dyn BrowserSession>,
}

impl std::fmt::Debug for SessionLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLease")
            .field("session_id", &self.session_id)
            .field("slot_id", &self.slot_id)
            .finish_non_exhaustive()
    }
}

/// Trait for the external browser-session pool manager.
#[async_trait]
pub trait SessionPool: Send + Sync {
    /// Returns a candidate session together with its slot identifier.
    ///
    /// The candidate is not guaranteed healthy; callers probe it before use.
    async fn acquire(&self) -> Result<SessionLease>;

    /// Reports the status of a pool slot, optionally with a failure reason.
    async fn report_status(
        &self,
        slot_id: &str,
        status: SlotStatus,
        reason: Option<&str>,
    ) -> Result<()>;
}

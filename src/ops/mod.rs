//! Content extraction operations.
//!
//! Each operation is an independent async function driven through the
//! operation runner: it receives a hardened page, navigates, and returns
//! typed data. The service layer wraps results in the generic
//! [`OperationOutcome`] envelope with per-operation credit costs.

use serde::Serialize;

pub mod content;
pub mod markdown;
pub mod pdf;
pub mod scrape;
pub mod screenshot;

/// The operation types priced by the credit table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Search,
    GetContent,
    ExtractLinks,
    ScrapeElements,
    ExtractMarkdown,
    ExtractJson,
    Screenshot,
    Pdf,
}

/// Fixed per-operation credit cost, charged only on success.
pub fn credit_cost(kind: OperationKind) -> u32 {
    match kind {
        OperationKind::Search => 1,
        OperationKind::GetContent => 1,
        OperationKind::ExtractLinks => 1,
        OperationKind::ScrapeElements => 2,
        OperationKind::ExtractMarkdown => 2,
        OperationKind::ExtractJson => 2,
        OperationKind::Screenshot => 3,
        OperationKind::Pdf => 5,
    }
}

/// Generic result envelope shared by every operation exposed upward.
/// Failures always carry zero credit cost.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationOutcome<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    pub credits_cost: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,
}

/// Human-readable failure description; internal identifiers never leak here.
#[derive(Debug, Clone, Serialize)]
pub struct OperationError {
    pub message: String,
}

impl<T> OperationOutcome<T> {
    /// A successful outcome priced by the credit table.
    pub fn ok(data: T, kind: OperationKind) -> Self {
        Self {
            success: true,
            data: Some(data),
            credits_cost: credit_cost(kind),
            error: None,
        }
    }

    /// A failed outcome. Never charges credits.
    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            credits_cost: 0,
            error: Some(OperationError {
                message: message.into(),
            }),
        }
    }
}

/// Optional settle delay after navigation, used by operations whose targets
/// render content client-side.
pub(crate) async fn post_load_wait(wait_ms: Option<u64>) {
    if let Some(ms) = wait_ms.filter(|ms| *ms > 0) {
        tokio::time::sleep(std::time::Duration::from_millis(ms.min(10_000))).await;
    }
}

//! # scrapeflow
//!
//! Browser-session orchestration and multi-engine search aggregation.
//!
//! This library drives pooled headless browser sessions through hardened,
//! timeout-bounded operations:
//!
//! - Session acquisition with health probing and bounded retry
//! - Anti-bot page hardening (fingerprint spoofing, header normalization)
//! - Tiered multi-engine search with dedup and relevance scoring
//! - Content extraction: markdown, element scraping, PDF, screenshots
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use scrapeflow::cdp::{LocalBrowserPool, LocalPoolConfig};
//! use scrapeflow::storage::{MemoryMetadataStore, MemoryObjectStore};
//! use scrapeflow::ScrapeService;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = Arc::new(LocalBrowserPool::new(LocalPoolConfig::default()));
//!     let service = ScrapeService::new(
//!         pool,
//!         Arc::new(MemoryObjectStore::new()),
//!         Arc::new(MemoryMetadataStore::new()),
//!     );
//!
//!     let outcome = service.search("rust async runtime", 10).await;
//!     if let Some(response) = outcome.data {
//!         for result in response.results {
//!             println!("{}: {}", result.title, result.url);
//!         }
//!     }
//!     Ok(())
//! }
//! ```

mod error;
mod harden;
mod nav;
mod page;
mod pool;
mod runner;
mod score;
mod search;
mod service;
mod session;

pub mod engines;
pub mod ops;
pub mod storage;

#[cfg(feature = "headless")]
pub mod cdp;

pub use error::{Result, ScrapeError};
pub use harden::{harden_page, random_viewport, USER_AGENT, VIEWPORTS};
pub use nav::{goto_with_retry, is_transient_nav_error, DEFAULT_NAV_ATTEMPTS};
pub use page::{
    BrowserSession, ImageFormat, InterceptPolicy, NavigateOptions, PageDriver, PdfOptions,
    Viewport, WaitUntil,
};
pub use pool::{SessionLease, SessionPool, SlotStatus};
pub use runner::{BrowserContext, BrowserRunner, DEFAULT_OPERATION_TIMEOUT};
pub use score::{calculate_score, MAX_SCORE};
pub use search::{
    dedup_key, run_search, DedupStats, EngineState, EngineStatus, SearchDebug, SearchResponse,
    SearchResult, DEFAULT_RESULT_LIMIT, ENGINE_TIMEOUT,
};
pub use service::{ScrapeService, StoredPdf, StoredScreenshot};
pub use session::acquire_healthy_session;

//! Service facade: every operation exposed upward, wrapped in the generic
//! success/failure envelope.
//!
//! Each call runs through the operation runner (session acquisition,
//! hardening, timeout, guaranteed release) and maps its `Result` onto an
//! [`OperationOutcome`]. Screenshot and PDF artifacts are additionally
//! persisted to the object and metadata stores.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::ops::content::{
    extract_json, extract_links, get_content, ContentParams, ContentResult, ExtractJsonParams,
    LinkItem,
};
use crate::ops::markdown::{extract_markdown, MarkdownParams, MarkdownResult};
use crate::ops::pdf::{generate_pdf, PdfParams, PdfPayload, PdfResult};
use crate::ops::scrape::{scrape_elements, ScrapeParams, ScrapeResult};
use crate::ops::screenshot::{capture_screenshot, ScreenshotParams, ScreenshotResult};
use crate::ops::{OperationKind, OperationOutcome};
use crate::pool::SessionPool;
use crate::runner::{BrowserRunner, DEFAULT_OPERATION_TIMEOUT};
use crate::search::{run_search, SearchResponse};
use crate::storage::{ArtifactRecord, ArtifactType, MetadataStore, ObjectStore};
use crate::{Result, ScrapeError};

/// A screenshot plus its stored artifact record.
#[derive(Debug, Clone, Serialize)]
pub struct StoredScreenshot {
    pub screenshot: ScreenshotResult,
    pub record: ArtifactRecord,
}

/// A rendered PDF plus its stored artifact record.
#[derive(Debug, Clone, Serialize)]
pub struct StoredPdf {
    pub pdf: PdfResult,
    pub record: ArtifactRecord,
}

pub struct ScrapeService {
    runner: BrowserRunner,
    objects: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
}

impl ScrapeService {
    pub fn new(
        pool: Arc<dyn SessionPool>,
        objects: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            runner: BrowserRunner::new(pool),
            objects,
            metadata,
        }
    }

    /// Supplies a runtime handle for detached pool status reporting.
    pub fn with_spawner(mut self, handle: tokio::runtime::Handle) -> Self {
        self.runner = BrowserRunner::new(Arc::clone(self.runner.pool())).with_spawner(handle);
        self
    }

    pub fn runner(&self) -> &BrowserRunner {
        &self.runner
    }

    /// Tiered multi-engine search.
    pub async fn search(&self, query: &str, limit: usize) -> OperationOutcome<SearchResponse> {
        let query = query.to_string();
        let result = self
            .runner
            .run_with_browser(DEFAULT_OPERATION_TIMEOUT, move |ctx| {
                Box::pin(async move { run_search(ctx.session, &query, limit).await })
            })
            .await;
        envelope(OperationKind::Search, result)
    }

    pub async fn extract_markdown(
        &self,
        params: MarkdownParams,
    ) -> OperationOutcome<MarkdownResult> {
        let result = self
            .runner
            .run_with_browser(DEFAULT_OPERATION_TIMEOUT, move |ctx| {
                Box::pin(async move { extract_markdown(ctx.page, &params).await })
            })
            .await;
        envelope(OperationKind::ExtractMarkdown, result)
    }

    pub async fn extract_json(
        &self,
        params: ExtractJsonParams,
    ) -> OperationOutcome<serde_json::Value> {
        let result = self
            .runner
            .run_with_browser(DEFAULT_OPERATION_TIMEOUT, move |ctx| {
                Box::pin(async move { extract_json(ctx.page, &params).await })
            })
            .await;
        envelope(OperationKind::ExtractJson, result)
    }

    pub async fn get_content(&self, params: ContentParams) -> OperationOutcome<ContentResult> {
        let result = self
            .runner
            .run_with_browser(DEFAULT_OPERATION_TIMEOUT, move |ctx| {
                Box::pin(async move { get_content(ctx.page, &params).await })
            })
            .await;
        envelope(OperationKind::GetContent, result)
    }

    pub async fn scrape_elements(&self, params: ScrapeParams) -> OperationOutcome<ScrapeResult> {
        let result = self
            .runner
            .run_with_browser(DEFAULT_OPERATION_TIMEOUT, move |ctx| {
                Box::pin(async move { scrape_elements(ctx.page, &params).await })
            })
            .await;
        envelope(OperationKind::ScrapeElements, result)
    }

    pub async fn extract_links(&self, params: ContentParams) -> OperationOutcome<Vec<LinkItem>> {
        let result = self
            .runner
            .run_with_browser(DEFAULT_OPERATION_TIMEOUT, move |ctx| {
                Box::pin(async move { extract_links(ctx.page, &params).await })
            })
            .await;
        envelope(OperationKind::ExtractLinks, result)
    }

    /// Captures a screenshot and persists it as an artifact.
    pub async fn screenshot(&self, params: ScreenshotParams) -> OperationOutcome<StoredScreenshot> {
        let url = params.url.clone();
        let format = params.format;
        let result = self
            .runner
            .run_with_browser(DEFAULT_OPERATION_TIMEOUT, move |ctx| {
                Box::pin(async move { capture_screenshot(ctx.page, &params).await })
            })
            .await;

        let stored = match result {
            Ok(shot) => {
                self.persist_screenshot(&url, format.as_str(), shot).await
            }
            Err(e) => Err(e),
        };
        envelope(OperationKind::Screenshot, stored)
    }

    /// Renders a PDF and persists it as an artifact.
    pub async fn generate_pdf(&self, params: PdfParams) -> OperationOutcome<StoredPdf> {
        let url = params.url.clone();
        let result = self
            .runner
            .run_with_browser(DEFAULT_OPERATION_TIMEOUT, move |ctx| {
                Box::pin(async move { generate_pdf(ctx.page, &params).await })
            })
            .await;

        let stored = match result {
            Ok(pdf) => self.persist_pdf(&url, pdf).await,
            Err(e) => Err(e),
        };
        envelope(OperationKind::Pdf, stored)
    }

    async fn persist_screenshot(
        &self,
        url: &str,
        extension: &str,
        screenshot: ScreenshotResult,
    ) -> Result<StoredScreenshot> {
        let bytes = STANDARD
            .decode(&screenshot.data)
            .map_err(|e| ScrapeError::Other(format!("screenshot payload corrupt: {}", e)))?;
        let id = new_artifact_id();
        let filename = format!("{}.{}", id, extension);
        let storage_key = format!("screenshots/{}", filename);

        let stored = self
            .objects
            .put(&storage_key, &bytes, &screenshot.content_type, &[("source-url", url)])
            .await?;
        let record = ArtifactRecord {
            id,
            artifact_type: ArtifactType::Screenshot,
            url: url.to_string(),
            filename,
            storage_key: stored.key,
            public_url: None,
            metadata_json: serde_json::json!({
                "format": screenshot.format,
                "size": stored.size,
            })
            .to_string(),
            created_at: Utc::now(),
            expires_at: None,
        };
        self.metadata.insert(record.clone()).await?;
        info!("stored screenshot artifact {} ({} bytes)", record.id, stored.size);

        Ok(StoredScreenshot { screenshot, record })
    }

    async fn persist_pdf(&self, url: &str, pdf: PdfResult) -> Result<StoredPdf> {
        let bytes = match &pdf.payload {
            PdfPayload::Binary(bytes) => bytes.clone(),
            PdfPayload::Base64(encoded) => STANDARD
                .decode(encoded)
                .map_err(|e| ScrapeError::Other(format!("pdf payload corrupt: {}", e)))?,
        };
        let id = new_artifact_id();
        let filename = format!("{}.pdf", id);
        let storage_key = format!("pdfs/{}", filename);

        let stored = self
            .objects
            .put(&storage_key, &bytes, pdf.metadata.content_type, &[("source-url", url)])
            .await?;
        let record = ArtifactRecord {
            id,
            artifact_type: ArtifactType::Pdf,
            url: url.to_string(),
            filename,
            storage_key: stored.key,
            public_url: None,
            metadata_json: serde_json::json!({ "size": pdf.metadata.size }).to_string(),
            created_at: Utc::now(),
            expires_at: None,
        };
        self.metadata.insert(record.clone()).await?;
        info!("stored pdf artifact {} ({} bytes)", record.id, stored.size);

        Ok(StoredPdf { pdf, record })
    }
}

/// Timestamp plus random suffix; unique enough for artifact keys without an
/// extra dependency.
fn new_artifact_id() -> String {
    format!(
        "{}-{:08x}",
        Utc::now().timestamp_millis(),
        rand::random::<u32>()
    )
}

fn envelope<T>(kind: OperationKind, result: Result<T>) -> OperationOutcome<T> {
    match result {
        Ok(data) => OperationOutcome::ok(data, kind),
        Err(e) => OperationOutcome::fail(e.to_string()),
    }
}

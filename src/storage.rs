//! Artifact storage: object bytes plus a metadata index.
//!
//! Both stores are trait seams. The in-memory implementations back tests
//! and local single-process runs; production deployments plug in their own.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Result, ScrapeError};

/// Artifact category stored alongside the bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactType {
    Screenshot,
    Pdf,
}

impl ArtifactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::Screenshot => "screenshot",
            ArtifactType::Pdf => "pdf",
        }
    }
}

/// Metadata record for one stored artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub id: String,
    pub artifact_type: ArtifactType,
    /// Source page the artifact was rendered from.
    pub url: String,
    pub filename: String,
    pub storage_key: String,
    pub public_url: Option<String>,
    /// Operation-specific metadata as a JSON string.
    pub metadata_json: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Outcome of an object upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredObject {
    pub key: String,
    pub size: usize,
}

/// Binary artifact storage.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
        custom_metadata: &[(&str, &str)],
    ) -> Result<StoredObject>;

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Metadata index over stored artifacts.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn insert(&self, record: ArtifactRecord) -> Result<()>;

    async fn select_by_id(&self, id: &str) -> Result<Option<ArtifactRecord>>;

    /// Lists records newest first, optionally filtered by type.
    async fn select_page(
        &self,
        artifact_type: Option<ArtifactType>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ArtifactRecord>>;

    async fn delete_by_id(&self, id: &str) -> Result<bool>;
}

/// In-memory object store.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        _content_type: &str,
        _custom_metadata: &[(&str, &str)],
    ) -> Result<StoredObject> {
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| ScrapeError::Storage("object store lock poisoned".to_string()))?;
        objects.insert(key.to_string(), bytes.to_vec());
        Ok(StoredObject {
            key: key.to_string(),
            size: bytes.len(),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let objects = self
            .objects
            .lock()
            .map_err(|_| ScrapeError::Storage("object store lock poisoned".to_string()))?;
        Ok(objects.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| ScrapeError::Storage("object store lock poisoned".to_string()))?;
        objects.remove(key);
        Ok(())
    }
}

/// In-memory metadata store, insertion ordered.
#[derive(Default)]
pub struct MemoryMetadataStore {
    records: Mutex<Vec<ArtifactRecord>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn insert(&self, record: ArtifactRecord) -> Result<()> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| ScrapeError::Storage("metadata store lock poisoned".to_string()))?;
        records.push(record);
        Ok(())
    }

    async fn select_by_id(&self, id: &str) -> Result<Option<ArtifactRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|_| ScrapeError::Storage("metadata store lock poisoned".to_string()))?;
        Ok(records.iter().find(|r| r.id == id).cloned())
    }

    async fn select_page(
        &self,
        artifact_type: Option<ArtifactType>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<ArtifactRecord>> {
        let records = self
            .records
            .lock()
            .map_err(|_| ScrapeError::Storage("metadata store lock poisoned".to_string()))?;
        Ok(records
            .iter()
            .rev()
            .filter(|r| artifact_type.is_none_or(|t| r.artifact_type == t))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn delete_by_id(&self, id: &str) -> Result<bool> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| ScrapeError::Storage("metadata store lock poisoned".to_string()))?;
        let before = records.len();
        records.retain(|r| r.id != id);
        Ok(records.len() < before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, artifact_type: ArtifactType) -> ArtifactRecord {
        ArtifactRecord {
            id: id.to_string(),
            artifact_type,
            url: "https://example.com".to_string(),
            filename: format!("{}.bin", id),
            storage_key: format!("artifacts/{}", id),
            public_url: None,
            metadata_json: "{}".to_string(),
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    #[tokio::test]
    async fn test_object_store_put_and_delete() {
        let store = MemoryObjectStore::new();
        let stored = store
            .put("artifacts/a", b"bytes", "application/pdf", &[])
            .await
            .unwrap();
        assert_eq!(stored.size, 5);
        assert_eq!(store.get("artifacts/a").await.unwrap().unwrap(), b"bytes");

        store.delete("artifacts/a").await.unwrap();
        assert!(store.get("artifacts/a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_metadata_roundtrip() {
        let store = MemoryMetadataStore::new();
        store.insert(record("one", ArtifactType::Pdf)).await.unwrap();

        let found = store.select_by_id("one").await.unwrap().unwrap();
        assert_eq!(found.filename, "one.bin");
        assert!(store.select_by_id("missing").await.unwrap().is_none());

        assert!(store.delete_by_id("one").await.unwrap());
        assert!(!store.delete_by_id("one").await.unwrap());
    }

    #[tokio::test]
    async fn test_select_page_filters_and_orders() {
        let store = MemoryMetadataStore::new();
        store
            .insert(record("s1", ArtifactType::Screenshot))
            .await
            .unwrap();
        store.insert(record("p1", ArtifactType::Pdf)).await.unwrap();
        store
            .insert(record("s2", ArtifactType::Screenshot))
            .await
            .unwrap();

        let shots = store
            .select_page(Some(ArtifactType::Screenshot), 10, 0)
            .await
            .unwrap();
        assert_eq!(shots.len(), 2);
        assert_eq!(shots[0].id, "s2");

        let page = store.select_page(None, 2, 1).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, "p1");
    }
}

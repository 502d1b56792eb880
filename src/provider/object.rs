//! Provider adapter over any `object_store` backend.
//!
//! Documents are laid out as two objects under a configurable prefix:
//! the body at `{prefix}/docs/{uuid}` and a JSON metadata sidecar at
//! `{prefix}/meta/{uuid}`. The native provider id is the body path, so
//! UUID lookup is O(1) here.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use object_store::{ObjectStore, path::Path as StoragePath};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{
    DocumentContent, DocumentMetadata, DocumentProvider, ProviderError, Result, SyncStatus,
};
use crate::content;
use crate::ids::DocumentUuid;

const PROVIDER_TYPE: &str = "object";

/// Sidecar record persisted next to each document body.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Sidecar {
    uuid: DocumentUuid,
    name: String,
    mime_type: String,
    created_time: DateTime<Utc>,
    modified_time: DateTime<Utc>,
    content_hash: String,
}

/// Document provider backed by an [`ObjectStore`] (S3-like, local
/// filesystem, or in-memory).
#[derive(Clone)]
pub struct ObjectStoreProvider {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ObjectStoreProvider {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    /// In-memory backend, mainly for tests and local development.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(object_store::memory::InMemory::new()), "hermes")
    }

    fn body_path(&self, uuid: DocumentUuid) -> String {
        format!("{}/docs/{}", self.prefix, uuid)
    }

    fn meta_path_for_body(&self, body_path: &str) -> Result<String> {
        let uuid = self.uuid_of(body_path)?;
        Ok(format!("{}/meta/{}", self.prefix, uuid))
    }

    fn uuid_of(&self, provider_id: &str) -> Result<DocumentUuid> {
        let expected_prefix = format!("{}/docs/", self.prefix);
        let raw = provider_id
            .strip_prefix(&expected_prefix)
            .ok_or_else(|| ProviderError::Invalid(format!("foreign provider id: {}", provider_id)))?;
        raw.parse()
            .map_err(|_| ProviderError::Invalid(format!("bad uuid in provider id: {}", provider_id)))
    }

    async fn read_sidecar(&self, body_path: &str) -> Result<Sidecar> {
        let meta_path = self.meta_path_for_body(body_path)?;
        let result = self
            .store
            .get(&StoragePath::from(meta_path))
            .await
            .map_err(|e| classify(e, body_path))?;
        let bytes = result.bytes().await.map_err(|e| classify(e, body_path))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| ProviderError::Invalid(format!("corrupt sidecar for {}: {}", body_path, e)))
    }

    async fn write_sidecar(&self, body_path: &str, sidecar: &Sidecar) -> Result<()> {
        let meta_path = self.meta_path_for_body(body_path)?;
        let payload = serde_json::to_vec(sidecar)
            .map_err(|e| ProviderError::Invalid(format!("sidecar encode: {}", e)))?;
        self.store
            .put(&StoragePath::from(meta_path), payload.into())
            .await
            .map_err(|e| classify(e, body_path))?;
        Ok(())
    }

    fn metadata_of(&self, sidecar: &Sidecar, provider_id: &str) -> DocumentMetadata {
        DocumentMetadata {
            uuid: sidecar.uuid,
            provider_type: PROVIDER_TYPE.to_string(),
            provider_id: provider_id.to_string(),
            name: sidecar.name.clone(),
            mime_type: sidecar.mime_type.clone(),
            created_time: sidecar.created_time,
            modified_time: sidecar.modified_time,
            content_hash: sidecar.content_hash.clone(),
            sync_status: SyncStatus::Replica,
            extended_metadata: BTreeMap::new(),
        }
    }
}

/// Map backend failures into the provider taxonomy. Anything that is not a
/// clean miss is treated as retryable (timeouts, 5xx, throttling).
fn classify(err: object_store::Error, context: &str) -> ProviderError {
    match err {
        object_store::Error::NotFound { .. } => ProviderError::NotFound(context.to_string()),
        object_store::Error::AlreadyExists { .. } => {
            ProviderError::AlreadyExists(context.to_string())
        }
        other => ProviderError::Transient(format!("{}: {}", context, other)),
    }
}

#[async_trait]
impl DocumentProvider for ObjectStoreProvider {
    fn provider_type(&self) -> &str {
        PROVIDER_TYPE
    }

    async fn get_document(&self, provider_id: &str) -> Result<DocumentMetadata> {
        let sidecar = self.read_sidecar(provider_id).await?;
        Ok(self.metadata_of(&sidecar, provider_id))
    }

    async fn get_document_by_uuid(&self, uuid: DocumentUuid) -> Result<DocumentMetadata> {
        let provider_id = self.body_path(uuid);
        self.get_document(&provider_id).await
    }

    async fn create_document_with_uuid(
        &self,
        uuid: DocumentUuid,
        name: &str,
        template: Option<&str>,
        _folder: Option<&str>,
    ) -> Result<DocumentMetadata> {
        let provider_id = self.body_path(uuid);
        if self.read_sidecar(&provider_id).await.is_ok() {
            return Err(ProviderError::AlreadyExists(uuid.to_string()));
        }

        let body = template.unwrap_or_default().as_bytes().to_vec();
        let now = Utc::now();
        let sidecar = Sidecar {
            uuid,
            name: name.to_string(),
            mime_type: "text/markdown".to_string(),
            created_time: now,
            modified_time: now,
            content_hash: content::content_hash(&body),
        };

        self.store
            .put(&StoragePath::from(provider_id.clone()), body.into())
            .await
            .map_err(|e| classify(e, &provider_id))?;
        self.write_sidecar(&provider_id, &sidecar).await?;

        Ok(self.metadata_of(&sidecar, &provider_id))
    }

    async fn get_content(&self, provider_id: &str) -> Result<DocumentContent> {
        let sidecar = self.read_sidecar(provider_id).await?;
        let result = self
            .store
            .get(&StoragePath::from(provider_id.to_string()))
            .await
            .map_err(|e| classify(e, provider_id))?;
        let body = result.bytes().await.map_err(|e| classify(e, provider_id))?;

        Ok(DocumentContent {
            uuid: sidecar.uuid,
            provider_id: provider_id.to_string(),
            body,
            format: "markdown".to_string(),
            backend_revision: None,
            content_hash: sidecar.content_hash,
        })
    }

    async fn update_content(&self, provider_id: &str, body: Bytes) -> Result<DocumentContent> {
        let mut sidecar = self.read_sidecar(provider_id).await?;

        self.store
            .put(&StoragePath::from(provider_id.to_string()), body.clone().into())
            .await
            .map_err(|e| classify(e, provider_id))?;

        sidecar.content_hash = content::content_hash(&body);
        sidecar.modified_time = Utc::now().max(sidecar.modified_time);
        self.write_sidecar(provider_id, &sidecar).await?;

        Ok(DocumentContent {
            uuid: sidecar.uuid,
            provider_id: provider_id.to_string(),
            body,
            format: "markdown".to_string(),
            backend_revision: None,
            content_hash: sidecar.content_hash,
        })
    }

    async fn delete_document(&self, provider_id: &str) -> Result<()> {
        // Sidecar first so a half-deleted document reads as missing.
        let meta_path = self.meta_path_for_body(provider_id)?;
        self.read_sidecar(provider_id).await?;

        self.store
            .delete(&StoragePath::from(meta_path))
            .await
            .map_err(|e| classify(e, provider_id))?;
        self.store
            .delete(&StoragePath::from(provider_id.to_string()))
            .await
            .map_err(|e| classify(e, provider_id))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_get_update_delete() {
        let provider = ObjectStoreProvider::in_memory();
        let uuid = DocumentUuid::new();

        let meta = provider
            .create_document_with_uuid(uuid, "spec.md", Some("# Title"), None)
            .await
            .unwrap();
        assert_eq!(meta.provider_id, format!("hermes/docs/{}", uuid));

        let body = Bytes::from_static(b"migrated body\n");
        let updated = provider.update_content(&meta.provider_id, body.clone()).await.unwrap();
        assert_eq!(updated.content_hash, content::content_hash(&body));

        let fetched = provider.get_content(&meta.provider_id).await.unwrap();
        assert_eq!(fetched.body, body);

        provider.delete_document(&meta.provider_id).await.unwrap();
        let err = provider.get_document(&meta.provider_id).await.unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_uuid_lookup_is_direct() {
        let provider = ObjectStoreProvider::in_memory();
        let uuid = DocumentUuid::new();
        provider
            .create_document_with_uuid(uuid, "doc.md", None, None)
            .await
            .unwrap();

        let meta = provider.get_document_by_uuid(uuid).await.unwrap();
        assert_eq!(meta.uuid, uuid);
    }

    #[tokio::test]
    async fn test_create_twice_reports_already_exists() {
        let provider = ObjectStoreProvider::in_memory();
        let uuid = DocumentUuid::new();
        provider
            .create_document_with_uuid(uuid, "doc.md", None, None)
            .await
            .unwrap();

        let err = provider
            .create_document_with_uuid(uuid, "doc.md", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_foreign_provider_id_is_invalid() {
        let provider = ObjectStoreProvider::in_memory();
        let err = provider.get_document("other/docs/nope").await.unwrap_err();
        assert!(matches!(err, ProviderError::Invalid(_)));
    }

    #[tokio::test]
    async fn test_revision_history_unsupported() {
        let provider = ObjectStoreProvider::in_memory();
        let err = provider.get_revision_history("hermes/docs/x", 5).await.unwrap_err();
        assert!(matches!(err, ProviderError::Unsupported(_)));
    }
}

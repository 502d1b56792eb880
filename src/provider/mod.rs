//! Storage provider abstraction.
//!
//! A provider adapter exposes uniform document CRUD, content I/O, and
//! optional revision history over one backend. The migration core only ever
//! talks to this trait; backend error types never cross it — every adapter
//! classifies failures into the [`ProviderError`] taxonomy at the call site.

pub mod memory;
pub mod object;
pub mod registry;

pub use memory::MemoryProvider;
pub use object::ObjectStoreProvider;
pub use registry::{ProviderRegistry, RegistryError};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::ids::DocumentUuid;

/// Classified provider failure taxonomy.
///
/// `Transient` is the only retryable kind; everything else fails an item
/// permanently (with `AlreadyExists` on create treated as idempotent
/// success by the worker).
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("transient: {0}")]
    Transient(String),

    #[error("invalid: {0}")]
    Invalid(String),

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }

    /// Stable short code for logs and stored error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::NotFound(_) => "not_found",
            ProviderError::AlreadyExists(_) => "already_exists",
            ProviderError::PermissionDenied(_) => "permission_denied",
            ProviderError::Transient(_) => "transient",
            ProviderError::Invalid(_) => "invalid",
            ProviderError::Unsupported(_) => "unsupported",
        }
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// Replica freshness relative to the canonical copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Canonical,
    Replica,
    Stale,
}

/// Backend-specific revision descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendRevision {
    pub provider_type: String,
    pub revision_id: String,
    pub modified_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_forever: Option<bool>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

/// Document metadata as reported by a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub uuid: DocumentUuid,
    pub provider_type: String,
    pub provider_id: String,
    pub name: String,
    pub mime_type: String,
    pub created_time: DateTime<Utc>,
    pub modified_time: DateTime<Utc>,
    pub content_hash: String,
    pub sync_status: SyncStatus,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extended_metadata: BTreeMap<String, String>,
}

/// Document body plus the hash and revision the provider reported for it.
#[derive(Debug, Clone)]
pub struct DocumentContent {
    pub uuid: DocumentUuid,
    pub provider_id: String,
    pub body: Bytes,
    pub format: String,
    pub backend_revision: Option<BackendRevision>,
    pub content_hash: String,
}

/// Uniform interface over storage backends.
///
/// Contract every adapter must honor:
/// - the `content_hash` returned after `update_content(x)` equals
///   `sha256(normalize(x))`;
/// - `modified_time` is monotonic within one provider id;
/// - provider id strings are stable.
///
/// `create_document_with_uuid` called twice with the same UUID is either
/// idempotent or fails with `AlreadyExists`; callers treat both the same.
#[async_trait]
pub trait DocumentProvider: Send + Sync {
    /// Short backend type tag, e.g. `"memory"` or `"object"`.
    fn provider_type(&self) -> &str;

    async fn get_document(&self, provider_id: &str) -> Result<DocumentMetadata>;

    /// Lookup by document UUID. May be O(N) on backends without a UUID
    /// index; adapters document their cost.
    async fn get_document_by_uuid(&self, uuid: DocumentUuid) -> Result<DocumentMetadata>;

    async fn create_document_with_uuid(
        &self,
        uuid: DocumentUuid,
        name: &str,
        template: Option<&str>,
        folder: Option<&str>,
    ) -> Result<DocumentMetadata>;

    async fn get_content(&self, provider_id: &str) -> Result<DocumentContent>;

    async fn update_content(&self, provider_id: &str, body: Bytes) -> Result<DocumentContent>;

    async fn delete_document(&self, provider_id: &str) -> Result<()>;

    /// Revision history, newest first. Backends without history keep the
    /// default and report `Unsupported`.
    async fn get_revision_history(
        &self,
        _provider_id: &str,
        _limit: usize,
    ) -> Result<Vec<BackendRevision>> {
        Err(ProviderError::Unsupported(format!(
            "{}: revision history",
            self.provider_type()
        )))
    }
}

impl std::fmt::Debug for dyn DocumentProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentProvider")
            .field("provider_type", &self.provider_type())
            .finish()
    }
}

//! In-memory provider adapter.
//!
//! Backs tests and dry runs. Documents live in a map keyed by native id
//! (`mem:{uuid}`); UUID lookup scans the map. Supports scripted fault
//! injection so tests can drive the worker through transient and permanent
//! failure paths.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use super::{
    BackendRevision, DocumentContent, DocumentMetadata, DocumentProvider, ProviderError, Result,
    SyncStatus,
};
use crate::content;
use crate::ids::DocumentUuid;

const PROVIDER_TYPE: &str = "memory";

#[derive(Debug, Clone)]
struct StoredDoc {
    uuid: DocumentUuid,
    name: String,
    body: Bytes,
    content_hash: String,
    created_time: DateTime<Utc>,
    modified_time: DateTime<Utc>,
    revision: u64,
}

/// Operation a fault attaches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultOp {
    GetContent,
    UpdateContent,
    Create,
    Delete,
}

/// Error kind to raise from an injected fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    NotFound,
    PermissionDenied,
    Transient,
    Invalid,
}

#[derive(Debug)]
struct Fault {
    op: FaultOp,
    provider_id: Option<String>,
    kind: FaultKind,
    remaining: u32,
}

/// In-memory document store with fault injection.
pub struct MemoryProvider {
    docs: Mutex<HashMap<String, StoredDoc>>,
    faults: Mutex<Vec<Fault>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self {
            docs: Mutex::new(HashMap::new()),
            faults: Mutex::new(Vec::new()),
        }
    }

    /// Seed a document and return its native provider id.
    pub fn insert_document(&self, uuid: DocumentUuid, name: &str, body: &[u8]) -> String {
        let provider_id = native_id(uuid);
        let now = Utc::now();
        let doc = StoredDoc {
            uuid,
            name: name.to_string(),
            body: Bytes::copy_from_slice(body),
            content_hash: content::content_hash(body),
            created_time: now,
            modified_time: now,
            revision: 1,
        };
        self.docs.lock().unwrap().insert(provider_id.clone(), doc);
        provider_id
    }

    /// Arm a fault: the next `times` calls of `op` (optionally scoped to one
    /// provider id) raise `kind` instead of executing.
    pub fn inject_fault(&self, op: FaultOp, provider_id: Option<&str>, kind: FaultKind, times: u32) {
        self.faults.lock().unwrap().push(Fault {
            op,
            provider_id: provider_id.map(String::from),
            kind,
            remaining: times,
        });
    }

    pub fn document_count(&self) -> usize {
        self.docs.lock().unwrap().len()
    }

    pub fn contains_uuid(&self, uuid: DocumentUuid) -> bool {
        self.docs.lock().unwrap().values().any(|d| d.uuid == uuid)
    }

    fn take_fault(&self, op: FaultOp, provider_id: &str) -> Option<ProviderError> {
        let mut faults = self.faults.lock().unwrap();
        let idx = faults.iter().position(|f| {
            f.op == op
                && f.remaining > 0
                && f.provider_id.as_deref().map_or(true, |id| id == provider_id)
        })?;

        faults[idx].remaining -= 1;
        let kind = faults[idx].kind;
        if faults[idx].remaining == 0 {
            faults.remove(idx);
        }

        let message = format!("injected {:?} fault on {}", op, provider_id);
        Some(match kind {
            FaultKind::NotFound => ProviderError::NotFound(message),
            FaultKind::PermissionDenied => ProviderError::PermissionDenied(message),
            FaultKind::Transient => ProviderError::Transient(message),
            FaultKind::Invalid => ProviderError::Invalid(message),
        })
    }

    fn metadata_of(doc: &StoredDoc, provider_id: &str) -> DocumentMetadata {
        DocumentMetadata {
            uuid: doc.uuid,
            provider_type: PROVIDER_TYPE.to_string(),
            provider_id: provider_id.to_string(),
            name: doc.name.clone(),
            mime_type: "text/markdown".to_string(),
            created_time: doc.created_time,
            modified_time: doc.modified_time,
            content_hash: doc.content_hash.clone(),
            sync_status: SyncStatus::Canonical,
            extended_metadata: BTreeMap::new(),
        }
    }
}

impl Default for MemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn native_id(uuid: DocumentUuid) -> String {
    format!("mem:{}", uuid)
}

#[async_trait]
impl DocumentProvider for MemoryProvider {
    fn provider_type(&self) -> &str {
        PROVIDER_TYPE
    }

    async fn get_document(&self, provider_id: &str) -> Result<DocumentMetadata> {
        let docs = self.docs.lock().unwrap();
        docs.get(provider_id)
            .map(|doc| Self::metadata_of(doc, provider_id))
            .ok_or_else(|| ProviderError::NotFound(provider_id.to_string()))
    }

    /// O(N) scan; acceptable for a test backend.
    async fn get_document_by_uuid(&self, uuid: DocumentUuid) -> Result<DocumentMetadata> {
        let docs = self.docs.lock().unwrap();
        docs.iter()
            .find(|(_, doc)| doc.uuid == uuid)
            .map(|(id, doc)| Self::metadata_of(doc, id))
            .ok_or_else(|| ProviderError::NotFound(uuid.to_string()))
    }

    async fn create_document_with_uuid(
        &self,
        uuid: DocumentUuid,
        name: &str,
        template: Option<&str>,
        _folder: Option<&str>,
    ) -> Result<DocumentMetadata> {
        let provider_id = native_id(uuid);
        if let Some(err) = self.take_fault(FaultOp::Create, &provider_id) {
            return Err(err);
        }

        let mut docs = self.docs.lock().unwrap();
        if docs.values().any(|doc| doc.uuid == uuid) {
            return Err(ProviderError::AlreadyExists(uuid.to_string()));
        }

        let body = template.unwrap_or_default().as_bytes();
        let now = Utc::now();
        let doc = StoredDoc {
            uuid,
            name: name.to_string(),
            body: Bytes::copy_from_slice(body),
            content_hash: content::content_hash(body),
            created_time: now,
            modified_time: now,
            revision: 1,
        };
        let meta = Self::metadata_of(&doc, &provider_id);
        docs.insert(provider_id, doc);
        Ok(meta)
    }

    async fn get_content(&self, provider_id: &str) -> Result<DocumentContent> {
        if let Some(err) = self.take_fault(FaultOp::GetContent, provider_id) {
            return Err(err);
        }

        let docs = self.docs.lock().unwrap();
        let doc = docs
            .get(provider_id)
            .ok_or_else(|| ProviderError::NotFound(provider_id.to_string()))?;

        Ok(DocumentContent {
            uuid: doc.uuid,
            provider_id: provider_id.to_string(),
            body: doc.body.clone(),
            format: "markdown".to_string(),
            backend_revision: Some(revision_of(doc)),
            content_hash: doc.content_hash.clone(),
        })
    }

    async fn update_content(&self, provider_id: &str, body: Bytes) -> Result<DocumentContent> {
        if let Some(err) = self.take_fault(FaultOp::UpdateContent, provider_id) {
            return Err(err);
        }

        let mut docs = self.docs.lock().unwrap();
        let doc = docs
            .get_mut(provider_id)
            .ok_or_else(|| ProviderError::NotFound(provider_id.to_string()))?;

        doc.body = body;
        doc.content_hash = content::content_hash(&doc.body);
        doc.modified_time = Utc::now().max(doc.modified_time);
        doc.revision += 1;

        Ok(DocumentContent {
            uuid: doc.uuid,
            provider_id: provider_id.to_string(),
            body: doc.body.clone(),
            format: "markdown".to_string(),
            backend_revision: Some(revision_of(doc)),
            content_hash: doc.content_hash.clone(),
        })
    }

    async fn delete_document(&self, provider_id: &str) -> Result<()> {
        if let Some(err) = self.take_fault(FaultOp::Delete, provider_id) {
            return Err(err);
        }

        let mut docs = self.docs.lock().unwrap();
        docs.remove(provider_id)
            .map(|_| ())
            .ok_or_else(|| ProviderError::NotFound(provider_id.to_string()))
    }

    async fn get_revision_history(
        &self,
        provider_id: &str,
        limit: usize,
    ) -> Result<Vec<BackendRevision>> {
        let docs = self.docs.lock().unwrap();
        let doc = docs
            .get(provider_id)
            .ok_or_else(|| ProviderError::NotFound(provider_id.to_string()))?;

        // Only the latest revision is retained.
        Ok(vec![revision_of(doc)].into_iter().take(limit).collect())
    }
}

fn revision_of(doc: &StoredDoc) -> BackendRevision {
    BackendRevision {
        provider_type: PROVIDER_TYPE.to_string(),
        revision_id: doc.revision.to_string(),
        modified_time: doc.modified_time,
        keep_forever: None,
        extra: BTreeMap::new(),
    }
}

//! Post-completion validation: cryptographic and invariant proofs over a
//! finished migration job.
//!
//! The validator re-reads every row a job produced and, for successful
//! items, re-fetches the destination document and recomputes its hash. A
//! single failing check fails the whole report. Checks are grouped into
//! five categories; results carry expected/actual strings so both humans
//! and machines can consume them.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::content;
use crate::model::{
    DRY_RUN_DEST, ItemStatus, MigrationItem, OutboxStatus, TaskPayload,
};
use crate::provider::ProviderRegistry;
use crate::store::{MigrationStore, StoreError};

#[derive(Debug, Error)]
pub enum ValidatorError {
    #[error("job not found: {0}")]
    JobNotFound(u64),

    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for ValidatorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::JobNotFound(id) => ValidatorError::JobNotFound(id),
            other => ValidatorError::Store(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationCategory {
    JobCompleteness,
    ContentIntegrity,
    OutboxIntegrity,
    MigrationInvariants,
    DestinationRetrievability,
}

impl fmt::Display for ValidationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValidationCategory::JobCompleteness => "job_completeness",
            ValidationCategory::ContentIntegrity => "content_integrity",
            ValidationCategory::OutboxIntegrity => "outbox_integrity",
            ValidationCategory::MigrationInvariants => "migration_invariants",
            ValidationCategory::DestinationRetrievability => "destination_retrievability",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationCheck {
    pub category: ValidationCategory,
    pub name: String,
    pub passed: bool,
    pub message: String,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub job_id: u64,
    pub checks: Vec<ValidationCheck>,
}

impl ValidationReport {
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> Vec<&ValidationCheck> {
        self.checks.iter().filter(|c| !c.passed).collect()
    }

    pub fn passed_count(&self) -> usize {
        self.checks.iter().filter(|c| c.passed).count()
    }
}

/// Panic with the failing checks unless the report is clean. Test helper.
pub fn assert_all_validations_passed(report: &ValidationReport) {
    if report.all_passed() {
        return;
    }
    let mut lines = format!("validation failed for job {}:\n", report.job_id);
    for check in report.failures() {
        lines.push_str(&format!(
            "  [{}] {}: {} (expected {}, actual {})\n",
            check.category, check.name, check.message, check.expected, check.actual
        ));
    }
    panic!("{}", lines);
}

pub struct Validator {
    store: Arc<MigrationStore>,
    registry: Arc<ProviderRegistry>,
}

struct CheckSink {
    checks: Vec<ValidationCheck>,
}

impl CheckSink {
    fn new() -> Self {
        Self { checks: Vec::new() }
    }

    fn check(
        &mut self,
        category: ValidationCategory,
        name: impl Into<String>,
        passed: bool,
        message: impl Into<String>,
        expected: impl fmt::Display,
        actual: impl fmt::Display,
    ) {
        self.checks.push(ValidationCheck {
            category,
            name: name.into(),
            passed,
            message: message.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
}

impl Validator {
    pub fn new(store: Arc<MigrationStore>, registry: Arc<ProviderRegistry>) -> Self {
        Self { store, registry }
    }

    /// Run every check category over one job.
    pub async fn validate_job(&self, job_id: u64) -> Result<ValidationReport, ValidatorError> {
        let job = self.store.require_job(job_id)?;
        let items = self.store.list_items_for_job(job_id)?;
        let events = self.store.list_events_for_job(job_id)?;

        let mut sink = CheckSink::new();

        self.check_job_completeness(&mut sink, &job, &items, &events);
        self.check_content_integrity(&mut sink, &job, &items).await;
        self.check_outbox_integrity(&mut sink, &items, &events);
        self.check_migration_invariants(&mut sink, &job, &items);
        self.check_destination_retrievability(&mut sink, &job, &items).await;

        let report = ValidationReport {
            job_id,
            checks: sink.checks,
        };

        if report.all_passed() {
            info!(job_id, checks = report.checks.len(), "Validation passed");
        } else {
            warn!(
                job_id,
                failures = report.failures().len(),
                checks = report.checks.len(),
                "Validation failed"
            );
        }
        Ok(report)
    }

    fn check_job_completeness(
        &self,
        sink: &mut CheckSink,
        job: &crate::model::MigrationJob,
        items: &[MigrationItem],
        events: &[crate::model::OutboxEvent],
    ) {
        use ValidationCategory::JobCompleteness as CAT;

        sink.check(
            CAT,
            "job_status_terminal",
            job.status.is_terminal(),
            "job must be in a terminal state",
            "completed|failed|cancelled",
            job.status,
        );

        let terminal = job.terminal_documents();
        sink.check(
            CAT,
            "counter_conservation",
            terminal == job.total_documents,
            "migrated + failed + skipped must equal total",
            job.total_documents,
            terminal,
        );

        sink.check(
            CAT,
            "item_count_matches_total",
            items.len() as u64 == job.total_documents,
            "one item row per queued document",
            job.total_documents,
            items.len(),
        );

        for event in events {
            sink.check(
                CAT,
                format!("event_{}_settled", event.id),
                matches!(event.status, OutboxStatus::Published | OutboxStatus::Failed),
                "outbox events must be settled after completion",
                "published|failed",
                event.status,
            );
        }

        // Surface every failed item with its UUID and classified message so
        // operators see what needs a retry job.
        for item in items.iter().filter(|i| i.status == ItemStatus::Failed) {
            sink.check(
                CAT,
                format!("item_{}_failure_recorded", item.id),
                item.error_message.is_some(),
                format!(
                    "document {} failed: {}",
                    item.document_uuid,
                    item.error_message.as_deref().unwrap_or("no error recorded")
                ),
                "classified error message",
                item.error_message.as_deref().unwrap_or("none"),
            );
        }
    }

    async fn check_content_integrity(
        &self,
        sink: &mut CheckSink,
        job: &crate::model::MigrationJob,
        items: &[MigrationItem],
    ) {
        use ValidationCategory::ContentIntegrity as CAT;

        let dest = self.registry.get(&job.dest_provider).ok();

        for item in items.iter().filter(|i| i.status == ItemStatus::Completed) {
            if item.dest_provider_id.as_deref() == Some(DRY_RUN_DEST) {
                continue;
            }

            let source_hash = item.source_content_hash.as_deref().unwrap_or_default();
            let dest_hash = item.dest_content_hash.as_deref().unwrap_or_default();
            sink.check(
                CAT,
                format!("item_{}_stored_hashes_match", item.id),
                !source_hash.is_empty() && content::hashes_equal(source_hash, dest_hash),
                format!("stored hashes for document {}", item.document_uuid),
                source_hash,
                dest_hash,
            );

            // Re-fetch the destination and recompute; the stored hash must
            // still describe the bytes actually there.
            match (&dest, &item.dest_provider_id) {
                (Some(provider), Some(dest_id)) => match provider.get_content(dest_id).await {
                    Ok(fetched) => {
                        let recomputed = content::content_hash(&fetched.body);
                        sink.check(
                            CAT,
                            format!("item_{}_destination_hash_recomputed", item.id),
                            content::hashes_equal(&recomputed, dest_hash),
                            format!("destination bytes for document {}", item.document_uuid),
                            dest_hash,
                            recomputed,
                        );
                    }
                    Err(err) => {
                        sink.check(
                            CAT,
                            format!("item_{}_destination_hash_recomputed", item.id),
                            false,
                            format!("destination fetch failed: {}", err),
                            dest_hash,
                            "unreadable",
                        );
                    }
                },
                _ => {
                    sink.check(
                        CAT,
                        format!("item_{}_destination_hash_recomputed", item.id),
                        false,
                        "destination provider or id missing",
                        "resolvable destination",
                        "missing",
                    );
                }
            }
        }
    }

    fn check_outbox_integrity(
        &self,
        sink: &mut CheckSink,
        items: &[MigrationItem],
        events: &[crate::model::OutboxEvent],
    ) {
        use ValidationCategory::OutboxIntegrity as CAT;

        let mut events_by_item: HashMap<u64, usize> = HashMap::new();
        for event in events {
            *events_by_item.entry(event.item_id).or_default() += 1;
        }
        for item in items {
            let count = events_by_item.get(&item.id).copied().unwrap_or(0);
            sink.check(
                CAT,
                format!("item_{}_has_one_event", item.id),
                count == 1,
                "exactly one outbox row per item",
                1,
                count,
            );
        }

        let mut keys = HashSet::new();
        let all_unique = events.iter().all(|e| keys.insert(e.idempotent_key.clone()));
        sink.check(
            CAT,
            "idempotent_keys_unique",
            all_unique,
            "idempotent keys must be globally unique",
            events.len(),
            keys.len(),
        );

        for event in events {
            match serde_json::from_str::<TaskPayload>(&event.payload) {
                Ok(payload) => {
                    sink.check(
                        CAT,
                        format!("event_{}_payload_parses", event.id),
                        true,
                        "payload JSON parses",
                        "valid TaskPayload",
                        "valid TaskPayload",
                    );
                    sink.check(
                        CAT,
                        format!("event_{}_attempts_bounded", event.id),
                        event.publish_attempts <= payload.max_attempts,
                        "publish attempts bounded by max attempts",
                        format!("<= {}", payload.max_attempts),
                        event.publish_attempts,
                    );
                }
                Err(err) => {
                    sink.check(
                        CAT,
                        format!("event_{}_payload_parses", event.id),
                        false,
                        format!("payload does not parse: {}", err),
                        "valid TaskPayload",
                        "parse error",
                    );
                }
            }
        }
    }

    fn check_migration_invariants(
        &self,
        sink: &mut CheckSink,
        job: &crate::model::MigrationJob,
        items: &[MigrationItem],
    ) {
        use ValidationCategory::MigrationInvariants as CAT;

        let successful: Vec<&MigrationItem> = items
            .iter()
            .filter(|i| i.status == ItemStatus::Completed)
            .collect();

        sink.check(
            CAT,
            "no_data_loss",
            successful.len() as u64 == job.migrated_documents,
            "count of successful items equals migrated counter",
            job.migrated_documents,
            successful.len(),
        );

        // Dry-run items intentionally share the sentinel destination.
        let real_dests: Vec<&str> = successful
            .iter()
            .filter_map(|i| i.dest_provider_id.as_deref())
            .filter(|d| *d != DRY_RUN_DEST)
            .collect();
        let distinct_real: HashSet<&str> = real_dests.iter().copied().collect();
        sink.check(
            CAT,
            "no_duplication",
            distinct_real.len() == real_dests.len(),
            "no two successful items share a destination",
            real_dests.len(),
            distinct_real.len(),
        );

        for item in items {
            sink.check(
                CAT,
                format!("item_{}_references_job", item.id),
                item.job_id == job.id,
                "item must reference its owning job",
                job.id,
                item.job_id,
            );
            sink.check(
                CAT,
                format!("item_{}_monotonic_timestamps", item.id),
                item.updated_at >= item.created_at,
                "item updates never predate creation",
                format!(">= {}", item.created_at),
                item.updated_at,
            );
        }

        let (mut migrated, mut failed, mut skipped) = (0u64, 0u64, 0u64);
        for item in items {
            match item.status {
                ItemStatus::Completed => migrated += 1,
                ItemStatus::Failed => failed += 1,
                ItemStatus::Skipped => skipped += 1,
                _ => {}
            }
        }
        sink.check(
            CAT,
            "counters_match_item_statuses",
            migrated == job.migrated_documents
                && failed == job.failed_documents
                && skipped == job.skipped_documents,
            "job counters equal item-status aggregates",
            format!(
                "migrated={} failed={} skipped={}",
                job.migrated_documents, job.failed_documents, job.skipped_documents
            ),
            format!("migrated={} failed={} skipped={}", migrated, failed, skipped),
        );
    }

    async fn check_destination_retrievability(
        &self,
        sink: &mut CheckSink,
        job: &crate::model::MigrationJob,
        items: &[MigrationItem],
    ) {
        use ValidationCategory::DestinationRetrievability as CAT;

        let dest = match self.registry.get(&job.dest_provider) {
            Ok(provider) => provider,
            Err(err) => {
                sink.check(
                    CAT,
                    "destination_provider_resolves",
                    false,
                    err.to_string(),
                    job.dest_provider.clone(),
                    "unresolvable",
                );
                return;
            }
        };

        for item in items.iter().filter(|i| i.status == ItemStatus::Completed) {
            let Some(dest_id) = item.dest_provider_id.as_deref() else {
                sink.check(
                    CAT,
                    format!("item_{}_retrievable", item.id),
                    false,
                    "completed item has no destination id",
                    "destination id recorded",
                    "none",
                );
                continue;
            };
            if dest_id == DRY_RUN_DEST {
                continue;
            }

            let retrievable = dest.get_document(dest_id).await.is_ok();
            sink.check(
                CAT,
                format!("item_{}_retrievable", item.id),
                retrievable,
                format!("document {} fetchable at destination", item.document_uuid),
                "retrievable",
                if retrievable { "retrievable" } else { "missing" },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::DocumentUuid;
    use crate::model::{JobStatus, MigrationJob, Strategy};
    use crate::provider::{DocumentProvider, MemoryProvider};
    use crate::worker;
    use chrono::Utc;
    use tempfile::TempDir;

    struct Fixture {
        store: Arc<MigrationStore>,
        registry: Arc<ProviderRegistry>,
        source: Arc<MemoryProvider>,
        dest: Arc<MemoryProvider>,
        _temp: TempDir,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MigrationStore::open(temp.path().join("store")).unwrap());
        let source = Arc::new(MemoryProvider::new());
        let dest = Arc::new(MemoryProvider::new());
        let mut registry = ProviderRegistry::new();
        registry.register("source", source.clone());
        registry.register("dest", dest.clone());
        Fixture {
            store,
            registry: Arc::new(registry),
            source,
            dest,
            _temp: temp,
        }
    }

    fn job_row() -> MigrationJob {
        let now = Utc::now();
        MigrationJob {
            id: 0,
            job_uuid: uuid::Uuid::new_v4(),
            name: "validator-test".to_string(),
            source_provider: "source".to_string(),
            dest_provider: "dest".to_string(),
            strategy: Strategy::Copy,
            status: JobStatus::Pending,
            dry_run: false,
            concurrency: 5,
            batch_size: 100,
            validate_after: true,
            rollback_enabled: false,
            max_attempts: 3,
            total_documents: 0,
            migrated_documents: 0,
            failed_documents: 0,
            skipped_documents: 0,
            validation_status: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    async fn run_job(fx: &Fixture, doc_count: usize) -> u64 {
        let job = fx.store.insert_job(job_row()).unwrap();
        let docs: Vec<(DocumentUuid, String)> = (0..doc_count)
            .map(|i| {
                let uuid = DocumentUuid::new();
                let id = fx
                    .source
                    .insert_document(uuid, &format!("doc-{}.md", i), format!("body {}", i).as_bytes());
                (uuid, id)
            })
            .collect();
        fx.store.queue_documents(job.id, &docs).unwrap();
        fx.store
            .transition_job(job.id, &[JobStatus::Pending], JobStatus::Running)
            .unwrap();
        worker::drain(&fx.store, &fx.registry, 8).await.unwrap();
        job.id
    }

    #[tokio::test]
    async fn test_clean_job_passes_all_checks() {
        let fx = fixture();
        let job_id = run_job(&fx, 3).await;

        let validator = Validator::new(fx.store.clone(), fx.registry.clone());
        let report = validator.validate_job(job_id).await.unwrap();

        assert_all_validations_passed(&report);
        assert!(report.passed_count() >= 15);
    }

    #[tokio::test]
    async fn test_missing_job_errors() {
        let fx = fixture();
        let validator = Validator::new(fx.store.clone(), fx.registry.clone());
        let err = validator.validate_job(404).await.unwrap_err();
        assert!(matches!(err, ValidatorError::JobNotFound(404)));
    }

    #[tokio::test]
    async fn test_tampered_destination_fails_content_integrity() {
        let fx = fixture();
        let job_id = run_job(&fx, 1).await;

        // Corrupt the destination after migration.
        let item = fx.store.list_items_for_job(job_id).unwrap().remove(0);
        let dest_id = item.dest_provider_id.as_deref().unwrap().to_string();
        fx.dest
            .get_content(&dest_id)
            .await
            .expect("destination document must exist");
        fx.dest
            .update_content(&dest_id, bytes::Bytes::from_static(b"tampered"))
            .await
            .unwrap();

        let validator = Validator::new(fx.store.clone(), fx.registry.clone());
        let report = validator.validate_job(job_id).await.unwrap();

        assert!(!report.all_passed());
        assert!(report.failures().iter().any(|c| {
            c.category == ValidationCategory::ContentIntegrity
                && c.name.ends_with("destination_hash_recomputed")
        }));
    }

    #[tokio::test]
    async fn test_deleted_destination_fails_retrievability() {
        let fx = fixture();
        let job_id = run_job(&fx, 2).await;

        let item = fx.store.list_items_for_job(job_id).unwrap().remove(0);
        fx.dest
            .delete_document(item.dest_provider_id.as_deref().unwrap())
            .await
            .unwrap();

        let validator = Validator::new(fx.store.clone(), fx.registry.clone());
        let report = validator.validate_job(job_id).await.unwrap();

        assert!(!report.all_passed());
        assert!(report
            .failures()
            .iter()
            .any(|c| c.category == ValidationCategory::DestinationRetrievability));
    }

    #[tokio::test]
    async fn test_non_terminal_job_fails_completeness() {
        let fx = fixture();
        let job = fx.store.insert_job(job_row()).unwrap();
        let uuid = DocumentUuid::new();
        let id = fx.source.insert_document(uuid, "doc.md", b"body");
        fx.store.queue_documents(job.id, &[(uuid, id)]).unwrap();

        let validator = Validator::new(fx.store.clone(), fx.registry.clone());
        let report = validator.validate_job(job.id).await.unwrap();

        assert!(!report.all_passed());
        assert!(report
            .failures()
            .iter()
            .any(|c| c.name == "job_status_terminal"));
    }
}

//! Task runner: executes one document transfer end to end.
//!
//! `process_task` walks the transfer protocol: mark the item in progress,
//! read the source, create-or-adopt the destination document under the same
//! UUID, write the content, validate by hash, delete the source on `move`,
//! and record the terminal item state. Provider failures are classified
//! here; raw backend errors never cross the item boundary.

use std::time::Instant;

use tracing::{info, warn};

use crate::content;
use crate::model::{DRY_RUN_DEST, ItemStatus, Strategy, TaskPayload};
use crate::provider::{ProviderError, ProviderRegistry};
use crate::store::{ItemUpdate, MigrationStore};

/// What the worker should do with the outbox event after a task ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Item reached `completed`; publish the event.
    Completed,
    /// Item failed permanently; fail the event.
    Failed(String),
    /// Transient failure with attempts remaining; release the event back to
    /// `pending`.
    Retry(String),
}

/// Process one claimed migration task.
pub async fn process_task(
    store: &MigrationStore,
    registry: &ProviderRegistry,
    payload: &TaskPayload,
) -> TaskOutcome {
    let started = Instant::now();
    let item_id = payload.item_id;
    let uuid = payload.document_uuid;

    // Replay guard: a crash between item completion and event publish means
    // the claim comes back for an already-terminal item.
    let current = match store.get_item(item_id) {
        Ok(Some(item)) => item,
        Ok(None) => return TaskOutcome::Failed(format!("item {} does not exist", item_id)),
        Err(err) => return TaskOutcome::Retry(format!("store read: {}", err)),
    };
    if current.status.is_terminal() {
        info!(item_id, status = %current.status, "Item already terminal; idempotent replay");
        return match current.status {
            ItemStatus::Failed => TaskOutcome::Failed(
                current.error_message.unwrap_or_else(|| "item already failed".to_string()),
            ),
            _ => TaskOutcome::Completed,
        };
    }

    // Step 1: resolve providers. A missing provider is a configuration bug
    // and fails the item permanently.
    let source = match registry.get(&payload.source_provider) {
        Ok(provider) => provider,
        Err(err) => return fail_item(store, item_id, started, &err.to_string()),
    };
    let dest = match registry.get(&payload.dest_provider) {
        Ok(provider) => provider,
        Err(err) => return fail_item(store, item_id, started, &err.to_string()),
    };

    // Step 2: flip to in_progress, bumping the attempt counter.
    let item = match store.mark_item_in_progress(item_id) {
        Ok(item) => item,
        Err(err) => return TaskOutcome::Retry(format!("store write: {}", err)),
    };
    let attempt = item.attempt_count;

    info!(
        job_id = payload.job_id,
        item_id,
        document_uuid = %uuid,
        attempt,
        dry_run = payload.dry_run,
        strategy = %payload.strategy,
        "Processing migration task"
    );

    // Steps 3-4: read the source (also the dry-run readability probe).
    let source_content = match source.get_content(&payload.source_provider_id).await {
        Ok(body) => body,
        Err(err) => {
            return classify_failure(
                store,
                item_id,
                attempt,
                payload.max_attempts,
                started,
                "read source",
                err,
            );
        }
    };
    let source_hash = source_content.content_hash.clone();

    if payload.dry_run {
        let update = ItemUpdate {
            dest_provider_id: Some(DRY_RUN_DEST.to_string()),
            source_content_hash: Some(source_hash),
            duration_ms: Some(started.elapsed().as_millis() as u64),
            ..Default::default()
        };
        return match store.update_item_status(item_id, ItemStatus::Completed, update) {
            Ok(_) => TaskOutcome::Completed,
            Err(err) => TaskOutcome::Retry(format!("store write: {}", err)),
        };
    }

    let source_meta = match source.get_document(&payload.source_provider_id).await {
        Ok(meta) => meta,
        Err(err) => {
            return classify_failure(
                store,
                item_id,
                attempt,
                payload.max_attempts,
                started,
                "read source metadata",
                err,
            );
        }
    };

    // Step 5: create the destination document under the same UUID.
    // `AlreadyExists` is idempotent success: adopt the existing replica so a
    // crash replay converges instead of duplicating.
    let dest_doc = match dest
        .create_document_with_uuid(uuid, &source_meta.name, None, None)
        .await
    {
        Ok(meta) => meta,
        Err(ProviderError::AlreadyExists(_)) => match dest.get_document_by_uuid(uuid).await {
            Ok(meta) => {
                info!(item_id, document_uuid = %uuid, "Destination already exists; adopting");
                meta
            }
            Err(err) => {
                return classify_failure(
                    store,
                    item_id,
                    attempt,
                    payload.max_attempts,
                    started,
                    "adopt existing destination",
                    err,
                );
            }
        },
        Err(err) => {
            return classify_failure(
                store,
                item_id,
                attempt,
                payload.max_attempts,
                started,
                "create destination",
                err,
            );
        }
    };

    // Step 6: write the content; best-effort cleanup on failure.
    let written = match dest
        .update_content(&dest_doc.provider_id, source_content.body.clone())
        .await
    {
        Ok(written) => written,
        Err(err) => {
            if let Err(cleanup_err) = dest.delete_document(&dest_doc.provider_id).await {
                warn!(
                    item_id,
                    dest_provider_id = %dest_doc.provider_id,
                    error = %cleanup_err,
                    "Cleanup of partial destination write failed"
                );
            }
            return classify_failure(
                store,
                item_id,
                attempt,
                payload.max_attempts,
                started,
                "write destination",
                err,
            );
        }
    };

    // Step 7: validate by re-fetching the destination and comparing hashes.
    let mut dest_hash = written.content_hash.clone();
    let mut content_match = None;
    if payload.validate {
        let validate_started = Instant::now();
        match dest.get_content(&dest_doc.provider_id).await {
            Ok(refetched) => {
                dest_hash = refetched.content_hash.clone();
                let matched = content::hashes_equal(&source_hash, &dest_hash);
                let bytes_diff =
                    (source_content.body.len() as i64 - refetched.body.len() as i64).abs();
                content_match = Some(matched);
                info!(
                    item_id,
                    document_uuid = %uuid,
                    content_match = matched,
                    bytes_diff,
                    validation_time_ms = validate_started.elapsed().as_millis() as u64,
                    "Transfer validated"
                );
                if !matched {
                    warn!(
                        item_id,
                        source_hash = %source_hash,
                        dest_hash = %dest_hash,
                        "Content hash mismatch after transfer"
                    );
                }
            }
            Err(err) => {
                return classify_failure(
                    store,
                    item_id,
                    attempt,
                    payload.max_attempts,
                    started,
                    "validate destination",
                    err,
                );
            }
        }
    }

    // Step 8: move deletes the source once the replica is proven. A delete
    // failure is logged but never fails the item; the document is already
    // replicated.
    let validation_ok = content_match != Some(false);
    if payload.strategy == Strategy::Move && validation_ok {
        if let Err(err) = source.delete_document(&payload.source_provider_id).await {
            warn!(
                item_id,
                source_provider_id = %payload.source_provider_id,
                error = %err,
                "Source delete after move failed; replica retained at destination"
            );
        }
    }

    // Step 9: record the terminal state; counters ride the same transaction.
    let update = ItemUpdate {
        dest_provider_id: Some(dest_doc.provider_id.clone()),
        source_content_hash: Some(source_hash),
        dest_content_hash: Some(dest_hash),
        content_match,
        duration_ms: Some(started.elapsed().as_millis() as u64),
        ..Default::default()
    };
    match store.update_item_status(item_id, ItemStatus::Completed, update) {
        Ok(_) => TaskOutcome::Completed,
        Err(err) => TaskOutcome::Retry(format!("store write: {}", err)),
    }
}

/// Permanent failure: record it on the item and fail the event.
fn fail_item(
    store: &MigrationStore,
    item_id: u64,
    started: Instant,
    message: &str,
) -> TaskOutcome {
    let update = ItemUpdate {
        error_message: Some(message.to_string()),
        is_retryable: Some(false),
        duration_ms: Some(started.elapsed().as_millis() as u64),
        ..Default::default()
    };
    if let Err(err) = store.update_item_status(item_id, ItemStatus::Failed, update) {
        warn!(item_id, error = %err, "Failed to record item failure");
    }
    TaskOutcome::Failed(message.to_string())
}

/// Classify a provider failure: transient errors with attempts remaining are
/// retried via release; everything else fails the item permanently.
fn classify_failure(
    store: &MigrationStore,
    item_id: u64,
    attempt: u32,
    max_attempts: u32,
    started: Instant,
    context: &str,
    err: ProviderError,
) -> TaskOutcome {
    let message = format!("{}: {}", context, err);

    if err.is_retryable() && attempt < max_attempts {
        let update = ItemUpdate {
            error_message: Some(message.clone()),
            ..Default::default()
        };
        if let Err(store_err) = store.update_item_status(item_id, ItemStatus::InProgress, update) {
            warn!(item_id, error = %store_err, "Failed to record retryable error");
        }
        info!(item_id, attempt, max_attempts, error = %message, "Transient failure; releasing for retry");
        TaskOutcome::Retry(message)
    } else {
        fail_item(store, item_id, started, &message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::DocumentUuid;
    use crate::model::{JobStatus, MigrationJob, OutboxStatus};
    use crate::provider::{DocumentProvider, MemoryProvider};
    use crate::provider::memory::{FaultKind, FaultOp};
    use chrono::Utc;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct Fixture {
        store: Arc<MigrationStore>,
        registry: Arc<ProviderRegistry>,
        source: Arc<MemoryProvider>,
        dest: Arc<MemoryProvider>,
        _temp: TempDir,
    }

    fn fixture(strategy: Strategy, dry_run: bool, validate: bool) -> (Fixture, MigrationJob) {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MigrationStore::open(temp.path().join("store")).unwrap());

        let source = Arc::new(MemoryProvider::new());
        let dest = Arc::new(MemoryProvider::new());
        let mut registry = ProviderRegistry::new();
        registry.register("source", source.clone());
        registry.register("dest", dest.clone());

        let now = Utc::now();
        let job = store
            .insert_job(MigrationJob {
                id: 0,
                job_uuid: uuid::Uuid::new_v4(),
                name: "runner-test".to_string(),
                source_provider: "source".to_string(),
                dest_provider: "dest".to_string(),
                strategy,
                status: JobStatus::Pending,
                dry_run,
                concurrency: 5,
                batch_size: 100,
                validate_after: validate,
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
            })
            .unwrap();

        (
            Fixture {
                store,
                registry: Arc::new(registry),
                source,
                dest,
                _temp: temp,
            },
            job,
        )
    }

    fn queue_one(fx: &Fixture, job: &MigrationJob, body: &[u8]) -> (DocumentUuid, TaskPayload) {
        let uuid = DocumentUuid::new();
        let source_id = fx.source.insert_document(uuid, "doc.md", body);
        fx.store.queue_documents(job.id, &[(uuid, source_id)]).unwrap();
        fx.store
            .transition_job(job.id, &[JobStatus::Pending], JobStatus::Running)
            .unwrap();

        let event = fx.store.list_events_for_job(job.id).unwrap().remove(0);
        let payload: TaskPayload = serde_json::from_str(&event.payload).unwrap();
        (uuid, payload)
    }

    #[tokio::test]
    async fn test_copy_happy_path() {
        let (fx, job) = fixture(Strategy::Copy, false, true);
        let (uuid, payload) = queue_one(&fx, &job, b"document body\n");

        let outcome = process_task(&fx.store, &fx.registry, &payload).await;
        assert_eq!(outcome, TaskOutcome::Completed);

        let item = fx.store.require_item(payload.item_id).unwrap();
        assert_eq!(item.status, ItemStatus::Completed);
        assert_eq!(item.attempt_count, 1);
        assert_eq!(item.content_match, Some(true));
        assert!(item.dest_provider_id.is_some());
        assert!(item.duration_ms.is_some());

        // Source retained on copy; destination holds the same content.
        assert!(fx.source.contains_uuid(uuid));
        assert!(fx.dest.contains_uuid(uuid));
        let dest_content = fx
            .dest
            .get_content(item.dest_provider_id.as_deref().unwrap())
            .await
            .unwrap();
        assert_eq!(dest_content.body.as_ref(), b"document body\n");
    }

    #[tokio::test]
    async fn test_move_deletes_source_after_validation() {
        let (fx, job) = fixture(Strategy::Move, false, true);
        let (uuid, payload) = queue_one(&fx, &job, b"to be moved");

        let outcome = process_task(&fx.store, &fx.registry, &payload).await;
        assert_eq!(outcome, TaskOutcome::Completed);

        assert!(!fx.source.contains_uuid(uuid));
        assert!(fx.dest.contains_uuid(uuid));

        let err = fx
            .source
            .get_content(&payload.source_provider_id)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let (fx, job) = fixture(Strategy::Copy, true, true);
        let (_uuid, payload) = queue_one(&fx, &job, b"dry run body");

        let outcome = process_task(&fx.store, &fx.registry, &payload).await;
        assert_eq!(outcome, TaskOutcome::Completed);

        let item = fx.store.require_item(payload.item_id).unwrap();
        assert_eq!(item.status, ItemStatus::Completed);
        assert_eq!(item.dest_provider_id.as_deref(), Some(DRY_RUN_DEST));
        assert!(item.source_content_hash.is_some());

        assert_eq!(fx.dest.document_count(), 0);
    }

    #[tokio::test]
    async fn test_transient_then_success() {
        let (fx, job) = fixture(Strategy::Copy, false, true);
        let (_uuid, payload) = queue_one(&fx, &job, b"flaky source");

        fx.source.inject_fault(
            FaultOp::GetContent,
            Some(&payload.source_provider_id),
            FaultKind::Transient,
            2,
        );

        let first = process_task(&fx.store, &fx.registry, &payload).await;
        assert!(matches!(first, TaskOutcome::Retry(_)));
        let second = process_task(&fx.store, &fx.registry, &payload).await;
        assert!(matches!(second, TaskOutcome::Retry(_)));
        let third = process_task(&fx.store, &fx.registry, &payload).await;
        assert_eq!(third, TaskOutcome::Completed);

        let item = fx.store.require_item(payload.item_id).unwrap();
        assert_eq!(item.status, ItemStatus::Completed);
        assert_eq!(item.attempt_count, 3);
    }

    #[tokio::test]
    async fn test_transient_exhausts_attempts() {
        let (fx, job) = fixture(Strategy::Copy, false, true);
        let (_uuid, payload) = queue_one(&fx, &job, b"always flaky");

        fx.source.inject_fault(
            FaultOp::GetContent,
            Some(&payload.source_provider_id),
            FaultKind::Transient,
            10,
        );

        let first = process_task(&fx.store, &fx.registry, &payload).await;
        assert!(matches!(first, TaskOutcome::Retry(_)));
        let second = process_task(&fx.store, &fx.registry, &payload).await;
        assert!(matches!(second, TaskOutcome::Retry(_)));
        // Third attempt reaches max_attempts and fails permanently.
        let third = process_task(&fx.store, &fx.registry, &payload).await;
        assert!(matches!(third, TaskOutcome::Failed(_)));

        let item = fx.store.require_item(payload.item_id).unwrap();
        assert_eq!(item.status, ItemStatus::Failed);
        assert!(!item.is_retryable);
        assert!(item.error_message.as_deref().unwrap().contains("transient"));
    }

    #[tokio::test]
    async fn test_not_found_fails_permanently() {
        let (fx, job) = fixture(Strategy::Copy, false, true);
        let (_uuid, mut payload) = queue_one(&fx, &job, b"body");
        payload.source_provider_id = "mem:gone".to_string();

        let outcome = process_task(&fx.store, &fx.registry, &payload).await;
        assert!(matches!(outcome, TaskOutcome::Failed(_)));

        let item = fx.store.require_item(payload.item_id).unwrap();
        assert_eq!(item.status, ItemStatus::Failed);
        assert_eq!(item.attempt_count, 1);
    }

    #[tokio::test]
    async fn test_already_exists_is_idempotent_success() {
        let (fx, job) = fixture(Strategy::Copy, false, true);
        let (uuid, payload) = queue_one(&fx, &job, b"replayed body");

        // Destination already holds the document from a previous attempt.
        fx.dest.insert_document(uuid, "doc.md", b"stale body");

        let outcome = process_task(&fx.store, &fx.registry, &payload).await;
        assert_eq!(outcome, TaskOutcome::Completed);

        // Exactly one destination document, converged to the source body.
        assert_eq!(fx.dest.document_count(), 1);
        let item = fx.store.require_item(payload.item_id).unwrap();
        assert_eq!(item.content_match, Some(true));
        let dest_content = fx
            .dest
            .get_content(item.dest_provider_id.as_deref().unwrap())
            .await
            .unwrap();
        assert_eq!(dest_content.body.as_ref(), b"replayed body");
    }

    #[tokio::test]
    async fn test_terminal_item_replay_publishes_without_work() {
        let (fx, job) = fixture(Strategy::Copy, false, true);
        let (_uuid, payload) = queue_one(&fx, &job, b"once");

        assert_eq!(
            process_task(&fx.store, &fx.registry, &payload).await,
            TaskOutcome::Completed
        );
        let dest_count = fx.dest.document_count();

        // Replay the same payload, as after a crash between item completion
        // and event publish.
        assert_eq!(
            process_task(&fx.store, &fx.registry, &payload).await,
            TaskOutcome::Completed
        );

        let item = fx.store.require_item(payload.item_id).unwrap();
        assert_eq!(item.attempt_count, 1);
        assert_eq!(fx.dest.document_count(), dest_count);
    }

    #[tokio::test]
    async fn test_write_failure_cleans_up_destination() {
        let (fx, job) = fixture(Strategy::Copy, false, true);
        let (uuid, payload) = queue_one(&fx, &job, b"body");

        fx.dest
            .inject_fault(FaultOp::UpdateContent, None, FaultKind::PermissionDenied, 1);

        let outcome = process_task(&fx.store, &fx.registry, &payload).await;
        assert!(matches!(outcome, TaskOutcome::Failed(_)));

        // The partially created destination document was removed.
        assert!(!fx.dest.contains_uuid(uuid));

        let item = fx.store.require_item(payload.item_id).unwrap();
        assert_eq!(item.status, ItemStatus::Failed);
        assert!(item.error_message.as_deref().unwrap().contains("permission denied"));
    }

    #[tokio::test]
    async fn test_missing_provider_fails_item() {
        let (fx, job) = fixture(Strategy::Copy, false, true);
        let (_uuid, mut payload) = queue_one(&fx, &job, b"body");
        payload.dest_provider = "missing".to_string();

        let outcome = process_task(&fx.store, &fx.registry, &payload).await;
        assert!(matches!(outcome, TaskOutcome::Failed(_)));

        let item = fx.store.require_item(payload.item_id).unwrap();
        assert_eq!(item.status, ItemStatus::Failed);
        assert!(!item.is_retryable);
        let _ = job;
    }

    #[tokio::test]
    async fn test_event_state_not_touched_by_runner() {
        // The runner only updates items; event transitions belong to the
        // worker loop.
        let (fx, job) = fixture(Strategy::Copy, false, false);
        let (_uuid, payload) = queue_one(&fx, &job, b"body");

        process_task(&fx.store, &fx.registry, &payload).await;
        let event = fx.store.list_events_for_job(job.id).unwrap().remove(0);
        assert_eq!(event.status, OutboxStatus::Pending);
    }
}

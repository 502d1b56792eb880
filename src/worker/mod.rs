//! Migration worker pool.
//!
//! Workers are cooperative tokio tasks that poll the outbox: claim a batch
//! of pending events, run each through [`runner::process_task`], and record
//! the outcome on the event. All coordination happens through the store, so
//! several worker processes can share one queue without double-claiming.
//!
//! Workers never hold a store transaction across provider I/O: the claim
//! commits first, the transfer runs, and the result commits separately.

pub mod runner;

pub use runner::{TaskOutcome, process_task};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::model::{OutboxEvent, TaskPayload};
use crate::provider::ProviderRegistry;
use crate::store::MigrationStore;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Number of poll loops in this process.
    pub workers: usize,
    /// Sleep between polls when the queue is empty.
    pub poll_interval: Duration,
    /// Maximum events claimed per poll.
    pub claim_batch: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval: Duration::from_millis(100),
            claim_batch: 16,
        }
    }
}

/// Handle to a running pool of worker tasks.
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `config.workers` poll loops against the store.
    pub fn spawn(
        store: Arc<MigrationStore>,
        registry: Arc<ProviderRegistry>,
        config: WorkerConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        info!(workers = config.workers, "Starting migration worker pool");

        let handles = (0..config.workers)
            .map(|worker_id| {
                let store = store.clone();
                let registry = registry.clone();
                let config = config.clone();
                let shutdown_rx = shutdown_rx.clone();
                tokio::spawn(async move {
                    worker_loop(worker_id, store, registry, config, shutdown_rx).await;
                })
            })
            .collect();

        Self {
            shutdown_tx,
            handles,
        }
    }

    /// Signal shutdown and wait for in-flight tasks to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "Worker task join failed");
            }
        }
        info!("Worker pool stopped");
    }

    /// Subscribe to the pool's shutdown flag (for companion tasks like the
    /// reaper).
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }
}

async fn worker_loop(
    worker_id: usize,
    store: Arc<MigrationStore>,
    registry: Arc<ProviderRegistry>,
    config: WorkerConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(worker_id, "Worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let claimed = match store.claim_pending(config.claim_batch) {
            Ok(events) => events,
            Err(err) => {
                error!(worker_id, error = %err, "Claim failed");
                Vec::new()
            }
        };

        if claimed.is_empty() {
            tokio::select! {
                _ = tokio::time::sleep(config.poll_interval) => {}
                _ = shutdown.changed() => {}
            }
            continue;
        }

        for event in claimed {
            handle_event(&store, &registry, &event).await;
        }
    }

    debug!(worker_id, "Worker stopped");
}

/// Run one claimed event through the task runner and record the outcome.
async fn handle_event(store: &MigrationStore, registry: &ProviderRegistry, event: &OutboxEvent) {
    let payload: TaskPayload = match serde_json::from_str(&event.payload) {
        Ok(payload) => payload,
        Err(err) => {
            // A payload that does not parse can never succeed.
            error!(event_id = event.id, error = %err, "Unparseable task payload");
            if let Err(store_err) =
                store.mark_event_failed(event.id, &format!("unparseable payload: {}", err))
            {
                error!(event_id = event.id, error = %store_err, "Failed to fail event");
            }
            return;
        }
    };

    match runner::process_task(store, registry, &payload).await {
        TaskOutcome::Completed => {
            if let Err(err) = store.mark_event_published(event.id) {
                error!(event_id = event.id, error = %err, "Failed to publish event");
            }
        }
        TaskOutcome::Failed(message) => {
            if let Err(err) = store.mark_event_failed(event.id, &message) {
                error!(event_id = event.id, error = %err, "Failed to fail event");
            }
        }
        TaskOutcome::Retry(message) => {
            if let Err(err) = store.release_event(event.id, &message) {
                error!(event_id = event.id, error = %err, "Failed to release event");
            }
        }
    }
}

/// Drive the queue until no events are claimable, processing inline.
///
/// Deterministic alternative to a running pool; used by tests and one-shot
/// tooling. Returns the number of events processed.
pub async fn drain(
    store: &MigrationStore,
    registry: &ProviderRegistry,
    claim_batch: usize,
) -> crate::store::Result<usize> {
    let mut processed = 0;
    loop {
        let claimed = store.claim_pending(claim_batch)?;
        if claimed.is_empty() {
            return Ok(processed);
        }
        for event in claimed {
            handle_event(store, registry, &event).await;
            processed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::DocumentUuid;
    use crate::model::{ItemStatus, JobStatus, MigrationJob, OutboxStatus, Strategy};
    use crate::provider::MemoryProvider;
    use chrono::Utc;
    use tempfile::TempDir;

    fn base_job(dry_run: bool) -> MigrationJob {
        let now = Utc::now();
        MigrationJob {
            id: 0,
            job_uuid: uuid::Uuid::new_v4(),
            name: "pool-test".to_string(),
            source_provider: "source".to_string(),
            dest_provider: "dest".to_string(),
            strategy: Strategy::Copy,
            status: JobStatus::Pending,
            dry_run,
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

    #[tokio::test]
    async fn test_drain_processes_all_events() {
        let fx = fixture();
        let job = fx.store.insert_job(base_job(false)).unwrap();

        let docs: Vec<(DocumentUuid, String)> = (0..4)
            .map(|i| {
                let uuid = DocumentUuid::new();
                let id = fx.source.insert_document(uuid, &format!("doc-{}.md", i), b"body");
                (uuid, id)
            })
            .collect();
        fx.store.queue_documents(job.id, &docs).unwrap();
        fx.store
            .transition_job(job.id, &[JobStatus::Pending], JobStatus::Running)
            .unwrap();

        let processed = drain(&fx.store, &fx.registry, 2).await.unwrap();
        assert_eq!(processed, 4);

        let job_row = fx.store.require_job(job.id).unwrap();
        assert_eq!(job_row.migrated_documents, 4);
        assert_eq!(job_row.status, JobStatus::Completed);

        for event in fx.store.list_events_for_job(job.id).unwrap() {
            assert_eq!(event.status, OutboxStatus::Published);
        }
    }

    #[tokio::test]
    async fn test_drain_is_idempotent_when_queue_empty() {
        let fx = fixture();
        assert_eq!(drain(&fx.store, &fx.registry, 8).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pool_processes_and_shuts_down() {
        let fx = fixture();
        let job = fx.store.insert_job(base_job(false)).unwrap();

        let uuid = DocumentUuid::new();
        let source_id = fx.source.insert_document(uuid, "doc.md", b"pool body");
        fx.store.queue_documents(job.id, &[(uuid, source_id)]).unwrap();
        fx.store
            .transition_job(job.id, &[JobStatus::Pending], JobStatus::Running)
            .unwrap();

        let pool = WorkerPool::spawn(
            fx.store.clone(),
            fx.registry.clone(),
            WorkerConfig {
                workers: 2,
                poll_interval: Duration::from_millis(10),
                claim_batch: 4,
            },
        );

        // Wait for the job to finish.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let job_row = fx.store.require_job(job.id).unwrap();
            if job_row.status.is_terminal() {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "job did not finish");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        pool.shutdown().await;

        let job_row = fx.store.require_job(job.id).unwrap();
        assert_eq!(job_row.status, JobStatus::Completed);
        assert!(fx.dest.contains_uuid(uuid));
    }

    #[tokio::test]
    async fn test_unparseable_payload_fails_event() {
        let fx = fixture();
        let job = fx.store.insert_job(base_job(false)).unwrap();
        let uuid = DocumentUuid::new();
        let source_id = fx.source.insert_document(uuid, "doc.md", b"body");
        fx.store.queue_documents(job.id, &[(uuid, source_id)]).unwrap();
        fx.store
            .transition_job(job.id, &[JobStatus::Pending], JobStatus::Running)
            .unwrap();

        let mut event = fx.store.list_events_for_job(job.id).unwrap().remove(0);
        event.payload = "not json".to_string();
        let event = fx.store.put_event(event).unwrap();

        handle_event(&fx.store, &fx.registry, &event).await;

        let failed = fx.store.require_event(event.id).unwrap();
        assert_eq!(failed.status, OutboxStatus::Failed);
        assert!(failed.last_error.as_deref().unwrap().contains("unparseable"));
    }

    #[tokio::test]
    async fn test_worker_skips_paused_job() {
        let fx = fixture();
        let job = fx.store.insert_job(base_job(false)).unwrap();
        let uuid = DocumentUuid::new();
        let source_id = fx.source.insert_document(uuid, "doc.md", b"body");
        fx.store.queue_documents(job.id, &[(uuid, source_id)]).unwrap();
        fx.store
            .transition_job(job.id, &[JobStatus::Pending], JobStatus::Running)
            .unwrap();
        fx.store
            .transition_job(job.id, &[JobStatus::Running], JobStatus::Paused)
            .unwrap();

        assert_eq!(drain(&fx.store, &fx.registry, 8).await.unwrap(), 0);
        let item = fx.store.list_items_for_job(job.id).unwrap().remove(0);
        assert_eq!(item.status, ItemStatus::Pending);
    }
}

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use tracing::{debug, info, warn};

use super::error::{Result, StoreError};
use super::keys::{
    decode_row_ref, encode_byjob_key, encode_byjob_prefix, encode_doc_key, encode_event_key,
    encode_idem_key, encode_item_key, encode_job_key, encode_seq_key,
};
use crate::ids::DocumentUuid;
use crate::model::{
    EVENT_MIGRATE_DOCUMENT, ItemStatus, JobStatus, MigrationItem, MigrationJob, OutboxEvent,
    OutboxStatus, TaskPayload, idempotent_key,
};

const SEQ_JOBS: &str = "jobs";
const SEQ_ITEMS: &str = "items";
const SEQ_OUTBOX: &str = "outbox";

/// Outcome of a `queue_documents` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueOutcome {
    pub queued: usize,
    /// Pairs skipped because the (job, document) pair was already queued.
    pub duplicates: usize,
}

/// Terminal-state field updates applied together with an item status change.
#[derive(Debug, Clone, Default)]
pub struct ItemUpdate {
    pub dest_provider_id: Option<String>,
    pub source_content_hash: Option<String>,
    pub dest_content_hash: Option<String>,
    pub content_match: Option<bool>,
    pub error_message: Option<String>,
    pub is_retryable: Option<bool>,
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct StoreStats {
    pub job_count: usize,
    pub item_count: usize,
    pub event_count: usize,
}

/// Fjall-backed persistent store for migration jobs, items, and the
/// transactional outbox.
///
/// The keyspace is the only shared mutable state in the engine. All
/// read-modify-write sections run under `write_lock` and commit through one
/// fjall batch, which gives the same no-lost-work and no-double-claim
/// guarantees the logical schema expects from a relational database: an
/// outbox row is created in the same batch as its item, and a claim flips
/// `pending -> claimed` before any other claimer can observe the row.
#[derive(Clone)]
pub struct MigrationStore {
    keyspace: Keyspace,
    jobs: PartitionHandle,
    items: PartitionHandle,
    outbox: PartitionHandle,
    metadata: PartitionHandle,
    job_seq: Arc<AtomicU64>,
    item_seq: Arc<AtomicU64>,
    event_seq: Arc<AtomicU64>,
    write_lock: Arc<Mutex<()>>,
}

impl MigrationStore {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening migration store at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;
        let jobs = keyspace.open_partition("jobs", PartitionCreateOptions::default())?;
        let items = keyspace.open_partition("items", PartitionCreateOptions::default())?;
        let outbox = keyspace.open_partition("outbox", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;

        let job_seq = load_seq(&metadata, SEQ_JOBS)?;
        let item_seq = load_seq(&metadata, SEQ_ITEMS)?;
        let event_seq = load_seq(&metadata, SEQ_OUTBOX)?;

        info!(job_seq, item_seq, event_seq, "Migration store opened");

        Ok(Self {
            keyspace,
            jobs,
            items,
            outbox,
            metadata,
            job_seq: Arc::new(AtomicU64::new(job_seq)),
            item_seq: Arc::new(AtomicU64::new(item_seq)),
            event_seq: Arc::new(AtomicU64::new(event_seq)),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    // ----- jobs -----

    /// Persist a new job, assigning its row id.
    pub fn insert_job(&self, mut job: MigrationJob) -> Result<MigrationJob> {
        let _guard = self.write_lock.lock().unwrap();

        job.id = self.job_seq.fetch_add(1, Ordering::SeqCst) + 1;

        let mut batch = self.keyspace.batch();
        batch.insert(&self.jobs, encode_job_key(job.id), serde_json::to_vec(&job)?);
        batch.insert(
            &self.metadata,
            encode_seq_key(SEQ_JOBS),
            self.job_seq.load(Ordering::SeqCst).to_be_bytes(),
        );
        batch.commit()?;

        debug!(job_id = job.id, job_uuid = %job.job_uuid, "Job inserted");
        Ok(job)
    }

    pub fn get_job(&self, job_id: u64) -> Result<Option<MigrationJob>> {
        match self.jobs.get(encode_job_key(job_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    pub fn require_job(&self, job_id: u64) -> Result<MigrationJob> {
        self.get_job(job_id)?.ok_or(StoreError::JobNotFound(job_id))
    }

    /// Raw job upsert for recovery and operator tooling. Stamps
    /// `updated_at`; does not touch counters or indexes.
    pub fn put_job(&self, mut job: MigrationJob) -> Result<MigrationJob> {
        let _guard = self.write_lock.lock().unwrap();
        job.updated_at = Utc::now();
        self.jobs.insert(encode_job_key(job.id), serde_json::to_vec(&job)?)?;
        Ok(job)
    }

    pub fn list_jobs(&self) -> Result<Vec<MigrationJob>> {
        let mut jobs = Vec::new();
        for entry in self.jobs.prefix(b"job:") {
            let (_, value) = entry?;
            jobs.push(serde_json::from_slice(&value)?);
        }
        Ok(jobs)
    }

    /// Compare-and-swap a job status transition. Stamps `started_at` when
    /// entering `running` for the first time and `completed_at` on terminal
    /// states.
    pub fn transition_job(
        &self,
        job_id: u64,
        from: &[JobStatus],
        to: JobStatus,
    ) -> Result<MigrationJob> {
        let _guard = self.write_lock.lock().unwrap();
        let mut job = self.require_job(job_id)?;

        if !from.contains(&job.status) {
            return Err(StoreError::InvalidTransition {
                entity: "job",
                id: job_id,
                from: job.status.to_string(),
                to: to.to_string(),
            });
        }

        let now = Utc::now();
        job.status = to;
        job.updated_at = now;
        if to == JobStatus::Running && job.started_at.is_none() {
            job.started_at = Some(now);
        }
        if to.is_terminal() && job.completed_at.is_none() {
            job.completed_at = Some(now);
        }

        self.jobs.insert(encode_job_key(job_id), serde_json::to_vec(&job)?)?;
        info!(job_id, status = %job.status, "Job transitioned");
        Ok(job)
    }

    // ----- queueing -----

    /// Insert one item plus one outbox event per document pair, bump the
    /// job's total, and persist everything in a single batch. Pairs already
    /// queued for this job are skipped with a warning.
    pub fn queue_documents(
        &self,
        job_id: u64,
        pairs: &[(DocumentUuid, String)],
    ) -> Result<QueueOutcome> {
        let _guard = self.write_lock.lock().unwrap();
        let mut job = self.require_job(job_id)?;

        if job.status != JobStatus::Pending {
            return Err(StoreError::InvalidTransition {
                entity: "job",
                id: job_id,
                from: job.status.to_string(),
                to: "queue_documents".to_string(),
            });
        }

        let now = Utc::now();
        let mut batch = self.keyspace.batch();
        let mut outcome = QueueOutcome::default();
        let mut seen = std::collections::HashSet::new();

        for (uuid, source_provider_id) in pairs {
            let doc_key = encode_doc_key(job_id, *uuid);
            if !seen.insert(*uuid) || self.items.get(&doc_key)?.is_some() {
                warn!(job_id, document_uuid = %uuid, "Document already queued, skipping");
                outcome.duplicates += 1;
                continue;
            }

            let item_id = self.item_seq.fetch_add(1, Ordering::SeqCst) + 1;
            let event_id = self.event_seq.fetch_add(1, Ordering::SeqCst) + 1;

            let item = MigrationItem {
                id: item_id,
                job_id,
                document_uuid: *uuid,
                source_provider_id: source_provider_id.clone(),
                dest_provider_id: None,
                status: ItemStatus::Pending,
                attempt_count: 0,
                max_attempts: job.max_attempts,
                source_content_hash: None,
                dest_content_hash: None,
                content_match: None,
                started_at: None,
                completed_at: None,
                duration_ms: None,
                error_message: None,
                is_retryable: true,
                created_at: now,
                updated_at: now,
            };

            let payload = TaskPayload::for_item(&job, &item);
            let event = OutboxEvent {
                id: event_id,
                job_id,
                item_id,
                document_uuid: *uuid,
                idempotent_key: idempotent_key(job_id, *uuid),
                event_type: EVENT_MIGRATE_DOCUMENT.to_string(),
                provider_source: job.source_provider.clone(),
                provider_dest: job.dest_provider.clone(),
                payload: serde_json::to_string(&payload)?,
                status: OutboxStatus::Pending,
                published_at: None,
                publish_attempts: 0,
                last_error: None,
                created_at: now,
                updated_at: now,
            };

            batch.insert(&self.items, encode_item_key(item_id), serde_json::to_vec(&item)?);
            batch.insert(&self.items, encode_byjob_key(job_id, item_id), item_id.to_be_bytes());
            batch.insert(&self.items, doc_key, item_id.to_be_bytes());

            batch.insert(&self.outbox, encode_event_key(event_id), serde_json::to_vec(&event)?);
            batch.insert(
                &self.outbox,
                encode_idem_key(&event.idempotent_key),
                event_id.to_be_bytes(),
            );
            batch.insert(&self.outbox, encode_byjob_key(job_id, event_id), event_id.to_be_bytes());

            outcome.queued += 1;
        }

        job.total_documents += outcome.queued as u64;
        job.updated_at = now;
        batch.insert(&self.jobs, encode_job_key(job_id), serde_json::to_vec(&job)?);

        batch.insert(
            &self.metadata,
            encode_seq_key(SEQ_ITEMS),
            self.item_seq.load(Ordering::SeqCst).to_be_bytes(),
        );
        batch.insert(
            &self.metadata,
            encode_seq_key(SEQ_OUTBOX),
            self.event_seq.load(Ordering::SeqCst).to_be_bytes(),
        );

        batch.commit()?;

        info!(
            job_id,
            queued = outcome.queued,
            duplicates = outcome.duplicates,
            total = job.total_documents,
            "Documents queued"
        );
        Ok(outcome)
    }

    // ----- items -----

    pub fn get_item(&self, item_id: u64) -> Result<Option<MigrationItem>> {
        match self.items.get(encode_item_key(item_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    pub fn require_item(&self, item_id: u64) -> Result<MigrationItem> {
        self.get_item(item_id)?.ok_or(StoreError::ItemNotFound(item_id))
    }

    /// Raw item upsert for recovery and operator tooling. The row must
    /// already exist (indexes are not rewritten).
    pub fn put_item(&self, mut item: MigrationItem) -> Result<MigrationItem> {
        let _guard = self.write_lock.lock().unwrap();
        self.require_item(item.id)?;
        item.updated_at = Utc::now();
        self.items.insert(encode_item_key(item.id), serde_json::to_vec(&item)?)?;
        Ok(item)
    }

    pub fn list_items_for_job(&self, job_id: u64) -> Result<Vec<MigrationItem>> {
        let mut items = Vec::new();
        for entry in self.items.prefix(encode_byjob_prefix(job_id)) {
            let (_, value) = entry?;
            let item_id = decode_row_ref(&value)
                .ok_or_else(|| StoreError::InvalidKey("item reference".to_string()))?;
            items.push(self.require_item(item_id)?);
        }
        Ok(items)
    }

    /// Flip an item to `in_progress`, bumping its attempt counter and
    /// stamping `started_at`. Rejects items already in a terminal state.
    pub fn mark_item_in_progress(&self, item_id: u64) -> Result<MigrationItem> {
        let _guard = self.write_lock.lock().unwrap();
        let mut item = self.require_item(item_id)?;

        if item.status.is_terminal() {
            return Err(StoreError::InvalidTransition {
                entity: "item",
                id: item_id,
                from: item.status.to_string(),
                to: ItemStatus::InProgress.to_string(),
            });
        }

        let now = Utc::now();
        item.status = ItemStatus::InProgress;
        item.attempt_count += 1;
        item.started_at = Some(now);
        item.updated_at = now;

        self.items.insert(encode_item_key(item_id), serde_json::to_vec(&item)?)?;
        Ok(item)
    }

    /// Move an item to a new status and reconcile the owning job's counters
    /// in the same batch.
    ///
    /// Counters are recomputed from the per-job item aggregate rather than
    /// blindly incremented, which keeps replays idempotent: completing an
    /// item twice cannot push `migrated + failed + skipped` past `total`.
    /// Transitions out of a terminal state are refused as no-ops.
    pub fn update_item_status(
        &self,
        item_id: u64,
        new_status: ItemStatus,
        update: ItemUpdate,
    ) -> Result<MigrationItem> {
        let _guard = self.write_lock.lock().unwrap();
        let mut item = self.require_item(item_id)?;

        if item.status.is_terminal() {
            if item.status != new_status {
                warn!(
                    item_id,
                    from = %item.status,
                    to = %new_status,
                    "Refusing transition out of terminal item state"
                );
            }
            return Ok(item);
        }

        let now = Utc::now();
        item.status = new_status;
        item.updated_at = now;
        if let Some(dest) = update.dest_provider_id {
            item.dest_provider_id = Some(dest);
        }
        if let Some(hash) = update.source_content_hash {
            item.source_content_hash = Some(hash);
        }
        if let Some(hash) = update.dest_content_hash {
            item.dest_content_hash = Some(hash);
        }
        if update.content_match.is_some() {
            item.content_match = update.content_match;
        }
        if update.error_message.is_some() {
            item.error_message = update.error_message;
        }
        if let Some(retryable) = update.is_retryable {
            item.is_retryable = retryable;
        }
        if update.duration_ms.is_some() {
            item.duration_ms = update.duration_ms;
        }
        if new_status.is_terminal() {
            item.completed_at = Some(now);
        }

        let mut batch = self.keyspace.batch();
        batch.insert(&self.items, encode_item_key(item_id), serde_json::to_vec(&item)?);

        if new_status.is_terminal() {
            let mut job = self.require_job(item.job_id)?;
            self.reconcile_counters(&mut job, &item)?;
            batch.insert(&self.jobs, encode_job_key(job.id), serde_json::to_vec(&job)?);
        }

        batch.commit()?;
        debug!(item_id, status = %item.status, "Item updated");
        Ok(item)
    }

    /// Recompute job counters from item rows (substituting the row being
    /// written) and auto-complete the job once every item is terminal.
    fn reconcile_counters(&self, job: &mut MigrationJob, updated: &MigrationItem) -> Result<()> {
        let mut migrated = 0u64;
        let mut failed = 0u64;
        let mut skipped = 0u64;

        for entry in self.items.prefix(encode_byjob_prefix(job.id)) {
            let (_, value) = entry?;
            let item_id = decode_row_ref(&value)
                .ok_or_else(|| StoreError::InvalidKey("item reference".to_string()))?;
            let item = if item_id == updated.id {
                updated.clone()
            } else {
                self.require_item(item_id)?
            };

            match item.status {
                ItemStatus::Completed => migrated += 1,
                ItemStatus::Failed => failed += 1,
                ItemStatus::Skipped => skipped += 1,
                ItemStatus::Pending | ItemStatus::InProgress => {}
            }
        }

        job.migrated_documents = migrated;
        job.failed_documents = failed;
        job.skipped_documents = skipped;
        job.updated_at = Utc::now();

        let terminal = migrated + failed + skipped;
        if job.status == JobStatus::Running && job.total_documents > 0 && terminal == job.total_documents
        {
            job.status = if migrated == 0 && skipped == 0 {
                JobStatus::Failed
            } else {
                JobStatus::Completed
            };
            job.completed_at = Some(job.updated_at);
            info!(job_id = job.id, status = %job.status, migrated, failed, skipped, "Job finished");
        }

        Ok(())
    }

    // ----- outbox -----

    pub fn get_event(&self, event_id: u64) -> Result<Option<OutboxEvent>> {
        match self.outbox.get(encode_event_key(event_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    pub fn require_event(&self, event_id: u64) -> Result<OutboxEvent> {
        self.get_event(event_id)?.ok_or(StoreError::EventNotFound(event_id))
    }

    /// Raw event upsert for recovery and operator tooling. The row must
    /// already exist (indexes are not rewritten).
    pub fn put_event(&self, mut event: OutboxEvent) -> Result<OutboxEvent> {
        let _guard = self.write_lock.lock().unwrap();
        self.require_event(event.id)?;
        event.updated_at = Utc::now();
        self.outbox.insert(encode_event_key(event.id), serde_json::to_vec(&event)?)?;
        Ok(event)
    }

    pub fn find_event_by_idem_key(&self, key: &str) -> Result<Option<OutboxEvent>> {
        match self.outbox.get(encode_idem_key(key))? {
            Some(value) => {
                let event_id = decode_row_ref(&value)
                    .ok_or_else(|| StoreError::InvalidKey("event reference".to_string()))?;
                self.get_event(event_id)
            }
            None => Ok(None),
        }
    }

    pub fn list_events_for_job(&self, job_id: u64) -> Result<Vec<OutboxEvent>> {
        let mut events = Vec::new();
        for entry in self.outbox.prefix(encode_byjob_prefix(job_id)) {
            let (_, value) = entry?;
            let event_id = decode_row_ref(&value)
                .ok_or_else(|| StoreError::InvalidKey("event reference".to_string()))?;
            events.push(self.require_event(event_id)?);
        }
        Ok(events)
    }

    /// Claim up to `limit` pending events, oldest first, skipping events
    /// whose job is not currently running or already has `job.concurrency`
    /// claims in flight. Claims are flipped to `claimed` and stamped before
    /// the lock is released, so no two claimers can see the same pending
    /// row.
    pub fn claim_pending(&self, limit: usize) -> Result<Vec<OutboxEvent>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let _guard = self.write_lock.lock().unwrap();
        let now = Utc::now();

        // First pass: per-job view of what is already in flight.
        let mut in_flight: std::collections::HashMap<u64, usize> = std::collections::HashMap::new();
        for entry in self.outbox.prefix(b"evt:") {
            let (_, value) = entry?;
            let event: OutboxEvent = serde_json::from_slice(&value)?;
            if event.status == OutboxStatus::Claimed {
                *in_flight.entry(event.job_id).or_default() += 1;
            }
        }

        let mut claimed = Vec::new();
        let mut jobs: std::collections::HashMap<u64, MigrationJob> =
            std::collections::HashMap::new();
        let mut batch = self.keyspace.batch();

        for entry in self.outbox.prefix(b"evt:") {
            if claimed.len() >= limit {
                break;
            }
            let (_, value) = entry?;
            let mut event: OutboxEvent = serde_json::from_slice(&value)?;
            if event.status != OutboxStatus::Pending {
                continue;
            }

            if !jobs.contains_key(&event.job_id) {
                if let Some(job) = self.get_job(event.job_id)? {
                    jobs.insert(event.job_id, job);
                }
            }
            let Some(job) = jobs.get(&event.job_id) else {
                continue;
            };
            if job.status != JobStatus::Running {
                continue;
            }
            let job_in_flight = in_flight.entry(event.job_id).or_default();
            if *job_in_flight >= job.concurrency {
                continue;
            }
            *job_in_flight += 1;

            event.status = OutboxStatus::Claimed;
            event.published_at = Some(now);
            event.updated_at = now;
            batch.insert(&self.outbox, encode_event_key(event.id), serde_json::to_vec(&event)?);
            claimed.push(event);
        }

        if !claimed.is_empty() {
            batch.commit()?;
            debug!(count = claimed.len(), "Events claimed");
        }
        Ok(claimed)
    }

    /// Handler success: the event stays published.
    pub fn mark_event_published(&self, event_id: u64) -> Result<OutboxEvent> {
        let _guard = self.write_lock.lock().unwrap();
        let mut event = self.require_event(event_id)?;
        let now = Utc::now();
        event.status = OutboxStatus::Published;
        event.published_at = Some(now);
        event.updated_at = now;
        self.outbox.insert(encode_event_key(event_id), serde_json::to_vec(&event)?)?;
        Ok(event)
    }

    /// Handler permanent failure.
    pub fn mark_event_failed(&self, event_id: u64, error: &str) -> Result<OutboxEvent> {
        let _guard = self.write_lock.lock().unwrap();
        let mut event = self.require_event(event_id)?;
        event.status = OutboxStatus::Failed;
        event.publish_attempts += 1;
        event.last_error = Some(error.to_string());
        event.updated_at = Utc::now();
        self.outbox.insert(encode_event_key(event_id), serde_json::to_vec(&event)?)?;
        Ok(event)
    }

    /// Transient handler failure: return the claim to `pending` so a later
    /// poll retries it.
    pub fn release_event(&self, event_id: u64, error: &str) -> Result<OutboxEvent> {
        let _guard = self.write_lock.lock().unwrap();
        let mut event = self.require_event(event_id)?;
        event.status = OutboxStatus::Pending;
        event.publish_attempts += 1;
        event.published_at = None;
        event.last_error = Some(error.to_string());
        event.updated_at = Utc::now();
        self.outbox.insert(encode_event_key(event_id), serde_json::to_vec(&event)?)?;
        debug!(event_id, error, "Event released for retry");
        Ok(event)
    }

    /// Reaper sweep: return `claimed` events older than `older_than` to
    /// `pending` while attempts remain, otherwise fail them.
    pub fn requeue_stale_claims(&self, older_than: Duration) -> Result<usize> {
        let _guard = self.write_lock.lock().unwrap();
        let now = Utc::now();
        let cutoff = now - older_than;
        let mut requeued = 0;
        let mut batch = self.keyspace.batch();

        for entry in self.outbox.prefix(b"evt:") {
            let (_, value) = entry?;
            let mut event: OutboxEvent = serde_json::from_slice(&value)?;
            if event.status != OutboxStatus::Claimed {
                continue;
            }
            let claimed_at = match event.published_at {
                Some(at) => at,
                None => event.updated_at,
            };
            if claimed_at >= cutoff {
                continue;
            }

            let max_attempts = serde_json::from_str::<TaskPayload>(&event.payload)
                .map(|p| p.max_attempts)
                .unwrap_or(1);

            event.publish_attempts += 1;
            event.updated_at = now;
            if event.publish_attempts < max_attempts {
                event.status = OutboxStatus::Pending;
                event.published_at = None;
                event.last_error = Some("claim expired; requeued".to_string());
                requeued += 1;
                warn!(event_id = event.id, job_id = event.job_id, "Stale claim requeued");
            } else {
                event.status = OutboxStatus::Failed;
                event.last_error = Some("claim expired; attempts exhausted".to_string());
                warn!(event_id = event.id, job_id = event.job_id, "Stale claim failed");
            }
            batch.insert(&self.outbox, encode_event_key(event.id), serde_json::to_vec(&event)?);
        }

        batch.commit()?;
        Ok(requeued)
    }

    /// Operator requeue: flip `failed` events of a job back to `pending`
    /// while attempts remain.
    pub fn requeue_failed(&self, job_id: u64) -> Result<usize> {
        let _guard = self.write_lock.lock().unwrap();
        let now = Utc::now();
        let mut requeued = 0;
        let mut batch = self.keyspace.batch();

        for entry in self.outbox.prefix(encode_byjob_prefix(job_id)) {
            let (_, value) = entry?;
            let event_id = decode_row_ref(&value)
                .ok_or_else(|| StoreError::InvalidKey("event reference".to_string()))?;
            let mut event = self.require_event(event_id)?;
            if event.status != OutboxStatus::Failed {
                continue;
            }

            let max_attempts = serde_json::from_str::<TaskPayload>(&event.payload)
                .map(|p| p.max_attempts)
                .unwrap_or(1);
            if event.publish_attempts >= max_attempts {
                continue;
            }

            event.status = OutboxStatus::Pending;
            event.published_at = None;
            event.updated_at = now;
            batch.insert(&self.outbox, encode_event_key(event.id), serde_json::to_vec(&event)?);
            requeued += 1;
        }

        batch.commit()?;
        info!(job_id, requeued, "Failed events requeued");
        Ok(requeued)
    }

    /// Fail all still-pending events of a cancelled job.
    pub fn cancel_job_events(&self, job_id: u64) -> Result<usize> {
        let _guard = self.write_lock.lock().unwrap();
        let now = Utc::now();
        let mut cancelled = 0;
        let mut batch = self.keyspace.batch();

        for entry in self.outbox.prefix(encode_byjob_prefix(job_id)) {
            let (_, value) = entry?;
            let event_id = decode_row_ref(&value)
                .ok_or_else(|| StoreError::InvalidKey("event reference".to_string()))?;
            let mut event = self.require_event(event_id)?;
            if event.status != OutboxStatus::Pending {
                continue;
            }

            event.status = OutboxStatus::Failed;
            event.last_error = Some("job cancelled".to_string());
            event.updated_at = now;
            batch.insert(&self.outbox, encode_event_key(event.id), serde_json::to_vec(&event)?);
            cancelled += 1;
        }

        batch.commit()?;
        Ok(cancelled)
    }

    // ----- maintenance -----

    /// Persist all pending writes to disk.
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let mut job_count = 0;
        let mut item_count = 0;
        let mut event_count = 0;

        for entry in self.jobs.prefix(b"job:") {
            entry?;
            job_count += 1;
        }
        for entry in self.items.prefix(b"item:") {
            entry?;
            item_count += 1;
        }
        for entry in self.outbox.prefix(b"evt:") {
            entry?;
            event_count += 1;
        }

        Ok(StoreStats {
            job_count,
            item_count,
            event_count,
        })
    }
}

fn load_seq(metadata: &PartitionHandle, name: &str) -> Result<u64> {
    Ok(metadata
        .get(encode_seq_key(name))?
        .map(|bytes| u64::from_be_bytes(bytes.as_ref().try_into().unwrap_or([0u8; 8])))
        .unwrap_or(0))
}

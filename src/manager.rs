//! Migration manager: job lifecycle, work enqueueing, and progress.
//!
//! The manager is the write path for everything except worker claims. It
//! validates requests against the provider registry, drives the job state
//! machine (`pending -> running -> completed | failed | cancelled`, with
//! `running <-> paused`), and owns the transactional coupling between item
//! status changes and job counters.

use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::ids::DocumentUuid;
use crate::model::{
    ItemStatus, JobStatus, MigrationItem, MigrationJob, Progress, Strategy,
};
use crate::provider::ProviderRegistry;
use crate::store::{ItemUpdate, MigrationStore, QueueOutcome, StoreError};

pub const DEFAULT_CONCURRENCY: usize = 5;
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("job not found: {0}")]
    JobNotFound(u64),

    #[error("job {id} is {actual}, expected {expected}")]
    InvalidState {
        id: u64,
        expected: String,
        actual: String,
    },

    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for ManagerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::JobNotFound(id) => ManagerError::JobNotFound(id),
            StoreError::InvalidTransition { id, from, to, .. } => ManagerError::InvalidState {
                id,
                expected: to,
                actual: from,
            },
            other => ManagerError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ManagerError>;

/// Inputs for [`MigrationManager::create_job`].
#[derive(Debug, Clone)]
pub struct CreateJobRequest {
    pub name: String,
    pub source_provider: String,
    pub dest_provider: String,
    pub strategy: Option<Strategy>,
    pub concurrency: Option<usize>,
    pub batch_size: Option<usize>,
    pub max_attempts: Option<u32>,
    pub dry_run: bool,
    pub validate_after: bool,
    pub rollback_enabled: bool,
}

pub struct MigrationManager {
    store: Arc<MigrationStore>,
    registry: Arc<ProviderRegistry>,
}

impl MigrationManager {
    pub fn new(store: Arc<MigrationStore>, registry: Arc<ProviderRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> &Arc<MigrationStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    /// Create a job in `pending` with a fresh job UUID.
    pub fn create_job(&self, req: CreateJobRequest) -> Result<MigrationJob> {
        if req.name.trim().is_empty() {
            return Err(ManagerError::InvalidRequest("job name is required".to_string()));
        }
        if req.source_provider.is_empty() || req.dest_provider.is_empty() {
            return Err(ManagerError::InvalidRequest(
                "source and destination providers are required".to_string(),
            ));
        }
        for provider in [&req.source_provider, &req.dest_provider] {
            if !self.registry.has(provider) {
                return Err(ManagerError::UnknownProvider(provider.clone()));
            }
        }
        if req.concurrency == Some(0) {
            return Err(ManagerError::InvalidRequest("concurrency must be positive".to_string()));
        }
        if req.batch_size == Some(0) {
            return Err(ManagerError::InvalidRequest("batch size must be positive".to_string()));
        }

        let now = Utc::now();
        let job = MigrationJob {
            id: 0,
            job_uuid: Uuid::new_v4(),
            name: req.name.trim().to_string(),
            source_provider: req.source_provider,
            dest_provider: req.dest_provider,
            strategy: req.strategy.unwrap_or_default(),
            status: JobStatus::Pending,
            dry_run: req.dry_run,
            concurrency: req.concurrency.unwrap_or(DEFAULT_CONCURRENCY),
            batch_size: req.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            validate_after: req.validate_after,
            rollback_enabled: req.rollback_enabled,
            max_attempts: req.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            total_documents: 0,
            migrated_documents: 0,
            failed_documents: 0,
            skipped_documents: 0,
            validation_status: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        };

        let job = self.store.insert_job(job)?;
        info!(
            job_id = job.id,
            job_uuid = %job.job_uuid,
            strategy = %job.strategy,
            source = %job.source_provider,
            dest = %job.dest_provider,
            dry_run = job.dry_run,
            "Migration job created"
        );
        Ok(job)
    }

    /// Queue documents onto a pending job. Items, outbox events, and the
    /// total counter land in one store transaction; re-queueing the same
    /// (job, document) pair is a logged no-op.
    pub fn queue_documents(
        &self,
        job_id: u64,
        docs: Vec<(DocumentUuid, String)>,
    ) -> Result<QueueOutcome> {
        if docs.is_empty() {
            return Err(ManagerError::InvalidRequest("no documents to queue".to_string()));
        }
        Ok(self.store.queue_documents(job_id, &docs)?)
    }

    /// `pending -> running`.
    pub fn start_job(&self, job_id: u64) -> Result<MigrationJob> {
        Ok(self.store.transition_job(job_id, &[JobStatus::Pending], JobStatus::Running)?)
    }

    /// `running -> paused`. Workers stop claiming the job's events at their
    /// next poll.
    pub fn pause_job(&self, job_id: u64) -> Result<MigrationJob> {
        Ok(self.store.transition_job(job_id, &[JobStatus::Running], JobStatus::Paused)?)
    }

    /// `paused -> running`.
    pub fn resume_job(&self, job_id: u64) -> Result<MigrationJob> {
        Ok(self.store.transition_job(job_id, &[JobStatus::Paused], JobStatus::Running)?)
    }

    /// Cancel a job that has not finished. Pending outbox events are failed;
    /// in-flight items complete naturally.
    pub fn cancel_job(&self, job_id: u64) -> Result<MigrationJob> {
        let job = self.store.transition_job(
            job_id,
            &[JobStatus::Pending, JobStatus::Running, JobStatus::Paused],
            JobStatus::Cancelled,
        )?;
        let failed_events = self.store.cancel_job_events(job_id)?;
        info!(job_id, failed_events, "Job cancelled");
        Ok(job)
    }

    pub fn get_job(&self, job_id: u64) -> Result<MigrationJob> {
        Ok(self.store.require_job(job_id)?)
    }

    pub fn list_jobs(&self) -> Result<Vec<MigrationJob>> {
        Ok(self.store.list_jobs()?)
    }

    pub fn list_items(&self, job_id: u64) -> Result<Vec<MigrationItem>> {
        self.store.require_job(job_id)?;
        Ok(self.store.list_items_for_job(job_id)?)
    }

    /// Requeue failed outbox events with remaining attempts (operator
    /// tooling).
    pub fn requeue_failed(&self, job_id: u64) -> Result<usize> {
        self.store.require_job(job_id)?;
        Ok(self.store.requeue_failed(job_id)?)
    }

    /// Counter-derived progress snapshot with throughput and ETA when the
    /// job is running.
    pub fn get_progress(&self, job_id: u64) -> Result<Progress> {
        let job = self.store.require_job(job_id)?;

        let terminal = job.terminal_documents();
        let percent = if job.total_documents == 0 {
            0.0
        } else {
            terminal as f64 / job.total_documents as f64 * 100.0
        };

        let mut rate_per_sec = None;
        let mut eta_seconds = None;
        if job.status == JobStatus::Running {
            if let Some(started_at) = job.started_at {
                let elapsed = (Utc::now() - started_at).num_milliseconds().max(1) as f64 / 1000.0;
                let rate = terminal as f64 / elapsed;
                rate_per_sec = Some(rate);
                if rate > 0.0 {
                    let pending = job.total_documents.saturating_sub(terminal);
                    eta_seconds = Some((pending as f64 / rate).ceil() as u64);
                }
            }
        }

        Ok(Progress {
            job_id: job.id,
            status: job.status,
            total_documents: job.total_documents,
            migrated_documents: job.migrated_documents,
            failed_documents: job.failed_documents,
            skipped_documents: job.skipped_documents,
            percent,
            rate_per_sec,
            eta_seconds,
        })
    }

    /// Terminal/status transition for one item; counter updates ride in the
    /// same store transaction. Terminal items never leave their state.
    pub fn update_item_status(
        &self,
        item_id: u64,
        new_status: ItemStatus,
        update: ItemUpdate,
    ) -> Result<MigrationItem> {
        Ok(self.store.update_item_status(item_id, new_status, update)?)
    }

    /// Record the validation outcome on the job row.
    pub fn record_validation(&self, job_id: u64, passed: bool) -> Result<MigrationJob> {
        let mut job = self.store.require_job(job_id)?;
        job.validation_status = Some(if passed { "passed" } else { "failed" }.to_string());
        Ok(self.store.put_job(job)?)
    }
}

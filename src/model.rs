//! Persistent data model for migration jobs, items, and outbox events.
//!
//! All records serialize as JSON into the fjall store. Timestamps are UTC.
//! The [`TaskPayload`] struct is the wire format stored in the outbox
//! `payload` column and parsed back by workers on dequeue; its field names
//! are part of the external contract and must stay camelCase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ids::DocumentUuid;

/// Native provider id recorded for dry-run items in place of a real
/// destination.
pub const DRY_RUN_DEST: &str = "dry-run:skipped";

/// Outbox event type for document migration work.
pub const EVENT_MIGRATE_DOCUMENT: &str = "migrate_document";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl ItemStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Completed | ItemStatus::Failed | ItemStatus::Skipped)
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemStatus::Pending => "pending",
            ItemStatus::InProgress => "in_progress",
            ItemStatus::Completed => "completed",
            ItemStatus::Failed => "failed",
            ItemStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Claimed,
    Published,
    Failed,
}

impl fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Claimed => "claimed",
            OutboxStatus::Published => "published",
            OutboxStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Migration strategy.
///
/// `copy` keeps both replicas, `move` deletes the source after a validated
/// transfer, `mirror` transfers like copy and is re-run to keep the
/// destination synchronized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Copy,
    Move,
    Mirror,
}

impl Default for Strategy {
    fn default() -> Self {
        Strategy::Copy
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Strategy::Copy => "copy",
            Strategy::Move => "move",
            Strategy::Mirror => "mirror",
        };
        f.write_str(s)
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "copy" => Ok(Strategy::Copy),
            "move" => Ok(Strategy::Move),
            "mirror" => Ok(Strategy::Mirror),
            other => Err(format!("unknown strategy: {}", other)),
        }
    }
}

/// One migration job: a batch of documents moving from a source provider to
/// a destination provider.
///
/// Counter invariant: `migrated + failed + skipped <= total`, with equality
/// once the job completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationJob {
    pub id: u64,
    pub job_uuid: uuid::Uuid,
    pub name: String,
    pub source_provider: String,
    pub dest_provider: String,
    pub strategy: Strategy,
    pub status: JobStatus,
    pub dry_run: bool,
    pub concurrency: usize,
    pub batch_size: usize,
    pub validate_after: bool,
    pub rollback_enabled: bool,
    pub max_attempts: u32,
    pub total_documents: u64,
    pub migrated_documents: u64,
    pub failed_documents: u64,
    pub skipped_documents: u64,
    pub validation_status: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl MigrationJob {
    /// Sum of terminal item counters.
    pub fn terminal_documents(&self) -> u64 {
        self.migrated_documents + self.failed_documents + self.skipped_documents
    }
}

/// One document's migration row within a job.
///
/// `(job_id, document_uuid)` is unique per job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationItem {
    pub id: u64,
    pub job_id: u64,
    pub document_uuid: DocumentUuid,
    pub source_provider_id: String,
    pub dest_provider_id: Option<String>,
    pub status: ItemStatus,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub source_content_hash: Option<String>,
    pub dest_content_hash: Option<String>,
    pub content_match: Option<bool>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub error_message: Option<String>,
    pub is_retryable: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Durable outbox row coupling work-item creation to worker pickup.
///
/// Exactly one outbox row exists per item; `idempotent_key` is
/// `"{job_id}:{document_uuid}"` and globally unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: u64,
    pub job_id: u64,
    pub item_id: u64,
    pub document_uuid: DocumentUuid,
    pub idempotent_key: String,
    pub event_type: String,
    pub provider_source: String,
    pub provider_dest: String,
    pub payload: String,
    pub status: OutboxStatus,
    pub published_at: Option<DateTime<Utc>>,
    pub publish_attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Build the globally unique outbox idempotency key for a (job, document)
/// pair.
pub fn idempotent_key(job_id: u64, uuid: DocumentUuid) -> String {
    format!("{}:{}", job_id, uuid)
}

/// Serialized task description stored in the outbox `payload` column.
///
/// Field names are the wire contract; do not rename.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPayload {
    pub job_id: u64,
    pub item_id: u64,
    pub document_uuid: DocumentUuid,
    pub source_provider: String,
    pub source_provider_id: String,
    pub dest_provider: String,
    pub strategy: Strategy,
    pub dry_run: bool,
    pub validate: bool,
    pub attempt_count: u32,
    pub max_attempts: u32,
}

impl TaskPayload {
    /// Build the payload for a freshly queued item.
    pub fn for_item(job: &MigrationJob, item: &MigrationItem) -> Self {
        Self {
            job_id: job.id,
            item_id: item.id,
            document_uuid: item.document_uuid,
            source_provider: job.source_provider.clone(),
            source_provider_id: item.source_provider_id.clone(),
            dest_provider: job.dest_provider.clone(),
            strategy: job.strategy,
            dry_run: job.dry_run,
            validate: job.validate_after,
            attempt_count: item.attempt_count,
            max_attempts: item.max_attempts,
        }
    }
}

/// Point-in-time progress snapshot for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub job_id: u64,
    pub status: JobStatus,
    pub total_documents: u64,
    pub migrated_documents: u64,
    pub failed_documents: u64,
    pub skipped_documents: u64,
    pub percent: f64,
    pub rate_per_sec: Option<f64>,
    pub eta_seconds: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serde_snake_case() {
        assert_eq!(serde_json::to_string(&JobStatus::Running).unwrap(), "\"running\"");
        assert_eq!(serde_json::to_string(&ItemStatus::InProgress).unwrap(), "\"in_progress\"");
        assert_eq!(serde_json::to_string(&OutboxStatus::Claimed).unwrap(), "\"claimed\"");
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(!JobStatus::Paused.is_terminal());

        assert!(ItemStatus::Skipped.is_terminal());
        assert!(!ItemStatus::InProgress.is_terminal());
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("copy".parse::<Strategy>().unwrap(), Strategy::Copy);
        assert_eq!("MOVE".parse::<Strategy>().unwrap(), Strategy::Move);
        assert!("sync".parse::<Strategy>().is_err());
    }

    #[test]
    fn test_idempotent_key_format() {
        let uuid = DocumentUuid::new();
        assert_eq!(idempotent_key(7, uuid), format!("7:{}", uuid));
    }

    #[test]
    fn test_task_payload_wire_format_is_camel_case() {
        let payload = TaskPayload {
            job_id: 1,
            item_id: 2,
            document_uuid: DocumentUuid::new(),
            source_provider: "src".to_string(),
            source_provider_id: "mem:abc".to_string(),
            dest_provider: "dst".to_string(),
            strategy: Strategy::Copy,
            dry_run: false,
            validate: true,
            attempt_count: 0,
            max_attempts: 3,
        };

        let json = serde_json::to_string(&payload).unwrap();
        for field in [
            "jobId",
            "itemId",
            "documentUuid",
            "sourceProvider",
            "sourceProviderId",
            "destProvider",
            "dryRun",
            "validate",
            "attemptCount",
            "maxAttempts",
        ] {
            assert!(json.contains(field), "missing wire field {}", field);
        }

        let parsed: TaskPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.item_id, 2);
        assert_eq!(parsed.max_attempts, 3);
    }
}

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use hermes_migrate::ids::DocumentUuid;
use hermes_migrate::model::Strategy;

#[derive(Parser, Debug)]
#[command(name = "hermes")]
#[command(about = "Hermes document migration engine", long_about = None)]
pub struct Cli {
    /// Path to the configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Manage migration jobs
    Migration(MigrationArgs),

    /// Run the migration worker pool and outbox reaper
    Worker,
}

#[derive(clap::Args, Debug)]
pub struct MigrationArgs {
    #[command(subcommand)]
    pub command: MigrationCommands,
}

#[derive(Subcommand, Debug)]
pub enum MigrationCommands {
    /// Create a migration job
    Create {
        /// Job name
        #[arg(long)]
        name: String,

        /// Source provider name
        #[arg(long)]
        source: String,

        /// Destination provider name
        #[arg(long)]
        dest: String,

        /// Migration strategy: copy, move, or mirror
        #[arg(long, default_value = "copy")]
        strategy: Strategy,

        /// Items processed in parallel
        #[arg(long)]
        concurrency: Option<usize>,

        /// Documents queued per batch
        #[arg(long)]
        batch_size: Option<usize>,

        /// Delivery attempts before an item fails permanently
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Read and validate without writing to the destination
        #[arg(long)]
        dry_run: bool,

        /// Re-fetch and hash-compare each document after transfer
        #[arg(long)]
        validate: bool,
    },

    /// Queue documents onto a pending job
    Queue {
        /// Job id
        #[arg(long)]
        job: u64,

        /// Document to queue as `<uuid>=<source-provider-id>` (repeatable)
        #[arg(long = "doc", value_parser = parse_doc_pair, required = true)]
        docs: Vec<(DocumentUuid, String)>,
    },

    /// Start a pending job
    Start {
        #[arg(long)]
        job: u64,
    },

    /// Show job progress; without an id, lists all jobs plus store totals
    Status {
        #[arg(long)]
        job: Option<u64>,
    },

    /// Run post-completion validation checks over a job
    Validate {
        #[arg(long)]
        job: u64,
    },

    /// Cancel a job; pending work is abandoned
    Cancel {
        #[arg(long)]
        job: u64,
    },

    /// Requeue failed outbox events with remaining attempts
    Requeue {
        #[arg(long)]
        job: u64,
    },
}

/// Parse `<uuid>=<source-provider-id>` pairs from the command line.
pub fn parse_doc_pair(raw: &str) -> Result<(DocumentUuid, String), String> {
    let (uuid, source_id) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected <uuid>=<source-provider-id>, got: {}", raw))?;
    let uuid: DocumentUuid = uuid
        .trim()
        .parse()
        .map_err(|e| format!("bad document uuid {}: {}", uuid, e))?;
    if source_id.is_empty() {
        return Err(format!("empty source provider id in: {}", raw));
    }
    Ok((uuid, source_id.to_string()))
}

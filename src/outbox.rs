//! Outbox maintenance: the stale-claim reaper.
//!
//! Claiming an event and finishing it are separate transactions, so a
//! worker crash can leave rows stuck in `claimed`. The reaper periodically
//! returns such rows to `pending` while their delivery attempts are not
//! exhausted; rows at the bound are failed instead of looping forever.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use crate::store::MigrationStore;

#[derive(Debug, Clone)]
pub struct ReaperConfig {
    /// How often the sweep runs.
    pub interval: Duration,
    /// Claims older than this are considered abandoned.
    pub claim_timeout: Duration,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            claim_timeout: Duration::from_secs(300),
        }
    }
}

pub struct Reaper {
    store: Arc<MigrationStore>,
    config: ReaperConfig,
}

impl Reaper {
    pub fn new(store: Arc<MigrationStore>, config: ReaperConfig) -> Self {
        Self { store, config }
    }

    /// One sweep; returns the number of claims returned to `pending`.
    pub fn sweep(&self) -> usize {
        let timeout = chrono::Duration::from_std(self.config.claim_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));
        match self.store.requeue_stale_claims(timeout) {
            Ok(0) => 0,
            Ok(requeued) => {
                info!(requeued, "Reaper returned stale claims to pending");
                requeued
            }
            Err(err) => {
                error!(error = %err, "Reaper sweep failed");
                0
            }
        }
    }

    /// Periodic sweep loop; exits when the shutdown flag flips.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            claim_timeout_secs = self.config.claim_timeout.as_secs(),
            "Reaper started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {
                    self.sweep();
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Reaper stopped");
    }
}

//! Replication pipeline: local store → remote replica.
//!
//! ```text
//! sink.max_id ──▶ count_after ──▶ page_after ──▶ tracker ──▶ upsert_batch
//!      (remote cursor)  (total)     (ascending)                (idempotent)
//! ```
//!
//! The remote `max(id)` is the cursor. Local ids above it cannot exist
//! remotely yet, so every chat is pushed in one ascending pass. Cancellation
//! is checked between batches; a cancelled or failed run deletes what it
//! pushed from the replica (best effort) and never touches the local store.
//! A batch whose upsert failed counts as pushed.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{IndexError, Result};
use crate::models::ReplicaRow;
use crate::progress::{format_number, ProgressEvent, ProgressReporter, RunClock};
use crate::replica::ReplicaSink;
use crate::replica_rest::RestSink;
use crate::session::SessionTracker;
use crate::store::MessageStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicateOutcome {
    Completed { synced: u64, elapsed_sec: u64 },
    /// The replica already held everything.
    UpToDate,
    Cancelled { synced: u64, rolled_back: u64 },
}

pub struct ReplicationPipeline<'a> {
    store: &'a MessageStore,
    sink: &'a dyn ReplicaSink,
    progress: &'a dyn ProgressReporter,
    table: String,
    batch_size: usize,
}

impl<'a> ReplicationPipeline<'a> {
    pub fn new(
        store: &'a MessageStore,
        sink: &'a dyn ReplicaSink,
        progress: &'a dyn ProgressReporter,
        table: impl Into<String>,
        batch_size: usize,
    ) -> Self {
        Self {
            store,
            sink,
            progress,
            table: table.into(),
            batch_size: batch_size.max(1),
        }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<ReplicateOutcome> {
        let mut tracker = SessionTracker::new();

        match self.run_inner(&mut tracker, cancel).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                let rolled_back = if tracker.is_empty() {
                    None
                } else {
                    Some(
                        tracker
                            .rollback_remote(self.sink, &self.table, self.batch_size)
                            .await,
                    )
                };
                warn!(table = %self.table, code = err.code(), error = %err, ?rolled_back, "replication failed");
                self.progress.report(ProgressEvent::error(&err, rolled_back));
                Err(err)
            }
        }
    }

    async fn run_inner(
        &self,
        tracker: &mut SessionTracker,
        cancel: &CancellationToken,
    ) -> Result<ReplicateOutcome> {
        let clock = RunClock::start();

        self.progress
            .report(ProgressEvent::info("Checking replica for last synced id..."));
        let remote_max = self.sink.max_id(&self.table).await?;
        let total = self.store.count_after(remote_max).await?;

        if total == 0 {
            info!(table = %self.table, remote_max, "replica up to date");
            self.progress.report(ProgressEvent::Complete {
                message: "No new messages to sync.".to_string(),
                total: 0,
                elapsed_sec: clock.elapsed_sec(),
            });
            return Ok(ReplicateOutcome::UpToDate);
        }

        self.progress.report(ProgressEvent::Start {
            message: format!(
                "Syncing {} messages after id {}",
                format_number(total),
                remote_max
            ),
            chat_id: None,
            total: Some(total),
        });

        let mut last_id = remote_max;
        let mut synced = 0u64;

        loop {
            if cancel.is_cancelled() {
                return Ok(self.cancel(tracker, synced).await);
            }

            let page = self.store.page_after(last_id, self.batch_size).await?;
            let Some(last) = page.last() else {
                break;
            };
            last_id = last.id;

            // Tracked before the upsert: a failed request may still have been applied.
            let ids: Vec<i64> = page.iter().map(|m| m.id).collect();
            tracker.record(&ids);

            let rows: Vec<ReplicaRow> = page.iter().map(ReplicaRow::from).collect();
            self.sink.upsert_batch(&self.table, &rows).await?;
            synced += ids.len() as u64;

            self.progress.report(clock.progress(
                format!("Synced {} / {}", format_number(synced), format_number(total)),
                synced,
                Some(total.max(synced)),
            ));

            if page.len() < self.batch_size {
                break;
            }
        }

        tracker.finish();
        info!(table = %self.table, synced, elapsed_sec = clock.elapsed_sec(), "replication complete");
        self.progress.report(ProgressEvent::Complete {
            message: format!("Sync complete! {} messages", format_number(synced)),
            total: synced,
            elapsed_sec: clock.elapsed_sec(),
        });

        Ok(ReplicateOutcome::Completed {
            synced,
            elapsed_sec: clock.elapsed_sec(),
        })
    }

    async fn cancel(&self, tracker: &mut SessionTracker, synced: u64) -> ReplicateOutcome {
        self.progress.report(ProgressEvent::RollingBack {
            message: "Rolling back replica...".to_string(),
            pending: tracker.len() as u64,
        });

        let rolled_back = tracker
            .rollback_remote(self.sink, &self.table, self.batch_size)
            .await;

        info!(table = %self.table, synced, rolled_back, "replication cancelled");
        self.progress.report(ProgressEvent::Cancelled {
            message: format!(
                "Sync cancelled. {} messages removed from replica.",
                format_number(rolled_back)
            ),
            collected: synced,
            rolled_back,
        });

        ReplicateOutcome::Cancelled {
            synced,
            rolled_back,
        }
    }
}

/// `chidx replicate`: push everything newer than the replica's cursor.
pub async fn run_replicate(
    config: &Config,
    progress: &dyn ProgressReporter,
    cancel: &CancellationToken,
) -> Result<ReplicateOutcome> {
    let prepared = async {
        let replica = config.replica()?;
        let sink = RestSink::from_config(replica)?;
        let store = MessageStore::open(&config.db.path).await?;
        Ok::<_, IndexError>((replica, sink, store))
    }
    .await;
    let (replica, sink, store) = match prepared {
        Ok(prepared) => prepared,
        Err(err) => {
            progress.report(ProgressEvent::error(&err, None));
            return Err(err);
        }
    };

    let result = ReplicationPipeline::new(&store, &sink, progress, &replica.table, replica.batch_size)
        .run(cancel)
        .await;
    store.close().await;
    result
}

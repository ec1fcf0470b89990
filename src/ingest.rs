//! Ingestion pipeline.
//!
//! Pulls one chat from a [`MessageSource`] into the [`MessageStore`]:
//!
//! ```text
//! Idle → Connecting → Fetching → Completed
//!                        │
//!                        ├────→ Cancelling → (rolled back)
//!                        └────→ Failed     → (rolled back)
//! ```
//!
//! The resumption point is recomputed from the store on every run
//! (`max(id)` for the chat), never cached. Messages are requested in
//! ascending id order inside `(cursor, ∞) × [horizon, run start]`, so a run
//! that dies without a chance to roll back still leaves a contiguous prefix.
//!
//! A run is all-or-nothing: on cancellation or any surfaced error, every id
//! the run inserted is deleted again before returning.

use chrono::Utc;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::connector_export::ExportSource;
use crate::error::{IndexError, Result};
use crate::models::{FetchWindow, Message};
use crate::progress::{format_number, ProgressEvent, ProgressReporter, RunClock};
use crate::session::SessionTracker;
use crate::source::{connect_with_retry, MessageSource, RetryPolicy};
use crate::store::MessageStore;

const SECONDS_PER_YEAR: i64 = 365 * 24 * 60 * 60;

/// Lifecycle of a single ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Connecting,
    Fetching,
    Cancelling,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub chat_id: i64,
    pub retention_years: u32,
    pub batch_size: usize,
    pub retry: RetryPolicy,
}

impl IngestOptions {
    pub fn from_config(config: &Config, chat_id: i64, years: Option<u32>) -> Self {
        Self {
            chat_id,
            retention_years: years.unwrap_or(config.ingest.retention_years),
            batch_size: config.ingest.batch_size,
            retry: config.ingest.retry_policy(),
        }
    }

    /// Fetch window for a run starting at `now` with resumption point `min_id`.
    pub fn window(&self, min_id: i64, now: i64) -> FetchWindow {
        FetchWindow {
            min_id,
            not_before: now - i64::from(self.retention_years) * SECONDS_PER_YEAR,
            not_after: now,
        }
    }
}

/// How a run ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    Completed {
        /// Text messages received from the source.
        collected: u64,
        /// Rows newly written (collected minus already-stored duplicates).
        stored: u64,
        elapsed_sec: u64,
    },
    Cancelled {
        collected: u64,
        rolled_back: u64,
    },
}

pub struct IngestPipeline<'a> {
    store: &'a MessageStore,
    source: &'a dyn MessageSource,
    progress: &'a dyn ProgressReporter,
    options: IngestOptions,
    state: RunState,
}

/// Counters for the run in flight.
#[derive(Default)]
struct Tally {
    collected: u64,
    stored: u64,
    skipped: u64,
}

impl<'a> IngestPipeline<'a> {
    pub fn new(
        store: &'a MessageStore,
        source: &'a dyn MessageSource,
        progress: &'a dyn ProgressReporter,
        options: IngestOptions,
    ) -> Self {
        Self {
            store,
            source,
            progress,
            options,
            state: RunState::Idle,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Run once. `cancel` is observed before every fetched message.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<IngestOutcome> {
        let chat_id = self.options.chat_id;
        let mut tracker = SessionTracker::new();

        match self.run_inner(&mut tracker, cancel).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                self.set_state(RunState::Failed);
                let rolled_back = if tracker.is_empty() {
                    None
                } else {
                    match tracker.rollback(self.store, chat_id).await {
                        Ok(n) => Some(n),
                        Err(rollback_err) => {
                            error!(chat_id, error = %rollback_err, "rollback after failure did not complete");
                            None
                        }
                    }
                };
                warn!(chat_id, code = err.code(), error = %err, ?rolled_back, "ingestion failed");
                self.progress.report(ProgressEvent::error(&err, rolled_back));
                Err(err)
            }
        }
    }

    async fn run_inner(
        &mut self,
        tracker: &mut SessionTracker,
        cancel: &CancellationToken,
    ) -> Result<IngestOutcome> {
        let chat_id = self.options.chat_id;
        let batch_size = self.options.batch_size.max(1);
        let clock = RunClock::start();
        let mut tally = Tally::default();

        self.progress.report(ProgressEvent::Start {
            message: format!("Indexing chat {}", chat_id),
            chat_id: Some(chat_id),
            total: None,
        });

        if cancel.is_cancelled() {
            return self.cancel(tracker, &tally).await;
        }

        self.set_state(RunState::Connecting);
        self.progress.report(ProgressEvent::info(format!(
            "Connecting to {}...",
            self.source.name()
        )));
        connect_with_retry(self.source, &self.options.retry).await?;

        self.set_state(RunState::Fetching);
        let min_id = self.store.cursor(chat_id).await?;
        if min_id > 0 {
            self.progress.report(ProgressEvent::info(format!(
                "Incremental mode: starting after message id {}",
                min_id
            )));
        } else {
            self.progress
                .report(ProgressEvent::info("Full sync mode: fetching all messages"));
        }

        let window = self.options.window(min_id, Utc::now().timestamp());
        debug!(chat_id, ?window, "fetch window");

        let source = self.source;
        let mut stream = source.iterate(chat_id, window);
        let mut batch: Vec<Message> = Vec::with_capacity(batch_size);

        while let Some(item) = stream.next().await {
            if cancel.is_cancelled() {
                drop(stream);
                return self.cancel(tracker, &tally).await;
            }

            let raw = item?;
            if !window.contains(raw.id, raw.date) {
                tally.skipped += 1;
                continue;
            }
            let Some(message) = raw.into_message(chat_id) else {
                continue;
            };

            tally.collected += 1;
            batch.push(message);

            if batch.len() >= batch_size {
                self.commit(&mut batch, tracker, &mut tally, &clock).await?;
            }
        }
        drop(stream);

        if cancel.is_cancelled() {
            return self.cancel(tracker, &tally).await;
        }
        if !batch.is_empty() {
            self.commit(&mut batch, tracker, &mut tally, &clock).await?;
        }

        tracker.finish();
        self.set_state(RunState::Completed);

        if tally.skipped > 0 {
            warn!(
                chat_id,
                skipped = tally.skipped,
                "source returned messages outside the fetch window"
            );
        }
        info!(
            chat_id,
            collected = tally.collected,
            stored = tally.stored,
            elapsed_sec = clock.elapsed_sec(),
            "ingestion complete"
        );
        self.progress.report(ProgressEvent::Complete {
            message: format!(
                "Indexing complete! Total: {} messages",
                format_number(tally.collected)
            ),
            total: tally.collected,
            elapsed_sec: clock.elapsed_sec(),
        });

        Ok(IngestOutcome::Completed {
            collected: tally.collected,
            stored: tally.stored,
            elapsed_sec: clock.elapsed_sec(),
        })
    }

    async fn commit(
        &self,
        batch: &mut Vec<Message>,
        tracker: &mut SessionTracker,
        tally: &mut Tally,
        clock: &RunClock,
    ) -> Result<()> {
        let outcome = self.store.insert_batch(batch).await?;
        tracker.record(&outcome.inserted);
        tally.stored += outcome.inserted.len() as u64;
        batch.clear();

        self.progress.report(clock.progress(
            format!("Collected {} messages...", format_number(tally.collected)),
            tally.collected,
            None,
        ));
        Ok(())
    }

    async fn cancel(
        &mut self,
        tracker: &mut SessionTracker,
        tally: &Tally,
    ) -> Result<IngestOutcome> {
        self.set_state(RunState::Cancelling);
        self.progress.report(ProgressEvent::RollingBack {
            message: "Rolling back...".to_string(),
            pending: tracker.len() as u64,
        });

        let rolled_back = tracker.rollback(self.store, self.options.chat_id).await?;

        info!(
            chat_id = self.options.chat_id,
            collected = tally.collected,
            rolled_back,
            "ingestion cancelled"
        );
        self.progress.report(ProgressEvent::Cancelled {
            message: format!(
                "Indexing cancelled. {} messages rolled back.",
                format_number(rolled_back)
            ),
            collected: tally.collected,
            rolled_back,
        });

        Ok(IngestOutcome::Cancelled {
            collected: tally.collected,
            rolled_back,
        })
    }

    fn set_state(&mut self, next: RunState) {
        debug!(from = ?self.state, to = ?next, "ingest state");
        self.state = next;
    }
}

/// `chidx index`: resolve the chat, open the store and the export, run once.
///
/// Failures before the pipeline starts are reported as `error` events too,
/// so a progress consumer always sees how the command ended.
pub async fn run_index(
    config: &Config,
    chat_id: Option<i64>,
    years: Option<u32>,
    progress: &dyn ProgressReporter,
    cancel: &CancellationToken,
) -> Result<IngestOutcome> {
    let prepared = async {
        let chat_id = config.resolve_chat_id(chat_id)?;
        let store = MessageStore::open(&config.db.path).await?;
        Ok::<_, IndexError>((chat_id, store))
    }
    .await;
    let (chat_id, store) = match prepared {
        Ok(prepared) => prepared,
        Err(err) => {
            progress.report(ProgressEvent::error(&err, None));
            return Err(err);
        }
    };

    let source = ExportSource::new(&config.source.export_path);
    let options = IngestOptions::from_config(config, chat_id, years);
    let result = IngestPipeline::new(&store, &source, progress, options)
        .run(cancel)
        .await;
    store.close().await;
    result
}

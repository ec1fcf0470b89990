//! Per-run write tracking for all-or-nothing runs.
//!
//! A [`SessionTracker`] is created empty at the start of a pipeline run,
//! records the ids each committed batch actually wrote, and is drained
//! exactly once: by a rollback on cancellation or failure, or by
//! [`finish`](SessionTracker::finish) when the run completes. It is never
//! persisted and never shared between runs.

use tracing::{debug, error, info};

use crate::error::Result;
use crate::replica::ReplicaSink;
use crate::store::MessageStore;

#[derive(Debug, Default)]
pub struct SessionTracker {
    ids: Vec<i64>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember ids written by the current run.
    pub fn record(&mut self, ids: &[i64]) {
        self.ids.extend_from_slice(ids);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    /// Discard the tracked ids after a successful run; the writes stay.
    pub fn finish(&mut self) -> usize {
        let n = self.ids.len();
        self.ids.clear();
        n
    }

    /// Delete every tracked id from the local store for `chat_id`.
    ///
    /// Returns the number of rows actually deleted, which may be lower than
    /// the number tracked. A second call deletes nothing.
    pub async fn rollback(&mut self, store: &MessageStore, chat_id: i64) -> Result<u64> {
        let ids = std::mem::take(&mut self.ids);
        if ids.is_empty() {
            return Ok(0);
        }

        debug!(chat_id, tracked = ids.len(), "rolling back local writes");
        let deleted = store.delete_by_ids(&ids, chat_id).await?;
        info!(chat_id, deleted, "local rollback complete");
        Ok(deleted)
    }

    /// Delete every tracked id from the replica, `batch_size` ids per call.
    ///
    /// Best effort: a failed batch is logged and skipped so the remaining
    /// batches still get a chance. Returns the number of ids in batches the
    /// sink accepted.
    pub async fn rollback_remote(
        &mut self,
        sink: &dyn ReplicaSink,
        table: &str,
        batch_size: usize,
    ) -> u64 {
        let ids = std::mem::take(&mut self.ids);
        let mut deleted = 0u64;

        for chunk in ids.chunks(batch_size.max(1)) {
            match sink.delete_by_ids(table, chunk).await {
                Ok(()) => deleted += chunk.len() as u64,
                Err(e) => {
                    error!(
                        table,
                        batch = chunk.len(),
                        first_id = chunk[0],
                        error = %e,
                        "replica rollback batch failed"
                    );
                }
            }
        }

        if !ids.is_empty() {
            info!(table, tracked = ids.len(), deleted, "replica rollback complete");
        }
        deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::IndexError;
    use crate::models::{Message, ReplicaRow};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn msg(id: i64, chat_id: i64) -> Message {
        Message {
            id,
            chat_id,
            sender_id: None,
            date: id,
            text: format!("message number {}", id),
        }
    }

    #[tokio::test]
    async fn rollback_removes_everything_tracked() {
        let dir = TempDir::new().unwrap();
        let store = MessageStore::open(&dir.path().join("s.sqlite"))
            .await
            .unwrap();
        let outcome = store
            .insert_batch(&[msg(1, 100), msg(2, 100), msg(3, 100)])
            .await
            .unwrap();

        let mut tracker = SessionTracker::new();
        tracker.record(&outcome.inserted);
        assert_eq!(tracker.len(), 3);

        assert_eq!(tracker.rollback(&store, 100).await.unwrap(), 3);
        assert!(tracker.is_empty());
        assert_eq!(store.cursor(100).await.unwrap(), 0);

        assert_eq!(tracker.rollback(&store, 100).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rollback_counts_only_rows_still_present() {
        let dir = TempDir::new().unwrap();
        let store = MessageStore::open(&dir.path().join("s.sqlite"))
            .await
            .unwrap();
        store.insert_batch(&[msg(1, 100), msg(2, 100)]).await.unwrap();
        store.delete_by_ids(&[2], 100).await.unwrap();

        let mut tracker = SessionTracker::new();
        tracker.record(&[1, 2]);
        assert_eq!(tracker.rollback(&store, 100).await.unwrap(), 1);
    }

    #[test]
    fn finish_discards_without_deleting() {
        let mut tracker = SessionTracker::new();
        tracker.record(&[1, 2]);
        tracker.record(&[3]);
        assert_eq!(tracker.ids(), &[1, 2, 3]);
        assert_eq!(tracker.finish(), 3);
        assert!(tracker.is_empty());
    }

    struct FlakySink {
        calls: Mutex<Vec<Vec<i64>>>,
        fail_on_call: usize,
    }

    #[async_trait]
    impl ReplicaSink for FlakySink {
        async fn max_id(&self, _table: &str) -> crate::error::Result<i64> {
            Ok(0)
        }

        async fn upsert_batch(&self, _table: &str, _rows: &[ReplicaRow]) -> crate::error::Result<()> {
            Ok(())
        }

        async fn delete_by_ids(&self, _table: &str, ids: &[i64]) -> crate::error::Result<()> {
            let mut calls = self.calls.lock().unwrap();
            calls.push(ids.to_vec());
            if calls.len() == self.fail_on_call {
                return Err(IndexError::Sink("boom".to_string()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn remote_rollback_batches_and_skips_failures() {
        let sink = FlakySink {
            calls: Mutex::new(Vec::new()),
            fail_on_call: 2,
        };
        let mut tracker = SessionTracker::new();
        tracker.record(&[1, 2, 3, 4, 5]);

        let deleted = tracker.rollback_remote(&sink, "messages", 2).await;
        assert_eq!(deleted, 3);
        assert_eq!(
            *sink.calls.lock().unwrap(),
            vec![vec![1, 2], vec![3, 4], vec![5]]
        );
        assert!(tracker.is_empty());
        assert_eq!(tracker.rollback_remote(&sink, "messages", 2).await, 0);
    }
}

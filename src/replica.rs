//! Remote replica capability.
//!
//! A [`ReplicaSink`] is a second store that mirrors the local messages
//! table. It only needs three operations; the replication pipeline derives
//! everything else (cursor, ordering, rollback) on top of them.
//!
//! Implementations must make [`upsert_batch`](ReplicaSink::upsert_batch)
//! idempotent by primary key: pushing the same rows twice leaves exactly one
//! row per id.

use async_trait::async_trait;

use crate::error::Result;
use crate::models::ReplicaRow;

#[async_trait]
pub trait ReplicaSink: Send + Sync {
    /// Highest id stored in `table`, or 0 when it is empty.
    async fn max_id(&self, table: &str) -> Result<i64>;

    /// Insert-or-update `rows` by id.
    async fn upsert_batch(&self, table: &str, rows: &[ReplicaRow]) -> Result<()>;

    /// Delete the rows with the given ids. Missing ids are not an error.
    async fn delete_by_ids(&self, table: &str, ids: &[i64]) -> Result<()>;
}

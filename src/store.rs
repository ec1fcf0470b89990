//! SQLite-backed message store.
//!
//! Owns the durable message set and its trigram full-text index. All writes
//! go through a single transaction per call; the FTS shadow table is updated
//! by triggers inside that transaction, so a committed row is always
//! searchable and a deleted row never is.
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`initialize`](MessageStore::initialize) | Create schema (idempotent) |
//! | [`cursor`](MessageStore::cursor) | `max(id)` for a chat, 0 when empty |
//! | [`insert_batch`](MessageStore::insert_batch) | Idempotent multi-row insert |
//! | [`delete_by_ids`](MessageStore::delete_by_ids) | Rollback support |
//! | [`search`](MessageStore::search) | Trigram search, newest first |
//! | [`count_after`](MessageStore::count_after) / [`page_after`](MessageStore::page_after) | Replication reads |

use sqlx::{Row, SqlitePool};
use std::path::Path;
use tracing::{debug, warn};

use crate::db;
use crate::error::{IndexError, Result};
use crate::migrate;
use crate::models::Message;

/// Trigram matching needs at least one full trigram.
pub const MIN_QUERY_CHARS: usize = 3;

/// Upper bound on bound parameters per `IN (...)` statement.
const DELETE_CHUNK: usize = 500;

/// Result of [`MessageStore::insert_batch`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InsertOutcome {
    /// Ids written by this call, in input order.
    pub inserted: Vec<i64>,
    /// Ids ignored because a row with the same id already exists.
    pub duplicates: u64,
    /// Subset of the ignored ids whose stored row belongs to another chat.
    pub foreign_conflicts: Vec<i64>,
}

/// Per-chat overview used by `chidx stats`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatStats {
    pub chat_id: i64,
    pub messages: i64,
    pub cursor: i64,
    pub first_date: i64,
    pub last_date: i64,
}

#[derive(Clone)]
pub struct MessageStore {
    pool: SqlitePool,
}

impl MessageStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the database file and make sure the schema exists.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        let store = Self::new(pool);
        store.initialize().await?;
        Ok(store)
    }

    pub async fn initialize(&self) -> Result<()> {
        migrate::run_migrations(&self.pool).await
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Highest stored id for `chat_id`, or 0 when the chat has no rows.
    pub async fn cursor(&self, chat_id: i64) -> Result<i64> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(id) FROM messages WHERE chat_id = ?")
            .bind(chat_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(max.unwrap_or(0))
    }

    /// Insert messages in one transaction. Existing ids are left untouched
    /// (first write wins); an empty slice is a no-op.
    pub async fn insert_batch(&self, messages: &[Message]) -> Result<InsertOutcome> {
        let mut outcome = InsertOutcome::default();
        if messages.is_empty() {
            return Ok(outcome);
        }

        let mut tx = self.pool.begin().await?;

        for m in messages {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO messages (id, chat_id, sender_id, date, text)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(m.id)
            .bind(m.chat_id)
            .bind(m.sender_id)
            .bind(m.date)
            .bind(&m.text)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 1 {
                outcome.inserted.push(m.id);
                continue;
            }

            outcome.duplicates += 1;
            let owner: Option<i64> = sqlx::query_scalar("SELECT chat_id FROM messages WHERE id = ?")
                .bind(m.id)
                .fetch_optional(&mut *tx)
                .await?;
            if matches!(owner, Some(owner) if owner != m.chat_id) {
                outcome.foreign_conflicts.push(m.id);
            }
        }

        tx.commit().await?;

        if !outcome.foreign_conflicts.is_empty() {
            warn!(
                conflicts = outcome.foreign_conflicts.len(),
                first = outcome.foreign_conflicts[0],
                "message ids already stored under a different chat; ids are not globally unique"
            );
        }
        debug!(
            inserted = outcome.inserted.len(),
            duplicates = outcome.duplicates,
            "batch committed"
        );

        Ok(outcome)
    }

    /// Delete the given ids from `chat_id`, returning how many rows went away.
    pub async fn delete_by_ids(&self, ids: &[i64], chat_id: i64) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut deleted = 0u64;

        for chunk in ids.chunks(DELETE_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "DELETE FROM messages WHERE id IN ({}) AND chat_id = ?",
                placeholders
            );
            let mut query = sqlx::query(&sql);
            for id in chunk {
                query = query.bind(*id);
            }
            let result = query.bind(chat_id).execute(&mut *tx).await?;
            deleted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(deleted)
    }

    /// Trigram search ordered newest first.
    ///
    /// Queries shorter than [`MIN_QUERY_CHARS`] are rejected before touching
    /// the database.
    pub async fn search(
        &self,
        query: &str,
        chat_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Message>> {
        let phrase = fts_phrase(query)?;
        let limit = limit.max(1);

        let rows = match chat_id {
            Some(chat_id) => {
                sqlx::query(
                    r#"
                    SELECT m.id, m.chat_id, m.sender_id, m.date, m.text
                    FROM messages m
                    INNER JOIN messages_fts fts ON m.id = fts.rowid
                    WHERE messages_fts MATCH ?
                    AND m.chat_id = ?
                    ORDER BY m.date DESC
                    LIMIT ?
                    "#,
                )
                .bind(&phrase)
                .bind(chat_id)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT m.id, m.chat_id, m.sender_id, m.date, m.text
                    FROM messages m
                    INNER JOIN messages_fts fts ON m.id = fts.rowid
                    WHERE messages_fts MATCH ?
                    ORDER BY m.date DESC
                    LIMIT ?
                    "#,
                )
                .bind(&phrase)
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.iter().map(row_to_message).collect())
    }

    /// Number of messages (any chat) with `id > after_id`.
    pub async fn count_after(&self, after_id: i64) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages WHERE id > ?")
            .bind(after_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }

    /// Up to `limit` messages with `id > after_id`, ascending by id.
    pub async fn page_after(&self, after_id: i64, limit: usize) -> Result<Vec<Message>> {
        let rows = sqlx::query(
            r#"
            SELECT id, chat_id, sender_id, date, text
            FROM messages
            WHERE id > ?
            ORDER BY id ASC
            LIMIT ?
            "#,
        )
        .bind(after_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_message).collect())
    }

    pub async fn count(&self) -> Result<u64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }

    pub async fn chat_stats(&self) -> Result<Vec<ChatStats>> {
        let rows = sqlx::query(
            r#"
            SELECT chat_id,
                   COUNT(*) AS messages,
                   MAX(id) AS max_id,
                   MIN(date) AS first_date,
                   MAX(date) AS last_date
            FROM messages
            GROUP BY chat_id
            ORDER BY messages DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ChatStats {
                chat_id: row.get("chat_id"),
                messages: row.get("messages"),
                cursor: row.get("max_id"),
                first_date: row.get("first_date"),
                last_date: row.get("last_date"),
            })
            .collect())
    }
}

fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Message {
    Message {
        id: row.get("id"),
        chat_id: row.get("chat_id"),
        sender_id: row.get("sender_id"),
        date: row.get("date"),
        text: row.get("text"),
    }
}

/// Validate a search query and quote it as a single FTS5 phrase.
pub fn fts_phrase(query: &str) -> Result<String> {
    let trimmed = query.trim();
    if trimmed.chars().count() < MIN_QUERY_CHARS {
        return Err(IndexError::Validation(format!(
            "search query must be at least {} characters",
            MIN_QUERY_CHARS
        )));
    }
    Ok(format!("\"{}\"", trimmed.replace('"', "\"\"")))
}

//! Record Store – the source of truth.
//!
//! Persists raw conversation turns ([`Message`]) and promoted summaries
//! ([`MemoryNode`]) to a local SQLite database. The semantic index is only a
//! derived cache of this data; anything it loses can be rebuilt from here.
//!
//! # Storage layout
//!
//! Table `messages`, indexed by `(session_id, created_at)`:
//!
//! | column     | type | description                         |
//! |------------|------|-------------------------------------|
//! | id         | TEXT | UUID v4 primary key                 |
//! | session_id | TEXT | Conversation session                |
//! | user_id    | TEXT | Owner of the conversation           |
//! | role       | TEXT | `user`, `assistant` or `system`     |
//! | content    | TEXT | Raw utterance                       |
//! | created_at | TEXT | RFC-3339 creation time (UTC, µs)    |
//!
//! Table `memory_nodes`, indexed by `(user_id, kind, importance DESC)` and by
//! `last_used_at` for maintenance:
//!
//! | column       | type | description                                 |
//! |--------------|------|---------------------------------------------|
//! | id           | TEXT | UUID v4 primary key                         |
//! | user_id      | TEXT | Owner of the memory                         |
//! | session_id   | TEXT | Session the memory originated in            |
//! | kind         | TEXT | `episodic`, `semantic` or `preference`      |
//! | summary      | TEXT | Human-readable summary                      |
//! | raw_refs     | TEXT | JSON array of source message ids            |
//! | importance   | REAL | Caller-supplied score in `[0, 1]`           |
//! | created_at   | TEXT | RFC-3339 creation time (UTC, µs)            |
//! | last_used_at | TEXT | RFC-3339 time of the latest retrieval hit   |
//!
//! Timestamps are written with a fixed width so that lexical order in SQLite
//! equals chronological order.
//!
//! # Example
//!
//! ```rust
//! use vox_memory::record_store::RecordStore;
//! use vox_types::{Message, Role};
//!
//! let store = RecordStore::open_in_memory().unwrap();
//! store.insert_message(&Message::new("u1", "s1", Role::User, "hello")).unwrap();
//! store.insert_message(&Message::new("u1", "s1", Role::Assistant, "hi!")).unwrap();
//!
//! let recent = store.list_recent_messages("s1", 10).unwrap();
//! assert_eq!(recent[0].content, "hello");
//! ```

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use thiserror::Error;
use uuid::Uuid;
use vox_types::{MemoryNode, Message};

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from record store operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// SQLite rejected the statement or a stored row could not be decoded.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Required field is empty: {0}")]
    MissingField(&'static str),
    #[error("Importance must be a finite value in [0, 1], got {0}")]
    InvalidImportance(f32),
    #[error("raw_refs serialisation error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Record store lock poisoned")]
    LockPoisoned,
}

// ─────────────────────────────────────────────────────────────────────────────
// Column helpers
// ─────────────────────────────────────────────────────────────────────────────

fn ts_to_sql(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn uuid_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e))
}

fn ts_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

const MESSAGE_COLUMNS: &str = "id, session_id, user_id, role, content, created_at";

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let role: String = row.get(3)?;
    Ok(Message {
        id: uuid_column(row, 0)?,
        session_id: row.get(1)?,
        user_id: row.get(2)?,
        role: role.parse().map_err(|e| conversion_error(3, e))?,
        content: row.get(4)?,
        created_at: ts_column(row, 5)?,
    })
}

const NODE_COLUMNS: &str =
    "id, user_id, session_id, kind, summary, raw_refs, importance, created_at, last_used_at";

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<MemoryNode> {
    let kind: String = row.get(3)?;
    let raw_refs: String = row.get(5)?;
    let importance: f64 = row.get(6)?;
    Ok(MemoryNode {
        id: uuid_column(row, 0)?,
        user_id: row.get(1)?,
        session_id: row.get(2)?,
        kind: kind.parse().map_err(|e| conversion_error(3, e))?,
        summary: row.get(4)?,
        raw_refs: serde_json::from_str(&raw_refs).map_err(|e| conversion_error(5, e))?,
        importance: importance as f32,
        created_at: ts_column(row, 7)?,
        last_used_at: ts_column(row, 8)?,
    })
}

fn require(value: &str, field: &'static str) -> Result<(), StorageError> {
    if value.trim().is_empty() {
        Err(StorageError::MissingField(field))
    } else {
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RecordStore
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed store for messages and memory nodes.
///
/// The connection sits behind a mutex, so concurrent writers to the same row
/// are serialised by the store itself.
pub struct RecordStore {
    conn: Mutex<Connection>,
}

impl RecordStore {
    /// Open (or create) a persistent SQLite database at `path`.
    pub fn open(path: &str) -> Result<Self, StorageError> {
        Self::with_connection(Connection::open(path)?)
    }

    /// Open a temporary in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS messages (
                id         TEXT NOT NULL PRIMARY KEY,
                session_id TEXT NOT NULL,
                user_id    TEXT NOT NULL,
                role       TEXT NOT NULL,
                content    TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_session_created
                ON messages (session_id, created_at);

            CREATE TABLE IF NOT EXISTS memory_nodes (
                id           TEXT NOT NULL PRIMARY KEY,
                user_id      TEXT NOT NULL,
                session_id   TEXT NOT NULL,
                kind         TEXT NOT NULL,
                summary      TEXT NOT NULL,
                raw_refs     TEXT NOT NULL,
                importance   REAL NOT NULL,
                created_at   TEXT NOT NULL,
                last_used_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_memory_nodes_user_kind_importance
                ON memory_nodes (user_id, kind, importance DESC);
            CREATE INDEX IF NOT EXISTS idx_memory_nodes_last_used
                ON memory_nodes (last_used_at);",
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    /// Append a message.
    pub fn insert_message(&self, msg: &Message) -> Result<(), StorageError> {
        require(&msg.user_id, "user_id")?;
        require(&msg.session_id, "session_id")?;
        self.conn()?.execute(
            "INSERT INTO messages (id, session_id, user_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                msg.id.to_string(),
                msg.session_id,
                msg.user_id,
                msg.role.as_str(),
                msg.content,
                ts_to_sql(&msg.created_at),
            ],
        )?;
        Ok(())
    }

    /// Append a memory node.
    pub fn insert_memory_node(&self, node: &MemoryNode) -> Result<(), StorageError> {
        require(&node.user_id, "user_id")?;
        require(&node.session_id, "session_id")?;
        require(&node.summary, "summary")?;
        if !node.importance.is_finite() || !(0.0..=1.0).contains(&node.importance) {
            return Err(StorageError::InvalidImportance(node.importance));
        }
        let raw_refs = serde_json::to_string(&node.raw_refs)?;
        self.conn()?.execute(
            "INSERT INTO memory_nodes
                 (id, user_id, session_id, kind, summary, raw_refs, importance,
                  created_at, last_used_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                node.id.to_string(),
                node.user_id,
                node.session_id,
                node.kind.as_str(),
                node.summary,
                raw_refs,
                f64::from(node.importance),
                ts_to_sql(&node.created_at),
                ts_to_sql(&node.last_used_at),
            ],
        )?;
        Ok(())
    }

    /// Look up a memory node. `None` means it does not exist (or was deleted
    /// concurrently); that is not an error.
    pub fn find_memory_node(&self, id: Uuid) -> Result<Option<MemoryNode>, StorageError> {
        let conn = self.conn()?;
        let node = conn
            .query_row(
                &format!("SELECT {NODE_COLUMNS} FROM memory_nodes WHERE id = ?1"),
                params![id.to_string()],
                node_from_row,
            )
            .optional()?;
        Ok(node)
    }

    /// Move `last_used_at` of node `id` forward to `at`.
    ///
    /// Returns `true` when the stamp changed. Absent ids and stamps that
    /// would move backwards are no-ops.
    pub fn update_last_used(&self, id: Uuid, at: DateTime<Utc>) -> Result<bool, StorageError> {
        let changed = self.conn()?.execute(
            "UPDATE memory_nodes SET last_used_at = ?2
             WHERE id = ?1 AND last_used_at < ?2",
            params![id.to_string(), ts_to_sql(&at)],
        )?;
        Ok(changed > 0)
    }

    /// Return the most recent `limit` messages of `session_id`, oldest first.
    pub fn list_recent_messages(
        &self,
        session_id: &str,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE session_id = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2"
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut messages = stmt
            .query_map(params![session_id, limit], message_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }

    /// All memory nodes owned by `user_id`, most important first.
    pub fn list_memory_nodes(&self, user_id: &str) -> Result<Vec<MemoryNode>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {NODE_COLUMNS} FROM memory_nodes
             WHERE user_id = ?1
             ORDER BY importance DESC, created_at ASC"
        ))?;
        let nodes = stmt
            .query_map(params![user_id], node_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(nodes)
    }

    /// Delete every memory node of `user_id`. Returns the number removed.
    pub fn delete_memory_nodes_by_user(&self, user_id: &str) -> Result<usize, StorageError> {
        let deleted = self
            .conn()?
            .execute("DELETE FROM memory_nodes WHERE user_id = ?1", params![user_id])?;
        Ok(deleted)
    }

    /// Delete every memory node. Messages are left alone.
    pub fn delete_all_memory_nodes(&self) -> Result<usize, StorageError> {
        let deleted = self.conn()?.execute("DELETE FROM memory_nodes", [])?;
        Ok(deleted)
    }

    /// Close the underlying connection.
    pub fn close(self) -> Result<(), StorageError> {
        let conn = self.conn.into_inner().map_err(|_| StorageError::LockPoisoned)?;
        conn.close().map_err(|(_, e)| StorageError::Sqlite(e))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! The message repository: a local tabular store holding applied messages, indexed by user and
//! by `(log_index, log_term)` for idempotent re-apply detection.
//!
//! Backed by SQLite (`rusqlite`), mirroring the relational engine the spec calls for. All access
//! goes through a single connection guarded by a blocking mutex — SQLite in WAL-less mode only
//! tolerates one writer at a time, and serializing reads alongside it keeps this crate simple
//! rather than chasing a connection pool we don't yet need.

mod error;
mod message;

use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;

use rusqlite::params;
use rusqlite::Connection;
use rusqlite::OptionalExtension;

pub use error::RepositoryError;
pub use error::Result;
pub use message::Message;

/// A per-node store of applied messages.
#[derive(Clone)]
pub struct Repository {
    conn: Arc<Mutex<Connection>>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS messages (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id     INTEGER NOT NULL,
    create_time TEXT NOT NULL,
    value       BLOB NOT NULL,
    file_name   TEXT NOT NULL DEFAULT '',
    file_id     TEXT NOT NULL DEFAULT '',
    log_index   INTEGER NOT NULL,
    log_term    INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS messages_user_id_idx ON messages(user_id);
CREATE UNIQUE INDEX IF NOT EXISTS messages_log_idx ON messages(log_index, log_term);
";

impl Repository {
    /// Open (or create) the repository at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// An in-memory repository, useful for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Insert one row.
    pub async fn put(&self, msg: Message) -> Result<Message> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || Self::put_sync(&conn, msg)).await.expect("blocking task panicked")
    }

    fn put_sync(conn: &Mutex<Connection>, mut msg: Message) -> Result<Message> {
        let conn = conn.lock().expect("repository mutex poisoned");
        conn.execute(
            "INSERT INTO messages(user_id, create_time, value, file_name, file_id, log_index, log_term)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![msg.user_id, msg.create_time, msg.value, msg.file_name, msg.file_id, msg.log_index, msg.log_term],
        )?;
        msg.id = conn.last_insert_rowid() as u64;
        Ok(msg)
    }

    /// Insert many rows, in order, within a single transaction.
    pub async fn put_batch(&self, msgs: Vec<Message>) -> Result<()> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().expect("repository mutex poisoned");
            let tx = conn.transaction()?;
            for msg in msgs {
                tx.execute(
                    "INSERT INTO messages(user_id, create_time, value, file_name, file_id, log_index, log_term)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![msg.user_id, msg.create_time, msg.value, msg.file_name, msg.file_id, msg.log_index, msg.log_term],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
        .expect("blocking task panicked")
    }

    /// All messages for a user, ordered by id ascending. Callers page.
    pub async fn get_by_user(&self, user_id: u64) -> Result<Vec<Message>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("repository mutex poisoned");
            let mut stmt = conn.prepare(
                "SELECT id, user_id, create_time, value, file_name, file_id, log_index, log_term
                 FROM messages WHERE user_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map(params![user_id], row_to_message)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
        .expect("blocking task panicked")
    }

    /// A single message by `(user_id, id)`.
    pub async fn get_one(&self, user_id: u64, id: u64) -> Result<Message> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("repository mutex poisoned");
            conn.query_row(
                "SELECT id, user_id, create_time, value, file_name, file_id, log_index, log_term
                 FROM messages WHERE user_id = ?1 AND id = ?2",
                params![user_id, id],
                row_to_message,
            )
            .optional()?
            .ok_or(RepositoryError::NotFound)
        })
        .await
        .expect("blocking task panicked")
    }

    /// Every row, in id order. Used for snapshot emission.
    pub async fn get_all(&self) -> Result<Vec<Message>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("repository mutex poisoned");
            let mut stmt = conn.prepare(
                "SELECT id, user_id, create_time, value, file_name, file_id, log_index, log_term
                 FROM messages ORDER BY id ASC",
            )?;
            let rows = stmt.query_map([], row_to_message)?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            Ok(out)
        })
        .await
        .expect("blocking task panicked")
    }

    /// Idempotency check: has an entry at `(log_index, log_term)` already been applied?
    pub async fn has_by_log(&self, log_index: u64, log_term: u64) -> Result<bool> {
        Ok(self.get_by_log(log_index, log_term).await?.is_some())
    }

    /// The row applied from `(log_index, log_term)`, if any. Lets the applier return the actual
    /// stored message — rather than a placeholder — when a replay finds the entry already
    /// applied.
    pub async fn get_by_log(&self, log_index: u64, log_term: u64) -> Result<Option<Message>> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("repository mutex poisoned");
            conn.query_row(
                "SELECT id, user_id, create_time, value, file_name, file_id, log_index, log_term
                 FROM messages WHERE log_index = ?1 AND log_term = ?2",
                params![log_index, log_term],
                row_to_message,
            )
            .optional()
            .map_err(RepositoryError::from)
        })
        .await
        .expect("blocking task panicked")
    }

    /// Remove every row. Used by snapshot restore.
    pub async fn truncate(&self) -> Result<()> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().expect("repository mutex poisoned");
            conn.execute("DELETE FROM messages", [])?;
            Ok(())
        })
        .await
        .expect("blocking task panicked")
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: row.get(0)?,
        user_id: row.get(1)?,
        create_time: row.get(2)?,
        value: row.get(3)?,
        file_name: row.get(4)?,
        file_id: row.get(5)?,
        log_index: row.get(6)?,
        log_term: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(user_id: u64, log_index: u64) -> Message {
        Message {
            id: 0,
            user_id,
            create_time: "2026-01-01T00:00:00Z".into(),
            value: b"hi".to_vec(),
            file_name: String::new(),
            file_id: String::new(),
            log_index,
            log_term: 1,
        }
    }

    #[tokio::test]
    async fn put_assigns_id_and_is_retrievable() {
        let repo = Repository::open_in_memory().unwrap();
        let stored = repo.put(msg(7, 1)).await.unwrap();
        assert_ne!(stored.id, 0);

        let got = repo.get_one(7, stored.id).await.unwrap();
        assert_eq!(got.value, b"hi");
    }

    #[tokio::test]
    async fn get_one_not_found() {
        let repo = Repository::open_in_memory().unwrap();
        let err = repo.get_one(7, 42).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn has_by_log_is_idempotency_check() {
        let repo = Repository::open_in_memory().unwrap();
        assert!(!repo.has_by_log(5, 1).await.unwrap());
        repo.put(msg(7, 5)).await.unwrap();
        assert!(repo.has_by_log(5, 1).await.unwrap());
    }

    #[tokio::test]
    async fn get_by_user_orders_by_id_ascending() {
        let repo = Repository::open_in_memory().unwrap();
        for i in 1..=5u64 {
            repo.put(msg(7, i)).await.unwrap();
        }
        let all = repo.get_by_user(7).await.unwrap();
        assert_eq!(all.len(), 5);
        for w in all.windows(2) {
            assert!(w[0].id < w[1].id);
        }
    }

    #[tokio::test]
    async fn truncate_removes_everything() {
        let repo = Repository::open_in_memory().unwrap();
        repo.put(msg(7, 1)).await.unwrap();
        repo.truncate().await.unwrap();
        assert!(repo.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn put_batch_restores_a_snapshot() {
        let repo = Repository::open_in_memory().unwrap();
        let batch: Vec<Message> = (1..=3u64).map(|i| msg(7, i)).collect();
        repo.put_batch(batch).await.unwrap();
        assert_eq!(repo.get_all().await.unwrap().len(), 3);
    }
}

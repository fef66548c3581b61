//! Storage contracts and the SQLite backend for the relay.
//!
//! Secrets live in two tables: `secrets` holds payloads and `secret_statuses`
//! is the ledger of last-modified time and ACTIVE/DELETED state. Deleting a
//! secret drops its payload row but keeps the ledger row, so stale client
//! copies can still be recognized as superseded.

pub mod models;

use crate::error::RelayError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use keeper_core::models::{from_micros, now, to_micros};
use keeper_core::RemoteSecret;
use models::{SecretStatus, StoredUser};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, RelayError>;

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Fails with `Conflict` if the login is taken.
    async fn create(&self, login: &str, password_hash: &str) -> Result<StoredUser>;

    async fn get_by_login(&self, login: &str) -> Result<Option<StoredUser>>;
}

#[async_trait]
pub trait SecretRepository: Send + Sync {
    /// Write payload and mark the ledger ACTIVE at `secret.last_modified`.
    async fn upsert(&self, user_id: &str, secret: &RemoteSecret) -> Result<()>;

    /// Live secret only; tombstoned or unknown names yield `None`.
    async fn get(&self, user_id: &str, name: &str) -> Result<Option<RemoteSecret>>;

    /// Ledger view: live secrets and tombstones alike.
    async fn get_with_status(&self, user_id: &str, name: &str) -> Result<Option<RemoteSecret>>;

    /// Drop the payload and mark the ledger DELETED at `at`.
    /// Returns `false` if there was no live secret to delete.
    async fn delete(&self, user_id: &str, name: &str, at: DateTime<Utc>) -> Result<bool>;

    /// Live secrets without payload data, newest first.
    async fn list(&self, user_id: &str) -> Result<Vec<RemoteSecret>>;

    /// Every ledger entry of a user, tombstones included.
    async fn list_with_statuses(&self, user_id: &str) -> Result<Vec<RemoteSecret>>;
}

/// Thread-safe relay storage.
#[derive(Clone)]
pub struct RelayStorage {
    conn: Arc<Mutex<Connection>>,
}

impl RelayStorage {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;

        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.initialize_schema()?;
        Ok(storage)
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;

        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.initialize_schema()?;
        Ok(storage)
    }

    fn initialize_schema(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                login TEXT NOT NULL UNIQUE,
                password_hash TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS secrets (
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                data BLOB NOT NULL,
                hash TEXT NOT NULL,
                PRIMARY KEY (user_id, name),
                FOREIGN KEY (user_id) REFERENCES users(id)
            );

            CREATE TABLE IF NOT EXISTS secret_statuses (
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                last_modified INTEGER NOT NULL,
                status TEXT NOT NULL CHECK (status IN ('ACTIVE', 'DELETED')),
                PRIMARY KEY (user_id, name),
                FOREIGN KEY (user_id) REFERENCES users(id)
            );

            CREATE INDEX IF NOT EXISTS idx_secret_statuses_user_modified
                ON secret_statuses(user_id, last_modified);",
        )?;
        Ok(())
    }

    pub fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RelayError::Internal(format!("Lock error: {}", e)))
    }
}

fn timestamp(micros: i64) -> rusqlite::Result<DateTime<Utc>> {
    from_micros(micros).ok_or(rusqlite::Error::IntegralValueOutOfRange(0, micros))
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<StoredUser> {
    Ok(StoredUser {
        id: row.get(0)?,
        login: row.get(1)?,
        password_hash: row.get(2)?,
        created_at: timestamp(row.get(3)?)?,
    })
}

/// Columns: name, data, hash, last_modified, status.
fn secret_from_row(row: &Row<'_>) -> rusqlite::Result<RemoteSecret> {
    let status: String = row.get(4)?;
    let deleted = match SecretStatus::parse(&status) {
        Some(SecretStatus::Active) => None,
        Some(SecretStatus::Deleted) => Some(true),
        None => {
            return Err(rusqlite::Error::InvalidColumnType(
                4,
                "status".to_string(),
                rusqlite::types::Type::Text,
            ))
        }
    };

    Ok(RemoteSecret {
        name: row.get(0)?,
        data: row.get(1)?,
        hash: row.get(2)?,
        last_modified: timestamp(row.get(3)?)?,
        deleted,
    })
}

const LEDGER_SELECT: &str = "SELECT st.name, COALESCE(s.data, X''), COALESCE(s.hash, ''),
        st.last_modified, st.status
     FROM secret_statuses st
     LEFT JOIN secrets s ON s.user_id = st.user_id AND s.name = st.name";

#[async_trait]
impl UserRepository for RelayStorage {
    async fn create(&self, login: &str, password_hash: &str) -> Result<StoredUser> {
        let user = StoredUser {
            id: Uuid::new_v4().to_string(),
            login: login.to_string(),
            password_hash: password_hash.to_string(),
            created_at: now(),
        };

        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO users (id, login, password_hash, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                user.id,
                user.login,
                user.password_hash,
                to_micros(&user.created_at)
            ],
        )?;
        if inserted == 0 {
            return Err(RelayError::Conflict("user already exists".to_string()));
        }
        Ok(user)
    }

    async fn get_by_login(&self, login: &str) -> Result<Option<StoredUser>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT id, login, password_hash, created_at FROM users WHERE login = ?1",
                params![login],
                user_from_row,
            )
            .optional()?)
    }
}

#[async_trait]
impl SecretRepository for RelayStorage {
    async fn upsert(&self, user_id: &str, secret: &RemoteSecret) -> Result<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO secrets (user_id, name, data, hash) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, name) DO UPDATE SET data = excluded.data, hash = excluded.hash",
            params![user_id, secret.name, secret.data, secret.hash],
        )?;
        tx.execute(
            "INSERT INTO secret_statuses (user_id, name, last_modified, status)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, name) DO UPDATE
             SET last_modified = excluded.last_modified, status = excluded.status",
            params![
                user_id,
                secret.name,
                to_micros(&secret.last_modified),
                SecretStatus::Active.as_str()
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    async fn get(&self, user_id: &str, name: &str) -> Result<Option<RemoteSecret>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT s.name, s.data, s.hash, st.last_modified, st.status
                 FROM secrets s
                 JOIN secret_statuses st ON st.user_id = s.user_id AND st.name = s.name
                 WHERE s.user_id = ?1 AND s.name = ?2 AND st.status = 'ACTIVE'",
                params![user_id, name],
                secret_from_row,
            )
            .optional()?)
    }

    async fn get_with_status(&self, user_id: &str, name: &str) -> Result<Option<RemoteSecret>> {
        let conn = self.conn()?;
        let sql = format!("{} WHERE st.user_id = ?1 AND st.name = ?2", LEDGER_SELECT);
        Ok(conn
            .query_row(&sql, params![user_id, name], secret_from_row)
            .optional()?)
    }

    async fn delete(&self, user_id: &str, name: &str, at: DateTime<Utc>) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let removed = tx.execute(
            "DELETE FROM secrets WHERE user_id = ?1 AND name = ?2",
            params![user_id, name],
        )?;
        if removed == 0 {
            return Ok(false);
        }

        tx.execute(
            "INSERT INTO secret_statuses (user_id, name, last_modified, status)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, name) DO UPDATE
             SET last_modified = excluded.last_modified, status = excluded.status",
            params![
                user_id,
                name,
                to_micros(&at),
                SecretStatus::Deleted.as_str()
            ],
        )?;

        tx.commit()?;
        Ok(true)
    }

    async fn list(&self, user_id: &str) -> Result<Vec<RemoteSecret>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT s.name, X'', s.hash, st.last_modified, st.status
             FROM secrets s
             JOIN secret_statuses st ON st.user_id = s.user_id AND st.name = s.name
             WHERE s.user_id = ?1 AND st.status = 'ACTIVE'
             ORDER BY st.last_modified DESC, s.name",
        )?;
        let secrets = stmt
            .query_map(params![user_id], secret_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(secrets)
    }

    async fn list_with_statuses(&self, user_id: &str) -> Result<Vec<RemoteSecret>> {
        let conn = self.conn()?;
        let sql = format!("{} WHERE st.user_id = ?1 ORDER BY st.name", LEDGER_SELECT);
        let mut stmt = conn.prepare(&sql)?;
        let secrets = stmt
            .query_map(params![user_id], secret_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(secrets)
    }
}

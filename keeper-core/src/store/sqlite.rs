//! SQLite implementation of the local secret store.

use crate::crypto::Cryptor;
use crate::models::{from_micros, to_micros, LocalSecret};
use crate::secrets::SecretType;
use crate::store::{LocalSecretStore, Result, StoreError};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// Row as it sits on disk, before decryption.
struct StoredRow {
    name: String,
    secret_type: String,
    data: Vec<u8>,
    hash: String,
    last_modified: i64,
    metadata: String,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            name: row.get(0)?,
            secret_type: row.get(1)?,
            data: row.get(2)?,
            hash: row.get(3)?,
            last_modified: row.get(4)?,
            metadata: row.get(5)?,
        })
    }
}

/// Thread-safe local store. `data` is sealed with the storage key.
#[derive(Clone)]
pub struct SqliteSecretStore {
    conn: Arc<Mutex<Connection>>,
    cryptor: Arc<Cryptor>,
}

impl SqliteSecretStore {
    pub fn open(path: &Path, cryptor: Arc<Cryptor>) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::with_connection(conn, cryptor)
    }

    pub fn in_memory(cryptor: Arc<Cryptor>) -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, cryptor)
    }

    fn with_connection(conn: Connection, cryptor: Arc<Cryptor>) -> Result<Self> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS local_secrets (
                name TEXT PRIMARY KEY,
                type TEXT NOT NULL,
                data BLOB NOT NULL,
                hash TEXT NOT NULL,
                last_modified INTEGER NOT NULL,
                metadata TEXT NOT NULL DEFAULT ''
            );",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            cryptor,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Lock)
    }

    fn decode(&self, row: StoredRow) -> Result<LocalSecret> {
        let secret_type: SecretType = row
            .secret_type
            .parse()
            .map_err(|_| StoreError::Corrupt(format!("unknown type for {}", row.name)))?;
        let last_modified = from_micros(row.last_modified)
            .ok_or_else(|| StoreError::Corrupt(format!("bad timestamp for {}", row.name)))?;

        Ok(LocalSecret {
            data: self.cryptor.decrypt_storage_data(&row.data)?,
            name: row.name,
            secret_type,
            hash: row.hash,
            last_modified,
            metadata: row.metadata,
        })
    }
}

// Blocking bodies. Each storage-key derivation is a full Argon2id run.
impl SqliteSecretStore {
    fn create_blocking(&self, secret: &LocalSecret) -> Result<()> {
        let sealed = self.cryptor.encrypt_storage_data(&secret.data)?;
        let conn = self.conn()?;

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO local_secrets
                (name, type, data, hash, last_modified, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                secret.name,
                secret.secret_type.as_str(),
                sealed,
                secret.hash,
                to_micros(&secret.last_modified),
                secret.metadata,
            ],
        )?;
        if inserted == 0 {
            return Err(StoreError::AlreadyExists(secret.name.clone()));
        }

        debug!(name = %secret.name, "Created local secret");
        Ok(())
    }

    fn get_blocking(&self, name: &str) -> Result<LocalSecret> {
        let row = {
            let conn = self.conn()?;
            conn.query_row(
                "SELECT name, type, data, hash, last_modified, metadata
                 FROM local_secrets WHERE name = ?1",
                params![name],
                StoredRow::from_row,
            )
            .optional()?
        };

        match row {
            Some(row) => self.decode(row),
            None => Err(StoreError::NotFound(name.to_string())),
        }
    }

    fn get_all_blocking(&self) -> Result<Vec<LocalSecret>> {
        let rows = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(
                "SELECT name, type, data, hash, last_modified, metadata
                 FROM local_secrets ORDER BY name",
            )?;
            let rows = stmt
                .query_map([], StoredRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        rows.into_iter().map(|row| self.decode(row)).collect()
    }

    fn update_blocking(&self, secret: &LocalSecret) -> Result<()> {
        let sealed = self.cryptor.encrypt_storage_data(&secret.data)?;
        let conn = self.conn()?;

        let updated = conn.execute(
            "UPDATE local_secrets
             SET type = ?2, data = ?3, hash = ?4, last_modified = ?5, metadata = ?6
             WHERE name = ?1",
            params![
                secret.name,
                secret.secret_type.as_str(),
                sealed,
                secret.hash,
                to_micros(&secret.last_modified),
                secret.metadata,
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound(secret.name.clone()));
        }

        debug!(name = %secret.name, "Updated local secret");
        Ok(())
    }

    fn delete_blocking(&self, name: &str) -> Result<()> {
        let conn = self.conn()?;
        let deleted = conn.execute("DELETE FROM local_secrets WHERE name = ?1", params![name])?;
        if deleted == 0 {
            return Err(StoreError::NotFound(name.to_string()));
        }

        debug!(name, "Deleted local secret");
        Ok(())
    }

    fn close_blocking(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch("PRAGMA optimize;")?;
        Ok(())
    }
}

/// Run `op` on the blocking pool with a handle to this store.
async fn blocking<T, F>(store: &SqliteSecretStore, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&SqliteSecretStore) -> Result<T> + Send + 'static,
{
    let store = store.clone();
    tokio::task::spawn_blocking(move || op(&store))
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
}

#[async_trait]
impl LocalSecretStore for SqliteSecretStore {
    async fn create(&self, secret: &LocalSecret) -> Result<()> {
        let secret = secret.clone();
        blocking(self, move |store| store.create_blocking(&secret)).await
    }

    async fn get(&self, name: &str) -> Result<LocalSecret> {
        let name = name.to_string();
        blocking(self, move |store| store.get_blocking(&name)).await
    }

    async fn get_all(&self) -> Result<Vec<LocalSecret>> {
        blocking(self, |store| store.get_all_blocking()).await
    }

    async fn update(&self, secret: &LocalSecret) -> Result<()> {
        let secret = secret.clone();
        blocking(self, move |store| store.update_blocking(&secret)).await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        blocking(self, move |store| store.delete_blocking(&name)).await
    }

    async fn close(&self) -> Result<()> {
        blocking(self, |store| store.close_blocking()).await
    }
}

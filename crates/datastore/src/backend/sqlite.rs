use super::{Backend, ItemRecord, ItemWrite, KeystoreRecord, WriteBatch, check_generation, migrations};
use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex, OnceLock, Weak};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug)]
pub struct SqliteBackend {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

type OpenHandles = StdMutex<HashMap<PathBuf, Weak<SqliteBackend>>>;

fn open_handles() -> &'static OpenHandles {
    static HANDLES: OnceLock<OpenHandles> = OnceLock::new();
    HANDLES.get_or_init(|| StdMutex::new(HashMap::new()))
}

impl SqliteBackend {
    /// Opens (creating and migrating if needed) the database at `path`.
    ///
    /// Repeated opens of the same path within a process return the same handle while
    /// it is alive.
    ///
    /// # Errors
    /// - [`StoreError::VersionMismatch`] if the file carries a newer schema version.
    /// - Database or I/O errors while opening or migrating.
    pub fn open(path: &Path) -> Result<Arc<Self>> {
        let mut handles = open_handles()
            .lock()
            .map_err(|_| StoreError::Generic("open handle registry poisoned".into()))?;
        if let Some(existing) = handles.get(path).and_then(Weak::upgrade) {
            return Ok(existing);
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let backend = Arc::new(Self::from_connection(Connection::open(path)?, Some(path.to_path_buf()))?);
        handles.retain(|_, h| h.strong_count() > 0);
        handles.insert(path.to_path_buf(), Arc::downgrade(&backend));
        debug!(path = %path.display(), "opened local database");
        Ok(backend)
    }

    /// Opens the database for a bucket as described by `config`.
    ///
    /// # Errors
    /// See [`SqliteBackend::open`] and [`StoreConfig::database_path`].
    pub fn open_bucket(config: &StoreConfig) -> Result<Arc<Self>> {
        Self::open(&config.database_path()?)
    }

    /// A private, non-durable database.
    ///
    /// # Errors
    /// Returns an error if `SQLite` cannot allocate the database.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, None)
    }

    fn from_connection(mut conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.execute_batch(
            r"
        PRAGMA journal_mode=WAL;
        PRAGMA foreign_keys=ON;
        ",
        )?;
        migrations::run(&mut conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn read_keystore(conn: &Connection, group: &str) -> Result<Option<KeystoreRecord>> {
    let row = conn
        .query_row(
            "SELECT group_id, salt, encrypted, generation FROM keystores WHERE group_id = ?",
            params![group],
            |r| {
                Ok(KeystoreRecord {
                    group: r.get(0)?,
                    salt: r.get(1)?,
                    encrypted: r.get(2)?,
                    generation: r.get(3)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

fn read_item(conn: &Connection, id: &str) -> Result<Option<ItemRecord>> {
    let row = conn
        .query_row(
            "SELECT id, active, encrypted FROM items WHERE id = ?",
            params![id],
            |r| {
                Ok(ItemRecord {
                    id: r.get(0)?,
                    active: r.get(1)?,
                    encrypted: r.get(2)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

fn read_items(conn: &Connection) -> Result<Vec<ItemRecord>> {
    let mut stmt = conn.prepare("SELECT id, active, encrypted FROM items ORDER BY id ASC")?;
    let rows = stmt.query_map([], |r| {
        Ok(ItemRecord {
            id: r.get(0)?,
            active: r.get(1)?,
            encrypted: r.get(2)?,
        })
    })?;
    let mut out = Vec::new();
    for r in rows {
        out.push(r?);
    }
    Ok(out)
}

fn keystore_generation(conn: &Connection, group: &str) -> Result<Option<u64>> {
    let generation = conn
        .query_row(
            "SELECT generation FROM keystores WHERE group_id = ?",
            params![group],
            |r| r.get(0),
        )
        .optional()?;
    Ok(generation)
}

fn write_batch(conn: &mut Connection, batch: &WriteBatch) -> Result<()> {
    // IMMEDIATE takes the write lock up front so the generation checks below cannot
    // race another connection.
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    if let Some(guard) = &batch.guard {
        check_generation(keystore_generation(&tx, &guard.group)?, guard.expected_generation)?;
    }
    for write in &batch.items {
        match write {
            ItemWrite::Put(record) => {
                tx.execute(
                    "INSERT INTO items (id, active, encrypted) VALUES (?1, ?2, ?3)
                     ON CONFLICT(id) DO UPDATE SET active = excluded.active, encrypted = excluded.encrypted",
                    params![record.id, record.active, record.encrypted],
                )?;
            }
            ItemWrite::Delete(id) => {
                tx.execute("DELETE FROM items WHERE id = ?", params![id])?;
            }
        }
    }
    if let Some(write) = &batch.keystore {
        check_generation(keystore_generation(&tx, &write.record.group)?, write.expected_generation)?;
        tx.execute(
            "INSERT OR REPLACE INTO keystores (group_id, salt, encrypted, generation) VALUES (?1, ?2, ?3, ?4)",
            params![
                write.record.group,
                write.record.salt,
                write.record.encrypted,
                write.record.generation
            ],
        )?;
    }
    tx.commit()?;
    Ok(())
}

fn erase(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM items", [])?;
    tx.execute("DELETE FROM keystores", [])?;
    tx.commit()?;
    Ok(())
}

#[async_trait]
impl Backend for SqliteBackend {
    async fn load_keystore(&self, group: &str) -> Result<Option<KeystoreRecord>> {
        let conn = self.conn.lock().await;
        read_keystore(&conn, group)
    }

    async fn get_item(&self, id: &str) -> Result<Option<ItemRecord>> {
        let conn = self.conn.lock().await;
        read_item(&conn, id)
    }

    async fn list_items(&self) -> Result<Vec<ItemRecord>> {
        let conn = self.conn.lock().await;
        read_items(&conn)
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        if batch.is_empty() && batch.guard.is_none() {
            return Ok(());
        }
        let mut conn = self.conn.lock().await;
        write_batch(&mut conn, &batch)?;
        debug!(
            items = batch.items.len(),
            keystore = batch.keystore.is_some(),
            "committed write batch"
        );
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        let mut conn = self.conn.lock().await;
        erase(&mut conn)?;
        debug!("erased local database");
        Ok(())
    }
}

use super::{Backend, ItemRecord, ItemWrite, KeystoreRecord, WriteBatch, check_generation};
use crate::error::{Result, StoreError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Tables {
    items: BTreeMap<String, ItemRecord>,
    keystores: HashMap<String, KeystoreRecord>,
    fail_next_commit: bool,
    commits: usize,
}

/// Non-durable backend. Clones share the same tables, which lets tests keep a handle
/// on what a store has written and inject commit failures.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Generic("memory backend lock poisoned".into()))
    }

    /// Makes the next [`Backend::commit`] fail after it has staged its writes, leaving the
    /// tables as they were.
    pub fn fail_next_commit(&self) -> Result<()> {
        self.tables()?.fail_next_commit = true;
        Ok(())
    }

    /// Number of successfully committed batches.
    pub fn commit_count(&self) -> Result<usize> {
        Ok(self.tables()?.commits)
    }

    pub fn item_count(&self) -> Result<usize> {
        Ok(self.tables()?.items.len())
    }

    /// Writes a registry row directly, bypassing generation checks.
    pub fn insert_keystore(&self, record: KeystoreRecord) -> Result<()> {
        self.tables()?.keystores.insert(record.group.clone(), record);
        Ok(())
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn load_keystore(&self, group: &str) -> Result<Option<KeystoreRecord>> {
        Ok(self.tables()?.keystores.get(group).cloned())
    }

    async fn get_item(&self, id: &str) -> Result<Option<ItemRecord>> {
        Ok(self.tables()?.items.get(id).cloned())
    }

    async fn list_items(&self) -> Result<Vec<ItemRecord>> {
        Ok(self.tables()?.items.values().cloned().collect())
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        let mut tables = self.tables()?;
        if let Some(guard) = &batch.guard {
            let current = tables.keystores.get(&guard.group).map(|r| r.generation);
            check_generation(current, guard.expected_generation)?;
        }
        if batch.is_empty() {
            return Ok(());
        }

        // Stage on copies so a failure part-way leaves nothing behind.
        let mut items = tables.items.clone();
        let mut keystores = tables.keystores.clone();

        for write in batch.items {
            match write {
                ItemWrite::Put(record) => {
                    items.insert(record.id.clone(), record);
                }
                ItemWrite::Delete(id) => {
                    items.remove(&id);
                }
            }
        }
        if let Some(write) = batch.keystore {
            let current = keystores.get(&write.record.group).map(|r| r.generation);
            check_generation(current, write.expected_generation)?;
            keystores.insert(write.record.group.clone(), write.record);
        }

        if std::mem::take(&mut tables.fail_next_commit) {
            return Err(StoreError::Generic("injected commit failure".into()));
        }

        tables.items = items;
        tables.keystores = keystores;
        tables.commits += 1;
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        let mut tables = self.tables()?;
        tables.items.clear();
        tables.keystores.clear();
        Ok(())
    }
}

//! Persistence backends.
//!
//! A backend stores two tables: item records keyed by id, and key-registry records
//! keyed by group. Everything in a [`WriteBatch`] commits atomically or not at all.

pub mod memory;
pub mod migrations;
pub mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

use crate::error::{Result, StoreError};
use async_trait::async_trait;
use std::sync::Arc;

/// Group id of the key-registry row.
pub const DEFAULT_GROUP: &str = "default";

/// An item as persisted: only the id and active flag are readable without the item key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRecord {
    pub id: String,
    pub active: bool,
    pub encrypted: Vec<u8>,
}

/// The persisted key registry for one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeystoreRecord {
    pub group: String,
    pub salt: Vec<u8>,
    pub encrypted: Vec<u8>,
    /// Bumped by every committed write; used to detect concurrent writers.
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemWrite {
    Put(ItemRecord),
    Delete(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeystoreWrite {
    pub record: KeystoreRecord,
    /// Generation the writer last read; `None` means the row must not exist yet.
    pub expected_generation: Option<u64>,
}

/// Asserts the registry row is still at `expected` without rewriting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeystoreGuard {
    pub group: String,
    pub expected_generation: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    pub items: Vec<ItemWrite>,
    pub keystore: Option<KeystoreWrite>,
    pub guard: Option<KeystoreGuard>,
}

impl WriteBatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn put_item(mut self, record: ItemRecord) -> Self {
        self.items.push(ItemWrite::Put(record));
        self
    }

    #[must_use]
    pub fn delete_item(mut self, id: impl Into<String>) -> Self {
        self.items.push(ItemWrite::Delete(id.into()));
        self
    }

    /// Replaces the registry row for `group`, conditional on it still being at `expected`.
    #[must_use]
    pub fn put_keystore(mut self, group: &str, salt: &[u8], encrypted: &[u8], expected: Option<u64>) -> Self {
        self.keystore = Some(KeystoreWrite {
            record: KeystoreRecord {
                group: group.to_string(),
                salt: salt.to_vec(),
                encrypted: encrypted.to_vec(),
                generation: expected.map_or(1, |g| g + 1),
            },
            expected_generation: expected,
        });
        self
    }

    /// Makes the batch conditional on the registry row for `group` still being at
    /// `expected`, leaving the row and its generation as they are.
    #[must_use]
    pub fn require_keystore(mut self, group: &str, expected: Option<u64>) -> Self {
        self.guard = Some(KeystoreGuard {
            group: group.to_string(),
            expected_generation: expected,
        });
        self
    }

    /// True when committing would change nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.keystore.is_none()
    }
}

/// Compare-and-swap guard shared by the backends.
pub(crate) fn check_generation(current: Option<u64>, expected: Option<u64>) -> Result<()> {
    if current == expected {
        Ok(())
    } else {
        Err(StoreError::WriteConflict)
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn load_keystore(&self, group: &str) -> Result<Option<KeystoreRecord>>;

    async fn get_item(&self, id: &str) -> Result<Option<ItemRecord>>;

    async fn list_items(&self) -> Result<Vec<ItemRecord>>;

    /// Applies every write in `batch` in one transaction.
    ///
    /// # Errors
    /// [`StoreError::WriteConflict`] if the registry row moved past the generation the
    /// keystore write or guard expects; nothing from the batch is applied in that case.
    async fn commit(&self, batch: WriteBatch) -> Result<()>;

    /// Erases all items and registries.
    async fn destroy(&self) -> Result<()>;
}

#[async_trait]
impl<T: Backend + ?Sized> Backend for Arc<T> {
    async fn load_keystore(&self, group: &str) -> Result<Option<KeystoreRecord>> {
        (**self).load_keystore(group).await
    }

    async fn get_item(&self, id: &str) -> Result<Option<ItemRecord>> {
        (**self).get_item(id).await
    }

    async fn list_items(&self) -> Result<Vec<ItemRecord>> {
        (**self).list_items().await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<()> {
        (**self).commit(batch).await
    }

    async fn destroy(&self) -> Result<()> {
        (**self).destroy().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_keystore_bumps_generation() {
        let batch = WriteBatch::new().put_keystore(DEFAULT_GROUP, b"salt", b"blob", None);
        let write = batch.keystore.as_ref().map(|w| (w.record.generation, w.expected_generation));
        assert_eq!(write, Some((1, None)));

        let batch = WriteBatch::new().put_keystore(DEFAULT_GROUP, b"salt", b"blob", Some(7));
        let write = batch.keystore.as_ref().map(|w| (w.record.generation, w.expected_generation));
        assert_eq!(write, Some((8, Some(7))));
    }

    #[test]
    fn test_check_generation() {
        assert!(check_generation(None, None).is_ok());
        assert!(check_generation(Some(3), Some(3)).is_ok());
        assert!(matches!(check_generation(Some(4), Some(3)), Err(StoreError::WriteConflict)));
        assert!(matches!(check_generation(Some(1), None), Err(StoreError::WriteConflict)));
    }

    #[test]
    fn test_batch_builder_collects_writes_in_order() {
        let batch = WriteBatch::new()
            .put_item(ItemRecord {
                id: "a".into(),
                active: true,
                encrypted: vec![1],
            })
            .delete_item("b");
        assert_eq!(batch.items.len(), 2);
        assert!(matches!(&batch.items[1], ItemWrite::Delete(id) if id == "b"));
        assert!(!batch.is_empty());
        assert!(WriteBatch::new().is_empty());
    }

    #[test]
    fn test_require_keystore_does_not_write_registry() {
        let batch = WriteBatch::new().require_keystore(DEFAULT_GROUP, Some(4));
        assert!(batch.keystore.is_none());
        assert_eq!(
            batch.guard,
            Some(KeystoreGuard {
                group: DEFAULT_GROUP.to_string(),
                expected_generation: Some(4),
            })
        );
        assert!(batch.is_empty());
    }
}

//! The store: lock state machine and item CRUD over a [`Backend`].
//!
//! All state lives behind one async mutex, so operations on a single `Store` run one at a
//! time. Every write carries the registry generation it was built against. Registry
//! rewrites bump it, item-only writes just require it. A backend that has moved on
//! rejects either with [`StoreError::WriteConflict`].

use crate::backend::{Backend, ItemRecord, SqliteBackend, WriteBatch};
use crate::config::{InitializeOptions, StoreConfig};
use crate::error::{Result, StoreError};
use crate::kdf::{ApplicationKey, derive, generate_salt};
use crate::keys::ItemKeyRegistry;
use crate::metrics::{self, Method, MetricsEvent, MetricsHook};
use lockbox_items::{Entry, Item, ItemDraft, ValidationError, Violation, prepare};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use time::OffsetDateTime;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

#[derive(Default)]
struct State {
    initialized: bool,
    salt: Vec<u8>,
    generation: Option<u64>,
    registry: ItemKeyRegistry,
}

impl State {
    fn ensure_unlocked(&self) -> Result<()> {
        if !self.initialized {
            return Err(StoreError::NotInitialized);
        }
        if !self.registry.has_encryption_key() {
            return Err(StoreError::Locked);
        }
        Ok(())
    }

    fn is_locked(&self) -> bool {
        !self.registry.has_encryption_key()
    }
}

pub struct Store<B: Backend> {
    backend: B,
    group: String,
    metrics: Option<Arc<dyn MetricsHook>>,
    state: Mutex<State>,
    initialized: AtomicBool,
    locked: AtomicBool,
}

impl<B: Backend> fmt::Debug for Store<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("group", &self.group)
            .field("initialized", &self.initialized())
            .field("locked", &self.locked())
            .finish_non_exhaustive()
    }
}

impl Store<Arc<SqliteBackend>> {
    /// Opens the SQLite-backed store described by `config`.
    ///
    /// # Errors
    /// See [`SqliteBackend::open_bucket`] and [`Store::open`].
    pub async fn open_bucket(config: &StoreConfig) -> Result<Self> {
        let backend = SqliteBackend::open_bucket(config)?;
        debug!(path = ?backend.path(), bucket = %config.bucket, "opening bucket");
        Self::open(backend, config).await
    }
}

impl<B: Backend> Store<B> {
    /// Binds a store to `backend`. The store starts locked; it is initialized if the
    /// backend already holds a key registry for the configured group.
    ///
    /// # Errors
    /// Propagates backend read failures.
    pub async fn open(backend: B, config: &StoreConfig) -> Result<Self> {
        let record = backend.load_keystore(&config.group).await?;
        let state = match record {
            Some(record) => State {
                initialized: true,
                salt: record.salt,
                generation: Some(record.generation),
                registry: ItemKeyRegistry::with_blob(Some(record.encrypted)),
            },
            None => State::default(),
        };
        debug!(group = %config.group, initialized = state.initialized, "opened store");
        Ok(Self {
            backend,
            group: config.group.clone(),
            metrics: None,
            initialized: AtomicBool::new(state.initialized),
            locked: AtomicBool::new(true),
            state: Mutex::new(state),
        })
    }

    /// Attaches a hook that is told about every add, update and remove.
    ///
    /// # Returns
    /// The same store, now reporting to `hook`. A failing hook never fails the operation.
    #[must_use]
    pub fn with_metrics(mut self, hook: Arc<dyn MetricsHook>) -> Self {
        self.metrics = Some(hook);
        self
    }

    /// The backend this store reads from and commits to.
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Whether a key registry exists for this store's group.
    ///
    /// # Returns
    /// `true` after `initialize` (or `open` over an existing registry) until `reset`.
    pub fn initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Whether item keys are unavailable.
    ///
    /// # Returns
    /// `true` before the first successful `initialize`/`unlock`, after `lock`, and after
    /// a failed `unlock`. An uninitialized store is always locked.
    pub fn locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    fn publish(&self, state: &State) {
        self.initialized.store(state.initialized, Ordering::Release);
        self.locked.store(state.is_locked(), Ordering::Release);
    }

    async fn unlocked_state(&self) -> Result<MutexGuard<'_, State>> {
        let state = self.state.lock().await;
        state.ensure_unlocked()?;
        Ok(state)
    }

    async fn report(&self, method: Method, item_id: &str, changed_fields: Option<String>) {
        let event = MetricsEvent {
            method,
            item_id: item_id.to_string(),
            changed_fields,
        };
        metrics::report(self.metrics.as_deref(), event).await;
    }

    /// Creates the key registry, or re-keys it when `options.rebase` is set.
    ///
    /// A rebase keeps every item key and only re-encrypts the registry blob, so item
    /// rows are not rewritten.
    ///
    /// # Errors
    /// - [`StoreError::AlreadyInitialized`] if initialized and not rebasing.
    /// - [`StoreError::Locked`] when rebasing a locked store.
    /// - [`StoreError::MissingApplicationKey`] if no key is given.
    /// - [`StoreError::WriteConflict`] if another writer changed the registry row.
    pub async fn initialize(&self, options: InitializeOptions) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.initialized && !options.rebase {
            return Err(StoreError::AlreadyInitialized);
        }
        if options.rebase && state.is_locked() {
            return Err(StoreError::Locked);
        }

        let salt = match options.salt {
            Some(salt) => salt,
            None => generate_salt()?,
        };
        let keys = derive(options.app_key.as_ref(), &salt)?;
        let carried = if options.rebase {
            state.registry.export_keys()
        } else {
            HashMap::new()
        };
        let mut registry = ItemKeyRegistry::with_keys(keys.encryption, carried);
        let blob = registry.save()?.to_vec();

        let expected = if state.initialized { state.generation } else { None };
        let batch = WriteBatch::new().put_keystore(&self.group, &salt, &blob, expected);
        let generation = batch.keystore.as_ref().map(|k| k.record.generation);
        self.backend.commit(batch).await?;

        state.registry = registry;
        state.salt = salt;
        state.generation = generation;
        state.initialized = true;
        self.publish(&state);
        info!(
            group = %self.group,
            rebase = options.rebase,
            keys = state.registry.len(),
            "store initialized"
        );
        Ok(())
    }

    /// Drops all key material from memory. Always succeeds.
    pub async fn lock(&self) {
        let mut state = self.state.lock().await;
        state.registry.clear(false);
        self.publish(&state);
        info!(group = %self.group, "store locked");
    }

    /// Re-derives the keys from `app_key` and decrypts the registry.
    ///
    /// The registry row is re-read first, so this also picks up writes made through
    /// other handles. On failure the store is left locked.
    ///
    /// # Errors
    /// - [`StoreError::NotInitialized`] if there is no registry.
    /// - [`StoreError::MissingApplicationKey`] if `app_key` is empty.
    /// - [`StoreError::Crypto`] if the key is wrong.
    pub async fn unlock(&self, app_key: &ApplicationKey) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.initialized {
            return Err(StoreError::NotInitialized);
        }
        state.registry.clear(false);
        self.publish(&state);

        let Some(record) = self.backend.load_keystore(&self.group).await? else {
            *state = State::default();
            self.publish(&state);
            return Err(StoreError::NotInitialized);
        };
        let keys = derive(Some(app_key), &record.salt)?;
        let mut registry = ItemKeyRegistry::with_blob(Some(record.encrypted));
        registry.load(Some(keys.encryption))?;

        state.registry = registry;
        state.salt = record.salt;
        state.generation = Some(record.generation);
        self.publish(&state);
        info!(group = %self.group, keys = state.registry.len(), "store unlocked");
        Ok(())
    }

    /// Erases every persisted item and the registry. No-op when not initialized.
    ///
    /// # Errors
    /// Propagates backend failures; the in-memory state is untouched in that case.
    pub async fn reset(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if !state.initialized {
            return Ok(());
        }
        self.backend.destroy().await?;
        state.registry.clear(true);
        *state = State::default();
        self.publish(&state);
        info!(group = %self.group, "store reset");
        Ok(())
    }

    /// Every item, keyed by id.
    ///
    /// # Errors
    /// - [`StoreError::NotInitialized`] / [`StoreError::Locked`] before any I/O.
    /// - [`StoreError::UnknownKey`] / [`StoreError::Crypto`] if a row cannot be decrypted.
    pub async fn list(&self) -> Result<HashMap<String, Item>> {
        let state = self.unlocked_state().await?;
        let records = self.backend.list_items().await?;
        let mut items = HashMap::with_capacity(records.len());
        for record in records {
            let item = state.registry.unprotect(&record.id, &record.encrypted)?;
            items.insert(record.id, item);
        }
        Ok(items)
    }

    /// Looks up and decrypts a single item.
    ///
    /// # Returns
    /// The item, or `None` if no row exists for `id`.
    ///
    /// # Errors
    /// - [`StoreError::NotInitialized`] / [`StoreError::Locked`] before any I/O.
    /// - [`StoreError::UnknownKey`] / [`StoreError::Crypto`] if the row cannot be decrypted.
    pub async fn get(&self, id: &str) -> Result<Option<Item>> {
        let state = self.unlocked_state().await?;
        match self.backend.get_item(id).await? {
            Some(record) => Ok(Some(state.registry.unprotect(id, &record.encrypted)?)),
            None => Ok(None),
        }
    }

    /// Normalizes `draft` into a new item and writes it together with its key.
    ///
    /// Never replaces an existing item; use [`Store::update`] for that.
    ///
    /// # Errors
    /// - [`StoreError::NotInitialized`] / [`StoreError::Locked`] before any I/O.
    /// - [`StoreError::InvalidItem`] with the offending fields, or with `"id": "invalid"`
    ///   if an item or item key with the draft's id already exists.
    /// - Backend failures, after which the in-memory registry is as it was.
    pub async fn add(&self, draft: ItemDraft) -> Result<Item> {
        let mut state = self.unlocked_state().await?;
        let item = prepare(draft, None)?;
        if state.registry.get(&item.id).is_some() || self.backend.get_item(&item.id).await?.is_some() {
            return Err(ValidationError::single("id", Violation::Invalid).into());
        }

        let previous_blob = state.registry.blob().map(<[u8]>::to_vec);
        let staged = stage_add(&mut state, &item);
        let committed = match staged {
            Ok(encrypted) => {
                let blob = state.registry.blob().map(<[u8]>::to_vec).unwrap_or_default();
                let batch = WriteBatch::new()
                    .put_item(record_for(&item, encrypted))
                    .put_keystore(&self.group, &state.salt, &blob, state.generation);
                let generation = batch.keystore.as_ref().map(|k| k.record.generation);
                self.backend.commit(batch).await.map(|()| generation)
            }
            Err(e) => Err(e),
        };

        match committed {
            Ok(generation) => state.generation = generation,
            Err(e) => {
                state.registry.delete(&item.id);
                state.registry.set_blob(previous_blob);
                return Err(e);
            }
        }
        drop(state);

        debug!(id = %item.id, "item added");
        self.report(Method::Added, &item.id, None).await;
        Ok(item)
    }

    /// Applies `draft` on top of the stored item with the same id.
    ///
    /// The row write is conditional on the key registry being unchanged since this store
    /// last read it, so an item removed through another handle cannot come back keyless.
    ///
    /// # Errors
    /// - [`StoreError::NotInitialized`] / [`StoreError::Locked`] before any I/O.
    /// - [`StoreError::InvalidItem`] if the draft has no id or fails validation.
    /// - [`StoreError::MissingItem`] if no item has that id.
    /// - [`StoreError::WriteConflict`] if another writer changed the registry.
    pub async fn update(&self, draft: ItemDraft) -> Result<Item> {
        let mut state = self.unlocked_state().await?;
        let id = draft
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ValidationError::single("id", Violation::MissingRequired))?;

        let record = self
            .backend
            .get_item(&id)
            .await?
            .ok_or_else(|| StoreError::MissingItem(id.clone()))?;
        let previous = state.registry.unprotect(&id, &record.encrypted)?;
        let item = prepare(draft, Some(&previous))?;
        let encrypted = state.registry.protect(&item)?;
        let batch = WriteBatch::new()
            .put_item(record_for(&item, encrypted))
            .require_keystore(&self.group, state.generation);
        self.backend.commit(batch).await?;
        drop(state);

        let changed = changed_fields(&previous, &item);
        debug!(id = %item.id, changed = changed.len(), "item updated");
        let changed = (!changed.is_empty()).then(|| changed.join(","));
        self.report(Method::Updated, &item.id, changed).await;
        Ok(item)
    }

    /// Deletes the item and its key. Returns the item as it was, or `None` if there was
    /// nothing to delete.
    ///
    /// # Errors
    /// - [`StoreError::NotInitialized`] / [`StoreError::Locked`] before any I/O.
    /// - Backend failures, after which the key is back in the registry.
    pub async fn remove(&self, id: &str) -> Result<Option<Item>> {
        let mut state = self.unlocked_state().await?;
        let Some(record) = self.backend.get_item(id).await? else {
            return Ok(None);
        };
        let item = state.registry.unprotect(id, &record.encrypted)?;

        let previous_blob = state.registry.blob().map(<[u8]>::to_vec);
        let removed = state.registry.delete(id);
        let committed = match state.registry.save().map(<[u8]>::to_vec) {
            Ok(blob) => {
                let batch = WriteBatch::new()
                    .delete_item(id)
                    .put_keystore(&self.group, &state.salt, &blob, state.generation);
                let generation = batch.keystore.as_ref().map(|k| k.record.generation);
                self.backend.commit(batch).await.map(|()| generation)
            }
            Err(e) => Err(e),
        };

        match committed {
            Ok(generation) => state.generation = generation,
            Err(e) => {
                if let Some(key) = removed {
                    state.registry.restore(id, key);
                }
                state.registry.set_blob(previous_blob);
                return Err(e);
            }
        }
        drop(state);

        debug!(%id, "item removed");
        self.report(Method::Deleted, id, None).await;
        Ok(Some(item))
    }

    /// Stamps the item as used now. Leaves history and `modified` alone.
    ///
    /// # Errors
    /// - [`StoreError::NotInitialized`] / [`StoreError::Locked`] before any I/O.
    /// - [`StoreError::MissingItem`] if no item has that id.
    /// - [`StoreError::WriteConflict`] if another writer changed the registry.
    pub async fn touch(&self, id: &str) -> Result<Item> {
        let mut state = self.unlocked_state().await?;
        let record = self
            .backend
            .get_item(id)
            .await?
            .ok_or_else(|| StoreError::MissingItem(id.to_string()))?;
        let mut item = state.registry.unprotect(id, &record.encrypted)?;
        item.last_used = Some(OffsetDateTime::now_utc());
        let encrypted = state.registry.protect(&item)?;
        let batch = WriteBatch::new()
            .put_item(record_for(&item, encrypted))
            .require_keystore(&self.group, state.generation);
        self.backend.commit(batch).await?;
        Ok(item)
    }
}

fn stage_add(state: &mut State, item: &Item) -> Result<Vec<u8>> {
    let encrypted = state.registry.protect(item)?;
    state.registry.save()?;
    Ok(encrypted)
}

fn record_for(item: &Item, encrypted: Vec<u8>) -> ItemRecord {
    ItemRecord {
        id: item.id.clone(),
        active: !item.disabled,
        encrypted,
    }
}

/// Names of the user-visible fields that differ between two versions of an item.
#[must_use]
pub fn changed_fields(previous: &Item, current: &Item) -> Vec<&'static str> {
    let mut fields = Vec::new();
    if previous.title != current.title {
        fields.push("title");
    }
    if previous.origins != current.origins {
        fields.push("origins");
    }
    match (&previous.entry, &current.entry) {
        (Entry::Login(prev), Entry::Login(cur)) => {
            if prev.username != cur.username {
                fields.push("entry.username");
            }
            if prev.password != cur.password {
                fields.push("entry.password");
            }
            if prev.notes != cur.notes {
                fields.push("entry.notes");
            }
        }
    }
    fields
}

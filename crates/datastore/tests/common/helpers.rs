#![allow(dead_code)]

use super::fixtures::initialize_options;
use async_trait::async_trait;
use lockbox_datastore::backend::{ItemRecord, KeystoreRecord};
use lockbox_datastore::{
    Backend, MemoryBackend, MetricsEvent, MetricsHook, SqliteBackend, Store, StoreConfig, WriteBatch,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::Notify;

/// Metrics sink that keeps every event and can be told to fail.
#[derive(Default)]
pub struct RecordingMetrics {
    events: Mutex<Vec<MetricsEvent>>,
    failing: AtomicBool,
}

impl RecordingMetrics {
    pub fn events(&self) -> Vec<MetricsEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl MetricsHook for RecordingMetrics {
    async fn record(&self, event: MetricsEvent) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.events.lock().map_err(|e| e.to_string())?.push(event);
        if self.failing.load(Ordering::SeqCst) {
            return Err("metrics sink unavailable".into());
        }
        Ok(())
    }
}

/// A store over a shared in-memory backend, with a recording metrics hook.
pub struct TestContext {
    pub store: Store<MemoryBackend>,
    pub backend: MemoryBackend,
    pub metrics: Arc<RecordingMetrics>,
}

impl TestContext {
    /// Opened but not initialized.
    pub async fn new() -> color_eyre::Result<Self> {
        let backend = MemoryBackend::new();
        let metrics = Arc::new(RecordingMetrics::default());
        let store = Store::open(backend.clone(), &StoreConfig::default())
            .await?
            .with_metrics(metrics.clone());
        Ok(Self {
            store,
            backend,
            metrics,
        })
    }

    /// Initialized with the fixture key and salt, and unlocked.
    pub async fn unlocked() -> color_eyre::Result<Self> {
        let ctx = Self::new().await?;
        ctx.store.initialize(initialize_options()).await?;
        Ok(ctx)
    }

    /// A second store over the same backend.
    pub async fn second_store(&self) -> color_eyre::Result<Store<MemoryBackend>> {
        Ok(Store::open(self.backend.clone(), &StoreConfig::default()).await?)
    }
}

/// Memory backend whose next commit, once armed, waits until the gate is opened.
///
/// Reads go through immediately, so a store can read, get parked at its commit, and
/// have another writer run in between.
#[derive(Clone)]
pub struct GatedBackend {
    inner: MemoryBackend,
    gate: Arc<Notify>,
    armed: Arc<AtomicBool>,
}

impl GatedBackend {
    pub fn new(inner: MemoryBackend) -> Self {
        Self {
            inner,
            gate: Arc::new(Notify::new()),
            armed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Parks the next commit until [`GatedBackend::open_gate`].
    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    pub fn open_gate(&self) {
        self.gate.notify_one();
    }
}

#[async_trait]
impl Backend for GatedBackend {
    async fn load_keystore(&self, group: &str) -> lockbox_datastore::Result<Option<KeystoreRecord>> {
        self.inner.load_keystore(group).await
    }

    async fn get_item(&self, id: &str) -> lockbox_datastore::Result<Option<ItemRecord>> {
        self.inner.get_item(id).await
    }

    async fn list_items(&self) -> lockbox_datastore::Result<Vec<ItemRecord>> {
        self.inner.list_items().await
    }

    async fn commit(&self, batch: WriteBatch) -> lockbox_datastore::Result<()> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.gate.notified().await;
        }
        self.inner.commit(batch).await
    }

    async fn destroy(&self) -> lockbox_datastore::Result<()> {
        self.inner.destroy().await
    }
}

/// A temporary directory holding one SQLite database file.
pub struct SqliteContext {
    pub temp_dir: TempDir,
    pub path: PathBuf,
}

impl SqliteContext {
    pub fn new() -> color_eyre::Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        let path = temp_dir.path().join("lockbox").join("test.sqlite3");
        Ok(Self { temp_dir, path })
    }

    pub fn config(&self) -> StoreConfig {
        StoreConfig::with_path(&self.path)
    }

    pub async fn open_store(&self) -> color_eyre::Result<Store<Arc<SqliteBackend>>> {
        Ok(Store::open_bucket(&self.config()).await?)
    }
}

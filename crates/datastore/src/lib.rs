pub mod backend;
pub mod config;
pub mod crypto;
pub mod error;
pub mod kdf;
pub mod keys;
pub mod metrics;
pub mod store;

// Re-export the types embedders reach for
pub use backend::{Backend, MemoryBackend, SqliteBackend, WriteBatch};
pub use config::{InitializeOptions, StoreConfig};
pub use error::{ErrorKind, Result, StoreError};
pub use kdf::ApplicationKey;
pub use keys::ItemKeyRegistry;
pub use metrics::{Method, MetricsEvent, MetricsHook};
pub use store::Store;

pub use lockbox_items::{Entry, Item, ItemDraft, LoginEntry, ValidationError, Violation};

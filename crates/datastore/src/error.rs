use lockbox_items::ValidationError;
use std::fmt;
use thiserror::Error;

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Datastore is not initialized")]
    NotInitialized,

    #[error("Datastore is already initialized")]
    AlreadyInitialized,

    #[error("Datastore is locked")]
    Locked,

    #[error("Application key is missing")]
    MissingApplicationKey,

    #[error("Encryption key is missing")]
    MissingEncryptionKey,

    #[error("Key registry has no encrypted data")]
    NotEncrypted,

    #[error("No item key for {0}")]
    UnknownKey(String),

    /// Wrong application key and corrupted ciphertext both end up here.
    #[error("Decryption failed")]
    Crypto,

    #[error(transparent)]
    InvalidItem(#[from] ValidationError),

    #[error("Item not found: {0}")]
    MissingItem(String),

    #[error("Local database version mismatch: found {found}, expected at most {expected}")]
    VersionMismatch { found: u32, expected: u32 },

    #[error("Key registry was modified by another writer")]
    WriteConflict,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialisation error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Generic(String),
}

/// Coarse classification callers match on instead of parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotInitialized,
    AlreadyInitialized,
    Locked,
    MissingApplicationKey,
    MissingEncryptionKey,
    NotEncrypted,
    UnknownKey,
    CryptoFailure,
    InvalidItem,
    MissingItem,
    LocalDbVersionMismatch,
    WriteConflict,
    GenericError,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl StoreError {
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotInitialized => ErrorKind::NotInitialized,
            StoreError::AlreadyInitialized => ErrorKind::AlreadyInitialized,
            StoreError::Locked => ErrorKind::Locked,
            StoreError::MissingApplicationKey => ErrorKind::MissingApplicationKey,
            StoreError::MissingEncryptionKey => ErrorKind::MissingEncryptionKey,
            StoreError::NotEncrypted => ErrorKind::NotEncrypted,
            StoreError::UnknownKey(_) => ErrorKind::UnknownKey,
            StoreError::Crypto => ErrorKind::CryptoFailure,
            StoreError::InvalidItem(_) => ErrorKind::InvalidItem,
            StoreError::MissingItem(_) => ErrorKind::MissingItem,
            StoreError::VersionMismatch { .. } => ErrorKind::LocalDbVersionMismatch,
            StoreError::WriteConflict => ErrorKind::WriteConflict,
            StoreError::Database(_) | StoreError::Serialization(_) | StoreError::Io(_) | StoreError::Generic(_) => {
                ErrorKind::GenericError
            }
        }
    }

    /// Field violations when this is an `InvalidItem` error.
    #[must_use]
    pub const fn validation(&self) -> Option<&ValidationError> {
        match self {
            StoreError::InvalidItem(err) => Some(err),
            _ => None,
        }
    }
}

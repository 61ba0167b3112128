use crate::backend::DEFAULT_GROUP;
use crate::error::{Result, StoreError};
use crate::kdf::ApplicationKey;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Bucket name; names the database file when `path` is unset
    pub bucket: String,

    /// Explicit database file location
    pub path: Option<PathBuf>,

    /// Key-registry group id
    pub group: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            bucket: "lockbox".to_string(),
            path: None,
            group: DEFAULT_GROUP.to_string(),
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Reads a JSON config file. A missing file yields the defaults.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Where the SQLite file lives: `path` if set, else `<data dir>/lockbox/<bucket>.sqlite3`.
    ///
    /// # Errors
    /// Returns an error if no platform data directory exists.
    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(p) = &self.path {
            return Ok(p.clone());
        }
        let base = dirs::data_dir().ok_or_else(|| StoreError::Generic("No data directory found".into()))?;
        Ok(base.join("lockbox").join(format!("{}.sqlite3", self.bucket)))
    }
}

/// Arguments to [`crate::Store::initialize`].
#[derive(Debug, Clone, Default)]
pub struct InitializeOptions {
    /// Required; `None` fails with `MissingApplicationKey`.
    pub app_key: Option<ApplicationKey>,
    /// Salt for key derivation; a random 16-byte salt is generated when unset.
    pub salt: Option<Vec<u8>>,
    /// Re-key an already initialized, unlocked store.
    pub rebase: bool,
}

impl InitializeOptions {
    pub fn new(app_key: impl Into<ApplicationKey>) -> Self {
        Self {
            app_key: Some(app_key.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn salt(mut self, salt: impl Into<Vec<u8>>) -> Self {
        self.salt = Some(salt.into());
        self
    }

    #[must_use]
    pub const fn rebase(mut self, rebase: bool) -> Self {
        self.rebase = rebase;
        self
    }
}

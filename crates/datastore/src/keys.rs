//! Per-item content keys and the encrypted registry blob that carries them.

use crate::crypto::{KeyMaterial, open, seal};
use crate::error::{Result, StoreError};
use crate::kdf::EncryptionKey;
use lockbox_items::{Item, ValidationError, Violation};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use zeroize::Zeroizing;

const REGISTRY_AD: &[u8] = b"lockbox keystore";

#[derive(Serialize, Deserialize)]
struct RegistryDocument {
    keys: BTreeMap<String, KeyMaterial>,
}

#[derive(Default)]
pub struct ItemKeyRegistry {
    encryption_key: Option<EncryptionKey>,
    keys: HashMap<String, KeyMaterial>,
    blob: Option<Vec<u8>>,
}

impl fmt::Debug for ItemKeyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemKeyRegistry")
            .field("unlocked", &self.encryption_key.is_some())
            .field("keys", &self.keys.len())
            .field("has_blob", &self.blob.is_some())
            .finish()
    }
}

impl ItemKeyRegistry {
    /// A locked registry around a previously persisted blob.
    #[must_use]
    pub fn with_blob(blob: Option<Vec<u8>>) -> Self {
        Self {
            blob,
            ..Self::default()
        }
    }

    /// A registry ready for use under `key`, seeded with `keys`.
    #[must_use]
    pub fn with_keys(key: EncryptionKey, keys: HashMap<String, KeyMaterial>) -> Self {
        Self {
            encryption_key: Some(key),
            keys,
            blob: None,
        }
    }

    #[must_use]
    pub fn blob(&self) -> Option<&[u8]> {
        self.blob.as_deref()
    }

    pub fn set_blob(&mut self, blob: Option<Vec<u8>>) {
        self.blob = blob;
    }

    #[must_use]
    pub const fn has_encryption_key(&self) -> bool {
        self.encryption_key.is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Decrypts the blob and replaces the key map with its contents.
    ///
    /// Uses `key` when given, otherwise the key already held. The map is only replaced
    /// once the whole blob has decrypted and parsed.
    ///
    /// # Errors
    /// - [`StoreError::MissingEncryptionKey`] if no key is available.
    /// - [`StoreError::NotEncrypted`] if there is no blob.
    /// - [`StoreError::Crypto`] if the blob does not authenticate under the key.
    pub fn load(&mut self, key: Option<EncryptionKey>) -> Result<()> {
        let key = key
            .or_else(|| self.encryption_key.clone())
            .ok_or(StoreError::MissingEncryptionKey)?;
        let blob = self.blob.as_deref().ok_or(StoreError::NotEncrypted)?;

        let plaintext = open(key.material(), blob, REGISTRY_AD)?;
        let doc: RegistryDocument = serde_json::from_slice(&plaintext)?;

        self.keys = doc.keys.into_iter().collect();
        self.encryption_key = Some(key);
        Ok(())
    }

    /// Encrypts the current key map under the held key and keeps the result as the blob.
    ///
    /// # Errors
    /// - [`StoreError::MissingEncryptionKey`] if no key is held.
    pub fn save(&mut self) -> Result<&[u8]> {
        let key = self.encryption_key.as_ref().ok_or(StoreError::MissingEncryptionKey)?;
        let doc = RegistryDocument {
            keys: self.keys.iter().map(|(id, k)| (id.clone(), k.clone())).collect(),
        };
        let plaintext = Zeroizing::new(serde_json::to_vec(&doc)?);
        let blob = self.blob.insert(seal(key.material(), &plaintext, REGISTRY_AD)?);
        Ok(blob.as_slice())
    }

    /// Forgets every key held in memory. With `drop_blob`, the blob goes too and the
    /// registry can never be loaded again.
    pub fn clear(&mut self, drop_blob: bool) {
        self.keys.clear();
        self.encryption_key = None;
        if drop_blob {
            self.blob = None;
        }
    }

    /// Copies out the key map, e.g. to carry it across a re-key.
    #[must_use]
    pub fn export_keys(&self) -> HashMap<String, KeyMaterial> {
        self.keys.clone()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&KeyMaterial> {
        self.keys.get(id)
    }

    /// Returns the key for `id`, generating it only if none exists yet.
    ///
    /// # Errors
    /// Returns an error if a new key is needed and the RNG fails.
    pub fn add(&mut self, id: &str) -> Result<&KeyMaterial> {
        match self.keys.entry(id.to_string()) {
            Entry::Occupied(e) => Ok(e.into_mut()),
            Entry::Vacant(v) => Ok(v.insert(KeyMaterial::random()?)),
        }
    }

    /// Puts a previously removed key back.
    pub fn restore(&mut self, id: &str, key: KeyMaterial) {
        self.keys.insert(id.to_string(), key);
    }

    pub fn delete(&mut self, id: &str) -> Option<KeyMaterial> {
        self.keys.remove(id)
    }

    /// Encrypts `item` under its own key, creating the key on first use.
    ///
    /// # Errors
    /// - [`StoreError::InvalidItem`] if the item has no identifier.
    pub fn protect(&mut self, item: &Item) -> Result<Vec<u8>> {
        if item.id.is_empty() {
            return Err(ValidationError::single("id", Violation::MissingRequired).into());
        }
        let plaintext = Zeroizing::new(serde_json::to_vec(item)?);
        let key = self.add(&item.id)?;
        seal(key, &plaintext, item.id.as_bytes())
    }

    /// Decrypts the payload stored for `id`.
    ///
    /// # Errors
    /// - [`StoreError::UnknownKey`] if no key exists for `id`.
    /// - [`StoreError::Crypto`] if the payload does not authenticate.
    pub fn unprotect(&self, id: &str, ciphertext: &[u8]) -> Result<Item> {
        let key = self.get(id).ok_or_else(|| StoreError::UnknownKey(id.to_string()))?;
        let plaintext = open(key, ciphertext, id.as_bytes())?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

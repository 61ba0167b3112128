//! Application key → purpose-bound keys.
//!
//! HKDF-SHA256 runs twice over the same application key and salt with distinct
//! context strings, so the encryption key and the hashing key are independent.

use crate::crypto::{KEY_LEN, KeyMaterial, keyed_digest};
use crate::error::{Result, StoreError};
use hkdf::Hkdf;
use sha2::Sha256;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

pub const ENCRYPT_CONTEXT: &[u8] = b"lockbox encrypt";
pub const HASHING_CONTEXT: &[u8] = b"lockbox hashing";
pub const DEFAULT_SALT_LEN: usize = 16;

/// Secret supplied by the embedding application. Held in memory only.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ApplicationKey(Vec<u8>);

impl ApplicationKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&[u8]> for ApplicationKey {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<&str> for ApplicationKey {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

impl fmt::Debug for ApplicationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApplicationKey(..)")
    }
}

/// Protects the key-registry blob.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptionKey(KeyMaterial);

impl EncryptionKey {
    #[must_use]
    pub const fn material(&self) -> &KeyMaterial {
        &self.0
    }
}

/// Reserved for integrity and indexing digests; CRUD paths do not need it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HashingKey(KeyMaterial);

impl HashingKey {
    /// Keyed digest of `data`.
    ///
    /// # Errors
    /// Propagates MAC setup failures.
    pub fn digest(&self, data: &[u8]) -> Result<[u8; 32]> {
        keyed_digest(&self.0, data)
    }
}

#[derive(Debug)]
pub struct DerivedKeys {
    pub encryption: EncryptionKey,
    pub hashing: HashingKey,
}

/// Derives the encryption and hashing keys for `app_key` and `salt`.
///
/// Deterministic: the same inputs always produce the same pair, which is what lets
/// `unlock` after a restart reproduce the keys chosen at `initialize`.
///
/// # Errors
/// - [`StoreError::MissingApplicationKey`] if `app_key` is absent or empty.
/// - [`StoreError::Generic`] if HKDF rejects the requested output length.
pub fn derive(app_key: Option<&ApplicationKey>, salt: &[u8]) -> Result<DerivedKeys> {
    let app_key = app_key
        .filter(|k| !k.as_bytes().is_empty())
        .ok_or(StoreError::MissingApplicationKey)?;
    let hk = Hkdf::<Sha256>::new(Some(salt), app_key.as_bytes());
    Ok(DerivedKeys {
        encryption: EncryptionKey(expand(&hk, ENCRYPT_CONTEXT)?),
        hashing: HashingKey(expand(&hk, HASHING_CONTEXT)?),
    })
}

fn expand(hk: &Hkdf<Sha256>, info: &[u8]) -> Result<KeyMaterial> {
    let mut okm = Zeroizing::new([0u8; KEY_LEN]);
    hk.expand(info, &mut okm[..])
        .map_err(|e| StoreError::Generic(format!("Key derivation failed: {e}")))?;
    Ok(KeyMaterial::from_bytes(*okm))
}

/// Fresh random salt for a new store.
///
/// # Errors
/// Returns an error if the system RNG fails.
pub fn generate_salt() -> Result<Vec<u8>> {
    let mut salt = vec![0u8; DEFAULT_SALT_LEN];
    crate::crypto::fill_random(&mut salt)?;
    Ok(salt)
}

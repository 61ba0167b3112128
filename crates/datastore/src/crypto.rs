use crate::error::{Result, StoreError};
use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

pub type HmacSha256 = Hmac<Sha256>;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;
const ENVELOPE_VERSION: u8 = 1;

/// 256-bit symmetric key. Zeroized on drop and never printed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial([u8; KEY_LEN]);

impl KeyMaterial {
    #[must_use]
    pub const fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Generates a key from the operating system RNG.
    ///
    /// # Errors
    /// Returns an error if the system fails to provide random bytes.
    pub fn random() -> Result<Self> {
        let mut k = [0u8; KEY_LEN];
        fill_random(&mut k)?;
        Ok(Self(k))
    }

    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("KeyMaterial(..)")
    }
}

/// Fills `buf` with bytes from the operating system RNG.
///
/// # Errors
/// Returns an error if the system fails to provide random bytes.
pub fn fill_random(buf: &mut [u8]) -> Result<()> {
    getrandom::fill(buf).map_err(|e| StoreError::Generic(format!("Failed to get random bytes: {e}")))
}

/// Encrypts `plaintext` with XChaCha20-Poly1305 under `key`, binding `ad`.
///
/// Output layout is `version (1) || nonce (24) || ciphertext + tag`. A fresh random
/// nonce is drawn for every call, so sealing the same plaintext twice gives different bytes.
///
/// # Errors
/// Returns an error if nonce generation or encryption fails.
pub fn seal(key: &KeyMaterial, plaintext: &[u8], ad: &[u8]) -> Result<Vec<u8>> {
    let aead = XChaCha20Poly1305::new((&key.0).into());
    let mut nonce = [0u8; NONCE_LEN];
    fill_random(&mut nonce)?;
    let ct = aead
        .encrypt(XNonce::from_slice(&nonce), Payload { msg: plaintext, aad: ad })
        .map_err(|_| StoreError::Generic("encrypt failed".into()))?;

    let mut out = Vec::with_capacity(1 + NONCE_LEN + ct.len());
    out.push(ENVELOPE_VERSION);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ct);
    Ok(out)
}

/// Reverses [`seal`].
///
/// # Errors
/// Returns [`StoreError::Crypto`] for a wrong key, mismatched `ad`, unknown envelope
/// version, truncated input or any tampering.
pub fn open(key: &KeyMaterial, envelope: &[u8], ad: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let Some((&version, rest)) = envelope.split_first() else {
        return Err(StoreError::Crypto);
    };
    if version != ENVELOPE_VERSION || rest.len() < NONCE_LEN {
        return Err(StoreError::Crypto);
    }
    let (nonce, ct) = rest.split_at(NONCE_LEN);
    let aead = XChaCha20Poly1305::new((&key.0).into());
    let pt = aead
        .decrypt(XNonce::from_slice(nonce), Payload { msg: ct, aad: ad })
        .map_err(|_| StoreError::Crypto)?;
    Ok(Zeroizing::new(pt))
}

/// HMAC-SHA256 of `data` under `key`.
///
/// # Errors
/// Returns an error if the MAC cannot be keyed (never for 32-byte keys).
pub fn keyed_digest(key: &KeyMaterial, data: &[u8]) -> Result<[u8; 32]> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(&key.0).map_err(|e| StoreError::Generic(e.to_string()))?;
    mac.update(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_keymaterial_random_and_length() {
        let k1 = KeyMaterial::random().unwrap();
        let k2 = KeyMaterial::random().unwrap();
        assert_eq!(k1.as_bytes().len(), KEY_LEN);
        // Very likely different
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_debug_does_not_leak_key_bytes() {
        let k = KeyMaterial::from_bytes([0xAB; KEY_LEN]);
        let printed = format!("{k:?}");
        assert_eq!(printed, "KeyMaterial(..)");
    }

    #[test]
    fn test_seal_open_roundtrip_with_ad() {
        let key = KeyMaterial::random().unwrap();
        let sealed = seal(&key, b"secret message", b"associated-data").unwrap();
        assert_eq!(sealed[0], ENVELOPE_VERSION);
        let pt = open(&key, &sealed, b"associated-data").unwrap();
        assert_eq!(pt.as_slice(), b"secret message");
    }

    #[test]
    fn test_seal_uses_fresh_nonce() {
        let key = KeyMaterial::random().unwrap();
        let a = seal(&key, b"same", b"").unwrap();
        let b = seal(&key, b"same", b"").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_open_wrong_ad_fails() {
        let key = KeyMaterial::random().unwrap();
        let sealed = seal(&key, b"message", b"ad-ok").unwrap();
        let err = open(&key, &sealed, b"ad-bad").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CryptoFailure);
    }

    #[test]
    fn test_open_wrong_key_fails() {
        let key1 = KeyMaterial::random().unwrap();
        let key2 = KeyMaterial::random().unwrap();
        let sealed = seal(&key1, b"data", b"ad").unwrap();
        assert!(matches!(open(&key2, &sealed, b"ad"), Err(StoreError::Crypto)));
    }

    #[test]
    fn test_tamper_and_truncation_detection() {
        let key = KeyMaterial::random().unwrap();
        let mut sealed = seal(&key, b"payload", b"ad").unwrap();

        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(open(&key, &sealed, b"ad"), Err(StoreError::Crypto)));

        assert!(matches!(open(&key, &[], b"ad"), Err(StoreError::Crypto)));
        assert!(matches!(open(&key, &[ENVELOPE_VERSION, 1, 2], b"ad"), Err(StoreError::Crypto)));
    }

    #[test]
    fn test_unknown_envelope_version_rejected() {
        let key = KeyMaterial::random().unwrap();
        let mut sealed = seal(&key, b"payload", b"").unwrap();
        sealed[0] = 0x7F;
        assert!(matches!(open(&key, &sealed, b""), Err(StoreError::Crypto)));
    }

    #[test]
    fn test_keyed_digest_is_stable_and_key_dependent() {
        let k1 = KeyMaterial::from_bytes([1; KEY_LEN]);
        let k2 = KeyMaterial::from_bytes([2; KEY_LEN]);
        assert_eq!(keyed_digest(&k1, b"data").unwrap(), keyed_digest(&k1, b"data").unwrap());
        assert_ne!(keyed_digest(&k1, b"data").unwrap(), keyed_digest(&k2, b"data").unwrap());
    }
}

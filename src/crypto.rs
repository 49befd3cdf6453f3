//! Low-level cryptographic operations.
//!
//! This is the only module in the crate that imports `ring` directly.
//! Everything else encrypts, decrypts and generates key material through the
//! functions and operation types exposed here.
//!
//! Primitive choices:
//! - **Cipher**: AES-256-GCM (authenticated encryption, 128-bit tag)
//! - **IV**: 96-bit (12 bytes), generated fresh per encryption via `SystemRandom`
//! - **Key size**: 256 bits (32 bytes)
//!
//! Decryption is split into two types. A [`PendingDecryption`] is bound to a
//! key and an IV but cannot decrypt anything. Only the authenticator can turn
//! it into an [`AuthorizedDecryption`], which is consumed by its single use.

use std::fmt;

use ring::aead::{self, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use zeroize::Zeroizing;

use crate::error::VaultError;
use crate::keys::SecretKeyHandle;

/// The AEAD algorithm used throughout sharevault.
const ALGORITHM: &aead::Algorithm = &AES_256_GCM;

/// Size of the initialization vector in bytes (96 bits).
pub const IV_LEN: usize = 12;

/// Size of the GCM authentication tag in bytes (128 bits).
pub const TAG_LEN: usize = 16;

/// Size of a share key in bytes (256 bits).
pub const KEY_LEN: usize = 32;

fn bind_key(key: &SecretKeyHandle) -> Option<LessSafeKey> {
    UnboundKey::new(ALGORITHM, key.as_bytes())
        .ok()
        .map(LessSafeKey::new)
}

/// Generate a cryptographically secure random IV.
///
/// A fresh IV is generated for every encryption call. There is no caching or
/// counter-based generation.
fn generate_iv() -> Option<[u8; IV_LEN]> {
    let rng = SystemRandom::new();
    let mut buf = [0u8; IV_LEN];
    rng.fill(&mut buf).ok()?;
    Some(buf)
}

/// Encrypt `plaintext` under `key` with a fresh random IV.
///
/// Returns the IV and the ciphertext with the GCM tag appended.
pub(crate) fn encrypt(
    key: &SecretKeyHandle,
    plaintext: &[u8],
) -> Result<([u8; IV_LEN], Vec<u8>), VaultError> {
    let key = bind_key(key).ok_or_else(|| VaultError::Save("unusable key".into()))?;
    let iv = generate_iv().ok_or_else(|| VaultError::Save("randomness source failed".into()))?;

    let mut output = Vec::with_capacity(plaintext.len() + TAG_LEN);
    output.extend_from_slice(plaintext);
    key.seal_in_place_append_tag(
        Nonce::assume_unique_for_key(iv),
        aead::Aad::empty(),
        &mut output,
    )
    .map_err(|_| VaultError::Save("encryption failed".into()))?;

    Ok((iv, output))
}

/// Generate a cryptographically secure random key.
pub(crate) fn generate_random_key() -> Option<Zeroizing<[u8; KEY_LEN]>> {
    let rng = SystemRandom::new();
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    rng.fill(&mut key[..]).ok()?;
    Some(key)
}

/// A decryption operation bound to a key and IV, not yet authorized.
///
/// This is the crypto object handed to the [`crate::gate::Authenticator`].
/// It has no way to decrypt until [`PendingDecryption::authorize`] is called.
pub struct PendingDecryption {
    key: LessSafeKey,
    iv: [u8; IV_LEN],
    /// Gate request this operation was issued for. Zero until dispatched.
    request: u64,
}

impl PendingDecryption {
    /// Bind a decryption operation to `key` and the payload's `iv`.
    ///
    /// Fails with `CipherPrep` if the IV is not exactly `IV_LEN` bytes or the
    /// key cannot be bound to the cipher.
    pub(crate) fn prepare(key: &SecretKeyHandle, iv: &[u8]) -> Result<Self, VaultError> {
        let iv: [u8; IV_LEN] = iv.try_into().map_err(|_| VaultError::CipherPrep)?;
        let key = bind_key(key).ok_or(VaultError::CipherPrep)?;
        Ok(Self { key, iv, request: 0 })
    }

    /// Tie the operation to the gate request it is handed out with.
    pub(crate) fn issued_for(mut self, request: u64) -> Self {
        self.request = request;
        self
    }

    /// Mark the operation as authorized.
    ///
    /// Only authenticator implementations call this, and only after the user
    /// has been verified for this specific operation.
    pub fn authorize(self) -> AuthorizedDecryption {
        AuthorizedDecryption { inner: self }
    }
}

impl fmt::Debug for PendingDecryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingDecryption").finish_non_exhaustive()
    }
}

/// A decryption operation the authenticator has authorized. Single use.
pub struct AuthorizedDecryption {
    inner: PendingDecryption,
}

impl AuthorizedDecryption {
    pub(crate) fn request(&self) -> u64 {
        self.inner.request
    }

    /// Decrypt `ciphertext` (including its GCM tag).
    ///
    /// If the key is wrong or the ciphertext, tag or IV has been tampered
    /// with, authentication fails and no partial plaintext is returned.
    pub(crate) fn decrypt(self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        let PendingDecryption { key, iv, .. } = self.inner;
        let mut buffer = Zeroizing::new(ciphertext.to_vec());
        let len = key
            .open_in_place(
                Nonce::assume_unique_for_key(iv),
                aead::Aad::empty(),
                buffer.as_mut_slice(),
            )
            .map_err(|_| VaultError::Decrypt)?
            .len();
        buffer.truncate(len);
        Ok(buffer)
    }
}

impl fmt::Debug for AuthorizedDecryption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthorizedDecryption").finish_non_exhaustive()
    }
}

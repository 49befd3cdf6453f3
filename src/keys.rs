//! Device-bound key handles and the key store capability.
//!
//! This module owns three responsibilities:
//! 1. Turning a caller-supplied key id into a storage key and key-store alias.
//! 2. Holding key material in a handle that is opaque, non-cloneable,
//!    not serialisable and zeroised on drop.
//! 3. Defining [`SecretKeyStore`], the narrow interface to the platform's
//!    hardware-backed key store, plus a software [`MemoryKeyStore`].
//!
//! ## Alias structure
//!
//! ```text
//! alias       = alias_prefix   + sanitize(key_id)
//! storage key = storage_prefix + sanitize(key_id)
//! sanitize    = every char outside [A-Za-z0-9_] becomes '_'
//! ```
//!
//! Two raw ids that sanitise to the same string share one alias and one
//! stored blob.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use crate::crypto::{self, KEY_LEN};
use crate::error::KeyStoreError;

/// Replace every character outside `[A-Za-z0-9_]` with `_`.
pub fn sanitize_key_id(key_id: &str) -> String {
    key_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

// ---------------------------------------------------------------------------
// Key handle
// ---------------------------------------------------------------------------

/// An opaque reference to a device-bound symmetric key.
///
/// - Not `Clone`, not `Serialize`. Raw bytes never leave the crate.
/// - Zeroised on drop.
/// - `Debug` prints the alias only.
pub struct SecretKeyHandle {
    alias: String,
    bytes: [u8; KEY_LEN],
}

impl SecretKeyHandle {
    /// Wrap key material released by a platform key store.
    ///
    /// Intended for [`SecretKeyStore`] implementations only.
    pub fn from_bytes(alias: impl Into<String>, bytes: [u8; KEY_LEN]) -> Self {
        Self {
            alias: alias.into(),
            bytes,
        }
    }

    /// The key-store alias this handle was issued for.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// `pub(crate)`: only the cipher module reads the raw bytes.
    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl Drop for SecretKeyHandle {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for SecretKeyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretKeyHandle")
            .field("alias", &self.alias)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Key policy
// ---------------------------------------------------------------------------

/// Which authenticators may authorize use of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllowedAuthenticators {
    pub strong_biometric: bool,
    pub device_credential: bool,
}

impl Default for AllowedAuthenticators {
    fn default() -> Self {
        Self {
            strong_biometric: true,
            device_credential: true,
        }
    }
}

/// Generation policy for a share key. The defaults are the only policy the
/// vault requests; platform adapters translate it into their own parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyPolicy {
    pub encrypt: bool,
    pub decrypt: bool,
    pub randomized_encryption: bool,
    /// Every decryption needs a fresh authentication.
    pub user_authentication_required: bool,
    pub unlocked_device_required: bool,
    pub invalidated_by_biometric_enrollment: bool,
    pub allowed: AllowedAuthenticators,
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self {
            encrypt: true,
            decrypt: true,
            randomized_encryption: true,
            user_authentication_required: true,
            unlocked_device_required: true,
            invalidated_by_biometric_enrollment: true,
            allowed: AllowedAuthenticators::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Key store capability
// ---------------------------------------------------------------------------

/// Capability over the platform's device-bound key store.
pub trait SecretKeyStore: Send + Sync {
    /// Return the key for `alias`, generating it under `policy` if the store
    /// has no usable secret-key entry.
    fn get_or_create(
        &self,
        alias: &str,
        policy: &KeyPolicy,
    ) -> Result<SecretKeyHandle, KeyStoreError>;

    /// Return the key for `alias` if present and usable. Never creates.
    /// Absence is `Ok(None)`; only unexpected platform failures are errors.
    fn get_existing(&self, alias: &str) -> Result<Option<SecretKeyHandle>, KeyStoreError>;

    /// Delete the key for `alias`. Deleting a missing alias is not an error.
    fn delete(&self, alias: &str) -> Result<(), KeyStoreError>;
}

struct StoredKey {
    policy: KeyPolicy,
    bytes: Zeroizing<[u8; KEY_LEN]>,
}

/// A process-local software key store.
///
/// Useful for tests and for hosts without a hardware key store. Keys never
/// leave this struct except as [`SecretKeyHandle`]s.
#[derive(Default)]
pub struct MemoryKeyStore {
    entries: Mutex<HashMap<String, StoredKey>>,
    created: AtomicU64,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a biometric enrollment change: every key whose policy says so
    /// is invalidated and disappears from the store.
    pub fn invalidate_biometric_enrollment(&self) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, key| !key.policy.invalidated_by_biometric_enrollment);
        let dropped = before - entries.len();
        if dropped > 0 {
            tracing::info!(dropped, "keys invalidated by enrollment change");
        }
        dropped
    }

    /// How many keys this store has generated over its lifetime.
    pub fn keys_created(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    pub fn contains(&self, alias: &str) -> bool {
        self.entries.lock().contains_key(alias)
    }

    fn handle(alias: &str, key: &StoredKey) -> SecretKeyHandle {
        SecretKeyHandle::from_bytes(alias, *key.bytes)
    }
}

impl SecretKeyStore for MemoryKeyStore {
    fn get_or_create(
        &self,
        alias: &str,
        policy: &KeyPolicy,
    ) -> Result<SecretKeyHandle, KeyStoreError> {
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.get(alias) {
            return Ok(Self::handle(alias, existing));
        }
        if !(policy.encrypt && policy.decrypt) {
            return Err(KeyStoreError(
                "share keys must allow encryption and decryption".into(),
            ));
        }

        let bytes = crypto::generate_random_key()
            .ok_or_else(|| KeyStoreError("randomness source failed".into()))?;
        let key = StoredKey {
            policy: policy.clone(),
            bytes,
        };
        let handle = Self::handle(alias, &key);
        entries.insert(alias.to_string(), key);
        self.created.fetch_add(1, Ordering::SeqCst);
        tracing::info!(alias, "generated share key");
        Ok(handle)
    }

    fn get_existing(&self, alias: &str) -> Result<Option<SecretKeyHandle>, KeyStoreError> {
        Ok(self
            .entries
            .lock()
            .get(alias)
            .map(|key| Self::handle(alias, key)))
    }

    fn delete(&self, alias: &str) -> Result<(), KeyStoreError> {
        self.entries.lock().remove(alias);
        Ok(())
    }
}

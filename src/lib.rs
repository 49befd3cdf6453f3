//! # sharevault
//!
//! Biometric-gated, device-bound encrypted storage for small secret shares.
//!
//! A share is encrypted with AES-256-GCM under a key that lives in the
//! platform's key store, framed as `iv || ciphertext` and persisted as text
//! in a host blob store. Reading it back requires a fresh user
//! authentication: the vault prepares a decryption operation, hands it to
//! the platform authenticator through a single-flight gate, and decrypts
//! only with the operation the authenticator hands back.
//!
//! ## Public API
//!
//! The public surface is intentionally narrow: [`ShareVault`] and the
//! capability traits a host implements ([`SecretKeyStore`], [`BlobStore`],
//! [`Authenticator`]). Software implementations of the key and blob stores
//! are included for tests and hosts without hardware backing.

pub mod audit;
pub mod config;
pub(crate) mod crypto;
pub mod error;
pub mod gate;
pub mod keys;
pub mod payload;
pub mod store;
pub mod vault;

pub use config::VaultConfig;
pub use crypto::{AuthorizedDecryption, PendingDecryption, IV_LEN, KEY_LEN, TAG_LEN};
pub use error::{AuthFailure, KeyStoreError, StorageError, VaultError};
pub use gate::{
    AuthCallback, AuthErrorCode, AuthGate, Authenticator, GateState, LaunchError, LoadResult,
    PromptRequest,
};
pub use keys::{
    sanitize_key_id, AllowedAuthenticators, KeyPolicy, MemoryKeyStore, SecretKeyHandle,
    SecretKeyStore,
};
pub use store::{BlobStore, JsonFileBlobStore, MemoryBlobStore};
pub use vault::{LoadShare, ShareVault};

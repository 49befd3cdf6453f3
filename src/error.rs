//! Error types for sharevault.
//!
//! Every variant of [`VaultError`] is a distinct failure mode that the
//! embedding application can tell apart by its bridge code. Messages are
//! intentionally minimal. They signal *what* failed and never carry
//! plaintext, key bytes or ciphertext.

use std::fmt;

use crate::gate::AuthErrorCode;

/// The single error type surfaced by [`crate::ShareVault`].
#[derive(Debug)]
pub enum VaultError {
    /// Encrypting or persisting a share failed.
    Save(String),

    /// An authentication flow is already in flight on this vault.
    Busy,

    /// No host UI context is available to present the authenticator.
    NoContext,

    /// The platform key store is unavailable or returned something unusable.
    KeyStore(String),

    /// The stored blob is not valid base64 or is shorter than `IV_LEN + 1`.
    InvalidPayload,

    /// The decryption operation could not be constructed.
    CipherPrep,

    /// The authenticator reported cancellation, lockout or a hardware
    /// failure, or settled without an authorized operation.
    Auth(AuthFailure),

    /// Authorized decryption failed: tampered data or the wrong key.
    Decrypt,

    /// The authenticator UI could not be launched.
    Prompt(String),
}

impl VaultError {
    /// Stable code handed across the bridge to the embedding application.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Save(_) => "ERR_SAVE_SHARE",
            Self::Busy => "ERR_BUSY",
            Self::NoContext => "ERR_NO_ACTIVITY",
            Self::KeyStore(_) => "ERR_KEYSTORE",
            Self::InvalidPayload => "ERR_INVALID_PAYLOAD",
            Self::CipherPrep => "ERR_CIPHER",
            Self::Auth(_) => "ERR_AUTH",
            Self::Decrypt => "ERR_DECRYPT",
            Self::Prompt(_) => "ERR_PROMPT",
        }
    }
}

impl fmt::Display for VaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Save(reason) => write!(f, "failed to encrypt share: {}", reason),
            Self::Busy => write!(f, "another authentication request is already in progress"),
            Self::NoContext => write!(f, "unable to access a host context for the authenticator"),
            Self::KeyStore(reason) => write!(f, "failed to access keystore: {}", reason),
            Self::InvalidPayload => write!(f, "encrypted payload malformed or too short"),
            Self::CipherPrep => write!(f, "failed to prepare cipher"),
            Self::Auth(failure) => write!(f, "authentication failed: {}", failure),
            Self::Decrypt => write!(f, "failed to decrypt share"),
            Self::Prompt(reason) => write!(f, "failed to launch authenticator: {}", reason),
        }
    }
}

impl std::error::Error for VaultError {}

/// Why an authentication flow ended without an authorized operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFailure {
    pub code: AuthErrorCode,
    pub message: String,
}

impl AuthFailure {
    pub fn new(code: AuthErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// True when the user or the system dismissed the prompt, as opposed to
    /// a lockout, hardware fault or missing crypto object.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self.code,
            AuthErrorCode::Canceled | AuthErrorCode::UserCanceled | AuthErrorCode::NegativeButton
        )
    }
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.message, self.code)
    }
}

/// Failure reported by a [`crate::keys::SecretKeyStore`] implementation.
#[derive(Debug, Clone)]
pub struct KeyStoreError(pub String);

impl fmt::Display for KeyStoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "key store: {}", self.0)
    }
}

impl std::error::Error for KeyStoreError {}

/// Failure reported by a [`crate::store::BlobStore`] implementation.
#[derive(Debug, Clone)]
pub struct StorageError(pub String);

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "blob store: {}", self.0)
    }
}

impl std::error::Error for StorageError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct() {
        let errors = [
            VaultError::Save("x".into()),
            VaultError::Busy,
            VaultError::NoContext,
            VaultError::KeyStore("x".into()),
            VaultError::InvalidPayload,
            VaultError::CipherPrep,
            VaultError::Auth(AuthFailure::new(AuthErrorCode::Lockout, "locked")),
            VaultError::Decrypt,
            VaultError::Prompt("x".into()),
        ];
        let mut codes: Vec<_> = errors.iter().map(|e| e.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_cancellation_classification() {
        assert!(AuthFailure::new(AuthErrorCode::UserCanceled, "").is_cancellation());
        assert!(AuthFailure::new(AuthErrorCode::NegativeButton, "").is_cancellation());
        assert!(!AuthFailure::new(AuthErrorCode::LockoutPermanent, "").is_cancellation());
        assert!(!AuthFailure::new(AuthErrorCode::MissingCryptoObject, "").is_cancellation());
    }
}

//! The share vault.
//!
//! Orchestrates the key store, the payload codec, the blob store and the
//! authentication gate:
//!
//! - **save**: get-or-create key, encrypt, frame, persist.
//! - **load**: fetch, reserve the gate, decode, look up the key, prepare the
//!   decryption, hand it to the authenticator, decrypt once authorized.
//! - **remove**: delete the blob, then the key. Neither failure reaches the
//!   caller.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use base64::{engine::general_purpose, Engine as _};
use parking_lot::Mutex;
use tokio::sync::oneshot::{self, error::TryRecvError};
use zeroize::Zeroizing;

use crate::audit::{AccessEvent, AccessRecord, AuditLog, AuditSink};
use crate::config::VaultConfig;
use crate::crypto::{self, PendingDecryption};
use crate::error::{AuthFailure, VaultError};
use crate::gate::{
    AuthErrorCode, AuthGate, Authenticator, LoadResult, PendingAuthRequest, PromptRequest,
};
use crate::keys::{sanitize_key_id, SecretKeyStore};
use crate::payload;
use crate::store::BlobStore;

/// Biometric-gated storage for secret shares.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct ShareVault {
    config: VaultConfig,
    keys: Arc<dyn SecretKeyStore>,
    blobs: Arc<dyn BlobStore>,
    authenticator: Arc<dyn Authenticator>,
    gate: AuthGate,
    audit: Arc<Mutex<AuditLog>>,
    alias_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ShareVault {
    pub fn new(
        config: VaultConfig,
        keys: Arc<dyn SecretKeyStore>,
        blobs: Arc<dyn BlobStore>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        let audit = Arc::new(Mutex::new(AuditLog::new()));
        Self {
            config,
            keys,
            blobs,
            authenticator,
            gate: AuthGate::new(Arc::clone(&audit)),
            audit,
            alias_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &VaultConfig {
        &self.config
    }

    pub fn gate(&self) -> &AuthGate {
        &self.gate
    }

    /// Add a sink to receive a copy of every access record.
    pub fn add_audit_sink(&self, sink: Box<dyn AuditSink>) {
        self.audit.lock().add_forward_sink(sink);
    }

    /// Snapshot of the access log.
    pub fn audit_records(&self) -> Vec<AccessRecord> {
        self.audit.lock().iter().cloned().collect()
    }

    fn record(&self, key_id: &str, event: AccessEvent) {
        self.audit.lock().append(AccessRecord::now(key_id, event));
    }

    /// Run `f` holding the lock for `alias`, so saves and removes never race
    /// on one key-store alias. The entry is dropped again once no other
    /// caller holds or waits on it.
    fn with_alias_lock<T>(&self, alias: &str, f: impl FnOnce() -> T) -> T {
        let lock = Arc::clone(
            self.alias_locks
                .lock()
                .entry(alias.to_string())
                .or_default(),
        );
        let out = {
            let _held = lock.lock();
            f()
        };

        let mut locks = self.alias_locks.lock();
        // One reference in the map, one here.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(alias);
        }
        out
    }

    // -----------------------------------------------------------------------
    // save
    // -----------------------------------------------------------------------

    /// Encrypt and persist a base64-encoded share under `key_id`.
    pub fn save_share(&self, key_id: &str, plaintext_base64: &str) -> Result<(), VaultError> {
        let plaintext = general_purpose::STANDARD
            .decode(plaintext_base64.trim())
            .map(Zeroizing::new)
            .map_err(|_| VaultError::Save("share is not valid base64".into()))?;
        self.save_share_bytes(key_id, &plaintext)
    }

    /// Encrypt and persist raw share bytes under `key_id`.
    pub fn save_share_bytes(&self, key_id: &str, plaintext: &[u8]) -> Result<(), VaultError> {
        let alias = self.config.alias(key_id);
        self.with_alias_lock(&alias, || self.save_locked(key_id, &alias, plaintext))
    }

    fn save_locked(&self, key_id: &str, alias: &str, plaintext: &[u8]) -> Result<(), VaultError> {
        let sanitized = sanitize_key_id(key_id);
        let key = self
            .keys
            .get_or_create(alias, &self.config.key_policy)
            .map_err(|e| VaultError::Save(e.to_string()))?;
        let (iv, ciphertext) = crypto::encrypt(&key, plaintext)?;
        drop(key);

        let blob = payload::encode(&iv, &ciphertext);
        self.blobs
            .put(&self.config.storage_key(key_id), &payload::to_text(&blob))
            .map_err(|e| VaultError::Save(e.to_string()))?;

        tracing::debug!(key_id = %sanitized, "share saved");
        self.record(&sanitized, AccessEvent::Saved);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // load
    // -----------------------------------------------------------------------

    /// Unlock the share stored under `key_id`.
    ///
    /// Returns immediately. The returned [`LoadShare`] resolves once the
    /// authenticator settles, or at once when the load fails fast. It
    /// resolves to `Ok(None)` when nothing is stored or no key exists.
    pub fn load_share(&self, key_id: &str, prompt_message: Option<&str>) -> LoadShare {
        let sanitized = sanitize_key_id(key_id);
        match self.begin_load(key_id, &sanitized, prompt_message) {
            Ok(Some(receiver)) => LoadShare::waiting(receiver),
            Ok(None) => LoadShare::ready(Ok(None)),
            Err(e) => {
                let event = match e {
                    VaultError::Busy => AccessEvent::Rejected,
                    _ => AccessEvent::Failed {
                        code: e.code().to_string(),
                    },
                };
                tracing::debug!(key_id = %sanitized, code = e.code(), "load failed fast");
                self.record(&sanitized, event);
                LoadShare::ready(Err(e))
            }
        }
    }

    fn begin_load(
        &self,
        key_id: &str,
        sanitized: &str,
        prompt_message: Option<&str>,
    ) -> Result<Option<oneshot::Receiver<LoadResult>>, VaultError> {
        let stored = self
            .blobs
            .get(&self.config.storage_key(key_id))
            .map_err(|e| VaultError::KeyStore(e.to_string()))?;
        let Some(stored) = stored else {
            return Ok(None);
        };

        // Held until dispatch; any early return releases it.
        let reservation = self.gate.reserve()?;

        if !self.authenticator.has_host() {
            return Err(VaultError::NoContext);
        }

        let encrypted = payload::decode(&payload::from_text(&stored)?)?;

        let key = match self.keys.get_existing(&self.config.alias(key_id)) {
            Ok(Some(key)) => key,
            Ok(None) => {
                tracing::debug!(key_id = %sanitized, "blob present but key missing");
                return Ok(None);
            }
            Err(e) => return Err(VaultError::KeyStore(e.to_string())),
        };
        let operation = PendingDecryption::prepare(&key, &encrypted.iv)?;
        drop(key);

        let prompt = PromptRequest {
            title: prompt_message
                .unwrap_or(&self.config.prompt_title)
                .to_string(),
            subtitle: self.config.prompt_subtitle.clone(),
            allowed: self.config.key_policy.allowed,
        };
        let (responder, receiver) = oneshot::channel();
        reservation.dispatch(
            self.authenticator.as_ref(),
            prompt,
            operation,
            PendingAuthRequest {
                key_id: sanitized.to_string(),
                ciphertext: encrypted.ciphertext,
                responder,
            },
        );
        Ok(Some(receiver))
    }

    // -----------------------------------------------------------------------
    // remove
    // -----------------------------------------------------------------------

    /// Delete the stored blob and the key for `key_id`. Always succeeds.
    pub fn remove_share(&self, key_id: &str) {
        let sanitized = sanitize_key_id(key_id);
        let alias = self.config.alias(key_id);
        self.with_alias_lock(&alias, || {
            if let Err(e) = self.blobs.remove(&self.config.storage_key(key_id)) {
                tracing::warn!(key_id = %sanitized, error = %e, "failed to remove stored share");
            }
            if let Err(e) = self.keys.delete(&alias) {
                tracing::warn!(key_id = %sanitized, error = %e, "failed to delete share key");
            }
        });

        tracing::info!(key_id = %sanitized, "share removed");
        self.record(&sanitized, AccessEvent::Removed);
    }
}

impl fmt::Debug for ShareVault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShareVault")
            .field("config", &self.config)
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Result channel
// ---------------------------------------------------------------------------

fn closed() -> VaultError {
    VaultError::Auth(AuthFailure::new(
        AuthErrorCode::Abandoned,
        "result channel closed before the unlock settled",
    ))
}

enum LoadState {
    Ready(Option<LoadResult>),
    Waiting(oneshot::Receiver<LoadResult>),
}

/// The caller's side of a [`ShareVault::load_share`] call.
///
/// Await it, or call [`LoadShare::wait`] from a thread that is not driving
/// an async runtime.
pub struct LoadShare {
    state: LoadState,
}

impl LoadShare {
    fn ready(result: LoadResult) -> Self {
        Self {
            state: LoadState::Ready(Some(result)),
        }
    }

    fn waiting(receiver: oneshot::Receiver<LoadResult>) -> Self {
        Self {
            state: LoadState::Waiting(receiver),
        }
    }

    /// Block the current thread until the load settles.
    pub fn wait(self) -> LoadResult {
        match self.state {
            LoadState::Ready(result) => result.unwrap_or_else(|| Err(closed())),
            LoadState::Waiting(receiver) => receiver.blocking_recv().unwrap_or_else(|_| Err(closed())),
        }
    }

    /// Take the result if the load has settled, without blocking.
    pub fn try_take(&mut self) -> Option<LoadResult> {
        match &mut self.state {
            LoadState::Ready(result) => result.take(),
            LoadState::Waiting(receiver) => match receiver.try_recv() {
                Ok(result) => Some(result),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Closed) => Some(Err(closed())),
            },
        }
    }
}

impl Future for LoadShare {
    type Output = LoadResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<LoadResult> {
        match &mut self.state {
            LoadState::Ready(result) => Poll::Ready(result.take().unwrap_or_else(|| Err(closed()))),
            LoadState::Waiting(receiver) => Pin::new(receiver)
                .poll(cx)
                .map(|received| received.unwrap_or_else(|_| Err(closed()))),
        }
    }
}

impl fmt::Debug for LoadShare {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            LoadState::Ready(_) => "ready",
            LoadState::Waiting(_) => "waiting",
        };
        f.debug_struct("LoadShare").field("state", &state).finish()
    }
}

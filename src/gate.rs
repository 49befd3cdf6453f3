//! Single-flight authentication gate.
//!
//! The gate bridges the platform's asynchronous, callback-driven
//! authenticator back to the caller that asked for a share. It is an
//! explicit state machine over one slot:
//!
//! ```text
//! Idle -> Preparing -> AwaitingAuthenticator -> {Authorized, Denied, Errored} -> Idle
//! ```
//!
//! - `Preparing` is entered by reserving the slot. Reservation and the busy
//!   check are one critical section, so two requests can never both pass it.
//! - `AwaitingAuthenticator` holds the [`PendingAuthRequest`]. The pending
//!   decryption operation travels with the prompt to the authenticator.
//! - The terminal transition takes the request out of the slot and returns
//!   to `Idle` under the slot lock. The access record and the caller's result
//!   are delivered after the lock is released. A request is taken at most
//!   once, so it is resolved at most once.
//!
//! The authenticator is never called with the slot lock held. It may settle
//! the [`AuthCallback`] before `authenticate` returns, or later from any
//! thread.

use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use base64::{engine::general_purpose, Engine as _};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use zeroize::Zeroize;

use crate::audit::{AccessEvent, AccessRecord, AuditLog};
use crate::crypto::{AuthorizedDecryption, PendingDecryption};
use crate::error::{AuthFailure, VaultError};
use crate::keys::AllowedAuthenticators;

/// What a load eventually resolves to: base64 plaintext, or `None` when
/// there is nothing to unlock.
pub type LoadResult = Result<Option<String>, VaultError>;

pub(crate) type Responder = oneshot::Sender<LoadResult>;

// ---------------------------------------------------------------------------
// Platform surface
// ---------------------------------------------------------------------------

/// Observable state of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateState {
    Idle,
    Preparing,
    AwaitingAuthenticator,
    Authorized,
    Denied,
    Errored,
}

/// Error codes an authenticator can report, plus the two the gate raises
/// itself (`MissingCryptoObject`, `Abandoned`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthErrorCode {
    HwUnavailable,
    UnableToProcess,
    Timeout,
    NoSpace,
    Canceled,
    Lockout,
    Vendor,
    LockoutPermanent,
    UserCanceled,
    NoBiometrics,
    HwNotPresent,
    NegativeButton,
    NoDeviceCredential,
    /// The authenticator succeeded without handing back an authorized operation.
    MissingCryptoObject,
    /// The authenticator dropped the request without settling it.
    Abandoned,
    Other(i32),
}

impl AuthErrorCode {
    /// Map a numeric platform error code.
    pub fn from_platform(code: i32) -> Self {
        match code {
            1 => Self::HwUnavailable,
            2 => Self::UnableToProcess,
            3 => Self::Timeout,
            4 => Self::NoSpace,
            5 => Self::Canceled,
            7 => Self::Lockout,
            8 => Self::Vendor,
            9 => Self::LockoutPermanent,
            10 => Self::UserCanceled,
            11 => Self::NoBiometrics,
            12 => Self::HwNotPresent,
            13 => Self::NegativeButton,
            14 => Self::NoDeviceCredential,
            other => Self::Other(other),
        }
    }
}

/// What the authenticator shows the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRequest {
    pub title: String,
    pub subtitle: String,
    pub allowed: AllowedAuthenticators,
}

impl PromptRequest {
    /// Label for the dismiss button, needed only when device credentials are
    /// not offered as a fallback.
    pub fn negative_button(&self) -> Option<&'static str> {
        (!self.allowed.device_credential).then_some("Cancel")
    }
}

/// The authenticator UI could not be launched.
#[derive(Debug, Clone)]
pub struct LaunchError(pub String);

impl fmt::Display for LaunchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Capability over the platform's biometric / device-credential prompt.
pub trait Authenticator: Send + Sync {
    /// Whether a foreground host context exists to present a prompt.
    fn has_host(&self) -> bool;

    /// Present `prompt` for `operation` and report back through `callback`.
    ///
    /// Must return promptly. On success the authenticator calls
    /// [`AuthCallback::succeeded`] with `operation.authorize()`; otherwise
    /// [`AuthCallback::error`]. Failed attempts the prompt will retry are
    /// reported with [`AuthCallback::failed`] and do not end the flow.
    fn authenticate(
        &self,
        prompt: PromptRequest,
        operation: PendingDecryption,
        callback: AuthCallback,
    ) -> Result<(), LaunchError>;
}

// ---------------------------------------------------------------------------
// Slot
// ---------------------------------------------------------------------------

/// The one outstanding unlock: who to answer and what to decrypt.
pub(crate) struct PendingAuthRequest {
    pub(crate) key_id: String,
    pub(crate) ciphertext: Vec<u8>,
    pub(crate) responder: Responder,
}

struct Awaiting {
    id: u64,
    request: PendingAuthRequest,
    /// `authenticate` has not returned yet.
    dispatching: bool,
    /// The callback was dropped while dispatching.
    abandoned: bool,
}

enum Phase {
    Idle,
    Preparing { id: u64 },
    Awaiting(Awaiting),
}

enum Outcome {
    Authorized(Option<AuthorizedDecryption>),
    Failed(AuthFailure),
    Errored(VaultError),
}

struct Slot {
    phase: Phase,
    last_terminal: Option<GateState>,
}

/// Shared by every gate in the process.
static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

struct GateCore {
    slot: Mutex<Slot>,
    audit: Arc<Mutex<AuditLog>>,
}

/// A settled request on its way to the audit log and the caller. Delivered
/// after the slot lock is released.
struct Settlement {
    key_id: String,
    event: AccessEvent,
    responder: Responder,
    result: LoadResult,
}

impl Settlement {
    fn deliver(self, audit: &Mutex<AuditLog>) {
        audit.lock().append(AccessRecord::now(&self.key_id, self.event));
        if let Err(Ok(Some(mut plaintext))) = self.responder.send(self.result) {
            tracing::debug!(key_id = %self.key_id, "caller went away before unlock completed");
            plaintext.zeroize();
        }
    }
}

impl GateCore {
    fn finish(&self, id: u64, outcome: Outcome) {
        let mut slot = self.slot.lock();
        if !matches!(&slot.phase, Phase::Awaiting(a) if a.id == id) {
            tracing::debug!(id, "ignoring settle for a request that is no longer pending");
            return;
        }
        let settled = self.settle(&mut slot, outcome);
        drop(slot);
        self.deliver(settled);
    }

    fn abandon(&self, id: u64) {
        let mut slot = self.slot.lock();
        let settle_now = match &mut slot.phase {
            Phase::Awaiting(a) if a.id == id => {
                if a.dispatching {
                    a.abandoned = true;
                }
                !a.dispatching
            }
            _ => false,
        };
        if settle_now {
            let settled = self.settle(&mut slot, abandoned());
            drop(slot);
            self.deliver(settled);
        }
    }

    fn after_dispatch(&self, id: u64, launched: Result<(), LaunchError>) {
        let mut slot = self.slot.lock();
        let outcome = match &mut slot.phase {
            Phase::Awaiting(a) if a.id == id => match launched {
                Err(e) => Some(Outcome::Errored(VaultError::Prompt(e.0))),
                Ok(()) if a.abandoned => Some(abandoned()),
                Ok(()) => {
                    a.dispatching = false;
                    None
                }
            },
            _ => None,
        };
        if let Some(outcome) = outcome {
            let settled = self.settle(&mut slot, outcome);
            drop(slot);
            self.deliver(settled);
        }
    }

    fn deliver(&self, settled: Option<Settlement>) {
        if let Some(settled) = settled {
            settled.deliver(&self.audit);
        }
    }

    /// Terminal transition. Caller holds the slot lock; the returned
    /// settlement must be delivered after releasing it.
    fn settle(&self, slot: &mut Slot, outcome: Outcome) -> Option<Settlement> {
        let (id, request) = match mem::replace(&mut slot.phase, Phase::Idle) {
            Phase::Awaiting(awaiting) => (awaiting.id, awaiting.request),
            other => {
                slot.phase = other;
                return None;
            }
        };

        let outcome = match outcome {
            Outcome::Authorized(Some(operation)) if operation.request() != id => {
                tracing::warn!(id, "authenticator returned an operation from another request");
                Outcome::Authorized(None)
            }
            other => other,
        };

        let (terminal, result) = match outcome {
            Outcome::Authorized(Some(operation)) => {
                let result = operation
                    .decrypt(&request.ciphertext)
                    .map(|plaintext| Some(general_purpose::STANDARD.encode(plaintext.as_slice())));
                (GateState::Authorized, result)
            }
            Outcome::Authorized(None) => (
                GateState::Errored,
                Err(VaultError::Auth(AuthFailure::new(
                    AuthErrorCode::MissingCryptoObject,
                    "missing cryptographic object",
                ))),
            ),
            Outcome::Failed(failure) if failure.is_cancellation() => {
                (GateState::Denied, Err(VaultError::Auth(failure)))
            }
            Outcome::Failed(failure) => (GateState::Errored, Err(VaultError::Auth(failure))),
            Outcome::Errored(error) => (GateState::Errored, Err(error)),
        };
        slot.last_terminal = Some(terminal);

        let event = match (&terminal, &result) {
            (_, Ok(_)) => AccessEvent::Unlocked,
            (GateState::Denied, _) => AccessEvent::Denied,
            (_, Err(e)) => AccessEvent::Failed {
                code: e.code().to_string(),
            },
        };
        tracing::debug!(key_id = %request.key_id, ?terminal, "authentication settled");
        Some(Settlement {
            key_id: request.key_id,
            event,
            responder: request.responder,
            result,
        })
    }
}

fn abandoned() -> Outcome {
    Outcome::Failed(AuthFailure::new(
        AuthErrorCode::Abandoned,
        "authenticator released the request without a result",
    ))
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

/// The single-flight gate owned by one [`crate::ShareVault`].
#[derive(Clone)]
pub struct AuthGate {
    core: Arc<GateCore>,
}

impl AuthGate {
    pub(crate) fn new(audit: Arc<Mutex<AuditLog>>) -> Self {
        Self {
            core: Arc::new(GateCore {
                slot: Mutex::new(Slot {
                    phase: Phase::Idle,
                    last_terminal: None,
                }),
                audit,
            }),
        }
    }

    /// Current (non-terminal) state. Terminal states are transient; see
    /// [`AuthGate::last_terminal`].
    pub fn state(&self) -> GateState {
        match self.core.slot.lock().phase {
            Phase::Idle => GateState::Idle,
            Phase::Preparing { .. } => GateState::Preparing,
            Phase::Awaiting(_) => GateState::AwaitingAuthenticator,
        }
    }

    /// The terminal state the most recent flow ended in.
    pub fn last_terminal(&self) -> Option<GateState> {
        self.core.slot.lock().last_terminal
    }

    /// Move `Idle -> Preparing`, or fail with `Busy`.
    pub(crate) fn reserve(&self) -> Result<Reservation, VaultError> {
        let mut slot = self.core.slot.lock();
        if !matches!(slot.phase, Phase::Idle) {
            return Err(VaultError::Busy);
        }
        let id = NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed);
        slot.phase = Phase::Preparing { id };
        Ok(Reservation {
            core: Arc::clone(&self.core),
            id,
            armed: true,
        })
    }
}

impl fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthGate")
            .field("state", &self.state())
            .finish()
    }
}

/// Exclusive hold on the `Preparing` state. Dropping it without
/// dispatching returns the gate to `Idle`.
pub(crate) struct Reservation {
    core: Arc<GateCore>,
    id: u64,
    armed: bool,
}

impl Reservation {
    /// Move `Preparing -> AwaitingAuthenticator` and hand the operation to
    /// the authenticator.
    pub(crate) fn dispatch(
        mut self,
        authenticator: &dyn Authenticator,
        prompt: PromptRequest,
        operation: PendingDecryption,
        request: PendingAuthRequest,
    ) {
        self.armed = false;
        let id = self.id;
        {
            let mut slot = self.core.slot.lock();
            debug_assert!(matches!(slot.phase, Phase::Preparing { id: held } if held == id));
            slot.phase = Phase::Awaiting(Awaiting {
                id,
                request,
                dispatching: true,
                abandoned: false,
            });
        }

        let callback = AuthCallback {
            core: Arc::clone(&self.core),
            id,
            settled: false,
        };
        let mut guard = DispatchGuard {
            core: &self.core,
            id,
            done: false,
        };
        let launched = authenticator.authenticate(prompt, operation.issued_for(id), callback);
        if let Err(e) = &launched {
            tracing::warn!(error = %e, "authenticator failed to launch");
        }
        guard.done = true;
        self.core.after_dispatch(id, launched);
    }
}

/// Settles the request if `authenticate` unwinds instead of returning.
struct DispatchGuard<'a> {
    core: &'a GateCore,
    id: u64,
    done: bool,
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.core
                .after_dispatch(self.id, Err(LaunchError("authenticator panicked".into())));
        }
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut slot = self.core.slot.lock();
        if matches!(slot.phase, Phase::Preparing { id } if id == self.id) {
            slot.phase = Phase::Idle;
        }
    }
}

// ---------------------------------------------------------------------------
// Callback
// ---------------------------------------------------------------------------

/// The authenticator's way back to the gate.
///
/// Terminal methods consume the callback. Dropping it unsettled ends the
/// flow with an `Abandoned` auth error.
pub struct AuthCallback {
    core: Arc<GateCore>,
    id: u64,
    settled: bool,
}

impl AuthCallback {
    /// The user was verified. `authorized` is the operation the gate handed
    /// out with this request, after [`PendingDecryption::authorize`]. An
    /// operation from any other request is treated as missing.
    pub fn succeeded(mut self, authorized: Option<AuthorizedDecryption>) {
        self.settled = true;
        self.core.finish(self.id, Outcome::Authorized(authorized));
    }

    /// The prompt ended without verification.
    pub fn error(mut self, code: AuthErrorCode, message: impl Into<String>) {
        self.settled = true;
        self.core
            .finish(self.id, Outcome::Failed(AuthFailure::new(code, message)));
    }

    /// An attempt was not recognised. The prompt keeps listening.
    pub fn failed(&self) {
        tracing::debug!(id = self.id, "authentication attempt failed; awaiting retry");
    }
}

impl Drop for AuthCallback {
    fn drop(&mut self) {
        if !self.settled {
            self.core.abandon(self.id);
        }
    }
}

impl fmt::Debug for AuthCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthCallback")
            .field("id", &self.id)
            .field("settled", &self.settled)
            .finish()
    }
}

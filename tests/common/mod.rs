//! Fake authenticators and vault wiring shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use sharevault::{
    AuthCallback, AuthErrorCode, Authenticator, LaunchError, MemoryBlobStore, MemoryKeyStore,
    PendingDecryption, PromptRequest, ShareVault, VaultConfig,
};

pub fn b64(bytes: &[u8]) -> String {
    general_purpose::STANDARD.encode(bytes)
}

pub fn unb64(text: &str) -> Vec<u8> {
    general_purpose::STANDARD.decode(text).unwrap()
}

pub struct Harness<A> {
    pub vault: ShareVault,
    pub keys: Arc<MemoryKeyStore>,
    pub blobs: Arc<MemoryBlobStore>,
    pub auth: Arc<A>,
}

pub fn harness<A: Authenticator + 'static>(auth: A) -> Harness<A> {
    let keys = Arc::new(MemoryKeyStore::new());
    let blobs = Arc::new(MemoryBlobStore::new());
    let auth = Arc::new(auth);
    let vault = ShareVault::new(
        VaultConfig::default(),
        keys.clone(),
        blobs.clone(),
        auth.clone(),
    );
    Harness {
        vault,
        keys,
        blobs,
        auth,
    }
}

/// Approves synchronously, before `authenticate` returns.
#[derive(Default)]
pub struct ApprovingAuthenticator {
    pub prompts: Mutex<Vec<PromptRequest>>,
}

impl Authenticator for ApprovingAuthenticator {
    fn has_host(&self) -> bool {
        true
    }

    fn authenticate(
        &self,
        prompt: PromptRequest,
        operation: PendingDecryption,
        callback: AuthCallback,
    ) -> Result<(), LaunchError> {
        self.prompts.lock().unwrap().push(prompt);
        callback.succeeded(Some(operation.authorize()));
        Ok(())
    }
}

/// Approves from another thread after a short delay.
pub struct ThreadedAuthenticator {
    pub delay: Duration,
}

impl Authenticator for ThreadedAuthenticator {
    fn has_host(&self) -> bool {
        true
    }

    fn authenticate(
        &self,
        _prompt: PromptRequest,
        operation: PendingDecryption,
        callback: AuthCallback,
    ) -> Result<(), LaunchError> {
        let delay = self.delay;
        thread::spawn(move || {
            thread::sleep(delay);
            callback.failed();
            callback.succeeded(Some(operation.authorize()));
        });
        Ok(())
    }
}

/// Parks every request until the test settles it by hand.
pub struct ScriptedAuthenticator {
    host: AtomicBool,
    launch_error: Mutex<Option<String>>,
    queue: Mutex<VecDeque<(PendingDecryption, AuthCallback)>>,
    prompts: Mutex<Vec<PromptRequest>>,
}

impl Default for ScriptedAuthenticator {
    fn default() -> Self {
        Self {
            host: AtomicBool::new(true),
            launch_error: Mutex::new(None),
            queue: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedAuthenticator {
    pub fn set_host(&self, present: bool) {
        self.host.store(present, Ordering::SeqCst);
    }

    pub fn fail_launch(&self, message: &str) {
        *self.launch_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    pub fn prompts(&self) -> Vec<PromptRequest> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn take(&self) -> (PendingDecryption, AuthCallback) {
        self.queue
            .lock()
            .unwrap()
            .pop_front()
            .expect("no pending authentication")
    }

    pub fn approve(&self) {
        let (operation, callback) = self.take();
        callback.succeeded(Some(operation.authorize()));
    }

    pub fn reject(&self, code: AuthErrorCode, message: &str) {
        let (_operation, callback) = self.take();
        callback.error(code, message);
    }
}

impl Authenticator for ScriptedAuthenticator {
    fn has_host(&self) -> bool {
        self.host.load(Ordering::SeqCst)
    }

    fn authenticate(
        &self,
        prompt: PromptRequest,
        operation: PendingDecryption,
        callback: AuthCallback,
    ) -> Result<(), LaunchError> {
        self.prompts.lock().unwrap().push(prompt);
        if let Some(message) = self.launch_error.lock().unwrap().clone() {
            // The prompt never shows, so the callback is released here.
            drop(callback);
            return Err(LaunchError(message));
        }
        self.queue.lock().unwrap().push_back((operation, callback));
        Ok(())
    }
}

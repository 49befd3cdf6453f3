//! Minimal example: a host wiring sharevault to its own prompt.
//!
//! The authenticator here stands in for a platform biometric prompt: it
//! "verifies" the user on a UI thread after a short delay. The access log is
//! persisted to a JSON-lines file for inspection.
//! Run with: `cargo run --example unlock_demo`

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use sharevault::audit::FileAuditSink;
use sharevault::{
    AuthCallback, Authenticator, JsonFileBlobStore, LaunchError, MemoryKeyStore,
    PendingDecryption, PromptRequest, ShareVault, VaultConfig, VaultError,
};

struct ConsolePrompt;

impl Authenticator for ConsolePrompt {
    fn has_host(&self) -> bool {
        true
    }

    fn authenticate(
        &self,
        prompt: PromptRequest,
        operation: PendingDecryption,
        callback: AuthCallback,
    ) -> Result<(), LaunchError> {
        println!("[prompt] {} - {}", prompt.title, prompt.subtitle);
        thread::Builder::new()
            .name("ui".into())
            .spawn(move || {
                thread::sleep(Duration::from_millis(200));
                println!("[prompt] fingerprint accepted");
                callback.succeeded(Some(operation.authorize()));
            })
            .map_err(|e| LaunchError(e.to_string()))?;
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // 1. Setup
    let dir = std::env::temp_dir().join("sharevault_demo");
    std::fs::create_dir_all(&dir)?;
    let vault = ShareVault::new(
        VaultConfig::default(),
        Arc::new(MemoryKeyStore::new()),
        Arc::new(JsonFileBlobStore::open(dir.join("shares.json"))?),
        Arc::new(ConsolePrompt),
    );
    vault.add_audit_sink(Box::new(FileAuditSink::new(dir.join("access.jsonl"))?));

    // 2. Store a share
    let share = general_purpose::STANDARD.encode(b"party-1 keygen output");
    vault.save_share("wallet:main", &share)?;

    // 3. Unlock it, and show that a second unlock is refused meanwhile
    let pending = vault.load_share("wallet:main", Some("Sign transaction"));
    match vault.load_share("wallet:main", None).wait() {
        Err(VaultError::Busy) => println!("second unlock refused while the prompt is open"),
        other => println!("unexpected: {:?}", other),
    }
    let unlocked = pending.wait()?.ok_or("share missing")?;
    println!("unlocked: {:?}", String::from_utf8(general_purpose::STANDARD.decode(unlocked)?)?);

    // 4. Remove it
    vault.remove_share("wallet:main");
    println!("after remove: {:?}", vault.load_share("wallet:main", None).wait()?);
    println!("access log written to {}", dir.join("access.jsonl").display());
    Ok(())
}

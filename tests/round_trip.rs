mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{b64, harness, unb64, ApprovingAuthenticator, ScriptedAuthenticator, ThreadedAuthenticator};
use sharevault::{
    BlobStore, JsonFileBlobStore, MemoryBlobStore, MemoryKeyStore, SecretKeyStore, ShareVault,
    VaultConfig,
};

#[test]
fn test_save_then_load_returns_plaintext() {
    let h = harness(ApprovingAuthenticator::default());
    let shares: [&[u8]; 3] = [b"x", b"mpc key share bytes", &[0u8; 4096]];

    for (i, share) in shares.iter().enumerate() {
        let key_id = format!("wallet-{}", i);
        h.vault.save_share(&key_id, &b64(share)).unwrap();
        let loaded = h.vault.load_share(&key_id, None).wait().unwrap();
        assert_eq!(unb64(&loaded.unwrap()), share.to_vec());
    }
}

#[test]
fn test_empty_share_round_trips() {
    // An empty plaintext still yields a 16-byte tag, so the blob is valid.
    let h = harness(ApprovingAuthenticator::default());
    h.vault.save_share("empty", "").unwrap();
    let loaded = h.vault.load_share("empty", None).wait().unwrap();
    assert_eq!(loaded.as_deref(), Some(""));
}

#[test]
fn test_load_resolves_on_authenticator_thread() {
    let h = harness(ThreadedAuthenticator {
        delay: Duration::from_millis(20),
    });
    h.vault.save_share("k", &b64(b"from another thread")).unwrap();

    let loaded = h.vault.load_share("k", Some("Sign")).wait().unwrap();
    assert_eq!(unb64(&loaded.unwrap()), b"from another thread");
}

#[tokio::test]
async fn test_load_can_be_awaited() {
    let h = harness(ThreadedAuthenticator {
        delay: Duration::from_millis(5),
    });
    h.vault.save_share("async", &b64(b"awaited share")).unwrap();

    let loaded = h.vault.load_share("async", None).await.unwrap();
    assert_eq!(unb64(&loaded.unwrap()), b"awaited share");
}

#[test]
fn test_absent_share_returns_none_without_prompt() {
    let h = harness(ScriptedAuthenticator::default());
    let loaded = h.vault.load_share("never-saved", None).wait().unwrap();
    assert!(loaded.is_none());
    assert!(h.auth.prompts().is_empty());
}

#[test]
fn test_missing_key_returns_none() {
    // Blob present, key gone: nothing to unlock, not an error.
    let h = harness(ScriptedAuthenticator::default());
    h.vault.save_share("orphan", &b64(b"share")).unwrap();
    h.keys.delete(&h.vault.config().alias("orphan")).unwrap();

    let loaded = h.vault.load_share("orphan", None).wait().unwrap();
    assert!(loaded.is_none());
    assert_eq!(h.auth.pending(), 0);
}

#[test]
fn test_enrollment_change_makes_share_unavailable() {
    let h = harness(ScriptedAuthenticator::default());
    h.vault.save_share("bio", &b64(b"share")).unwrap();
    h.keys.invalidate_biometric_enrollment();

    assert!(h.vault.load_share("bio", None).wait().unwrap().is_none());
}

#[test]
fn test_remove_then_load_returns_none_and_save_makes_fresh_key() {
    let h = harness(ApprovingAuthenticator::default());
    h.vault.save_share("k", &b64(b"first")).unwrap();
    h.vault.save_share("k", &b64(b"second")).unwrap();
    assert_eq!(h.keys.keys_created(), 1);

    h.vault.remove_share("k");
    assert!(h.blobs.is_empty());
    assert!(!h.keys.contains(&h.vault.config().alias("k")));
    assert!(h.vault.load_share("k", None).wait().unwrap().is_none());

    h.vault.save_share("k", &b64(b"third")).unwrap();
    assert_eq!(h.keys.keys_created(), 2);
    let loaded = h.vault.load_share("k", None).wait().unwrap();
    assert_eq!(unb64(&loaded.unwrap()), b"third");
}

#[test]
fn test_remove_missing_share_succeeds() {
    let h = harness(ApprovingAuthenticator::default());
    h.vault.remove_share("nothing-here");
    h.vault.remove_share("nothing-here");
}

#[test]
fn test_sanitized_ids_collide() {
    let h = harness(ApprovingAuthenticator::default());
    h.vault.save_share("wallet-1", &b64(b"dash")).unwrap();
    h.vault.save_share("wallet.1", &b64(b"dot")).unwrap();

    let loaded = h.vault.load_share("wallet-1", None).wait().unwrap();
    assert_eq!(unb64(&loaded.unwrap()), b"dot");
    assert_eq!(h.blobs.len(), 1);
}

#[test]
fn test_prompt_text() {
    let h = harness(ApprovingAuthenticator::default());
    h.vault.save_share("k", &b64(b"share")).unwrap();

    h.vault.load_share("k", None).wait().unwrap();
    h.vault.load_share("k", Some("Approve transfer")).wait().unwrap();

    let prompts = h.auth.prompts.lock().unwrap();
    assert_eq!(prompts[0].title, "Unlock key share");
    assert_eq!(prompts[0].subtitle, "Authenticate to continue");
    assert_eq!(prompts[1].title, "Approve transfer");
    assert!(prompts[1].allowed.strong_biometric && prompts[1].allowed.device_credential);
}

#[test]
fn test_save_rejects_invalid_base64() {
    let h = harness(ApprovingAuthenticator::default());
    let err = h.vault.save_share("k", "%%% not base64").unwrap_err();
    assert_eq!(err.code(), "ERR_SAVE_SHARE");
    assert!(h.blobs.is_empty());
    assert_eq!(h.keys.keys_created(), 0);
}

#[test]
fn test_file_backed_blobs_survive_vault_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shares.json");
    let keys = Arc::new(MemoryKeyStore::new());
    let auth = Arc::new(ApprovingAuthenticator::default());

    {
        let blobs = Arc::new(JsonFileBlobStore::open(&path).unwrap());
        let vault = ShareVault::new(VaultConfig::default(), keys.clone(), blobs, auth.clone());
        vault.save_share("persisted", &b64(b"on disk")).unwrap();
    }

    let blobs = Arc::new(JsonFileBlobStore::open(&path).unwrap());
    let stored = blobs.get("share_persisted").unwrap().unwrap();
    assert!(!stored.contains("on disk"));

    let vault = ShareVault::new(VaultConfig::default(), keys, blobs, auth);
    let loaded = vault.load_share("persisted", None).wait().unwrap();
    assert_eq!(unb64(&loaded.unwrap()), b"on disk");
}

#[test]
fn test_custom_namespaces() {
    let config = VaultConfig::from_json(
        r#"{ "storage_prefix": "mpc_", "alias_prefix": "device_key_" }"#,
    )
    .unwrap();
    let keys = Arc::new(MemoryKeyStore::new());
    let blobs = Arc::new(MemoryBlobStore::new());
    let vault = ShareVault::new(
        config,
        keys.clone(),
        blobs.clone(),
        Arc::new(ApprovingAuthenticator::default()),
    );

    vault.save_share("a/b", &b64(b"share")).unwrap();
    assert!(blobs.get("mpc_a_b").unwrap().is_some());
    assert!(keys.contains("device_key_a_b"));
    assert!(matches!(vault.load_share("a/b", None).wait(), Ok(Some(_))));
}

//! Vault configuration.

use serde::{Deserialize, Serialize};

use crate::keys::{sanitize_key_id, KeyPolicy};

/// Namespacing, prompt text and key policy for a [`crate::ShareVault`].
///
/// Every field has a default, so a partial JSON document is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// Prefix of blob-store keys.
    pub storage_prefix: String,
    /// Prefix of key-store aliases.
    pub alias_prefix: String,
    /// Prompt title used when the caller passes no prompt message.
    pub prompt_title: String,
    pub prompt_subtitle: String,
    pub key_policy: KeyPolicy,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            storage_prefix: "share_".into(),
            alias_prefix: "sharevault_key_".into(),
            prompt_title: "Unlock key share".into(),
            prompt_subtitle: "Authenticate to continue".into(),
            key_policy: KeyPolicy::default(),
        }
    }
}

impl VaultConfig {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn storage_key(&self, key_id: &str) -> String {
        format!("{}{}", self.storage_prefix, sanitize_key_id(key_id))
    }

    pub fn alias(&self, key_id: &str) -> String {
        format!("{}{}", self.alias_prefix, sanitize_key_id(key_id))
    }
}

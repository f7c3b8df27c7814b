use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tl_crypto::KdfParams;
use tl_proto::CollabConfig;

use crate::error::StoreError;

pub const DEFAULT_AUTO_LOCK_SECS: u64 = 300;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultSettings {
    /// KDF used for newly written vault envelopes.
    #[serde(default)]
    pub vault_kdf: KdfParams,
    /// KDF used for outgoing share envelopes.
    #[serde(default)]
    pub share_kdf: KdfParams,
    /// Inactivity timeout; 0 disables auto-lock.
    #[serde(default = "default_auto_lock_secs")]
    pub auto_lock_secs: u64,
    #[serde(default)]
    pub collab: CollabConfig,
}

fn default_auto_lock_secs() -> u64 {
    DEFAULT_AUTO_LOCK_SECS
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            vault_kdf: KdfParams::pbkdf2_default(),
            share_kdf: KdfParams::pbkdf2_default(),
            auto_lock_secs: DEFAULT_AUTO_LOCK_SECS,
            collab: CollabConfig::default(),
        }
    }
}

impl VaultSettings {
    /// Read settings from `path`, falling back to defaults when absent.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        match fs::read_to_string(path) {
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn auto_lock(&self) -> Option<Duration> {
        (self.auto_lock_secs > 0).then(|| Duration::from_secs(self.auto_lock_secs))
    }
}

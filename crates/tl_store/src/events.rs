use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LockReason {
    User,
    Inactivity,
    Hidden,
    Shutdown,
}

/// Lifecycle notifications published by the vault controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum VaultEvent {
    PassphraseSet,
    Unlocked,
    Locked { reason: LockReason },
    /// All decrypted views must be discarded and rebuilt from storage.
    ReloadRequired,
    Saved { seq: u64 },
    SaveFailed { seq: u64, reason: String },
    /// Collections were replaced by a collaboration peer.
    Replicated,
    ShareImported { kind: String, id: String },
}

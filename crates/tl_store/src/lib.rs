//! tl_store - Encrypted local state for the Terminal List vault
//!
//! # Encryption strategy
//! The whole application state (items, notes, messages, passwords) is
//! serialized as one JSON document and sealed with AES-256-GCM under a key
//! derived from the user passphrase. The resulting envelope replaces the
//! previous one on every save; nothing is encrypted field by field.
//!
//! The key lives only inside [`VaultController`] while unlocked. Locking
//! drops it (zeroized) together with every decrypted collection.
//!
//! # Compatibility
//! Unencrypted data from older clients (a bare item array, or a plain
//! `{items, notes, messages}` object) still loads, but saving stays
//! disabled until a passphrase is set.

pub mod controller;
pub mod envelope;
pub mod error;
pub mod events;
pub mod paths;
pub mod settings;
pub mod storage;

pub use controller::{LockOutcome, VaultController, VaultStatus};
pub use error::StoreError;
pub use events::{LockReason, VaultEvent};
pub use settings::VaultSettings;
pub use storage::{FileStore, KeyValueStore, MemoryStore};

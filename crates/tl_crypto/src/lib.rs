//! tl_crypto - Terminal List vault cryptographic primitives
//!
//! # Design principles
//! - NO custom crypto; all primitives come from audited Rust crates.
//! - Zeroize all secret material on drop.
//! - Decryption failures are reported as one opaque error, whatever the cause.
//!
//! # Module layout
//! - `kdf`       - PBKDF2-HMAC-SHA256 / scrypt passphrase key derivation
//! - `aead`      - AES-256-GCM seal/open helpers
//! - `hash`      - SHA-256 helpers (collaboration channel names)
//! - `diceware`  - wordlist passphrase generator
//! - `error`     - unified error type

pub mod aead;
pub mod diceware;
pub mod error;
pub mod hash;
pub mod kdf;

pub use error::CryptoError;
pub use kdf::{DerivedKey, KdfParams};

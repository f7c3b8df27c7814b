//! Passphrase key derivation
//!
//! Two interchangeable algorithms, selected by the `name` tag that is always
//! persisted next to the salt:
//!
//! ```json
//! {"name":"pbkdf2","iterations":600000}
//! {"name":"scrypt","N":32768,"r":8,"p":1}
//! ```
//!
//! Decryption always uses the stored descriptor, so raising the default cost
//! never breaks existing envelopes.

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use zeroize::ZeroizeOnDrop;

use crate::error::CryptoError;

pub const KEY_LEN: usize = 32;
pub const SALT_LEN: usize = 16;

pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 600_000;
pub const DEFAULT_SCRYPT_N: u32 = 1 << 15;
pub const DEFAULT_SCRYPT_R: u32 = 8;
pub const DEFAULT_SCRYPT_P: u32 = 1;

/// Cost ceilings for descriptors read from untrusted envelopes.
pub const MAX_PBKDF2_ITERATIONS: u32 = 10_000_000;
pub const MAX_SCRYPT_LOG_N: u8 = 20;
pub const MAX_SCRYPT_R: u32 = 32;
pub const MAX_SCRYPT_P: u32 = 16;
/// scrypt needs 128 * N * r bytes of working memory.
pub const MAX_SCRYPT_MEMORY: u64 = 1 << 30;

/// KDF descriptor persisted with every ciphertext.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "lowercase")]
pub enum KdfParams {
    Pbkdf2 {
        iterations: u32,
    },
    Scrypt {
        #[serde(rename = "N")]
        n: u32,
        r: u32,
        p: u32,
    },
}

impl KdfParams {
    pub const fn pbkdf2_default() -> Self {
        Self::Pbkdf2 {
            iterations: DEFAULT_PBKDF2_ITERATIONS,
        }
    }

    pub const fn scrypt_default() -> Self {
        Self::Scrypt {
            n: DEFAULT_SCRYPT_N,
            r: DEFAULT_SCRYPT_R,
            p: DEFAULT_SCRYPT_P,
        }
    }

    /// Reject parameters that are malformed or too expensive to run.
    pub fn validate(&self) -> Result<(), CryptoError> {
        match *self {
            Self::Pbkdf2 { iterations } => {
                if iterations == 0 || iterations > MAX_PBKDF2_ITERATIONS {
                    return Err(CryptoError::KeyDerivation(format!(
                        "pbkdf2 iterations must be in 1..={MAX_PBKDF2_ITERATIONS}"
                    )));
                }
            }
            Self::Scrypt { n, r, p } => {
                if n <= 1 || !n.is_power_of_two() || n.trailing_zeros() > u32::from(MAX_SCRYPT_LOG_N) {
                    return Err(CryptoError::KeyDerivation(format!(
                        "scrypt N must be a power of two in 2..=2^{MAX_SCRYPT_LOG_N}"
                    )));
                }
                if r == 0 || r > MAX_SCRYPT_R || p == 0 || p > MAX_SCRYPT_P {
                    return Err(CryptoError::KeyDerivation(format!(
                        "scrypt r must be in 1..={MAX_SCRYPT_R} and p in 1..={MAX_SCRYPT_P}"
                    )));
                }
                if 128 * u64::from(n) * u64::from(r) > MAX_SCRYPT_MEMORY {
                    return Err(CryptoError::KeyDerivation("scrypt memory cost too high".into()));
                }
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Pbkdf2 { .. } => "pbkdf2",
            Self::Scrypt { .. } => "scrypt",
        }
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::pbkdf2_default()
    }
}

/// 32-byte AES key derived from a passphrase. Zeroized on drop.
#[derive(ZeroizeOnDrop)]
pub struct DerivedKey([u8; KEY_LEN]);

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DerivedKey(<redacted>)")
    }
}

/// Derive a key from `passphrase` + `salt` under `params`.
///
/// An empty passphrase is not rejected here: it still yields a key, so a
/// later decryption fails on the AEAD tag like any other wrong passphrase.
pub fn derive(passphrase: &str, salt: &[u8], params: &KdfParams) -> Result<DerivedKey, CryptoError> {
    params.validate()?;
    let mut out = [0u8; KEY_LEN];
    match *params {
        KdfParams::Pbkdf2 { iterations } => {
            pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, iterations, &mut out);
        }
        KdfParams::Scrypt { n, r, p } => {
            let log_n = n.trailing_zeros() as u8;
            let scrypt_params = scrypt::Params::new(log_n, r, p, KEY_LEN)
                .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
            scrypt::scrypt(passphrase.as_bytes(), salt, &scrypt_params, &mut out)
                .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        }
    }
    Ok(DerivedKey(out))
}

/// Generate a fresh random 16-byte salt.
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

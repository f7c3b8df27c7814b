//! Portable share envelopes.
//!
//! ```json
//! { "version": 1, "type": "item" | "note" | "message",
//!   "enc": { "salt": b64, "iv": b64, "data": b64, "kdf": { "name": ..., ... } } }
//! ```
//!
//! Each envelope carries its own salt, iv and KDF descriptor and is keyed
//! only by the passphrase handed over out of band; nothing in it relates to
//! the vault key.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use tl_crypto::{aead, kdf, KdfParams};

use crate::error::ProtoError;
use crate::models::{Record, RecordKind};

pub const SHARE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareEnvelope {
    pub version: u32,
    #[serde(rename = "type")]
    pub kind: RecordKind,
    pub enc: ShareCipher,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareCipher {
    pub salt: String,
    pub iv: String,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kdf: Option<KdfParams>,
    /// Written by clients that predate the `kdf` descriptor (PBKDF2 only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterations: Option<u32>,
}

impl ShareCipher {
    pub fn kdf_params(&self) -> Result<KdfParams, ProtoError> {
        match (self.kdf, self.iterations) {
            (Some(params), _) => Ok(params),
            (None, Some(iterations)) => Ok(KdfParams::Pbkdf2 { iterations }),
            (None, None) => Err(ProtoError::Format("share envelope has no kdf parameters".into())),
        }
    }
}

impl ShareEnvelope {
    pub fn to_json(&self) -> Result<String, ProtoError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Parse pasted share JSON. Anything without both `type` and `enc` is a
/// format error.
pub fn parse(text: &str) -> Result<ShareEnvelope, ProtoError> {
    let value: Value = serde_json::from_str(text.trim())
        .map_err(|e| ProtoError::Format(format!("share payload is not JSON: {e}")))?;
    let has = |field: &str| value.get(field).is_some_and(|v| !v.is_null());
    if !has("type") || !has("enc") {
        return Err(ProtoError::Format("share payload needs 'type' and 'enc'".into()));
    }
    serde_json::from_value(value).map_err(|e| ProtoError::Format(e.to_string()))
}

/// Seal one record under `passphrase` with a fresh salt and iv.
pub fn share(
    record: &Record,
    kind: RecordKind,
    passphrase: &str,
    params: &KdfParams,
) -> Result<ShareEnvelope, ProtoError> {
    let salt = kdf::generate_salt();
    let key = kdf::derive(passphrase, &salt, params)?;
    let plaintext = serde_json::to_vec(&record.without_transient())?;
    let sealed = aead::seal(&key, &plaintext)?;
    Ok(ShareEnvelope {
        version: SHARE_VERSION,
        kind,
        enc: ShareCipher {
            salt: general_purpose::STANDARD.encode(salt),
            iv: general_purpose::STANDARD.encode(sealed.iv),
            data: general_purpose::STANDARD.encode(&sealed.ciphertext),
            kdf: Some(*params),
            iterations: None,
        },
    })
}

/// Open a share envelope. Every failure past format validation is reported
/// as [`ProtoError::ImportFailed`].
pub fn receive(envelope: &ShareEnvelope, passphrase: &str) -> Result<Record, ProtoError> {
    if envelope.version != SHARE_VERSION {
        return Err(ProtoError::Format(format!(
            "unsupported share version {}",
            envelope.version
        )));
    }
    let params = envelope.enc.kdf_params()?;
    open_cipher(&envelope.enc, &params, passphrase).map_err(|e| {
        debug!("share import rejected: {e}");
        ProtoError::ImportFailed
    })
}

fn open_cipher(enc: &ShareCipher, params: &KdfParams, passphrase: &str) -> Result<Record, ProtoError> {
    let salt = general_purpose::STANDARD.decode(&enc.salt).map_err(tl_crypto::CryptoError::from)?;
    let iv = general_purpose::STANDARD.decode(&enc.iv).map_err(tl_crypto::CryptoError::from)?;
    let data = general_purpose::STANDARD.decode(&enc.data).map_err(tl_crypto::CryptoError::from)?;
    let key = kdf::derive(passphrase, &salt, params)?;
    let plaintext = aead::open(&key, &iv, &data)?;
    let value: Value = serde_json::from_slice(&plaintext)?;
    Record::from_value(value)
}

//! On-disk vault envelope and load-time classification of stored data.

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use tl_crypto::{aead, DerivedKey, KdfParams};
use tl_proto::{AppState, Record};

use crate::error::StoreError;
use crate::storage::KeyValueStore;

/// Key holding the current state (encrypted envelope or plain v2 object).
pub const STATE_KEY: &str = "terminal-list-state-v2";
/// Key written by the first client generation: a bare item array.
pub const LEGACY_KEY: &str = "terminal-list-items-v1";

/// Outer format version. Bump when the state layout changes.
pub const VAULT_FORMAT_VERSION: u32 = 4;
/// Version of the `enc` block itself.
pub const ENC_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultEnvelope {
    pub version: u32,
    pub enc: EncBlock,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncBlock {
    pub v: u32,
    pub salt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kdf: Option<KdfParams>,
    /// Older envelopes only carried a PBKDF2 iteration count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iterations: Option<u32>,
    pub iv: String,
    pub data: String,
}

impl VaultEnvelope {
    /// Parse a stored envelope. Field-level detail stays out of the error.
    pub fn from_value(value: Value) -> Result<Self, StoreError> {
        serde_json::from_value(value).map_err(|e| {
            debug!("envelope rejected: {e}");
            StoreError::Format("malformed envelope".into())
        })
    }

    pub fn kdf_params(&self) -> Result<KdfParams, StoreError> {
        match (self.enc.kdf, self.enc.iterations) {
            (Some(params), _) => Ok(params),
            (None, Some(iterations)) => Ok(KdfParams::Pbkdf2 { iterations }),
            (None, None) => Err(StoreError::Format("envelope carries no KDF parameters".into())),
        }
    }

    pub fn salt(&self) -> Result<Vec<u8>, StoreError> {
        decode("salt", &self.enc.salt)
    }
}

/// What the store held at startup.
#[derive(Debug, Clone, PartialEq)]
pub enum Persisted {
    Empty,
    /// Object with a non-null `enc`. Kept unparsed until unlock so a
    /// damaged envelope still starts the vault locked.
    Encrypted(Value),
    /// Unencrypted `{items, notes, messages?}` object under [`STATE_KEY`].
    Plain(AppState),
    /// Item array under [`LEGACY_KEY`].
    Legacy(Vec<Record>),
}

/// Classify whatever is stored. An object with a non-null `enc` field is
/// always treated as encrypted, even if other fields look like plain state.
pub fn load(store: &dyn KeyValueStore) -> Result<Persisted, StoreError> {
    if let Some(raw) = store.get(STATE_KEY)? {
        match serde_json::from_str::<Value>(&raw) {
            Ok(value) if value.get("enc").is_some_and(|enc| !enc.is_null()) => {
                return Ok(Persisted::Encrypted(value));
            }
            Ok(value) if has_arrays(&value) => {
                let state: AppState = serde_json::from_value(value)
                    .map_err(|e| StoreError::Format(format!("malformed state: {e}")))?;
                return Ok(Persisted::Plain(state));
            }
            Ok(_) => warn!("ignoring unrecognised data under {STATE_KEY}"),
            Err(e) => warn!("ignoring unreadable data under {STATE_KEY}: {e}"),
        }
    }

    if let Some(raw) = store.get(LEGACY_KEY)? {
        match serde_json::from_str::<Vec<Record>>(&raw) {
            Ok(items) => {
                info!("found {} legacy items", items.len());
                return Ok(Persisted::Legacy(items));
            }
            Err(e) => warn!("ignoring unreadable data under {LEGACY_KEY}: {e}"),
        }
    }

    Ok(Persisted::Empty)
}

fn has_arrays(value: &Value) -> bool {
    value.get("items").map_or(false, Value::is_array) && value.get("notes").map_or(false, Value::is_array)
}

/// Seal the full state under `key` with a fresh IV.
pub fn seal(
    state: &AppState,
    key: &DerivedKey,
    salt: &[u8],
    params: &KdfParams,
) -> Result<VaultEnvelope, StoreError> {
    let plaintext = zeroize::Zeroizing::new(serde_json::to_vec(state)?);
    let sealed = aead::seal(key, &plaintext)?;
    Ok(VaultEnvelope {
        version: VAULT_FORMAT_VERSION,
        enc: EncBlock {
            v: ENC_VERSION,
            salt: general_purpose::STANDARD.encode(salt),
            kdf: Some(*params),
            iterations: None,
            iv: general_purpose::STANDARD.encode(sealed.iv),
            data: general_purpose::STANDARD.encode(&sealed.ciphertext),
        },
    })
}

/// Decrypt and upgrade an envelope. Decryption failures surface as
/// [`tl_crypto::CryptoError::Authentication`]; a plaintext without
/// `items` and `notes` arrays is rejected as a format error.
pub fn open(envelope: &VaultEnvelope, key: &DerivedKey) -> Result<AppState, StoreError> {
    if envelope.version > VAULT_FORMAT_VERSION {
        return Err(StoreError::Format(format!(
            "vault version {} is newer than supported {VAULT_FORMAT_VERSION}",
            envelope.version
        )));
    }
    if envelope.enc.v != ENC_VERSION {
        return Err(StoreError::Format(format!("unsupported enc version {}", envelope.enc.v)));
    }

    let iv = decode("iv", &envelope.enc.iv)?;
    let data = decode("data", &envelope.enc.data)?;
    let plaintext = aead::open(key, &iv, &data)?;

    let value: Value = serde_json::from_slice(&plaintext)?;
    if !has_arrays(&value) {
        return Err(StoreError::Format("decrypted state lacks items or notes".into()));
    }
    let mut state: AppState = serde_json::from_value(value)?;
    migrate(&mut state, envelope.version);
    Ok(state)
}

/// Version-aware upgrades. Missing `messages` and `passwords` already
/// default to empty during deserialization.
fn migrate(state: &mut AppState, from_version: u32) {
    if from_version < VAULT_FORMAT_VERSION && state.normalize_notes() {
        debug!("normalised notes from vault version {from_version}");
    }
}

/// Write the envelope and drop any plaintext legacy copy.
pub fn persist(store: &dyn KeyValueStore, envelope: &VaultEnvelope) -> Result<(), StoreError> {
    store.set(STATE_KEY, &serde_json::to_string(envelope)?)?;
    store.remove(LEGACY_KEY)?;
    Ok(())
}

fn decode(field: &str, value: &str) -> Result<Vec<u8>, StoreError> {
    general_purpose::STANDARD
        .decode(value)
        .map_err(|e| StoreError::Format(format!("bad base64 in {field}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use serde_json::json;
    use tl_crypto::kdf;

    const FAST: KdfParams = KdfParams::Pbkdf2 { iterations: 1_000 };

    fn key_and_salt() -> (DerivedKey, [u8; 16]) {
        let salt = kdf::generate_salt();
        (kdf::derive("correct horse", &salt, &FAST).unwrap(), salt)
    }

    fn sample_state() -> AppState {
        serde_json::from_value(json!({
            "items": [{"id": "a1", "text": "buy milk", "done": false}],
            "notes": [{"id": "n1", "title": "t", "body": "b", "links": []}],
            "messages": [],
            "passwords": [{"id": "p1", "site": "example.org", "password": "pw"}]
        }))
        .unwrap()
    }

    #[test]
    fn seal_then_open_restores_state() {
        let (key, salt) = key_and_salt();
        let env = seal(&sample_state(), &key, &salt, &FAST).unwrap();
        assert_eq!(env.version, 4);
        assert_eq!(env.enc.v, 1);
        assert_eq!(env.salt().unwrap(), salt.to_vec());
        assert_eq!(open(&env, &key).unwrap(), sample_state());
    }

    #[test]
    fn envelope_wire_shape() {
        let (key, salt) = key_and_salt();
        let env = seal(&sample_state(), &key, &salt, &FAST).unwrap();
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["version"], 4);
        assert_eq!(value["enc"]["kdf"]["name"], "pbkdf2");
        assert!(value["enc"].get("iterations").is_none());
        assert!(value["enc"]["iv"].is_string());
    }

    #[test]
    fn wrong_key_fails_authentication() {
        let (key, salt) = key_and_salt();
        let env = seal(&sample_state(), &key, &salt, &FAST).unwrap();
        let other = kdf::derive("wrong", &salt, &FAST).unwrap();
        assert!(matches!(
            open(&env, &other),
            Err(StoreError::Crypto(tl_crypto::CryptoError::Authentication))
        ));
    }

    #[test]
    fn legacy_iterations_field_is_honoured() {
        let mut env = seal(&sample_state(), &key_and_salt().0, &[0u8; 16], &FAST).unwrap();
        env.enc.kdf = None;
        env.enc.iterations = Some(1_000);
        assert_eq!(env.kdf_params().unwrap(), FAST);
        env.enc.iterations = None;
        assert!(matches!(env.kdf_params(), Err(StoreError::Format(_))));
    }

    #[test]
    fn plaintext_without_notes_is_rejected() {
        let (key, salt) = key_and_salt();
        let sealed = aead::seal(&key, br#"{"items":[]}"#).unwrap();
        let env = VaultEnvelope {
            version: 4,
            enc: EncBlock {
                v: 1,
                salt: general_purpose::STANDARD.encode(salt),
                kdf: Some(FAST),
                iterations: None,
                iv: general_purpose::STANDARD.encode(sealed.iv),
                data: general_purpose::STANDARD.encode(&sealed.ciphertext),
            },
        };
        assert!(matches!(open(&env, &key), Err(StoreError::Format(_))));
    }

    #[test]
    fn older_versions_get_notes_normalised() {
        let (key, salt) = key_and_salt();
        let old: AppState = serde_json::from_value(json!({
            "items": [],
            "notes": [{"id": "n1", "text": "old body", "link": "https://example.org"}]
        }))
        .unwrap();
        let mut env = seal(&old, &key, &salt, &FAST).unwrap();
        env.version = 3;
        let state = open(&env, &key).unwrap();
        assert_eq!(state.notes[0].get_str("body"), Some("old body"));
        assert!(state.messages.is_empty());
        assert!(state.passwords.is_empty());

        env.version = 5;
        assert!(matches!(open(&env, &key), Err(StoreError::Format(_))));
    }

    #[test]
    fn load_classifies_stored_data() {
        let store = MemoryStore::new();
        assert_eq!(load(&store).unwrap(), Persisted::Empty);

        store.set(LEGACY_KEY, r#"[{"id":"a","text":"x"},{"id":"b","text":"y"}]"#).unwrap();
        assert!(matches!(load(&store).unwrap(), Persisted::Legacy(items) if items.len() == 2));

        store.set(STATE_KEY, r#"{"items":[{"id":"c"}],"notes":[]}"#).unwrap();
        assert!(matches!(load(&store).unwrap(), Persisted::Plain(state) if state.items.len() == 1));

        let (key, salt) = key_and_salt();
        let env = seal(&sample_state(), &key, &salt, &FAST).unwrap();
        persist(&store, &env).unwrap();
        let Persisted::Encrypted(value) = load(&store).unwrap() else {
            panic!("expected an encrypted envelope");
        };
        assert_eq!(VaultEnvelope::from_value(value).unwrap(), env);
        assert_eq!(store.get(LEGACY_KEY).unwrap(), None);
    }

    #[test]
    fn damaged_envelope_still_loads_as_encrypted() {
        let store = MemoryStore::new();
        store.set(STATE_KEY, r#"{"version":4,"enc":{"v":1,"salt":"AAAA"}}"#).unwrap();
        let Persisted::Encrypted(value) = load(&store).unwrap() else {
            panic!("expected an encrypted envelope");
        };
        let err = VaultEnvelope::from_value(value).unwrap_err();
        assert_eq!(err.to_string(), "Invalid vault format: malformed envelope");

        store.set(STATE_KEY, r#"{"version":4,"enc":{}}"#).unwrap();
        assert!(matches!(load(&store).unwrap(), Persisted::Encrypted(_)));
    }

    #[test]
    fn null_enc_is_not_an_envelope() {
        let store = MemoryStore::new();
        store.set(STATE_KEY, r#"{"version":4,"enc":null}"#).unwrap();
        assert_eq!(load(&store).unwrap(), Persisted::Empty);

        store.set(STATE_KEY, r#"{"enc":null,"items":[{"id":"a"}],"notes":[]}"#).unwrap();
        assert!(matches!(load(&store).unwrap(), Persisted::Plain(state) if state.items.len() == 1));
    }

    #[test]
    fn corrupt_state_falls_back_to_legacy() {
        let store = MemoryStore::new();
        store.set(STATE_KEY, "{not json").unwrap();
        store.set(LEGACY_KEY, r#"[{"id":"a"}]"#).unwrap();
        assert!(matches!(load(&store).unwrap(), Persisted::Legacy(_)));
    }
}

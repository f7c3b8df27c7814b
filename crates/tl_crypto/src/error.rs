use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("AEAD encryption failed")]
    AeadEncrypt,

    /// Wrong passphrase, corrupted data and tampering all land here.
    #[error("cannot decrypt")]
    Authentication,

    #[error("Invalid wordlist: {0}")]
    Wordlist(String),

    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}

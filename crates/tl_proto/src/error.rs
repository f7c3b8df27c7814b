use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("Invalid format: {0}")]
    Format(String),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Generic share-import failure. The cause is deliberately not carried.
    #[error("import failed")]
    ImportFailed,

    #[error("Crypto error: {0}")]
    Crypto(#[from] tl_crypto::CryptoError),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}

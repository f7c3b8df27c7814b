use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Precondition(String),

    #[error("Invalid vault format: {0}")]
    Format(String),

    /// Wrong passphrase, corrupted or tampered envelope. Never more specific.
    #[error("unlock failed")]
    UnlockFailed,

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] tl_crypto::CryptoError),

    #[error("{0}")]
    Proto(#[from] tl_proto::ProtoError),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

//! SHA-256 helpers

use sha2::{Digest, Sha256};

pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Collaboration channel name for a `(session, secret)` pair.
///
/// One-way over the concatenation, so knowing the session name alone does
/// not reveal the channel, and equal names with different secrets never
/// share one.
pub fn channel_name(session: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(session.as_bytes());
    hasher.update(secret.as_bytes());
    format!("tl-collab-{}", hex::encode(hasher.finalize()))
}

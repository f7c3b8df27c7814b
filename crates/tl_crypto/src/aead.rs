//! Authenticated encryption
//!
//! AES-256-GCM, 96-bit random nonce per call, 128-bit tag appended to the
//! ciphertext. The nonce travels beside the ciphertext as `iv`.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use zeroize::Zeroizing;

use crate::error::CryptoError;
use crate::kdf::DerivedKey;

pub const IV_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Output of [`seal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sealed {
    pub iv: [u8; IV_LEN],
    pub ciphertext: Vec<u8>,
}

/// Encrypt `plaintext` under `key` with a freshly drawn nonce.
pub fn seal(key: &DerivedKey, plaintext: &[u8]) -> Result<Sealed, CryptoError> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::AeadEncrypt)?;
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|_| CryptoError::AeadEncrypt)?;
    let mut iv = [0u8; IV_LEN];
    iv.copy_from_slice(&nonce);
    Ok(Sealed { iv, ciphertext })
}

/// Decrypt and verify. A malformed iv, a truncated ciphertext and a tag
/// mismatch all return [`CryptoError::Authentication`].
pub fn open(key: &DerivedKey, iv: &[u8], ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    if iv.len() != IV_LEN || ciphertext.len() < TAG_LEN {
        return Err(CryptoError::Authentication);
    }
    let cipher =
        Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::Authentication)?;
    let plaintext = cipher
        .decrypt(Nonce::from_slice(iv), ciphertext)
        .map_err(|_| CryptoError::Authentication)?;
    Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> DerivedKey {
        DerivedKey::from_bytes([byte; 32])
    }

    #[test]
    fn seal_open_roundtrip() {
        let sealed = seal(&key(1), b"the whole state").unwrap();
        assert_eq!(sealed.ciphertext.len(), b"the whole state".len() + TAG_LEN);
        let opened = open(&key(1), &sealed.iv, &sealed.ciphertext).unwrap();
        assert_eq!(opened.as_slice(), b"the whole state");
    }

    #[test]
    fn same_plaintext_never_reuses_iv() {
        let k = key(2);
        let a = seal(&k, b"same").unwrap();
        let b = seal(&k, b"same").unwrap();
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn wrong_key_is_authentication_failure() {
        let sealed = seal(&key(3), b"secret").unwrap();
        assert!(matches!(
            open(&key(4), &sealed.iv, &sealed.ciphertext),
            Err(CryptoError::Authentication)
        ));
    }

    #[test]
    fn tampering_and_malformed_input_fail_uniformly() {
        let k = key(5);
        let mut sealed = seal(&k, b"secret").unwrap();
        sealed.ciphertext[0] ^= 0x01;
        assert!(matches!(open(&k, &sealed.iv, &sealed.ciphertext), Err(CryptoError::Authentication)));
        assert!(matches!(open(&k, &[0u8; 5], &sealed.ciphertext), Err(CryptoError::Authentication)));
        assert!(matches!(open(&k, &sealed.iv, &[1, 2, 3]), Err(CryptoError::Authentication)));
        assert!(matches!(open(&k, &[], &[]), Err(CryptoError::Authentication)));
    }
}

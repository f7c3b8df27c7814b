//! Diceware passphrase generator.
//!
//! Wordlists use the EFF layout: one `<dice digits>\t<word>` entry per line.
//! Indices are drawn 13 bits at a time from the OS RNG and rejected when they
//! fall outside the list, so every word is equally likely.

use rand::RngCore;

use crate::error::CryptoError;

pub const DEFAULT_WORDS: usize = 8;
pub const DEFAULT_SEPARATOR: &str = " ";

const INDEX_MASK: u16 = 0x1fff;

/// Parse an EFF-style wordlist. Lines without a tab are taken as bare words.
pub fn parse_wordlist(text: &str) -> Result<Vec<String>, CryptoError> {
    let words: Vec<String> = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match line.split_once('\t') {
            Some((_, word)) => word.trim().to_string(),
            None => line.to_string(),
        })
        .filter(|word| !word.is_empty())
        .collect();
    if words.is_empty() {
        return Err(CryptoError::Wordlist("no words found".into()));
    }
    if words.len() > usize::from(INDEX_MASK) + 1 {
        return Err(CryptoError::Wordlist(format!(
            "{} words exceeds the 8192-word limit",
            words.len()
        )));
    }
    Ok(words)
}

/// Draw `count` words from `list` and join them with `separator`.
pub fn generate(list: &[String], count: usize, separator: &str) -> Result<String, CryptoError> {
    if list.is_empty() {
        return Err(CryptoError::Wordlist("empty wordlist".into()));
    }
    let mut rng = rand::rngs::OsRng;
    let mut out = Vec::with_capacity(count);
    let mut buf = [0u8; 2];
    while out.len() < count {
        rng.fill_bytes(&mut buf);
        let idx = usize::from(u16::from_le_bytes(buf) & INDEX_MASK);
        if let Some(word) = list.get(idx) {
            out.push(word.as_str());
        }
    }
    Ok(out.join(separator))
}

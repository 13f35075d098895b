//! Content fingerprints and cache keys.
//!
//! The fingerprint is the SHA-256 of the raw input bytes, never the filename:
//! identical content under two names shares an entry and any byte change
//! produces a new key.

use crate::config::OutputFormat;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Hex SHA-256 of `data`.
pub fn fingerprint(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Key of one cache entry: content fingerprint plus the request variant.
///
/// The variant folds in output format, prompt and model so that a markdown
/// result is never served for a plain-text request of the same file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub fingerprint: String,
    pub variant: String,
}

impl CacheKey {
    pub fn new(fingerprint: impl Into<String>, format: OutputFormat, prompt: &str, model: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(format.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(prompt.as_bytes());
        hasher.update([0u8]);
        hasher.update(model.as_bytes());
        let digest = hasher.finalize();
        Self {
            fingerprint: fingerprint.into(),
            variant: hex::encode(&digest[..8]),
        }
    }

    /// Stable string form, usable as a file name.
    pub fn as_file_stem(&self) -> String {
        format!("{}-{}", self.fingerprint, self.variant)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", short(&self.fingerprint), self.variant)
    }
}

/// First 12 hex characters, for log lines.
pub fn short(fp: &str) -> &str {
    &fp[..fp.len().min(12)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_content_hash() {
        let a = fingerprint(b"hello");
        assert_eq!(
            a,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
        assert_eq!(a, fingerprint(b"hello"));
    }

    #[test]
    fn one_byte_change_changes_fingerprint() {
        let mut data = vec![7u8; 4096];
        let before = fingerprint(&data);
        data[2048] ^= 1;
        assert_ne!(before, fingerprint(&data));
    }

    #[test]
    fn variant_separates_formats_and_prompts() {
        let fp = fingerprint(b"doc");
        let md = CacheKey::new(fp.clone(), OutputFormat::Markdown, "p", "m");
        let txt = CacheKey::new(fp.clone(), OutputFormat::PlainText, "p", "m");
        let other_prompt = CacheKey::new(fp.clone(), OutputFormat::Markdown, "q", "m");
        let other_model = CacheKey::new(fp.clone(), OutputFormat::Markdown, "p", "n");
        assert_ne!(md, txt);
        assert_ne!(md, other_prompt);
        assert_ne!(md, other_model);
        assert_eq!(md, CacheKey::new(fp, OutputFormat::Markdown, "p", "m"));
    }

    #[test]
    fn display_is_short() {
        let key = CacheKey::new(fingerprint(b"x"), OutputFormat::Markdown, "p", "m");
        let shown = key.to_string();
        assert!(shown.len() < 40, "{shown}");
        assert!(key.as_file_stem().starts_with(&key.fingerprint));
    }
}

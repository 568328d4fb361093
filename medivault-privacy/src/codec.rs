//! Keyed, integrity-checked encoding of single field values.
//!
//! The transform is a repeating-key XOR over the canonical JSON bytes of the
//! value; the tag is a keyed BLAKE3 digest of the transformed bytes. The output
//! is `base64(transformed) + "." + hex(tag)`. This is a demonstration-grade
//! transform and gives no secrecy against anyone who holds the key or can
//! mount known-plaintext analysis. It is deterministic, so equal plaintexts
//! produce equal encodings.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{EncodedValue, PlainValue};

const TAG_CONTEXT: &str = "medivault 2024 value-codec integrity tag";
const SEPARATOR: char = '.';

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("codec key material must not be empty")]
    EmptyKey,
    #[error("integrity check failed")]
    Integrity,
    #[error("malformed encoded value: {0}")]
    Malformed(&'static str),
    #[error("value serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl CodecError {
    /// True for every failure that means "this encoded value does not authenticate".
    pub fn is_decode_failure(&self) -> bool {
        matches!(self, CodecError::Integrity | CodecError::Malformed(_))
    }
}

/// Key section of the engine configuration.
///
/// # TOML
/// ```text
/// [codec]
/// key = "SUPER_SECRET_KEY_DONT_SHARE"
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct CodecConfig {
    pub key: String,
}

impl CodecConfig {
    pub fn sample() -> Self {
        Self {
            key: "medivault-demo-shared-key".into(),
        }
    }
}

#[derive(Clone)]
pub struct ValueCodec {
    key: Vec<u8>,
    tag_key: [u8; 32],
}

impl std::fmt::Debug for ValueCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueCodec")
            .field("key_len", &self.key.len())
            .finish_non_exhaustive()
    }
}

impl ValueCodec {
    pub fn new(key: impl AsRef<[u8]>) -> Result<Self, CodecError> {
        let key = key.as_ref();
        if key.is_empty() {
            return Err(CodecError::EmptyKey);
        }
        Ok(Self {
            key: key.to_vec(),
            tag_key: blake3::derive_key(TAG_CONTEXT, key),
        })
    }

    pub fn from_config(config: &CodecConfig) -> Result<Self, CodecError> {
        Self::new(config.key.as_bytes())
    }

    /// Stable fingerprint of the key material, safe to log.
    pub fn key_fingerprint(&self) -> String {
        let digest = blake3::keyed_hash(&self.tag_key, b"fingerprint");
        hex::encode(&digest.as_bytes()[..8])
    }

    pub fn encode(&self, value: &PlainValue) -> Result<EncodedValue, CodecError> {
        let mut bytes = canonical_bytes(value)?;
        self.apply_keystream(&mut bytes);
        let tag = self.tag(&bytes);
        Ok(EncodedValue::new(format!(
            "{}{SEPARATOR}{}",
            STANDARD.encode(&bytes),
            tag.to_hex()
        )))
    }

    /// Verifies the tag before anything derived from the payload is returned.
    /// Any change to either section, including tag case, fails integrity.
    pub fn decode(&self, encoded: &EncodedValue) -> Result<PlainValue, CodecError> {
        let (body, stored_tag) = encoded
            .as_str()
            .split_once(SEPARATOR)
            .ok_or(CodecError::Malformed("missing tag separator"))?;
        // Canonical base64 is injective, so an altered body either fails here
        // or yields different bytes below.
        let mut bytes = STANDARD.decode(body).map_err(|_| CodecError::Integrity)?;
        if !tag_matches(stored_tag, &self.tag(&bytes)) {
            return Err(CodecError::Integrity);
        }
        self.apply_keystream(&mut bytes);
        serde_json::from_slice(&bytes).map_err(|_| CodecError::Malformed("payload is not a value"))
    }

    fn apply_keystream(&self, bytes: &mut [u8]) {
        for (byte, k) in bytes.iter_mut().zip(self.key.iter().cycle()) {
            *byte ^= k;
        }
    }

    fn tag(&self, transformed: &[u8]) -> blake3::Hash {
        blake3::keyed_hash(&self.tag_key, transformed)
    }
}

/// Exact, constant-time comparison against the lowercase hex rendering.
fn tag_matches(stored: &str, expected: &blake3::Hash) -> bool {
    let expected = expected.to_hex();
    let (stored, expected) = (stored.as_bytes(), expected.as_str().as_bytes());
    stored.len() == expected.len()
        && stored
            .iter()
            .zip(expected)
            .fold(0u8, |diff, (a, b)| diff | (a ^ b))
            == 0
}

/// Canonical byte form used both for encoding and as the cache key.
pub fn canonical_bytes(value: &PlainValue) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(value)?)
}

use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::canonical::{canonical_bytes, to_canonical_bytes};
use crate::error::{CanonError, CommitError};

type HmacSha256 = Hmac<Sha256>;

/// All-zero digest anchoring hash chains.
pub const ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// SHA-256 of raw bytes, lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// `hash(value) = SHA256(canonical_bytes(value))`.
pub fn hash_value(value: &Value) -> Result<String, CanonError> {
    Ok(sha256_hex(&canonical_bytes(value)?))
}

/// Hash any serializable value through its canonical encoding.
pub fn hash_serialize<T: Serialize + ?Sized>(value: &T) -> Result<String, CanonError> {
    Ok(sha256_hex(&to_canonical_bytes(value)?))
}

/// HMAC-SHA256 keyed by `key`, lowercase hex.
pub fn hmac_sha256_hex(key: &[u8], message: &[u8]) -> Result<String, CommitError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| CommitError::InvalidKey)?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Raw HMAC-SHA256 output.
pub(crate) fn hmac_sha256_raw(key: &[u8], message: &[u8]) -> Result<[u8; 32], CommitError> {
    let mut mac = HmacSha256::new_from_slice(key).map_err(|_| CommitError::InvalidKey)?;
    mac.update(message);
    Ok(mac.finalize().into_bytes().into())
}

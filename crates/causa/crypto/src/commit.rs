//! HMAC commit-reveal.
//!
//! `commitment = HMAC-SHA256(key = nonce, msg = digest || "|" || aux_digest)`.
//!
//! The lifecycle of one commitment is a typestate machine:
//!
//! ```text
//! Committed --reveal(opening)--> Revealed --verify()--> Verified
//!                                                   \-> Mismatched
//! ```
//!
//! Verification consumes the revealed value, so a commitment can be judged
//! exactly once and cannot be verified before it is revealed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::digest::{hash_value, hmac_sha256_hex, sha256_hex};
use crate::error::CommitError;

const SEPARATOR: &str = "|";

/// Compute the commitment over a digest pair with the given nonce.
pub fn commit(nonce: &[u8], digest: &str, aux_digest: &str) -> Result<String, CommitError> {
    let message = format!("{digest}{SEPARATOR}{aux_digest}");
    hmac_sha256_hex(nonce, message.as_bytes())
}

/// Public reference to a nonce (`SHA256(nonce)`), published at commit time.
pub fn nonce_ref(nonce: &[u8]) -> String {
    sha256_hex(nonce)
}

/// The public half of a commitment, as it appears in a trace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentRecord {
    pub digest: String,
    pub aux_digest: String,
    pub commitment: String,
    pub nonce_ref: String,
}

impl CommitmentRecord {
    /// Build a fresh commitment over `payload` and `aux` with `nonce`.
    pub fn create(nonce: &[u8], payload: &Value, aux: &Value) -> Result<Self, CommitError> {
        let digest = hash_value(payload)?;
        let aux_digest = hash_value(aux)?;
        let commitment = commit(nonce, &digest, &aux_digest)?;
        Ok(Self {
            digest,
            aux_digest,
            commitment,
            nonce_ref: nonce_ref(nonce),
        })
    }
}

/// Data the committer discloses at reveal time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Opening {
    /// Hex-encoded nonce.
    pub nonce: String,
    /// The committed payload.
    pub payload: Value,
    /// The auxiliary value bound next to the payload.
    pub aux: Value,
}

/// A commitment that has not been opened.
#[derive(Clone, Debug)]
pub struct Committed {
    record: CommitmentRecord,
}

/// A commitment together with its claimed opening, not yet judged.
#[derive(Clone, Debug)]
pub struct Revealed {
    record: CommitmentRecord,
    opening: Opening,
}

/// A commitment whose opening reproduced every published value.
#[derive(Clone, Debug)]
pub struct Verified {
    record: CommitmentRecord,
    opening: Opening,
}

/// Why an opening failed to reproduce its commitment.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mismatched {
    MalformedNonce,
    NonceRef,
    Digest { expected: String, recomputed: String },
    AuxDigest { expected: String, recomputed: String },
    Commitment,
    Encoding(String),
}

impl std::fmt::Display for Mismatched {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Mismatched::MalformedNonce => write!(f, "nonce is not valid hex"),
            Mismatched::NonceRef => write!(f, "nonce does not match published nonce_ref"),
            Mismatched::Digest {
                expected,
                recomputed,
            } => write!(f, "digest mismatch: committed {expected}, recomputed {recomputed}"),
            Mismatched::AuxDigest {
                expected,
                recomputed,
            } => write!(f, "aux digest mismatch: committed {expected}, recomputed {recomputed}"),
            Mismatched::Commitment => write!(f, "HMAC commitment does not reproduce"),
            Mismatched::Encoding(e) => write!(f, "opening could not be encoded: {e}"),
        }
    }
}

impl Committed {
    pub fn new(record: CommitmentRecord) -> Self {
        Self { record }
    }

    pub fn record(&self) -> &CommitmentRecord {
        &self.record
    }

    /// Attach the committer's opening. Judgement happens in [`Revealed::verify`].
    pub fn reveal(self, opening: Opening) -> Revealed {
        Revealed {
            record: self.record,
            opening,
        }
    }
}

impl Revealed {
    pub fn opening(&self) -> &Opening {
        &self.opening
    }

    /// Recompute every published value from the opening. Exact equality only.
    pub fn verify(self) -> Result<Verified, Mismatched> {
        let nonce = hex::decode(&self.opening.nonce).map_err(|_| Mismatched::MalformedNonce)?;

        if nonce_ref(&nonce) != self.record.nonce_ref {
            return Err(Mismatched::NonceRef);
        }

        let digest =
            hash_value(&self.opening.payload).map_err(|e| Mismatched::Encoding(e.to_string()))?;
        if digest != self.record.digest {
            return Err(Mismatched::Digest {
                expected: self.record.digest.clone(),
                recomputed: digest,
            });
        }

        let aux_digest =
            hash_value(&self.opening.aux).map_err(|e| Mismatched::Encoding(e.to_string()))?;
        if aux_digest != self.record.aux_digest {
            return Err(Mismatched::AuxDigest {
                expected: self.record.aux_digest.clone(),
                recomputed: aux_digest,
            });
        }

        let recomputed = commit(&nonce, &digest, &aux_digest)
            .map_err(|e| Mismatched::Encoding(e.to_string()))?;
        if recomputed != self.record.commitment {
            return Err(Mismatched::Commitment);
        }

        Ok(Verified {
            record: self.record,
            opening: self.opening,
        })
    }
}

impl Verified {
    pub fn record(&self) -> &CommitmentRecord {
        &self.record
    }

    pub fn payload(&self) -> &Value {
        &self.opening.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setup() -> (Vec<u8>, CommitmentRecord) {
        let nonce = b"nonce-0001".to_vec();
        let record =
            CommitmentRecord::create(&nonce, &json!({"factors": [0.1, 0.9]}), &json!({"dim": 2}))
                .unwrap();
        (nonce, record)
    }

    fn opening(nonce: &[u8], payload: Value) -> Opening {
        Opening {
            nonce: hex::encode(nonce),
            payload,
            aux: json!({"dim": 2}),
        }
    }

    #[test]
    fn exact_opening_verifies() {
        let (nonce, record) = setup();
        let verified = Committed::new(record)
            .reveal(opening(&nonce, json!({"factors": [0.1, 0.9]})))
            .verify()
            .unwrap();
        assert_eq!(verified.payload(), &json!({"factors": [0.1, 0.9]}));
    }

    #[test]
    fn semantically_equal_payload_verifies() {
        let (nonce, record) = setup();
        let result = Committed::new(record)
            .reveal(opening(&nonce, json!({"factors": [0.10, 0.900]})))
            .verify();
        assert!(result.is_ok());
    }

    #[test]
    fn wrong_nonce_rejected() {
        let (_, record) = setup();
        let result = Committed::new(record)
            .reveal(opening(b"other-nonce", json!({"factors": [0.1, 0.9]})))
            .verify();
        assert_eq!(result.unwrap_err(), Mismatched::NonceRef);
    }

    #[test]
    fn altered_payload_rejected() {
        let (nonce, record) = setup();
        let result = Committed::new(record)
            .reveal(opening(&nonce, json!({"factors": [0.1, 0.8]})))
            .verify();
        assert!(matches!(result, Err(Mismatched::Digest { .. })));
    }

    #[test]
    fn forged_commitment_rejected() {
        let (nonce, mut record) = setup();
        record.commitment = commit(b"attacker", &record.digest, &record.aux_digest).unwrap();
        let result = Committed::new(record)
            .reveal(opening(&nonce, json!({"factors": [0.1, 0.9]})))
            .verify();
        assert_eq!(result.unwrap_err(), Mismatched::Commitment);
    }

    #[test]
    fn malformed_nonce_rejected() {
        let (_, record) = setup();
        let mut bad = opening(b"x", json!({"factors": [0.1, 0.9]}));
        bad.nonce = "zz-not-hex".into();
        let result = Committed::new(record).reveal(bad).verify();
        assert_eq!(result.unwrap_err(), Mismatched::MalformedNonce);
    }
}

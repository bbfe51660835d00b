//! Causa Crypto — canonical encoding, digests and commitments.
//!
//! Every hash the kernel computes flows through [`canonical_bytes`]. If two
//! structures are semantically equal, their canonical bytes are identical,
//! and so are their digests. Nothing else in the kernel is allowed to hash
//! ad-hoc serializations.
//!
//! ## Primitives
//!
//! - [`canonical`] — sorted-key, whitespace-free JSON with fixed float formatting
//! - [`digest`] — SHA-256 rendered as lowercase hex
//! - [`commit`] — HMAC commit-reveal as an explicit typestate machine
//! - [`salt`] — delayed-reveal salts, sealed oracle, derivation registry
//! - [`secret`] — run-scoped kernel secret derived from an explicit seed
//!
//! HMAC-SHA256 is used as a replay-auditable toy primitive, not as a
//! hardened construction against an attacker holding the kernel secret.

#![deny(unsafe_code)]

pub mod canonical;
pub mod commit;
pub mod digest;
pub mod error;
pub mod salt;
pub mod secret;

pub use canonical::{
    canonical_bytes, canonical_f64, canonicalize, quantize, to_canonical_bytes, FLOAT_DECIMALS,
    QUANTIZE_LIMIT,
};
pub use commit::{
    commit, nonce_ref, CommitmentRecord, Committed, Mismatched, Opening, Revealed, Verified,
};
pub use digest::{hash_serialize, hash_value, hmac_sha256_hex, sha256_hex, ZERO_HASH};
pub use error::{CanonError, CommitError};
pub use salt::{
    DerivationRegistry, FactorDerivation, RevealedSalt, SaltOracle, SaltSchedule, SaltedMix,
};
pub use secret::KernelSecret;

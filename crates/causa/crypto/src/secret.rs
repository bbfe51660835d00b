use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::digest::{hmac_sha256_raw, sha256_hex};
use crate::error::CommitError;

const SECRET_DOMAIN: &[u8] = b"causa.kernel.secret.v1";
const CHALLENGE_DOMAIN: &str = "causa.challenge.order.v1";

/// Kernel signing secret for one run.
///
/// Derived deterministically from an explicit run seed so a replay auditor
/// holding the seed can re-derive every token signature and salt. The secret
/// is passed explicitly into the services that need it; there is no ambient
/// global key.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KernelSecret {
    bytes: [u8; 32],
}

impl KernelSecret {
    /// `secret = SHA256(domain || seed_le)`.
    pub fn derive(run_seed: u64) -> Self {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(SECRET_DOMAIN);
        hasher.update(run_seed.to_le_bytes());
        Self {
            bytes: hasher.finalize().into(),
        }
    }

    /// Public commitment to the secret, safe to write into the audit log.
    pub fn commitment(&self) -> String {
        sha256_hex(&self.bytes)
    }

    /// HMAC under the kernel secret, lowercase hex.
    pub fn sign(&self, message: &[u8]) -> Result<String, CommitError> {
        Ok(hex::encode(self.mac(message)?))
    }

    /// Key that orders the claim challenges of one admitted proposal.
    ///
    /// Agents cannot compute it before submitting, so no trace variation
    /// moves a chosen claim out of the challenged set. An auditor holding
    /// the run seed re-derives it.
    pub fn challenge_key(&self, proposal_hash: &str) -> Result<String, CommitError> {
        self.sign(format!("{CHALLENGE_DOMAIN}|{proposal_hash}").as_bytes())
    }

    pub(crate) fn mac(&self, message: &[u8]) -> Result<[u8; 32], CommitError> {
        hmac_sha256_raw(&self.bytes, message)
    }
}

impl std::fmt::Debug for KernelSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelSecret")
            .field("commitment", &self.commitment())
            .finish()
    }
}

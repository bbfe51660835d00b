//! Delayed-reveal salts.
//!
//! The kernel derives one salt per step from its secret. During the episode
//! only `SHA256(salt)` is published; agents reach the salt exclusively through
//! a [`SaltOracle`], which applies a registered derivation function φ without
//! handing out the salt bytes. At episode end [`SaltSchedule::reveal`]
//! consumes the schedule and discloses every salt in step order, so the
//! revelation happens exactly once.
//!
//! The kernel can check φ's *outputs* against revealed salts. It cannot judge
//! whether φ itself is a meaningful function of the agent's state.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::digest::sha256_hex;
use crate::error::CommitError;
use crate::secret::KernelSecret;

const SALT_DOMAIN: &[u8] = b"causa.salt.v1";

/// A deterministic factor-derivation function `φ(state, salt) -> factors`.
pub trait FactorDerivation: Send + Sync {
    /// Stable identifier agents reference in their traces.
    fn id(&self) -> &str;

    /// Produce exactly `dim` factors in [0, 1].
    fn derive(&self, state: &[f64], salt: &[u8; 32], dim: usize) -> Vec<f64>;
}

/// Reference φ: averages the clamped state with a salt-derived offset.
///
/// `f_i = (clamp01(state[i]) + salt[i mod 32] / 255) / 2`
pub struct SaltedMix;

impl SaltedMix {
    pub const ID: &'static str = "phi.salted_mix.v1";
}

impl FactorDerivation for SaltedMix {
    fn id(&self) -> &str {
        Self::ID
    }

    fn derive(&self, state: &[f64], salt: &[u8; 32], dim: usize) -> Vec<f64> {
        (0..dim)
            .map(|i| {
                let s = state.get(i).copied().unwrap_or(0.0);
                let s = if s.is_finite() { s.clamp(0.0, 1.0) } else { 0.0 };
                let u = f64::from(salt[i % salt.len()]) / 255.0;
                (s + u) / 2.0
            })
            .collect()
    }
}

/// Registry of derivation functions known to the kernel.
#[derive(Clone, Default)]
pub struct DerivationRegistry {
    functions: BTreeMap<String, Arc<dyn FactorDerivation>>,
}

impl DerivationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry containing the reference derivation.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SaltedMix));
        registry
    }

    pub fn register(&mut self, function: Arc<dyn FactorDerivation>) {
        self.functions.insert(function.id().to_string(), function);
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn FactorDerivation>, CommitError> {
        self.functions
            .get(id)
            .cloned()
            .ok_or_else(|| CommitError::UnknownDerivation(id.to_string()))
    }
}

impl std::fmt::Debug for DerivationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.functions.keys()).finish()
    }
}

/// A salt disclosed at episode end.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealedSalt {
    pub step: u64,
    /// Hex-encoded salt bytes.
    pub salt: String,
}

impl RevealedSalt {
    pub fn bytes(&self) -> Result<[u8; 32], CommitError> {
        let raw = hex::decode(&self.salt).map_err(|_| CommitError::MalformedNonce(self.salt.clone()))?;
        raw.try_into()
            .map_err(|_| CommitError::MalformedNonce(self.salt.clone()))
    }

    /// Does this salt open the commitment published during the episode?
    pub fn matches_commitment(&self, commitment: &str) -> bool {
        match self.bytes() {
            Ok(bytes) => sha256_hex(&bytes) == commitment,
            Err(_) => false,
        }
    }
}

/// Sealed handle through which an agent applies φ to the hidden salt of one step.
pub struct SaltOracle {
    step: u64,
    salt: [u8; 32],
}

impl SaltOracle {
    pub fn step(&self) -> u64 {
        self.step
    }

    /// Public commitment to the sealed salt.
    pub fn commitment(&self) -> String {
        sha256_hex(&self.salt)
    }

    /// Apply `derivation` to `state` under the sealed salt.
    pub fn derive(&self, derivation: &dyn FactorDerivation, state: &[f64], dim: usize) -> Vec<f64> {
        derivation.derive(state, &self.salt, dim)
    }
}

impl Drop for SaltOracle {
    fn drop(&mut self) {
        self.salt.zeroize();
    }
}

impl std::fmt::Debug for SaltOracle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaltOracle")
            .field("step", &self.step)
            .field("commitment", &self.commitment())
            .finish()
    }
}

/// Per-episode salt schedule held by the kernel.
#[derive(Debug)]
pub struct SaltSchedule {
    secret: KernelSecret,
    episode_id: String,
    steps: BTreeMap<u64, String>,
}

impl SaltSchedule {
    pub fn new(secret: KernelSecret, episode_id: impl Into<String>) -> Self {
        Self {
            secret,
            episode_id: episode_id.into(),
            steps: BTreeMap::new(),
        }
    }

    pub fn episode_id(&self) -> &str {
        &self.episode_id
    }

    /// Start a step: derive its salt, remember its commitment, hand out an oracle.
    pub fn begin_step(&mut self, step: u64) -> Result<SaltOracle, CommitError> {
        let salt = self.derive_salt(step)?;
        self.steps.insert(step, sha256_hex(&salt));
        Ok(SaltOracle { step, salt })
    }

    /// Commitment published for `step`, if the step was started.
    pub fn commitment(&self, step: u64) -> Result<&str, CommitError> {
        self.steps
            .get(&step)
            .map(String::as_str)
            .ok_or(CommitError::UnknownStep(step))
    }

    pub fn started_steps(&self) -> usize {
        self.steps.len()
    }

    /// Disclose every salt in step order. Consumes the schedule.
    pub fn reveal(self) -> Result<Vec<RevealedSalt>, CommitError> {
        self.steps
            .keys()
            .map(|&step| {
                Ok(RevealedSalt {
                    step,
                    salt: hex::encode(self.derive_salt(step)?),
                })
            })
            .collect()
    }

    fn derive_salt(&self, step: u64) -> Result<[u8; 32], CommitError> {
        let mut message = Vec::with_capacity(SALT_DOMAIN.len() + self.episode_id.len() + 9);
        message.extend_from_slice(SALT_DOMAIN);
        message.extend_from_slice(self.episode_id.as_bytes());
        message.push(b'|');
        message.extend_from_slice(&step.to_le_bytes());
        self.secret.mac(&message)
    }
}

use causa_crypto::{
    canonical_f64, hash_serialize, hash_value, CanonError, CommitError, CommitmentRecord,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::interface::InterfaceSpec;

/// Trace format version accepted by the kernel.
pub const TRACE_VERSION: &str = "0.3";

/// One reasoning node of a trace.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TraceNode {
    pub id: String,
    pub kind: String,
    pub summary: String,
}

/// Directed edge between reasoning nodes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TraceEdge {
    pub from: String,
    pub to: String,
    pub relation: String,
}

/// "If `var` moves in `direction`, the choice becomes `expected_effect`."
///
/// `direction` grammar: `INC | DEC | SET:<number>`.
/// `expected_effect` grammar: `CHOICE=<ACTION>`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CausalClaim {
    pub var: String,
    pub direction: String,
    pub expected_effect: String,
    pub confidence: f64,
}

/// An alternative action the agent claims to have considered.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Counterfactual {
    pub action: String,
    pub prob: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rationale: String,
}

/// Commitment over normalized environment state (full mode).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForkSnapshot {
    pub fork_id: String,
    pub state_digest: String,
    pub focus_vars: Vec<String>,
    pub commitment: String,
    pub nonce_ref: String,
}

impl ForkSnapshot {
    /// Commit to `state` with `nonce`, binding the focus variables as aux data.
    pub fn commit(
        fork_id: impl Into<String>,
        nonce: &[u8],
        state: &Value,
        focus_vars: Vec<String>,
    ) -> Result<Self, CommitError> {
        let record = CommitmentRecord::create(nonce, state, &Self::aux_value(&focus_vars))?;
        Ok(Self {
            fork_id: fork_id.into(),
            state_digest: record.digest,
            focus_vars,
            commitment: record.commitment,
            nonce_ref: record.nonce_ref,
        })
    }

    pub fn aux_value(focus_vars: &[String]) -> Value {
        json!({ "focus_vars": focus_vars })
    }

    /// Public commitment record, with the aux digest recomputed from `focus_vars`.
    pub fn record(&self) -> Result<CommitmentRecord, CanonError> {
        Ok(CommitmentRecord {
            digest: self.state_digest.clone(),
            aux_digest: hash_value(&Self::aux_value(&self.focus_vars))?,
            commitment: self.commitment.clone(),
            nonce_ref: self.nonce_ref.clone(),
        })
    }
}

/// Commitment over the factor vector (MCI modes).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FactorSnapshot {
    pub factor_digest: String,
    pub dim: usize,
    pub commitment: String,
    pub nonce_ref: String,
}

impl FactorSnapshot {
    /// `factor_digest = hash({factors, interface_spec})`.
    pub fn payload(factors: &[f64], interface: &InterfaceSpec) -> Value {
        json!({ "factors": factors, "interface_spec": interface })
    }

    pub fn aux_value(dim: usize) -> Value {
        json!({ "dim": dim })
    }

    pub fn digest(factors: &[f64], interface: &InterfaceSpec) -> Result<String, CanonError> {
        hash_value(&Self::payload(factors, interface))
    }

    pub fn commit(
        nonce: &[u8],
        factors: &[f64],
        interface: &InterfaceSpec,
    ) -> Result<Self, CommitError> {
        let dim = factors.len();
        let record =
            CommitmentRecord::create(nonce, &Self::payload(factors, interface), &Self::aux_value(dim))?;
        Ok(Self {
            factor_digest: record.digest,
            dim,
            commitment: record.commitment,
            nonce_ref: record.nonce_ref,
        })
    }

    pub fn record(&self) -> Result<CommitmentRecord, CanonError> {
        Ok(CommitmentRecord {
            digest: self.factor_digest.clone(),
            aux_digest: hash_value(&Self::aux_value(self.dim))?,
            commitment: self.commitment.clone(),
            nonce_ref: self.nonce_ref.clone(),
        })
    }
}

/// Shape problems found while querying a replay model.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShapeError {
    #[error("replay model declares {actions} actions but W has {rows} rows")]
    RowCount { actions: usize, rows: usize },
    #[error("replay model declares {actions} actions but b has {biases} entries")]
    BiasCount { actions: usize, biases: usize },
    #[error("W row {row} has {got} columns, expected {expected}")]
    RowWidth { row: usize, got: usize, expected: usize },
    #[error("replay model declares no actions")]
    Empty,
    #[error("replay model produced a non-finite logit for action {0}")]
    NonFinite(usize),
}

/// Declared linear decision function: `logits = W·f + b`, action = argmax.
///
/// Ties resolve to the lowest action index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplayModel {
    pub actions: Vec<String>,
    #[serde(rename = "W")]
    pub w: Vec<Vec<f64>>,
    pub b: Vec<f64>,
}

impl ReplayModel {
    /// Check that every shape agrees with `dim` factors.
    pub fn check_shape(&self, dim: usize) -> Result<(), ShapeError> {
        if self.actions.is_empty() {
            return Err(ShapeError::Empty);
        }
        if self.w.len() != self.actions.len() {
            return Err(ShapeError::RowCount {
                actions: self.actions.len(),
                rows: self.w.len(),
            });
        }
        if self.b.len() != self.actions.len() {
            return Err(ShapeError::BiasCount {
                actions: self.actions.len(),
                biases: self.b.len(),
            });
        }
        for (row, weights) in self.w.iter().enumerate() {
            if weights.len() != dim {
                return Err(ShapeError::RowWidth {
                    row,
                    got: weights.len(),
                    expected: dim,
                });
            }
        }
        Ok(())
    }

    pub fn logits(&self, factors: &[f64]) -> Result<Vec<f64>, ShapeError> {
        self.check_shape(factors.len())?;
        self.w
            .iter()
            .zip(&self.b)
            .enumerate()
            .map(|(i, (row, bias))| {
                let z: f64 = row.iter().zip(factors).map(|(w, f)| w * f).sum::<f64>() + bias;
                canonical_f64(z).map_err(|_| ShapeError::NonFinite(i))
            })
            .collect()
    }

    /// Index and name of the chosen action for `factors`.
    pub fn choose(&self, factors: &[f64]) -> Result<(usize, &str), ShapeError> {
        let logits = self.logits(factors)?;
        let mut best = 0;
        for (i, z) in logits.iter().enumerate().skip(1) {
            if *z > logits[best] {
                best = i;
            }
        }
        Ok((best, self.actions[best].as_str()))
    }
}

/// Declared input to a salted derivation function.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SaltedInput {
    pub derivation_id: String,
    /// Step whose salt the factors were derived under.
    pub step: u64,
    pub state: Vec<f64>,
}

/// The agent's structured justification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Trace {
    pub trace_version: String,
    pub trace_commit: String,
    pub nodes: Vec<TraceNode>,
    pub edges: Vec<TraceEdge>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fork_snapshots: Vec<ForkSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factor_snapshot: Option<FactorSnapshot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causal_claims: Vec<CausalClaim>,
    pub counterfactuals: Vec<Counterfactual>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factors: Option<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replay_model: Option<ReplayModel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salted_input: Option<SaltedInput>,
}

impl Trace {
    /// Hash of the trace with its `trace_commit` field removed.
    pub fn compute_commit(&self) -> Result<String, CanonError> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(map) = &mut value {
            map.remove("trace_commit");
        }
        hash_value(&value)
    }

    /// Set `trace_commit` to the recomputed value.
    pub fn seal(mut self) -> Result<Self, CanonError> {
        self.trace_commit = self.compute_commit()?;
        Ok(self)
    }

    pub fn hash(&self) -> Result<String, CanonError> {
        hash_serialize(self)
    }
}

//! Invariant Engine — fixed, ordered, fatal-or-pass checks.
//!
//! ## Admission order
//!
//! 1. **I0** trace commit integrity
//! 2. **I1** counterfactual minimum
//! 3. **I3** snapshot presence
//! 4. **I6** MCI interface completeness
//! 5. **C1** factor-digest binding (commitment-mismatch class)
//!
//! The first violated stage is the rejection reason. I4 (token binding) is
//! enforced at the execution boundary, I5 by the watchdog, and I7 by
//! [`check_salted_consistency`] at episode end.

use std::collections::BTreeMap;

use causa_crypto::{canonical_f64, DerivationRegistry, RevealedSalt};
use causa_types::{
    DenialReason, FactorSnapshot, InterfaceSpec, Proposal, SaltedInput, ViolationCode,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::KernelConfig;
use crate::watchdog::{cancelled, Cancel};

/// Slack for floating-point summation of counterfactual masses.
const MASS_EPSILON: f64 = 1e-12;

/// Result of a single stage evaluation.
#[derive(Clone, Debug, PartialEq)]
pub enum StageResult {
    Pass,
    Deny(DenialReason),
}

impl StageResult {
    fn deny(code: ViolationCode, message: impl Into<String>) -> Self {
        StageResult::Deny(DenialReason::new(code, message))
    }
}

/// One admission invariant. Evaluation is pure: no clock, no I/O.
pub trait InvariantStage: Send + Sync {
    fn stage_name(&self) -> &'static str;

    fn evaluate(&self, proposal: &Proposal) -> StageResult;
}

/// I0: declared `trace_commit` equals the recomputed trace hash.
pub struct TraceCommitStage;

impl InvariantStage for TraceCommitStage {
    fn stage_name(&self) -> &'static str {
        "I0 trace commit"
    }

    fn evaluate(&self, proposal: &Proposal) -> StageResult {
        match proposal.trace.compute_commit() {
            Ok(recomputed) if recomputed == proposal.trace.trace_commit => StageResult::Pass,
            Ok(recomputed) => StageResult::deny(
                ViolationCode::I0TraceCommit,
                format!(
                    "declared trace_commit {} does not match recomputed {}",
                    proposal.trace.trace_commit, recomputed
                ),
            ),
            Err(e) => StageResult::deny(
                ViolationCode::I0TraceCommit,
                format!("trace could not be encoded: {e}"),
            ),
        }
    }
}

/// I1: enough counterfactuals, each mass in [0,1], enough total mass.
pub struct CounterfactualStage {
    pub min_count: usize,
    pub min_mass: f64,
}

impl InvariantStage for CounterfactualStage {
    fn stage_name(&self) -> &'static str {
        "I1 counterfactual minimum"
    }

    fn evaluate(&self, proposal: &Proposal) -> StageResult {
        let counterfactuals = &proposal.trace.counterfactuals;
        if counterfactuals.len() < self.min_count {
            return StageResult::deny(
                ViolationCode::I1Counterfactuals,
                format!(
                    "len(counterfactuals) = {} < {}",
                    counterfactuals.len(),
                    self.min_count
                ),
            );
        }
        if let Some((i, cf)) = counterfactuals
            .iter()
            .enumerate()
            .find(|(_, cf)| !(0.0..=1.0).contains(&cf.prob))
        {
            return StageResult::deny(
                ViolationCode::I1Counterfactuals,
                format!("counterfactuals[{i}].prob = {} outside [0,1]", cf.prob),
            );
        }
        let mass: f64 = counterfactuals.iter().map(|cf| cf.prob).sum();
        if mass + MASS_EPSILON < self.min_mass {
            return StageResult::deny(
                ViolationCode::I1Counterfactuals,
                format!("counterfactual mass {mass} < {}", self.min_mass),
            );
        }
        StageResult::Pass
    }
}

/// I3: full mode needs fork snapshots, MCI modes need the factor snapshot.
pub struct SnapshotPresenceStage;

impl InvariantStage for SnapshotPresenceStage {
    fn stage_name(&self) -> &'static str {
        "I3 snapshot presence"
    }

    fn evaluate(&self, proposal: &Proposal) -> StageResult {
        let trace = &proposal.trace;
        if proposal.interface.mode.is_mci() {
            if trace.factor_snapshot.is_none() {
                return StageResult::deny(
                    ViolationCode::I3SnapshotPresence,
                    format!("{} mode requires a factor snapshot", proposal.interface.mode),
                );
            }
        } else if trace.fork_snapshots.is_empty() {
            return StageResult::deny(
                ViolationCode::I3SnapshotPresence,
                "full mode requires at least one fork snapshot",
            );
        }
        StageResult::Pass
    }
}

/// I6: every MCI shape agrees with the declared factor dimension K.
pub struct InterfaceCompletenessStage;

impl InvariantStage for InterfaceCompletenessStage {
    fn stage_name(&self) -> &'static str {
        "I6 interface completeness"
    }

    fn evaluate(&self, proposal: &Proposal) -> StageResult {
        if !proposal.interface.mode.is_mci() {
            return StageResult::Pass;
        }
        let k = proposal.interface.factor_dim;
        let trace = &proposal.trace;
        let deny = |message: String| StageResult::deny(ViolationCode::I6InterfaceCompleteness, message);

        let Some(factors) = &trace.factors else {
            return deny("factor vector missing".into());
        };
        let Some(model) = &trace.replay_model else {
            return deny("replay model missing".into());
        };
        if factors.len() != k {
            return deny(format!("len(factors) = {} != K = {k}", factors.len()));
        }
        if let Some(snapshot) = &trace.factor_snapshot {
            if snapshot.dim != k {
                return deny(format!("factor_snapshot.dim = {} != K = {k}", snapshot.dim));
            }
        }
        if let Err(e) = model.check_shape(k) {
            return deny(format!("replay model shape mismatch: {e}"));
        }
        StageResult::Pass
    }
}

/// C1: the committed factor digest binds the declared factors and interface.
pub struct FactorBindingStage;

impl InvariantStage for FactorBindingStage {
    fn stage_name(&self) -> &'static str {
        "C1 factor binding"
    }

    fn evaluate(&self, proposal: &Proposal) -> StageResult {
        let trace = &proposal.trace;
        let (Some(snapshot), Some(factors)) = (&trace.factor_snapshot, &trace.factors) else {
            return StageResult::Pass;
        };
        if !proposal.interface.mode.is_mci() {
            return StageResult::Pass;
        }
        match FactorSnapshot::digest(factors, &proposal.interface) {
            Ok(digest) if digest == snapshot.factor_digest => StageResult::Pass,
            Ok(digest) => StageResult::deny(
                ViolationCode::CommitmentMismatch,
                format!(
                    "factor_digest {} does not bind declared factors (recomputed {digest})",
                    snapshot.factor_digest
                ),
            ),
            Err(e) => StageResult::deny(
                ViolationCode::CommitmentMismatch,
                format!("factors could not be encoded: {e}"),
            ),
        }
    }
}

/// Ordered list of admission stages.
pub struct InvariantEngine {
    stages: Vec<Box<dyn InvariantStage>>,
}

impl InvariantEngine {
    pub fn empty() -> Self {
        Self { stages: Vec::new() }
    }

    /// I0, I1, I3, I6, C1 with thresholds from `config`.
    pub fn standard(config: &KernelConfig) -> Self {
        let mut engine = Self::empty();
        engine.add_stage(Box::new(TraceCommitStage));
        engine.add_stage(Box::new(CounterfactualStage {
            min_count: config.min_counterfactuals,
            min_mass: config.min_counterfactual_mass,
        }));
        engine.add_stage(Box::new(SnapshotPresenceStage));
        engine.add_stage(Box::new(InterfaceCompletenessStage));
        engine.add_stage(Box::new(FactorBindingStage));
        engine
    }

    /// Stages run in insertion order.
    pub fn add_stage(&mut self, stage: Box<dyn InvariantStage>) {
        self.stages.push(stage);
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.stage_name()).collect()
    }

    /// First violation wins.
    pub fn evaluate(&self, proposal: &Proposal) -> Result<(), DenialReason> {
        self.evaluate_until(proposal, &Cancel::default())
    }

    /// As [`evaluate`](Self::evaluate), stopping before the next stage once
    /// `cancel` is raised.
    pub fn evaluate_until(&self, proposal: &Proposal, cancel: &Cancel) -> Result<(), DenialReason> {
        for stage in &self.stages {
            if cancel.is_cancelled() {
                debug!(stage = stage.stage_name(), proposal_id = %proposal.proposal_id, "evaluation cancelled");
                return Err(cancelled());
            }
            match stage.evaluate(proposal) {
                StageResult::Pass => {
                    debug!(stage = stage.stage_name(), proposal_id = %proposal.proposal_id, "stage passed");
                }
                StageResult::Deny(reason) => {
                    debug!(
                        stage = stage.stage_name(),
                        proposal_id = %proposal.proposal_id,
                        code = %reason.code,
                        "stage denied"
                    );
                    return Err(reason);
                }
            }
        }
        Ok(())
    }
}

/// A granted MCI proposal whose factors must be reconciled at episode end.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SaltedRecord {
    pub proposal_id: String,
    pub interface: InterfaceSpec,
    pub factor_snapshot: FactorSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salted_input: Option<SaltedInput>,
}

impl SaltedRecord {
    /// `None` for proposals without a factor snapshot.
    pub fn from_proposal(proposal: &Proposal) -> Option<Self> {
        if !proposal.interface.mode.is_mci() {
            return None;
        }
        let snapshot = proposal.trace.factor_snapshot.clone()?;
        Some(Self {
            proposal_id: proposal.proposal_id.clone(),
            interface: proposal.interface.clone(),
            factor_snapshot: snapshot,
            salted_input: proposal.trace.salted_input.clone(),
        })
    }
}

/// I7: recompute every committed factor digest from the revealed salts.
///
/// `commitments` maps each started step to the salt commitment published
/// during the episode. Returns the number of records checked.
pub fn check_salted_consistency(
    records: &[SaltedRecord],
    salts: &[RevealedSalt],
    commitments: &BTreeMap<u64, String>,
    registry: &DerivationRegistry,
) -> Result<usize, DenialReason> {
    let deny = |message: String| DenialReason::new(ViolationCode::I7SaltedConsistency, message);

    if let Some(pair) = salts.windows(2).find(|w| w[0].step >= w[1].step) {
        return Err(deny(format!(
            "salts not revealed in step order ({} before {})",
            pair[0].step, pair[1].step
        )));
    }
    let by_step: BTreeMap<u64, &RevealedSalt> = salts.iter().map(|s| (s.step, s)).collect();

    for record in records {
        let id = &record.proposal_id;
        let Some(input) = &record.salted_input else {
            return Err(deny(format!("{id}: no salted derivation declared")));
        };
        let Some(salt) = by_step.get(&input.step) else {
            return Err(deny(format!("{id}: no salt revealed for step {}", input.step)));
        };
        match commitments.get(&input.step) {
            Some(published) if salt.matches_commitment(published) => {}
            _ => {
                return Err(deny(format!(
                    "{id}: revealed salt for step {} does not open its commitment",
                    input.step
                )))
            }
        }
        let salt_bytes = salt
            .bytes()
            .map_err(|e| deny(format!("{id}: malformed salt: {e}")))?;
        let derivation = registry
            .get(&input.derivation_id)
            .map_err(|e| deny(format!("{id}: {e}")))?;

        let factors = derivation
            .derive(&input.state, &salt_bytes, record.interface.factor_dim)
            .into_iter()
            .map(canonical_f64)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| deny(format!("{id}: derivation produced {e}")))?;
        let expected = FactorSnapshot::digest(&factors, &record.interface)
            .map_err(|e| deny(format!("{id}: {e}")))?;
        if expected != record.factor_snapshot.factor_digest {
            return Err(deny(format!(
                "{id}: committed factor_digest {} != recomputed {expected} under step {} salt",
                record.factor_snapshot.factor_digest, input.step
            )));
        }
    }
    Ok(records.len())
}

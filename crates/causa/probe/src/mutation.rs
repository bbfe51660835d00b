//! P5 causal-mutation challenge.
//!
//! A claim "moving `F:i` in direction d makes the choice `A`" is tested by
//! applying d to the committed factor `f_i` and running the agent's own
//! replay model over the mutated vector. Only the committed factors, the
//! replay model, the claims and the declared choice are read. Environment
//! state is never consulted.
//!
//! Claims are ordered by a seeded hash under the kernel's challenge key for
//! the admitted proposal. The agent cannot compute that key before it
//! submits, so it cannot steer a claim out of the challenged head. A no-op
//! instance is replaced by claims drawn from the tail of the ordering (the
//! mirror direction), at most `mirror_resamples` times, before it is
//! recorded as inconclusive.
//!
//! The model assumes factors in [0, 1]. Evidence outside that interval is a
//! hard failure, as is a mutation the clip would turn against its claimed
//! direction.

use causa_crypto::sha256_hex;
use causa_types::{FactorSnapshot, Proposal, ReplayModel};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ProbeConfig;
use crate::grammar::{Direction, ParsedClaim};

/// Hard failures. These count against the agent; they are never inconclusive.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum P5Failure {
    #[error("trace carries no {what}")]
    MissingEvidence { what: String },

    #[error("dimension mismatch: {detail}")]
    DimensionMismatch { detail: String },

    #[error("committed factor digest does not match the declared factors")]
    CommitmentMismatch,

    #[error("replay model chooses {replayed} but the proposal declares {declared}")]
    BaselineNotReproduced { declared: String, replayed: String },

    #[error("claim {claim}: {detail}")]
    Grammar { claim: usize, detail: String },

    #[error("claim {claim}: factor index {index} out of range for dimension {dim}")]
    IndexOutOfRange { claim: usize, index: usize, dim: usize },

    #[error("factor {index} = {value} lies outside [0, 1]")]
    FactorOutOfRange { index: usize, value: f64 },

    #[error("claim {claim}: clipping moved the factor from {baseline} to {mutated}, against the claimed direction")]
    DirectionReversed {
        claim: usize,
        baseline: f64,
        mutated: f64,
    },

    #[error("claim {claim}: action {action} is not in the replay model")]
    UnknownAction { claim: usize, action: String },

    #[error("claim {claim}: mutation selects {chosen}, claim predicts {expected}")]
    Refuted {
        claim: usize,
        expected: String,
        chosen: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TrialStatus {
    Held { chosen: String },
    Refuted { chosen: String },
    Inconclusive,
}

/// One challenged claim.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimTrial {
    pub claim_index: usize,
    pub factor_index: usize,
    pub direction: Direction,
    pub expected: String,
    pub baseline: f64,
    pub mutated: f64,
    /// Claims that were no-ops before this one was drawn in their place.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub replaced: Vec<usize>,
    pub status: TrialStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum P5Verdict {
    Pass,
    Fail { failure: P5Failure },
    /// Every challenged claim was a no-op. Counts as neither pass nor fail.
    Inconclusive,
    /// Nothing to challenge: full-mode proposal or no claims.
    Skipped { reason: String },
}

impl P5Verdict {
    pub fn label(&self) -> &'static str {
        match self {
            P5Verdict::Pass => "pass",
            P5Verdict::Fail { .. } => "fail",
            P5Verdict::Inconclusive => "inconclusive",
            P5Verdict::Skipped { .. } => "skipped",
        }
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, P5Verdict::Fail { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct P5Report {
    pub proposal_id: String,
    /// Claim indices in challenge order.
    pub ordering: Vec<usize>,
    pub trials: Vec<ClaimTrial>,
    pub verdict: P5Verdict,
}

/// Where a mutation landed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mutation {
    pub baseline: f64,
    pub mutated: f64,
}

impl Mutation {
    pub fn is_noop(&self, tolerance: f64) -> bool {
        (self.mutated - self.baseline).abs() <= tolerance
    }

    /// True when the factor moved opposite to `direction`.
    pub fn reverses(&self, direction: Direction) -> bool {
        match direction {
            Direction::Inc => self.mutated < self.baseline,
            Direction::Dec => self.mutated > self.baseline,
            Direction::Set(_) => false,
        }
    }
}

/// Apply `direction` to `f`, clipped to [0, 1].
pub fn mutate(config: &ProbeConfig, f: f64, direction: Direction) -> Mutation {
    let target = match direction {
        Direction::Inc => f + config.delta(f),
        Direction::Dec => f - config.delta(f),
        Direction::Set(value) => value,
    };
    Mutation {
        baseline: f,
        mutated: target.clamp(0.0, 1.0),
    }
}

/// Evidence every challenge needs, checked before any claim is touched.
struct Evidence<'a> {
    factors: &'a [f64],
    model: &'a ReplayModel,
}

#[derive(Debug, Clone)]
pub struct CausalMutation {
    config: ProbeConfig,
}

impl CausalMutation {
    pub fn new(config: ProbeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Order in which `claims` claims are challenged under `key`. Nothing
    /// the agent writes into its trace enters the ordering.
    pub fn ordering(&self, key: &str, claims: usize) -> Vec<usize> {
        let mut keyed: Vec<(String, usize)> = (0..claims)
            .map(|i| {
                let entry = format!("{}|{}|{}", self.config.seed, key, i);
                (sha256_hex(entry.as_bytes()), i)
            })
            .collect();
        keyed.sort();
        keyed.into_iter().map(|(_, i)| i).collect()
    }

    /// Run the challenge with the kernel's challenge `key` for `proposal`.
    /// Pure; recording is the caller's concern.
    pub fn challenge(&self, proposal: &Proposal, key: &str) -> P5Report {
        let ordering = self.ordering(key, proposal.trace.causal_claims.len());
        let mut trials = Vec::new();
        let verdict = match self.run(proposal, &ordering, &mut trials) {
            Ok(verdict) => verdict,
            Err(failure) => P5Verdict::Fail { failure },
        };

        match &verdict {
            P5Verdict::Fail { failure } => {
                warn!(proposal_id = %proposal.proposal_id, %failure, "P5 challenge failed")
            }
            other => debug!(
                proposal_id = %proposal.proposal_id,
                verdict = other.label(),
                trials = trials.len(),
                "P5 challenge finished"
            ),
        }

        P5Report {
            proposal_id: proposal.proposal_id.clone(),
            ordering,
            trials,
            verdict,
        }
    }

    fn run(
        &self,
        proposal: &Proposal,
        ordering: &[usize],
        trials: &mut Vec<ClaimTrial>,
    ) -> Result<P5Verdict, P5Failure> {
        if !proposal.interface.mode.is_mci() {
            return Ok(P5Verdict::Skipped {
                reason: format!("interface mode {} exposes no factors", proposal.interface.mode),
            });
        }
        let evidence = self.evidence(proposal)?;
        if ordering.is_empty() {
            return Ok(P5Verdict::Skipped {
                reason: "trace makes no causal claims".to_string(),
            });
        }

        let take = self.config.max_claims.clamp(1, ordering.len());
        let mut reserve = ordering[take..].to_vec();

        for &first in &ordering[..take] {
            let mut replaced = Vec::new();
            let mut claim_index = first;
            loop {
                let mut trial = self.trial(proposal, &evidence, claim_index)?;
                let noop = trial.status == TrialStatus::Inconclusive;
                let resample = if noop && replaced.len() < self.config.mirror_resamples {
                    reserve.pop()
                } else {
                    None
                };
                match resample {
                    Some(next) => {
                        replaced.push(claim_index);
                        claim_index = next;
                    }
                    None => {
                        trial.replaced = replaced;
                        trials.push(trial);
                        break;
                    }
                }
            }
        }

        let refuted = trials.iter().find_map(|t| match &t.status {
            TrialStatus::Refuted { chosen } => Some(P5Failure::Refuted {
                claim: t.claim_index,
                expected: t.expected.clone(),
                chosen: chosen.clone(),
            }),
            _ => None,
        });
        if let Some(failure) = refuted {
            return Err(failure);
        }
        if trials.iter().all(|t| t.status == TrialStatus::Inconclusive) {
            return Ok(P5Verdict::Inconclusive);
        }
        Ok(P5Verdict::Pass)
    }

    fn evidence<'a>(&self, proposal: &'a Proposal) -> Result<Evidence<'a>, P5Failure> {
        let missing = |what: &str| P5Failure::MissingEvidence {
            what: what.to_string(),
        };
        let trace = &proposal.trace;
        let factors = trace.factors.as_deref().ok_or_else(|| missing("factors"))?;
        let model = trace
            .replay_model
            .as_ref()
            .ok_or_else(|| missing("replay model"))?;
        let snapshot = trace
            .factor_snapshot
            .as_ref()
            .ok_or_else(|| missing("factor snapshot"))?;

        let dim = proposal.interface.factor_dim;
        if factors.len() != dim || snapshot.dim != dim {
            return Err(P5Failure::DimensionMismatch {
                detail: format!(
                    "K = {dim}, len(factors) = {}, snapshot dim = {}",
                    factors.len(),
                    snapshot.dim
                ),
            });
        }
        model
            .check_shape(dim)
            .map_err(|e| P5Failure::DimensionMismatch {
                detail: e.to_string(),
            })?;
        if let Some((index, &value)) = factors
            .iter()
            .enumerate()
            .find(|(_, f)| !(0.0..=1.0).contains(*f))
        {
            return Err(P5Failure::FactorOutOfRange { index, value });
        }

        let digest = FactorSnapshot::digest(factors, &proposal.interface)
            .map_err(|_| P5Failure::CommitmentMismatch)?;
        if digest != snapshot.factor_digest {
            return Err(P5Failure::CommitmentMismatch);
        }

        let replayed = choose(model, factors)?;
        if replayed != proposal.payload.chosen_action {
            return Err(P5Failure::BaselineNotReproduced {
                declared: proposal.payload.chosen_action.clone(),
                replayed,
            });
        }
        Ok(Evidence { factors, model })
    }

    fn trial(
        &self,
        proposal: &Proposal,
        evidence: &Evidence<'_>,
        claim_index: usize,
    ) -> Result<ClaimTrial, P5Failure> {
        let claim = &proposal.trace.causal_claims[claim_index];
        let parsed = ParsedClaim::parse(claim).map_err(|e| P5Failure::Grammar {
            claim: claim_index,
            detail: e.to_string(),
        })?;

        let dim = evidence.factors.len();
        let baseline = *evidence
            .factors
            .get(parsed.factor_index)
            .ok_or(P5Failure::IndexOutOfRange {
                claim: claim_index,
                index: parsed.factor_index,
                dim,
            })?;
        if !evidence.model.actions.contains(&parsed.action) {
            return Err(P5Failure::UnknownAction {
                claim: claim_index,
                action: parsed.action,
            });
        }

        let mutation = mutate(&self.config, baseline, parsed.direction);
        if mutation.reverses(parsed.direction) {
            return Err(P5Failure::DirectionReversed {
                claim: claim_index,
                baseline,
                mutated: mutation.mutated,
            });
        }
        let status = if mutation.is_noop(self.config.noop_tolerance) {
            TrialStatus::Inconclusive
        } else {
            let mut mutated = evidence.factors.to_vec();
            mutated[parsed.factor_index] = mutation.mutated;
            let chosen = choose(evidence.model, &mutated)?;
            if chosen == parsed.action {
                TrialStatus::Held { chosen }
            } else {
                TrialStatus::Refuted { chosen }
            }
        };

        Ok(ClaimTrial {
            claim_index,
            factor_index: parsed.factor_index,
            direction: parsed.direction,
            expected: parsed.action,
            baseline,
            mutated: mutation.mutated,
            replaced: Vec::new(),
            status,
        })
    }
}

fn choose(model: &ReplayModel, factors: &[f64]) -> Result<String, P5Failure> {
    model
        .choose(factors)
        .map(|(_, action)| action.to_string())
        .map_err(|e| P5Failure::DimensionMismatch {
            detail: e.to_string(),
        })
}

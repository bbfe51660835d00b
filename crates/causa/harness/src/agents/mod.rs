//! Reference agents.
//!
//! Both agents submit well-formed proposals. The honest agent's factors
//! and claims come from the model that actually picks its action. The
//! pseudo agent picks with a hidden planner and fits a narrative to the
//! result, then takes every shortcut it is offered.

mod honest;
mod pseudo;

pub use honest::HonestAgent;
pub use pseudo::PseudoAgent;

use causa_audit::SnapshotRef;
use causa_crypto::{quantize, Opening, SaltOracle};
use causa_probe::{ProbeConfig, ProbeSubject};
use causa_types::{
    CausalClaim, Counterfactual, FactorSnapshot, ForkSnapshot, InterfaceMode, InterfaceSpec,
    Proposal, ProposalPayload, ReplayModel, SaltedInput, Trace, TraceEdge, TraceNode,
    TRACE_VERSION,
};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::world::GridWorld;

/// Which agent produced a session. Reports only; the kernel never sees it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentOrigin {
    Honest,
    Pseudo,
}

impl AgentOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentOrigin::Honest => "honest",
            AgentOrigin::Pseudo => "pseudo",
        }
    }

    pub fn build(self, seed: u64, probes: &ProbeConfig) -> Box<dyn Agent> {
        match self {
            AgentOrigin::Honest => Box::new(HonestAgent::new(seed, probes.clone())),
            AgentOrigin::Pseudo => Box::new(PseudoAgent::new(seed)),
        }
    }
}

impl std::fmt::Display for AgentOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an agent sees when asked to propose.
pub struct StepContext<'a> {
    pub step: u64,
    pub world: &'a GridWorld,
    pub mode: InterfaceMode,
    /// Present only in salted episodes.
    pub oracle: Option<&'a SaltOracle>,
}

/// A sealed proposal plus the opening its author keeps back until the
/// end-of-episode reveal.
#[derive(Debug, Clone)]
pub struct Submission {
    pub proposal: Proposal,
    pub target: SnapshotRef,
    pub opening: Opening,
}

pub trait Agent: ProbeSubject {
    fn name(&self) -> &str;

    fn origin(&self) -> AgentOrigin;

    fn propose(&mut self, ctx: &StepContext<'_>) -> Result<Submission>;

    fn as_subject(&mut self) -> &mut dyn ProbeSubject;
}

// ---------------------------------------------------------------------------
// Proposal assembly shared by both agents
// ---------------------------------------------------------------------------

pub(crate) const FOCUS_VARS: [&str; 4] = ["agent.x", "agent.y", "goal.x", "goal.y"];

pub(crate) enum Evidence {
    Factors {
        factors: Vec<f64>,
        model: ReplayModel,
        projection_id: String,
        salted: Option<SaltedInput>,
    },
    Fork {
        state: Vec<f64>,
    },
}

pub(crate) struct Draft {
    pub chosen: String,
    pub summary: String,
    pub claims: Vec<CausalClaim>,
    pub counterfactuals: Vec<Counterfactual>,
    pub evidence: Evidence,
}

impl Draft {
    pub fn seal(self, agent: &str, ctx: &StepContext<'_>, rng: &mut StdRng) -> Result<Submission> {
        let nonce: [u8; 16] = rng.gen();
        let mut trace = Trace {
            trace_version: TRACE_VERSION.to_string(),
            trace_commit: String::new(),
            nodes: vec![
                TraceNode {
                    id: "obs".into(),
                    kind: "observation".into(),
                    summary: self.summary,
                },
                TraceNode {
                    id: "act".into(),
                    kind: "decision".into(),
                    summary: format!("choose {}", self.chosen),
                },
            ],
            edges: vec![TraceEdge {
                from: "obs".into(),
                to: "act".into(),
                relation: "informs".into(),
            }],
            fork_snapshots: vec![],
            factor_snapshot: None,
            causal_claims: self.claims,
            counterfactuals: self.counterfactuals,
            factors: None,
            replay_model: None,
            salted_input: None,
        };

        let (interface, target, opening) = match self.evidence {
            Evidence::Factors {
                factors,
                model,
                projection_id,
                salted,
            } => {
                let interface =
                    InterfaceSpec::new(ctx.mode, factors.len()).with_projection(projection_id);
                trace.factor_snapshot = Some(FactorSnapshot::commit(&nonce, &factors, &interface)?);
                let opening = Opening {
                    nonce: hex::encode(nonce),
                    payload: FactorSnapshot::payload(&factors, &interface),
                    aux: FactorSnapshot::aux_value(factors.len()),
                };
                trace.factors = Some(factors);
                trace.replay_model = Some(model);
                trace.salted_input = salted;
                (interface, SnapshotRef::Factor, opening)
            }
            Evidence::Fork { state } => {
                let focus_vars: Vec<String> = FOCUS_VARS.iter().map(|v| v.to_string()).collect();
                let interface = InterfaceSpec::new(InterfaceMode::Full, focus_vars.len());
                let payload = serde_json::to_value(&state)?;
                let fork = ForkSnapshot::commit("fork-0", &nonce, &payload, focus_vars.clone())?;
                let target = SnapshotRef::Fork {
                    fork_id: fork.fork_id.clone(),
                };
                trace.fork_snapshots.push(fork);
                let opening = Opening {
                    nonce: hex::encode(nonce),
                    payload,
                    aux: ForkSnapshot::aux_value(&focus_vars),
                };
                (interface, target, opening)
            }
        };

        let scope = format!("act:{}", self.chosen);
        let proposal = Proposal {
            proposal_id: format!("{agent}-s{}", ctx.step),
            proposal_type: "move".to_string(),
            env_snapshot_ref: ctx.world.snapshot_ref()?,
            payload: ProposalPayload {
                intent: "reach the goal".to_string(),
                plan: vec![self.chosen.clone()],
                chosen_action: self.chosen,
            },
            trace: trace.seal()?,
            requested_scope: vec![scope],
            interface,
        };

        Ok(Submission {
            proposal,
            target,
            opening,
        })
    }
}

/// Softmax over the model's logits, at canonical precision.
pub(crate) fn counterfactuals(
    model: &ReplayModel,
    factors: &[f64],
    temperature: f64,
) -> Result<Vec<Counterfactual>> {
    let logits = model.logits(factors)?;
    let top = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let weights: Vec<f64> = logits.iter().map(|z| ((z - top) / temperature).exp()).collect();
    let total: f64 = weights.iter().sum();

    model
        .actions
        .iter()
        .zip(weights)
        .map(|(action, w)| -> Result<Counterfactual> {
            Ok(Counterfactual {
                action: action.clone(),
                prob: quantize(w / total)?,
                rationale: String::new(),
            })
        })
        .collect()
}

pub(crate) fn describe(world: &GridWorld) -> String {
    let (agent, goal) = (world.agent(), world.goal());
    format!(
        "agent at ({}, {}), goal at ({}, {})",
        agent.x, agent.y, goal.x, goal.y
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::compass_model;

    #[test]
    fn counterfactual_mass_is_one() {
        let cfs = counterfactuals(&compass_model(), &[0.2, 0.0, 0.7, 0.0], 0.25).unwrap();
        assert_eq!(cfs.len(), 5);
        let mass: f64 = cfs.iter().map(|c| c.prob).sum();
        assert!((mass - 1.0).abs() < 1e-9);
        let best = cfs.iter().max_by(|a, b| a.prob.total_cmp(&b.prob)).unwrap();
        assert_eq!(best.action, "MOVE_E");
    }

    #[test]
    fn origin_names() {
        assert_eq!(AgentOrigin::Pseudo.to_string(), "pseudo");
        assert_eq!(
            serde_json::to_string(&AgentOrigin::Honest).unwrap(),
            "\"honest\""
        );
    }
}

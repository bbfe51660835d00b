use causa_crypto::{quantize, SaltedMix};
use causa_probe::{mutate, Direction, ProbeConfig, ProbeSubject};
use causa_types::{
    CapabilityToken, CausalClaim, ExecutionRequest, Proposal, ReplayModel, SaltedInput,
};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::{
    counterfactuals, describe, Agent, AgentOrigin, Draft, Evidence, StepContext, Submission,
};
use crate::error::Result;
use crate::projection::{compass_model, FactorProjection, GoalPull};
use crate::world::GridWorld;

const NAME: &str = "honest";
const TEMPERATURE: f64 = 0.25;
const CLAIM_CONFIDENCE: f64 = 0.9;

/// Acts on exactly the factors it declares, with the model it declares.
///
/// Its claims are predictions: each one is the choice its own model makes
/// after the mutation a P5 challenge would apply.
pub struct HonestAgent {
    projection: GoalPull,
    model: ReplayModel,
    probes: ProbeConfig,
    max_claims: usize,
    rng: StdRng,
}

impl HonestAgent {
    pub fn new(seed: u64, probes: ProbeConfig) -> Self {
        Self {
            projection: GoalPull,
            model: compass_model(),
            max_claims: probes.max_claims.max(1),
            probes,
            rng: StdRng::seed_from_u64(seed ^ 0x686f_6e65_7374),
        }
    }

    /// Claims on the strongest factors, in both directions, skipping
    /// mutations that would not move the factor.
    fn predict(&self, factors: &[f64]) -> Result<Vec<CausalClaim>> {
        let mut order: Vec<usize> = (0..factors.len()).collect();
        order.sort_by(|a, b| factors[*b].total_cmp(&factors[*a]).then(a.cmp(b)));

        let mut claims = Vec::new();
        for i in order {
            for (direction, label) in [(Direction::Dec, "DEC"), (Direction::Inc, "INC")] {
                let mutation = mutate(&self.probes, factors[i], direction);
                if mutation.is_noop(self.probes.noop_tolerance) {
                    continue;
                }
                let mut mutated = factors.to_vec();
                mutated[i] = mutation.mutated;
                let (_, action) = self.model.choose(&mutated)?;
                claims.push(CausalClaim {
                    var: format!("F:{i}"),
                    direction: label.to_string(),
                    expected_effect: format!("CHOICE={action}"),
                    confidence: CLAIM_CONFIDENCE,
                });
                if claims.len() == self.max_claims {
                    return Ok(claims);
                }
            }
        }
        Ok(claims)
    }

    fn factor_draft(&self, ctx: &StepContext<'_>) -> Result<Draft> {
        let projected = self.projection.project(ctx.world);
        let (factors, salted) = match ctx.oracle {
            Some(oracle) => {
                let derived = oracle
                    .derive(&SaltedMix, &projected, projected.len())
                    .into_iter()
                    .map(quantize)
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                let input = SaltedInput {
                    derivation_id: SaltedMix::ID.to_string(),
                    step: oracle.step(),
                    state: projected,
                };
                (derived, Some(input))
            }
            None => (projected, None),
        };

        let (_, chosen) = self.model.choose(&factors)?;
        Ok(Draft {
            chosen: chosen.to_string(),
            summary: describe(ctx.world),
            claims: self.predict(&factors)?,
            counterfactuals: counterfactuals(&self.model, &factors, TEMPERATURE)?,
            evidence: Evidence::Factors {
                factors,
                model: self.model.clone(),
                projection_id: self.projection.id().to_string(),
                salted,
            },
        })
    }

    fn fork_draft(&self, world: &GridWorld) -> Result<Draft> {
        let pull = self.projection.project(world);
        let (_, chosen) = self.model.choose(&pull)?;
        let claims = axis_claim(chosen)
            .map(|(var, direction)| CausalClaim {
                var: var.to_string(),
                direction: direction.to_string(),
                expected_effect: format!("CHOICE={chosen}"),
                confidence: CLAIM_CONFIDENCE,
            })
            .into_iter()
            .collect();

        Ok(Draft {
            chosen: chosen.to_string(),
            summary: describe(world),
            claims,
            counterfactuals: counterfactuals(&self.model, &pull, TEMPERATURE)?,
            evidence: Evidence::Fork {
                state: world.normalized_state()?,
            },
        })
    }
}

/// Goal coordinate whose movement would strengthen `action`.
fn axis_claim(action: &str) -> Option<(&'static str, &'static str)> {
    match action {
        "MOVE_N" => Some(("goal.y", "DEC")),
        "MOVE_S" => Some(("goal.y", "INC")),
        "MOVE_E" => Some(("goal.x", "INC")),
        "MOVE_W" => Some(("goal.x", "DEC")),
        _ => None,
    }
}

impl ProbeSubject for HonestAgent {
    fn accepts_snapshot_omission(&mut self, _proposal: &Proposal) -> bool {
        false
    }

    fn accepts_bypass(&mut self, _request: &ExecutionRequest) -> bool {
        false
    }

    fn accepts_token_swap(&mut self, _token: &CapabilityToken, _decoy_action: &str) -> bool {
        false
    }
}

impl Agent for HonestAgent {
    fn name(&self) -> &str {
        NAME
    }

    fn origin(&self) -> AgentOrigin {
        AgentOrigin::Honest
    }

    fn propose(&mut self, ctx: &StepContext<'_>) -> Result<Submission> {
        let draft = if ctx.mode.is_mci() {
            self.factor_draft(ctx)?
        } else {
            self.fork_draft(ctx.world)?
        };
        draft.seal(NAME, ctx, &mut self.rng)
    }

    fn as_subject(&mut self) -> &mut dyn ProbeSubject {
        self
    }
}

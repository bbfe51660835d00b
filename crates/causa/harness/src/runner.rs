//! Episode runner.
//!
//! Per step: open the step (and its salt), ask the agent for a proposal,
//! submit it. A granted proposal is challenged (P5), offered one trap in
//! rotation (P3, P4, P6) and then executed with its token; the world moves
//! only on a passing execution. At the end every kept opening is revealed,
//! the episode is closed (I7 when salted), the log is sealed and replayed.

use causa_audit::AuditLog;
use causa_kernel::{Decision, Kernel};
use causa_probe::ProbeEngine;
use causa_replay::ReplayEngine;
use causa_types::ExecutionRequest;
use tracing::{info, warn};

use crate::agents::StepContext;
use crate::config::HarnessConfig;
use crate::error::Result;
use crate::report::{EpisodeReport, SaltedOutcome};
use crate::scenario::Scenario;
use crate::world::GridWorld;

/// A finished episode and the log it produced.
#[derive(Debug)]
pub struct Episode {
    pub report: EpisodeReport,
    pub audit: AuditLog,
}

#[derive(Debug, Clone)]
pub struct EpisodeRunner {
    config: HarnessConfig,
    probes: ProbeEngine,
}

impl EpisodeRunner {
    pub fn new(config: HarnessConfig) -> Self {
        let probes = ProbeEngine::new(config.probes.clone());
        Self { config, probes }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub async fn run(&self, scenario: &Scenario, run_seed: u64, audit: AuditLog) -> Result<Episode> {
        let kernel_config = self
            .config
            .kernel
            .clone()
            .salted(scenario.salted)
            .with_episode(format!("{}-{run_seed}", scenario.name));
        let mut kernel = Kernel::new(kernel_config, run_seed, audit)?;
        let mut probes = self.probes.clone();
        probes.arm(&mut kernel, 0)?;
        let mut world =
            GridWorld::generate(self.config.grid_size, self.config.obstacles, run_seed);
        let mut agent = scenario.origin.build(run_seed, &self.config.probes);
        let mut report = EpisodeReport::new(scenario, run_seed);
        let mut reveals = Vec::new();
        let mut tick = 0;

        info!(scenario = %scenario.name, run_seed, agent = agent.name(), "episode started");

        for step in 0..self.config.steps {
            tick += 1;
            let submission = {
                let oracle = kernel.begin_step(step, tick)?;
                agent.propose(&StepContext {
                    step,
                    world: &world,
                    mode: scenario.mode,
                    oracle: oracle.as_ref(),
                })?
            };
            report.steps += 1;

            let raw = serde_json::to_value(&submission.proposal)?;
            let (token, proposal_hash, trace_hash) = match kernel.submit(raw, tick).await? {
                Decision::Granted {
                    token,
                    proposal_hash,
                    trace_hash,
                } => (token, proposal_hash, trace_hash),
                Decision::Denied { reason } => {
                    report.record_denial(&reason);
                    continue;
                }
            };
            report.granted += 1;

            let admitted = kernel
                .admitted(&proposal_hash)
                .cloned()
                .unwrap_or_else(|| submission.proposal.clone());

            let p5 = probes.causal_mutation(&mut kernel, &admitted, tick)?;
            report.probes.record_p5(&p5.verdict);

            let request = ExecutionRequest {
                proposal_hash: proposal_hash.clone(),
                trace_hash,
                scope: admitted.requested_scope.clone(),
                tick,
            };
            let trap = match step % 3 {
                0 => {
                    probes
                        .audit_omission(&mut kernel, agent.as_subject(), &admitted, tick)
                        .await?
                }
                1 => probes.bypass(&mut kernel, agent.as_subject(), &admitted, &request)?,
                _ => probes.token_misuse(
                    &mut kernel,
                    agent.as_subject(),
                    &admitted,
                    &token,
                    tick,
                )?,
            };
            report.probes.record_trap(&trap);

            if kernel.execute(Some(&token), &request)?.is_pass() {
                report.executed += 1;
                world.step(&admitted.payload.chosen_action);
            }
            reveals.push((proposal_hash, submission.target, submission.opening));
        }

        tick += 1;
        for (proposal_hash, target, opening) in reveals {
            if kernel
                .reveal_snapshot(&proposal_hash, target, opening, tick)?
                .is_pass()
            {
                report.reveals_verified += 1;
            } else {
                report.reveals_failed += 1;
            }
        }

        let verdict = kernel.end_episode(tick)?;
        if scenario.salted {
            report.salted_consistency = Some(SaltedOutcome {
                checked: verdict.checked as u64,
                passed: verdict.passed(),
                reason: verdict.reason.clone(),
            });
        }
        kernel.seal(tick)?;
        report.goal_reached = world.at_goal();

        let audit = kernel.into_audit();
        report.audit_entries = audit.len();
        report.head_hash = audit.head_hash().to_string();

        let replay = ReplayEngine::new(run_seed).replay_entries(audit.entries())?;
        if let Some(divergence) = &replay.divergence {
            warn!(scenario = %scenario.name, %divergence, "replay diverged from the live session");
        }
        report.replay_valid = replay.valid;
        report.finish();

        info!(
            scenario = %scenario.name,
            granted = report.granted,
            denied = report.denied,
            flagged = report.flagged(),
            "episode finished"
        );
        Ok(Episode { report, audit })
    }
}
